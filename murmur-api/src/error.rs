use std::str::FromStr;

use anyhow::{anyhow, Context};
use serde_json::json;
use uuid::Uuid;

use crate::CommentId;

/// Coarse classification callers use to decide how to react to an error
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// Rejected before any store call; nothing changed
    Validation,

    /// Edit or delete by someone other than the author; nothing changed
    Authorization,

    /// The store could not commit atomically; optimistic state must be reverted
    Conflict,

    /// The action needs a signed-in user; the login prompt should be shown
    NotAuthenticated,

    Internal,
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Unknown error: {0}")]
    Unknown(String),

    #[error("Comment body is empty")]
    EmptyBody,

    #[error("Comment body is {len} characters long, the maximum is {max}")]
    BodyTooLong { len: usize, max: usize },

    #[error("Null byte in string is not allowed {0:?}")]
    NullByteInString(String),

    #[error("Unknown subject type {0:?}")]
    UnknownSubjectType(String),

    #[error("Unknown vote action {0:?}")]
    UnknownVoteAction(String),

    #[error("Unknown comment {0:?}")]
    UnknownComment(CommentId),

    #[error("Comment {0:?} is itself a reply and cannot be replied to")]
    ReplyTooDeep(CommentId),

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Conflicting concurrent update: {0}")]
    Conflict(String),

    #[error("Store unavailable")]
    StoreUnavailable,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::EmptyBody
            | Error::BodyTooLong { .. }
            | Error::NullByteInString(_)
            | Error::UnknownSubjectType(_)
            | Error::UnknownVoteAction(_)
            | Error::UnknownComment(_)
            | Error::ReplyTooDeep(_) => ErrorKind::Validation,
            Error::PermissionDenied => ErrorKind::Authorization,
            Error::Conflict(_) | Error::StoreUnavailable => ErrorKind::Conflict,
            Error::NotAuthenticated => ErrorKind::NotAuthenticated,
            Error::Unknown(_) => ErrorKind::Internal,
        }
    }

    pub fn status_code(&self) -> http::StatusCode {
        use http::StatusCode;
        match self {
            Error::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::EmptyBody => StatusCode::BAD_REQUEST,
            Error::BodyTooLong { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::NullByteInString(_) => StatusCode::BAD_REQUEST,
            Error::UnknownSubjectType(_) => StatusCode::NOT_FOUND,
            Error::UnknownVoteAction(_) => StatusCode::BAD_REQUEST,
            Error::UnknownComment(_) => StatusCode::NOT_FOUND,
            Error::ReplyTooDeep(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::PermissionDenied => StatusCode::FORBIDDEN,
            Error::NotAuthenticated => StatusCode::UNAUTHORIZED,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn contents(&self) -> Vec<u8> {
        serde_json::to_vec(&match self {
            Error::Unknown(msg) => json!({
                "message": msg,
                "type": "unknown",
            }),
            Error::EmptyBody => json!({
                "message": "comment body is empty",
                "type": "empty-body",
            }),
            Error::BodyTooLong { len, max } => json!({
                "message": "comment body is too long",
                "type": "body-too-long",
                "len": len,
                "max": max,
            }),
            Error::NullByteInString(s) => json!({
                "message": "there was a null byte in argument string",
                "type": "null-byte",
                "string": s,
            }),
            Error::UnknownSubjectType(s) => json!({
                "message": "unknown subject type",
                "type": "unknown-subject-type",
                "subject-type": s,
            }),
            Error::UnknownVoteAction(s) => json!({
                "message": "unknown vote action",
                "type": "unknown-vote-action",
                "action": s,
            }),
            Error::UnknownComment(c) => json!({
                "message": "unknown comment",
                "type": "unknown-comment",
                "comment": c.0,
            }),
            Error::ReplyTooDeep(c) => json!({
                "message": "replies can only be posted on top-level comments",
                "type": "reply-too-deep",
                "comment": c.0,
            }),
            Error::PermissionDenied => json!({
                "message": "permission denied",
                "type": "permission-denied",
            }),
            Error::NotAuthenticated => json!({
                "message": "sign in to do this",
                "type": "not-authenticated",
            }),
            Error::Conflict(msg) => json!({
                "message": msg,
                "type": "conflict",
            }),
            Error::StoreUnavailable => json!({
                "message": "store unavailable, try again later",
                "type": "store-unavailable",
            }),
        })
        .expect("serializing error contents")
    }

    pub fn parse(body: &[u8]) -> anyhow::Result<Error> {
        let data: serde_json::Value =
            serde_json::from_slice(body).context("parsing error contents")?;
        let str_field = |name: &str| -> anyhow::Result<String> {
            data.get(name)
                .and_then(|v| v.as_str())
                .map(String::from)
                .ok_or_else(|| anyhow!("error contents has no string field {name:?}"))
        };
        let comment_field = || -> anyhow::Result<CommentId> {
            let raw = str_field("comment")?;
            Ok(CommentId(
                Uuid::from_str(&raw).context("parsing comment id of error")?,
            ))
        };
        let usize_field = |name: &str| -> anyhow::Result<usize> {
            data.get(name)
                .and_then(|v| v.as_u64())
                .map(|v| v as usize)
                .ok_or_else(|| anyhow!("error contents has no integer field {name:?}"))
        };
        Ok(
            match data
                .get("type")
                .and_then(|t| t.as_str())
                .ok_or_else(|| anyhow!("error type is not a string"))?
            {
                "unknown" => Error::Unknown(str_field("message").unwrap_or_default()),
                "empty-body" => Error::EmptyBody,
                "body-too-long" => Error::BodyTooLong {
                    len: usize_field("len")?,
                    max: usize_field("max")?,
                },
                "null-byte" => Error::NullByteInString(str_field("string")?),
                "unknown-subject-type" => Error::UnknownSubjectType(str_field("subject-type")?),
                "unknown-vote-action" => Error::UnknownVoteAction(str_field("action")?),
                "unknown-comment" => Error::UnknownComment(comment_field()?),
                "reply-too-deep" => Error::ReplyTooDeep(comment_field()?),
                "permission-denied" => Error::PermissionDenied,
                "not-authenticated" => Error::NotAuthenticated,
                "conflict" => Error::Conflict(str_field("message")?),
                "store-unavailable" => Error::StoreUnavailable,
                _ => return Err(anyhow!("error contents has unknown type")),
            },
        )
    }
}
