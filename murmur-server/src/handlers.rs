use std::{str::FromStr, sync::Arc};

use axum::{
    extract::{Path, State},
    Json,
};
use murmur_api::{
    Comment, CommentId, CommentTree, EditComment, NewComment, Removal, Subject, SubjectType, Uuid,
    VoteAction, VoteOutcome,
};
use murmur_client::Comments;

use crate::{extractors::*, Error};

fn subject(kind: &str, id: String) -> Result<Subject, Error> {
    let subject = Subject::new(SubjectType::from_str(kind)?, id);
    subject.validate()?;
    Ok(subject)
}

pub async fn fetch_tree(
    Actor(user): Actor,
    State(comments): State<Arc<Comments>>,
    Path((kind, id)): Path<(String, String)>,
) -> Result<Json<CommentTree>, Error> {
    let subject = subject(&kind, id)?;
    Ok(Json(comments.build_tree(&subject, user).await?))
}

pub async fn create_comment(
    Actor(user): Actor,
    State(comments): State<Arc<Comments>>,
    Path((kind, id)): Path<(String, String)>,
    Json(data): Json<NewComment>,
) -> Result<Json<Comment>, Error> {
    let subject = subject(&kind, id)?;
    Ok(Json(
        comments.create_comment(user, &subject, &data.body).await?,
    ))
}

pub async fn create_reply(
    Actor(user): Actor,
    State(comments): State<Arc<Comments>>,
    Path(parent): Path<Uuid>,
    Json(data): Json<NewComment>,
) -> Result<Json<Comment>, Error> {
    Ok(Json(
        comments
            .create_reply(user, CommentId(parent), &data.body)
            .await?,
    ))
}

pub async fn edit_comment(
    Actor(user): Actor,
    State(comments): State<Arc<Comments>>,
    Path(comment): Path<Uuid>,
    Json(data): Json<EditComment>,
) -> Result<Json<Comment>, Error> {
    Ok(Json(
        comments
            .edit_comment(user, CommentId(comment), &data.body)
            .await?,
    ))
}

pub async fn delete_comment(
    Actor(user): Actor,
    State(comments): State<Arc<Comments>>,
    Path(comment): Path<Uuid>,
) -> Result<Json<Removal>, Error> {
    Ok(Json(
        comments.delete_comment(user, CommentId(comment)).await?,
    ))
}

pub async fn vote(
    Actor(user): Actor,
    State(comments): State<Arc<Comments>>,
    Path(comment): Path<Uuid>,
    Json(action): Json<VoteAction>,
) -> Result<Json<VoteOutcome>, Error> {
    Ok(Json(comments.vote(user, CommentId(comment), action).await?))
}
