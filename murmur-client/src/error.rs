use crate::api::{self, ErrorKind};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The store failed or could not be reached
    #[error(transparent)]
    Store(#[from] anyhow::Error),

    #[error(transparent)]
    Api(#[from] api::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Store(_) => ErrorKind::Conflict,
            Error::Api(e) => e.kind(),
        }
    }

    pub fn not_authenticated() -> Error {
        Error::Api(api::Error::NotAuthenticated)
    }

    pub fn permission_denied() -> Error {
        Error::Api(api::Error::PermissionDenied)
    }

    pub fn unknown_comment(id: api::CommentId) -> Error {
        Error::Api(api::Error::UnknownComment(id))
    }

    /// The api-level error to report to a remote caller, logging store details
    /// instead of leaking them
    pub fn into_api(self) -> api::Error {
        match self {
            Error::Store(err) => {
                tracing::error!(?err, "store failure");
                api::Error::StoreUnavailable
            }
            Error::Api(err) => err,
        }
    }
}
