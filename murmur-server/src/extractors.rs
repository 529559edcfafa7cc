use std::sync::Arc;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{self, request},
};
use murmur_api::{UserId, Uuid};
use murmur_client::Comments;

use crate::Error;

#[derive(Clone, axum::extract::FromRef)]
pub struct AppState {
    pub comments: Arc<Comments>,
}

/// Who is making the request. Authentication happens upstream: the gateway
/// in front of this server forwards the signed-in user's id as a bearer
/// token, and sends no `Authorization` header for anonymous visitors.
pub struct Actor(pub Option<UserId>);

#[async_trait]
impl<S: Sync> FromRequestParts<S> for Actor {
    type Rejection = Error;

    async fn from_request_parts(req: &mut request::Parts, _state: &S) -> Result<Actor, Error> {
        match req.headers.get(http::header::AUTHORIZATION) {
            None => Ok(Actor(None)),
            Some(auth) => {
                let auth = auth.to_str().map_err(|_| Error::not_authenticated())?;
                let mut auth = auth.split(' ');
                if !auth
                    .next()
                    .ok_or_else(Error::not_authenticated)?
                    .eq_ignore_ascii_case("bearer")
                {
                    return Err(Error::not_authenticated());
                }
                let user = auth.next().ok_or_else(Error::not_authenticated)?;
                if auth.next().is_some() {
                    return Err(Error::not_authenticated());
                }
                let user = Uuid::try_from(user).map_err(|_| Error::not_authenticated())?;
                Ok(Actor(Some(UserId(user))))
            }
        }
    }
}
