use axum::{
    Router,
    extract::{
        FromRef, Request,
        rejection::{JsonRejection, PathRejection},
    },
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
};
use axum_extra::typed_header::TypedHeaderRejection;
use json::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tagwerk_common::{
    model::{
        Id,
        auth::{AuthTokenDecodeError, AuthTokenHashError},
        post::PostMarker,
        tag::TagMarker,
        user::UserMarker,
    },
    util::PositiveDuration,
};
use tagwerk_db::{
    feed::FeedError,
    store::{DbError, EntityStore},
};
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

mod auth;
mod json;
mod routes;

pub type Store = Arc<dyn EntityStore>;

pub type ServerRouter = Router<ServerState>;

/// How long newly issued tokens stay valid. `None` means forever.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Hash)]
pub struct TokenLifetime(pub Option<PositiveDuration>);

#[derive(Clone, Debug, FromRef)]
pub struct ServerState {
    pub store: Store,
    pub token_lifetime: TokenLifetime,
}

pub fn routes() -> ServerRouter {
    routes::routes().fallback(fallback)
}

/// The complete service, ready to be served.
pub fn app(state: ServerState) -> Router {
    routes()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn fallback(request: Request) -> ServerError {
    ServerError::UnknownRoute(request.into_parts().0.uri)
}

pub type Result<T, E = ServerError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Unknown route requested: {0}")]
    UnknownRoute(Uri),
    #[error("Path rejected: {0}")]
    PathRejection(#[from] PathRejection),
    #[error("Incoming JSON rejected: {0}")]
    JsonRejection(#[from] JsonRejection),
    #[error("JSON response could not be serialized: {0}")]
    JsonResponse(#[from] serde_json::Error),
    #[error("Authorization header was missing or invalid: {0}")]
    InvalidAuthorizationHeader(TypedHeaderRejection),
    #[error("The provided auth token could not be decoded: {0}")]
    InvalidAuthToken(#[from] AuthTokenDecodeError),
    #[error("The auth token could not be hashed: {0}")]
    AuthTokenHash(#[from] AuthTokenHashError),
    #[error("Provided token was invalid")]
    InvalidToken,
    #[error(transparent)]
    Database(#[from] DbError),
    #[error(transparent)]
    Feed(#[from] FeedError),
    #[error("Post with id {0} was not found.")]
    PostByIdNotFound(Id<PostMarker>),
    #[error("User with id {0} was not found.")]
    UserByIdNotFound(Id<UserMarker>),
    #[error("Tag with id {0} was not found.")]
    TagByIdNotFound(Id<TagMarker>),
    #[error("User {user} is not the author of post {post}.")]
    NotPostAuthor {
        post: Id<PostMarker>,
        user: Id<UserMarker>,
    },
    #[error("User {acting} may not change the interests of user {target}.")]
    ForeignInterests {
        acting: Id<UserMarker>,
        target: Id<UserMarker>,
    },
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::UnknownRoute(_)
            | ServerError::PathRejection(_)
            | ServerError::PostByIdNotFound(_)
            | ServerError::UserByIdNotFound(_)
            | ServerError::TagByIdNotFound(_)
            | ServerError::Database(DbError::UnknownUser(_))
            | ServerError::Feed(FeedError::DataUnavailable(DbError::UnknownUser(_))) => {
                StatusCode::NOT_FOUND
            }
            ServerError::InvalidAuthorizationHeader(rejection) if rejection.is_missing() => {
                StatusCode::UNAUTHORIZED
            }
            ServerError::InvalidToken => StatusCode::UNAUTHORIZED,
            ServerError::NotPostAuthor { .. } | ServerError::ForeignInterests { .. } => {
                StatusCode::FORBIDDEN
            }
            ServerError::JsonRejection(_)
            | ServerError::InvalidAuthorizationHeader(_)
            | ServerError::InvalidAuthToken(_) => StatusCode::BAD_REQUEST,
            ServerError::Database(DbError::HandleTaken(_) | DbError::TagLabelTaken(_)) => {
                StatusCode::CONFLICT
            }
            ServerError::Database(DbError::UnknownTag(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            ServerError::Feed(FeedError::DataUnavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::JsonResponse(_)
            | ServerError::Database(_)
            | ServerError::AuthTokenHash(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
struct ErrorResponse {
    status: u16,
    message: String,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            error!(error = %self, %status, "Replying with error");
        } else {
            warn!(error = %self, %status, "Rejecting request");
        }

        // Internal details stay in the log.
        let message = if status.is_server_error() {
            status.canonical_reason().unwrap_or_default().to_owned()
        } else {
            self.to_string()
        };

        let error_response = ErrorResponse {
            status: status.as_u16(),
            message,
        };
        (status, Json(error_response)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use crate::server::ServerError;
    use axum::http::StatusCode;
    use tagwerk_common::{model::Id, snowflake::SnowflakeTimeError};
    use tagwerk_db::{feed::FeedError, store::DbError};

    #[test]
    fn unknown_feed_reader_is_not_found() {
        let error = ServerError::Feed(FeedError::DataUnavailable(DbError::UnknownUser(
            Id::from(7_u64),
        )));

        assert_eq!(error.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn failing_feed_store_is_unavailable() {
        let error = ServerError::Feed(FeedError::DataUnavailable(DbError::IdGeneration(
            SnowflakeTimeError::TimeBeforeEpoch,
        )));

        assert_eq!(error.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
