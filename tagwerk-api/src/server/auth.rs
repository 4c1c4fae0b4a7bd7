use crate::server::{ServerError, Store};
use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};
use tagwerk_common::model::{Id, auth::AuthToken, user::UserMarker};
use tagwerk_db::store::EntityStore;
use time::UtcDateTime;
use tracing::debug;

type AuthorizationHeader = TypedHeader<Authorization<Bearer>>;

/// The user a request acts as, taken from its bearer token.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct AuthenticatedUser {
    id: Id<UserMarker>,
}

impl AuthenticatedUser {
    #[must_use]
    pub fn user_id(self) -> Id<UserMarker> {
        self.id
    }
}

/// Looks up the stored record for `token` and checks it still admits the
/// token at `now`.
pub(crate) async fn authenticate(
    store: &dyn EntityStore,
    token: &AuthToken,
    now: UtcDateTime,
) -> Result<AuthenticatedUser, ServerError> {
    let authentication = store
        .fetch_authentication(&token.hash()?)
        .await?
        .ok_or(ServerError::InvalidToken)?;

    if !authentication.admits(token, now) {
        return Err(ServerError::InvalidToken);
    }

    debug!(user_id = %authentication.user, "Authenticated request");
    Ok(AuthenticatedUser {
        id: authentication.user,
    })
}

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    Store: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token: AuthToken = AuthorizationHeader::from_request_parts(parts, state)
            .await
            .map_err(ServerError::InvalidAuthorizationHeader)?
            .token()
            .parse()?;

        let store = Store::from_ref(state);
        authenticate(&*store, &token, UtcDateTime::now()).await
    }
}

#[cfg(test)]
mod tests {
    use crate::server::{ServerError, auth::authenticate};
    use tagwerk_common::{
        model::{
            Id,
            auth::AuthToken,
            user::{CreateUser, UserHandle, UserMarker},
        },
        util::PositiveDuration,
    };
    use tagwerk_db::{memory::MemoryStore, store::EntityStore};
    use time::{Duration, macros::utc_datetime};

    async fn user(store: &MemoryStore) -> Id<UserMarker> {
        store
            .create_user(&CreateUser {
                handle: UserHandle::new("ada").unwrap(),
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn tokens_are_checked_against_their_record() {
        let store = MemoryStore::default();
        let user_id = user(&store).await;
        let issued_at = utc_datetime!(2025-06-01 12:00);
        let (token, authentication) = AuthToken::issue(
            user_id,
            issued_at,
            PositiveDuration::new(Duration::hours(1)),
        )
        .unwrap();
        store.create_authentication(&authentication).await.unwrap();

        let accepted = authenticate(&store, &token, issued_at + Duration::minutes(30))
            .await
            .unwrap();
        assert_eq!(accepted.user_id(), user_id);

        let expired = authenticate(&store, &token, issued_at + Duration::hours(2)).await;
        assert!(matches!(expired, Err(ServerError::InvalidToken)));

        let relabelled = AuthToken {
            user_id: Id::from(u64::from(user_id) + 1),
            ..token
        };
        let forged = authenticate(&store, &relabelled, issued_at).await;
        assert!(matches!(forged, Err(ServerError::InvalidToken)));

        let unknown = authenticate(&store, &AuthToken::generate_random(user_id), issued_at).await;
        assert!(matches!(unknown, Err(ServerError::InvalidToken)));
    }
}
