use crate::server::{
    Result, ServerError, ServerRouter, Store, TokenLifetime,
    auth::AuthenticatedUser,
    json::{Created, Json},
};
use axum::extract::State;
use axum_extra::routing::{RouterExt, TypedPath};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tagwerk_common::model::{
    Id,
    auth::AuthToken,
    post::Post,
    tag::TagMarker,
    user::{CreateUser, User, UserInterests, UserMarker},
};
use time::UtcDateTime;
use tracing::info;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_post(register_user)
        .typed_get(get_user)
        .typed_get(get_user_posts)
        .typed_get(get_user_interests)
        .typed_put(replace_user_interests)
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
struct Registration {
    user: User,
    token: String,
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/users", rejection(ServerError))]
struct UsersPath();

async fn register_user(
    UsersPath(): UsersPath,
    State(store): State<Store>,
    State(TokenLifetime(token_lifetime)): State<TokenLifetime>,
    Json(user): Json<CreateUser>,
) -> Result<Created<Registration>> {
    let user = store.create_user(&user).await?;

    let (token, authentication) = AuthToken::issue(user.id, UtcDateTime::now(), token_lifetime)?;
    store.create_authentication(&authentication).await?;
    info!(user_id = %user.id, handle = %user.handle, "User registered");

    Ok(Created(Registration {
        user,
        token: token.as_token_str(),
    }))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/users/{id}", rejection(ServerError))]
struct UserPath {
    id: Id<UserMarker>,
}

async fn get_user(UserPath { id }: UserPath, State(store): State<Store>) -> Result<Json<User>> {
    let user = store
        .fetch_user(id)
        .await?
        .ok_or(ServerError::UserByIdNotFound(id))?;

    Ok(Json(user))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/users/{id}/posts", rejection(ServerError))]
struct UserPostsPath {
    id: Id<UserMarker>,
}

async fn get_user_posts(
    UserPostsPath { id }: UserPostsPath,
    State(store): State<Store>,
) -> Result<Json<Vec<Post>>> {
    let posts = store
        .fetch_user_posts(id)
        .await?
        .ok_or(ServerError::UserByIdNotFound(id))?;

    Ok(Json(posts))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/users/{id}/interests", rejection(ServerError))]
struct UserInterestsPath {
    id: Id<UserMarker>,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize)]
struct ReplaceInterests {
    tag_ids: BTreeSet<Id<TagMarker>>,
}

async fn get_user_interests(
    UserInterestsPath { id }: UserInterestsPath,
    State(store): State<Store>,
) -> Result<Json<UserInterests>> {
    let interests = store
        .fetch_user_interests(id)
        .await?
        .ok_or(ServerError::UserByIdNotFound(id))?;

    Ok(Json(interests))
}

async fn replace_user_interests(
    UserInterestsPath { id }: UserInterestsPath,
    State(store): State<Store>,
    user: AuthenticatedUser,
    Json(ReplaceInterests { tag_ids }): Json<ReplaceInterests>,
) -> Result<Json<UserInterests>> {
    if user.user_id() != id {
        return Err(ServerError::ForeignInterests {
            acting: user.user_id(),
            target: id,
        });
    }

    let interests = store
        .replace_user_interests(id, &tag_ids)
        .await?
        .ok_or(ServerError::UserByIdNotFound(id))?;
    info!(user_id = %id, interests = interests.tag_ids.len(), "Interests updated");

    Ok(Json(interests))
}
