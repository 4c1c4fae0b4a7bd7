use crate::server::{
    Result, ServerError, ServerRouter, Store,
    auth::AuthenticatedUser,
    json::{Created, Json},
};
use axum::{extract::State, http::StatusCode};
use axum_extra::routing::{RouterExt, TypedPath};
use serde::Deserialize;
use tagwerk_common::model::{
    Id,
    post::{Post, PostContent, PostMarker},
};
use tagwerk_db::feed::fetch_feed;
use tracing::info;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_get(list_posts)
        .typed_post(create_post)
        .typed_get(get_post)
        .typed_put(update_post)
        .typed_delete(delete_post)
        .typed_get(get_feed)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts", rejection(ServerError))]
struct PostsPath();

async fn list_posts(
    PostsPath(): PostsPath,
    State(store): State<Store>,
) -> Result<Json<Vec<Post>>> {
    let posts = store.fetch_all_posts().await?;

    Ok(Json(posts))
}

async fn create_post(
    PostsPath(): PostsPath,
    State(store): State<Store>,
    user: AuthenticatedUser,
    Json(post): Json<PostContent>,
) -> Result<Created<Post>> {
    let post = store.create_post(&post, user.user_id()).await?;
    info!(post_id = %post.id, author = %post.author.id, "Post was created");

    Ok(Created(post))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts/{id}", rejection(ServerError))]
struct PostPath {
    id: Id<PostMarker>,
}

async fn get_post(PostPath { id }: PostPath, State(store): State<Store>) -> Result<Json<Post>> {
    let post = store
        .fetch_post(id)
        .await?
        .ok_or(ServerError::PostByIdNotFound(id))?;

    Ok(Json(post))
}

/// Only the author of a post may change or remove it.
async fn ensure_author(
    store: &Store,
    id: Id<PostMarker>,
    user: AuthenticatedUser,
) -> Result<()> {
    let post = store
        .fetch_post(id)
        .await?
        .ok_or(ServerError::PostByIdNotFound(id))?;

    if post.is_authored_by(user.user_id()) {
        Ok(())
    } else {
        Err(ServerError::NotPostAuthor {
            post: id,
            user: user.user_id(),
        })
    }
}

async fn update_post(
    PostPath { id }: PostPath,
    State(store): State<Store>,
    user: AuthenticatedUser,
    Json(content): Json<PostContent>,
) -> Result<Json<Post>> {
    ensure_author(&store, id, user).await?;

    let post = store
        .update_post(id, &content)
        .await?
        .ok_or(ServerError::PostByIdNotFound(id))?;
    info!(post_id = %id, "Post was updated");

    Ok(Json(post))
}

async fn delete_post(
    PostPath { id }: PostPath,
    State(store): State<Store>,
    user: AuthenticatedUser,
) -> Result<StatusCode> {
    ensure_author(&store, id, user).await?;

    if !store.delete_post(id).await? {
        return Err(ServerError::PostByIdNotFound(id));
    }
    info!(post_id = %id, "Post was deleted");

    Ok(StatusCode::NO_CONTENT)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/feed", rejection(ServerError))]
struct FeedPath();

async fn get_feed(
    FeedPath(): FeedPath,
    State(store): State<Store>,
    user: AuthenticatedUser,
) -> Result<Json<Vec<Post>>> {
    let feed = fetch_feed(&*store, user.user_id()).await?;

    Ok(Json(feed))
}
