use crate::server::{
    Result, ServerError, ServerRouter, Store,
    auth::AuthenticatedUser,
    json::{Created, Json},
};
use axum::extract::State;
use axum_extra::routing::{RouterExt, TypedPath};
use serde::Deserialize;
use tagwerk_common::model::{
    Id,
    tag::{CreateTag, Tag, TagMarker},
};
use tracing::info;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_get(list_tags)
        .typed_post(create_tag)
        .typed_get(get_tag)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/tags", rejection(ServerError))]
struct TagsPath();

async fn list_tags(TagsPath(): TagsPath, State(store): State<Store>) -> Result<Json<Vec<Tag>>> {
    Ok(Json(store.fetch_tags().await?))
}

async fn create_tag(
    TagsPath(): TagsPath,
    State(store): State<Store>,
    user: AuthenticatedUser,
    Json(tag): Json<CreateTag>,
) -> Result<Created<Tag>> {
    let tag = store.create_tag(&tag).await?;
    info!(tag_id = %tag.id, label = %tag.label, by = %user.user_id(), "Tag was created");

    Ok(Created(tag))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/tags/{id}", rejection(ServerError))]
struct TagPath {
    id: Id<TagMarker>,
}

async fn get_tag(TagPath { id }: TagPath, State(store): State<Store>) -> Result<Json<Tag>> {
    let tag = store
        .fetch_tag(id)
        .await?
        .ok_or(ServerError::TagByIdNotFound(id))?;

    Ok(Json(tag))
}
