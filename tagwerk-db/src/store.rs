//! The storage boundary shared by the Postgres and in-memory backends.

use async_trait::async_trait;
use std::{
    collections::BTreeSet,
    fmt::Debug,
    sync::{Mutex, PoisonError},
};
use tagwerk_common::{
    model::{
        Id, ModelValidationError, TagwerkSnowflakeGenerator,
        auth::{AuthTokenHash, Authentication},
        post::{Post, PostContent, PostMarker},
        tag::{CreateTag, Tag, TagLabel, TagMarker},
        user::{CreateUser, User, UserHandle, UserInterests, UserMarker},
    },
    snowflake::{ProcessId, SnowflakeTimeError, WorkerId},
};
use thiserror::Error;

pub type Result<T, E = DbError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("An object in the database was invalid: {0}")]
    Data(#[from] ModelValidationError),
    #[error("No id could be generated: {0}")]
    IdGeneration(#[from] SnowflakeTimeError),
    #[error("Tag with id {0} does not exist.")]
    UnknownTag(Id<TagMarker>),
    #[error("User with id {0} does not exist.")]
    UnknownUser(Id<UserMarker>),
    #[error("The handle {0:?} is already taken.")]
    HandleTaken(UserHandle),
    #[error("A tag labelled {0:?} already exists.")]
    TagLabelTaken(TagLabel),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error("Migrating the database failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// The two reads a feed is built from.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// `None` if the user does not exist.
    async fn fetch_user_interests(&self, user_id: Id<UserMarker>)
    -> Result<Option<UserInterests>>;

    /// Every post with its tags, oldest first.
    async fn fetch_all_posts(&self) -> Result<Vec<Post>>;
}

/// Durable storage for users, posts, tags and their associations.
///
/// Every method is atomic on its own: a failing write leaves the previous
/// state untouched.
#[async_trait]
pub trait EntityStore: FeedSource + Debug {
    async fn fetch_user(&self, user_id: Id<UserMarker>) -> Result<Option<User>>;

    async fn fetch_user_by_handle(&self, handle: &UserHandle) -> Result<Option<User>>;

    async fn create_user(&self, user: &CreateUser) -> Result<User>;

    /// Replaces the whole interest set. `None` if the user does not exist.
    async fn replace_user_interests(
        &self,
        user_id: Id<UserMarker>,
        tag_ids: &BTreeSet<Id<TagMarker>>,
    ) -> Result<Option<UserInterests>>;

    async fn create_authentication(&self, authentication: &Authentication) -> Result<()>;

    async fn fetch_authentication(
        &self,
        token_hash: &AuthTokenHash,
    ) -> Result<Option<Authentication>>;

    async fn fetch_tags(&self) -> Result<Vec<Tag>>;

    async fn fetch_tag(&self, tag_id: Id<TagMarker>) -> Result<Option<Tag>>;

    async fn create_tag(&self, tag: &CreateTag) -> Result<Tag>;

    async fn fetch_post(&self, post_id: Id<PostMarker>) -> Result<Option<Post>>;

    /// `None` if the user does not exist.
    async fn fetch_user_posts(&self, user_id: Id<UserMarker>) -> Result<Option<Vec<Post>>>;

    async fn create_post(&self, post: &PostContent, author: Id<UserMarker>) -> Result<Post>;

    /// Replaces title, description and tags. `None` if the post does not exist.
    async fn update_post(&self, post_id: Id<PostMarker>, post: &PostContent)
    -> Result<Option<Post>>;

    /// Removes the post and its tag links. Returns whether a post was removed.
    async fn delete_post(&self, post_id: Id<PostMarker>) -> Result<bool>;
}

#[derive(Debug)]
pub(crate) struct IdGenerator(Mutex<TagwerkSnowflakeGenerator>);

impl IdGenerator {
    pub fn new(worker_id: WorkerId, process_id: ProcessId) -> Self {
        Self(Mutex::new(TagwerkSnowflakeGenerator::new(
            worker_id, process_id,
        )))
    }

    pub fn next<Marker>(&self) -> Result<Id<Marker>> {
        let snowflake = self
            .0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .generate()?;

        Ok(snowflake.into())
    }
}
