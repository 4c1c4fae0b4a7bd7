use crate::store::{DbError, FeedSource};
use tagwerk_common::{
    feed::select_feed,
    model::{Id, post::Post, user::UserMarker},
};
use thiserror::Error;
use tracing::debug;

/// Why a feed could not be produced. No partially filtered feed is ever
/// returned alongside this.
///
/// An unknown user is reported as [`DbError::UnknownUser`] inside
/// `DataUnavailable`, the same way a failed read is.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Feed data is unavailable: {0}")]
    DataUnavailable(#[from] DbError),
}

/// Loads the interests of `user_id` and every post, then keeps the posts
/// sharing a tag with those interests.
pub async fn fetch_feed<S>(source: &S, user_id: Id<UserMarker>) -> Result<Vec<Post>, FeedError>
where
    S: FeedSource + ?Sized,
{
    let interests = source
        .fetch_user_interests(user_id)
        .await?
        .ok_or(DbError::UnknownUser(user_id))?;
    let posts = source.fetch_all_posts().await?;
    let total = posts.len();

    let feed = select_feed(&interests.tag_ids, posts);
    debug!(
        %user_id,
        interests = interests.tag_ids.len(),
        total,
        selected = feed.len(),
        "Selected feed"
    );

    Ok(feed)
}
