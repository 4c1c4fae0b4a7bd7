//! Selecting the posts relevant to a user's interests.

use crate::model::{Id, tag::TagMarker};
use std::collections::BTreeSet;

/// Anything carrying a set of topic tags.
pub trait Tagged {
    fn tag_ids(&self) -> &BTreeSet<Id<TagMarker>>;
}

impl<T: Tagged + ?Sized> Tagged for &T {
    fn tag_ids(&self) -> &BTreeSet<Id<TagMarker>> {
        (**self).tag_ids()
    }
}

/// Whether `item` shares at least one tag with `interests`.
#[must_use]
pub fn matches_interests<T: Tagged + ?Sized>(
    interests: &BTreeSet<Id<TagMarker>>,
    item: &T,
) -> bool {
    !item.tag_ids().is_disjoint(interests)
}

/// Filters `posts` down to the ones sharing a tag with `interests`, keeping
/// their relative order.
///
/// Without any interests nothing is filtered. With interests, untagged posts
/// never match, and tag ids unknown to the directory simply never intersect.
#[must_use]
pub fn select_feed<T, I>(interests: &BTreeSet<Id<TagMarker>>, posts: I) -> Vec<T>
where
    T: Tagged,
    I: IntoIterator<Item = T>,
{
    if interests.is_empty() {
        return posts.into_iter().collect();
    }

    posts
        .into_iter()
        .filter(|post| matches_interests(interests, post))
        .collect()
}
