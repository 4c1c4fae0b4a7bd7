use crate::{
    feed::Tagged,
    model::{
        Id,
        tag::TagMarker,
        user::{User, UserMarker},
    },
    util::bounded_text,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const POST_TITLE_MAX_LEN: usize = 150;
pub const POST_DESCRIPTION_MAX_LEN: usize = 10_000;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct PostMarker;

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct Post {
    pub id: Id<PostMarker>,
    pub author: User,
    pub title: PostTitle,
    pub description: PostDescription,
    pub tag_ids: BTreeSet<Id<TagMarker>>,
}

/// Everything an author controls about a post. Updates replace all of it.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct PostContent {
    pub title: PostTitle,
    pub description: PostDescription,
    #[serde(default)]
    pub tag_ids: BTreeSet<Id<TagMarker>>,
}

impl Post {
    #[must_use]
    pub fn is_authored_by(&self, user_id: Id<UserMarker>) -> bool {
        self.author.id == user_id
    }
}

impl Tagged for Post {
    fn tag_ids(&self) -> &BTreeSet<Id<TagMarker>> {
        &self.tag_ids
    }
}

bounded_text!(PostTitle, InvalidPostTitleError, POST_TITLE_MAX_LEN);
bounded_text!(
    PostDescription,
    InvalidPostDescriptionError,
    POST_DESCRIPTION_MAX_LEN
);

#[cfg(test)]
mod tests {
    use crate::model::post::PostContent;

    #[test]
    fn content_without_tags_has_empty_tag_set() {
        let content = serde_json::from_str::<PostContent>(
            r#"{"title": "Hello", "description": "First post"}"#,
        )
        .unwrap();

        assert_eq!(content.title.get(), "Hello");
        assert!(content.tag_ids.is_empty());
    }

    #[test]
    fn duplicate_tag_ids_collapse() {
        let content = serde_json::from_str::<PostContent>(
            r#"{"title": "Hello", "description": "Body", "tag_ids": [3, 1, 3]}"#,
        )
        .unwrap();

        assert_eq!(
            content.tag_ids.into_iter().map(u64::from).collect::<Vec<_>>(),
            [1, 3]
        );
    }

    #[test]
    fn blank_title_is_rejected() {
        assert!(
            serde_json::from_str::<PostContent>(r#"{"title": " ", "description": "Body"}"#)
                .is_err()
        );
    }
}
