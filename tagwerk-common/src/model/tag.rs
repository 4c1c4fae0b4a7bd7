use crate::{model::Id, util::bounded_text};
use serde::{Deserialize, Serialize};

pub const TAG_LABEL_MAX_LEN: usize = 50;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct TagMarker;

/// A shared category label. Tags outlive every post and user referring to them.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct Tag {
    pub id: Id<TagMarker>,
    pub label: TagLabel,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct CreateTag {
    pub label: TagLabel,
}

bounded_text!(TagLabel, InvalidTagLabelError, TAG_LABEL_MAX_LEN);
