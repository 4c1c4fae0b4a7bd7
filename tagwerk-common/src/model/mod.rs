pub mod auth;
pub mod post;
pub mod tag;
pub mod user;

use crate::{
    model::{
        auth::InvalidAuthTokenHashError,
        post::{InvalidPostDescriptionError, InvalidPostTitleError},
        tag::InvalidTagLabelError,
        user::InvalidUserHandleError,
    },
    snowflake::{Epoch, Snowflake, SnowflakeGenerator},
    util::NonPositiveDurationError,
};
use derive_where::derive_where;
use serde::{Deserialize, Serialize};
use std::{fmt::Display, marker::PhantomData};
use thiserror::Error;
use time::{UtcDateTime, macros::utc_datetime};

#[derive(Clone, Eq, PartialEq, Debug, Hash, Error)]
pub enum ModelValidationError {
    #[error(transparent)]
    UserHandle(#[from] InvalidUserHandleError),
    #[error(transparent)]
    PostTitle(#[from] InvalidPostTitleError),
    #[error(transparent)]
    PostDescription(#[from] InvalidPostDescriptionError),
    #[error(transparent)]
    TagLabel(#[from] InvalidTagLabelError),
    #[error(transparent)]
    NonPositiveDuration(#[from] NonPositiveDurationError),
    #[error(transparent)]
    TokenHash(#[from] InvalidAuthTokenHashError),
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct TagwerkEpoch;
impl Epoch for TagwerkEpoch {
    const EPOCH_TIME: UtcDateTime = utc_datetime!(2025-01-01 00:00);
}

pub type TagwerkSnowflake = Snowflake<TagwerkEpoch>;
pub type TagwerkSnowflakeGenerator = SnowflakeGenerator<TagwerkEpoch>;

/// A typed snowflake. `Marker` only tags the kind of entity and never needs
/// any traits itself.
#[derive_where(
    Copy,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Debug,
    Default,
    Hash,
    Serialize,
    Deserialize
)]
#[serde(transparent)]
pub struct Id<Marker>(TagwerkSnowflake, #[serde(skip)] PhantomData<Marker>);

impl<Marker> Id<Marker> {
    #[must_use]
    pub fn new(snowflake: TagwerkSnowflake) -> Self {
        Self(snowflake, PhantomData)
    }

    #[must_use]
    pub fn snowflake(self) -> TagwerkSnowflake {
        self.0
    }

    /// The id as stored in `BIGINT` columns.
    #[must_use]
    pub fn to_db(self) -> i64 {
        self.0.get().cast_signed()
    }

    #[must_use]
    pub fn from_db(value: i64) -> Self {
        value.cast_unsigned().into()
    }
}

impl<Marker> Display for Id<Marker> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl<Marker> From<TagwerkSnowflake> for Id<Marker> {
    fn from(value: TagwerkSnowflake) -> Self {
        Self::new(value)
    }
}

impl<Marker> From<u64> for Id<Marker> {
    fn from(value: u64) -> Self {
        Id::new(TagwerkSnowflake::new(value))
    }
}

impl<Marker> From<Id<Marker>> for u64 {
    fn from(value: Id<Marker>) -> Self {
        value.snowflake().get()
    }
}

#[cfg(test)]
mod tests {
    use crate::model::{Id, TagwerkSnowflake, post::PostMarker, tag::TagMarker};
    use std::collections::BTreeSet;

    #[test]
    fn ids_serialize_as_plain_numbers() {
        let id = Id::<PostMarker>::from(4_242_u64);

        assert_eq!(serde_json::to_string(&id).unwrap(), "4242");
        assert_eq!(serde_json::from_str::<Id<PostMarker>>("4242").unwrap(), id);
    }

    #[test]
    fn db_representation_keeps_high_bit() {
        let id = Id::<TagMarker>::new(TagwerkSnowflake::new(u64::MAX - 1));

        assert_eq!(id.to_db(), -2);
        assert_eq!(Id::<TagMarker>::from_db(id.to_db()), id);
    }

    struct Bare;

    fn db_ids<Marker>(ids: &BTreeSet<Id<Marker>>) -> Vec<i64> {
        ids.iter().map(|id| id.to_db()).collect()
    }

    #[test]
    fn ids_are_copy_for_any_marker() {
        let ids: BTreeSet<Id<Bare>> = [3_u64, 1, 2].into_iter().map(Id::from).collect();
        let first = *ids.first().unwrap();

        assert_eq!(db_ids(&ids), [1, 2, 3]);
        assert_eq!(first, Id::from(1_u64));
    }
}
