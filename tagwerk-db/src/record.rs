use sqlx::FromRow;
use tagwerk_common::model::{
    Id, ModelValidationError,
    auth::Authentication,
    post::{Post, PostDescription, PostTitle},
    tag::{Tag, TagLabel},
    user::{User, UserHandle},
};
use time::{Duration, PrimitiveDateTime};

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, FromRow)]
pub(crate) struct UserRecord {
    pub user_snowflake: i64,
    pub handle: String,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, FromRow)]
pub(crate) struct TagRecord {
    pub tag_snowflake: i64,
    pub label: String,
}

/// A post joined with its author and aggregated tag links.
#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, FromRow)]
pub(crate) struct FullPostRecord {
    pub post_snowflake: i64,
    pub title: String,
    pub description: String,
    pub user_snowflake: i64,
    pub handle: String,
    pub tag_snowflakes: Vec<i64>,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct AuthenticationRecord {
    pub user_snowflake: i64,
    pub token_hash: Vec<u8>,
    pub created_at: PrimitiveDateTime,
    pub expires_after_seconds: Option<i64>,
}

impl TryFrom<UserRecord> for User {
    type Error = ModelValidationError;

    fn try_from(value: UserRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Id::from_db(value.user_snowflake),
            handle: UserHandle::new(value.handle)?,
        })
    }
}

impl TryFrom<TagRecord> for Tag {
    type Error = ModelValidationError;

    fn try_from(value: TagRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Id::from_db(value.tag_snowflake),
            label: TagLabel::new(value.label)?,
        })
    }
}

impl TryFrom<FullPostRecord> for Post {
    type Error = ModelValidationError;

    fn try_from(value: FullPostRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Id::from_db(value.post_snowflake),
            author: User {
                id: Id::from_db(value.user_snowflake),
                handle: UserHandle::new(value.handle)?,
            },
            title: PostTitle::new(value.title)?,
            description: PostDescription::new(value.description)?,
            tag_ids: value.tag_snowflakes.into_iter().map(Id::from_db).collect(),
        })
    }
}

impl TryFrom<AuthenticationRecord> for Authentication {
    type Error = ModelValidationError;

    fn try_from(value: AuthenticationRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            user: Id::from_db(value.user_snowflake),
            token_hash: value.token_hash.try_into()?,
            created_at: value.created_at.as_utc(),
            expires_after: value
                .expires_after_seconds
                .map(|seconds| Duration::seconds(seconds).try_into())
                .transpose()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::record::{AuthenticationRecord, FullPostRecord};
    use tagwerk_common::model::{ModelValidationError, auth::Authentication, post::Post};
    use time::macros::datetime;

    fn post_record() -> FullPostRecord {
        FullPostRecord {
            post_snowflake: 10,
            title: "Title".to_owned(),
            description: "Body".to_owned(),
            user_snowflake: 2,
            handle: "ada".to_owned(),
            tag_snowflakes: vec![5, 1],
        }
    }

    #[test]
    fn post_record_converts() {
        let post = Post::try_from(post_record()).unwrap();

        assert_eq!(u64::from(post.id), 10);
        assert_eq!(u64::from(post.author.id), 2);
        assert_eq!(
            post.tag_ids.into_iter().map(u64::from).collect::<Vec<_>>(),
            [1, 5]
        );
    }

    #[test]
    fn invalid_rows_are_reported() {
        let record = FullPostRecord {
            title: String::new(),
            ..post_record()
        };

        assert!(matches!(
            Post::try_from(record),
            Err(ModelValidationError::PostTitle(_))
        ));
    }

    #[test]
    fn authentication_lifetime_must_be_positive() {
        let record = AuthenticationRecord {
            user_snowflake: 1,
            token_hash: vec![0; 32],
            created_at: datetime!(2025-03-01 00:00),
            expires_after_seconds: Some(0),
        };

        assert!(matches!(
            Authentication::try_from(record),
            Err(ModelValidationError::NonPositiveDuration(_))
        ));
    }
}
