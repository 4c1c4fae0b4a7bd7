use crate::{
    record::{AuthenticationRecord, FullPostRecord, TagRecord, UserRecord},
    store::{DbError, EntityStore, FeedSource, IdGenerator, Result},
};
use async_trait::async_trait;
use sqlx::{
    PgConnection, PgExecutor, PgPool, postgres::PgPoolOptions, query, query_as, query_scalar,
};
use std::collections::BTreeSet;
use tagwerk_common::{
    model::{
        Id,
        auth::{AuthTokenHash, Authentication},
        post::{Post, PostContent, PostMarker},
        tag::{CreateTag, Tag, TagMarker},
        user::{CreateUser, User, UserHandle, UserInterests, UserMarker},
    },
    snowflake::{ProcessId, WorkerId},
};
use time::PrimitiveDateTime;
use tracing::{debug, instrument};

const SELECT_FULL_POSTS: &str = "
    SELECT
        posts.post_snowflake,
        posts.title,
        posts.description,
        users.user_snowflake,
        users.handle,
        COALESCE(
            ARRAY_AGG(post_tags.tag_snowflake ORDER BY post_tags.tag_snowflake)
                FILTER (WHERE post_tags.tag_snowflake IS NOT NULL),
            '{}'
        ) AS tag_snowflakes
    FROM
        posts.posts
        JOIN users.users ON users.user_snowflake = posts.user_snowflake
        LEFT JOIN posts.post_tags ON post_tags.post_snowflake = posts.post_snowflake
";

const GROUP_FULL_POSTS: &str = "
    GROUP BY posts.post_snowflake, users.user_snowflake
    ORDER BY posts.post_snowflake
";

#[derive(Debug)]
pub struct DbClient {
    pool: PgPool,
    id_generator: IdGenerator,
}

impl DbClient {
    #[must_use]
    pub fn new(pool: PgPool, worker_id: WorkerId, process_id: ProcessId) -> Self {
        Self {
            pool,
            id_generator: IdGenerator::new(worker_id, process_id),
        }
    }

    pub async fn connect(
        database_url: &str,
        worker_id: WorkerId,
        process_id: ProcessId,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new().connect(database_url).await?;

        Ok(Self::new(pool, worker_id, process_id))
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;

        Ok(())
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

fn to_db_ids<Marker>(ids: &BTreeSet<Id<Marker>>) -> Vec<i64> {
    ids.iter().map(|id| id.to_db()).collect()
}

async fn fetch_full_post<'e>(
    executor: impl PgExecutor<'e>,
    post_id: Id<PostMarker>,
) -> Result<Option<Post>> {
    let sql = format!("{SELECT_FULL_POSTS} WHERE posts.post_snowflake = $1 {GROUP_FULL_POSTS}");
    let record = query_as::<_, FullPostRecord>(&sql)
        .bind(post_id.to_db())
        .fetch_optional(executor)
        .await?;

    Ok(record.map(Post::try_from).transpose()?)
}

async fn fetch_user_record<'e>(
    executor: impl PgExecutor<'e>,
    user_id: Id<UserMarker>,
) -> Result<Option<User>> {
    let record = query_as::<_, UserRecord>(
        "
        SELECT
            users.user_snowflake,
            users.handle
        FROM
            users.users
        WHERE
            users.user_snowflake = $1
        ",
    )
    .bind(user_id.to_db())
    .fetch_optional(executor)
    .await?;

    Ok(record.map(User::try_from).transpose()?)
}

/// Fails with [`DbError::UnknownTag`] for the smallest id not in the directory.
async fn ensure_tags_exist(
    conn: &mut PgConnection,
    tag_ids: &BTreeSet<Id<TagMarker>>,
) -> Result<()> {
    if tag_ids.is_empty() {
        return Ok(());
    }

    let known: Vec<i64> = query_scalar(
        "
        SELECT tags.tag_snowflake
        FROM tags.tags
        WHERE tags.tag_snowflake = ANY($1)
        ",
    )
    .bind(to_db_ids(tag_ids))
    .fetch_all(&mut *conn)
    .await?;

    match tag_ids.iter().find(|id| !known.contains(&id.to_db())) {
        Some(missing) => Err(DbError::UnknownTag(*missing)),
        None => Ok(()),
    }
}

async fn link_post_tags(
    conn: &mut PgConnection,
    post_id: Id<PostMarker>,
    tag_ids: &BTreeSet<Id<TagMarker>>,
) -> Result<()> {
    query(
        "
        INSERT INTO posts.post_tags (post_snowflake, tag_snowflake)
        SELECT $1, UNNEST($2::BIGINT[])
        ",
    )
    .bind(post_id.to_db())
    .bind(to_db_ids(tag_ids))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

#[async_trait]
impl FeedSource for DbClient {
    async fn fetch_user_interests(
        &self,
        user_id: Id<UserMarker>,
    ) -> Result<Option<UserInterests>> {
        let tag_snowflakes: Option<Vec<i64>> = query_scalar(
            "
            SELECT
                COALESCE(
                    ARRAY_AGG(user_tags.tag_snowflake ORDER BY user_tags.tag_snowflake)
                        FILTER (WHERE user_tags.tag_snowflake IS NOT NULL),
                    '{}'
                )
            FROM
                users.users
                LEFT JOIN users.user_tags ON user_tags.user_snowflake = users.user_snowflake
            WHERE
                users.user_snowflake = $1
            GROUP BY users.user_snowflake
            ",
        )
        .bind(user_id.to_db())
        .fetch_optional(&self.pool)
        .await?;

        Ok(tag_snowflakes.map(|tag_snowflakes| UserInterests {
            user_id,
            tag_ids: tag_snowflakes.into_iter().map(Id::from_db).collect(),
        }))
    }

    async fn fetch_all_posts(&self) -> Result<Vec<Post>> {
        let sql = format!("{SELECT_FULL_POSTS} {GROUP_FULL_POSTS}");
        let records = query_as::<_, FullPostRecord>(&sql)
            .fetch_all(&self.pool)
            .await?;

        let posts = records
            .into_iter()
            .map(Post::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(posts)
    }
}

#[async_trait]
impl EntityStore for DbClient {
    async fn fetch_user(&self, user_id: Id<UserMarker>) -> Result<Option<User>> {
        fetch_user_record(&self.pool, user_id).await
    }

    async fn fetch_user_by_handle(&self, handle: &UserHandle) -> Result<Option<User>> {
        let record = query_as::<_, UserRecord>(
            "
            SELECT
                users.user_snowflake,
                users.handle
            FROM
                users.users
            WHERE
                users.handle = $1
            ",
        )
        .bind(handle.get())
        .fetch_optional(&self.pool)
        .await?;

        Ok(record.map(User::try_from).transpose()?)
    }

    #[instrument(skip(self))]
    async fn create_user(&self, user: &CreateUser) -> Result<User> {
        let user_id = self.id_generator.next()?;

        let result = query(
            "
            INSERT INTO users.users (user_snowflake, handle)
            VALUES ($1, $2)
            ",
        )
        .bind(user_id.to_db())
        .bind(user.handle.get())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!(%user_id, "Created user");
                Ok(User {
                    id: user_id,
                    handle: user.handle.clone(),
                })
            }
            Err(err) if is_unique_violation(&err) => {
                Err(DbError::HandleTaken(user.handle.clone()))
            }
            Err(err) => Err(err.into()),
        }
    }

    #[instrument(skip(self))]
    async fn replace_user_interests(
        &self,
        user_id: Id<UserMarker>,
        tag_ids: &BTreeSet<Id<TagMarker>>,
    ) -> Result<Option<UserInterests>> {
        let mut tx = self.pool.begin().await?;

        let locked: Option<i64> = query_scalar(
            "
            SELECT users.user_snowflake
            FROM users.users
            WHERE users.user_snowflake = $1
            FOR UPDATE
            ",
        )
        .bind(user_id.to_db())
        .fetch_optional(&mut *tx)
        .await?;

        if locked.is_none() {
            return Ok(None);
        }

        ensure_tags_exist(&mut tx, tag_ids).await?;

        query("DELETE FROM users.user_tags WHERE user_tags.user_snowflake = $1")
            .bind(user_id.to_db())
            .execute(&mut *tx)
            .await?;

        query(
            "
            INSERT INTO users.user_tags (user_snowflake, tag_snowflake)
            SELECT $1, UNNEST($2::BIGINT[])
            ",
        )
        .bind(user_id.to_db())
        .bind(to_db_ids(tag_ids))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(%user_id, interests = tag_ids.len(), "Replaced user interests");

        Ok(Some(UserInterests {
            user_id,
            tag_ids: tag_ids.clone(),
        }))
    }

    async fn create_authentication(&self, authentication: &Authentication) -> Result<()> {
        let created_at = authentication.created_at;

        query(
            "
            INSERT INTO users.authentications
                (token_hash, user_snowflake, created_at, expires_after_seconds)
            VALUES ($1, $2, $3, $4)
            ",
        )
        .bind(authentication.token_hash.0.as_slice())
        .bind(authentication.user.to_db())
        .bind(PrimitiveDateTime::new(created_at.date(), created_at.time()))
        .bind(
            authentication
                .expires_after
                .map(|expires_after| expires_after.whole_seconds()),
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fetch_authentication(
        &self,
        token_hash: &AuthTokenHash,
    ) -> Result<Option<Authentication>> {
        let record = query_as::<_, AuthenticationRecord>(
            "
            SELECT
                authentications.user_snowflake,
                authentications.token_hash,
                authentications.created_at,
                authentications.expires_after_seconds
            FROM
                users.authentications
            WHERE
                authentications.token_hash = $1
            ",
        )
        .bind(token_hash.0.as_slice())
        .fetch_optional(&self.pool)
        .await?;

        Ok(record.map(Authentication::try_from).transpose()?)
    }

    async fn fetch_tags(&self) -> Result<Vec<Tag>> {
        let records = query_as::<_, TagRecord>(
            "
            SELECT
                tags.tag_snowflake,
                tags.label
            FROM
                tags.tags
            ORDER BY tags.tag_snowflake
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        let tags = records
            .into_iter()
            .map(Tag::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tags)
    }

    async fn fetch_tag(&self, tag_id: Id<TagMarker>) -> Result<Option<Tag>> {
        let record = query_as::<_, TagRecord>(
            "
            SELECT
                tags.tag_snowflake,
                tags.label
            FROM
                tags.tags
            WHERE
                tags.tag_snowflake = $1
            ",
        )
        .bind(tag_id.to_db())
        .fetch_optional(&self.pool)
        .await?;

        Ok(record.map(Tag::try_from).transpose()?)
    }

    #[instrument(skip(self))]
    async fn create_tag(&self, tag: &CreateTag) -> Result<Tag> {
        let tag_id = self.id_generator.next()?;

        let result = query(
            "
            INSERT INTO tags.tags (tag_snowflake, label)
            VALUES ($1, $2)
            ",
        )
        .bind(tag_id.to_db())
        .bind(tag.label.get())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!(%tag_id, "Created tag");
                Ok(Tag {
                    id: tag_id,
                    label: tag.label.clone(),
                })
            }
            Err(err) if is_unique_violation(&err) => {
                Err(DbError::TagLabelTaken(tag.label.clone()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn fetch_post(&self, post_id: Id<PostMarker>) -> Result<Option<Post>> {
        fetch_full_post(&self.pool, post_id).await
    }

    async fn fetch_user_posts(&self, user_id: Id<UserMarker>) -> Result<Option<Vec<Post>>> {
        let mut tx = self.pool.begin().await?;

        if fetch_user_record(&mut *tx, user_id).await?.is_none() {
            return Ok(None);
        }

        let sql = format!("{SELECT_FULL_POSTS} WHERE posts.user_snowflake = $1 {GROUP_FULL_POSTS}");
        let records = query_as::<_, FullPostRecord>(&sql)
            .bind(user_id.to_db())
            .fetch_all(&mut *tx)
            .await?;
        tx.commit().await?;

        let posts = records
            .into_iter()
            .map(Post::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(posts))
    }

    #[instrument(skip(self, post))]
    async fn create_post(&self, post: &PostContent, author: Id<UserMarker>) -> Result<Post> {
        let post_id = self.id_generator.next()?;
        let mut tx = self.pool.begin().await?;

        let author = fetch_user_record(&mut *tx, author)
            .await?
            .ok_or(DbError::UnknownUser(author))?;
        ensure_tags_exist(&mut tx, &post.tag_ids).await?;

        query(
            "
            INSERT INTO posts.posts (post_snowflake, title, description, user_snowflake)
            VALUES ($1, $2, $3, $4)
            ",
        )
        .bind(post_id.to_db())
        .bind(post.title.get())
        .bind(post.description.get())
        .bind(author.id.to_db())
        .execute(&mut *tx)
        .await?;
        link_post_tags(&mut tx, post_id, &post.tag_ids).await?;

        tx.commit().await?;
        debug!(%post_id, "Created post");

        Ok(Post {
            id: post_id,
            author,
            title: post.title.clone(),
            description: post.description.clone(),
            tag_ids: post.tag_ids.clone(),
        })
    }

    #[instrument(skip(self, post))]
    async fn update_post(
        &self,
        post_id: Id<PostMarker>,
        post: &PostContent,
    ) -> Result<Option<Post>> {
        let mut tx = self.pool.begin().await?;

        let updated = query(
            "
            UPDATE posts.posts
            SET title = $2, description = $3
            WHERE posts.post_snowflake = $1
            ",
        )
        .bind(post_id.to_db())
        .bind(post.title.get())
        .bind(post.description.get())
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Ok(None);
        }

        ensure_tags_exist(&mut tx, &post.tag_ids).await?;

        query("DELETE FROM posts.post_tags WHERE post_tags.post_snowflake = $1")
            .bind(post_id.to_db())
            .execute(&mut *tx)
            .await?;
        link_post_tags(&mut tx, post_id, &post.tag_ids).await?;

        let updated_post = fetch_full_post(&mut *tx, post_id).await?;
        tx.commit().await?;
        debug!(%post_id, "Updated post");

        Ok(updated_post)
    }

    #[instrument(skip(self))]
    async fn delete_post(&self, post_id: Id<PostMarker>) -> Result<bool> {
        let deleted = query("DELETE FROM posts.posts WHERE posts.post_snowflake = $1")
            .bind(post_id.to_db())
            .execute(&self.pool)
            .await?;

        let deleted = deleted.rows_affected() > 0;
        if deleted {
            debug!(%post_id, "Deleted post");
        }

        Ok(deleted)
    }
}

#[cfg(all(test, feature = "postgres-tests"))]
mod tests {
    use crate::{
        client::DbClient,
        feed::fetch_feed,
        store::{DbError, EntityStore, FeedSource},
    };
    use sqlx::PgPool;
    use std::collections::BTreeSet;
    use tagwerk_common::{
        model::{
            Id,
            auth::AuthToken,
            post::{PostContent, PostDescription, PostTitle},
            tag::{CreateTag, TagLabel, TagMarker},
            user::{CreateUser, UserHandle, UserMarker},
        },
        snowflake::{ProcessId, WorkerId},
        util::PositiveDuration,
    };
    use time::{Duration, UtcDateTime};

    fn client(pool: PgPool) -> DbClient {
        DbClient::new(pool, WorkerId::default(), ProcessId::default())
    }

    fn content(title: &str, tag_ids: &[Id<TagMarker>]) -> PostContent {
        PostContent {
            title: PostTitle::new(title).unwrap(),
            description: PostDescription::new("Some words").unwrap(),
            tag_ids: tag_ids.iter().copied().collect(),
        }
    }

    async fn user(client: &DbClient, handle: &str) -> Id<UserMarker> {
        client
            .create_user(&CreateUser {
                handle: UserHandle::new(handle).unwrap(),
            })
            .await
            .unwrap()
            .id
    }

    async fn tag(client: &DbClient, label: &str) -> Id<TagMarker> {
        client
            .create_tag(&CreateTag {
                label: TagLabel::new(label).unwrap(),
            })
            .await
            .unwrap()
            .id
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn unique_violations_are_reported(pool: PgPool) {
        let client = client(pool);
        user(&client, "ada").await;
        tag(&client, "rust").await;

        let duplicate_user = client
            .create_user(&CreateUser {
                handle: UserHandle::new("ada").unwrap(),
            })
            .await;
        let duplicate_tag = client
            .create_tag(&CreateTag {
                label: TagLabel::new("rust").unwrap(),
            })
            .await;

        assert!(matches!(duplicate_user, Err(DbError::HandleTaken(_))));
        assert!(matches!(duplicate_tag, Err(DbError::TagLabelTaken(_))));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn interests_start_empty_and_are_replaced(pool: PgPool) {
        let client = client(pool);
        let reader = user(&client, "ada").await;
        let rust = tag(&client, "rust").await;
        let sql = tag(&client, "sql").await;

        let interests = client.fetch_user_interests(reader).await.unwrap().unwrap();
        assert!(interests.tag_ids.is_empty());
        assert!(
            client
                .fetch_user_interests(Id::from(42_u64))
                .await
                .unwrap()
                .is_none()
        );

        client
            .replace_user_interests(reader, &BTreeSet::from([rust, sql]))
            .await
            .unwrap()
            .unwrap();
        client
            .replace_user_interests(reader, &BTreeSet::from([sql]))
            .await
            .unwrap()
            .unwrap();

        let interests = client.fetch_user_interests(reader).await.unwrap().unwrap();
        assert_eq!(interests.tag_ids, BTreeSet::from([sql]));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn unknown_tags_roll_back_writes(pool: PgPool) {
        let client = client(pool);
        let author = user(&client, "ada").await;
        let rust = tag(&client, "rust").await;
        let post = client
            .create_post(&content("one", &[rust]), author)
            .await
            .unwrap();
        let missing = Id::from(42_u64);

        let update = client
            .update_post(post.id, &content("changed", &[missing]))
            .await;
        let create = client
            .create_post(&content("two", &[rust, missing]), author)
            .await;
        let interests = client
            .replace_user_interests(author, &BTreeSet::from([missing]))
            .await;

        assert!(matches!(update, Err(DbError::UnknownTag(id)) if id == missing));
        assert!(matches!(create, Err(DbError::UnknownTag(id)) if id == missing));
        assert!(matches!(interests, Err(DbError::UnknownTag(id)) if id == missing));

        let posts = client.fetch_all_posts().await.unwrap();
        assert_eq!(posts, [post]);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn feed_reads_from_postgres(pool: PgPool) {
        let client = client(pool);
        let reader = user(&client, "reader").await;
        let author = user(&client, "author").await;
        let rust = tag(&client, "rust").await;
        let sql = tag(&client, "sql").await;

        let x = client.create_post(&content("x", &[rust]), author).await.unwrap();
        client.create_post(&content("y", &[sql]), author).await.unwrap();
        client.create_post(&content("z", &[]), author).await.unwrap();
        client
            .replace_user_interests(reader, &BTreeSet::from([rust]))
            .await
            .unwrap()
            .unwrap();

        let feed = fetch_feed(&client, reader).await.unwrap();
        assert_eq!(feed, [x.clone()]);

        assert!(client.delete_post(x.id).await.unwrap());
        assert!(fetch_feed(&client, reader).await.unwrap().is_empty());
        assert_eq!(client.fetch_tags().await.unwrap().len(), 2);
        assert!(!client.delete_post(x.id).await.unwrap());
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn authentications_are_found_by_hash(pool: PgPool) {
        let client = client(pool);
        let user_id = user(&client, "ada").await;
        let lifetime = PositiveDuration::new(Duration::hours(1));
        let (_, authentication) = AuthToken::issue(user_id, UtcDateTime::now(), lifetime).unwrap();

        client
            .create_authentication(&authentication)
            .await
            .unwrap();
        let stored = client
            .fetch_authentication(&authentication.token_hash)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(stored.user, user_id);
        assert_eq!(stored.token_hash, authentication.token_hash);
        assert_eq!(stored.expires_after, lifetime);
    }
}
