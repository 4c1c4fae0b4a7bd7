//! A process-local [`EntityStore`], used when no database is configured and in
//! tests. All state sits behind one lock, so every operation is atomic.

use crate::store::{DbError, EntityStore, FeedSource, IdGenerator, Result};
use async_trait::async_trait;
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};
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
use tracing::debug;

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
struct StoredPost {
    author: Id<UserMarker>,
    content: PostContent,
}

#[derive(Debug, Default)]
struct State {
    users: BTreeMap<Id<UserMarker>, User>,
    interests: BTreeMap<Id<UserMarker>, BTreeSet<Id<TagMarker>>>,
    authentications: HashMap<AuthTokenHash, Authentication>,
    tags: BTreeMap<Id<TagMarker>, Tag>,
    posts: BTreeMap<Id<PostMarker>, StoredPost>,
}

impl State {
    fn ensure_tags_exist(&self, tag_ids: &BTreeSet<Id<TagMarker>>) -> Result<()> {
        match tag_ids.iter().find(|id| !self.tags.contains_key(*id)) {
            Some(missing) => Err(DbError::UnknownTag(*missing)),
            None => Ok(()),
        }
    }

    fn full_post(&self, id: Id<PostMarker>, stored: &StoredPost) -> Option<Post> {
        let author = self.users.get(&stored.author)?.clone();

        Some(Post {
            id,
            author,
            title: stored.content.title.clone(),
            description: stored.content.description.clone(),
            tag_ids: stored.content.tag_ids.clone(),
        })
    }

    fn full_posts<'a>(
        &'a self,
        filter: impl Fn(&StoredPost) -> bool + 'a,
    ) -> impl Iterator<Item = Post> + 'a {
        self.posts
            .iter()
            .filter(move |&(_, stored)| filter(stored))
            .filter_map(move |(&id, stored)| self.full_post(id, stored))
    }
}

#[derive(Debug)]
pub struct MemoryStore {
    state: RwLock<State>,
    id_generator: IdGenerator,
}

impl MemoryStore {
    #[must_use]
    pub fn new(worker_id: WorkerId, process_id: ProcessId) -> Self {
        Self {
            state: RwLock::default(),
            id_generator: IdGenerator::new(worker_id, process_id),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(WorkerId::default(), ProcessId::default())
    }
}

#[async_trait]
impl FeedSource for MemoryStore {
    async fn fetch_user_interests(
        &self,
        user_id: Id<UserMarker>,
    ) -> Result<Option<UserInterests>> {
        let state = self.read();

        if !state.users.contains_key(&user_id) {
            return Ok(None);
        }

        Ok(Some(UserInterests {
            user_id,
            tag_ids: state.interests.get(&user_id).cloned().unwrap_or_default(),
        }))
    }

    async fn fetch_all_posts(&self) -> Result<Vec<Post>> {
        Ok(self.read().full_posts(|_| true).collect())
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn fetch_user(&self, user_id: Id<UserMarker>) -> Result<Option<User>> {
        Ok(self.read().users.get(&user_id).cloned())
    }

    async fn fetch_user_by_handle(&self, handle: &UserHandle) -> Result<Option<User>> {
        Ok(self
            .read()
            .users
            .values()
            .find(|user| &user.handle == handle)
            .cloned())
    }

    async fn create_user(&self, user: &CreateUser) -> Result<User> {
        let mut state = self.write();

        if state.users.values().any(|other| other.handle == user.handle) {
            return Err(DbError::HandleTaken(user.handle.clone()));
        }

        let created = User {
            id: self.id_generator.next()?,
            handle: user.handle.clone(),
        };
        state.users.insert(created.id, created.clone());
        debug!(user_id = %created.id, "Created user");

        Ok(created)
    }

    async fn replace_user_interests(
        &self,
        user_id: Id<UserMarker>,
        tag_ids: &BTreeSet<Id<TagMarker>>,
    ) -> Result<Option<UserInterests>> {
        let mut state = self.write();

        if !state.users.contains_key(&user_id) {
            return Ok(None);
        }
        state.ensure_tags_exist(tag_ids)?;

        state.interests.insert(user_id, tag_ids.clone());
        debug!(%user_id, interests = tag_ids.len(), "Replaced user interests");

        Ok(Some(UserInterests {
            user_id,
            tag_ids: tag_ids.clone(),
        }))
    }

    async fn create_authentication(&self, authentication: &Authentication) -> Result<()> {
        let mut state = self.write();

        if !state.users.contains_key(&authentication.user) {
            return Err(DbError::UnknownUser(authentication.user));
        }
        state
            .authentications
            .insert(authentication.token_hash.clone(), authentication.clone());

        Ok(())
    }

    async fn fetch_authentication(
        &self,
        token_hash: &AuthTokenHash,
    ) -> Result<Option<Authentication>> {
        Ok(self.read().authentications.get(token_hash).cloned())
    }

    async fn fetch_tags(&self) -> Result<Vec<Tag>> {
        Ok(self.read().tags.values().cloned().collect())
    }

    async fn fetch_tag(&self, tag_id: Id<TagMarker>) -> Result<Option<Tag>> {
        Ok(self.read().tags.get(&tag_id).cloned())
    }

    async fn create_tag(&self, tag: &CreateTag) -> Result<Tag> {
        let mut state = self.write();

        if state.tags.values().any(|other| other.label == tag.label) {
            return Err(DbError::TagLabelTaken(tag.label.clone()));
        }

        let created = Tag {
            id: self.id_generator.next()?,
            label: tag.label.clone(),
        };
        state.tags.insert(created.id, created.clone());
        debug!(tag_id = %created.id, "Created tag");

        Ok(created)
    }

    async fn fetch_post(&self, post_id: Id<PostMarker>) -> Result<Option<Post>> {
        let state = self.read();

        Ok(state
            .posts
            .get(&post_id)
            .and_then(|stored| state.full_post(post_id, stored)))
    }

    async fn fetch_user_posts(&self, user_id: Id<UserMarker>) -> Result<Option<Vec<Post>>> {
        let state = self.read();

        if !state.users.contains_key(&user_id) {
            return Ok(None);
        }

        Ok(Some(
            state
                .full_posts(|stored| stored.author == user_id)
                .collect(),
        ))
    }

    async fn create_post(&self, post: &PostContent, author: Id<UserMarker>) -> Result<Post> {
        let mut state = self.write();

        let author = state
            .users
            .get(&author)
            .cloned()
            .ok_or(DbError::UnknownUser(author))?;
        state.ensure_tags_exist(&post.tag_ids)?;

        let post_id = self.id_generator.next()?;
        state.posts.insert(
            post_id,
            StoredPost {
                author: author.id,
                content: post.clone(),
            },
        );
        debug!(%post_id, "Created post");

        Ok(Post {
            id: post_id,
            author,
            title: post.title.clone(),
            description: post.description.clone(),
            tag_ids: post.tag_ids.clone(),
        })
    }

    async fn update_post(
        &self,
        post_id: Id<PostMarker>,
        post: &PostContent,
    ) -> Result<Option<Post>> {
        let mut state = self.write();

        if !state.posts.contains_key(&post_id) {
            return Ok(None);
        }
        state.ensure_tags_exist(&post.tag_ids)?;

        let Some(stored) = state.posts.get_mut(&post_id) else {
            return Ok(None);
        };
        stored.content = post.clone();
        debug!(%post_id, "Updated post");

        Ok(state
            .posts
            .get(&post_id)
            .and_then(|stored| state.full_post(post_id, stored)))
    }

    async fn delete_post(&self, post_id: Id<PostMarker>) -> Result<bool> {
        let deleted = self.write().posts.remove(&post_id).is_some();
        if deleted {
            debug!(%post_id, "Deleted post");
        }

        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        memory::MemoryStore,
        store::{DbError, EntityStore, FeedSource},
    };
    use std::{
        collections::BTreeSet,
        io,
        sync::{Arc, Mutex},
    };
    use tagwerk_common::model::{
        Id,
        post::{PostContent, PostDescription, PostTitle},
        tag::{CreateTag, TagLabel, TagMarker},
        user::{CreateUser, UserHandle, UserMarker},
    };
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone, Default)]
    struct CapturedLog(Arc<Mutex<Vec<u8>>>);

    impl CapturedLog {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl io::Write for CapturedLog {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for CapturedLog {
        type Writer = Self;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn content(title: &str, tag_ids: &[Id<TagMarker>]) -> PostContent {
        PostContent {
            title: PostTitle::new(title).unwrap(),
            description: PostDescription::new("Some words").unwrap(),
            tag_ids: tag_ids.iter().copied().collect(),
        }
    }

    async fn user(store: &MemoryStore, handle: &str) -> Id<UserMarker> {
        store
            .create_user(&CreateUser {
                handle: UserHandle::new(handle).unwrap(),
            })
            .await
            .unwrap()
            .id
    }

    async fn tag(store: &MemoryStore, label: &str) -> Id<TagMarker> {
        store
            .create_tag(&CreateTag {
                label: TagLabel::new(label).unwrap(),
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn handles_and_labels_are_unique() {
        let store = MemoryStore::default();
        user(&store, "ada").await;
        tag(&store, "rust").await;

        let duplicate_user = store
            .create_user(&CreateUser {
                handle: UserHandle::new("ada").unwrap(),
            })
            .await;
        let duplicate_tag = store
            .create_tag(&CreateTag {
                label: TagLabel::new("rust").unwrap(),
            })
            .await;

        assert!(matches!(duplicate_user, Err(DbError::HandleTaken(_))));
        assert!(matches!(duplicate_tag, Err(DbError::TagLabelTaken(_))));
    }

    #[tokio::test]
    async fn posts_are_listed_oldest_first() {
        let store = MemoryStore::default();
        let author = user(&store, "ada").await;

        let first = store.create_post(&content("one", &[]), author).await.unwrap();
        let second = store.create_post(&content("two", &[]), author).await.unwrap();

        let ids = store
            .fetch_all_posts()
            .await
            .unwrap()
            .into_iter()
            .map(|post| post.id)
            .collect::<Vec<_>>();
        assert_eq!(ids, [first.id, second.id]);
    }

    #[tokio::test]
    async fn unknown_tags_leave_post_untouched() {
        let store = MemoryStore::default();
        let author = user(&store, "ada").await;
        let rust = tag(&store, "rust").await;
        let post = store
            .create_post(&content("one", &[rust]), author)
            .await
            .unwrap();

        let missing = Id::from(12_345_u64);
        let result = store
            .update_post(post.id, &content("changed", &[rust, missing]))
            .await;

        assert!(matches!(result, Err(DbError::UnknownTag(id)) if id == missing));
        assert_eq!(store.fetch_post(post.id).await.unwrap(), Some(post));
        assert!(matches!(
            store.create_post(&content("two", &[missing]), author).await,
            Err(DbError::UnknownTag(_))
        ));
        assert_eq!(store.fetch_all_posts().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn update_replaces_tag_set() {
        let store = MemoryStore::default();
        let author = user(&store, "ada").await;
        let rust = tag(&store, "rust").await;
        let go = tag(&store, "go").await;
        let post = store
            .create_post(&content("one", &[rust]), author)
            .await
            .unwrap();

        let updated = store
            .update_post(post.id, &content("two", &[go]))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.title.get(), "two");
        assert_eq!(updated.tag_ids, BTreeSet::from([go]));
        assert_eq!(
            store
                .update_post(Id::from(1_u64), &content("x", &[]))
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn deleting_a_post_keeps_its_tags() {
        let store = MemoryStore::default();
        let author = user(&store, "ada").await;
        let rust = tag(&store, "rust").await;
        let post = store
            .create_post(&content("one", &[rust]), author)
            .await
            .unwrap();

        assert!(store.delete_post(post.id).await.unwrap());
        assert!(!store.delete_post(post.id).await.unwrap());

        assert_eq!(store.fetch_post(post.id).await.unwrap(), None);
        assert!(store.fetch_tag(rust).await.unwrap().is_some());
        assert_eq!(
            store.fetch_user_posts(author).await.unwrap(),
            Some(Vec::new())
        );
    }

    #[tokio::test]
    async fn interests_are_replaced_whole() {
        let store = MemoryStore::default();
        let reader = user(&store, "grace").await;
        let rust = tag(&store, "rust").await;
        let go = tag(&store, "go").await;

        let initial = store.fetch_user_interests(reader).await.unwrap().unwrap();
        assert!(initial.tag_ids.is_empty());

        store
            .replace_user_interests(reader, &BTreeSet::from([rust, go]))
            .await
            .unwrap();
        store
            .replace_user_interests(reader, &BTreeSet::from([go]))
            .await
            .unwrap();

        let interests = store.fetch_user_interests(reader).await.unwrap().unwrap();
        assert_eq!(interests.tag_ids, BTreeSet::from([go]));

        let unknown_user = Id::from(99_u64);
        assert_eq!(store.fetch_user_interests(unknown_user).await.unwrap(), None);
        assert_eq!(
            store
                .replace_user_interests(unknown_user, &BTreeSet::new())
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn writes_are_logged() {
        let log = CapturedLog::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(log.clone())
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let store = MemoryStore::default();
        let reader = user(&store, "ada").await;
        let rust = tag(&store, "rust").await;
        store
            .replace_user_interests(reader, &BTreeSet::from([rust]))
            .await
            .unwrap()
            .unwrap();
        let post = store
            .create_post(&content("one", &[rust]), reader)
            .await
            .unwrap();
        store
            .update_post(post.id, &content("two", &[]))
            .await
            .unwrap()
            .unwrap();
        assert!(store.delete_post(post.id).await.unwrap());

        let contents = log.contents();
        for message in [
            "Created user",
            "Created tag",
            "Replaced user interests",
            "Created post",
            "Updated post",
            "Deleted post",
        ] {
            assert!(contents.contains(message), "{message:?} missing from {contents}");
        }
    }
}
