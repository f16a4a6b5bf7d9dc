//! Нормализованный кэш серверных сущностей.
//!
//! `EntityStore` не делает I/O: все таблицы живут в памяти, а изменять их
//! можно только через `upsert`/`remove` и несколько узких операций
//! (маркеры голосов, избранное, агрегаты рейтинга). Чтение идёт через чистые проекции.
//!
//! ## Таблицы
//! - посты, комментарии, категории, пользователи по идентификатору;
//! - `post_comments`: пост → идентификаторы его закэшированных комментариев;
//! - `votes`: маркер голоса на ключ (сущность, пользователь), не больше одного;
//! - `favorites`: пользователь → множество постов.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use tracing::debug;

use crate::comment_tree::CommentTree;
use crate::models::{
    Category, Comment, EntityKind, Favorite, Like, Post, RatingSnapshot, User, VoteKey,
    VoteTarget, VoteType,
};

#[derive(Debug, Clone, PartialEq)]
/// Сущность любого типа, которую можно положить в хранилище.
pub enum EntityRecord {
    /// Пост.
    Post(Post),
    /// Комментарий.
    Comment(Comment),
    /// Категория.
    Category(Category),
    /// Пользователь.
    User(User),
    /// Голос.
    Like(Like),
    /// Избранное.
    Favorite(Favorite),
}

impl EntityRecord {
    /// Тип сущности.
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Post(_) => EntityKind::Post,
            Self::Comment(_) => EntityKind::Comment,
            Self::Category(_) => EntityKind::Category,
            Self::User(_) => EntityKind::User,
            Self::Like(_) => EntityKind::Like,
            Self::Favorite(_) => EntityKind::Favorite,
        }
    }
}

impl From<Post> for EntityRecord {
    fn from(value: Post) -> Self {
        Self::Post(value)
    }
}

impl From<Comment> for EntityRecord {
    fn from(value: Comment) -> Self {
        Self::Comment(value)
    }
}

impl From<Category> for EntityRecord {
    fn from(value: Category) -> Self {
        Self::Category(value)
    }
}

impl From<User> for EntityRecord {
    fn from(value: User) -> Self {
        Self::User(value)
    }
}

impl From<Like> for EntityRecord {
    fn from(value: Like) -> Self {
        Self::Like(value)
    }
}

impl From<Favorite> for EntityRecord {
    fn from(value: Favorite) -> Self {
        Self::Favorite(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// Ключ сущности для удаления.
pub enum EntityKey {
    /// Пост по идентификатору.
    Post(i64),
    /// Комментарий по идентификатору.
    Comment(i64),
    /// Категория по идентификатору.
    Category(i64),
    /// Пользователь по идентификатору.
    User(i64),
    /// Голос по ключу маркера.
    Like(VoteKey),
    /// Избранное по паре (пользователь, пост).
    Favorite(Favorite),
}

impl EntityKey {
    /// Тип сущности.
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Post(_) => EntityKind::Post,
            Self::Comment(_) => EntityKind::Comment,
            Self::Category(_) => EntityKind::Category,
            Self::User(_) => EntityKind::User,
            Self::Like(_) => EntityKind::Like,
            Self::Favorite(_) => EntityKind::Favorite,
        }
    }
}

#[derive(Debug, Default)]
/// In-memory хранилище сущностей форума.
pub struct EntityStore {
    posts: HashMap<i64, Post>,
    post_list: Vec<i64>,
    current_post: Option<i64>,
    comments: HashMap<i64, Comment>,
    post_comments: HashMap<i64, BTreeSet<i64>>,
    comments_loaded: HashSet<i64>,
    categories: BTreeMap<i64, Category>,
    users: HashMap<i64, User>,
    votes: HashMap<VoteKey, VoteType>,
    likes_observed: HashSet<VoteTarget>,
    favorites: HashMap<i64, BTreeSet<i64>>,
    favorites_loaded: HashSet<i64>,
}

impl EntityStore {
    /// Пустое хранилище.
    pub fn new() -> Self {
        Self::default()
    }

    /// Вставляет сущность или вливает её поля в уже известную.
    ///
    /// Поля, которых нет во входящем payload, сохраняются.
    pub fn upsert(&mut self, record: impl Into<EntityRecord>) {
        match record.into() {
            EntityRecord::Post(post) => match self.posts.get_mut(&post.id) {
                Some(stored) => stored.merge(post),
                None => {
                    self.posts.insert(post.id, post);
                }
            },
            EntityRecord::Comment(comment) => self.upsert_comment(comment),
            EntityRecord::Category(category) => match self.categories.get_mut(&category.id) {
                Some(stored) => stored.merge(category),
                None => {
                    self.categories.insert(category.id, category);
                }
            },
            EntityRecord::User(user) => match self.users.get_mut(&user.id) {
                Some(stored) => stored.merge(user),
                None => {
                    self.users.insert(user.id, user);
                }
            },
            EntityRecord::Like(like) => {
                self.votes.insert(like.key(), like.vote);
            }
            EntityRecord::Favorite(favorite) => {
                self.favorites
                    .entry(favorite.user_id)
                    .or_default()
                    .insert(favorite.post_id);
            }
        }
    }

    fn upsert_comment(&mut self, comment: Comment) {
        if let Some(stored) = self.comments.get_mut(&comment.id) {
            if stored.post_id != comment.post_id {
                debug!(
                    comment_id = comment.id,
                    cached_post = stored.post_id,
                    incoming_post = comment.post_id,
                    "comment payload names another post, keeping cached owner"
                );
            }
            stored.merge(comment);
            return;
        }
        self.post_comments
            .entry(comment.post_id)
            .or_default()
            .insert(comment.id);
        self.comments.insert(comment.id, comment);
    }

    /// Удаляет сущность вместе с зависимыми отношениями.
    ///
    /// Возвращает `true`, если что-то было удалено.
    pub fn remove(&mut self, key: EntityKey) -> bool {
        match key {
            EntityKey::Post(id) => self.remove_post(id),
            EntityKey::Comment(id) => self.remove_comment(id),
            EntityKey::Category(id) => {
                let removed = self.categories.remove(&id).is_some();
                for post in self.posts.values_mut() {
                    if let Some(categories) = post.categories.as_mut() {
                        categories.remove(&id);
                    }
                }
                removed
            }
            EntityKey::User(id) => self.users.remove(&id).is_some(),
            EntityKey::Like(key) => self.votes.remove(&key).is_some(),
            EntityKey::Favorite(favorite) => self
                .favorites
                .get_mut(&favorite.user_id)
                .is_some_and(|posts| posts.remove(&favorite.post_id)),
        }
    }

    fn remove_post(&mut self, id: i64) -> bool {
        let removed = self.posts.remove(&id).is_some();
        self.post_list.retain(|post_id| *post_id != id);
        if self.current_post == Some(id) {
            self.current_post = None;
        }

        let comment_ids = self.post_comments.remove(&id).unwrap_or_default();
        for comment_id in comment_ids {
            self.comments.remove(&comment_id);
            self.forget_votes(VoteTarget::Comment(comment_id));
        }
        self.comments_loaded.remove(&id);
        self.forget_votes(VoteTarget::Post(id));
        for posts in self.favorites.values_mut() {
            posts.remove(&id);
        }
        removed
    }

    fn remove_comment(&mut self, id: i64) -> bool {
        let Some(comment) = self.comments.get(&id) else {
            return false;
        };
        let post_id = comment.post_id;

        // Ответы без родителя в кэше не нужны: вместе с комментарием уходит всё поддерево.
        let mut doomed = HashSet::from([id]);
        let mut frontier = vec![id];
        while let Some(parent) = frontier.pop() {
            for comment in self.comments.values() {
                if comment.parent_comment_id == Some(parent) && doomed.insert(comment.id) {
                    frontier.push(comment.id);
                }
            }
        }

        for comment_id in doomed {
            self.comments.remove(&comment_id);
            self.forget_votes(VoteTarget::Comment(comment_id));
            if let Some(ids) = self.post_comments.get_mut(&post_id) {
                ids.remove(&comment_id);
            }
        }
        true
    }

    fn forget_votes(&mut self, target: VoteTarget) {
        self.votes.retain(|key, _| key.target != target);
        self.likes_observed.remove(&target);
    }

    /// Заменяет кэш комментариев поста авторитетным списком с сервера.
    pub fn replace_comments(&mut self, post_id: i64, comments: Vec<Comment>) {
        let incoming: HashSet<i64> = comments.iter().map(|comment| comment.id).collect();
        let stale: Vec<i64> = self
            .post_comments
            .get(&post_id)
            .map(|ids| {
                ids.iter()
                    .filter(|id| !incoming.contains(id))
                    .copied()
                    .collect()
            })
            .unwrap_or_default();
        for comment_id in stale {
            self.comments.remove(&comment_id);
            self.forget_votes(VoteTarget::Comment(comment_id));
            if let Some(ids) = self.post_comments.get_mut(&post_id) {
                ids.remove(&comment_id);
            }
        }

        for comment in comments {
            if comment.post_id == post_id {
                self.upsert_comment(comment);
            }
        }
        self.post_comments.entry(post_id).or_default();
        self.comments_loaded.insert(post_id);
    }

    /// Запоминает порядок постов из последнего запроса списка.
    pub fn replace_post_list(&mut self, ids: Vec<i64>) {
        self.post_list = ids;
    }

    /// Добавляет пост в конец текущего списка, если его там нет.
    pub fn append_to_post_list(&mut self, id: i64) {
        if !self.post_list.contains(&id) {
            self.post_list.push(id);
        }
    }

    /// Отмечает пост, который сейчас просматривается.
    pub fn set_current_post(&mut self, id: Option<i64>) {
        self.current_post = id;
    }

    /// Применяет авторитетный список голосов сущности.
    ///
    /// После этого локальные маркеры для сущности больше не считаются
    /// предсказанием: их заменяет серверная правда. Исключение `pending`:
    /// маркер, по которому голос ещё в пути, пишет сам intent.
    pub fn replace_likes(
        &mut self,
        target: VoteTarget,
        likes: &[Like],
        pending: Option<VoteKey>,
    ) {
        let kept = pending
            .filter(|key| key.target == target)
            .map(|key| (key, self.votes.get(&key).copied()));
        self.votes.retain(|key, _| key.target != target);
        for like in likes.iter().filter(|like| like.target == target) {
            self.votes.insert(like.key(), like.vote);
        }
        if let Some((key, vote)) = kept {
            self.set_vote(key, vote);
        }
        self.likes_observed.insert(target);
    }

    /// Записывает локальный маркер голоса (`None`, если голоса нет).
    pub fn set_vote(&mut self, key: VoteKey, vote: Option<VoteType>) {
        match vote {
            Some(vote) => {
                self.votes.insert(key, vote);
            }
            None => {
                self.votes.remove(&key);
            }
        }
    }

    /// Заменяет агрегаты рейтинга на авторитетные.
    ///
    /// Возвращает `false`, если сущность уже не в кэше.
    pub fn apply_rating(&mut self, target: VoteTarget, snapshot: RatingSnapshot) -> bool {
        match target {
            VoteTarget::Post(id) => match self.posts.get_mut(&id) {
                Some(post) => {
                    post.rating = Some(snapshot.rating);
                    post.likes_count = Some(snapshot.likes_count);
                    true
                }
                None => false,
            },
            VoteTarget::Comment(id) => match self.comments.get_mut(&id) {
                Some(comment) => {
                    comment.rating = Some(snapshot.rating);
                    comment.likes_count = Some(snapshot.likes_count);
                    true
                }
                None => false,
            },
        }
    }

    /// Включает или выключает пост в избранном пользователя.
    pub fn set_favorite(&mut self, user_id: i64, post_id: i64, member: bool) {
        let favorite = Favorite { user_id, post_id };
        if member {
            self.upsert(favorite);
        } else {
            self.remove(EntityKey::Favorite(favorite));
        }
    }

    /// Заменяет избранное пользователя авторитетным списком.
    pub fn replace_favorites(&mut self, user_id: i64, post_ids: impl IntoIterator<Item = i64>) {
        self.favorites
            .insert(user_id, post_ids.into_iter().collect());
        self.favorites_loaded.insert(user_id);
    }

    /// Сбрасывает кэши, привязанные к пользователю (маркеры и избранное).
    pub fn clear_identity(&mut self, user_id: i64) {
        self.votes.retain(|key, _| key.user_id != user_id);
        self.favorites.remove(&user_id);
        self.favorites_loaded.remove(&user_id);
    }

    /// Пост по идентификатору.
    pub fn post(&self, id: i64) -> Option<&Post> {
        self.posts.get(&id)
    }

    /// Посты в порядке последнего запроса списка.
    pub fn posts(&self) -> Vec<&Post> {
        self.post_list
            .iter()
            .filter_map(|id| self.posts.get(id))
            .collect()
    }

    /// Просматриваемый сейчас пост.
    pub fn current_post(&self) -> Option<&Post> {
        self.current_post.and_then(|id| self.posts.get(&id))
    }

    /// Комментарий по идентификатору.
    pub fn comment(&self, id: i64) -> Option<&Comment> {
        self.comments.get(&id)
    }

    /// `true`, если список комментариев поста уже загружался.
    pub fn comments_loaded(&self, post_id: i64) -> bool {
        self.comments_loaded.contains(&post_id)
    }

    /// Закэшированные комментарии поста по возрастанию времени создания.
    pub fn comments_for_post(&self, post_id: i64) -> Vec<&Comment> {
        let mut comments: Vec<&Comment> = self
            .post_comments
            .get(&post_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.comments.get(id))
            .collect();
        comments.sort_by_key(|comment| (comment.created_at, comment.id));
        comments
    }

    /// Количество закэшированных комментариев поста, включая ответы.
    pub fn comment_count(&self, post_id: i64) -> usize {
        self.post_comments.get(&post_id).map_or(0, BTreeSet::len)
    }

    /// Дерево комментариев поста, построенное заново.
    pub fn comment_tree(&self, post_id: i64) -> CommentTree {
        let comments: Vec<Comment> = self
            .comments_for_post(post_id)
            .into_iter()
            .cloned()
            .collect();
        CommentTree::build(post_id, &comments)
    }

    /// Категория по идентификатору.
    pub fn category(&self, id: i64) -> Option<&Category> {
        self.categories.get(&id)
    }

    /// Все закэшированные категории по возрастанию идентификатора.
    pub fn categories(&self) -> Vec<&Category> {
        self.categories.values().collect()
    }

    /// Категории из набора идентификаторов; неизвестные пропускаются.
    pub fn categories_by_ids<'a>(&self, ids: impl IntoIterator<Item = &'a i64>) -> Vec<&Category> {
        ids.into_iter()
            .filter_map(|id| self.categories.get(id))
            .collect()
    }

    /// Пользователь по идентификатору.
    pub fn user(&self, id: i64) -> Option<&User> {
        self.users.get(&id)
    }

    /// Все закэшированные пользователи по возрастанию идентификатора.
    pub fn users(&self) -> Vec<&User> {
        let mut users: Vec<&User> = self.users.values().collect();
        users.sort_by_key(|user| user.id);
        users
    }

    /// Маркер голоса по ключу.
    pub fn vote(&self, key: VoteKey) -> Option<VoteType> {
        self.votes.get(&key).copied()
    }

    /// `true`, если для сущности уже приходил авторитетный список голосов.
    pub fn likes_observed(&self, target: VoteTarget) -> bool {
        self.likes_observed.contains(&target)
    }

    /// `true`, если пост в избранном пользователя.
    pub fn is_favorite(&self, user_id: i64, post_id: i64) -> bool {
        self.favorites
            .get(&user_id)
            .is_some_and(|posts| posts.contains(&post_id))
    }

    /// Избранные посты пользователя по возрастанию идентификатора.
    pub fn favorites(&self, user_id: i64) -> Vec<i64> {
        self.favorites
            .get(&user_id)
            .map(|posts| posts.iter().copied().collect())
            .unwrap_or_default()
    }

    /// `true`, если избранное пользователя уже загружалось с сервера.
    pub fn favorites_loaded(&self, user_id: i64) -> bool {
        self.favorites_loaded.contains(&user_id)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::{TimeZone, Utc};

    use super::{EntityKey, EntityStore};
    use crate::models::{
        Category, Comment, Favorite, Like, Post, RatingSnapshot, VoteKey, VoteTarget, VoteType,
    };

    fn comment(id: i64, post_id: i64, parent: Option<i64>, ts: i64) -> Comment {
        Comment {
            created_at: Utc.timestamp_opt(ts, 0).single(),
            ..Comment::new(id, post_id, parent)
        }
    }

    #[test]
    fn partial_upsert_keeps_known_fields() {
        let mut store = EntityStore::new();
        store.upsert(Post {
            title: Some("title".into()),
            content: Some("content".into()),
            locked: Some(true),
            ..Post::new(1)
        });
        store.upsert(Post {
            rating: Some(4),
            ..Post::new(1)
        });

        let post = store.post(1).expect("post cached");
        assert_eq!(post.title.as_deref(), Some("title"));
        assert_eq!(post.content.as_deref(), Some("content"));
        assert_eq!(post.rating, Some(4));
        assert!(post.is_locked());
    }

    #[test]
    fn deleting_post_cascades_to_comments_and_current_post() {
        let mut store = EntityStore::new();
        store.upsert(Post::new(1));
        store.upsert(Post::new(2));
        store.replace_post_list(vec![1, 2]);
        store.set_current_post(Some(1));
        store.replace_comments(1, vec![comment(10, 1, None, 1), comment(11, 1, Some(10), 2)]);
        store.replace_comments(2, vec![comment(20, 2, None, 1)]);
        store.upsert(Like {
            target: VoteTarget::Comment(10),
            author_id: 7,
            vote: VoteType::Like,
        });
        store.upsert(Favorite {
            user_id: 7,
            post_id: 1,
        });

        assert!(store.remove(EntityKey::Post(1)));

        assert!(store.post(1).is_none());
        assert!(store.current_post().is_none());
        assert!(store.comment(10).is_none());
        assert!(store.comment(11).is_none());
        assert!(store.comments_for_post(1).is_empty());
        assert!(!store.comments_loaded(1));
        assert!(store.vote(VoteKey::new(VoteTarget::Comment(10), 7)).is_none());
        assert!(!store.is_favorite(7, 1));
        assert_eq!(store.posts().len(), 1);
        assert_eq!(store.comment_count(2), 1);
    }

    #[test]
    fn removing_comment_takes_its_replies() {
        let mut store = EntityStore::new();
        store.replace_comments(
            1,
            vec![
                comment(1, 1, None, 1),
                comment(2, 1, Some(1), 2),
                comment(3, 1, Some(2), 3),
                comment(4, 1, None, 4),
            ],
        );

        assert!(store.remove(EntityKey::Comment(1)));

        let remaining: Vec<i64> = store.comments_for_post(1).iter().map(|c| c.id).collect();
        assert_eq!(remaining, vec![4]);
        assert!(!store.remove(EntityKey::Comment(1)));
    }

    #[test]
    fn replace_comments_drops_comments_missing_on_server() {
        let mut store = EntityStore::new();
        store.replace_comments(1, vec![comment(1, 1, None, 1), comment(2, 1, None, 2)]);
        store.replace_comments(1, vec![comment(2, 1, None, 2), comment(3, 1, None, 3)]);

        let ids: Vec<i64> = store.comments_for_post(1).iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![2, 3]);
        assert!(store.comment(1).is_none());
    }

    #[test]
    fn comments_are_ordered_by_creation_time() {
        let mut store = EntityStore::new();
        store.upsert(comment(5, 1, None, 30));
        store.upsert(comment(6, 1, None, 10));
        store.upsert(comment(7, 1, None, 20));

        let ids: Vec<i64> = store.comments_for_post(1).iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![6, 7, 5]);
        assert!(!store.comments_loaded(1));
    }

    #[test]
    fn at_most_one_vote_per_key() {
        let mut store = EntityStore::new();
        let key = VoteKey::new(VoteTarget::Post(1), 3);
        store.upsert(Like {
            target: VoteTarget::Post(1),
            author_id: 3,
            vote: VoteType::Like,
        });
        store.upsert(Like {
            target: VoteTarget::Post(1),
            author_id: 3,
            vote: VoteType::Dislike,
        });

        assert_eq!(store.vote(key), Some(VoteType::Dislike));
        assert!(store.remove(EntityKey::Like(key)));
        assert!(store.vote(key).is_none());
    }

    #[test]
    fn replace_likes_supersedes_local_markers() {
        let mut store = EntityStore::new();
        let target = VoteTarget::Comment(9);
        store.set_vote(VoteKey::new(target, 1), Some(VoteType::Like));
        store.set_vote(VoteKey::new(target, 2), Some(VoteType::Like));

        store.replace_likes(
            target,
            &[Like {
                target,
                author_id: 2,
                vote: VoteType::Dislike,
            }],
            None,
        );

        assert!(store.vote(VoteKey::new(target, 1)).is_none());
        assert_eq!(store.vote(VoteKey::new(target, 2)), Some(VoteType::Dislike));
        assert!(store.likes_observed(target));
    }

    #[test]
    fn replace_likes_keeps_marker_of_vote_in_flight() {
        let mut store = EntityStore::new();
        let target = VoteTarget::Post(4);
        let mine = VoteKey::new(target, 1);
        store.set_vote(mine, Some(VoteType::Like));

        store.replace_likes(
            target,
            &[
                Like {
                    target,
                    author_id: 1,
                    vote: VoteType::Dislike,
                },
                Like {
                    target,
                    author_id: 2,
                    vote: VoteType::Like,
                },
            ],
            Some(mine),
        );

        assert_eq!(store.vote(mine), Some(VoteType::Like));
        assert_eq!(store.vote(VoteKey::new(target, 2)), Some(VoteType::Like));
        assert!(store.likes_observed(target));

        // Снятый в пути голос тоже не воскрешается серверным списком.
        store.set_vote(mine, None);
        store.replace_likes(
            target,
            &[Like {
                target,
                author_id: 1,
                vote: VoteType::Dislike,
            }],
            Some(mine),
        );
        assert!(store.vote(mine).is_none());
    }

    #[test]
    fn apply_rating_ignores_uncached_entities() {
        let mut store = EntityStore::new();
        let snapshot = RatingSnapshot {
            rating: 2,
            likes_count: 3,
        };
        assert!(!store.apply_rating(VoteTarget::Post(1), snapshot));

        store.upsert(Post::new(1));
        assert!(store.apply_rating(VoteTarget::Post(1), snapshot));
        assert_eq!(store.post(1).and_then(|post| post.likes_count), Some(3));
    }

    #[test]
    fn removing_category_strips_it_from_posts() {
        let mut store = EntityStore::new();
        store.upsert(Category {
            id: 3,
            title: Some("rust".into()),
            description: None,
        });
        store.upsert(Post {
            categories: Some(BTreeSet::from([3, 4])),
            ..Post::new(1)
        });

        assert!(store.remove(EntityKey::Category(3)));
        assert_eq!(
            store.post(1).and_then(|post| post.categories.clone()),
            Some(BTreeSet::from([4]))
        );
        assert!(store.categories_by_ids(&[3, 4]).is_empty());
    }

    #[test]
    fn clear_identity_keeps_other_users_votes() {
        let mut store = EntityStore::new();
        let target = VoteTarget::Post(1);
        store.set_vote(VoteKey::new(target, 1), Some(VoteType::Like));
        store.set_vote(VoteKey::new(target, 2), Some(VoteType::Dislike));
        store.replace_favorites(1, [1, 2]);

        store.clear_identity(1);

        assert!(store.vote(VoteKey::new(target, 1)).is_none());
        assert_eq!(store.vote(VoteKey::new(target, 2)), Some(VoteType::Dislike));
        assert!(store.favorites(1).is_empty());
        assert!(!store.favorites_loaded(1));
    }
}
