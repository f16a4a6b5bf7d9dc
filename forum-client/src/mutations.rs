//! Mutation Coordinator: загрузки, создание, редактирование и удаление.
//!
//! Создание, редактирование и удаление не оптимистичны: хранилище меняется
//! только по подтверждению сервера, неудача оставляет его как было.
//! Избранное переключается оптимистично, с откатом, как голоса.
//!
//! Протокол ошибок общий для всех операций:
//! - `AuthorizationRejected` сбрасывает сессию и перечитывает затронутую сущность;
//! - `NotFound` удаляет затронутую сущность из хранилища;
//! - остальное просто возвращается вызывающему.

use std::sync::Arc;

use tracing::{debug, warn};
use validator::Validate;

use crate::Shared;
use crate::api::{CommentPayload, PostPayload};
use crate::error::{ForumError, ForumResult};
use crate::models::{
    Category, CategoryDraft, Comment, CommentDraft, Favorite, Post, PostDraft, PostQuery,
    ProfileUpdate, User, VoteKey, VoteTarget,
};
use crate::session::SessionEnd;
use crate::store::{EntityKey, EntityStore};

fn merge_post(
    store: &mut EntityStore,
    payload: PostPayload,
    pending: &impl Fn(VoteTarget) -> Option<VoteKey>,
    observed: &mut Vec<VoteTarget>,
) -> Post {
    let PostPayload {
        post,
        likes,
        categories,
        author,
    } = payload;
    let id = post.id;
    for category in categories {
        store.upsert(category);
    }
    if let Some(author) = author {
        store.upsert(author);
    }
    let fallback = post.clone();
    store.upsert(post);
    if let Some(likes) = likes {
        let target = VoteTarget::Post(id);
        store.replace_likes(target, &likes, pending(target));
        observed.push(target);
    }
    store.post(id).cloned().unwrap_or(fallback)
}

fn merge_comment(
    store: &mut EntityStore,
    payload: CommentPayload,
    pending: &impl Fn(VoteTarget) -> Option<VoteKey>,
    observed: &mut Vec<VoteTarget>,
) -> Comment {
    let CommentPayload {
        comment,
        likes,
        author,
    } = payload;
    let id = comment.id;
    if let Some(author) = author {
        store.upsert(author);
    }
    let fallback = comment.clone();
    store.upsert(comment);
    if let Some(likes) = likes {
        let target = VoteTarget::Comment(id);
        store.replace_likes(target, &likes, pending(target));
        observed.push(target);
    }
    store.comment(id).cloned().unwrap_or(fallback)
}

impl Shared {
    pub(crate) fn apply_posts(&self, payloads: Vec<PostPayload>) -> Vec<Post> {
        let mut observed = Vec::new();
        let posts = {
            let mut store = self.store.lock();
            payloads
                .into_iter()
                .map(|payload| {
                    merge_post(
                        &mut store,
                        payload,
                        &|target| self.pending_vote(target),
                        &mut observed,
                    )
                })
                .collect()
        };
        self.sync_observed_votes(&observed);
        posts
    }

    pub(crate) fn apply_post(&self, payload: PostPayload) -> Post {
        let mut observed = Vec::new();
        let post = merge_post(
            &mut self.store.lock(),
            payload,
            &|target| self.pending_vote(target),
            &mut observed,
        );
        self.sync_observed_votes(&observed);
        post
    }

    pub(crate) fn apply_comment(&self, payload: CommentPayload) -> Comment {
        let mut observed = Vec::new();
        let comment = merge_comment(
            &mut self.store.lock(),
            payload,
            &|target| self.pending_vote(target),
            &mut observed,
        );
        self.sync_observed_votes(&observed);
        comment
    }

    /// Заменяет кэш комментариев поста авторитетным списком.
    pub(crate) fn apply_comment_list(&self, post_id: i64, payloads: Vec<CommentPayload>) {
        let mut observed = Vec::new();
        {
            let mut store = self.store.lock();
            let mut comments = Vec::with_capacity(payloads.len());
            let mut likes = Vec::new();
            for payload in payloads {
                if let Some(author) = payload.author {
                    store.upsert(author);
                }
                if let Some(entity_likes) = payload.likes {
                    likes.push((VoteTarget::Comment(payload.comment.id), entity_likes));
                }
                comments.push(payload.comment);
            }
            store.replace_comments(post_id, comments);
            for (target, entity_likes) in likes {
                store.replace_likes(target, &entity_likes, self.pending_vote(target));
                observed.push(target);
            }
        }
        self.sync_observed_votes(&observed);
    }

    /// Применяет протокол ошибок к затронутой сущности.
    pub(crate) async fn settle_failure(&self, err: &ForumError, subject: Option<EntityKey>) {
        match err {
            ForumError::AuthorizationRejected => {
                self.end_session(SessionEnd::Rejected);
                if let Some(subject) = subject {
                    self.refresh(subject).await;
                }
            }
            ForumError::NotFound => {
                if let Some(subject) = subject
                    && self.store.lock().remove(subject)
                {
                    debug!(?subject, "entity gone on server, removed from store");
                }
            }
            _ => {}
        }
    }

    /// Перечитывает сущность с сервера. Ошибки только логируются.
    pub(crate) async fn refresh(&self, subject: EntityKey) {
        match subject {
            EntityKey::Post(id) => match self.api.get_post(id).await {
                Ok(payload) => {
                    self.apply_post(payload);
                }
                Err(ForumError::NotFound) => {
                    self.store.lock().remove(subject);
                }
                Err(err) => warn!(post_id = id, error = %err, "post refresh failed"),
            },
            EntityKey::Comment(id) => {
                let post_id = self.store.lock().comment(id).map(|comment| comment.post_id);
                match post_id {
                    Some(post_id) => self.refresh_comments(post_id).await,
                    None => debug!(comment_id = id, "comment not cached, nothing to refresh"),
                }
            }
            other => debug!(subject = ?other, "no refresh for entity kind"),
        }
    }

    pub(crate) async fn refresh_comments(&self, post_id: i64) {
        match self.api.list_comments(post_id).await {
            Ok(payloads) => self.apply_comment_list(post_id, payloads),
            Err(ForumError::NotFound) => {
                self.store.lock().remove(EntityKey::Post(post_id));
            }
            Err(err) => warn!(post_id, error = %err, "comment list refresh failed"),
        }
    }

    pub(crate) fn favorite_marker(&self, favorite: Favorite) -> bool {
        {
            let store = self.store.lock();
            if store.is_favorite(favorite.user_id, favorite.post_id) {
                return true;
            }
            if store.favorites_loaded(favorite.user_id) {
                return false;
            }
        }
        self.side
            .load_favorites(favorite.user_id)
            .is_some_and(|posts| posts.contains(&favorite.post_id))
    }

    fn mirror_favorites(&self, user_id: i64, posts: Option<&[i64]>) {
        let result = match posts {
            Some(posts) => self.side.save_favorites(user_id, posts),
            None => self.side.clear_favorites(user_id),
        };
        if let Err(err) = result {
            warn!(user_id, error = %err, "failed to persist favorites");
        }
    }
}

#[derive(Clone)]
/// Загрузки и мутации постов, комментариев, категорий, избранного и профиля.
pub struct MutationCoordinator {
    shared: Arc<Shared>,
}

impl MutationCoordinator {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    async fn settle<T>(
        &self,
        result: ForumResult<T>,
        subject: Option<EntityKey>,
    ) -> ForumResult<T> {
        match result {
            Ok(value) => Ok(value),
            Err(err) => {
                warn!(?subject, error = %err, "request failed");
                self.shared.settle_failure(&err, subject).await;
                Err(err)
            }
        }
    }

    async fn after_comment_mutation(&self, post_id: Option<i64>) {
        if !self.shared.config.refetch_comments_after_mutation {
            return;
        }
        if let Some(post_id) = post_id {
            self.shared.refresh_comments(post_id).await;
        }
    }

    /// Загружает список постов; его порядок запоминается.
    pub async fn fetch_posts(&self, query: &PostQuery) -> ForumResult<Vec<Post>> {
        let payloads = self.settle(self.shared.api.list_posts(query).await, None).await?;
        let posts = self.shared.apply_posts(payloads);
        self.shared
            .store
            .lock()
            .replace_post_list(posts.iter().map(|post| post.id).collect());
        Ok(posts)
    }

    /// Загружает пост и делает его текущим просматриваемым.
    pub async fn fetch_post(&self, id: i64) -> ForumResult<Post> {
        let result = self.shared.api.get_post(id).await;
        let payload = self.settle(result, Some(EntityKey::Post(id))).await?;
        let post = self.shared.apply_post(payload);
        self.shared.store.lock().set_current_post(Some(post.id));
        Ok(post)
    }

    /// Загружает комментарии поста; авторитетный список заменяет кэш.
    ///
    /// Возвращает количество комментариев вместе с ответами.
    pub async fn fetch_comments(&self, post_id: i64) -> ForumResult<usize> {
        let result = self.shared.api.list_comments(post_id).await;
        let payloads = self.settle(result, Some(EntityKey::Post(post_id))).await?;
        self.shared.apply_comment_list(post_id, payloads);
        Ok(self.shared.store.lock().comment_count(post_id))
    }

    /// Загружает все категории.
    pub async fn fetch_categories(&self) -> ForumResult<Vec<Category>> {
        let categories = self
            .settle(self.shared.api.list_categories().await, None)
            .await?;
        let mut store = self.shared.store.lock();
        for category in &categories {
            store.upsert(category.clone());
        }
        Ok(categories)
    }

    /// Загружает категорию.
    pub async fn fetch_category(&self, id: i64) -> ForumResult<Category> {
        let result = self.shared.api.get_category(id).await;
        let category = self.settle(result, Some(EntityKey::Category(id))).await?;
        self.shared.store.lock().upsert(category.clone());
        Ok(category)
    }

    /// Загружает посты категории; они становятся текущим списком.
    pub async fn fetch_category_posts(&self, id: i64) -> ForumResult<Vec<Post>> {
        let result = self.shared.api.list_category_posts(id).await;
        let payloads = self.settle(result, Some(EntityKey::Category(id))).await?;
        let posts = self.shared.apply_posts(payloads);
        self.shared
            .store
            .lock()
            .replace_post_list(posts.iter().map(|post| post.id).collect());
        Ok(posts)
    }

    /// Загружает всех пользователей. Требует сессии.
    pub async fn fetch_users(&self) -> ForumResult<Vec<User>> {
        let identity = self.shared.gate.require()?;
        let result = self.shared.api.list_users(&identity.token).await;
        let users = self.settle(result, None).await?;
        let mut store = self.shared.store.lock();
        for user in &users {
            store.upsert(user.clone());
        }
        Ok(users)
    }

    /// Загружает профиль пользователя.
    pub async fn fetch_user(&self, id: i64) -> ForumResult<User> {
        let result = self.shared.api.get_user(id).await;
        let user = self.settle(result, Some(EntityKey::User(id))).await?;
        self.shared.store.lock().upsert(user.clone());
        self.shared.gate.merge_user(&user);
        Ok(user)
    }

    /// Загружает посты пользователя; они становятся текущим списком.
    pub async fn fetch_user_posts(&self, id: i64, query: &PostQuery) -> ForumResult<Vec<Post>> {
        let result = self.shared.api.list_user_posts(id, query).await;
        let payloads = self.settle(result, Some(EntityKey::User(id))).await?;
        let posts = self.shared.apply_posts(payloads);
        self.shared
            .store
            .lock()
            .replace_post_list(posts.iter().map(|post| post.id).collect());
        Ok(posts)
    }

    /// Загружает избранное текущего пользователя; оно заменяет кэш и side channel.
    pub async fn fetch_favorites(&self) -> ForumResult<Vec<Post>> {
        let identity = self.shared.gate.require()?;
        let result = self.shared.api.list_favorites(&identity.token).await;
        let payloads = self.settle(result, None).await?;
        let posts = self.shared.apply_posts(payloads);
        let ids: Vec<i64> = posts.iter().map(|post| post.id).collect();
        if self.shared.gate.is_current(&identity) {
            self.shared
                .store
                .lock()
                .replace_favorites(identity.user_id(), ids.iter().copied());
            self.shared.mirror_favorites(identity.user_id(), Some(&ids));
        } else {
            debug!("session changed while favorites were loading, list ignored");
        }
        Ok(posts)
    }

    /// Создаёт пост. В хранилище он появляется только после ответа сервера.
    pub async fn create_post(&self, draft: PostDraft) -> ForumResult<Post> {
        let identity = self.shared.gate.require()?;
        draft.validate()?;
        let result = self.shared.api.create_post(&identity.token, &draft).await;
        let payload = self.settle(result, None).await?;
        let post = self.shared.apply_post(payload);
        self.shared.store.lock().append_to_post_list(post.id);
        Ok(post)
    }

    /// Редактирует пост; изменения вливаются после подтверждения.
    pub async fn update_post(&self, id: i64, draft: PostDraft) -> ForumResult<Post> {
        let identity = self.shared.gate.require()?;
        draft.validate()?;
        let result = self.shared.api.update_post(&identity.token, id, &draft).await;
        let payload = self.settle(result, Some(EntityKey::Post(id))).await?;
        Ok(self.shared.apply_post(payload))
    }

    /// Удаляет пост вместе с его комментариями после подтверждения сервера.
    pub async fn delete_post(&self, id: i64) -> ForumResult<()> {
        let identity = self.shared.gate.require()?;
        let result = self.shared.api.delete_post(&identity.token, id).await;
        self.settle(result, Some(EntityKey::Post(id))).await?;
        self.shared.store.lock().remove(EntityKey::Post(id));
        Ok(())
    }

    /// Комментарий верхнего уровня. Закрытый пост отклоняется без запроса.
    pub async fn create_comment(&self, post_id: i64, draft: CommentDraft) -> ForumResult<Comment> {
        let identity = self.shared.gate.require()?;
        draft.validate()?;
        self.ensure_unlocked(post_id)?;

        let result = self
            .shared
            .api
            .create_comment(&identity.token, post_id, &draft)
            .await;
        let payload = self.settle(result, Some(EntityKey::Post(post_id))).await?;
        let comment = self.shared.apply_comment(payload);
        self.after_comment_mutation(Some(comment.post_id)).await;
        Ok(comment)
    }

    /// Ответ на комментарий. Пост родителя проверяется на закрытость, если известен.
    pub async fn create_reply(
        &self,
        parent_comment_id: i64,
        draft: CommentDraft,
    ) -> ForumResult<Comment> {
        let identity = self.shared.gate.require()?;
        draft.validate()?;
        let parent_post = self
            .shared
            .store
            .lock()
            .comment(parent_comment_id)
            .map(|parent| parent.post_id);
        if let Some(post_id) = parent_post {
            self.ensure_unlocked(post_id)?;
        }

        let result = self
            .shared
            .api
            .create_reply(&identity.token, parent_comment_id, &draft)
            .await;
        let mut payload = self
            .settle(result, Some(EntityKey::Comment(parent_comment_id)))
            .await?;
        if payload.comment.parent_comment_id.is_none() {
            payload.comment.parent_comment_id = Some(parent_comment_id);
        }
        let reply = self.shared.apply_comment(payload);
        self.after_comment_mutation(Some(reply.post_id)).await;
        Ok(reply)
    }

    /// Редактирует комментарий или ответ.
    pub async fn update_comment(&self, id: i64, draft: CommentDraft) -> ForumResult<Comment> {
        let identity = self.shared.gate.require()?;
        draft.validate()?;
        let result = self
            .shared
            .api
            .update_comment(&identity.token, id, &draft)
            .await;
        let payload = self.settle(result, Some(EntityKey::Comment(id))).await?;
        let comment = self.shared.apply_comment(payload);
        self.after_comment_mutation(Some(comment.post_id)).await;
        Ok(comment)
    }

    /// Удаляет комментарий вместе с ответами после подтверждения сервера.
    pub async fn delete_comment(&self, id: i64) -> ForumResult<()> {
        let identity = self.shared.gate.require()?;
        let post_id = self
            .shared
            .store
            .lock()
            .comment(id)
            .map(|comment| comment.post_id);
        let result = self.shared.api.delete_comment(&identity.token, id).await;
        self.settle(result, Some(EntityKey::Comment(id))).await?;
        self.shared.store.lock().remove(EntityKey::Comment(id));
        self.after_comment_mutation(post_id).await;
        Ok(())
    }

    /// Создаёт категорию.
    pub async fn create_category(&self, draft: CategoryDraft) -> ForumResult<Category> {
        let identity = self.shared.gate.require()?;
        draft.validate()?;
        let result = self.shared.api.create_category(&identity.token, &draft).await;
        let category = self.settle(result, None).await?;
        self.shared.store.lock().upsert(category.clone());
        Ok(category)
    }

    /// Редактирует категорию.
    pub async fn update_category(&self, id: i64, draft: CategoryDraft) -> ForumResult<Category> {
        let identity = self.shared.gate.require()?;
        draft.validate()?;
        let result = self
            .shared
            .api
            .update_category(&identity.token, id, &draft)
            .await;
        let category = self.settle(result, Some(EntityKey::Category(id))).await?;
        self.shared.store.lock().upsert(category.clone());
        Ok(category)
    }

    /// Удаляет категорию; посты перестают на неё ссылаться.
    pub async fn delete_category(&self, id: i64) -> ForumResult<()> {
        let identity = self.shared.gate.require()?;
        let result = self.shared.api.delete_category(&identity.token, id).await;
        self.settle(result, Some(EntityKey::Category(id))).await?;
        self.shared.store.lock().remove(EntityKey::Category(id));
        Ok(())
    }

    /// Меняет профиль текущего пользователя.
    pub async fn update_profile(&self, update: ProfileUpdate) -> ForumResult<User> {
        let identity = self.shared.gate.require()?;
        update.validate()?;
        if update.new_password.is_some() && update.old_password.is_none() {
            return Err(ForumError::ValidationFailed(
                "old password is required to set a new one".to_string(),
            ));
        }
        let user_id = identity.user_id();
        let result = self
            .shared
            .api
            .update_profile(&identity.token, user_id, &update)
            .await;
        let user = self.settle(result, Some(EntityKey::User(user_id))).await?;
        Ok(self.merge_own_profile(user))
    }

    /// Загружает аватар текущего пользователя. Возвращает путь к картинке.
    pub async fn upload_avatar(&self, file_name: &str, bytes: Vec<u8>) -> ForumResult<String> {
        let identity = self.shared.gate.require()?;
        if bytes.is_empty() {
            return Err(ForumError::ValidationFailed("avatar file is empty".to_string()));
        }
        let result = self
            .shared
            .api
            .upload_avatar(&identity.token, file_name, bytes)
            .await;
        let path = self.settle(result, None).await?;
        self.merge_own_profile(User {
            id: identity.user_id(),
            profile_picture: Some(path.clone()),
            ..User::default()
        });
        Ok(path)
    }

    fn merge_own_profile(&self, user: User) -> User {
        let id = user.id;
        self.shared.gate.merge_user(&user);
        let mut store = self.shared.store.lock();
        let fallback = user.clone();
        store.upsert(user);
        store.user(id).cloned().unwrap_or(fallback)
    }

    /// Переключает пост в избранном текущего пользователя.
    ///
    /// Членство меняется сразу и откатывается при ошибке. Возвращает новое
    /// состояние: `true`, если пост в избранном.
    pub async fn toggle_favorite(&self, post_id: i64) -> ForumResult<bool> {
        let identity = self.shared.gate.require()?;
        let favorite = Favorite {
            user_id: identity.user_id(),
            post_id,
        };
        let _turn = self.shared.favorite_locks.acquire(favorite).await;

        let identity = self.shared.gate.require()?;
        if identity.user_id() != favorite.user_id {
            return Err(ForumError::Unauthenticated);
        }

        let stored_before = self.shared.store.lock().is_favorite(favorite.user_id, post_id);
        let side_before = self.shared.side.load_favorites(favorite.user_id);
        let member = !self.shared.favorite_marker(favorite);

        let mut mirrored = side_before
            .clone()
            .unwrap_or_else(|| self.shared.store.lock().favorites(favorite.user_id));
        mirrored.retain(|id| *id != post_id);
        if member {
            mirrored.push(post_id);
        }
        self.shared
            .store
            .lock()
            .set_favorite(favorite.user_id, post_id, member);
        self.shared
            .mirror_favorites(favorite.user_id, Some(&mirrored));
        debug!(post_id, member, "favorite applied optimistically");

        let result = if member {
            self.shared.api.add_favorite(&identity.token, post_id).await
        } else {
            self.shared.api.remove_favorite(&identity.token, post_id).await
        };

        // После выхода избранное прежнего пользователя в хранилище уже стёрто.
        let current = self.shared.gate.is_current(&identity);
        match result {
            Ok(()) => {
                if current {
                    self.shared
                        .store
                        .lock()
                        .set_favorite(favorite.user_id, post_id, member);
                }
                Ok(member)
            }
            Err(err) => {
                warn!(post_id, error = %err, "favorite toggle failed, rolling back");
                if current {
                    self.shared
                        .store
                        .lock()
                        .set_favorite(favorite.user_id, post_id, stored_before);
                }
                self.shared
                    .mirror_favorites(favorite.user_id, side_before.as_deref());
                self.shared
                    .settle_failure(&err, Some(EntityKey::Post(post_id)))
                    .await;
                Err(err)
            }
        }
    }

    /// `true`, если пост в избранном текущего пользователя.
    pub fn is_favorite(&self, post_id: i64) -> bool {
        self.shared.gate.current().is_some_and(|identity| {
            self.shared.favorite_marker(Favorite {
                user_id: identity.user_id(),
                post_id,
            })
        })
    }

    /// `true`, если по посту есть переключение избранного в работе.
    pub fn is_favorite_pending(&self, post_id: i64) -> bool {
        self.shared.gate.current().is_some_and(|identity| {
            self.shared.favorite_locks.is_pending(&Favorite {
                user_id: identity.user_id(),
                post_id,
            })
        })
    }

    fn ensure_unlocked(&self, post_id: i64) -> ForumResult<()> {
        let locked = self
            .shared
            .store
            .lock()
            .post(post_id)
            .is_some_and(Post::is_locked);
        if locked {
            debug!(post_id, "comment rejected locally, post is locked");
            return Err(ForumError::PostLocked { post_id });
        }
        Ok(())
    }
}
