//! Контракт удалённого сервера форума.
//!
//! Ядро видит сервер только через [`ForumApi`]: запрос либо завершается
//! payload-ом, либо типизированной [`ForumError`](crate::ForumError).
//! Боевая реализация в [`HttpApi`](crate::HttpApi), в тестах подставляется фейк.

use async_trait::async_trait;

use crate::error::ForumResult;
use crate::models::{
    AuthSession, Category, CategoryDraft, Comment, CommentDraft, Credentials, Like,
    PasswordReset, PasswordResetRequest, Post, PostDraft, PostQuery, ProfileUpdate,
    RatingSnapshot, Registration, User, VoteTarget, VoteType,
};

#[derive(Debug, Clone, PartialEq, Default)]
/// Пост вместе со связанными данными, пришедшими в том же ответе.
pub struct PostPayload {
    /// Поля поста.
    pub post: Post,
    /// Авторитетный список голосов, если сервер его прислал.
    pub likes: Option<Vec<Like>>,
    /// Категории, вложенные в ответ объектами.
    pub categories: Vec<Category>,
    /// Автор, вложенный в ответ объектом.
    pub author: Option<User>,
}

impl PostPayload {
    /// Payload без вложенных данных.
    pub fn new(post: Post) -> Self {
        Self {
            post,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Комментарий вместе со связанными данными ответа.
pub struct CommentPayload {
    /// Поля комментария.
    pub comment: Comment,
    /// Авторитетный список голосов, если сервер его прислал.
    pub likes: Option<Vec<Like>>,
    /// Автор, вложенный в ответ объектом.
    pub author: Option<User>,
}

impl CommentPayload {
    /// Payload без вложенных данных.
    pub fn new(comment: Comment) -> Self {
        Self {
            comment,
            likes: None,
            author: None,
        }
    }
}

/// Запросы к серверу форума.
///
/// Методы с `token` требуют авторизации; токен передаётся как bearer.
#[async_trait]
pub trait ForumApi: Send + Sync {
    /// «Кто я» по сохранённому токену.
    async fn current_user(&self, token: &str) -> ForumResult<User>;
    /// Вход по логину и паролю.
    async fn login(&self, credentials: &Credentials) -> ForumResult<AuthSession>;
    /// Регистрация; возвращает сообщение сервера (дальше нужно подтвердить email).
    async fn register(&self, registration: &Registration) -> ForumResult<String>;
    /// Подтверждение email; сервер сразу выдаёт токен.
    async fn verify_email(&self, code: &str) -> ForumResult<AuthSession>;
    /// Отправка ссылки для сброса пароля на email; возвращает сообщение сервера.
    async fn request_password_reset(&self, request: &PasswordResetRequest) -> ForumResult<String>;
    /// Новый пароль по токену из письма; возвращает сообщение сервера.
    async fn confirm_password_reset(
        &self,
        reset_token: &str,
        reset: &PasswordReset,
    ) -> ForumResult<String>;

    /// Список постов с фильтрами.
    async fn list_posts(&self, query: &PostQuery) -> ForumResult<Vec<PostPayload>>;
    /// Пост без комментариев.
    async fn get_post(&self, id: i64) -> ForumResult<PostPayload>;
    /// Создание поста.
    async fn create_post(&self, token: &str, draft: &PostDraft) -> ForumResult<PostPayload>;
    /// Редактирование поста.
    async fn update_post(&self, token: &str, id: i64, draft: &PostDraft)
    -> ForumResult<PostPayload>;
    /// Удаление поста.
    async fn delete_post(&self, token: &str, id: i64) -> ForumResult<()>;

    /// Плоский список комментариев поста.
    async fn list_comments(&self, post_id: i64) -> ForumResult<Vec<CommentPayload>>;
    /// Комментарий верхнего уровня.
    async fn create_comment(
        &self,
        token: &str,
        post_id: i64,
        draft: &CommentDraft,
    ) -> ForumResult<CommentPayload>;
    /// Ответ на комментарий.
    async fn create_reply(
        &self,
        token: &str,
        comment_id: i64,
        draft: &CommentDraft,
    ) -> ForumResult<CommentPayload>;
    /// Редактирование комментария.
    async fn update_comment(
        &self,
        token: &str,
        id: i64,
        draft: &CommentDraft,
    ) -> ForumResult<CommentPayload>;
    /// Удаление комментария.
    async fn delete_comment(&self, token: &str, id: i64) -> ForumResult<()>;

    /// Создаёт или заменяет голос текущего пользователя.
    ///
    /// `Ok` означает, что сервер принял голос. Агрегаты `None`, если их не
    /// удалось получить после этого.
    async fn put_vote(
        &self,
        token: &str,
        target: VoteTarget,
        vote: VoteType,
    ) -> ForumResult<Option<RatingSnapshot>>;
    /// Снимает голос текущего пользователя.
    async fn delete_vote(
        &self,
        token: &str,
        target: VoteTarget,
    ) -> ForumResult<Option<RatingSnapshot>>;

    /// Все категории.
    async fn list_categories(&self) -> ForumResult<Vec<Category>>;
    /// Категория по идентификатору.
    async fn get_category(&self, id: i64) -> ForumResult<Category>;
    /// Посты категории.
    async fn list_category_posts(&self, id: i64) -> ForumResult<Vec<PostPayload>>;
    /// Создание категории.
    async fn create_category(&self, token: &str, draft: &CategoryDraft) -> ForumResult<Category>;
    /// Редактирование категории.
    async fn update_category(
        &self,
        token: &str,
        id: i64,
        draft: &CategoryDraft,
    ) -> ForumResult<Category>;
    /// Удаление категории.
    async fn delete_category(&self, token: &str, id: i64) -> ForumResult<()>;

    /// Избранные посты текущего пользователя.
    async fn list_favorites(&self, token: &str) -> ForumResult<Vec<PostPayload>>;
    /// Добавление в избранное.
    async fn add_favorite(&self, token: &str, post_id: i64) -> ForumResult<()>;
    /// Удаление из избранного.
    async fn remove_favorite(&self, token: &str, post_id: i64) -> ForumResult<()>;

    /// Все пользователи.
    async fn list_users(&self, token: &str) -> ForumResult<Vec<User>>;
    /// Пользователь по идентификатору.
    async fn get_user(&self, id: i64) -> ForumResult<User>;
    /// Посты пользователя.
    async fn list_user_posts(&self, id: i64, query: &PostQuery) -> ForumResult<Vec<PostPayload>>;
    /// Изменение профиля.
    async fn update_profile(
        &self,
        token: &str,
        user_id: i64,
        update: &ProfileUpdate,
    ) -> ForumResult<User>;
    /// Загрузка аватара; возвращает новый путь к картинке.
    async fn upload_avatar(
        &self,
        token: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> ForumResult<String>;
}
