use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Заменяет поля `self` теми полями `incoming`, которые пришли в payload.
macro_rules! merge_present {
    ($target:expr, $incoming:expr; $($field:ident),+ $(,)?) => {
        $(
            if $incoming.$field.is_some() {
                $target.$field = $incoming.$field;
            }
        )+
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// Типы сущностей, которые хранит `EntityStore`.
pub enum EntityKind {
    /// Пост.
    Post,
    /// Комментарий (включая ответы).
    Comment,
    /// Категория.
    Category,
    /// Пользователь.
    User,
    /// Отношение лайк/дизлайк.
    Like,
    /// Отношение «избранное».
    Favorite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// Тип голоса.
pub enum VoteType {
    /// Лайк.
    Like,
    /// Дизлайк.
    Dislike,
}

impl VoteType {
    /// Строковое представление, совпадающее с серверным.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Dislike => "dislike",
        }
    }

    /// Разбирает `like`/`dislike`; всё остальное даёт `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "like" => Some(Self::Like),
            "dislike" => Some(Self::Dislike),
            _ => None,
        }
    }
}

impl fmt::Display for VoteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
/// Сущность, за которую можно голосовать.
pub enum VoteTarget {
    /// Голос за пост.
    Post(i64),
    /// Голос за комментарий.
    Comment(i64),
}

impl VoteTarget {
    /// Идентификатор сущности.
    pub fn id(self) -> i64 {
        match self {
            Self::Post(id) | Self::Comment(id) => id,
        }
    }

    /// Тип сущности.
    pub fn kind(self) -> EntityKind {
        match self {
            Self::Post(_) => EntityKind::Post,
            Self::Comment(_) => EntityKind::Comment,
        }
    }

    pub(crate) fn segment(self) -> &'static str {
        match self {
            Self::Post(_) => "post",
            Self::Comment(_) => "comment",
        }
    }
}

impl fmt::Display for VoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.segment(), self.id())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
/// Ключ маркера голоса: (сущность, пользователь).
pub struct VoteKey {
    /// За что голос.
    pub target: VoteTarget,
    /// Кто голосует.
    pub user_id: i64,
}

impl VoteKey {
    /// Создаёт ключ.
    pub fn new(target: VoteTarget, user_id: i64) -> Self {
        Self { target, user_id }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
/// Отношение «избранное»: не больше одного на пару (пользователь, пост).
pub struct Favorite {
    /// Владелец списка избранного.
    pub user_id: i64,
    /// Пост в избранном.
    pub post_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
/// Отношение лайк/дизлайк: не больше одного на (сущность, автор).
pub struct Like {
    /// За что голос.
    pub target: VoteTarget,
    /// Автор голоса.
    pub author_id: i64,
    /// Тип голоса.
    pub vote: VoteType,
}

impl Like {
    /// Ключ маркера, соответствующий отношению.
    pub fn key(&self) -> VoteKey {
        VoteKey::new(self.target, self.author_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// Роль пользователя.
pub enum Role {
    /// Обычный пользователь.
    #[default]
    User,
    /// Администратор.
    Admin,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
/// Пост. Поля, отсутствовавшие во всех полученных payload, остаются `None`.
pub struct Post {
    /// Идентификатор поста.
    pub id: i64,
    /// Заголовок.
    pub title: Option<String>,
    /// Содержимое.
    pub content: Option<String>,
    /// Идентификатор автора.
    pub author_id: Option<i64>,
    /// Серверный агрегат рейтинга.
    pub rating: Option<i64>,
    /// Серверный агрегат лайков.
    pub likes_count: Option<i64>,
    /// Дата и время создания (UTC).
    pub created_at: Option<DateTime<Utc>>,
    /// Закрыт ли пост для комментариев.
    pub locked: Option<bool>,
    /// Категории поста.
    pub categories: Option<BTreeSet<i64>>,
}

impl Post {
    /// Пустой пост с известным только идентификатором.
    pub fn new(id: i64) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    /// `true`, если пост известен как закрытый.
    pub fn is_locked(&self) -> bool {
        self.locked.unwrap_or(false)
    }

    pub(crate) fn merge(&mut self, incoming: Post) {
        merge_present!(self, incoming;
            title, content, author_id, rating, likes_count, created_at, locked, categories);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Комментарий. `parent_comment_id == None` означает комментарий верхнего уровня.
pub struct Comment {
    /// Идентификатор комментария.
    pub id: i64,
    /// Пост, которому принадлежит комментарий.
    pub post_id: i64,
    /// Родительский комментарий для ответов.
    pub parent_comment_id: Option<i64>,
    /// Автор.
    pub author_id: Option<i64>,
    /// Содержимое.
    pub content: Option<String>,
    /// Серверный агрегат рейтинга.
    pub rating: Option<i64>,
    /// Серверный агрегат лайков.
    pub likes_count: Option<i64>,
    /// Дата и время создания (UTC).
    pub created_at: Option<DateTime<Utc>>,
}

impl Comment {
    /// Комментарий с известными только идентификаторами.
    pub fn new(id: i64, post_id: i64, parent_comment_id: Option<i64>) -> Self {
        Self {
            id,
            post_id,
            parent_comment_id,
            author_id: None,
            content: None,
            rating: None,
            likes_count: None,
            created_at: None,
        }
    }

    /// `true` для комментария верхнего уровня.
    pub fn is_top_level(&self) -> bool {
        self.parent_comment_id.is_none()
    }

    // post_id не меняется; parent_comment_id может только появиться, но не сброситься.
    pub(crate) fn merge(&mut self, incoming: Comment) {
        if self.parent_comment_id.is_none() {
            self.parent_comment_id = incoming.parent_comment_id;
        }
        merge_present!(self, incoming;
            author_id, content, rating, likes_count, created_at);
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
/// Категория.
pub struct Category {
    /// Идентификатор категории.
    pub id: i64,
    /// Название.
    pub title: Option<String>,
    /// Описание.
    pub description: Option<String>,
}

impl Category {
    pub(crate) fn merge(&mut self, incoming: Category) {
        merge_present!(self, incoming; title, description);
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
/// Публичная модель пользователя.
pub struct User {
    /// Идентификатор пользователя.
    pub id: i64,
    /// Полное имя.
    pub full_name: Option<String>,
    /// Логин.
    pub login: Option<String>,
    /// Email.
    pub email: Option<String>,
    /// Роль.
    pub role: Option<Role>,
    /// Рейтинг пользователя.
    pub rating: Option<i64>,
    /// Путь к аватару.
    pub profile_picture: Option<String>,
}

impl User {
    /// `true` для администратора.
    pub fn is_admin(&self) -> bool {
        self.role == Some(Role::Admin)
    }

    pub(crate) fn merge(&mut self, incoming: User) {
        merge_present!(self, incoming;
            full_name, login, email, role, rating, profile_picture);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
/// Авторитетные агрегаты сущности после голосования.
pub struct RatingSnapshot {
    /// Рейтинг.
    pub rating: i64,
    /// Количество лайков.
    pub likes_count: i64,
}

#[derive(Debug, Clone, PartialEq)]
/// Ответ после успешного входа или подтверждения email.
pub struct AuthSession {
    /// Bearer-токен.
    pub token: String,
    /// Данные пользователя.
    pub user: User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// Сортировка списка постов.
pub enum PostSort {
    /// По рейтингу.
    #[default]
    Likes,
    /// По дате создания.
    Date,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
/// Фильтры списка постов.
pub struct PostQuery {
    /// Номер страницы, начиная с 1.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    /// Сортировка.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<PostSort>,
    /// Нижняя граница даты создания.
    #[serde(rename = "startDate", skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    /// Верхняя граница даты создания.
    #[serde(rename = "endDate", skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    /// Категории через запятую.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub categories: Option<String>,
    /// Только закрытые / только открытые.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked: Option<bool>,
}

impl PostQuery {
    /// Выставляет список категорий фильтра.
    pub fn with_categories(mut self, ids: &[i64]) -> Self {
        if ids.is_empty() {
            self.categories = None;
        } else {
            let joined = ids
                .iter()
                .map(i64::to_string)
                .collect::<Vec<_>>()
                .join(",");
            self.categories = Some(joined);
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Validate)]
/// Черновик поста для создания и редактирования.
pub struct PostDraft {
    /// Заголовок.
    #[validate(length(min = 1, max = 255))]
    pub title: String,
    /// Содержимое.
    #[validate(length(min = 1))]
    pub content: String,
    /// Категории поста.
    pub categories: Vec<i64>,
    /// Закрыть пост для комментариев.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked: Option<bool>,
}

impl PostDraft {
    /// Черновик с обрезанными пробелами.
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into().trim().to_string(),
            content: content.into().trim().to_string(),
            categories: Vec::new(),
            locked: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Validate)]
/// Текст комментария или ответа.
pub struct CommentDraft {
    /// Содержимое.
    #[validate(length(min = 1))]
    pub content: String,
}

impl CommentDraft {
    /// Черновик с обрезанными пробелами.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into().trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Validate)]
/// Черновик категории.
pub struct CategoryDraft {
    /// Название.
    #[validate(length(min = 1, max = 255))]
    pub title: String,
    /// Описание.
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Validate)]
/// Изменения профиля; поле со значением `None` не меняется.
pub struct ProfileUpdate {
    /// Полное имя.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, max = 128))]
    pub full_name: Option<String>,
    /// Логин.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 3, max = 64))]
    pub login: Option<String>,
    /// Email.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(email)]
    pub email: Option<String>,
    /// Текущий пароль, нужен при смене пароля.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_password: Option<String>,
    /// Новый пароль.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 8, max = 128))]
    pub new_password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Validate)]
/// Данные для входа.
pub struct Credentials {
    /// Логин или email.
    #[validate(length(min = 1, max = 64))]
    pub login: String,
    /// Пароль.
    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Validate)]
/// Данные для регистрации.
pub struct Registration {
    /// Логин.
    #[validate(length(min = 3, max = 64))]
    pub login: String,
    /// Email.
    #[validate(email)]
    pub email: String,
    /// Полное имя.
    #[validate(length(min = 1, max = 128))]
    pub full_name: String,
    /// Пароль.
    #[validate(length(min = 8, max = 128))]
    pub password: String,
    /// Подтверждение пароля.
    #[validate(must_match(other = "password"))]
    pub password_confirmation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Validate)]
/// Запрос ссылки для сброса пароля.
pub struct PasswordResetRequest {
    /// Email учётной записи.
    #[validate(email)]
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
/// Новый пароль по ссылке из письма.
pub struct PasswordReset {
    /// Новый пароль.
    #[validate(length(min = 8, max = 128))]
    pub new_password: String,
    /// Подтверждение нового пароля.
    #[validate(must_match(other = "new_password"))]
    pub confirm_password: String,
}
