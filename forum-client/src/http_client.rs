use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, RequestBuilder, multipart};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{debug, warn};

use crate::api::{CommentPayload, ForumApi, PostPayload};
use crate::config::ClientConfig;
use crate::error::{ForumError, ForumResult};
use crate::models::{
    AuthSession, Category, CategoryDraft, Comment, CommentDraft, Credentials, Like,
    PasswordReset, PasswordResetRequest, Post, PostDraft, PostQuery, ProfileUpdate,
    RatingSnapshot, Registration, Role, User, VoteTarget, VoteType,
};

#[derive(Debug, Serialize)]
struct VoteRequestDto {
    #[serde(rename = "type")]
    vote: VoteType,
}

#[derive(Debug, Serialize)]
struct Empty {}

#[derive(Debug, Deserialize)]
struct ErrorResponseDto {
    error: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageDto {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthResponseDto {
    token: String,
    user: UserDto,
}

#[derive(Debug, Deserialize)]
struct AvatarResponseDto {
    profile_picture: String,
}

#[derive(Debug, Deserialize)]
struct UserDto {
    id: i64,
    full_name: Option<String>,
    login: Option<String>,
    email: Option<String>,
    role: Option<Role>,
    rating: Option<i64>,
    profile_picture: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LikeDto {
    author_id: i64,
    #[serde(rename = "type")]
    vote: VoteType,
}

#[derive(Debug, Deserialize)]
struct CategoryDto {
    id: i64,
    title: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CategoryRefDto {
    Id(i64),
    Full(CategoryDto),
}

#[derive(Debug, Deserialize)]
struct PostDto {
    id: i64,
    title: Option<String>,
    content: Option<String>,
    author_id: Option<i64>,
    rating: Option<i64>,
    #[serde(rename = "likesCount", alias = "likes_count")]
    likes_count: Option<i64>,
    #[serde(rename = "createdAt", alias = "created_at")]
    created_at: Option<DateTime<Utc>>,
    locked: Option<bool>,
    categories: Option<Vec<CategoryRefDto>>,
    likes: Option<Vec<LikeDto>>,
    author: Option<UserDto>,
}

#[derive(Debug, Deserialize)]
struct CommentDto {
    id: i64,
    post_id: i64,
    #[serde(default)]
    parent_comment_id: Option<i64>,
    author_id: Option<i64>,
    content: Option<String>,
    rating: Option<i64>,
    #[serde(rename = "likesCount", alias = "likes_count")]
    likes_count: Option<i64>,
    #[serde(rename = "createdAt", alias = "created_at")]
    created_at: Option<DateTime<Utc>>,
    likes: Option<Vec<LikeDto>>,
    author: Option<UserDto>,
}

#[derive(Debug, Deserialize)]
struct RatingDto {
    rating: Option<i64>,
    #[serde(rename = "likesCount", alias = "likes_count")]
    likes_count: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct FavoriteDto {
    post_id: Option<i64>,
    #[serde(alias = "post")]
    posts: Option<PostDto>,
}

// Сервер то оборачивает сущность в объект (`{"post": {...}}`), то отдаёт как есть.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PostEnvelope {
    Wrapped { post: PostDto },
    Bare(PostDto),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CommentEnvelope {
    Comment { comment: CommentDto },
    Reply { reply: CommentDto },
    Bare(CommentDto),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CategoryEnvelope {
    Wrapped { category: CategoryDto },
    Bare(CategoryDto),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RatingEnvelope {
    Wrapped { comment: RatingDto },
    Bare(RatingDto),
}

impl PostEnvelope {
    fn into_inner(self) -> PostDto {
        match self {
            Self::Wrapped { post } | Self::Bare(post) => post,
        }
    }
}

impl CommentEnvelope {
    fn into_inner(self) -> CommentDto {
        match self {
            Self::Comment { comment } | Self::Reply { reply: comment } | Self::Bare(comment) => {
                comment
            }
        }
    }
}

impl CategoryEnvelope {
    fn into_inner(self) -> CategoryDto {
        match self {
            Self::Wrapped { category } | Self::Bare(category) => category,
        }
    }
}

impl RatingEnvelope {
    fn into_snapshot(self) -> Option<RatingSnapshot> {
        let dto = match self {
            Self::Wrapped { comment } | Self::Bare(comment) => comment,
        };
        Some(RatingSnapshot {
            rating: dto.rating?,
            likes_count: dto.likes_count?,
        })
    }
}

impl From<UserDto> for User {
    fn from(value: UserDto) -> Self {
        Self {
            id: value.id,
            full_name: value.full_name,
            login: value.login,
            email: value.email,
            role: value.role,
            rating: value.rating,
            profile_picture: value.profile_picture,
        }
    }
}

impl From<CategoryDto> for Category {
    fn from(value: CategoryDto) -> Self {
        Self {
            id: value.id,
            title: value.title,
            description: value.description,
        }
    }
}

impl From<AuthResponseDto> for AuthSession {
    fn from(value: AuthResponseDto) -> Self {
        Self {
            token: value.token,
            user: value.user.into(),
        }
    }
}

fn map_likes(target: VoteTarget, likes: Option<Vec<LikeDto>>) -> Option<Vec<Like>> {
    likes.map(|likes| {
        likes
            .into_iter()
            .map(|like| Like {
                target,
                author_id: like.author_id,
                vote: like.vote,
            })
            .collect()
    })
}

impl From<PostDto> for PostPayload {
    fn from(value: PostDto) -> Self {
        let mut categories = Vec::new();
        let category_ids = value.categories.map(|refs| {
            refs.into_iter()
                .map(|category| match category {
                    CategoryRefDto::Id(id) => id,
                    CategoryRefDto::Full(dto) => {
                        let id = dto.id;
                        categories.push(Category::from(dto));
                        id
                    }
                })
                .collect()
        });
        let author_id = value
            .author_id
            .or_else(|| value.author.as_ref().map(|author| author.id));

        Self {
            post: Post {
                id: value.id,
                title: value.title,
                content: value.content,
                author_id,
                rating: value.rating,
                likes_count: value.likes_count,
                created_at: value.created_at,
                locked: value.locked,
                categories: category_ids,
            },
            likes: map_likes(VoteTarget::Post(value.id), value.likes),
            categories,
            author: value.author.map(User::from),
        }
    }
}

impl From<CommentDto> for CommentPayload {
    fn from(value: CommentDto) -> Self {
        let author_id = value
            .author_id
            .or_else(|| value.author.as_ref().map(|author| author.id));

        Self {
            comment: Comment {
                id: value.id,
                post_id: value.post_id,
                parent_comment_id: value.parent_comment_id,
                author_id,
                content: value.content,
                rating: value.rating,
                likes_count: value.likes_count,
                created_at: value.created_at,
            },
            likes: map_likes(VoteTarget::Comment(value.id), value.likes),
            author: value.author.map(User::from),
        }
    }
}

impl FavoriteDto {
    fn into_payload(self) -> Option<PostPayload> {
        match (self.posts, self.post_id) {
            (Some(post), _) => Some(post.into()),
            (None, Some(post_id)) => Some(PostPayload::new(Post::new(post_id))),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Clone)]
/// HTTP-реализация [`ForumApi`] поверх REST API сервера форума.
pub struct HttpApi {
    base_url: String,
    client: Client,
}

impl HttpApi {
    /// Создаёт HTTP-клиент с базовым URL и таймаутами из конфигурации.
    pub fn new(config: &ClientConfig) -> ForumResult<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| ForumError::Transient(format!("failed to build http client: {err}")))?;

        Ok(Self {
            base_url: config.base_url.clone(),
            client,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn request(&self, method: Method, path: &str, token: Option<&str>) -> RequestBuilder {
        let request = self.client.request(method, self.endpoint(path));
        match token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn decode_error(response: reqwest::Response) -> ForumError {
        let status = response.status();

        let message = match response.json::<ErrorResponseDto>().await {
            Ok(body) => body
                .error
                .or(body.message)
                .unwrap_or_else(|| format!("http status {status}")),
            Err(_) => format!("http status {status}"),
        };
        ForumError::from_http_status(status, Some(message))
    }

    async fn send(request: RequestBuilder) -> ForumResult<reqwest::Response> {
        let response = request.send().await.map_err(ForumError::from_reqwest)?;
        if !response.status().is_success() {
            return Err(Self::decode_error(response).await);
        }
        Ok(response)
    }

    /// универсальный helper для запросов, которые возвращают json
    async fn fetch<TRes>(request: RequestBuilder) -> ForumResult<TRes>
    where
        TRes: DeserializeOwned,
    {
        Self::send(request)
            .await?
            .json::<TRes>()
            .await
            .map_err(|err| ForumError::Decode(err.to_string()))
    }

    async fn send_json<TReq, TRes>(
        &self,
        method: Method,
        path: &str,
        body: &TReq,
        token: Option<&str>,
    ) -> ForumResult<TRes>
    where
        TReq: Serialize + ?Sized,
        TRes: DeserializeOwned,
    {
        debug!(%method, path, "forum api request");
        Self::fetch(self.request(method, path, token).json(body)).await
    }

    async fn get_json<TRes>(&self, path: &str, token: Option<&str>) -> ForumResult<TRes>
    where
        TRes: DeserializeOwned,
    {
        debug!(path, "forum api fetch");
        Self::fetch(self.request(Method::GET, path, token)).await
    }

    async fn send_empty(&self, method: Method, path: &str, token: &str) -> ForumResult<()> {
        debug!(%method, path, "forum api request");
        Self::send(self.request(method, path, Some(token))).await?;
        Ok(())
    }

    /// Агрегаты поста после голосования. Голос уже принят, поэтому ошибка
    /// чтения только логируется.
    async fn post_rating(&self, post_id: i64) -> Option<RatingSnapshot> {
        let post = match self.get_post(post_id).await {
            Ok(payload) => payload.post,
            Err(err) => {
                warn!(post_id, error = %err, "failed to read post rating after vote");
                return None;
            }
        };
        Some(RatingSnapshot {
            rating: post.rating?,
            likes_count: post.likes_count?,
        })
    }

    /// Агрегаты комментария из ответа на голос, если тело их содержит.
    async fn comment_rating(response: reqwest::Response) -> Option<RatingSnapshot> {
        match response.json::<RatingEnvelope>().await {
            Ok(envelope) => envelope.into_snapshot(),
            Err(err) => {
                warn!(error = %err, "vote response body is not a rating");
                None
            }
        }
    }
}

fn vote_path(target: VoteTarget) -> String {
    match target {
        VoteTarget::Post(id) => format!("/api/posts/{id}/like"),
        VoteTarget::Comment(id) => format!("/api/comments/{id}/like"),
    }
}

#[async_trait]
impl ForumApi for HttpApi {
    async fn current_user(&self, token: &str) -> ForumResult<User> {
        let dto: UserDto = self.get_json("/api/auth/me", Some(token)).await?;
        Ok(dto.into())
    }

    async fn login(&self, credentials: &Credentials) -> ForumResult<AuthSession> {
        let dto: AuthResponseDto = self
            .send_json(Method::POST, "/api/auth/login", credentials, None)
            .await?;
        Ok(dto.into())
    }

    async fn register(&self, registration: &Registration) -> ForumResult<String> {
        let dto: MessageDto = self
            .send_json(Method::POST, "/api/auth/register", registration, None)
            .await?;
        Ok(dto.message.unwrap_or_default())
    }

    async fn verify_email(&self, code: &str) -> ForumResult<AuthSession> {
        let dto: AuthResponseDto = self
            .send_json(
                Method::POST,
                &format!("/api/auth/verify-email/{code}"),
                &Empty {},
                None,
            )
            .await?;
        Ok(dto.into())
    }

    async fn request_password_reset(&self, request: &PasswordResetRequest) -> ForumResult<String> {
        let dto: MessageDto = self
            .send_json(Method::POST, "/api/auth/password-reset", request, None)
            .await?;
        Ok(dto.message.unwrap_or_default())
    }

    async fn confirm_password_reset(
        &self,
        reset_token: &str,
        reset: &PasswordReset,
    ) -> ForumResult<String> {
        let dto: MessageDto = self
            .send_json(
                Method::POST,
                &format!("/api/auth/password-reset/{reset_token}"),
                reset,
                None,
            )
            .await?;
        Ok(dto.message.unwrap_or_default())
    }

    async fn list_posts(&self, query: &PostQuery) -> ForumResult<Vec<PostPayload>> {
        let request = self.request(Method::GET, "/api/posts", None).query(query);
        let dtos: Vec<PostDto> = Self::fetch(request).await?;
        Ok(dtos.into_iter().map(PostPayload::from).collect())
    }

    async fn get_post(&self, id: i64) -> ForumResult<PostPayload> {
        let dto: PostEnvelope = self.get_json(&format!("/api/posts/{id}"), None).await?;
        Ok(dto.into_inner().into())
    }

    async fn create_post(&self, token: &str, draft: &PostDraft) -> ForumResult<PostPayload> {
        let dto: PostEnvelope = self
            .send_json(Method::POST, "/api/posts", draft, Some(token))
            .await?;
        Ok(dto.into_inner().into())
    }

    async fn update_post(
        &self,
        token: &str,
        id: i64,
        draft: &PostDraft,
    ) -> ForumResult<PostPayload> {
        let dto: PostEnvelope = self
            .send_json(
                Method::PATCH,
                &format!("/api/posts/{id}"),
                draft,
                Some(token),
            )
            .await?;
        Ok(dto.into_inner().into())
    }

    async fn delete_post(&self, token: &str, id: i64) -> ForumResult<()> {
        self.send_empty(Method::DELETE, &format!("/api/posts/{id}"), token)
            .await
    }

    async fn list_comments(&self, post_id: i64) -> ForumResult<Vec<CommentPayload>> {
        let dtos: Vec<CommentDto> = self
            .get_json(&format!("/api/posts/{post_id}/comments"), None)
            .await?;
        Ok(dtos.into_iter().map(CommentPayload::from).collect())
    }

    async fn create_comment(
        &self,
        token: &str,
        post_id: i64,
        draft: &CommentDraft,
    ) -> ForumResult<CommentPayload> {
        let dto: CommentEnvelope = self
            .send_json(
                Method::POST,
                &format!("/api/posts/{post_id}/comments"),
                draft,
                Some(token),
            )
            .await?;
        Ok(dto.into_inner().into())
    }

    async fn create_reply(
        &self,
        token: &str,
        comment_id: i64,
        draft: &CommentDraft,
    ) -> ForumResult<CommentPayload> {
        let dto: CommentEnvelope = self
            .send_json(
                Method::POST,
                &format!("/api/comments/{comment_id}/reply"),
                draft,
                Some(token),
            )
            .await?;
        Ok(dto.into_inner().into())
    }

    async fn update_comment(
        &self,
        token: &str,
        id: i64,
        draft: &CommentDraft,
    ) -> ForumResult<CommentPayload> {
        let dto: CommentEnvelope = self
            .send_json(
                Method::PATCH,
                &format!("/api/comments/{id}"),
                draft,
                Some(token),
            )
            .await?;
        Ok(dto.into_inner().into())
    }

    async fn delete_comment(&self, token: &str, id: i64) -> ForumResult<()> {
        self.send_empty(Method::DELETE, &format!("/api/comments/{id}"), token)
            .await
    }

    async fn put_vote(
        &self,
        token: &str,
        target: VoteTarget,
        vote: VoteType,
    ) -> ForumResult<Option<RatingSnapshot>> {
        let path = vote_path(target);
        debug!(path, "forum api vote");
        let request = self
            .request(Method::POST, &path, Some(token))
            .json(&VoteRequestDto { vote });
        let response = Self::send(request).await?;
        match target {
            // Ответ на лайк поста не содержит агрегатов, их приходится дочитывать.
            VoteTarget::Post(id) => Ok(self.post_rating(id).await),
            VoteTarget::Comment(_) => Ok(Self::comment_rating(response).await),
        }
    }

    async fn delete_vote(
        &self,
        token: &str,
        target: VoteTarget,
    ) -> ForumResult<Option<RatingSnapshot>> {
        let path = vote_path(target);
        debug!(path, "forum api vote removal");
        let response = Self::send(self.request(Method::DELETE, &path, Some(token))).await?;
        match target {
            VoteTarget::Post(id) => Ok(self.post_rating(id).await),
            VoteTarget::Comment(_) => Ok(Self::comment_rating(response).await),
        }
    }

    async fn list_categories(&self) -> ForumResult<Vec<Category>> {
        let dtos: Vec<CategoryDto> = self.get_json("/api/categories", None).await?;
        Ok(dtos.into_iter().map(Category::from).collect())
    }

    async fn get_category(&self, id: i64) -> ForumResult<Category> {
        let dto: CategoryEnvelope = self
            .get_json(&format!("/api/categories/{id}"), None)
            .await?;
        Ok(dto.into_inner().into())
    }

    async fn list_category_posts(&self, id: i64) -> ForumResult<Vec<PostPayload>> {
        let dtos: Vec<PostDto> = self
            .get_json(&format!("/api/categories/{id}/posts"), None)
            .await?;
        Ok(dtos.into_iter().map(PostPayload::from).collect())
    }

    async fn create_category(&self, token: &str, draft: &CategoryDraft) -> ForumResult<Category> {
        let dto: CategoryEnvelope = self
            .send_json(Method::POST, "/api/categories", draft, Some(token))
            .await?;
        Ok(dto.into_inner().into())
    }

    async fn update_category(
        &self,
        token: &str,
        id: i64,
        draft: &CategoryDraft,
    ) -> ForumResult<Category> {
        let dto: CategoryEnvelope = self
            .send_json(
                Method::PATCH,
                &format!("/api/categories/{id}"),
                draft,
                Some(token),
            )
            .await?;
        Ok(dto.into_inner().into())
    }

    async fn delete_category(&self, token: &str, id: i64) -> ForumResult<()> {
        self.send_empty(Method::DELETE, &format!("/api/categories/{id}"), token)
            .await
    }

    async fn list_favorites(&self, token: &str) -> ForumResult<Vec<PostPayload>> {
        let dtos: Vec<FavoriteDto> = self.get_json("/api/favorites", Some(token)).await?;
        Ok(dtos
            .into_iter()
            .filter_map(FavoriteDto::into_payload)
            .collect())
    }

    async fn add_favorite(&self, token: &str, post_id: i64) -> ForumResult<()> {
        Self::send(
            self.request(Method::POST, &format!("/api/favorites/{post_id}"), Some(token))
                .json(&Empty {}),
        )
        .await?;
        Ok(())
    }

    async fn remove_favorite(&self, token: &str, post_id: i64) -> ForumResult<()> {
        self.send_empty(Method::DELETE, &format!("/api/favorites/{post_id}"), token)
            .await
    }

    async fn list_users(&self, token: &str) -> ForumResult<Vec<User>> {
        let dtos: Vec<UserDto> = self.get_json("/api/users", Some(token)).await?;
        Ok(dtos.into_iter().map(User::from).collect())
    }

    async fn get_user(&self, id: i64) -> ForumResult<User> {
        let dto: UserDto = self.get_json(&format!("/api/users/{id}"), None).await?;
        Ok(dto.into())
    }

    async fn list_user_posts(&self, id: i64, query: &PostQuery) -> ForumResult<Vec<PostPayload>> {
        let request = self
            .request(Method::GET, &format!("/api/users/{id}/posts"), None)
            .query(query);
        let dtos: Vec<PostDto> = Self::fetch(request).await?;
        Ok(dtos.into_iter().map(PostPayload::from).collect())
    }

    async fn update_profile(
        &self,
        token: &str,
        user_id: i64,
        update: &ProfileUpdate,
    ) -> ForumResult<User> {
        let dto: UserDto = self
            .send_json(
                Method::PATCH,
                &format!("/api/users/{user_id}"),
                update,
                Some(token),
            )
            .await?;
        Ok(dto.into())
    }

    async fn upload_avatar(
        &self,
        token: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> ForumResult<String> {
        let part = multipart::Part::bytes(bytes).file_name(file_name.to_string());
        let form = multipart::Form::new().part("profile_picture", part);
        let request = self
            .request(Method::PATCH, "/api/users/avatar", Some(token))
            .multipart(form);
        let dto: AvatarResponseDto = Self::fetch(request).await?;
        Ok(dto.profile_picture)
    }
}
