#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use forum_client::{
    AuthSession, Category, CategoryDraft, ClientConfig, Comment, CommentDraft, CommentPayload,
    Credentials, ForumApi, ForumClient, ForumError, ForumResult, Like, MemorySideChannel,
    PasswordReset, PasswordResetRequest, Post, PostDraft, PostPayload, PostQuery, ProfileUpdate,
    RatingSnapshot, Registration, SideChannel, User, VoteTarget, VoteType,
};

pub const USER_ID: i64 = 7;
pub const TOKEN: &str = "token-7";
pub const RESET_TOKEN: &str = "reset-7";

pub fn user() -> User {
    User {
        id: USER_ID,
        login: Some("reader".to_string()),
        full_name: Some("Reader".to_string()),
        ..User::default()
    }
}

pub fn post(id: i64) -> PostPayload {
    PostPayload::new(Post {
        title: Some(format!("post {id}")),
        content: Some(format!("content {id}")),
        rating: Some(0),
        likes_count: Some(0),
        locked: Some(false),
        ..Post::new(id)
    })
}

pub fn comment(id: i64, post_id: i64, parent: Option<i64>) -> CommentPayload {
    CommentPayload::new(Comment {
        content: Some(format!("comment {id}")),
        created_at: Utc.timestamp_opt(1_700_000_000 + id, 0).single(),
        ..Comment::new(id, post_id, parent)
    })
}

pub fn like(target: VoteTarget, author_id: i64, vote: VoteType) -> Like {
    Like {
        target,
        author_id,
        vote,
    }
}

#[derive(Clone)]
pub struct FakeApi {
    pub calls: Arc<Mutex<Vec<String>>>,
    pub failures: Arc<Mutex<HashMap<&'static str, ForumError>>>,
    pub posts: Arc<Mutex<BTreeMap<i64, PostPayload>>>,
    pub comments: Arc<Mutex<BTreeMap<i64, Vec<CommentPayload>>>>,
    pub categories: Arc<Mutex<BTreeMap<i64, Category>>>,
    pub favorites: Arc<Mutex<Vec<i64>>>,
    pub votes: Arc<Mutex<HashMap<VoteTarget, VoteType>>>,
    pub next_id: Arc<Mutex<i64>>,
    pub rating_unavailable: Arc<Mutex<bool>>,
    in_flight: Arc<Mutex<usize>>,
    pub max_in_flight: Arc<Mutex<usize>>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            failures: Arc::new(Mutex::new(HashMap::new())),
            posts: Arc::new(Mutex::new(BTreeMap::new())),
            comments: Arc::new(Mutex::new(BTreeMap::new())),
            categories: Arc::new(Mutex::new(BTreeMap::new())),
            favorites: Arc::new(Mutex::new(Vec::new())),
            votes: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(Mutex::new(100)),
            rating_unavailable: Arc::new(Mutex::new(false)),
            in_flight: Arc::new(Mutex::new(0)),
            max_in_flight: Arc::new(Mutex::new(0)),
        }
    }

    pub fn with_post(self, payload: PostPayload) -> Self {
        self.posts
            .lock()
            .unwrap()
            .insert(payload.post.id, payload);
        self
    }

    pub fn with_comments(self, post_id: i64, comments: Vec<CommentPayload>) -> Self {
        self.comments.lock().unwrap().insert(post_id, comments);
        self
    }

    pub fn fail(&self, op: &'static str, err: ForumError) {
        self.failures.lock().unwrap().insert(op, err);
    }

    /// Голос принимается, но агрегаты после него прочитать не удаётся.
    pub fn withhold_rating(&self) {
        *self.rating_unavailable.lock().unwrap() = true;
    }

    pub fn recover(&self, op: &'static str) {
        self.failures.lock().unwrap().remove(op);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn take_calls(&self) -> Vec<String> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }

    pub fn called(&self, prefix: &str) -> bool {
        self.calls().iter().any(|call| call.starts_with(prefix))
    }

    fn next_id(&self) -> i64 {
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        *next
    }

    async fn hit(&self, op: &'static str, call: String) -> ForumResult<()> {
        self.calls.lock().unwrap().push(call);
        {
            let mut in_flight = self.in_flight.lock().unwrap();
            *in_flight += 1;
            let mut max = self.max_in_flight.lock().unwrap();
            *max = (*max).max(*in_flight);
        }
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        *self.in_flight.lock().unwrap() -= 1;

        let failure = self.failures.lock().unwrap().get(op).cloned();
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn authorize(&self, token: &str) -> ForumResult<()> {
        if token == TOKEN {
            Ok(())
        } else {
            Err(ForumError::AuthorizationRejected)
        }
    }

    fn rating(&self, target: VoteTarget) -> Option<RatingSnapshot> {
        if *self.rating_unavailable.lock().unwrap() {
            return None;
        }
        let snapshot = match self.votes.lock().unwrap().get(&target) {
            Some(VoteType::Like) => RatingSnapshot {
                rating: 1,
                likes_count: 1,
            },
            Some(VoteType::Dislike) => RatingSnapshot {
                rating: -1,
                likes_count: 0,
            },
            None => RatingSnapshot {
                rating: 0,
                likes_count: 0,
            },
        };
        Some(snapshot)
    }
}

#[async_trait]
impl ForumApi for FakeApi {
    async fn current_user(&self, token: &str) -> ForumResult<User> {
        self.hit("current_user", "current_user".to_string()).await?;
        self.authorize(token)?;
        Ok(user())
    }

    async fn login(&self, credentials: &Credentials) -> ForumResult<AuthSession> {
        self.hit("login", format!("login {}", credentials.login))
            .await?;
        if credentials.password != "password123" {
            return Err(ForumError::AuthorizationRejected);
        }
        Ok(AuthSession {
            token: TOKEN.to_string(),
            user: user(),
        })
    }

    async fn register(&self, registration: &Registration) -> ForumResult<String> {
        self.hit("register", format!("register {}", registration.login))
            .await?;
        Ok("check your email".to_string())
    }

    async fn verify_email(&self, code: &str) -> ForumResult<AuthSession> {
        self.hit("verify_email", format!("verify_email {code}"))
            .await?;
        if code != "code-ok" {
            return Err(ForumError::ValidationFailed("invalid code".to_string()));
        }
        Ok(AuthSession {
            token: TOKEN.to_string(),
            user: user(),
        })
    }

    async fn request_password_reset(&self, request: &PasswordResetRequest) -> ForumResult<String> {
        self.hit(
            "request_password_reset",
            format!("request_password_reset {}", request.email),
        )
        .await?;
        Ok("reset link sent".to_string())
    }

    async fn confirm_password_reset(
        &self,
        reset_token: &str,
        reset: &PasswordReset,
    ) -> ForumResult<String> {
        self.hit(
            "confirm_password_reset",
            format!("confirm_password_reset {reset_token}"),
        )
        .await?;
        if reset_token != RESET_TOKEN {
            return Err(ForumError::ValidationFailed(
                "reset link expired".to_string(),
            ));
        }
        if reset.new_password != reset.confirm_password {
            return Err(ForumError::ValidationFailed(
                "passwords do not match".to_string(),
            ));
        }
        Ok("password updated".to_string())
    }

    async fn list_posts(&self, _query: &PostQuery) -> ForumResult<Vec<PostPayload>> {
        self.hit("list_posts", "list_posts".to_string()).await?;
        Ok(self.posts.lock().unwrap().values().cloned().collect())
    }

    async fn get_post(&self, id: i64) -> ForumResult<PostPayload> {
        self.hit("get_post", format!("get_post {id}")).await?;
        self.posts
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(ForumError::NotFound)
    }

    async fn create_post(&self, token: &str, draft: &PostDraft) -> ForumResult<PostPayload> {
        self.hit("create_post", format!("create_post {}", draft.title))
            .await?;
        self.authorize(token)?;
        let id = self.next_id();
        let payload = PostPayload::new(Post {
            title: Some(draft.title.clone()),
            content: Some(draft.content.clone()),
            author_id: Some(USER_ID),
            rating: Some(0),
            likes_count: Some(0),
            locked: Some(draft.locked.unwrap_or(false)),
            categories: Some(draft.categories.iter().copied().collect()),
            ..Post::new(id)
        });
        self.posts.lock().unwrap().insert(id, payload.clone());
        Ok(payload)
    }

    async fn update_post(
        &self,
        token: &str,
        id: i64,
        draft: &PostDraft,
    ) -> ForumResult<PostPayload> {
        self.hit("update_post", format!("update_post {id}")).await?;
        self.authorize(token)?;
        let mut posts = self.posts.lock().unwrap();
        let payload = posts.get_mut(&id).ok_or(ForumError::NotFound)?;
        payload.post.title = Some(draft.title.clone());
        payload.post.content = Some(draft.content.clone());
        Ok(payload.clone())
    }

    async fn delete_post(&self, token: &str, id: i64) -> ForumResult<()> {
        self.hit("delete_post", format!("delete_post {id}")).await?;
        self.authorize(token)?;
        self.posts
            .lock()
            .unwrap()
            .remove(&id)
            .map(|_| ())
            .ok_or(ForumError::NotFound)
    }

    async fn list_comments(&self, post_id: i64) -> ForumResult<Vec<CommentPayload>> {
        self.hit("list_comments", format!("list_comments {post_id}"))
            .await?;
        Ok(self
            .comments
            .lock()
            .unwrap()
            .get(&post_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_comment(
        &self,
        token: &str,
        post_id: i64,
        draft: &CommentDraft,
    ) -> ForumResult<CommentPayload> {
        self.hit("create_comment", format!("create_comment {post_id}"))
            .await?;
        self.authorize(token)?;
        let payload = CommentPayload::new(Comment {
            content: Some(draft.content.clone()),
            ..comment(self.next_id(), post_id, None).comment
        });
        self.comments
            .lock()
            .unwrap()
            .entry(post_id)
            .or_default()
            .push(payload.clone());
        Ok(payload)
    }

    async fn create_reply(
        &self,
        token: &str,
        comment_id: i64,
        draft: &CommentDraft,
    ) -> ForumResult<CommentPayload> {
        self.hit("create_reply", format!("create_reply {comment_id}"))
            .await?;
        self.authorize(token)?;
        let post_id = self
            .comments
            .lock()
            .unwrap()
            .iter()
            .find(|(_, comments)| {
                comments
                    .iter()
                    .any(|payload| payload.comment.id == comment_id)
            })
            .map(|(post_id, _)| *post_id)
            .ok_or(ForumError::NotFound)?;
        let payload = CommentPayload::new(Comment {
            content: Some(draft.content.clone()),
            ..comment(self.next_id(), post_id, Some(comment_id)).comment
        });
        self.comments
            .lock()
            .unwrap()
            .entry(post_id)
            .or_default()
            .push(payload.clone());
        Ok(payload)
    }

    async fn update_comment(
        &self,
        token: &str,
        id: i64,
        draft: &CommentDraft,
    ) -> ForumResult<CommentPayload> {
        self.hit("update_comment", format!("update_comment {id}"))
            .await?;
        self.authorize(token)?;
        let mut comments = self.comments.lock().unwrap();
        let payload = comments
            .values_mut()
            .flatten()
            .find(|payload| payload.comment.id == id)
            .ok_or(ForumError::NotFound)?;
        payload.comment.content = Some(draft.content.clone());
        Ok(payload.clone())
    }

    async fn delete_comment(&self, token: &str, id: i64) -> ForumResult<()> {
        self.hit("delete_comment", format!("delete_comment {id}"))
            .await?;
        self.authorize(token)?;
        for comments in self.comments.lock().unwrap().values_mut() {
            comments.retain(|payload| {
                payload.comment.id != id && payload.comment.parent_comment_id != Some(id)
            });
        }
        Ok(())
    }

    async fn put_vote(
        &self,
        token: &str,
        target: VoteTarget,
        vote: VoteType,
    ) -> ForumResult<Option<RatingSnapshot>> {
        self.hit("put_vote", format!("put_vote {target} {vote}"))
            .await?;
        self.authorize(token)?;
        self.votes.lock().unwrap().insert(target, vote);
        Ok(self.rating(target))
    }

    async fn delete_vote(
        &self,
        token: &str,
        target: VoteTarget,
    ) -> ForumResult<Option<RatingSnapshot>> {
        self.hit("delete_vote", format!("delete_vote {target}"))
            .await?;
        self.authorize(token)?;
        self.votes.lock().unwrap().remove(&target);
        Ok(self.rating(target))
    }

    async fn list_categories(&self) -> ForumResult<Vec<Category>> {
        self.hit("list_categories", "list_categories".to_string())
            .await?;
        Ok(self.categories.lock().unwrap().values().cloned().collect())
    }

    async fn get_category(&self, id: i64) -> ForumResult<Category> {
        self.hit("get_category", format!("get_category {id}"))
            .await?;
        self.categories
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(ForumError::NotFound)
    }

    async fn list_category_posts(&self, id: i64) -> ForumResult<Vec<PostPayload>> {
        self.hit("list_category_posts", format!("list_category_posts {id}"))
            .await?;
        Ok(self
            .posts
            .lock()
            .unwrap()
            .values()
            .filter(|payload| {
                payload
                    .post
                    .categories
                    .as_ref()
                    .is_some_and(|ids| ids.contains(&id))
            })
            .cloned()
            .collect())
    }

    async fn create_category(&self, token: &str, draft: &CategoryDraft) -> ForumResult<Category> {
        self.hit("create_category", format!("create_category {}", draft.title))
            .await?;
        self.authorize(token)?;
        let category = Category {
            id: self.next_id(),
            title: Some(draft.title.clone()),
            description: draft.description.clone(),
        };
        self.categories
            .lock()
            .unwrap()
            .insert(category.id, category.clone());
        Ok(category)
    }

    async fn update_category(
        &self,
        token: &str,
        id: i64,
        draft: &CategoryDraft,
    ) -> ForumResult<Category> {
        self.hit("update_category", format!("update_category {id}"))
            .await?;
        self.authorize(token)?;
        let mut categories = self.categories.lock().unwrap();
        let category = categories.get_mut(&id).ok_or(ForumError::NotFound)?;
        category.title = Some(draft.title.clone());
        category.description = draft.description.clone();
        Ok(category.clone())
    }

    async fn delete_category(&self, token: &str, id: i64) -> ForumResult<()> {
        self.hit("delete_category", format!("delete_category {id}"))
            .await?;
        self.authorize(token)?;
        self.categories
            .lock()
            .unwrap()
            .remove(&id)
            .map(|_| ())
            .ok_or(ForumError::NotFound)
    }

    async fn list_favorites(&self, token: &str) -> ForumResult<Vec<PostPayload>> {
        self.hit("list_favorites", "list_favorites".to_string())
            .await?;
        self.authorize(token)?;
        let ids = self.favorites.lock().unwrap().clone();
        Ok(ids
            .into_iter()
            .map(|id| PostPayload::new(Post::new(id)))
            .collect())
    }

    async fn add_favorite(&self, token: &str, post_id: i64) -> ForumResult<()> {
        self.hit("add_favorite", format!("add_favorite {post_id}"))
            .await?;
        self.authorize(token)?;
        self.favorites.lock().unwrap().push(post_id);
        Ok(())
    }

    async fn remove_favorite(&self, token: &str, post_id: i64) -> ForumResult<()> {
        self.hit("remove_favorite", format!("remove_favorite {post_id}"))
            .await?;
        self.authorize(token)?;
        self.favorites.lock().unwrap().retain(|id| *id != post_id);
        Ok(())
    }

    async fn list_users(&self, token: &str) -> ForumResult<Vec<User>> {
        self.hit("list_users", "list_users".to_string()).await?;
        self.authorize(token)?;
        Ok(vec![user()])
    }

    async fn get_user(&self, id: i64) -> ForumResult<User> {
        self.hit("get_user", format!("get_user {id}")).await?;
        if id == USER_ID {
            Ok(user())
        } else {
            Err(ForumError::NotFound)
        }
    }

    async fn list_user_posts(&self, id: i64, _query: &PostQuery) -> ForumResult<Vec<PostPayload>> {
        self.hit("list_user_posts", format!("list_user_posts {id}"))
            .await?;
        Ok(self
            .posts
            .lock()
            .unwrap()
            .values()
            .filter(|payload| payload.post.author_id == Some(id))
            .cloned()
            .collect())
    }

    async fn update_profile(
        &self,
        token: &str,
        user_id: i64,
        update: &ProfileUpdate,
    ) -> ForumResult<User> {
        self.hit("update_profile", format!("update_profile {user_id}"))
            .await?;
        self.authorize(token)?;
        Ok(User {
            id: user_id,
            full_name: update.full_name.clone(),
            login: update.login.clone(),
            email: update.email.clone(),
            ..User::default()
        })
    }

    async fn upload_avatar(
        &self,
        token: &str,
        file_name: &str,
        _bytes: Vec<u8>,
    ) -> ForumResult<String> {
        self.hit("upload_avatar", format!("upload_avatar {file_name}"))
            .await?;
        self.authorize(token)?;
        Ok(format!("/uploads/{file_name}"))
    }
}

pub fn anonymous_client(api: &FakeApi) -> (ForumClient, Arc<MemorySideChannel>) {
    client_with_config(api, ClientConfig::default())
}

pub fn client_with_config(
    api: &FakeApi,
    config: ClientConfig,
) -> (ForumClient, Arc<MemorySideChannel>) {
    let side = Arc::new(MemorySideChannel::new());
    let client = ForumClient::with_api(Arc::new(api.clone()), config, side.clone());
    (client, side)
}

/// Клиент с восстановленной по токену сессией; журнал вызовов очищен.
pub async fn signed_in_client(api: &FakeApi) -> (ForumClient, Arc<MemorySideChannel>) {
    signed_in_with_config(api, ClientConfig::default()).await
}

pub async fn signed_in_with_config(
    api: &FakeApi,
    config: ClientConfig,
) -> (ForumClient, Arc<MemorySideChannel>) {
    let (client, side) = client_with_config(api, config);
    side.set("token", TOKEN).unwrap();
    client
        .session()
        .bootstrap()
        .await
        .expect("bootstrap must succeed")
        .expect("stored token must be accepted");
    api.take_calls();
    (client, side)
}

pub fn side_value(side: &MemorySideChannel, key: &str) -> Option<String> {
    side.get(key).unwrap()
}

pub fn set_side(side: &MemorySideChannel, key: &str, value: &str) {
    side.set(key, value).unwrap();
}
