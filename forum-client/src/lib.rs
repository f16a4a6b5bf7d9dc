//! Клиентское ядро форума: кэш сущностей и оптимистичная синхронизация с сервером.
//!
//! [`ForumClient`] собирает компоненты над одним общим контекстом:
//! - [`EntityStore`]: нормализованный кэш постов, комментариев, категорий,
//!   пользователей, голосов и избранного;
//! - [`Session`]: кто вошёл, вход и выход;
//! - [`VoteReconciler`]: оптимистичные лайки и дизлайки;
//! - [`MutationCoordinator`]: загрузки и мутации, включая избранное;
//! - [`CommentTree`]: дерево ответов, собираемое из плоского списка при чтении.
//!
//! Сервер скрыт за трейтом [`ForumApi`]; HTTP-реализация в [`HttpApi`].
//! Токен, маркеры голосов и избранное переживают перезапуск через [`SideChannel`].
#![warn(missing_docs)]

mod api;
mod comment_tree;
mod config;
mod error;
mod http_client;
mod keyed;
mod models;
mod mutations;
mod session;
mod storage;
mod store;
mod votes;

use std::sync::Arc;

use parking_lot::Mutex;

pub use api::{CommentPayload, ForumApi, PostPayload};
pub use comment_tree::{CommentThread, CommentTree};
pub use config::{ClientConfig, DEFAULT_BASE_URL};
pub use error::{ForumError, ForumResult};
pub use http_client::HttpApi;
pub use models::{
    AuthSession, Category, CategoryDraft, Comment, CommentDraft, Credentials, EntityKind,
    Favorite, Like, PasswordReset, PasswordResetRequest, Post, PostDraft, PostQuery, PostSort,
    ProfileUpdate, RatingSnapshot, Registration, Role, User, VoteKey, VoteTarget, VoteType,
};
pub use mutations::MutationCoordinator;
pub use session::Session;
pub use storage::{FileSideChannel, MemorySideChannel, SideChannel};
pub use store::{EntityKey, EntityRecord, EntityStore};
pub use votes::{VoteOutcome, VoteReconciler};

use keyed::KeyedLocks;
use session::SessionGate;
use storage::SideStorage;

/// Общий контекст компонентов. Хранилище не удерживается через `.await`.
pub(crate) struct Shared {
    pub(crate) api: Arc<dyn ForumApi>,
    pub(crate) config: ClientConfig,
    pub(crate) store: Mutex<EntityStore>,
    pub(crate) gate: SessionGate,
    pub(crate) side: SideStorage,
    pub(crate) vote_locks: KeyedLocks<VoteKey>,
    pub(crate) favorite_locks: KeyedLocks<Favorite>,
}

#[derive(Clone)]
/// Точка входа: общий кэш и компоненты, работающие над ним.
///
/// Клонирование дешёвое, клоны видят одно и то же состояние.
pub struct ForumClient {
    shared: Arc<Shared>,
}

impl ForumClient {
    /// Клиент поверх HTTP API из конфигурации.
    pub fn new(config: ClientConfig, side_channel: Arc<dyn SideChannel>) -> ForumResult<Self> {
        let api = HttpApi::new(&config)?;
        Ok(Self::with_api(Arc::new(api), config, side_channel))
    }

    /// Клиент поверх произвольной реализации [`ForumApi`].
    pub fn with_api(
        api: Arc<dyn ForumApi>,
        config: ClientConfig,
        side_channel: Arc<dyn SideChannel>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                api,
                config,
                store: Mutex::new(EntityStore::new()),
                gate: SessionGate::default(),
                side: SideStorage::new(side_channel),
                vote_locks: KeyedLocks::new(),
                favorite_locks: KeyedLocks::new(),
            }),
        }
    }

    /// Настройки клиента.
    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Session Gate: вход, выход, текущий пользователь.
    pub fn session(&self) -> Session {
        Session::new(Arc::clone(&self.shared))
    }

    /// Голосование.
    pub fn votes(&self) -> VoteReconciler {
        VoteReconciler::new(Arc::clone(&self.shared))
    }

    /// Загрузки и мутации.
    pub fn mutations(&self) -> MutationCoordinator {
        MutationCoordinator::new(Arc::clone(&self.shared))
    }

    /// Чтение из хранилища. Замыкание не должно ничего ждать.
    pub fn read<R>(&self, projection: impl FnOnce(&EntityStore) -> R) -> R {
        projection(&self.shared.store.lock())
    }

    /// Посты в порядке последнего запроса списка.
    pub fn posts(&self) -> Vec<Post> {
        self.read(|store| store.posts().into_iter().cloned().collect())
    }

    /// Пост по идентификатору.
    pub fn post(&self, id: i64) -> Option<Post> {
        self.read(|store| store.post(id).cloned())
    }

    /// Просматриваемый сейчас пост.
    pub fn current_post(&self) -> Option<Post> {
        self.read(|store| store.current_post().cloned())
    }

    /// Дерево комментариев поста.
    pub fn comment_tree(&self, post_id: i64) -> CommentTree {
        self.read(|store| store.comment_tree(post_id))
    }

    /// Количество закэшированных комментариев поста вместе с ответами.
    pub fn comment_count(&self, post_id: i64) -> usize {
        self.read(|store| store.comment_count(post_id))
    }

    /// Категории поста; неизвестные категории пропускаются.
    pub fn post_categories(&self, post_id: i64) -> Vec<Category> {
        self.read(|store| {
            store
                .post(post_id)
                .and_then(|post| post.categories.as_ref())
                .map(|ids| store.categories_by_ids(ids).into_iter().cloned().collect())
                .unwrap_or_default()
        })
    }

    /// Все закэшированные категории.
    pub fn categories(&self) -> Vec<Category> {
        self.read(|store| store.categories().into_iter().cloned().collect())
    }

    /// Профиль пользователя из кэша.
    pub fn user(&self, id: i64) -> Option<User> {
        self.read(|store| store.user(id).cloned())
    }

    /// Текущий пользователь.
    pub fn current_user(&self) -> Option<User> {
        self.session().current_user()
    }

    /// Маркер голоса текущего пользователя.
    pub fn vote_marker(&self, target: VoteTarget) -> Option<VoteType> {
        self.votes().vote_marker(target)
    }

    /// `true`, если пост в избранном текущего пользователя.
    pub fn is_favorite(&self, post_id: i64) -> bool {
        self.mutations().is_favorite(post_id)
    }
}
