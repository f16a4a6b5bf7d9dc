//! Session Gate: есть ли у клиента пользователь.
//!
//! Любой intent, требующий личности, сначала синхронно спрашивает
//! [`SessionGate::require`]. Без сессии он получает
//! [`ForumError::Unauthenticated`] и не доходит до сети.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};
use validator::Validate;

use crate::Shared;
use crate::error::{ForumError, ForumResult};
use crate::models::{
    AuthSession, Credentials, PasswordReset, PasswordResetRequest, Registration, User,
};

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Identity {
    pub(crate) token: String,
    pub(crate) user: User,
}

impl Identity {
    pub(crate) fn user_id(&self) -> i64 {
        self.user.id
    }
}

#[derive(Debug, Default)]
pub(crate) struct SessionGate {
    identity: RwLock<Option<Identity>>,
}

impl SessionGate {
    pub(crate) fn require(&self) -> ForumResult<Identity> {
        self.identity
            .read()
            .clone()
            .ok_or(ForumError::Unauthenticated)
    }

    pub(crate) fn current(&self) -> Option<Identity> {
        self.identity.read().clone()
    }

    /// `true`, если `identity` всё ещё текущая сессия.
    pub(crate) fn is_current(&self, identity: &Identity) -> bool {
        self.identity.read().as_ref().is_some_and(|current| {
            current.user.id == identity.user.id && current.token == identity.token
        })
    }

    pub(crate) fn establish(&self, identity: Identity) -> Option<Identity> {
        self.identity.write().replace(identity)
    }

    pub(crate) fn clear(&self) -> Option<Identity> {
        self.identity.write().take()
    }

    pub(crate) fn merge_user(&self, user: &User) {
        if let Some(identity) = self.identity.write().as_mut()
            && identity.user.id == user.id
        {
            identity.user.merge(user.clone());
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionEnd {
    Logout,
    Rejected,
}

impl Shared {
    pub(crate) fn start_session(&self, session: AuthSession) -> User {
        let AuthSession { token, user } = session;
        let previous = self.gate.establish(Identity {
            token: token.clone(),
            user: user.clone(),
        });
        {
            let mut store = self.store.lock();
            if let Some(previous) = previous.filter(|previous| previous.user.id != user.id) {
                store.clear_identity(previous.user.id);
            }
            store.upsert(user.clone());
        }
        if let Err(err) = self.side.save_token(&token) {
            warn!(error = %err, "failed to persist session token");
        }
        info!(user_id = user.id, "session started");
        user
    }

    /// Сбрасывает сессию и кэши, привязанные к пользователю.
    pub(crate) fn end_session(&self, reason: SessionEnd) -> Option<Identity> {
        let identity = self.gate.clear();
        if let Err(err) = self.side.clear_token() {
            warn!(error = %err, "failed to clear persisted session token");
        }
        let identity = identity?;

        self.store.lock().clear_identity(identity.user_id());
        if reason == SessionEnd::Rejected
            && let Err(err) = self.side.clear_favorites(identity.user_id())
        {
            warn!(error = %err, "failed to clear persisted favorites");
        }
        info!(user_id = identity.user_id(), ?reason, "session ended");
        Some(identity)
    }
}

#[derive(Clone)]
/// Вход, выход и текущий пользователь.
pub struct Session {
    shared: Arc<Shared>,
}

impl Session {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// `true`, если пользователь вошёл.
    pub fn is_authenticated(&self) -> bool {
        self.shared.gate.current().is_some()
    }

    /// Текущий пользователь.
    pub fn current_user(&self) -> Option<User> {
        self.shared.gate.current().map(|identity| identity.user)
    }

    /// Текущий пользователь или [`ForumError::Unauthenticated`].
    pub fn require_user(&self) -> ForumResult<User> {
        self.shared.gate.require().map(|identity| identity.user)
    }

    /// Восстанавливает сессию по сохранённому токену.
    ///
    /// Без токена возвращает `Ok(None)`. Отвергнутый сервером токен
    /// удаляется, результат тоже `Ok(None)`. Прочие ошибки пробрасываются,
    /// токен при этом остаётся для следующей попытки.
    pub async fn bootstrap(&self) -> ForumResult<Option<User>> {
        let Some(token) = self.shared.side.load_token() else {
            return Ok(None);
        };

        match self.shared.api.current_user(&token).await {
            Ok(user) => {
                if let Some(current) = self.shared.gate.current() {
                    return Ok(Some(current.user));
                }
                Ok(Some(self.shared.start_session(AuthSession { token, user })))
            }
            Err(ForumError::AuthorizationRejected) => {
                info!("stored token rejected, starting anonymous");
                if let Err(err) = self.shared.side.clear_token() {
                    warn!(error = %err, "failed to clear persisted session token");
                }
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Вход по логину и паролю.
    pub async fn login(&self, credentials: Credentials) -> ForumResult<User> {
        credentials.validate()?;
        let session = self.shared.api.login(&credentials).await?;
        Ok(self.shared.start_session(session))
    }

    /// Регистрация. Возвращает сообщение сервера; войти можно после подтверждения email.
    pub async fn register(&self, registration: Registration) -> ForumResult<String> {
        registration.validate()?;
        self.shared.api.register(&registration).await
    }

    /// Подтверждает email и сразу входит с выданным токеном.
    pub async fn verify_email(&self, code: &str) -> ForumResult<User> {
        let code = code.trim();
        if code.is_empty() {
            return Err(ForumError::ValidationFailed(
                "verification code is empty".to_string(),
            ));
        }
        let session = self.shared.api.verify_email(code).await?;
        Ok(self.shared.start_session(session))
    }

    /// Просит сервер отправить ссылку для сброса пароля. Сессию не трогает.
    pub async fn request_password_reset(&self, email: &str) -> ForumResult<String> {
        let request = PasswordResetRequest {
            email: email.trim().to_string(),
        };
        request.validate()?;
        self.shared.api.request_password_reset(&request).await
    }

    /// Задаёт новый пароль по токену из письма. Войти нужно отдельно.
    pub async fn reset_password(
        &self,
        reset_token: &str,
        reset: PasswordReset,
    ) -> ForumResult<String> {
        let reset_token = reset_token.trim();
        if reset_token.is_empty() {
            return Err(ForumError::ValidationFailed(
                "password reset token is empty".to_string(),
            ));
        }
        reset.validate()?;
        self.shared
            .api
            .confirm_password_reset(reset_token, &reset)
            .await
    }

    /// Выход. Маркеры голосов и избранное пользователя сбрасываются.
    pub fn logout(&self) {
        if self.shared.end_session(SessionEnd::Logout).is_none() {
            info!("logout without active session");
        }
    }
}
