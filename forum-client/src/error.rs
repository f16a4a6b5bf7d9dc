use thiserror::Error;
use validator::ValidationErrors;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
/// Ошибки ядра `forum-client`.
///
/// Каждая ошибка локальна для операции, которая её вернула: ядро ничего не
/// повторяет само и ничего не считает фатальным для процесса.
pub enum ForumError {
    /// Операция требует пользователя, а сессии нет. В сеть запрос не уходит.
    #[error("unauthenticated")]
    Unauthenticated,

    /// Сервер отверг токен (истёк/некорректен). Сессия сбрасывается.
    #[error("authorization rejected")]
    AuthorizationRejected,

    /// Сервер отказал в действии при валидном токене (например, не админ).
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Сервер (или локальная проверка черновика) отверг содержимое запроса.
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// Сущность больше не существует на сервере.
    #[error("not found")]
    NotFound,

    /// Пост закрыт: новые комментарии и ответы запрещены.
    #[error("post {post_id} is locked")]
    PostLocked {
        /// Идентификатор закрытого поста.
        post_id: i64,
    },

    /// Сеть, таймаут или 5xx. Можно повторить тот же intent.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Ответ сервера не совпал с ожидаемым контрактом.
    #[error("decode error: {0}")]
    Decode(String),

    /// Ошибка долговременного локального хранилища.
    #[error("storage error: {0}")]
    Storage(String),
}

/// Результат операций `forum-client`.
pub type ForumResult<T> = Result<T, ForumError>;

impl ForumError {
    /// `true`, если повтор того же intent может завершиться успешно.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// `true` для ошибок, после которых сессия должна быть сброшена.
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, Self::AuthorizationRejected)
    }

    pub(crate) fn from_http_status(status: reqwest::StatusCode, message: Option<String>) -> Self {
        let message = message.unwrap_or_else(|| format!("http status {status}"));
        match status {
            reqwest::StatusCode::UNAUTHORIZED => Self::AuthorizationRejected,
            reqwest::StatusCode::FORBIDDEN => Self::Forbidden(message),
            reqwest::StatusCode::NOT_FOUND => Self::NotFound,
            status if status.is_server_error() => Self::Transient(message),
            reqwest::StatusCode::REQUEST_TIMEOUT | reqwest::StatusCode::TOO_MANY_REQUESTS => {
                Self::Transient(message)
            }
            _ => Self::ValidationFailed(message),
        }
    }

    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::from_http_status(status, None);
        }
        if err.is_decode() {
            return Self::Decode(err.to_string());
        }
        Self::Transient(err.to_string())
    }
}

impl From<ValidationErrors> for ForumError {
    fn from(value: ValidationErrors) -> Self {
        Self::ValidationFailed(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;

    use super::ForumError;

    #[test]
    fn unauthorized_status_maps_to_rejection() {
        let err = ForumError::from_http_status(StatusCode::UNAUTHORIZED, None);
        assert!(err.is_auth_rejection());
    }

    #[test]
    fn forbidden_status_keeps_session() {
        let err = ForumError::from_http_status(StatusCode::FORBIDDEN, Some("admins only".into()));
        assert_eq!(err, ForumError::Forbidden("admins only".to_string()));
        assert!(!err.is_auth_rejection());
    }

    #[test]
    fn bad_request_passes_server_message_through() {
        let err = ForumError::from_http_status(
            StatusCode::BAD_REQUEST,
            Some("Title is required".to_string()),
        );
        assert_eq!(err, ForumError::ValidationFailed("Title is required".into()));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn server_errors_are_transient() {
        let err = ForumError::from_http_status(StatusCode::BAD_GATEWAY, None);
        assert!(matches!(err, ForumError::Transient(ref msg) if msg.contains("502")));
        assert!(err.is_recoverable());
    }

    #[test]
    fn not_found_status_maps_to_not_found() {
        let err = ForumError::from_http_status(StatusCode::NOT_FOUND, Some("gone".into()));
        assert_eq!(err, ForumError::NotFound);
    }
}
