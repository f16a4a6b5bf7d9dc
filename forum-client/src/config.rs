use std::time::Duration;

/// Базовый URL сервера по умолчанию.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";

#[derive(Debug, Clone)]
/// Настройки клиента форума.
pub struct ClientConfig {
    /// Базовый URL REST API, например `http://127.0.0.1:8080`.
    pub base_url: String,
    /// Таймаут установки соединения.
    pub connect_timeout: Duration,
    /// Таймаут запроса целиком.
    pub request_timeout: Duration,
    /// Перечитывать список комментариев поста после каждой мутации комментария.
    ///
    /// Ответ мутации и так вливается в хранилище; перечитывание подтягивает
    /// изменения, которые сервер мог сделать попутно (например, порядок).
    pub refetch_comments_after_mutation: bool,
}

impl ClientConfig {
    /// Настройки по умолчанию с заданным URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(15),
            refetch_comments_after_mutation: false,
        }
    }
}
