use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use forum_client::{ClientConfig, DEFAULT_BASE_URL};

const DEFAULT_STATE_FILE: &str = ".forum_state.json";

#[derive(Debug, Clone)]
pub struct Settings {
    pub api_url: String,
    pub state_file: PathBuf,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub refetch_comments: bool,
    pub log_level: String,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let api_url =
            std::env::var("FORUM_API_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let state_file = std::env::var("FORUM_STATE_FILE")
            .map(|raw| raw.trim().to_string())
            .ok()
            .filter(|raw| !raw.is_empty())
            .unwrap_or_else(|| DEFAULT_STATE_FILE.to_string());
        let connect_timeout_secs = parse_u64_env("HTTP_CONNECT_TIMEOUT_SECS", 5)?;
        let request_timeout_secs = parse_u64_env("HTTP_REQUEST_TIMEOUT_SECS", 15)?;
        let refetch_comments = match std::env::var("FORUM_REFETCH_COMMENTS") {
            Ok(raw) => parse_bool(&raw)
                .with_context(|| format!("Failed to parse FORUM_REFETCH_COMMENTS: {raw}"))?,
            Err(_) => false,
        };
        let log_level = std::env::var("LOG_LEVEL")
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            api_url,
            state_file: PathBuf::from(state_file),
            connect_timeout_secs,
            request_timeout_secs,
            refetch_comments,
            log_level,
        })
    }

    /// Настройки клиента; `server` из командной строки важнее переменной окружения.
    pub fn client_config(&self, server: Option<String>) -> ClientConfig {
        let base_url = normalize_server(server.unwrap_or_else(|| self.api_url.clone()));
        ClientConfig {
            base_url,
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            refetch_comments_after_mutation: self.refetch_comments,
        }
    }
}

pub fn normalize_server(server: String) -> String {
    let server = server.trim().trim_end_matches('/').to_string();
    if server.starts_with("http://") || server.starts_with("https://") {
        return server;
    }

    format!("http://{server}")
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(anyhow!("expected boolean, got `{other}`")),
    }
}

fn parse_u64_env(key: &str, default: u64) -> Result<u64> {
    let value = std::env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse::<u64>()
        .with_context(|| format!("Failed to parse {key}, expecting positive integer"))?;

    if value == 0 {
        return Err(anyhow!("{key} must be > 0"));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Settings {
        Settings {
            api_url: "127.0.0.1:8080".to_string(),
            state_file: PathBuf::from(DEFAULT_STATE_FILE),
            connect_timeout_secs: 3,
            request_timeout_secs: 20,
            refetch_comments: true,
            log_level: "info".to_string(),
        }
    }

    #[test]
    fn normalize_server_keeps_scheme() {
        let s = normalize_server("https://example.com:8080".to_string());
        assert_eq!(s, "https://example.com:8080");
    }

    #[test]
    fn normalize_server_adds_http_scheme_and_drops_trailing_slash() {
        let s = normalize_server("127.0.0.1:8080/".to_string());
        assert_eq!(s, "http://127.0.0.1:8080");
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert!(parse_bool("TRUE").unwrap());
        assert!(parse_bool(" yes ").unwrap());
        assert!(!parse_bool("0").unwrap());
        assert!(!parse_bool("").unwrap());
        assert!(parse_bool("maybe").is_err());
    }

    #[test]
    fn client_config_uses_env_url_by_default() {
        let config = settings().client_config(None);
        assert_eq!(config.base_url, "http://127.0.0.1:8080");
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.request_timeout, Duration::from_secs(20));
        assert!(config.refetch_comments_after_mutation);
    }

    #[test]
    fn client_config_prefers_server_flag() {
        let config = settings().client_config(Some("https://forum.example".to_string()));
        assert_eq!(config.base_url, "https://forum.example");
    }
}
