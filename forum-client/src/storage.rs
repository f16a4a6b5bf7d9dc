//! Долговременное key-value хранилище на стороне клиента.
//!
//! Здесь лежат токен сессии, последние известные маркеры голосов и список
//! избранного. Всё это кэши серверной правды: значения, которые не удалось
//! разобрать, считаются отсутствующими, а при появлении авторитетных данных
//! записи перезаписываются.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use crate::error::{ForumError, ForumResult};
use crate::models::{VoteKey, VoteType};

const TOKEN_KEY: &str = "token";

/// Строковое key-value хранилище, переживающее перезапуск клиента.
pub trait SideChannel: Send + Sync + fmt::Debug {
    /// Значение по ключу.
    fn get(&self, key: &str) -> ForumResult<Option<String>>;
    /// Записывает значение.
    fn set(&self, key: &str, value: &str) -> ForumResult<()>;
    /// Удаляет значение; отсутствие ключа не ошибка.
    fn remove(&self, key: &str) -> ForumResult<()>;
}

#[derive(Debug, Default)]
/// Хранилище в памяти процесса: для тестов и одноразовых сессий.
pub struct MemorySideChannel {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemorySideChannel {
    /// Пустое хранилище.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SideChannel for MemorySideChannel {
    fn get(&self, key: &str) -> ForumResult<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> ForumResult<()> {
        self.entries
            .lock()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> ForumResult<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

#[derive(Debug)]
/// Хранилище в JSON-файле. Файл перезаписывается целиком через временный.
pub struct FileSideChannel {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileSideChannel {
    /// Открывает файл; отсутствующий или битый файл даёт пустое хранилище.
    pub fn open(path: impl Into<PathBuf>) -> ForumResult<Self> {
        let path = path.into();
        let entries = if path.exists() {
            let raw = fs::read_to_string(&path)
                .map_err(|err| ForumError::Storage(format!("{}: {err}", path.display())))?;
            parse_entries(&raw).unwrap_or_else(|| {
                warn!(path = %path.display(), "side channel file is corrupt, starting empty");
                BTreeMap::new()
            })
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Путь к файлу хранилища.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> ForumResult<()> {
        let raw = serde_json::to_string_pretty(entries)
            .map_err(|err| ForumError::Storage(err.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        let write = || -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(raw.as_bytes())?;
            file.sync_all()?;
            fs::rename(&tmp, &self.path)
        };
        write().map_err(|err| ForumError::Storage(format!("{}: {err}", self.path.display())))
    }
}

impl SideChannel for FileSideChannel {
    fn get(&self, key: &str) -> ForumResult<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> ForumResult<()> {
        let mut entries = self.entries.lock();
        entries.insert(key.to_string(), value.to_string());
        self.flush(&entries)
    }

    fn remove(&self, key: &str) -> ForumResult<()> {
        let mut entries = self.entries.lock();
        if entries.remove(key).is_none() {
            return Ok(());
        }
        self.flush(&entries)
    }
}

fn parse_entries(raw: &str) -> Option<BTreeMap<String, String>> {
    if raw.trim().is_empty() {
        return Some(BTreeMap::new());
    }
    serde_json::from_str(raw).ok()
}

fn parse_token(raw: &str) -> Option<String> {
    let token = raw.trim().to_string();
    if token.is_empty() {
        return None;
    }
    Some(token)
}

fn parse_favorites(raw: &str) -> Option<Vec<i64>> {
    serde_json::from_str::<Vec<i64>>(raw).ok()
}

fn vote_key(key: VoteKey) -> String {
    format!(
        "vote-{}-{}-user-{}",
        key.target.segment(),
        key.target.id(),
        key.user_id
    )
}

fn favorites_key(user_id: i64) -> String {
    format!("favorites-user-{user_id}")
}

#[derive(Debug, Clone)]
/// Типизированный доступ к [`SideChannel`].
///
/// Чтение не падает: ошибка хранилища логируется и даёт `None`.
pub(crate) struct SideStorage {
    channel: Arc<dyn SideChannel>,
}

impl SideStorage {
    pub(crate) fn new(channel: Arc<dyn SideChannel>) -> Self {
        Self { channel }
    }

    fn read(&self, key: &str) -> Option<String> {
        match self.channel.get(key) {
            Ok(value) => value,
            Err(err) => {
                warn!(key, error = %err, "side channel read failed");
                None
            }
        }
    }

    pub(crate) fn load_token(&self) -> Option<String> {
        self.read(TOKEN_KEY).as_deref().and_then(parse_token)
    }

    pub(crate) fn save_token(&self, token: &str) -> ForumResult<()> {
        self.channel.set(TOKEN_KEY, token)
    }

    pub(crate) fn clear_token(&self) -> ForumResult<()> {
        self.channel.remove(TOKEN_KEY)
    }

    pub(crate) fn load_vote(&self, key: VoteKey) -> Option<VoteType> {
        self.read(&vote_key(key)).as_deref().and_then(VoteType::parse)
    }

    pub(crate) fn save_vote(&self, key: VoteKey, vote: Option<VoteType>) -> ForumResult<()> {
        match vote {
            Some(vote) => self.channel.set(&vote_key(key), vote.as_str()),
            None => self.channel.remove(&vote_key(key)),
        }
    }

    pub(crate) fn load_favorites(&self, user_id: i64) -> Option<Vec<i64>> {
        self.read(&favorites_key(user_id))
            .as_deref()
            .and_then(parse_favorites)
    }

    pub(crate) fn save_favorites(&self, user_id: i64, post_ids: &[i64]) -> ForumResult<()> {
        let raw =
            serde_json::to_string(post_ids).map_err(|err| ForumError::Storage(err.to_string()))?;
        self.channel.set(&favorites_key(user_id), &raw)
    }

    pub(crate) fn clear_favorites(&self, user_id: i64) -> ForumResult<()> {
        self.channel.remove(&favorites_key(user_id))
    }
}
