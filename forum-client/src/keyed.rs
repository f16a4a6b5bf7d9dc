//! Сериализация intent-ов по ключу.
//!
//! На каждый ключ (маркер голоса, пара «пользователь, пост») заводится
//! асинхронный мьютекс. Очередь на `tokio::sync::Mutex` FIFO, поэтому второй
//! intent ждёт, пока первый не завершится, и видит уже итоговое состояние.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug)]
pub(crate) struct KeyedLocks<K> {
    slots: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Ждёт своей очереди на ключ. Ключ свободен, когда guard отпущен.
    pub(crate) async fn acquire(&self, key: K) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self.slots.lock();
            // Слот, на который ссылается только таблица, никем не занят и никем не ожидается.
            slots.retain(|_, slot| Arc::strong_count(slot) > 1);
            slots.entry(key).or_default().clone()
        };
        slot.lock_owned().await
    }

    /// `true`, если по ключу есть intent в работе или в очереди.
    pub(crate) fn is_pending(&self, key: &K) -> bool {
        self.slots
            .lock()
            .get(key)
            .is_some_and(|slot| Arc::strong_count(slot) > 1)
    }
}
