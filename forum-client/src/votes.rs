//! Vote Reconciler: оптимистичные лайки и дизлайки.
//!
//! Маркер голоса меняется до ответа сервера, а при ошибке возвращается к
//! значению до операции (и в хранилище, и в долговременном side channel).
//! Рейтинг сущности до ответа не трогается: его пишет только сервер.
//! Успех или неудачу решает сам запрос голоса; если агрегаты после него
//! прочитать не удалось, маркер остаётся, а рейтинг прежним.
//!
//! Intent-ы по одному ключу (сущность, пользователь) выполняются строго
//! по очереди, второй оценивается по итогу первого.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::Shared;
use crate::error::{ForumError, ForumResult};
use crate::models::{RatingSnapshot, VoteKey, VoteTarget, VoteType};
use crate::store::EntityKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Итог подтверждённого сервером голосования.
pub struct VoteOutcome {
    /// За что голосовали.
    pub target: VoteTarget,
    /// Маркер после операции; `None`, если голос снят.
    pub vote: Option<VoteType>,
    /// Авторитетные агрегаты сущности; `None`, если сервер их не вернул.
    pub rating: Option<RatingSnapshot>,
}

#[derive(Clone)]
/// Лайки и дизлайки текущего пользователя.
pub struct VoteReconciler {
    shared: Arc<Shared>,
}

impl VoteReconciler {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Ставит голос `desired` или снимает его, если он уже стоит.
    ///
    /// Без сессии завершается с `Unauthenticated` до первой точки ожидания.
    pub async fn set_vote(
        &self,
        target: VoteTarget,
        desired: VoteType,
    ) -> ForumResult<VoteOutcome> {
        let identity = self.shared.gate.require()?;
        let key = VoteKey::new(target, identity.user_id());
        let _turn = self.shared.vote_locks.acquire(key).await;

        // Пока intent ждал очереди, сессия могла смениться.
        let identity = self.shared.gate.require()?;
        if identity.user_id() != key.user_id {
            return Err(ForumError::Unauthenticated);
        }

        let stored_before = self.shared.store.lock().vote(key);
        let side_before = self.shared.side.load_vote(key);
        let effective = self.shared.vote_marker(key);
        let next = if effective == Some(desired) {
            None
        } else {
            Some(desired)
        };

        self.shared.store.lock().set_vote(key, next);
        self.shared.mirror_vote(key, next);
        debug!(entity = %target, ?effective, ?next, "vote applied optimistically");

        let result = match next {
            Some(vote) => self.shared.api.put_vote(&identity.token, target, vote).await,
            None => self.shared.api.delete_vote(&identity.token, target).await,
        };

        match result {
            Ok(rating) => {
                let mut store = self.shared.store.lock();
                // После выхода маркеры прежнего пользователя уже стёрты.
                if self.shared.gate.is_current(&identity) {
                    store.set_vote(key, next);
                }
                match rating {
                    Some(rating) => {
                        if !store.apply_rating(target, rating) {
                            debug!(entity = %target, "voted entity is no longer cached");
                        }
                    }
                    None => warn!(
                        entity = %target,
                        "vote confirmed without rating, keeping cached rating"
                    ),
                }
                drop(store);
                Ok(VoteOutcome {
                    target,
                    vote: next,
                    rating,
                })
            }
            Err(err) => {
                warn!(entity = %target, error = %err, "vote failed, rolling back marker");
                if self.shared.gate.is_current(&identity) {
                    self.shared.store.lock().set_vote(key, stored_before);
                }
                self.shared.mirror_vote(key, side_before);
                self.shared
                    .settle_failure(&err, Some(target_key(target)))
                    .await;
                Err(err)
            }
        }
    }

    /// Маркер голоса текущего пользователя.
    ///
    /// Маркер из хранилища главнее; после авторитетного списка голосов его
    /// отсутствие означает «голоса нет». До этого используется значение из
    /// side channel.
    pub fn vote_marker(&self, target: VoteTarget) -> Option<VoteType> {
        let identity = self.shared.gate.current()?;
        self.shared
            .vote_marker(VoteKey::new(target, identity.user_id()))
    }

    /// `true`, если по сущности есть голос текущего пользователя в работе.
    pub fn is_pending(&self, target: VoteTarget) -> bool {
        self.shared.gate.current().is_some_and(|identity| {
            self.shared
                .vote_locks
                .is_pending(&VoteKey::new(target, identity.user_id()))
        })
    }
}

pub(crate) fn target_key(target: VoteTarget) -> EntityKey {
    match target {
        VoteTarget::Post(id) => EntityKey::Post(id),
        VoteTarget::Comment(id) => EntityKey::Comment(id),
    }
}

impl Shared {
    pub(crate) fn vote_marker(&self, key: VoteKey) -> Option<VoteType> {
        {
            let store = self.store.lock();
            if let Some(vote) = store.vote(key) {
                return Some(vote);
            }
            if store.likes_observed(key.target) {
                return None;
            }
        }
        self.side.load_vote(key)
    }

    /// Ключ голоса текущего пользователя, если по нему есть intent в работе.
    pub(crate) fn pending_vote(&self, target: VoteTarget) -> Option<VoteKey> {
        let identity = self.gate.current()?;
        let key = VoteKey::new(target, identity.user_id());
        self.vote_locks.is_pending(&key).then_some(key)
    }

    pub(crate) fn mirror_vote(&self, key: VoteKey, vote: Option<VoteType>) {
        if let Err(err) = self.side.save_vote(key, vote) {
            warn!(entity = %key.target, error = %err, "failed to persist vote marker");
        }
    }

    /// Переписывает side channel текущего пользователя по авторитетным голосам.
    pub(crate) fn sync_observed_votes(&self, targets: &[VoteTarget]) {
        let Some(identity) = self.gate.current() else {
            return;
        };
        for target in targets {
            let key = VoteKey::new(*target, identity.user_id());
            // Маркер с intent-ом в работе пишет сам intent.
            if self.vote_locks.is_pending(&key) {
                continue;
            }
            let vote = self.store.lock().vote(key);
            self.mirror_vote(key, vote);
        }
    }
}
