//! Кнопка лайка на странице поста.
//!
//! Состояния: `Idle` и `Pending`. Переход `Idle -> Pending` возможен только
//! при наличии сессии и если запрос ещё не идёт. После ответа кнопка снова
//! `Idle`: при успехе принимается то, что вернул сервер, при ошибке
//! прежнее значение не меняется.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use crate::error::{ClientError, ClientResult};
use crate::models::LikeState;
use crate::session::AuthContext;

/// Операции лайка на сервере.
#[async_trait]
pub trait LikeService: Send + Sync {
    /// Ставит лайк.
    async fn like(&self, post_id: i64) -> ClientResult<LikeState>;
    /// Снимает лайк.
    async fn unlike(&self, post_id: i64) -> ClientResult<LikeState>;
    /// Текущее состояние.
    async fn like_status(&self, post_id: i64) -> ClientResult<LikeState>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Фаза кнопки.
pub enum LikePhase {
    /// Запросов нет.
    Idle,
    /// Запрос выполняется.
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Итог нажатия.
pub enum ToggleOutcome {
    /// Сервер подтвердил новое состояние.
    Settled(LikeState),
    /// Предыдущее нажатие ещё не обработано; нажатие проигнорировано.
    Busy,
}

#[derive(Debug)]
struct LikeSlot {
    current: LikeState,
    phase: LikePhase,
    error: Option<String>,
}

#[derive(Clone)]
/// Состояние кнопки лайка одного поста.
pub struct LikeToggle {
    post_id: i64,
    service: Arc<dyn LikeService>,
    session: AuthContext,
    slot: Arc<Mutex<LikeSlot>>,
}

impl std::fmt::Debug for LikeToggle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LikeToggle")
            .field("post_id", &self.post_id)
            .field("slot", &*self.lock())
            .finish()
    }
}

struct PendingGuard<'a> {
    slot: &'a Mutex<LikeSlot>,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .phase = LikePhase::Idle;
    }
}

impl LikeToggle {
    /// Создаёт кнопку с начальным состоянием, полученным вместе с постом.
    pub fn new(
        post_id: i64,
        initial: LikeState,
        service: Arc<dyn LikeService>,
        session: AuthContext,
    ) -> Self {
        Self {
            post_id,
            service,
            session,
            slot: Arc::new(Mutex::new(LikeSlot {
                current: initial,
                phase: LikePhase::Idle,
                error: None,
            })),
        }
    }

    /// Текущее состояние лайка.
    pub fn state(&self) -> LikeState {
        self.lock().current
    }

    /// Текущая фаза кнопки.
    pub fn phase(&self) -> LikePhase {
        self.lock().phase
    }

    /// Сообщение о последней ошибке.
    pub fn error(&self) -> Option<String> {
        self.lock().error.clone()
    }

    /// Нажатие на кнопку: лайк, если его нет, иначе снятие лайка.
    ///
    /// Без сессии возвращает [`ClientError::NotAuthenticated`] и ничего не отправляет.
    pub async fn toggle(&self) -> ClientResult<ToggleOutcome> {
        if !self.session.is_authenticated() {
            return Err(ClientError::NotAuthenticated);
        }

        let liked = {
            let mut slot = self.lock();
            if slot.phase == LikePhase::Pending {
                return Ok(ToggleOutcome::Busy);
            }
            slot.phase = LikePhase::Pending;
            slot.current.liked
        };
        let _pending = PendingGuard { slot: &self.slot };

        debug!(post_id = self.post_id, like = !liked, "toggle like");
        let result = if liked {
            self.service.unlike(self.post_id).await
        } else {
            self.service.like(self.post_id).await
        };

        let mut slot = self.lock();
        match result {
            Ok(state) => {
                slot.current = state;
                slot.error = None;
                Ok(ToggleOutcome::Settled(state))
            }
            Err(err) => {
                slot.error = Some(err.to_string());
                Err(err)
            }
        }
    }

    /// Перечитывает состояние с сервера.
    pub async fn refresh(&self) -> ClientResult<LikeState> {
        let state = self.service.like_status(self.post_id).await?;
        let mut slot = self.lock();
        if slot.phase == LikePhase::Idle {
            slot.current = state;
        }
        Ok(state)
    }

    fn lock(&self) -> MutexGuard<'_, LikeSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
