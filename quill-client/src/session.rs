//! Контекст аутентификации: единый источник правды о том, кто вошёл.
//!
//! Контекст передаётся явно (клонируемый хэндл), глобального состояния нет.
//! Сессия зеркалируется в [`KeyValueStore`] под ключом [`USER_KEY`], так что
//! новый процесс с тем же хранилищем восстанавливает пользователя.
//!
//! Срок жизни сессии не отслеживается: при ответе 401 вызывающий код сам
//! вызывает [`AuthContext::logout`].

use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, warn};

use crate::auth::AuthScheme;
use crate::error::ClientResult;
use crate::models::User;
use crate::storage::{KeyValueStore, MemoryStore};

/// Ключ хранилища с JSON пользователя.
pub const USER_KEY: &str = "user";
/// Ключ хранилища с bearer-токеном.
pub const TOKEN_KEY: &str = "token";
/// Ключ хранилища с cookie клиента.
pub const COOKIES_KEY: &str = "cookies";

#[derive(Debug, Default)]
struct SessionState {
    user: Option<User>,
    token: Option<String>,
}

#[derive(Debug, Clone)]
/// Клонируемый хэндл сессии поверх постоянного хранилища.
pub struct AuthContext {
    store: Arc<dyn KeyValueStore>,
    state: Arc<RwLock<SessionState>>,
}

impl AuthContext {
    /// Создаёт контекст и восстанавливает сессию из хранилища.
    ///
    /// Отсутствующие или повреждённые данные дают анонимную сессию.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        let user = restore_user(store.as_ref());
        let token = restore_token(store.as_ref());
        debug!(restored = user.is_some(), "session initialized");

        Self {
            store,
            state: Arc::new(RwLock::new(SessionState { user, token })),
        }
    }

    /// Анонимный контекст поверх хранилища в памяти.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Хранилище, за которым живёт сессия.
    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Текущий пользователь или `None` для анонимной сессии.
    pub fn current_user(&self) -> Option<User> {
        self.read(|state| state.user.clone())
    }

    /// `true`, если пользователь вошёл.
    pub fn is_authenticated(&self) -> bool {
        self.read(|state| state.user.is_some())
    }

    /// `true`, если вошёл администратор.
    pub fn is_admin(&self) -> bool {
        self.read(|state| state.user.as_ref().is_some_and(User::is_admin))
    }

    /// Сохранённый bearer-токен.
    pub fn bearer_token(&self) -> Option<String> {
        self.read(|state| state.token.clone())
    }

    /// Схема аутентификации для запросов от имени текущего пользователя.
    pub fn auth_scheme(&self) -> AuthScheme {
        self.read(|state| AuthScheme::for_session(state.user.as_ref(), state.token.as_deref()))
    }

    /// Запоминает пользователя в памяти и в хранилище.
    ///
    /// Память обновляется всегда; ошибка записи в хранилище возвращается.
    pub fn login(&self, user: User) -> ClientResult<()> {
        let raw = serde_json::to_string(&user)?;
        self.write(|state| state.user = Some(user));
        self.store.set(USER_KEY, &raw)
    }

    /// Запоминает bearer-токен в памяти и в хранилище.
    pub fn set_bearer_token(&self, token: impl Into<String>) -> ClientResult<()> {
        let token = token.into();
        let Some(token) = parse_token(&token) else {
            return self.clear_bearer_token();
        };
        self.store.set(TOKEN_KEY, &token)?;
        self.write(|state| state.token = Some(token));
        Ok(())
    }

    fn clear_bearer_token(&self) -> ClientResult<()> {
        self.write(|state| state.token = None);
        self.store.remove(TOKEN_KEY)
    }

    /// Завершает сессию: очищает пользователя и токен в памяти и в хранилище.
    pub fn logout(&self) -> ClientResult<()> {
        self.write(|state| *state = SessionState::default());
        self.store.remove(USER_KEY)?;
        self.store.remove(TOKEN_KEY)
    }

    fn read<R>(&self, f: impl FnOnce(&SessionState) -> R) -> R {
        let guard = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    fn write(&self, f: impl FnOnce(&mut SessionState)) {
        let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard);
    }
}

fn parse_user(raw: &str) -> Option<User> {
    serde_json::from_str::<User>(raw).ok()
}

fn parse_token(raw: &str) -> Option<String> {
    let token = raw.trim().to_string();
    if token.is_empty() {
        return None;
    }
    Some(token)
}

fn restore_user(store: &dyn KeyValueStore) -> Option<User> {
    let raw = match store.get(USER_KEY) {
        Ok(raw) => raw?,
        Err(err) => {
            warn!(error = %err, "session store is unreadable, starting anonymous");
            return None;
        }
    };

    let user = parse_user(&raw);
    if user.is_none() {
        warn!("stored session is malformed, starting anonymous");
    }
    user
}

fn restore_token(store: &dyn KeyValueStore) -> Option<String> {
    store.get(TOKEN_KEY).ok().flatten().as_deref().and_then(parse_token)
}
