//! Клиентская библиотека блог-платформы quill.
//!
//! Предоставляет единый API (`QuillClient`) поверх REST API сервера:
//! - сессия пользователя ([`AuthContext`]) с зеркалированием в хранилище;
//! - две схемы аутентификации: cookie + CSRF для пользователей и bearer
//!   для администратора ([`AuthScheme`]);
//! - постраничные ленты постов и комментариев ([`FeedLoader`]);
//! - лайки и комментарии с каноническим ответом сервера;
//! - статистика панелей с таймаутом ([`DashboardLoader`]).
//!
//! При ответе 401 сессию очищает вызывающий код: см.
//! [`ClientError::is_auth_failure`] и [`AuthContext::logout`].
#![warn(missing_docs)]

mod auth;
mod comments;
mod config;
mod dashboard;
mod drafts;
mod error;
mod feed;
mod http_client;
mod like;
mod models;
mod session;
mod sources;
mod storage;

use std::sync::Arc;

use tracing::{debug, info, warn};

pub use auth::{AuthScheme, XSRF_COOKIE, XSRF_HEADER};
pub use comments::{CommentService, CommentThread, MutationOutcome};
pub use config::{ClientConfig, DEFAULT_BASE_URL};
pub use dashboard::{
    DashboardLoader, DashboardSource, DashboardStatus, fetch_with_timeout, load_once,
};
pub use drafts::{CommentDraft, Credentials, PostDraft, Registration};
pub use error::{ClientError, ClientResult};
pub use feed::{FeedFilter, FeedLoader, LoadOutcome, PageRequest, PageSource, ScrollMetrics};
pub use http_client::HttpClient;
pub use like::{LikePhase, LikeService, LikeToggle, ToggleOutcome};
pub use models::{
    AdminDashboard, AuthResponse, Author, Comment, LikeState, Page, PageCursor, Post, Role,
    SortField, SortOrder, User, UserDashboard,
};
pub use session::{AuthContext, COOKIES_KEY, TOKEN_KEY, USER_KEY};
pub use sources::CommentsSource;
pub use storage::{FileStore, KeyValueStore, MemoryStore};

#[derive(Debug, Clone)]
/// Унифицированный клиент блог-платформы.
///
/// Клонируемый хэндл: клоны разделяют HTTP-клиент, cookie jar и сессию.
pub struct QuillClient {
    http: HttpClient,
    session: AuthContext,
    config: ClientConfig,
}

impl QuillClient {
    /// Создаёт клиент и восстанавливает cookie, сохранённые в хранилище сессии.
    pub fn new(config: ClientConfig, session: AuthContext) -> ClientResult<Self> {
        let http = HttpClient::new(&config)?;
        let client = Self {
            http,
            session,
            config,
        };
        client.restore_cookies();
        Ok(client)
    }

    /// Контекст сессии.
    pub fn session(&self) -> &AuthContext {
        &self.session
    }

    /// Низкоуровневый HTTP-клиент.
    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    /// Настройки клиента.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Схема аутентификации для следующего запроса.
    pub fn scheme(&self) -> AuthScheme {
        self.session.auth_scheme()
    }

    /// Регистрирует пользователя и открывает сессию.
    pub async fn register(&self, registration: &Registration) -> ClientResult<User> {
        let auth = self.http.register(registration).await?;
        self.adopt(auth)
    }

    /// Выполняет вход и открывает сессию. Токен из ответа сохраняется;
    /// его отсутствие стирает прежний токен.
    pub async fn login(&self, credentials: &Credentials) -> ClientResult<User> {
        let auth = self.http.login(credentials).await?;
        self.adopt(auth)
    }

    fn adopt(&self, auth: AuthResponse) -> ClientResult<User> {
        let user = auth.user;
        self.session.login(user.clone())?;
        self.session
            .set_bearer_token(auth.token.unwrap_or_default())?;
        self.persist_cookies()?;
        info!(user_id = user.id, admin = user.is_admin(), "logged in");
        Ok(user)
    }

    /// Завершает сессию. Локальная сессия очищается всегда; 401 от сервера
    /// означает, что сессия уже недействительна, и ошибкой не считается.
    pub async fn logout(&self) -> ClientResult<()> {
        let remote = if self.session.is_authenticated() {
            self.http.logout(&self.scheme()).await
        } else {
            Ok(())
        };

        self.forget_session()?;

        match remote {
            Err(err) if err.is_auth_failure() => {
                debug!("server session already expired");
                Ok(())
            }
            other => other,
        }
    }

    /// Очищает локальную сессию без запроса к серверу: пользователя, токен
    /// и сохранённые cookie. Для случая, когда сервер уже ответил 401.
    pub fn forget_session(&self) -> ClientResult<()> {
        self.session.logout()?;
        self.session.store().remove(COOKIES_KEY)?;
        self.http.reset_csrf();
        Ok(())
    }

    /// Лента постов с фильтром. Ничего не загружает до первого вызова.
    pub fn posts_feed(&self, filter: FeedFilter) -> FeedLoader<Post> {
        let source: Arc<dyn PageSource<Post>> = Arc::new(self.clone());
        FeedLoader::new(source, self.config.default_per_page)
            .with_scroll_threshold(self.config.scroll_threshold_px)
            .with_key(|post| post.id)
            .with_filter(filter)
    }

    /// Получает пост по идентификатору.
    pub async fn get_post(&self, id: i64) -> ClientResult<Post> {
        self.http.get_post(id, &self.scheme()).await
    }

    /// Создаёт пост. Требует сессии.
    pub async fn create_post(&self, draft: &PostDraft) -> ClientResult<Post> {
        self.require_session()?;
        self.http.create_post(draft, &self.scheme()).await
    }

    /// Обновляет пост. Требует сессии.
    pub async fn update_post(&self, id: i64, draft: &PostDraft) -> ClientResult<Post> {
        self.require_session()?;
        self.http.update_post(id, draft, &self.scheme()).await
    }

    /// Удаляет пост. Требует сессии.
    pub async fn delete_post(&self, id: i64) -> ClientResult<()> {
        self.require_session()?;
        self.http.delete_post(id, &self.scheme()).await
    }

    /// Популярные посты.
    pub async fn trending_posts(&self) -> ClientResult<Vec<Post>> {
        self.http.trending_posts(&self.scheme()).await
    }

    /// Избранные посты.
    pub async fn featured_posts(&self) -> ClientResult<Vec<Post>> {
        self.http.featured_posts(&self.scheme()).await
    }

    /// Переключает отметку «избранное». Только для администратора.
    pub async fn toggle_featured(&self, id: i64) -> ClientResult<Post> {
        self.require_admin()?;
        self.http.toggle_featured(id, &self.scheme()).await
    }

    /// Ветка комментариев поста.
    pub fn comment_thread(&self, post_id: i64) -> CommentThread {
        let source: Arc<dyn PageSource<Comment>> =
            Arc::new(CommentsSource::new(self.clone(), post_id));
        let feed = FeedLoader::new(source, self.config.default_per_page)
            .with_scroll_threshold(self.config.scroll_threshold_px);
        let service: Arc<dyn CommentService> = Arc::new(self.clone());
        CommentThread::new(post_id, feed, service)
    }

    /// Кнопка лайка поста с начальным состоянием.
    pub fn like_toggle(&self, post_id: i64, initial: LikeState) -> LikeToggle {
        let service: Arc<dyn LikeService> = Arc::new(self.clone());
        LikeToggle::new(post_id, initial, service, self.session.clone())
    }

    /// Текущее состояние лайка для пользователя.
    pub async fn like_status(&self, post_id: i64) -> ClientResult<LikeState> {
        self.require_session()?;
        self.http.like_status(post_id, &self.scheme()).await
    }

    /// Статистика админской панели с таймаутом из настроек.
    pub async fn admin_dashboard(&self) -> ClientResult<AdminDashboard> {
        self.require_admin()?;
        load_once::<AdminDashboard>(self, self.config.dashboard_timeout).await
    }

    /// Статистика личного кабинета с таймаутом из настроек.
    pub async fn user_dashboard(&self) -> ClientResult<UserDashboard> {
        self.require_session()?;
        load_once::<UserDashboard>(self, self.config.dashboard_timeout).await
    }

    /// Запускает фоновую загрузку панели. Требует рантайма tokio.
    pub fn dashboard_loader<T>(&self) -> DashboardLoader<T>
    where
        T: Clone + Send + 'static,
        Self: DashboardSource<T>,
    {
        let source: Arc<dyn DashboardSource<T>> = Arc::new(self.clone());
        let mut loader = DashboardLoader::new(self.config.dashboard_timeout);
        loader.start(source);
        loader
    }

    /// Сохраняет cookie сервера в хранилище сессии.
    pub fn persist_cookies(&self) -> ClientResult<()> {
        match self.http.export_cookies() {
            Some(raw) => self.session.store().set(COOKIES_KEY, &raw),
            None => Ok(()),
        }
    }

    fn restore_cookies(&self) {
        match self.session.store().get(COOKIES_KEY) {
            Ok(Some(raw)) => {
                debug!("restoring saved cookies");
                self.http.import_cookies(&raw);
            }
            Ok(None) => {}
            Err(err) => warn!(error = %err, "saved cookies are unreadable"),
        }
    }

    fn require_session(&self) -> ClientResult<()> {
        if !self.session.is_authenticated() {
            return Err(ClientError::NotAuthenticated);
        }
        Ok(())
    }

    fn require_admin(&self) -> ClientResult<()> {
        self.require_session()?;
        if !self.session.is_admin() {
            return Err(ClientError::Forbidden);
        }
        Ok(())
    }
}
