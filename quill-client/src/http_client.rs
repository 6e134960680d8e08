use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{ACCEPT, HeaderMap, HeaderName, HeaderValue};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::auth::{AuthScheme, XSRF_COOKIE, XSRF_HEADER, cookie_value};
use crate::config::ClientConfig;
use crate::drafts::{CommentDraft, Credentials, PostDraft, Registration};
use crate::error::{ClientError, ClientResult, ErrorBody};
use crate::feed::PageRequest;
use crate::models::{
    AdminDashboard, AuthResponse, Comment, LikeState, Page, Post, SortField, SortOrder,
    UserDashboard,
};

const CSRF_COOKIE_PATH: &str = "/sanctum/csrf-cookie";

#[derive(Debug, Serialize)]
struct ListPostsQuery<'a> {
    page: u32,
    per_page: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    sort_by: Option<SortField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sort_order: Option<SortOrder>,
    #[serde(skip_serializing_if = "Option::is_none")]
    category: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct PageQuery {
    page: u32,
    per_page: u32,
}

#[derive(Debug, Clone)]
/// HTTP-клиент REST API блога.
///
/// Все запросы идут через общий cookie jar. Изменяющие запросы в
/// cookie-схеме сначала получают CSRF-cookie и отправляют её значение в
/// `X-XSRF-TOKEN`; в bearer-схеме добавляется только `Authorization`.
pub struct HttpClient {
    base_url: Url,
    client: Client,
    jar: Arc<Jar>,
    csrf_ready: Arc<AtomicBool>,
}

impl HttpClient {
    /// Создаёт HTTP-клиент по настройкам.
    pub fn new(config: &ClientConfig) -> ClientResult<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|err| {
            ClientError::InvalidRequest(format!("invalid base url '{}': {err}", config.base_url))
        })?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            HeaderName::from_static("x-requested-with"),
            HeaderValue::from_static("XMLHttpRequest"),
        );

        let jar = Arc::new(Jar::default());
        let client = Client::builder()
            .cookie_provider(jar.clone())
            .default_headers(headers)
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            base_url,
            client,
            jar,
            csrf_ready: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Базовый URL сервера.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Текущее значение CSRF-токена из cookie jar.
    pub fn xsrf_token(&self) -> Option<String> {
        let header = self.jar.cookies(&self.base_url)?;
        cookie_value(header.to_str().ok()?, XSRF_COOKIE)
    }

    /// Выгружает cookie сервера в виде `a=1; b=2` для сохранения между запусками.
    pub fn export_cookies(&self) -> Option<String> {
        let header = self.jar.cookies(&self.base_url)?;
        header.to_str().ok().map(str::to_string)
    }

    /// Загружает ранее выгруженные cookie обратно в jar.
    pub fn import_cookies(&self, raw: &str) {
        for pair in raw.split(';').map(str::trim).filter(|pair| pair.contains('=')) {
            self.jar
                .add_cookie_str(&format!("{pair}; Path=/"), &self.base_url);
        }
    }

    /// Получает CSRF-cookie, если она ещё не получена в этом клиенте.
    pub async fn ensure_csrf(&self) -> ClientResult<()> {
        if self.csrf_ready.load(Ordering::Acquire) && self.xsrf_token().is_some() {
            return Ok(());
        }

        debug!("requesting csrf cookie");
        let response = self
            .client
            .get(self.endpoint(CSRF_COOKIE_PATH))
            .send()
            .await
            .map_err(ClientError::from_reqwest)?;
        if !response.status().is_success() {
            return Err(Self::decode_error(response).await);
        }

        if self.xsrf_token().is_none() {
            warn!("server did not set {XSRF_COOKIE} cookie");
            return Err(ClientError::CsrfMismatch);
        }
        self.csrf_ready.store(true, Ordering::Release);
        Ok(())
    }

    /// Помечает CSRF-cookie устаревшей: следующий изменяющий запрос получит новую.
    pub fn reset_csrf(&self) {
        self.csrf_ready.store(false, Ordering::Release);
    }

    async fn decode_error(response: reqwest::Response) -> ClientError {
        let status = response.status();
        let body = match response.bytes().await {
            Ok(bytes) => serde_json::from_slice::<ErrorBody>(&bytes).ok(),
            Err(_) => None,
        };
        ClientError::from_http_status(status, body)
    }

    async fn authorize(
        &self,
        request: RequestBuilder,
        method: &Method,
        scheme: &AuthScheme,
    ) -> ClientResult<RequestBuilder> {
        match scheme {
            AuthScheme::Bearer(token) => Ok(request.bearer_auth(token)),
            AuthScheme::Cookie if is_mutating(method) => {
                self.ensure_csrf().await?;
                let token = self.xsrf_token().ok_or(ClientError::CsrfMismatch)?;
                Ok(request.header(XSRF_HEADER, token))
            }
            AuthScheme::Cookie => Ok(request),
        }
    }

    /// универсальный helper: авторизует запрос, отправляет и разбирает JSON-ответ
    async fn call<F>(
        &self,
        method: Method,
        path: &str,
        scheme: &AuthScheme,
        build: F,
    ) -> ClientResult<Value>
    where
        F: FnOnce(RequestBuilder) -> RequestBuilder,
    {
        debug!(%method, path, bearer = scheme.is_bearer(), "api request");
        let request = self.client.request(method.clone(), self.endpoint(path));
        let request = build(self.authorize(request, &method, scheme).await?);

        let response = request.send().await.map_err(ClientError::from_reqwest)?;
        let status = response.status();
        if !status.is_success() {
            let err = Self::decode_error(response).await;
            if matches!(err, ClientError::CsrfMismatch) {
                self.reset_csrf();
            }
            debug!(%status, path, error = %err, "api request failed");
            return Err(err);
        }
        if status == StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }

        let bytes = response.bytes().await.map_err(ClientError::from_reqwest)?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        let value: Value = serde_json::from_slice(&bytes)?;
        ensure_success(&value)?;
        Ok(value)
    }

    /// Регистрирует пользователя.
    pub async fn register(&self, registration: &Registration) -> ClientResult<AuthResponse> {
        let value = self
            .call(Method::POST, "/api/register", &AuthScheme::Cookie, |req| {
                req.json(registration)
            })
            .await?;
        take_auth(value)
    }

    /// Выполняет вход пользователя.
    pub async fn login(&self, credentials: &Credentials) -> ClientResult<AuthResponse> {
        let value = self
            .call(Method::POST, "/api/login", &AuthScheme::Cookie, |req| {
                req.json(credentials)
            })
            .await?;
        take_auth(value)
    }

    /// Завершает сессию на сервере.
    pub async fn logout(&self, scheme: &AuthScheme) -> ClientResult<()> {
        let result = self.call(Method::POST, "/api/logout", scheme, |req| req).await;
        // сервер ротирует CSRF-токен при выходе
        self.reset_csrf();
        result.map(|_| ())
    }

    /// Возвращает страницу ленты постов.
    pub async fn list_posts(
        &self,
        request: &PageRequest,
        scheme: &AuthScheme,
    ) -> ClientResult<Page<Post>> {
        let query = ListPostsQuery {
            page: request.page,
            per_page: request.per_page,
            sort_by: request.filter.sort_by,
            sort_order: request.filter.sort_by.map(|_| request.filter.sort_order),
            category: request.filter.category.as_deref(),
        };
        let value = self
            .call(Method::GET, "/api/posts", scheme, |req| req.query(&query))
            .await?;
        take_page(value)
    }

    /// Получает пост по идентификатору.
    pub async fn get_post(&self, id: i64, scheme: &AuthScheme) -> ClientResult<Post> {
        let value = self
            .call(Method::GET, &format!("/api/posts/{id}"), scheme, |req| req)
            .await?;
        take_payload(value, &["data", "post"])
    }

    /// Создаёт пост (multipart, с необязательным изображением).
    pub async fn create_post(&self, draft: &PostDraft, scheme: &AuthScheme) -> ClientResult<Post> {
        let form = post_form(draft, None).await?;
        let value = self
            .call(Method::POST, "/api/posts", scheme, |req| req.multipart(form))
            .await?;
        take_payload(value, &["data", "post"])
    }

    /// Обновляет пост. Отправляется как `POST` с `_method=PUT`, чтобы
    /// сервер принял multipart-тело.
    pub async fn update_post(
        &self,
        id: i64,
        draft: &PostDraft,
        scheme: &AuthScheme,
    ) -> ClientResult<Post> {
        let form = post_form(draft, Some("PUT")).await?;
        let value = self
            .call(Method::POST, &format!("/api/posts/{id}"), scheme, |req| {
                req.multipart(form)
            })
            .await?;
        take_payload(value, &["data", "post"])
    }

    /// Удаляет пост.
    pub async fn delete_post(&self, id: i64, scheme: &AuthScheme) -> ClientResult<()> {
        self.call(Method::DELETE, &format!("/api/posts/{id}"), scheme, |req| req)
            .await
            .map(|_| ())
    }

    /// Популярные посты.
    pub async fn trending_posts(&self, scheme: &AuthScheme) -> ClientResult<Vec<Post>> {
        let value = self
            .call(Method::GET, "/api/posts/trending", scheme, |req| req)
            .await?;
        take_payload(value, &["data", "posts"])
    }

    /// Посты, отмеченные администратором.
    pub async fn featured_posts(&self, scheme: &AuthScheme) -> ClientResult<Vec<Post>> {
        let value = self
            .call(Method::GET, "/api/posts/featured", scheme, |req| req)
            .await?;
        take_payload(value, &["data", "posts"])
    }

    /// Переключает отметку «избранное» у поста (администратор).
    pub async fn toggle_featured(&self, id: i64, scheme: &AuthScheme) -> ClientResult<Post> {
        let value = self
            .call(
                Method::POST,
                &format!("/api/admin/posts/{id}/feature"),
                scheme,
                |req| req,
            )
            .await?;
        take_payload(value, &["data", "post"])
    }

    /// Возвращает страницу комментариев поста.
    pub async fn list_comments(
        &self,
        post_id: i64,
        page: u32,
        per_page: u32,
        scheme: &AuthScheme,
    ) -> ClientResult<Page<Comment>> {
        let query = PageQuery { page, per_page };
        let value = self
            .call(
                Method::GET,
                &format!("/api/posts/{post_id}/comments"),
                scheme,
                |req| req.query(&query),
            )
            .await?;
        take_page(value)
    }

    /// Добавляет комментарий.
    pub async fn create_comment(
        &self,
        post_id: i64,
        draft: &CommentDraft,
        scheme: &AuthScheme,
    ) -> ClientResult<Comment> {
        let value = self
            .call(
                Method::POST,
                &format!("/api/posts/{post_id}/comments"),
                scheme,
                |req| req.json(draft),
            )
            .await?;
        take_payload(value, &["data", "comment"])
    }

    /// Редактирует комментарий.
    pub async fn update_comment(
        &self,
        post_id: i64,
        comment_id: i64,
        draft: &CommentDraft,
        scheme: &AuthScheme,
    ) -> ClientResult<Comment> {
        let value = self
            .call(
                Method::PATCH,
                &format!("/api/posts/{post_id}/comments/{comment_id}"),
                scheme,
                |req| req.json(draft),
            )
            .await?;
        take_payload(value, &["data", "comment"])
    }

    /// Удаляет комментарий.
    pub async fn delete_comment(
        &self,
        post_id: i64,
        comment_id: i64,
        scheme: &AuthScheme,
    ) -> ClientResult<()> {
        self.call(
            Method::DELETE,
            &format!("/api/posts/{post_id}/comments/{comment_id}"),
            scheme,
            |req| req,
        )
        .await
        .map(|_| ())
    }

    /// Ставит лайк и возвращает каноническое состояние.
    pub async fn like(&self, post_id: i64, scheme: &AuthScheme) -> ClientResult<LikeState> {
        let value = self
            .call(
                Method::POST,
                &format!("/api/posts/{post_id}/like"),
                scheme,
                |req| req,
            )
            .await?;
        take_payload(value, &["data"])
    }

    /// Снимает лайк и возвращает каноническое состояние.
    pub async fn unlike(&self, post_id: i64, scheme: &AuthScheme) -> ClientResult<LikeState> {
        let value = self
            .call(
                Method::POST,
                &format!("/api/posts/{post_id}/unlike"),
                scheme,
                |req| req,
            )
            .await?;
        take_payload(value, &["data"])
    }

    /// Текущее состояние лайка для пользователя.
    pub async fn like_status(&self, post_id: i64, scheme: &AuthScheme) -> ClientResult<LikeState> {
        let value = self
            .call(
                Method::GET,
                &format!("/api/posts/{post_id}/like-status"),
                scheme,
                |req| req,
            )
            .await?;
        take_payload(value, &["data"])
    }

    /// Статистика админской панели.
    pub async fn admin_dashboard(&self, scheme: &AuthScheme) -> ClientResult<AdminDashboard> {
        let value = self
            .call(Method::GET, "/api/admin/dashboard", scheme, |req| req)
            .await?;
        take_payload(value, &["data", "stats"])
    }

    /// Статистика личного кабинета.
    pub async fn user_dashboard(&self, scheme: &AuthScheme) -> ClientResult<UserDashboard> {
        let value = self
            .call(Method::GET, "/api/user/dashboard", scheme, |req| req)
            .await?;
        take_payload(value, &["data", "stats"])
    }
}

fn is_mutating(method: &Method) -> bool {
    ![Method::GET, Method::HEAD, Method::OPTIONS].contains(method)
}

fn ensure_success(value: &Value) -> ClientResult<()> {
    if value.get("success").and_then(Value::as_bool) == Some(false) {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("request failed");
        return Err(ClientError::InvalidRequest(message.to_string()));
    }
    Ok(())
}

/// Достаёт полезную нагрузку из конверта `{ success, data|post|... }`;
/// если ни одного ключа нет, ответ считается «голым» объектом.
fn take_payload<T: DeserializeOwned>(value: Value, keys: &[&str]) -> ClientResult<T> {
    let payload = match value {
        Value::Object(mut map) => match keys.iter().find_map(|key| map.remove(*key)) {
            Some(inner) => inner,
            None => Value::Object(map),
        },
        other => other,
    };
    Ok(serde_json::from_value(payload)?)
}

fn take_page<T: DeserializeOwned>(value: Value) -> ClientResult<Page<T>> {
    let page = match value {
        Value::Object(mut map) if !map.contains_key("current_page") => match map.remove("data") {
            Some(inner @ Value::Object(_)) => inner,
            Some(other) => {
                map.insert("data".to_string(), other);
                Value::Object(map)
            }
            None => Value::Object(map),
        },
        other => other,
    };
    Ok(serde_json::from_value(page)?)
}

fn take_auth(value: Value) -> ClientResult<AuthResponse> {
    if value.get("user").is_some() {
        return Ok(serde_json::from_value(value)?);
    }
    take_payload(value, &["data"])
}

async fn post_form(draft: &PostDraft, method_override: Option<&'static str>) -> ClientResult<Form> {
    let mut form = Form::new()
        .text("title", draft.title.clone())
        .text("content", draft.content.clone())
        .text("category", draft.category.clone());
    if let Some(method) = method_override {
        form = form.text("_method", method);
    }
    if let Some(path) = &draft.image {
        form = form.part("image", image_part(path).await?);
    }
    Ok(form)
}

async fn image_part(path: &Path) -> ClientResult<Part> {
    let bytes = tokio::fs::read(path).await.map_err(|err| {
        ClientError::InvalidRequest(format!("failed to read image {}: {err}", path.display()))
    })?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    let mime = mime_guess::from_path(path).first_or_octet_stream();

    Part::bytes(bytes)
        .file_name(file_name)
        .mime_str(mime.essence_str())
        .map_err(ClientError::from_reqwest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client(base_url: &str) -> HttpClient {
        HttpClient::new(&ClientConfig::new(base_url)).expect("client must build")
    }

    #[test]
    fn endpoint_normalizes_slashes() {
        let client = client("http://localhost:8000/");
        let full = client.endpoint("/api/posts");
        assert_eq!(full, "http://localhost:8000/api/posts");
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let result = HttpClient::new(&ClientConfig::new("not a url"));
        assert!(matches!(result, Err(ClientError::InvalidRequest(_))));
    }

    #[test]
    fn only_safe_methods_skip_csrf() {
        assert!(!is_mutating(&Method::GET));
        assert!(!is_mutating(&Method::HEAD));
        assert!(is_mutating(&Method::POST));
        assert!(is_mutating(&Method::PATCH));
        assert!(is_mutating(&Method::DELETE));
    }

    #[test]
    fn imported_cookies_expose_xsrf_token() {
        let client = client("http://localhost:8000");
        assert!(client.xsrf_token().is_none());

        client.import_cookies("laravel_session=abc; XSRF-TOKEN=t%3D1");
        assert_eq!(client.xsrf_token().as_deref(), Some("t=1"));
        let exported = client.export_cookies().expect("cookies must be exported");
        assert!(exported.contains("laravel_session=abc"));
    }

    #[test]
    fn ensure_success_rejects_false_flag() {
        let err = ensure_success(&json!({"success": false, "message": "Post not found"}))
            .expect_err("must fail");
        assert_eq!(err.to_string(), "invalid request: Post not found");
        assert!(ensure_success(&json!({"success": true})).is_ok());
        assert!(ensure_success(&json!([1, 2])).is_ok());
    }

    #[test]
    fn take_payload_unwraps_first_known_key() {
        let value = json!({"success": true, "data": {"liked": true, "like_count": 3}});
        let state: LikeState = take_payload(value, &["data"]).expect("must decode");
        assert_eq!(state.like_count, 3);
    }

    #[test]
    fn take_payload_accepts_bare_object() {
        let value = json!({"liked": false, "like_count": 1});
        let state: LikeState = take_payload(value, &["data"]).expect("must decode");
        assert!(!state.liked);
    }

    #[test]
    fn take_payload_accepts_bare_array() {
        let posts: Vec<Post> = take_payload(json!([]), &["data", "posts"]).expect("must decode");
        assert!(posts.is_empty());
    }

    #[test]
    fn take_page_reads_plain_paginator() {
        let value = json!({"data": [1, 2], "current_page": 1, "last_page": 3, "total": 25});
        let page: Page<u32> = take_page(value).expect("must decode");
        assert_eq!(page.data, vec![1, 2]);
        assert_eq!(page.last_page, 3);
    }

    #[test]
    fn take_page_unwraps_enveloped_paginator() {
        let value = json!({
            "success": true,
            "data": {"data": [5], "current_page": 2, "last_page": 2, "total": 6}
        });
        let page: Page<u32> = take_page(value).expect("must decode");
        assert_eq!(page.data, vec![5]);
        assert_eq!(page.current_page, 2);
    }

    #[test]
    fn take_auth_reads_token_and_user() {
        let value = json!({
            "success": true,
            "user": {"id": 1, "name": "Admin", "email": "a@example.com", "role": "admin"},
            "token": "t-1"
        });
        let auth = take_auth(value).expect("must decode");
        assert!(auth.user.is_admin());
        assert_eq!(auth.token.as_deref(), Some("t-1"));
    }
}
