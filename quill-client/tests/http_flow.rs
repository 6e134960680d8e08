use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{AppendHeaders, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use quill_client::{
    AdminDashboard, AuthContext, AuthScheme, COOKIES_KEY, ClientConfig, ClientError, Credentials,
    DashboardStatus, FeedFilter, FileStore, KeyValueStore, LikeState, LoadOutcome, PostDraft,
    QuillClient, ToggleOutcome,
};
use serde::Deserialize;
use serde_json::{Value, json};

const XSRF_RAW: &str = "abc%2Bdef%3D";
const XSRF_DECODED: &str = "abc+def=";
const ROTATED_RAW: &str = "ghi%2Fjkl";
const ROTATED_DECODED: &str = "ghi/jkl";
const ADMIN_TOKEN: &str = "admin-token";
const TOTAL_POSTS: u32 = 25;

#[derive(Debug, Clone)]
struct Seen {
    route: &'static str,
    xsrf: Option<String>,
    authorization: Option<String>,
}

#[derive(Debug)]
struct Backend {
    seen: Mutex<Vec<Seen>>,
    /// Текущий токен: значение cookie и то, что клиент должен вернуть в заголовке.
    xsrf: Mutex<(&'static str, &'static str)>,
    reject_next: AtomicBool,
}

impl Default for Backend {
    fn default() -> Self {
        Self {
            seen: Mutex::new(Vec::new()),
            xsrf: Mutex::new((XSRF_RAW, XSRF_DECODED)),
            reject_next: AtomicBool::new(false),
        }
    }
}

impl Backend {
    fn rotate_xsrf(&self) {
        *self.xsrf.lock().expect("lock") = (ROTATED_RAW, ROTATED_DECODED);
    }

    /// Следующий изменяющий запрос получит 419, а токен сменится.
    fn expire_xsrf_once(&self) {
        self.reject_next.store(true, Ordering::SeqCst);
    }

    fn record(&self, route: &'static str, headers: &HeaderMap) {
        let text = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };
        self.seen.lock().expect("lock").push(Seen {
            route,
            xsrf: text("x-xsrf-token"),
            authorization: text("authorization"),
        });
    }

    fn requests(&self, route: &str) -> Vec<Seen> {
        self.seen
            .lock()
            .expect("lock")
            .iter()
            .filter(|seen| seen.route == route)
            .cloned()
            .collect()
    }
}

type Shared = State<Arc<Backend>>;

fn user_json(id: i64, role: &str) -> Value {
    json!({"id": id, "name": format!("user {id}"), "email": format!("u{id}@example.com"), "role": role})
}

fn post_json(id: i64, featured: bool) -> Value {
    json!({
        "id": id,
        "title": format!("Post {id}"),
        "content": "body",
        "category": "news",
        "is_featured": if featured { 1 } else { 0 },
        "views": 3,
        "likes_count": 5,
        "comments_count": 0,
        "created_at": "2024-01-01T00:00:00Z",
        "user": {"id": 2, "name": "Ann"}
    })
}

fn csrf_rejected(backend: &Backend, headers: &HeaderMap) -> Option<Response> {
    let token = headers
        .get("x-xsrf-token")
        .and_then(|value| value.to_str().ok());
    let expected = backend.xsrf.lock().expect("lock").1;
    if backend.reject_next.swap(false, Ordering::SeqCst) {
        backend.rotate_xsrf();
    } else if token == Some(expected) {
        return None;
    }
    let status = StatusCode::from_u16(419).expect("valid status");
    Some((status, Json(json!({"message": "CSRF token mismatch."}))).into_response())
}

async fn csrf_cookie(State(backend): Shared, headers: HeaderMap) -> impl IntoResponse {
    backend.record("csrf", &headers);
    let raw = backend.xsrf.lock().expect("lock").0;
    (
        AppendHeaders([
            (header::SET_COOKIE, format!("XSRF-TOKEN={raw}; Path=/")),
            (
                header::SET_COOKIE,
                "laravel_session=s1; Path=/; HttpOnly".to_string(),
            ),
        ]),
        StatusCode::NO_CONTENT,
    )
}

async fn login(State(backend): Shared, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    backend.record("login", &headers);
    if let Some(rejected) = csrf_rejected(&backend, &headers) {
        return rejected;
    }
    let email = body["email"].as_str().unwrap_or_default();
    if email.starts_with("admin") {
        return Json(json!({"success": true, "user": user_json(1, "admin"), "token": ADMIN_TOKEN}))
            .into_response();
    }
    Json(json!({"success": true, "user": user_json(2, "user")})).into_response()
}

async fn logout(State(backend): Shared, headers: HeaderMap) -> Response {
    backend.record("logout", &headers);
    if let Some(rejected) = csrf_rejected(&backend, &headers) {
        return rejected;
    }
    backend.rotate_xsrf();
    StatusCode::NO_CONTENT.into_response()
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    page: u32,
    per_page: u32,
}

async fn list_posts(Query(query): Query<ListQuery>) -> Json<Value> {
    let last_page = TOTAL_POSTS.div_ceil(query.per_page);
    let start = (query.page - 1) * query.per_page;
    let end = (start + query.per_page).min(TOTAL_POSTS);
    let data: Vec<Value> = (start..end)
        .map(|index| post_json(i64::from(index) + 1, false))
        .collect();
    Json(json!({
        "data": data,
        "current_page": query.page,
        "last_page": last_page,
        "total": TOTAL_POSTS,
        "per_page": query.per_page
    }))
}

async fn create_post(State(backend): Shared, headers: HeaderMap) -> Response {
    backend.record("create_post", &headers);
    if let Some(rejected) = csrf_rejected(&backend, &headers) {
        return rejected;
    }
    let body = json!({
        "message": "The given data was invalid.",
        "errors": {
            "title": ["The title has already been taken."],
            "category": ["The selected category is invalid."]
        }
    });
    (StatusCode::UNPROCESSABLE_ENTITY, Json(body)).into_response()
}

async fn like(State(backend): Shared, headers: HeaderMap, Path(_id): Path<i64>) -> Response {
    backend.record("like", &headers);
    if let Some(rejected) = csrf_rejected(&backend, &headers) {
        return rejected;
    }
    Json(json!({"success": true, "data": {"liked": true, "likes_count": 6}})).into_response()
}

fn bearer_only(headers: &HeaderMap) -> Option<Response> {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    if authorization == Some(format!("Bearer {ADMIN_TOKEN}").as_str()) {
        return None;
    }
    Some((StatusCode::UNAUTHORIZED, Json(json!({"message": "Unauthenticated."}))).into_response())
}

async fn toggle_featured(State(backend): Shared, headers: HeaderMap, Path(id): Path<i64>) -> Response {
    backend.record("feature", &headers);
    if let Some(rejected) = bearer_only(&headers) {
        return rejected;
    }
    Json(json!({"success": true, "data": post_json(id, true)})).into_response()
}

async fn admin_dashboard(State(backend): Shared, headers: HeaderMap) -> Response {
    backend.record("admin_dashboard", &headers);
    if let Some(rejected) = bearer_only(&headers) {
        return rejected;
    }
    Json(json!({
        "success": true,
        "data": {
            "total_users": 3,
            "total_posts": TOTAL_POSTS,
            "total_comments": 7,
            "total_likes": 11,
            "total_views": 90,
            "recent_posts": [post_json(25, false)],
            "top_categories": ["news"]
        }
    }))
    .into_response()
}

async fn user_dashboard(State(backend): Shared, headers: HeaderMap) -> Response {
    backend.record("user_dashboard", &headers);
    (StatusCode::UNAUTHORIZED, Json(json!({"message": "Unauthenticated."}))).into_response()
}

async fn spawn_backend() -> (String, Arc<Backend>) {
    let backend = Arc::new(Backend::default());
    let app = Router::new()
        .route("/sanctum/csrf-cookie", get(csrf_cookie))
        .route("/api/login", post(login))
        .route("/api/logout", post(logout))
        .route("/api/posts", get(list_posts).post(create_post))
        .route("/api/posts/{id}/like", post(like))
        .route("/api/admin/posts/{id}/feature", post(toggle_featured))
        .route("/api/admin/dashboard", get(admin_dashboard))
        .route("/api/user/dashboard", get(user_dashboard))
        .with_state(backend.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind fake backend");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("fake backend must serve");
    });
    (format!("http://{addr}"), backend)
}

fn client_with(base_url: &str, session: AuthContext) -> QuillClient {
    QuillClient::new(ClientConfig::new(base_url), session).expect("client must build")
}

async fn logged_in(base_url: &str, email: &str) -> QuillClient {
    let client = client_with(base_url, AuthContext::in_memory());
    let credentials = Credentials::new(email, "secret-password").expect("valid credentials");
    client.login(&credentials).await.expect("login must succeed");
    client
}

#[tokio::test]
async fn csrf_cookie_is_fetched_once_and_echoed_on_mutations() {
    let (base_url, backend) = spawn_backend().await;
    let client = logged_in(&base_url, "ann@example.com").await;
    assert_eq!(client.scheme(), AuthScheme::Cookie);

    let toggle = client.like_toggle(7, LikeState { liked: false, like_count: 5 });
    let outcome = toggle.toggle().await.expect("like must succeed");

    assert_eq!(
        outcome,
        ToggleOutcome::Settled(LikeState {
            liked: true,
            like_count: 6
        })
    );
    assert_eq!(backend.requests("csrf").len(), 1);
    for route in ["login", "like"] {
        let seen = backend.requests(route);
        assert_eq!(seen.len(), 1, "{route} must be called once");
        assert_eq!(seen[0].xsrf.as_deref(), Some(XSRF_DECODED));
        assert!(seen[0].authorization.is_none());
    }
}

#[tokio::test]
async fn admin_requests_use_bearer_without_xsrf() {
    let (base_url, backend) = spawn_backend().await;
    let client = logged_in(&base_url, "admin@example.com").await;
    assert_eq!(client.scheme(), AuthScheme::Bearer(ADMIN_TOKEN.to_string()));

    let post = client.toggle_featured(4).await.expect("feature must succeed");
    assert!(post.is_featured);

    let stats = client.admin_dashboard().await.expect("dashboard must load");
    assert_eq!(stats.total_posts, u64::from(TOTAL_POSTS));
    assert_eq!(stats.recent_posts.len(), 1);
    assert!(stats.extra.contains_key("top_categories"));

    let mut loader = client.dashboard_loader::<AdminDashboard>();
    match loader.wait().await {
        DashboardStatus::Ready(stats) => assert_eq!(stats.total_users, 3),
        other => panic!("expected loaded dashboard, got {other:?}"),
    }

    for route in ["feature", "admin_dashboard"] {
        let seen = backend.requests(route);
        assert_eq!(seen[0].authorization.as_deref(), Some("Bearer admin-token"));
        assert!(seen[0].xsrf.is_none(), "{route} must not carry xsrf header");
    }
}

#[tokio::test]
async fn unauthorized_response_lets_caller_clear_session() {
    let (base_url, _backend) = spawn_backend().await;
    let client = logged_in(&base_url, "ann@example.com").await;

    let err = client
        .user_dashboard()
        .await
        .expect_err("expired session must fail");
    assert!(matches!(err, ClientError::Unauthorized));
    assert!(err.is_auth_failure());

    client.session().logout().expect("logout");
    assert!(client.session().current_user().is_none());
}

#[tokio::test]
async fn unprocessable_response_surfaces_first_field_message() {
    let (base_url, _backend) = spawn_backend().await;
    let client = logged_in(&base_url, "ann@example.com").await;
    let draft = PostDraft::new("Hello", "World", "misc", None).expect("valid draft");

    let err = client
        .create_post(&draft)
        .await
        .expect_err("server rejects the post");

    match err {
        ClientError::Validation { field, message } => {
            assert_eq!(field, "title");
            assert_eq!(message, "The title has already been taken.");
        }
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[tokio::test]
async fn posts_feed_walks_all_pages_then_stops() {
    let (base_url, _backend) = spawn_backend().await;
    let client = client_with(&base_url, AuthContext::in_memory());
    let feed = client.posts_feed(FeedFilter::default());

    feed.refresh().await.expect("first page");
    assert_eq!(feed.len(), 10);
    assert_eq!(feed.cursor().map(|c| c.last_page()), Some(3));

    feed.load_more().await.expect("second page");
    assert_eq!(feed.len(), 20);
    assert_eq!(feed.cursor().map(|c| c.current_page()), Some(2));

    feed.load_more().await.expect("third page");
    assert_eq!(feed.len(), 25);
    assert_eq!(
        feed.load_more().await.expect("no more pages"),
        LoadOutcome::Exhausted
    );

    let ids: Vec<i64> = feed.items().iter().map(|post| post.id).collect();
    assert_eq!(ids, (1..=25).collect::<Vec<_>>());
}

#[tokio::test]
async fn session_and_cookies_survive_restart() {
    let (base_url, _backend) = spawn_backend().await;
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("session.json");

    let first = client_with(&base_url, AuthContext::new(Arc::new(FileStore::new(&path))));
    let credentials = Credentials::new("ann@example.com", "secret-password").expect("valid");
    let user = first.login(&credentials).await.expect("login");

    let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(&path));
    let second = client_with(&base_url, AuthContext::new(store));

    assert_eq!(second.session().current_user(), Some(user));
    assert_eq!(second.http().xsrf_token().as_deref(), Some(XSRF_DECODED));
}

#[tokio::test]
async fn logout_clears_local_session_and_saved_cookies() {
    let (base_url, backend) = spawn_backend().await;
    let client = logged_in(&base_url, "ann@example.com").await;
    assert!(client.session().store().get(COOKIES_KEY).expect("get").is_some());

    client.logout().await.expect("logout must succeed");

    assert!(!client.session().is_authenticated());
    assert!(client.session().store().get(COOKIES_KEY).expect("get").is_none());
    let seen = backend.requests("logout");
    assert_eq!(seen[0].xsrf.as_deref(), Some(XSRF_DECODED));
}

#[tokio::test]
async fn page_expired_refetches_csrf_cookie_before_next_mutation() {
    let (base_url, backend) = spawn_backend().await;
    let client = logged_in(&base_url, "ann@example.com").await;
    let toggle = client.like_toggle(7, LikeState { liked: false, like_count: 5 });
    backend.expire_xsrf_once();

    let err = toggle.toggle().await.expect_err("expired token must be rejected");
    assert!(matches!(err, ClientError::CsrfMismatch));
    assert_eq!(backend.requests("csrf").len(), 1);

    toggle.toggle().await.expect("retry with fresh token");

    assert_eq!(backend.requests("csrf").len(), 2);
    assert_eq!(client.http().xsrf_token().as_deref(), Some(ROTATED_DECODED));
    let likes = backend.requests("like");
    assert_eq!(likes.len(), 2);
    assert_eq!(likes[1].xsrf.as_deref(), Some(ROTATED_DECODED));
}

#[tokio::test]
async fn login_after_logout_uses_fresh_csrf_cookie() {
    let (base_url, backend) = spawn_backend().await;
    let client = logged_in(&base_url, "ann@example.com").await;

    client.logout().await.expect("logout must succeed");
    let credentials = Credentials::new("ann@example.com", "secret-password").expect("valid");
    client.login(&credentials).await.expect("second login");

    assert_eq!(backend.requests("csrf").len(), 2);
    let logins = backend.requests("login");
    assert_eq!(logins.len(), 2);
    assert_eq!(logins[0].xsrf.as_deref(), Some(XSRF_DECODED));
    assert_eq!(logins[1].xsrf.as_deref(), Some(ROTATED_DECODED));
}
