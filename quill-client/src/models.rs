use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
/// Роль пользователя на платформе.
pub enum Role {
    /// Администратор: работает через bearer-токен.
    Admin,
    /// Обычный пользователь: работает через cookie-сессию и CSRF.
    #[default]
    User,
}

// Неизвестные роли сервера считаем обычным пользователем.
impl<'de> Deserialize<'de> for Role {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(match raw.as_deref() {
            Some(role) if role.eq_ignore_ascii_case("admin") => Self::Admin,
            _ => Self::User,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Публичная модель пользователя, хранимая в сессии.
pub struct User {
    /// Идентификатор пользователя.
    pub id: i64,
    /// Отображаемое имя.
    pub name: String,
    /// Email.
    pub email: String,
    /// Роль.
    #[serde(default)]
    pub role: Role,
    /// URL аватара, если загружен.
    #[serde(default)]
    pub avatar: Option<String>,
}

impl User {
    /// `true`, если пользователь является администратором.
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Автор поста или комментария в том виде, в котором его встраивает сервер.
pub struct Author {
    /// Идентификатор пользователя.
    pub id: i64,
    /// Отображаемое имя.
    pub name: String,
    /// URL аватара.
    #[serde(default)]
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Публичная модель поста.
pub struct Post {
    /// Идентификатор поста.
    pub id: i64,
    /// Заголовок.
    pub title: String,
    /// Содержимое.
    pub content: String,
    /// Категория.
    #[serde(default)]
    pub category: String,
    /// Путь или URL изображения.
    #[serde(default)]
    pub image: Option<String>,
    /// Отмечен ли пост администратором для главной страницы.
    #[serde(default, deserialize_with = "flag_from_bool_or_int")]
    pub is_featured: bool,
    /// Количество просмотров.
    #[serde(default)]
    pub views: u64,
    /// Количество лайков.
    #[serde(default)]
    pub likes_count: u64,
    /// Количество комментариев.
    #[serde(default)]
    pub comments_count: u64,
    /// Дата и время создания (UTC).
    pub created_at: DateTime<Utc>,
    /// Автор поста.
    #[serde(default)]
    pub user: Option<Author>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Публичная модель комментария.
pub struct Comment {
    /// Идентификатор комментария.
    pub id: i64,
    /// Пост, к которому относится комментарий.
    pub post_id: i64,
    /// Автор комментария.
    pub user_id: i64,
    /// Текст.
    pub content: String,
    /// Дата и время создания (UTC).
    pub created_at: DateTime<Utc>,
    /// Дата и время последнего изменения (UTC).
    pub updated_at: DateTime<Utc>,
    /// Встроенные данные автора.
    #[serde(default)]
    pub user: Option<Author>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
/// Каноническое состояние лайка, которое возвращает сервер.
pub struct LikeState {
    /// Лайкнул ли текущий пользователь пост.
    #[serde(default, alias = "is_liked")]
    pub liked: bool,
    /// Общее число лайков поста.
    #[serde(default, alias = "likes_count")]
    pub like_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
/// Страница списка в формате `{ data, current_page, last_page, total }`.
pub struct Page<T> {
    /// Элементы страницы.
    pub data: Vec<T>,
    /// Номер текущей страницы (с 1).
    pub current_page: u32,
    /// Номер последней страницы.
    pub last_page: u32,
    /// Общее число элементов.
    pub total: u64,
    /// Размер страницы, если сервер его сообщил.
    #[serde(default)]
    pub per_page: Option<u32>,
}

impl<T> Page<T> {
    /// Курсор пагинации этой страницы.
    pub fn cursor(&self) -> PageCursor {
        PageCursor::new(self.current_page, self.last_page, self.total)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Тройка `current_page`/`last_page`/`total` частично загруженного списка.
///
/// Инвариант: `1 <= current_page <= last_page`.
pub struct PageCursor {
    current_page: u32,
    last_page: u32,
    total: u64,
}

impl PageCursor {
    /// Создаёт курсор, приводя значения сервера к инварианту.
    pub fn new(current_page: u32, last_page: u32, total: u64) -> Self {
        let last_page = last_page.max(1);
        let current_page = current_page.clamp(1, last_page);
        Self {
            current_page,
            last_page,
            total,
        }
    }

    /// Номер последней загруженной страницы.
    pub fn current_page(&self) -> u32 {
        self.current_page
    }

    /// Номер последней страницы на сервере.
    pub fn last_page(&self) -> u32 {
        self.last_page
    }

    /// Общее число элементов.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Есть ли ещё страницы для догрузки.
    pub fn has_more(&self) -> bool {
        self.current_page < self.last_page
    }

    /// Номер следующей страницы, если она есть.
    pub fn next_page(&self) -> Option<u32> {
        self.has_more().then(|| self.current_page + 1)
    }

    pub(crate) fn adjust_total(&mut self, delta: i64) {
        self.total = self.total.saturating_add_signed(delta);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
/// Ответ после успешной регистрации или входа.
pub struct AuthResponse {
    /// Данные пользователя.
    pub user: User,
    /// Bearer-токен, если сервер его выдал (администраторский вход).
    #[serde(default, alias = "access_token")]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
/// Статистика админской панели, предрассчитанная сервером.
pub struct AdminDashboard {
    /// Всего пользователей.
    #[serde(default)]
    pub total_users: u64,
    /// Всего постов.
    #[serde(default)]
    pub total_posts: u64,
    /// Всего комментариев.
    #[serde(default)]
    pub total_comments: u64,
    /// Всего лайков.
    #[serde(default)]
    pub total_likes: u64,
    /// Всего просмотров.
    #[serde(default)]
    pub total_views: u64,
    /// Последние посты.
    #[serde(default)]
    pub recent_posts: Vec<Post>,
    /// Прочие поля, которые клиент не типизирует.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
/// Статистика личного кабинета пользователя.
pub struct UserDashboard {
    /// Постов пользователя.
    #[serde(default)]
    pub total_posts: u64,
    /// Комментариев пользователя.
    #[serde(default)]
    pub total_comments: u64,
    /// Лайков, полученных постами пользователя.
    #[serde(default)]
    pub total_likes: u64,
    /// Просмотров постов пользователя.
    #[serde(default)]
    pub total_views: u64,
    /// Последние посты пользователя.
    #[serde(default)]
    pub recent_posts: Vec<Post>,
    /// Прочие поля, которые клиент не типизирует.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Поле сортировки ленты постов.
pub enum SortField {
    /// По дате создания.
    CreatedAt,
    /// По просмотрам.
    Views,
    /// По лайкам.
    LikesCount,
    /// По комментариям.
    CommentsCount,
    /// По заголовку.
    Title,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// Направление сортировки.
pub enum SortOrder {
    /// По возрастанию.
    Asc,
    /// По убыванию.
    #[default]
    Desc,
}

// Сервер на MySQL отдаёт булевы поля как 0/1.
fn flag_from_bool_or_int<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }

    Ok(match Option::<Flag>::deserialize(deserializer)? {
        Some(Flag::Bool(value)) => value,
        Some(Flag::Int(value)) => value != 0,
        None => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_role_decodes_as_user() {
        let raw = r#"{"id":1,"name":"n","email":"e@example.com","role":"editor"}"#;
        let user: User = serde_json::from_str(raw).expect("user should parse");
        assert_eq!(user.role, Role::User);
        assert!(!user.is_admin());
    }

    #[test]
    fn missing_role_and_avatar_default() {
        let raw = r#"{"id":1,"name":"n","email":"e@example.com"}"#;
        let user: User = serde_json::from_str(raw).expect("user should parse");
        assert_eq!(user.role, Role::User);
        assert!(user.avatar.is_none());
    }

    #[test]
    fn post_accepts_integer_featured_flag() {
        let raw = r#"{
            "id": 7, "title": "t", "content": "c", "category": "tech",
            "is_featured": 1, "views": 3, "likes_count": 2, "comments_count": 0,
            "created_at": "2026-01-01T00:00:00.000000Z",
            "user": {"id": 2, "name": "author"}
        }"#;
        let post: Post = serde_json::from_str(raw).expect("post should parse");
        assert!(post.is_featured);
        assert_eq!(post.user.map(|u| u.id), Some(2));
    }

    #[test]
    fn post_accepts_null_featured_flag() {
        let raw = r#"{"id":7,"title":"t","content":"c","is_featured":null,
            "created_at":"2026-01-01T00:00:00Z"}"#;
        let post: Post = serde_json::from_str(raw).expect("post should parse");
        assert!(!post.is_featured);
        assert_eq!(post.category, "");
    }

    #[test]
    fn like_state_accepts_likes_count_alias() {
        let state: LikeState =
            serde_json::from_str(r#"{"liked":true,"likes_count":4}"#).expect("must parse");
        assert_eq!(
            state,
            LikeState {
                liked: true,
                like_count: 4
            }
        );
    }

    #[test]
    fn cursor_clamps_current_page_to_last_page() {
        let cursor = PageCursor::new(9, 3, 25);
        assert_eq!(cursor.current_page(), 3);
        assert!(!cursor.has_more());
        assert_eq!(cursor.next_page(), None);
    }

    #[test]
    fn cursor_treats_empty_listing_as_single_page() {
        let cursor = PageCursor::new(1, 0, 0);
        assert_eq!(cursor.last_page(), 1);
        assert!(!cursor.has_more());
    }

    #[test]
    fn cursor_adjust_total_saturates() {
        let mut cursor = PageCursor::new(1, 1, 0);
        cursor.adjust_total(-1);
        assert_eq!(cursor.total(), 0);
        cursor.adjust_total(2);
        assert_eq!(cursor.total(), 2);
    }

    #[test]
    fn dashboard_keeps_unknown_fields() {
        let raw = r#"{"total_users":3,"total_posts":10,"posts_by_category":{"tech":4}}"#;
        let stats: AdminDashboard = serde_json::from_str(raw).expect("must parse");
        assert_eq!(stats.total_users, 3);
        assert_eq!(stats.total_comments, 0);
        assert!(stats.extra.contains_key("posts_by_category"));
    }
}
