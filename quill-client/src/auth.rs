use crate::models::User;

/// Cookie, в котором сервер выдаёт CSRF-токен.
pub const XSRF_COOKIE: &str = "XSRF-TOKEN";
/// Заголовок, в котором клиент возвращает CSRF-токен.
pub const XSRF_HEADER: &str = "X-XSRF-TOKEN";

#[derive(Debug, Clone, PartialEq, Eq)]
/// Схема аутентификации одного запроса.
///
/// Схемы не смешиваются: запрос несёт либо CSRF-заголовок, либо bearer-токен.
pub enum AuthScheme {
    /// Cookie-сессия: изменяющие запросы несут `X-XSRF-TOKEN` из cookie.
    Cookie,
    /// Bearer-токен администратора в заголовке `Authorization`.
    Bearer(String),
}

impl AuthScheme {
    /// Выбирает схему по роли пользователя: администратор с сохранённым
    /// токеном работает через bearer, все остальные через cookie.
    pub fn for_session(user: Option<&User>, token: Option<&str>) -> Self {
        match (user, token) {
            (Some(user), Some(token)) if user.is_admin() => Self::Bearer(token.to_string()),
            _ => Self::Cookie,
        }
    }

    /// `true` для bearer-схемы.
    pub fn is_bearer(&self) -> bool {
        matches!(self, Self::Bearer(_))
    }
}

/// Достаёт значение cookie `name` из строки вида `a=1; b=2` и
/// декодирует его из percent-encoding.
pub(crate) fn cookie_value(header: &str, name: &str) -> Option<String> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| decode_cookie_value(value))
        .filter(|value| !value.is_empty())
}

fn decode_cookie_value(raw: &str) -> String {
    // form_urlencoded превращает '+' в пробел, а cookie кодируются без этого правила.
    let escaped = raw.replace('+', "%2B");
    url::form_urlencoded::parse(format!("v={escaped}").as_bytes())
        .next()
        .map(|(_, value)| value.into_owned())
        .unwrap_or_default()
}
