use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use validator::ValidationErrors;

#[derive(Debug, Error)]
/// Ошибки клиентской библиотеки `quill-client`.
///
/// Все варианты возвращаются вызывающему коду как значения; `Display`
/// даёт короткую строку, пригодную для показа пользователю.
pub enum ClientError {
    /// Ошибка HTTP-транспорта (`reqwest`): сеть недоступна, соединение сброшено.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Сервер ответил статусом 4xx/5xx без более точной классификации.
    #[error("http status {status}: {message}")]
    Status {
        /// HTTP-статус ответа.
        status: u16,
        /// Сообщение сервера или запасной текст.
        message: String,
    },

    /// Требуется авторизация (401): сессия или токен недействительны.
    #[error("unauthorized")]
    Unauthorized,

    /// Недостаточно прав для операции (403).
    #[error("forbidden")]
    Forbidden,

    /// Запрошенный ресурс не найден (404).
    #[error("not found")]
    NotFound,

    /// Ошибка валидации: первое сообщение по полю.
    #[error("{message}")]
    Validation {
        /// Имя поля, к которому относится сообщение.
        field: String,
        /// Текст первого сообщения об ошибке для поля.
        message: String,
    },

    /// CSRF-токен отклонён сервером (419) или не был выдан.
    #[error("csrf token mismatch")]
    CsrfMismatch,

    /// Тело ответа не удалось разобрать как ожидаемый JSON.
    #[error("decode error: {0}")]
    Decode(String),

    /// Запрос не уложился в отведённое время.
    #[error("request timed out")]
    Timeout,

    /// Запрос отменён до завершения.
    #[error("request cancelled")]
    Cancelled,

    /// Операция требует сессии, а пользователь не вошёл.
    #[error("not authenticated")]
    NotAuthenticated,

    /// Ошибка постоянного хранилища сессии.
    #[error("storage error: {0}")]
    Storage(String),

    /// Некорректный запрос или бизнес-ошибка, о которой сообщил сервер.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Результат операций `quill-client`.
pub type ClientResult<T> = Result<T, ClientError>;

/// Тело ошибки в формате `{ message?, error?, errors? }`.
///
/// `errors` хранит поля в порядке сервера (`serde_json/preserve_order`).
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub(crate) message: Option<String>,
    #[serde(default)]
    pub(crate) error: Option<String>,
    #[serde(default)]
    pub(crate) errors: Option<Map<String, Value>>,
}

impl ErrorBody {
    fn text(&self) -> Option<String> {
        self.message.clone().or_else(|| self.error.clone())
    }

    fn first_field_error(&self) -> Option<(String, String)> {
        self.errors.as_ref()?.iter().find_map(|(field, messages)| {
            let message = match messages {
                Value::Array(list) => list.first()?.as_str()?,
                Value::String(message) => message.as_str(),
                _ => return None,
            };
            Some((field.clone(), message.to_string()))
        })
    }
}

impl ClientError {
    /// `true`, если ошибка означает потерю аутентификации и вызывающий код
    /// должен очистить сохранённые учётные данные.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }

    /// Короткое сообщение для показа пользователю: текст сервера без
    /// технических префиксов, если он есть.
    pub fn display_message(&self) -> String {
        match self {
            Self::Status { message, .. } | Self::InvalidRequest(message) => message.clone(),
            Self::Validation { message, .. } => message.clone(),
            Self::Http(_) => "network error".to_string(),
            other => other.to_string(),
        }
    }

    pub(crate) fn from_http_status(status: reqwest::StatusCode, body: Option<ErrorBody>) -> Self {
        let body = body.unwrap_or_default();
        match status.as_u16() {
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            419 => Self::CsrfMismatch,
            422 => match body.first_field_error() {
                Some((field, message)) => Self::Validation { field, message },
                None => Self::InvalidRequest(
                    body.text()
                        .unwrap_or_else(|| "the given data was invalid".to_string()),
                ),
            },
            code => Self::Status {
                status: code,
                message: body.text().unwrap_or_else(|| format!("http status {status}")),
            },
        }
    }

    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout;
        }
        if err.is_decode() {
            return Self::Decode(err.to_string());
        }
        if let Some(status) = err.status() {
            return Self::from_http_status(status, None);
        }
        Self::Http(err)
    }
}

impl From<ValidationErrors> for ClientError {
    fn from(errors: ValidationErrors) -> Self {
        let field_errors = errors.field_errors();
        let first = field_errors
            .iter()
            .min_by(|left, right| left.0.cmp(right.0));

        match first {
            Some((field, list)) => {
                let message = list
                    .first()
                    .map(|err| match &err.message {
                        Some(message) => message.to_string(),
                        None => format!("{field} is invalid ({})", err.code),
                    })
                    .unwrap_or_else(|| format!("{field} is invalid"));
                Self::Validation {
                    field: field.to_string(),
                    message,
                }
            }
            None => Self::InvalidRequest(errors.to_string()),
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}
