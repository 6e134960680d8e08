use std::time::Duration;

/// Базовый URL сервера по умолчанию.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";

#[derive(Debug, Clone)]
/// Настройки клиента.
pub struct ClientConfig {
    /// Базовый URL сервера, например `http://127.0.0.1:8000`.
    pub base_url: String,
    /// Таймаут установки соединения.
    pub connect_timeout: Duration,
    /// Таймаут одного запроса.
    pub request_timeout: Duration,
    /// Таймаут загрузки статистики панелей.
    pub dashboard_timeout: Duration,
    /// Расстояние до низа документа (в пикселях), при котором лента догружается.
    pub scroll_threshold_px: f64,
    /// Размер страницы лент по умолчанию.
    pub default_per_page: u32,
}

impl ClientConfig {
    /// Настройки по умолчанию с заданным базовым URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(15),
            dashboard_timeout: Duration::from_secs(10),
            scroll_threshold_px: 200.0,
            default_per_page: 10,
        }
    }
}
