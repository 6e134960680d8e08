//! Загрузка предрассчитанной статистики панелей.
//!
//! Запрос ограничен таймаутом, а [`DashboardLoader::teardown`] (и `Drop`)
//! прерывает незавершённую задачу, чтобы после закрытия панели состояние
//! больше не менялось.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{ClientError, ClientResult};

/// Источник статистики панели.
#[async_trait]
pub trait DashboardSource<T>: Send + Sync {
    /// Загружает статистику.
    async fn fetch_dashboard(&self) -> ClientResult<T>;
}

#[derive(Debug, Clone, PartialEq)]
/// Состояние панели.
pub enum DashboardStatus<T> {
    /// Загрузка не начиналась.
    Idle,
    /// Запрос выполняется.
    Loading,
    /// Данные получены.
    Ready(T),
    /// Запрос завершился ошибкой; сообщение для показа.
    Failed(String),
}

/// Выполняет `fetch` с таймаутом; по истечении возвращает [`ClientError::Timeout`].
pub async fn fetch_with_timeout<T, F>(timeout: Duration, fetch: F) -> ClientResult<T>
where
    F: Future<Output = ClientResult<T>>,
{
    tokio::time::timeout(timeout, fetch)
        .await
        .map_err(|_| ClientError::Timeout)?
}

/// Загрузчик одной панели со своей фоновой задачей.
pub struct DashboardLoader<T> {
    status: Arc<Mutex<DashboardStatus<T>>>,
    task: Option<JoinHandle<()>>,
    timeout: Duration,
}

impl<T> std::fmt::Debug for DashboardLoader<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DashboardLoader")
            .field("running", &self.task.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl<T: Clone + Send + 'static> DashboardLoader<T> {
    /// Создаёт загрузчик с таймаутом запроса.
    pub fn new(timeout: Duration) -> Self {
        Self {
            status: Arc::new(Mutex::new(DashboardStatus::Idle)),
            task: None,
            timeout,
        }
    }

    /// Текущее состояние.
    pub fn status(&self) -> DashboardStatus<T> {
        lock(&self.status).clone()
    }

    /// Запускает загрузку в фоне. Предыдущая незавершённая загрузка прерывается.
    ///
    /// Требует запущенного рантайма tokio.
    pub fn start(&mut self, source: Arc<dyn DashboardSource<T>>) {
        self.teardown();
        *lock(&self.status) = DashboardStatus::Loading;

        let status = Arc::clone(&self.status);
        let timeout = self.timeout;
        self.task = Some(tokio::spawn(async move {
            let result = fetch_with_timeout(timeout, source.fetch_dashboard()).await;
            let next = match result {
                Ok(data) => DashboardStatus::Ready(data),
                Err(err) => {
                    warn!(error = %err, "dashboard fetch failed");
                    DashboardStatus::Failed(err.to_string())
                }
            };
            *lock(&status) = next;
        }));
    }

    /// Дожидается завершения текущей загрузки и возвращает состояние.
    pub async fn wait(&mut self) -> DashboardStatus<T> {
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                if err.is_cancelled() {
                    *lock(&self.status) = DashboardStatus::Failed(ClientError::Cancelled.to_string());
                } else {
                    *lock(&self.status) = DashboardStatus::Failed(format!("dashboard task failed: {err}"));
                }
            }
        }
        self.status()
    }

    /// Прерывает незавершённую загрузку.
    pub fn teardown(&mut self) {
        if let Some(task) = self.task.take() {
            if !task.is_finished() {
                debug!("aborting pending dashboard fetch");
            }
            task.abort();
        }
    }
}

impl<T> Drop for DashboardLoader<T> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Загружает статистику один раз, без фоновой задачи.
pub async fn load_once<T>(source: &dyn DashboardSource<T>, timeout: Duration) -> ClientResult<T> {
    fetch_with_timeout(timeout, source.fetch_dashboard()).await
}

fn lock<T>(status: &Mutex<DashboardStatus<T>>) -> MutexGuard<'_, DashboardStatus<T>> {
    status.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowStats {
        delay: Duration,
        value: u64,
    }

    #[async_trait]
    impl DashboardSource<u64> for SlowStats {
        async fn fetch_dashboard(&self) -> ClientResult<u64> {
            tokio::time::sleep(self.delay).await;
            Ok(self.value)
        }
    }

    fn source(delay_ms: u64, value: u64) -> Arc<dyn DashboardSource<u64>> {
        Arc::new(SlowStats {
            delay: Duration::from_millis(delay_ms),
            value,
        })
    }

    #[tokio::test]
    async fn loads_into_ready_state() {
        let mut loader = DashboardLoader::new(Duration::from_secs(1));
        assert_eq!(loader.status(), DashboardStatus::Idle);

        loader.start(source(5, 42));
        assert_eq!(loader.status(), DashboardStatus::Loading);
        assert_eq!(loader.wait().await, DashboardStatus::Ready(42));
    }

    #[tokio::test]
    async fn slow_fetch_times_out() {
        let mut loader = DashboardLoader::new(Duration::from_millis(20));
        loader.start(source(5_000, 1));

        assert_eq!(
            loader.wait().await,
            DashboardStatus::Failed(ClientError::Timeout.to_string())
        );
    }

    #[tokio::test]
    async fn teardown_prevents_late_update() {
        let mut loader = DashboardLoader::new(Duration::from_secs(1));
        loader.start(source(50, 7));

        loader.teardown();
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert_eq!(loader.status(), DashboardStatus::Loading);
    }

    #[tokio::test]
    async fn restart_aborts_previous_fetch() {
        let mut loader = DashboardLoader::new(Duration::from_secs(1));
        loader.start(source(200, 1));
        loader.start(source(5, 2));

        assert_eq!(loader.wait().await, DashboardStatus::Ready(2));
    }

    #[tokio::test]
    async fn load_once_maps_timeout() {
        let stats = SlowStats {
            delay: Duration::from_millis(500),
            value: 1,
        };
        let result = load_once(&stats, Duration::from_millis(10)).await;
        assert!(matches!(result, Err(ClientError::Timeout)));
    }
}
