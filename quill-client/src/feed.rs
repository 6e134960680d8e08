//! Постраничная загрузка лент (посты, комментарии).
//!
//! Два режима:
//! - замена ([`FeedLoader::reload`], [`FeedLoader::set_filter`]): сброс на
//!   первую страницу, прежние элементы отбрасываются;
//! - догрузка ([`FeedLoader::load_more`], [`FeedLoader::on_scroll`]):
//!   запрашивается `current_page + 1`, элементы дописываются в конец.
//!
//! Активным может быть только один запрос на ленту. Догрузка во время
//! другого запроса игнорируется, после `current_page == last_page` запросы
//! не отправляются. Замена, начатая во время догрузки, делает ответ
//! догрузки устаревшим (счётчик поколений).
//!
//! Если задан ключ элемента ([`FeedLoader::with_key`]), догрузка пропускает
//! уже загруженные элементы: локальные вставки и удаления сдвигают страницы
//! сервера.
//!
//! Блокировка состояния никогда не удерживается через `.await`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use crate::error::ClientResult;
use crate::models::{Page, PageCursor, SortField, SortOrder};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Фильтр и сортировка ленты.
pub struct FeedFilter {
    /// Категория постов.
    pub category: Option<String>,
    /// Поле сортировки; `None` означает порядок сервера.
    pub sort_by: Option<SortField>,
    /// Направление сортировки.
    pub sort_order: SortOrder,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Параметры запроса одной страницы.
pub struct PageRequest {
    /// Номер страницы (с 1).
    pub page: u32,
    /// Размер страницы.
    pub per_page: u32,
    /// Фильтр и сортировка.
    pub filter: FeedFilter,
}

/// Источник страниц ленты.
#[async_trait]
pub trait PageSource<T>: Send + Sync {
    /// Загружает одну страницу.
    async fn fetch_page(&self, request: &PageRequest) -> ClientResult<Page<T>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Итог попытки загрузки.
pub enum LoadOutcome {
    /// Страница загружена; `added` элементов добавлено или заменено.
    Loaded {
        /// Сколько элементов пришло в странице.
        added: usize,
    },
    /// Другой запрос этой ленты ещё выполняется.
    Busy,
    /// Все страницы уже загружены.
    Exhausted,
    /// Пока запрос шёл, ленту перезагрузили; ответ отброшен.
    Superseded,
    /// Прокрутка ещё не дошла до порога догрузки.
    NotTriggered,
    /// Фильтр не изменился, лента уже загружена; запрос не отправлялся.
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq)]
/// Геометрия прокрутки документа, в пикселях.
pub struct ScrollMetrics {
    /// Текущая прокрутка от верха документа.
    pub scroll_top: f64,
    /// Высота видимой области.
    pub viewport_height: f64,
    /// Полная высота документа.
    pub document_height: f64,
}

impl ScrollMetrics {
    /// `true`, если нижний край видимой области ближе `threshold` к низу документа.
    pub fn near_bottom(&self, threshold: f64) -> bool {
        self.scroll_top + self.viewport_height >= self.document_height - threshold
    }
}

struct FeedState<T> {
    items: Vec<T>,
    cursor: Option<PageCursor>,
    filter: FeedFilter,
    per_page: u32,
    busy: bool,
    generation: u64,
    error: Option<String>,
    rewind: bool,
}

/// Лента с курсором пагинации поверх [`PageSource`].
///
/// Хэндл клонируемый; клоны разделяют состояние.
pub struct FeedLoader<T> {
    source: Arc<dyn PageSource<T>>,
    state: Arc<Mutex<FeedState<T>>>,
    scroll_threshold: f64,
    key: Option<fn(&T) -> i64>,
}

impl<T> Clone for FeedLoader<T> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            state: Arc::clone(&self.state),
            scroll_threshold: self.scroll_threshold,
            key: self.key,
        }
    }
}

impl<T> std::fmt::Debug for FeedLoader<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("FeedLoader")
            .field("items", &state.items.len())
            .field("cursor", &state.cursor)
            .field("filter", &state.filter)
            .field("busy", &state.busy)
            .finish()
    }
}

/// Снимает флаг занятости, если запрос не дошёл до конца (future сброшен).
struct InFlight<'a, T> {
    state: &'a Mutex<FeedState<T>>,
    generation: u64,
    armed: bool,
}

impl<T> InFlight<'_, T> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl<T> Drop for InFlight<'_, T> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = lock(self.state);
        if state.generation == self.generation {
            state.busy = false;
        }
    }
}

impl<T: Send + 'static> FeedLoader<T> {
    /// Создаёт пустую ленту. Ничего не загружает до первого вызова.
    pub fn new(source: Arc<dyn PageSource<T>>, per_page: u32) -> Self {
        Self {
            source,
            state: Arc::new(Mutex::new(FeedState {
                items: Vec::new(),
                cursor: None,
                filter: FeedFilter::default(),
                per_page: per_page.max(1),
                busy: false,
                generation: 0,
                error: None,
                rewind: false,
            })),
            scroll_threshold: 200.0,
            key: None,
        }
    }

    /// Задаёт ключ элемента; догрузка отбрасывает элементы с уже известным ключом.
    pub fn with_key(mut self, key: fn(&T) -> i64) -> Self {
        self.key = Some(key);
        self
    }

    /// Задаёт порог догрузки по прокрутке, в пикселях.
    pub fn with_scroll_threshold(mut self, threshold: f64) -> Self {
        self.scroll_threshold = threshold.max(0.0);
        self
    }

    /// Задаёт начальный фильтр без загрузки.
    pub fn with_filter(self, filter: FeedFilter) -> Self {
        lock(&self.state).filter = filter;
        self
    }

    /// Перезагружает ленту с текущим фильтром (режим замены).
    pub async fn refresh(&self) -> ClientResult<LoadOutcome> {
        let filter = lock(&self.state).filter.clone();
        self.reload(filter).await
    }

    /// Меняет фильтр и перезагружает ленту, если фильтр действительно изменился
    /// или лента ещё не загружалась.
    pub async fn set_filter(&self, filter: FeedFilter) -> ClientResult<LoadOutcome> {
        {
            let state = lock(&self.state);
            if state.filter == filter && state.cursor.is_some() {
                return Ok(LoadOutcome::Unchanged);
            }
        }
        self.reload(filter).await
    }

    /// Режим замены: первая страница с фильтром `filter` заменяет содержимое.
    ///
    /// При ошибке лента очищается, а сообщение сохраняется в [`FeedLoader::error`].
    pub async fn reload(&self, filter: FeedFilter) -> ClientResult<LoadOutcome> {
        let (request, generation) = {
            let mut state = lock(&self.state);
            state.generation += 1;
            state.busy = true;
            state.filter = filter;
            state.items.clear();
            state.cursor = None;
            state.error = None;
            state.rewind = false;
            let request = PageRequest {
                page: 1,
                per_page: state.per_page,
                filter: state.filter.clone(),
            };
            (request, state.generation)
        };
        let mut in_flight = self.in_flight(generation);

        debug!(filter = ?request.filter, "feed reload");
        let result = self.source.fetch_page(&request).await;

        let mut state = lock(&self.state);
        in_flight.disarm();
        if state.generation != in_flight.generation {
            return Ok(LoadOutcome::Superseded);
        }
        state.busy = false;

        match result {
            Ok(page) => {
                let added = page.data.len();
                state.cursor = Some(page.cursor());
                state.items = page.data;
                Ok(LoadOutcome::Loaded { added })
            }
            Err(err) => {
                state.error = Some(err.to_string());
                Err(err)
            }
        }
    }

    /// Режим догрузки: следующая страница дописывается в конец.
    ///
    /// Если лента ещё не загружалась, выполняется первая загрузка.
    /// При ошибке содержимое не меняется, сообщение сохраняется.
    pub async fn load_more(&self) -> ClientResult<LoadOutcome> {
        let pending = {
            let mut state = lock(&self.state);
            if state.busy {
                return Ok(LoadOutcome::Busy);
            }
            match state.cursor {
                None => None,
                Some(cursor) => {
                    // после локального удаления текущая страница сдвинулась влево
                    let page = if state.rewind {
                        cursor.current_page()
                    } else {
                        match cursor.next_page() {
                            Some(next_page) => next_page,
                            None => return Ok(LoadOutcome::Exhausted),
                        }
                    };
                    state.busy = true;
                    let request = PageRequest {
                        page,
                        per_page: state.per_page,
                        filter: state.filter.clone(),
                    };
                    Some((request, state.generation))
                }
            }
        };
        let Some((request, generation)) = pending else {
            return self.refresh().await;
        };
        let mut in_flight = self.in_flight(generation);

        debug!(page = request.page, "feed load more");
        let result = self.source.fetch_page(&request).await;

        let mut state = lock(&self.state);
        in_flight.disarm();
        if state.generation != in_flight.generation {
            return Ok(LoadOutcome::Superseded);
        }
        state.busy = false;

        match result {
            Ok(page) => {
                // Сервер мог вернуть меньшую страницу; курсор только растёт.
                let previous = state.cursor.map_or(0, |cursor| cursor.current_page());
                let cursor = page.cursor();
                state.cursor = Some(PageCursor::new(
                    cursor.current_page().max(previous),
                    cursor.last_page(),
                    cursor.total(),
                ));
                let fresh: Vec<T> = match self.key {
                    Some(key) => page
                        .data
                        .into_iter()
                        .filter(|item| !state.items.iter().any(|known| key(known) == key(item)))
                        .collect(),
                    None => page.data,
                };
                let added = fresh.len();
                state.items.extend(fresh);
                state.rewind = false;
                state.error = None;
                Ok(LoadOutcome::Loaded { added })
            }
            Err(err) => {
                state.error = Some(err.to_string());
                Err(err)
            }
        }
    }

    /// Догрузка по прокрутке: срабатывает, если до низа документа меньше порога.
    pub async fn on_scroll(&self, metrics: ScrollMetrics) -> ClientResult<LoadOutcome> {
        if !metrics.near_bottom(self.scroll_threshold) {
            return Ok(LoadOutcome::NotTriggered);
        }
        self.load_more().await
    }

    /// Догружает все оставшиеся страницы подряд.
    pub async fn load_all(&self) -> ClientResult<usize> {
        let mut pages = 0;
        loop {
            match self.load_more().await? {
                LoadOutcome::Loaded { .. } => pages += 1,
                _ => return Ok(pages),
            }
        }
    }

    fn in_flight(&self, generation: u64) -> InFlight<'_, T> {
        InFlight {
            state: &self.state,
            generation,
            armed: true,
        }
    }

    /// Текущий курсор пагинации; `None`, если лента не загружена.
    pub fn cursor(&self) -> Option<PageCursor> {
        lock(&self.state).cursor
    }

    /// Есть ли ещё страницы для догрузки.
    pub fn has_more(&self) -> bool {
        lock(&self.state).cursor.is_some_and(|cursor| cursor.has_more())
    }

    /// Выполняется ли сейчас запрос.
    pub fn is_busy(&self) -> bool {
        lock(&self.state).busy
    }

    /// Сообщение о последней ошибке загрузки.
    pub fn error(&self) -> Option<String> {
        lock(&self.state).error.clone()
    }

    /// Текущий фильтр.
    pub fn filter(&self) -> FeedFilter {
        lock(&self.state).filter.clone()
    }

    /// Число загруженных элементов.
    pub fn len(&self) -> usize {
        lock(&self.state).items.len()
    }

    /// `true`, если элементов нет.
    pub fn is_empty(&self) -> bool {
        lock(&self.state).items.is_empty()
    }

    /// Даёт доступ к элементам без копирования.
    pub fn with_items<R>(&self, f: impl FnOnce(&[T]) -> R) -> R {
        f(&lock(&self.state).items)
    }

    pub(crate) fn update_items<R>(&self, f: impl FnOnce(&mut Vec<T>) -> R) -> R {
        f(&mut lock(&self.state).items)
    }

    pub(crate) fn adjust_total(&self, delta: i64) {
        if let Some(cursor) = lock(&self.state).cursor.as_mut() {
            cursor.adjust_total(delta);
        }
    }

    /// Следующая догрузка повторит текущую страницу: после удаления элемента
    /// на неё съехали элементы со следующей. Имеет смысл только вместе с ключом.
    pub(crate) fn rewind_page(&self) {
        let mut state = lock(&self.state);
        if self.key.is_some() && state.cursor.is_some_and(|cursor| cursor.has_more()) {
            state.rewind = true;
        }
    }
}

impl<T: Clone + Send + 'static> FeedLoader<T> {
    /// Копия загруженных элементов.
    pub fn items(&self) -> Vec<T> {
        lock(&self.state).items.clone()
    }
}

fn lock<T>(state: &Mutex<FeedState<T>>) -> MutexGuard<'_, FeedState<T>> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
