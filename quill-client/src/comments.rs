//! Комментарии поста: лента плюс изменения с каноническими ответами сервера.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use crate::drafts::CommentDraft;
use crate::error::{ClientError, ClientResult};
use crate::feed::{FeedLoader, LoadOutcome};
use crate::models::Comment;

/// Изменяющие операции с комментариями на сервере.
#[async_trait]
pub trait CommentService: Send + Sync {
    /// Создаёт комментарий.
    async fn create_comment(&self, post_id: i64, draft: &CommentDraft) -> ClientResult<Comment>;
    /// Редактирует комментарий.
    async fn update_comment(
        &self,
        post_id: i64,
        comment_id: i64,
        draft: &CommentDraft,
    ) -> ClientResult<Comment>;
    /// Удаляет комментарий.
    async fn delete_comment(&self, post_id: i64, comment_id: i64) -> ClientResult<()>;
}

#[derive(Debug, Clone, PartialEq)]
/// Итог изменения.
pub enum MutationOutcome<T> {
    /// Сервер принял изменение; локальная лента обновлена его ответом.
    Applied(T),
    /// Такое же изменение ещё выполняется; вызов проигнорирован.
    Busy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum CommentOp {
    Submit,
    Edit(i64),
    Delete(i64),
}

struct OpGuard<'a> {
    pending: &'a Mutex<HashSet<CommentOp>>,
    op: CommentOp,
}

impl Drop for OpGuard<'_> {
    fn drop(&mut self) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.op);
    }
}

#[derive(Clone)]
/// Комментарии одного поста.
pub struct CommentThread {
    post_id: i64,
    feed: FeedLoader<Comment>,
    service: Arc<dyn CommentService>,
    pending: Arc<Mutex<HashSet<CommentOp>>>,
    last_error: Arc<Mutex<Option<String>>>,
}

impl std::fmt::Debug for CommentThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommentThread")
            .field("post_id", &self.post_id)
            .field("feed", &self.feed)
            .finish()
    }
}

impl CommentThread {
    /// Создаёт ветку комментариев поверх ленты `feed`.
    ///
    /// Лента получает ключ `id`: после отправки или удаления страницы сервера
    /// сдвигаются, и догрузка не должна дублировать или терять комментарии.
    pub fn new(post_id: i64, feed: FeedLoader<Comment>, service: Arc<dyn CommentService>) -> Self {
        Self {
            post_id,
            feed: feed.with_key(|comment| comment.id),
            service,
            pending: Arc::new(Mutex::new(HashSet::new())),
            last_error: Arc::new(Mutex::new(None)),
        }
    }

    /// Идентификатор поста.
    pub fn post_id(&self) -> i64 {
        self.post_id
    }

    /// Лента комментариев.
    pub fn feed(&self) -> &FeedLoader<Comment> {
        &self.feed
    }

    /// Загружает первую страницу комментариев.
    pub async fn load(&self) -> ClientResult<LoadOutcome> {
        self.feed.refresh().await
    }

    /// Догружает следующую страницу комментариев.
    pub async fn load_more(&self) -> ClientResult<LoadOutcome> {
        self.feed.load_more().await
    }

    /// Загруженные комментарии.
    pub fn comments(&self) -> Vec<Comment> {
        self.feed.items()
    }

    /// Сообщение о последней ошибке изменения.
    pub fn error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Отправляет новый комментарий. Пустой текст отклоняется до сети.
    pub async fn submit(&self, content: &str) -> ClientResult<MutationOutcome<Comment>> {
        let draft = CommentDraft::new(content)?;
        let Some(_guard) = self.begin(CommentOp::Submit) else {
            return Ok(MutationOutcome::Busy);
        };

        debug!(post_id = self.post_id, "submit comment");
        let comment = self
            .track(self.service.create_comment(self.post_id, &draft).await)?;

        self.feed
            .update_items(|items| items.insert(0, comment.clone()));
        self.feed.adjust_total(1);
        Ok(MutationOutcome::Applied(comment))
    }

    /// Редактирует комментарий и заменяет его версией сервера.
    pub async fn edit(
        &self,
        comment_id: i64,
        content: &str,
    ) -> ClientResult<MutationOutcome<Comment>> {
        let draft = CommentDraft::new(content)?;
        let Some(_guard) = self.begin(CommentOp::Edit(comment_id)) else {
            return Ok(MutationOutcome::Busy);
        };

        debug!(post_id = self.post_id, comment_id, "edit comment");
        let updated = self.track(
            self.service
                .update_comment(self.post_id, comment_id, &draft)
                .await,
        )?;

        self.feed.update_items(|items| {
            if let Some(slot) = items.iter_mut().find(|c| c.id == comment_id) {
                *slot = updated.clone();
            }
        });
        Ok(MutationOutcome::Applied(updated))
    }

    /// Удаляет комментарий и убирает его из ленты.
    pub async fn delete(&self, comment_id: i64) -> ClientResult<MutationOutcome<()>> {
        let Some(_guard) = self.begin(CommentOp::Delete(comment_id)) else {
            return Ok(MutationOutcome::Busy);
        };

        debug!(post_id = self.post_id, comment_id, "delete comment");
        self.track(self.service.delete_comment(self.post_id, comment_id).await)?;

        let removed = self.feed.update_items(|items| {
            let before = items.len();
            items.retain(|c| c.id != comment_id);
            before != items.len()
        });
        if removed {
            self.feed.adjust_total(-1);
            self.feed.rewind_page();
        }
        Ok(MutationOutcome::Applied(()))
    }

    fn begin(&self, op: CommentOp) -> Option<OpGuard<'_>> {
        let inserted = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(op);
        inserted.then_some(OpGuard {
            pending: &self.pending,
            op,
        })
    }

    fn track<T>(&self, result: ClientResult<T>) -> ClientResult<T> {
        let mut last_error = self.last_error.lock().unwrap_or_else(PoisonError::into_inner);
        *last_error = result.as_ref().err().map(ClientError::to_string);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{PageRequest, PageSource};
    use crate::models::Page;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

    fn comment(id: i64, content: &str) -> Comment {
        let ts = Utc.timestamp_opt(1_700_000_000 + id, 0).single().expect("valid ts");
        Comment {
            id,
            post_id: 1,
            user_id: 2,
            content: content.to_string(),
            created_at: ts,
            updated_at: ts,
            user: None,
        }
    }

    struct FakeServer {
        comments: Mutex<Vec<Comment>>,
        next_id: AtomicI64,
        calls: AtomicUsize,
        fail: Mutex<bool>,
    }

    impl FakeServer {
        fn with(comments: Vec<Comment>) -> Arc<Self> {
            Arc::new(Self {
                next_id: AtomicI64::new(100),
                comments: Mutex::new(comments),
                calls: AtomicUsize::new(0),
                fail: Mutex::new(false),
            })
        }

        fn check(&self) -> ClientResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if *self.fail.lock().expect("lock") {
                return Err(ClientError::Forbidden);
            }
            Ok(())
        }
    }

    #[async_trait]
    impl PageSource<Comment> for FakeServer {
        async fn fetch_page(&self, request: &PageRequest) -> ClientResult<Page<Comment>> {
            // новые сверху, как на сервере
            let all = self.comments.lock().expect("lock").clone();
            let per_page = request.per_page as usize;
            let start = (request.page as usize - 1) * per_page;
            Ok(Page {
                total: all.len() as u64,
                last_page: all.len().div_ceil(per_page).max(1) as u32,
                data: all.into_iter().skip(start).take(per_page).collect(),
                current_page: request.page,
                per_page: Some(request.per_page),
            })
        }
    }

    #[async_trait]
    impl CommentService for FakeServer {
        async fn create_comment(&self, _post_id: i64, draft: &CommentDraft) -> ClientResult<Comment> {
            self.check()?;
            tokio::task::yield_now().await;
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            // сервер экранирует и сохраняет по-своему
            let saved = comment(id, &format!("{} (saved)", draft.content));
            self.comments.lock().expect("lock").insert(0, saved.clone());
            Ok(saved)
        }

        async fn update_comment(
            &self,
            _post_id: i64,
            comment_id: i64,
            draft: &CommentDraft,
        ) -> ClientResult<Comment> {
            self.check()?;
            Ok(comment(comment_id, &format!("{} (edited)", draft.content)))
        }

        async fn delete_comment(&self, _post_id: i64, comment_id: i64) -> ClientResult<()> {
            self.check()?;
            self.comments.lock().expect("lock").retain(|c| c.id != comment_id);
            Ok(())
        }
    }

    async fn thread(server: &Arc<FakeServer>) -> CommentThread {
        paged_thread(server, 10).await
    }

    async fn paged_thread(server: &Arc<FakeServer>, per_page: u32) -> CommentThread {
        let source: Arc<dyn PageSource<Comment>> = server.clone();
        let service: Arc<dyn CommentService> = server.clone();
        let thread = CommentThread::new(1, FeedLoader::new(source, per_page), service);
        thread.load().await.expect("initial load");
        thread
    }

    fn newest_first(ids: &[i64]) -> Arc<FakeServer> {
        FakeServer::with(ids.iter().map(|&id| comment(id, "text")).collect())
    }

    fn ids(thread: &CommentThread) -> Vec<i64> {
        thread.comments().iter().map(|c| c.id).collect()
    }

    #[tokio::test]
    async fn empty_comment_is_rejected_before_network() {
        let server = FakeServer::with(vec![]);
        let thread = thread(&server).await;

        let result = thread.submit("   ").await;

        assert!(matches!(result, Err(ClientError::Validation { .. })));
        assert_eq!(server.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn submit_prepends_server_comment() {
        let server = FakeServer::with(vec![comment(1, "first")]);
        let thread = thread(&server).await;

        let outcome = thread.submit("hello").await.expect("submit");

        let MutationOutcome::Applied(created) = outcome else {
            panic!("expected applied outcome");
        };
        assert_eq!(created.content, "hello (saved)");
        let comments = thread.comments();
        assert_eq!(comments[0], created);
        assert_eq!(comments.len(), 2);
        assert_eq!(thread.feed().cursor().map(|c| c.total()), Some(2));
    }

    #[tokio::test]
    async fn double_submit_is_ignored_while_pending() {
        let server = FakeServer::with(vec![]);
        let thread = thread(&server).await;

        let (first, second) = tokio::join!(thread.submit("a"), thread.submit("b"));

        assert!(matches!(first, Ok(MutationOutcome::Applied(_))));
        assert!(matches!(second, Ok(MutationOutcome::Busy)));
        assert_eq!(thread.comments().len(), 1);
    }

    #[tokio::test]
    async fn edit_replaces_entry_with_server_version() {
        let server = FakeServer::with(vec![comment(1, "first"), comment(2, "second")]);
        let thread = thread(&server).await;

        thread.edit(2, "changed").await.expect("edit");

        let comments = thread.comments();
        assert_eq!(comments[1].content, "changed (edited)");
        assert_eq!(comments[0].content, "first");
    }

    #[tokio::test]
    async fn delete_removes_entry_and_decrements_total() {
        let server = FakeServer::with(vec![comment(1, "first"), comment(2, "second")]);
        let thread = thread(&server).await;

        thread.delete(1).await.expect("delete");

        assert_eq!(thread.comments().iter().map(|c| c.id).collect::<Vec<_>>(), vec![2]);
        assert_eq!(thread.feed().cursor().map(|c| c.total()), Some(1));
    }

    #[tokio::test]
    async fn failed_mutation_leaves_list_untouched() {
        let server = FakeServer::with(vec![comment(1, "first")]);
        let thread = thread(&server).await;
        *server.fail.lock().expect("lock") = true;

        assert!(thread.edit(1, "changed").await.is_err());
        assert!(thread.delete(1).await.is_err());

        assert_eq!(thread.comments(), vec![comment(1, "first")]);
        assert_eq!(thread.error().as_deref(), Some("forbidden"));
    }

    #[tokio::test]
    async fn load_more_after_submit_skips_shifted_comment() {
        let server = newest_first(&[4, 3, 2, 1]);
        let thread = paged_thread(&server, 2).await;
        assert_eq!(ids(&thread), vec![4, 3]);

        thread.submit("new").await.expect("submit");
        let outcome = thread.load_more().await.expect("page 2");

        assert_eq!(outcome, LoadOutcome::Loaded { added: 1 });
        assert_eq!(ids(&thread), vec![100, 4, 3, 2]);

        thread.load_more().await.expect("page 3");
        assert_eq!(ids(&thread), vec![100, 4, 3, 2, 1]);
        assert_eq!(thread.load_more().await.expect("done"), LoadOutcome::Exhausted);
    }

    #[tokio::test]
    async fn load_more_after_delete_keeps_shifted_comment() {
        let server = newest_first(&[4, 3, 2, 1]);
        let thread = paged_thread(&server, 2).await;

        thread.delete(4).await.expect("delete");
        thread.load_more().await.expect("refetch page 1");
        assert_eq!(ids(&thread), vec![3, 2]);

        thread.load_more().await.expect("page 2");
        assert_eq!(ids(&thread), vec![3, 2, 1]);
        assert_eq!(thread.load_more().await.expect("done"), LoadOutcome::Exhausted);
    }
}
