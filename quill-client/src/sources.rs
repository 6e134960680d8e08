//! Реализации источников данных поверх [`QuillClient`].
//!
//! Каждый запрос берёт схему аутентификации из текущей сессии в момент
//! вызова, так что вход и выход между запросами сразу учитываются.

use async_trait::async_trait;

use crate::QuillClient;
use crate::comments::CommentService;
use crate::dashboard::DashboardSource;
use crate::drafts::CommentDraft;
use crate::error::ClientResult;
use crate::feed::{PageRequest, PageSource};
use crate::like::LikeService;
use crate::models::{AdminDashboard, Comment, LikeState, Page, Post, UserDashboard};

#[async_trait]
impl PageSource<Post> for QuillClient {
    async fn fetch_page(&self, request: &PageRequest) -> ClientResult<Page<Post>> {
        self.http().list_posts(request, &self.scheme()).await
    }
}

#[derive(Debug, Clone)]
/// Источник страниц комментариев одного поста.
pub struct CommentsSource {
    client: QuillClient,
    post_id: i64,
}

impl CommentsSource {
    /// Источник комментариев поста `post_id`.
    pub fn new(client: QuillClient, post_id: i64) -> Self {
        Self { client, post_id }
    }
}

#[async_trait]
impl PageSource<Comment> for CommentsSource {
    async fn fetch_page(&self, request: &PageRequest) -> ClientResult<Page<Comment>> {
        self.client
            .http()
            .list_comments(
                self.post_id,
                request.page,
                request.per_page,
                &self.client.scheme(),
            )
            .await
    }
}

#[async_trait]
impl LikeService for QuillClient {
    async fn like(&self, post_id: i64) -> ClientResult<LikeState> {
        self.http().like(post_id, &self.scheme()).await
    }

    async fn unlike(&self, post_id: i64) -> ClientResult<LikeState> {
        self.http().unlike(post_id, &self.scheme()).await
    }

    async fn like_status(&self, post_id: i64) -> ClientResult<LikeState> {
        self.http().like_status(post_id, &self.scheme()).await
    }
}

#[async_trait]
impl CommentService for QuillClient {
    async fn create_comment(&self, post_id: i64, draft: &CommentDraft) -> ClientResult<Comment> {
        self.http()
            .create_comment(post_id, draft, &self.scheme())
            .await
    }

    async fn update_comment(
        &self,
        post_id: i64,
        comment_id: i64,
        draft: &CommentDraft,
    ) -> ClientResult<Comment> {
        self.http()
            .update_comment(post_id, comment_id, draft, &self.scheme())
            .await
    }

    async fn delete_comment(&self, post_id: i64, comment_id: i64) -> ClientResult<()> {
        self.http()
            .delete_comment(post_id, comment_id, &self.scheme())
            .await
    }
}

#[async_trait]
impl DashboardSource<AdminDashboard> for QuillClient {
    async fn fetch_dashboard(&self) -> ClientResult<AdminDashboard> {
        self.http().admin_dashboard(&self.scheme()).await
    }
}

#[async_trait]
impl DashboardSource<UserDashboard> for QuillClient {
    async fn fetch_dashboard(&self) -> ClientResult<UserDashboard> {
        self.http().user_dashboard(&self.scheme()).await
    }
}
