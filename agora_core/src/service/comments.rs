use std::time::Duration;

use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use zel_core::prelude::*;

use crate::{
    config::DEFAULT_COMMENTS_PAGE_SIZE,
    entity::prelude::*,
    error::{with_deadline, ServiceError},
    ids::{CommentId, PostId, ProfileId},
    scores,
    service::cascade,
    session::Session,
    timestamp_now,
};

pub const MAX_COMMENT_CHARS: usize = 10_000;
pub const MAX_PAGE_SIZE: u64 = 100;
const UNKNOWN_AUTHOR: &str = "unknown";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommentSortBy {
    #[default]
    PostedAt,
    Score,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl From<SortOrder> for Order {
    fn from(order: SortOrder) -> Self {
        match order {
            SortOrder::Asc => Order::Asc,
            SortOrder::Desc => Order::Desc,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommentQuery {
    /// 1-based
    pub page: u64,
    /// Falls back to the configured page size
    pub limit: Option<u64>,
    pub sort_by: CommentSortBy,
    pub order: SortOrder,
}

impl Default for CommentQuery {
    fn default() -> Self {
        Self {
            page: 1,
            limit: None,
            sort_by: CommentSortBy::default(),
            order: SortOrder::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u64,
    pub limit: u64,
    pub total_count: u64,
    pub total_pages: u64,
    pub has_next_page: bool,
    pub has_prev_page: bool,
}

impl Pagination {
    pub fn new(page: u64, limit: u64, total_count: u64) -> Self {
        Self {
            page,
            limit,
            total_count,
            total_pages: total_count.div_ceil(limit),
            has_next_page: page.saturating_mul(limit) < total_count,
            has_prev_page: page > 1,
        }
    }
}

/// A comment together with its author's display name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentView {
    pub comment: CommentModel,
    pub author_name: String,
}

impl CommentView {
    fn new(comment: CommentModel, author: Option<ProfileModel>) -> Self {
        Self {
            comment,
            author_name: author
                .map(|profile| profile.name)
                .unwrap_or_else(|| UNKNOWN_AUTHOR.to_owned()),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommentPage {
    pub comments: Vec<CommentView>,
    pub pagination: Pagination,
}

fn validate_content(content: &str) -> Result<String, ServiceError> {
    let content = content.trim();
    if content.is_empty() {
        return Err(ServiceError::Validation("comment is empty".into()));
    }
    if content.chars().count() > MAX_COMMENT_CHARS {
        return Err(ServiceError::Validation(format!(
            "comment is longer than {MAX_COMMENT_CHARS} characters"
        )));
    }
    Ok(content.to_owned())
}

#[derive(Clone)]
pub struct CommentsService {
    db: DatabaseConnection,
    timeout: Duration,
    page_size: u64,
}

impl CommentsService {
    pub fn new(db: DatabaseConnection, timeout: Duration) -> Self {
        Self {
            db,
            timeout,
            page_size: DEFAULT_COMMENTS_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        self
    }

    /// Comment on a post, or reply to a comment of the same post
    pub async fn _create_comment(
        &self,
        session: &Session,
        post_id: PostId,
        content: String,
        parent_comment_id: Option<CommentId>,
    ) -> Result<CommentView, ServiceError> {
        let author_id = session.require()?;
        let content = validate_content(&content)?;

        let txn = self.db.begin().await?;

        let post = Post::find_by_id(post_id)
            .one(&txn)
            .await?
            .ok_or(ServiceError::NotFound("post"))?;

        if let Some(parent_id) = parent_comment_id {
            let parent = Comment::find_by_id(parent_id)
                .one(&txn)
                .await?
                .ok_or(ServiceError::NotFound("comment"))?;

            if parent.post_id != post_id {
                return Err(ServiceError::Validation(
                    "parent comment belongs to another post".into(),
                ));
            }
        }

        let comment = CommentActiveModel {
            id: Set(CommentId::new()),
            post_id: Set(post_id),
            parent_comment_id: Set(parent_comment_id),
            author_id: Set(author_id),
            content: Set(content),
            score: Set(0),
            posted_at: Set(timestamp_now()),
            edited_at: Set(None),
        };
        let comment = Comment::insert(comment).exec_with_returning(&txn).await?;

        if comment.is_top_level() {
            scores::adjust_comments_number(&txn, post_id, 1).await?;
        }

        let author = Profile::find_by_id(author_id).one(&txn).await?;

        txn.commit().await?;

        if post.author_id != author_id {
            scores::award_contribution(&self.db, post.author_id, 1).await;
        }

        tracing::debug!(comment_id = %comment.id, %post_id, reply = !comment.is_top_level(), "comment created");
        Ok(CommentView::new(comment, author))
    }

    pub async fn _get_comment(&self, comment_id: CommentId) -> Result<CommentView, ServiceError> {
        let (comment, author) = Comment::find_by_id(comment_id)
            .find_also_related(Profile)
            .one(&self.db)
            .await?
            .ok_or(ServiceError::NotFound("comment"))?;

        Ok(CommentView::new(comment, author))
    }

    /// One page of top-level comments. Replies are fetched separately.
    pub async fn _fetch_comments(
        &self,
        post_id: PostId,
        query: CommentQuery,
    ) -> Result<CommentPage, ServiceError> {
        let page = query.page.max(1);
        let limit = query.limit.unwrap_or(self.page_size).clamp(1, MAX_PAGE_SIZE);
        // SQLite offsets are signed 64-bit
        let offset = (page - 1)
            .checked_mul(limit)
            .filter(|offset| i64::try_from(*offset).is_ok())
            .ok_or_else(|| ServiceError::Validation(format!("page {page} is out of range")))?;

        let post_exists = Post::find_by_id(post_id).one(&self.db).await?.is_some();
        if !post_exists {
            return Err(ServiceError::NotFound("post"));
        }

        let top_level = Comment::find()
            .filter(CommentColumn::PostId.eq(post_id))
            .filter(CommentColumn::ParentCommentId.is_null());

        let total_count = top_level.clone().count(&self.db).await?;

        let sort_column = match query.sort_by {
            CommentSortBy::PostedAt => CommentColumn::PostedAt,
            CommentSortBy::Score => CommentColumn::Score,
        };
        let order: Order = query.order.into();

        let comments = top_level
            .order_by(sort_column, order.clone())
            .order_by(CommentColumn::PostedAt, order.clone())
            .order_by(CommentColumn::Id, order)
            .find_also_related(Profile)
            .offset(offset)
            .limit(limit)
            .all(&self.db)
            .await?
            .into_iter()
            .map(|(comment, author)| CommentView::new(comment, author))
            .collect();

        Ok(CommentPage {
            comments,
            pagination: Pagination::new(page, limit, total_count),
        })
    }

    /// Number of top-level comments on a post
    pub async fn _fetch_comment_count(&self, post_id: PostId) -> Result<u64, ServiceError> {
        let count = Comment::find()
            .filter(CommentColumn::PostId.eq(post_id))
            .filter(CommentColumn::ParentCommentId.is_null())
            .count(&self.db)
            .await?;

        Ok(count)
    }

    /// Direct replies, oldest first
    pub async fn _fetch_comment_replies(
        &self,
        comment_id: CommentId,
    ) -> Result<Vec<CommentView>, ServiceError> {
        let replies = Comment::find()
            .filter(CommentColumn::ParentCommentId.eq(comment_id))
            .order_by_asc(CommentColumn::PostedAt)
            .order_by_asc(CommentColumn::Id)
            .find_also_related(Profile)
            .all(&self.db)
            .await?;

        Ok(replies
            .into_iter()
            .map(|(reply, author)| CommentView::new(reply, author))
            .collect())
    }

    /// Counted on read, so it can never drift from the reply rows
    pub async fn _fetch_comment_reply_count(&self, comment_id: CommentId) -> Result<u64, ServiceError> {
        let count = Comment::find()
            .filter(CommentColumn::ParentCommentId.eq(comment_id))
            .count(&self.db)
            .await?;

        Ok(count)
    }

    /// Edit a comment (only by author)
    pub async fn _update_comment(
        &self,
        session: &Session,
        comment_id: CommentId,
        content: String,
    ) -> Result<CommentView, ServiceError> {
        let user_id = session.require()?;
        let content = validate_content(&content)?;

        let txn = self.db.begin().await?;

        let comment = Comment::find_by_id(comment_id)
            .one(&txn)
            .await?
            .ok_or(ServiceError::NotFound("comment"))?;

        if comment.author_id != user_id {
            return Err(ServiceError::NotAuthorized("not the comment author"));
        }

        let mut comment_active: CommentActiveModel = comment.into();
        comment_active.content = Set(content);
        comment_active.edited_at = Set(Some(timestamp_now()));
        let updated = comment_active
            .update(&txn)
            .await
            .map_err(ServiceError::on_update("comment"))?;

        let author = Profile::find_by_id(user_id).one(&txn).await?;

        txn.commit().await?;

        Ok(CommentView::new(updated, author))
    }

    /// Delete a comment and all replies below it. Allowed for the comment's
    /// author and for the author of the post it sits under.
    pub async fn _delete_comment(
        &self,
        session: &Session,
        comment_id: CommentId,
    ) -> Result<(), ServiceError> {
        let user_id = session.require()?;

        let txn = self.db.begin().await?;

        let comment = Comment::find_by_id(comment_id)
            .one(&txn)
            .await?
            .ok_or(ServiceError::NotFound("comment"))?;

        let post = Post::find_by_id(comment.post_id)
            .one(&txn)
            .await?
            .ok_or(ServiceError::NotFound("post"))?;

        if comment.author_id != user_id && post.author_id != user_id {
            return Err(ServiceError::NotAuthorized(
                "neither the comment author nor the post author",
            ));
        }

        let subtree = cascade::collect_subtree(&txn, comment.id).await?;
        cascade::delete_comments(&txn, &subtree).await?;

        if comment.is_top_level() {
            scores::adjust_comments_number(&txn, post.id, -1).await?;
        }

        txn.commit().await?;

        tracing::debug!(%comment_id, removed = subtree.len(), "comment deleted");
        Ok(())
    }
}

#[zel_service(name = "comments")]
trait Comments {
    #[doc = "Comment on a post, or reply to one of its comments"]
    #[method(name = "create_comment")]
    async fn create_comment(
        &self,
        acting_as: Option<ProfileId>,
        post_id: PostId,
        content: String,
        parent_comment_id: Option<CommentId>,
    ) -> Result<CommentView, ResourceError>;

    #[doc = "Get a single comment"]
    #[method(name = "get_comment")]
    async fn get_comment(&self, comment_id: CommentId) -> Result<CommentView, ResourceError>;

    #[doc = "Page through the top-level comments of a post"]
    #[method(name = "fetch_comments")]
    async fn fetch_comments(
        &self,
        post_id: PostId,
        query: CommentQuery,
    ) -> Result<CommentPage, ResourceError>;

    #[doc = "Count top-level comments of a post"]
    #[method(name = "fetch_comment_count")]
    async fn fetch_comment_count(&self, post_id: PostId) -> Result<u64, ResourceError>;

    #[doc = "List direct replies to a comment"]
    #[method(name = "fetch_comment_replies")]
    async fn fetch_comment_replies(
        &self,
        comment_id: CommentId,
    ) -> Result<Vec<CommentView>, ResourceError>;

    #[doc = "Count direct replies to a comment"]
    #[method(name = "fetch_comment_reply_count")]
    async fn fetch_comment_reply_count(&self, comment_id: CommentId) -> Result<u64, ResourceError>;

    #[doc = "Edit a comment (only by author)"]
    #[method(name = "update_comment")]
    async fn update_comment(
        &self,
        acting_as: Option<ProfileId>,
        comment_id: CommentId,
        content: String,
    ) -> Result<CommentView, ResourceError>;

    #[doc = "Delete a comment (by its author or the post author)"]
    #[method(name = "delete_comment")]
    async fn delete_comment(
        &self,
        acting_as: Option<ProfileId>,
        comment_id: CommentId,
    ) -> Result<(), ResourceError>;
}

#[async_trait]
impl CommentsServer for CommentsService {
    async fn create_comment(
        &self,
        ctx: RequestContext,
        acting_as: Option<ProfileId>,
        post_id: PostId,
        content: String,
        parent_comment_id: Option<CommentId>,
    ) -> Result<CommentView, ResourceError> {
        let operation = move |session: Session| async move {
            self._create_comment(&session, post_id, content, parent_comment_id).await
        };
        Ok(Session::run_for_request(&self.db, self.timeout, &ctx, acting_as, operation).await?)
    }

    async fn get_comment(
        &self,
        _ctx: RequestContext,
        comment_id: CommentId,
    ) -> Result<CommentView, ResourceError> {
        Ok(with_deadline(self.timeout, self._get_comment(comment_id)).await?)
    }

    async fn fetch_comments(
        &self,
        _ctx: RequestContext,
        post_id: PostId,
        query: CommentQuery,
    ) -> Result<CommentPage, ResourceError> {
        Ok(with_deadline(self.timeout, self._fetch_comments(post_id, query)).await?)
    }

    async fn fetch_comment_count(
        &self,
        _ctx: RequestContext,
        post_id: PostId,
    ) -> Result<u64, ResourceError> {
        Ok(with_deadline(self.timeout, self._fetch_comment_count(post_id)).await?)
    }

    async fn fetch_comment_replies(
        &self,
        _ctx: RequestContext,
        comment_id: CommentId,
    ) -> Result<Vec<CommentView>, ResourceError> {
        Ok(with_deadline(self.timeout, self._fetch_comment_replies(comment_id)).await?)
    }

    async fn fetch_comment_reply_count(
        &self,
        _ctx: RequestContext,
        comment_id: CommentId,
    ) -> Result<u64, ResourceError> {
        Ok(with_deadline(self.timeout, self._fetch_comment_reply_count(comment_id)).await?)
    }

    async fn update_comment(
        &self,
        ctx: RequestContext,
        acting_as: Option<ProfileId>,
        comment_id: CommentId,
        content: String,
    ) -> Result<CommentView, ResourceError> {
        let operation = move |session: Session| async move {
            self._update_comment(&session, comment_id, content).await
        };
        Ok(Session::run_for_request(&self.db, self.timeout, &ctx, acting_as, operation).await?)
    }

    async fn delete_comment(
        &self,
        ctx: RequestContext,
        acting_as: Option<ProfileId>,
        comment_id: CommentId,
    ) -> Result<(), ResourceError> {
        let operation = move |session: Session| async move {
            self._delete_comment(&session, comment_id).await
        };
        Ok(Session::run_for_request(&self.db, self.timeout, &ctx, acting_as, operation).await?)
    }
}
