use std::time::Duration;

use sea_orm::{sea_query::Condition, DatabaseConnection};
use serde::{Deserialize, Serialize};
use zel_core::prelude::*;

use crate::{
    entity::prelude::*,
    error::{with_deadline, ServiceError},
    ids::{PostId, ProfileId},
    scores,
    service::cascade,
    session::Session,
    timestamp_now,
};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NewPost {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub image_url: Option<String>,
}

/// Fields left as `None` are not touched.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PostUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
    pub is_resolved: Option<bool>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PostFilter {
    /// Substring matched against title and description
    pub query: Option<String>,
    pub tag: Option<String>,
    pub resolved: Option<bool>,
}

#[derive(Clone)]
pub struct PostsService {
    db: DatabaseConnection,
    timeout: Duration,
}

impl PostsService {
    pub fn new(db: DatabaseConnection, timeout: Duration) -> Self {
        Self { db, timeout }
    }

    /// Publish a new question
    pub async fn _create_post(
        &self,
        session: &Session,
        post: NewPost,
    ) -> Result<PostModel, ServiceError> {
        let author_id = session.require()?;

        let title = post.title.trim().to_owned();
        if title.is_empty() {
            return Err(ServiceError::Validation("post title is empty".into()));
        }

        let post = PostActiveModel {
            id: Set(PostId::new()),
            author_id: Set(author_id),
            title: Set(title),
            description: Set(post.description.trim().to_owned()),
            tags: Set(post.tags.into_iter().collect()),
            image_url: Set(post.image_url.filter(|url| !url.trim().is_empty())),
            score: Set(0),
            comments_number: Set(0),
            is_resolved: Set(false),
            posted_at: Set(timestamp_now()),
        };

        let result = Post::insert(post).exec_with_returning(&self.db).await?;

        tracing::info!(post_id = %result.id, %author_id, "post created");
        Ok(result)
    }

    pub async fn _get_post(&self, post_id: PostId) -> Result<PostModel, ServiceError> {
        Post::find_by_id(post_id)
            .one(&self.db)
            .await?
            .ok_or(ServiceError::NotFound("post"))
    }

    /// Newest first
    pub async fn _list_posts(&self, filter: PostFilter) -> Result<Vec<PostModel>, ServiceError> {
        let mut select = Post::find();

        if let Some(query) = filter.query.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
            select = select.filter(
                Condition::any()
                    .add(PostColumn::Title.contains(query))
                    .add(PostColumn::Description.contains(query)),
            );
        }

        if let Some(resolved) = filter.resolved {
            select = select.filter(PostColumn::IsResolved.eq(resolved));
        }

        let posts = select
            .order_by_desc(PostColumn::PostedAt)
            .order_by_desc(PostColumn::Id)
            .all(&self.db)
            .await?;

        // Tags are a JSON set, matched here rather than in SQL
        let posts = match filter.tag.as_deref() {
            Some(tag) => posts.into_iter().filter(|post| post.tags.contains(tag)).collect(),
            None => posts,
        };

        Ok(posts)
    }

    pub async fn _list_posts_by_author(
        &self,
        author_id: ProfileId,
    ) -> Result<Vec<PostModel>, ServiceError> {
        let posts = Post::find()
            .filter(PostColumn::AuthorId.eq(author_id))
            .order_by_desc(PostColumn::PostedAt)
            .all(&self.db)
            .await?;

        Ok(posts)
    }

    /// Edit a post (only by author). Counters are not editable.
    pub async fn _update_post(
        &self,
        session: &Session,
        post_id: PostId,
        update: PostUpdate,
    ) -> Result<PostModel, ServiceError> {
        let user_id = session.require()?;

        let title = update.title.map(|title| title.trim().to_owned());
        if title.as_deref() == Some("") {
            return Err(ServiceError::Validation("post title is empty".into()));
        }

        let txn = self.db.begin().await?;

        let post = Post::find_by_id(post_id)
            .one(&txn)
            .await?
            .ok_or(ServiceError::NotFound("post"))?;
        if post.author_id != user_id {
            return Err(ServiceError::NotAuthorized("not the post author"));
        }

        let mut post_active: PostActiveModel = post.into();

        if let Some(title) = title {
            post_active.title = Set(title);
        }
        if let Some(description) = update.description {
            post_active.description = Set(description.trim().to_owned());
        }
        if let Some(tags) = update.tags {
            post_active.tags = Set(tags.into_iter().collect());
        }
        if let Some(is_resolved) = update.is_resolved {
            post_active.is_resolved = Set(is_resolved);
        }

        let updated = post_active
            .update(&txn)
            .await
            .map_err(ServiceError::on_update("post"))?;

        txn.commit().await?;
        Ok(updated)
    }

    /// Delete a post (only by author) with its comments and every vote on them
    pub async fn _delete_post(&self, session: &Session, post_id: PostId) -> Result<(), ServiceError> {
        let user_id = session.require()?;

        let txn = self.db.begin().await?;

        let post = Post::find_by_id(post_id)
            .one(&txn)
            .await?
            .ok_or(ServiceError::NotFound("post"))?;
        if post.author_id != user_id {
            return Err(ServiceError::NotAuthorized("not the post author"));
        }

        let comment_ids: Vec<_> = Comment::find()
            .filter(CommentColumn::PostId.eq(post_id))
            .all(&txn)
            .await?
            .into_iter()
            .map(|comment| comment.id)
            .collect();

        cascade::delete_comments(&txn, &comment_ids).await?;
        cascade::delete_votes(&txn, TargetKind::Post, &[post_id.into_uuid()]).await?;
        Post::delete_by_id(post_id).exec(&txn).await?;

        txn.commit().await?;

        tracing::info!(%post_id, comments = comment_ids.len(), "post deleted");
        Ok(())
    }

    /// Recompute `comments_number` from the comment rows
    pub async fn _reconcile_comments_number(&self, post_id: PostId) -> Result<i64, ServiceError> {
        let txn = self.db.begin().await?;
        let count = scores::reconcile_comments_number(&txn, post_id).await?;
        txn.commit().await?;
        Ok(count)
    }
}

#[zel_service(name = "posts")]
trait Posts {
    #[doc = "Publish a new post as the given profile"]
    #[method(name = "create_post")]
    async fn create_post(
        &self,
        acting_as: Option<ProfileId>,
        post: NewPost,
    ) -> Result<PostModel, ResourceError>;

    #[doc = "Get a specific post by ID"]
    #[method(name = "get_post")]
    async fn get_post(&self, post_id: PostId) -> Result<PostModel, ResourceError>;

    #[doc = "List posts, newest first"]
    #[method(name = "list_posts")]
    async fn list_posts(&self, filter: PostFilter) -> Result<Vec<PostModel>, ResourceError>;

    #[doc = "List posts written by a profile"]
    #[method(name = "list_posts_by_author")]
    async fn list_posts_by_author(
        &self,
        author_id: ProfileId,
    ) -> Result<Vec<PostModel>, ResourceError>;

    #[doc = "Update a post (only by author)"]
    #[method(name = "update_post")]
    async fn update_post(
        &self,
        acting_as: Option<ProfileId>,
        post_id: PostId,
        update: PostUpdate,
    ) -> Result<PostModel, ResourceError>;

    #[doc = "Delete a post (only by author)"]
    #[method(name = "delete_post")]
    async fn delete_post(
        &self,
        acting_as: Option<ProfileId>,
        post_id: PostId,
    ) -> Result<(), ResourceError>;

    #[doc = "Recompute a post's comment counter from its comments"]
    #[method(name = "reconcile_comments_number")]
    async fn reconcile_comments_number(&self, post_id: PostId) -> Result<i64, ResourceError>;
}

#[async_trait]
impl PostsServer for PostsService {
    async fn create_post(
        &self,
        ctx: RequestContext,
        acting_as: Option<ProfileId>,
        post: NewPost,
    ) -> Result<PostModel, ResourceError> {
        let operation = move |session: Session| async move {
            self._create_post(&session, post).await
        };
        Ok(Session::run_for_request(&self.db, self.timeout, &ctx, acting_as, operation).await?)
    }

    async fn get_post(
        &self,
        _ctx: RequestContext,
        post_id: PostId,
    ) -> Result<PostModel, ResourceError> {
        Ok(with_deadline(self.timeout, self._get_post(post_id)).await?)
    }

    async fn list_posts(
        &self,
        _ctx: RequestContext,
        filter: PostFilter,
    ) -> Result<Vec<PostModel>, ResourceError> {
        Ok(with_deadline(self.timeout, self._list_posts(filter)).await?)
    }

    async fn list_posts_by_author(
        &self,
        _ctx: RequestContext,
        author_id: ProfileId,
    ) -> Result<Vec<PostModel>, ResourceError> {
        Ok(with_deadline(self.timeout, self._list_posts_by_author(author_id)).await?)
    }

    async fn update_post(
        &self,
        ctx: RequestContext,
        acting_as: Option<ProfileId>,
        post_id: PostId,
        update: PostUpdate,
    ) -> Result<PostModel, ResourceError> {
        let operation = move |session: Session| async move {
            self._update_post(&session, post_id, update).await
        };
        Ok(Session::run_for_request(&self.db, self.timeout, &ctx, acting_as, operation).await?)
    }

    async fn delete_post(
        &self,
        ctx: RequestContext,
        acting_as: Option<ProfileId>,
        post_id: PostId,
    ) -> Result<(), ResourceError> {
        let operation = move |session: Session| async move {
            self._delete_post(&session, post_id).await
        };
        Ok(Session::run_for_request(&self.db, self.timeout, &ctx, acting_as, operation).await?)
    }

    async fn reconcile_comments_number(
        &self,
        _ctx: RequestContext,
        post_id: PostId,
    ) -> Result<i64, ResourceError> {
        Ok(with_deadline(self.timeout, self._reconcile_comments_number(post_id)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils;

    async fn setup_test_service() -> PostsService {
        PostsService::new(test_utils::setup_test_db().await, Duration::from_secs(5))
    }

    fn question(title: &str) -> NewPost {
        NewPost {
            title: title.to_string(),
            description: "How do I invert a matrix by hand?".to_string(),
            tags: vec!["maths".to_string(), "L1".to_string()],
            image_url: None,
        }
    }

    #[tokio::test]
    async fn test_create_post() {
        let service = setup_test_service().await;
        let author = test_utils::create_test_profile(&service.db, "author").await;

        let post = service
            ._create_post(&Session::from(author), question("  Inverse  "))
            .await
            .expect("Failed to create post");

        assert_eq!(post.author_id, author);
        assert_eq!(post.title, "Inverse");
        assert_eq!(post.score, 0);
        assert_eq!(post.comments_number, 0);
        assert!(!post.is_resolved);
        assert!(post.tags.contains("maths"));

        let fetched = service._get_post(post.id).await.unwrap();
        assert_eq!(fetched, post);
    }

    #[tokio::test]
    async fn test_create_post_requires_session() {
        let service = setup_test_service().await;

        let result = service._create_post(&Session::Anonymous, question("Q")).await;
        assert!(matches!(result, Err(ServiceError::AuthenticationRequired)));
    }

    #[tokio::test]
    async fn test_create_post_rejects_blank_title() {
        let service = setup_test_service().await;
        let author = test_utils::create_test_profile(&service.db, "author").await;

        let result = service._create_post(&Session::from(author), question("  ")).await;
        assert!(matches!(result, Err(ServiceError::Validation(_))));
    }

    #[tokio::test]
    async fn test_list_posts_filters() {
        let service = setup_test_service().await;
        let author = test_utils::create_test_profile(&service.db, "author").await;
        let session = Session::from(author);

        let matrix = service._create_post(&session, question("Matrix inverse")).await.unwrap();
        let mut physics = question("Projectile motion");
        physics.tags = vec!["physics".to_string()];
        physics.description = "Neglecting drag".to_string();
        service._create_post(&session, physics).await.unwrap();

        service
            ._update_post(
                &session,
                matrix.id,
                PostUpdate {
                    is_resolved: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let all = service._list_posts(PostFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].title, "Projectile motion", "newest first");

        let by_query = service
            ._list_posts(PostFilter {
                query: Some("drag".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_query.len(), 1);

        let by_tag = service
            ._list_posts(PostFilter {
                tag: Some("maths".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_tag.len(), 1);
        assert_eq!(by_tag[0].id, matrix.id);

        let unresolved = service
            ._list_posts(PostFilter {
                resolved: Some(false),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(unresolved.len(), 1);
        assert_eq!(unresolved[0].title, "Projectile motion");

        let mine = service._list_posts_by_author(author).await.unwrap();
        assert_eq!(mine.len(), 2);
    }

    #[tokio::test]
    async fn test_update_post_by_non_author_fails() {
        let service = setup_test_service().await;
        let author = test_utils::create_test_profile(&service.db, "author").await;
        let other = test_utils::create_test_profile(&service.db, "other").await;

        let post = service._create_post(&Session::from(author), question("Q")).await.unwrap();

        let result = service
            ._update_post(
                &Session::from(other),
                post.id,
                PostUpdate {
                    title: Some("Hacked".to_string()),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(ServiceError::NotAuthorized(_))));

        let unchanged = service._get_post(post.id).await.unwrap();
        assert_eq!(unchanged.title, "Q");
    }

    #[tokio::test]
    async fn test_update_deleted_post_is_not_found() {
        let service = setup_test_service().await;
        let author = test_utils::create_test_profile(&service.db, "author").await;
        let session = Session::from(author);

        let post = service._create_post(&session, question("Q")).await.unwrap();
        service._delete_post(&session, post.id).await.unwrap();

        let result = service
            ._update_post(
                &session,
                post.id,
                PostUpdate {
                    is_resolved: Some(true),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(ServiceError::NotFound("post"))));
    }

    #[tokio::test]
    async fn test_delete_post_by_author() {
        let service = setup_test_service().await;
        let author = test_utils::create_test_profile(&service.db, "author").await;
        let other = test_utils::create_test_profile(&service.db, "other").await;

        let post = service._create_post(&Session::from(author), question("Q")).await.unwrap();

        let result = service._delete_post(&Session::from(other), post.id).await;
        assert!(matches!(result, Err(ServiceError::NotAuthorized(_))));

        service
            ._delete_post(&Session::from(author), post.id)
            .await
            .expect("Author should be able to delete");

        let result = service._get_post(post.id).await;
        assert!(matches!(result, Err(ServiceError::NotFound("post"))));
    }

    #[tokio::test]
    async fn test_delete_post_removes_comments_and_votes() {
        let service = setup_test_service().await;
        let author = test_utils::create_test_profile(&service.db, "author").await;
        let voter = test_utils::create_test_profile(&service.db, "voter").await;

        let post = service._create_post(&Session::from(author), question("Q")).await.unwrap();
        let keep = service._create_post(&Session::from(author), question("Keep")).await.unwrap();

        let comment = Comment::insert(CommentActiveModel {
            id: Set(crate::ids::CommentId::new()),
            post_id: Set(post.id),
            parent_comment_id: Set(None),
            author_id: Set(voter),
            content: Set("Gauss-Jordan".to_string()),
            score: Set(0),
            posted_at: Set(timestamp_now()),
            edited_at: Set(None),
        })
        .exec_with_returning(&service.db)
        .await
        .unwrap();

        for target in [
            VoteTarget::Post(post.id),
            VoteTarget::Comment(comment.id),
            VoteTarget::Post(keep.id),
        ] {
            Vote::insert(VoteActiveModel {
                id: Set(crate::ids::VoteId::new()),
                user_id: Set(voter),
                target_kind: Set(target.kind()),
                target_id: Set(target.id()),
                value: Set(VoteValue::Up),
                created_at: Set(timestamp_now()),
            })
            .exec(&service.db)
            .await
            .unwrap();
        }

        service._delete_post(&Session::from(author), post.id).await.unwrap();

        assert_eq!(Comment::find().count(&service.db).await.unwrap(), 0);
        let votes = Vote::find().all(&service.db).await.unwrap();
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].target_id, keep.id.into_uuid());
    }

    #[tokio::test]
    async fn test_reconcile_comments_number() {
        let service = setup_test_service().await;
        let author = test_utils::create_test_profile(&service.db, "author").await;
        let post = service._create_post(&Session::from(author), question("Q")).await.unwrap();

        scores::adjust_comments_number(&service.db, post.id, 3).await.unwrap();

        assert_eq!(service._reconcile_comments_number(post.id).await.unwrap(), 0);
        assert_eq!(service._get_post(post.id).await.unwrap().comments_number, 0);
    }
}
