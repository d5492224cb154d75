use std::{collections::HashMap, time::Duration};

use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zel_core::prelude::*;

use crate::{
    entity::prelude::*,
    error::{with_deadline, ServiceError},
    ids::{ProfileId, VoteId},
    scores,
    session::Session,
    timestamp_now,
};

/// What happens to the vote row when a user casts `requested`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoteAction {
    Insert,
    /// Same value again: the vote is withdrawn
    Delete,
    /// Opposite value: the vote flips
    Update,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VoteTransition {
    pub action: VoteAction,
    /// Change to the target's score
    pub delta: i64,
    /// The user's vote after the transition
    pub resulting: Option<VoteValue>,
}

impl VoteTransition {
    pub fn resolve(existing: Option<VoteValue>, requested: VoteValue) -> Self {
        match existing {
            None => Self {
                action: VoteAction::Insert,
                delta: requested.delta(),
                resulting: Some(requested),
            },
            Some(current) if current == requested => Self {
                action: VoteAction::Delete,
                delta: -current.delta(),
                resulting: None,
            },
            Some(current) => Self {
                action: VoteAction::Update,
                delta: requested.delta() - current.delta(),
                resulting: Some(requested),
            },
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteOutcome {
    pub score: i64,
    pub user_vote: Option<VoteValue>,
}

#[derive(Clone)]
pub struct VotesService {
    db: DatabaseConnection,
    timeout: Duration,
}

impl VotesService {
    pub fn new(db: DatabaseConnection, timeout: Duration) -> Self {
        Self { db, timeout }
    }

    /// Up or down vote a post or comment. Repeating a vote withdraws it,
    /// the opposite value flips it.
    pub async fn _cast_vote(
        &self,
        session: &Session,
        target: VoteTarget,
        value: i16,
    ) -> Result<VoteOutcome, ServiceError> {
        let requested = VoteValue::try_from(value)
            .map_err(|raw| ServiceError::Validation(format!("vote must be 1 or -1, got {raw}")))?;
        let user_id = session.require()?;

        let txn = self.db.begin().await?;

        let author_id = scores::target_author(&txn, target).await?;

        let existing = Vote::find()
            .filter(VoteColumn::UserId.eq(user_id))
            .filter(VoteColumn::TargetKind.eq(target.kind()))
            .filter(VoteColumn::TargetId.eq(target.id()))
            .one(&txn)
            .await?;

        let transition = VoteTransition::resolve(existing.as_ref().map(|vote| vote.value), requested);

        match existing {
            None => {
                let vote = VoteActiveModel {
                    id: Set(VoteId::new()),
                    user_id: Set(user_id),
                    target_kind: Set(target.kind()),
                    target_id: Set(target.id()),
                    value: Set(requested),
                    created_at: Set(timestamp_now()),
                };
                Vote::insert(vote).exec(&txn).await?;
            }
            Some(vote) if transition.action == VoteAction::Delete => {
                vote.delete(&txn).await?;
            }
            Some(vote) => {
                let mut vote: VoteActiveModel = vote.into();
                vote.value = Set(requested);
                vote.update(&txn).await?;
            }
        }

        scores::apply_delta(&txn, target, transition.delta).await?;
        let score = scores::current_score(&txn, target).await?;

        txn.commit().await?;

        if transition.delta > 0 && author_id != user_id {
            scores::award_contribution(&self.db, author_id, 1).await;
        }

        tracing::debug!(?target, %user_id, action = ?transition.action, score, "vote cast");
        Ok(VoteOutcome {
            score,
            user_vote: transition.resulting,
        })
    }

    /// The caller's current vote on `target`. Anonymous callers have none.
    pub async fn _get_user_vote(
        &self,
        session: &Session,
        target: VoteTarget,
    ) -> Result<Option<VoteValue>, ServiceError> {
        let Some(user_id) = session.user() else {
            return Ok(None);
        };

        let vote = Vote::find()
            .filter(VoteColumn::UserId.eq(user_id))
            .filter(VoteColumn::TargetKind.eq(target.kind()))
            .filter(VoteColumn::TargetId.eq(target.id()))
            .one(&self.db)
            .await?;

        Ok(vote.map(|vote| vote.value))
    }

    /// Every vote the caller holds on targets of `kind`, keyed by target id
    pub async fn _fetch_all_user_votes(
        &self,
        session: &Session,
        kind: TargetKind,
    ) -> Result<HashMap<Uuid, VoteValue>, ServiceError> {
        let Some(user_id) = session.user() else {
            return Ok(HashMap::new());
        };

        let votes = Vote::find()
            .filter(VoteColumn::UserId.eq(user_id))
            .filter(VoteColumn::TargetKind.eq(kind))
            .all(&self.db)
            .await?;

        Ok(votes
            .into_iter()
            .map(|vote| (vote.target_id, vote.value))
            .collect())
    }

    /// Recomputes the cached score from the vote rows
    pub async fn _reconcile_score(&self, target: VoteTarget) -> Result<i64, ServiceError> {
        let txn = self.db.begin().await?;
        let score = scores::reconcile_score(&txn, target).await?;
        txn.commit().await?;
        Ok(score)
    }
}

#[zel_service(name = "votes")]
trait Votes {
    #[doc = "Cast, flip or withdraw a vote (1 or -1)"]
    #[method(name = "cast_vote")]
    async fn cast_vote(
        &self,
        acting_as: Option<ProfileId>,
        target: VoteTarget,
        value: i16,
    ) -> Result<VoteOutcome, ResourceError>;

    #[doc = "The caller's vote on a post or comment"]
    #[method(name = "get_user_vote")]
    async fn get_user_vote(
        &self,
        acting_as: Option<ProfileId>,
        target: VoteTarget,
    ) -> Result<Option<VoteValue>, ResourceError>;

    #[doc = "All of the caller's votes on posts or on comments"]
    #[method(name = "fetch_all_user_votes")]
    async fn fetch_all_user_votes(
        &self,
        acting_as: Option<ProfileId>,
        kind: TargetKind,
    ) -> Result<HashMap<Uuid, VoteValue>, ResourceError>;

    #[doc = "Recompute a cached score from its votes"]
    #[method(name = "reconcile_score")]
    async fn reconcile_score(&self, target: VoteTarget) -> Result<i64, ResourceError>;
}

#[async_trait]
impl VotesServer for VotesService {
    async fn cast_vote(
        &self,
        ctx: RequestContext,
        acting_as: Option<ProfileId>,
        target: VoteTarget,
        value: i16,
    ) -> Result<VoteOutcome, ResourceError> {
        let operation = move |session: Session| async move {
            self._cast_vote(&session, target, value).await
        };
        Ok(Session::run_for_request(&self.db, self.timeout, &ctx, acting_as, operation).await?)
    }

    async fn get_user_vote(
        &self,
        ctx: RequestContext,
        acting_as: Option<ProfileId>,
        target: VoteTarget,
    ) -> Result<Option<VoteValue>, ResourceError> {
        let operation = move |session: Session| async move {
            self._get_user_vote(&session, target).await
        };
        Ok(Session::run_for_request(&self.db, self.timeout, &ctx, acting_as, operation).await?)
    }

    async fn fetch_all_user_votes(
        &self,
        ctx: RequestContext,
        acting_as: Option<ProfileId>,
        kind: TargetKind,
    ) -> Result<HashMap<Uuid, VoteValue>, ResourceError> {
        let operation = move |session: Session| async move {
            self._fetch_all_user_votes(&session, kind).await
        };
        Ok(Session::run_for_request(&self.db, self.timeout, &ctx, acting_as, operation).await?)
    }

    async fn reconcile_score(
        &self,
        _ctx: RequestContext,
        target: VoteTarget,
    ) -> Result<i64, ResourceError> {
        Ok(with_deadline(self.timeout, self._reconcile_score(target)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ids::{CommentId, PostId},
        test_utils,
    };

    struct Fixture {
        service: VotesService,
        author: ProfileId,
        alice: ProfileId,
        bob: ProfileId,
        post: VoteTarget,
    }

    async fn setup() -> Fixture {
        let db = test_utils::setup_test_db().await;
        let author = test_utils::create_test_profile(&db, "author").await;
        let alice = test_utils::create_test_profile(&db, "alice").await;
        let bob = test_utils::create_test_profile(&db, "bob").await;

        let post_id = PostId::new();
        Post::insert(PostActiveModel {
            id: Set(post_id),
            author_id: Set(author),
            title: Set("Vectors".to_string()),
            description: Set("Dot product?".to_string()),
            tags: Set(Tags::default()),
            image_url: Set(None),
            score: Set(0),
            comments_number: Set(0),
            is_resolved: Set(false),
            posted_at: Set(timestamp_now()),
        })
        .exec(&db)
        .await
        .unwrap();

        Fixture {
            service: VotesService::new(db, Duration::from_secs(5)),
            author,
            alice,
            bob,
            post: VoteTarget::Post(post_id),
        }
    }

    async fn add_comment(f: &Fixture) -> VoteTarget {
        let VoteTarget::Post(post_id) = f.post else {
            unreachable!()
        };
        let comment_id = CommentId::new();
        Comment::insert(CommentActiveModel {
            id: Set(comment_id),
            post_id: Set(post_id),
            parent_comment_id: Set(None),
            author_id: Set(f.author),
            content: Set("Projection".to_string()),
            score: Set(0),
            posted_at: Set(timestamp_now()),
            edited_at: Set(None),
        })
        .exec(&f.service.db)
        .await
        .unwrap();
        VoteTarget::Comment(comment_id)
    }

    async fn vote(f: &Fixture, user: ProfileId, target: VoteTarget, value: i16) -> VoteOutcome {
        f.service
            ._cast_vote(&Session::from(user), target, value)
            .await
            .expect("Failed to cast vote")
    }

    #[test]
    fn transition_table() {
        use VoteValue::{Down, Up};

        let cases = [
            (None, Up, VoteAction::Insert, 1, Some(Up)),
            (None, Down, VoteAction::Insert, -1, Some(Down)),
            (Some(Up), Up, VoteAction::Delete, -1, None),
            (Some(Down), Down, VoteAction::Delete, 1, None),
            (Some(Down), Up, VoteAction::Update, 2, Some(Up)),
            (Some(Up), Down, VoteAction::Update, -2, Some(Down)),
        ];

        for (existing, requested, action, delta, resulting) in cases {
            let transition = VoteTransition::resolve(existing, requested);
            assert_eq!(transition.action, action, "{existing:?} -> {requested:?}");
            assert_eq!(transition.delta, delta, "{existing:?} -> {requested:?}");
            assert_eq!(transition.resulting, resulting, "{existing:?} -> {requested:?}");
        }
    }

    #[tokio::test]
    async fn test_vote_toggle_and_flip_scenario() {
        let f = setup().await;

        let outcome = vote(&f, f.alice, f.post, 1).await;
        assert_eq!(outcome, VoteOutcome { score: 1, user_vote: Some(VoteValue::Up) });

        let outcome = vote(&f, f.bob, f.post, -1).await;
        assert_eq!(outcome, VoteOutcome { score: 0, user_vote: Some(VoteValue::Down) });

        // Alice flips: -2
        let outcome = vote(&f, f.alice, f.post, -1).await;
        assert_eq!(outcome, VoteOutcome { score: -2, user_vote: Some(VoteValue::Down) });

        // Bob repeats: withdrawn
        let outcome = vote(&f, f.bob, f.post, -1).await;
        assert_eq!(outcome, VoteOutcome { score: -1, user_vote: None });

        let bob_vote = f.service._get_user_vote(&Session::from(f.bob), f.post).await.unwrap();
        assert_eq!(bob_vote, None);

        let rows = Vote::find().count(&f.service.db).await.unwrap();
        assert_eq!(rows, 1);
    }

    #[tokio::test]
    async fn test_question_scenario() {
        let f = setup().await;
        let (b, c) = (f.alice, f.bob);

        assert_eq!(scores::current_score(&f.service.db, f.post).await.unwrap(), 0);

        let outcome = vote(&f, b, f.post, 1).await;
        assert_eq!(outcome, VoteOutcome { score: 1, user_vote: Some(VoteValue::Up) });

        let outcome = vote(&f, b, f.post, 1).await;
        assert_eq!(outcome, VoteOutcome { score: 0, user_vote: None });

        let outcome = vote(&f, c, f.post, -1).await;
        assert_eq!(outcome.score, -1);

        let outcome = vote(&f, b, f.post, 1).await;
        assert_eq!(outcome, VoteOutcome { score: 0, user_vote: Some(VoteValue::Up) });
    }

    #[tokio::test]
    async fn test_score_matches_vote_rows() {
        let f = setup().await;
        let comment = add_comment(&f).await;

        let sequence = [
            (f.alice, f.post, 1),
            (f.bob, f.post, 1),
            (f.alice, comment, -1),
            (f.alice, f.post, -1),
            (f.bob, comment, -1),
            (f.bob, f.post, 1),
            (f.alice, comment, 1),
        ];
        for (user, target, value) in sequence {
            vote(&f, user, target, value).await;
        }

        for target in [f.post, comment] {
            let cached = scores::current_score(&f.service.db, target).await.unwrap();
            let live = scores::live_vote_sum(&f.service.db, target).await.unwrap();
            assert_eq!(cached, live, "{target:?}");
        }
        assert_eq!(scores::current_score(&f.service.db, f.post).await.unwrap(), -1);
        assert_eq!(scores::current_score(&f.service.db, comment).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_votes_compose() {
        let f = setup().await;
        let carol = test_utils::create_test_profile(&f.service.db, "carol").await;

        let (alice, bob, carol) = (
            Session::from(f.alice),
            Session::from(f.bob),
            Session::from(carol),
        );
        let (a, b, c) = tokio::join!(
            f.service._cast_vote(&alice, f.post, 1),
            f.service._cast_vote(&bob, f.post, 1),
            f.service._cast_vote(&carol, f.post, -1),
        );
        a.unwrap();
        b.unwrap();
        c.unwrap();

        assert_eq!(scores::current_score(&f.service.db, f.post).await.unwrap(), 1);
        assert_eq!(scores::live_vote_sum(&f.service.db, f.post).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_invalid_values_rejected() {
        let f = setup().await;

        for value in [0, 2, -2] {
            let result = f.service._cast_vote(&Session::from(f.alice), f.post, value).await;
            assert!(matches!(result, Err(ServiceError::Validation(_))), "{value}");
        }
        assert_eq!(scores::current_score(&f.service.db, f.post).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_anonymous_cannot_vote() {
        let f = setup().await;

        let result = f.service._cast_vote(&Session::Anonymous, f.post, 1).await;
        assert!(matches!(result, Err(ServiceError::AuthenticationRequired)));
        assert_eq!(Vote::find().count(&f.service.db).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_vote_on_missing_target() {
        let f = setup().await;

        let result = f
            .service
            ._cast_vote(&Session::from(f.alice), VoteTarget::Comment(CommentId::new()), 1)
            .await;
        assert!(matches!(result, Err(ServiceError::NotFound("comment"))));
        assert_eq!(Vote::find().count(&f.service.db).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_anonymous_reads_are_empty() {
        let f = setup().await;
        vote(&f, f.alice, f.post, 1).await;

        let single = f.service._get_user_vote(&Session::Anonymous, f.post).await.unwrap();
        assert_eq!(single, None);

        let all = f
            .service
            ._fetch_all_user_votes(&Session::Anonymous, TargetKind::Post)
            .await
            .unwrap();
        assert!(all.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_all_user_votes_by_kind() {
        let f = setup().await;
        let comment = add_comment(&f).await;

        vote(&f, f.alice, f.post, 1).await;
        vote(&f, f.alice, comment, -1).await;
        vote(&f, f.bob, f.post, -1).await;

        let session = Session::from(f.alice);
        let posts = f.service._fetch_all_user_votes(&session, TargetKind::Post).await.unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts.get(&f.post.id()), Some(&VoteValue::Up));

        let comments = f
            .service
            ._fetch_all_user_votes(&session, TargetKind::Comment)
            .await
            .unwrap();
        assert_eq!(comments.len(), 1);
        assert_eq!(comments.get(&comment.id()), Some(&VoteValue::Down));
    }

    #[tokio::test]
    async fn test_upvotes_award_author() {
        let f = setup().await;

        vote(&f, f.alice, f.post, 1).await;
        vote(&f, f.bob, f.post, -1).await;
        // Withdrawing never takes points back
        vote(&f, f.alice, f.post, 1).await;
        // Self votes count for the score only
        vote(&f, f.author, f.post, 1).await;

        let points = test_utils::contribution_points(&f.service.db, f.author).await;
        assert_eq!(points, 1);
        assert_eq!(scores::current_score(&f.service.db, f.post).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reconcile_score() {
        let f = setup().await;
        vote(&f, f.alice, f.post, 1).await;

        scores::apply_delta(&f.service.db, f.post, 10).await.unwrap();
        assert_eq!(f.service._reconcile_score(f.post).await.unwrap(), 1);
        assert_eq!(scores::current_score(&f.service.db, f.post).await.unwrap(), 1);
    }
}
