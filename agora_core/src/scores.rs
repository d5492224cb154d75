//! The score aggregate: counters cached on posts, comments and profiles.
//!
//! Counters are only ever moved with `column = column + ?` updates so that
//! concurrent writers compose instead of overwriting each other. Callers
//! run these inside the transaction that mutates the rows being counted.

use sea_orm::sea_query::Expr;

use crate::{
    entity::prelude::*,
    error::ServiceError,
    ids::{PostId, ProfileId},
};

fn missing(target: VoteTarget) -> ServiceError {
    match target {
        VoteTarget::Post(_) => ServiceError::NotFound("post"),
        VoteTarget::Comment(_) => ServiceError::NotFound("comment"),
    }
}

/// Moves the cached score of `target` by `delta`.
pub async fn apply_delta<C: ConnectionTrait>(
    conn: &C,
    target: VoteTarget,
    delta: i64,
) -> Result<(), ServiceError> {
    let result = match target {
        VoteTarget::Post(id) => {
            Post::update_many()
                .col_expr(PostColumn::Score, Expr::col(PostColumn::Score).add(delta))
                .filter(PostColumn::Id.eq(id))
                .exec(conn)
                .await?
        }
        VoteTarget::Comment(id) => {
            Comment::update_many()
                .col_expr(CommentColumn::Score, Expr::col(CommentColumn::Score).add(delta))
                .filter(CommentColumn::Id.eq(id))
                .exec(conn)
                .await?
        }
    };

    if result.rows_affected == 0 {
        return Err(missing(target));
    }
    Ok(())
}

pub async fn current_score<C: ConnectionTrait>(
    conn: &C,
    target: VoteTarget,
) -> Result<i64, ServiceError> {
    let score = match target {
        VoteTarget::Post(id) => Post::find_by_id(id).one(conn).await?.map(|post| post.score),
        VoteTarget::Comment(id) => Comment::find_by_id(id)
            .one(conn)
            .await?
            .map(|comment| comment.score),
    };

    score.ok_or_else(|| missing(target))
}

/// Author of the voted-on entity. Doubles as the existence check for votes.
pub async fn target_author<C: ConnectionTrait>(
    conn: &C,
    target: VoteTarget,
) -> Result<ProfileId, ServiceError> {
    let author = match target {
        VoteTarget::Post(id) => Post::find_by_id(id)
            .one(conn)
            .await?
            .map(|post| post.author_id),
        VoteTarget::Comment(id) => Comment::find_by_id(id)
            .one(conn)
            .await?
            .map(|comment| comment.author_id),
    };

    author.ok_or_else(|| missing(target))
}

/// Sum of the live vote rows on `target`.
pub async fn live_vote_sum<C: ConnectionTrait>(
    conn: &C,
    target: VoteTarget,
) -> Result<i64, ServiceError> {
    let votes = Vote::find()
        .filter(VoteColumn::TargetKind.eq(target.kind()))
        .filter(VoteColumn::TargetId.eq(target.id()))
        .all(conn)
        .await?;

    Ok(votes.iter().map(|vote| vote.value.delta()).sum())
}

/// Overwrites the cached score with the live vote sum. Returns the
/// corrected score.
pub async fn reconcile_score<C: ConnectionTrait>(
    conn: &C,
    target: VoteTarget,
) -> Result<i64, ServiceError> {
    let cached = current_score(conn, target).await?;
    let live = live_vote_sum(conn, target).await?;

    if cached != live {
        tracing::warn!(?target, cached, live, "score drifted from vote ledger");
        apply_delta(conn, target, live - cached).await?;
    }
    Ok(live)
}

pub async fn adjust_comments_number<C: ConnectionTrait>(
    conn: &C,
    post_id: PostId,
    delta: i64,
) -> Result<(), ServiceError> {
    let result = Post::update_many()
        .col_expr(
            PostColumn::CommentsNumber,
            Expr::col(PostColumn::CommentsNumber).add(delta),
        )
        .filter(PostColumn::Id.eq(post_id))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        return Err(ServiceError::NotFound("post"));
    }
    Ok(())
}

/// Overwrites `comments_number` with the number of top-level comment rows.
pub async fn reconcile_comments_number<C: ConnectionTrait>(
    conn: &C,
    post_id: PostId,
) -> Result<i64, ServiceError> {
    let post = Post::find_by_id(post_id)
        .one(conn)
        .await?
        .ok_or(ServiceError::NotFound("post"))?;

    let live = Comment::find()
        .filter(CommentColumn::PostId.eq(post_id))
        .filter(CommentColumn::ParentCommentId.is_null())
        .count(conn)
        .await? as i64;

    if post.comments_number != live {
        tracing::warn!(%post_id, cached = post.comments_number, live, "comment count drifted");
        adjust_comments_number(conn, post_id, live - post.comments_number).await?;
    }
    Ok(live)
}

/// Best effort: the operation that earned the points has already
/// committed, so a failure here is logged and swallowed.
pub async fn award_contribution<C: ConnectionTrait>(conn: &C, profile_id: ProfileId, points: i64) {
    let result = Profile::update_many()
        .col_expr(
            ProfileColumn::ContributionPoints,
            Expr::col(ProfileColumn::ContributionPoints).add(points),
        )
        .filter(ProfileColumn::Id.eq(profile_id))
        .exec(conn)
        .await;

    match result {
        Ok(result) if result.rows_affected == 0 => {
            tracing::warn!(%profile_id, "contribution points not awarded: profile missing");
        }
        Ok(_) => {}
        Err(error) => {
            tracing::warn!(%profile_id, %error, "failed to award contribution points");
        }
    }
}
