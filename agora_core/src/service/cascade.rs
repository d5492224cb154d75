// Removal of comment subtrees and of the votes cast on removed targets.
// Votes reference their target polymorphically, so the database cannot
// cascade them and every delete path goes through here.

use sea_orm::{ConnectionTrait, DbErr};
use uuid::Uuid;

use crate::{entity::prelude::*, ids::CommentId};

/// `root` followed by every comment below it, at any depth.
pub(crate) async fn collect_subtree<C: ConnectionTrait>(
    conn: &C,
    root: CommentId,
) -> Result<Vec<CommentId>, DbErr> {
    let mut ids = vec![root];
    let mut frontier = vec![root];

    while !frontier.is_empty() {
        let children: Vec<CommentId> = Comment::find()
            .filter(CommentColumn::ParentCommentId.is_in(frontier))
            .all(conn)
            .await?
            .into_iter()
            .map(|comment| comment.id)
            .collect();

        ids.extend(children.iter().copied());
        frontier = children;
    }

    Ok(ids)
}

pub(crate) async fn delete_votes<C: ConnectionTrait>(
    conn: &C,
    kind: TargetKind,
    target_ids: &[Uuid],
) -> Result<u64, DbErr> {
    if target_ids.is_empty() {
        return Ok(0);
    }

    let result = Vote::delete_many()
        .filter(VoteColumn::TargetKind.eq(kind))
        .filter(VoteColumn::TargetId.is_in(target_ids.iter().copied()))
        .exec(conn)
        .await?;

    Ok(result.rows_affected)
}

/// Deletes the given comments and the votes cast on them.
pub(crate) async fn delete_comments<C: ConnectionTrait>(
    conn: &C,
    ids: &[CommentId],
) -> Result<(), DbErr> {
    if ids.is_empty() {
        return Ok(());
    }

    let targets: Vec<Uuid> = ids.iter().map(|id| id.into_uuid()).collect();
    let votes = delete_votes(conn, TargetKind::Comment, &targets).await?;

    Comment::delete_many()
        .filter(CommentColumn::Id.is_in(ids.iter().copied()))
        .exec(conn)
        .await?;

    tracing::debug!(comments = ids.len(), votes, "comments removed");
    Ok(())
}
