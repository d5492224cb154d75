use sea_orm_migration::{prelude::*, schema::*};

use super::m20260301_000001_create_profiles_table::Profile;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Vote::Table)
                    .col(pk_uuid(Vote::Id))
                    .col(uuid(Vote::UserId))
                    .col(string_len(Vote::TargetKind, 16))
                    .col(uuid(Vote::TargetId))
                    .col(small_integer(Vote::Value))
                    .col(string(Vote::CreatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-vote-user_id")
                            .from(Vote::Table, Vote::UserId)
                            .to(Profile::Table, Profile::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // At most one vote per user per target
        manager
            .create_index(
                Index::create()
                    .name("idx_votes_user_target")
                    .table(Vote::Table)
                    .col(Vote::UserId)
                    .col(Vote::TargetKind)
                    .col(Vote::TargetId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_votes_target")
                    .table(Vote::Table)
                    .col(Vote::TargetKind)
                    .col(Vote::TargetId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Vote::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Vote {
    Table,
    Id,
    UserId,
    TargetKind,
    TargetId,
    Value,
    CreatedAt,
}
