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
                    .table(Identity::Table)
                    .col(binary(Identity::NodeId))
                    .col(uuid_uniq(Identity::ProfileId))
                    .index(
                        Index::create()
                            .primary()
                            .col(Identity::NodeId)
                            .col(Identity::ProfileId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-identity-profile_id")
                            .from(Identity::Table, Identity::ProfileId)
                            .to(Profile::Table, Profile::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Identity::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Identity {
    Table,
    NodeId,
    ProfileId,
}
