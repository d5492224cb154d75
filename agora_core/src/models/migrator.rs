use sea_orm_migration::prelude::*;

mod m20260301_000001_create_profiles_table;
mod m20260301_000002_create_identity_table;
mod m20260301_000003_create_posts_table;
mod m20260301_000004_create_comments_table;
mod m20260301_000005_create_votes_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260301_000001_create_profiles_table::Migration),
            Box::new(m20260301_000002_create_identity_table::Migration),
            Box::new(m20260301_000003_create_posts_table::Migration),
            Box::new(m20260301_000004_create_comments_table::Migration),
            Box::new(m20260301_000005_create_votes_table::Migration),
        ]
    }
}
