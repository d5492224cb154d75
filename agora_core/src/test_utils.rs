use sea_orm::{Database, DatabaseConnection, EntityTrait, Set};
use sea_orm_migration::MigratorTrait;

use crate::{
    entity::prelude::{Profile, ProfileActiveModel},
    ids::ProfileId,
    models::migrator::Migrator,
};

/// Fresh, fully migrated in-memory SQLite database. Every call is isolated.
pub async fn setup_test_db() -> DatabaseConnection {
    let db = Database::connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");

    Migrator::up(&db, None)
        .await
        .expect("Failed to run migrations");

    db
}

pub async fn create_test_profile(db: &DatabaseConnection, name: &str) -> ProfileId {
    let profile_id = ProfileId::new();
    let profile = ProfileActiveModel {
        id: Set(profile_id),
        name: Set(name.to_string()),
        desc: Set("Test".to_string()),
        picture: Set(None),
        contribution_points: Set(0),
    };
    Profile::insert(profile).exec(db).await.unwrap();
    profile_id
}

pub async fn contribution_points(db: &DatabaseConnection, profile_id: ProfileId) -> i64 {
    Profile::find_by_id(profile_id)
        .one(db)
        .await
        .unwrap()
        .expect("profile exists")
        .contribution_points
}
