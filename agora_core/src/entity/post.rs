use std::collections::BTreeSet;

use crate::ids::{PostId, ProfileId};
use sea_orm::entity::prelude::*;
use sea_orm::FromJsonQueryResult;
use serde::{Deserialize, Serialize};

/// Tag set of a post, stored as a JSON array.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
pub struct Tags(pub BTreeSet<String>);

impl Tags {
    pub fn contains(&self, tag: &str) -> bool {
        self.0.contains(tag)
    }
}

impl<S: Into<String>> FromIterator<S> for Tags {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Tags(
            iter.into_iter()
                .map(|tag| {
                    let tag: String = tag.into();
                    tag.trim().to_owned()
                })
                .filter(|tag| !tag.is_empty())
                .collect(),
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "post")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: PostId,
    pub author_id: ProfileId,
    pub title: String,
    pub description: String,
    pub tags: Tags,
    pub image_url: Option<String>,
    /// Sum of live votes. Only ever moved by atomic deltas.
    pub score: i64,
    /// Number of top-level comments.
    pub comments_number: i64,
    pub is_resolved: bool,
    pub posted_at: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::profile::Entity",
        from = "Column::AuthorId",
        to = "super::profile::Column::Id"
    )]
    Author,
    #[sea_orm(has_many = "super::comment::Entity")]
    Comment,
}

impl Related<super::profile::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Author.def()
    }
}

impl Related<super::comment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Comment.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
