// SeaORM entities backing the forum: profiles and the node identities bound
// to them, posts, their comment trees and the vote ledger.

pub mod comment;
pub mod identity;
pub mod post;
pub mod profile;
pub mod vote;


pub mod prelude {
    pub use super::comment::{
        ActiveModel as CommentActiveModel, Column as CommentColumn, Entity as Comment,
        Model as CommentModel,
    };
    pub use super::identity::{
        ActiveModel as IdentityActiveModel, Column as IdentityColumn, Entity as Identity,
        Model as IdentityModel,
    };
    pub use super::post::{
        ActiveModel as PostActiveModel, Column as PostColumn, Entity as Post,
        Model as PostModel, Tags,
    };
    pub use super::profile::{
        ActiveModel as ProfileActiveModel, Column as ProfileColumn, Entity as Profile,
        Model as ProfileModel,
    };
    pub use super::vote::{
        ActiveModel as VoteActiveModel, Column as VoteColumn, Entity as Vote,
        Model as VoteModel, TargetKind, VoteTarget, VoteValue,
    };

    pub use sea_orm::{
        ActiveModelTrait,
        ActiveValue,
        ColumnTrait,
        ConnectionTrait,

        Database,
        DatabaseConnection,
        DatabaseTransaction,
        DbErr,

        EntityTrait,
        ModelTrait,
        NotSet,
        Order,
        PaginatorTrait,
        QueryFilter,
        QueryOrder,
        QuerySelect,
        Set,
        TransactionTrait,
    };
}
