use iroh::PublicKey;
use sea_orm::DatabaseConnection;
use zel_core::prelude::*;

use crate::{
    entity::prelude::*,
    error::{with_deadline, ServiceError},
    ids::ProfileId,
};

#[derive(Clone)]
pub struct ProfilesService {
    db: DatabaseConnection,
    timeout: std::time::Duration,
}

impl ProfilesService {
    pub fn new(db: DatabaseConnection, timeout: std::time::Duration) -> Self {
        Self { db, timeout }
    }

    /// Create a profile and bind it to the node that asked for it
    pub async fn _create_profile(
        &self,
        node_id: PublicKey,
        name: String,
        desc: String,
        picture: Option<Vec<u8>>,
    ) -> Result<ProfileModel, ServiceError> {
        let name = name.trim().to_owned();
        if name.is_empty() {
            return Err(ServiceError::Validation("profile name is empty".into()));
        }

        let txn = self.db.begin().await?;

        let taken = Profile::find()
            .filter(ProfileColumn::Name.eq(name.as_str()))
            .count(&txn)
            .await?;
        if taken > 0 {
            return Err(ServiceError::Validation(format!("profile name {name:?} is taken")));
        }

        let profile = ProfileActiveModel {
            id: Set(ProfileId::new()),
            name: Set(name),
            desc: Set(desc.trim().to_owned()),
            picture: Set(picture),
            contribution_points: Set(0),
        };
        let profile = Profile::insert(profile).exec_with_returning(&txn).await?;

        let identity = IdentityActiveModel {
            node_id: Set(node_id.as_bytes().to_vec()),
            profile_id: Set(profile.id),
        };
        Identity::insert(identity).exec(&txn).await?;

        txn.commit().await?;

        tracing::info!(profile_id = %profile.id, %node_id, "profile created");
        Ok(profile)
    }

    /// Profiles the node may act as
    pub async fn _list_profiles(
        &self,
        node_id: PublicKey,
    ) -> Result<Vec<ProfileModel>, ServiceError> {
        let bound = Identity::find()
            .filter(IdentityColumn::NodeId.eq(node_id.as_bytes().to_vec()))
            .find_also_related(Profile)
            .all(&self.db)
            .await?;

        Ok(bound.into_iter().filter_map(|(_, profile)| profile).collect())
    }

    pub async fn _get_profile(&self, profile_id: ProfileId) -> Result<ProfileModel, ServiceError> {
        Profile::find_by_id(profile_id)
            .one(&self.db)
            .await?
            .ok_or(ServiceError::NotFound("profile"))
    }
}

#[zel_service(name = "profile")]
trait Profiles {
    #[doc = "Create a profile owned by the calling node"]
    #[method(name = "create_profile")]
    async fn create_profile(
        &self,
        name: String,
        desc: String,
        picture: Option<Vec<u8>>,
    ) -> Result<ProfileModel, ResourceError>;

    #[doc = "List the profiles the calling node may act as"]
    #[method(name = "list_profiles")]
    async fn list_profiles(&self) -> Result<Vec<ProfileModel>, ResourceError>;

    #[doc = "Get a profile by ID"]
    #[method(name = "get_profile")]
    async fn get_profile(&self, profile_id: ProfileId) -> Result<ProfileModel, ResourceError>;
}

#[async_trait]
impl ProfilesServer for ProfilesService {
    async fn create_profile(
        &self,
        ctx: RequestContext,
        name: String,
        desc: String,
        picture: Option<Vec<u8>>,
    ) -> Result<ProfileModel, ResourceError> {
        let node_id = ctx.connection().remote_id();
        Ok(with_deadline(self.timeout, self._create_profile(node_id, name, desc, picture)).await?)
    }

    async fn list_profiles(&self, ctx: RequestContext) -> Result<Vec<ProfileModel>, ResourceError> {
        let node_id = ctx.connection().remote_id();
        Ok(with_deadline(self.timeout, self._list_profiles(node_id)).await?)
    }

    async fn get_profile(
        &self,
        _ctx: RequestContext,
        profile_id: ProfileId,
    ) -> Result<ProfileModel, ResourceError> {
        Ok(with_deadline(self.timeout, self._get_profile(profile_id)).await?)
    }
}
