use std::{future::Future, time::Duration};

use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use zel_core::prelude::RequestContext;

use crate::{
    entity::prelude::{Identity, IdentityColumn},
    error::{with_deadline, ServiceError},
    ids::ProfileId,
};

/// Who is calling. Resolved once at the request boundary and passed
/// explicitly to every operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Session {
    Anonymous,
    Authenticated(ProfileId),
}

impl Session {
    pub fn user(&self) -> Option<ProfileId> {
        match self {
            Session::Anonymous => None,
            Session::Authenticated(id) => Some(*id),
        }
    }

    pub fn require(&self) -> Result<ProfileId, ServiceError> {
        self.user().ok_or(ServiceError::AuthenticationRequired)
    }

    /// Accepts `acting_as` only if `node_id` owns that profile.
    pub async fn resolve<C: ConnectionTrait>(
        conn: &C,
        node_id: &[u8],
        acting_as: Option<ProfileId>,
    ) -> Result<Self, ServiceError> {
        let Some(profile_id) = acting_as else {
            return Ok(Session::Anonymous);
        };

        let bound = Identity::find()
            .filter(IdentityColumn::NodeId.eq(node_id.to_vec()))
            .filter(IdentityColumn::ProfileId.eq(profile_id))
            .count(conn)
            .await?;

        if bound == 0 {
            tracing::debug!(%profile_id, "profile claim not bound to caller, treating as anonymous");
            return Ok(Session::Anonymous);
        }

        Ok(Session::Authenticated(profile_id))
    }

    /// Resolves the caller, then runs `operation` as them. `limit` bounds
    /// both steps together.
    pub async fn run_resolved<C, T, F, Fut>(
        conn: &C,
        limit: Duration,
        node_id: &[u8],
        acting_as: Option<ProfileId>,
        operation: F,
    ) -> Result<T, ServiceError>
    where
        C: ConnectionTrait,
        F: FnOnce(Session) -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        with_deadline(limit, async move {
            let session = Self::resolve(conn, node_id, acting_as).await?;
            operation(session).await
        })
        .await
    }

    /// [`Session::run_resolved`] for an inbound RPC, keyed by the peer's
    /// public key.
    pub async fn run_for_request<C, T, F, Fut>(
        conn: &C,
        limit: Duration,
        ctx: &RequestContext,
        acting_as: Option<ProfileId>,
        operation: F,
    ) -> Result<T, ServiceError>
    where
        C: ConnectionTrait,
        F: FnOnce(Session) -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let node_id = ctx.connection().remote_id();
        Self::run_resolved(conn, limit, node_id.as_bytes(), acting_as, operation).await
    }
}

impl From<ProfileId> for Session {
    fn from(id: ProfileId) -> Self {
        Session::Authenticated(id)
    }
}
