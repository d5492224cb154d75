use tokio::sync::OnceCell;

use std::{sync::Arc, time::Duration};

use chrono::{SecondsFormat, Utc};
use iroh::{Endpoint, EndpointAddr};
use zel_core::{prelude::RpcServerBuilder, protocol::RpcClient, IrohBundle};

use crate::{
    ids::ProfileId,
    service::{
        comments::{CommentsClient, CommentsServer, CommentsService},
        posts::{PostsClient, PostsServer, PostsService},
        profiles::{ProfilesClient, ProfilesServer, ProfilesService},
        votes::{VotesClient, VotesServer, VotesService},
    },
};

pub mod config;
pub mod entity;
pub mod error;
pub mod ids;
pub mod models;
pub mod scores;
pub mod service;
pub mod session;

#[cfg(test)]
mod test_utils;

static AGORA_CORE: OnceCell<Arc<AgoraCore>> = OnceCell::const_new();
static ALPN: &[u8] = b"agora::0.1.0";

const DEFAULT_PROFILE_NAME: &str = "Default";

pub type StartError = Box<dyn std::error::Error>;

/// RFC 3339 in UTC with fixed microsecond precision, so that the stored
/// strings sort in time order.
pub(crate) fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub async fn core() -> Result<Arc<AgoraCore>, StartError> {
    AGORA_CORE
        .get_or_try_init(|| async move { AgoraCore::start().await.map(Arc::new) })
        .await
        .cloned()
}

/// Main runtime handle for Agora.
pub struct AgoraCore {
    pub config: config::AgoraConfig,

    /// Server bundle that accepts inbound RPC traffic.
    pub server: IrohBundle,

    /// Client-side endpoint used by the UI to connect to the local server.
    pub client_endpoint: Endpoint,

    /// Profile the local client acts as unless it picks another one.
    pub default_profile: ProfileId,

    /// Typed clients for the local server.
    pub profiles: ProfilesClient,
    pub posts: PostsClient,
    pub comments: CommentsClient,
    pub votes: VotesClient,
}

impl AgoraCore {
    pub async fn start() -> Result<Self, StartError> {
        let config = config::get_or_init().await?;
        tracing::info!(database = %config.database_url(), "starting agora core");

        let mut server_builder = IrohBundle::builder(Some(config.secret_key.clone())).await?;
        let server_endpoint = server_builder.endpoint().clone();

        let db = models::open_or_create_db(&config).await?;
        models::migrate_up(&db).await?;

        let timeout = config.request_timeout();
        let profiles_service = ProfilesService::new(db.clone(), timeout);
        let posts_service = PostsService::new(db.clone(), timeout);
        let comments_service = CommentsService::new(db.clone(), timeout)
            .with_page_size(config.comments_page_size);
        let votes_service = VotesService::new(db.clone(), timeout);

        let rpc_server_builder = RpcServerBuilder::new(ALPN, server_endpoint.clone());
        let rpc_server_builder = profiles_service.register_service(rpc_server_builder);
        let rpc_server_builder = posts_service.register_service(rpc_server_builder);
        let rpc_server_builder = comments_service.register_service(rpc_server_builder);
        let rpc_server_builder = votes_service.register_service(rpc_server_builder);
        let rpc_server = rpc_server_builder.build();

        let server = server_builder.accept(ALPN, rpc_server).finish().await;
        server.wait_online().await;
        tracing::debug!("rpc server online");

        let client_endpoint = Endpoint::builder()
            .secret_key(config.client_secret_key.clone())
            .alpns(vec![ALPN.to_vec()])
            .bind()
            .await?;

        client_endpoint.online().await;

        let server_addr = server.endpoint.addr();
        let profiles = ProfilesClient::new(connect(&client_endpoint, &server_addr).await?);
        let posts = PostsClient::new(connect(&client_endpoint, &server_addr).await?);
        let comments = CommentsClient::new(connect(&client_endpoint, &server_addr).await?);
        let votes = VotesClient::new(connect(&client_endpoint, &server_addr).await?);

        let default_profile = match profiles.list_profiles().await?.into_iter().next() {
            Some(profile) => profile.id,
            None => {
                let profile = profiles
                    .create_profile(
                        DEFAULT_PROFILE_NAME.to_string(),
                        "Default profile".to_string(),
                        None,
                    )
                    .await?;
                tracing::info!(profile_id = %profile.id, "created default profile");
                profile.id
            }
        };

        Ok(Self {
            config,
            server,
            client_endpoint,
            default_profile,
            profiles,
            posts,
            comments,
            votes,
        })
    }

    pub async fn shutdown(self) -> Result<(), StartError> {
        self.client_endpoint.close().await;
        self.server.shutdown(Duration::from_secs(5)).await?;
        tracing::info!("agora core stopped");
        Ok(())
    }
}

async fn connect(endpoint: &Endpoint, addr: &EndpointAddr) -> Result<RpcClient, StartError> {
    let conn = endpoint.connect(addr.clone(), ALPN).await?;
    Ok(RpcClient::new(conn).await?)
}

pub mod prelude {
    pub use super::config;
    pub use super::entity;
    pub use super::error;
    pub use super::ids;
    pub use super::models;
    pub use super::service;
    pub use super::session::Session;

    pub use zel_core;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_sort_chronologically() {
        let earlier = timestamp_now();
        std::thread::sleep(Duration::from_millis(2));
        let later = timestamp_now();

        assert!(earlier < later);
        assert!(earlier.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&later).is_ok());
    }
}
