use std::path::PathBuf;
use std::time::Duration;

use iroh::SecretKey;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

static DATA_DIR_NAME: &str = "agora";
static AGORA_DB_NAME: &str = "agora_db.sqlite";
static CONFIG_FILE_NAME: &str = "config.json";

pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_COMMENTS_PAGE_SIZE: u64 = 20;

// data_dir_path
// |- agora
//    |- agora_db.sqlite
//    |- config.json

fn default_secret_key() -> SecretKey {
    SecretKey::generate(&mut rand::rng())
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

fn default_comments_page_size() -> u64 {
    DEFAULT_COMMENTS_PAGE_SIZE
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no data directory on this platform")]
    NoDataDir,
    #[error("config io failed")]
    Io(#[from] std::io::Error),
    #[error("config file is not valid json")]
    Json(#[from] serde_json::Error),
}

#[derive(Serialize, Deserialize, Debug)]
pub struct AgoraConfig {
    /// Secret key for the local node.
    #[serde(default = "default_secret_key")]
    pub(crate) secret_key: SecretKey,

    /// Secret key the UI side connects with. Its public half is what
    /// identities bind profiles to.
    #[serde(default = "default_secret_key")]
    pub(crate) client_secret_key: SecretKey,

    pub(crate) database_path: PathBuf,

    /// Upper bound for a single storage operation.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_comments_page_size")]
    pub comments_page_size: u64,
}

impl AgoraConfig {
    fn new(data_dir: PathBuf) -> Self {
        AgoraConfig {
            secret_key: default_secret_key(),
            client_secret_key: default_secret_key(),
            database_path: data_dir.join(AGORA_DB_NAME),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            comments_page_size: DEFAULT_COMMENTS_PAGE_SIZE,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn database_url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.database_path.display())
    }
}

/// Gets the existing config or initializes a new one if it doesn't exist
pub async fn get_or_init() -> Result<AgoraConfig, ConfigError> {
    let data_dir = dirs::data_dir().ok_or(ConfigError::NoDataDir)?;
    load_or_create(data_dir.join(DATA_DIR_NAME)).await
}

pub(crate) async fn load_or_create(agora_dir: PathBuf) -> Result<AgoraConfig, ConfigError> {
    let config_path = agora_dir.join(CONFIG_FILE_NAME);

    fs::create_dir_all(&agora_dir).await?;

    if fs::try_exists(&config_path).await? {
        let mut file = fs::File::open(&config_path).await?;
        let mut contents = String::new();
        file.read_to_string(&mut contents).await?;

        let config: AgoraConfig = serde_json::from_str(&contents)?;
        Ok(config)
    } else {
        let config = AgoraConfig::new(agora_dir);

        let json = serde_json::to_string_pretty(&config)?;
        let mut file = fs::File::create(&config_path).await?;
        file.write_all(json.as_bytes()).await?;
        file.flush().await?;

        tracing::info!(path = %config_path.display(), "created new config");
        Ok(config)
    }
}
