//! Client configuration: where the store lives and which credentials to send.

use serde::Deserialize;

use crate::error::StoreError;

pub const DEFAULT_USER_AGENT: &str = "store-core/0.1";
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Connection settings for a `RestClient`.
///
/// Credentials are optional so the client can talk to an unauthenticated
/// development server.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ClientConfig {
    pub base_url: String,
    #[serde(default)]
    pub application_id: Option<String>,
    #[serde(default)]
    pub rest_api_key: Option<String>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Advisory; enforcing it is the executor's job.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl ClientConfig {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            application_id: None,
            rest_api_key: None,
            user_agent: default_user_agent(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    pub fn with_credentials(mut self, application_id: &str, rest_api_key: &str) -> Self {
        self.application_id = Some(application_id.to_string());
        self.rest_api_key = Some(rest_api_key.to_string());
        self
    }

    /// Load from a JSON document; absent optional fields take their defaults.
    pub fn from_json(raw: &str) -> Result<Self, StoreError> {
        let mut config: ClientConfig = serde_json::from_str(raw)?;
        config.base_url = config.base_url.trim_end_matches('/').to_string();
        Ok(config)
    }

    /// Load from `STORE_BASE_URL`, `STORE_APPLICATION_ID`, `STORE_REST_API_KEY`
    /// and `STORE_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, StoreError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, StoreError> {
        let base_url = lookup("STORE_BASE_URL")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| StoreError::Config("STORE_BASE_URL is not set".to_string()))?;
        let mut config = Self::new(&base_url);
        config.application_id = lookup("STORE_APPLICATION_ID");
        config.rest_api_key = lookup("STORE_REST_API_KEY");
        if let Some(raw) = lookup("STORE_TIMEOUT_SECS") {
            config.timeout_secs = raw
                .parse()
                .map_err(|_| StoreError::Config(format!("STORE_TIMEOUT_SECS is not a number: {raw}")))?;
        }
        Ok(config)
    }
}
