use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub billing: BillingConfig,
    pub backend: BackendConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BillingConfig {
    /// Subscription SKUs offered in the store listing.
    #[serde(default = "default_subscription_skus")]
    pub subscription_skus: Vec<String>,
    /// When true, a non-Play-Store install blocks purchase() instead of
    /// only logging a warning.
    #[serde(default)]
    pub strict_installer_check: bool,
    #[serde(default = "default_connection_max_retries")]
    pub connection_max_retries: u32,
    #[serde(default = "default_connection_retry_delay_ms")]
    pub connection_retry_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    pub base_url: String,
    pub bearer_token: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_subscription_skus() -> Vec<String> {
    vec![
        "muscleai.basic.monthly".to_string(),
        "muscleai.pro.monthly".to_string(),
        "muscleai.vip.monthly".to_string(),
    ]
}

fn default_connection_max_retries() -> u32 {
    3
}

fn default_connection_retry_delay_ms() -> u64 {
    1000
}

fn default_request_timeout_ms() -> u64 {
    15_000
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Load .env file if it exists (for environment variable overrides)
        dotenvy::dotenv().ok();

        // Build config from config.yml (required) with environment variable overrides
        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(true))
            .add_source(
                config::Environment::with_prefix("PLAYBILL")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            subscription_skus: default_subscription_skus(),
            strict_installer_check: false,
            connection_max_retries: default_connection_max_retries(),
            connection_retry_delay_ms: default_connection_retry_delay_ms(),
        }
    }
}
