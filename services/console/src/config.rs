use std::path::PathBuf;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
///
/// The API credential is deliberately optional here: it may instead come from
/// the credential cache or an interactive prompt, and connecting without one
/// is only an error when no relay is configured either.
#[derive(Clone, Debug)]
pub struct Config {
    pub api_key: Option<String>,
    pub relay_url: Option<String>,
    pub model: String,
    pub weather_base_url: String,
    pub rpc_url: Option<String>,
    pub wallet_address: Option<String>,
    pub address_book_path: Option<PathBuf>,
    pub credential_cache_path: PathBuf,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let api_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty());
        let relay_url = std::env::var("RELAY_URL").ok().filter(|u| !u.is_empty());

        let model = std::env::var("REALTIME_MODEL")
            .unwrap_or_else(|_| "gpt-4o-realtime-preview-2024-10-01".to_string());

        let weather_base_url = std::env::var("WEATHER_BASE_URL")
            .unwrap_or_else(|_| parlance_core::weather::DEFAULT_WEATHER_BASE_URL.to_string());

        let rpc_url = std::env::var("ETH_RPC_URL").ok().filter(|u| !u.is_empty());
        let wallet_address = std::env::var("WALLET_ADDRESS").ok().filter(|a| !a.is_empty());

        let address_book_path = std::env::var("ADDRESS_BOOK_PATH").ok().map(PathBuf::from);

        let credential_cache_path = std::env::var("CREDENTIAL_CACHE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(".parlance/credential.json"));

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            api_key,
            relay_url,
            model,
            weather_base_url,
            rpc_url,
            wallet_address,
            address_book_path,
            credential_cache_path,
            log_level,
        })
    }
}
