use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::pipeline::DaemonSettings;

/// Which state store backend to use.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreBackend {
    /// SQLite database file (default), needs the `sqlite` feature
    Sqlite,
    /// One JSON file per document in the data directory
    Json,
}

/// Central configuration loaded from environment variables.
///
/// All secrets come from env vars (never hardcoded). The .env file
/// is loaded automatically at startup via dotenvy.
pub struct Config {
    /// Content API base URL (hydration, timelines, account lookup).
    pub api_url: String,
    pub api_token: String,
    /// Streaming endpoint that accepts the follow list.
    pub stream_url: String,
    /// Base used to build post links when the API omits them,
    /// e.g. `https://x.com` gives `https://x.com/{handle}/status/{id}`.
    pub post_url_base: Option<String>,
    /// Chat API base URL (where previews are published).
    pub chat_api_url: String,
    pub chat_token: String,
    pub store_backend: StoreBackend,
    pub db_path: String,
    /// Directory for the JSON store backend.
    pub data_dir: PathBuf,
    pub supervisor_interval: Duration,
    pub dispatch_interval: Duration,
    /// Channel that operator commands typed on stdin are issued in.
    pub operator_channel: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Only storage and timing have defaults. The remote endpoints are
    /// required for `run` and checked there.
    pub fn load() -> Result<Self> {
        let store_backend = match env::var("FEEDRELAY_STORE").as_deref() {
            Ok("json") => StoreBackend::Json,
            // "sqlite" or unset both default to SQLite
            _ => StoreBackend::Sqlite,
        };

        let data_dir = env::var("FEEDRELAY_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_dir());

        Ok(Self {
            api_url: env::var("FEEDRELAY_API_URL").unwrap_or_default(),
            api_token: env::var("FEEDRELAY_API_TOKEN").unwrap_or_default(),
            stream_url: env::var("FEEDRELAY_STREAM_URL").unwrap_or_default(),
            post_url_base: env::var("FEEDRELAY_POST_URL_BASE")
                .ok()
                .filter(|base| !base.trim().is_empty()),
            chat_api_url: env::var("FEEDRELAY_CHAT_API_URL").unwrap_or_default(),
            chat_token: env::var("FEEDRELAY_CHAT_TOKEN").unwrap_or_default(),
            store_backend,
            db_path: env::var("FEEDRELAY_DB_PATH")
                .unwrap_or_else(|_| "./feedrelay.db".to_string()),
            data_dir,
            supervisor_interval: Duration::from_secs(env_number(
                "FEEDRELAY_SUPERVISOR_SECS",
                60,
            )?),
            dispatch_interval: Duration::from_millis(env_number("FEEDRELAY_DISPATCH_MS", 1000)?),
            operator_channel: env::var("FEEDRELAY_OPERATOR_CHANNEL")
                .unwrap_or_else(|_| "operator".to_string()),
        })
    }

    /// Check that the content API and stream endpoints are configured.
    /// Call this before anything that reads from upstream.
    pub fn require_upstream(&self) -> Result<()> {
        if self.api_url.is_empty() {
            anyhow::bail!(
                "FEEDRELAY_API_URL not set. Add it to your .env file.\n\
                 See .env.example for the required variables."
            );
        }
        if self.stream_url.is_empty() {
            anyhow::bail!(
                "FEEDRELAY_STREAM_URL not set. Add it to your .env file.\n\
                 See .env.example for the required variables."
            );
        }
        Ok(())
    }

    /// Check that the chat API is configured.
    /// Call this before anything that publishes.
    pub fn require_chat(&self) -> Result<()> {
        if self.chat_api_url.is_empty() {
            anyhow::bail!(
                "FEEDRELAY_CHAT_API_URL not set. Add it to your .env file.\n\
                 See .env.example for the required variables."
            );
        }
        Ok(())
    }

    /// Validate that the chosen store backend can be used.
    pub fn require_store(&self) -> Result<()> {
        match self.store_backend {
            StoreBackend::Sqlite => {
                if cfg!(not(feature = "sqlite")) {
                    anyhow::bail!(
                        "FEEDRELAY_STORE is sqlite but the 'sqlite' feature is not compiled in.\n\
                         Rebuild with: cargo build --features sqlite\n\
                         Or set FEEDRELAY_STORE=json."
                    );
                }
                Ok(())
            }
            StoreBackend::Json => Ok(()),
        }
    }

    pub fn daemon_settings(&self) -> DaemonSettings {
        DaemonSettings {
            dispatch_interval: self.dispatch_interval,
            supervisor_interval: self.supervisor_interval,
        }
    }

    /// Where the state lives, for display.
    pub fn store_location(&self) -> String {
        match self.store_backend {
            StoreBackend::Sqlite => self.db_path.clone(),
            StoreBackend::Json => self.data_dir.display().to_string(),
        }
    }
}

/// `~/.local/share/feedrelay` (or the platform equivalent), falling back to
/// `./feedrelay-data` when there is no home directory.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("feedrelay"))
        .unwrap_or_else(|| PathBuf::from("./feedrelay-data"))
}

fn env_number(name: &str, default: u64) -> Result<u64> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("{name} must be a whole number, got '{raw}'")),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_data_dir_ends_with_crate_name() {
        assert!(default_data_dir().ends_with("feedrelay") || default_data_dir().ends_with("feedrelay-data"));
    }

    #[test]
    fn test_env_number_defaults_and_parses() {
        assert_eq!(env_number("FEEDRELAY_TEST_UNSET_NUMBER", 7).unwrap(), 7);

        env::set_var("FEEDRELAY_TEST_NUMBER", " 42 ");
        assert_eq!(env_number("FEEDRELAY_TEST_NUMBER", 7).unwrap(), 42);

        env::set_var("FEEDRELAY_TEST_BAD_NUMBER", "soon");
        assert!(env_number("FEEDRELAY_TEST_BAD_NUMBER", 7).is_err());
    }
}
