use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use quill_client::{ClientConfig, DEFAULT_BASE_URL};

const DEFAULT_SESSION_FILE: &str = ".quill_session.json";

#[derive(Debug, Clone)]
pub struct Settings {
    pub api_url: String,
    pub session_file: PathBuf,
    pub http_timeout_secs: u64,
    pub dashboard_timeout_secs: u64,
    pub per_page: u32,
    pub log_level: String,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let api_url = lookup("QUILL_API_URL")
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let session_file = lookup("QUILL_SESSION_FILE")
            .filter(|raw| !raw.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SESSION_FILE));
        let http_timeout_secs = parse_positive(&lookup, "QUILL_HTTP_TIMEOUT_SECS", 15)?;
        let dashboard_timeout_secs = parse_positive(&lookup, "QUILL_DASHBOARD_TIMEOUT_SECS", 10)?;
        let per_page = parse_positive(&lookup, "QUILL_PER_PAGE", 10)?;
        let per_page = u32::try_from(per_page)
            .map_err(|_| anyhow!("QUILL_PER_PAGE is too large"))?;
        let log_level = lookup("LOG_LEVEL")
            .or_else(|| lookup("RUST_LOG"))
            .unwrap_or_else(|| "warn".to_string());

        Ok(Self {
            api_url,
            session_file,
            http_timeout_secs,
            dashboard_timeout_secs,
            per_page,
            log_level,
        })
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            request_timeout: Duration::from_secs(self.http_timeout_secs),
            dashboard_timeout: Duration::from_secs(self.dashboard_timeout_secs),
            default_per_page: self.per_page,
            ..ClientConfig::new(self.api_url.clone())
        }
    }
}

fn parse_positive(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> Result<u64> {
    let value = lookup(key)
        .unwrap_or_else(|| default.to_string())
        .trim()
        .parse::<u64>()
        .with_context(|| format!("Failed to parse {key}, expecting positive integer"))?;

    if value == 0 {
        return Err(anyhow!("{key} must be > 0"));
    }
    Ok(value)
}
