//! Configuration file loading for CLI defaults.
//!
//! A JSON file provides defaults; CLI flags override file values; file
//! values override built-in defaults. Engine components take plain typed
//! parameters and never read configuration themselves.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::transport::TransportConfig;

/// JSON-backed file configuration for shelfsync defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    /// Catalog database path.
    pub database: Option<PathBuf>,
    /// Local download root; category chains are mirrored beneath it.
    pub download_root: Option<PathBuf>,
    /// Default download concurrency (same range as the CLI).
    pub concurrency: Option<usize>,
    /// Default per-site rate limit in milliseconds.
    pub rate_limit_ms: Option<u64>,
    /// Default retry bound for transient transfer failures.
    pub max_retries: Option<u32>,
    /// HTTP(S) proxy URL applied to all requests.
    pub proxy: Option<String>,
    /// User-Agent header override.
    pub user_agent: Option<String>,
    /// HTTP connect timeout in seconds.
    pub connect_timeout_secs: Option<u64>,
    /// HTTP read timeout in seconds.
    pub read_timeout_secs: Option<u64>,
}

impl FileConfig {
    /// Loads configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or parsed, or when a value is
    /// out of range.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("cannot parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration, treating a missing file as empty defaults.
    ///
    /// # Errors
    ///
    /// Fails only when a file exists but cannot be read or parsed.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Validates config values against runtime and CLI constraints.
    ///
    /// # Errors
    ///
    /// Fails with the offending key and expected range.
    pub fn validate(&self) -> Result<()> {
        if let Some(concurrency) = self.concurrency
            && !(1..=16).contains(&concurrency)
        {
            bail!("Invalid config value for `concurrency`: {concurrency}. Expected range: 1..=16");
        }

        if let Some(rate_limit_ms) = self.rate_limit_ms
            && rate_limit_ms > 60_000
        {
            bail!(
                "Invalid config value for `rate_limit_ms`: {rate_limit_ms}. Expected range: 0..=60000"
            );
        }

        if let Some(max_retries) = self.max_retries
            && max_retries > 10
        {
            bail!("Invalid config value for `max_retries`: {max_retries}. Expected range: 0..=10");
        }

        validate_timeout_secs("connect_timeout_secs", self.connect_timeout_secs)?;
        validate_timeout_secs("read_timeout_secs", self.read_timeout_secs)?;

        Ok(())
    }

    /// Builds the transport configuration these settings describe.
    #[must_use]
    pub fn transport_config(&self) -> TransportConfig {
        let mut config = TransportConfig::default();
        if let Some(proxy) = &self.proxy {
            config.proxy = Some(proxy.clone());
        }
        if let Some(user_agent) = &self.user_agent {
            config.user_agent.clone_from(user_agent);
        }
        if let Some(secs) = self.connect_timeout_secs {
            config.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.read_timeout_secs {
            config.read_timeout = Duration::from_secs(secs);
        }
        config
    }
}

fn validate_timeout_secs(field: &str, value: Option<u64>) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(1..=3600).contains(&value) {
        bail!("Invalid config value for `{field}`: {value}. Expected range: 1..=3600");
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_load_or_default_missing_file_is_default() {
        let config = FileConfig::load_or_default(Path::new("/nonexistent/config.json")).unwrap();
        assert!(config.database.is_none());
        assert!(config.concurrency.is_none());
    }

    #[test]
    fn test_load_parses_and_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(br#"{"concurrency": 4, "rate_limit_ms": 500, "proxy": "http://proxy:8080"}"#)
            .unwrap();

        let config = FileConfig::load(&path).unwrap();
        assert_eq!(config.concurrency, Some(4));
        assert_eq!(config.rate_limit_ms, Some(500));
        assert_eq!(config.transport_config().proxy.as_deref(), Some("http://proxy:8080"));
    }

    #[test]
    fn test_out_of_range_concurrency_rejected() {
        let config = FileConfig {
            concurrency: Some(99),
            ..FileConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("concurrency"));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(br#"{"concurency": 4}"#)
            .unwrap();

        assert!(FileConfig::load(&path).is_err());
    }

    #[test]
    fn test_timeout_range_validation() {
        let config = FileConfig {
            read_timeout_secs: Some(0),
            ..FileConfig::default()
        };
        assert!(config.validate().is_err());

        let config = FileConfig {
            read_timeout_secs: Some(60),
            connect_timeout_secs: Some(10),
            ..FileConfig::default()
        };
        assert!(config.validate().is_ok());
        let transport = config.transport_config();
        assert_eq!(transport.read_timeout, Duration::from_secs(60));
        assert_eq!(transport.connect_timeout, Duration::from_secs(10));
    }
}
