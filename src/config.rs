use serde::Deserialize;
use std::{collections::HashSet, fs};
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    pub server: Option<ServerConfig>,
    pub proxy: Option<ProxyConfig>,
}

impl Config {
    /// Applies defaults, validates, and sanitizes the configuration.
    /// This ensures that the configuration is in a consistent and usable state
    /// by filling in missing values and dropping invalid upstream entries.
    pub fn finalize(mut self) -> Result<Self, ConfigError> {
        let mut server_cfg = self.server.take().unwrap_or_default();
        server_cfg.bind_addr = server_cfg.bind_addr.or_else(|| Some(DEFAULT_BIND_ADDR.to_string()));
        self.server = Some(server_cfg);

        let mut proxy_cfg = self.proxy.take().unwrap_or_default();
        proxy_cfg.connect_timeout_ms =
            proxy_cfg.connect_timeout_ms.or(Some(DEFAULT_CONNECT_TIMEOUT_MS));
        proxy_cfg.timeout_secs = proxy_cfg.timeout_secs.or(Some(DEFAULT_TIMEOUT_SECS));

        let upstreams = proxy_cfg.upstreams.take().unwrap_or_else(get_default_upstreams);
        proxy_cfg.upstreams = Some(validate_and_dedupe_upstreams(upstreams)?);
        self.proxy = Some(proxy_cfg);

        Ok(self)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ServerConfig {
    pub bind_addr: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ProxyConfig {
    pub upstreams: Option<Vec<String>>,
    // Outbound client timeouts
    pub connect_timeout_ms: Option<u64>,
    pub timeout_secs: Option<u64>,
}

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 1_000;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Fallback pool used when no config file is present.
pub const DEFAULT_UPSTREAMS: [&str; 3] =
    ["https://www.google.com", "https://www.bing.com", "https://www.duckduckgo.com"];

pub fn try_load_config(path: &str) -> Result<Option<Config>, ConfigError> {
    match fs::read_to_string(path) {
        Ok(raw) => match toml::from_str::<Config>(&raw) {
            Ok(cfg) => {
                info!(path = %path, "Loaded config");
                Ok(Some(cfg))
            }
            Err(e) => {
                error!(path = %path, error = %e, "Failed to parse config");
                Err(ConfigError::ConfigError(e.to_string()))
            }
        },
        Err(e) => {
            if e.kind() == std::io::ErrorKind::NotFound {
                info!(path = %path, "No config file found, using defaults");
                Ok(None)
            } else {
                Err(ConfigError::ConfigError(e.to_string()))
            }
        }
    }
}

pub fn validate_and_dedupe_upstreams(upstreams: Vec<String>) -> Result<Vec<String>, ConfigError> {
    let mut seen = HashSet::new();
    const MAX_URL_LEN: usize = 2048;

    let validated: Vec<String> = upstreams
        .into_iter()
        .filter_map(|raw| {
            let mut url = raw.trim().to_string();

            if url.is_empty() {
                warn!("Skipping empty upstream address");
                return None;
            }

            if !url.to_lowercase().starts_with("http://")
                && !url.to_lowercase().starts_with("https://")
            {
                warn!(url = %url, "Skipping upstream with unsupported scheme");
                return None;
            }

            if url.len() > MAX_URL_LEN {
                warn!(url = %url, "Skipping upstream exceeding max length");
                return None;
            }

            if url.chars().any(|c| c.is_control() || c.is_whitespace()) {
                warn!(url = %url, "Skipping upstream with invalid characters");
                return None;
            }

            while url.ends_with('/') {
                url.pop();
            }

            if seen.insert(url.clone()) {
                Some(url)
            } else {
                None
            }
        })
        .collect();

    if validated.is_empty() {
        return Err(ConfigError::ConfigError("No valid upstreams configured".to_string()));
    }

    Ok(validated)
}

pub fn get_default_upstreams() -> Vec<String> {
    DEFAULT_UPSTREAMS.iter().map(|&s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_try_load_config_valid_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nbind_addr = \"127.0.0.1:8070\"").unwrap();
        let path = file.path().to_str().unwrap();
        let result = try_load_config(path).unwrap();
        assert!(result.is_some());
        let config = result.unwrap();
        assert_eq!(config.server.unwrap().bind_addr.unwrap(), "127.0.0.1:8070");
    }

    #[test]
    fn test_try_load_config_file_not_found() {
        let result = try_load_config("nonexistent.toml").unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_try_load_config_invalid_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nbind_addr = 12345").unwrap();
        let path = file.path().to_str().unwrap();
        let result = try_load_config(path);
        assert!(result.is_err());
    }

    #[test]
    fn test_try_load_config_upstream_list() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[proxy]\nupstreams = [\"http://127.0.0.1:9001\", \"http://127.0.0.1:9002\"]"
        )
        .unwrap();
        let path = file.path().to_str().unwrap();
        let config = try_load_config(path).unwrap().unwrap();
        let upstreams = config.proxy.unwrap().upstreams.unwrap();
        assert_eq!(upstreams.len(), 2);
    }

    #[test]
    fn test_finalize_fills_defaults() {
        let config = Config::default().finalize().unwrap();
        assert_eq!(config.server.unwrap().bind_addr.unwrap(), DEFAULT_BIND_ADDR);

        let proxy = config.proxy.unwrap();
        assert_eq!(proxy.connect_timeout_ms.unwrap(), DEFAULT_CONNECT_TIMEOUT_MS);
        assert_eq!(proxy.timeout_secs.unwrap(), DEFAULT_TIMEOUT_SECS);
        assert_eq!(proxy.upstreams.unwrap().len(), DEFAULT_UPSTREAMS.len());
    }

    #[test]
    fn test_validate_and_dedupe_upstreams() {
        let upstreams = vec![
            "https://valid1.com".to_string(),
            "https://valid1.com/".to_string(),
            "".to_string(),
            "invalid_url".to_string(),
        ];
        let result = validate_and_dedupe_upstreams(upstreams);
        assert!(result.is_ok());
        let list = result.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0], "https://valid1.com");
    }

    #[test]
    fn test_validate_and_dedupe_all_invalid() {
        let upstreams = vec!["not-a-url".to_string(), "ftp://nope.example".to_string()];
        let result = validate_and_dedupe_upstreams(upstreams);
        assert!(result.is_err());
    }

    #[test]
    fn test_get_default_upstreams() {
        let upstreams = get_default_upstreams();
        assert_eq!(upstreams.len(), 3);
        assert!(upstreams.iter().all(|u| u.starts_with("https://")));
    }
}
