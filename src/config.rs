use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::KiraError;

pub const DEFAULT_CONFIG_FILE: &str = "kira-sf.json";
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 1000;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub server_url: Option<String>,
    #[serde(default)]
    pub datastores: Vec<DataStoreEntry>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub buffer_size: Option<usize>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub progress_interval_ms: Option<u64>,
    #[serde(default)]
    pub trust_sidecar: Option<bool>,
    #[serde(default)]
    pub logs_dir: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum DataStoreEntry {
    Shorthand(String),
    Detailed(DataStoreEntryObject),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DataStoreEntryObject {
    #[serde(default)]
    pub name: Option<String>,
    pub url: String,
}

/// Values given on the command line; they win over the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub server_url: Option<String>,
    pub datastores: Vec<String>,
    pub timeout_secs: Option<u64>,
    pub buffer_size: Option<usize>,
    pub max_attempts: Option<u32>,
    pub logs_dir: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DataStoreEndpoint {
    pub name: String,
    pub url: Url,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub server_url: Url,
    pub datastores: Vec<DataStoreEndpoint>,
    pub timeout: Duration,
    pub buffer_size: usize,
    pub max_attempts: u32,
    pub progress_interval: Duration,
    pub trust_sidecar: bool,
    pub logs_dir: Utf8PathBuf,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path`, or `kira-sf.json` from the current directory when it exists.
    /// A missing default file yields an empty config.
    pub fn load(path: Option<&str>) -> Result<Config, KiraError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| KiraError::ConfigRead(config_path.clone()))?;
        serde_json::from_str(&content).map_err(|err| KiraError::ConfigParse(err.to_string()))
    }

    pub fn resolve(
        path: Option<&str>,
        overrides: ConfigOverrides,
    ) -> Result<ResolvedConfig, KiraError> {
        let config = Self::load(path)?;
        Self::resolve_config(config, overrides)
    }

    pub fn resolve_config(
        config: Config,
        overrides: ConfigOverrides,
    ) -> Result<ResolvedConfig, KiraError> {
        let schema_version = config.schema_version.unwrap_or(1);

        let server = overrides
            .server_url
            .or(config.server_url)
            .ok_or(KiraError::MissingServer)?;
        let server_url = parse_url(&server)?;

        let mut datastores = if overrides.datastores.is_empty() {
            config
                .datastores
                .into_iter()
                .enumerate()
                .map(|(index, entry)| match entry {
                    DataStoreEntry::Shorthand(url) => Ok(DataStoreEndpoint {
                        name: format!("store-{}", index + 1),
                        url: parse_url(&url)?,
                    }),
                    DataStoreEntry::Detailed(obj) => Ok(DataStoreEndpoint {
                        name: obj.name.unwrap_or_else(|| format!("store-{}", index + 1)),
                        url: parse_url(&obj.url)?,
                    }),
                })
                .collect::<Result<Vec<_>, KiraError>>()?
        } else {
            overrides
                .datastores
                .iter()
                .enumerate()
                .map(|(index, url)| {
                    Ok(DataStoreEndpoint {
                        name: format!("store-{}", index + 1),
                        url: parse_url(url)?,
                    })
                })
                .collect::<Result<Vec<_>, KiraError>>()?
        };
        if datastores.is_empty() {
            datastores.push(DataStoreEndpoint {
                name: "default".to_string(),
                url: server_url.clone(),
            });
        }

        let timeout_secs = overrides
            .timeout_secs
            .or(config.timeout_secs)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(KiraError::InvalidConfig(
                "timeout must be at least one second".to_string(),
            ));
        }

        let buffer_size = overrides
            .buffer_size
            .or(config.buffer_size)
            .unwrap_or(DEFAULT_BUFFER_SIZE);
        if buffer_size == 0 {
            return Err(KiraError::InvalidConfig(
                "buffer size must be greater than zero".to_string(),
            ));
        }

        let max_attempts = overrides
            .max_attempts
            .or(config.max_attempts)
            .unwrap_or(DEFAULT_MAX_ATTEMPTS);
        if max_attempts == 0 {
            return Err(KiraError::InvalidConfig(
                "max attempts must be at least 1".to_string(),
            ));
        }

        let logs_dir = match overrides.logs_dir.or(config.logs_dir) {
            Some(dir) => Utf8PathBuf::from(dir),
            None => default_logs_dir()?,
        };

        Ok(ResolvedConfig {
            schema_version,
            server_url,
            datastores,
            timeout: Duration::from_secs(timeout_secs),
            buffer_size,
            max_attempts,
            progress_interval: Duration::from_millis(
                config
                    .progress_interval_ms
                    .unwrap_or(DEFAULT_PROGRESS_INTERVAL_MS),
            ),
            trust_sidecar: config.trust_sidecar.unwrap_or(false),
            logs_dir,
        })
    }
}

pub fn default_logs_dir() -> Result<Utf8PathBuf, KiraError> {
    BaseDirs::new()
        .and_then(|dirs| {
            Utf8PathBuf::from_path_buf(
                dirs.home_dir()
                    .join(".cache")
                    .join("kira-sample-fetch")
                    .join("logs"),
            )
            .ok()
        })
        .ok_or_else(|| KiraError::InvalidConfig("unable to resolve logs directory".to_string()))
}

fn parse_url(value: &str) -> Result<Url, KiraError> {
    let url = Url::parse(value.trim())
        .map_err(|err| KiraError::InvalidConfig(format!("invalid URL {value}: {err}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(KiraError::InvalidConfig(format!(
            "unsupported URL scheme in {value}"
        )));
    }
    Ok(url)
}
