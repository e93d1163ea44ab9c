use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    time::Duration,
};

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_REMOTE_BASE_URL: &str = "https://github.com";
pub const DEFAULT_STORE_NAME: &str = "repositories";
pub const DEFAULT_MAX_COMMIT_DEPTH: usize = 50;
pub const DEFAULT_CLONE_TIMEOUT: Duration = Duration::from_secs(60);
/// Upper bound on the history fetched by a clone, whatever the scan depth.
pub const MAX_CLONE_DEPTH: usize = 100;

/// Runtime knobs of a [`crate::RepoCache`]; may be replaced while it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// HTTP proxy that git traffic is relayed through, if the host needs one.
    pub relay_proxy_url: Option<String>,
    pub remote_base_url: String,
    pub max_commit_depth: usize,
    pub clone_timeout: Duration,
    /// Directory name of the object store below the cache directory.
    pub store_name: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            relay_proxy_url: None,
            remote_base_url: DEFAULT_REMOTE_BASE_URL.to_owned(),
            max_commit_depth: DEFAULT_MAX_COMMIT_DEPTH,
            clone_timeout: DEFAULT_CLONE_TIMEOUT,
            store_name: DEFAULT_STORE_NAME.to_owned(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid configuration: {0}")]
pub struct InvalidConfig(String);

impl InvalidConfig {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        InvalidConfig(message.into())
    }
}

impl CacheConfig {
    pub fn clone_depth(&self) -> usize {
        self.max_commit_depth.min(MAX_CLONE_DEPTH)
    }

    pub fn validate(&self) -> Result<(), InvalidConfig> {
        let store = self.store_name.as_str();
        if store.is_empty()
            || store == "."
            || store == ".."
            || store.contains(['/', '\\'])
        {
            return Err(InvalidConfig(format!(
                "store name `{store}` must be a single directory name"
            )));
        }
        if self.max_commit_depth == 0 {
            return Err(InvalidConfig("commit depth must be positive".to_owned()));
        }
        if self.clone_timeout.is_zero() {
            return Err(InvalidConfig("clone timeout must be positive".to_owned()));
        }
        if self.remote_base_url.trim().is_empty() {
            return Err(InvalidConfig("remote base url is empty".to_owned()));
        }
        Ok(())
    }
}

/// Settings resolved from the config file and the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepocacheConfig {
    pub cache_dir: Option<PathBuf>,
    pub cache: CacheConfig,
}

impl RepocacheConfig {
    /// Loads `file` (or the default location, if present) overlaid by
    /// `REPOCACHE_*` environment variables.
    pub fn load(file: Option<&Path>) -> anyhow::Result<Self> {
        let raw_config = RawConfig::load(file, None)?;
        let config = raw_config.into_config();
        config.cache.validate()?;
        Ok(config)
    }
}

#[derive(Default, Debug, Deserialize, PartialEq, Eq)]
struct RawConfig {
    #[serde(default)]
    cache: CacheSection,
    #[serde(default)]
    git: GitSection,
    #[serde(default)]
    history: HistorySection,
}

#[derive(Default, Debug, Deserialize, PartialEq, Eq)]
struct CacheSection {
    dir: Option<PathBuf>,
    store: Option<String>,
}

#[derive(Default, Debug, Deserialize, PartialEq, Eq)]
struct GitSection {
    remote: Option<String>,
    proxy: Option<String>,
    /// Milliseconds.
    timeout: Option<u64>,
}

#[derive(Default, Debug, Deserialize, PartialEq, Eq)]
struct HistorySection {
    depth: Option<usize>,
}

impl RawConfig {
    fn load(
        file: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let file = match file {
            Some(path) => Some(File::from(path).required(true)),
            None => default_config_file().map(|path| File::from(path).required(false)),
        };
        let mut builder = Config::builder();
        if let Some(file) = file {
            builder = builder.add_source(file);
        }
        builder
            .add_source(
                Environment::with_prefix("REPOCACHE")
                    .separator("_")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?
            .try_deserialize()
    }

    fn into_config(self) -> RepocacheConfig {
        let defaults = CacheConfig::default();
        RepocacheConfig {
            cache_dir: self.cache.dir,
            cache: CacheConfig {
                relay_proxy_url: self.git.proxy.filter(|proxy| !proxy.trim().is_empty()),
                remote_base_url: self.git.remote.unwrap_or(defaults.remote_base_url),
                max_commit_depth: self.history.depth.unwrap_or(defaults.max_commit_depth),
                clone_timeout: self
                    .git
                    .timeout
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.clone_timeout),
                store_name: self.cache.store.unwrap_or(defaults.store_name),
            },
        }
    }
}

pub fn default_cache_directory() -> Option<PathBuf> {
    home::home_dir().map(|home| home.join(".repocache"))
}

fn default_config_file() -> Option<PathBuf> {
    default_cache_directory().map(|dir| dir.join("config.toml"))
}
