// used to read a separate config file, overridable through the environment
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::EngineOptions;
use crate::error::Result;
use crate::schema::DEFAULT_NAMESPACES;
use crate::store::StoreSettings;

pub const DEFAULT_CONFIG: &str = "schemaql";
pub const ENV_PREFIX: &str = "SCHEMAQL";

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub schema_path: PathBuf,
    pub data_dir: PathBuf,
    pub sqlite_path: Option<PathBuf>,
    /// Namespaces recognised by type name prefix, lowercase.
    pub namespaces: Vec<String>,
    /// Whether a leaf with a non-empty `where` and no explicit `singleResult`
    /// returns its first match as a single object.
    pub single_result_on_filter: bool,
    pub cache: CacheSettings,
    pub server: ServerSettings,
}
impl Default for Settings {
    fn default() -> Self {
        Self {
            schema_path: PathBuf::from("schema.graphql"),
            data_dir: PathBuf::from("data"),
            sqlite_path: None,
            namespaces: DEFAULT_NAMESPACES.iter().map(|n| n.to_string()).collect(),
            single_result_on_filter: true,
            cache: CacheSettings::default(),
            server: ServerSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheSettings {
    pub capacity: usize,
    pub ttl_secs: u64,
    /// Non-metadata results are cached only when they took longer than this.
    pub threshold_ms: u64,
}
impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            capacity: 256,
            ttl_secs: 300,
            threshold_ms: 5,
        }
    }
}
impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
    pub fn threshold(&self) -> Duration {
        Duration::from_millis(self.threshold_ms)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
}
impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

impl Settings {
    /// Defaults, then the given TOML file (or an optional `schemaql.toml`), then
    /// `SCHEMAQL_*` environment variables, with `__` separating nested keys as in
    /// `SCHEMAQL_CACHE__CAPACITY=64`.
    pub fn load(path: Option<&Path>) -> Result<Settings> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG).required(false),
        };
        Self::build(file, Environment::with_prefix(ENV_PREFIX))
    }

    fn build(file: File<config::FileSourceFile, config::FileFormat>, environment: Environment) -> Result<Settings> {
        let settings = Config::builder()
            .add_source(file)
            .add_source(
                environment
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("namespaces"),
            )
            .build()?
            .try_deserialize::<Settings>()?;
        Ok(settings)
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            single_result_on_filter: self.single_result_on_filter,
            cache_capacity: self.cache.capacity,
            cache_ttl: self.cache.ttl(),
            cache_threshold: self.cache.threshold(),
        }
    }

    pub fn store_settings(&self) -> StoreSettings {
        StoreSettings {
            data_dir: self.data_dir.clone(),
            sqlite_path: self.sqlite_path.clone(),
        }
    }
}
