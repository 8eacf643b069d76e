use std::path::PathBuf;
use std::str::FromStr;

use crate::suite::{AllocationPolicy, UnmappedCategory};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}: cannot parse {value:?}")]
    Invalid { var: &'static str, value: String },
    #[error("KENNEL_CATEGORY_MAP: {0}")]
    CategoryMap(#[from] UnmappedCategory),
}

/// Server settings, read from `KENNEL_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    /// WAL appends before the compactor rewrites a tenant's log; 0 disables.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    /// JSON registry of known customers, pets and add-ons. Without one every
    /// id is trusted.
    pub directory_file: Option<PathBuf>,
    pub policy: AllocationPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 7878,
            data_dir: PathBuf::from("./data"),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            directory_file: None,
            policy: AllocationPolicy::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source. Unset or blank variables keep
    /// their defaults; malformed ones are an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(bind) = get("KENNEL_BIND") {
            config.bind = bind;
        }
        if let Some(dir) = get("KENNEL_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        config.directory_file = get("KENNEL_DIRECTORY_FILE").map(PathBuf::from);
        config.port = parse(&get, "KENNEL_PORT")?.unwrap_or(config.port);
        config.max_connections =
            parse(&get, "KENNEL_MAX_CONNECTIONS")?.unwrap_or(config.max_connections);
        config.compact_threshold =
            parse(&get, "KENNEL_COMPACT_THRESHOLD")?.unwrap_or(config.compact_threshold);
        config.metrics_port = parse(&get, "KENNEL_METRICS_PORT")?;

        if config.max_connections == 0 {
            return Err(ConfigError::Invalid {
                var: "KENNEL_MAX_CONNECTIONS",
                value: "0".into(),
            });
        }
        if let Some(map) = get("KENNEL_CATEGORY_MAP") {
            config.policy.merge_spec(&map)?;
        }
        Ok(config)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parse<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match get(var) {
        None => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}
