pub mod defaults;
pub mod settings;
pub mod user;

pub use settings::{
    BridgeConfig, BridgeSettings, BusConfig, BusSettings, ServerConfig, ServerMode, ServerSettings,
};
pub use user::{load_user_config, user_config_path};

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

impl ConfigError {
    pub fn invalid(message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            message: message.into(),
        }
    }
}

/// Read and parse one TOML configuration layer.
pub fn load_config_file(path: &Path) -> Result<BridgeConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config = toml::from_str::<BridgeConfig>(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    log::debug!(target: "tsunagi::config", "Loaded config from {}", path.display());
    Ok(config)
}

/// Merge multiple config layers in order.
/// Later layers in the slice have higher precedence (override earlier ones).
/// Use this for layered config: `merge_all(&[user, file, cli])`
pub fn merge_all(configs: &[Option<BridgeConfig>]) -> Option<BridgeConfig> {
    configs.iter().cloned().reduce(merge_configs).flatten()
}

/// Merge two layers, preferring values from `primary` over `fallback`
pub fn merge_configs(
    fallback: Option<BridgeConfig>,
    primary: Option<BridgeConfig>,
) -> Option<BridgeConfig> {
    match (fallback, primary) {
        (None, None) => None,
        (Some(config), None) | (None, Some(config)) => Some(config),
        (Some(fallback), Some(primary)) => Some(BridgeConfig {
            host: primary.host.or(fallback.host),
            port: primary.port.or(fallback.port),
            workspace: primary.workspace.or(fallback.workspace),
            server_mode: primary.server_mode.or(fallback.server_mode),
            connect_timeout_ms: primary.connect_timeout_ms.or(fallback.connect_timeout_ms),
            poll_timeout_ms: primary.poll_timeout_ms.or(fallback.poll_timeout_ms),
            shutdown_timeout_ms: primary.shutdown_timeout_ms.or(fallback.shutdown_timeout_ms),
            server: merge_server(fallback.server, primary.server),
            bus: merge_bus(fallback.bus, primary.bus),
        }),
    }
}

fn merge_server(
    fallback: Option<ServerConfig>,
    primary: Option<ServerConfig>,
) -> Option<ServerConfig> {
    match (fallback, primary) {
        (Some(fallback), Some(primary)) => Some(ServerConfig {
            command: primary.command.or(fallback.command),
            args: primary.args.or(fallback.args),
        }),
        (fallback, primary) => primary.or(fallback),
    }
}

fn merge_bus(fallback: Option<BusConfig>, primary: Option<BusConfig>) -> Option<BusConfig> {
    match (fallback, primary) {
        (Some(fallback), Some(primary)) => Some(BusConfig {
            in_port: primary.in_port.or(fallback.in_port),
            out_port: primary.out_port.or(fallback.out_port),
        }),
        (fallback, primary) => primary.or(fallback),
    }
}

/// Resolve layers over the defaults and validate the result.
pub fn resolve(layers: &[Option<BridgeConfig>]) -> Result<BridgeSettings, ConfigError> {
    let settings = BridgeSettings::from(merge_all(layers).unwrap_or_default());
    settings.validate()?;
    Ok(settings)
}
