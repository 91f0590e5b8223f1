use std::path::PathBuf;

use path_clean::PathClean;
use serde::{Deserialize, Serialize};

use super::ConfigError;
use super::defaults;

/// Whether the bridge launches the language server itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerMode {
    /// Spawn the server and own its process.
    Spawn,
    /// Connect to a server someone else manages.
    Attach,
}

/// One configuration layer as written in a TOML file.
///
/// Every field is optional; unset fields fall through to lower layers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BridgeConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub workspace: Option<PathBuf>,
    pub server_mode: Option<ServerMode>,
    pub connect_timeout_ms: Option<u64>,
    pub poll_timeout_ms: Option<u64>,
    pub shutdown_timeout_ms: Option<u64>,
    pub server: Option<ServerConfig>,
    pub bus: Option<BusConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ServerConfig {
    pub command: Option<String>,
    pub args: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BusConfig {
    pub in_port: Option<u16>,
    pub out_port: Option<u16>,
}

/// Fully resolved settings the bridge runs with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeSettings {
    /// Language server host
    pub host: String,
    /// Language server port
    pub port: u16,
    /// Working directory of a spawned server
    pub workspace: PathBuf,
    pub server_mode: ServerMode,
    pub connect_timeout_ms: u64,
    /// Wait of one bus poll cycle
    pub poll_timeout_ms: u64,
    pub shutdown_timeout_ms: u64,
    pub server: ServerSettings,
    pub bus: BusSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerSettings {
    pub command: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusSettings {
    pub in_port: u16,
    pub out_port: u16,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        defaults::default_settings()
    }
}

impl From<BridgeConfig> for BridgeSettings {
    /// Fill every unset field from the defaults.
    fn from(config: BridgeConfig) -> Self {
        let base = defaults::default_settings();
        let server = config.server.unwrap_or_default();
        let bus = config.bus.unwrap_or_default();

        BridgeSettings {
            host: config.host.unwrap_or(base.host),
            port: config.port.unwrap_or(base.port),
            workspace: config.workspace.map(|p| p.clean()).unwrap_or(base.workspace),
            server_mode: config.server_mode.unwrap_or(base.server_mode),
            connect_timeout_ms: config.connect_timeout_ms.unwrap_or(base.connect_timeout_ms),
            poll_timeout_ms: config.poll_timeout_ms.unwrap_or(base.poll_timeout_ms),
            shutdown_timeout_ms: config.shutdown_timeout_ms.unwrap_or(base.shutdown_timeout_ms),
            server: ServerSettings {
                command: server.command.unwrap_or(base.server.command),
                args: server.args.unwrap_or(base.server.args),
            },
            bus: BusSettings {
                in_port: bus.in_port.unwrap_or(base.bus.in_port),
                out_port: bus.out_port.unwrap_or(base.bus.out_port),
            },
        }
    }
}

impl BridgeSettings {
    /// Check cross-field constraints and ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::invalid("host must not be empty"));
        }
        if self.port == 0 {
            return Err(ConfigError::invalid("port must be non-zero"));
        }
        if self.bus.in_port == 0 || self.bus.out_port == 0 {
            return Err(ConfigError::invalid("bus ports must be non-zero"));
        }
        if self.bus.in_port == self.bus.out_port {
            return Err(ConfigError::invalid(format!(
                "bus inPort and outPort must differ, both are {}",
                self.bus.in_port
            )));
        }
        if self.server_mode == ServerMode::Spawn && self.server.command.trim().is_empty() {
            return Err(ConfigError::invalid(
                "server.command must be set when serverMode is \"spawn\"",
            ));
        }
        check_range("connectTimeoutMs", self.connect_timeout_ms, 100, 120_000)?;
        check_range("shutdownTimeoutMs", self.shutdown_timeout_ms, 1_000, 30_000)?;
        check_range("pollTimeoutMs", self.poll_timeout_ms, 1, 60_000)?;
        Ok(())
    }

    /// Server arguments with `{host}` and `{port}` substituted.
    pub fn server_args(&self) -> Vec<String> {
        let port = self.port.to_string();
        self.server
            .args
            .iter()
            .map(|arg| arg.replace("{port}", &port).replace("{host}", &self.host))
            .collect()
    }
}

fn check_range(name: &str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::invalid(format!(
            "{} must be between {} and {}, got {}",
            name, min, max, value
        )));
    }
    Ok(())
}
