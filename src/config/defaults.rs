//! Default configuration values for tsunagi.
//!
//! These are the base layer under every user, file and command-line setting,
//! and what `tsunagi print-config` shows when nothing is configured.

use std::path::PathBuf;

use path_clean::PathClean;

use super::settings::{BridgeSettings, BusSettings, ServerMode, ServerSettings};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 2087;
pub const DEFAULT_SERVER_COMMAND: &str = "pylsp";
pub const DEFAULT_BUS_IN_PORT: u16 = 7000;
pub const DEFAULT_BUS_OUT_PORT: u16 = 7001;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 20_000;
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 5_000;

/// Arguments passed to the spawned server; `{host}` and `{port}` are
/// substituted at launch.
pub fn default_server_args() -> Vec<String> {
    ["--tcp", "--host", "{host}", "--port", "{port}"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// The current directory, normalized. Falls back to `.`.
pub fn default_workspace() -> PathBuf {
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .clean()
}

/// Returns the fully defaulted settings.
pub fn default_settings() -> BridgeSettings {
    BridgeSettings {
        host: DEFAULT_HOST.to_string(),
        port: DEFAULT_PORT,
        workspace: default_workspace(),
        server_mode: ServerMode::Spawn,
        connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
        poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
        shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
        server: ServerSettings {
            command: DEFAULT_SERVER_COMMAND.to_string(),
            args: default_server_args(),
        },
        bus: BusSettings {
            in_port: DEFAULT_BUS_IN_PORT,
            out_port: DEFAULT_BUS_OUT_PORT,
        },
    }
}
