//! Configuration resolution for evilmsg.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Settings file (`--config`, or `~/.config/evilmsg/settings.json`)
//! 3. Environment variables (`EVILMSG_*`)
//! 4. CLI arguments (applied by the binary, highest priority)

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Complete evilmsg configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub builder: BuilderConfig,
}

/// HTTP server and callback configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// Host embedded in beacon callback URLs.
    pub hit_host: String,
    /// Port embedded in beacon callback URLs; the listen port when unset.
    pub hit_port: Option<u16>,
    pub database_path: Option<PathBuf>,
    pub cors_origins: Vec<String>,
    pub max_hit_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            hit_host: "127.0.0.1".to_string(),
            hit_port: None,
            database_path: None,
            cors_origins: vec![
                "http://127.0.0.1:3000".to_string(),
                "http://localhost:5173".to_string(),
            ],
            max_hit_bytes: 1024 * 1024, // 1 MiB
        }
    }
}

impl ServerConfig {
    /// Port beacons should call back on.
    pub fn callback_port(&self) -> u16 {
        self.hit_port.unwrap_or_else(|| self.listen_addr.port())
    }
}

/// External beacon build step configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    /// Build tool to run (looked up on `PATH` when relative).
    pub program: PathBuf,
    /// Arguments placed before the flavor target and `HIT_URL=` assignment.
    pub args: Vec<String>,
    /// Working directory of the build; artifact paths are relative to it.
    pub work_dir: PathBuf,
    pub timeout_secs: u64,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("make"),
            args: Vec::new(),
            work_dir: PathBuf::from("."),
            timeout_secs: 120,
        }
    }
}

/// Load configuration from `path` (or the global settings file when `None`)
/// and apply environment overrides.
///
/// An explicitly named file must exist; the global one is optional.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => load_config_file(path)?,
        None => match global_config_path() {
            Some(global) if global.exists() => load_config_file(&global)?,
            _ => Config::default(),
        },
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    Ok(config)
}

/// Global settings file: `$XDG_CONFIG_HOME/evilmsg/settings.json`.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("evilmsg").join("settings.json"))
}

/// Default database location: `~/.evilmsg/evilmsg.db`.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".evilmsg").join("evilmsg.db"))
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

/// Apply `EVILMSG_*` overrides read through `lookup`. Unparseable numbers are
/// ignored.
pub fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(val) = lookup("EVILMSG_HIT_HOST") {
        config.server.hit_host = val;
    }
    if let Some(Ok(port)) = lookup("EVILMSG_HIT_PORT").map(|v| v.parse()) {
        config.server.hit_port = Some(port);
    }
    if let Some(Ok(n)) = lookup("EVILMSG_MAX_HIT_BYTES").map(|v| v.parse()) {
        config.server.max_hit_bytes = n;
    }
    if let Some(val) = lookup("EVILMSG_BUILD_PROGRAM") {
        config.builder.program = PathBuf::from(val);
    }
    if let Some(val) = lookup("EVILMSG_BUILD_DIR") {
        config.builder.work_dir = PathBuf::from(val);
    }
    if let Some(Ok(secs)) = lookup("EVILMSG_BUILD_TIMEOUT").map(|v| v.parse()) {
        config.builder.timeout_secs = secs;
    }
}
