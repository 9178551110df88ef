use std::path::PathBuf;

use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};

/// Top-level daemon configuration (numserved.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Address the tool HTTP server binds.
    pub bind: String,
    /// Base directory for per-instance state (control socket, watchdog log).
    /// Defaults to the platform data-local dir.
    pub workdir: Option<PathBuf>,
    /// Log level for the daemon and its watchdog process.
    pub log_level: String,
    /// Launch one engine worker at startup instead of on first use.
    #[serde(default)]
    pub prime_worker: bool,
    pub engine: EngineConfig,
}

/// How to launch and reach the external engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Engine launcher command; resolved through PATH.
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Loopback port the worker's evaluation endpoint listens on.
    pub port: u16,
    /// Name of the real compute process when `command` is a wrapper that
    /// re-spawns it; used to find the pid that actually needs supervising.
    pub worker_process_name: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:33417".into(),
            workdir: None,
            log_level: "info".into(),
            prime_worker: false,
            engine: EngineConfig::default(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command: "numeng".into(),
            args: vec![],
            port: 34515,
            worker_process_name: None,
        }
    }
}

/// Load the config file, creating a default one on first run.
pub fn load_or_create(explicit: Option<PathBuf>) -> Result<ServiceConfig> {
    let cfg_path = match explicit {
        Some(path) => path,
        None => dirs::config_dir()
            .context("could not determine config directory")?
            .join("numserved")
            .join("numserved.toml"),
    };

    if !cfg_path.exists() {
        info!(
            "config not found at {}, creating default configuration",
            cfg_path.display()
        );
        if let Some(parent) = cfg_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create config directory")?;
        }
        let default_toml = toml::to_string_pretty(&ServiceConfig::default())
            .context("failed to serialize default config")?;
        std::fs::write(&cfg_path, default_toml).context("failed to write config file")?;
    }

    let cfg_str = std::fs::read_to_string(&cfg_path).context("failed to read config file")?;
    let cfg: ServiceConfig = toml::from_str(&cfg_str).context("failed to parse config")?;
    info!("using config from {}", cfg_path.display());
    Ok(cfg)
}

/// Base working directory for instance state.
pub fn resolve_workdir(cfg: &ServiceConfig) -> Result<PathBuf> {
    match &cfg.workdir {
        Some(dir) => Ok(dir.clone()),
        None => Ok(dirs::data_local_dir()
            .context("could not determine data directory")?
            .join("numserved")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_roundtrips_through_toml() {
        let toml_str = toml::to_string_pretty(&ServiceConfig::default()).unwrap();
        let parsed: ServiceConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.bind, "127.0.0.1:33417");
        assert_eq!(parsed.engine.command, "numeng");
        assert!(!parsed.prime_worker);
    }

    #[test]
    fn first_run_creates_a_default_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("numserved.toml");
        let cfg = load_or_create(Some(path.clone())).unwrap();
        assert!(path.exists());
        assert_eq!(cfg.log_level, "info");

        // Second load reads the file it just wrote
        let again = load_or_create(Some(path)).unwrap();
        assert_eq!(again.bind, cfg.bind);
    }
}
