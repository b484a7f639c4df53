use crate::core::get_config_dir;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Deserialize, Debug, Default, Clone)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

#[derive(Deserialize, Debug, Clone)]
pub struct DaemonConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// SQLite file backing the state store. Defaults to
    /// `<data dir>/control-plane.db`.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

/// Settings governing how the control plane talks to agent executors.
#[derive(Deserialize, Debug, Clone)]
pub struct AgentConfig {
    /// Fixed port every agent's executor listens on.
    #[serde(default = "default_executor_port")]
    pub executor_port: u16,
    /// Agents quiet for longer than this have their GPUs marked offline.
    #[serde(default = "default_offline_timeout_secs")]
    pub offline_timeout_secs: u64,
    /// Hard deadline for a remote launch call.
    #[serde(default = "default_launch_timeout_secs")]
    pub launch_timeout_secs: u64,
    /// Hard deadline for a remote status probe.
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

#[derive(Deserialize, Debug, Clone)]
pub struct SupervisorConfig {
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
}

impl AgentConfig {
    pub fn offline_timeout(&self) -> Duration {
        Duration::from_secs(self.offline_timeout_secs)
    }

    pub fn launch_timeout(&self) -> Duration {
        Duration::from_secs(self.launch_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

impl SupervisorConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_executor_port() -> u16 {
    8001
}

fn default_offline_timeout_secs() -> u64 {
    300
}

fn default_launch_timeout_secs() -> u64 {
    30
}

fn default_probe_timeout_secs() -> u64 {
    5
}

fn default_tick_interval_secs() -> u64 {
    5
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            database_path: None,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            executor_port: default_executor_port(),
            offline_timeout_secs: default_offline_timeout_secs(),
            launch_timeout_secs: default_launch_timeout_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
        }
    }
}

pub fn load_config(config_path: Option<&PathBuf>) -> Result<Config, config::ConfigError> {
    let mut config_vec = vec![];

    // User-provided config file
    if let Some(config_path) = config_path {
        if config_path.exists() {
            config_vec.push(config_path.clone());
        } else {
            eprintln!("Warning: Config file {config_path:?} not found.");
        }
    }

    // Default config file
    if let Ok(default_config_path) = get_config_dir().map(|d| d.join("gpuhub.toml")) {
        if default_config_path.exists() {
            config_vec.push(default_config_path);
        }
    }

    let settings = config::Config::builder();
    let settings = config_vec.iter().fold(settings, |s, path| {
        s.add_source(config::File::from(path.as_path()))
    });

    settings
        .add_source(
            config::Environment::with_prefix("GPUHUB")
                .separator("_")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_the_documented_values() {
        let config = Config::default();
        assert_eq!(config.daemon.port, 8080);
        assert_eq!(config.agent.executor_port, 8001);
        assert_eq!(config.agent.offline_timeout(), Duration::from_secs(300));
        assert_eq!(config.agent.launch_timeout(), Duration::from_secs(30));
        assert_eq!(config.agent.probe_timeout(), Duration::from_secs(5));
        assert_eq!(config.supervisor.tick_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(
                "[daemon]\nport = 9000\n\n[agent]\nexecutor_port = 9001\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(config.daemon.port, 9000);
        assert_eq!(config.agent.executor_port, 9001);
        assert_eq!(config.agent.launch_timeout_secs, 30);
        assert_eq!(config.supervisor.tick_interval_secs, 5);
    }
}
