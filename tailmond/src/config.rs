use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::Deserialize;
use anyhow::{Context, Result};
use shared::protocol::{DAEMON_APP_PATH, DAEMON_CLI_PATH, PROBE_PROGRAM};
use shared::types::{MachineId, Service};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub scanning: ScanningConfig,
    #[serde(default)]
    pub timers: TimersConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default = "Service::defaults")]
    pub services: Vec<Service>,
    /// Display-name overrides keyed by machine ID
    #[serde(default)]
    pub names: HashMap<MachineId, String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutableOption {
    #[default]
    Cli,
    App,
    Custom,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub executable: ExecutableOption,
    /// Only read when `executable = "custom"`
    #[serde(default)]
    pub custom_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScanningConfig {
    #[serde(default = "default_probe_program")]
    pub probe_program: PathBuf,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Ceiling on machines probed at once; each machine probes its services in parallel
    #[serde(default = "default_max_concurrent_machines")]
    pub max_concurrent_machines: usize,
    /// Advertised routes with more addresses than this are not expanded
    #[serde(default = "default_subnet_expansion_limit")]
    pub subnet_expansion_limit: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Timer {
    pub automatic: bool,
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimersConfig {
    #[serde(default = "default_machine_timer")]
    pub machines: Timer,
    #[serde(default = "default_service_timer")]
    pub services: Timer,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

fn default_probe_program() -> PathBuf {
    PathBuf::from(PROBE_PROGRAM)
}

fn default_timeout() -> u64 {
    5
}

fn default_max_concurrent_machines() -> usize {
    8
}

fn default_subnet_expansion_limit() -> u64 {
    256
}

fn default_machine_timer() -> Timer {
    Timer { automatic: true, interval_secs: 60 }
}

fn default_service_timer() -> Timer {
    Timer { automatic: false, interval_secs: 300 }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("/var/lib/tailmon/snapshot.db")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            daemon: DaemonConfig::default(),
            scanning: ScanningConfig::default(),
            timers: TimersConfig::default(),
            cache: CacheConfig::default(),
            services: Service::defaults(),
            names: HashMap::new(),
        }
    }
}

impl Default for ScanningConfig {
    fn default() -> Self {
        Self {
            probe_program: default_probe_program(),
            timeout_secs: default_timeout(),
            max_concurrent_machines: default_max_concurrent_machines(),
            subnet_expansion_limit: default_subnet_expansion_limit(),
        }
    }
}

impl Default for TimersConfig {
    fn default() -> Self {
        Self {
            machines: default_machine_timer(),
            services: default_service_timer(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

impl DaemonConfig {
    /// Path of the daemon executable to run
    pub fn executable_path(&self) -> PathBuf {
        match self.executable {
            ExecutableOption::Cli => PathBuf::from(DAEMON_CLI_PATH),
            ExecutableOption::App => PathBuf::from(DAEMON_APP_PATH),
            ExecutableOption::Custom => PathBuf::from(&self.custom_path),
        }
    }
}

impl ScanningConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl Timer {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        Ok(config)
    }
}
