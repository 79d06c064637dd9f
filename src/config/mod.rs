//! # Configuration
//!
//! TOML configuration for the relay daemon. Every key has a default, so a
//! partial file (or none, via [`Config::default`]) is a valid configuration.
//!
//! ## Sections
//!
//! - [`ServerConfig`] - listen port, client capacity, banner options
//! - [`DeviceConfig`] - serial device, modem strings, Caller-ID parsing options
//! - [`LogsConfig`] - call log and raw data log locations
//! - [`ListsConfig`] - alias, blacklist and whitelist files, hangup policy
//! - [`HelpersConfig`] - external update and list utility programs
//! - [`LoggingConfig`] - server log level and file
//!
//! ## Example
//!
//! ```toml
//! [server]
//! port = 3333
//! max_clients = 50
//! send_cidlog = true
//!
//! [device]
//! ttyport = "/dev/ttyACM0"
//! ttyspeed = 115200
//!
//! [lists]
//! hangup = true
//! ```
//!
//! [`Config::validate`] must pass before any socket or device is acquired.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::CidError;

/// Baud rates accepted for the Caller-ID device.
pub const TTY_SPEEDS: [u32; 6] = [4800, 9600, 19200, 38400, 57600, 115200];

/// Longest value a single call field may carry.
pub const CIDSIZE: usize = 51;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
    /// Line label used when a device does not report one.
    #[serde(default = "default_lineid")]
    pub lineid: String,
    /// Send the call log to every client as part of the startup banner.
    #[serde(default)]
    pub send_cidlog: bool,
    /// Broadcast `CIDINFO:` ring progress lines.
    #[serde(default)]
    pub send_cidinfo: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pidfile: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_ttyport")]
    pub ttyport: String,
    #[serde(default = "default_ttyspeed")]
    pub ttyspeed: u32,
    /// Run without a serial device; only gateways feed calls.
    #[serde(default)]
    pub noserial: bool,
    /// The device is a Caller-ID box, not a modem: skip AT initialization.
    #[serde(default)]
    pub nomodem: bool,
    #[serde(default)]
    pub clocal: bool,
    #[serde(default = "default_initstr")]
    pub initstr: String,
    /// Explicit Caller-ID enable string. When unset the common variants are tried in turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initcid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lockfile: Option<PathBuf>,
    /// Emit a generic call on the second ring when no Caller-ID arrived.
    #[serde(default = "default_true")]
    pub gencid: bool,
    /// A number alone completes a call (name becomes `NO NAME`).
    #[serde(default)]
    pub cidnoname: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsConfig {
    #[serde(default = "default_cidlog")]
    pub cidlog: PathBuf,
    #[serde(default = "default_datalog")]
    pub datalog: PathBuf,
    /// Largest call log (bytes) that will be sent to clients.
    #[serde(default = "default_cidlogmax")]
    pub cidlogmax: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListsConfig {
    #[serde(default = "default_alias")]
    pub alias: PathBuf,
    #[serde(default = "default_blacklist")]
    pub blacklist: PathBuf,
    #[serde(default = "default_whitelist")]
    pub whitelist: PathBuf,
    /// Terminate blacklisted incoming calls through the modem.
    #[serde(default)]
    pub hangup: bool,
    #[serde(default)]
    pub ignore1: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelpersConfig {
    #[serde(default = "default_update_helper")]
    pub update: PathBuf,
    #[serde(default = "default_util_helper")]
    pub util: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub logs: LogsConfig,
    #[serde(default)]
    pub lists: ListsConfig,
    #[serde(default)]
    pub helpers: HelpersConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_port() -> u16 {
    3333
}
fn default_max_clients() -> usize {
    50
}
fn default_lineid() -> String {
    "-".to_string()
}
fn default_ttyport() -> String {
    "/dev/modem".to_string()
}
fn default_ttyspeed() -> u32 {
    19200
}
fn default_initstr() -> String {
    "AT Z S0=0 E1 V1 Q0".to_string()
}
fn default_true() -> bool {
    true
}
fn default_cidlog() -> PathBuf {
    PathBuf::from("/var/log/cidcall.log")
}
fn default_datalog() -> PathBuf {
    PathBuf::from("/var/log/ciddata.log")
}
fn default_cidlogmax() -> u64 {
    110_000
}
fn default_alias() -> PathBuf {
    PathBuf::from("/etc/cidrelay/alias")
}
fn default_blacklist() -> PathBuf {
    PathBuf::from("/etc/cidrelay/blacklist")
}
fn default_whitelist() -> PathBuf {
    PathBuf::from("/etc/cidrelay/whitelist")
}
fn default_update_helper() -> PathBuf {
    PathBuf::from("/usr/local/bin/cidupdate")
}
fn default_util_helper() -> PathBuf {
    PathBuf::from("/usr/local/bin/ncidutil")
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            max_clients: default_max_clients(),
            lineid: default_lineid(),
            send_cidlog: false,
            send_cidinfo: false,
            pidfile: None,
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            ttyport: default_ttyport(),
            ttyspeed: default_ttyspeed(),
            noserial: false,
            nomodem: false,
            clocal: false,
            initstr: default_initstr(),
            initcid: None,
            lockfile: None,
            gencid: true,
            cidnoname: false,
        }
    }
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            cidlog: default_cidlog(),
            datalog: default_datalog(),
            cidlogmax: default_cidlogmax(),
        }
    }
}

impl Default for ListsConfig {
    fn default() -> Self {
        Self {
            alias: default_alias(),
            blacklist: default_blacklist(),
            whitelist: default_whitelist(),
            hangup: false,
            ignore1: false,
        }
    }
}

impl Default for HelpersConfig {
    fn default() -> Self {
        Self {
            update: default_update_helper(),
            util: default_util_helper(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            device: DeviceConfig::default(),
            logs: LogsConfig::default(),
            lists: ListsConfig::default(),
            helpers: HelpersConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl DeviceConfig {
    /// Lock file guarding the serial device: the configured path, or
    /// `/var/lock/LCK..<device name>`.
    pub fn lockfile_path(&self) -> PathBuf {
        if let Some(path) = &self.lockfile {
            return path.clone();
        }
        let name = Path::new(&self.ttyport)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.ttyport.clone());
        PathBuf::from(format!("/var/lock/LCK..{}", name))
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    /// Reject values the daemon cannot run with.
    pub fn validate(&self) -> Result<(), CidError> {
        if self.server.port == 0 {
            return Err(CidError::Config("server.port must be non-zero".into()));
        }
        if self.server.max_clients == 0 {
            return Err(CidError::Config("server.max_clients must be at least 1".into()));
        }
        if self.server.lineid.is_empty() || self.server.lineid.len() >= CIDSIZE {
            return Err(CidError::Config(format!(
                "server.lineid must be 1..{} characters",
                CIDSIZE - 1
            )));
        }
        if !TTY_SPEEDS.contains(&self.device.ttyspeed) {
            return Err(CidError::Config(format!(
                "device.ttyspeed {} not one of {:?}",
                self.device.ttyspeed, TTY_SPEEDS
            )));
        }
        if self.lists.hangup && self.device.nomodem {
            return Err(CidError::Config(
                "lists.hangup requires a modem (device.nomodem is set)".into(),
            ));
        }
        if self.lists.hangup && self.device.noserial {
            return Err(CidError::Config(
                "lists.hangup requires a serial device (device.noserial is set)".into(),
            ));
        }
        Ok(())
    }
}
