//! Configuration management for cmd2mqtt.
//!
//! Configuration is normally read from a YAML file; when the file does not
//! exist, the MQTT settings and command list are assembled from environment
//! variables instead (useful for containerized deployments).
//!
//! # Example Configuration
//!
//! ```yaml
//! mqtt:
//!   broker: "mqtt.example.com"
//!   port: 1883
//!   username: "ha"
//!   password: "secret"
//!   client_id: "cmd2mqtt"
//!
//! ssh:
//!   hosts:
//!     - name: "nas"
//!       host: "nas.local"
//!       user: "monitor"
//!       key_path: "~/.ssh/id_ed25519"
//!
//! commands:
//!   - name: "CPU Temp"
//!     command: "cat /sys/class/thermal/thermal_zone0/temp"
//!     frequency: "30s"
//!     unit: "°C"
//!   - name: "NAS Uptime"
//!     command: "uptime -p"
//!     frequency: "5m"
//!     target_host: "nas"
//! ```

use log::info;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};

/// Default MQTT broker port
const DEFAULT_MQTT_PORT: u16 = 1883;

/// Default MQTT client identifier
const DEFAULT_CLIENT_ID: &str = "cmd2mqtt";

/// Default SSH port
const DEFAULT_SSH_PORT: u16 = 22;

/// Default SSH connection timeout
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default command frequency when not configured
const DEFAULT_FREQUENCY: &str = "60s";

/// Target name that dispatches a command to the local machine.
pub const LOCAL_TARGET: &str = "local";

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// MQTT broker connection settings
    #[serde(default)]
    pub mqtt: MqttConfig,

    /// SSH hosts available as command targets
    #[serde(default)]
    pub ssh: SshConfig,

    /// Commands to execute periodically
    #[serde(default)]
    pub commands: Vec<CommandConfig>,
}

/// MQTT broker configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    /// Broker hostname or IP address
    #[serde(default = "default_broker")]
    pub broker: String,

    /// Broker port (default: 1883)
    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    /// Username for broker authentication (optional)
    pub username: Option<String>,

    /// Password for broker authentication (optional)
    pub password: Option<String>,

    /// Client identifier, also used as the discovery device identifier
    #[serde(default = "default_client_id")]
    pub client_id: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: default_broker(),
            port: DEFAULT_MQTT_PORT,
            username: None,
            password: None,
            client_id: DEFAULT_CLIENT_ID.to_string(),
        }
    }
}

/// SSH configuration section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SshConfig {
    /// Remote hosts that commands may target by name
    #[serde(default)]
    pub hosts: Vec<HostConfig>,
}

/// Connection parameters for one named SSH host.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HostConfig {
    /// Name commands refer to via `target_host`
    pub name: String,

    /// Hostname or IP address of the remote machine
    pub host: String,

    /// SSH port (default: 22)
    #[serde(default = "default_ssh_port")]
    pub port: u16,

    /// SSH username for authentication
    pub user: String,

    /// Path to an SSH private key file (optional)
    pub key_path: Option<String>,

    /// Password for password authentication (optional)
    pub password: Option<String>,

    /// Connection timeout as a duration string like "30s" (optional)
    pub timeout: Option<String>,
}

/// One command to execute periodically.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandConfig {
    /// Display name, also the basis of the sensor identifier
    pub name: String,

    /// Shell command text
    #[serde(default)]
    pub command: String,

    /// Repeat interval as a duration string like "30s", "5m", "1h"
    #[serde(default = "default_frequency")]
    pub frequency: String,

    /// Home Assistant device class (optional)
    pub device_class: Option<String>,

    /// Unit of measurement (optional)
    pub unit: Option<String>,

    /// Icon for the sensor (optional)
    pub icon: Option<String>,

    /// Execution target: "local" (or empty) or a configured SSH host name
    #[serde(default)]
    pub target_host: String,

    /// Force Home Assistant to record every update
    #[serde(default)]
    pub force_update: bool,

    /// Home Assistant state class (optional)
    pub state_class: Option<String>,

    /// Home Assistant entity category (optional)
    pub entity_category: Option<String>,

    /// Seconds after which the sensor state expires (optional)
    pub expire_after: Option<u32>,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            command: String::new(),
            frequency: default_frequency(),
            device_class: None,
            unit: None,
            icon: None,
            target_host: String::new(),
            force_update: false,
            state_class: None,
            entity_category: None,
            expire_after: None,
        }
    }
}

fn default_broker() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    DEFAULT_MQTT_PORT
}

fn default_client_id() -> String {
    DEFAULT_CLIENT_ID.to_string()
}

fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}

fn default_frequency() -> String {
    DEFAULT_FREQUENCY.to_string()
}

impl Config {
    /// Loads configuration from a YAML file, falling back to environment
    /// variables when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if no
    /// commands are configured at all.
    pub fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            info!("Loading configuration from: {}", path.display());
            Self::load_from_yaml(path)?
        } else {
            info!(
                "Config file {} not found, loading configuration from environment variables",
                path.display()
            );
            Self::from_env()
        };

        if config.commands.is_empty() {
            return Err(Error::Config("no commands configured".to_string()));
        }

        Ok(config)
    }

    /// Loads and parses a YAML configuration file.
    pub fn load_from_yaml(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("failed to read config file {}: {}", path.display(), e),
            ))
        })?;

        let config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Assembles configuration from the process environment.
    ///
    /// MQTT settings come from `MQTT_BROKER`, `MQTT_PORT`, `MQTT_USERNAME`,
    /// `MQTT_PASSWORD` and `MQTT_CLIENT_ID`. Commands come from
    /// `COMMAND_<NAME>` variables holding the command text, with optional
    /// `COMMAND_<NAME>_FREQUENCY`, `_DEVICE_CLASS`, `_UNIT`, `_ICON`,
    /// `_TARGET_HOST`, `_FORCE_UPDATE`, `_STATE_CLASS`, `_ENTITY_CATEGORY`
    /// and `_EXPIRE_AFTER` companions. SSH hosts cannot be configured from
    /// the environment.
    pub fn from_env() -> Self {
        Self::from_vars(env::vars())
    }

    /// Environment-variable parsing over an explicit variable list.
    fn from_vars(vars: impl Iterator<Item = (String, String)>) -> Self {
        let mut mqtt = MqttConfig::default();
        let mut commands: BTreeMap<String, CommandConfig> = BTreeMap::new();

        for (key, value) in vars {
            match key.as_str() {
                "MQTT_BROKER" => mqtt.broker = value,
                "MQTT_PORT" => {
                    if let Ok(port) = value.parse() {
                        mqtt.port = port;
                    }
                }
                "MQTT_USERNAME" => mqtt.username = Some(value),
                "MQTT_PASSWORD" => mqtt.password = Some(value),
                "MQTT_CLIENT_ID" => mqtt.client_id = value,
                _ => {
                    if let Some(rest) = key.strip_prefix("COMMAND_") {
                        apply_command_var(&mut commands, rest, value);
                    }
                }
            }
        }

        // Only keep entries that actually carry a command.
        let commands = commands
            .into_values()
            .filter(|cmd| !cmd.command.is_empty())
            .collect();

        Config {
            mqtt,
            ssh: SshConfig::default(),
            commands,
        }
    }
}

/// Applies one `COMMAND_*` environment variable to the command map.
fn apply_command_var(commands: &mut BTreeMap<String, CommandConfig>, key: &str, value: String) {
    if let Some(name) = key.strip_suffix("_FREQUENCY") {
        entry(commands, name).frequency = value;
    } else if let Some(name) = key.strip_suffix("_DEVICE_CLASS") {
        entry(commands, name).device_class = Some(value);
    } else if let Some(name) = key.strip_suffix("_UNIT") {
        entry(commands, name).unit = Some(value);
    } else if let Some(name) = key.strip_suffix("_ICON") {
        entry(commands, name).icon = Some(value);
    } else if let Some(name) = key.strip_suffix("_TARGET_HOST") {
        entry(commands, name).target_host = value;
    } else if let Some(name) = key.strip_suffix("_FORCE_UPDATE") {
        entry(commands, name).force_update = value.eq_ignore_ascii_case("true");
    } else if let Some(name) = key.strip_suffix("_STATE_CLASS") {
        entry(commands, name).state_class = Some(value);
    } else if let Some(name) = key.strip_suffix("_ENTITY_CATEGORY") {
        entry(commands, name).entity_category = Some(value);
    } else if let Some(name) = key.strip_suffix("_EXPIRE_AFTER") {
        if let Ok(seconds) = value.parse() {
            entry(commands, name).expire_after = Some(seconds);
        }
    } else {
        entry(commands, key).command = value;
    }
}

fn entry<'a>(
    commands: &'a mut BTreeMap<String, CommandConfig>,
    name: &str,
) -> &'a mut CommandConfig {
    commands
        .entry(name.to_string())
        .or_insert_with(|| CommandConfig {
            name: name.to_string(),
            ..CommandConfig::default()
        })
}

impl HostConfig {
    /// Creates a new host configuration with required fields.
    pub fn new(name: String, host: String, user: String) -> Self {
        Self {
            name,
            host,
            port: DEFAULT_SSH_PORT,
            user,
            key_path: None,
            password: None,
            timeout: None,
        }
    }

    /// Builder method to set the SSH port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Builder method to set the SSH key path.
    pub fn with_key_path(mut self, key_path: String) -> Self {
        self.key_path = Some(key_path);
        self
    }

    /// Builder method to set the password.
    pub fn with_password(mut self, password: String) -> Self {
        self.password = Some(password);
        self
    }

    /// Builder method to set the connection timeout string.
    pub fn with_timeout(mut self, timeout: String) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Returns the parsed connection timeout, or the 30s default when the
    /// timeout string is absent or unparsable.
    pub fn connect_timeout(&self) -> Duration {
        self.timeout
            .as_deref()
            .and_then(|t| humantime::parse_duration(t).ok())
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT)
    }

    /// Returns the SSH connection string (user@host:port).
    pub fn connection_string(&self) -> String {
        if self.port == DEFAULT_SSH_PORT {
            format!("{}@{}", self.user, self.host)
        } else {
            format!("{}@{}:{}", self.user, self.host, self.port)
        }
    }
}

impl CommandConfig {
    /// Returns true if the command executes on the local machine.
    pub fn is_local(&self) -> bool {
        self.target_host.is_empty() || self.target_host == LOCAL_TARGET
    }

    /// Returns the parsed repeat interval, or `None` when the frequency
    /// string is unparsable or zero. The scheduler substitutes its default
    /// in that case rather than dropping the command.
    pub fn interval(&self) -> Option<Duration> {
        match humantime::parse_duration(&self.frequency) {
            Ok(d) if !d.is_zero() => Some(d),
            _ => None,
        }
    }
}
