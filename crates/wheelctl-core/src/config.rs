use crate::error::{Result, WheelctlError};
use crate::registry::{commands, CommandRegistry, CommandSpec, MonitorSpec};
use crate::request::RequestKind;
use crate::types::{MessageType, NodeId, Tier};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// Node id of the wheel actuator on the default bus layout.
pub const ACTUATOR_NODE_ID: NodeId = 28;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// CanConfig
// ---------------------------------------------------------------------------

/// Local node parameters handed to the node service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanConfig {
    #[serde(default = "default_interface")]
    pub interface: String,
    #[serde(default = "default_local_node_id")]
    pub node_id: NodeId,
    #[serde(default = "default_mtu")]
    pub mtu: usize,
    #[serde(default = "default_bitrate")]
    pub bitrate: u32,
}

fn default_interface() -> String {
    "can1".to_string()
}

fn default_local_node_id() -> NodeId {
    100
}

fn default_mtu() -> usize {
    8
}

fn default_bitrate() -> u32 {
    500_000
}

impl Default for CanConfig {
    fn default() -> Self {
        Self {
            interface: default_interface(),
            node_id: default_local_node_id(),
            mtu: default_mtu(),
            bitrate: default_bitrate(),
        }
    }
}

// ---------------------------------------------------------------------------
// TelemetryConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Source accepted by monitors without their own `accept_sources`.
    #[serde(default = "default_expected_source")]
    pub expected_source_node_id: NodeId,
    /// Link is reported lost when no heartbeat arrives within this window.
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
}

fn default_expected_source() -> NodeId {
    ACTUATOR_NODE_ID
}

fn default_heartbeat_timeout_ms() -> u64 {
    2000
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            expected_source_node_id: default_expected_source(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
        }
    }
}

// ---------------------------------------------------------------------------
// DriverConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverConfig {
    #[serde(default)]
    pub can: CanConfig,
    #[serde(default = "default_monitors")]
    pub monitors: Vec<MonitorSpec>,
    #[serde(default = "default_commands")]
    pub commands: BTreeMap<String, CommandSpec>,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

fn default_monitors() -> Vec<MonitorSpec> {
    vec![
        MonitorSpec::new("Heartbeat", MessageType::Heartbeat, 7509, Tier::Low),
        MonitorSpec::new(
            "Odometry",
            MessageType::OdometryAndVelocity,
            1100,
            Tier::High,
        ),
        MonitorSpec::new("BinarySignal", MessageType::BinarySignal, 1004, Tier::Mid),
        MonitorSpec::new("MotorStatus", MessageType::MotorStatus, 1101, Tier::Mid),
    ]
}

fn default_commands() -> BTreeMap<String, CommandSpec> {
    let node = ACTUATOR_NODE_ID;
    [
        (
            commands::MOTOR_ENABLE,
            CommandSpec::new(RequestKind::Enable, node, 113).with_display_name("Motor Enable"),
        ),
        (
            commands::SET_VELOCITY,
            CommandSpec::new(RequestKind::SetTargetValue, node, 117)
                .with_display_name("Set Velocity"),
        ),
        (
            commands::OPERATE_BRAKE,
            CommandSpec::new(RequestKind::OperateRemoteDevice, node, 121)
                .with_display_name("Operate Brake"),
        ),
        (
            commands::SET_PID_PARAMS,
            CommandSpec::new(RequestKind::PidParameter, node, 125)
                .with_display_name("Set PID Parameters"),
        ),
        (
            commands::SET_MODE,
            CommandSpec::new(RequestKind::SetMode, node, 119).with_display_name("Set Motor Mode"),
        ),
    ]
    .into_iter()
    .map(|(name, spec)| (name.to_string(), spec))
    .collect()
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            can: CanConfig::default(),
            monitors: default_monitors(),
            commands: default_commands(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl DriverConfig {
    /// Build the command registry from the configured command table.
    pub fn registry(&self) -> Result<CommandRegistry> {
        CommandRegistry::from_specs(self.commands.clone())
    }
}

// ---------------------------------------------------------------------------
// LoggingConfig / AppConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    /// `None` disables file logging.
    #[serde(default = "default_log_file")]
    pub file: Option<PathBuf>,
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u64,
    #[serde(default = "default_backup_count")]
    pub backup_count: u32,
    #[serde(default)]
    pub enable_console: bool,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_log_file() -> Option<PathBuf> {
    Some(PathBuf::from("wheelctl.log"))
}

fn default_max_size_mb() -> u64 {
    10
}

fn default_backup_count() -> u32 {
    3
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            file: default_log_file(),
            max_size_mb: default_max_size_mb(),
            backup_count: default_backup_count(),
            enable_console: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub debug: bool,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Complete configuration, loaded once and passed into each component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub driver: DriverConfig,
    #[serde(default)]
    pub app: AppConfig,
}

impl Config {
    /// Load YAML from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)?;
        Self::from_yaml(&data)
    }

    pub fn from_yaml(data: &str) -> Result<Self> {
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        let cfg: Config = serde_yaml::from_str(data)?;
        Ok(cfg)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        let mut seen = HashSet::new();
        for monitor in &self.driver.monitors {
            if !seen.insert(monitor.event_name()) {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("duplicate monitor name '{}'", monitor.name),
                });
            }
            if monitor.port == 0 {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!("monitor '{}' uses port 0", monitor.name),
                });
            }
            if matches!(&monitor.accept_sources, Some(list) if list.is_empty()) {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!(
                        "monitor '{}' has an empty accept_sources list and will drop every message",
                        monitor.name
                    ),
                });
            }
        }

        if self.driver.monitors.iter().all(|m| !m.enabled) {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "no monitors are enabled".to_string(),
            });
        }

        for (name, spec) in &self.driver.commands {
            if spec.checked_timeout().is_none() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!(
                        "command '{name}' has invalid timeout {}",
                        spec.timeout_secs
                    ),
                });
            }
            if spec.port == 0 {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!("command '{name}' uses port 0"),
                });
            }
            if spec.server_node_id == self.driver.can.node_id {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!(
                        "command '{name}' targets the local node id {}",
                        spec.server_node_id
                    ),
                });
            }
        }

        match self.driver.commands.get(commands::SET_VELOCITY) {
            None => warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "no 'SetVelocity' command: velocity loops are unavailable".to_string(),
            }),
            Some(spec) if spec.request_type != RequestKind::SetTargetValue => {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!(
                        "'SetVelocity' must use request_type set_target_value, found {}",
                        spec.request_type
                    ),
                });
            }
            Some(_) => {}
        }

        if let Err(WheelctlError::InvalidConfig(msg)) = self.app.logging.level.parse::<LogLevel>() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: msg,
            });
        }

        warnings
    }
}

/// Accepted values for `app.logging.level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl std::str::FromStr for LogLevel {
    type Err = WheelctlError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" | "critical" => Ok(LogLevel::Error),
            _ => Err(WheelctlError::InvalidConfig(format!(
                "unknown logging level '{s}'"
            ))),
        }
    }
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}
