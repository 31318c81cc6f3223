use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{Result, WheelctlError};
use crate::request::RequestKind;
use crate::types::{MessageType, NodeId, PortId, Tier};

/// Names of the commands the default driver configuration defines.
pub mod commands {
    pub const MOTOR_ENABLE: &str = "MotorEnable";
    pub const SET_VELOCITY: &str = "SetVelocity";
    pub const OPERATE_BRAKE: &str = "OperateBrake";
    pub const SET_PID_PARAMS: &str = "SetPidParams";
    pub const SET_MODE: &str = "SetMode";
}

// ---------------------------------------------------------------------------
// CommandSpec
// ---------------------------------------------------------------------------

/// Where and how a named command is sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Filled from the registry key; not part of the serialized form.
    #[serde(skip)]
    pub name: String,
    pub request_type: RequestKind,
    pub server_node_id: NodeId,
    pub port: PortId,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: f64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub display_name: String,
}

pub(crate) fn default_timeout_secs() -> f64 {
    1.0
}

pub(crate) fn default_enabled() -> bool {
    true
}

impl CommandSpec {
    pub fn new(request_type: RequestKind, server_node_id: NodeId, port: PortId) -> Self {
        Self {
            name: String::new(),
            request_type,
            server_node_id,
            port,
            timeout_secs: default_timeout_secs(),
            enabled: default_enabled(),
            display_name: String::new(),
        }
    }

    pub fn with_display_name(mut self, display_name: &str) -> Self {
        self.display_name = display_name.to_string();
        self
    }

    pub fn with_timeout(mut self, timeout_secs: f64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// The call deadline, or `None` unless `timeout_secs` is positive and
    /// fits in a [`Duration`].
    pub fn checked_timeout(&self) -> Option<Duration> {
        if self.timeout_secs > 0.0 {
            Duration::try_from_secs_f64(self.timeout_secs).ok()
        } else {
            None
        }
    }

    pub fn timeout(&self) -> Duration {
        self.checked_timeout().unwrap_or(Duration::MAX)
    }
}

// ---------------------------------------------------------------------------
// MonitorSpec
// ---------------------------------------------------------------------------

/// A telemetry subscription and the tier its events are tagged with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorSpec {
    pub name: String,
    pub message_type: MessageType,
    pub port: PortId,
    pub tier: Tier,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Source node ids accepted by this monitor. `None` falls back to the
    /// driver-wide expected source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accept_sources: Option<Vec<NodeId>>,
}

impl MonitorSpec {
    pub fn new(name: &str, message_type: MessageType, port: PortId, tier: Tier) -> Self {
        Self {
            name: name.to_string(),
            message_type,
            port,
            tier,
            enabled: true,
            accept_sources: None,
        }
    }

    /// Event name: the display name, lower-cased.
    pub fn event_name(&self) -> String {
        self.name.to_lowercase()
    }

    /// Whether a transfer from `source` passes this monitor's identity filter.
    pub fn accepts_source(&self, source: Option<NodeId>, default_source: NodeId) -> bool {
        let Some(source) = source else {
            return false;
        };
        match &self.accept_sources {
            Some(allowed) => allowed.contains(&source),
            None => source == default_source,
        }
    }
}

// ---------------------------------------------------------------------------
// CommandRegistry
// ---------------------------------------------------------------------------

/// Immutable name → [`CommandSpec`] mapping.
#[derive(Debug, Clone, Default)]
pub struct CommandRegistry {
    specs: BTreeMap<String, CommandSpec>,
}

impl CommandRegistry {
    /// Build the registry, stamping each command with its key and rejecting
    /// timeouts that are not a positive, representable duration.
    pub fn from_specs(specs: BTreeMap<String, CommandSpec>) -> Result<Self> {
        let mut out = BTreeMap::new();
        for (name, mut spec) in specs {
            if spec.checked_timeout().is_none() {
                return Err(WheelctlError::InvalidConfig(format!(
                    "command '{name}' has invalid timeout {}",
                    spec.timeout_secs
                )));
            }
            spec.name = name.clone();
            out.insert(name, spec);
        }
        Ok(Self { specs: out })
    }

    pub fn get(&self, name: &str) -> Option<&CommandSpec> {
        self.specs.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.specs.contains_key(name)
    }

    /// Look up an enabled command.
    pub fn resolve(&self, name: &str) -> Result<&CommandSpec> {
        let spec = self
            .specs
            .get(name)
            .ok_or_else(|| WheelctlError::UnknownCommand(name.to_string()))?;
        if !spec.enabled {
            return Err(WheelctlError::Disabled(name.to_string()));
        }
        Ok(spec)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.specs.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}
