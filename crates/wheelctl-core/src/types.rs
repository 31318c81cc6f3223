use serde::{Deserialize, Serialize};
use std::fmt;

/// Participant address on the bus.
pub type NodeId = u16;

/// Subject or service port number.
pub type PortId = u16;

// ---------------------------------------------------------------------------
// Tier
// ---------------------------------------------------------------------------

/// Priority class attached to every telemetry event.
///
/// Governs how a consumer paces its use of the event; it has no effect on
/// transport priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    High,
    Mid,
    Low,
}

impl Tier {
    pub fn all() -> &'static [Tier] {
        &[Tier::High, Tier::Mid, Tier::Low]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::High => "high",
            Tier::Mid => "mid",
            Tier::Low => "low",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Tier {
    type Err = crate::error::WheelctlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(Tier::High),
            "mid" => Ok(Tier::Mid),
            "low" => Ok(Tier::Low),
            _ => Err(crate::error::WheelctlError::InvalidConfig(format!(
                "unknown tier '{s}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// MessageType
// ---------------------------------------------------------------------------

/// Published message types a monitor can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Heartbeat,
    OdometryAndVelocity,
    BinarySignal,
    MotorStatus,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Heartbeat => "heartbeat",
            MessageType::OdometryAndVelocity => "odometry_and_velocity",
            MessageType::BinarySignal => "binary_signal",
            MessageType::MotorStatus => "motor_status",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// VelocityCommand
// ---------------------------------------------------------------------------

/// Signed per-wheel velocity targets.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VelocityCommand {
    pub left: f32,
    pub right: f32,
}

impl VelocityCommand {
    pub const ZERO: VelocityCommand = VelocityCommand {
        left: 0.0,
        right: 0.0,
    };

    pub fn new(left: f32, right: f32) -> Self {
        Self { left, right }
    }

    /// Every component negated.
    pub fn reversed(self) -> Self {
        Self {
            left: -self.left,
            right: -self.right,
        }
    }

    /// Same shape, all components zeroed.
    pub fn zeroed(self) -> Self {
        Self::ZERO
    }

    pub fn is_zero(&self) -> bool {
        self.left == 0.0 && self.right == 0.0
    }

    /// Parameter map understood by the `SetVelocity` command.
    pub fn to_params(self) -> crate::request::Params {
        let mut params = crate::request::Params::new();
        params.insert("left".into(), serde_json::json!(self.left));
        params.insert("right".into(), serde_json::json!(self.right));
        params
    }
}

impl fmt::Display for VelocityCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{left: {}, right: {}}}", self.left, self.right)
    }
}

// ---------------------------------------------------------------------------
// Telemetry
// ---------------------------------------------------------------------------

/// Transfer metadata delivered alongside a received message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferMeta {
    /// `None` for anonymous transfers.
    pub source_node_id: Option<NodeId>,
    pub transfer_id: u64,
    /// Monotonic receive timestamp in microseconds.
    pub timestamp_us: u64,
}

/// A received message and the metadata of the transfer that carried it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    pub message: serde_json::Value,
    pub transfer: TransferMeta,
}

/// Tagged event emitted by the telemetry fan-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    /// Lower-cased monitor display name.
    pub name: String,
    pub payload: Telemetry,
    pub tier: Tier,
}
