pub mod config;
pub mod error;
pub mod registry;
pub mod request;
pub mod types;

pub use config::{
    AppConfig, CanConfig, Config, ConfigWarning, DriverConfig, LogLevel, LoggingConfig,
    TelemetryConfig, WarnLevel, ACTUATOR_NODE_ID,
};
pub use error::{Result, WheelctlError};
pub use registry::{commands, CommandRegistry, CommandSpec, MonitorSpec};
pub use request::{Params, Request, RequestKind, Response};
pub use types::{
    MessageType, NodeId, PortId, Telemetry, TelemetryEvent, Tier, TransferMeta, VelocityCommand,
};
