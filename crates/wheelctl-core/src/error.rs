use thiserror::Error;

#[derive(Debug, Error)]
pub enum WheelctlError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("command disabled: {0}")]
    Disabled(String),

    #[error("orchestrator not started")]
    NotStarted,

    #[error("channel unavailable for command '{command}'")]
    ChannelUnavailable { command: String },

    #[error("command '{command}' timed out after {timeout_secs}s")]
    CommandTimeout { command: String, timeout_secs: f64 },

    #[error("transport error on command '{command}': {reason}")]
    CommandTransportError { command: String, reason: String },

    #[error("command '{0}' rejected by remote")]
    Rejected(String),

    #[error("invalid params for '{command}': {reason}")]
    InvalidParams { command: String, reason: String },

    #[error("receive failed on monitor '{monitor}': {reason}")]
    MonitorReceiveError { monitor: String, reason: String },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, WheelctlError>;
