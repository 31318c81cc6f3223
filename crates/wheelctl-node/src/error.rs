use thiserror::Error;

/// Faults raised by node service handles.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("handle already closed")]
    Closed,

    #[error("transport fault: {0}")]
    Fault(String),
}
