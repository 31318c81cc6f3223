//! `wheelctl-node`: command orchestration and telemetry fan-out for a
//! wheel actuator reachable over a request/response + pub/sub node.
//!
//! # Architecture
//!
//! ```text
//!                    NodeService  (bus connection, handles)
//!                   ╱           ╲
//!   CommandExecutor               TelemetryFanOut
//!   ← one scoped Client per call  ← one Subscriber + task per monitor
//!         │                              │  identity filter, tier tag
//!         ▼                              ▼
//!   Orchestrator                  EventHub ── callbacks
//!   ← velocity loop session            └──── TelemetryStream (futures::Stream)
//!     cancel token + join handle               │
//!                                              ▼
//!                                  TierPacer / LinkWatchdog (consumer side)
//! ```
//!
//! The orchestrator and the fan-out share nothing but the node service.
//! [`LoopbackNode`] is an in-memory node used by tests and by the CLI's
//! simulation mode.
//!
//! # Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use wheelctl_core::{Config, VelocityCommand};
//! use wheelctl_node::{LoopPlan, LoopbackNode, NodeService, Orchestrator, TelemetryFanOut};
//!
//! let config = Config::default();
//! let node = Arc::new(LoopbackNode::new());
//! node.start().await;
//!
//! let fanout = TelemetryFanOut::new(node.clone(), config.driver.monitors.clone(), &config.driver.telemetry);
//! fanout.on_event(|e| println!("{} [{}]", e.name, e.tier));
//! fanout.start();
//!
//! let orchestrator = Orchestrator::new(node.clone(), config.driver.registry()?);
//! orchestrator.start();
//! orchestrator
//!     .start_velocity_loop(VelocityCommand::new(1.0, 1.0), LoopPlan::cyclic(100))
//!     .await;
//! orchestrator.stop().await;
//! fanout.stop().await;
//! ```

pub mod error;
pub mod executor;
pub mod fanout;
pub mod intent;
pub mod loopback;
pub mod node;
pub mod orchestrator;
pub mod pacing;
pub mod stream;

pub use error::NodeError;
pub use executor::CommandExecutor;
pub use fanout::TelemetryFanOut;
pub use intent::{ControlMode, Intent, Operation};
pub use loopback::{CallRecord, LoopbackNode, Reply};
pub use node::{Client, Close, NodeService, Scoped, Subscriber};
pub use orchestrator::{LoopPlan, Orchestrator};
pub use pacing::{LinkState, LinkWatchdog, PacedBatch, TierPacer};
pub use stream::{EventHub, TelemetryStream};

/// Convenience `Result` alias for node handle operations.
pub type Result<T> = std::result::Result<T, NodeError>;
