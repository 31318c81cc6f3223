use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use wheelctl_core::{
    MonitorSpec, NodeId, TelemetryConfig, TelemetryEvent, WheelctlError,
};

use crate::node::{NodeService, Scoped, Subscriber};
use crate::stream::{EventHub, TelemetryStream};

/// Deadline handed to each `receive` call.
pub const POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Extra time allowed past the poll deadline before the attempt is dropped.
const POLL_GRACE: Duration = Duration::from_millis(100);

/// Pause after a failed receive.
const RETRY_DELAY: Duration = Duration::from_millis(100);

struct MonitorLoop {
    monitor: String,
    handle: JoinHandle<()>,
}

struct Running {
    cancel: CancellationToken,
    loops: Vec<MonitorLoop>,
}

/// One receive loop per enabled monitor, each feeding the same [`EventHub`].
///
/// Messages whose source fails the monitor's identity filter are dropped
/// silently. Receive failures are logged and polling continues. Events from
/// one monitor arrive in receive order; nothing is promised across monitors.
pub struct TelemetryFanOut {
    node: Arc<dyn NodeService>,
    monitors: Vec<MonitorSpec>,
    default_source: NodeId,
    hub: EventHub,
    running: Mutex<Option<Running>>,
}

impl TelemetryFanOut {
    pub fn new(
        node: Arc<dyn NodeService>,
        monitors: Vec<MonitorSpec>,
        telemetry: &TelemetryConfig,
    ) -> Self {
        Self {
            node,
            monitors,
            default_source: telemetry.expected_source_node_id,
            hub: EventHub::new(),
            running: Mutex::new(None),
        }
    }

    pub fn events(&self) -> &EventHub {
        &self.hub
    }

    /// Register `callback` for every emitted event.
    pub fn on_event<F>(&self, callback: F)
    where
        F: Fn(&TelemetryEvent) + Send + Sync + 'static,
    {
        self.hub.on_event(callback);
    }

    pub fn subscribe(&self) -> TelemetryStream {
        self.hub.subscribe()
    }

    /// Spawn the receive loops. Returns how many are running.
    ///
    /// Disabled monitors and monitors the node refuses a subscription for
    /// are skipped. Calling `start` while already running is a no-op.
    pub fn start(&self) -> usize {
        let mut running = self.lock();
        if let Some(current) = running.as_ref() {
            warn!("telemetry fan-out already running");
            return current.loops.len();
        }

        let cancel = CancellationToken::new();
        let mut loops = Vec::new();
        for monitor in self.monitors.iter().filter(|m| m.enabled) {
            let Some(subscriber) = self
                .node
                .create_subscriber(monitor.message_type, monitor.port)
            else {
                warn!(monitor = %monitor.name, port = monitor.port, "subscription refused, monitor skipped");
                continue;
            };

            let task = ReceiveLoop {
                monitor: monitor.clone(),
                event_name: monitor.event_name(),
                default_source: self.default_source,
                hub: self.hub.clone(),
                cancel: cancel.child_token(),
            };
            let subscriber = Scoped::new(subscriber);
            loops.push(MonitorLoop {
                monitor: monitor.name.clone(),
                handle: tokio::spawn(task.run(subscriber)),
            });
        }

        info!(monitors = loops.len(), "telemetry fan-out started");
        let count = loops.len();
        *running = Some(Running { cancel, loops });
        count
    }

    /// Cancel every receive loop and wait for all of them to finish.
    /// Safe to call repeatedly.
    pub async fn stop(&self) {
        let Some(running) = self.lock().take() else {
            return;
        };
        running.cancel.cancel();
        for MonitorLoop { monitor, handle } in running.loops {
            match handle.await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => debug!(monitor = %monitor, "receive loop cancelled"),
                Err(e) => error!(monitor = %monitor, "receive loop failed: {e}"),
            }
        }
        info!("telemetry fan-out stopped");
    }

    /// Receive loops still alive.
    pub fn running(&self) -> usize {
        self.lock()
            .as_ref()
            .map(|r| r.loops.iter().filter(|l| !l.handle.is_finished()).count())
            .unwrap_or(0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Running>> {
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ─── Receive loop ─────────────────────────────────────────────────────────

struct ReceiveLoop {
    monitor: MonitorSpec,
    event_name: String,
    default_source: NodeId,
    hub: EventHub,
    cancel: CancellationToken,
}

impl ReceiveLoop {
    async fn run(self, mut subscriber: Scoped<dyn Subscriber>) {
        debug!(monitor = %self.monitor.name, port = self.monitor.port, "receive loop started");

        loop {
            let attempt = tokio::select! {
                _ = self.cancel.cancelled() => break,
                r = tokio::time::timeout(POLL_TIMEOUT + POLL_GRACE, subscriber.receive(POLL_TIMEOUT)) => r,
            };

            match attempt {
                Err(_) | Ok(Ok(None)) => continue,
                Ok(Ok(Some(telemetry))) => {
                    let source = telemetry.transfer.source_node_id;
                    if !self.monitor.accepts_source(source, self.default_source) {
                        trace!(monitor = %self.monitor.name, ?source, "message from unexpected source dropped");
                        continue;
                    }
                    self.hub.emit(&TelemetryEvent {
                        name: self.event_name.clone(),
                        payload: telemetry,
                        tier: self.monitor.tier,
                    });
                }
                Ok(Err(e)) => {
                    let err = WheelctlError::MonitorReceiveError {
                        monitor: self.monitor.name.clone(),
                        reason: e.to_string(),
                    };
                    error!(monitor = %self.monitor.name, "{err}");
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(RETRY_DELAY) => {}
                    }
                }
            }
        }

        debug!(monitor = %self.monitor.name, "receive loop stopped");
    }
}
