use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;
use wheelctl_core::{DriverConfig, MessageType, NodeId, PortId, VelocityCommand};
use wheelctl_node::{LoopbackNode, Reply};

const ODOMETRY_PERIOD: Duration = Duration::from_millis(50);
const HEARTBEAT_PERIOD: Duration = Duration::from_secs(1);

/// A stand-in actuator on a [`LoopbackNode`].
///
/// Acknowledges every command, remembers the last velocity target, and
/// publishes heartbeat and odometry for it on the configured ports.
pub struct SimulatedActuator {
    task: JoinHandle<()>,
    velocity: Arc<Mutex<VelocityCommand>>,
}

impl SimulatedActuator {
    pub fn spawn(node: &LoopbackNode, driver: &DriverConfig) -> Self {
        let velocity = Arc::new(Mutex::new(VelocityCommand::ZERO));

        let target = velocity.clone();
        node.set_handler(move |call| {
            if let Some(v) = call.velocity() {
                if let &[left, right] = v.as_slice() {
                    *lock(&target) = VelocityCommand::new(left, right);
                }
            }
            Reply::Ack
        });

        let publisher = Publisher {
            node: node.clone(),
            source: driver.telemetry.expected_source_node_id,
            heartbeat_port: port_for(driver, MessageType::Heartbeat),
            odometry_port: port_for(driver, MessageType::OdometryAndVelocity),
            velocity: velocity.clone(),
        };
        Self {
            task: tokio::spawn(publisher.run()),
            velocity,
        }
    }

    pub fn velocity(&self) -> VelocityCommand {
        *lock(&self.velocity)
    }

    pub async fn shutdown(self) {
        self.task.abort();
        let _ = self.task.await;
    }
}

fn port_for(driver: &DriverConfig, message_type: MessageType) -> Option<PortId> {
    driver
        .monitors
        .iter()
        .find(|m| m.message_type == message_type)
        .map(|m| m.port)
}

struct Publisher {
    node: LoopbackNode,
    source: NodeId,
    heartbeat_port: Option<PortId>,
    odometry_port: Option<PortId>,
    velocity: Arc<Mutex<VelocityCommand>>,
}

impl Publisher {
    async fn run(self) {
        let started = Instant::now();
        let mut heartbeat = tokio::time::interval(HEARTBEAT_PERIOD);
        let mut odometry = tokio::time::interval(ODOMETRY_PERIOD);
        let mut position = (0.0f64, 0.0f64);

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    if let Some(port) = self.heartbeat_port {
                        self.node.publish(port, Some(self.source), json!({
                            "uptime_sec": started.elapsed().as_secs(),
                            "health": "nominal",
                            "mode": "operational",
                        }));
                    }
                }
                _ = odometry.tick() => {
                    let v = *lock(&self.velocity);
                    let dt = ODOMETRY_PERIOD.as_secs_f64();
                    position.0 += f64::from(v.left) * dt;
                    position.1 += f64::from(v.right) * dt;
                    if let Some(port) = self.odometry_port {
                        let reached = self.node.publish(port, Some(self.source), json!({
                            "left_velocity": v.left,
                            "right_velocity": v.right,
                            "left_position": position.0,
                            "right_position": position.1,
                        }));
                        if reached == 0 {
                            debug!(port, "odometry published with no subscribers");
                        }
                    }
                }
            }
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
