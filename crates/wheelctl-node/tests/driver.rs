//! End-to-end wiring of the orchestrator and fan-out over a loopback node.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::json;
use wheelctl_core::{commands, Config, Tier, VelocityCommand};
use wheelctl_node::{
    Intent, LoopPlan, LoopbackNode, NodeService, Orchestrator, Reply, TelemetryFanOut,
};

const ODOMETRY_PORT: u16 = 1100;

struct Driver {
    node: LoopbackNode,
    orchestrator: Orchestrator,
    fanout: TelemetryFanOut,
}

async fn driver(config: &Config) -> Driver {
    let node = LoopbackNode::new();
    assert!(node.start().await);
    let shared: Arc<dyn NodeService> = Arc::new(node.clone());
    let orchestrator = Orchestrator::new(shared.clone(), config.driver.registry().unwrap());
    let fanout = TelemetryFanOut::new(
        shared,
        config.driver.monitors.clone(),
        &config.driver.telemetry,
    );
    Driver {
        node,
        orchestrator,
        fanout,
    }
}

/// Reply to velocity commands by publishing matching odometry.
fn echo_odometry(node: &LoopbackNode) {
    let publisher = node.clone();
    node.set_handler(move |call| {
        if let Some(velocity) = call.velocity() {
            publisher.publish(
                ODOMETRY_PORT,
                Some(call.server_node_id),
                json!({ "left_velocity": velocity[0], "right_velocity": velocity[1] }),
            );
        }
        Reply::Ack
    });
}

#[tokio::test]
async fn velocity_command_round_trips_as_high_tier_telemetry() {
    let config = Config::default();
    let d = driver(&config).await;
    echo_odometry(&d.node);

    let mut events = d.fanout.subscribe();
    assert_eq!(d.fanout.start(), 4);
    d.orchestrator.start();

    assert!(
        d.orchestrator
            .apply(Intent::Target {
                left: 0.75,
                right: -0.75
            })
            .await
    );

    let event = tokio::time::timeout(Duration::from_secs(2), events.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.name, "odometry");
    assert_eq!(event.tier, Tier::High);
    assert_eq!(event.payload.message["left_velocity"], 0.75);

    d.orchestrator.stop().await;
    d.fanout.stop().await;
}

#[tokio::test(start_paused = true)]
async fn silent_actuator_fails_commands_within_their_timeout() {
    let config = Config::default();
    let d = driver(&config).await;
    d.orchestrator.start();
    d.node.set_reply(Reply::Silent);

    let started = tokio::time::Instant::now();
    let ok = d
        .orchestrator
        .send_command(
            commands::SET_VELOCITY,
            &VelocityCommand::new(1.0, -1.0).to_params(),
        )
        .await;
    assert!(!ok);
    assert!(started.elapsed() < Duration::from_millis(1100));
    assert_eq!(d.node.open_clients(), 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_leaves_actuator_zeroed_and_handles_released() {
    let config = Config::default();
    let d = driver(&config).await;
    d.fanout.start();
    d.orchestrator.start();

    assert!(
        d.orchestrator
            .start_velocity_loop(VelocityCommand::new(0.4, 0.4), LoopPlan::cyclic(100))
            .await
    );
    tokio::time::sleep(Duration::from_millis(730)).await;

    d.orchestrator.stop().await;
    d.fanout.stop().await;

    let calls = d.node.velocity_calls();
    assert_eq!(calls.last(), Some(&vec![0.0, 0.0]));
    assert!(calls[..calls.len() - 1].iter().all(|c| *c == vec![0.4, 0.4]));
    assert_eq!(d.node.open_clients(), 0);
    assert_eq!(d.node.open_subscribers(), 0);
    assert_eq!(d.fanout.running(), 0);
}

#[tokio::test]
async fn fan_out_can_be_restarted() {
    let config = Config::default();
    let d = driver(&config).await;
    assert_eq!(d.fanout.start(), 4);
    d.fanout.stop().await;
    assert_eq!(d.fanout.start(), 4);

    let mut events = d.fanout.subscribe();
    d.node.publish(7509, Some(28), json!({ "uptime_sec": 3 }));
    let event = tokio::time::timeout(Duration::from_secs(2), events.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.name, "heartbeat");
    assert_eq!(event.tier, Tier::Low);
    d.fanout.stop().await;
}
