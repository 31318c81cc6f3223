use crate::output::print_json_line;
use crate::sim::SimulatedActuator;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::warn;
use wheelctl_core::{Config, TelemetryEvent};
use wheelctl_node::{
    LinkState, LinkWatchdog, LoopbackNode, NodeService, PacedBatch, TelemetryFanOut, TierPacer,
};

const WATCHDOG_PERIOD: Duration = Duration::from_millis(500);

pub fn run(config: &Config, seconds: f64, json: bool) -> anyhow::Result<()> {
    if !(seconds.is_finite() && seconds > 0.0) {
        anyhow::bail!("--seconds must be positive, got {seconds}");
    }
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(monitor(config, Duration::from_secs_f64(seconds), json))
}

async fn monitor(config: &Config, duration: Duration, json: bool) -> anyhow::Result<()> {
    let node = Arc::new(LoopbackNode::new());
    if !node.start().await {
        anyhow::bail!("node failed to start");
    }

    let fanout = TelemetryFanOut::new(
        node.clone(),
        config.driver.monitors.clone(),
        &config.driver.telemetry,
    );
    let watchdog = Arc::new(Mutex::new(LinkWatchdog::from_config(&config.driver.telemetry)));
    let observer = watchdog.clone();
    fanout.on_event(move |event| {
        if let Some(state) = lock(&observer).observe(event) {
            report_link(state, json);
        }
    });
    let events = fanout.subscribe();
    if fanout.start() == 0 {
        anyhow::bail!("no monitors could be started");
    }
    let actuator = SimulatedActuator::spawn(&node, &config.driver);

    let printer = tokio::spawn(TierPacer::new().drive(events, move |batch| print_batch(&batch, json)));

    let deadline = tokio::time::sleep(duration);
    tokio::pin!(deadline);
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);
    let mut check = tokio::time::interval(WATCHDOG_PERIOD);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = &mut interrupt => break,
            _ = check.tick() => {
                if let Some(state) = lock(&watchdog).check() {
                    report_link(state, json);
                }
            }
        }
    }

    actuator.shutdown().await;
    fanout.stop().await;
    drop(fanout);
    if let Err(e) = printer.await {
        warn!("telemetry printer failed: {e}");
    }
    node.stop().await;
    Ok(())
}

fn print_batch(batch: &PacedBatch, json: bool) {
    for event in &batch.events {
        if json {
            if let Err(e) = print_json_line(event) {
                warn!("failed to print event: {e}");
            }
        } else {
            println!("{}", format_event(event));
        }
    }
}

fn format_event(event: &TelemetryEvent) -> String {
    let at = i64::try_from(event.payload.transfer.timestamp_us)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_micros)
        .map(|t| t.format("%H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{at}  {:<4}  {:<13}  {}",
        event.tier.as_str(),
        event.name,
        event.payload.message
    )
}

fn report_link(state: LinkState, json: bool) {
    let label = match state {
        LinkState::Up => "up",
        LinkState::Lost => "lost",
        LinkState::Unknown => "unknown",
    };
    if json {
        println!("{}", serde_json::json!({ "link": label }));
    } else {
        println!("link {label}");
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
