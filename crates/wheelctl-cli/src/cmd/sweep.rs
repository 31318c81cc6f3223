use crate::output::print_json;
use crate::sim::SimulatedActuator;
use anyhow::Context;
use clap::Args;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use wheelctl_core::{CommandRegistry, Config, VelocityCommand};
use wheelctl_node::{LoopPlan, LoopbackNode, NodeService, Orchestrator};

#[derive(Args)]
pub struct SweepArgs {
    /// Left wheel target
    #[arg(long, allow_negative_numbers = true)]
    left: f32,

    /// Right wheel target
    #[arg(long, allow_negative_numbers = true)]
    right: f32,

    /// Command interval; omit to send a single command
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Seconds per direction
    #[arg(long, default_value = "5.0")]
    duration: f64,

    /// Forward + reverse cycles
    #[arg(long, default_value = "20")]
    cycles: u32,
}

#[derive(Serialize)]
struct SweepReport {
    commands: usize,
    zero_commands: usize,
    final_velocity: VelocityCommand,
    interrupted: bool,
}

pub fn run(config: &Config, args: SweepArgs, json: bool) -> anyhow::Result<()> {
    let registry = config
        .driver
        .registry()
        .context("invalid command table")?;
    let plan = LoopPlan {
        interval_ms: args.interval_ms,
        duration_per_direction_secs: args.duration,
        cycles: args.cycles,
    };
    plan.iterations_per_direction()?;
    let initial = VelocityCommand::new(args.left, args.right);

    let rt = tokio::runtime::Runtime::new()?;
    let report = rt.block_on(sweep(config, registry, initial, plan))?;

    if json {
        print_json(&report)?;
    } else {
        println!(
            "Sent {} velocity commands ({} zero). Final velocity {}.",
            report.commands, report.zero_commands, report.final_velocity
        );
        if report.interrupted {
            println!("Interrupted; actuator zeroed.");
        }
    }
    Ok(())
}

async fn sweep(
    config: &Config,
    registry: CommandRegistry,
    initial: VelocityCommand,
    plan: LoopPlan,
) -> anyhow::Result<SweepReport> {
    let node = LoopbackNode::new();
    if !node.start().await {
        anyhow::bail!("node failed to start");
    }
    let actuator = SimulatedActuator::spawn(&node, &config.driver);
    let orchestrator = Orchestrator::new(Arc::new(node.clone()), registry);
    orchestrator.start();

    let cyclic = plan.interval_ms.is_some();
    let started = orchestrator.start_velocity_loop(initial, plan).await;

    let mut interrupted = false;
    if started && cyclic {
        tokio::select! {
            _ = orchestrator.wait_velocity_loop() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, stopping velocity loop");
                interrupted = true;
            }
        }
    }

    orchestrator.stop().await;
    let final_velocity = actuator.velocity();
    actuator.shutdown().await;
    node.stop().await;

    if !started {
        anyhow::bail!("velocity command failed; see log for details");
    }

    let calls = node.velocity_calls();
    Ok(SweepReport {
        commands: calls.len(),
        zero_commands: calls
            .iter()
            .filter(|c| c.iter().all(|v| *v == 0.0))
            .count(),
        final_velocity,
        interrupted,
    })
}
