use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use wheelctl_core::{
    commands, CommandRegistry, Params, RequestKind, VelocityCommand, WheelctlError,
};

use crate::executor::{report, CommandExecutor};
use crate::intent::{Action, Intent};
use crate::node::NodeService;

/// Pause after each phase-boundary zero command.
pub const SETTLE_DELAY: Duration = Duration::from_secs(2);

/// Brake `method` values.
pub const BRAKE_OPEN: u8 = 0;
pub const BRAKE_CLOSE: u8 = 1;

const DEFAULT_BRAKE_NAME: &str = "m-brake";

// ─── LoopPlan ─────────────────────────────────────────────────────────────

/// Shape of a velocity loop.
///
/// Without an interval the loop is single-shot: one `SetVelocity` and done.
/// With one, each direction runs for `duration_per_direction_secs`, and a
/// cycle is one forward plus one reverse phase.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopPlan {
    pub interval_ms: Option<u64>,
    pub duration_per_direction_secs: f64,
    pub cycles: u32,
}

impl Default for LoopPlan {
    fn default() -> Self {
        Self {
            interval_ms: None,
            duration_per_direction_secs: 5.0,
            cycles: 20,
        }
    }
}

impl LoopPlan {
    pub fn single_shot() -> Self {
        Self::default()
    }

    pub fn cyclic(interval_ms: u64) -> Self {
        Self {
            interval_ms: Some(interval_ms),
            ..Self::default()
        }
    }

    pub fn with_duration(mut self, secs: f64) -> Self {
        self.duration_per_direction_secs = secs;
        self
    }

    pub fn with_cycles(mut self, cycles: u32) -> Self {
        self.cycles = cycles;
        self
    }

    /// Commands issued per direction phase.
    ///
    /// Computed in whole milliseconds so that e.g. 0.3 s at 100 ms yields 3.
    pub fn iterations_per_direction(&self) -> wheelctl_core::Result<u64> {
        let invalid = |reason: String| WheelctlError::InvalidParams {
            command: commands::SET_VELOCITY.to_string(),
            reason,
        };
        let interval_ms = match self.interval_ms {
            None => return Ok(1),
            Some(0) => return Err(invalid("interval must be positive".into())),
            Some(ms) => ms,
        };
        let secs = self.duration_per_direction_secs;
        if !(secs.is_finite() && secs >= 0.0) {
            return Err(invalid(format!("invalid duration per direction {secs}")));
        }
        let duration_ms = (secs * 1000.0).round() as u64;
        Ok(duration_ms / interval_ms)
    }
}

// ─── Orchestrator ─────────────────────────────────────────────────────────

struct Shared {
    executor: CommandExecutor,
    active: AtomicBool,
}

struct VelocitySession {
    cancel: CancellationToken,
    /// Cancelled by the session task when it exits, whatever the cause.
    done: CancellationToken,
    handle: JoinHandle<()>,
}

/// Entry point for commands and the velocity loop.
///
/// At most one velocity session runs at a time. Every session ends with the
/// actuator commanded to zero, and stopping one returns only after that
/// zero command was issued.
pub struct Orchestrator {
    shared: Arc<Shared>,
    session: Mutex<Option<VelocitySession>>,
}

impl Orchestrator {
    pub fn new(node: Arc<dyn NodeService>, registry: CommandRegistry) -> Self {
        Self {
            shared: Arc::new(Shared {
                executor: CommandExecutor::new(node, Arc::new(registry)),
                active: AtomicBool::new(false),
            }),
            session: Mutex::new(None),
        }
    }

    pub fn start(&self) {
        self.shared.active.store(true, Ordering::SeqCst);
        info!(
            commands = self.shared.executor.registry().len(),
            "orchestrator started"
        );
    }

    pub fn is_started(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }

    pub fn registry(&self) -> &CommandRegistry {
        self.shared.executor.registry()
    }

    /// Send a named command; `false` on any failure, which is logged.
    pub async fn send_command(&self, name: &str, params: &Params) -> bool {
        self.shared.send(name, params).await
    }

    pub async fn try_send_command(&self, name: &str, params: &Params) -> wheelctl_core::Result<()> {
        self.shared.try_send(name, params).await
    }

    /// Begin a velocity loop, tearing down any running one first.
    ///
    /// Single-shot plans send `initial` once and return the outcome.
    /// Cyclic plans return `true` once the session is running.
    pub async fn start_velocity_loop(&self, initial: VelocityCommand, plan: LoopPlan) -> bool {
        let mut session = self.session.lock().await;
        finish_session(session.take()).await;

        if let Err(e) = self.shared.check_velocity_ready() {
            warn!(command = commands::SET_VELOCITY, "velocity loop not started: {e}");
            return false;
        }

        let iterations = match plan.iterations_per_direction() {
            Ok(n) => n,
            Err(e) => {
                error!(command = commands::SET_VELOCITY, "{e}");
                return false;
            }
        };

        let Some(interval_ms) = plan.interval_ms else {
            debug!(velocity = %initial, "single-shot velocity command");
            return self
                .shared
                .send(commands::SET_VELOCITY, &initial.to_params())
                .await;
        };

        info!(
            velocity = %initial,
            interval_ms,
            iterations_per_direction = iterations,
            cycles = plan.cycles,
            "velocity loop started"
        );

        let cancel = CancellationToken::new();
        let done = CancellationToken::new();
        let run = SessionRun {
            shared: self.shared.clone(),
            cancel: cancel.clone(),
            interval: Duration::from_millis(interval_ms),
            iterations,
            cycles: plan.cycles,
        };
        let guard = done.clone().drop_guard();
        let handle = tokio::spawn(async move {
            let _guard = guard;
            run.execute(initial).await;
        });

        *session = Some(VelocitySession {
            cancel,
            done,
            handle,
        });
        true
    }

    /// Cancel the running velocity loop and wait for its zero command.
    pub async fn stop_velocity_loop(&self) {
        let mut session = self.session.lock().await;
        finish_session(session.take()).await;
    }

    pub async fn is_velocity_loop_running(&self) -> bool {
        self.session
            .lock()
            .await
            .as_ref()
            .is_some_and(|s| !s.handle.is_finished())
    }

    /// Wait until the current velocity loop ends on its own.
    pub async fn wait_velocity_loop(&self) {
        let done = match self.session.lock().await.as_ref() {
            Some(session) => session.done.clone(),
            None => return,
        };
        done.cancelled().await;
    }

    /// Reject further commands and tear down the velocity loop.
    pub async fn stop(&self) {
        self.shared.active.store(false, Ordering::SeqCst);
        self.stop_velocity_loop().await;
        info!("orchestrator stopped");
    }

    /// Carry out an operator intent.
    pub async fn apply(&self, intent: Intent) -> bool {
        debug!(?intent, "applying intent");
        match intent.action() {
            Action::Command { name, params } => self.send_command(name, &params).await,
            Action::Velocity(target) => {
                self.start_velocity_loop(target, LoopPlan::single_shot())
                    .await
            }
            Action::StopVelocity => {
                self.stop_velocity_loop().await;
                true
            }
        }
    }
}

async fn finish_session(session: Option<VelocitySession>) {
    let Some(session) = session else {
        return;
    };
    session.cancel.cancel();
    if let Err(e) = session.handle.await {
        error!("velocity loop task failed: {e}");
    }
}

impl Shared {
    async fn send(&self, name: &str, params: &Params) -> bool {
        report(name, self.try_send(name, params).await)
    }

    async fn try_send(&self, name: &str, params: &Params) -> wheelctl_core::Result<()> {
        if !self.active.load(Ordering::SeqCst) {
            return Err(WheelctlError::NotStarted);
        }
        self.dispatch(name, params).await
    }

    /// Resolve, normalise and send, regardless of the started flag.
    async fn dispatch(&self, name: &str, params: &Params) -> wheelctl_core::Result<()> {
        let spec = self.executor.registry().resolve(name)?;
        if spec.request_type == RequestKind::OperateRemoteDevice {
            let params = brake_defaults(params);
            return self.executor.try_send(name, &params).await;
        }
        self.executor.try_send(name, params).await
    }

    fn check_velocity_ready(&self) -> wheelctl_core::Result<()> {
        if !self.active.load(Ordering::SeqCst) {
            return Err(WheelctlError::NotStarted);
        }
        self.executor.registry().resolve(commands::SET_VELOCITY)?;
        Ok(())
    }
}

/// Fill `method`, `name` and `param` where the caller left them out.
fn brake_defaults(params: &Params) -> Params {
    let mut out = params.clone();
    out.entry("method").or_insert(Value::from(BRAKE_OPEN));
    out.entry("name")
        .or_insert(Value::from(DEFAULT_BRAKE_NAME));
    out.entry("param").or_insert(Value::from(""));
    out
}

// ─── Session task ─────────────────────────────────────────────────────────

struct SessionRun {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    interval: Duration,
    iterations: u64,
    cycles: u32,
}

enum Ending {
    /// Every phase ran. `settled` when the final boundary zero was accepted.
    Completed { settled: bool },
    Cancelled,
}

impl SessionRun {
    async fn execute(self, initial: VelocityCommand) {
        let outcome = std::panic::AssertUnwindSafe(self.drive(initial))
            .catch_unwind()
            .await;

        let zero_needed = match outcome {
            Ok(Ok(Ending::Completed { settled })) => {
                info!("velocity loop completed");
                // An accepted final boundary zero already left the actuator at rest.
                !settled
            }
            Ok(Ok(Ending::Cancelled)) => {
                info!("velocity loop cancelled");
                true
            }
            Ok(Err(e)) => {
                error!(command = commands::SET_VELOCITY, "velocity loop aborted: {e}");
                true
            }
            Err(_) => {
                error!("velocity loop panicked");
                true
            }
        };

        if zero_needed {
            let zero = VelocityCommand::ZERO.to_params();
            if let Err(e) = self.shared.dispatch(commands::SET_VELOCITY, &zero).await {
                error!(command = commands::SET_VELOCITY, "final zero command failed: {e}");
            }
        }
    }

    async fn drive(&self, initial: VelocityCommand) -> wheelctl_core::Result<Ending> {
        let mut velocity = initial;
        let mut settled = false;

        for phase in 0..u64::from(self.cycles) * 2 {
            if self.halted() {
                return Ok(Ending::Cancelled);
            }
            debug!(phase, velocity = %velocity, "velocity phase");

            for _ in 0..self.iterations {
                if self.halted() {
                    return Ok(Ending::Cancelled);
                }
                self.step(velocity).await?;
                if !self.pause(self.interval).await {
                    return Ok(Ending::Cancelled);
                }
            }

            settled = self.step(velocity.zeroed()).await?;
            if !self.pause(SETTLE_DELAY).await {
                return Ok(Ending::Cancelled);
            }
            velocity = velocity.reversed();
        }

        Ok(Ending::Completed { settled })
    }

    fn halted(&self) -> bool {
        self.cancel.is_cancelled() || !self.shared.active.load(Ordering::SeqCst)
    }

    /// Send one velocity command. Failures the next command may not repeat
    /// are logged and reported as `Ok(false)`; the rest abort the session.
    async fn step(&self, velocity: VelocityCommand) -> wheelctl_core::Result<bool> {
        match self
            .shared
            .dispatch(commands::SET_VELOCITY, &velocity.to_params())
            .await
        {
            Ok(()) => Ok(true),
            Err(e @ WheelctlError::CommandTimeout { .. }) => {
                warn!(command = commands::SET_VELOCITY, "{e}");
                Ok(false)
            }
            Err(
                e @ (WheelctlError::CommandTransportError { .. }
                | WheelctlError::Rejected(_)
                | WheelctlError::ChannelUnavailable { .. }),
            ) => {
                error!(command = commands::SET_VELOCITY, "{e}");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Sleep unless cancelled first. `false` when cancelled.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::{LoopbackNode, Reply};
    use serde_json::json;
    use std::collections::BTreeMap;
    use wheelctl_core::request::OperateRemoteDeviceRequest;
    use wheelctl_core::{CommandSpec, Request};

    fn registry() -> CommandRegistry {
        let mut specs = BTreeMap::new();
        specs.insert(
            commands::SET_VELOCITY.to_string(),
            CommandSpec::new(RequestKind::SetTargetValue, 28, 117),
        );
        specs.insert(
            commands::OPERATE_BRAKE.to_string(),
            CommandSpec::new(RequestKind::OperateRemoteDevice, 28, 121),
        );
        specs.insert(
            commands::MOTOR_ENABLE.to_string(),
            CommandSpec::new(RequestKind::Enable, 28, 113).disabled(),
        );
        CommandRegistry::from_specs(specs).unwrap()
    }

    async fn started() -> (LoopbackNode, Orchestrator) {
        let node = LoopbackNode::new();
        node.start().await;
        let orch = Orchestrator::new(Arc::new(node.clone()), registry());
        orch.start();
        (node, orch)
    }

    fn v(left: f32, right: f32) -> Vec<f32> {
        vec![left, right]
    }

    fn zero_count(calls: &[Vec<f32>]) -> usize {
        calls.iter().filter(|c| c.iter().all(|x| *x == 0.0)).count()
    }

    #[test]
    fn iterations_use_whole_milliseconds() {
        let plan = LoopPlan::cyclic(100).with_duration(0.3);
        assert_eq!(plan.iterations_per_direction().unwrap(), 3);
        assert_eq!(LoopPlan::cyclic(100).iterations_per_direction().unwrap(), 50);
        assert_eq!(
            LoopPlan::cyclic(400).with_duration(0.3).iterations_per_direction().unwrap(),
            0
        );
        assert!(LoopPlan::cyclic(0).iterations_per_direction().is_err());
        assert!(LoopPlan::cyclic(10)
            .with_duration(f64::NAN)
            .iterations_per_direction()
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn one_cycle_reverses_once_and_ends_on_zero() {
        let (node, orch) = started().await;
        let plan = LoopPlan::cyclic(100).with_duration(0.3).with_cycles(1);
        assert!(orch.start_velocity_loop(VelocityCommand::new(1.0, 1.0), plan).await);
        orch.wait_velocity_loop().await;

        let calls = node.velocity_calls();
        assert_eq!(
            calls,
            vec![
                v(1.0, 1.0),
                v(1.0, 1.0),
                v(1.0, 1.0),
                v(0.0, 0.0),
                v(-1.0, -1.0),
                v(-1.0, -1.0),
                v(-1.0, -1.0),
                v(0.0, 0.0),
            ]
        );
        assert!(!orch.is_velocity_loop_running().await);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_per_phase_boundary_and_sign_alternates() {
        let (node, orch) = started().await;
        let plan = LoopPlan::cyclic(50).with_duration(0.2).with_cycles(3);
        assert!(orch.start_velocity_loop(VelocityCommand::new(0.5, -0.25), plan).await);
        orch.wait_velocity_loop().await;

        let calls = node.velocity_calls();
        assert_eq!(zero_count(&calls), 6);
        let phase_signs: Vec<f32> = calls
            .split(|c| c.iter().all(|x| *x == 0.0))
            .filter(|phase| !phase.is_empty())
            .map(|phase| phase[0][0].signum())
            .collect();
        assert_eq!(phase_signs, [1.0, -1.0, 1.0, -1.0, 1.0, -1.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_mid_run_ends_on_zero() {
        let (node, orch) = started().await;
        assert!(
            orch.start_velocity_loop(VelocityCommand::new(1.0, 1.0), LoopPlan::cyclic(100))
                .await
        );
        tokio::time::sleep(Duration::from_millis(250)).await;
        orch.stop_velocity_loop().await;

        let calls = node.velocity_calls();
        assert_eq!(calls.last(), Some(&v(0.0, 0.0)));
        assert_eq!(calls.len(), 4);
        assert!(!orch.is_velocity_loop_running().await);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(node.velocity_calls().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_waits_for_in_flight_call_then_zeroes() {
        let (node, orch) = started().await;
        node.set_delay(Duration::from_millis(300));
        assert!(
            orch.start_velocity_loop(VelocityCommand::new(1.0, 1.0), LoopPlan::cyclic(100))
                .await
        );
        tokio::time::sleep(Duration::from_millis(50)).await;

        let stopping = tokio::time::Instant::now();
        orch.stop_velocity_loop().await;
        let waited = stopping.elapsed();

        assert_eq!(node.velocity_calls(), vec![v(1.0, 1.0), v(0.0, 0.0)]);
        // The in-flight reply (250 ms left) and the zero's own reply were both awaited.
        assert!(waited >= Duration::from_millis(550), "stop returned after {waited:?}");
        assert_eq!(node.open_clients(), 0);
        assert!(!orch.is_velocity_loop_running().await);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_settle_still_ends_on_zero() {
        let (node, orch) = started().await;
        let plan = LoopPlan::cyclic(100).with_duration(0.1);
        orch.start_velocity_loop(VelocityCommand::new(1.0, 1.0), plan)
            .await;
        tokio::time::sleep(Duration::from_millis(1000)).await;
        orch.stop_velocity_loop().await;
        assert_eq!(node.velocity_calls().last(), Some(&v(0.0, 0.0)));
    }

    #[tokio::test(start_paused = true)]
    async fn restart_cancels_prior_session_first() {
        let (node, orch) = started().await;
        orch.start_velocity_loop(VelocityCommand::new(1.0, 1.0), LoopPlan::cyclic(100))
            .await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        orch.start_velocity_loop(VelocityCommand::new(2.0, 2.0), LoopPlan::cyclic(100))
            .await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        orch.stop_velocity_loop().await;

        let calls = node.velocity_calls();
        let first_new = calls.iter().position(|c| *c == v(2.0, 2.0)).unwrap();
        assert_eq!(calls[first_new - 1], v(0.0, 0.0));
        assert!(calls[..first_new - 1].iter().all(|c| *c == v(1.0, 1.0)));
    }

    #[tokio::test]
    async fn single_shot_sends_exactly_once() {
        let (node, orch) = started().await;
        assert!(
            orch.start_velocity_loop(VelocityCommand::new(0.3, -0.3), LoopPlan::single_shot())
                .await
        );
        assert_eq!(node.velocity_calls(), vec![v(0.3, -0.3)]);
        assert!(!orch.is_velocity_loop_running().await);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_keep_the_loop_going() {
        let (node, orch) = started().await;
        node.set_reply(Reply::Fault("bus off".into()));
        let plan = LoopPlan::cyclic(100).with_duration(0.3).with_cycles(1);
        orch.start_velocity_loop(VelocityCommand::new(1.0, 1.0), plan)
            .await;
        orch.wait_velocity_loop().await;

        let calls = node.velocity_calls();
        // Both boundary zeros failed, so the cleanup zero is sent as well.
        assert_eq!(calls.len(), 9);
        assert_eq!(zero_count(&calls), 3);
    }

    #[tokio::test]
    async fn commands_rejected_before_start() {
        let node = LoopbackNode::new();
        node.start().await;
        let orch = Orchestrator::new(Arc::new(node.clone()), registry());

        let err = orch
            .try_send_command(commands::SET_VELOCITY, &VelocityCommand::ZERO.to_params())
            .await
            .unwrap_err();
        assert!(matches!(err, WheelctlError::NotStarted));
        assert!(
            !orch
                .start_velocity_loop(VelocityCommand::new(1.0, 1.0), LoopPlan::single_shot())
                .await
        );
        assert_eq!(node.clients_created(), 0);
    }

    #[tokio::test]
    async fn unknown_and_disabled_commands_fail() {
        let (node, orch) = started().await;
        assert!(!orch.send_command("Warp", &Params::new()).await);
        let err = orch
            .try_send_command(commands::MOTOR_ENABLE, &Params::new())
            .await
            .unwrap_err();
        assert!(matches!(err, WheelctlError::Disabled(_)));
        assert_eq!(node.clients_created(), 0);
    }

    #[tokio::test]
    async fn brake_params_are_defaulted() {
        let (node, orch) = started().await;
        let mut params = Params::new();
        params.insert("method".into(), json!(BRAKE_CLOSE));
        assert!(orch.send_command(commands::OPERATE_BRAKE, &params).await);
        assert!(orch.send_command(commands::OPERATE_BRAKE, &Params::new()).await);

        let requests: Vec<Request> = node.calls().into_iter().map(|c| c.request).collect();
        assert_eq!(
            requests,
            vec![
                Request::OperateRemoteDevice(OperateRemoteDeviceRequest {
                    method: 1,
                    name: "m-brake".into(),
                    param: String::new(),
                }),
                Request::OperateRemoteDevice(OperateRemoteDeviceRequest {
                    method: 0,
                    name: "m-brake".into(),
                    param: String::new(),
                }),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stop_zeroes_and_rejects_further_commands() {
        let (node, orch) = started().await;
        orch.start_velocity_loop(VelocityCommand::new(1.0, 1.0), LoopPlan::cyclic(100))
            .await;
        tokio::time::sleep(Duration::from_millis(120)).await;
        orch.stop().await;

        assert_eq!(node.velocity_calls().last(), Some(&v(0.0, 0.0)));
        assert!(!orch.is_started());
        assert!(!orch.send_command(commands::SET_VELOCITY, &VelocityCommand::ZERO.to_params()).await);
    }
}
