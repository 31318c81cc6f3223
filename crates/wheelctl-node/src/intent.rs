use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;
use wheelctl_core::{commands, Params, VelocityCommand};

use crate::orchestrator::{BRAKE_CLOSE, BRAKE_OPEN};

/// `SetMode` values understood by the actuator.
pub const MODE_OPEN_LOOP: u8 = 0;
pub const MODE_SPEED: u8 = 1;
pub const MODE_POSITION: u8 = 2;

const MODE_MAX_VELOCITY: f32 = 5.0;
const MODE_ACCELERATION: f32 = 1.0;
const MODE_DECELERATION: f32 = 1.0;
const PID_RESERVED_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Start,
    Stop,
    BrakeLock,
    BrakeUnlock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMode {
    OpenLoop,
    Velocity,
    Position,
}

impl ControlMode {
    pub fn mode_value(self) -> u8 {
        match self {
            ControlMode::OpenLoop => MODE_OPEN_LOOP,
            ControlMode::Velocity => MODE_SPEED,
            ControlMode::Position => MODE_POSITION,
        }
    }
}

/// What an operator asked for, before it becomes a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum Intent {
    Operation { operation: Operation },
    ControlMode { mode: ControlMode },
    Pid { kp: f32, ki: f32, kd: f32 },
    Target { left: f32, right: f32 },
    TargetClear,
}

/// The orchestrator call an [`Intent`] resolves to.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Action {
    Command { name: &'static str, params: Params },
    Velocity(VelocityCommand),
    StopVelocity,
}

impl Intent {
    pub(crate) fn action(&self) -> Action {
        match *self {
            Intent::Operation { operation } => operation_action(operation),
            Intent::ControlMode { mode } => {
                if mode == ControlMode::Position {
                    warn!("position mode is not fully supported by the actuator");
                }
                Action::Command {
                    name: commands::SET_MODE,
                    params: object(json!({
                        "mode": mode.mode_value(),
                        "max_velocity": MODE_MAX_VELOCITY,
                        "acceleration": MODE_ACCELERATION,
                        "deceleration": MODE_DECELERATION,
                    })),
                }
            }
            Intent::Pid { kp, ki, kd } => Action::Command {
                name: commands::SET_PID_PARAMS,
                params: object(json!({
                    "pid_params": [kp, ki, 0.0, kd],
                    "reserved": vec![0.0f32; PID_RESERVED_LEN],
                })),
            },
            Intent::Target { left, right } => Action::Velocity(VelocityCommand::new(left, right)),
            Intent::TargetClear => Action::StopVelocity,
        }
    }
}

fn operation_action(operation: Operation) -> Action {
    let (name, params) = match operation {
        Operation::Start => (commands::MOTOR_ENABLE, json!({ "enable_state": 0 })),
        Operation::Stop => (commands::MOTOR_ENABLE, json!({ "enable_state": 1 })),
        Operation::BrakeLock => (
            commands::OPERATE_BRAKE,
            json!({ "method": BRAKE_CLOSE, "name": "m-brake", "param": "mode=emergency" }),
        ),
        Operation::BrakeUnlock => (commands::OPERATE_BRAKE, json!({ "method": BRAKE_OPEN })),
    };
    Action::Command {
        name,
        params: object(params),
    }
}

fn object(value: serde_json::Value) -> Params {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Params::new(),
    }
}
