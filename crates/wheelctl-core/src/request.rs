use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::{Result, WheelctlError};

/// Generic string-keyed parameter map handed to `send_command`.
pub type Params = serde_json::Map<String, Value>;

// ---------------------------------------------------------------------------
// RequestKind
// ---------------------------------------------------------------------------

/// Service request types the registry can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Enable,
    SetTargetValue,
    OperateRemoteDevice,
    PidParameter,
    SetMode,
}

impl RequestKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestKind::Enable => "enable",
            RequestKind::SetTargetValue => "set_target_value",
            RequestKind::OperateRemoteDevice => "operate_remote_device",
            RequestKind::PidParameter => "pid_parameter",
            RequestKind::SetMode => "set_mode",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// SI scalar wrapper (velocity in m/s, acceleration in m/s²).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Scalar(pub f32);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnableRequest {
    pub enable_state: u8,
}

/// Ordered per-wheel targets: `[left, right]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetTargetValueRequest {
    pub velocity: Vec<Scalar>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OperateRemoteDeviceRequest {
    pub method: u8,
    pub name: String,
    pub param: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PidParameterRequest {
    pub pid_params: Vec<f32>,
    #[serde(default)]
    pub reserved: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetModeRequest {
    pub mode: u8,
    pub max_velocity: Scalar,
    pub acceleration: Scalar,
    pub deceleration: Scalar,
}

/// A fully typed service request, one variant per [`RequestKind`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Request {
    Enable(EnableRequest),
    SetTargetValue(SetTargetValueRequest),
    OperateRemoteDevice(OperateRemoteDeviceRequest),
    PidParameter(PidParameterRequest),
    SetMode(SetModeRequest),
}

impl Request {
    /// Map a generic parameter map onto the request shape of `kind`.
    ///
    /// Target values and mode changes have bespoke mappings; every other
    /// kind takes its fields from `params` by name.
    pub fn build(kind: RequestKind, command: &str, params: &Params) -> Result<Request> {
        let invalid = |reason: String| WheelctlError::InvalidParams {
            command: command.to_string(),
            reason,
        };

        let request = match kind {
            RequestKind::SetTargetValue => {
                let left = scalar(params, "left").map_err(invalid)?;
                let right = scalar(params, "right").map_err(invalid)?;
                Request::SetTargetValue(SetTargetValueRequest {
                    velocity: vec![left, right],
                })
            }
            RequestKind::SetMode => Request::SetMode(SetModeRequest {
                mode: small_int(params, "mode").map_err(invalid)?,
                max_velocity: scalar(params, "max_velocity").map_err(invalid)?,
                acceleration: scalar(params, "acceleration").map_err(invalid)?,
                deceleration: scalar(params, "deceleration").map_err(invalid)?,
            }),
            RequestKind::Enable => Request::Enable(by_name(params).map_err(invalid)?),
            RequestKind::OperateRemoteDevice => {
                Request::OperateRemoteDevice(by_name(params).map_err(invalid)?)
            }
            RequestKind::PidParameter => Request::PidParameter(by_name(params).map_err(invalid)?),
        };
        Ok(request)
    }

    pub fn kind(&self) -> RequestKind {
        match self {
            Request::Enable(_) => RequestKind::Enable,
            Request::SetTargetValue(_) => RequestKind::SetTargetValue,
            Request::OperateRemoteDevice(_) => RequestKind::OperateRemoteDevice,
            Request::PidParameter(_) => RequestKind::PidParameter,
            Request::SetMode(_) => RequestKind::SetMode,
        }
    }

    /// Velocity targets carried by a `SetTargetValue` request.
    pub fn velocity(&self) -> Option<Vec<f32>> {
        match self {
            Request::SetTargetValue(r) => Some(r.velocity.iter().map(|s| s.0).collect()),
            _ => None,
        }
    }
}

fn scalar(params: &Params, key: &str) -> std::result::Result<Scalar, String> {
    params
        .get(key)
        .ok_or_else(|| format!("missing '{key}'"))?
        .as_f64()
        .map(|v| Scalar(v as f32))
        .ok_or_else(|| format!("'{key}' must be a number"))
}

fn small_int(params: &Params, key: &str) -> std::result::Result<u8, String> {
    let raw = params
        .get(key)
        .ok_or_else(|| format!("missing '{key}'"))?
        .as_u64()
        .ok_or_else(|| format!("'{key}' must be a non-negative integer"))?;
    u8::try_from(raw).map_err(|_| format!("'{key}' out of range: {raw}"))
}

fn by_name<T: DeserializeOwned>(params: &Params) -> std::result::Result<T, String> {
    serde_json::from_value(Value::Object(params.clone())).map_err(|e| e.to_string())
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

/// Reply payload returned by a service call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Response(pub Value);

impl Response {
    pub fn ok() -> Self {
        Response(serde_json::json!({ "success": true }))
    }

    pub fn refused() -> Self {
        Response(serde_json::json!({ "success": false }))
    }

    /// `false` for null, `false`, or an object carrying `"success": false`
    /// or an `"error"` key.
    pub fn is_affirmative(&self) -> bool {
        match &self.0 {
            Value::Null | Value::Bool(false) => false,
            Value::Object(map) => {
                !map.contains_key("error")
                    && map.get("success").and_then(Value::as_bool).unwrap_or(true)
            }
            _ => true,
        }
    }
}
