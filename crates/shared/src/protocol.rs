use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::DeviceId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum OutboundMessage {
    RegisterDevice(RegisterDevice),
    MovementCommand(MovementCommand),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterDevice {
    pub device_id: DeviceId,
    pub device_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementCommand {
    pub device_id: DeviceId,
    pub command: String,
    pub duration_ms: u64,
    pub speed: u32,
    pub meta: CommandMeta,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandMeta {
    pub origin: String,
    pub timestamp: String,
}

impl CommandMeta {
    pub fn captured_at(origin: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            origin: origin.into(),
            timestamp: at.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

impl OutboundMessage {
    pub fn register_device(device_id: DeviceId) -> Self {
        OutboundMessage::RegisterDevice(RegisterDevice {
            device_id,
            device_name: device_id.display_name(),
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::RegisterDevice(_) => "register_device",
            OutboundMessage::MovementCommand(_) => "movement_command",
        }
    }
}

/// Movement details carried by `command_sent` and `execute_movement` events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MovementReport {
    pub device_id: Option<i64>,
    pub command: Option<String>,
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Connected,
    RegistrationSuccess { device_id: Option<i64> },
    RegistrationError { error: Option<String> },
    CommandSent(MovementReport),
    CommandError { error: Option<String> },
    ExecuteMovement(MovementReport),
    ObstacleAlert {
        device_id: Option<i64>,
        distance_cm: Option<f64>,
    },
    StatusUpdate { payload: Value },
    Pong,
    Unknown { kind: Option<String> },
}

impl InboundMessage {
    /// Decodes an already-parsed envelope. Never fails: sub-fields that are
    /// missing or carry the wrong JSON type decode as `None`, and anything
    /// without a recognized `type` becomes `Unknown`.
    pub fn from_value(value: &Value) -> Self {
        let kind = value.get("type").and_then(Value::as_str);
        match kind {
            Some("connected") => InboundMessage::Connected,
            Some("registration_success") => InboundMessage::RegistrationSuccess {
                device_id: int_field(value, "device_id"),
            },
            Some("registration_error") => InboundMessage::RegistrationError {
                error: str_field(value, "error"),
            },
            Some("command_sent") => InboundMessage::CommandSent(MovementReport::from_value(value)),
            Some("command_error") => InboundMessage::CommandError {
                error: str_field(value, "error"),
            },
            Some("execute_movement") => {
                InboundMessage::ExecuteMovement(MovementReport::from_value(value))
            }
            Some("obstacle_alert") => InboundMessage::ObstacleAlert {
                device_id: int_field(value, "device_id"),
                distance_cm: value.get("distance_cm").and_then(Value::as_f64),
            },
            Some("status_update") => InboundMessage::StatusUpdate {
                payload: value.clone(),
            },
            Some("pong") => InboundMessage::Pong,
            other => InboundMessage::Unknown {
                kind: other.map(str::to_string),
            },
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            InboundMessage::Connected => "connected",
            InboundMessage::RegistrationSuccess { .. } => "registration_success",
            InboundMessage::RegistrationError { .. } => "registration_error",
            InboundMessage::CommandSent(_) => "command_sent",
            InboundMessage::CommandError { .. } => "command_error",
            InboundMessage::ExecuteMovement(_) => "execute_movement",
            InboundMessage::ObstacleAlert { .. } => "obstacle_alert",
            InboundMessage::StatusUpdate { .. } => "status_update",
            InboundMessage::Pong => "pong",
            InboundMessage::Unknown { .. } => "unknown",
        }
    }
}

impl MovementReport {
    fn from_value(value: &Value) -> Self {
        Self {
            device_id: int_field(value, "device_id"),
            command: str_field(value, "command"),
            duration_ms: value.get("duration_ms").and_then(Value::as_u64),
        }
    }
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

// Device ids show up both as numbers and as numeric strings.
fn int_field(value: &Value, key: &str) -> Option<i64> {
    match value.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
