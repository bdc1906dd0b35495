use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(DeviceId);
id_newtype!(StepId);

impl DeviceId {
    /// Display name announced to the server when the device is registered.
    pub fn display_name(self) -> String {
        format!("Car-{}", self.0)
    }
}

/// Movement commands understood by the vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Forward,
    Backward,
    Left,
    Right,
    Stop,
    RotateLeft,
    RotateRight,
    ForwardLeft,
    ForwardRight,
    BackwardLeft,
    BackwardRight,
}

impl Command {
    pub const ALL: [Command; 11] = [
        Command::Forward,
        Command::Backward,
        Command::Left,
        Command::Right,
        Command::Stop,
        Command::RotateLeft,
        Command::RotateRight,
        Command::ForwardLeft,
        Command::ForwardRight,
        Command::BackwardLeft,
        Command::BackwardRight,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Command::Forward => "forward",
            Command::Backward => "backward",
            Command::Left => "left",
            Command::Right => "right",
            Command::Stop => "stop",
            Command::RotateLeft => "rotate_left",
            Command::RotateRight => "rotate_right",
            Command::ForwardLeft => "forward_left",
            Command::ForwardRight => "forward_right",
            Command::BackwardLeft => "backward_left",
            Command::BackwardRight => "backward_right",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Command::Forward => "Forward",
            Command::Backward => "Backward",
            Command::Left => "Turn 90° left",
            Command::Right => "Turn 90° right",
            Command::Stop => "Stop",
            Command::RotateLeft => "Spin 360° left",
            Command::RotateRight => "Spin 360° right",
            Command::ForwardLeft => "Curve forward left",
            Command::ForwardRight => "Curve forward right",
            Command::BackwardLeft => "Curve backward left",
            Command::BackwardRight => "Curve backward right",
        }
    }

    /// Label for a raw command identifier, falling back to the identifier itself.
    pub fn label_for(raw: &str) -> String {
        raw.parse::<Command>()
            .map(|command| command.label().to_string())
            .unwrap_or_else(|_| raw.to_string())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown movement command: {0}")]
pub struct UnknownCommand(pub String);

impl FromStr for Command {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Command::ALL
            .into_iter()
            .find(|command| command.as_str() == s)
            .ok_or_else(|| UnknownCommand(s.to_string()))
    }
}

/// Duration used by the emergency stop key binding.
pub const STOP_KEY_DURATION_MS: u64 = 100;

/// A command triggered by a single key press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyBinding {
    pub command: Command,
    /// Fixed duration for this binding; `None` means the caller's current duration.
    pub duration_ms: Option<u64>,
}

/// Maps a key name (as reported by a keyboard event) to its movement binding.
pub fn key_binding(key: &str) -> Option<KeyBinding> {
    let bound = |command| KeyBinding {
        command,
        duration_ms: None,
    };
    match key.to_ascii_lowercase().as_str() {
        "w" | "arrowup" => Some(bound(Command::Forward)),
        "s" | "arrowdown" => Some(bound(Command::Backward)),
        "a" | "arrowleft" => Some(bound(Command::Left)),
        "d" | "arrowright" => Some(bound(Command::Right)),
        " " | "space" | "escape" => Some(KeyBinding {
            command: Command::Stop,
            duration_ms: Some(STOP_KEY_DURATION_MS),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_identifiers_round_trip_through_from_str() {
        for command in Command::ALL {
            assert_eq!(command.as_str().parse::<Command>(), Ok(command));
        }
        assert!("jump".parse::<Command>().is_err());
    }

    #[test]
    fn serde_uses_wire_identifiers() {
        let json = serde_json::to_string(&Command::BackwardRight).expect("encode");
        assert_eq!(json, "\"backward_right\"");
    }

    #[test]
    fn label_for_unknown_identifier_falls_back_to_raw_value() {
        assert_eq!(Command::label_for("rotate_left"), "Spin 360° left");
        assert_eq!(Command::label_for("moonwalk"), "moonwalk");
    }

    #[test]
    fn stop_key_uses_fixed_duration() {
        let binding = key_binding("Escape").expect("escape bound");
        assert_eq!(binding.command, Command::Stop);
        assert_eq!(binding.duration_ms, Some(STOP_KEY_DURATION_MS));
        assert_eq!(key_binding("ArrowUp").map(|b| b.command), Some(Command::Forward));
        assert_eq!(key_binding("q"), None);
    }
}
