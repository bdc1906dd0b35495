use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{Command, StepId};

pub const MIN_STEP_DURATION_MS: u64 = 100;
pub const MAX_STEP_DURATION_MS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceStep {
    pub id: StepId,
    pub command: Command,
    pub duration_ms: u64,
}

impl SequenceStep {
    pub fn description(&self) -> &'static str {
        self.command.label()
    }
}

pub fn duration_in_bounds(duration_ms: u64) -> bool {
    (MIN_STEP_DURATION_MS..=MAX_STEP_DURATION_MS).contains(&duration_ms)
}

/// Built-in demo patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Template {
    Square,
    Circle,
    Zigzag,
}

const SQUARE: &[(Command, u64)] = &[
    (Command::Forward, 2000),
    (Command::Right, 500),
    (Command::Forward, 2000),
    (Command::Right, 500),
    (Command::Forward, 2000),
    (Command::Right, 500),
    (Command::Forward, 2000),
    (Command::Right, 500),
];

const CIRCLE: &[(Command, u64)] = &[(Command::ForwardRight, 1000); 8];

const ZIGZAG: &[(Command, u64)] = &[
    (Command::Forward, 1000),
    (Command::Right, 300),
    (Command::Forward, 1000),
    (Command::Left, 600),
    (Command::Forward, 1000),
    (Command::Right, 600),
    (Command::Forward, 1000),
    (Command::Left, 300),
];

impl Template {
    pub const ALL: [Template; 3] = [Template::Square, Template::Circle, Template::Zigzag];

    pub fn name(self) -> &'static str {
        match self {
            Template::Square => "square",
            Template::Circle => "circle",
            Template::Zigzag => "zigzag",
        }
    }

    pub fn steps(self) -> &'static [(Command, u64)] {
        match self {
            Template::Square => SQUARE,
            Template::Circle => CIRCLE,
            Template::Zigzag => ZIGZAG,
        }
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown sequence template: {0}")]
pub struct UnknownTemplate(pub String);

impl FromStr for Template {
    type Err = UnknownTemplate;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Template::ALL
            .into_iter()
            .find(|template| template.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownTemplate(s.to_string()))
    }
}
