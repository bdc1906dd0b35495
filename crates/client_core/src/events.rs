use std::time::Duration;

use chrono::{DateTime, Utc};
use shared::{domain::Command, protocol::InboundMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Short user-facing message, the kind a panel shows as a toast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivityKind {
    Movement,
    Obstacle,
    Status,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActivityEntry {
    pub kind: ActivityKind,
    pub summary: String,
    pub received_at: DateTime<Utc>,
    pub message: InboundMessage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub command_count: u64,
    pub obstacle_count: u64,
    pub elapsed: Duration,
}

impl SessionStats {
    /// Elapsed session time as `MM:SS`; minutes keep counting past 59.
    pub fn elapsed_label(&self) -> String {
        let secs = self.elapsed.as_secs();
        format!("{:02}:{:02}", secs / 60, secs % 60)
    }
}

#[derive(Debug, Clone)]
pub enum ClientEvent {
    ConnectionStateChanged(ConnectionState),
    ReconnectScheduled {
        attempt: u32,
        max_attempts: u32,
        delay: Duration,
    },
    ReconnectExhausted {
        attempts: u32,
    },
    Notification(Notification),
    Inbound(InboundMessage),
    Activity(ActivityEntry),
    StatsUpdated(SessionStats),
    SequenceProgress {
        step: usize,
        total: usize,
        command: Command,
    },
    SequenceFinished {
        steps_sent: usize,
        total: usize,
        success: bool,
    },
}
