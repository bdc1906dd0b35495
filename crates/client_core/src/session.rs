use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Instant,
};

use chrono::Utc;
use shared::{domain::Command, domain::DeviceId, protocol::InboundMessage};
use tokio::sync::broadcast;

use crate::{
    config::Settings,
    events::{
        ActivityEntry, ActivityKind, ClientEvent, Notification, NotificationLevel, SessionStats,
    },
};

const EVENT_BUFFER: usize = 1024;

/// Per-process control session shared by the channel manager, the command
/// dispatcher and the sequence executor.
///
/// Holds the selected device and speed, the session counters, the recent
/// activity log, and the event bus that UI adapters subscribe to.
pub struct Session {
    device_id: AtomicI64,
    speed: AtomicU32,
    command_count: AtomicU64,
    obstacle_count: AtomicU64,
    started_at: Instant,
    activity: Mutex<VecDeque<ActivityEntry>>,
    max_activity: usize,
    events: broadcast::Sender<ClientEvent>,
}

impl Session {
    pub fn new(device_id: DeviceId, speed: u32, max_activity: usize) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Arc::new(Self {
            device_id: AtomicI64::new(device_id.0),
            speed: AtomicU32::new(speed),
            command_count: AtomicU64::new(0),
            obstacle_count: AtomicU64::new(0),
            started_at: Instant::now(),
            activity: Mutex::new(VecDeque::new()),
            max_activity,
            events,
        })
    }

    pub fn from_settings(settings: &Settings) -> Arc<Self> {
        Self::new(
            DeviceId(settings.device_id),
            settings.default_speed,
            settings.max_messages,
        )
    }

    pub fn device_id(&self) -> DeviceId {
        DeviceId(self.device_id.load(Ordering::Acquire))
    }

    pub(crate) fn set_device_id(&self, device_id: DeviceId) {
        self.device_id.store(device_id.0, Ordering::Release);
    }

    pub fn speed(&self) -> u32 {
        self.speed.load(Ordering::Acquire)
    }

    pub fn set_speed(&self, speed: u32) {
        self.speed.store(speed, Ordering::Release);
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    pub fn notify(&self, level: NotificationLevel, message: impl Into<String>) {
        self.emit(ClientEvent::Notification(Notification {
            level,
            message: message.into(),
        }));
    }

    pub(crate) fn record_command(&self) -> u64 {
        let count = self.command_count.fetch_add(1, Ordering::AcqRel) + 1;
        self.emit(ClientEvent::StatsUpdated(self.stats()));
        count
    }

    pub(crate) fn record_obstacle(&self) -> u64 {
        let count = self.obstacle_count.fetch_add(1, Ordering::AcqRel) + 1;
        self.emit(ClientEvent::StatsUpdated(self.stats()));
        count
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            command_count: self.command_count.load(Ordering::Acquire),
            obstacle_count: self.obstacle_count.load(Ordering::Acquire),
            elapsed: self.started_at.elapsed(),
        }
    }

    /// Adds an inbound event to the activity log, newest first, dropping the
    /// oldest entries beyond the configured cap.
    pub(crate) fn record_activity(&self, kind: ActivityKind, message: InboundMessage) {
        let entry = ActivityEntry {
            kind,
            summary: activity_summary(kind, &message),
            received_at: Utc::now(),
            message,
        };
        {
            let mut activity = self.activity.lock().unwrap_or_else(PoisonError::into_inner);
            activity.push_front(entry.clone());
            activity.truncate(self.max_activity);
        }
        self.emit(ClientEvent::Activity(entry));
    }

    /// Activity entries, newest first, optionally restricted to one kind.
    pub fn activity(&self, kind: Option<ActivityKind>) -> Vec<ActivityEntry> {
        let activity = self.activity.lock().unwrap_or_else(PoisonError::into_inner);
        activity
            .iter()
            .filter(|entry| kind.map_or(true, |kind| entry.kind == kind))
            .cloned()
            .collect()
    }

    pub fn clear_activity(&self) {
        self.activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

fn activity_summary(kind: ActivityKind, message: &InboundMessage) -> String {
    match (kind, message) {
        (
            ActivityKind::Movement,
            InboundMessage::CommandSent(report) | InboundMessage::ExecuteMovement(report),
        ) => {
            let label = report
                .command
                .as_deref()
                .map(Command::label_for)
                .unwrap_or_else(|| "Unknown command".to_string());
            match report.duration_ms {
                Some(duration_ms) => format!("{label} ({duration_ms}ms)"),
                None => format!("{label} (-ms)"),
            }
        }
        (ActivityKind::Obstacle, _) => "Obstacle detected".to_string(),
        _ => "Status updated".to_string(),
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
