//! Reconnecting channel to the device-control server.
//!
//! Link lifecycle callbacks are turned into [`ChannelEvent`]s and consumed by
//! a single task per manager, so every state transition goes through
//! [`ChannelManager::handle_channel_event`]. Each opened link carries a
//! generation number; events from superseded links are dropped.

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use serde_json::Value;
use shared::protocol::{InboundMessage, OutboundMessage};
use tokio::{
    sync::{mpsc, watch, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    error::ChannelError,
    events::{ActivityKind, ClientEvent, ConnectionState, NotificationLevel},
    session::Session,
    transport::{ChannelConnector, ChannelLink, LinkEvent},
};

#[derive(Debug, Clone)]
pub struct ChannelOptions {
    pub url: String,
    pub reconnect_interval: Duration,
    pub max_reconnect_attempts: u32,
}

#[derive(Debug)]
enum ChannelEvent {
    Opened {
        generation: u64,
        outbound: mpsc::UnboundedSender<String>,
    },
    Frame {
        generation: u64,
        text: String,
    },
    Failed {
        generation: u64,
        error: String,
    },
    Closed {
        generation: u64,
    },
    ReconnectDue {
        generation: u64,
    },
}

struct ChannelInner {
    generation: u64,
    outbound: Option<mpsc::UnboundedSender<String>>,
    reconnect_attempts: u32,
    link_task: Option<JoinHandle<()>>,
    reconnect_task: Option<JoinHandle<()>>,
}

pub struct ChannelManager {
    options: ChannelOptions,
    session: Arc<Session>,
    connector: Arc<dyn ChannelConnector>,
    inner: Mutex<ChannelInner>,
    state: watch::Sender<ConnectionState>,
    channel_events: mpsc::UnboundedSender<ChannelEvent>,
}

impl ChannelManager {
    /// Must be called from within a tokio runtime.
    pub fn new(
        options: ChannelOptions,
        session: Arc<Session>,
        connector: Arc<dyn ChannelConnector>,
    ) -> Arc<Self> {
        let (channel_events, events_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let manager = Arc::new(Self {
            options,
            session,
            connector,
            inner: Mutex::new(ChannelInner {
                generation: 0,
                outbound: None,
                reconnect_attempts: 0,
                link_task: None,
                reconnect_task: None,
            }),
            state,
            channel_events,
        });
        tokio::spawn(run_event_loop(Arc::downgrade(&manager), events_rx));
        manager
    }

    pub fn options(&self) -> &ChannelOptions {
        &self.options
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub async fn reconnect_attempts(&self) -> u32 {
        self.inner.lock().await.reconnect_attempts
    }

    /// Opens the channel unless one is already open or opening. A manual
    /// connect supersedes any pending automatic reconnect.
    pub async fn connect(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(task) = inner.reconnect_task.take() {
            task.abort();
        }
        self.open_locked(&mut inner);
    }

    /// Closes the channel on request. Intentional closes never schedule a
    /// reconnect, and a reconnect that is already pending is cancelled.
    pub async fn disconnect(&self) {
        let mut inner = self.inner.lock().await;
        inner.generation += 1;
        if let Some(task) = inner.reconnect_task.take() {
            task.abort();
        }
        if let Some(task) = inner.link_task.take() {
            task.abort();
        }
        inner.outbound = None;

        if self.state() != ConnectionState::Disconnected {
            info!(url = %self.options.url, "channel: disconnected by request");
            self.set_state(ConnectionState::Disconnected);
            self.session
                .notify(NotificationLevel::Info, "Disconnected from server");
        }
    }

    /// Transmits immediately when connected. Nothing is queued: a message
    /// that cannot be sent now is reported and dropped.
    pub async fn send(&self, message: &OutboundMessage) -> Result<(), ChannelError> {
        let inner = self.inner.lock().await;
        let result = self.transmit(&inner, message);
        if let Err(err) = &result {
            warn!(kind = message.kind(), %err, "channel: send failed");
            self.session.notify(NotificationLevel::Error, err.to_string());
        }
        result
    }

    fn transmit(&self, inner: &ChannelInner, message: &OutboundMessage) -> Result<(), ChannelError> {
        if !self.is_connected() {
            return Err(ChannelError::NotConnected);
        }
        let outbound = inner.outbound.as_ref().ok_or(ChannelError::NotConnected)?;
        let text = serde_json::to_string(message).map_err(|source| ChannelError::Encode {
            kind: message.kind(),
            source,
        })?;
        outbound.send(text).map_err(|_| ChannelError::WriterClosed)?;
        debug!(kind = message.kind(), "channel: message sent");
        Ok(())
    }

    fn open_locked(&self, inner: &mut ChannelInner) {
        let state = self.state();
        if state != ConnectionState::Disconnected {
            debug!(?state, "channel: connect ignored, channel already active");
            return;
        }

        inner.generation += 1;
        let generation = inner.generation;
        info!(url = %self.options.url, generation, "channel: connecting");
        self.set_state(ConnectionState::Connecting);

        inner.link_task = Some(tokio::spawn(run_link(
            Arc::clone(&self.connector),
            self.options.url.clone(),
            generation,
            self.channel_events.clone(),
        )));
    }

    fn set_state(&self, next: ConnectionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            self.session.emit(ClientEvent::ConnectionStateChanged(next));
        }
    }

    fn schedule_reconnect(&self, generation: u64) -> JoinHandle<()> {
        let delay = self.options.reconnect_interval;
        let events = self.channel_events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(ChannelEvent::ReconnectDue { generation });
        })
    }

    async fn handle_channel_event(&self, event: ChannelEvent) {
        let mut inner = self.inner.lock().await;
        match event {
            ChannelEvent::Opened {
                generation,
                outbound,
            } => {
                if generation != inner.generation {
                    debug!(generation, "channel: dropping superseded link");
                    return;
                }
                inner.reconnect_attempts = 0;
                inner.outbound = Some(outbound);
                self.set_state(ConnectionState::Connected);
                info!(url = %self.options.url, generation, "channel: connected");

                let device_id = self.session.device_id();
                if let Err(err) =
                    self.transmit(&inner, &OutboundMessage::register_device(device_id))
                {
                    warn!(device_id = device_id.0, %err, "channel: automatic registration failed");
                }
                self.session
                    .notify(NotificationLevel::Success, "Connected to server");
            }
            ChannelEvent::Frame { generation, text } => {
                if generation != inner.generation {
                    return;
                }
                drop(inner);
                self.handle_frame(&text);
            }
            ChannelEvent::Failed { generation, error } => {
                if generation != inner.generation {
                    return;
                }
                warn!(%error, "channel: transport error");
                self.session
                    .notify(NotificationLevel::Error, "Connection error");
            }
            ChannelEvent::Closed { generation } => {
                if generation != inner.generation {
                    return;
                }
                inner.outbound = None;
                inner.link_task = None;
                self.set_state(ConnectionState::Disconnected);
                info!(url = %self.options.url, "channel: closed");
                self.session
                    .notify(NotificationLevel::Warning, "Disconnected from server");

                let max_attempts = self.options.max_reconnect_attempts;
                if inner.reconnect_attempts < max_attempts {
                    inner.reconnect_attempts += 1;
                    let attempt = inner.reconnect_attempts;
                    let delay = self.options.reconnect_interval;
                    info!(attempt, max_attempts, ?delay, "channel: reconnect scheduled");
                    inner.reconnect_task = Some(self.schedule_reconnect(generation));
                    self.session.emit(ClientEvent::ReconnectScheduled {
                        attempt,
                        max_attempts,
                        delay,
                    });
                } else {
                    warn!(
                        attempts = inner.reconnect_attempts,
                        "channel: reconnect attempts exhausted, waiting for manual connect"
                    );
                    self.session.emit(ClientEvent::ReconnectExhausted {
                        attempts: inner.reconnect_attempts,
                    });
                }
            }
            ChannelEvent::ReconnectDue { generation } => {
                if generation != inner.generation {
                    debug!(generation, "channel: dropping superseded reconnect");
                    return;
                }
                inner.reconnect_task = None;
                self.open_locked(&mut inner);
            }
        }
    }

    fn handle_frame(&self, text: &str) {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(err) => {
                warn!(%err, "channel: dropping malformed inbound payload");
                return;
            }
        };
        self.dispatch_inbound(InboundMessage::from_value(&value));
    }

    fn dispatch_inbound(&self, message: InboundMessage) {
        let session = &self.session;
        session.emit(ClientEvent::Inbound(message.clone()));

        match &message {
            InboundMessage::Connected => info!("channel: server confirmed connection"),
            InboundMessage::RegistrationSuccess { device_id } => {
                info!(?device_id, "channel: device registered");
                let label = device_id.map_or_else(|| "?".to_string(), |id| id.to_string());
                session.notify(
                    NotificationLevel::Success,
                    format!("Device {label} registered"),
                );
            }
            InboundMessage::RegistrationError { error } => {
                let reason = error.as_deref().unwrap_or("device registration failed");
                warn!(reason, "channel: registration rejected");
                session.notify(NotificationLevel::Error, reason);
            }
            InboundMessage::CommandSent(report) => {
                let count = session.record_command();
                debug!(count, command = ?report.command, "channel: command confirmed");
                session.record_activity(ActivityKind::Movement, message.clone());
            }
            InboundMessage::CommandError { error } => {
                let reason = error.as_deref().unwrap_or("command rejected");
                warn!(reason, "channel: command rejected");
                session.notify(NotificationLevel::Error, reason);
            }
            InboundMessage::ExecuteMovement(report) => {
                info!(command = ?report.command, duration_ms = ?report.duration_ms, "channel: movement executed");
                session.record_activity(ActivityKind::Movement, message.clone());
            }
            InboundMessage::ObstacleAlert { distance_cm, .. } => {
                let count = session.record_obstacle();
                warn!(count, ?distance_cm, "channel: obstacle alert");
                session.record_activity(ActivityKind::Obstacle, message.clone());
                session.notify(NotificationLevel::Warning, "Obstacle detected!");
            }
            InboundMessage::StatusUpdate { .. } => {
                debug!("channel: status update");
                session.record_activity(ActivityKind::Status, message.clone());
            }
            InboundMessage::Pong => debug!("channel: pong"),
            InboundMessage::Unknown { kind } => {
                info!(?kind, "channel: ignoring unknown message type");
            }
        }
    }
}

impl Drop for ChannelManager {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if let Some(task) = inner.link_task.take() {
            task.abort();
        }
        if let Some(task) = inner.reconnect_task.take() {
            task.abort();
        }
    }
}

async fn run_event_loop(
    manager: Weak<ChannelManager>,
    mut events: mpsc::UnboundedReceiver<ChannelEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(manager) = manager.upgrade() else {
            break;
        };
        manager.handle_channel_event(event).await;
    }
}

async fn run_link(
    connector: Arc<dyn ChannelConnector>,
    url: String,
    generation: u64,
    events: mpsc::UnboundedSender<ChannelEvent>,
) {
    match connector.open(&url).await {
        Ok(ChannelLink {
            outbound,
            mut inbound,
        }) => {
            if events
                .send(ChannelEvent::Opened {
                    generation,
                    outbound,
                })
                .is_err()
            {
                return;
            }
            while let Some(event) = inbound.recv().await {
                let event = match event {
                    LinkEvent::Text(text) => ChannelEvent::Frame { generation, text },
                    LinkEvent::Error(error) => ChannelEvent::Failed { generation, error },
                };
                if events.send(event).is_err() {
                    return;
                }
            }
        }
        Err(err) => {
            let _ = events.send(ChannelEvent::Failed {
                generation,
                error: format!("{err:#}"),
            });
        }
    }
    let _ = events.send(ChannelEvent::Closed { generation });
}

#[cfg(test)]
#[path = "tests/channel_tests.rs"]
mod tests;
