use std::sync::Arc;

use chrono::Utc;
use shared::{
    domain::{key_binding, Command, DeviceId},
    protocol::{CommandMeta, MovementCommand, OutboundMessage},
};
use tracing::{debug, info, warn};

use crate::{
    channel::ChannelManager,
    error::{ChannelError, DispatchError},
    session::Session,
};

/// Builds outbound registration and movement messages and hands them to the
/// channel. Confirmation counting happens on the inbound path.
#[derive(Clone)]
pub struct CommandDispatcher {
    channel: Arc<ChannelManager>,
    session: Arc<Session>,
    origin: String,
}

impl CommandDispatcher {
    pub fn new(
        channel: Arc<ChannelManager>,
        session: Arc<Session>,
        origin: impl Into<String>,
    ) -> Self {
        Self {
            channel,
            session,
            origin: origin.into(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_connected()
    }

    pub async fn register_device(&self, device_id: DeviceId) -> Result<(), ChannelError> {
        info!(device_id = device_id.0, "dispatch: registering device");
        self.channel
            .send(&OutboundMessage::register_device(device_id))
            .await
    }

    /// Switches the controlled device and announces it to the server.
    pub async fn select_device(&self, device_id: DeviceId) -> Result<(), DispatchError> {
        if device_id.0 <= 0 {
            warn!(device_id = device_id.0, "dispatch: rejected device id");
            return Err(DispatchError::InvalidDevice(device_id.0));
        }
        self.session.set_device_id(device_id);
        self.register_device(device_id).await?;
        Ok(())
    }

    /// `speed` of `None` or zero falls back to the session speed.
    pub fn movement_message(
        &self,
        command: &str,
        duration_ms: u64,
        speed: Option<u32>,
    ) -> OutboundMessage {
        let speed = speed
            .filter(|speed| *speed > 0)
            .unwrap_or_else(|| self.session.speed());
        OutboundMessage::MovementCommand(MovementCommand {
            device_id: self.session.device_id(),
            command: command.to_string(),
            duration_ms,
            speed,
            meta: CommandMeta::captured_at(self.origin.as_str(), Utc::now()),
        })
    }

    /// Sends a raw command identifier. Identifiers outside the catalog are
    /// forwarded unchanged; the server decides what to do with them.
    pub async fn send_movement(
        &self,
        command: &str,
        duration_ms: u64,
        speed: Option<u32>,
    ) -> Result<(), ChannelError> {
        let message = self.movement_message(command, duration_ms, speed);
        debug!(command, duration_ms, "dispatch: movement");
        self.channel.send(&message).await
    }

    pub async fn send_command(
        &self,
        command: Command,
        duration_ms: u64,
        speed: Option<u32>,
    ) -> Result<(), ChannelError> {
        self.send_movement(command.as_str(), duration_ms, speed)
            .await
    }

    /// Sends the command bound to `key`, if any. Bindings without a fixed
    /// duration use `current_duration_ms`.
    pub async fn send_key(
        &self,
        key: &str,
        current_duration_ms: u64,
    ) -> Result<Option<Command>, ChannelError> {
        let Some(binding) = key_binding(key) else {
            return Ok(None);
        };
        let duration_ms = binding.duration_ms.unwrap_or(current_duration_ms);
        self.send_command(binding.command, duration_ms, None).await?;
        Ok(Some(binding.command))
    }
}

#[cfg(test)]
#[path = "tests/dispatcher_tests.rs"]
mod tests;
