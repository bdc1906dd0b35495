use std::sync::Arc;

use anyhow::{Context, Result};
use shared::domain::DeviceId;
use storage::{SequenceStore, Storage};
use tokio::sync::broadcast;
use tracing::info;

pub mod api;
pub mod channel;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod sequence;
pub mod session;
pub mod transport;

pub use api::ApiClient;
pub use channel::{ChannelManager, ChannelOptions};
pub use config::{load_settings, Settings};
pub use dispatcher::CommandDispatcher;
pub use error::{ApiError, ChannelError, DispatchError, SequenceError};
pub use events::{
    ActivityEntry, ActivityKind, ClientEvent, ConnectionState, Notification, NotificationLevel,
    SessionStats,
};
pub use sequence::{ExecutionReport, SequenceExecutor};
pub use session::Session;
pub use transport::{ChannelConnector, WebSocketConnector};

/// Everything a control panel needs, wired around one shared [`Session`].
pub struct ControlClient {
    settings: Settings,
    session: Arc<Session>,
    channel: Arc<ChannelManager>,
    dispatcher: CommandDispatcher,
    sequences: Arc<SequenceExecutor>,
    api: ApiClient,
}

impl ControlClient {
    /// Uses the WebSocket transport and the SQLite sequence store named by
    /// `settings`. Must be called from within a tokio runtime.
    pub async fn new(settings: Settings) -> Result<Self> {
        let store = Storage::new(&settings.sequence_db_url)
            .await
            .with_context(|| format!("failed to open sequence store {}", settings.sequence_db_url))?;
        Ok(Self::new_with_dependencies(
            settings,
            Arc::new(WebSocketConnector),
            Arc::new(store),
        ))
    }

    pub fn new_with_dependencies(
        settings: Settings,
        connector: Arc<dyn ChannelConnector>,
        store: Arc<dyn SequenceStore>,
    ) -> Self {
        let session = Session::from_settings(&settings);
        let channel = ChannelManager::new(
            ChannelOptions {
                url: settings.ws_url.clone(),
                reconnect_interval: settings.reconnect_interval(),
                max_reconnect_attempts: settings.max_reconnect_attempts,
            },
            Arc::clone(&session),
            connector,
        );
        let dispatcher = CommandDispatcher::new(
            Arc::clone(&channel),
            Arc::clone(&session),
            settings.command_origin.clone(),
        );
        let sequences = Arc::new(SequenceExecutor::new(
            dispatcher.clone(),
            Arc::clone(&session),
            store,
            settings.step_guard(),
        ));
        let api = ApiClient::new(settings.api_base_url.clone());
        info!(
            ws_url = %settings.ws_url,
            device_id = settings.device_id,
            "client: initialized"
        );

        Self {
            settings,
            session,
            channel,
            dispatcher,
            sequences,
            api,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn channel(&self) -> &Arc<ChannelManager> {
        &self.channel
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    pub fn sequences(&self) -> &Arc<SequenceExecutor> {
        &self.sequences
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn device_id(&self) -> DeviceId {
        self.session.device_id()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.session.subscribe_events()
    }

    pub async fn connect(&self) {
        self.channel.connect().await;
    }

    pub async fn disconnect(&self) {
        self.channel.disconnect().await;
    }

    /// Connects and waits until the channel is open or `timeout` elapses.
    pub async fn connect_and_wait(&self, timeout: std::time::Duration) -> Result<()> {
        let mut state = self.channel.watch_state();
        self.channel.connect().await;
        tokio::time::timeout(
            timeout,
            state.wait_for(|state| *state == ConnectionState::Connected),
        )
        .await
        .with_context(|| format!("channel did not connect within {timeout:?}"))?
        .context("channel manager stopped")?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
