//! In-memory connector and helpers shared by the unit tests.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use shared::sequence::SequenceStep;
use storage::{SavedSequenceSummary, SequenceStore};
use tokio::{
    sync::{broadcast, mpsc},
    time::Instant,
};

use crate::{
    channel::{ChannelManager, ChannelOptions},
    events::{ClientEvent, ConnectionState},
    session::Session,
    transport::{ChannelConnector, ChannelLink, LinkEvent},
};

pub(crate) const TEST_RECONNECT_INTERVAL: Duration = Duration::from_secs(3);
const WAIT_LIMIT: Duration = Duration::from_secs(600);

/// Server side of a link opened by [`ScriptedConnector`].
pub(crate) struct Peer {
    pub sent: mpsc::UnboundedReceiver<String>,
    pub inject: mpsc::UnboundedSender<LinkEvent>,
}

impl Peer {
    pub async fn next_frame(&mut self) -> Value {
        let text = tokio::time::timeout(WAIT_LIMIT, self.sent.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("link closed");
        serde_json::from_str(&text).expect("frame is json")
    }

    pub fn push(&self, value: Value) {
        self.push_raw(&value.to_string());
    }

    pub fn push_raw(&self, text: &str) {
        self.inject
            .send(LinkEvent::Text(text.to_string()))
            .expect("link open");
    }
}

pub(crate) struct ScriptedConnector {
    accept: AtomicBool,
    attempts: Mutex<Vec<Instant>>,
    peers: mpsc::UnboundedSender<Peer>,
}

impl ScriptedConnector {
    pub fn new(accept: bool) -> (Arc<Self>, mpsc::UnboundedReceiver<Peer>) {
        let (peers, peers_rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            accept: AtomicBool::new(accept),
            attempts: Mutex::new(Vec::new()),
            peers,
        });
        (connector, peers_rx)
    }

    pub fn set_accept(&self, accept: bool) {
        self.accept.store(accept, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().expect("attempts lock").clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().expect("attempts lock").len()
    }
}

#[async_trait]
impl ChannelConnector for ScriptedConnector {
    async fn open(&self, _url: &str) -> Result<ChannelLink> {
        self.attempts
            .lock()
            .expect("attempts lock")
            .push(Instant::now());
        if !self.accept.load(Ordering::SeqCst) {
            return Err(anyhow!("connection refused"));
        }

        let (outbound, sent) = mpsc::unbounded_channel();
        let (inject, inbound) = mpsc::unbounded_channel();
        let _ = self.peers.send(Peer { sent, inject });
        Ok(ChannelLink { outbound, inbound })
    }
}

/// Sequence store for tests running on a paused clock, where the SQLite
/// worker thread would race the auto-advancing timer.
#[derive(Default)]
pub(crate) struct MemoryStore {
    saved: Mutex<BTreeMap<String, Vec<SequenceStep>>>,
}

#[async_trait]
impl SequenceStore for MemoryStore {
    async fn save_sequence(&self, name: &str, steps: &[SequenceStep]) -> Result<()> {
        self.saved
            .lock()
            .expect("store lock")
            .insert(name.to_string(), steps.to_vec());
        Ok(())
    }

    async fn load_sequence(&self, name: &str) -> Result<Option<Vec<SequenceStep>>> {
        Ok(self.saved.lock().expect("store lock").get(name).cloned())
    }

    async fn list_sequences(&self) -> Result<Vec<SavedSequenceSummary>> {
        Ok(self
            .saved
            .lock()
            .expect("store lock")
            .iter()
            .map(|(name, steps)| SavedSequenceSummary {
                name: name.clone(),
                step_count: steps.len(),
                saved_at: Utc::now(),
            })
            .collect())
    }

    async fn delete_sequence(&self, name: &str) -> Result<bool> {
        Ok(self.saved.lock().expect("store lock").remove(name).is_some())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

pub(crate) fn test_options(max_reconnect_attempts: u32) -> ChannelOptions {
    ChannelOptions {
        url: "ws://rover.test/ws".into(),
        reconnect_interval: TEST_RECONNECT_INTERVAL,
        max_reconnect_attempts,
    }
}

/// Opens a channel for `session` and consumes the automatic registration
/// frame, leaving the peer ready for the frames under test.
pub(crate) async fn connected_channel(session: Arc<Session>) -> (Arc<ChannelManager>, Peer) {
    let (connector, mut peers) = ScriptedConnector::new(true);
    let manager = ChannelManager::new(test_options(5), session, connector);
    manager.connect().await;
    let mut peer = next_peer(&mut peers).await;
    wait_for_state(&manager, ConnectionState::Connected).await;
    let registration = peer.next_frame().await;
    assert_eq!(registration["type"], "register_device");
    (manager, peer)
}

pub(crate) async fn next_peer(peers: &mut mpsc::UnboundedReceiver<Peer>) -> Peer {
    tokio::time::timeout(WAIT_LIMIT, peers.recv())
        .await
        .expect("timed out waiting for link")
        .expect("connector dropped")
}

pub(crate) async fn wait_for_state(manager: &ChannelManager, state: ConnectionState) {
    let mut rx = manager.watch_state();
    tokio::time::timeout(WAIT_LIMIT, rx.wait_for(|current| *current == state))
        .await
        .expect("timed out waiting for connection state")
        .map(|_| ())
        .expect("state sender dropped");
}

/// Receives events until one matches, failing the test on timeout.
pub(crate) async fn next_matching<F>(
    events: &mut broadcast::Receiver<ClientEvent>,
    mut predicate: F,
) -> ClientEvent
where
    F: FnMut(&ClientEvent) -> bool,
{
    tokio::time::timeout(WAIT_LIMIT, async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}
