use super::*;
use crate::test_support::{next_matching, next_peer, MemoryStore, Peer, ScriptedConnector};
use serde_json::json;
use shared::domain::Command;
use std::time::Duration;
use tokio::sync::mpsc;

fn client_with(settings: Settings) -> (ControlClient, mpsc::UnboundedReceiver<Peer>) {
    let (connector, peers) = ScriptedConnector::new(true);
    let client =
        ControlClient::new_with_dependencies(settings, connector, Arc::new(MemoryStore::default()));
    (client, peers)
}

#[tokio::test(start_paused = true)]
async fn settings_flow_into_every_component() {
    let settings = Settings {
        device_id: 12,
        default_speed: 4,
        command_origin: "bench".into(),
        step_guard_ms: 50,
        ..Settings::default()
    };
    let (client, mut peers) = client_with(settings);
    assert_eq!(client.device_id(), DeviceId(12));
    assert_eq!(client.channel().options().url, client.settings().ws_url);
    assert_eq!(client.api().base_url(), "http://127.0.0.1:5500");

    client
        .connect_and_wait(Duration::from_secs(5))
        .await
        .expect("connect");
    let mut peer = next_peer(&mut peers).await;
    assert_eq!(peer.next_frame().await["data"]["device_name"], "Car-12");

    client
        .dispatcher()
        .send_command(Command::Forward, 1000, None)
        .await
        .expect("send");
    let frame = peer.next_frame().await;
    assert_eq!(frame["data"]["speed"], 4);
    assert_eq!(frame["data"]["meta"]["origin"], "bench");
}

#[tokio::test(start_paused = true)]
async fn template_run_reports_progress_and_confirmations_count() {
    let (client, mut peers) = client_with(Settings::default());
    let mut events = client.subscribe_events();
    client
        .connect_and_wait(Duration::from_secs(5))
        .await
        .expect("connect");
    let mut peer = next_peer(&mut peers).await;
    let _registration = peer.next_frame().await;

    client
        .sequences()
        .load_template(shared::sequence::Template::Circle)
        .expect("template");
    let report = client.sequences().execute().await.expect("run");
    assert_eq!(report.steps_sent, 8);

    for _ in 0..8 {
        let frame = peer.next_frame().await;
        assert_eq!(frame["data"]["command"], "forward_right");
        peer.push(json!({"type": "command_sent", "command": "forward_right", "duration_ms": 1000}));
    }
    next_matching(&mut events, |event| {
        matches!(event, ClientEvent::StatsUpdated(stats) if stats.command_count == 8)
    })
    .await;
    assert_eq!(client.session().activity(Some(ActivityKind::Movement)).len(), 8);

    client.disconnect().await;
    assert_eq!(client.channel().state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn new_opens_sqlite_store_from_settings() {
    let settings = Settings {
        sequence_db_url: "sqlite::memory:".into(),
        ..Settings::default()
    };
    let client = ControlClient::new(settings).await.expect("client");
    assert_eq!(client.channel().state(), ConnectionState::Disconnected);
    client.sequences().store_health().await.expect("store reachable");

    client
        .sequences()
        .append(Command::Stop, 100)
        .expect("append");
    client.sequences().save("halt").await.expect("save");
    assert_eq!(client.sequences().saved_sequences().await.expect("list").len(), 1);
}
