use super::*;
use shared::domain::{Command, StepId};

fn step(id: i64, command: Command, duration_ms: u64) -> SequenceStep {
    SequenceStep {
        id: StepId(id),
        command,
        duration_ms,
    }
}

#[tokio::test]
async fn health_check_succeeds_for_live_pool() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.health_check().await.expect("health check");
}

#[tokio::test]
async fn saves_and_loads_sequence_by_name() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let steps = vec![
        step(1, Command::Forward, 1000),
        step(2, Command::Right, 500),
        step(3, Command::Stop, 100),
    ];

    storage.save_sequence("patrol", &steps).await.expect("save");
    let loaded = storage
        .load_sequence("patrol")
        .await
        .expect("load")
        .expect("present");
    assert_eq!(loaded, steps);
}

#[tokio::test]
async fn missing_sequence_loads_as_none() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    assert!(storage.load_sequence("nope").await.expect("load").is_none());
}

#[tokio::test]
async fn last_write_for_a_name_wins() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage
        .save_sequence("demo", &[step(1, Command::Forward, 1000)])
        .await
        .expect("first save");
    storage
        .save_sequence("demo", &[step(7, Command::Backward, 200), step(8, Command::Stop, 100)])
        .await
        .expect("second save");

    let loaded = storage.load_sequence("demo").await.expect("load").expect("present");
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded[0].command, Command::Backward);

    let summaries = storage.list_sequences().await.expect("list");
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].name, "demo");
    assert_eq!(summaries[0].step_count, 2);
}

#[tokio::test]
async fn lists_sequences_in_name_order_and_deletes() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.save_sequence("zeta", &[]).await.expect("save zeta");
    storage
        .save_sequence("alpha", &[step(1, Command::Left, 300)])
        .await
        .expect("save alpha");

    let names: Vec<String> = storage
        .list_sequences()
        .await
        .expect("list")
        .into_iter()
        .map(|summary| summary.name)
        .collect();
    assert_eq!(names, vec!["alpha".to_string(), "zeta".to_string()]);

    assert!(storage.delete_sequence("zeta").await.expect("delete"));
    assert!(!storage.delete_sequence("zeta").await.expect("delete again"));
    assert_eq!(storage.list_sequences().await.expect("list").len(), 1);
}

#[test]
fn memory_urls_have_no_file_path() {
    assert_eq!(sqlite_path("sqlite::memory:"), None);
    assert_eq!(
        sqlite_path("sqlite://./data/sequences.db?mode=rwc"),
        Some(PathBuf::from("./data/sequences.db"))
    );
}
