use shared::{
    domain::{Command, StepId},
    sequence::SequenceStep,
};
use storage::{SequenceStore, Storage};

#[tokio::test]
async fn saved_sequences_survive_reopening_the_database_file() {
    let temp_dir = tempfile::tempdir().expect("temp dir");
    let db_path = temp_dir.path().join("nested").join("sequences.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let steps = vec![
        SequenceStep {
            id: StepId(1),
            command: Command::ForwardLeft,
            duration_ms: 1500,
        },
        SequenceStep {
            id: StepId(2),
            command: Command::Stop,
            duration_ms: 100,
        },
    ];

    {
        let storage = Storage::new(&database_url).await.expect("open db");
        storage.save_sequence("figure", &steps).await.expect("save");
        storage.pool().close().await;
    }

    assert!(db_path.exists(), "database file should exist: {}", db_path.display());

    let reopened = Storage::new(&database_url).await.expect("reopen db");
    let loaded = reopened
        .load_sequence("figure")
        .await
        .expect("load")
        .expect("present");
    assert_eq!(loaded, steps);
}
