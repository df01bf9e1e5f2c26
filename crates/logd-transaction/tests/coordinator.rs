use std::sync::Arc;
use std::time::Duration;

use logd_storage::{Storage, VirtualPath};
use logd_transaction::{Coordinator, Error};

fn path(p: &str) -> VirtualPath {
    VirtualPath::parse(p).unwrap()
}

#[tokio::test]
async fn two_participant_transaction_commits_atomically() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(Storage::open(dir.path()).unwrap());
    let coordinator = Coordinator::new(storage.clone());

    let id = coordinator.create(2, None, 1).unwrap();

    let id_a = id.clone();
    let coord_a = coordinator.clone();
    let task_a = tokio::spawn(async move { coord_a.join(&id_a, path("/users"), "!insert {}", 10).await });

    let id_b = id.clone();
    let coord_b = coordinator.clone();
    let task_b = tokio::spawn(async move { coord_b.join(&id_b, path("/proc/processes"), "!insert {}", 11).await });

    let (commit_a, commit_b) = tokio::join!(task_a, task_b);
    let commit_a = commit_a.unwrap().unwrap();
    let commit_b = commit_b.unwrap().unwrap();
    assert_eq!(commit_a, commit_b, "both participants must observe the same commitCount");

    assert_eq!(storage.list_diffs(&path("/users")).unwrap(), vec![(commit_a, logd_storage::TxSeq(1))]);
    let log = storage.read_transaction_log().unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].writes.len(), 2);
}

#[tokio::test]
async fn abort_releases_blocked_participant_and_cleans_pending_files() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(Storage::open(dir.path()).unwrap());
    let coordinator = Coordinator::new(storage.clone());

    let id = coordinator.create(2, None, 1).unwrap();
    let p = path("/x");

    let id_join = id.clone();
    let coord_join = coordinator.clone();
    let p2 = p.clone();
    let joiner = tokio::spawn(async move { coord_join.join(&id_join, p2, "!insert {}", 5).await });

    // Give the joiner a chance to register before we abort.
    tokio::time::sleep(Duration::from_millis(20)).await;
    coordinator.abort(&id).unwrap();

    let result = joiner.await.unwrap();
    assert!(matches!(result, Err(Error::TransactionAborted(_))));

    let dir_entries: Vec<_> = std::fs::read_dir(storage.layout().paths_dir(&p)).unwrap().collect();
    assert!(
        dir_entries.iter().all(|e| !e.as_ref().unwrap().file_name().to_string_lossy().ends_with(".pending")),
        "no pending file should remain after abort"
    );
}

#[tokio::test]
async fn deadline_aborts_transaction_before_last_arrival() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(Storage::open(dir.path()).unwrap());
    let coordinator = Coordinator::new(storage.clone());

    let id = coordinator.create(2, Some(Duration::from_millis(20)), 1).unwrap();
    let result = coordinator.join(&id, path("/x"), "!insert {}", 5).await;
    assert!(matches!(result, Err(Error::DeadlineExceeded(_))), "lone participant should see a deadline error");

    let status = coordinator.status(&id).unwrap();
    assert_eq!(status.status, logd_storage::TransactionStatus::Aborted);
}
