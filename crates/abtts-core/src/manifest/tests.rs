use super::*;

#[tokio::test]
async fn marks_partition_the_index_range() {
    let m = RunManifest::open_memory(6).await.unwrap();
    m.mark_completed(0).await.unwrap();
    m.mark_completed(4).await.unwrap();
    m.mark_failed(2).await.unwrap();

    let completed = m.completed_indices().await.unwrap();
    let failed = m.failed_indices().await.unwrap();
    let missing = m.missing_indices().await.unwrap();

    assert_eq!(completed.iter().copied().collect::<Vec<_>>(), vec![0, 4]);
    assert_eq!(failed.iter().copied().collect::<Vec<_>>(), vec![2]);
    assert_eq!(missing.iter().copied().collect::<Vec<_>>(), vec![1, 3, 5]);
    assert_eq!(completed.len() + failed.len() + missing.len(), 6);
}

#[tokio::test]
async fn failed_never_downgrades_completed() {
    let m = RunManifest::open_memory(3).await.unwrap();
    m.mark_completed(1).await.unwrap();
    m.mark_failed(1).await.unwrap();
    assert!(m.completed_indices().await.unwrap().contains(&1));
    assert!(m.failed_indices().await.unwrap().is_empty());
}

#[tokio::test]
async fn completed_upgrades_failed_on_resume() {
    let m = RunManifest::open_memory(3).await.unwrap();
    m.mark_failed(2).await.unwrap();
    m.mark_completed(2).await.unwrap();
    assert!(m.completed_indices().await.unwrap().contains(&2));
    assert!(m.failed_indices().await.unwrap().is_empty());
}

#[tokio::test]
async fn marks_are_idempotent() {
    let m = RunManifest::open_memory(2).await.unwrap();
    m.mark_completed(0).await.unwrap();
    m.mark_completed(0).await.unwrap();
    assert_eq!(m.completed_indices().await.unwrap().len(), 1);
}

#[tokio::test]
async fn reopen_with_different_total_is_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    {
        let m = RunManifest::open_or_init(dir.path(), 10).await.unwrap();
        m.mark_completed(3).await.unwrap();
    }
    let err = RunManifest::open_or_init(dir.path(), 12).await;
    assert!(matches!(err, Err(ManifestError::Corrupt(_))));
}

#[tokio::test]
async fn survives_reopen_with_same_total() {
    let dir = tempfile::tempdir().unwrap();
    {
        let m = RunManifest::open_or_init(dir.path(), 10).await.unwrap();
        m.mark_completed(3).await.unwrap();
        m.mark_failed(7).await.unwrap();
    }
    let m = RunManifest::open_or_init(dir.path(), 10).await.unwrap();
    assert!(m.completed_indices().await.unwrap().contains(&3));
    assert!(m.failed_indices().await.unwrap().contains(&7));
    assert_eq!(m.missing_indices().await.unwrap().len(), 8);
}

#[tokio::test]
async fn open_existing_absent_is_none() {
    let dir = tempfile::tempdir().unwrap();
    let m = RunManifest::open_existing(dir.path()).await.unwrap();
    assert!(m.is_none());
}

#[tokio::test]
async fn concurrent_marks_from_clones_all_land() {
    let dir = tempfile::tempdir().unwrap();
    let m = RunManifest::open_or_init(dir.path(), 64).await.unwrap();

    let mut handles = Vec::new();
    for worker in 0..4usize {
        let m = m.clone();
        handles.push(tokio::spawn(async move {
            for idx in (worker..64).step_by(4) {
                m.mark_completed(idx).await.unwrap();
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    assert_eq!(m.completed_indices().await.unwrap().len(), 64);
    assert!(m.missing_indices().await.unwrap().is_empty());
}
