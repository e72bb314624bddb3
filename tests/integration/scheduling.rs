use crate::*;

// ══ Dispatch ══════════════════════════════════════════════════════════════════

#[tokio::test]
async fn peer_is_admitted_and_runs_a_job() -> Result<()> {
    let scheduler = start_scheduler(1).await?;
    let log = Arc::new(Mutex::new(Vec::new()));
    scheduler.spawn_peer(FakeEngine::new("a", log.clone()), false);
    scheduler.wait_for_peers(1).await?;
    assert!(scheduler.admitting.is_empty());

    let result = scheduler.submit(move_request("a1 b2")).await?;
    assert_eq!(result, JobResult::Success(json!({ "move": "d4", "by": "a" })));
    assert_eq!(*log.lock().unwrap(), vec!["a"], "benchmark is not logged");

    scheduler.shutdown().await
}

#[tokio::test]
async fn busy_peer_is_skipped_for_the_next_job() -> Result<()> {
    let scheduler = start_scheduler(1).await?;
    let log = Arc::new(Mutex::new(Vec::new()));
    let slow = Duration::from_millis(300);
    scheduler.spawn_peer(FakeEngine::new("a", log.clone()).with_delay(slow), false);
    scheduler.spawn_peer(FakeEngine::new("b", log.clone()).with_delay(slow), false);
    scheduler.wait_for_peers(2).await?;

    let first = scheduler.queue.enqueue(move_request("a1")).await?;
    let second = scheduler.queue.enqueue(move_request("b2")).await?;
    assert!(scheduler.finished(first).await?.is_success());
    assert!(scheduler.finished(second).await?.is_success());

    let mut ran_on = log.lock().unwrap().clone();
    ran_on.sort();
    assert_eq!(ran_on, vec!["a", "b"]);

    scheduler.shutdown().await
}

#[tokio::test]
async fn secondary_peer_only_runs_jobs_without_primaries() -> Result<()> {
    let scheduler = start_scheduler(1).await?;
    let log = Arc::new(Mutex::new(Vec::new()));
    scheduler.spawn_peer(FakeEngine::new("secondary", log.clone()), true);
    let primary = scheduler.spawn_peer(FakeEngine::new("primary", log.clone()), false);
    scheduler.wait_for_peers(2).await?;
    wait_until(Duration::from_secs(5), || scheduler.pool.counts().secondary == 1).await?;

    for history in ["a1", "a1 b2", "a1 b2 c3"] {
        assert!(scheduler.submit(move_request(history)).await?.is_success());
    }
    assert_eq!(*log.lock().unwrap(), vec!["primary"; 3]);

    primary.abort();
    scheduler.wait_for_peers(1).await?;
    assert!(scheduler.submit(move_request("a1")).await?.is_success());
    assert_eq!(log.lock().unwrap().last(), Some(&"secondary"));

    scheduler.shutdown().await
}

#[tokio::test]
async fn job_waits_for_a_peer_to_connect() -> Result<()> {
    let scheduler = start_scheduler(1).await?;
    let id = scheduler.queue.enqueue(move_request("a1")).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(scheduler.queue.counts().await.waiting, 0, "job is held by the distributor");

    let log = Arc::new(Mutex::new(Vec::new()));
    scheduler.spawn_peer(FakeEngine::new("late", log.clone()), false);
    assert!(scheduler.finished(id).await?.is_success());
    assert_eq!(*log.lock().unwrap(), vec!["late"]);

    scheduler.shutdown().await
}
