//! Nuke lifecycle: cancellable until fire, destructive after.

use std::time::Duration;

use engram_core::{EngineConfig, NukeState};
use engram_e2e_tests::harness::{now_unix, SeedMemory, TestEngine};

fn config_with_delay(delay_secs: f64) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.forgetting_agent.enabled = false;
    config.forgetting_agent.nuke_delay_secs = delay_secs;
    config
}

#[tokio::test(flavor = "multi_thread")]
async fn nuke_cancelled_before_fire_changes_nothing() {
    let now = now_unix();
    let (dir, _ids) = TestEngine::seed(&[
        SeedMemory::at("user prefers tea", 0.8, now - 100),
        SeedMemory::at("user loves jazz", 0.6, now - 50),
    ]);

    let harness = TestEngine::over_dir(dir, config_with_delay(0.3), &[]).await;
    let engine = &harness.engine;
    let before = engine.store().count_by_status().unwrap();

    let status = engine.forgetting().request_nuke().unwrap();
    assert_eq!(status.state, NukeState::Pending);
    assert_eq!(engine.status().unwrap().nuke.unwrap().state, NukeState::Pending);

    // Cancel mid-countdown
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(engine.forgetting().cancel_nuke(status.operation_id).unwrap());
    assert_eq!(
        engine.forgetting().nuke_status().unwrap().state,
        NukeState::Cancelled
    );

    // Well past the scheduled fire time the store is unchanged
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(engine.store().count_by_status().unwrap(), before);

    // Recall still sees the memories
    let outcome = engine
        .recall("tea", 5, &engram_core::MemoryFilter::active())
        .await;
    assert!(!outcome.hits.is_empty());

    engine.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn nuke_fires_and_wipes_everything() {
    let now = now_unix();
    let (dir, _ids) = TestEngine::seed(&[
        SeedMemory::at("user prefers tea", 0.8, now - 100),
        SeedMemory::at("user loves jazz", 0.6, now - 50),
    ]);

    let harness = TestEngine::over_dir(dir, config_with_delay(0.05), &[]).await;
    let engine = &harness.engine;

    let status = engine.forgetting().request_nuke().unwrap();
    assert_eq!(status.state, NukeState::Pending);

    // Too late to cancel once fired
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(engine.forgetting().nuke_status().unwrap().state, NukeState::Fired);
    assert!(!engine.forgetting().cancel_nuke(status.operation_id).unwrap());

    let counts = engine.store().count_by_status().unwrap();
    assert_eq!(counts.total(), 0);

    let status_after = engine.status().unwrap();
    assert_eq!(status_after.vectors, 0);
    assert_eq!(status_after.sparse_documents, 0);

    let outcome = engine
        .recall("tea", 5, &engram_core::MemoryFilter::active())
        .await;
    assert!(outcome.hits.is_empty());

    engine.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn second_nuke_rejected_while_pending() {
    let harness = TestEngine::new(config_with_delay(0.5), &[]).await;
    let engine = &harness.engine;

    let first = engine.forgetting().request_nuke().unwrap();
    assert!(engine.forgetting().request_nuke().is_err());
    engine.forgetting().cancel_nuke(first.operation_id).unwrap();

    engine.stop().await;
}
