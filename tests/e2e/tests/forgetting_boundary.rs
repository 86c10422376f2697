//! Forgetting pass boundary: retention age and decayed importance must both
//! cross their thresholds before a memory is deleted.

use engram_core::{decayed_importance, EngineConfig, MemoryStatus};
use engram_e2e_tests::harness::{now_unix, SeedMemory, TestEngine};
use tokio_util::sync::CancellationToken;

#[tokio::test(flavor = "multi_thread")]
async fn forgetting_respects_retention_and_threshold() {
    let now = now_unix();
    let (dir, ids) = TestEngine::seed(&[
        // 60 days old, importance 0.15: decayed = 0.15 * 0.99^60 = 0.082 < 0.1
        SeedMemory::at("old trivial remark", 0.15, now - 60 * 86_400),
        // 20 days old: below retention, survives regardless of importance
        SeedMemory::at("recent trivial remark", 0.15, now - 20 * 86_400),
        // 60 days old but important: decayed importance stays above 0.1
        SeedMemory::at("old but important fact", 0.9, now - 60 * 86_400),
    ]);
    let (doomed, young, strong) = (ids[0], ids[1], ids[2]);

    // Sanity-check the reference decay value
    let decayed = decayed_importance(0.15, 60.0, 0.01);
    assert!((decayed - 0.082).abs() < 0.001);

    let mut config = EngineConfig::default();
    config.forgetting_agent.enabled = false; // manual pass only
    config.forgetting_agent.retention_days = 30.0;
    config.forgetting_agent.importance_decay_rate = 0.01;
    config.forgetting_agent.importance_threshold = 0.1;
    config.forgetting_agent.forgetting_batch_size = 2;

    let harness = TestEngine::over_dir(dir, config, &[]).await;
    let engine = &harness.engine;

    let summary = engine
        .forgetting()
        .run_once(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.scanned, 3);
    assert_eq!(summary.deleted, 1);

    let store = engine.store();
    assert_eq!(store.get(doomed).unwrap().unwrap().status, MemoryStatus::Deleted);
    assert_eq!(store.get(young).unwrap().unwrap().status, MemoryStatus::Active);
    assert_eq!(store.get(strong).unwrap().unwrap().status, MemoryStatus::Active);

    // Deleted memories drop out of recall entirely
    let outcome = engine
        .recall("trivial remark", 5, &engram_core::MemoryFilter::active())
        .await;
    assert!(outcome.hits.iter().all(|h| h.doc_id != doomed));

    engine.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn cancelled_pass_stops_at_page_boundary() {
    let now = now_unix();
    let seeds: Vec<SeedMemory> = (0..6)
        .map(|_| SeedMemory::at("memory", 0.9, now - 86_400))
        .collect();
    let (dir, _ids) = TestEngine::seed(&seeds);

    let mut config = EngineConfig::default();
    config.forgetting_agent.enabled = false;
    let harness = TestEngine::over_dir(dir, config, &[]).await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = harness.engine.forgetting().run_once(&cancel).await;
    assert!(matches!(result, Err(engram_core::MemoryError::Cancelled)));

    // Nothing was deleted
    assert_eq!(harness.engine.store().count_by_status().unwrap().active, 6);
    harness.engine.stop().await;
}
