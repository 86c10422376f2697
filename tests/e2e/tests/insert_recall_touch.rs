//! Insert a memory, recall it, and verify the best-effort access touch.

use std::time::Duration;

use engram_core::{EngineConfig, EventType};
use engram_e2e_tests::harness::{now_unix, SeedMemory, TestEngine};

#[tokio::test(flavor = "multi_thread")]
async fn insert_recall_touch() {
    let now = now_unix();
    let (dir, ids) = TestEngine::seed(&[SeedMemory {
        content: "user prefers tea",
        event_type: EventType::Preference,
        importance: 0.8,
        create_time: now - 10,
        last_access_time: now - 10,
        session_id: None,
    }]);
    let m1 = ids[0];

    let mut config = EngineConfig::default();
    config.forgetting_agent.enabled = false;
    let harness = TestEngine::over_dir(dir, config, &[]).await;
    let engine = &harness.engine;

    let filter = engram_core::MemoryFilter::active();
    let outcome = engine.recall("what does the user drink", 3, &filter).await;

    assert_eq!(outcome.degradation, engram_core::Degradation::None);
    assert_eq!(outcome.hits[0].doc_id, m1);
    assert!(outcome.hits[0].component_scores.dense.unwrap() >= 0.5);
    assert!(outcome.hits[0].content.contains("tea"));

    // The touch runs detached; poll until it lands
    let mut touched = false;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        let record = engine.store().get(m1).unwrap().unwrap();
        if record.access_count == 1 {
            touched = true;
            assert!(record.last_access_time >= now - 1);
            break;
        }
    }
    assert!(touched, "recall did not touch the returned memory");

    // Exactly one increment for one recall
    let record = engine.store().get(m1).unwrap().unwrap();
    assert_eq!(record.access_count, 1);

    engine.stop().await;
}
