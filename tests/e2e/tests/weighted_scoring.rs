//! Weighted recall tilt: with recency weighted heavily, a fresh low-importance
//! memory outranks an old high-importance one at equal similarity.

use engram_core::{EngineConfig, EventType, MemoryFilter, RecallStrategy};
use engram_e2e_tests::harness::{now_unix, SeedMemory, TestEngine};

#[tokio::test(flavor = "multi_thread")]
async fn weighted_recency_dominates() {
    let now = now_unix();
    // Both memories embed onto the same topic axis, so their fused
    // similarities match and the scorer decides the order
    let (dir, ids) = TestEngine::seed(&[
        SeedMemory {
            content: "user enjoys tea ceremonies",
            event_type: EventType::Preference,
            importance: 0.9,
            create_time: now - 120 * 86_400,
            last_access_time: now - 90 * 86_400,
            session_id: None,
        },
        SeedMemory {
            content: "user enjoys tea with milk",
            event_type: EventType::Preference,
            importance: 0.5,
            create_time: now - 10 * 86_400,
            last_access_time: now - 86_400,
            session_id: None,
        },
    ]);
    let (m_old, m_new) = (ids[0], ids[1]);

    let mut config = EngineConfig::default();
    config.forgetting_agent.enabled = false;
    config.recall_engine.recall_strategy = RecallStrategy::Weighted;
    config.recall_engine.similarity_weight = 0.4;
    config.recall_engine.importance_weight = 0.2;
    config.recall_engine.recency_weight = 0.4;
    config.recall_engine.recency_tau_days = 30.0;

    let harness = TestEngine::over_dir(dir, config, &[]).await;
    let engine = &harness.engine;

    let outcome = engine.recall("tea", 2, &MemoryFilter::active()).await;
    assert_eq!(outcome.hits.len(), 2);
    assert_eq!(outcome.hits[0].doc_id, m_new, "recency should dominate");
    assert_eq!(outcome.hits[1].doc_id, m_old);

    // Recency components reflect exp(-dt/tau)
    let fresh = outcome.hits[0].component_scores.recency.unwrap();
    let stale = outcome.hits[1].component_scores.recency.unwrap();
    assert!(fresh > 0.9, "1-day-old access, tau 30d: {fresh}");
    assert!(stale < 0.1, "90-day-old access, tau 30d: {stale}");

    engine.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn similarity_strategy_ignores_recency() {
    let now = now_unix();
    let (dir, _ids) = TestEngine::seed(&[
        SeedMemory {
            content: "user enjoys tea ceremonies",
            event_type: EventType::Preference,
            importance: 0.9,
            create_time: now - 120 * 86_400,
            last_access_time: now - 90 * 86_400,
            session_id: None,
        },
        SeedMemory {
            content: "user enjoys tea with milk",
            event_type: EventType::Preference,
            importance: 0.5,
            create_time: now - 10 * 86_400,
            last_access_time: now - 86_400,
            session_id: None,
        },
    ]);

    let mut config = EngineConfig::default();
    config.forgetting_agent.enabled = false;
    config.recall_engine.recall_strategy = RecallStrategy::Similarity;

    let harness = TestEngine::over_dir(dir, config, &[]).await;
    let outcome = harness.engine.recall("tea", 2, &MemoryFilter::active()).await;

    assert_eq!(outcome.hits.len(), 2);
    for hit in &outcome.hits {
        assert!(hit.component_scores.recency.is_none());
    }
    harness.engine.stop().await;
}
