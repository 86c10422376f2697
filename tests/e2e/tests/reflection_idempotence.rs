//! The same dialogue window reflected twice produces exactly one memory.

use engram_core::{DialogueMessage, EngineConfig, EventType, Role};
use engram_e2e_tests::harness::{now_unix, TestEngine};

const EXTRACTION: &str = r#"[{"content": "The user loves jazz", "event_type": "preference"}]"#;

fn window(now: i64) -> Vec<DialogueMessage> {
    vec![
        DialogueMessage::new(Role::User, "I love jazz", now),
        DialogueMessage::new(Role::Assistant, "Noted - jazz lover.", now + 1),
    ]
}

#[tokio::test(flavor = "multi_thread")]
async fn reflection_idempotence() {
    let mut config = EngineConfig::default();
    config.forgetting_agent.enabled = false;
    // Second extraction replays the same events; no scoring call follows
    // because the duplicate never survives validation
    let harness = TestEngine::new(config, &[EXTRACTION, "[0.8]", EXTRACTION]).await;
    let engine = &harness.engine;
    let now = now_unix();

    let first = engine
        .reflection()
        .reflect_and_store(&window(now), "s1", None, None)
        .await
        .unwrap();
    assert_eq!(first.stored_ids.len(), 1);

    let record = engine.store().get(first.stored_ids[0]).unwrap().unwrap();
    assert_eq!(record.event_type, EventType::Preference);
    assert!(record.content.contains("jazz"));

    let second = engine
        .reflection()
        .reflect_and_store(&window(now), "s1", None, None)
        .await
        .unwrap();
    assert!(second.stored_ids.is_empty());
    assert_eq!(second.skipped, 1);

    assert_eq!(engine.store().count_by_status().unwrap().active, 1);
    engine.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn reflection_through_message_flow() {
    let mut config = EngineConfig::default();
    config.reflection_engine.summary_trigger_rounds = 1;
    config.forgetting_agent.enabled = false;
    let harness = TestEngine::new(config, &[EXTRACTION, "[0.8]"]).await;
    let engine = &harness.engine;
    engine.start();

    let now = now_unix();
    engine.on_user_message("s1", None, "I love jazz", now);
    engine.on_assistant_message("s1", None, "Noted - jazz lover.", now + 1);

    // stop() awaits the detached reflection task
    engine.stop().await;
    assert_eq!(engine.store().count_by_status().unwrap().active, 1);
}
