//! Temp-database engine builder.
//!
//! Each scenario gets an isolated database under a TempDir that disappears
//! with the harness. Seeding happens through a short-lived store handle
//! before the engine opens the same file and rebuilds its indexes from it.

use std::path::PathBuf;
use std::sync::Arc;

use engram_core::{
    EngineConfig, EventType, MemoryDraft, MemoryEngine, MemoryStore,
};
use tempfile::TempDir;

use crate::mocks::{embed_text, MockEmbedder, ScriptedLm, DIMS};

/// One isolated engine instance over a temp database.
pub struct TestEngine {
    /// Keeps the database directory alive for the scenario
    _dir: TempDir,
    /// The engine under test
    pub engine: MemoryEngine,
}

impl TestEngine {
    /// Database path helper for reopening scenarios.
    pub fn db_path(dir: &TempDir) -> PathBuf {
        dir.path().join("engram.db")
    }

    /// Build an engine with the given config and scripted LM responses.
    pub async fn new(config: EngineConfig, lm_responses: &[&str]) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        Self::over_dir(dir, config, lm_responses).await
    }

    /// Build an engine over an existing directory (reopen scenarios).
    pub async fn over_dir(dir: TempDir, config: EngineConfig, lm_responses: &[&str]) -> Self {
        let engine = MemoryEngine::new(
            config,
            Arc::new(MockEmbedder),
            Arc::new(ScriptedLm::new(lm_responses)),
            Some(Self::db_path(&dir)),
        )
        .await
        .expect("engine open");
        Self { _dir: dir, engine }
    }

    /// Seed memories straight into storage before an engine exists, so the
    /// engine's startup rebuild picks them up. Returns (dir, doc_ids).
    pub fn seed(memories: &[SeedMemory]) -> (TempDir, Vec<i64>) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = MemoryStore::open(Some(Self::db_path(&dir)), DIMS).expect("store open");
        let mut ids = Vec::with_capacity(memories.len());
        for memory in memories {
            let mut draft =
                MemoryDraft::new(memory.content, memory.event_type, memory.importance);
            draft.session_id = memory.session_id.map(str::to_string);
            let id = store
                .insert(&draft, &embed_text(memory.content), memory.create_time)
                .expect("seed insert");
            if memory.last_access_time > memory.create_time {
                store
                    .update(
                        id,
                        &engram_core::MemoryPatch {
                            last_access_time: Some(memory.last_access_time),
                            ..Default::default()
                        },
                    )
                    .expect("seed patch");
            }
            ids.push(id);
        }
        (dir, ids)
    }
}

/// Seed row for [`TestEngine::seed`]
pub struct SeedMemory<'a> {
    /// Memory text
    pub content: &'a str,
    /// Event tag
    pub event_type: EventType,
    /// Stored importance
    pub importance: f64,
    /// Unix seconds at creation
    pub create_time: i64,
    /// Unix seconds of last access (>= create_time to take effect)
    pub last_access_time: i64,
    /// Owning session
    pub session_id: Option<&'a str>,
}

impl<'a> SeedMemory<'a> {
    /// A plain fact created and last accessed at `t`.
    pub fn at(content: &'a str, importance: f64, t: i64) -> Self {
        Self {
            content,
            event_type: EventType::Fact,
            importance,
            create_time: t,
            last_access_time: t,
            session_id: None,
        }
    }
}

/// Current unix time in seconds.
pub fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}
