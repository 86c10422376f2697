//! Memory engine façade
//!
//! The explicit top-level value owning every subsystem: storage, the sparse
//! and dense indexes, the recall/reflection engines, the forgetting agent,
//! and the session manager. Lifecycle is explicit: `start` spawns the
//! supervised background tasks, `stop` cancels them and awaits every
//! outstanding handle, detached reflection tasks included.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::TimeZone;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::dense::DenseRetriever;
use crate::error::{MemoryError, Result};
use crate::forgetting::{ForgettingAgent, NukeStatus, PassSummary};
use crate::memory::{MemoryFilter, RecallHit, Role, StatusCounts};
use crate::providers::{EmbeddingProvider, LanguageModelProvider};
use crate::recall::RecallEngine;
use crate::reflection::ReflectionEngine;
use crate::session::SessionManager;
use crate::sparse::SparseIndex;
use crate::storage::MemoryStore;

// ============================================================================
// STATUS
// ============================================================================

/// Operator-facing snapshot of the engine
#[derive(Debug, Clone)]
pub struct EngineStatus {
    /// Document counts by lifecycle status
    pub counts: StatusCounts,
    /// Live sessions in the buffer cache
    pub sessions: usize,
    /// Documents in the sparse index
    pub sparse_documents: usize,
    /// Vectors in the dense index
    pub vectors: usize,
    /// Current nuke operation, if any was requested
    pub nuke: Option<NukeStatus>,
    /// Summary of the last completed forgetting pass
    pub last_forgetting_pass: Option<PassSummary>,
}

// ============================================================================
// MEMORY ENGINE
// ============================================================================

/// Long-term memory engine for conversational agents.
pub struct MemoryEngine {
    config: EngineConfig,
    store: Arc<MemoryStore>,
    sparse: Arc<RwLock<SparseIndex>>,
    sessions: Arc<SessionManager>,
    embedder: Arc<dyn EmbeddingProvider>,
    recall: Arc<RecallEngine>,
    reflection: Arc<ReflectionEngine>,
    forgetting: Arc<ForgettingAgent>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl MemoryEngine {
    /// Build an engine: validate config, open storage with the provider's
    /// embedding dimension, and rebuild the sparse index from storage.
    pub async fn new(
        config: EngineConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        lm: Arc<dyn LanguageModelProvider>,
        db_path: Option<PathBuf>,
    ) -> Result<Self> {
        config.validate()?;
        let dimensions = embedder.dimensions();
        if dimensions == 0 {
            return Err(MemoryError::ConfigInvalid(
                "embedding provider reports zero dimensions".into(),
            ));
        }

        let store = Arc::new(MemoryStore::open(db_path, dimensions)?);
        let sparse = Arc::new(RwLock::new(SparseIndex::new(&config.sparse_retriever)));
        rebuild_sparse_index(&store, &sparse).await?;

        let sessions = Arc::new(SessionManager::new(
            config.session_manager.clone(),
            config.reflection_engine.summary_trigger_rounds,
        ));
        let dense = Arc::new(DenseRetriever::new(Arc::clone(&store), Arc::clone(&embedder)));
        let recall = Arc::new(RecallEngine::new(
            Arc::clone(&store),
            Arc::clone(&sparse),
            dense,
            config.recall_engine.clone(),
            config.fusion.clone(),
            config.sparse_retriever.enabled,
            config.filtering_settings.clone(),
        ));
        let reflection = Arc::new(ReflectionEngine::new(
            Arc::clone(&store),
            Arc::clone(&sparse),
            Arc::clone(&embedder),
            lm,
            config.reflection_engine.clone(),
        ));
        let forgetting = Arc::new(ForgettingAgent::new(
            Arc::clone(&store),
            Arc::clone(&sparse),
            config.forgetting_agent.clone(),
        ));

        Ok(Self {
            config,
            store,
            sparse,
            sessions,
            embedder,
            recall,
            reflection,
            forgetting,
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        })
    }

    /// Spawn the supervised background tasks: the periodic forgetting pass
    /// (when enabled) and the session TTL sweeper. Idempotent.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        if self.config.forgetting_agent.enabled {
            let handle = self
                .forgetting
                .spawn_scheduler(self.shutdown.child_token());
            self.track(handle);
        }

        let sessions = Arc::clone(&self.sessions);
        let cancel = self.shutdown.child_token();
        let ttl = self.config.session_manager.session_ttl.clamp(1, 60);
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(ttl)) => {
                        sessions.sweep_expired(crate::clock::now_unix());
                    }
                }
            }
        });
        self.track(handle);
        info!("memory engine started");
    }

    /// Cancel the background tasks and await every outstanding handle,
    /// in-flight reflections included.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let handles: Vec<JoinHandle<()>> = {
            let mut tasks = self.lock_tasks();
            tasks.drain(..).collect()
        };
        for handle in handles {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "background task panicked");
                }
            }
        }
        self.started.store(false, Ordering::SeqCst);
        info!("memory engine stopped");
    }

    // ========================================================================
    // HOST ENTRY POINTS
    // ========================================================================

    /// Buffer a user message. No further work happens on this path.
    pub fn on_user_message(&self, session_id: &str, _persona_id: Option<&str>, text: &str, timestamp: i64) {
        self.sessions.append(session_id, Role::User, text, timestamp);
    }

    /// Buffer an assistant message; when it closes the triggering round,
    /// spawn a detached reflection task over the window.
    pub fn on_assistant_message(
        &self,
        session_id: &str,
        persona_id: Option<&str>,
        text: &str,
        timestamp: i64,
    ) {
        let Some(window) = self
            .sessions
            .append(session_id, Role::Assistant, text, timestamp)
        else {
            return;
        };

        let reflection = Arc::clone(&self.reflection);
        let session = session_id.to_string();
        let persona = persona_id.map(str::to_string);
        let handle = tokio::spawn(async move {
            match reflection
                .reflect_and_store(&window, &session, persona.as_deref(), None)
                .await
            {
                Ok(outcome) => {
                    debug!(
                        session = %session,
                        stored = outcome.stored_ids.len(),
                        skipped = outcome.skipped,
                        "background reflection finished"
                    );
                }
                Err(e) => warn!(session = %session, error = %e, "background reflection failed"),
            }
        });
        self.track(handle);
    }

    /// Recall memories for a query and format them as a prompt block.
    /// Returns an empty string when nothing relevant is stored; recall
    /// degradation never surfaces as an error here.
    pub async fn build_context(
        &self,
        session_id: &str,
        persona_id: Option<&str>,
        query: &str,
        k: usize,
    ) -> String {
        let k = if k == 0 { self.recall.default_k() } else { k };
        let filter = self.recall.filter_for(Some(session_id), persona_id);
        let outcome = self.recall.recall(query, k, &filter).await;
        if let Some(error) = &outcome.error {
            debug!(error = %error, "context recall degraded");
        }
        self.format_memory_block(&outcome.hits)
    }

    /// Recall with the raw hit structure, for hosts that format themselves.
    pub async fn recall(
        &self,
        query: &str,
        k: usize,
        filter: &MemoryFilter,
    ) -> crate::recall::RecallOutcome {
        self.recall.recall(query, k, filter).await
    }

    /// Archive memories: they keep their vectors but leave recall, the
    /// sparse index, and the forgetting scan.
    pub fn archive_memories(&self, doc_ids: &[i64]) -> Result<usize> {
        let archived = self.store.archive(doc_ids)?;
        let mut sparse = self.lock_sparse_write()?;
        for doc_id in doc_ids {
            sparse.remove(*doc_id);
        }
        Ok(archived)
    }

    /// Bring archived memories back into recall.
    pub fn restore_memories(&self, doc_ids: &[i64]) -> Result<usize> {
        let restored = self.store.restore(doc_ids)?;
        let records = self.store.get_many(doc_ids)?;
        let mut sparse = self.lock_sparse_write()?;
        for record in records.values() {
            if record.status == crate::memory::MemoryStatus::Active {
                sparse.add(record.doc_id, &record.content);
            }
        }
        Ok(restored)
    }

    /// Rewrite a memory's content. Modeled as delete + insert: the old row
    /// is tombstoned and the replacement records a back-reference to it.
    /// Returns the new doc id.
    pub async fn edit_memory(&self, doc_id: i64, new_content: &str) -> Result<i64> {
        let texts = [new_content.to_string()];
        let mut vectors = self
            .embedder
            .embed(&texts)
            .await
            .map_err(MemoryError::ProviderUnavailable)?;
        let embedding = vectors.pop().ok_or_else(|| {
            MemoryError::ProviderMalformedOutput("embedding provider returned no vector".into())
        })?;

        let now = crate::clock::now_unix();
        let new_id = self.store.edit_content(
            doc_id,
            new_content,
            &embedding,
            Some(crate::reflection::fingerprint(new_content)),
            now,
        )?;

        let mut sparse = self.lock_sparse_write()?;
        sparse.remove(doc_id);
        sparse.add(new_id, new_content);
        Ok(new_id)
    }

    /// Operator snapshot.
    pub fn status(&self) -> Result<EngineStatus> {
        Ok(EngineStatus {
            counts: self.store.count_by_status()?,
            sessions: self.sessions.len(),
            sparse_documents: self
                .sparse
                .read()
                .map_err(|_| MemoryError::StorageCorrupted("sparse index lock poisoned".into()))?
                .len(),
            vectors: self.store.vector_count()?,
            nuke: self.forgetting.nuke_status(),
            last_forgetting_pass: self.forgetting.last_pass(),
        })
    }

    /// Shared storage handle.
    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// The reflection engine, for hosts that drive reflection directly
    /// (e.g. with a persona prompt).
    pub fn reflection(&self) -> &Arc<ReflectionEngine> {
        &self.reflection
    }

    /// The forgetting agent: manual passes and nuke control.
    pub fn forgetting(&self) -> &Arc<ForgettingAgent> {
        &self.forgetting
    }

    /// The session manager.
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    // ========================================================================
    // INTERNALS
    // ========================================================================

    fn lock_sparse_write(&self) -> Result<std::sync::RwLockWriteGuard<'_, SparseIndex>> {
        self.sparse
            .write()
            .map_err(|_| MemoryError::StorageCorrupted("sparse index lock poisoned".into()))
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.lock_tasks();
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Render recall hits as one injectable block.
    fn format_memory_block(&self, hits: &[RecallHit]) -> String {
        if hits.is_empty() {
            return String::new();
        }
        let offset = self
            .config
            .timezone
            .fixed_offset()
            .unwrap_or_else(|_| chrono::FixedOffset::east_opt(0).expect("zero offset is valid"));

        let mut block = String::from("Relevant memories:\n");
        for (i, hit) in hits.iter().enumerate() {
            let when = offset
                .timestamp_opt(hit.last_access_time, 0)
                .single()
                .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "unknown".to_string());
            block.push_str(&format!(
                "{}. [{} | importance {:.2} | last recalled {}] {}\n",
                i + 1,
                hit.event_type,
                hit.importance,
                when,
                hit.content,
            ));
        }
        block
    }
}

/// Feed every active memory into the sparse index, page by page.
async fn rebuild_sparse_index(
    store: &Arc<MemoryStore>,
    sparse: &Arc<RwLock<SparseIndex>>,
) -> Result<()> {
    let mut cursor = store.scan_paginated(500, MemoryFilter::active());
    let mut indexed = 0usize;
    while let Some(page) = cursor.next_page().await? {
        let mut index = sparse
            .write()
            .map_err(|_| MemoryError::StorageCorrupted("sparse index lock poisoned".into()))?;
        for record in &page {
            index.add(record.doc_id, &record.content);
            indexed += 1;
        }
    }
    debug!(indexed, "sparse index rebuilt from storage");
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::CompletionParams;
    use async_trait::async_trait;
    use std::collections::VecDeque;

    const DIMS: usize = 8;

    struct StubEmbedder;

    #[async_trait]
    impl EmbeddingProvider for StubEmbedder {
        async fn embed(
            &self,
            texts: &[String],
        ) -> std::result::Result<Vec<Vec<f32>>, crate::error::ProviderError> {
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.0f32; DIMS];
                    if t.to_lowercase().contains("jazz") {
                        v[0] = 1.0;
                    } else {
                        v[1] = 1.0;
                    }
                    v
                })
                .collect())
        }

        fn dimensions(&self) -> usize {
            DIMS
        }
    }

    struct ScriptedLm {
        responses: Mutex<VecDeque<String>>,
    }

    impl ScriptedLm {
        fn new(responses: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.iter().map(|s| s.to_string()).collect()),
            })
        }
    }

    #[async_trait]
    impl LanguageModelProvider for ScriptedLm {
        async fn complete(
            &self,
            _prompt: &str,
            _system_prompt: Option<&str>,
            _params: &CompletionParams,
        ) -> std::result::Result<String, crate::error::ProviderError> {
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| "scripted responses exhausted".into())
        }
    }

    async fn engine_with(
        lm: Arc<ScriptedLm>,
        dir: &tempfile::TempDir,
        mut config: EngineConfig,
    ) -> MemoryEngine {
        config.reflection_engine.summary_trigger_rounds = 1;
        config.forgetting_agent.enabled = false;
        MemoryEngine::new(
            config,
            Arc::new(StubEmbedder),
            lm,
            Some(dir.path().join("engine.db")),
        )
        .await
        .unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_message_flow_reflects_and_recalls() {
        let dir = tempfile::tempdir().unwrap();
        let lm = ScriptedLm::new(&[
            r#"[{"content": "The user loves jazz", "event_type": "preference"}]"#,
            "[0.9]",
        ]);
        let engine = engine_with(lm, &dir, EngineConfig::default()).await;
        engine.start();

        let now = crate::clock::now_unix();
        engine.on_user_message("s1", None, "I love jazz", now);
        engine.on_assistant_message("s1", None, "Noted - jazz lover.", now + 1);

        // Reflection runs detached; stop() awaits it
        engine.stop().await;
        assert_eq!(engine.store().count_by_status().unwrap().active, 1);

        let block = engine.build_context("s1", None, "what music does the user like", 3).await;
        assert!(block.contains("jazz"));
        assert!(block.contains("preference"));
        assert!(block.starts_with("Relevant memories:"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_build_context_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(ScriptedLm::new(&[]), &dir, EngineConfig::default()).await;
        let block = engine.build_context("s1", None, "anything", 3).await;
        assert!(block.is_empty());
        engine.stop().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_status_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let lm = ScriptedLm::new(&[
            r#"[{"content": "The user loves jazz", "event_type": "preference"}]"#,
            "[0.9]",
        ]);
        let engine = engine_with(lm, &dir, EngineConfig::default()).await;

        let now = crate::clock::now_unix();
        engine.on_user_message("s1", None, "I love jazz", now);
        engine.on_assistant_message("s1", None, "Noted.", now + 1);
        engine.stop().await;

        let status = engine.status().unwrap();
        assert_eq!(status.counts.active, 1);
        assert_eq!(status.sessions, 1);
        assert_eq!(status.sparse_documents, 1);
        assert_eq!(status.vectors, 1);
        assert!(status.nuke.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_sparse_index_rebuilt_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let lm = ScriptedLm::new(&[
                r#"[{"content": "The user loves jazz", "event_type": "preference"}]"#,
                "[0.9]",
            ]);
            let engine = engine_with(lm, &dir, EngineConfig::default()).await;
            let now = crate::clock::now_unix();
            engine.on_user_message("s1", None, "I love jazz", now);
            engine.on_assistant_message("s1", None, "Noted.", now + 1);
            engine.stop().await;
        }

        // Fresh engine over the same database sees the memory through BM25
        let engine = engine_with(ScriptedLm::new(&[]), &dir, EngineConfig::default()).await;
        let status = engine.status().unwrap();
        assert_eq!(status.sparse_documents, 1);
        engine.stop().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_archive_restore_and_edit() {
        let dir = tempfile::tempdir().unwrap();
        let lm = ScriptedLm::new(&[
            r#"[{"content": "The user loves jazz", "event_type": "preference"}]"#,
            "[0.9]",
        ]);
        let engine = engine_with(lm, &dir, EngineConfig::default()).await;

        let now = crate::clock::now_unix();
        engine.on_user_message("s1", None, "I love jazz", now);
        engine.on_assistant_message("s1", None, "Noted.", now + 1);
        engine.stop().await;

        let status = engine.status().unwrap();
        assert_eq!(status.counts.active, 1);
        let doc_id = {
            let outcome = engine
                .recall("jazz", 1, &MemoryFilter::active())
                .await;
            outcome.hits[0].doc_id
        };

        // Archived memories leave recall and the sparse index
        assert_eq!(engine.archive_memories(&[doc_id]).unwrap(), 1);
        assert_eq!(engine.status().unwrap().sparse_documents, 0);
        let outcome = engine.recall("jazz", 1, &MemoryFilter::active()).await;
        assert!(outcome.hits.is_empty());

        // Restore brings them back
        assert_eq!(engine.restore_memories(&[doc_id]).unwrap(), 1);
        assert_eq!(engine.status().unwrap().sparse_documents, 1);

        // Edit replaces the row with a back-reference
        let new_id = engine.edit_memory(doc_id, "The user loves bebop jazz").await.unwrap();
        assert!(new_id > doc_id);
        let new_record = engine.store().get(new_id).unwrap().unwrap();
        assert_eq!(new_record.supersedes, Some(doc_id));
        let old_record = engine.store().get(doc_id).unwrap().unwrap();
        assert_eq!(old_record.status, crate::memory::MemoryStatus::Deleted);
        // Counts stay at one active memory
        assert_eq!(engine.status().unwrap().counts.active, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_start_stop_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(ScriptedLm::new(&[]), &dir, EngineConfig::default()).await;
        engine.start();
        engine.start();
        engine.stop().await;
        engine.stop().await;
    }
}
