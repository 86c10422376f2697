//! SQLite-backed document + vector store.
//!
//! Documents and embedding blobs live in two tables of the same database and
//! are written in one transaction, which is what upholds the doc/vector 1:1
//! invariant. The in-process HNSW index is derived state: rebuilt from the
//! embeddings table at open, mutated only after a committed write.
//!
//! Uses separate reader/writer connections for interior mutability. All
//! methods take `&self`, making the store `Send + Sync` so components can
//! share an `Arc<MemoryStore>`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use directories::ProjectDirs;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::dense::VectorIndex;
use crate::error::{MemoryError, Result};
use crate::memory::{
    EventType, MemoryDraft, MemoryFilter, MemoryPatch, MemoryRecord, MemoryStatus, StatusCounts,
};

/// Retries for writes that lose to a concurrent writer.
const WRITE_RETRIES: u32 = 3;

/// SQLite bind-variable limit headroom per statement.
const ID_CHUNK: usize = 500;

const RECORD_COLUMNS: &str = "doc_id, content, event_type, importance, create_time, \
     last_access_time, access_count, session_id, persona_id, status, supersedes, fingerprint";

// ============================================================================
// STORE
// ============================================================================

/// Transactional document + vector store.
pub struct MemoryStore {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
    vectors: Mutex<VectorIndex>,
    dimensions: usize,
}

impl MemoryStore {
    /// Apply PRAGMAs to a connection
    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    /// Open (or create) a store.
    ///
    /// `dimensions` is the embedding dimension fixed at startup; it is
    /// stamped into the database on first open and validated on every later
    /// open. A mismatch refuses to open.
    pub fn open(db_path: Option<PathBuf>, dimensions: usize) -> Result<Self> {
        let path = match db_path {
            Some(p) => p,
            None => {
                let proj_dirs = ProjectDirs::from("io", "engram", "core").ok_or_else(|| {
                    MemoryError::ConfigInvalid("could not determine data directory".to_string())
                })?;
                let data_dir = proj_dirs.data_dir();
                std::fs::create_dir_all(data_dir)?;
                data_dir.join("engram.db")
            }
        };

        let writer_conn = Connection::open(&path)?;
        Self::configure_connection(&writer_conn)?;
        super::migrations::apply_migrations(&writer_conn)?;

        let reader_conn = Connection::open(&path)?;
        Self::configure_connection(&reader_conn)?;

        Self::stamp_dimensions(&writer_conn, dimensions)?;

        let store = Self {
            writer: Mutex::new(writer_conn),
            reader: Mutex::new(reader_conn),
            vectors: Mutex::new(VectorIndex::new(dimensions)?),
            dimensions,
        };

        store.check_consistency()?;
        store.load_vectors_into_index()?;
        Ok(store)
    }

    /// Validate or record the embedding dimension stamp.
    fn stamp_dimensions(conn: &Connection, dimensions: usize) -> Result<()> {
        let stamped: Option<String> = conn
            .query_row(
                "SELECT value FROM engine_meta WHERE key = 'embedding_dimensions'",
                [],
                |row| row.get(0),
            )
            .optional()?;

        match stamped {
            Some(value) => {
                let stored: usize = value.parse().map_err(|_| {
                    MemoryError::StorageCorrupted(format!("bad dimension stamp: {value}"))
                })?;
                if stored != dimensions {
                    return Err(MemoryError::ConfigInvalid(format!(
                        "embedding dimension {dimensions} does not match stored {stored}"
                    )));
                }
            }
            None => {
                conn.execute(
                    "INSERT INTO engine_meta (key, value) VALUES ('embedding_dimensions', ?1)",
                    params![dimensions.to_string()],
                )?;
            }
        }
        Ok(())
    }

    /// Verify the doc/vector 1:1 invariant before serving anything.
    fn check_consistency(&self) -> Result<()> {
        let reader = self.lock_reader()?;

        let missing_vector: i64 = reader.query_row(
            "SELECT COUNT(*) FROM memories m
             LEFT JOIN memory_embeddings e ON m.doc_id = e.doc_id
             WHERE m.status != 'deleted' AND e.doc_id IS NULL",
            [],
            |row| row.get(0),
        )?;
        if missing_vector > 0 {
            return Err(MemoryError::StorageCorrupted(format!(
                "{missing_vector} live documents have no embedding"
            )));
        }

        let orphan_vectors: i64 = reader.query_row(
            "SELECT COUNT(*) FROM memory_embeddings e
             LEFT JOIN memories m ON m.doc_id = e.doc_id
             WHERE m.doc_id IS NULL OR m.status = 'deleted'",
            [],
            |row| row.get(0),
        )?;
        if orphan_vectors > 0 {
            return Err(MemoryError::StorageCorrupted(format!(
                "{orphan_vectors} embeddings have no live document"
            )));
        }

        let bad_dims: i64 = reader.query_row(
            "SELECT COUNT(*) FROM memory_embeddings WHERE dimensions != ?1",
            params![self.dimensions as i64],
            |row| row.get(0),
        )?;
        if bad_dims > 0 {
            return Err(MemoryError::StorageCorrupted(format!(
                "{bad_dims} embeddings have a foreign dimension"
            )));
        }

        Ok(())
    }

    /// Rebuild the in-process HNSW index from the embeddings table.
    fn load_vectors_into_index(&self) -> Result<()> {
        let rows: Vec<(i64, Vec<u8>)> = {
            let reader = self.lock_reader()?;
            let mut stmt = reader.prepare("SELECT doc_id, embedding FROM memory_embeddings")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        let mut vectors = self.lock_vectors()?;
        for (doc_id, blob) in rows {
            let Some(vector) = embedding_from_bytes(&blob) else {
                return Err(MemoryError::StorageCorrupted(format!(
                    "embedding blob for doc {doc_id} is malformed"
                )));
            };
            vectors.add(doc_id, &vector)?;
        }
        debug!(vectors = vectors.len(), "vector index loaded");
        Ok(())
    }

    fn lock_writer(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.writer
            .lock()
            .map_err(|_| MemoryError::StorageCorrupted("writer lock poisoned".into()))
    }

    fn lock_reader(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.reader
            .lock()
            .map_err(|_| MemoryError::StorageCorrupted("reader lock poisoned".into()))
    }

    fn lock_vectors(&self) -> Result<std::sync::MutexGuard<'_, VectorIndex>> {
        self.vectors
            .lock()
            .map_err(|_| MemoryError::StorageCorrupted("vector index lock poisoned".into()))
    }

    /// Run one write transaction, retrying a bounded number of times when a
    /// concurrent writer holds the database.
    fn with_write<T>(
        &self,
        mut operation: impl FnMut(&rusqlite::Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut attempt = 0;
        loop {
            let result = (|| {
                let mut writer = self.lock_writer()?;
                let tx = writer.transaction()?;
                let value = operation(&tx)?;
                tx.commit()?;
                Ok(value)
            })();

            match result {
                Err(MemoryError::Database(e)) if is_busy(&e) && attempt < WRITE_RETRIES => {
                    attempt += 1;
                    std::thread::sleep(Duration::from_millis(20 << attempt));
                }
                Err(MemoryError::Database(e)) if is_busy(&e) => {
                    return Err(MemoryError::StorageConflict(e.to_string()));
                }
                other => return other,
            }
        }
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Insert a memory and its embedding atomically. Returns the assigned
    /// `doc_id` (strictly increasing, never reused).
    pub fn insert(&self, draft: &MemoryDraft, embedding: &[f32], now: i64) -> Result<i64> {
        if embedding.len() != self.dimensions {
            return Err(MemoryError::VectorIndex(format!(
                "expected {} dimensions, got {}",
                self.dimensions,
                embedding.len()
            )));
        }
        let importance = draft.importance.clamp(0.0, 1.0);

        let doc_id = self.with_write(|tx| {
            tx.execute(
                "INSERT INTO memories (
                    content, event_type, importance, create_time, last_access_time,
                    access_count, session_id, persona_id, status, supersedes, fingerprint
                ) VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7, 'active', NULL, ?8)",
                params![
                    draft.content,
                    draft.event_type.as_str(),
                    importance,
                    now,
                    now,
                    draft.session_id,
                    draft.persona_id,
                    draft.fingerprint,
                ],
            )?;
            let doc_id = tx.last_insert_rowid();
            tx.execute(
                "INSERT INTO memory_embeddings (doc_id, embedding, dimensions) VALUES (?1, ?2, ?3)",
                params![doc_id, embedding_to_bytes(embedding), self.dimensions as i64],
            )?;
            Ok(doc_id)
        })?;

        // Derived index follows the committed state
        self.lock_vectors()?.add(doc_id, embedding)?;
        Ok(doc_id)
    }

    /// Tombstone memories and drop their embeddings atomically. Absent ids
    /// are skipped. Returns the number of rows actually deleted.
    pub fn delete_many(&self, doc_ids: &[i64], now: i64) -> Result<usize> {
        if doc_ids.is_empty() {
            return Ok(0);
        }

        let mut deleted = 0usize;
        for chunk in doc_ids.chunks(ID_CHUNK) {
            let placeholders = placeholders(chunk.len());
            deleted += self.with_write(|tx| {
                let mut values: Vec<Value> = vec![Value::Integer(now)];
                values.extend(chunk.iter().map(|id| Value::Integer(*id)));
                let changed = tx.execute(
                    &format!(
                        "UPDATE memories SET status = 'deleted', last_access_time = ?1
                         WHERE doc_id IN ({placeholders}) AND status != 'deleted'",
                    ),
                    params_from_iter(values),
                )?;
                let id_values: Vec<Value> = chunk.iter().map(|id| Value::Integer(*id)).collect();
                tx.execute(
                    &format!("DELETE FROM memory_embeddings WHERE doc_id IN ({placeholders})"),
                    params_from_iter(id_values),
                )?;
                Ok(changed)
            })?;

            let mut vectors = self.lock_vectors()?;
            for &doc_id in chunk {
                vectors.remove(doc_id)?;
            }
        }

        debug!(requested = doc_ids.len(), deleted, "delete_many");
        Ok(deleted)
    }

    /// Patch mutable fields of one record. `content` and the embedding are
    /// never patched in place; use [`edit_content`](Self::edit_content).
    pub fn update(&self, doc_id: i64, patch: &MemoryPatch) -> Result<()> {
        if patch.is_empty() {
            return Ok(());
        }

        self.with_write(|tx| {
            let current = tx
                .query_row(
                    &format!("SELECT {RECORD_COLUMNS} FROM memories WHERE doc_id = ?1"),
                    params![doc_id],
                    row_to_record,
                )
                .optional()?;
            let Some(current) = current else {
                return Err(MemoryError::NotFound(doc_id));
            };

            let importance = patch
                .importance
                .map(|v| v.clamp(0.0, 1.0))
                .unwrap_or(current.importance);
            let last_access = patch
                .last_access_time
                .unwrap_or(current.last_access_time)
                .max(current.create_time);
            let access_count = patch.access_count.unwrap_or(current.access_count).max(0);
            let status = patch.status.unwrap_or(current.status);

            // Status transitions through delete/restore must keep the vector
            // side in step; those go through delete_many/restore instead.
            if status == MemoryStatus::Deleted && current.status != MemoryStatus::Deleted {
                return Err(MemoryError::StorageConflict(
                    "use delete_many to tombstone records".into(),
                ));
            }

            tx.execute(
                "UPDATE memories SET importance = ?1, last_access_time = ?2,
                 access_count = ?3, status = ?4 WHERE doc_id = ?5",
                params![importance, last_access, access_count, status.as_str(), doc_id],
            )?;
            Ok(())
        })
    }

    /// Replace a memory's content as delete + insert: the new row records
    /// `supersedes = doc_id`, the old row is tombstoned, all in one
    /// transaction. Returns the new `doc_id`.
    pub fn edit_content(
        &self,
        doc_id: i64,
        new_content: &str,
        new_embedding: &[f32],
        fingerprint: Option<String>,
        now: i64,
    ) -> Result<i64> {
        if new_embedding.len() != self.dimensions {
            return Err(MemoryError::VectorIndex(format!(
                "expected {} dimensions, got {}",
                self.dimensions,
                new_embedding.len()
            )));
        }

        let new_id = self.with_write(|tx| {
            let old = tx
                .query_row(
                    &format!("SELECT {RECORD_COLUMNS} FROM memories WHERE doc_id = ?1"),
                    params![doc_id],
                    row_to_record,
                )
                .optional()?;
            let Some(old) = old else {
                return Err(MemoryError::NotFound(doc_id));
            };
            if old.status == MemoryStatus::Deleted {
                return Err(MemoryError::NotFound(doc_id));
            }

            tx.execute(
                "INSERT INTO memories (
                    content, event_type, importance, create_time, last_access_time,
                    access_count, session_id, persona_id, status, supersedes, fingerprint
                ) VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7, ?8, ?9, ?10)",
                params![
                    new_content,
                    old.event_type.as_str(),
                    old.importance,
                    now,
                    now,
                    old.session_id,
                    old.persona_id,
                    old.status.as_str(),
                    doc_id,
                    fingerprint,
                ],
            )?;
            let new_id = tx.last_insert_rowid();

            tx.execute(
                "UPDATE memories SET status = 'deleted', last_access_time = ?1 WHERE doc_id = ?2",
                params![now, doc_id],
            )?;
            tx.execute(
                "DELETE FROM memory_embeddings WHERE doc_id = ?1",
                params![doc_id],
            )?;
            tx.execute(
                "INSERT INTO memory_embeddings (doc_id, embedding, dimensions) VALUES (?1, ?2, ?3)",
                params![new_id, embedding_to_bytes(new_embedding), self.dimensions as i64],
            )?;
            Ok(new_id)
        })?;

        let mut vectors = self.lock_vectors()?;
        vectors.remove(doc_id)?;
        vectors.add(new_id, new_embedding)?;
        Ok(new_id)
    }

    /// Flip active records to archived. Archived rows keep their vectors but
    /// leave recall and the forgetting scan.
    pub fn archive(&self, doc_ids: &[i64]) -> Result<usize> {
        self.flip_status(doc_ids, MemoryStatus::Active, MemoryStatus::Archived)
    }

    /// Flip archived records back to active.
    pub fn restore(&self, doc_ids: &[i64]) -> Result<usize> {
        self.flip_status(doc_ids, MemoryStatus::Archived, MemoryStatus::Active)
    }

    fn flip_status(&self, doc_ids: &[i64], from: MemoryStatus, to: MemoryStatus) -> Result<usize> {
        if doc_ids.is_empty() {
            return Ok(0);
        }
        let mut changed = 0usize;
        for chunk in doc_ids.chunks(ID_CHUNK) {
            let placeholders = placeholders(chunk.len());
            changed += self.with_write(|tx| {
                let mut values: Vec<Value> =
                    vec![Value::from(to.as_str().to_string()), Value::from(from.as_str().to_string())];
                values.extend(chunk.iter().map(|id| Value::Integer(*id)));
                Ok(tx.execute(
                    &format!(
                        "UPDATE memories SET status = ?1 WHERE status = ?2 AND doc_id IN ({placeholders})"
                    ),
                    params_from_iter(values),
                )?)
            })?;
        }
        Ok(changed)
    }

    /// Record recall hits: `last_access_time = now`, `access_count += 1` for
    /// each id present. Absent ids are skipped.
    pub fn touch(&self, doc_ids: &[i64], now: i64) -> Result<usize> {
        if doc_ids.is_empty() {
            return Ok(0);
        }
        let mut touched = 0usize;
        for chunk in doc_ids.chunks(ID_CHUNK) {
            let placeholders = placeholders(chunk.len());
            touched += self.with_write(|tx| {
                let mut values: Vec<Value> = vec![Value::Integer(now)];
                values.extend(chunk.iter().map(|id| Value::Integer(*id)));
                Ok(tx.execute(
                    &format!(
                        "UPDATE memories
                         SET last_access_time = MAX(?1, create_time), access_count = access_count + 1
                         WHERE doc_id IN ({placeholders})"
                    ),
                    params_from_iter(values),
                )?)
            })?;
        }
        Ok(touched)
    }

    /// Drop every row and vector in one transaction. Doc ids are not reused
    /// afterwards. Returns the number of documents removed.
    pub fn delete_all(&self) -> Result<usize> {
        let removed = self.with_write(|tx| {
            tx.execute("DELETE FROM memory_embeddings", [])?;
            Ok(tx.execute("DELETE FROM memories", [])?)
        })?;

        let mut vectors = self.lock_vectors()?;
        *vectors = VectorIndex::new(self.dimensions)?;
        info!(removed, "store wiped");
        Ok(removed)
    }

    /// Physically remove tombstones older than `retention_days`. Tombstone
    /// age is measured from `last_access_time`, which deletion stamps.
    pub fn compact(&self, now: i64, retention_days: f64) -> Result<usize> {
        let cutoff = now - (retention_days * 86_400.0) as i64;
        let removed = self.with_write(|tx| {
            Ok(tx.execute(
                "DELETE FROM memories WHERE status = 'deleted' AND last_access_time < ?1",
                params![cutoff],
            )?)
        })?;
        if removed > 0 {
            debug!(removed, "compacted tombstones");
        }
        Ok(removed)
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Fetch one record, tombstones included.
    pub fn get(&self, doc_id: i64) -> Result<Option<MemoryRecord>> {
        let reader = self.lock_reader()?;
        let record = reader
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM memories WHERE doc_id = ?1"),
                params![doc_id],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    /// Fetch a batch of records keyed by id.
    pub fn get_many(&self, doc_ids: &[i64]) -> Result<HashMap<i64, MemoryRecord>> {
        let mut records = HashMap::with_capacity(doc_ids.len());
        let reader = self.lock_reader()?;
        for chunk in doc_ids.chunks(ID_CHUNK) {
            let placeholders = placeholders(chunk.len());
            let mut stmt = reader.prepare(&format!(
                "SELECT {RECORD_COLUMNS} FROM memories WHERE doc_id IN ({placeholders})"
            ))?;
            let values: Vec<Value> = chunk.iter().map(|id| Value::Integer(*id)).collect();
            let rows = stmt
                .query_map(params_from_iter(values), row_to_record)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            for record in rows {
                records.insert(record.doc_id, record);
            }
        }
        Ok(records)
    }

    /// One page of a filtered scan in ascending `doc_id` order, starting
    /// strictly after `after_doc_id`. Keyset pagination keeps pages stable
    /// under concurrent deletes: rows tombstoned mid-scan are simply absent
    /// from later pages.
    pub fn scan_page(
        &self,
        after_doc_id: i64,
        page_size: usize,
        filter: &MemoryFilter,
    ) -> Result<Vec<MemoryRecord>> {
        let (clauses, mut values) = filter_sql(filter);
        values.insert(0, Value::Integer(after_doc_id));
        values.push(Value::Integer(page_size as i64));

        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM memories WHERE doc_id > ?1 {clauses}
             ORDER BY doc_id ASC LIMIT ?{last}",
            last = values.len(),
        );

        let reader = self.lock_reader()?;
        let mut stmt = reader.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values), row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Paginated scan cursor over the filtered record set.
    pub fn scan_paginated(&self, page_size: usize, filter: MemoryFilter) -> ScanCursor<'_> {
        ScanCursor {
            store: self,
            filter,
            page_size: page_size.max(1),
            after: 0,
            done: false,
        }
    }

    /// k-NN over the vector index, post-filtered by document metadata.
    /// Similarity is cosine mapped from [-1, 1] to [0, 1].
    pub fn dense_search(
        &self,
        query_embedding: &[f32],
        k: usize,
        filter: &MemoryFilter,
    ) -> Result<Vec<(i64, f64)>> {
        if k == 0 {
            return Ok(vec![]);
        }

        // Over-fetch so metadata filtering still leaves k candidates
        let over_k = (k * 4).max(32);
        let raw = self.lock_vectors()?.search(query_embedding, over_k)?;
        if raw.is_empty() {
            return Ok(vec![]);
        }

        let ids: Vec<i64> = raw.iter().map(|(id, _)| *id).collect();
        let records = self.get_many(&ids)?;

        let mut hits = Vec::with_capacity(k);
        for (doc_id, cosine) in raw {
            let Some(record) = records.get(&doc_id) else {
                continue;
            };
            if !filter.matches(record) {
                continue;
            }
            let similarity = ((f64::from(cosine) + 1.0) / 2.0).clamp(0.0, 1.0);
            hits.push((doc_id, similarity));
            if hits.len() == k {
                break;
            }
        }
        Ok(hits)
    }

    /// Counts by lifecycle status.
    pub fn count_by_status(&self) -> Result<StatusCounts> {
        let reader = self.lock_reader()?;
        let mut stmt = reader.prepare("SELECT status, COUNT(*) FROM memories GROUP BY status")?;
        let mut counts = StatusCounts::default();
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for (status, count) in rows {
            match MemoryStatus::parse_name(&status) {
                Some(MemoryStatus::Active) => counts.active = count,
                Some(MemoryStatus::Archived) => counts.archived = count,
                Some(MemoryStatus::Deleted) => counts.deleted = count,
                None => {
                    return Err(MemoryError::StorageCorrupted(format!(
                        "unknown status `{status}` in document index"
                    )))
                }
            }
        }
        Ok(counts)
    }

    /// Look up an active memory by dedup fingerprint within a session scope.
    pub fn find_active_fingerprint(
        &self,
        session_id: Option<&str>,
        fingerprint: &str,
    ) -> Result<Option<i64>> {
        let reader = self.lock_reader()?;
        let doc_id = match session_id {
            Some(session) => reader
                .query_row(
                    "SELECT doc_id FROM memories
                     WHERE status = 'active' AND fingerprint = ?1 AND session_id = ?2
                     ORDER BY doc_id LIMIT 1",
                    params![fingerprint, session],
                    |row| row.get(0),
                )
                .optional()?,
            None => reader
                .query_row(
                    "SELECT doc_id FROM memories
                     WHERE status = 'active' AND fingerprint = ?1 AND session_id IS NULL
                     ORDER BY doc_id LIMIT 1",
                    params![fingerprint],
                    |row| row.get(0),
                )
                .optional()?,
        };
        Ok(doc_id)
    }

    /// Number of vectors currently in the derived index.
    pub fn vector_count(&self) -> Result<usize> {
        Ok(self.lock_vectors()?.len())
    }

    /// Whether a doc_id has a vector in the derived index.
    pub fn has_vector(&self, doc_id: i64) -> Result<bool> {
        Ok(self.lock_vectors()?.contains(doc_id))
    }

    /// Embedding dimension fixed at open.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }
}

// ============================================================================
// SCAN CURSOR
// ============================================================================

/// Page-at-a-time cursor over a filtered scan. Each page is a point-in-time
/// snapshot; callers must not hold a page across long suspensions.
pub struct ScanCursor<'a> {
    store: &'a MemoryStore,
    filter: MemoryFilter,
    page_size: usize,
    after: i64,
    done: bool,
}

impl ScanCursor<'_> {
    /// Fetch the next page, or `None` when the scan is exhausted.
    pub async fn next_page(&mut self) -> Result<Option<Vec<MemoryRecord>>> {
        if self.done {
            return Ok(None);
        }
        let page = self
            .store
            .scan_page(self.after, self.page_size, &self.filter)?;
        match page.last() {
            Some(last) => self.after = last.doc_id,
            None => {
                self.done = true;
                return Ok(None);
            }
        }
        if page.len() < self.page_size {
            self.done = true;
        }
        Ok(Some(page))
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn placeholders(n: usize) -> String {
    let mut s = String::with_capacity(n * 2);
    for i in 0..n {
        if i > 0 {
            s.push(',');
        }
        s.push('?');
    }
    s
}

/// Compose the AND-combined filter predicates into SQL. Placeholder numbers
/// continue after `?1` (the cursor position).
fn filter_sql(filter: &MemoryFilter) -> (String, Vec<Value>) {
    let mut clauses = String::new();
    let mut values: Vec<Value> = Vec::new();
    let mut next = 2;

    if let Some(status) = filter.status {
        clauses.push_str(&format!(" AND status = ?{next}"));
        values.push(Value::from(status.as_str().to_string()));
        next += 1;
    }
    if let Some(persona) = &filter.persona_id {
        clauses.push_str(&format!(" AND (persona_id IS NULL OR persona_id = ?{next})"));
        values.push(Value::from(persona.clone()));
        next += 1;
    }
    if let Some(session) = &filter.session_id {
        clauses.push_str(&format!(" AND (session_id IS NULL OR session_id = ?{next})"));
        values.push(Value::from(session.clone()));
        next += 1;
    }
    if let Some((lo, hi)) = filter.create_time_range {
        clauses.push_str(&format!(
            " AND create_time >= ?{next} AND create_time <= ?{}",
            next + 1
        ));
        values.push(Value::Integer(lo));
        values.push(Value::Integer(hi));
        next += 2;
    }
    if let Some((lo, hi)) = filter.importance_range {
        clauses.push_str(&format!(
            " AND importance >= ?{next} AND importance <= ?{}",
            next + 1
        ));
        values.push(Value::Real(lo));
        values.push(Value::Real(hi));
    }

    (clauses, values)
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryRecord> {
    let event_type: String = row.get(2)?;
    let status: String = row.get(9)?;
    let status = MemoryStatus::parse_name(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            9,
            rusqlite::types::Type::Text,
            format!("unknown status `{status}`").into(),
        )
    })?;

    Ok(MemoryRecord {
        doc_id: row.get(0)?,
        content: row.get(1)?,
        // Open enum: tags written by a newer engine degrade to `other`
        event_type: EventType::parse_name(&event_type).unwrap_or_default(),
        importance: row.get(3)?,
        create_time: row.get(4)?,
        last_access_time: row.get(5)?,
        access_count: row.get(6)?,
        session_id: row.get(7)?,
        persona_id: row.get(8)?,
        status,
        supersedes: row.get(10)?,
        fingerprint: row.get(11)?,
    })
}

fn embedding_to_bytes(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn embedding_from_bytes(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    )
}

fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(info, _)
            if matches!(
                info.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            )
    )
}

// ============================================================================
// TESTS
// ============================================================================
