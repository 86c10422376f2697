//! Database migrations
//!
//! Schema migration definitions for the document store. The schema version
//! is stamped in the database and bumped on incompatible change.

/// Migration definitions
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Initial schema: memories, embeddings, meta",
        up: MIGRATION_V1_UP,
    },
    Migration {
        version: 2,
        description: "Fingerprint lookup index for reflection dedup",
        up: MIGRATION_V2_UP,
    },
];

/// A database migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Version number
    pub version: u32,
    /// Description
    pub description: &'static str,
    /// SQL to apply
    pub up: &'static str,
}

/// V1: Initial schema
const MIGRATION_V1_UP: &str = r#"
CREATE TABLE IF NOT EXISTS memories (
    doc_id INTEGER PRIMARY KEY AUTOINCREMENT,
    content TEXT NOT NULL,
    event_type TEXT NOT NULL DEFAULT 'other',
    importance REAL NOT NULL DEFAULT 0.5,
    create_time INTEGER NOT NULL,
    last_access_time INTEGER NOT NULL,
    access_count INTEGER NOT NULL DEFAULT 0,
    session_id TEXT,
    persona_id TEXT,
    status TEXT NOT NULL DEFAULT 'active',
    supersedes INTEGER,
    fingerprint TEXT
);

CREATE INDEX IF NOT EXISTS idx_memories_status ON memories(status);
CREATE INDEX IF NOT EXISTS idx_memories_status_session ON memories(status, session_id);
CREATE INDEX IF NOT EXISTS idx_memories_create_time ON memories(create_time);

-- Embedding blobs, 1:1 with non-deleted memories (little-endian f32)
CREATE TABLE IF NOT EXISTS memory_embeddings (
    doc_id INTEGER PRIMARY KEY REFERENCES memories(doc_id) ON DELETE CASCADE,
    embedding BLOB NOT NULL,
    dimensions INTEGER NOT NULL
);

-- Engine metadata: schema version stamp, embedding dimension
CREATE TABLE IF NOT EXISTS engine_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL,
    applied_at TEXT NOT NULL
);
INSERT INTO schema_version (version, applied_at) VALUES (1, datetime('now'));
"#;

/// V2: fingerprint dedup lookups happen on every reflection commit
const MIGRATION_V2_UP: &str = r#"
CREATE INDEX IF NOT EXISTS idx_memories_fingerprint ON memories(fingerprint)
    WHERE fingerprint IS NOT NULL;

UPDATE schema_version SET version = 2, applied_at = datetime('now');
"#;

/// Get current schema version from database
pub fn get_current_version(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .or(Ok(0))
}

/// Apply pending migrations
pub fn apply_migrations(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    let current_version = get_current_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                "Applying migration v{}: {}",
                migration.version,
                migration.description
            );
            conn.execute_batch(migration.up)?;
            applied += 1;
        }
    }

    Ok(applied)
}
