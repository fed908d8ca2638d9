//! Database schema initialization

use sqlx::SqlitePool;

/// Initialize the database schema
pub async fn initialize_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(SCHEMA_SQL)
        .execute(pool)
        .await?;

    Ok(())
}

const SCHEMA_SQL: &str = r#"
-- Upload sessions side-cache (bitmap state survives restarts, chunk bytes do not)
CREATE TABLE IF NOT EXISTS upload_sessions (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    total_chunks INTEGER NOT NULL,
    total_bytes INTEGER,
    received_chunks TEXT NOT NULL DEFAULT '[]',
    destination_key TEXT NOT NULL,
    content_type TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    state TEXT NOT NULL DEFAULT 'initialized',
    final_reference TEXT,
    failure TEXT,
    created_at TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_upload_sessions_state ON upload_sessions(state);
CREATE INDEX IF NOT EXISTS idx_upload_sessions_expires ON upload_sessions(expires_at);

-- Content records (lecture id -> committed object + encryption material)
CREATE TABLE IF NOT EXISTS content (
    id TEXT PRIMARY KEY,
    owner_id TEXT,
    object_key TEXT,
    encrypted INTEGER NOT NULL DEFAULT 0,
    cipher_mode TEXT,
    key_material TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Entitlements (who may play what)
CREATE TABLE IF NOT EXISTS entitlements (
    principal_id TEXT NOT NULL,
    content_id TEXT NOT NULL,
    granted_at TEXT NOT NULL DEFAULT (datetime('now')),

    PRIMARY KEY (principal_id, content_id)
);

CREATE INDEX IF NOT EXISTS idx_entitlements_content ON entitlements(content_id);
"#;
