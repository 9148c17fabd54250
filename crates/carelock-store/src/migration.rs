//! Database schema migrations for SQLite.
//!
//! We use a simple versioned migration system. Each migration is a SQL string
//! that transforms the schema from version N to N+1.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema.
///
/// This function is idempotent - it can be called multiple times safely.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database schema version {current} is newer than supported version {CURRENT_VERSION}"
        )));
    }

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
        }

        tx.commit()?;
        tracing::info!(from = current, to = CURRENT_VERSION, "migrated store schema");
    }

    Ok(())
}

/// Apply a specific migration version.
fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Principals: the full grant set as a CBOR blob
        CREATE TABLE principals (
            principal_id TEXT PRIMARY KEY,
            primary_role TEXT NOT NULL,
            body BLOB NOT NULL,
            updated_at INTEGER NOT NULL
        );

        -- Who delegates to whom, rebuilt on every principal save
        CREATE TABLE delegation_index (
            delegator TEXT NOT NULL REFERENCES principals(principal_id),
            delegate TEXT NOT NULL,
            PRIMARY KEY (delegator, delegate)
        );

        CREATE INDEX idx_delegation_delegate ON delegation_index(delegate);

        -- Per-instance ACL blobs with their own version counter
        CREATE TABLE resource_acls (
            resource_type TEXT NOT NULL,
            resource_id TEXT NOT NULL,
            version INTEGER NOT NULL,
            body BLOB NOT NULL,
            PRIMARY KEY (resource_type, resource_id)
        );

        -- Append-only audit ledger
        CREATE TABLE audit_ledger (
            position INTEGER PRIMARY KEY AUTOINCREMENT,
            record_id BLOB NOT NULL UNIQUE,   -- 32 bytes, Blake3 of canonical record
            decision_id BLOB NOT NULL UNIQUE, -- 32 bytes
            principal_id TEXT NOT NULL,
            seq INTEGER NOT NULL,             -- position in the principal's chain
            action TEXT NOT NULL,
            resource_type TEXT NOT NULL,
            resource_id TEXT,
            decided_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL,
            record BLOB NOT NULL,             -- canonical CBOR
            signature BLOB NOT NULL,          -- 64 bytes, Ed25519
            signer BLOB NOT NULL,             -- 32 bytes
            prev_hash BLOB NOT NULL,
            entry_hash BLOB NOT NULL,
            UNIQUE (principal_id, seq)
        );

        CREATE INDEX idx_audit_principal ON audit_ledger(principal_id, seq);
        CREATE INDEX idx_audit_resource ON audit_ledger(resource_type, resource_id);
        CREATE INDEX idx_audit_decided ON audit_ledger(decided_at);
        CREATE INDEX idx_audit_expires ON audit_ledger(expires_at);

        CREATE TRIGGER audit_ledger_immutable
        BEFORE UPDATE ON audit_ledger
        BEGIN
            SELECT RAISE(ABORT, 'audit records are immutable');
        END;

        -- Chain heads, kept across purges
        CREATE TABLE ledger_heads (
            principal_id TEXT PRIMARY KEY,
            seq INTEGER NOT NULL,
            entry_hash BLOB NOT NULL,
            decided_at INTEGER NOT NULL
        );
        "#,
    )?;

    Ok(())
}

/// Get current time in milliseconds.
fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
