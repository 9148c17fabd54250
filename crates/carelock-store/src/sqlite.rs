//! SQLite implementation of the Store trait.
//!
//! This is the primary storage backend for Carelock. It uses rusqlite with
//! bundled SQLite, wrapped in async via tokio::spawn_blocking.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};

use carelock_core::{
    canonical_record_bytes, decode_record, LedgerEntry, LedgerHash, LedgerHead, Principal,
    PrincipalId, PrincipalSnapshot, RecordId, RecorderPublicKey, RecorderSignature, ResourceAcl,
    ResourceId, ResourceType, SignedRecord,
};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{check_acl_write, check_decision_order, repeated_append, AppendResult, AuditPage, AuditQuery, Store};

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteStore {
    /// The SQLite connection, protected by a mutex.
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection on the blocking pool.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|e| {
                StoreError::Database(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
                    Some(format!("mutex poisoned: {}", e)),
                ))
            })?;
            f(&mut conn)
        })
        .await
        .map_err(|e| {
            StoreError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_MISUSE),
                Some(format!("spawn_blocking failed: {}", e)),
            ))
        })?
    }
}

const ENTRY_COLUMNS: &str =
    "position, seq, record_id, record, signature, signer, prev_hash, entry_hash";

/// Raw ledger columns, converted outside the row callback.
struct EntryRow {
    position: u64,
    seq: u64,
    record_id: Vec<u8>,
    record: Vec<u8>,
    signature: Vec<u8>,
    signer: Vec<u8>,
    prev_hash: Vec<u8>,
    entry_hash: Vec<u8>,
}

impl EntryRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            position: row.get("position")?,
            seq: row.get("seq")?,
            record_id: row.get("record_id")?,
            record: row.get("record")?,
            signature: row.get("signature")?,
            signer: row.get("signer")?,
            prev_hash: row.get("prev_hash")?,
            entry_hash: row.get("entry_hash")?,
        })
    }

    fn into_entry(self) -> Result<LedgerEntry> {
        Ok(LedgerEntry {
            seq: self.seq,
            record_id: RecordId::from_bytes(fixed(self.record_id, "record_id")?),
            record: decode_record(&self.record)?,
            signature: RecorderSignature(fixed(self.signature, "signature")?),
            signer: RecorderPublicKey(fixed(self.signer, "signer")?),
            prev_hash: LedgerHash(fixed(self.prev_hash, "prev_hash")?),
            entry_hash: LedgerHash(fixed(self.entry_hash, "entry_hash")?),
        })
    }
}

fn fixed<const N: usize>(bytes: Vec<u8>, column: &str) -> Result<[u8; N]> {
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| StoreError::InvalidData(format!("{column} is {len} bytes, expected {N}")))
}

fn decode_principal(body: &[u8]) -> Result<Principal> {
    Principal::from_bytes(body).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn select_entries(conn: &Connection, filter: &str, args: impl rusqlite::Params) -> Result<Vec<(u64, LedgerEntry)>> {
    let sql = format!("SELECT {ENTRY_COLUMNS} FROM audit_ledger {filter}");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(args, EntryRow::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter()
        .map(|row| {
            let position = row.position;
            row.into_entry().map(|entry| (position, entry))
        })
        .collect()
}

fn load_head(conn: &Connection, principal: &str) -> Result<LedgerHead> {
    let head = conn
        .query_row(
            "SELECT seq, entry_hash, decided_at FROM ledger_heads WHERE principal_id = ?1",
            params![principal],
            |row| {
                Ok((
                    row.get::<_, u64>(0)?,
                    row.get::<_, Vec<u8>>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            },
        )
        .optional()?;
    match head {
        Some((seq, hash, decided_at)) => Ok(LedgerHead {
            seq,
            entry_hash: LedgerHash(fixed(hash, "entry_hash")?),
            decided_at,
        }),
        None => Ok(LedgerHead::GENESIS),
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn load_principal(&self, id: &PrincipalId) -> Result<Option<Principal>> {
        let id = id.clone();
        self.run(move |conn| {
            let body: Option<Vec<u8>> = conn
                .query_row(
                    "SELECT body FROM principals WHERE principal_id = ?1",
                    params![id.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            body.as_deref().map(decode_principal).transpose()
        })
        .await
    }

    async fn save_principal(&self, principal: &Principal) -> Result<()> {
        let principal = principal.clone();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let id = principal.id.as_str();

            tx.execute(
                "INSERT INTO principals (principal_id, primary_role, body, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(principal_id) DO UPDATE SET
                    primary_role = excluded.primary_role,
                    body = excluded.body,
                    updated_at = excluded.updated_at",
                params![id, principal.primary_role.as_str(), principal.to_bytes(), now_millis()],
            )?;

            tx.execute("DELETE FROM delegation_index WHERE delegator = ?1", params![id])?;
            let delegates: BTreeSet<&str> = principal
                .delegations
                .iter()
                .map(|d| d.delegate_to.as_str())
                .collect();
            for delegate in delegates {
                tx.execute(
                    "INSERT INTO delegation_index (delegator, delegate) VALUES (?1, ?2)",
                    params![id, delegate],
                )?;
            }

            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn load_snapshot(&self, id: &PrincipalId) -> Result<Option<PrincipalSnapshot>> {
        let id = id.clone();
        self.run(move |conn| {
            let body: Option<Vec<u8>> = conn
                .query_row(
                    "SELECT body FROM principals WHERE principal_id = ?1",
                    params![id.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(body) = body else {
                return Ok(None);
            };

            let mut stmt = conn.prepare(
                "SELECT p.body FROM principals p
                 JOIN delegation_index d ON d.delegator = p.principal_id
                 WHERE d.delegate = ?1 AND p.principal_id != ?1
                 ORDER BY p.principal_id",
            )?;
            let bodies = stmt
                .query_map(params![id.as_str()], |row| row.get::<_, Vec<u8>>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(Some(PrincipalSnapshot {
                principal: decode_principal(&body)?,
                delegators: bodies
                    .iter()
                    .map(|b| decode_principal(b))
                    .collect::<Result<_>>()?,
            }))
        })
        .await
    }

    async fn list_principals(&self) -> Result<Vec<PrincipalId>> {
        self.run(|conn| {
            let mut stmt = conn.prepare("SELECT principal_id FROM principals ORDER BY principal_id")?;
            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .map(|id| id.map(PrincipalId::from))
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(ids)
        })
        .await
    }

    async fn load_acl(&self, resource_type: &ResourceType, resource_id: &ResourceId) -> Result<Option<ResourceAcl>> {
        let (resource_type, resource_id) = (resource_type.clone(), resource_id.clone());
        self.run(move |conn| {
            let body: Option<Vec<u8>> = conn
                .query_row(
                    "SELECT body FROM resource_acls WHERE resource_type = ?1 AND resource_id = ?2",
                    params![resource_type.as_str(), resource_id.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            body.map(|b| ResourceAcl::from_bytes(&b).map_err(|e| StoreError::Serialization(e.to_string())))
                .transpose()
        })
        .await
    }

    async fn save_acl(&self, acl: &ResourceAcl) -> Result<()> {
        let acl = acl.clone();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let stored: Option<Vec<u8>> = tx
                .query_row(
                    "SELECT body FROM resource_acls WHERE resource_type = ?1 AND resource_id = ?2",
                    params![acl.resource_type.as_str(), acl.resource_id.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            let stored = stored
                .map(|b| ResourceAcl::from_bytes(&b).map_err(|e| StoreError::Serialization(e.to_string())))
                .transpose()?;

            if check_acl_write(stored.as_ref(), &acl)? {
                tx.execute(
                    "INSERT INTO resource_acls (resource_type, resource_id, version, body)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(resource_type, resource_id) DO UPDATE SET
                        version = excluded.version,
                        body = excluded.body",
                    params![
                        acl.resource_type.as_str(),
                        acl.resource_id.as_str(),
                        acl.version,
                        acl.to_bytes()
                    ],
                )?;
                tx.commit()?;
            }
            Ok(())
        })
        .await
    }

    async fn append_audit(&self, signed: &SignedRecord) -> Result<AppendResult> {
        let signed = signed.clone();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let record = &signed.record;

            let existing = select_entries(
                &tx,
                "WHERE decision_id = ?1",
                params![record.decision_id().as_bytes().as_slice()],
            )?;
            if let Some((_, existing)) = existing.first() {
                return repeated_append(existing, &signed);
            }

            let principal = record.principal().as_str().to_owned();
            let head = load_head(&tx, &principal)?;
            check_decision_order(&head, &signed)?;
            let entry = LedgerEntry::seal(signed.clone(), head);
            let record = &entry.record;

            tx.execute(
                "INSERT INTO audit_ledger (
                    record_id, decision_id, principal_id, seq, action, resource_type,
                    resource_id, decided_at, expires_at, record, signature, signer,
                    prev_hash, entry_hash
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    entry.record_id.as_bytes().as_slice(),
                    record.decision_id().as_bytes().as_slice(),
                    principal,
                    entry.seq,
                    record.action().as_str(),
                    record.resource_type().as_str(),
                    record.resource_id().map(ResourceId::as_str),
                    record.decided_at(),
                    record.expires_at(),
                    canonical_record_bytes(record),
                    entry.signature.as_bytes().as_slice(),
                    entry.signer.0.as_slice(),
                    entry.prev_hash.as_bytes().as_slice(),
                    entry.entry_hash.as_bytes().as_slice(),
                ],
            )?;
            tx.execute(
                "INSERT INTO ledger_heads (principal_id, seq, entry_hash, decided_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(principal_id) DO UPDATE SET
                    seq = excluded.seq,
                    entry_hash = excluded.entry_hash,
                    decided_at = excluded.decided_at",
                params![
                    principal,
                    entry.seq,
                    entry.entry_hash.as_bytes().as_slice(),
                    record.decided_at(),
                ],
            )?;
            tx.commit()?;

            Ok(AppendResult::Appended(entry))
        })
        .await
    }

    async fn query_audit(&self, query: &AuditQuery) -> Result<AuditPage> {
        let query = query.clone();
        self.run(move |conn| {
            let limit = query.limit.max(1);
            let mut rows = select_entries(
                conn,
                "WHERE position > ?1 AND decided_at >= ?2 AND decided_at <= ?3
                   AND (?4 IS NULL OR principal_id = ?4)
                   AND (?5 IS NULL OR action = ?5)
                   AND (?6 IS NULL OR resource_type = ?6)
                   AND (?7 IS NULL OR resource_id = ?7)
                 ORDER BY position LIMIT ?8",
                params![
                    query.after_seq.unwrap_or(0),
                    query.from,
                    query.to,
                    query.principal.as_ref().map(PrincipalId::as_str),
                    query.action.as_ref().map(|a| a.as_str()),
                    query.resource_type.as_ref().map(ResourceType::as_str),
                    query.resource_id.as_ref().map(ResourceId::as_str),
                    (limit + 1) as i64,
                ],
            )?;

            let next_cursor = if rows.len() > limit {
                rows.truncate(limit);
                rows.last().map(|(pos, _)| *pos)
            } else {
                None
            };

            Ok(AuditPage {
                entries: rows.into_iter().map(|(_, entry)| entry).collect(),
                next_cursor,
            })
        })
        .await
    }

    async fn audit_for_principal(&self, principal: &PrincipalId) -> Result<Vec<LedgerEntry>> {
        let principal = principal.clone();
        self.run(move |conn| {
            let rows = select_entries(
                conn,
                "WHERE principal_id = ?1 ORDER BY seq",
                params![principal.as_str()],
            )?;
            Ok(rows.into_iter().map(|(_, entry)| entry).collect())
        })
        .await
    }

    async fn audit_for_resource(
        &self,
        resource_type: &ResourceType,
        resource_id: Option<&ResourceId>,
    ) -> Result<Vec<LedgerEntry>> {
        let resource_type = resource_type.clone();
        let resource_id = resource_id.cloned();
        self.run(move |conn| {
            let rows = select_entries(
                conn,
                "WHERE resource_type = ?1 AND (?2 IS NULL OR resource_id = ?2) ORDER BY position",
                params![resource_type.as_str(), resource_id.as_ref().map(ResourceId::as_str)],
            )?;
            Ok(rows.into_iter().map(|(_, entry)| entry).collect())
        })
        .await
    }

    async fn ledger_head(&self, principal: &PrincipalId) -> Result<LedgerHead> {
        let principal = principal.clone();
        self.run(move |conn| load_head(conn, principal.as_str())).await
    }

    async fn purge_audit_before(&self, now: i64) -> Result<u64> {
        self.run(move |conn| {
            let purged = conn.execute("DELETE FROM audit_ledger WHERE expires_at < ?1", params![now])?;
            Ok(purged as u64)
        })
        .await
    }
}

/// Get current time in milliseconds.
fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
