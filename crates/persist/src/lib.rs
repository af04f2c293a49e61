//! mdindex persistence: SQLite-backed document store for single-node deployments.
//! The merge runs in Rust inside an immediate transaction, which makes it atomic
//! across connections to the same file.

#![forbid(unsafe_code)]

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;
use mdindex_core::{merge, DocumentId, EntityKind, EntityState, IndexDocument, MergeOutcome};
use mdindex_store::{DocumentStore, StoreError, Visibility};
use metrics::{counter, histogram};
use rusqlite::{OptionalExtension, TransactionBehavior};
use tracing::debug;

/// SQLite-backed store. Simple, synchronous; each call holds the connection briefly.
pub struct SqliteStore {
    db: Mutex<rusqlite::Connection>,
}

fn backend(e: rusqlite::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

impl SqliteStore {
    pub fn open_default() -> Result<Self> {
        let path = std::env::var("MDINDEX_DB_PATH").unwrap_or_else(|_| default_db_path());
        Self::open(&path)
    }

    pub fn open(path: &str) -> Result<Self> {
        let started = Instant::now();
        let db = rusqlite::Connection::open(path).with_context(|| format!("opening sqlite db at {}", path))?;
        db.pragma_update(None, "journal_mode", "WAL").ok();
        db.pragma_update(None, "synchronous", "NORMAL").ok();
        db.execute(
            "CREATE TABLE IF NOT EXISTS md_entities (
                id             TEXT PRIMARY KEY,
                kind           TEXT NOT NULL,
                state          TEXT NOT NULL,
                update_version INTEGER NOT NULL,
                doc            TEXT NOT NULL
            )",
            [],
        )
        .context("creating md_entities table")?;
        histogram!("persist_open_ms", started.elapsed().as_secs_f64() * 1000.0);
        Ok(Self { db: Mutex::new(db) })
    }

    fn lock(&self) -> MutexGuard<'_, rusqlite::Connection> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn upsert_sync(&self, id: &DocumentId, delta: &IndexDocument) -> Result<MergeOutcome, StoreError> {
        let mut db = self.lock();
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate).map_err(backend)?;
        let stored: Option<String> = tx
            .query_row("SELECT doc FROM md_entities WHERE id = ?1", [id.as_str()], |row| row.get(0))
            .optional()
            .map_err(backend)?;
        let mut slot = match stored {
            Some(json) => Some(serde_json::from_str::<IndexDocument>(&json)?),
            None => None,
        };
        let outcome = merge::upsert(&mut slot, delta);
        if let (MergeOutcome::Created | MergeOutcome::Updated, Some(doc)) = (outcome, slot.as_ref()) {
            tx.execute(
                "INSERT INTO md_entities(id, kind, state, update_version, doc) VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    state = excluded.state,
                    update_version = excluded.update_version,
                    doc = excluded.doc",
                (id.as_str(), doc.kind.as_str(), doc.state.as_str(), doc.update_version, serde_json::to_string(doc)?),
            )
            .map_err(backend)?;
        }
        tx.commit().map_err(backend)?;
        Ok(outcome)
    }

    /// Documents ordered by id, at most `limit`, optionally narrowed to one kind and/or state.
    pub fn list(&self, kind: Option<EntityKind>, state: Option<EntityState>, limit: usize) -> Result<Vec<IndexDocument>> {
        let db = self.lock();
        let mut stmt = db.prepare(
            "SELECT doc FROM md_entities
             WHERE (?1 IS NULL OR kind = ?1) AND (?2 IS NULL OR state = ?2)
             ORDER BY id LIMIT ?3",
        )?;
        let mut rows = stmt.query((kind.map(|k| k.as_str()), state.map(|s| s.as_str()), limit as i64))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let json: String = row.get(0)?;
            out.push(serde_json::from_str(&json).context("decoding stored document")?);
        }
        Ok(out)
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn conditional_upsert(
        &self,
        id: &DocumentId,
        delta: &IndexDocument,
        _visibility: Visibility,
    ) -> Result<MergeOutcome, StoreError> {
        let started = Instant::now();
        let outcome = self.upsert_sync(id, delta)?;
        histogram!("persist_upsert_ms", started.elapsed().as_secs_f64() * 1000.0);
        counter!("persist_upsert_total", 1u64, "outcome" => outcome.as_str());
        debug!(doc_id = %id, outcome = outcome.as_str(), "sqlite upsert");
        Ok(outcome)
    }

    async fn get(&self, id: &DocumentId) -> Result<Option<IndexDocument>, StoreError> {
        let stored: Option<String> = self
            .lock()
            .query_row("SELECT doc FROM md_entities WHERE id = ?1", [id.as_str()], |row| row.get(0))
            .optional()
            .map_err(backend)?;
        Ok(match stored {
            Some(json) => Some(serde_json::from_str(&json)?),
            None => None,
        })
    }
}

fn default_db_path() -> String {
    if let Some(home) = std::env::var_os("HOME") {
        let mut p = std::path::PathBuf::from(home);
        p.push(".mdindex");
        let _ = std::fs::create_dir_all(&p);
        p.push("mdindex.db");
        return p.to_string_lossy().to_string();
    }
    // Fallback to current directory
    "mdindex.db".to_string()
}
