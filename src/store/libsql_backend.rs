//! libSQL backend: async `RuleStore` and `CheckpointStore` implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{info, warn};

use crate::error::DatabaseError;
use crate::pipeline::types::{ActionSpec, BlockKind, BlockedPattern, NlRule};
use crate::store::migrations;
use crate::store::traits::{CheckpointStore, RuleStore, SyncedLabel};

const WATERMARK_KEY: &str = "poll_watermark";

/// libSQL rule store.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let store = Self::from_database(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run an `INSERT ... RETURNING id` and return the id.
    async fn insert_returning_id(
        &self,
        op: &str,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<i64, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| query_error(op, e))?;
        let row = rows
            .next()
            .await
            .map_err(|e| query_error(op, e))?
            .ok_or_else(|| DatabaseError::Query(format!("{op}: no id returned")))?;
        row.get::<i64>(0)
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Map a libsql error, surfacing uniqueness violations as `Constraint`.
fn query_error(op: &str, e: libsql::Error) -> DatabaseError {
    let msg = e.to_string();
    if msg.contains("UNIQUE constraint failed") {
        DatabaseError::Constraint(format!("{op}: {msg}"))
    } else {
        DatabaseError::Query(format!("{op}: {msg}"))
    }
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn try_parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(ndt.and_utc());
    }
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|ndt| ndt.and_utc())
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    try_parse_datetime(s).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn row_to_blocked(row: &libsql::Row) -> Result<Option<BlockedPattern>, DatabaseError> {
    let id: i64 = row
        .get(0)
        .map_err(|e| DatabaseError::Serialization(format!("blocked_senders.id: {e}")))?;
    let pattern: String = row
        .get(1)
        .map_err(|e| DatabaseError::Serialization(format!("blocked_senders.pattern: {e}")))?;
    let kind_str: String = row.get(2).unwrap_or_default();

    match BlockKind::parse(&kind_str) {
        Some(kind) => Ok(Some(BlockedPattern { id, pattern, kind })),
        None => {
            warn!(id, kind = %kind_str, "Skipping blocked sender with unknown kind");
            Ok(None)
        }
    }
}

fn row_to_nl_rule(row: &libsql::Row) -> Result<Option<NlRule>, DatabaseError> {
    let id: i64 = row
        .get(0)
        .map_err(|e| DatabaseError::Serialization(format!("nl_rules.id: {e}")))?;
    let text: String = row
        .get(1)
        .map_err(|e| DatabaseError::Serialization(format!("nl_rules.rule_text: {e}")))?;
    let actions_str: String = row.get(2).unwrap_or_else(|_| "[]".to_string());
    let created_str: String = row.get(3).unwrap_or_default();

    let actions_json: serde_json::Value = match serde_json::from_str(&actions_str) {
        Ok(v) => v,
        Err(e) => {
            warn!(id, error = %e, "Skipping natural-language rule with malformed actions");
            return Ok(None);
        }
    };
    match ActionSpec::parse_list(actions_json) {
        Ok(actions) => Ok(Some(NlRule {
            id,
            text,
            actions,
            created_at: parse_datetime(&created_str),
        })),
        Err(e) => {
            warn!(id, error = %e, "Skipping natural-language rule with invalid actions");
            Ok(None)
        }
    }
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl RuleStore for LibSqlStore {
    // ── Blocked senders ─────────────────────────────────────────────

    async fn get_all_blocked_senders(&self) -> Result<Vec<BlockedPattern>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, pattern, kind FROM blocked_senders ORDER BY id",
                (),
            )
            .await
            .map_err(|e| query_error("get_all_blocked_senders", e))?;

        let mut patterns = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| query_error("get_all_blocked_senders", e))?
        {
            if let Some(p) = row_to_blocked(&row)? {
                patterns.push(p);
            }
        }
        Ok(patterns)
    }

    async fn create_blocked_sender(
        &self,
        pattern: &str,
        kind: BlockKind,
    ) -> Result<i64, DatabaseError> {
        self.insert_returning_id(
            "create_blocked_sender",
            "INSERT INTO blocked_senders (pattern, kind, created_at) VALUES (?1, ?2, ?3) RETURNING id",
            params![pattern, kind.as_str(), Utc::now().to_rfc3339()],
        )
        .await
    }

    async fn delete_blocked_sender(&self, id: i64) -> Result<bool, DatabaseError> {
        let count = self
            .conn()
            .execute("DELETE FROM blocked_senders WHERE id = ?1", params![id])
            .await
            .map_err(|e| query_error("delete_blocked_sender", e))?;
        Ok(count > 0)
    }

    // ── Natural-language rules ──────────────────────────────────────

    async fn get_all_nl_rules(&self) -> Result<Vec<NlRule>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, rule_text, actions, created_at FROM nl_rules ORDER BY id",
                (),
            )
            .await
            .map_err(|e| query_error("get_all_nl_rules", e))?;

        let mut rules = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| query_error("get_all_nl_rules", e))?
        {
            if let Some(rule) = row_to_nl_rule(&row)? {
                rules.push(rule);
            }
        }
        Ok(rules)
    }

    async fn create_nl_rule(
        &self,
        text: &str,
        actions: &[ActionSpec],
    ) -> Result<i64, DatabaseError> {
        let actions_json = serde_json::to_string(actions)
            .map_err(|e| DatabaseError::Serialization(format!("nl_rule actions: {e}")))?;
        self.insert_returning_id(
            "create_nl_rule",
            "INSERT INTO nl_rules (rule_text, actions, created_at) VALUES (?1, ?2, ?3) RETURNING id",
            params![text, actions_json, Utc::now().to_rfc3339()],
        )
        .await
    }

    async fn get_nl_rule(&self, id: i64) -> Result<Option<NlRule>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, rule_text, actions, created_at FROM nl_rules WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(|e| query_error("get_nl_rule", e))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_nl_rule(&row),
            Ok(None) => Ok(None),
            Err(e) => Err(query_error("get_nl_rule", e)),
        }
    }

    async fn delete_nl_rule(&self, id: i64) -> Result<bool, DatabaseError> {
        let count = self
            .conn()
            .execute("DELETE FROM nl_rules WHERE id = ?1", params![id])
            .await
            .map_err(|e| query_error("delete_nl_rule", e))?;
        Ok(count > 0)
    }

    // ── Labels ──────────────────────────────────────────────────────

    async fn create_label_with_uri(
        &self,
        name: &str,
        provider_id: &str,
    ) -> Result<i64, DatabaseError> {
        self.insert_returning_id(
            "create_label_with_uri",
            "INSERT INTO labels (name, provider_id, created_at) VALUES (?1, ?2, ?3) RETURNING id",
            params![name, provider_id, Utc::now().to_rfc3339()],
        )
        .await
    }

    async fn get_all_labels(&self) -> Result<Vec<SyncedLabel>, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT id, name, provider_id FROM labels ORDER BY id", ())
            .await
            .map_err(|e| query_error("get_all_labels", e))?;

        let mut labels = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| query_error("get_all_labels", e))?
        {
            labels.push(SyncedLabel {
                id: row.get(0).map_err(|e| query_error("get_all_labels", e))?,
                name: row.get(1).map_err(|e| query_error("get_all_labels", e))?,
                provider_id: row.get(2).map_err(|e| query_error("get_all_labels", e))?,
            });
        }
        Ok(labels)
    }
}

#[async_trait]
impl CheckpointStore for LibSqlStore {
    async fn get_watermark(&self) -> Result<Option<DateTime<Utc>>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT value FROM checkpoints WHERE key = ?1",
                params![WATERMARK_KEY],
            )
            .await
            .map_err(|e| query_error("get_watermark", e))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let value: String = row.get(0).map_err(|e| query_error("get_watermark", e))?;
                try_parse_datetime(&value).map(Some).ok_or_else(|| {
                    DatabaseError::Serialization(format!("invalid stored watermark '{value}'"))
                })
            }
            Ok(None) => Ok(None),
            Err(e) => Err(query_error("get_watermark", e)),
        }
    }

    async fn set_watermark(&self, at: DateTime<Utc>) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO checkpoints (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![WATERMARK_KEY, at.to_rfc3339(), Utc::now().to_rfc3339()],
            )
            .await
            .map_err(|e| query_error("set_watermark", e))?;
        Ok(())
    }
}
