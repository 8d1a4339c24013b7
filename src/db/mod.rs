//! SQLite mirror of remote field values plus the call-entitlement audit log.
//!
//! The database lives at `~/.affinity-sync/mirror.db` by default. The write
//! path only reads it (cached id lookups) and appends entitlements; the
//! mirrored values themselves are filled by the resync jobs.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use crate::affinity::entitlement::CallEntitlement;
use crate::affinity::types::EntityKind;
use crate::error::SyncError;

pub mod types;
pub use types::*;

/// Store boundary consumed by the reconcilers.
pub trait MirrorStore: Send + Sync {
    /// Ids of `kind` entities whose mirrored `field_name` currently holds one
    /// of `values`. Field names match case-insensitively.
    fn lookup_ids_by_field(
        &self,
        kind: EntityKind,
        field_name: &str,
        values: &[String],
    ) -> Result<Vec<i64>, SyncError>;

    /// Append one entitlement to the audit history.
    fn insert_call_entitlement(&self, entitlement: &CallEntitlement) -> Result<(), SyncError>;
}

pub struct MirrorDb {
    conn: Mutex<Connection>,
}

impl MirrorDb {
    /// Open (or create) the database at `path` and apply the schema.
    pub fn open_at(path: PathBuf) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
            }
        }

        let conn = Connection::open(&path)?;

        // Enable WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        crate::migrations::run_migrations(&conn).map_err(DbError::Migration)?;

        log::debug!("Opened mirror database at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Execute a closure within a SQLite transaction.
    /// Commits on Ok, rolls back on Err.
    fn with_transaction<F, T>(&self, f: F) -> Result<T, DbError>
    where
        F: FnOnce(&Connection) -> Result<T, DbError>,
    {
        let conn = self.conn.lock();
        conn.execute_batch("BEGIN IMMEDIATE")?;
        match f(&conn) {
            Ok(val) => {
                conn.execute_batch("COMMIT")?;
                Ok(val)
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    /// Replace the currently-valid values of one field on one entity.
    ///
    /// Values that are unchanged keep their row; removed ones are closed with
    /// `valid_to = now`; new ones open a row with `valid_from = now`.
    pub fn mirror_field_values(
        &self,
        kind: EntityKind,
        entity_id: i64,
        field_name: &str,
        values: &[String],
    ) -> Result<(), DbError> {
        let now = Utc::now().to_rfc3339();
        let field = field_name.to_uppercase();

        self.with_transaction(|conn| {
            let current: Vec<String> = {
                let mut stmt = conn.prepare(
                    "SELECT value FROM mirrored_field_values
                     WHERE entity_kind = ?1 AND entity_id = ?2 AND field_name = ?3
                       AND valid_to IS NULL",
                )?;
                let rows = stmt.query_map(params![kind.as_str(), entity_id, field], |row| {
                    row.get::<_, String>(0)
                })?;
                rows.collect::<Result<_, _>>()?
            };

            for stale in current.iter().filter(|v| !values.contains(v)) {
                conn.execute(
                    "UPDATE mirrored_field_values SET valid_to = ?1
                     WHERE entity_kind = ?2 AND entity_id = ?3 AND field_name = ?4
                       AND value = ?5 AND valid_to IS NULL",
                    params![now, kind.as_str(), entity_id, field, stale],
                )?;
            }

            for fresh in values.iter().filter(|v| !current.contains(v)) {
                conn.execute(
                    "INSERT INTO mirrored_field_values
                        (entity_kind, entity_id, field_name, value, valid_from)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![kind.as_str(), entity_id, field, fresh, now],
                )?;
            }

            Ok(())
        })
    }

    /// The most recently inserted entitlement, if any.
    pub fn latest_call_entitlement(&self) -> Result<Option<CallEntitlement>, DbError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT user_limit, user_remaining, user_reset_at,
                        org_limit, org_remaining, org_reset_at, observed_at
                 FROM call_entitlements ORDER BY id DESC LIMIT 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()?;

        let Some((user_limit, user_remaining, user_reset, org_limit, org_remaining, org_reset, observed)) =
            row
        else {
            return Ok(None);
        };

        Ok(Some(CallEntitlement {
            user_limit,
            user_remaining,
            user_reset_at: parse_timestamp(&user_reset)?,
            org_limit,
            org_remaining,
            org_reset_at: parse_timestamp(&org_reset)?,
            observed_at: parse_timestamp(&observed)?,
        }))
    }

    pub fn count_call_entitlements(&self) -> Result<i64, DbError> {
        let conn = self.conn.lock();
        Ok(conn.query_row("SELECT COUNT(*) FROM call_entitlements", [], |row| {
            row.get(0)
        })?)
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| DbError::Timestamp(raw.to_string()))
}

impl MirrorStore for MirrorDb {
    fn lookup_ids_by_field(
        &self,
        kind: EntityKind,
        field_name: &str,
        values: &[String],
    ) -> Result<Vec<i64>, SyncError> {
        if values.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = (0..values.len())
            .map(|i| format!("?{}", i + 3))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT DISTINCT entity_id FROM mirrored_field_values
             WHERE entity_kind = ?1 AND field_name = ?2 AND valid_to IS NULL
               AND value IN ({})
             ORDER BY entity_id",
            placeholders
        );

        let mut bound = vec![kind.as_str().to_string(), field_name.to_uppercase()];
        bound.extend(values.iter().cloned());

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql).map_err(DbError::from)?;
        let rows = stmt
            .query_map(params_from_iter(bound.iter()), |row| row.get::<_, i64>(0))
            .map_err(DbError::from)?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row.map_err(DbError::from)?);
        }
        Ok(ids)
    }

    fn insert_call_entitlement(&self, entitlement: &CallEntitlement) -> Result<(), SyncError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO call_entitlements
                (user_limit, user_remaining, user_reset_at,
                 org_limit, org_remaining, org_reset_at, observed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entitlement.user_limit,
                entitlement.user_remaining,
                entitlement.user_reset_at.to_rfc3339(),
                entitlement.org_limit,
                entitlement.org_remaining,
                entitlement.org_reset_at.to_rfc3339(),
                entitlement.observed_at.to_rfc3339(),
            ],
        )
        .map_err(DbError::from)?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
