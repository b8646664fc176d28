//! SQLite repository with a transactional outbox.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, ErrorCode};
use uuid::Uuid;

use abx_types::{Experiment, ExperimentStatus};

use crate::error::StoreError;
use crate::outbox::{OutboxEventType, OutboxRow};
use crate::Result;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS experiments (
    id              TEXT PRIMARY KEY,
    layer_id        TEXT NOT NULL,
    config_version  TEXT NOT NULL,
    end_time        TEXT,
    salt            TEXT NOT NULL,
    status          TEXT NOT NULL,
    targeting_rules TEXT NOT NULL,
    override_lists  TEXT NOT NULL,
    variants        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS outbox (
    event_id         TEXT PRIMARY KEY,
    aggregate_id     TEXT NOT NULL,
    event_type       TEXT NOT NULL,
    payload          TEXT NOT NULL,
    created_at       TEXT NOT NULL,
    processing_state TEXT NOT NULL DEFAULT 'PENDING'
);

CREATE INDEX IF NOT EXISTS idx_outbox_pending
    ON outbox(processing_state, created_at);
";

const EXPERIMENT_COLUMNS: &str =
    "id, layer_id, config_version, end_time, salt, status, targeting_rules, override_lists, variants";

/// SQLite-backed experiment repository.
///
/// Every mutation writes the experiment table and the outbox table in one
/// transaction: a committed write is visible together with exactly one
/// outbox row, a rolled-back write leaves neither.
pub struct ExperimentStore {
    conn: Mutex<Connection>,
}

impl ExperimentStore {
    /// Open or create the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert a new experiment and its UPSERT outbox row.
    ///
    /// A duplicate id surfaces as [`StoreError::Conflict`].
    pub fn create(&self, exp: &Experiment) -> Result<()> {
        let payload = serde_json::to_string(exp)?;
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let inserted = tx.execute(
            "INSERT INTO experiments (id, layer_id, config_version, end_time, salt, status,
                                      targeting_rules, override_lists, variants)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                exp.id,
                exp.layer_id,
                exp.config_version.as_str(),
                exp.end_time.map(format_time),
                exp.salt,
                status_str(exp.status),
                serde_json::to_string(&exp.targeting_rules)?,
                serde_json::to_string(&exp.override_lists)?,
                serde_json::to_string(&exp.variants)?,
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::ConstraintViolation =>
            {
                return Err(StoreError::Conflict(exp.id.clone()));
            }
            Err(e) => return Err(e.into()),
        }

        insert_outbox_row(&tx, &exp.id, OutboxEventType::Upsert, &payload)?;
        tx.commit()?;
        Ok(())
    }

    /// Overwrite an existing experiment and append its UPSERT outbox row.
    pub fn update(&self, exp: &Experiment) -> Result<()> {
        let payload = serde_json::to_string(exp)?;
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let affected = tx.execute(
            "UPDATE experiments
             SET layer_id = ?1, config_version = ?2, end_time = ?3, salt = ?4, status = ?5,
                 targeting_rules = ?6, override_lists = ?7, variants = ?8
             WHERE id = ?9",
            params![
                exp.layer_id,
                exp.config_version.as_str(),
                exp.end_time.map(format_time),
                exp.salt,
                status_str(exp.status),
                serde_json::to_string(&exp.targeting_rules)?,
                serde_json::to_string(&exp.override_lists)?,
                serde_json::to_string(&exp.variants)?,
                exp.id,
            ],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound(exp.id.clone()));
        }

        insert_outbox_row(&tx, &exp.id, OutboxEventType::Upsert, &payload)?;
        tx.commit()?;
        Ok(())
    }

    /// Delete an experiment and append its DELETE outbox row.
    pub fn delete(&self, id: &str) -> Result<()> {
        let payload = serde_json::to_string(&serde_json::json!({ "id": id }))?;
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let affected = tx.execute("DELETE FROM experiments WHERE id = ?1", params![id])?;
        if affected == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }

        insert_outbox_row(&tx, id, OutboxEventType::Delete, &payload)?;
        tx.commit()?;
        Ok(())
    }

    /// Look up one experiment.
    pub fn find_by_id(&self, id: &str) -> Result<Option<Experiment>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {EXPERIMENT_COLUMNS} FROM experiments WHERE id = ?1 LIMIT 1"
        ))?;
        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_experiment(row)?)),
            None => Ok(None),
        }
    }

    /// All experiments with status ACTIVE.
    pub fn find_all_active(&self) -> Result<Vec<Experiment>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {EXPERIMENT_COLUMNS} FROM experiments WHERE status = 'ACTIVE'"
        ))?;
        let mut rows = stmt.query([])?;
        let mut experiments = Vec::new();
        while let Some(row) = rows.next()? {
            experiments.push(row_to_experiment(row)?);
        }
        Ok(experiments)
    }

    /// Claim up to `limit` PENDING outbox rows, oldest first, marking them
    /// LOCKED so concurrent workers do not pick them up again.
    pub fn claim_pending(&self, limit: usize) -> Result<Vec<OutboxRow>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let rows = {
            let mut stmt = tx.prepare(
                "SELECT event_id, aggregate_id, event_type, payload, created_at
                 FROM outbox
                 WHERE processing_state = 'PENDING'
                 ORDER BY created_at, rowid
                 LIMIT ?1",
            )?;
            let mut query = stmt.query(params![limit as i64])?;
            let mut rows = Vec::new();
            while let Some(row) = query.next()? {
                let event_type: String = row.get(2)?;
                let created_at: String = row.get(4)?;
                rows.push(OutboxRow {
                    event_id: row.get(0)?,
                    aggregate_id: row.get(1)?,
                    event_type: OutboxEventType::parse(&event_type).ok_or_else(|| {
                        rusqlite::Error::InvalidColumnType(
                            2,
                            "event_type".to_string(),
                            rusqlite::types::Type::Text,
                        )
                    })?,
                    payload: row.get(3)?,
                    created_at: parse_time(&created_at)?,
                });
            }
            rows
        };

        for row in &rows {
            tx.execute(
                "UPDATE outbox SET processing_state = 'LOCKED' WHERE event_id = ?1",
                params![row.event_id],
            )?;
        }

        tx.commit()?;
        Ok(rows)
    }

    /// Return claimed rows to PENDING so the next tick retries them.
    pub fn release(&self, event_ids: &[String]) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        for event_id in event_ids {
            conn.execute(
                "UPDATE outbox SET processing_state = 'PENDING' WHERE event_id = ?1",
                params![event_id],
            )?;
        }
        Ok(())
    }

    /// Remove successfully published rows.
    pub fn delete_published(&self, event_ids: &[String]) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        for event_id in event_ids {
            conn.execute("DELETE FROM outbox WHERE event_id = ?1", params![event_id])?;
        }
        Ok(())
    }

    /// Number of outbox rows still waiting to be claimed.
    pub fn pending_count(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM outbox WHERE processing_state = 'PENDING'",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

fn insert_outbox_row(
    tx: &rusqlite::Transaction<'_>,
    aggregate_id: &str,
    event_type: OutboxEventType,
    payload: &str,
) -> Result<()> {
    tx.execute(
        "INSERT INTO outbox (event_id, aggregate_id, event_type, payload, created_at, processing_state)
         VALUES (?1, ?2, ?3, ?4, ?5, 'PENDING')",
        params![
            Uuid::new_v4().to_string(),
            aggregate_id,
            event_type.as_str(),
            payload,
            format_time(Utc::now()),
        ],
    )?;
    Ok(())
}

fn status_str(status: ExperimentStatus) -> &'static str {
    match status {
        ExperimentStatus::Draft => "DRAFT",
        ExperimentStatus::Active => "ACTIVE",
        ExperimentStatus::Paused => "PAUSED",
        ExperimentStatus::Finished => "FINISHED",
    }
}

/// Fixed-width UTC timestamps so lexical order in the index matches
/// chronological order.
fn format_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(s: &str) -> std::result::Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| {
            rusqlite::Error::InvalidColumnType(
                0,
                "created_at".to_string(),
                rusqlite::types::Type::Text,
            )
        })
}

fn row_to_experiment(row: &rusqlite::Row<'_>) -> Result<Experiment> {
    let end_time: Option<String> = row.get(3)?;
    let status: String = row.get(5)?;
    let targeting_rules: String = row.get(6)?;
    let override_lists: String = row.get(7)?;
    let variants: String = row.get(8)?;

    let config_version: String = row.get(2)?;

    Ok(Experiment {
        id: row.get(0)?,
        layer_id: row.get(1)?,
        config_version: config_version.into(),
        end_time: match end_time {
            Some(s) => Some(parse_time(&s)?),
            None => None,
        },
        salt: row.get(4)?,
        status: serde_json::from_value(serde_json::Value::String(status))?,
        targeting_rules: serde_json::from_str(&targeting_rules)?,
        override_lists: serde_json::from_str(&override_lists)?,
        variants: serde_json::from_str(&variants)?,
    })
}
