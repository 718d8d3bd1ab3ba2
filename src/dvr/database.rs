//! Database operations for DVR autorec
//!
//! Uses rusqlite with connection pooling (r2d2) for efficient concurrent access.
//! WAL mode is enabled for file databases. Holds the persisted autorec rule
//! records, the recordings they schedule, and the autorec settings.

use std::path::Path;

use anyhow::{Context, Result};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row};
use tracing::{debug, info, warn};

use crate::dvr::models::*;

/// Persistent storage for autorec rule records.
///
/// Records are opaque to the store; `load` returns them in the order they were
/// first saved.
pub trait ConfigStore: Send + Sync {
    fn load(&self) -> Result<Vec<(String, AutorecRecord)>>;
    fn save(&self, id: &str, record: &AutorecRecord) -> Result<()>;
    fn delete(&self, id: &str) -> Result<()>;
}

/// Database connection pool for DVR operations
pub struct DvrDatabase {
    pool: Pool<SqliteConnectionManager>,
}

impl DvrDatabase {
    /// Open (or create) the database file with a connection pool
    pub fn open(db_path: &Path) -> Result<Self> {
        info!("Initializing DVR database at: {:?}", db_path);

        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }

        let manager = SqliteConnectionManager::file(db_path);

        let pool = Pool::builder()
            .max_size(5) // Max 5 concurrent connections
            .connection_timeout(std::time::Duration::from_secs(10))
            .build(manager)
            .context("Failed to create database pool")?;

        let db = Self { pool };
        db.initialize_schema()?;
        db.configure_wal_mode()?;

        info!("DVR database initialized successfully");
        Ok(db)
    }

    /// Private in-memory database. A single pooled connection keeps every
    /// caller on the same database.
    pub fn in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .max_lifetime(None)
            .idle_timeout(None)
            .build(manager)
            .context("Failed to create in-memory database pool")?;

        let db = Self { pool };
        db.initialize_schema()?;
        Ok(db)
    }

    /// Get a connection from the pool
    pub fn get_conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.pool.get().context("Failed to get database connection")
    }

    /// Initialize database schema
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.get_conn()?;

        // Autorec rule records, one JSON document per rule
        conn.execute(
            "CREATE TABLE IF NOT EXISTS dvr_autorec (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                record TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;

        // Recordings scheduled by autorec rules
        conn.execute(
            "CREATE TABLE IF NOT EXISTS dvr_schedules (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                autorec_id TEXT,
                event_id INTEGER NOT NULL,
                channel_id TEXT NOT NULL,
                program_title TEXT NOT NULL,
                scheduled_start INTEGER NOT NULL,
                scheduled_end INTEGER NOT NULL,
                start_padding_sec INTEGER DEFAULT 60,
                end_padding_sec INTEGER DEFAULT 300,
                priority INTEGER NOT NULL DEFAULT 2,
                retention_days INTEGER NOT NULL DEFAULT 0,
                directory TEXT,
                status TEXT NOT NULL DEFAULT 'scheduled',
                created_at INTEGER NOT NULL,
                started_at INTEGER,
                updated_at INTEGER
            )",
            [],
        )?;

        // DVR Settings table
        conn.execute(
            "CREATE TABLE IF NOT EXISTS dvr_settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;

        // Indexes for performance
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_dvr_schedules_status ON dvr_schedules(status)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_dvr_schedules_time ON dvr_schedules(scheduled_start, scheduled_end)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_dvr_schedules_autorec ON dvr_schedules(autorec_id)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_dvr_schedules_event ON dvr_schedules(event_id, channel_id)",
            [],
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    /// Configure WAL mode for concurrent access
    fn configure_wal_mode(&self) -> Result<()> {
        let conn = self.get_conn()?;

        // PRAGMA journal_mode returns the new mode, so we use query_row
        let journal_mode: String =
            conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;

        info!("Database journal mode: {}", journal_mode);

        if journal_mode != "wal" {
            warn!("WAL mode not enabled, got: {}", journal_mode);
        }

        Ok(())
    }

    /// Add a new recording schedule
    pub fn add_schedule(&self, request: &ScheduleRequest) -> Result<i64> {
        let conn = self.get_conn()?;

        conn.execute(
            "INSERT INTO dvr_schedules (
                autorec_id, event_id, channel_id, program_title,
                scheduled_start, scheduled_end, start_padding_sec, end_padding_sec,
                priority, retention_days, directory, status, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 'scheduled', ?12)",
            params![
                request.autorec_id,
                request.event_id,
                request.channel_id,
                request.program_title,
                request.scheduled_start,
                request.scheduled_end,
                request.start_padding_sec,
                request.end_padding_sec,
                request.priority.as_u32(),
                request.retention_days,
                request.directory,
                chrono::Utc::now().timestamp(),
            ],
        )?;

        let id = conn.last_insert_rowid();
        info!("Added schedule {}: {}", id, request.program_title);
        Ok(id)
    }

    /// Find a live (scheduled, recording or completed) schedule for a broadcast
    pub fn find_schedule_for_event(&self, event_id: i64, channel_id: &str) -> Result<Option<i64>> {
        let conn = self.get_conn()?;

        let id = conn
            .query_row(
                "SELECT id FROM dvr_schedules
                 WHERE event_id = ?1 AND channel_id = ?2
                 AND status IN ('scheduled', 'recording', 'completed')
                 ORDER BY id LIMIT 1",
                params![event_id, channel_id],
                |row| row.get(0),
            )
            .optional()?;

        Ok(id)
    }

    /// Update schedule status
    pub fn update_schedule_status(&self, id: i64, status: ScheduleStatus) -> Result<()> {
        let conn = self.get_conn()?;
        let now = chrono::Utc::now().timestamp();

        if status == ScheduleStatus::Recording {
            conn.execute(
                "UPDATE dvr_schedules SET status = ?1, started_at = ?2, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), now, id],
            )?;
        } else {
            conn.execute(
                "UPDATE dvr_schedules SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), now, id],
            )?;
        }

        debug!("Updated schedule {} to {:?}", id, status);
        Ok(())
    }

    /// Cancel a scheduled recording. Started recordings are left alone.
    pub fn cancel_schedule(&self, id: i64) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "UPDATE dvr_schedules SET status = 'canceled', updated_at = ?1
             WHERE id = ?2 AND status = 'scheduled'",
            params![chrono::Utc::now().timestamp(), id],
        )?;

        info!("Canceled schedule {}", id);
        Ok(())
    }

    /// Set or clear the owning autorec rule of a schedule
    pub fn set_schedule_autorec(&self, id: i64, autorec_id: Option<&str>) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "UPDATE dvr_schedules SET autorec_id = ?1, updated_at = ?2 WHERE id = ?3",
            params![autorec_id, chrono::Utc::now().timestamp(), id],
        )?;

        debug!("Schedule {} autorec set to {:?}", id, autorec_id);
        Ok(())
    }

    /// Persist a schedule as it currently is
    pub fn touch_schedule(&self, id: i64) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "UPDATE dvr_schedules SET updated_at = ?1 WHERE id = ?2",
            params![chrono::Utc::now().timestamp(), id],
        )?;

        Ok(())
    }

    /// Get schedule by ID
    pub fn get_schedule(&self, id: i64) -> Result<Option<Schedule>> {
        let conn = self.get_conn()?;

        let schedule = conn
            .query_row(
                "SELECT * FROM dvr_schedules WHERE id = ?1",
                params![id],
                schedule_from_row,
            )
            .optional()?;

        Ok(schedule)
    }

    /// Schedules currently owned by an autorec rule
    pub fn get_autorec_schedules(&self, autorec_id: &str) -> Result<Vec<Schedule>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(
            "SELECT * FROM dvr_schedules WHERE autorec_id = ?1 ORDER BY scheduled_start ASC",
        )?;
        let schedules = stmt
            .query_map(params![autorec_id], schedule_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(schedules)
    }

    /// Ids of scheduled or running recordings linked to an autorec rule
    pub fn get_active_autorec_jobs(&self, autorec_id: &str) -> Result<Vec<i64>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(
            "SELECT id FROM dvr_schedules
             WHERE autorec_id = ?1 AND status IN ('scheduled', 'recording')
             ORDER BY id ASC",
        )?;
        let ids = stmt
            .query_map(params![autorec_id], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;

        Ok(ids)
    }

    /// All persisted autorec records in insertion order.
    ///
    /// Records that fail to parse are logged and skipped.
    pub fn load_autorec_records(&self) -> Result<Vec<(String, AutorecRecord)>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare("SELECT id, record FROM dvr_autorec ORDER BY seq ASC")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut records = Vec::with_capacity(rows.len());
        for (id, json) in rows {
            match serde_json::from_str::<AutorecRecord>(&json) {
                Ok(record) => records.push((id, record)),
                Err(e) => warn!("Skipping malformed autorec record {}: {}", id, e),
            }
        }

        debug!("Loaded {} autorec records", records.len());
        Ok(records)
    }

    /// Insert or replace an autorec record, keeping its original position
    pub fn save_autorec_record(&self, id: &str, record: &AutorecRecord) -> Result<()> {
        let conn = self.get_conn()?;
        let json = serde_json::to_string(record).context("Failed to serialize autorec record")?;

        conn.execute(
            "INSERT INTO dvr_autorec (id, record, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET record = excluded.record, updated_at = excluded.updated_at",
            params![id, json, chrono::Utc::now().timestamp()],
        )?;

        debug!("Saved autorec record {}", id);
        Ok(())
    }

    pub fn delete_autorec_record(&self, id: &str) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute("DELETE FROM dvr_autorec WHERE id = ?1", params![id])?;
        info!("Deleted autorec record {}", id);
        Ok(())
    }

    /// Get autorec settings
    pub fn get_settings(&self) -> Result<AutorecSettings> {
        let conn = self.get_conn()?;

        let mut settings = AutorecSettings::default();

        let mut stmt = conn.prepare("SELECT key, value FROM dvr_settings")?;
        let rows = stmt.query_map([], |row| {
            let key: String = row.get(0)?;
            let value: String = row.get(1)?;
            Ok((key, value))
        })?;

        for row in rows {
            let (key, value) = row?;
            match key.as_str() {
                "default_start_padding_sec" => {
                    if let Ok(v) = value.parse() {
                        settings.default_start_padding_sec = v;
                    }
                }
                "default_end_padding_sec" => {
                    if let Ok(v) = value.parse() {
                        settings.default_end_padding_sec = v;
                    }
                }
                "utc_offset_minutes" => {
                    settings.utc_offset_minutes = value.parse().ok();
                }
                "debug_logging" => {
                    settings.debug_logging = value == "true" || value == "1";
                }
                _ => {}
            }
        }

        Ok(settings)
    }

    /// Save DVR setting
    pub fn save_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "INSERT INTO dvr_settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;

        Ok(())
    }
}

impl ConfigStore for DvrDatabase {
    fn load(&self) -> Result<Vec<(String, AutorecRecord)>> {
        self.load_autorec_records()
    }

    fn save(&self, id: &str, record: &AutorecRecord) -> Result<()> {
        self.save_autorec_record(id, record)
    }

    fn delete(&self, id: &str) -> Result<()> {
        self.delete_autorec_record(id)
    }
}

fn schedule_from_row(row: &Row<'_>) -> rusqlite::Result<Schedule> {
    let status_str: String = row.get("status")?;
    Ok(Schedule {
        id: row.get("id")?,
        autorec_id: row.get("autorec_id")?,
        event_id: row.get("event_id")?,
        channel_id: row.get("channel_id")?,
        program_title: row.get("program_title")?,
        scheduled_start: row.get("scheduled_start")?,
        scheduled_end: row.get("scheduled_end")?,
        start_padding_sec: row.get("start_padding_sec")?,
        end_padding_sec: row.get("end_padding_sec")?,
        priority: Priority::from_u32(row.get("priority")?),
        retention_days: row.get("retention_days")?,
        directory: row.get("directory")?,
        status: status_str.parse().unwrap_or(ScheduleStatus::Scheduled),
        created_at: row.get("created_at")?,
        started_at: row.get("started_at")?,
    })
}
