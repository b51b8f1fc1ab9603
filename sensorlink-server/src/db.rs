//! SQLite persistence layer.
//!
//! Holds the sensor directory (`sensors`) and recorded telemetry
//! (`sensor_data`). The sensor table is owned by the admin application;
//! this service only reads it. Uses WAL mode so the admin side can read
//! while readings are written.

use std::path::Path;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult};

use crate::error::PersistenceError;
use crate::store::{Device, DeviceDirectory, ReadingStore, TelemetryReading};

/// Database handle wrapping a SQLite connection.
pub struct Db {
    conn: Connection,
}

impl Db {
    /// Open (or create) the database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> SqlResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_memory() -> SqlResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> SqlResult<()> {
        self.conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS sensors (
                id          TEXT PRIMARY KEY,
                name        TEXT NOT NULL,
                description TEXT
            );

            CREATE TABLE IF NOT EXISTS sensor_data (
                id        INTEGER PRIMARY KEY AUTOINCREMENT,
                sensor_id TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                mv        REAL NOT NULL,
                mvmin     REAL NOT NULL,
                mvmax     REAL NOT NULL,
                st        REAL NOT NULL,
                et        REAL NOT NULL,
                h         REAL NOT NULL,
                v         REAL NOT NULL,
                s         REAL NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_sensor_data_sensor_ts
                ON sensor_data(sensor_id, timestamp);
            ",
        )?;
        Ok(())
    }

    // ── Sensors ────────────────────────────────────────────────────────

    /// Insert or update a sensor. Used by tests and local seeding; in
    /// production the admin application owns this table.
    pub fn save_device(&self, device: &Device) -> SqlResult<()> {
        self.conn.execute(
            "INSERT INTO sensors (id, name, description) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET name=excluded.name, description=excluded.description",
            params![device.id, device.name, device.description],
        )?;
        Ok(())
    }

    pub fn load_devices(&self) -> SqlResult<Vec<Device>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, description FROM sensors ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(Device {
                id: row.get(0)?,
                name: row.get(1)?,
                description: row.get(2)?,
            })
        })?;
        rows.collect()
    }

    // ── Readings ───────────────────────────────────────────────────────

    pub fn reading_exists(&self, sensor_id: &str, timestamp_ms: i64) -> SqlResult<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM sensor_data WHERE sensor_id = ?1 AND timestamp = ?2 LIMIT 1",
                params![sensor_id, timestamp_ms],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn insert_reading(&self, r: &TelemetryReading) -> SqlResult<()> {
        self.conn.execute(
            "INSERT INTO sensor_data (sensor_id, timestamp, mv, mvmin, mvmax, st, et, h, v, s)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![r.device_id, r.timestamp_ms, r.mv, r.mvmin, r.mvmax, r.st, r.et, r.h, r.v, r.s],
        )?;
        Ok(())
    }

    /// Most recent readings of a sensor, newest first.
    pub fn get_readings(&self, sensor_id: &str, limit: usize) -> SqlResult<Vec<TelemetryReading>> {
        let mut stmt = self.conn.prepare(
            "SELECT sensor_id, timestamp, mv, mvmin, mvmax, st, et, h, v, s
             FROM sensor_data WHERE sensor_id = ?1
             ORDER BY timestamp DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![sensor_id, limit as i64], |row| {
            Ok(TelemetryReading {
                device_id: row.get(0)?,
                timestamp_ms: row.get(1)?,
                mv: row.get(2)?,
                mvmin: row.get(3)?,
                mvmax: row.get(4)?,
                st: row.get(5)?,
                et: row.get(6)?,
                h: row.get(7)?,
                v: row.get(8)?,
                s: row.get(9)?,
            })
        })?;
        rows.collect()
    }

    pub fn count_readings(&self, sensor_id: &str) -> SqlResult<u64> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sensor_data WHERE sensor_id = ?1",
            params![sensor_id],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }
}

/// A [`Db`] shared between the supervisor and every connection.
///
/// Queries are short and run under the lock; the lock is never held
/// across an `.await`.
pub struct SqliteStore {
    db: Mutex<Db>,
}

impl SqliteStore {
    pub fn new(db: Db) -> Self {
        Self { db: Mutex::new(db) }
    }

    /// Run a closure with the database.
    pub fn with_db<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&Db) -> R,
    {
        let db = self.db.lock();
        f(&db)
    }
}

#[async_trait]
impl DeviceDirectory for SqliteStore {
    async fn list_devices(&self) -> Result<Vec<Device>, PersistenceError> {
        Ok(self.with_db(|db| db.load_devices())?)
    }
}

#[async_trait]
impl ReadingStore for SqliteStore {
    async fn exists_reading(&self, device_id: &str, timestamp_ms: i64) -> Result<bool, PersistenceError> {
        Ok(self.with_db(|db| db.reading_exists(device_id, timestamp_ms))?)
    }

    async fn insert_reading(&self, reading: &TelemetryReading) -> Result<(), PersistenceError> {
        Ok(self.with_db(|db| db.insert_reading(reading))?)
    }
}
