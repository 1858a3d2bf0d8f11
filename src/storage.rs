//! Detection record persistence.
//!
//! One record per positive detection, appended to a SQLite table keyed by
//! the event timestamp. `INSERT OR REPLACE` on that key makes a caller-side
//! retry idempotent. The in-memory store backs tests.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use rusqlite::{params, Connection};

use crate::weather::WeatherReport;

/// One positive detection, ready to persist.
#[derive(Clone, Debug)]
pub struct DetectionRecord {
    /// Epoch seconds of the triggering frame; the idempotency key.
    pub event_epoch: i64,
    /// `%Y-%m-%d %H:%M:%S` rendering of the same instant.
    pub event_time: String,
    /// Day of week, e.g. "Saturday".
    pub day: String,
    pub weather: WeatherReport,
    pub label: String,
    /// Per-frame label -> percentage maps for the whole clip.
    pub frame_scores: Vec<BTreeMap<String, f64>>,
    pub image_url: String,
    pub video_url: Option<String>,
}

/// Append-only sink for detection records.
pub trait DetectionStore {
    fn append(&mut self, record: &DetectionRecord) -> Result<()>;
}

pub struct SqliteDetectionStore {
    conn: Connection,
}

impl SqliteDetectionStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("open detection database {}", db_path))?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS detections (
              event_ts INTEGER PRIMARY KEY,
              event_time TEXT NOT NULL,
              day TEXT NOT NULL,
              temperature REAL,
              humidity REAL,
              conditions TEXT,
              object TEXT NOT NULL,
              probability TEXT NOT NULL,
              frame_url TEXT NOT NULL,
              clip_url TEXT
            );
            "#,
        )?;
        Ok(())
    }

    /// Number of stored records (for health logging).
    pub fn count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM detections", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

impl DetectionStore for SqliteDetectionStore {
    fn append(&mut self, record: &DetectionRecord) -> Result<()> {
        let probability_json =
            serde_json::to_string(&record.frame_scores).context("serialize frame scores")?;
        self.conn
            .execute(
                r#"
                INSERT OR REPLACE INTO detections
                  (event_ts, event_time, day, temperature, humidity, conditions,
                   object, probability, frame_url, clip_url)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
                params![
                    record.event_epoch,
                    record.event_time,
                    record.day,
                    record.weather.temperature,
                    record.weather.humidity,
                    record.weather.description,
                    record.label,
                    probability_json,
                    record.image_url,
                    record.video_url,
                ],
            )
            .context("append detection record")?;
        Ok(())
    }
}

/// In-memory store for tests.
#[derive(Debug, Default)]
pub struct InMemoryDetectionStore {
    records: Vec<DetectionRecord>,
}

impl InMemoryDetectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[DetectionRecord] {
        &self.records
    }
}

impl DetectionStore for InMemoryDetectionStore {
    fn append(&mut self, record: &DetectionRecord) -> Result<()> {
        // Same idempotency contract as the SQLite store.
        self.records
            .retain(|existing| existing.event_epoch != record.event_epoch);
        self.records.push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record(epoch: i64) -> DetectionRecord {
        let mut scores = BTreeMap::new();
        scores.insert("dog".to_string(), 41.5);
        scores.insert("tree".to_string(), 20.0);
        DetectionRecord {
            event_epoch: epoch,
            event_time: "2026-08-29 07:31:04".to_string(),
            day: "Saturday".to_string(),
            weather: WeatherReport {
                temperature: Some(16.2),
                humidity: Some(62.0),
                description: Some("broken clouds".to_string()),
            },
            label: "dog".to_string(),
            frame_scores: vec![scores],
            image_url: "/public/img/trail_pics/1700000123.png".to_string(),
            video_url: None,
        }
    }

    #[test]
    fn sqlite_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("detections.db");
        let mut store = SqliteDetectionStore::open(db_path.to_str().unwrap()).unwrap();

        store.append(&sample_record(1_700_000_123)).unwrap();
        assert_eq!(store.count().unwrap(), 1);

        let (label, probability, temperature): (String, String, Option<f64>) = store
            .conn
            .query_row(
                "SELECT object, probability, temperature FROM detections WHERE event_ts = ?1",
                params![1_700_000_123i64],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!(label, "dog");
        assert!(probability.contains("41.5"));
        assert_eq!(temperature, Some(16.2));
    }

    #[test]
    fn replay_of_same_event_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("detections.db");
        let mut store = SqliteDetectionStore::open(db_path.to_str().unwrap()).unwrap();

        store.append(&sample_record(1_700_000_123)).unwrap();
        store.append(&sample_record(1_700_000_123)).unwrap();
        store.append(&sample_record(1_700_000_456)).unwrap();
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn record_without_weather_persists() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("detections.db");
        let mut store = SqliteDetectionStore::open(db_path.to_str().unwrap()).unwrap();

        let mut record = sample_record(1_700_000_789);
        record.weather = WeatherReport::default();
        store.append(&record).unwrap();

        let conditions: Option<String> = store
            .conn
            .query_row(
                "SELECT conditions FROM detections WHERE event_ts = ?1",
                params![1_700_000_789i64],
                |row| row.get(0),
            )
            .unwrap();
        assert!(conditions.is_none());
    }

    #[test]
    fn in_memory_store_mirrors_idempotency() {
        let mut store = InMemoryDetectionStore::new();
        store.append(&sample_record(1)).unwrap();
        store.append(&sample_record(1)).unwrap();
        store.append(&sample_record(2)).unwrap();
        assert_eq!(store.records().len(), 2);
    }
}
