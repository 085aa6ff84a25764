use crate::models::JoinedRecord;
use crate::writers::store::{JoinedStore, StoreError, UpsertOutcome};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS joined_observations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    observation_key TEXT NOT NULL UNIQUE,
    gbif_id TEXT,
    species TEXT NOT NULL,
    latitude REAL NOT NULL,
    longitude REAL NOT NULL,
    year INTEGER,
    month INTEGER,
    day INTEGER,
    state_province TEXT,
    country TEXT,
    station_id TEXT NOT NULL,
    station_name TEXT NOT NULL,
    station_lat REAL NOT NULL,
    station_lon REAL NOT NULL,
    distance_km REAL NOT NULL,
    avg_value_mg_l REAL NOT NULL,
    reading_count INTEGER NOT NULL,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_joined_observations_station
    ON joined_observations (station_id);
";

const UPSERT: &str = "
INSERT INTO joined_observations (
    observation_key, gbif_id, species, latitude, longitude, year, month, day,
    state_province, country, station_id, station_name, station_lat, station_lon,
    distance_km, avg_value_mg_l, reading_count
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
ON CONFLICT(observation_key) DO UPDATE SET
    gbif_id = excluded.gbif_id,
    species = excluded.species,
    latitude = excluded.latitude,
    longitude = excluded.longitude,
    year = excluded.year,
    month = excluded.month,
    day = excluded.day,
    state_province = excluded.state_province,
    country = excluded.country,
    station_id = excluded.station_id,
    station_name = excluded.station_name,
    station_lat = excluded.station_lat,
    station_lon = excluded.station_lon,
    distance_km = excluded.distance_km,
    avg_value_mg_l = excluded.avg_value_mg_l,
    reading_count = excluded.reading_count,
    updated_at = CURRENT_TIMESTAMP
";

const SELECT_COLUMNS: &str = "
SELECT observation_key, gbif_id, species, latitude, longitude, year, month, day,
       state_province, country, station_id, station_name, station_lat, station_lon,
       distance_km, avg_value_mg_l, reading_count
FROM joined_observations
";

/// SQLite-backed `joined_observations` table.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        }
        let conn = Connection::open(path).map_err(classify)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(classify)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(Duration::from_secs(5)).map_err(classify)?;
        Ok(Self { conn })
    }
}

impl JoinedStore for SqliteStore {
    fn ensure_schema(&mut self) -> Result<(), StoreError> {
        self.conn.execute_batch(SCHEMA).map_err(classify)
    }

    fn upsert(&mut self, record: &JoinedRecord) -> Result<UpsertOutcome, StoreError> {
        let tx = self.conn.transaction().map_err(classify)?;

        let existed = tx
            .query_row(
                "SELECT 1 FROM joined_observations WHERE observation_key = ?1",
                params![record.observation_key],
                |_| Ok(()),
            )
            .optional()
            .map_err(classify)?
            .is_some();

        tx.execute(
            UPSERT,
            params![
                record.observation_key,
                record.gbif_id,
                record.species,
                record.latitude,
                record.longitude,
                record.year,
                record.month,
                record.day,
                record.state_province,
                record.country,
                record.station_id,
                record.station_name,
                record.station_latitude,
                record.station_longitude,
                record.distance_km,
                record.avg_value_mg_l,
                record.reading_count,
            ],
        )
        .map_err(classify)?;

        tx.commit().map_err(classify)?;

        debug!(key = %record.observation_key, existed, "upserted joined record");
        Ok(if existed {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Inserted
        })
    }

    fn count(&mut self) -> Result<u64, StoreError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM joined_observations", [], |row| row.get(0))
            .map_err(classify)?;
        Ok(count.max(0) as u64)
    }

    fn sample(&mut self, limit: usize) -> Result<Vec<JoinedRecord>, StoreError> {
        let sql = format!("{} ORDER BY observation_key LIMIT ?1", SELECT_COLUMNS);
        let mut stmt = self.conn.prepare(&sql).map_err(classify)?;
        let rows = stmt
            .query_map(params![limit as i64], record_from_row)
            .map_err(classify)?;

        rows.collect::<Result<Vec<_>, _>>().map_err(classify)
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<JoinedRecord> {
    Ok(JoinedRecord {
        observation_key: row.get(0)?,
        gbif_id: row.get(1)?,
        species: row.get(2)?,
        latitude: row.get(3)?,
        longitude: row.get(4)?,
        year: row.get(5)?,
        month: row.get(6)?,
        day: row.get(7)?,
        state_province: row.get(8)?,
        country: row.get(9)?,
        station_id: row.get(10)?,
        station_name: row.get(11)?,
        station_latitude: row.get(12)?,
        station_longitude: row.get(13)?,
        distance_km: row.get(14)?,
        avg_value_mg_l: row.get(15)?,
        reading_count: row.get(16)?,
    })
}

/// Map SQLite result codes onto the loader's retry classes
fn classify(err: rusqlite::Error) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                StoreError::Transient(err.to_string())
            }
            ErrorCode::ConstraintViolation => StoreError::Conflict(err.to_string()),
            ErrorCode::CannotOpen
            | ErrorCode::SystemIoFailure
            | ErrorCode::NotADatabase
            | ErrorCode::PermissionDenied
            | ErrorCode::DiskFull => StoreError::Unavailable(err.to_string()),
            _ => StoreError::Rejected(err.to_string()),
        },
        _ => StoreError::Rejected(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(key: &str, avg: f64) -> JoinedRecord {
        JoinedRecord {
            observation_key: key.to_string(),
            gbif_id: Some("42".to_string()),
            species: "Castor canadensis".to_string(),
            latitude: 38.5,
            longitude: -121.5,
            year: Some(2022),
            month: Some(7),
            day: None,
            state_province: Some("California".to_string()),
            country: None,
            station_id: "11447650".to_string(),
            station_name: "FREEPORT".to_string(),
            station_latitude: 38.456,
            station_longitude: -121.5,
            distance_km: 4.9,
            avg_value_mg_l: avg,
            reading_count: 4,
        }
    }

    fn store() -> SqliteStore {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.ensure_schema().unwrap();
        store
    }

    #[test]
    fn test_insert_then_update() {
        let mut store = store();
        assert_eq!(store.upsert(&record("id:42", 8.0)).unwrap(), UpsertOutcome::Inserted);
        assert_eq!(store.upsert(&record("id:42", 9.5)).unwrap(), UpsertOutcome::Updated);
        assert_eq!(store.count().unwrap(), 1);

        let rows = store.sample(10).unwrap();
        assert_eq!(rows, vec![record("id:42", 9.5)]);
    }

    #[test]
    fn test_ensure_schema_is_repeatable() {
        let mut store = store();
        store.ensure_schema().unwrap();
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_sample_is_ordered_and_limited() {
        let mut store = store();
        for key in ["id:3", "id:1", "id:2"] {
            store.upsert(&record(key, 8.0)).unwrap();
        }
        let keys: Vec<String> = store
            .sample(2)
            .unwrap()
            .into_iter()
            .map(|r| r.observation_key)
            .collect();
        assert_eq!(keys, vec!["id:1", "id:2"]);
    }

    #[test]
    fn test_file_backed_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("watershed.db");
        {
            let mut store = SqliteStore::open(&path).unwrap();
            store.ensure_schema().unwrap();
            store.upsert(&record("id:1", 8.0)).unwrap();
        }
        let mut reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(reopened.count().unwrap(), 1);
    }

    #[test]
    fn test_missing_table_is_rejected_not_retried() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let err = store.upsert(&record("id:1", 8.0)).unwrap_err();
        assert!(!err.is_retryable());
    }
}
