use crate::models::JoinedRecord;
use crate::writers::store::{JoinedStore, StoreError, UpsertOutcome};
use postgres::error::SqlState;
use postgres::{Client, NoTls, Row};
use tracing::{debug, info, warn};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS joined_observations (
    id BIGSERIAL PRIMARY KEY,
    observation_key TEXT NOT NULL UNIQUE,
    gbif_id TEXT,
    species TEXT NOT NULL,
    latitude DOUBLE PRECISION NOT NULL,
    longitude DOUBLE PRECISION NOT NULL,
    year INTEGER,
    month INTEGER,
    day INTEGER,
    state_province TEXT,
    country TEXT,
    station_id TEXT NOT NULL,
    station_name TEXT NOT NULL,
    station_lat DOUBLE PRECISION NOT NULL,
    station_lon DOUBLE PRECISION NOT NULL,
    distance_km DOUBLE PRECISION NOT NULL,
    avg_value_mg_l DOUBLE PRECISION NOT NULL,
    reading_count INTEGER NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS idx_joined_observations_station
    ON joined_observations (station_id);
";

// xmax is zero only on a freshly inserted row version
const UPSERT: &str = "
INSERT INTO joined_observations (
    observation_key, gbif_id, species, latitude, longitude, year, month, day,
    state_province, country, station_id, station_name, station_lat, station_lon,
    distance_km, avg_value_mg_l, reading_count
) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
ON CONFLICT (observation_key) DO UPDATE SET
    gbif_id = EXCLUDED.gbif_id,
    species = EXCLUDED.species,
    latitude = EXCLUDED.latitude,
    longitude = EXCLUDED.longitude,
    year = EXCLUDED.year,
    month = EXCLUDED.month,
    day = EXCLUDED.day,
    state_province = EXCLUDED.state_province,
    country = EXCLUDED.country,
    station_id = EXCLUDED.station_id,
    station_name = EXCLUDED.station_name,
    station_lat = EXCLUDED.station_lat,
    station_lon = EXCLUDED.station_lon,
    distance_km = EXCLUDED.distance_km,
    avg_value_mg_l = EXCLUDED.avg_value_mg_l,
    reading_count = EXCLUDED.reading_count,
    updated_at = NOW()
RETURNING (xmax = 0) AS inserted
";

/// PostgreSQL-backed `joined_observations` table. Connects lazily and
/// reconnects after the connection is lost.
pub struct PostgresStore {
    url: String,
    client: Option<Client>,
}

impl PostgresStore {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: None,
        }
    }

    fn client(&mut self) -> Result<&mut Client, StoreError> {
        if self.client.as_ref().map_or(true, Client::is_closed) {
            let client = Client::connect(&self.url, NoTls)
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            info!("connected to PostgreSQL");
            self.client = Some(client);
        }
        self.client
            .as_mut()
            .ok_or_else(|| StoreError::Unavailable("no PostgreSQL connection".to_string()))
    }

    fn classify(&mut self, err: postgres::Error) -> StoreError {
        let message = err.to_string();
        match err.code() {
            Some(code) if *code == SqlState::T_R_SERIALIZATION_FAILURE
                || *code == SqlState::T_R_DEADLOCK_DETECTED
                || *code == SqlState::LOCK_NOT_AVAILABLE =>
            {
                StoreError::Transient(message)
            }
            Some(code) if *code == SqlState::UNIQUE_VIOLATION
                || *code == SqlState::FOREIGN_KEY_VIOLATION
                || *code == SqlState::CHECK_VIOLATION =>
            {
                StoreError::Conflict(message)
            }
            Some(code) if *code == SqlState::ADMIN_SHUTDOWN
                || *code == SqlState::CANNOT_CONNECT_NOW
                || *code == SqlState::TOO_MANY_CONNECTIONS =>
            {
                self.client = None;
                StoreError::Unavailable(message)
            }
            Some(_) => StoreError::Rejected(message),
            None if err.is_closed() || is_io_error(&err) => {
                warn!("lost PostgreSQL connection: {}", message);
                self.client = None;
                StoreError::Unavailable(message)
            }
            None => StoreError::Rejected(message),
        }
    }
}

fn is_io_error(err: &postgres::Error) -> bool {
    std::error::Error::source(err).map_or(false, |source| source.is::<std::io::Error>())
}

impl JoinedStore for PostgresStore {
    fn ensure_schema(&mut self) -> Result<(), StoreError> {
        let result = self.client()?.batch_execute(SCHEMA);
        result.map_err(|e| self.classify(e))
    }

    fn upsert(&mut self, record: &JoinedRecord) -> Result<UpsertOutcome, StoreError> {
        let result = upsert_in_transaction(self.client()?, record);
        let inserted = result.map_err(|e| self.classify(e))?;

        debug!(key = %record.observation_key, inserted, "upserted joined record");
        Ok(if inserted {
            UpsertOutcome::Inserted
        } else {
            UpsertOutcome::Updated
        })
    }

    fn count(&mut self) -> Result<u64, StoreError> {
        let result = self
            .client()?
            .query_one("SELECT COUNT(*) FROM joined_observations", &[]);
        let row = result.map_err(|e| self.classify(e))?;
        let count: i64 = row.get(0);
        Ok(count.max(0) as u64)
    }

    fn sample(&mut self, limit: usize) -> Result<Vec<JoinedRecord>, StoreError> {
        let limit = limit as i64;
        let result = self.client()?.query(
            "SELECT observation_key, gbif_id, species, latitude, longitude, year, month, day,
                    state_province, country, station_id, station_name, station_lat, station_lon,
                    distance_km, avg_value_mg_l, reading_count
             FROM joined_observations ORDER BY observation_key LIMIT $1",
            &[&limit],
        );
        let rows = result.map_err(|e| self.classify(e))?;
        Ok(rows.iter().map(record_from_row).collect())
    }
}

fn upsert_in_transaction(client: &mut Client, record: &JoinedRecord) -> Result<bool, postgres::Error> {
    let month = record.month.map(|m| m as i32);
    let day = record.day.map(|d| d as i32);
    let reading_count = i32::try_from(record.reading_count).unwrap_or(i32::MAX);

    let mut tx = client.transaction()?;
    let row = tx.query_one(
        UPSERT,
        &[
            &record.observation_key,
            &record.gbif_id,
            &record.species,
            &record.latitude,
            &record.longitude,
            &record.year,
            &month,
            &day,
            &record.state_province,
            &record.country,
            &record.station_id,
            &record.station_name,
            &record.station_latitude,
            &record.station_longitude,
            &record.distance_km,
            &record.avg_value_mg_l,
            &reading_count,
        ],
    )?;
    tx.commit()?;
    Ok(row.get("inserted"))
}

fn record_from_row(row: &Row) -> JoinedRecord {
    let month: Option<i32> = row.get(6);
    let day: Option<i32> = row.get(7);
    let reading_count: i32 = row.get(16);

    JoinedRecord {
        observation_key: row.get(0),
        gbif_id: row.get(1),
        species: row.get(2),
        latitude: row.get(3),
        longitude: row.get(4),
        year: row.get(5),
        month: month.and_then(|m| u32::try_from(m).ok()),
        day: day.and_then(|d| u32::try_from(d).ok()),
        state_province: row.get(8),
        country: row.get(9),
        station_id: row.get(10),
        station_name: row.get(11),
        station_latitude: row.get(12),
        station_longitude: row.get(13),
        distance_km: row.get(14),
        avg_value_mg_l: row.get(15),
        reading_count: u32::try_from(reading_count).unwrap_or(0),
    }
}
