/// Mean earth radius (IUGG) used for great-circle distances
pub const EARTH_RADIUS_KM: f64 = 6371.0088;

/// Coordinate bounds
pub const MIN_LATITUDE: f64 = -90.0;
pub const MAX_LATITUDE: f64 = 90.0;
pub const MIN_LONGITUDE: f64 = -180.0;
pub const MAX_LONGITUDE: f64 = 180.0;

/// Distances are compared in integral micro-kilometres (6 decimal places of km)
pub const DISTANCE_TIE_SCALE: f64 = 1_000_000.0;

/// Decimal places kept for coordinates inside composite natural keys (~1 m)
pub const NATURAL_KEY_COORD_PRECISION: usize = 5;

/// Unit of every station reading
pub const READING_UNIT: &str = "mg/L";

/// USGS "no data" sentinel
pub const USGS_NO_DATA_SENTINEL: f64 = -999999.0;

/// Processing defaults
pub const DEFAULT_TIME_BUDGET_SECS: u64 = 900;
pub const DEFAULT_LOAD_BATCH_SIZE: usize = 500;
pub const DEFAULT_BATCH_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;
pub const DEFAULT_BASE_DELAY_MS: u64 = 200;
pub const DEFAULT_MAX_DELAY_MS: u64 = 5_000;
pub const DEFAULT_ROW_GROUP_SIZE: usize = 10_000;
pub const DEFAULT_SQLITE_PATH: &str = "watershed.db";
pub const DEFAULT_CONFIG_FILE: &str = "watershed.toml";
pub const ENV_PREFIX: &str = "WATERSHED";
