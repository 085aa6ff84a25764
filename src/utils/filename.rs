use chrono::{DateTime, Utc};

/// Run identifier with format: {YYYYMMDD}T{HHMMSS}Z
pub fn generate_run_id(now: DateTime<Utc>) -> String {
    now.format("%Y%m%dT%H%M%SZ").to_string()
}

/// Blob key for a raw source snapshot: raw/{run_id}/{name}.json
pub fn raw_snapshot_key(run_id: &str, name: &str) -> String {
    format!("raw/{}/{}.json", run_id, name)
}

/// Blob key for the processed join snapshot
pub fn processed_snapshot_key(run_id: &str) -> String {
    format!("processed/{}/joined_observations.parquet", run_id)
}

/// Blob key for the serialized run summary
pub fn summary_key(run_id: &str) -> String {
    format!("runs/{}/summary.json", run_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_generate_run_id() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 5).unwrap();
        assert_eq!(generate_run_id(now), "20240501T123005Z");
    }

    #[test]
    fn test_snapshot_keys() {
        assert_eq!(
            raw_snapshot_key("20240501T123005Z", "observations"),
            "raw/20240501T123005Z/observations.json"
        );
        assert_eq!(
            processed_snapshot_key("20240501T123005Z"),
            "processed/20240501T123005Z/joined_observations.parquet"
        );
        assert_eq!(
            summary_key("20240501T123005Z"),
            "runs/20240501T123005Z/summary.json"
        );
    }
}
