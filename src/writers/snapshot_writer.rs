use crate::error::{PipelineError, Result};
use crate::models::JoinedRecord;
use crate::utils::constants::DEFAULT_ROW_GROUP_SIZE;
use arrow::array::*;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, GzipLevel};
use parquet::file::properties::WriterProperties;
use std::path::Path;
use std::sync::Arc;

/// Encodes joined records as a Parquet snapshot for the audit trail.
pub struct SnapshotWriter {
    compression: Compression,
    row_group_size: usize,
}

impl SnapshotWriter {
    pub fn new() -> Self {
        Self {
            compression: Compression::SNAPPY,
            row_group_size: DEFAULT_ROW_GROUP_SIZE,
        }
    }

    pub fn with_compression(mut self, compression: &str) -> Result<Self> {
        self.compression = match compression.to_lowercase().as_str() {
            "snappy" => Compression::SNAPPY,
            "gzip" => Compression::GZIP(GzipLevel::default()),
            "lz4" => Compression::LZ4,
            "zstd" => Compression::ZSTD(parquet::basic::ZstdLevel::default()),
            "none" => Compression::UNCOMPRESSED,
            _ => {
                return Err(PipelineError::Config(format!(
                    "Unsupported compression: {}",
                    compression
                )))
            }
        };
        Ok(self)
    }

    pub fn with_row_group_size(mut self, size: usize) -> Self {
        self.row_group_size = size.max(1);
        self
    }

    /// Encode records into an in-memory Parquet file. An empty slice still
    /// yields a valid file carrying the schema.
    pub fn to_bytes(&self, records: &[JoinedRecord]) -> Result<Vec<u8>> {
        let schema = self.create_schema();
        let props = WriterProperties::builder()
            .set_compression(self.compression)
            .set_max_row_group_size(self.row_group_size)
            .build();

        let mut buffer = Vec::new();
        let mut writer = ArrowWriter::try_new(&mut buffer, schema.clone(), Some(props))?;

        for chunk in records.chunks(self.row_group_size) {
            let batch = self.records_to_batch(chunk, schema.clone())?;
            writer.write(&batch)?;
        }

        writer.close()?;
        Ok(buffer)
    }

    /// Row and row-group counts of a snapshot on disk
    pub fn snapshot_info(&self, path: &Path) -> Result<SnapshotInfo> {
        use parquet::file::reader::{FileReader, SerializedFileReader};
        use std::fs::File;

        let file = File::open(path)?;
        let reader = SerializedFileReader::new(file)?;
        let metadata = reader.metadata();

        Ok(SnapshotInfo {
            total_rows: metadata.file_metadata().num_rows(),
            row_groups: metadata.num_row_groups(),
            file_size: std::fs::metadata(path)?.len(),
        })
    }

    fn create_schema(&self) -> Arc<Schema> {
        let fields = vec![
            Field::new("observation_key", DataType::Utf8, false),
            Field::new("gbif_id", DataType::Utf8, true),
            Field::new("species", DataType::Utf8, false),
            Field::new("latitude", DataType::Float64, false),
            Field::new("longitude", DataType::Float64, false),
            Field::new("year", DataType::Int32, true),
            Field::new("month", DataType::UInt32, true),
            Field::new("day", DataType::UInt32, true),
            Field::new("state_province", DataType::Utf8, true),
            Field::new("country", DataType::Utf8, true),
            Field::new("station_id", DataType::Utf8, false),
            Field::new("station_name", DataType::Utf8, false),
            Field::new("station_lat", DataType::Float64, false),
            Field::new("station_lon", DataType::Float64, false),
            Field::new("distance_km", DataType::Float64, false),
            Field::new("avg_value_mg_l", DataType::Float64, false),
            Field::new("reading_count", DataType::UInt32, false),
        ];

        Arc::new(Schema::new(fields))
    }

    fn records_to_batch(
        &self,
        records: &[JoinedRecord],
        schema: Arc<Schema>,
    ) -> Result<RecordBatch> {
        let keys: Vec<String> = records.iter().map(|r| r.observation_key.clone()).collect();
        let gbif_ids: Vec<Option<String>> = records.iter().map(|r| r.gbif_id.clone()).collect();
        let species: Vec<String> = records.iter().map(|r| r.species.clone()).collect();
        let latitudes: Vec<f64> = records.iter().map(|r| r.latitude).collect();
        let longitudes: Vec<f64> = records.iter().map(|r| r.longitude).collect();
        let years: Vec<Option<i32>> = records.iter().map(|r| r.year).collect();
        let months: Vec<Option<u32>> = records.iter().map(|r| r.month).collect();
        let days: Vec<Option<u32>> = records.iter().map(|r| r.day).collect();
        let regions: Vec<Option<String>> = records.iter().map(|r| r.state_province.clone()).collect();
        let countries: Vec<Option<String>> = records.iter().map(|r| r.country.clone()).collect();
        let station_ids: Vec<String> = records.iter().map(|r| r.station_id.clone()).collect();
        let station_names: Vec<String> = records.iter().map(|r| r.station_name.clone()).collect();
        let station_lats: Vec<f64> = records.iter().map(|r| r.station_latitude).collect();
        let station_lons: Vec<f64> = records.iter().map(|r| r.station_longitude).collect();
        let distances: Vec<f64> = records.iter().map(|r| r.distance_km).collect();
        let averages: Vec<f64> = records.iter().map(|r| r.avg_value_mg_l).collect();
        let counts: Vec<u32> = records.iter().map(|r| r.reading_count).collect();

        let columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from(keys)),
            Arc::new(StringArray::from(gbif_ids)),
            Arc::new(StringArray::from(species)),
            Arc::new(Float64Array::from(latitudes)),
            Arc::new(Float64Array::from(longitudes)),
            Arc::new(Int32Array::from(years)),
            Arc::new(UInt32Array::from(months)),
            Arc::new(UInt32Array::from(days)),
            Arc::new(StringArray::from(regions)),
            Arc::new(StringArray::from(countries)),
            Arc::new(StringArray::from(station_ids)),
            Arc::new(StringArray::from(station_names)),
            Arc::new(Float64Array::from(station_lats)),
            Arc::new(Float64Array::from(station_lons)),
            Arc::new(Float64Array::from(distances)),
            Arc::new(Float64Array::from(averages)),
            Arc::new(UInt32Array::from(counts)),
        ];

        Ok(RecordBatch::try_new(schema, columns)?)
    }
}

impl Default for SnapshotWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotInfo {
    pub total_rows: i64,
    pub row_groups: usize,
    pub file_size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn record(key: &str) -> JoinedRecord {
        JoinedRecord {
            observation_key: key.to_string(),
            gbif_id: None,
            species: "Castor canadensis".to_string(),
            latitude: 38.5,
            longitude: -121.5,
            year: Some(2022),
            month: None,
            day: None,
            state_province: Some("California".to_string()),
            country: None,
            station_id: "11447650".to_string(),
            station_name: "FREEPORT".to_string(),
            station_latitude: 38.456,
            station_longitude: -121.5,
            distance_km: 4.9,
            avg_value_mg_l: 8.25,
            reading_count: 4,
        }
    }

    #[test]
    fn test_write_empty_snapshot() -> Result<()> {
        let bytes = SnapshotWriter::new().to_bytes(&[])?;
        assert!(bytes.starts_with(b"PAR1"));
        Ok(())
    }

    #[test]
    fn test_snapshot_row_groups() -> Result<()> {
        let writer = SnapshotWriter::new().with_row_group_size(2);
        let records: Vec<JoinedRecord> = (0..5).map(|i| record(&format!("id:{}", i))).collect();
        let bytes = writer.to_bytes(&records)?;

        let temp_file = NamedTempFile::new()?;
        std::fs::write(temp_file.path(), &bytes)?;

        let info = writer.snapshot_info(temp_file.path())?;
        assert_eq!(info.total_rows, 5);
        assert_eq!(info.row_groups, 3);
        assert_eq!(info.file_size, bytes.len() as u64);
        Ok(())
    }

    #[test]
    fn test_different_compressions() -> Result<()> {
        for compression in ["snappy", "gzip", "lz4", "zstd", "none"] {
            let writer = SnapshotWriter::new().with_compression(compression)?;
            let result = writer.to_bytes(&[record("id:1")]);
            assert!(result.is_ok(), "Failed with compression: {}", compression);
        }
        assert!(SnapshotWriter::new().with_compression("brotli-ish").is_err());
        Ok(())
    }
}
