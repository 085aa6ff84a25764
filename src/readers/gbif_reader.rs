use crate::error::{PipelineError, Result};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Reads already-fetched GBIF occurrence payloads into field-named raw records.
pub struct GbifReader;

impl GbifReader {
    pub fn new() -> Self {
        Self
    }

    /// Read occurrences from a file, choosing the format by extension:
    /// `.csv`/`.tsv`/`.txt` simple downloads, `.jsonl`/`.ndjson` lines, else JSON.
    pub fn read_path(&self, path: &Path) -> Result<Vec<Value>> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();

        let records = match extension.as_str() {
            "csv" => self.read_delimited(path, b',')?,
            "tsv" | "txt" => self.read_delimited(path, b'\t')?,
            "jsonl" | "ndjson" => self.parse_json_lines(&fs::read_to_string(path)?)?,
            _ => self.parse_json(&fs::read_to_string(path)?)?,
        };

        debug!(path = %path.display(), records = records.len(), "read GBIF occurrences");
        Ok(records)
    }

    /// Parse a search response (`{"results": [...]}`), an array of
    /// occurrences, or an array of search response pages.
    pub fn parse_json(&self, text: &str) -> Result<Vec<Value>> {
        let document: Value = serde_json::from_str(text)?;
        let mut records = Vec::new();
        Self::collect_document(document, &mut records)?;
        Ok(records)
    }

    pub fn parse_json_lines(&self, text: &str) -> Result<Vec<Value>> {
        let mut records = Vec::new();
        for (line_number, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(line) {
                Ok(document) => Self::collect_document(document, &mut records)?,
                Err(e) => {
                    // Keep the unparseable line as a row so it is counted as rejected downstream
                    warn!(line = line_number + 1, error = %e, "unparseable GBIF JSON line");
                    records.push(Value::Null);
                }
            }
        }
        Ok(records)
    }

    fn collect_document(document: Value, records: &mut Vec<Value>) -> Result<()> {
        match document {
            Value::Object(mut map) if map.contains_key("results") => match map.remove("results") {
                Some(Value::Array(results)) => {
                    records.extend(results);
                    Ok(())
                }
                _ => Err(PipelineError::InputShape {
                    dataset: "gbif".to_string(),
                    field: "results".to_string(),
                }),
            },
            Value::Array(items) => {
                for item in items {
                    if item.get("results").is_some() {
                        Self::collect_document(item, records)?;
                    } else {
                        records.push(item);
                    }
                }
                Ok(())
            }
            Value::Object(map) => {
                records.push(Value::Object(map));
                Ok(())
            }
            _ => Err(PipelineError::InvalidFormat(
                "GBIF payload must be a JSON object or array".to_string(),
            )),
        }
    }

    /// GBIF simple downloads: header row of field names, one occurrence per row
    fn read_delimited(&self, path: &Path, delimiter: u8) -> Result<Vec<Value>> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .quoting(delimiter != b'\t')
            .from_path(path)?;

        let headers = reader.headers()?.clone();
        let mut records = Vec::new();

        for (row_number, row) in reader.records().enumerate() {
            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    warn!(row = row_number + 1, error = %e, "skipping unreadable GBIF row");
                    records.push(Value::Null);
                    continue;
                }
            };

            let mut map = Map::new();
            for (header, field) in headers.iter().zip(row.iter()) {
                if !field.is_empty() {
                    map.insert(header.to_string(), Value::String(field.to_string()));
                }
            }
            records.push(Value::Object(map));
        }

        Ok(records)
    }
}

impl Default for GbifReader {
    fn default() -> Self {
        Self::new()
    }
}
