pub mod joined;
pub mod observation;
pub mod raw;
pub mod station;

pub use joined::{JoinedRecord, JoinedRecordBuilder};
pub use observation::{Observation, ObservationDate};
pub use raw::{GbifOccurrence, RawBatch, UsgsReadingRow};
pub use station::{Reading, Station, StationSummary};
