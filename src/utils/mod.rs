pub mod constants;
pub mod coordinates;
pub mod filename;
pub mod progress;

pub use constants::*;
pub use coordinates::{
    dms_to_decimal, haversine_distance, meridional_distance, parse_coordinate,
    validate_coordinates,
};
pub use filename::{generate_run_id, processed_snapshot_key, raw_snapshot_key, summary_key};
pub use progress::ProgressReporter;
