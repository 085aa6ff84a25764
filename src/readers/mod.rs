pub mod gbif_reader;
pub mod source;
pub mod usgs_reader;

pub use gbif_reader::GbifReader;
pub use source::{FileSource, RawSource};
pub use usgs_reader::UsgsReader;
