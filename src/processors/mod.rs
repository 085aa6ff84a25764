pub mod aggregator;
pub mod assembler;
pub mod matcher;
pub mod normalizer;
pub mod pipeline;
pub mod run_summary;

pub use aggregator::{AggregateStats, ReadingAggregator};
pub use assembler::JoinAssembler;
pub use matcher::{
    LatitudeSweepIndex, MatchOutcome, MatchStats, MatchStrategy, NearestPair,
    NearestStationMatcher,
};
pub use normalizer::{NormalizeStats, NormalizedBatch, Normalizer, Rejection};
pub use pipeline::{Pipeline, RunReport};
pub use run_summary::{FailureKind, FailureReport, PipelineStage, RunSummary};
