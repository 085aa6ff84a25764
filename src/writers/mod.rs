pub mod blob_store;
pub mod loader;
#[cfg(feature = "postgres")]
pub mod postgres_store;
pub mod snapshot_writer;
pub mod sqlite_store;
pub mod store;

pub use blob_store::{BlobStore, FsBlobStore};
pub use loader::{LoadFailure, LoadInterrupted, LoadResult, Loader, RetryPolicy};
#[cfg(feature = "postgres")]
pub use postgres_store::PostgresStore;
pub use snapshot_writer::{SnapshotInfo, SnapshotWriter};
pub use sqlite_store::SqliteStore;
pub use store::{JoinedStore, StoreError, UpsertOutcome};
