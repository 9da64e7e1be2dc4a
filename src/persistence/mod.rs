//! Persisted state owned by the core: posterior snapshots, checkpoints.

pub mod snapshot;

pub use snapshot::{BackfillCheckpoint, Checkpointable, SnapshotStore};
