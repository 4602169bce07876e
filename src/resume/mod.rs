//! Checkpoint persistence
//!
//! The checkpoint is the single piece of durable scheduling state: the last
//! calendar date whose data has been retrieved and stored. It is written with
//! an atomic rename under an advisory file lock.

pub mod checkpoint;

pub use checkpoint::{parse_checkpoint, Advance, CheckpointError, CheckpointStore};
