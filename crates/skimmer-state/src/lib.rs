//! Checkpoint persistence for the skimmer extraction engine.
//!
//! Provides the [`CheckpointStore`] trait, a [`FileCheckpointStore`] that
//! keeps the checkpoint as a single RFC 3339 line in a plain-text file, and
//! a [`MemoryCheckpointStore`] for tests.

#![warn(clippy::pedantic)]

pub mod error;
pub mod store;

pub use error::{Result, StateError};
pub use store::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
