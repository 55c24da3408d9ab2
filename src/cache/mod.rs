//! Storage for rendered loops.
//!
//! Writes each completed job's loop to disk once and keeps an LRU index.

pub mod loops;

pub use loops::{LoopStore, StoredLoop};
