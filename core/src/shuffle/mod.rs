//! Partitioning, spilling, merging and enumerating intermediate results.

pub mod combiner;
pub mod merger;
pub mod partitioner;
pub mod results;
pub mod spill;
pub mod store;

pub use combiner::*;
pub use merger::*;
pub use partitioner::*;
pub use results::*;
pub use spill::SpillFile;
pub use store::*;
