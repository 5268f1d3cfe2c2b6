//! spillmr core: a local, disk-backed intermediate results store for
//! map/shuffle/reduce jobs.
//!
//! Map workers push records into an [`IntermediateStore`], which spills them
//! to per-partition files. Stores are folded together with
//! [`IntermediateStore::merge_from`], each partition is collapsed into one
//! sorted file by an external k-way merge, and `reduce` streams every key
//! with all of its values exactly once.

pub mod job;
pub mod record;
pub mod shuffle;
pub mod task;

pub use job::{JobStats, LocalJob};
pub use record::{Datum, RecordReader, RecordWriter};
pub use shuffle::{
    CombineStats, Combiner, CustomPartitioner, FileMerger, FileResultSink, HashPartitioner,
    IntermediateStore, MergeStats, Partitioner, RangePartitioner, ReduceCombiner, ReduceStats,
    ResultIter, ResultSink, SumCombiner,
};
pub use task::{MapRuntime, MapTask, ReduceRuntime, ReduceTask};

pub use spillmr_common::{CommonError, JobConfig, Result, ScratchDir, StoreConfig, SystemTempFiles};
