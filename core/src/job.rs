//! Local job runner.
//!
//! Splits the input across map workers that run in parallel on the rayon
//! pool, each with its own [`IntermediateStore`]. The worker stores are then
//! folded into one on the calling thread, and every partition is shuffled
//! and reduced in order.

use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, info};

use crate::shuffle::combiner::{CombineStats, Combiner};
use crate::shuffle::partitioner::Partitioner;
use crate::shuffle::results::{FileResultSink, ResultSink};
use crate::shuffle::store::IntermediateStore;
use crate::task::{MapRuntime, MapTask, ReduceRuntime, ReduceTask};
use spillmr_common::{CommonError, JobConfig, Result, TempFileProvider};

/// Builds a fresh combiner for each map worker.
pub type CombinerFactory<K, V> = Arc<dyn Fn() -> Box<dyn Combiner<K, V>> + Send + Sync>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobStats {
    pub input_records: u64,
    pub intermediate_records: u64,
    pub combine: CombineStats,
    pub merge_passes: u32,
    pub reduce_keys: u64,
    pub output_records: u64,
    /// Files written by [`LocalJob::run_to_files`], one per partition.
    pub output_files: Vec<PathBuf>,
}

pub struct LocalJob<M: MapTask, R, P> {
    config: JobConfig,
    mapper: M,
    reducer: R,
    partitioner: P,
    temp_files: Arc<dyn TempFileProvider>,
    combiner: Option<CombinerFactory<M::Key, M::Value>>,
}

impl<M: MapTask, R, P: Debug> Debug for LocalJob<M, R, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalJob")
            .field("config", &self.config)
            .field("partitioner", &self.partitioner)
            .field("temp_files", &self.temp_files)
            .field("combiner", &self.combiner.as_ref().map(|_| "<combiner>"))
            .finish()
    }
}

impl<M, R, P> LocalJob<M, R, P>
where
    M: MapTask,
    R: ReduceTask<M::Key, M::Value>,
    P: Partitioner<M::Key> + Clone,
{
    pub fn new(
        config: JobConfig,
        mapper: M,
        reducer: R,
        partitioner: P,
        temp_files: Arc<dyn TempFileProvider>,
    ) -> Result<Self> {
        config.validate()?;
        if partitioner.num_partitions() != config.num_partitions {
            return Err(CommonError::configuration_error(format!(
                "Partitioner has {} partitions but the job is configured for {}",
                partitioner.num_partitions(),
                config.num_partitions
            )));
        }
        Ok(Self {
            config,
            mapper,
            reducer,
            partitioner,
            temp_files,
            combiner: None,
        })
    }

    /// Combines each worker's store before the stores are merged. Only used
    /// when the job config enables combining.
    pub fn with_combiner<C>(mut self, combiner: C) -> Self
    where
        C: Combiner<M::Key, M::Value> + Clone + Send + Sync + 'static,
    {
        self.combiner = Some(Arc::new(
            move || -> Box<dyn Combiner<M::Key, M::Value>> { Box::new(combiner.clone()) },
        ));
        self
    }

    /// Runs the job, sending every reduce output record to `sink`.
    pub fn run(
        &self,
        input: Vec<(M::InputKey, M::InputValue)>,
        sink: &mut dyn ResultSink<R::OutputKey, R::OutputValue>,
    ) -> Result<JobStats> {
        let (mut store, mut stats) = self.map_phase(input)?;
        for partition in 0..self.config.num_partitions {
            self.reduce_partition(&mut store, partition, sink, &mut stats)?;
        }
        info!(
            "Job finished: {} keys reduced, {} records written",
            stats.reduce_keys, stats.output_records
        );
        Ok(stats)
    }

    /// Runs the job, writing partition `p` to `<output_base><p+1>_of_<n>`.
    pub fn run_to_files(&self, input: Vec<(M::InputKey, M::InputValue)>) -> Result<JobStats>
    where
        R::OutputKey: serde::Serialize,
        R::OutputValue: serde::Serialize,
    {
        let output_base = self.config.output_base.clone().ok_or_else(|| {
            CommonError::configuration_error("output_base is required to write output files")
        })?;

        let (mut store, mut stats) = self.map_phase(input)?;
        let num_partitions = self.config.num_partitions;
        for partition in 0..num_partitions {
            let mut sink = FileResultSink::create(
                &output_base,
                partition,
                num_partitions,
                self.config.store.io_buffer_size,
            )?;
            self.reduce_partition(&mut store, partition, &mut sink, &mut stats)?;
            stats.output_files.push(sink.path().to_path_buf());
            sink.finish()?;
        }
        info!(
            "Job finished: {} records in {} output files",
            stats.output_records,
            stats.output_files.len()
        );
        Ok(stats)
    }

    fn map_phase(
        &self,
        input: Vec<(M::InputKey, M::InputValue)>,
    ) -> Result<(IntermediateStore<M::Key, M::Value, P>, JobStats)> {
        let workers = self.config.num_map_workers;
        let mut stats = JobStats {
            input_records: input.len() as u64,
            ..Default::default()
        };
        info!(
            "Map phase: {} records across {} workers",
            stats.input_records, workers
        );

        let splits = split_input(input, workers);
        let outputs: Vec<(IntermediateStore<M::Key, M::Value, P>, u64, CombineStats)> = splits
            .into_par_iter()
            .enumerate()
            .map(|(worker, split)| self.run_map_worker(worker, split))
            .collect::<Result<_>>()?;

        let mut stores = Vec::with_capacity(outputs.len());
        for (store, emitted, combined) in outputs {
            stats.intermediate_records += emitted;
            stats.combine.records_read += combined.records_read;
            stats.combine.records_written += combined.records_written;
            stores.push(store);
        }

        let mut stores = stores.into_iter();
        let mut merged = match stores.next() {
            Some(store) => store,
            None => self.new_store()?,
        };
        for mut other in stores {
            merged.merge_from(&mut other)?;
        }
        info!(
            "Map phase done: {} intermediate records in {} partitions",
            stats.intermediate_records,
            merged.partitions().len()
        );
        Ok((merged, stats))
    }

    fn run_map_worker(
        &self,
        worker: usize,
        split: Vec<(M::InputKey, M::InputValue)>,
    ) -> Result<(IntermediateStore<M::Key, M::Value, P>, u64, CombineStats)> {
        let mut store = self.new_store()?;
        let emitted = {
            let mut runtime = MapRuntime::new(&mut store);
            for (key, value) in split {
                self.mapper.process(&mut runtime, key, value)?;
            }
            runtime.emitted()
        };

        let mut combined = CombineStats::default();
        if self.config.combine {
            if let Some(factory) = &self.combiner {
                let mut combiner = factory();
                combined = store.combine(&mut *combiner)?;
            }
        }
        store.close_files()?;
        debug!("Map worker {} emitted {} records", worker, emitted);
        Ok((store, emitted, combined))
    }

    fn reduce_partition(
        &self,
        store: &mut IntermediateStore<M::Key, M::Value, P>,
        partition: u32,
        sink: &mut dyn ResultSink<R::OutputKey, R::OutputValue>,
        stats: &mut JobStats,
    ) -> Result<()> {
        let merged = store.run_intermediate_results_shuffle(partition)?;
        stats.merge_passes += merged.passes;

        let mut runtime = ReduceRuntime::new(sink);
        let reduced = store.reduce(partition, |key, values| {
            self.reducer.process(&mut runtime, key, values)
        })?;
        stats.reduce_keys += reduced.keys;
        stats.output_records += runtime.emitted();
        debug!(
            "Partition {}: {} keys, {} values",
            partition, reduced.keys, reduced.records
        );
        Ok(())
    }

    fn new_store(&self) -> Result<IntermediateStore<M::Key, M::Value, P>> {
        IntermediateStore::new(
            self.partitioner.clone(),
            self.config.store.clone(),
            self.temp_files.clone(),
        )
    }
}

/// Deals records round-robin into `workers` splits.
fn split_input<T>(input: Vec<T>, workers: usize) -> Vec<Vec<T>> {
    let workers = workers.max(1);
    let mut splits: Vec<Vec<T>> = (0..workers)
        .map(|_| Vec::with_capacity(input.len() / workers + 1))
        .collect();
    for (index, record) in input.into_iter().enumerate() {
        splits[index % workers].push(record);
    }
    splits
}
