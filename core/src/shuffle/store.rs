//! The local-disk intermediate results store.
//!
//! One store belongs to one map worker. It routes every emitted record to a
//! partition, spills it through that partition's [`SpillFile`], and later
//! turns each partition into a single key-sorted file that `reduce` streams
//! exactly once. Every file the store creates is tracked in its partition's
//! bookkeeping and deleted when that bookkeeping goes away.
//!
//! Per partition: empty -> writing -> closed -> [combined] -> [shuffled] ->
//! reduced. `reduce` requires a single sorted file, which is what
//! [`IntermediateStore::run_intermediate_results_shuffle`] produces.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::record::{Datum, RecordReader};
use crate::shuffle::combiner::{CombineStats, Combiner, combine_file};
use crate::shuffle::merger::{FileMerger, MergeStats};
use crate::shuffle::partitioner::{HashPartitioner, Partitioner};
use crate::shuffle::results::{ResultIter, ResultSink};
use crate::shuffle::spill::SpillFile;
use spillmr_common::{
    Result, StoreConfig, TempFileProvider, move_file, remove_file_logged,
};

/// Per-partition bookkeeping.
struct IntermediateFileInfo<K, V> {
    /// Current primary file, `None` until the first write.
    filename: Option<PathBuf>,
    write_stream: SpillFile<K, V>,
    /// Sorted files adopted from other stores, pending a shuffle.
    fragment_filenames: Vec<PathBuf>,
}

impl<K: Datum, V: Datum> IntermediateFileInfo<K, V> {
    fn new(config: &StoreConfig) -> Self {
        Self {
            filename: None,
            write_stream: SpillFile::new(config.cache_limit, config.io_buffer_size),
            fragment_filenames: Vec::new(),
        }
    }
}

impl<K, V> Drop for IntermediateFileInfo<K, V> {
    fn drop(&mut self) {
        self.write_stream.release();
        if let Some(filename) = self.filename.take() {
            remove_file_logged(&filename);
        }
        for fragment in self.fragment_filenames.drain(..) {
            remove_file_logged(&fragment);
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReduceStats {
    pub keys: u64,
    pub records: u64,
}

pub struct IntermediateStore<K, V, P = HashPartitioner> {
    num_partitions: u32,
    partitioner: P,
    config: StoreConfig,
    temp_files: Arc<dyn TempFileProvider>,
    merger: FileMerger,
    intermediate_files: BTreeMap<u32, IntermediateFileInfo<K, V>>,
}

impl<K: Datum, V: Datum, P: Partitioner<K>> IntermediateStore<K, V, P> {
    pub fn new(
        partitioner: P,
        config: StoreConfig,
        temp_files: Arc<dyn TempFileProvider>,
    ) -> Result<Self> {
        config.validate()?;
        let num_partitions = partitioner.num_partitions();
        assert!(num_partitions > 0, "Number of partitions must be positive.");
        Ok(Self {
            num_partitions,
            partitioner,
            merger: FileMerger::new(&config, temp_files.clone()),
            config,
            temp_files,
            intermediate_files: BTreeMap::new(),
        })
    }

    pub fn num_partitions(&self) -> u32 {
        self.num_partitions
    }

    /// Partitions that currently hold data, ascending.
    pub fn partitions(&self) -> Vec<u32> {
        self.intermediate_files.keys().copied().collect()
    }

    /// Files backing a partition: the primary file plus pending fragments.
    pub fn file_count(&self, partition: u32) -> usize {
        self.intermediate_files.get(&partition).map_or(0, |info| {
            usize::from(info.filename.is_some()) + info.fragment_filenames.len()
        })
    }

    /// Map-phase insert: routes the record to its partition's spill file.
    pub fn insert(&mut self, key: K, value: V) -> Result<()> {
        let partition = self.partitioner.get_partition(&key);
        assert!(
            partition < self.num_partitions,
            "Partitioner returned {} for {} partitions",
            partition,
            self.num_partitions
        );

        let info = self
            .intermediate_files
            .entry(partition)
            .or_insert_with(|| IntermediateFileInfo::new(&self.config));

        if !info.write_stream.is_open() {
            if info.filename.is_none() {
                info.filename = Some(self.temp_files.create_path()?);
            }
            if let Some(filename) = info.filename.as_deref() {
                info.write_stream.open(filename)?;
            }
        }
        info.write_stream.write(key, value)
    }

    /// Closes every open spill file, flushing caches.
    pub fn close_files(&mut self) -> Result<()> {
        for info in self.intermediate_files.values_mut() {
            info.write_stream.close()?;
        }
        Ok(())
    }

    /// Replaces every partition's primary file with its combined version.
    /// Unsorted files are sorted first.
    pub fn combine<C>(&mut self, combiner: &mut C) -> Result<CombineStats>
    where
        C: Combiner<K, V> + ?Sized,
    {
        self.close_files()?;
        let mut total = CombineStats::default();
        for (partition, info) in self.intermediate_files.iter_mut() {
            let Some(filename) = info.filename.clone() else {
                continue;
            };
            let output = self.temp_files.create_path()?;
            let sorted_copy = if info.write_stream.sorted() {
                None
            } else {
                Some(self.merger.sort_to_temp::<K, V>(&filename)?)
            };

            let source = sorted_copy.as_deref().unwrap_or(&filename);
            let result =
                combine_file::<K, V, C>(source, &output, &mut *combiner, self.config.io_buffer_size);
            if let Some(copy) = &sorted_copy {
                remove_file_logged(copy);
            }
            let stats = match result {
                Ok(stats) => stats,
                Err(e) => {
                    remove_file_logged(&output);
                    return Err(e);
                }
            };

            debug!(
                "Combined partition {}: {} records -> {}",
                partition, stats.records_read, stats.records_written
            );
            remove_file_logged(&filename);
            info.filename = Some(output);
            info.write_stream.mark_sorted();
            total.records_read += stats.records_read;
            total.records_written += stats.records_written;
        }
        Ok(total)
    }

    /// Takes over every partition file of `other`, leaving it empty.
    ///
    /// Sorted files are moved into this store's temp area as fragments;
    /// unsorted ones are sorted into a new fragment first. On error the
    /// partition being adopted stays with `other`.
    pub fn merge_from(&mut self, other: &mut Self) -> Result<()> {
        assert_eq!(
            self.num_partitions, other.num_partitions,
            "merge_from requires stores with the same number of partitions"
        );
        other.close_files()?;

        for partition in other.partitions() {
            let Some(mut source) = other.intermediate_files.remove(&partition) else {
                continue;
            };
            if let Err(e) = self.adopt_partition(partition, &mut source) {
                other.intermediate_files.insert(partition, source);
                return Err(e);
            }
        }
        Ok(())
    }

    fn adopt_partition(
        &mut self,
        partition: u32,
        source: &mut IntermediateFileInfo<K, V>,
    ) -> Result<()> {
        let target = self
            .intermediate_files
            .entry(partition)
            .or_insert_with(|| IntermediateFileInfo::new(&self.config));

        let mut result = Ok(());
        if let Some(filename) = source.filename.take() {
            let adopted = if source.write_stream.sorted() {
                relocate(self.temp_files.as_ref(), &filename)
            } else {
                self.merger.sort_to_temp::<K, V>(&filename)
            };
            match adopted {
                Ok(fragment) => {
                    remove_file_logged(&filename);
                    target.fragment_filenames.push(fragment);
                }
                Err(e) => {
                    source.filename = Some(filename);
                    result = Err(e);
                }
            }
        }

        while result.is_ok() {
            let Some(fragment) = source.fragment_filenames.pop() else {
                break;
            };
            match relocate(self.temp_files.as_ref(), &fragment) {
                Ok(moved) => target.fragment_filenames.push(moved),
                Err(e) => {
                    source.fragment_filenames.push(fragment);
                    result = Err(e);
                }
            }
        }

        let is_empty = target.filename.is_none() && target.fragment_filenames.is_empty();
        debug!(
            "Adopted partition {} ({} fragments pending)",
            partition,
            target.fragment_filenames.len()
        );
        if is_empty {
            self.intermediate_files.remove(&partition);
        }
        result
    }

    /// Collapses a partition's primary file and fragments into one sorted
    /// file. A partition already held in a single sorted file is untouched.
    pub fn run_intermediate_results_shuffle(&mut self, partition: u32) -> Result<MergeStats> {
        debug!("Intermediate results shuffle, partition {}", partition);
        let Some(info) = self.intermediate_files.get_mut(&partition) else {
            return Ok(MergeStats::default());
        };
        info.write_stream.close()?;

        if let Some(filename) = info.filename.take() {
            if info.write_stream.sorted() {
                info.fragment_filenames.insert(0, filename);
            } else {
                match self.merger.sort_to_temp::<K, V>(&filename) {
                    Ok(sorted) => {
                        remove_file_logged(&filename);
                        info.fragment_filenames.insert(0, sorted);
                    }
                    Err(e) => {
                        info.filename = Some(filename);
                        return Err(e);
                    }
                }
            }
        }

        let stats = if info.fragment_filenames.len() <= 1 {
            info.filename = info.fragment_filenames.pop();
            MergeStats::default()
        } else {
            let dest = self.temp_files.create_path()?;
            match self.merger.merge::<K, V>(&info.fragment_filenames, &dest) {
                Ok(stats) => {
                    for fragment in info.fragment_filenames.drain(..) {
                        remove_file_logged(&fragment);
                    }
                    info.filename = Some(dest);
                    stats
                }
                Err(e) => {
                    remove_file_logged(&dest);
                    return Err(e);
                }
            }
        };
        info.write_stream.mark_sorted();
        Ok(stats)
    }

    /// Streams a shuffled partition and calls `callback` once per distinct
    /// key, in ascending key order, with all of that key's values. The
    /// partition's data is deleted afterwards.
    ///
    /// Panics if the partition still has unmerged fragments or an unsorted
    /// file, i.e. when it was not shuffled first.
    pub fn reduce<F>(&mut self, partition: u32, mut callback: F) -> Result<ReduceStats>
    where
        F: FnMut(&K, &[V]) -> Result<()>,
    {
        assert!(
            partition < self.num_partitions,
            "Partition {} out of range for {} partitions",
            partition,
            self.num_partitions
        );
        debug!("Reduce phase running for partition {}", partition);

        let Some(mut info) = self.intermediate_files.remove(&partition) else {
            return Ok(ReduceStats::default());
        };
        info.write_stream.close()?;
        assert!(
            info.fragment_filenames.is_empty() && info.write_stream.sorted(),
            "Partition {} must be shuffled before it is reduced",
            partition
        );
        let Some(filename) = info.filename.clone() else {
            return Ok(ReduceStats::default());
        };

        let mut stats = ReduceStats::default();
        let mut reader = RecordReader::<K, V>::open(&filename, self.config.io_buffer_size)?;
        let mut current: Option<K> = None;
        let mut values: Vec<V> = Vec::new();
        while let Some((key, value)) = reader.next_record()? {
            stats.records += 1;
            if current.as_ref() != Some(&key) {
                if let Some(done) = current.take() {
                    callback(&done, &values)?;
                    stats.keys += 1;
                    values.clear();
                }
                current = Some(key);
            }
            values.push(value);
        }
        if let Some(done) = current {
            callback(&done, &values)?;
            stats.keys += 1;
        }
        Ok(stats)
    }

    /// Brings every partition to a single sorted file and returns an iterator
    /// over all of them in key order.
    ///
    /// The iterator reads the store's own files, so further inserts, shuffles
    /// or reduces on this store invalidate it.
    pub fn results(&mut self) -> Result<ResultIter<K, V>> {
        for partition in self.partitions() {
            self.run_intermediate_results_shuffle(partition)?;
        }
        let files: Vec<PathBuf> = self
            .intermediate_files
            .values()
            .filter_map(|info| info.filename.clone())
            .collect();
        info!("Enumerating results from {} partition files", files.len());
        ResultIter::from_files(&files, self.config.io_buffer_size)
    }
}

impl<K: Datum, V: Datum, P: Partitioner<K>> ResultSink<K, V> for IntermediateStore<K, V, P> {
    fn store(&mut self, key: K, value: V) -> Result<()> {
        self.insert(key, value)
    }
}

impl<K, V, P> Drop for IntermediateStore<K, V, P> {
    fn drop(&mut self) {
        if !self.intermediate_files.is_empty() {
            debug!(
                "Releasing {} intermediate partitions",
                self.intermediate_files.len()
            );
        }
        self.intermediate_files.clear();
    }
}

/// Moves `path` to a fresh name from `temp_files`.
fn relocate(temp_files: &dyn TempFileProvider, path: &Path) -> Result<PathBuf> {
    let moved = temp_files.create_path()?;
    move_file(path, &moved)?;
    Ok(moved)
}
