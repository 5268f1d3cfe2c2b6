//! External k-way merge and sort of intermediate files.
//!
//! The merge keeps one buffered head record per open input and repeatedly
//! emits the smallest. Records equal in both key and value coming from
//! different inputs are all written, back to back, so multiplicities survive
//! the merge; records that only share a key are left for reduce to group.
//!
//! At most `fan_in` inputs are open at once. Longer input lists are merged in
//! passes: each pass output is rotated to a temp file and queued as one more
//! input until a single pass covers everything left.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rayon::prelude::*;
use tracing::debug;

use crate::record::{Datum, RecordReader, RecordWriter};
use spillmr_common::{Result, StoreConfig, TempFileProvider, move_file, remove_file_logged};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub passes: u32,
    pub records_written: u64,
}

/// Head record of one merge input.
struct HeapEntry<K, V> {
    record: (K, V),
    source: usize,
}

impl<K: Ord, V: Ord> PartialEq for HeapEntry<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<K: Ord, V: Ord> Eq for HeapEntry<K, V> {}

impl<K: Ord, V: Ord> PartialOrd for HeapEntry<K, V> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: Ord, V: Ord> Ord for HeapEntry<K, V> {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap, reverse for smallest-first; lower source
        // index wins ties so equal records keep input order
        other
            .record
            .cmp(&self.record)
            .then_with(|| other.source.cmp(&self.source))
    }
}

#[derive(Debug, Clone)]
pub struct FileMerger {
    fan_in: usize,
    sort_run_records: usize,
    buffer_size: usize,
    temp_files: Arc<dyn TempFileProvider>,
}

impl FileMerger {
    pub fn new(config: &StoreConfig, temp_files: Arc<dyn TempFileProvider>) -> Self {
        assert!(config.merge_fan_in >= 2, "merge fan-in must be at least 2");
        Self {
            fan_in: config.merge_fan_in,
            sort_run_records: config.sort_run_records.max(1),
            buffer_size: config.io_buffer_size,
            temp_files,
        }
    }

    /// Merges the sorted `inputs` into `dest`. Inputs are left in place; each
    /// pass file is removed as soon as a later pass has consumed it. On error
    /// `dest` may hold a partial result and is the caller's to delete.
    pub fn merge<K: Datum, V: Datum>(&self, inputs: &[PathBuf], dest: &Path) -> Result<MergeStats> {
        let mut pending: VecDeque<PathBuf> = inputs.iter().cloned().collect();
        let mut pass_files = Vec::new();
        let result = self.run_passes::<K, V>(&mut pending, dest, &mut pass_files);
        for file in &pass_files {
            remove_file_logged(file);
        }
        result
    }

    fn run_passes<K: Datum, V: Datum>(
        &self,
        pending: &mut VecDeque<PathBuf>,
        dest: &Path,
        pass_files: &mut Vec<PathBuf>,
    ) -> Result<MergeStats> {
        let mut stats = MergeStats::default();
        loop {
            let take = pending.len().min(self.fan_in);
            let batch: Vec<PathBuf> = pending.drain(..take).collect();
            stats.records_written = merge_pass::<K, V>(&batch, dest, self.buffer_size)?;
            stats.passes += 1;
            for consumed in &batch {
                if let Some(index) = pass_files.iter().position(|p| p == consumed) {
                    remove_file_logged(consumed);
                    pass_files.swap_remove(index);
                }
            }
            debug!(
                "Merge pass {} combined {} files into {} ({} records, {} files pending)",
                stats.passes,
                batch.len(),
                dest.display(),
                stats.records_written,
                pending.len()
            );

            if pending.is_empty() {
                return Ok(stats);
            }
            let rotated = self.temp_files.create_path()?;
            move_file(dest, &rotated)?;
            pass_files.push(rotated.clone());
            pending.push_back(rotated);
        }
    }

    /// Sorts `input` into a fresh temp file and returns its path. Nothing is
    /// left behind on failure.
    pub fn sort_to_temp<K: Datum, V: Datum>(&self, input: &Path) -> Result<PathBuf> {
        let dest = self.temp_files.create_path()?;
        match self.sort_file::<K, V>(input, &dest) {
            Ok(_) => Ok(dest),
            Err(e) => {
                remove_file_logged(&dest);
                Err(e)
            }
        }
    }

    /// Sorts an arbitrarily ordered file into `dest`: sorted in-memory runs of
    /// at most `sort_run_records` records, merged afterwards if there is more
    /// than one.
    pub fn sort_file<K: Datum, V: Datum>(&self, input: &Path, dest: &Path) -> Result<MergeStats> {
        let mut runs = Vec::new();
        let result = self.sort_into_runs::<K, V>(input, dest, &mut runs);
        for run in &runs {
            remove_file_logged(run);
        }
        result
    }

    fn sort_into_runs<K: Datum, V: Datum>(
        &self,
        input: &Path,
        dest: &Path,
        runs: &mut Vec<PathBuf>,
    ) -> Result<MergeStats> {
        let mut reader = RecordReader::<K, V>::open(input, self.buffer_size)?;
        let mut buffer: Vec<(K, V)> = Vec::new();
        let mut exhausted = false;

        while !exhausted {
            buffer.clear();
            while buffer.len() < self.sort_run_records {
                match reader.next_record()? {
                    Some(record) => buffer.push(record),
                    None => {
                        exhausted = true;
                        break;
                    }
                }
            }
            if buffer.is_empty() && !runs.is_empty() {
                break;
            }

            buffer.par_sort();
            // a single run goes straight to the destination
            let target = if exhausted && runs.is_empty() {
                dest.to_path_buf()
            } else {
                let run = self.temp_files.create_path()?;
                runs.push(run.clone());
                run
            };
            let mut writer = RecordWriter::create(&target, self.buffer_size)?;
            for (key, value) in &buffer {
                writer.write(key, value)?;
            }
            let written = writer.finish()?;

            if target.as_path() == dest {
                debug!("Sorted {} in memory ({} records)", input.display(), written);
                return Ok(MergeStats {
                    passes: 0,
                    records_written: written,
                });
            }
        }

        debug!("Sorting {} through {} runs", input.display(), runs.len());
        self.merge::<K, V>(runs, dest)
    }
}

/// One merge pass over at most fan-in files. Returns records written.
fn merge_pass<K: Datum, V: Datum>(inputs: &[PathBuf], dest: &Path, buffer_size: usize) -> Result<u64> {
    let mut readers = Vec::with_capacity(inputs.len());
    let mut heap = BinaryHeap::with_capacity(inputs.len());
    for (source, path) in inputs.iter().enumerate() {
        let mut reader = RecordReader::<K, V>::open(path, buffer_size)?;
        if let Some(record) = reader.next_record()? {
            heap.push(HeapEntry { record, source });
        }
        readers.push(reader);
    }

    let mut writer = RecordWriter::create(dest, buffer_size)?;
    while let Some(top) = heap.pop() {
        writer.write(&top.record.0, &top.record.1)?;
        if let Some(next) = readers[top.source].next_record()? {
            heap.push(HeapEntry {
                record: next,
                source: top.source,
            });
        }

        // every other input currently holding the same record emits it too
        while heap.peek().is_some_and(|peek| peek.record == top.record) {
            let Some(dup) = heap.pop() else { break };
            writer.write(&dup.record.0, &dup.record.1)?;
            if let Some(next) = readers[dup.source].next_record()? {
                heap.push(HeapEntry {
                    record: next,
                    source: dup.source,
                });
            }
        }
    }
    writer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::read_all;
    use spillmr_common::ScratchDir;

    fn merger(fan_in: usize, run_records: usize) -> (FileMerger, Arc<ScratchDir>) {
        let scratch = Arc::new(ScratchDir::new().unwrap());
        let config = StoreConfig {
            merge_fan_in: fan_in,
            sort_run_records: run_records,
            io_buffer_size: 64,
            ..Default::default()
        };
        (FileMerger::new(&config, scratch.clone()), scratch)
    }

    fn write_file(scratch: &ScratchDir, records: &[(&str, u32)]) -> PathBuf {
        let path = scratch.create_path().unwrap();
        let mut writer = RecordWriter::create(&path, 64).unwrap();
        for (k, v) in records {
            writer.write(&k.to_string(), v).unwrap();
        }
        writer.finish().unwrap();
        path
    }

    fn owned(records: &[(&str, u32)]) -> Vec<(String, u32)> {
        records.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_merge_two_sorted_files() {
        let (merger, scratch) = merger(8, 100);
        let a = write_file(&scratch, &[("a", 1), ("c", 1), ("e", 1)]);
        let b = write_file(&scratch, &[("b", 1), ("c", 2), ("d", 1)]);
        let dest = scratch.create_path().unwrap();

        let stats = merger.merge::<String, u32>(&[a.clone(), b.clone()], &dest).unwrap();
        assert_eq!(stats.passes, 1);
        assert_eq!(stats.records_written, 6);

        let merged: Vec<(String, u32)> = read_all(&dest, 64).unwrap();
        assert_eq!(
            merged,
            owned(&[("a", 1), ("b", 1), ("c", 1), ("c", 2), ("d", 1), ("e", 1)])
        );
        // inputs belong to the caller
        assert!(a.exists() && b.exists());
    }

    #[test]
    fn test_merging_a_file_with_itself_doubles_every_record() {
        let (merger, scratch) = merger(8, 100);
        let a = write_file(&scratch, &[("a", 1), ("a", 1), ("b", 3)]);
        let dest = scratch.create_path().unwrap();

        merger.merge::<String, u32>(&[a.clone(), a], &dest).unwrap();
        let merged: Vec<(String, u32)> = read_all(&dest, 64).unwrap();
        assert_eq!(
            merged,
            owned(&[("a", 1), ("a", 1), ("a", 1), ("a", 1), ("b", 3), ("b", 3)])
        );
    }

    #[test]
    fn test_multi_pass_merge_beyond_fan_in() {
        let (merger, scratch) = merger(2, 100);
        let mut inputs = Vec::new();
        let mut expected = Vec::new();
        for i in 0..7u32 {
            let key = format!("k{}", i % 3);
            inputs.push(write_file(&scratch, &[(key.as_str(), i), ("z", 1)]));
            expected.push((key, i));
            expected.push(("z".to_string(), 1));
        }
        expected.sort();
        let dest = scratch.create_path().unwrap();

        let stats = merger.merge::<String, u32>(&inputs, &dest).unwrap();
        assert!(stats.passes > 1);
        assert_eq!(stats.records_written, 14);

        let merged: Vec<(String, u32)> = read_all(&dest, 64).unwrap();
        assert_eq!(merged, expected);

        // only the inputs and the destination remain in the scratch dir
        let remaining = std::fs::read_dir(scratch.root()).unwrap().count();
        assert_eq!(remaining, inputs.len() + 1);
    }

    /// Provider that records how many of its files exist whenever a new one
    /// is requested.
    #[derive(Debug)]
    struct LiveFileCounter {
        inner: ScratchDir,
        peak: std::sync::atomic::AtomicUsize,
    }

    impl TempFileProvider for LiveFileCounter {
        fn create_path(&self) -> Result<PathBuf> {
            let live = std::fs::read_dir(self.inner.root())?.count();
            self.peak.fetch_max(live, std::sync::atomic::Ordering::Relaxed);
            self.inner.create_path()
        }

        fn root(&self) -> &Path {
            self.inner.root()
        }
    }

    #[test]
    fn test_pass_files_removed_once_consumed() {
        let counter = Arc::new(LiveFileCounter {
            inner: ScratchDir::new().unwrap(),
            peak: Default::default(),
        });
        let config = StoreConfig {
            merge_fan_in: 2,
            io_buffer_size: 64,
            ..Default::default()
        };
        let merger = FileMerger::new(&config, counter.clone());

        let inputs_dir = ScratchDir::new().unwrap();
        let inputs: Vec<PathBuf> = (0..7u32)
            .map(|i| write_file(&inputs_dir, &[("k", i)]))
            .collect();
        let dest = inputs_dir.create_path().unwrap();

        let stats = merger.merge::<String, u32>(&inputs, &dest).unwrap();
        assert_eq!(stats.passes, 6);
        assert_eq!(stats.records_written, 7);
        // at most two rotated files are ever waiting to be merged
        assert!(counter.peak.load(std::sync::atomic::Ordering::Relaxed) <= 2);
        assert_eq!(std::fs::read_dir(counter.root()).unwrap().count(), 0);
    }

    #[test]
    fn test_merge_of_nothing_creates_empty_output() {
        let (merger, scratch) = merger(4, 100);
        let dest = scratch.create_path().unwrap();
        let stats = merger.merge::<String, u32>(&[], &dest).unwrap();
        assert_eq!(stats.records_written, 0);
        assert!(dest.exists());
    }

    #[test]
    fn test_merge_missing_input_fails() {
        let (merger, scratch) = merger(4, 100);
        let missing = scratch.create_path().unwrap();
        let dest = scratch.create_path().unwrap();
        assert!(merger.merge::<String, u32>(&[missing], &dest).is_err());
    }

    #[test]
    fn test_sort_file_single_run() {
        let (merger, scratch) = merger(4, 100);
        let input = write_file(&scratch, &[("c", 1), ("a", 2), ("b", 1), ("a", 1)]);
        let dest = scratch.create_path().unwrap();

        let stats = merger.sort_file::<String, u32>(&input, &dest).unwrap();
        assert_eq!(stats.passes, 0);
        let sorted: Vec<(String, u32)> = read_all(&dest, 64).unwrap();
        assert_eq!(sorted, owned(&[("a", 1), ("a", 2), ("b", 1), ("c", 1)]));
    }

    #[test]
    fn test_sort_file_spills_runs_and_cleans_up() {
        let (merger, scratch) = merger(2, 2);
        let input = write_file(
            &scratch,
            &[("e", 1), ("d", 1), ("c", 1), ("b", 1), ("a", 1), ("a", 1), ("f", 1)],
        );
        let dest = scratch.create_path().unwrap();

        let stats = merger.sort_file::<String, u32>(&input, &dest).unwrap();
        assert!(stats.passes >= 2);
        let sorted: Vec<(String, u32)> = read_all(&dest, 64).unwrap();
        assert_eq!(
            sorted,
            owned(&[("a", 1), ("a", 1), ("b", 1), ("c", 1), ("d", 1), ("e", 1), ("f", 1)])
        );
        assert_eq!(std::fs::read_dir(scratch.root()).unwrap().count(), 2);
    }

    #[test]
    fn test_sort_empty_file() {
        let (merger, scratch) = merger(4, 3);
        let input = write_file(&scratch, &[]);
        let dest = scratch.create_path().unwrap();
        let stats = merger.sort_file::<String, u32>(&input, &dest).unwrap();
        assert_eq!(stats.records_written, 0);
        assert!(dest.exists());
    }
}
