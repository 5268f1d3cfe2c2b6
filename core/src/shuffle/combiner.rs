//! Local pre-aggregation of a partition's intermediate file.
//!
//! A combiner sees every value of one key between `start` and `finish` and
//! may collapse them into a single record. Combining is purely a size
//! optimization: it must agree with the reduce task, which still runs over
//! whatever the combiner wrote back.

use std::fmt::Debug;
use std::ops::Add;
use std::path::Path;

use tracing::debug;

use crate::record::{Datum, RecordReader, RecordWriter};
use spillmr_common::Result;

/// Per-key accumulation protocol.
///
/// K: Key type
/// V: Value type, both consumed and produced
pub trait Combiner<K, V> {
    /// Begin a new key. Resets any accumulated state.
    fn start(&mut self, key: &K);

    /// Fold one value of the current key.
    fn accumulate(&mut self, value: V);

    /// End the current key. `None` means nothing is written back for it.
    fn finish(&mut self, key: &K) -> Option<V>;
}

/// Sums values, dropping keys whose total is `V::default()`.
#[derive(Clone, Debug, Default)]
pub struct SumCombiner<V> {
    total: Option<V>,
}

impl<V> SumCombiner<V> {
    pub fn new() -> Self {
        Self { total: None }
    }
}

impl<K, V> Combiner<K, V> for SumCombiner<V>
where
    V: Add<Output = V> + Default + PartialEq,
{
    fn start(&mut self, _key: &K) {
        self.total = None;
    }

    fn accumulate(&mut self, value: V) {
        self.total = Some(match self.total.take() {
            Some(total) => total + value,
            None => value,
        });
    }

    fn finish(&mut self, _key: &K) -> Option<V> {
        self.total.take().filter(|total| *total != V::default())
    }
}

/// Folds values with an associative function, keeping every key.
#[derive(Clone, Debug)]
pub struct ReduceCombiner<V> {
    reduce_func: fn(V, V) -> V,
    acc: Option<V>,
}

impl<V> ReduceCombiner<V> {
    pub fn new(reduce_func: fn(V, V) -> V) -> Self {
        Self {
            reduce_func,
            acc: None,
        }
    }
}

impl<K, V> Combiner<K, V> for ReduceCombiner<V> {
    fn start(&mut self, _key: &K) {
        self.acc = None;
    }

    fn accumulate(&mut self, value: V) {
        self.acc = Some(match self.acc.take() {
            Some(acc) => (self.reduce_func)(acc, value),
            None => value,
        });
    }

    fn finish(&mut self, _key: &K) -> Option<V> {
        self.acc.take()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CombineStats {
    pub records_read: u64,
    pub records_written: u64,
}

/// Rewrites the key-sorted file `input` into `output` with at most one record
/// per key. Reads strictly sequentially, so `input` must be sorted by key.
pub fn combine_file<K, V, C>(
    input: &Path,
    output: &Path,
    combiner: &mut C,
    buffer_size: usize,
) -> Result<CombineStats>
where
    K: Datum,
    V: Datum,
    C: Combiner<K, V> + ?Sized,
{
    let mut reader = RecordReader::<K, V>::open(input, buffer_size)?;
    let mut writer = RecordWriter::create(output, buffer_size)?;
    let mut stats = CombineStats::default();
    let mut current: Option<K> = None;

    while let Some((key, value)) = reader.next_record()? {
        stats.records_read += 1;
        if current.as_ref() != Some(&key) {
            if let Some(done) = current.take() {
                if let Some(combined) = combiner.finish(&done) {
                    writer.write(&done, &combined)?;
                }
            }
            combiner.start(&key);
            current = Some(key);
        }
        combiner.accumulate(value);
    }
    if let Some(done) = current {
        if let Some(combined) = combiner.finish(&done) {
            writer.write(&done, &combined)?;
        }
    }

    stats.records_written = writer.finish()?;
    debug!(
        "Combined {} into {}: {} records -> {}",
        input.display(),
        output.display(),
        stats.records_read,
        stats.records_written
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::read_all;

    fn write_records(path: &Path, records: &[(&str, i64)]) {
        let mut writer = RecordWriter::create(path, 64).unwrap();
        for (k, v) in records {
            writer.write(&k.to_string(), v).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn test_sum_combiner_protocol() {
        let mut combiner = SumCombiner::<i64>::new();
        Combiner::<String, i64>::start(&mut combiner, &"a".to_string());
        Combiner::<String, i64>::accumulate(&mut combiner, 2);
        Combiner::<String, i64>::accumulate(&mut combiner, 3);
        assert_eq!(
            Combiner::<String, i64>::finish(&mut combiner, &"a".to_string()),
            Some(5)
        );

        // state does not leak into the next key
        Combiner::<String, i64>::start(&mut combiner, &"b".to_string());
        Combiner::<String, i64>::accumulate(&mut combiner, 1);
        assert_eq!(
            Combiner::<String, i64>::finish(&mut combiner, &"b".to_string()),
            Some(1)
        );
    }

    #[test]
    fn test_sum_combiner_drops_zero_totals() {
        let mut combiner = SumCombiner::<i64>::new();
        Combiner::<u8, i64>::start(&mut combiner, &0);
        Combiner::<u8, i64>::accumulate(&mut combiner, 4);
        Combiner::<u8, i64>::accumulate(&mut combiner, -4);
        assert_eq!(Combiner::<u8, i64>::finish(&mut combiner, &0), None);
    }

    #[test]
    fn test_reduce_combiner_keeps_every_key() {
        let mut combiner = ReduceCombiner::new(|a: i64, b: i64| a.max(b));
        Combiner::<u8, i64>::start(&mut combiner, &1);
        Combiner::<u8, i64>::accumulate(&mut combiner, 0);
        Combiner::<u8, i64>::accumulate(&mut combiner, -3);
        assert_eq!(Combiner::<u8, i64>::finish(&mut combiner, &1), Some(0));
    }

    #[test]
    fn test_combine_file_groups_adjacent_keys() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.tmp");
        let output = dir.path().join("out.tmp");
        write_records(
            &input,
            &[("a", 1), ("a", 1), ("b", 5), ("c", 2), ("c", -2), ("d", 1)],
        );

        let mut combiner = SumCombiner::<i64>::new();
        let stats = combine_file::<String, i64, _>(&input, &output, &mut combiner, 64).unwrap();
        assert_eq!(stats.records_read, 6);
        assert_eq!(stats.records_written, 3);

        let combined: Vec<(String, i64)> = read_all(&output, 64).unwrap();
        assert_eq!(
            combined,
            vec![
                ("a".to_string(), 2),
                ("b".to_string(), 5),
                ("d".to_string(), 1)
            ]
        );
    }

    #[test]
    fn test_combine_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.tmp");
        let output = dir.path().join("out.tmp");
        write_records(&input, &[]);

        let mut combiner = SumCombiner::<i64>::new();
        let stats = combine_file::<String, i64, _>(&input, &output, &mut combiner, 64).unwrap();
        assert_eq!(stats, CombineStats::default());
        assert!(output.exists());
    }
}
