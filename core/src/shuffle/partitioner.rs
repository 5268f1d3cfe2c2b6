//! Defines partitioners for distributing intermediate keys.

use std::fmt::Debug;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::marker::PhantomData;

/// Chooses the partition an intermediate key belongs to.
///
/// Implementations must be deterministic for the lifetime of a job: every
/// occurrence of a key has to land in the same partition before reduction.
pub trait Partitioner<K>: Send + Sync + Debug {
    fn num_partitions(&self) -> u32;

    /// Returns an index in `[0, num_partitions)`.
    fn get_partition(&self, key: &K) -> u32;
}

/// A partitioner that uses the hash of the key to distribute data.
#[derive(Clone, Debug)]
pub struct HashPartitioner {
    num_partitions: u32,
    seed: u64,
}

impl HashPartitioner {
    pub fn new(num_partitions: u32) -> Self {
        Self::with_seed(num_partitions, 0)
    }

    pub fn with_seed(num_partitions: u32, seed: u64) -> Self {
        assert!(num_partitions > 0, "Number of partitions must be positive.");
        Self {
            num_partitions,
            seed,
        }
    }
}

impl<K: Hash> Partitioner<K> for HashPartitioner {
    fn num_partitions(&self) -> u32 {
        self.num_partitions
    }

    fn get_partition(&self, key: &K) -> u32 {
        // DefaultHasher::new() uses fixed keys, so this is stable across runs
        let mut s = DefaultHasher::new();
        self.seed.hash(&mut s);
        key.hash(&mut s);
        (s.finish() % self.num_partitions as u64) as u32
    }
}

/// A range partitioner that distributes keys based on sorted ranges.
///
/// Partition `i` holds keys up to and including `range_bounds[i]`, so reading
/// partitions in index order yields globally ordered output.
#[derive(Clone, Debug)]
pub struct RangePartitioner<K> {
    num_partitions: u32,
    range_bounds: Vec<K>,
}

impl<K> RangePartitioner<K>
where
    K: Ord + Clone + Send + Sync + Debug,
{
    /// Create a new range partitioner with the given bounds.
    /// The bounds should have length = num_partitions - 1.
    pub fn new(num_partitions: u32, mut range_bounds: Vec<K>) -> Self {
        assert!(num_partitions > 0, "Number of partitions must be positive.");
        assert_eq!(
            range_bounds.len(),
            (num_partitions - 1) as usize,
            "Range bounds length must be num_partitions - 1"
        );

        range_bounds.sort();
        Self {
            num_partitions,
            range_bounds,
        }
    }

    /// Create a range partitioner by sampling the given keys.
    pub fn from_sample(num_partitions: u32, mut sample_data: Vec<K>) -> Self {
        assert!(num_partitions > 0, "Number of partitions must be positive.");

        if sample_data.is_empty() || num_partitions == 1 {
            return Self {
                num_partitions,
                range_bounds: Vec::new(),
            };
        }

        sample_data.sort();
        sample_data.dedup();

        let step = sample_data.len() / num_partitions as usize;
        let range_bounds = (1..num_partitions)
            .map(|i| sample_data[(i as usize * step).min(sample_data.len() - 1)].clone())
            .collect();

        Self {
            num_partitions,
            range_bounds,
        }
    }
}

impl<K> Partitioner<K> for RangePartitioner<K>
where
    K: Ord + Clone + Send + Sync + Debug,
{
    fn num_partitions(&self) -> u32 {
        self.num_partitions
    }

    fn get_partition(&self, key: &K) -> u32 {
        match self.range_bounds.binary_search(key) {
            Ok(index) | Err(index) => index as u32,
        }
    }
}

/// A custom partitioner that allows users to define their own partitioning logic.
#[derive(Clone)]
pub struct CustomPartitioner<K> {
    num_partitions: u32,
    partition_func: fn(&K) -> u32,
    _phantom: PhantomData<fn(&K)>,
}

impl<K> CustomPartitioner<K> {
    pub fn new(num_partitions: u32, partition_func: fn(&K) -> u32) -> Self {
        assert!(num_partitions > 0, "Number of partitions must be positive.");
        Self {
            num_partitions,
            partition_func,
            _phantom: PhantomData,
        }
    }
}

impl<K> Partitioner<K> for CustomPartitioner<K> {
    fn num_partitions(&self) -> u32 {
        self.num_partitions
    }

    fn get_partition(&self, key: &K) -> u32 {
        (self.partition_func)(key) % self.num_partitions
    }
}

impl<K> Debug for CustomPartitioner<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomPartitioner")
            .field("num_partitions", &self.num_partitions)
            .field("partition_func", &"<function>")
            .finish()
    }
}
