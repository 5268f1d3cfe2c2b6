//! Shared helpers for the integration tests

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use spillmr_common::{Result, ScratchDir, StoreConfig, TempFileProvider};
use spillmr_core::{HashPartitioner, IntermediateStore};

#[allow(dead_code)]
pub type WordStore = IntermediateStore<String, u64>;

pub fn scratch() -> Arc<ScratchDir> {
    Arc::new(ScratchDir::new().unwrap())
}

#[allow(dead_code)]
pub fn word_store(
    partitions: u32,
    config: StoreConfig,
    temp_files: Arc<dyn TempFileProvider>,
) -> WordStore {
    IntermediateStore::new(HashPartitioner::new(partitions), config, temp_files).unwrap()
}

/// Config with a tiny cache so spill files overflow and go unsorted.
#[allow(dead_code)]
pub fn small_cache_config() -> StoreConfig {
    StoreConfig {
        cache_limit: 4,
        sort_run_records: 16,
        ..Default::default()
    }
}

/// Deterministic (word, count) records with plenty of repeated pairs.
pub fn generate_records(count: usize, seed: u64) -> Vec<(String, u64)> {
    let mut state = seed;
    (0..count)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            let word = format!("w{:02}", (state >> 33) % 40);
            let value = (state >> 13) % 3 + 1;
            (word, value)
        })
        .collect()
}

/// Groups records by key with each key's values sorted.
#[allow(dead_code)] // only used by the store tests
pub fn group(records: &[(String, u64)]) -> BTreeMap<String, Vec<u64>> {
    let mut groups: BTreeMap<String, Vec<u64>> = BTreeMap::new();
    for (key, value) in records {
        groups.entry(key.clone()).or_default().push(*value);
    }
    for values in groups.values_mut() {
        values.sort();
    }
    groups
}

/// Shuffles and reduces every partition, checking keys arrive in strictly
/// ascending order within each partition.
#[allow(dead_code)]
pub fn shuffle_and_reduce(store: &mut WordStore) -> BTreeMap<String, Vec<u64>> {
    let mut groups = BTreeMap::new();
    for partition in 0..store.num_partitions() {
        store.run_intermediate_results_shuffle(partition).unwrap();
        let mut last: Option<String> = None;
        store
            .reduce(partition, |key, values| {
                if let Some(prev) = &last {
                    assert!(prev < key, "{} delivered after {}", key, prev);
                }
                last = Some(key.clone());
                let mut values = values.to_vec();
                values.sort();
                assert!(groups.insert(key.clone(), values).is_none());
                Ok(())
            })
            .unwrap();
    }
    groups
}

/// Temp provider that remembers every path it hands out.
#[allow(dead_code)]
#[derive(Debug)]
pub struct RecordingTempFiles {
    inner: ScratchDir,
    issued: Mutex<Vec<PathBuf>>,
}

#[allow(dead_code)]
impl RecordingTempFiles {
    pub fn new() -> Self {
        Self {
            inner: ScratchDir::new().unwrap(),
            issued: Mutex::new(Vec::new()),
        }
    }

    pub fn issued(&self) -> Vec<PathBuf> {
        self.issued.lock().unwrap().clone()
    }
}

impl TempFileProvider for RecordingTempFiles {
    fn create_path(&self) -> Result<PathBuf> {
        let path = self.inner.create_path()?;
        self.issued.lock().unwrap().push(path.clone());
        Ok(path)
    }

    fn root(&self) -> &Path {
        self.inner.root()
    }
}
