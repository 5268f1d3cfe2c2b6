//! Configuration for intermediate stores and local jobs.
//!
//! Both structs deserialize from JSON with every field optional, so a config
//! file only needs to name the knobs it changes.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CommonError, Result};

/// Tuning knobs for one intermediate store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Distinct (key, value) entries a spill file caches before it flushes
    /// the cache and switches to direct, unsorted writes.
    pub cache_limit: usize,
    /// Maximum number of files one merge pass keeps open.
    pub merge_fan_in: usize,
    /// Records sorted in memory per run when an unsorted file is sorted.
    pub sort_run_records: usize,
    /// Buffer size for file readers and writers.
    pub io_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            cache_limit: 1 << 20,
            merge_fan_in: 64,
            sort_run_records: 1 << 20,
            io_buffer_size: 64 * 1024, // 64KB
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> Result<()> {
        if self.merge_fan_in < 2 {
            return Err(CommonError::configuration_error(format!(
                "merge_fan_in must be at least 2, got {}",
                self.merge_fan_in
            )));
        }
        if self.sort_run_records == 0 {
            return Err(CommonError::configuration_error(
                "sort_run_records must be positive",
            ));
        }
        if self.io_buffer_size == 0 {
            return Err(CommonError::configuration_error(
                "io_buffer_size must be positive",
            ));
        }
        Ok(())
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| {
            CommonError::configuration_error_with_source("Failed to parse store config", e)
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = read_config_file(path.as_ref())?;
        Self::from_json_str(&text)
    }
}

/// Settings for a local map/shuffle/reduce job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    pub num_partitions: u32,
    pub num_map_workers: usize,
    /// Run the combiner over each worker's store before merging.
    pub combine: bool,
    /// Prefix for the `<base><n>_of_<total>` output files.
    pub output_base: Option<PathBuf>,
    pub store: StoreConfig,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            num_partitions: 1,
            num_map_workers: num_cpus::get(),
            combine: true,
            output_base: None,
            store: StoreConfig::default(),
        }
    }
}

impl JobConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_partitions == 0 {
            return Err(CommonError::configuration_error(
                "num_partitions must be positive",
            ));
        }
        if self.num_map_workers == 0 {
            return Err(CommonError::configuration_error(
                "num_map_workers must be positive",
            ));
        }
        self.store.validate()
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| {
            CommonError::configuration_error_with_source("Failed to parse job config", e)
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = read_config_file(path.as_ref())?;
        Self::from_json_str(&text)
    }
}

fn read_config_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        CommonError::configuration_error_with_source(
            format!("Failed to read config file {}", path.display()),
            e,
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_store_config_is_valid() {
        assert!(StoreConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = StoreConfig::from_json_str(r#"{ "merge_fan_in": 4 }"#).unwrap();
        assert_eq!(config.merge_fan_in, 4);
        assert_eq!(config.cache_limit, StoreConfig::default().cache_limit);
    }

    #[test]
    fn test_fan_in_below_two_is_rejected() {
        let err = StoreConfig::from_json_str(r#"{ "merge_fan_in": 1 }"#).unwrap_err();
        assert!(matches!(err, CommonError::ConfigurationError { .. }));
    }

    #[test]
    fn test_job_config_nested_store() {
        let config = JobConfig::from_json_str(
            r#"{ "num_partitions": 3, "num_map_workers": 2, "store": { "cache_limit": 10 } }"#,
        )
        .unwrap();
        assert_eq!(config.num_partitions, 3);
        assert_eq!(config.num_map_workers, 2);
        assert!(config.combine);
        assert_eq!(config.store.cache_limit, 10);
    }

    #[test]
    fn test_job_config_zero_partitions_rejected() {
        assert!(JobConfig::from_json_str(r#"{ "num_partitions": 0 }"#).is_err());
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, r#"{ "io_buffer_size": 128 }"#).unwrap();
        let config = StoreConfig::from_json_file(&path).unwrap();
        assert_eq!(config.io_buffer_size, 128);

        let missing = StoreConfig::from_json_file(dir.path().join("missing.json"));
        assert!(missing.is_err());
    }
}
