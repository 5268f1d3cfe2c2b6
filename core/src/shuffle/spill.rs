//! Per-partition write sink with an in-memory duplicate cache.
//!
//! While the cache is active, identical (key, value) pairs only bump a
//! counter and nothing touches disk. The cache is an ordered map, so flushing
//! it produces a key-sorted run. Once it has been flushed because it grew
//! past its limit, later writes go straight to the file and the file is no
//! longer sorted.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::record::{Datum, RecordWriter};
use spillmr_common::{CommonError, Result};

pub struct SpillFile<K, V> {
    path: Option<PathBuf>,
    writer: Option<RecordWriter>,
    cache: BTreeMap<(K, V), u64>,
    use_cache: bool,
    sorted: bool,
    cache_limit: usize,
    buffer_size: usize,
}

impl<K: Datum, V: Datum> SpillFile<K, V> {
    pub fn new(cache_limit: usize, buffer_size: usize) -> Self {
        Self {
            path: None,
            writer: None,
            cache: BTreeMap::new(),
            use_cache: true,
            sorted: true,
            cache_limit,
            buffer_size,
        }
    }

    /// Opens `path` for appending. Existing content is kept, which breaks the
    /// sort order of anything written afterwards.
    pub fn open(&mut self, path: &Path) -> Result<()> {
        debug_assert!(self.cache.is_empty());
        if self.is_open() {
            self.close()?;
        }
        let has_content = std::fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false);
        self.writer = Some(RecordWriter::append(path, self.buffer_size)?);
        self.path = Some(path.to_path_buf());
        self.use_cache = true;
        if has_content {
            self.sorted = false;
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    /// True if everything written so far came through the cache, i.e. the
    /// file is in key order.
    pub fn sorted(&self) -> bool {
        self.sorted
    }

    /// Records that the file at the current path was replaced by a sorted one.
    pub fn mark_sorted(&mut self) {
        debug_assert!(!self.is_open());
        self.sorted = true;
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }

    pub fn write(&mut self, key: K, value: V) -> Result<()> {
        if self.use_cache {
            *self.cache.entry((key, value)).or_insert(0) += 1;
            if self.cache.len() > self.cache_limit {
                debug!(
                    "Spill cache exceeded {} entries, flushing {:?}",
                    self.cache_limit, self.path
                );
                self.flush_cache()?;
            }
            return Ok(());
        }

        self.sorted = false;
        self.writer_mut()?.write(&key, &value)
    }

    /// Writes every cached record, with its multiplicity, in key order and
    /// disables the cache until the file is reopened.
    pub fn flush_cache(&mut self) -> Result<()> {
        self.use_cache = false;
        if self.cache.is_empty() {
            return Ok(());
        }
        let cache = std::mem::take(&mut self.cache);
        let writer = self.writer_mut()?;
        for ((key, value), count) in &cache {
            writer.write_repeated(key, value, *count)?;
        }
        Ok(())
    }

    /// Flushes the cache and closes the file. Safe to call repeatedly.
    pub fn close(&mut self) -> Result<()> {
        if !self.is_open() {
            return Ok(());
        }
        let flushed = self.flush_cache();
        // drop the handle even if the flush failed
        let writer = self.writer.take();
        flushed?;
        if let Some(writer) = writer {
            writer.finish()?;
        }
        Ok(())
    }

    fn writer_mut(&mut self) -> Result<&mut RecordWriter> {
        self.writer
            .as_mut()
            .ok_or_else(|| CommonError::internal_error("Spill file written while closed"))
    }
}

impl<K, V> SpillFile<K, V> {
    /// Closes the handle without flushing the cache. Teardown path only.
    pub(crate) fn release(&mut self) {
        if let Some(writer) = self.writer.take() {
            if !self.cache.is_empty() {
                warn!(
                    "Releasing spill file {:?} with {} unflushed cache entries",
                    self.path,
                    self.cache.len()
                );
                self.cache.clear();
            }
            if let Err(e) = writer.finish() {
                warn!("Failed to close spill file {:?}: {}", self.path, e);
            }
        }
    }
}

impl<K, V> Drop for SpillFile<K, V> {
    fn drop(&mut self) {
        self.release();
    }
}
