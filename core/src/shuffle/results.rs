//! Final output: sinks that receive reduce results and the iterator that
//! enumerates them again in key order.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::record::{RecordReader, RecordWriter};
use spillmr_common::{CommonError, Result};

/// Receives the records a reduce task emits.
pub trait ResultSink<K, V> {
    fn store(&mut self, key: K, value: V) -> Result<()>;
}

impl<K, V> ResultSink<K, V> for Vec<(K, V)> {
    fn store(&mut self, key: K, value: V) -> Result<()> {
        self.push((key, value));
        Ok(())
    }
}

/// Writes one partition's output to `<base><partition+1>_of_<num_partitions>`.
pub struct FileResultSink {
    writer: RecordWriter,
}

impl FileResultSink {
    pub fn create(
        output_base: &Path,
        partition: u32,
        num_partitions: u32,
        buffer_size: usize,
    ) -> Result<Self> {
        let path = Self::output_path(output_base, partition, num_partitions);
        debug!("Writing partition {} output to {}", partition, path.display());
        Ok(Self {
            writer: RecordWriter::create(&path, buffer_size)?,
        })
    }

    pub fn output_path(output_base: &Path, partition: u32, num_partitions: u32) -> PathBuf {
        let mut name = OsString::from(output_base.as_os_str());
        name.push(format!("{}_of_{}", partition + 1, num_partitions));
        PathBuf::from(name)
    }

    pub fn path(&self) -> &Path {
        self.writer.path()
    }

    /// Flushes and closes the file, returning the number of records written.
    pub fn finish(self) -> Result<u64> {
        self.writer.finish()
    }
}

impl<K: Serialize, V: Serialize> ResultSink<K, V> for FileResultSink {
    fn store(&mut self, key: K, value: V) -> Result<()> {
        self.writer.write_plain(&key, &value)
    }
}

struct ResultCursor<K, V> {
    reader: RecordReader<K, V>,
    head: (K, V),
}

/// Forward-only merge over several key-sorted files.
///
/// Each step yields the smallest head record across all files. Exhausted
/// files are dropped as soon as they run dry; once none are left the
/// iterator is finished. A read error is yielded once, right after the last
/// good record, and ends the iteration.
pub struct ResultIter<K, V> {
    cursors: Vec<ResultCursor<K, V>>,
    pending_error: Option<CommonError>,
    failed: bool,
}

impl<K, V> ResultIter<K, V>
where
    K: DeserializeOwned + Ord,
    V: DeserializeOwned + Ord,
{
    pub fn from_files(paths: &[PathBuf], buffer_size: usize) -> Result<Self> {
        let mut cursors = Vec::with_capacity(paths.len());
        for path in paths {
            let mut reader = RecordReader::open(path, buffer_size)?;
            if let Some(head) = reader.next_record()? {
                cursors.push(ResultCursor { reader, head });
            }
        }
        Ok(Self {
            cursors,
            pending_error: None,
            failed: false,
        })
    }

    /// True once every file is exhausted.
    pub fn is_end(&self) -> bool {
        self.failed || (self.cursors.is_empty() && self.pending_error.is_none())
    }

    /// The record the next call to `next` returns, if any.
    pub fn peek(&self) -> Option<&(K, V)> {
        self.current().map(|index| &self.cursors[index].head)
    }

    fn current(&self) -> Option<usize> {
        if self.failed {
            return None;
        }
        let mut best: Option<usize> = None;
        for (index, cursor) in self.cursors.iter().enumerate() {
            match best {
                Some(b) if self.cursors[b].head <= cursor.head => {}
                _ => best = Some(index),
            }
        }
        best
    }
}

impl<K, V> Iterator for ResultIter<K, V>
where
    K: DeserializeOwned + Ord,
    V: DeserializeOwned + Ord,
{
    type Item = Result<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(e) = self.pending_error.take() {
            self.failed = true;
            return Some(Err(e));
        }
        let index = self.current()?;
        match self.cursors[index].reader.next_record() {
            Ok(Some(next)) => Some(Ok(std::mem::replace(&mut self.cursors[index].head, next))),
            Ok(None) => Some(Ok(self.cursors.swap_remove(index).head)),
            Err(e) => {
                self.pending_error = Some(e);
                Some(Ok(self.cursors.swap_remove(index).head))
            }
        }
    }
}
