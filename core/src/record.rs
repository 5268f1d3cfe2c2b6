//! On-disk record format for intermediate and output files.
//!
//! One record per line: the key and the value each rendered as compact JSON,
//! separated by [`FIELD_DELIMITER`] and terminated by [`RECORD_TERMINATOR`].
//! JSON escapes every control character inside strings, so neither byte can
//! appear inside a field and payloads may carry newlines freely.
//!
//! Final output is written in plain form: a string field is written bare
//! when the bare text holds neither delimiter and is not itself valid JSON.
//! Decoding accepts both forms, so output files read back like any other.

use serde::Serialize;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde_json::Value;
use std::fmt::Debug;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use spillmr_common::{CommonError, Result};

pub const FIELD_DELIMITER: u8 = b'\t';
pub const RECORD_TERMINATOR: u8 = b'\r';

/// A type usable as an intermediate key or value.
///
/// Keys are grouped by `Ord`; records are deduplicated and merged by the
/// ordering of the whole `(key, value)` tuple.
pub trait Datum: Serialize + DeserializeOwned + Ord + Clone + Debug + Send + 'static {}
impl<T> Datum for T where T: Serialize + DeserializeOwned + Ord + Clone + Debug + Send + 'static {}

/// Appends one encoded record, terminator included, to `out`.
pub fn encode_record<K: Serialize, V: Serialize>(key: &K, value: &V, out: &mut Vec<u8>) -> Result<()> {
    serde_json::to_writer(&mut *out, key)
        .map_err(|e| CommonError::serialization_error_with_source("Failed to encode key", e))?;
    out.push(FIELD_DELIMITER);
    serde_json::to_writer(&mut *out, value)
        .map_err(|e| CommonError::serialization_error_with_source("Failed to encode value", e))?;
    out.push(RECORD_TERMINATOR);
    Ok(())
}

/// Like [`encode_record`], but string fields are written bare where that
/// stays unambiguous.
pub fn encode_plain_record<K: Serialize, V: Serialize>(
    key: &K,
    value: &V,
    out: &mut Vec<u8>,
) -> Result<()> {
    encode_plain_field(key, out)
        .map_err(|e| CommonError::serialization_error_with_source("Failed to encode key", e))?;
    out.push(FIELD_DELIMITER);
    encode_plain_field(value, out)
        .map_err(|e| CommonError::serialization_error_with_source("Failed to encode value", e))?;
    out.push(RECORD_TERMINATOR);
    Ok(())
}

fn encode_plain_field<T: Serialize>(field: &T, out: &mut Vec<u8>) -> serde_json::Result<()> {
    match serde_json::to_value(field)? {
        Value::String(text) if is_plain(&text) => {
            out.extend_from_slice(text.as_bytes());
            Ok(())
        }
        value => serde_json::to_writer(&mut *out, &value),
    }
}

fn is_plain(text: &str) -> bool {
    !text
        .bytes()
        .any(|b| b == FIELD_DELIMITER || b == RECORD_TERMINATOR)
        && serde_json::from_str::<IgnoredAny>(text).is_err()
}

/// Decodes one field. Bytes that are not JSON are taken as a bare string.
fn decode_field<T: DeserializeOwned>(bytes: &[u8], what: &str) -> Result<T> {
    let err = match serde_json::from_slice(bytes) {
        Ok(field) => return Ok(field),
        Err(e) => e,
    };
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|text| serde_json::from_value(Value::String(text.to_string())).ok())
        .ok_or_else(|| {
            CommonError::deserialization_error_with_source(format!("Failed to decode {}", what), err)
        })
}

/// Decodes one line with the terminator already stripped.
pub fn decode_record<K: DeserializeOwned, V: DeserializeOwned>(line: &[u8]) -> Result<(K, V)> {
    let split = line
        .iter()
        .position(|b| *b == FIELD_DELIMITER)
        .ok_or_else(|| {
            CommonError::deserialization_error(format!(
                "Record has no field delimiter: {:?}",
                String::from_utf8_lossy(line)
            ))
        })?;
    let key = decode_field(&line[..split], "key")?;
    let value = decode_field(&line[split + 1..], "value")?;
    Ok((key, value))
}

/// Buffered record sink over one file.
pub struct RecordWriter {
    path: PathBuf,
    inner: BufWriter<File>,
    line: Vec<u8>,
    records: u64,
}

impl RecordWriter {
    /// Creates or truncates `path`.
    pub fn create(path: &Path, buffer_size: usize) -> Result<Self> {
        let file = File::create(path).map_err(|e| {
            CommonError::io_error_with_source(format!("Failed to create {}", path.display()), e)
        })?;
        Ok(Self::from_file(path, file, buffer_size))
    }

    /// Opens `path` for appending, creating it if needed.
    pub fn append(path: &Path, buffer_size: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| {
                CommonError::io_error_with_source(format!("Failed to open {}", path.display()), e)
            })?;
        Ok(Self::from_file(path, file, buffer_size))
    }

    fn from_file(path: &Path, file: File, buffer_size: usize) -> Self {
        Self {
            path: path.to_path_buf(),
            inner: BufWriter::with_capacity(buffer_size, file),
            line: Vec::new(),
            records: 0,
        }
    }

    pub fn write<K: Serialize, V: Serialize>(&mut self, key: &K, value: &V) -> Result<()> {
        self.write_repeated(key, value, 1)
    }

    /// Writes one record in plain form, see [`encode_plain_record`].
    pub fn write_plain<K: Serialize, V: Serialize>(&mut self, key: &K, value: &V) -> Result<()> {
        self.line.clear();
        encode_plain_record(key, value, &mut self.line)?;
        self.write_line(1)
    }

    /// Writes the same record `count` times, encoding it once.
    pub fn write_repeated<K: Serialize, V: Serialize>(
        &mut self,
        key: &K,
        value: &V,
        count: u64,
    ) -> Result<()> {
        self.line.clear();
        encode_record(key, value, &mut self.line)?;
        self.write_line(count)
    }

    fn write_line(&mut self, count: u64) -> Result<()> {
        for _ in 0..count {
            self.inner.write_all(&self.line).map_err(|e| {
                CommonError::io_error_with_source(
                    format!("Failed to write record to {}", self.path.display()),
                    e,
                )
            })?;
        }
        self.records += count;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush().map_err(|e| {
            CommonError::io_error_with_source(format!("Failed to flush {}", self.path.display()), e)
        })
    }

    /// Flushes and closes the file, returning the number of records written.
    pub fn finish(mut self) -> Result<u64> {
        self.flush()?;
        Ok(self.records)
    }

    pub fn records_written(&self) -> u64 {
        self.records
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Sequential record cursor over one file.
pub struct RecordReader<K, V> {
    path: PathBuf,
    inner: BufReader<File>,
    line: Vec<u8>,
    _phantom: PhantomData<(K, V)>,
}

impl<K: DeserializeOwned, V: DeserializeOwned> RecordReader<K, V> {
    pub fn open(path: &Path, buffer_size: usize) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            CommonError::io_error_with_source(format!("Failed to open {}", path.display()), e)
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            inner: BufReader::with_capacity(buffer_size, file),
            line: Vec::new(),
            _phantom: PhantomData,
        })
    }

    /// Reads the next record, `None` at end of file.
    pub fn next_record(&mut self) -> Result<Option<(K, V)>> {
        loop {
            self.line.clear();
            let read = self
                .inner
                .read_until(RECORD_TERMINATOR, &mut self.line)
                .map_err(|e| {
                    CommonError::io_error_with_source(
                        format!("Failed to read {}", self.path.display()),
                        e,
                    )
                })?;
            if read == 0 {
                return Ok(None);
            }
            if self.line.last() == Some(&RECORD_TERMINATOR) {
                self.line.pop();
            }
            if self.line.is_empty() {
                continue;
            }
            return decode_record(&self.line).map(Some);
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<K: DeserializeOwned, V: DeserializeOwned> Iterator for RecordReader<K, V> {
    type Item = Result<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

/// Reads a whole file into memory. Test and tooling helper.
pub fn read_all<K: DeserializeOwned, V: DeserializeOwned>(
    path: &Path,
    buffer_size: usize,
) -> Result<Vec<(K, V)>> {
    RecordReader::open(path, buffer_size)?.collect()
}
