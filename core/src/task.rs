//! User-supplied map and reduce logic, and the handles they emit through.

use spillmr_common::Result;

use crate::record::Datum;
use crate::shuffle::results::ResultSink;

/// Turns one input record into any number of intermediate records.
pub trait MapTask: Send + Sync {
    type InputKey: Send;
    type InputValue: Send;
    type Key: Datum;
    type Value: Datum;

    fn process(
        &self,
        runtime: &mut MapRuntime<'_, Self::Key, Self::Value>,
        key: Self::InputKey,
        value: Self::InputValue,
    ) -> Result<()>;
}

/// Receives one key with all of its intermediate values.
pub trait ReduceTask<K, V>: Send + Sync {
    type OutputKey;
    type OutputValue;

    fn process(
        &self,
        runtime: &mut ReduceRuntime<'_, Self::OutputKey, Self::OutputValue>,
        key: &K,
        values: &[V],
    ) -> Result<()>;
}

/// Handed to a [`MapTask`]; routes emitted records into the worker's store.
pub struct MapRuntime<'a, K, V> {
    store: &'a mut dyn ResultSink<K, V>,
    emitted: u64,
}

impl<'a, K, V> MapRuntime<'a, K, V> {
    pub fn new(store: &'a mut dyn ResultSink<K, V>) -> Self {
        Self { store, emitted: 0 }
    }

    pub fn emit_intermediate(&mut self, key: K, value: V) -> Result<()> {
        self.store.store(key, value)?;
        self.emitted += 1;
        Ok(())
    }

    pub fn emitted(&self) -> u64 {
        self.emitted
    }
}

/// Handed to a [`ReduceTask`]; forwards final records to the active sink.
pub struct ReduceRuntime<'a, K, V> {
    sink: &'a mut dyn ResultSink<K, V>,
    emitted: u64,
}

impl<'a, K, V> ReduceRuntime<'a, K, V> {
    pub fn new(sink: &'a mut dyn ResultSink<K, V>) -> Self {
        Self { sink, emitted: 0 }
    }

    /// Writes one output record straight through to the sink, unbuffered.
    pub fn emit(&mut self, key: K, value: V) -> Result<()> {
        self.sink.store(key, value)?;
        self.emitted += 1;
        Ok(())
    }

    pub fn emitted(&self) -> u64 {
        self.emitted
    }
}
