//! Instrumented store wrappers for concurrency and failure-injection tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{BlobStore, MemoryStore};
use crate::error::Result;
use crate::Error;

/// Wraps a MemoryStore and records the total and peak-concurrent number of
/// in-flight gets. Each get parks briefly so concurrently issued loads
/// overlap and register in the peak.
pub(crate) struct CountingStore {
    inner: MemoryStore,
    pub gets: AtomicUsize,
    in_flight: AtomicUsize,
    pub peak_in_flight: AtomicUsize,
}

impl CountingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryStore::new(),
            gets: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        })
    }

    pub fn reset_counters(&self) {
        self.gets.store(0, Ordering::SeqCst);
        self.in_flight.store(0, Ordering::SeqCst);
        self.peak_in_flight.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl BlobStore for CountingStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(5)).await;
        let result = self.inner.get(key).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.inner.set(key, value).await
    }
}

/// Wraps a MemoryStore and fails every set while armed.
pub(crate) struct FailingStore {
    inner: MemoryStore,
    fail_sets: AtomicBool,
}

impl FailingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryStore::new(),
            fail_sets: AtomicBool::new(false),
        })
    }

    pub fn fail_sets(&self, armed: bool) {
        self.fail_sets.store(armed, Ordering::SeqCst);
    }
}

#[async_trait]
impl BlobStore for FailingStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        if self.fail_sets.load(Ordering::SeqCst) {
            return Err(Error::IO("injected set failure".to_string()));
        }
        self.inner.set(key, value).await
    }
}
