#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Barrier;

use windowgate::ratelimit::{ClientWindowLog, WindowLimiter, WindowSettings};
use windowgate::store::{KeyValueStore, MemoryStore, StoreError};

pub const HOUR: u64 = 3600;

/// Reference settings: 110 requests per 24h, bucketed hourly.
pub fn reference_settings() -> WindowSettings {
    WindowSettings::default()
}

pub fn settings(window_secs: u64, max_requests: u64, compaction_secs: u64) -> WindowSettings {
    WindowSettings {
        window_size: Duration::from_secs(window_secs),
        max_requests,
        compaction_interval: Duration::from_secs(compaction_secs),
        ..WindowSettings::default()
    }
}

pub fn limiter(store: Arc<dyn KeyValueStore>, settings: WindowSettings) -> WindowLimiter {
    WindowLimiter::new(store, settings).expect("valid settings")
}

pub async fn stored_log(store: &dyn KeyValueStore, key: &str) -> ClientWindowLog {
    let raw = store.get(key).await.unwrap().expect("log present");
    ClientWindowLog::decode(&raw).unwrap()
}

/// Store whose first `gated` reads block until that many readers arrive,
/// forcing concurrent evaluations to all read before any of them writes.
pub struct GatedStore {
    pub inner: MemoryStore,
    barrier: Barrier,
    gated: usize,
    reads: AtomicUsize,
}

impl GatedStore {
    pub fn new(gated: usize) -> Self {
        Self {
            inner: MemoryStore::new(),
            barrier: Barrier::new(gated),
            gated,
            reads: AtomicUsize::new(0),
        }
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyValueStore for GatedStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value = self.inner.get(key).await?;
        if self.reads.fetch_add(1, Ordering::SeqCst) < self.gated {
            self.barrier.wait().await;
        }
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.inner.set(key, value).await
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
    ) -> Result<bool, StoreError> {
        self.inner.compare_and_set(key, expected, value).await
    }
}

/// Store that yields to the scheduler after every read, so evaluations
/// polled together all read before any of them writes back.
#[derive(Default)]
pub struct YieldingStore {
    pub inner: MemoryStore,
    conflicts: AtomicUsize,
}

impl YieldingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Conditional writes rejected because the value had changed.
    pub fn conflicts(&self) -> usize {
        self.conflicts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyValueStore for YieldingStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value = self.inner.get(key).await?;
        tokio::task::yield_now().await;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.inner.set(key, value).await
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
    ) -> Result<bool, StoreError> {
        let swapped = self.inner.compare_and_set(key, expected, value).await?;
        if !swapped {
            self.conflicts.fetch_add(1, Ordering::SeqCst);
        }
        Ok(swapped)
    }
}

/// Store whose every operation fails, standing in for an unreachable backend.
#[derive(Debug, Default)]
pub struct FailingStore;

#[async_trait]
impl KeyValueStore for FailingStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Err(StoreError::Backend("connection refused".to_string()))
    }

    async fn set(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
        Err(StoreError::Backend("connection refused".to_string()))
    }

    async fn compare_and_set(
        &self,
        _key: &str,
        _expected: Option<&str>,
        _value: &str,
    ) -> Result<bool, StoreError> {
        Err(StoreError::Backend("connection refused".to_string()))
    }
}
