//! Shared key-value store abstraction.
//!
//! The limiter keeps no per-client state in process. Every evaluation reads
//! the client's log from a [`KeyValueStore`] and writes the whole log back,
//! so all replicas pointed at the same store share one quota.

mod memory;
mod redis_store;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::config::{StoreBackend, StoreConfig};
use crate::error::{Result, WindowGateError};

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

/// Errors that can occur while talking to the store or interpreting its contents.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend failure: {0}")]
    Backend(String),
    #[error("corrupt value stored under {key}: {reason}")]
    Corrupt { key: String, reason: String },
    #[error("failed to encode window log: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("gave up updating {key} after {attempts} conflicting attempts")]
    Contention { key: String, attempts: u32 },
}

/// String-valued key-value store shared by every limiter process.
///
/// `get` and `set` are plain single-key operations with no atomicity
/// between them. `compare_and_set` is the conditional write used when the
/// limiter runs in compare-and-swap mode.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Fetch the raw value stored under `key`.
    async fn get(&self, key: &str) -> std::result::Result<Option<String>, StoreError>;

    /// Replace the value stored under `key`.
    async fn set(&self, key: &str, value: &str) -> std::result::Result<(), StoreError>;

    /// Replace the value under `key` only if it currently equals `expected`
    /// (`None` meaning the key must be absent).
    ///
    /// Returns `false` without writing when the current value differs.
    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
    ) -> std::result::Result<bool, StoreError>;
}

/// Build the store handle described by the configuration.
///
/// The handle is created once per process and shared by every request.
pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn KeyValueStore>> {
    match config.backend {
        StoreBackend::Memory => {
            info!("Using in-process memory store; quotas are not shared between processes");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Redis => {
            let url = config.url.as_deref().ok_or_else(|| {
                WindowGateError::Config("store.url is required for the redis backend".to_string())
            })?;
            let store = RedisStore::connect(url).await?;
            Ok(Arc::new(store))
        }
    }
}
