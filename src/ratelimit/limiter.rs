//! Sliding window log rate limiter.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace, warn};

use super::window_log::{Bucket, ClientWindowLog, LogFormat};
use crate::error::{Result, WindowGateError};
use crate::store::{KeyValueStore, StoreError};

/// Default CAS attempts before an evaluation gives up on a hot key.
pub const DEFAULT_MAX_CAS_ATTEMPTS: u32 = 8;

/// Errors surfaced by [`WindowLimiter::evaluate`].
///
/// A quota rejection is not an error; it is [`Decision::Deny`].
#[derive(Debug, Error)]
pub enum LimiterError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// How the read-modify-write against the store is performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyMode {
    /// Plain `get` then `set`.
    ///
    /// Two evaluations for the same client that both read before either
    /// writes can both be allowed, and the later write discards the
    /// earlier one's update. Under concurrent load from one client the
    /// effective limit can therefore be exceeded.
    Unsynchronized,
    /// Write with `compare_and_set` against the value that was read, and
    /// re-evaluate on conflict. Allow decisions are serialized per client.
    #[default]
    CompareAndSwap,
}

/// Immutable limiter settings.
#[derive(Debug, Clone)]
pub struct WindowSettings {
    /// Length of the rolling window
    pub window_size: Duration,
    /// Requests permitted inside one window
    pub max_requests: u64,
    /// Width of a single bucket; must not exceed `window_size`
    pub compaction_interval: Duration,
    /// Prepended to client keys to form store keys
    pub key_prefix: String,
    pub consistency: ConsistencyMode,
    /// Total attempts in compare-and-swap mode
    pub max_cas_attempts: u32,
    /// Drop buckets older than the window on every write
    pub prune_on_write: bool,
    pub log_format: LogFormat,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            window_size: Duration::from_secs(24 * 3600),
            max_requests: 110,
            compaction_interval: Duration::from_secs(3600),
            key_prefix: String::new(),
            consistency: ConsistencyMode::default(),
            max_cas_attempts: DEFAULT_MAX_CAS_ATTEMPTS,
            prune_on_write: true,
            log_format: LogFormat::default(),
        }
    }
}

impl WindowSettings {
    /// Check the settings for internal consistency.
    pub fn validate(&self) -> Result<()> {
        if self.window_size.as_secs() == 0 {
            return Err(WindowGateError::Config(
                "window size must be at least one second".to_string(),
            ));
        }
        if self.compaction_interval.as_secs() == 0 {
            return Err(WindowGateError::Config(
                "compaction interval must be at least one second".to_string(),
            ));
        }
        if self.compaction_interval > self.window_size {
            return Err(WindowGateError::Config(format!(
                "compaction interval ({}s) exceeds window size ({}s)",
                self.compaction_interval.as_secs(),
                self.window_size.as_secs()
            )));
        }
        if self.max_requests == 0 {
            return Err(WindowGateError::Config(
                "max requests must be greater than zero".to_string(),
            ));
        }
        if self.max_cas_attempts == 0 {
            return Err(WindowGateError::Config(
                "max CAS attempts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    fn window_secs(&self) -> i64 {
        i64::try_from(self.window_size.as_secs()).unwrap_or(i64::MAX)
    }

    fn compaction_secs(&self) -> i64 {
        i64::try_from(self.compaction_interval.as_secs()).unwrap_or(i64::MAX)
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Proceed. `remaining` is the quota left after this request.
    Allow { remaining: u64 },
    /// Reject. Carries the configured limit and window for the caller's message.
    Deny {
        limit: u64,
        window: Duration,
        retry_after: Duration,
    },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow { .. })
    }
}

/// Read-only view of a client's quota.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaSnapshot {
    pub client_key: String,
    pub limit: u64,
    pub window_secs: u64,
    pub total_in_window: u64,
    pub remaining: u64,
    pub buckets: Vec<Bucket>,
}

/// What one pass over the stored value decided.
struct Outcome {
    decision: Decision,
    /// Encoded log to write back; `None` on deny.
    write: Option<String>,
}

/// Enforces a per-client quota over a rolling window, keeping each client's
/// log in a shared [`KeyValueStore`].
///
/// The limiter holds no per-client state of its own and can be shared across
/// tasks behind an `Arc`.
pub struct WindowLimiter {
    store: Arc<dyn KeyValueStore>,
    settings: WindowSettings,
}

impl WindowLimiter {
    /// Create a limiter over an already connected store.
    pub fn new(store: Arc<dyn KeyValueStore>, settings: WindowSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self { store, settings })
    }

    pub fn settings(&self) -> &WindowSettings {
        &self.settings
    }

    /// Decide whether the client identified by `client_key` may make a
    /// request at `now` (seconds since the epoch).
    ///
    /// On allow the updated log is written back in full. On deny nothing is
    /// written, so the rejected request does not count against the client.
    /// A negative `now` is rejected before the store is touched, since the
    /// stored log cannot hold timestamps before the epoch.
    pub async fn evaluate(
        &self,
        client_key: &str,
        now: i64,
    ) -> std::result::Result<Decision, LimiterError> {
        let key = self.store_key(client_key)?;
        check_timestamp(now)?;

        trace!(client_key = %client_key, now = now, "Evaluating window quota");

        match self.settings.consistency {
            ConsistencyMode::Unsynchronized => self.evaluate_unsynchronized(&key, now).await,
            ConsistencyMode::CompareAndSwap => self.evaluate_compare_and_swap(&key, now).await,
        }
    }

    async fn evaluate_unsynchronized(
        &self,
        key: &str,
        now: i64,
    ) -> std::result::Result<Decision, LimiterError> {
        let current = self.store.get(key).await?;
        let outcome = self.decide(key, current.as_deref(), now)?;

        if let Some(value) = outcome.write {
            self.store.set(key, &value).await?;
        }
        Ok(outcome.decision)
    }

    async fn evaluate_compare_and_swap(
        &self,
        key: &str,
        now: i64,
    ) -> std::result::Result<Decision, LimiterError> {
        let attempts = self.settings.max_cas_attempts;

        for attempt in 1..=attempts {
            let current = self.store.get(key).await?;
            let outcome = self.decide(key, current.as_deref(), now)?;

            let Some(value) = outcome.write else {
                return Ok(outcome.decision);
            };

            if self
                .store
                .compare_and_set(key, current.as_deref(), &value)
                .await?
            {
                return Ok(outcome.decision);
            }

            debug!(key = %key, attempt = attempt, "Concurrent update detected, re-evaluating");
        }

        Err(StoreError::Contention {
            key: key.to_string(),
            attempts,
        }
        .into())
    }

    /// Apply the window rule to the raw stored value.
    fn decide(
        &self,
        key: &str,
        current: Option<&str>,
        now: i64,
    ) -> std::result::Result<Outcome, StoreError> {
        let max_requests = self.settings.max_requests;

        let Some(raw) = current else {
            let log = ClientWindowLog::first_request(now);
            return Ok(Outcome {
                decision: Decision::Allow {
                    remaining: max_requests - 1,
                },
                write: Some(log.encode(self.settings.log_format)?),
            });
        };

        let mut log = self.decode(key, raw)?;
        let window_secs = self.settings.window_secs();
        let window_start = now.saturating_sub(window_secs);
        let total = log.total_since(window_start);

        if total >= max_requests {
            let retry_after = log.retry_after(now, window_secs, max_requests);
            debug!(
                key = %key,
                total = total,
                limit = max_requests,
                retry_after = retry_after,
                "Window quota exceeded"
            );
            return Ok(Outcome {
                decision: Decision::Deny {
                    limit: max_requests,
                    window: self.settings.window_size,
                    retry_after: Duration::from_secs(retry_after.max(0) as u64),
                },
                write: None,
            });
        }

        log.record(now, self.settings.compaction_secs());
        if self.settings.prune_on_write {
            log.prune(window_start);
        }

        Ok(Outcome {
            decision: Decision::Allow {
                remaining: max_requests - total - 1,
            },
            write: Some(log.encode(self.settings.log_format)?),
        })
    }

    fn decode(&self, key: &str, raw: &str) -> std::result::Result<ClientWindowLog, StoreError> {
        ClientWindowLog::decode(raw).map_err(|reason| {
            warn!(key = %key, reason = %reason, "Refusing to evaluate corrupt window log");
            StoreError::Corrupt {
                key: key.to_string(),
                reason,
            }
        })
    }

    /// Current quota for a client without consuming any of it.
    pub async fn inspect(
        &self,
        client_key: &str,
        now: i64,
    ) -> std::result::Result<QuotaSnapshot, LimiterError> {
        let key = self.store_key(client_key)?;
        check_timestamp(now)?;
        let max_requests = self.settings.max_requests;
        let window_start = now.saturating_sub(self.settings.window_secs());

        let (total_in_window, buckets) = match self.store.get(&key).await? {
            Some(raw) => {
                let log = self.decode(&key, &raw)?;
                (log.total_since(window_start), log.buckets().to_vec())
            }
            None => (0, Vec::new()),
        };

        Ok(QuotaSnapshot {
            client_key: client_key.to_string(),
            limit: max_requests,
            window_secs: self.settings.window_size.as_secs(),
            total_in_window,
            remaining: max_requests.saturating_sub(total_in_window),
            buckets,
        })
    }

    fn store_key(&self, client_key: &str) -> std::result::Result<String, LimiterError> {
        if client_key.is_empty() {
            return Err(LimiterError::InvalidInput(
                "client key must not be empty".to_string(),
            ));
        }
        Ok(format!("{}{}", self.settings.key_prefix, client_key))
    }
}

fn check_timestamp(now: i64) -> std::result::Result<(), LimiterError> {
    if now < 0 {
        return Err(LimiterError::InvalidInput(format!(
            "timestamp {} is before the epoch",
            now
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    const HOUR: u64 = 3600;

    fn settings(max_requests: u64) -> WindowSettings {
        WindowSettings {
            max_requests,
            ..WindowSettings::default()
        }
    }

    fn limiter_with(store: Arc<MemoryStore>, settings: WindowSettings) -> WindowLimiter {
        WindowLimiter::new(store, settings).unwrap()
    }

    #[test]
    fn test_settings_validation() {
        assert!(WindowSettings::default().validate().is_ok());

        let bad = [
            WindowSettings {
                window_size: Duration::ZERO,
                ..WindowSettings::default()
            },
            WindowSettings {
                compaction_interval: Duration::ZERO,
                ..WindowSettings::default()
            },
            WindowSettings {
                compaction_interval: Duration::from_secs(25 * HOUR),
                ..WindowSettings::default()
            },
            WindowSettings {
                max_requests: 0,
                ..WindowSettings::default()
            },
            WindowSettings {
                max_cas_attempts: 0,
                ..WindowSettings::default()
            },
        ];
        for settings in bad {
            assert!(matches!(settings.validate(), Err(WindowGateError::Config(_))));
        }
    }

    #[tokio::test]
    async fn test_cold_start_allows_and_writes_single_bucket() {
        let store = Arc::new(MemoryStore::new());
        let limiter = limiter_with(store.clone(), settings(110));

        let decision = limiter.evaluate("10.0.0.1", 1_000).await.unwrap();
        assert_eq!(decision, Decision::Allow { remaining: 109 });

        let raw = store.get("10.0.0.1").await.unwrap().unwrap();
        assert_eq!(raw, r#"[{"requestTimeStamp":1000,"requestCount":1}]"#);
    }

    #[tokio::test]
    async fn test_empty_client_key_is_invalid_input() {
        let store = Arc::new(MemoryStore::new());
        let limiter = limiter_with(store.clone(), settings(5));

        let result = limiter.evaluate("", 0).await;
        assert!(matches!(result, Err(LimiterError::InvalidInput(_))));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_negative_timestamp_is_invalid_input() {
        let store = Arc::new(MemoryStore::new());
        let limiter = limiter_with(store.clone(), settings(5));

        assert!(matches!(
            limiter.evaluate("c", -5).await,
            Err(LimiterError::InvalidInput(_))
        ));
        assert!(matches!(
            limiter.inspect("c", -5).await,
            Err(LimiterError::InvalidInput(_))
        ));
        assert!(store.is_empty());

        // The key is still usable from the epoch on
        assert_eq!(
            limiter.evaluate("c", 0).await.unwrap(),
            Decision::Allow { remaining: 4 }
        );
    }

    #[tokio::test]
    async fn test_every_written_log_decodes() {
        let store = Arc::new(MemoryStore::new());
        let limiter = limiter_with(store.clone(), settings(4));

        for now in [0, 1, 3599, 3600, 7300, 7301, 90_000, 90_000] {
            limiter.evaluate("c", now).await.unwrap();
            let raw = store.get("c").await.unwrap().unwrap();
            assert!(ClientWindowLog::decode(&raw).is_ok(), "unreadable {:?}", raw);
        }
        assert!(limiter.evaluate("c", 90_001).await.is_ok());
    }

    #[tokio::test]
    async fn test_key_prefix_applied() {
        let store = Arc::new(MemoryStore::new());
        let limiter = limiter_with(
            store.clone(),
            WindowSettings {
                key_prefix: "quota:".to_string(),
                ..WindowSettings::default()
            },
        );

        limiter.evaluate("client", 0).await.unwrap();
        assert!(store.get("quota:client").await.unwrap().is_some());
        assert!(store.get("client").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_deny_at_limit_carries_limit_and_window() {
        let store = Arc::new(MemoryStore::new());
        let limiter = limiter_with(store.clone(), settings(3));

        for t in 0..3 {
            assert!(limiter.evaluate("c", t).await.unwrap().is_allowed());
        }

        match limiter.evaluate("c", 10).await.unwrap() {
            Decision::Deny {
                limit,
                window,
                retry_after,
            } => {
                assert_eq!(limit, 3);
                assert_eq!(window, Duration::from_secs(24 * HOUR));
                assert_eq!(retry_after, Duration::from_secs(24 * HOUR - 10));
            }
            other => panic!("expected deny, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_corrupt_value_is_store_error_and_left_untouched() {
        let store = Arc::new(MemoryStore::new());
        store.set("c", "{garbage").await.unwrap();
        let limiter = limiter_with(store.clone(), settings(3));

        let result = limiter.evaluate("c", 0).await;
        assert!(matches!(
            result,
            Err(LimiterError::Store(StoreError::Corrupt { .. }))
        ));
        assert_eq!(store.get("c").await.unwrap().as_deref(), Some("{garbage"));
    }

    #[tokio::test]
    async fn test_versioned_format_written_when_configured() {
        let store = Arc::new(MemoryStore::new());
        let limiter = limiter_with(
            store.clone(),
            WindowSettings {
                log_format: LogFormat::Versioned,
                ..WindowSettings::default()
            },
        );

        limiter.evaluate("c", 7).await.unwrap();
        let raw = store.get("c").await.unwrap().unwrap();
        assert_eq!(
            raw,
            r#"{"version":1,"buckets":[{"requestTimeStamp":7,"requestCount":1}]}"#
        );
    }

    #[tokio::test]
    async fn test_prune_on_write_drops_expired_buckets() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(
                "c",
                r#"[{"requestTimeStamp":0,"requestCount":4},{"requestTimeStamp":7200,"requestCount":1}]"#,
            )
            .await
            .unwrap();
        let limiter = limiter_with(store.clone(), settings(10));

        let now = (24 * HOUR + 10) as i64;
        limiter.evaluate("c", now).await.unwrap();

        let raw = store.get("c").await.unwrap().unwrap();
        let log = ClientWindowLog::decode(&raw).unwrap();
        assert_eq!(
            log.buckets(),
            &[
                Bucket {
                    start_timestamp: 7200,
                    count: 1
                },
                Bucket::new(now)
            ]
        );
    }

    #[tokio::test]
    async fn test_without_pruning_log_keeps_history() {
        let store = Arc::new(MemoryStore::new());
        let limiter = limiter_with(
            store.clone(),
            WindowSettings {
                prune_on_write: false,
                ..settings(10)
            },
        );

        limiter.evaluate("c", 0).await.unwrap();
        limiter.evaluate("c", (48 * HOUR) as i64).await.unwrap();

        let snapshot = limiter.inspect("c", (48 * HOUR) as i64).await.unwrap();
        assert_eq!(snapshot.buckets.len(), 2);
        assert_eq!(snapshot.total_in_window, 1);
    }

    #[tokio::test]
    async fn test_inspect_does_not_consume_quota() {
        let store = Arc::new(MemoryStore::new());
        let limiter = limiter_with(store.clone(), settings(5));

        let snapshot = limiter.inspect("c", 0).await.unwrap();
        assert_eq!(snapshot.total_in_window, 0);
        assert_eq!(snapshot.remaining, 5);
        assert!(store.is_empty());

        limiter.evaluate("c", 0).await.unwrap();
        limiter.evaluate("c", 1).await.unwrap();

        let snapshot = limiter.inspect("c", 2).await.unwrap();
        assert_eq!(snapshot.total_in_window, 2);
        assert_eq!(snapshot.remaining, 3);
        assert_eq!(snapshot.limit, 5);
        assert_eq!(snapshot.window_secs, 24 * HOUR);
    }

    #[tokio::test]
    async fn test_unsynchronized_mode_sequential_behavior_matches() {
        let store = Arc::new(MemoryStore::new());
        let limiter = limiter_with(
            store.clone(),
            WindowSettings {
                consistency: ConsistencyMode::Unsynchronized,
                ..settings(2)
            },
        );

        assert!(limiter.evaluate("c", 0).await.unwrap().is_allowed());
        assert!(limiter.evaluate("c", 1).await.unwrap().is_allowed());
        assert!(!limiter.evaluate("c", 2).await.unwrap().is_allowed());
    }
}
