//! Per-client sliding window log.
//!
//! A client's history is a short list of buckets. Each bucket aggregates all
//! admitted requests seen during one compaction interval, so a log never
//! holds more than about `window / compaction` entries.

use serde::{Deserialize, Serialize};

/// Current version written by [`LogFormat::Versioned`].
pub const SCHEMA_VERSION: u32 = 1;

/// One compaction interval's worth of admitted requests.
///
/// Field names on the wire are fixed so that values written by other
/// implementations sharing the store stay readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    /// Seconds since the epoch at which this interval was opened
    #[serde(rename = "requestTimeStamp")]
    pub start_timestamp: i64,
    /// Requests admitted during the interval, always at least one
    #[serde(rename = "requestCount")]
    pub count: u64,
}

impl Bucket {
    pub fn new(start_timestamp: i64) -> Self {
        Self {
            start_timestamp,
            count: 1,
        }
    }
}

/// How a log is serialized when written back to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Bare JSON array of buckets, readable by existing deployments.
    #[default]
    Legacy,
    /// `{"version": 1, "buckets": [...]}`.
    Versioned,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredLog {
    Versioned { version: u32, buckets: Vec<Bucket> },
    Legacy(Vec<Bucket>),
}

#[derive(Serialize)]
struct VersionedRef<'a> {
    version: u32,
    buckets: &'a [Bucket],
}

/// The ordered bucket history of a single client.
///
/// Buckets are strictly increasing by start timestamp and every count is at
/// least one. A decoded log is never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientWindowLog {
    buckets: Vec<Bucket>,
}

impl ClientWindowLog {
    /// Log for a client's very first admitted request.
    pub fn first_request(now: i64) -> Self {
        Self {
            buckets: vec![Bucket::new(now)],
        }
    }

    pub fn buckets(&self) -> &[Bucket] {
        &self.buckets
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Sum of counts over buckets opened strictly after `window_start`.
    pub fn total_since(&self, window_start: i64) -> u64 {
        self.in_window(window_start).map(|b| b.count).sum()
    }

    fn in_window(&self, window_start: i64) -> impl Iterator<Item = &Bucket> {
        self.buckets
            .iter()
            .filter(move |b| b.start_timestamp > window_start)
    }

    /// Record one admitted request at `now`.
    ///
    /// The request is folded into the last bucket while that bucket is
    /// younger than `compaction_secs`; otherwise a new bucket is opened.
    pub fn record(&mut self, now: i64, compaction_secs: i64) {
        let cutoff = now.saturating_sub(compaction_secs);
        match self.buckets.last_mut() {
            Some(last) if last.start_timestamp > cutoff => last.count += 1,
            _ => self.buckets.push(Bucket::new(now)),
        }
    }

    /// Drop buckets that can no longer fall inside any future window.
    pub fn prune(&mut self, window_start: i64) {
        self.buckets.retain(|b| b.start_timestamp > window_start);
    }

    /// Seconds until enough in-window buckets age out for one more request
    /// to fit under `max_requests`.
    pub fn retry_after(&self, now: i64, window_secs: i64, max_requests: u64) -> i64 {
        let window_start = now.saturating_sub(window_secs);
        let total = self.total_since(window_start);
        if total < max_requests {
            return 0;
        }

        let must_expire = total - max_requests + 1;
        let mut expired = 0;
        for bucket in self.in_window(window_start) {
            expired += bucket.count;
            if expired >= must_expire {
                return (bucket.start_timestamp.saturating_add(window_secs) - now).max(1);
            }
        }
        window_secs
    }

    /// Parse a stored value in either the legacy or the versioned layout.
    pub fn decode(raw: &str) -> Result<Self, String> {
        let buckets = match serde_json::from_str::<StoredLog>(raw).map_err(|e| e.to_string())? {
            StoredLog::Legacy(buckets) => buckets,
            StoredLog::Versioned { version, buckets } if version == SCHEMA_VERSION => buckets,
            StoredLog::Versioned { version, .. } => {
                return Err(format!("unsupported log schema version {}", version));
            }
        };

        if buckets.is_empty() {
            return Err("log has no buckets".to_string());
        }
        for (i, bucket) in buckets.iter().enumerate() {
            if bucket.count == 0 {
                return Err(format!("bucket {} has a zero count", i));
            }
            if bucket.start_timestamp < 0 {
                return Err(format!("bucket {} has a negative timestamp", i));
            }
            if i > 0 && buckets[i - 1].start_timestamp >= bucket.start_timestamp {
                return Err(format!("bucket {} is out of order", i));
            }
        }

        Ok(Self { buckets })
    }

    /// Serialize the log for the store.
    pub fn encode(&self, format: LogFormat) -> Result<String, serde_json::Error> {
        match format {
            LogFormat::Legacy => serde_json::to_string(&self.buckets),
            LogFormat::Versioned => serde_json::to_string(&VersionedRef {
                version: SCHEMA_VERSION,
                buckets: &self.buckets,
            }),
        }
    }
}
