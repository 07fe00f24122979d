//! Sliding window log rate limiting.

mod limiter;
mod window_log;

pub use limiter::{
    ConsistencyMode, Decision, LimiterError, QuotaSnapshot, WindowLimiter, WindowSettings,
    DEFAULT_MAX_CAS_ATTEMPTS,
};
pub use window_log::{Bucket, ClientWindowLog, LogFormat, SCHEMA_VERSION};
