//! Windowgate - Sliding Window Admission Control
//!
//! This crate enforces a per-client request quota over a rolling time window.
//! Each client's request history is kept as a compacted log in a shared
//! key-value store, so every stateless replica of an API sees the same quota.

pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
pub mod store;
