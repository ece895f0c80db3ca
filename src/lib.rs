//! Tollgate - In-Process Token Bucket Rate Limiting
//!
//! This crate implements a per-key token bucket rate limiter that allows short
//! bursts up to a capacity while sustaining a steady refill rate. Buckets are
//! created lazily and evicted once idle past a TTL, so memory stays bounded
//! by the keys active within that window.

pub mod config;
pub mod error;
pub mod gate;
pub mod ratelimit;
