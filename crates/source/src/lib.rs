//! Upstream availability data.
//!
//! This crate provides:
//! - `DataSource` trait for the three-level region → facility → slot hierarchy
//! - `GorzdravClient`, the HTTP implementation against the public booking API
//! - `RateLimitedFetcher`, which wraps any source with a shared token bucket,
//!   a per-call deadline and cancellation

pub mod error;
pub mod fetcher;
pub mod gorzdrav;
pub mod traits;

pub use error::SourceError;
pub use fetcher::RateLimitedFetcher;
pub use gorzdrav::GorzdravClient;
pub use traits::DataSource;
