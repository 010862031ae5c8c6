//! Shared types, error definitions, and utilities used across all trestle crates.

pub mod error;
pub mod types;

pub use error::FromMessage;

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
