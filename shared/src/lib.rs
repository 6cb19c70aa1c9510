// shared/src/lib.rs

use std::num::NonZeroU64;
use std::str::FromStr;
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("backend unavailable: {0}")]
    Backend(String),
    #[error("serialization: {0}")]
    Serialization(String),
    #[error("storage: {0}")]
    Storage(String),
    #[error("config: {0}")]
    Config(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("upstream api: {0}")]
    Upstream(String),
    #[error("internal: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Time-to-live requested for a cache write.
///
/// `BackendDefault` defers to whatever default the backend was built with
/// (which may be "never expires").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Ttl {
    Seconds(NonZeroU64),
    BackendDefault,
}

impl Ttl {
    /// One day, the default for cached reads.
    pub const DAY: Ttl = Ttl::from_secs(86_400);

    /// `0` maps to [`Ttl::BackendDefault`].
    pub const fn from_secs(secs: u64) -> Self {
        match NonZeroU64::new(secs) {
            Some(secs) => Ttl::Seconds(secs),
            None => Ttl::BackendDefault,
        }
    }

    pub fn as_secs(&self) -> Option<u64> {
        match self {
            Ttl::Seconds(secs) => Some(secs.get()),
            Ttl::BackendDefault => None,
        }
    }

    pub fn as_duration(&self) -> Option<Duration> {
        self.as_secs().map(Duration::from_secs)
    }
}

impl Default for Ttl {
    fn default() -> Self {
        Ttl::DAY
    }
}

/// What a cache-aside read does after the backend failed (not a clean miss).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReadFailurePolicy {
    /// Compute the value and still try to write it back.
    #[default]
    TreatAsMiss,
    /// Compute the value and leave the backend alone.
    BypassWrite,
}

impl FromStr for ReadFailurePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "treat-as-miss" | "miss" => Ok(ReadFailurePolicy::TreatAsMiss),
            "bypass-write" | "bypass" => Ok(ReadFailurePolicy::BypassWrite),
            other => Err(Error::Config(format!(
                "unknown read failure policy '{}', expected treat-as-miss or bypass-write",
                other
            ))),
        }
    }
}

pub mod config;
