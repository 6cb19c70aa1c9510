use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CacheEvent {
    Hit(HitEvent),
    Miss(MissEvent),
    Stored(StoredEvent),
    Skipped(SkippedEvent),
}

impl CacheEvent {
    pub fn backend(&self) -> &str {
        match self {
            CacheEvent::Hit(e) => &e.backend,
            CacheEvent::Miss(e) => &e.backend,
            CacheEvent::Stored(e) => &e.backend,
            CacheEvent::Skipped(e) => &e.backend,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            CacheEvent::Hit(e) => &e.key,
            CacheEvent::Miss(e) => &e.key,
            CacheEvent::Stored(e) => &e.key,
            CacheEvent::Skipped(e) => &e.key,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CacheEvent::Hit(_) => "hit",
            CacheEvent::Miss(_) => "miss",
            CacheEvent::Stored(_) => "stored",
            CacheEvent::Skipped(_) => "skipped",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HitEvent {
    pub backend: String,
    pub key: String,
    pub elapsed_us: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MissReason {
    Absent,
    Unavailable,
    Undecodable,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MissEvent {
    pub backend: String,
    pub key: String,
    pub reason: MissReason,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredEvent {
    pub backend: String,
    pub key: String,
    pub value_size: usize,
    pub ttl_secs: Option<u64>,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoneResult,
    SerializeFailed,
    WriteFailed,
    BackendUnavailable,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SkippedEvent {
    pub backend: String,
    pub key: String,
    pub reason: SkipReason,
    pub timestamp: u64,
}

/// Helper to get current timestamp in seconds since UNIX epoch
pub fn now_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
