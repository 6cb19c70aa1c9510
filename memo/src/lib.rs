//! Cache-aside memoization for read functions.
//!
//! A [`CacheAside`] wraps a read function, derives a [`CacheKey`] from the
//! function name and its [`CallArgs`], and serves the result from a
//! [`CacheBackend`] before falling through to the function itself. The
//! handle the function needs (store, connection, session) is passed
//! separately and never takes part in the key.

pub mod cache_aside;
pub mod domain;
pub mod events;
pub mod ports;

pub use cache_aside::CacheAside;
pub use domain::{CacheKey, CallArgs, KeyPart, Lookup, ReadFailurePolicy};
pub use events::CacheEvent;
pub use ports::{CacheBackend, CacheBackendExt};
pub use shared::Ttl;
