//! Keyed in-memory cache for query results.
//!
//! This module provides a backend-agnostic caching service that:
//! - Stores one entry per opaque key, stamped with the time its fetch completed
//! - Deduplicates concurrent fetches for the same key by sharing the in-flight future
//! - Evicts entries older than the retention window with a periodic sweep
//! - Broadcasts focus, reconnect and update events to every consumer
//!
//! Keys are global to a `QueryCache`. Two features that pick the same key
//! will read each other's values, so keys must be unique across the app
//! (see [`QueryKey`]).

mod layer;
mod storage;
mod traits;

pub use layer::{CacheConfig, CacheEvent, CacheSubscription, QueryCache};
pub use traits::{CacheHit, CacheResult, CacheSource, QueryKey};
