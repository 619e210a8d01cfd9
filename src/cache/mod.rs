//! Response cache subsystem.
//!
//! # Data Flow
//! ```text
//! Gateway (cacheable request)
//!     → manager.rs (namespaced get/set, hit/miss accounting)
//!     → store.rs (KvStore backend: TTL expiry, LRU eviction)
//! ```
//!
//! # Design Decisions
//! - Expiry is lazy; the background sweep only reclaims memory early
//! - Eviction is global LRU across namespaces, not per namespace
//! - Backend errors degrade to a miss at the call site

pub mod manager;
pub mod store;

use thiserror::Error;

pub use manager::{CacheManager, CacheStats};
pub use store::{KvStore, MemoryStore, SetOutcome};

/// Errors raised by cache backends. Never fatal to a request.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),

    #[error("cache codec error: {0}")]
    Codec(#[from] bincode::Error),
}
