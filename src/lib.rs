//! Read-through cache for metadata views, backed by S3 or memory.
//!
//! A view is a named table derived from the metadata database. Tables are
//! cached under deterministic keys; [`client::CachedMetadataClient`] serves
//! them from the cache or populates them on a miss, and [`sync::hide_acorns`]
//! refreshes every view in bulk.

pub mod cache;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod keys;
pub mod source;
pub mod sync;
pub mod table;
pub mod views;

pub use cache::{CacheLayer, CacheResult, CacheSource, CacheStorage, MemoryStorage, ObjectStorage};
pub use client::CachedMetadataClient;
pub use config::Config;
pub use error::{Error, Result};
pub use keys::{CacheKey, Layout, Params, Query};
pub use sync::{hide_acorns, SyncFailure, SyncOptions, SyncOutcome, SyncReport};
pub use table::Table;
pub use views::View;
