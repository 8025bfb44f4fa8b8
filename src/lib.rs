//! A three-tier cache for remote assets such as images: decoded items in memory, encoded bytes in persistent storage,
//! and the network behind both.
//!
//! Sometimes you have a long scrolling list of things which each need a picture from a server.  Fetching and decoding
//! is slow, the same picture is often asked for by several rows at once, and rows get recycled for other pictures
//! long before their first request finishes.  This crate handles that:
//!
//! - A [MemoryCache] of decoded items, bounded by entry count, evicting the least recently used.  Hits are returned
//!   synchronously from [Loader::load].
//! - A [Persistence] layer of encoded bytes, such as [FilesystemPersistence].  Anything fetched is written here first.
//! - A [Fetcher] for the network, read progressively so that listeners get progress reports.
//!
//! Everything past the memory cache runs on a pausable [WorkerPool] whose most recent request runs first.  Duplicate
//! requests for the same resource are coalesced: only one of them ever goes past the memory cache at a time.  Results
//! go to each request's [LoadListener] and, if it is still showing the same resource, its [Target].
//!
//! To use this crate, implement [Fetcher] and [Decoder] (and [Persistence], or use [FilesystemPersistence]), then
//! construct a [Loader] with your chosen [LoaderConfig].
mod active_requests;
mod cache_entry;
mod config;
mod delivery;
mod error;
mod filesystem_persistence;
mod key;
mod loader;
mod memory_cache;
mod progressive;
mod request;
mod traits;
mod worker_pool;

pub use config::*;
pub use error::*;
pub use filesystem_persistence::*;
pub use key::*;
pub use loader::*;
pub use memory_cache::*;
pub use request::*;
pub use traits::*;
pub use worker_pool::*;
