//! The collaborators a [crate::Loader] is built from.
//!
//! A [Persistence] stores encoded bytes durably, a [Fetcher] pulls them over the network, and a [Decoder] turns them
//! into the in-memory representation that is actually handed out.  [Target] and [LoadListener] are the two ways of
//! hearing about the result.
use std::io::{Error, Read};
use std::sync::Arc;
use std::time::Instant;

use crate::*;

/// A durable key to bytes store, such as a directory or a database table.
///
/// Implementations must be safe to call from many worker threads at once and may block.
pub trait Persistence: Send + Sync + 'static {
    fn exists(&self, key: &ResourceKey) -> bool;

    /// Load the bytes for a key, or `None` if the store doesn't have them.
    fn load(&self, key: &ResourceKey) -> Result<Option<Vec<u8>>, Error>;

    fn store(&self, key: &ResourceKey, bytes: &[u8]) -> Result<(), Error>;

    /// Remove a key.  Removing a missing key is not an error.
    fn invalidate(&self, key: &ResourceKey) -> Result<(), Error>;

    fn clear(&self) -> Result<(), Error>;
}

impl<P: Persistence> Persistence for Arc<P> {
    fn exists(&self, key: &ResourceKey) -> bool {
        (**self).exists(key)
    }

    fn load(&self, key: &ResourceKey) -> Result<Option<Vec<u8>>, Error> {
        (**self).load(key)
    }

    fn store(&self, key: &ResourceKey, bytes: &[u8]) -> Result<(), Error> {
        (**self).store(key, bytes)
    }

    fn invalidate(&self, key: &ResourceKey) -> Result<(), Error> {
        (**self).invalidate(key)
    }

    fn clear(&self) -> Result<(), Error> {
        (**self).clear()
    }
}

/// How the body of a [FetchResponse] is encoded on the wire.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ContentEncoding {
    Identity,
    Gzip,
}

/// An open response body.
pub struct FetchResponse {
    pub body: Box<dyn Read + Send>,
    /// The declared length of the body as sent, if the transport knows it.
    pub content_length: Option<u64>,
    pub encoding: ContentEncoding,
}

impl FetchResponse {
    /// A plain body with a known length.
    pub fn new(body: impl Read + Send + 'static, content_length: Option<u64>) -> FetchResponse {
        FetchResponse {
            body: Box::new(body),
            content_length,
            encoding: ContentEncoding::Identity,
        }
    }

    pub fn with_encoding(mut self, encoding: ContentEncoding) -> FetchResponse {
        self.encoding = encoding;
        self
    }
}

/// Opens a byte stream for a URI, usually over HTTP.
pub trait Fetcher: Send + Sync + 'static {
    /// Open `uri`.  If a deadline is given, implementations should give up connecting once it passes; the loader
    /// itself stops reading the body at the deadline.
    fn fetch(&self, uri: &str, deadline: Option<Instant>) -> Result<FetchResponse, Error>;
}

impl<F: Fetcher> Fetcher for Arc<F> {
    fn fetch(&self, uri: &str, deadline: Option<Instant>) -> Result<FetchResponse, Error> {
        (**self).fetch(uri, deadline)
    }
}

/// A `Decoder` knows how to get from encoded bytes to a decoded representation in memory.
///
/// The output type must be sync in order to enable the cache to store elements behind `Arc`.
pub trait Decoder: Send + Sync + 'static {
    type Output: Send + Sync + 'static;

    /// Decode `bytes`, downsampling as needed to stay within `size_constraint` (usually a pixel count).
    ///
    /// Returning `None` means the bytes are unusable, including running out of memory; the loader reports it as
    /// [LoadError::Decode].
    fn decode(&self, bytes: &[u8], size_constraint: u64) -> Option<Self::Output>;
}

/// Post-processing applied to freshly decoded payloads before they are cached, such as rounding corners.
///
/// Returning `None` keeps the input.  So does panicking: transforms are best effort.
pub trait Transform<T>: Send + Sync + 'static {
    fn apply(&self, input: &T) -> Option<T>;
}

impl<T, F> Transform<T> for F
where
    F: Fn(&T) -> Option<T> + Send + Sync + 'static,
{
    fn apply(&self, input: &T) -> Option<T> {
        self(input)
    }
}

/// Something that displays a payload, usually a UI widget.
///
/// The loader binds a target to the URI of each request made for it, so that when a widget is recycled for another
/// resource the stale result is dropped instead of presented.
pub trait Target<T>: Send + Sync {
    /// Record that `uri` is now the resource this target wants.
    fn bind(&self, uri: &str);

    /// Whether this target still wants the result for `uri`.
    fn is_still_relevant(&self, uri: &str) -> bool;

    fn present(&self, payload: Arc<T>, flags: LoadFlags);
}

/// Callbacks for the outcome of a request.
///
/// Asynchronous callbacks are delivered one at a time from a single thread; a memory-cache hit calls
/// [LoadListener::on_response] directly from [crate::Loader::load].
pub trait LoadListener<T>: Send + Sync {
    fn on_response(&self, request: &LoadRequest<T>, payload: Arc<T>);

    /// `total` and `loaded` are in bytes when the length is known and abstract units otherwise.
    fn on_progress(&self, _request: &LoadRequest<T>, _total: u64, _loaded: u64) {}

    fn on_error(&self, request: &LoadRequest<T>, error: Arc<LoadError>);
}
