//! A [LoadRequest] names a resource and says who wants to hear about it.
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::*;

/// Hints passed through to the [Target] when a payload is presented.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct LoadFlags {
    /// Present with a transition rather than swapping immediately.
    pub animated: bool,
    /// The caller only needs a thumbnail-sized variant.
    pub thumbnail: bool,
}

/// Cooperative cancellation for a request.
///
/// Cancelling never interrupts a collaborator mid-call; it is checked before the request starts, after it stops
/// waiting on a duplicate, and between chunks of a download.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> CancelToken {
        Default::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn check(&self) -> Result<(), LoadError> {
        if self.is_cancelled() {
            Err(LoadError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// A request for one resource.
///
/// Two requests are equal if they name the same URI, regardless of listener, target or flags.
pub struct LoadRequest<T> {
    key: ResourceKey,
    uri: Arc<str>,
    target: Option<Arc<dyn Target<T>>>,
    listener: Option<Arc<dyn LoadListener<T>>>,
    flags: LoadFlags,
    cancel: CancelToken,
}

impl<T> LoadRequest<T> {
    pub fn new(uri: impl Into<String>) -> LoadRequest<T> {
        let uri: String = uri.into();
        LoadRequest {
            key: ResourceKey::from_uri(&uri),
            uri: uri.into(),
            target: None,
            listener: None,
            flags: Default::default(),
            cancel: Default::default(),
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn LoadListener<T>>) -> LoadRequest<T> {
        self.listener = Some(listener);
        self
    }

    pub fn with_target(mut self, target: Arc<dyn Target<T>>) -> LoadRequest<T> {
        self.target = Some(target);
        self
    }

    pub fn with_flags(mut self, flags: LoadFlags) -> LoadRequest<T> {
        self.flags = flags;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> LoadRequest<T> {
        self.cancel = cancel;
        self
    }

    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn flags(&self) -> LoadFlags {
        self.flags
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn target(&self) -> Option<&Arc<dyn Target<T>>> {
        self.target.as_ref()
    }

    pub fn listener(&self) -> Option<&Arc<dyn LoadListener<T>>> {
        self.listener.as_ref()
    }

    /// Whether anyone still wants the result: false once the target has been rebound to some other URI.
    ///
    /// Requests without a target are always relevant.
    pub fn is_still_relevant(&self) -> bool {
        self.target
            .as_ref()
            .map_or(true, |t| t.is_still_relevant(&self.uri))
    }
}

// Derives would require `T: Clone` and friends, which the payload type has no reason to implement.
impl<T> Clone for LoadRequest<T> {
    fn clone(&self) -> Self {
        LoadRequest {
            key: self.key.clone(),
            uri: self.uri.clone(),
            target: self.target.clone(),
            listener: self.listener.clone(),
            flags: self.flags,
            cancel: self.cancel.clone(),
        }
    }
}

impl<T> PartialEq for LoadRequest<T> {
    fn eq(&self, other: &Self) -> bool {
        self.uri == other.uri
    }
}

impl<T> Eq for LoadRequest<T> {}

impl<T> Hash for LoadRequest<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.uri.hash(state);
    }
}

impl<T> fmt::Debug for LoadRequest<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadRequest")
            .field("uri", &self.uri)
            .field("key", &self.key)
            .field("flags", &self.flags)
            .field("has_target", &self.target.is_some())
            .field("has_listener", &self.listener.is_some())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
