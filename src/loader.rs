//! The [Loader] drives a [Persistence], a [Fetcher] and a [Decoder], handing out decoded items from 3 tiers:
//!
//! - A bounded in-memory cache of decoded items, checked synchronously by [Loader::load].
//! - The persistent store of encoded bytes.
//! - The network.
//!
//! Everything past the memory cache runs on a pausable [WorkerPool].  Only one job per [ResourceKey] goes past the
//! memory cache at a time; duplicates wait for it and then find its result in memory.  Results are reported through
//! each request's [LoadListener] and [Target] from a single delivery thread.
//!
//! Nothing is cached on failure, so asking again retries from scratch.
use std::any::Any;
use std::io::Error as IoError;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;

use crate::active_requests::ActiveRequests;
use crate::delivery::{Delivery, Notification};
use crate::progressive::read_progressively;
use crate::*;

struct LoaderInner<P, F, D: Decoder> {
    persistence: P,
    fetcher: F,
    decoder: D,
    memory: Mutex<MemoryCache<ResourceKey, D::Output>>,
    /// Keys with a job past the memory cache.
    active: ActiveRequests,
    decoding_size_constraint: AtomicU64,
    fetch_timeout: Option<Duration>,
    transform: RwLock<Option<Arc<dyn Transform<D::Output>>>>,
    notifications: Sender<Notification>,
}

pub struct Loader<P: Persistence, F: Fetcher, D: Decoder> {
    inner: Arc<LoaderInner<P, F, D>>,
    pool: WorkerPool,
    _delivery: Delivery,
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}

impl<P: Persistence, F: Fetcher, D: Decoder> LoaderInner<P, F, D> {
    fn post(&self, notification: Notification) {
        if self.notifications.send(notification).is_err() {
            log::warn!("Delivery thread is gone; dropping a notification");
        }
    }

    fn notify_progress(&self, request: &LoadRequest<D::Output>, total: u64, loaded: u64) {
        if request.listener().is_none() {
            return;
        }
        let request = request.clone();
        self.post(Box::new(move || {
            if let Some(l) = request.listener() {
                l.on_progress(&request, total, loaded);
            }
        }));
    }

    fn deliver_response(&self, request: LoadRequest<D::Output>, payload: Arc<D::Output>) {
        if request.listener().is_none() && request.target().is_none() {
            return;
        }
        self.post(Box::new(move || {
            if let Some(t) = request.target() {
                // The target may have been recycled for another resource while we were loading.
                if t.is_still_relevant(request.uri()) {
                    t.present(payload.clone(), request.flags());
                } else {
                    log::debug!("Not presenting {}, its target moved on", request.uri());
                }
            }
            if let Some(l) = request.listener() {
                l.on_response(&request, payload);
            }
        }));
    }

    fn deliver_error(&self, request: LoadRequest<D::Output>, error: LoadError) {
        if request.listener().is_none() {
            return;
        }
        let error = Arc::new(error);
        self.post(Box::new(move || {
            if let Some(l) = request.listener() {
                l.on_error(&request, error);
            }
        }));
    }

    /// The body of a pool job.
    fn run(&self, request: LoadRequest<D::Output>) {
        if let Err(e) = request.cancel_token().check() {
            self.deliver_error(request, e);
            return;
        }
        if !request.is_still_relevant() {
            log::debug!("Giving up on {}, its target moved on", request.uri());
            return;
        }

        let outcome = match catch_unwind(AssertUnwindSafe(|| self.resolve(&request))) {
            Ok(r) => r,
            Err(panic) => Err(LoadError::Fault(panic_message(&*panic))),
        };

        match outcome {
            Ok(payload) => self.deliver_response(request, payload),
            Err(e) => {
                log::warn!("Error loading {}: {}", request.uri(), e);
                self.deliver_error(request, e);
            }
        }
    }

    /// Find or produce the payload for a request.  The key is held in the active set for the whole call.
    fn resolve(&self, request: &LoadRequest<D::Output>) -> Result<Arc<D::Output>, LoadError> {
        let key = request.key();
        let _guard = self.active.acquire(key);
        // We may have waited a long time on a duplicate.
        request.cancel_token().check()?;

        // Whoever held the key before us may have just filled this in.
        let cached = self.memory.lock().unwrap().get(key);
        if let Some(x) = cached {
            return Ok(x);
        }

        log::debug!("Memory miss for {}", request.uri());
        if let Some(bytes) = self.persistence.load(key).map_err(LoadError::Persistence)? {
            log::debug!("Found {} in persistent storage", request.uri());
            let payload = Arc::new(self.decode(&bytes)?);
            self.memory
                .lock()
                .unwrap()
                .insert(key.clone(), payload.clone());
            self.notify_progress(request, 1, 1);
            return Ok(payload);
        }

        log::debug!("Fetching {} from the network", request.uri());
        let started = Instant::now();
        let bytes = self.download(request)?;
        let payload = Arc::new(self.decode(&bytes)?);

        // Persist first: if that fails the request fails, and memory should not claim otherwise.  The stored form is
        // the fetched bytes, not the decoded or transformed item.
        self.persistence
            .store(key, &bytes)
            .map_err(LoadError::Persistence)?;
        self.memory
            .lock()
            .unwrap()
            .insert(key.clone(), payload.clone());

        log::debug!(
            "Loaded {} ({} bytes) in {:?}",
            request.uri(),
            bytes.len(),
            started.elapsed()
        );
        Ok(payload)
    }

    fn download(&self, request: &LoadRequest<D::Output>) -> Result<Vec<u8>, LoadError> {
        let deadline = self.fetch_timeout.map(|t| Instant::now() + t);
        let response = self
            .fetcher
            .fetch(request.uri(), deadline)
            .map_err(TransferError::Io)?;
        let progress = |total, loaded| self.notify_progress(request, total, loaded);

        match response.encoding {
            ContentEncoding::Identity => read_progressively(
                response.body,
                response.content_length,
                deadline,
                request.cancel_token(),
                progress,
            ),
            // The declared length counts compressed bytes, which says nothing about how many we'll read.
            ContentEncoding::Gzip => read_progressively(
                flate2::read::GzDecoder::new(response.body),
                None,
                deadline,
                request.cancel_token(),
                progress,
            ),
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<D::Output, LoadError> {
        let constraint = self.decoding_size_constraint.load(Ordering::Relaxed);
        let decoded = self
            .decoder
            .decode(bytes, constraint)
            .ok_or(LoadError::Decode { len: bytes.len() })?;
        Ok(self.apply_transform(decoded))
    }

    fn apply_transform(&self, decoded: D::Output) -> D::Output {
        let transform = self.transform.read().unwrap().clone();
        let transform = match transform {
            Some(t) => t,
            None => return decoded,
        };

        match catch_unwind(AssertUnwindSafe(|| transform.apply(&decoded))) {
            Ok(Some(out)) => out,
            Ok(None) => decoded,
            Err(_) => {
                log::warn!("Transform panicked; keeping the untransformed item");
                decoded
            }
        }
    }
}

/// A request sitting in the pool's queue.  If the pool drops it unrun, its listener hears [LoadError::ShutDown].
struct PendingLoad<P: Persistence, F: Fetcher, D: Decoder> {
    inner: Arc<LoaderInner<P, F, D>>,
    request: Option<LoadRequest<D::Output>>,
}

impl<P: Persistence, F: Fetcher, D: Decoder> PendingLoad<P, F, D> {
    fn run(mut self) {
        if let Some(request) = self.request.take() {
            self.inner.run(request);
        }
    }
}

impl<P: Persistence, F: Fetcher, D: Decoder> Drop for PendingLoad<P, F, D> {
    fn drop(&mut self) {
        if let Some(request) = self.request.take() {
            log::debug!("Dropping {} unloaded, the loader shut down", request.uri());
            self.inner.deliver_error(request, LoadError::ShutDown);
        }
    }
}

/// Forwards the outcome of one request to a blocked [Loader::load_blocking] caller.
struct BlockingListener<T> {
    sender: Sender<Result<Arc<T>, Arc<LoadError>>>,
}

impl<T: Send + Sync> LoadListener<T> for BlockingListener<T> {
    fn on_response(&self, _request: &LoadRequest<T>, payload: Arc<T>) {
        let _ = self.sender.try_send(Ok(payload));
    }

    fn on_error(&self, _request: &LoadRequest<T>, error: Arc<LoadError>) {
        let _ = self.sender.try_send(Err(error));
    }
}

impl<P: Persistence, F: Fetcher, D: Decoder> Loader<P, F, D> {
    /// Build a loader, starting its minimum workers and its delivery thread.
    pub fn new(
        persistence: P,
        fetcher: F,
        decoder: D,
        config: LoaderConfig,
    ) -> Result<Loader<P, F, D>, IoError> {
        let (delivery, notifications) = Delivery::start()?;
        let pool = WorkerPool::new(
            config.min_workers,
            config.max_workers,
            config.worker_keep_alive,
        )?;

        Ok(Loader {
            inner: Arc::new(LoaderInner {
                persistence,
                fetcher,
                decoder,
                memory: Mutex::new(MemoryCache::new(config.max_memory_entries)),
                active: Default::default(),
                decoding_size_constraint: AtomicU64::new(config.decoding_size_constraint),
                fetch_timeout: config.fetch_timeout,
                transform: RwLock::new(None),
                notifications,
            }),
            pool,
            _delivery: delivery,
        })
    }

    /// Get an item if it's in memory, otherwise start loading it in the background and return `None`.
    ///
    /// On a memory hit the request's target and listener are called before this returns, on this thread.  Otherwise
    /// they hear about it later from the delivery thread.  Only an empty URI fails here; every other failure goes to
    /// the listener.
    pub fn load(
        &self,
        request: LoadRequest<D::Output>,
    ) -> Result<Option<Arc<D::Output>>, LoadError> {
        if request.uri().trim().is_empty() {
            return Err(LoadError::InvalidRequest("the URI is empty"));
        }

        // Bind first, so that any earlier request for this target knows it's stale.
        if let Some(t) = request.target() {
            t.bind(request.uri());
        }

        let cached = self.inner.memory.lock().unwrap().get(request.key());
        if let Some(payload) = cached {
            if let Some(t) = request.target() {
                t.present(payload.clone(), request.flags());
            }
            if let Some(l) = request.listener() {
                l.on_response(&request, payload.clone());
            }
            return Ok(Some(payload));
        }

        let pending = PendingLoad {
            inner: self.inner.clone(),
            request: Some(request),
        };
        self.pool.submit(move || pending.run());
        Ok(None)
    }

    /// Load an item, blocking until it is available or has failed.
    ///
    /// This waits on the delivery thread, so it must never be called from a listener or target callback.  On a memory
    /// miss it also waits on the pool: while the loader is paused this doesn't return until someone else calls
    /// [Loader::resume] or [Loader::shutdown].
    pub fn load_blocking(&self, uri: impl Into<String>) -> Result<Arc<D::Output>, Arc<LoadError>> {
        let (sender, receiver) = crossbeam_channel::bounded(1);
        let request = LoadRequest::new(uri).with_listener(Arc::new(BlockingListener { sender }));
        if let Some(x) = self.load(request).map_err(Arc::new)? {
            return Ok(x);
        }

        // Every request ends in exactly one response or error, but the sender going away is handled all the same.
        match receiver.recv() {
            Ok(res) => res,
            Err(_) => Err(Arc::new(LoadError::ShutDown)),
        }
    }

    /// Stop starting new background loads.  Loads already running finish.
    pub fn pause(&self) {
        self.pool.pause();
    }

    pub fn resume(&self) {
        self.pool.resume();
    }

    pub fn is_paused(&self) -> bool {
        self.pool.is_paused()
    }

    /// Drop queued loads and wait for running ones to finish.  Later loads only ever hit memory.
    ///
    /// Listeners of dropped and later-missed requests get [LoadError::ShutDown].
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }

    pub fn clear_memory_cache(&self) {
        self.inner.memory.lock().unwrap().clear();
    }

    /// Remove everything from persistent storage.  Blocks on the store.
    pub fn clear_persistent_cache(&self) -> Result<(), IoError> {
        self.inner.persistence.clear()
    }

    /// Forget one resource in both memory and persistent storage.
    pub fn invalidate(&self, uri: &str) -> Result<(), IoError> {
        let key = ResourceKey::from_uri(uri);
        self.inner.memory.lock().unwrap().remove(&key);
        self.inner.persistence.invalidate(&key)
    }

    pub fn max_memory_entries(&self) -> usize {
        self.inner.memory.lock().unwrap().max_entries()
    }

    /// Change the memory cache capacity.  Existing entries aren't evicted until later inserts.
    pub fn set_max_memory_entries(&self, max_entries: usize) {
        self.inner
            .memory
            .lock()
            .unwrap()
            .set_max_entries(max_entries);
    }

    pub fn decoding_size_constraint(&self) -> u64 {
        self.inner.decoding_size_constraint.load(Ordering::Relaxed)
    }

    /// Change the budget passed to the decoder.  Only affects decodes which start afterwards.
    pub fn set_decoding_size_constraint(&self, constraint: u64) {
        self.inner
            .decoding_size_constraint
            .store(constraint, Ordering::Relaxed);
    }

    pub fn set_transform(&self, transform: impl Transform<D::Output>) {
        *self.inner.transform.write().unwrap() = Some(Arc::new(transform));
    }

    pub fn clear_transform(&self) {
        *self.inner.transform.write().unwrap() = None;
    }

    pub fn memory_cache_len(&self) -> usize {
        self.inner.memory.lock().unwrap().len()
    }

    /// Whether an item is in memory, without counting as a use.
    pub fn is_cached_in_memory(&self, uri: &str) -> bool {
        self.inner
            .memory
            .lock()
            .unwrap()
            .exists(&ResourceKey::from_uri(uri))
    }

    /// Whether a job for this resource is currently past the memory cache.
    pub fn is_in_flight(&self, uri: &str) -> bool {
        self.inner.active.contains(&ResourceKey::from_uri(uri))
    }

    /// Number of resources currently being loaded past the memory cache.
    pub fn in_flight(&self) -> usize {
        self.inner.active.len()
    }

    pub fn queued_jobs(&self) -> usize {
        self.pool.queued_jobs()
    }

    pub fn active_jobs(&self) -> usize {
        self.pool.active_jobs()
    }

    pub fn persistence(&self) -> &P {
        &self.inner.persistence
    }
}
