//! A [WorkerPool] runs queued jobs on a small, elastic set of threads, and can be paused.
//!
//! Jobs are kept on a stack rather than a queue: the most recently submitted job runs next.  Requests typically come
//! from a scrolling list, where whatever was asked for most recently is what is on screen and the oldest requests
//! are likely no longer visible.
//!
//! Pausing stops workers from taking new jobs.  Jobs already running finish, queued jobs stay queued, and submission
//! still works.
//!
//! The pool keeps at least `min_workers` threads alive and grows to `max_workers` while there is more queued work
//! than idle workers.  Threads above the minimum exit after `keep_alive` without work.
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

pub type Job = Box<dyn FnOnce() + Send + 'static>;

struct PoolState {
    /// The top of the stack is the end of the vec.
    jobs: Vec<Job>,
    paused: bool,
    shutdown: bool,
    workers: usize,
    idle: usize,
    active: usize,
    /// Only used for thread names.
    spawned: usize,
}

struct PoolShared {
    state: Mutex<PoolState>,
    /// Signalled when there is work, on resume and on shutdown.
    work: Condvar,
    /// Signalled whenever a worker exits.
    exited: Condvar,
    min_workers: usize,
    max_workers: usize,
    keep_alive: Duration,
}

pub struct WorkerPool {
    shared: Arc<PoolShared>,
}

impl PoolShared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap()
    }

    /// Spawn workers until there is one per queued job or we hit the maximum.
    fn grow(self: &Arc<Self>, state: &mut PoolState) {
        while !state.paused
            && !state.shutdown
            && state.workers < self.max_workers
            && state.jobs.len() > state.idle
        {
            if let Err(e) = self.spawn_worker(state) {
                log::error!("Unable to spawn loader worker: {}", e);
                return;
            }
        }
    }

    fn spawn_worker(self: &Arc<Self>, state: &mut PoolState) -> std::io::Result<()> {
        let shared = self.clone();
        std::thread::Builder::new()
            .name(format!("asset-loader-{}", state.spawned))
            .spawn(move || shared.worker_loop())?;
        state.spawned += 1;
        state.workers += 1;
        Ok(())
    }

    fn worker_loop(self: Arc<Self>) {
        let mut state = self.lock();
        loop {
            if state.shutdown {
                break;
            }

            if !state.paused {
                if let Some(job) = state.jobs.pop() {
                    state.active += 1;
                    drop(state);

                    if catch_unwind(AssertUnwindSafe(job)).is_err() {
                        log::error!("Loader job panicked");
                    }

                    state = self.lock();
                    state.active -= 1;
                    continue;
                }
            }

            state.idle += 1;
            let (guard, timeout) = self.work.wait_timeout(state, self.keep_alive).unwrap();
            state = guard;
            state.idle -= 1;

            let nothing_to_do = state.paused || state.jobs.is_empty();
            if timeout.timed_out() && nothing_to_do && state.workers > self.min_workers {
                break;
            }
        }

        state.workers -= 1;
        log::debug!("Loader worker exiting, {} left", state.workers);
        self.exited.notify_all();
    }
}

impl WorkerPool {
    /// Create a pool, spawning `min_workers` threads immediately.
    ///
    /// `min_workers` is raised to 1 and `max_workers` to `min_workers` if needed.
    pub fn new(
        min_workers: usize,
        max_workers: usize,
        keep_alive: Duration,
    ) -> std::io::Result<WorkerPool> {
        let min_workers = min_workers.max(1);
        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState {
                jobs: vec![],
                paused: false,
                shutdown: false,
                workers: 0,
                idle: 0,
                active: 0,
                spawned: 0,
            }),
            work: Condvar::new(),
            exited: Condvar::new(),
            min_workers,
            max_workers: max_workers.max(min_workers),
            keep_alive,
        });

        {
            let mut state = shared.lock();
            for _ in 0..min_workers {
                shared.spawn_worker(&mut state)?;
            }
        }

        Ok(WorkerPool { shared })
    }

    /// Queue a job.  Never blocks on the job itself.
    ///
    /// Returns false if the pool is shut down, in which case the job is dropped unrun.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) -> bool {
        let mut state = self.shared.lock();
        if state.shutdown {
            drop(state);
            log::warn!("Dropping job submitted to a shut down pool");
            return false;
        }
        state.jobs.push(Box::new(job));
        if !state.paused {
            self.shared.grow(&mut state);
            self.shared.work.notify_one();
        }
        true
    }

    /// Stop handing out new jobs.  Idempotent.
    pub fn pause(&self) {
        self.shared.lock().paused = true;
    }

    /// Start handing out jobs again.  Idempotent.
    pub fn resume(&self) {
        let mut state = self.shared.lock();
        if !state.paused {
            return;
        }
        state.paused = false;
        self.shared.grow(&mut state);
        self.shared.work.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        self.shared.lock().paused
    }

    pub fn queued_jobs(&self) -> usize {
        self.shared.lock().jobs.len()
    }

    pub fn active_jobs(&self) -> usize {
        self.shared.lock().active
    }

    pub fn worker_count(&self) -> usize {
        self.shared.lock().workers
    }

    /// Mark the pool shut down and hand back the jobs that will now never run.
    fn signal_shutdown(&self) -> Vec<Job> {
        let mut state = self
            .shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        state.shutdown = true;
        self.shared.work.notify_all();
        std::mem::take(&mut state.jobs)
    }

    /// Drop every queued job, then wait for running jobs to finish and all workers to exit.
    ///
    /// Queued jobs are dropped without the pool lock held, so whatever they own may clean up by submitting or
    /// notifying.  Must not be called from inside a job, which would wait for itself.
    pub fn shutdown(&self) {
        drop(self.signal_shutdown());
        let mut state = self.shared.lock();
        while state.workers > 0 {
            state = self.shared.exited.wait(state).unwrap();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        drop(self.signal_shutdown());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    use super::*;

    /// Poll until `cond` holds, panicking after a generous timeout.
    fn wait_until(what: &str, cond: impl Fn() -> bool) {
        let start = Instant::now();
        while !cond() {
            if start.elapsed() > Duration::from_secs(5) {
                panic!("Timed out waiting for {}", what);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_runs_jobs() {
        let pool = WorkerPool::new(1, 4, Duration::from_secs(10)).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..20 {
            let counter = counter.clone();
            pool.submit(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        wait_until("all jobs", || counter.load(Ordering::SeqCst) == 20);
        assert!(pool.worker_count() <= 4);
    }

    #[test]
    fn test_pause_holds_jobs() {
        let pool = WorkerPool::new(1, 4, Duration::from_secs(10)).unwrap();
        pool.pause();
        pool.pause();
        assert!(pool.is_paused());

        let ran = Arc::new(AtomicUsize::new(0));
        let ran_clone = ran.clone();
        pool.submit(move || {
            ran_clone.fetch_add(1, Ordering::SeqCst);
        });

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(pool.queued_jobs(), 1);
        assert_eq!(pool.active_jobs(), 0);
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        pool.resume();
        pool.resume();
        assert!(!pool.is_paused());
        wait_until("the job to run", || ran.load(Ordering::SeqCst) == 1);
        assert_eq!(pool.queued_jobs(), 0);
    }

    #[test]
    fn test_running_job_finishes_while_paused() {
        let pool = WorkerPool::new(1, 1, Duration::from_secs(10)).unwrap();
        let (started_tx, started_rx) = crossbeam_channel::bounded(1);
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(1);
        let done = Arc::new(AtomicUsize::new(0));

        let done_clone = done.clone();
        pool.submit(move || {
            started_tx.send(()).unwrap();
            release_rx.recv().unwrap();
            done_clone.fetch_add(1, Ordering::SeqCst);
        });
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        pool.pause();
        let done_clone = done.clone();
        pool.submit(move || {
            done_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(pool.active_jobs(), 1);

        release_tx.send(()).unwrap();
        wait_until("the running job", || done.load(Ordering::SeqCst) == 1);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert_eq!(pool.queued_jobs(), 1);

        pool.resume();
        wait_until("the queued job", || done.load(Ordering::SeqCst) == 2);
    }

    #[test]
    fn test_lifo_order() {
        let pool = WorkerPool::new(1, 1, Duration::from_secs(10)).unwrap();
        pool.pause();

        let order = Arc::new(Mutex::new(vec![]));
        for i in 0..5 {
            let order = order.clone();
            pool.submit(move || order.lock().unwrap().push(i));
        }
        pool.resume();

        wait_until("all jobs", || order.lock().unwrap().len() == 5);
        assert_eq!(*order.lock().unwrap(), vec![4, 3, 2, 1, 0]);
    }

    #[test]
    fn test_grows_to_max_and_shrinks_back() {
        let pool = WorkerPool::new(1, 3, Duration::from_millis(50)).unwrap();
        let (release_tx, release_rx) = crossbeam_channel::unbounded::<()>();
        let running = Arc::new(AtomicUsize::new(0));

        for _ in 0..6 {
            let release_rx = release_rx.clone();
            let running = running.clone();
            pool.submit(move || {
                running.fetch_add(1, Ordering::SeqCst);
                release_rx.recv().unwrap();
                running.fetch_sub(1, Ordering::SeqCst);
            });
        }

        wait_until("three concurrent jobs", || running.load(Ordering::SeqCst) == 3);
        assert_eq!(pool.worker_count(), 3);
        assert_eq!(pool.queued_jobs(), 3);

        for _ in 0..6 {
            release_tx.send(()).unwrap();
        }
        wait_until("the queue to drain", || {
            pool.queued_jobs() == 0 && pool.active_jobs() == 0
        });
        wait_until("extra workers to exit", || pool.worker_count() == 1);
    }

    #[test]
    fn test_panicking_job_does_not_kill_the_pool() {
        let pool = WorkerPool::new(1, 1, Duration::from_secs(10)).unwrap();
        pool.submit(|| panic!("job exploded"));

        let ran = Arc::new(AtomicUsize::new(0));
        let ran_clone = ran.clone();
        pool.submit(move || {
            ran_clone.fetch_add(1, Ordering::SeqCst);
        });
        wait_until("the second job", || ran.load(Ordering::SeqCst) == 1);
        assert_eq!(pool.worker_count(), 1);
    }

    #[test]
    fn test_shutdown_drops_queue_and_waits() {
        let pool = WorkerPool::new(2, 2, Duration::from_secs(10)).unwrap();
        pool.pause();
        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let ran = ran.clone();
            pool.submit(move || {
                ran.fetch_add(1, Ordering::SeqCst);
            });
        }

        pool.shutdown();
        assert_eq!(pool.worker_count(), 0);
        assert_eq!(pool.queued_jobs(), 0);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        // The dropped jobs released what they captured.
        assert_eq!(Arc::strong_count(&ran), 1);

        // Submitting afterwards is refused rather than queued forever.
        let ran_clone = ran.clone();
        assert!(!pool.submit(move || {
            ran_clone.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(pool.queued_jobs(), 0);
        assert_eq!(Arc::strong_count(&ran), 1);
    }
}
