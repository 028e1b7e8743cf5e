//! The background poller that turns a synchronous [`HpcProcess`] into an
//! asynchronously-observable [`Future`].

use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use hpc_connect_job::HpcConnectError;
use hpc_connect_job::HpcProcess;
use tracing::warn;

/// A callback invoked from the future's background worker thread.
type Callback = Box<dyn FnOnce(&Future) + Send>;

/// Internal, mutex-guarded state shared between a [`Future`]'s handle and
/// its worker thread.
struct State {
    /// Set once `poll()` reports termination or `cancel()` is called.
    done: bool,
    /// Set only by `cancel()`.
    cancelled: bool,
    /// Whether the on-start callbacks have already fired.
    started_fired: bool,
    /// Whether the on-jobid callbacks have already fired.
    jobid_fired: bool,
    /// Pending on-jobid callbacks, FIFO.
    jobid_callbacks: Vec<Callback>,
    /// Pending on-start callbacks, FIFO.
    start_callbacks: Vec<Callback>,
    /// Pending on-done callbacks, FIFO.
    done_callbacks: Vec<Callback>,
    /// The most recent error observed by the poll loop, if any. A poll
    /// error does not mark the future done; the worker retries on its next
    /// tick.
    last_error: Option<String>,
}

impl State {
    fn new() -> Self {
        Self {
            done: false,
            cancelled: false,
            started_fired: false,
            jobid_fired: false,
            jobid_callbacks: Vec::new(),
            start_callbacks: Vec::new(),
            done_callbacks: Vec::new(),
            last_error: None,
        }
    }
}

/// Composes an [`HpcProcess`] with a background worker that polls it,
/// fires phase callbacks, and exposes a done/cancel/result API.
///
/// Cloning a `Future` shares the same underlying job and worker thread.
/// The worker keeps polling independently of how many clones are live or
/// dropped; it only stops once the job is observed done or `cancel()` is
/// called, so a `Future` abandoned before either happens leaves its worker
/// polling in the background until the job finishes on its own.
#[derive(Clone)]
pub struct Future {
    process: Arc<dyn HpcProcess>,
    state: Arc<Mutex<State>>,
    condvar: Arc<Condvar>,
    /// Fires when the worker observes completion; used by [`as_completed`].
    done_tx: Arc<Mutex<Option<mpsc::Sender<()>>>>,
}

impl std::fmt::Debug for Future {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Future").field("process", &self.process).finish()
    }
}

impl Future {
    /// Wraps `process` and spawns its background polling worker.
    pub fn new(process: Arc<dyn HpcProcess>) -> Self {
        let future = Future {
            process,
            state: Arc::new(Mutex::new(State::new())),
            condvar: Arc::new(Condvar::new()),
            done_tx: Arc::new(Mutex::new(None)),
        };
        future.spawn_worker();
        future
    }

    fn spawn_worker(&self) {
        let process = self.process.clone();
        let state = self.state.clone();
        let condvar = self.condvar.clone();
        let done_tx = self.done_tx.clone();
        let interval = process.polling_interval();

        thread::spawn(move || {
            loop {
                {
                    let guard = state.lock().expect("future state poisoned");
                    if guard.done {
                        break;
                    }
                }

                let poll_result = process.poll();

                let mut guard = state.lock().expect("future state poisoned");
                if guard.done {
                    break;
                }

                if process.jobid().is_some() && !guard.jobid_fired {
                    guard.jobid_fired = true;
                    let callbacks = std::mem::take(&mut guard.jobid_callbacks);
                    drop(guard);
                    fire(callbacks, &process, &state, &condvar, &done_tx);
                    guard = state.lock().expect("future state poisoned");
                }

                if process.started().is_some() && !guard.started_fired {
                    guard.started_fired = true;
                    let callbacks = std::mem::take(&mut guard.start_callbacks);
                    drop(guard);
                    fire(callbacks, &process, &state, &condvar, &done_tx);
                    guard = state.lock().expect("future state poisoned");
                }

                match poll_result {
                    Ok(Some(_)) => {
                        guard.done = true;
                        let callbacks = std::mem::take(&mut guard.done_callbacks);
                        drop(guard);
                        condvar.notify_all();
                        if let Some(tx) = done_tx.lock().expect("done_tx poisoned").as_ref() {
                            let _ = tx.send(());
                        }
                        fire(callbacks, &process, &state, &condvar, &done_tx);
                        break;
                    }
                    Ok(None) => {
                        drop(guard);
                    }
                    Err(error) => {
                        warn!("poll failed: {error}");
                        guard.last_error = Some(error.to_string());
                        drop(guard);
                    }
                }

                thread::sleep(interval.max(Duration::from_millis(100)));
            }
        });
    }

    /// Whether the job has finished (successfully, by error, or cancel).
    pub fn done(&self) -> bool {
        self.state.lock().expect("future state poisoned").done
    }

    /// Whether `cancel()` has been called.
    pub fn cancelled(&self) -> bool {
        self.state.lock().expect("future state poisoned").cancelled
    }

    /// Requests cancellation. Idempotent: returns `false` if already done.
    pub fn cancel(&self) -> bool {
        let mut guard = self.state.lock().expect("future state poisoned");
        if guard.done {
            return false;
        }
        guard.cancelled = true;
        guard.done = true;
        let callbacks = std::mem::take(&mut guard.done_callbacks);
        drop(guard);

        if let Err(error) = self.process.cancel() {
            warn!("cancel failed: {error}");
        }

        self.condvar.notify_all();
        if let Some(tx) = self.done_tx.lock().expect("done_tx poisoned").as_ref() {
            let _ = tx.send(());
        }
        fire(callbacks, &self.process, &self.state, &self.condvar, &self.done_tx);
        true
    }

    /// Blocks until the job completes, returning its return code. Returns
    /// `1` if the process was cancelled or its return code is unset.
    pub fn result(&self, timeout: Option<Duration>) -> Result<i32, HpcConnectError> {
        let guard = self.state.lock().expect("future state poisoned");
        let (guard, timed_out) = match timeout {
            Some(timeout) => {
                let (guard, result) = self
                    .condvar
                    .wait_timeout_while(guard, timeout, |state| !state.done)
                    .expect("future state poisoned");
                (guard, result.timed_out())
            }
            None => (
                self.condvar.wait_while(guard, |state| !state.done).expect("future state poisoned"),
                false,
            ),
        };

        if timed_out {
            return Err(HpcConnectError::Timeout(timeout.expect("timeout branch")));
        }

        if guard.cancelled {
            return Err(HpcConnectError::JobCancelled);
        }
        drop(guard);

        Ok(self.process.returncode().unwrap_or(1))
    }

    /// Registers a done callback; fires immediately if already done.
    pub fn add_done_callback(&self, callback: impl FnOnce(&Future) + Send + 'static) {
        self.register(callback, |state| state.done, |state| &mut state.done_callbacks);
    }

    /// Registers a jobid callback; fires immediately if already fired.
    pub fn add_jobid_callback(&self, callback: impl FnOnce(&Future) + Send + 'static) {
        self.register(callback, |state| state.jobid_fired, |state| &mut state.jobid_callbacks);
    }

    /// Registers a job-start callback; fires immediately if already fired.
    pub fn add_jobstart_callback(&self, callback: impl FnOnce(&Future) + Send + 'static) {
        self.register(callback, |state| state.started_fired, |state| &mut state.start_callbacks);
    }

    fn register(
        &self,
        callback: impl FnOnce(&Future) + Send + 'static,
        already_fired: impl Fn(&State) -> bool,
        queue: impl Fn(&mut State) -> &mut Vec<Callback>,
    ) {
        let mut guard = self.state.lock().expect("future state poisoned");
        if already_fired(&guard) {
            drop(guard);
            callback(self);
            return;
        }
        queue(&mut guard).push(Box::new(callback));
    }

    /// The underlying scheduler job identifier, once assigned.
    pub fn jobid(&self) -> Option<String> {
        self.process.jobid()
    }

    /// The process's return code, once it has terminated.
    pub fn returncode(&self) -> Option<i32> {
        self.process.returncode()
    }

    /// The most recent error the background poller observed, without
    /// blocking. A transient poll failure (e.g. a scheduler accounting
    /// command timing out) does not mark the future done, so this is the
    /// only way to see it short of watching the `tracing` output.
    pub fn poll_error(&self) -> Option<String> {
        self.state.lock().expect("future state poisoned").last_error.clone()
    }
}

/// Invokes `callbacks` in order, swallowing panics so a misbehaving
/// callback cannot take down the poller.
fn fire(
    callbacks: Vec<Callback>,
    process: &Arc<dyn HpcProcess>,
    state: &Arc<Mutex<State>>,
    condvar: &Arc<Condvar>,
    done_tx: &Arc<Mutex<Option<mpsc::Sender<()>>>>,
) {
    for callback in callbacks {
        let future = Future {
            process: process.clone(),
            state: state.clone(),
            condvar: condvar.clone(),
            done_tx: done_tx.clone(),
        };
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(&future)));
    }
}

/// Yields futures from `futures` in completion order.
///
/// If `timeout` elapses while futures remain pending, every pending future
/// is cancelled and [`HpcConnectError::Timeout`] is raised. `future.result()`
/// is not used to determine completion order — an internal per-future
/// notification channel is, since ordering must reflect wall-clock
/// completion as observed by each future's own poller.
pub fn as_completed(
    futures: Vec<Future>,
    timeout: Option<Duration>,
    cancel_on_exception: bool,
) -> Result<Vec<Future>, HpcConnectError> {
    let (tx, rx) = mpsc::channel();
    for future in &futures {
        let mut already_done = false;
        {
            let mut guard = future.done_tx.lock().expect("done_tx poisoned");
            if future.done() {
                already_done = true;
            } else {
                *guard = Some(tx.clone());
            }
        }
        if already_done {
            let _ = tx.send(());
        }
    }
    drop(tx);

    let deadline = timeout.map(|timeout| Instant::now() + timeout);
    let mut remaining: Vec<Future> = futures.clone();
    let mut ordered = Vec::with_capacity(futures.len());

    while !remaining.is_empty() {
        let recv_result = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    if cancel_on_exception {
                        for future in &remaining {
                            future.cancel();
                        }
                    }
                    return Err(HpcConnectError::Timeout(timeout.expect("deadline branch")));
                }
                rx.recv_timeout(deadline - now)
            }
            None => rx.recv().map_err(|_| mpsc::RecvTimeoutError::Disconnected),
        };

        if recv_result.is_err() {
            if cancel_on_exception {
                for future in &remaining {
                    future.cancel();
                }
            }
            if timeout.is_some() {
                return Err(HpcConnectError::Timeout(timeout.expect("deadline branch")));
            }
            break;
        }

        let (done_now, still_pending): (Vec<Future>, Vec<Future>) =
            remaining.into_iter().partition(|future| future.done());
        ordered.extend(done_now);
        remaining = still_pending;
    }

    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use chrono::Utc;
    use std::sync::atomic::AtomicBool;
    use std::sync::atomic::AtomicI32;
    use std::sync::atomic::Ordering;

    #[derive(Debug)]
    struct FakeProcess {
        polled: AtomicBool,
        done: AtomicBool,
        returncode: AtomicI32,
        cancelled: AtomicBool,
    }

    impl HpcProcess for FakeProcess {
        fn jobid(&self) -> Option<String> {
            Some("1".to_string())
        }

        fn submitted(&self) -> DateTime<Utc> {
            Utc::now()
        }

        fn started(&self) -> Option<DateTime<Utc>> {
            Some(Utc::now())
        }

        fn returncode(&self) -> Option<i32> {
            if self.done.load(Ordering::SeqCst) {
                Some(self.returncode.load(Ordering::SeqCst))
            } else {
                None
            }
        }

        fn poll(&self) -> Result<Option<i32>, HpcConnectError> {
            if self.polled.swap(true, Ordering::SeqCst) {
                self.done.store(true, Ordering::SeqCst);
                return Ok(Some(self.returncode.load(Ordering::SeqCst)));
            }
            Ok(None)
        }

        fn cancel(&self) -> Result<(), HpcConnectError> {
            self.cancelled.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn polling_interval(&self) -> Duration {
            Duration::from_millis(20)
        }
    }

    #[test]
    fn result_returns_exit_code() {
        let process = Arc::new(FakeProcess {
            polled: AtomicBool::new(false),
            done: AtomicBool::new(false),
            returncode: AtomicI32::new(0),
            cancelled: AtomicBool::new(false),
        });
        let future = Future::new(process);
        assert_eq!(future.result(Some(Duration::from_secs(2))).unwrap(), 0);
        assert!(future.done());
    }

    #[derive(Debug)]
    struct FlakyProcess {
        calls: AtomicI32,
    }

    impl HpcProcess for FlakyProcess {
        fn jobid(&self) -> Option<String> {
            None
        }

        fn submitted(&self) -> DateTime<Utc> {
            Utc::now()
        }

        fn started(&self) -> Option<DateTime<Utc>> {
            None
        }

        fn returncode(&self) -> Option<i32> {
            None
        }

        fn poll(&self) -> Result<Option<i32>, HpcConnectError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(HpcConnectError::AccountingUnavailable { jobid: "1".to_string(), attempts: 1 });
            }
            Ok(Some(0))
        }

        fn cancel(&self) -> Result<(), HpcConnectError> {
            Ok(())
        }

        fn polling_interval(&self) -> Duration {
            Duration::from_millis(10)
        }
    }

    #[test]
    fn poll_error_surfaces_a_transient_failure() {
        let future = Future::new(Arc::new(FlakyProcess { calls: AtomicI32::new(0) }));
        future.result(Some(Duration::from_secs(2))).unwrap();
        assert!(future.poll_error().unwrap().contains("accounting unavailable"));
    }

    #[test]
    fn cancel_is_idempotent() {
        let process = Arc::new(FakeProcess {
            polled: AtomicBool::new(true),
            done: AtomicBool::new(false),
            returncode: AtomicI32::new(0),
            cancelled: AtomicBool::new(false),
        });
        let future = Future::new(process);
        assert!(future.cancel());
        assert!(!future.cancel());
        assert!(future.cancelled());
    }
}
