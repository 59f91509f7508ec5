//! The executor (§4.D): a dedicated worker thread that drives every attached
//! transfer, whether an `exec`-style HTTP request multiplexed through the
//! [`Reactor`](crate::reactor::Reactor) or a hand-polled `CONNECT_ONLY`
//! socket.
//!
//! Where the original posts raw socket fds to `curl_multi_socket_action` and
//! hand-rolls a poll(2) loop, this crate leans on the fact that a
//! current-thread [`tokio::runtime::Runtime`] already *is* that reactor: the
//! worker thread parks in `Runtime::block_on` on the event loop below, and
//! anything spawned onto the runtime's [`tokio::runtime::Handle`] — from
//! any thread — is guaranteed to run on that same worker thread. That one
//! property is what lets `exec()` be awaited from an arbitrary caller
//! context while still preserving "all callbacks fire on one thread".

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::common::{self, CancelToken, Job, JobQueue};
use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::reactor::{HandleId, Reactor};

/// The event loop never blocks longer than this waiting for a timer or for
/// connect-only readiness, so newly scheduled timers and newly added
/// handles are never starved for more than this long (§4.D step 2/4).
const IDLE_POLL_CAP: Duration = Duration::from_millis(500);
/// A due timer fires this far ahead of its exact deadline if it lets the
/// loop coalesce with other work; mirrors the original's coarse
/// `curl_multi_timeout` slack.
const TIMER_SLACK: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, PartialEq, Eq)]
enum Direction {
    Read,
    Write,
}

struct ExecutorInner {
    rt_handle: tokio::runtime::Handle,
    reactor: Reactor,
    queue: JobQueue,
    attached_http: Mutex<HashMap<HandleId, Handle>>,
    connect_only: Mutex<HashMap<HandleId, Handle>>,
    scheduled: Mutex<BTreeMap<Instant, Vec<Job>>>,
    exit: AtomicBool,
    wake: tokio::sync::Notify,
    thread: Mutex<Option<std::thread::JoinHandle<()>>>,
}

/// A cheap, `Clone`-able handle onto one executor. Cloning shares the same
/// worker thread and state; dropping the last clone (plus the internal
/// self-reference the worker holds while running) shuts the thread down.
#[derive(Clone)]
pub struct Executor {
    inner: Arc<ExecutorInner>,
}

impl Executor {
    /// Spin up a new executor: a dedicated OS thread that builds a
    /// current-thread tokio runtime and parks in the event loop (§4.D).
    ///
    /// Two handshakes happen across the thread boundary: the worker sends
    /// its freshly-built `tokio::runtime::Handle` back first (so the parent
    /// can finish constructing `ExecutorInner`, which needs that handle to
    /// build the `Reactor`), then the parent sends the finished `Executor`
    /// back in so the worker can call `rt.block_on(executor.run(..))` —
    /// `block_on` on a current-thread runtime must run on the thread that
    /// owns the `Runtime`, so the loop itself can't be kicked off any other
    /// way.
    pub fn new() -> Executor {
        let (queue, job_rx) = common::channel();
        let (handle_tx, handle_rx) = std::sync::mpsc::channel::<tokio::runtime::Handle>();
        let (exec_tx, exec_rx) = std::sync::mpsc::channel::<Executor>();

        let thread = std::thread::Builder::new()
            .name("hyperflow-executor".into())
            .spawn(move || {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("failed to build hyperflow executor runtime");
                let _ = handle_tx.send(rt.handle().clone());
                let executor = match exec_rx.recv() {
                    Ok(executor) => executor,
                    Err(_) => return,
                };
                rt.block_on(executor.run(job_rx));
            })
            .expect("failed to spawn hyperflow executor thread");

        let rt_handle = handle_rx
            .recv()
            .expect("hyperflow executor thread died before starting its runtime");

        let inner = Arc::new(ExecutorInner {
            reactor: Reactor::new(rt_handle.clone()),
            rt_handle,
            queue,
            attached_http: Mutex::new(HashMap::new()),
            connect_only: Mutex::new(HashMap::new()),
            scheduled: Mutex::new(BTreeMap::new()),
            exit: AtomicBool::new(false),
            wake: tokio::sync::Notify::new(),
            thread: Mutex::new(Some(thread)),
        });

        let executor = Executor { inner };
        let _ = exec_tx.send(executor.clone());
        executor
    }

    /// The process-wide default executor (analogous to the original's
    /// `executor::get_default()`), created lazily on first use.
    pub fn default_executor() -> Executor {
        static DEFAULT: OnceLock<Executor> = OnceLock::new();
        DEFAULT.get_or_init(Executor::new).clone()
    }

    /// Post a plain closure to run on the worker thread, FIFO with respect
    /// to every other posted job (§4.A).
    pub(crate) fn push(&self, job: Job) {
        self.inner.queue.push(job);
        self.inner.wake.notify_one();
    }

    /// Schedule a closure to run no earlier than `delay` from now (§4.D).
    pub(crate) fn schedule(&self, delay: Duration, job: Job) {
        let deadline = Instant::now() + delay;
        self.inner.scheduled.lock().entry(deadline).or_default().push(job);
        self.inner.wake.notify_one();
    }

    /// Attach a `CONNECT_ONLY` handle for hand-polling (§4.D step 4). The
    /// mutation itself is marshalled through the job queue so it is
    /// serialized with the rest of the worker thread's state changes rather
    /// than applied directly from the caller's thread.
    pub(crate) async fn add_connect_only(&self, handle: Handle) -> Result<()> {
        handle.attach(self.clone())?;
        let id = handle.id();
        let (tx, rx) = oneshot::channel();
        let inner = self.inner.clone();
        self.push(Box::new(move || {
            inner.connect_only.lock().insert(id, handle);
            inner.wake.notify_one();
            let _ = tx.send(());
        }));
        let _ = rx.await;
        Ok(())
    }

    /// Detach a previously-added `CONNECT_ONLY` handle.
    pub(crate) async fn remove_connect_only(&self, id: HandleId) {
        let (tx, rx) = oneshot::channel();
        let inner = self.inner.clone();
        self.push(Box::new(move || {
            inner.connect_only.lock().remove(&id);
            let _ = tx.send(());
        }));
        let _ = rx.await;
    }

    /// Synchronous variant used by [`Handle::reset`], which cannot await.
    /// Fire-and-forget is acceptable here: worst case the socket is polled
    /// one extra loop iteration after the handle has already been reset,
    /// which is harmless since the handle no longer has callbacks to fire.
    pub(crate) fn remove_handle_sync(&self, handle: &Handle) {
        let id = handle.id();
        self.inner.attached_http.lock().remove(&id);
        self.inner.connect_only.lock().remove(&id);
        self.inner.reactor.remove(id);
    }

    /// Drive one HTTP-style transfer to completion (§4.D step 1, §3
    /// `exec_awaiter`). Returns the final status code, or an error —
    /// including [`Error::aborted`] if `cancel` fires first.
    ///
    /// Rejects `CONNECT_ONLY` handles: those are driven by
    /// [`crate::tcp::TcpClient`] instead, never by `exec`.
    pub async fn exec(&self, handle: &Handle, cancel: &CancelToken) -> Result<u16> {
        if handle.is_connect_only() {
            return Err(Error::invalid_argument());
        }
        handle.attach(self.clone())?;
        let id = handle.id();

        let (tx, rx) = oneshot::channel::<Result<u16>>();
        let tx = Arc::new(Mutex::new(Some(tx)));
        handle.set_done_callback({
            let tx = tx.clone();
            Box::new(move |res| {
                if let Some(tx) = tx.lock().take() {
                    let _ = tx.send(res);
                }
            })
        });

        self.inner.attached_http.lock().insert(id, handle.clone());
        self.inner.reactor.add(id, drive_transfer(handle.clone()));

        tokio::select! {
            res = rx => res.unwrap_or_else(|_| Err(Error::aborted())),
            _ = cancel.cancelled() => {
                if let Some(tx) = tx.lock().take() {
                    self.inner.reactor.remove(id);
                    self.inner.attached_http.lock().remove(&id);
                    handle.detach();
                    let _ = tx.send(Err(Error::aborted()));
                }
                Err(Error::aborted())
            }
        }
    }

    /// Spawn an arbitrary future onto the worker thread's runtime. Used by
    /// [`crate::tcp::TcpClient`] and the WebSocket engine for the pieces of
    /// their protocol that are naturally expressed as async tasks (e.g. the
    /// WebSocket send-queue worker) rather than as hand-polled readiness.
    pub(crate) fn spawn<F>(&self, fut: F) -> tokio::task::JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.inner.rt_handle.spawn(fut)
    }

    async fn run(&self, mut job_rx: common::JobReceiver) {
        loop {
            if self.inner.exit.load(Ordering::Acquire) {
                return;
            }

            let timer_sleep = match next_timer_deadline(&self.inner) {
                Some(deadline) => tokio::time::sleep_until(deadline.into()),
                None => tokio::time::sleep(IDLE_POLL_CAP),
            };
            tokio::pin!(timer_sleep);

            tokio::select! {
                biased;

                job = job_rx.recv() => {
                    match job {
                        Some(job) => {
                            job();
                            job_rx.drain_and_run();
                        }
                        None => return,
                    }
                }

                Some(event) = self.inner.reactor.recv_event() => {
                    if let Some(handle) = self.inner.attached_http.lock().remove(&event.id) {
                        handle.detach();
                        if let Some(cb) = handle.take_done_callback() {
                            self.inner.queue.push(Box::new(move || cb(event.result)));
                            self.inner.wake.notify_one();
                        }
                    }
                }

                (id, direction) = poll_connect_only(&self.inner) => {
                    if let Some(handle) = self.inner.connect_only.lock().get(&id).cloned() {
                        match direction {
                            Direction::Read => handle.fire_readable(),
                            Direction::Write => handle.fire_writable(),
                        }
                    }
                }

                _ = &mut timer_sleep => {
                    if let Some(job) = pop_due_timer(&self.inner) {
                        job();
                    }
                }

                _ = self.inner.wake.notified() => {}
            }
        }
    }
}

/// Drives one HTTP-style handle to completion. Delegates to
/// [`crate::http::drive_transfer`] when the `http` feature is on; with the
/// `ws`-only build (no `hyper` dependency available), `exec()` is still
/// reachable but has nothing to drive an HTTP handle with, so it fails
/// immediately instead of failing to compile.
#[cfg(feature = "http")]
fn drive_transfer(handle: Handle) -> impl Future<Output = Result<u16>> + Send + 'static {
    crate::http::drive_transfer(handle)
}

#[cfg(not(feature = "http"))]
fn drive_transfer(_handle: Handle) -> impl Future<Output = Result<u16>> + Send + 'static {
    std::future::ready(Err(Error::invalid_argument()))
}

impl Default for Executor {
    fn default() -> Self {
        Executor::new()
    }
}

impl Drop for ExecutorInner {
    fn drop(&mut self) {
        self.exit.store(true, Ordering::Release);
        self.wake.notify_one();
        if let Some(thread) = self.thread.lock().take() {
            let _ = thread.join();
        }
    }
}

fn next_timer_deadline(inner: &ExecutorInner) -> Option<Instant> {
    inner.scheduled.lock().keys().next().copied()
}

fn pop_due_timer(inner: &ExecutorInner) -> Option<Job> {
    let mut scheduled = inner.scheduled.lock();
    let due = *scheduled.keys().next()?;
    if due > Instant::now() + TIMER_SLACK {
        return None;
    }
    let jobs = scheduled.get_mut(&due).unwrap();
    let job = jobs.remove(0);
    if jobs.is_empty() {
        scheduled.remove(&due);
    }
    Some(job)
}

/// Hand-polls every attached `CONNECT_ONLY` socket's readiness, respecting
/// each handle's pause bits, and resolves with the first one that becomes
/// ready (§4.D step 4). Rebuilds its candidate set each round so handles
/// added, removed, or (un)paused between rounds are picked up promptly.
async fn poll_connect_only(inner: &ExecutorInner) -> (HandleId, Direction) {
    loop {
        let candidates: Vec<(HandleId, Handle)> =
            inner.connect_only.lock().iter().map(|(id, h)| (*id, h.clone())).collect();

        if candidates.is_empty() {
            std::future::pending::<()>().await;
        }

        let mut futs: FuturesUnordered<Pin<Box<dyn Future<Output = (HandleId, Direction)> + Send>>> =
            FuturesUnordered::new();
        for (id, handle) in &candidates {
            let id = *id;
            if let Some(sock) = handle.socket_arc() {
                if !handle.is_paused(crate::handle::Pause::RECV) {
                    let sock = sock.clone();
                    futs.push(Box::pin(async move {
                        let _ = sock.readable().await;
                        (id, Direction::Read)
                    }));
                }
                if !handle.is_paused(crate::handle::Pause::SEND) {
                    let sock = sock.clone();
                    futs.push(Box::pin(async move {
                        let _ = sock.writable().await;
                        (id, Direction::Write)
                    }));
                }
            }
        }

        if futs.is_empty() {
            std::future::pending::<()>().await;
        }

        if let Some(result) = futs.next().await {
            return result;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_executor_is_a_singleton() {
        let a = Executor::default_executor();
        let b = Executor::default_executor();
        assert!(Arc::ptr_eq(&a.inner, &b.inner));
    }

    #[test]
    fn push_runs_job_on_worker_thread() {
        let executor = Executor::new();
        let (tx, rx) = std::sync::mpsc::channel();
        executor.push(Box::new(move || {
            let _ = tx.send(std::thread::current().name().map(|s| s.to_string()));
        }));
        let name = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(name.as_deref(), Some("hyperflow-executor"));
    }

    #[tokio::test]
    async fn exec_rejects_connect_only_handles() {
        let executor = Executor::new();
        let handle = Handle::new();
        handle.set_connect_only(true);
        let cancel = CancelToken::new();
        let result = executor.exec(&handle, &cancel).await;
        assert!(result.is_err());
    }
}
