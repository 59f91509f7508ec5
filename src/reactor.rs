//! The reactor: multiplexes many in-flight, `exec`-driven transfers and
//! dispatches their completion as [`ReactorEvent`]s (§4.C).
//!
//! Handles attached in `CONNECT_ONLY` mode never pass through here — the
//! [`Executor`](crate::executor::Executor) hand-polls those directly
//! instead (§4.D step 4).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Opaque identifier for an attached transfer, stable for its lifetime in
/// the reactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct HandleId(u64);

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

impl HandleId {
    pub(crate) fn next() -> HandleId {
        HandleId(NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A single reactor event: a transfer has concluded, successfully or not.
/// `result` carries the final HTTP status on success, mirroring what
/// `exec()` ultimately hands back to its caller.
pub(crate) struct ReactorEvent {
    pub(crate) id: HandleId,
    pub(crate) result: crate::error::Result<u16>,
}

struct Attached {
    // Keeping the JoinHandle lets `remove` abort a transfer that is still
    // running (e.g. the handle is being detached before it finished).
    task: JoinHandle<()>,
}

/// The per-process (well, per-`Executor`) transfer multiplexer.
pub(crate) struct Reactor {
    rt_handle: tokio::runtime::Handle,
    attached: Mutex<HashMap<HandleId, Attached>>,
    events_tx: mpsc::UnboundedSender<ReactorEvent>,
    events_rx: Mutex<mpsc::UnboundedReceiver<ReactorEvent>>,
}

impl Reactor {
    /// `rt_handle` must be a handle onto the executor's own dedicated
    /// runtime: `add` spawns onto it explicitly (rather than via the
    /// ambient `tokio::spawn`) so that a transfer driven from `exec()`
    /// always executes on the single worker thread, even when `exec()`
    /// itself is awaited from a caller on a different runtime.
    pub(crate) fn new(rt_handle: tokio::runtime::Handle) -> Reactor {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Reactor {
            rt_handle,
            attached: Mutex::new(HashMap::new()),
            events_tx,
            events_rx: Mutex::new(events_rx),
        }
    }

    /// Attach a transfer, driven by `fut`. `fut` must resolve exactly once,
    /// at which point a [`ReactorEvent`] is produced.
    pub(crate) fn add<F>(&self, id: HandleId, fut: F)
    where
        F: std::future::Future<Output = crate::error::Result<u16>> + Send + 'static,
    {
        let events_tx = self.events_tx.clone();
        let task = self.rt_handle.spawn(async move {
            let result = fut.await;
            let _ = events_tx.send(ReactorEvent { id, result });
        });
        self.attached.lock().insert(id, Attached { task });
    }

    /// Detach a transfer. If it is still running, it is aborted; no
    /// `ReactorEvent` will be produced for it afterwards.
    pub(crate) fn remove(&self, id: HandleId) {
        if let Some(attached) = self.attached.lock().remove(&id) {
            attached.task.abort();
        }
    }

    pub(crate) fn is_attached(&self, id: HandleId) -> bool {
        self.attached.lock().contains_key(&id)
    }

    /// Drain one completion event, non-blocking.
    pub(crate) fn next_event(&self) -> Option<ReactorEvent> {
        match self.events_rx.lock().try_recv() {
            Ok(event) => {
                self.attached.lock().remove(&event.id);
                Some(event)
            }
            Err(_) => None,
        }
    }

    /// Await the next completion event. Used by the executor's main select
    /// loop; resolves immediately if one is already queued.
    pub(crate) async fn recv_event(&self) -> Option<ReactorEvent> {
        // The receiver is behind a sync Mutex because it's only ever
        // touched from the single executor worker thread; we still need to
        // hold the lock across `.await`, so guard the await with a local
        // poll_fn instead of holding the MutexGuard across suspension.
        std::future::poll_fn(|cx| {
            let mut rx = self.events_rx.lock();
            rx.poll_recv(cx)
        })
        .await
        .map(|event| {
            self.attached.lock().remove(&event.id);
            event
        })
    }

    #[cfg(test)]
    pub(crate) fn attached_count(&self) -> usize {
        self.attached.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completion_produces_exactly_one_event() {
        let reactor = Reactor::new(tokio::runtime::Handle::current());
        let id = HandleId::next();
        reactor.add(id, async { Ok(200) });
        let event = reactor.recv_event().await.unwrap();
        assert_eq!(event.id, id);
        assert_eq!(event.result.unwrap(), 200);
        assert_eq!(reactor.attached_count(), 0);
    }

    #[tokio::test]
    async fn remove_before_completion_aborts_and_suppresses_event() {
        let reactor = Reactor::new(tokio::runtime::Handle::current());
        let id = HandleId::next();
        reactor.add(id, async {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            Ok(200)
        });
        assert!(reactor.is_attached(id));
        reactor.remove(id);
        assert!(!reactor.is_attached(id));
        assert!(reactor.next_event().is_none());
    }
}
