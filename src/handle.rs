//! The transport handle (§3, §4.B): state of a single transfer, either an
//! HTTP request/response or a `CONNECT_ONLY` raw socket.

use std::fmt;
use std::sync::Arc;

use http::{HeaderMap, Method};
use parking_lot::Mutex;
use tokio::net::TcpStream;

use crate::error::{Error, Logic, Result};
use crate::executor::Executor;
use crate::reactor::HandleId;
use crate::uri::Uri;

/// A minimal `bitflags`-style macro, kept local because the only flag sets
/// in this crate are two bytes wide and don't warrant the `bitflags` crate.
macro_rules! bitflags_like {
    (
        $(#[$meta:meta])*
        pub struct $name:ident: $repr:ty {
            $(const $variant:ident = $value:expr;)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name($repr);

        impl $name {
            $(pub const $variant: $name = $name($value);)*
            pub const NONE: $name = $name(0);

            pub fn contains(self, other: $name) -> bool {
                (self.0 & other.0) == other.0
            }

            pub fn insert(&mut self, other: $name) {
                self.0 |= other.0;
            }

            pub fn remove(&mut self, other: $name) {
                self.0 &= !other.0;
            }
        }

        impl std::ops::BitOr for $name {
            type Output = $name;
            fn bitor(self, rhs: $name) -> $name {
                $name(self.0 | rhs.0)
            }
        }
    };
}

bitflags_like! {
    /// Per-direction pause bits (§3).
    pub struct Pause: u8 {
        const RECV = 0b01;
        const SEND = 0b10;
    }
}

bitflags_like! {
    /// Handle-wide flags (§3).
    pub struct Flags: u8 {
        const CONNECT_ONLY = 0b001;
        const VERBOSE = 0b010;
        const FRESH_CONNECT = 0b100;
    }
}

/// Where the request body comes from.
pub enum RequestBody {
    None,
    Bytes(bytes::Bytes),
    PullCallback(Box<dyn FnMut(&mut [u8]) -> usize + Send>),
}

impl Default for RequestBody {
    fn default() -> Self {
        RequestBody::None
    }
}

/// Where the response body goes.
pub enum ResponseSink {
    Ignore,
    Buffer(Arc<Mutex<Vec<u8>>>),
    PushCallback(Box<dyn FnMut(&[u8]) + Send>),
}

impl Default for ResponseSink {
    fn default() -> Self {
        ResponseSink::Ignore
    }
}

pub(crate) struct Inner {
    pub(crate) id: HandleId,
    pub(crate) url: Option<Uri>,
    pub(crate) method: Method,
    pub(crate) headers: HeaderMap,
    pub(crate) request_body: RequestBody,
    pub(crate) response_sink: ResponseSink,
    pub(crate) progress_cb: Option<Box<dyn FnMut(u64, u64) + Send>>,
    pub(crate) done_cb: Option<Box<dyn FnOnce(Result<u16>) + Send>>,
    pub(crate) header_cb: Option<Box<dyn FnMut(&HeaderMap) + Send>>,
    pub(crate) pause: Pause,
    pub(crate) flags: Flags,
    pub(crate) executor: Option<Executor>,
    pub(crate) socket: Option<Arc<TcpStream>>,
    pub(crate) on_readable: Option<Box<dyn FnMut() + Send>>,
    pub(crate) on_writable: Option<Box<dyn FnMut() + Send>>,
}

impl Default for Inner {
    fn default() -> Self {
        Inner {
            id: HandleId::next(),
            url: None,
            method: Method::GET,
            headers: HeaderMap::new(),
            request_body: RequestBody::None,
            response_sink: ResponseSink::Ignore,
            progress_cb: None,
            done_cb: None,
            header_cb: None,
            pause: Pause::NONE,
            flags: Flags::NONE,
            executor: None,
            socket: None,
            on_readable: None,
            on_writable: None,
        }
    }
}

/// A single transfer: URL, options, per-direction callbacks, pause bits, a
/// completion notifier (§3). Owned by its creator; while attached to an
/// [`Executor`], the executor holds only a non-owning reference.
pub struct Handle {
    pub(crate) inner: Arc<Mutex<Inner>>,
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Handle")
            .field("id", &inner.id)
            .field("method", &inner.method)
            .field("url", &inner.url)
            .field("flags", &inner.flags)
            .field("pause", &inner.pause)
            .finish()
    }
}

impl Default for Handle {
    fn default() -> Self {
        Handle::new()
    }
}

impl Handle {
    pub fn new() -> Handle {
        Handle {
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    pub(crate) fn id(&self) -> HandleId {
        self.inner.lock().id
    }

    pub fn set_url(&self, url: Uri) {
        self.inner.lock().url = Some(url);
    }

    pub fn url(&self) -> Option<Uri> {
        self.inner.lock().url.clone()
    }

    pub fn set_method(&self, method: Method) {
        self.inner.lock().method = method;
    }

    /// Set a header. Fails with [`Error::invalid_option`] if the handle is
    /// already attached to an executor — option setters only validate and
    /// apply before a handle starts its transfer.
    pub fn set_header(&self, name: http::header::HeaderName, value: http::header::HeaderValue) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.executor.is_some() {
            return Err(Error::invalid_option());
        }
        inner.headers.append(name, value);
        Ok(())
    }

    pub fn set_request_body(&self, body: RequestBody) {
        self.inner.lock().request_body = body;
    }

    pub(crate) fn take_request_body(&self) -> RequestBody {
        std::mem::take(&mut self.inner.lock().request_body)
    }

    pub fn set_response_sink(&self, sink: ResponseSink) {
        self.inner.lock().response_sink = sink;
    }

    pub(crate) fn take_response_sink(&self) -> ResponseSink {
        std::mem::take(&mut self.inner.lock().response_sink)
    }

    pub fn set_progress_callback(&self, cb: impl FnMut(u64, u64) + Send + 'static) {
        self.inner.lock().progress_cb = Some(Box::new(cb));
    }

    pub(crate) fn take_progress_callback(&self) -> Option<Box<dyn FnMut(u64, u64) + Send>> {
        self.inner.lock().progress_cb.take()
    }

    pub fn set_header_callback(&self, cb: impl FnMut(&HeaderMap) + Send + 'static) {
        self.inner.lock().header_cb = Some(Box::new(cb));
    }

    pub(crate) fn take_header_callback(&self) -> Option<Box<dyn FnMut(&HeaderMap) + Send>> {
        self.inner.lock().header_cb.take()
    }

    pub(crate) fn method(&self) -> Method {
        self.inner.lock().method.clone()
    }

    pub(crate) fn headers(&self) -> HeaderMap {
        self.inner.lock().headers.clone()
    }

    pub(crate) fn take_done_callback(&self) -> Option<Box<dyn FnOnce(Result<u16>) + Send>> {
        self.inner.lock().done_cb.take()
    }

    pub(crate) fn set_done_callback(&self, cb: Box<dyn FnOnce(Result<u16>) + Send>) {
        self.inner.lock().done_cb = Some(cb);
    }

    pub(crate) fn set_flags(&self, flags: Flags) {
        self.inner.lock().flags.insert(flags);
    }

    pub fn set_connect_only(&self, on: bool) {
        let mut inner = self.inner.lock();
        if on {
            inner.flags.insert(Flags::CONNECT_ONLY);
        } else {
            inner.flags.remove(Flags::CONNECT_ONLY);
        }
    }

    pub fn is_connect_only(&self) -> bool {
        self.inner.lock().flags.contains(Flags::CONNECT_ONLY)
    }

    pub fn set_verbose(&self, on: bool) {
        let mut inner = self.inner.lock();
        if on {
            inner.flags.insert(Flags::VERBOSE);
        } else {
            inner.flags.remove(Flags::VERBOSE);
        }
    }

    pub fn is_verbose(&self) -> bool {
        self.inner.lock().flags.contains(Flags::VERBOSE)
    }

    pub fn pause(&self, mask: Pause) {
        self.inner.lock().pause.insert(mask);
    }

    pub fn unpause(&self, mask: Pause) {
        self.inner.lock().pause.remove(mask);
    }

    pub fn is_paused(&self, mask: Pause) -> bool {
        self.inner.lock().pause.contains(mask)
    }

    pub(crate) fn current_executor(&self) -> Option<Executor> {
        self.inner.lock().executor.clone()
    }

    pub(crate) fn attach(&self, executor: Executor) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.executor.is_some() {
            return Err(Error::logic(Logic::WrongReactor));
        }
        inner.executor = Some(executor);
        #[cfg(feature = "tracing")]
        tracing::trace!(id = ?inner.id, "handle attached to executor");
        Ok(())
    }

    pub(crate) fn detach(&self) {
        let mut inner = self.inner.lock();
        inner.executor = None;
        #[cfg(feature = "tracing")]
        tracing::trace!(id = ?inner.id, "handle detached from executor");
    }

    pub(crate) fn set_socket(&self, socket: TcpStream) {
        self.inner.lock().socket = Some(Arc::new(socket));
    }

    pub(crate) fn take_socket(&self) -> Option<Arc<TcpStream>> {
        self.inner.lock().socket.take()
    }

    /// A cheap clone of the socket handle, usable to await readiness
    /// (`readable()`/`writable()`) without holding the handle's lock across
    /// the `.await` point.
    pub(crate) fn socket_arc(&self) -> Option<Arc<TcpStream>> {
        self.inner.lock().socket.clone()
    }

    pub(crate) fn with_socket<R>(&self, f: impl FnOnce(Option<&TcpStream>) -> R) -> R {
        let inner = self.inner.lock();
        f(inner.socket.as_deref())
    }

    pub(crate) fn set_on_readable(&self, cb: impl FnMut() + Send + 'static) {
        self.inner.lock().on_readable = Some(Box::new(cb));
    }

    pub(crate) fn set_on_writable(&self, cb: impl FnMut() + Send + 'static) {
        self.inner.lock().on_writable = Some(Box::new(cb));
    }

    pub(crate) fn fire_readable(&self) {
        let mut cb = self.inner.lock().on_readable.take();
        if let Some(ref mut f) = cb {
            f();
        }
        if cb.is_some() {
            self.inner.lock().on_readable = cb;
        }
    }

    pub(crate) fn fire_writable(&self) {
        let mut cb = self.inner.lock().on_writable.take();
        if let Some(ref mut f) = cb {
            f();
        }
        if cb.is_some() {
            self.inner.lock().on_writable = cb;
        }
    }

    /// Non-blocking raw read. §4.B: returns bytes read, `Ok(0)` on orderly
    /// close, or `WouldBlock` when no data is currently available.
    pub fn try_recv(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        let inner = self.inner.lock();
        match inner.socket.as_ref() {
            Some(sock) => sock.try_read(buf),
            None => Err(std::io::Error::new(std::io::ErrorKind::NotConnected, "handle has no socket")),
        }
    }

    /// Non-blocking raw write, symmetric to [`Handle::try_recv`].
    pub fn try_send(&self, buf: &[u8]) -> std::io::Result<usize> {
        let inner = self.inner.lock();
        match inner.socket.as_ref() {
            Some(sock) => sock.try_write(buf),
            None => Err(std::io::Error::new(std::io::ErrorKind::NotConnected, "handle has no socket")),
        }
    }

    /// Reset the handle to freshly-constructed state: detach from any
    /// executor/reactor first, then clear all stored callbacks, owned
    /// lists, and flags (§4.B).
    pub fn reset(&self) {
        if let Some(executor) = self.current_executor() {
            executor.remove_handle_sync(self);
        }
        let id = self.inner.lock().id;
        let mut inner = self.inner.lock();
        *inner = Inner::default();
        inner.id = id;
    }
}

impl Clone for Handle {
    fn clone(&self) -> Handle {
        Handle {
            inner: self.inner.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pause_bits_are_independent() {
        let h = Handle::new();
        h.pause(Pause::RECV);
        assert!(h.is_paused(Pause::RECV));
        assert!(!h.is_paused(Pause::SEND));
        h.pause(Pause::SEND);
        assert!(h.is_paused(Pause::RECV));
        assert!(h.is_paused(Pause::SEND));
        h.unpause(Pause::RECV);
        assert!(!h.is_paused(Pause::RECV));
        assert!(h.is_paused(Pause::SEND));
    }

    #[test]
    fn reset_clears_flags_and_keeps_identity() {
        let h = Handle::new();
        let id_before = h.id();
        h.set_connect_only(true);
        h.set_verbose(true);
        h.pause(Pause::RECV);
        h.reset();
        assert!(!h.is_connect_only());
        assert!(!h.is_verbose());
        assert!(!h.is_paused(Pause::RECV));
        assert_eq!(h.id(), id_before);
    }
}
