//! The raw TCP client (§4.E): a `CONNECT_ONLY` handle wrapped in a
//! send/recv trampoline protocol, for callers that want a socket rather
//! than an HTTP transfer — this is what the WebSocket engine is built on.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::TcpStream;

use crate::error::{Error, Logic, Result};
use crate::executor::Executor;
use crate::handle::{Flags, Handle, Pause};

/// What a data-available callback asks the client to do next, mirroring
/// the original's `callback_result` bitset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackResult {
    /// Keep receiving and keep the callback installed.
    None,
    /// Pause receiving; the callback stays installed for when
    /// [`TcpClient::pause_receive`] unpauses it.
    Pause,
    /// Pause receiving and drop the callback.
    Clear,
}

struct State {
    /// Guards `send`/`send_all`/`recv`/`recv_all` against being called
    /// again while a previous call on the same direction hasn't resolved —
    /// the original's "not possible to use `recv()` concurrently with
    /// itself" invariant (§4.E half-duplex-per-direction rule).
    recv_busy: bool,
    send_busy: bool,
    recv_handler: Option<Arc<Mutex<dyn FnMut(bool) -> CallbackResult + Send>>>,
}

impl Default for State {
    fn default() -> Self {
        State {
            recv_busy: false,
            send_busy: false,
            recv_handler: None,
        }
    }
}

/// A `CONNECT_ONLY` socket, driven by the same [`Executor`] that drives
/// `exec`-style HTTP transfers, but hand-polled rather than multiplexed
/// through the reactor (§4.D step 4).
pub struct TcpClient {
    handle: Handle,
    executor: Executor,
    state: Mutex<State>,
}

impl TcpClient {
    pub fn new(executor: Executor) -> TcpClient {
        let handle = Handle::new();
        handle.set_connect_only(true);
        TcpClient {
            handle,
            executor,
            state: Mutex::new(State::default()),
        }
    }

    pub fn with_default_executor() -> TcpClient {
        TcpClient::new(Executor::default_executor())
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub(crate) fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn is_connected(&self) -> bool {
        self.handle.with_socket(|s| s.is_some())
    }

    /// Install a callback invoked whenever the socket becomes readable.
    /// `recv_raw` is the only receive call valid from inside it (mirrors
    /// the original's doc note — calling [`TcpClient::recv`]/`recv_all`
    /// concurrently with this is a caller bug, not guarded against here
    /// any more than the original guarded against it).
    pub fn set_on_data_available(&self, cb: impl FnMut(bool) -> CallbackResult + Send + 'static) {
        let handler: Arc<Mutex<dyn FnMut(bool) -> CallbackResult + Send>> = Arc::new(Mutex::new(cb));
        self.state.lock().recv_handler = Some(handler.clone());
        self.install_recv_trampoline(handler);
    }

    fn install_recv_trampoline(&self, handler: Arc<Mutex<dyn FnMut(bool) -> CallbackResult + Send>>) {
        let handle = self.handle.clone();
        handle.set_on_readable(move || {
            let disconnected = handle.with_socket(|s| s.is_none());
            let result = (handler.lock())(disconnected);
            match result {
                CallbackResult::None => {
                    handle.unpause(Pause::RECV);
                }
                CallbackResult::Pause => {
                    handle.pause(Pause::RECV);
                }
                CallbackResult::Clear => {
                    handle.pause(Pause::RECV);
                }
            }
        });
    }

    /// Non-blocking raw read: `Ok(n)` bytes read, `Ok(0)` on orderly close,
    /// or `Err(WouldBlock)` if nothing is available right now.
    pub fn recv_raw(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.handle.try_recv(buf)
    }

    pub fn pause_receive(&self, paused: bool) {
        if paused {
            self.handle.pause(Pause::RECV);
        } else {
            self.handle.unpause(Pause::RECV);
            if let Some(handler) = self.state.lock().recv_handler.clone() {
                self.install_recv_trampoline(handler);
            }
        }
    }

    /// Connect to `remote:port`. `tls` is accepted for interface parity
    /// but rejected — see §4.E in the design notes.
    pub async fn connect(&self, remote: &str, port: u16, tls: bool) -> Result<()> {
        if tls {
            return Err(Error::invalid_argument());
        }
        self.handle.set_flags(Flags::CONNECT_ONLY | Flags::FRESH_CONNECT);
        let socket = TcpStream::connect((remote, port)).await?;
        socket.set_nodelay(true).ok();
        self.handle.set_socket(socket);
        self.executor.add_connect_only(self.handle.clone()).await?;
        #[cfg(feature = "tracing")]
        tracing::debug!(%remote, port, "tcp client connected");
        Ok(())
    }

    /// Close the connection and reset the underlying handle (§4.B
    /// `reset()`), so the client can be reused for a new `connect`.
    pub async fn disconnect(&self) {
        #[cfg(feature = "tracing")]
        tracing::debug!("tcp client disconnecting");
        let id = self.handle.id();
        self.executor.remove_connect_only(id).await;
        self.handle.take_socket();
        self.handle.detach();
        self.handle.reset();
        self.handle.set_connect_only(true);
    }

    /// Send up to `buf.len()` bytes, returning however many the kernel
    /// accepted this round (possibly fewer than requested, possibly 0 on
    /// orderly close).
    pub async fn send(&self, buf: &[u8]) -> Result<usize> {
        self.send_one_round(buf).await
    }

    /// Send every byte in `buf`, looping until the kernel has accepted all
    /// of it or the connection closes (in which case the partial count is
    /// returned, matching the original's "0 on close" contract only for a
    /// fully-empty send).
    pub async fn send_all(&self, buf: &[u8]) -> Result<usize> {
        let mut sent = 0;
        while sent < buf.len() {
            let n = self.send_one_round(&buf[sent..]).await?;
            if n == 0 {
                break;
            }
            sent += n;
        }
        Ok(sent)
    }

    async fn send_one_round(&self, buf: &[u8]) -> Result<usize> {
        {
            let mut state = self.state.lock();
            if state.send_busy {
                return Err(Error::logic(Logic::InProgress));
            }
            state.send_busy = true;
        }
        let result = self.wait_writable_then(buf).await;
        self.state.lock().send_busy = false;
        result
    }

    async fn wait_writable_then(&self, buf: &[u8]) -> Result<usize> {
        if let Some(sock) = self.handle.socket_arc() {
            if buf.is_empty() {
                return Ok(0);
            }
            loop {
                match sock.try_write(buf) {
                    Ok(n) => return Ok(n),
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        sock.writable().await?;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        } else {
            Err(Error::logic(Logic::NotConnected))
        }
    }

    /// Receive up to `buf.len()` bytes, returning however many arrived
    /// this round, or `Ok(0)` on orderly close.
    pub async fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        self.recv_one_round(buf).await
    }

    /// Receive exactly `buf.len()` bytes, looping until the buffer is full
    /// or the connection closes (in which case the partial count is
    /// returned).
    pub async fn recv_all(&self, buf: &mut [u8]) -> Result<usize> {
        let mut received = 0;
        while received < buf.len() {
            let n = self.recv_one_round(&mut buf[received..]).await?;
            if n == 0 {
                break;
            }
            received += n;
        }
        Ok(received)
    }

    async fn recv_one_round(&self, buf: &mut [u8]) -> Result<usize> {
        {
            let mut state = self.state.lock();
            if state.recv_busy {
                return Err(Error::logic(Logic::InProgress));
            }
            state.recv_busy = true;
        }
        let result = self.wait_readable_then(buf).await;
        self.state.lock().recv_busy = false;
        result
    }

    async fn wait_readable_then(&self, buf: &mut [u8]) -> Result<usize> {
        if let Some(sock) = self.handle.socket_arc() {
            if buf.is_empty() {
                return Ok(0);
            }
            loop {
                match sock.try_read(buf) {
                    Ok(n) => return Ok(n),
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        sock.readable().await?;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        } else {
            Err(Error::logic(Logic::NotConnected))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn connect_send_recv_against_loopback_echo() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 5];
            sock.read_exact(&mut buf).await.unwrap();
            sock.write_all(&buf).await.unwrap();
        });

        let executor = Executor::new();
        let client = TcpClient::new(executor);
        client.connect(&addr.ip().to_string(), addr.port(), false).await.unwrap();
        assert!(client.is_connected());

        let sent = client.send_all(b"hello").await.unwrap();
        assert_eq!(sent, 5);

        let mut buf = [0u8; 5];
        let received = client.recv_all(&mut buf).await.unwrap();
        assert_eq!(received, 5);
        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn tls_connect_is_rejected() {
        let executor = Executor::new();
        let client = TcpClient::new(executor);
        let result = client.connect("127.0.0.1", 0, true).await;
        assert!(result.is_err());
    }
}
