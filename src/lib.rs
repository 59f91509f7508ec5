//! # hyperflow
//!
//! An asynchronous HTTP/WebSocket client library built on a single worker
//! thread that multiplexes many concurrent transfers through a shared
//! event loop. Applications compose transfers as async operations — await
//! an HTTP request to completion, await the next byte on a TCP stream,
//! await a WebSocket frame — without dedicating a thread per transfer.
//!
//! ## Components
//!
//! - [`Executor`] — the dedicated worker thread and its event loop.
//! - [`Handle`] — a single transfer's state, the unit the executor drives.
//! - [`tcp::TcpClient`] — a raw `CONNECT_ONLY` socket hand-polled by the
//!   executor, the foundation the WebSocket engine is built on.
//! - [`ws::WebSocket`] — RFC 6455 framing, the upgrade handshake,
//!   fragmentation reassembly and UTF-8 validation (`ws` feature).
//! - [`http`] — a small `Request`/`Response` façade over [`Handle`] and
//!   [`Executor::exec`], backed by `hyper` (`http` feature).
//! - [`cookie::Cookie`], [`uri::Uri`] — the supporting data types.
//!
//! ## Optional features
//!
//! - `http` (default): the HTTP request/response façade, via `hyper`.
//! - `ws` (default): the WebSocket engine. Only needs the TCP layer, which
//!   is always compiled in.
//! - `tracing-log` (default): structured logging via `tracing`, emitted
//!   when a handle's [`handle::Handle::set_verbose`] flag is set.

mod common;
pub mod cookie;
pub mod error;
mod executor;
mod handle;
#[cfg(feature = "http")]
pub mod http;
mod reactor;
pub mod tcp;
pub mod uri;
pub(crate) mod primitives;
pub mod utf8;
#[cfg(feature = "ws")]
pub mod ws;

pub use common::CancelToken;
pub use error::{Error, Logic, Result};
pub use executor::Executor;
pub use handle::{Flags, Handle, Pause, RequestBody, ResponseSink};

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// An end-to-end smoke test exercising the executor, a loopback TCP
    /// server, and a `CONNECT_ONLY` `Handle` together (§8 scenario 3/4,
    /// scaled down to a single round-trip rather than a live echo service).
    #[tokio::test]
    async fn tcp_client_roundtrips_through_the_default_executor() {
        use tcp::TcpClient;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 12];
            sock.read_exact(&mut buf).await.unwrap();
            sock.write_all(&buf).await.unwrap();
        });

        let executor = Executor::new();
        let client = TcpClient::new(executor);
        client.connect(&addr.ip().to_string(), addr.port(), false).await.unwrap();

        let sent = client.send_all(b"Hello World\n").await.unwrap();
        assert_eq!(sent, 12);

        let mut buf = [0u8; 12];
        let received = client.recv_all(&mut buf).await.unwrap();
        assert_eq!(received, 12);
        assert_eq!(&buf, b"Hello World\n");

        client.disconnect().await;
        let mut after_close = [0u8; 1];
        tokio::time::timeout(Duration::from_secs(1), async {
            // A follow-up recv after disconnect observes either an error
            // (not connected) or, on a fresh connection, 0 — depending on
            // the peer. Here the client itself has disconnected, so the
            // handle has no socket at all.
            let result = client.recv(&mut after_close).await;
            assert!(result.is_err());
        })
        .await
        .unwrap();
    }

    #[test]
    fn cancel_token_aborts_exec_immediately() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let executor = Executor::new();
            let handle = Handle::new();
            handle.set_url(uri::Uri::parse("http://127.0.0.1:1").unwrap());
            let cancel = CancelToken::new();
            cancel.cancel();
            let result = executor.exec(&handle, &cancel).await;
            assert!(result.unwrap_err().is_aborted());
        });
    }
}
