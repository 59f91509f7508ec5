//! Shared loopback-server helpers for the integration tests, mirroring the
//! teacher's `tests/support/mod.rs` (a bare-bones in-process server rather
//! than a full mock HTTP/1 implementation, since these tests drive
//! `hyperflow`'s client against a server we fully control).

#![allow(dead_code)]

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Starts a one-shot HTTP/1 server on an ephemeral port that replies to the
/// first request on each accepted connection with `body` and a `200 OK`,
/// then closes. Returns the bound address.
pub async fn spawn_http_once(body: &'static [u8]) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        read_request_head(&mut sock).await;
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        sock.write_all(response.as_bytes()).await.unwrap();
        sock.write_all(body).await.unwrap();
    });
    addr
}

/// Reads bytes off `sock` until the end of an HTTP request head
/// (`\r\n\r\n`), discarding them. Good enough for tests that don't care
/// about the request body.
async fn read_request_head(sock: &mut TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 512];
    loop {
        let n = sock.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
}

/// Starts a plain TCP echo server (§8 scenario 3/4) on an ephemeral port:
/// every connection gets exactly one `read` echoed back, then the
/// connection is dropped.
pub async fn spawn_tcp_echo() -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 4096];
        let n = sock.read(&mut buf).await.unwrap();
        sock.write_all(&buf[..n]).await.unwrap();
    });
    addr
}
