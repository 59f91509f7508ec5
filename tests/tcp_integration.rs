//! §8 scenario 3 (TCP echo) and scenario 4 (recv issued before send),
//! run against an in-process loopback echo server.

mod support;

use hyperflow::tcp::TcpClient;
use hyperflow::Executor;

#[tokio::test]
async fn send_all_then_recv_round_trips_through_the_echo_server() {
    let addr = support::spawn_tcp_echo().await;
    let executor = Executor::new();
    let client = TcpClient::new(executor);
    client
        .connect(&addr.ip().to_string(), addr.port(), false)
        .await
        .unwrap();

    let sent = client.send_all(b"Hello World\n").await.unwrap();
    assert_eq!(sent, 12);

    let mut buf = [0u8; 12];
    let received = client.recv_all(&mut buf).await.unwrap();
    assert_eq!(received, 12);
    assert_eq!(&buf, b"Hello World\n");
}

#[tokio::test]
async fn recv_issued_before_send_still_observes_the_echoed_bytes() {
    let addr = support::spawn_tcp_echo().await;
    let executor = Executor::new();
    let client = std::sync::Arc::new(TcpClient::new(executor));
    client
        .connect(&addr.ip().to_string(), addr.port(), false)
        .await
        .unwrap();

    let reader = {
        let client = client.clone();
        tokio::spawn(async move {
            let mut buf = [0u8; 12];
            let n = client.recv_all(&mut buf).await.unwrap();
            (n, buf)
        })
    };

    // Give the spawned recv a chance to install itself before the send
    // lands, matching §8 scenario 4's "async read precedes send" ordering.
    tokio::task::yield_now().await;

    let sent = client.send_all(b"Hello World\n").await.unwrap();
    assert_eq!(sent, 12);

    let (received, buf) = reader.await.unwrap();
    assert_eq!(received, 12);
    assert_eq!(&buf, b"Hello World\n");
}
