//! §8 scenario 1 ("GET google.de") and scenario 2 (cancellation race),
//! run against an in-process loopback server instead of the public
//! internet so this crate builds and tests offline.

mod support;

use hyperflow::http;
use hyperflow::{CancelToken, Executor};

#[tokio::test]
async fn get_against_loopback_server_returns_200_with_body() {
    let addr = support::spawn_http_once(b"hello from hyperflow").await;
    let url = format!("http://{addr}/");

    let response = http::get(&url).unwrap().execute().await.unwrap();

    assert_eq!(response.status, 200);
    assert!(response.is_success());
    assert_eq!(&response.body[..], b"hello from hyperflow");
}

#[tokio::test]
async fn cancelling_before_completion_resolves_aborted() {
    let addr = support::spawn_http_once(b"unused").await;
    let url = format!("http://{addr}/");
    let executor = Executor::new();
    let cancel = CancelToken::new();
    cancel.cancel();

    let result = http::get(&url)
        .unwrap()
        .execute_on(&executor, &cancel)
        .await;

    assert!(result.unwrap_err().is_aborted());
}
