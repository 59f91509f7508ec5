//! The HTTP request/response façade (§6), a thin builder over
//! [`http::Request`]/[`http::Response`] wired to a [`Handle`] and driven by
//! [`Executor::exec`]. `drive_transfer` is the function the [`Executor`]
//! spawns for every attached HTTP-style handle (§4.D step 1); it is the
//! Rust equivalent of the original's `curl_multi_socket_action`-driven
//! transfer, expressed as a single async function over a `hyper::Client`
//! instead of a state machine fed by socket-readiness callbacks.

use std::sync::Arc;

use http::{HeaderMap, HeaderName, HeaderValue, Method};
use http_body::Body as _;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::handle::{Handle, RequestBody, ResponseSink};
use crate::common::CancelToken;
use crate::uri::Uri;

#[cfg(feature = "tracing")]
fn trace_verbose(msg: impl std::fmt::Display) {
    tracing::trace!("* {}", msg);
}

#[cfg(not(feature = "tracing"))]
fn trace_verbose(_msg: impl std::fmt::Display) {}

/// A parsed HTTP response (§6): status, headers, and the body, already
/// collected into memory (callers wanting a streamed body should use
/// [`Handle::set_response_sink`] with [`ResponseSink::PushCallback`]
/// directly instead of this convenience type).
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: bytes::Bytes,
}

impl Response {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// A builder for a single HTTP request, wrapping a freshly-created
/// [`Handle`] (§6 "the façade configures a handle accordingly").
pub struct Request {
    handle: Handle,
}

impl Request {
    pub fn new(method: Method, url: Uri) -> Request {
        let handle = Handle::new();
        handle.set_method(method);
        handle.set_url(url);
        Request { handle }
    }

    pub fn get(url: &str) -> Result<Request> {
        Ok(Request::new(Method::GET, Uri::parse(url)?))
    }

    pub fn post(url: &str) -> Result<Request> {
        Ok(Request::new(Method::POST, Uri::parse(url)?))
    }

    pub fn header(self, name: HeaderName, value: HeaderValue) -> Result<Request> {
        self.handle.set_header(name, value)?;
        Ok(self)
    }

    pub fn body(self, bytes: impl Into<bytes::Bytes>) -> Request {
        self.handle.set_request_body(RequestBody::Bytes(bytes.into()));
        self
    }

    pub fn verbose(self, on: bool) -> Request {
        self.handle.set_verbose(on);
        self
    }

    /// The underlying handle, for callers who need lower-level control
    /// (custom response sink, progress callback) before calling `exec`
    /// directly rather than going through [`Request::execute`].
    pub fn into_handle(self) -> Handle {
        self.handle
    }

    /// Runs the request to completion on the process-wide default
    /// executor, with no cancellation.
    pub async fn execute(self) -> Result<Response> {
        self.execute_on(&Executor::default_executor(), &CancelToken::new()).await
    }

    /// Runs the request to completion, rejecting with [`Error::is_aborted`]
    /// true if `cancel` fires first (§8 scenario 2, the cancellation race).
    pub async fn execute_async(self, cancel: &CancelToken) -> Result<Response> {
        self.execute_on(&Executor::default_executor(), cancel).await
    }

    pub async fn execute_on(self, executor: &Executor, cancel: &CancelToken) -> Result<Response> {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        self.handle.set_response_sink(ResponseSink::Buffer(buffer.clone()));
        let headers = Arc::new(Mutex::new(HeaderMap::new()));
        {
            let headers = headers.clone();
            self.handle.set_header_callback(move |h| {
                *headers.lock() = h.clone();
            });
        }

        let status = executor.exec(&self.handle, cancel).await?;
        let body = bytes::Bytes::from(buffer.lock().clone());
        Ok(Response {
            status,
            headers: headers.lock().clone(),
            body,
        })
    }
}

/// `http_request::get(url)` style convenience, matching §8 scenario 1.
pub fn get(url: &str) -> Result<Request> {
    Request::get(url)
}

/// Drives one HTTP-style [`Handle`] to completion against its configured
/// URL/method/headers/body, writing the response into its configured
/// [`ResponseSink`] and invoking its header/progress callbacks (§4.D step
/// 1). This is what [`Executor::exec`] hands to the
/// [`Reactor`](crate::reactor::Reactor).
///
/// `https://` is rejected: the `hyper` transport here is wired with a
/// plain-TCP connector only, matching the `CONNECT_ONLY` TCP layer's own
/// TLS restriction (§4.E) — no TLS crate is part of this stack.
pub(crate) async fn drive_transfer(handle: Handle) -> Result<u16> {
    let url = handle.url().ok_or_else(Error::invalid_argument)?;
    if url.scheme().eq_ignore_ascii_case("https") {
        return Err(Error::invalid_argument());
    }

    if handle.is_verbose() {
        trace_verbose(format!("About to connect() to {} port {}", url.host(), url.port().unwrap_or(80)));
    }

    let method = handle.method();
    let request_headers = handle.headers();
    let body = handle.take_request_body();

    let mut builder = hyper::Request::builder().method(method).uri(url.to_string());
    for (name, value) in request_headers.iter() {
        builder = builder.header(name, value);
    }

    let body = match body {
        RequestBody::None => hyper::Body::empty(),
        RequestBody::Bytes(bytes) => hyper::Body::from(bytes),
        RequestBody::PullCallback(mut pull) => {
            let mut collected = Vec::new();
            let mut chunk = [0u8; 8192];
            loop {
                let n = pull(&mut chunk);
                if n == 0 {
                    break;
                }
                collected.extend_from_slice(&chunk[..n]);
            }
            hyper::Body::from(collected)
        }
    };

    let request = builder.body(body).map_err(Error::transport)?;

    let client = hyper::Client::new();
    let response = client.request(request).await.map_err(Error::transport)?;
    let status = response.status().as_u16();

    if handle.is_verbose() {
        trace_verbose(format!("< HTTP/1.1 {}", status));
    }

    if let Some(mut cb) = handle.take_header_callback() {
        cb(response.headers());
    }

    let mut sink = handle.take_response_sink();
    let mut progress_cb = handle.take_progress_callback();
    let mut received: u64 = 0;
    let mut body = response.into_body();

    loop {
        let chunk = match body.data().await {
            Some(chunk) => chunk.map_err(Error::transport)?,
            None => break,
        };
        received += chunk.len() as u64;
        match &mut sink {
            ResponseSink::Ignore => {}
            ResponseSink::Buffer(buf) => buf.lock().extend_from_slice(&chunk),
            ResponseSink::PushCallback(push) => push(&chunk),
        }
        if let Some(ref mut cb) = progress_cb {
            cb(received, 0);
        }
    }

    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_is_success_checks_2xx_range() {
        let r = Response {
            status: 204,
            headers: HeaderMap::new(),
            body: bytes::Bytes::new(),
        };
        assert!(r.is_success());
        let r = Response {
            status: 404,
            ..r
        };
        assert!(!r.is_success());
    }
}
