//! Backend round trip for one admitted request.
//!
//! The request body arrives fully buffered (bounded by the payload limit);
//! the backend response body is relayed chunk by chunk as it arrives. The
//! route timeout bounds the wait for backend response headers and then the
//! wait for each body chunk. Once headers have been relayed a backend failure
//! or stall can only abort the stream. Dropping the relayed body drops the
//! backend response with it, which closes that backend connection.

use actix_web::body::SizedStream;
use actix_web::http::header::{HeaderName, HeaderValue, CONNECTION};
use actix_web::http::{Method, StatusCode};
use actix_web::{HttpRequest, HttpResponse};
use bytes::Bytes;
use futures::Stream;
use ingress_auth::Principal;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::Sleep;

use crate::error::GatewayError;
use crate::metrics::{PROXY_FAILURES, PROXY_LATENCY, PROXY_REQUESTS_TOTAL};
use crate::route_table::ServiceRoute;

/// Connection-scoped headers, never forwarded in either direction (RFC 9110 §7.6.1).
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Client request headers the gateway recomputes or owns.
const REQUEST_HEADERS_TO_STRIP: &[&str] = &[
    "host",
    "content-length",
    USER_ID_HEADER,
    USER_ROLE_HEADER,
    USER_EMAIL_HEADER,
];

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";
pub const USER_EMAIL_HEADER: &str = "x-user-email";

/// Bytes of each backend body kept for the end-of-stream debug log.
pub const PREVIEW_BYTES: usize = 200;

/// Forward `req` to `route` and relay the backend response.
pub async fn forward(
    client: &reqwest::Client,
    req: &HttpRequest,
    route: &ServiceRoute,
    body: Bytes,
    principal: Option<&Principal>,
) -> Result<HttpResponse, GatewayError> {
    check_path(req.path())?;

    let method = reqwest::Method::from_bytes(req.method().as_str().as_bytes())
        .map_err(|_| GatewayError::BadRequest(format!("unsupported method {}", req.method())))?;
    let target_url = route.target_url(req.path(), req.uri().query());

    let mut headers = outbound_headers(req);
    if let Some(principal) = principal {
        inject_identity(&mut headers, principal);
    }
    let body = encode_body(&mut headers, body);

    tracing::debug!(
        service = %route.name,
        method = %method,
        original_uri = %req.uri(),
        target = %target_url,
        "forwarding request"
    );

    let mut builder = client.request(method, &target_url).headers(headers);
    if let Some(body) = body {
        builder = builder.body(body);
    }

    let started = Instant::now();
    let response = match tokio::time::timeout(route.timeout, builder.send()).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => return Err(unreachable(route, e)),
        Err(_) => return Err(timed_out(route, &target_url)),
    };

    let latency = started.elapsed();
    PROXY_LATENCY
        .with_label_values(&[route.name.as_str()])
        .observe(latency.as_secs_f64());

    relay(route, req.method(), response, started)
}

/// Reject paths that decode to dot-dot segments or control characters.
pub fn check_path(path: &str) -> Result<(), GatewayError> {
    let decoded = urlencoding::decode(path)
        .map_err(|_| GatewayError::BadRequest("invalid URL encoding in path".to_string()))?;

    if decoded.split(['/', '\\']).any(|segment| segment == "..") {
        return Err(GatewayError::BadRequest(
            "path traversal not allowed".to_string(),
        ));
    }
    if decoded.contains(['\r', '\n', '\0']) {
        return Err(GatewayError::BadRequest(
            "path must not contain control characters".to_string(),
        ));
    }
    Ok(())
}

/// Lowercased header names listed in `Connection` values.
fn connection_tokens<'a>(values: impl Iterator<Item = &'a str>) -> Vec<String> {
    values
        .flat_map(|v| v.split(','))
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|token| !token.is_empty())
        .collect()
}

fn outbound_headers(req: &HttpRequest) -> reqwest::header::HeaderMap {
    let listed = connection_tokens(
        req.headers()
            .get_all(CONNECTION)
            .filter_map(|v| v.to_str().ok()),
    );

    let mut out = reqwest::header::HeaderMap::new();
    for (name, value) in req.headers().iter() {
        let name = name.as_str();
        if HOP_BY_HOP_HEADERS.contains(&name)
            || REQUEST_HEADERS_TO_STRIP.contains(&name)
            || listed.iter().any(|l| l == name)
        {
            continue;
        }
        if let (Ok(n), Ok(v)) = (
            reqwest::header::HeaderName::from_bytes(name.as_bytes()),
            reqwest::header::HeaderValue::from_bytes(value.as_bytes()),
        ) {
            out.append(n, v);
        }
    }
    out
}

fn inject_identity(headers: &mut reqwest::header::HeaderMap, principal: &Principal) {
    let mut set = |name: &'static str, value: &str| {
        match reqwest::header::HeaderValue::from_bytes(value.as_bytes()) {
            Ok(v) => {
                headers.insert(name, v);
            }
            Err(_) => tracing::warn!(header = name, "identity value is not a valid header value"),
        }
    };

    set(USER_ID_HEADER, &principal.user_id);
    set(USER_ROLE_HEADER, &principal.role);
    if let Some(email) = &principal.email {
        set(USER_EMAIL_HEADER, email);
    }
}

fn is_json(headers: &reqwest::header::HeaderMap) -> bool {
    headers
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|essence| {
            let essence = essence.trim().to_ascii_lowercase();
            essence == "application/json" || essence.ends_with("+json")
        })
        .unwrap_or(false)
}

/// Final outbound body. JSON bodies are re-serialized; `Content-Length` is
/// always taken from the bytes actually sent.
fn encode_body(headers: &mut reqwest::header::HeaderMap, body: Bytes) -> Option<Bytes> {
    if body.is_empty() {
        return None;
    }

    let payload = if is_json(headers) {
        match serde_json::from_slice::<serde_json::Value>(&body) {
            Ok(value) => match serde_json::to_vec(&value) {
                Ok(serialized) => {
                    headers.insert(
                        reqwest::header::CONTENT_TYPE,
                        reqwest::header::HeaderValue::from_static("application/json"),
                    );
                    Bytes::from(serialized)
                }
                Err(_) => body,
            },
            Err(e) => {
                tracing::debug!(error = %e, "body declared as JSON does not parse, forwarding as-is");
                body
            }
        }
    } else {
        body
    };

    headers.insert(
        reqwest::header::CONTENT_LENGTH,
        reqwest::header::HeaderValue::from(payload.len()),
    );
    Some(payload)
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn timeout_ms(route: &ServiceRoute) -> u64 {
    millis(route.timeout)
}

fn elapsed_ms(started: Instant) -> u64 {
    millis(started.elapsed())
}

fn timed_out(route: &ServiceRoute, target_url: &str) -> GatewayError {
    PROXY_FAILURES
        .with_label_values(&[route.name.as_str(), "timeout"])
        .inc();
    tracing::error!(
        service = %route.name,
        target = %target_url,
        timeout_ms = timeout_ms(route),
        "backend did not respond in time"
    );
    GatewayError::BackendTimeout {
        service: route.name.clone(),
        timeout_ms: timeout_ms(route),
    }
}

fn unreachable(route: &ServiceRoute, error: reqwest::Error) -> GatewayError {
    if error.is_timeout() {
        return timed_out(route, &route.origin());
    }

    let kind = if error.is_connect() { "connect" } else { "request" };
    PROXY_FAILURES
        .with_label_values(&[route.name.as_str(), kind])
        .inc();
    tracing::error!(
        service = %route.name,
        target = %route.origin(),
        error = %error,
        "backend request failed"
    );
    GatewayError::BackendUnreachable {
        service: route.name.clone(),
        target: route.origin(),
        detail: error.to_string(),
    }
}

fn relay_header(name: &str, listed: &[String]) -> bool {
    !(HOP_BY_HOP_HEADERS.contains(&name)
        || name == "content-length"
        || name.starts_with("access-control-")
        || listed.iter().any(|l| l == name))
}

fn relay(
    route: &ServiceRoute,
    method: &Method,
    response: reqwest::Response,
    started: Instant,
) -> Result<HttpResponse, GatewayError> {
    let status = StatusCode::from_u16(response.status().as_u16()).map_err(|e| {
        PROXY_FAILURES
            .with_label_values(&[route.name.as_str(), "status"])
            .inc();
        GatewayError::MalformedResponse {
            service: route.name.clone(),
            detail: e.to_string(),
        }
    })?;

    PROXY_REQUESTS_TOTAL
        .with_label_values(&[route.name.as_str(), status.as_str()])
        .inc();
    tracing::debug!(
        service = %route.name,
        status = status.as_u16(),
        latency_ms = elapsed_ms(started),
        "backend responded"
    );

    let listed = connection_tokens(
        response
            .headers()
            .get_all(reqwest::header::CONNECTION)
            .iter()
            .filter_map(|v| v.to_str().ok()),
    );

    let mut builder = HttpResponse::build(status);
    for (name, value) in response.headers() {
        if !relay_header(name.as_str(), &listed) {
            continue;
        }
        match (
            HeaderName::from_bytes(name.as_str().as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            (Ok(n), Ok(v)) => {
                builder.append_header((n, v));
            }
            _ => tracing::debug!(header = %name, "dropping backend header that cannot be relayed"),
        }
    }

    let bodiless = *method == Method::HEAD
        || status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED;
    if bodiless {
        return Ok(builder.finish());
    }

    let length = response.content_length();
    let stream = RelayStream::new(
        Box::pin(response.bytes_stream()),
        route.name.clone(),
        started,
        route.timeout,
    );
    Ok(match length {
        Some(len) => builder.body(SizedStream::new(len, stream)),
        None => builder.streaming(stream),
    })
}

/// Why a relayed body ended early.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("backend body failed: {0}")]
    Backend(#[from] reqwest::Error),

    #[error("backend sent no body data for {idle_ms}ms")]
    Stalled { idle_ms: u64 },
}

/// Passes backend body chunks through untouched, keeping the first
/// [`PREVIEW_BYTES`] for the completion log. Fails the stream when the
/// backend goes `idle_timeout` without sending a chunk.
struct RelayStream<S> {
    inner: S,
    service: String,
    started: Instant,
    idle_timeout: Duration,
    idle: Pin<Box<Sleep>>,
    preview: Vec<u8>,
    relayed: u64,
    finished: bool,
}

impl<S> RelayStream<S> {
    fn new(inner: S, service: String, started: Instant, idle_timeout: Duration) -> Self {
        Self {
            inner,
            service,
            started,
            idle_timeout,
            idle: Box::pin(tokio::time::sleep(idle_timeout)),
            preview: Vec::with_capacity(PREVIEW_BYTES),
            relayed: 0,
            finished: false,
        }
    }

    fn observe(&mut self, chunk: &Bytes) {
        let room = PREVIEW_BYTES.saturating_sub(self.preview.len());
        self.preview
            .extend_from_slice(&chunk[..room.min(chunk.len())]);
        self.relayed += chunk.len() as u64;

        let deadline = tokio::time::Instant::now() + self.idle_timeout;
        self.idle.as_mut().reset(deadline);
    }

    fn preview_text(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.preview).into_owned();
        if self.relayed > self.preview.len() as u64 {
            text.push_str("...");
        }
        text
    }

    fn abort(&mut self, kind: &str, error: &RelayError) {
        self.finished = true;
        PROXY_FAILURES
            .with_label_values(&[self.service.as_str(), kind])
            .inc();
        tracing::error!(
            service = %self.service,
            relayed_bytes = self.relayed,
            error = %error,
            "backend body failed after headers were sent, aborting response"
        );
    }
}

impl<S> Stream for RelayStream<S>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Unpin,
{
    type Item = Result<Bytes, RelayError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if this.finished {
            return Poll::Ready(None);
        }

        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.observe(&chunk);
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                let error = RelayError::from(e);
                this.abort("stream", &error);
                Poll::Ready(Some(Err(error)))
            }
            Poll::Ready(None) => {
                this.finished = true;
                tracing::debug!(
                    service = %this.service,
                    bytes = this.relayed,
                    elapsed_ms = elapsed_ms(this.started),
                    preview = %this.preview_text(),
                    "backend body relayed"
                );
                Poll::Ready(None)
            }
            Poll::Pending => match this.idle.as_mut().poll(cx) {
                Poll::Ready(()) => {
                    let error = RelayError::Stalled {
                        idle_ms: millis(this.idle_timeout),
                    };
                    this.abort("stalled", &error);
                    Poll::Ready(Some(Err(error)))
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

impl<S> Drop for RelayStream<S> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!(
                service = %self.service,
                relayed_bytes = self.relayed,
                "client went away before the backend body completed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;
    use futures::StreamExt;

    #[test]
    fn test_check_path_rejects_traversal() {
        assert!(check_path("/users/42").is_ok());
        assert!(check_path("/users/a..b").is_ok());
        assert!(check_path("/users/../admin").is_err());
        assert!(check_path("/users/%2e%2e/admin").is_err());
        assert!(check_path("/users/..%5cadmin").is_err());
        assert!(check_path("/users/%0d%0aSet-Cookie").is_err());
    }

    #[test]
    fn test_outbound_headers_strip_hop_by_hop_and_identity() {
        let req = TestRequest::default()
            .insert_header(("connection", "keep-alive, x-internal-hop"))
            .insert_header(("x-internal-hop", "1"))
            .insert_header(("keep-alive", "timeout=5"))
            .insert_header(("x-user-id", "spoofed"))
            .insert_header(("x-user-role", "admin"))
            .insert_header(("accept", "application/json"))
            .insert_header(("x-request-id", "abc"))
            .to_http_request();

        let headers = outbound_headers(&req);
        assert!(headers.get("connection").is_none());
        assert!(headers.get("keep-alive").is_none());
        assert!(headers.get("x-internal-hop").is_none());
        assert!(headers.get("x-user-id").is_none());
        assert!(headers.get("x-user-role").is_none());
        assert_eq!(headers.get("accept").unwrap(), "application/json");
        assert_eq!(headers.get("x-request-id").unwrap(), "abc");
    }

    #[test]
    fn test_identity_replaces_client_values() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("x-user-id", "spoofed".parse().unwrap());
        let principal = Principal::new("42", "admin").with_email("a@b.c");

        inject_identity(&mut headers, &principal);

        assert_eq!(headers.get_all("x-user-id").iter().count(), 1);
        assert_eq!(headers.get("x-user-id").unwrap(), "42");
        assert_eq!(headers.get("x-user-role").unwrap(), "admin");
        assert_eq!(headers.get("x-user-email").unwrap(), "a@b.c");
    }

    #[test]
    fn test_json_body_content_length_matches_serialized_bytes() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            "application/json; charset=utf-8".parse().unwrap(),
        );
        let raw = Bytes::from_static(b"{ \"name\" :  \"channel\",\n  \"private\": true }");

        let sent = encode_body(&mut headers, raw.clone()).unwrap();

        assert!(sent.len() < raw.len());
        assert_eq!(
            headers.get(reqwest::header::CONTENT_LENGTH).unwrap(),
            &sent.len().to_string()
        );
        assert_eq!(headers.get(reqwest::header::CONTENT_TYPE).unwrap(), "application/json");
        let parsed: serde_json::Value = serde_json::from_slice(&sent).unwrap();
        assert_eq!(parsed["name"], "channel");
    }

    #[test]
    fn test_non_json_and_invalid_json_forwarded_as_is() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::CONTENT_TYPE, "text/plain".parse().unwrap());
        let raw = Bytes::from_static(b"{ not: json");
        assert_eq!(encode_body(&mut headers, raw.clone()).unwrap(), raw);

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::CONTENT_TYPE, "application/json".parse().unwrap());
        assert_eq!(encode_body(&mut headers, raw.clone()).unwrap(), raw);
        assert_eq!(
            headers.get(reqwest::header::CONTENT_LENGTH).unwrap(),
            &raw.len().to_string()
        );
    }

    #[test]
    fn test_empty_body_not_sent() {
        let mut headers = reqwest::header::HeaderMap::new();
        assert!(encode_body(&mut headers, Bytes::new()).is_none());
        assert!(headers.get(reqwest::header::CONTENT_LENGTH).is_none());
    }

    #[test]
    fn test_response_header_filter() {
        let listed = connection_tokens(["close, x-hop"].into_iter());
        assert!(!relay_header("transfer-encoding", &listed));
        assert!(!relay_header("content-length", &listed));
        assert!(!relay_header("access-control-allow-origin", &listed));
        assert!(!relay_header("x-hop", &listed));
        assert!(relay_header("set-cookie", &listed));
        assert!(relay_header("content-type", &listed));
    }

    #[actix_rt::test]
    async fn test_relay_stream_passes_chunks_and_bounds_preview() {
        let chunks: Vec<Result<Bytes, reqwest::Error>> = vec![
            Ok(Bytes::from(vec![b'a'; 150])),
            Ok(Bytes::from(vec![b'b'; 150])),
        ];
        let mut stream = RelayStream::new(
            futures::stream::iter(chunks),
            "UserService".to_string(),
            Instant::now(),
            Duration::from_secs(5),
        );

        let mut total = 0;
        while let Some(chunk) = stream.next().await {
            total += chunk.unwrap().len();
        }

        assert_eq!(total, 300);
        assert_eq!(stream.preview.len(), PREVIEW_BYTES);
        assert!(stream.preview_text().ends_with("..."));
        assert!(stream.finished);
    }

    #[actix_rt::test]
    async fn test_relay_stream_fails_when_backend_stalls() {
        let first: Result<Bytes, reqwest::Error> = Ok(Bytes::from_static(b"hello"));
        let stalled = futures::stream::iter(vec![first]).chain(futures::stream::pending());
        let mut stream = RelayStream::new(
            Box::pin(stalled),
            "ChannelService".to_string(),
            Instant::now(),
            Duration::from_millis(50),
        );

        assert_eq!(stream.next().await.unwrap().unwrap(), "hello");
        let ended = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("stalled body must fail within the idle timeout");
        assert!(matches!(ended, Some(Err(RelayError::Stalled { idle_ms: 50 }))));
        assert!(stream.next().await.is_none());
    }

    #[actix_rt::test]
    async fn test_relay_stream_idle_deadline_resets_per_chunk() {
        let slow_chunks = futures::stream::iter(0..4).then(|i| async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            Ok::<_, reqwest::Error>(Bytes::from(vec![b'x'; i + 1]))
        });
        let mut stream = RelayStream::new(
            Box::pin(slow_chunks),
            "ChannelService".to_string(),
            Instant::now(),
            Duration::from_millis(100),
        );

        let mut total = 0;
        while let Some(chunk) = stream.next().await {
            total += chunk.unwrap().len();
        }
        assert_eq!(total, 1 + 2 + 3 + 4);
    }
}
