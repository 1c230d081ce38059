//! Forwarding of provider requests, rewritten on the way out.
//!
//! The request body is buffered (it has to be parsed to be rewritten); the
//! upstream response is streamed back as it arrives, so SSE completions keep
//! flowing token by token.

use axum::body::{Body, Bytes, to_bytes};
use axum::extract::{Request, State};
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::Value;
use snip_rs::Format;
use tracing::{debug, warn};

use crate::api::ProxyState;
use crate::{PARENT_HEADER, SESSION_HEADER};

/// Connection-scoped headers that must not cross the proxy.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Fallback handler: rewrite (when applicable) and forward upstream.
pub async fn forward(State(proxy): State<ProxyState>, req: Request) -> Response {
    let (parts, body) = req.into_parts();
    let body = match to_bytes(body, proxy.body_limit).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return (
                StatusCode::PAYLOAD_TOO_LARGE,
                format!("failed to read request body: {e}"),
            )
                .into_response();
        }
    };

    let session = header_value(&parts.headers, SESSION_HEADER);
    let parent = header_value(&parts.headers, PARENT_HEADER);

    let body = if parts.method == Method::POST {
        match rewrite_body(&proxy, session.as_deref(), parent, &body).await {
            Some(rewritten) => Bytes::from(rewritten),
            None => body,
        }
    } else {
        body
    };

    let path = parts
        .uri
        .path_and_query()
        .map(|p| p.as_str())
        .unwrap_or("/");
    let url = format!("{}{path}", proxy.upstream);

    let mut headers = parts.headers;
    strip_headers(&mut headers);
    headers.remove(header::HOST);
    headers.remove(header::CONTENT_LENGTH);
    headers.remove(SESSION_HEADER);
    headers.remove(PARENT_HEADER);

    let sent = proxy
        .client
        .request(parts.method, &url)
        .headers(headers)
        .body(body)
        .send()
        .await;

    match sent {
        Ok(upstream) => stream_back(upstream),
        Err(e) => {
            warn!("Upstream request to {url} failed: {e}");
            (
                StatusCode::BAD_GATEWAY,
                format!("upstream request failed: {e}"),
            )
                .into_response()
        }
    }
}

/// Rewrite the body and record the session's transcript. `None` means the
/// original bytes should be sent.
async fn rewrite_body(
    proxy: &ProxyState,
    session: Option<&str>,
    parent: Option<String>,
    raw: &[u8],
) -> Option<Vec<u8>> {
    let mut value: Value = serde_json::from_slice(raw).ok()?;
    let format = Format::detect(&value)?;

    // The transcript is taken from the body as the host sent it, but only
    // after the rewrite has registered its call positions.
    let history = match session {
        Some(id) => {
            proxy.recorder.set_parent(id, parent);
            format.data(&value).cloned()
        }
        None => None,
    };

    let outcome = proxy.snip.handler().rewrite_value(session, &mut value).await;

    if let (Some(id), Some(history)) = (session, history) {
        record(proxy, id, format, &history).await;
    }

    if !outcome.is_modified() {
        return None;
    }
    match serde_json::to_vec(&value) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            warn!("Failed to serialize rewritten body, forwarding original: {e}");
            None
        }
    }
}

/// Turn the body's history into a transcript for later idle passes and
/// manual prunes.
async fn record(proxy: &ProxyState, session_id: &str, format: Format, data: &[Value]) {
    let store = proxy.snip.store();
    store.ensure(session_id, proxy.recorder.as_ref()).await;
    let transcript = store.with_session(session_id, |state| format.transcript(data, state));
    debug!("Recorded {} message(s) for {session_id}", transcript.len());
    proxy.recorder.record(session_id, transcript);
}

fn stream_back(upstream: reqwest::Response) -> Response {
    let status = upstream.status();
    let mut headers = upstream.headers().clone();
    strip_headers(&mut headers);

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

fn strip_headers(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
