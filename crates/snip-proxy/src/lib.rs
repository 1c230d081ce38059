//! HTTP interceptor that prunes stale tool outputs from LLM provider requests.
//!
//! Point an agent's provider base URL at the proxy. Every request is
//! forwarded to the configured upstream; JSON POST bodies in a known format
//! are rewritten by [`snip_rs`] first. Responses stream back untouched.
//!
//! # Quick start
//!
//! ```ignore
//! use snip_proxy::{ProxyConfig, spawn_proxy};
//! use snip_rs::{Snip, SnipConfig};
//!
//! let config = ProxyConfig::new("https://api.anthropic.com");
//! let (addr, snip) = spawn_proxy(Snip::builder(SnipConfig::default()), config).await?;
//! println!("ANTHROPIC_BASE_URL=http://{addr}");
//! ```
//!
//! # Session headers
//!
//! The proxy cannot see the host's sessions, so the host labels requests:
//!
//! - `x-snip-session`: session the request belongs to. Without it the
//!   request is rewritten against the union of every known session.
//! - `x-snip-parent-session`: marks the session as a subagent of that parent.
//!   Subagent requests pass through unmodified.
//!
//! Neither header is forwarded upstream.
//!
//! # Control endpoints
//!
//! | Route | Effect |
//! |-------|--------|
//! | `POST /_snip/sessions/{id}/idle` | Run the idle pass in the background (202) |
//! | `POST /_snip/sessions/{id}/prune` | Manual prune, body `{"ids": [..], "reason": ".."}` |
//! | `GET /_snip/sessions/{id}` | Pruning state of a session |
//! | `GET /_snip/tool` | Function-calling definition of the prune tool |
//!
//! Transcripts for the idle pass and manual prunes are recorded from the
//! request bodies themselves by [`RecordingAccessor`].

mod api;
mod forward;
pub mod recorder;
mod server;

pub use recorder::RecordingAccessor;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use snip_rs::{Snip, SnipBuilder};

use crate::api::ProxyState;

/// Session the request belongs to.
pub const SESSION_HEADER: &str = "x-snip-session";
/// Parent of a subagent session.
pub const PARENT_HEADER: &str = "x-snip-parent-session";

/// Configuration for the proxy server.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Address to bind to. Default: `127.0.0.1:8787`.
    pub bind_addr: SocketAddr,
    /// Base URL requests are forwarded to. The request path is appended.
    pub upstream: String,
    /// Largest request body accepted. Default: 64 MiB.
    pub body_limit: usize,
}

impl ProxyConfig {
    pub fn new(upstream: impl Into<String>) -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8787)),
            upstream: upstream.into(),
            body_limit: 64 * 1024 * 1024,
        }
    }

    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }
}

/// Spawn the proxy on a Tokio task.
///
/// Installs a [`RecordingAccessor`] as the builder's session accessor and
/// returns the bound address with the [`Snip`] instance serving it. The
/// server runs until the Tokio runtime shuts down.
pub async fn spawn_proxy(
    builder: SnipBuilder,
    config: ProxyConfig,
) -> snip_rs::Result<(SocketAddr, Snip)> {
    let recorder = Arc::new(RecordingAccessor::new());
    let snip = builder.with_accessor(recorder.clone()).build();

    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .user_agent(concat!("snip-proxy/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let state = ProxyState {
        snip: snip.clone(),
        recorder,
        client,
        upstream: Arc::from(config.upstream.trim_end_matches('/')),
        body_limit: config.body_limit,
    };
    let router = server::build_router(state);
    let addr = server::start_server(router, config.bind_addr).await?;
    Ok((addr, snip))
}
