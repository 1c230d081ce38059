//! Tool-output pruning for LLM request bodies.
//!
//! `snip-rs` sits between a conversational agent and the provider APIs it
//! calls. It rewrites each outbound request so that tool outputs the
//! conversation no longer needs are replaced with a one-line placeholder.
//! Token cost and context pressure stay flat over a long session, and the
//! persisted history is never touched.
//!
//! # Quick start
//!
//! ```no_run
//! use snip_rs::{Snip, SnipConfig};
//!
//! # async fn send(body: &[u8]) {
//! let snip = Snip::builder(SnipConfig::default()).build();
//! let outbound = snip.rewrite(Some("ses_1"), body).await;
//! let outbound = outbound.as_deref().unwrap_or(body);
//! # let _ = outbound;
//! # }
//! ```
//!
//! # Where to find things
//!
//! - **Wire formats:** [`Format`](format::Format) detects a body's shape
//!   (OpenAI Chat / Anthropic, Gemini, OpenAI Responses) and implements the
//!   extract / inject / replace contract for it. See [`format`].
//!
//! - **Deciding what to prune:** the [`Strategy`](strategy::Strategy) trait,
//!   [`deduplicate`](strategy::deduplicate) for repeated identical calls, and
//!   [`AnalysisStrategy`](strategy::AnalysisStrategy) for model-assisted
//!   review.
//!
//! - **Per-session state:** [`SessionStore`](state::SessionStore) owns the
//!   pruned sets, tool metadata, counters and numeric aliases of every
//!   session; [`Persistence`](state::Persistence) saves the durable part.
//!
//! - **Entry points:** [`RequestHandler`](handler::RequestHandler) (rewrite
//!   hook), [`Janitor`](janitor::Janitor) (idle hook),
//!   [`PruneTool`](prune_tool::PruneTool) (agent-facing manual prune). The
//!   [`Snip`](runtime::Snip) builder wires all three.
//!
//! - **Host seams:** [`SessionAccessor`](host::SessionAccessor),
//!   [`Notifier`](notify::Notifier), [`TokenEstimator`](tokens::TokenEstimator).
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`format`] | Format detection and per-format adapters |
//! | [`state`] | Session state, numeric IDs, store, persistence |
//! | [`strategy`] | Deduplication and AI-analysis strategies |
//! | [`inject`] | Synthetic instruction, nudge, prunable-tools listing |
//! | [`handler`] | The request-rewrite pipeline |
//! | [`janitor`] | The idle pass |
//! | [`prune_tool`] | The `prune` tool |
//! | [`config`] | Layered configuration |
//! | [`notify`] | Prune summaries and notification sinks |

pub mod client;
pub mod config;
pub mod error;
pub mod format;
pub mod handler;
pub mod host;
pub mod inject;
pub mod janitor;
pub mod logging;
pub mod notify;
pub mod prelude;
pub mod prune_tool;
pub mod runtime;
pub mod state;
pub mod strategy;
pub mod tokens;

pub use config::SnipConfig;
pub use error::{Result, SnipError};
pub use format::{Format, PRUNED_PLACEHOLDER};
pub use runtime::{Snip, SnipBuilder};
