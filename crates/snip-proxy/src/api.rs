//! Control endpoint handlers under `/_snip/`.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::Value;
use snip_rs::prune_tool::{PruneResult, PruneTool};
use snip_rs::state::SessionStats;
use snip_rs::{Snip, SnipError};

use crate::recorder::RecordingAccessor;

/// Shared state passed to every handler via axum's `State` extractor.
#[derive(Clone)]
pub struct ProxyState {
    pub snip: Snip,
    pub recorder: Arc<RecordingAccessor>,
    pub client: reqwest::Client,
    /// Upstream base URL without a trailing slash.
    pub upstream: Arc<str>,
    pub body_limit: usize,
}

/// Pruning state of one session.
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: String,
    pub subagent: bool,
    pub pruned_ids: Vec<String>,
    pub stats: SessionStats,
    pub cached_tools: usize,
    /// Tool results seen since the last manual prune.
    pub since_last_prune: usize,
    pub skip_next_idle: bool,
}

/// GET /_snip/sessions/{id}. 404 for sessions the proxy has not seen.
pub async fn get_session(
    State(proxy): State<ProxyState>,
    Path(id): Path<String>,
) -> Result<Json<SessionSnapshot>, StatusCode> {
    let subagent = proxy.recorder.is_subagent(&id);
    proxy
        .snip
        .store()
        .read(&id, |state| {
            let mut pruned_ids: Vec<String> = state.pruned_ids().iter().cloned().collect();
            pruned_ids.sort();
            SessionSnapshot {
                session_id: id.clone(),
                subagent,
                pruned_ids,
                stats: state.stats,
                cached_tools: state.tools.len(),
                since_last_prune: state.tracker.since_last_prune,
                skip_next_idle: state.tracker.skip_next_idle,
            }
        })
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

/// POST /_snip/sessions/{id}/idle. Always 202; the pass runs detached.
pub async fn post_idle(State(proxy): State<ProxyState>, Path(id): Path<String>) -> StatusCode {
    proxy.snip.on_idle(&id);
    StatusCode::ACCEPTED
}

/// Response body of a manual prune.
#[derive(Serialize, Debug)]
pub struct PruneResponse {
    #[serde(flatten)]
    pub result: PruneResult,
    /// The text an agent would receive as the tool output.
    pub output: String,
}

/// POST /_snip/sessions/{id}/prune. Body: the prune tool's arguments.
///
/// Returns 400 when the arguments fail schema validation.
pub async fn post_prune(
    State(proxy): State<ProxyState>,
    Path(id): Path<String>,
    body: String,
) -> Response {
    match proxy.snip.prune_tool().execute(&id, &body).await {
        Ok(result) => {
            let output = result.render();
            Json(PruneResponse { result, output }).into_response()
        }
        Err(e @ SnipError::InvalidArguments(_)) => {
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// GET /_snip/tool. Function-calling definition of the prune tool.
pub async fn get_tool() -> Json<Value> {
    Json(PruneTool::definition())
}
