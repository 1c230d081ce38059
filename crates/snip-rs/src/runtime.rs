//! [`Snip`]: one object wiring the store, the pipeline, the janitor and the
//! prune tool together for a host.
//!
//! ```ignore
//! let snip = Snip::builder(SnipConfig::load(Some(root)).config)
//!     .with_accessor(Arc::new(my_host))
//!     .with_persistence(Arc::new(FilePersistence::new(FilePersistence::default_dir()?)?))
//!     .build();
//!
//! // Once per outbound provider request:
//! let body = snip.rewrite(Some(session_id), &raw).await.unwrap_or(raw);
//! // When the host reports the session idle:
//! snip.on_idle(session_id);
//! ```

use std::sync::Arc;

use tracing::{debug, warn};

use crate::client::Completion;
use crate::config::SnipConfig;
use crate::error::Result;
use crate::handler::RequestHandler;
use crate::host::{NoSessions, SessionAccessor};
use crate::janitor::Janitor;
use crate::notify::{LoggingNotifier, Notifier};
use crate::prune_tool::{PruneArgs, PruneResult, PruneTool};
use crate::state::{MemoryPersistence, Persistence, SessionStore};
use crate::strategy;
use crate::tokens::{CharRatioEstimator, TokenEstimator};

/// Builder for [`Snip`]. Every collaborator has a working default.
pub struct SnipBuilder {
    config: SnipConfig,
    accessor: Arc<dyn SessionAccessor>,
    persistence: Arc<dyn Persistence>,
    notifier: Option<Arc<dyn Notifier>>,
    estimator: Arc<dyn TokenEstimator>,
    completion: Option<Arc<dyn Completion>>,
}

impl SnipBuilder {
    pub fn with_accessor(mut self, accessor: Arc<dyn SessionAccessor>) -> Self {
        self.accessor = accessor;
        self
    }

    pub fn with_persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = persistence;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_estimator(mut self, estimator: Arc<dyn TokenEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    /// Completion client for `ai-analysis`. Without one, a client is built
    /// from the `analysis` config section when present.
    pub fn with_completion(mut self, completion: Arc<dyn Completion>) -> Self {
        self.completion = Some(completion);
        self
    }

    pub fn build(self) -> Snip {
        let config = Arc::new(self.config);
        let notifier = self
            .notifier
            .unwrap_or_else(|| Arc::new(LoggingNotifier::new(config.pruning_summary)));

        let completion = self.completion.or_else(|| {
            let analysis = config.analysis.as_ref()?;
            match analysis.client() {
                Ok(client) => Some(Arc::new(client) as Arc<dyn Completion>),
                Err(e) => {
                    warn!("ai-analysis unavailable: {e}");
                    None
                }
            }
        });
        let on_idle = strategy::build(&config.strategies.on_idle, completion.clone());
        let on_tool = strategy::build(&config.strategies.on_tool, completion);
        debug!(
            "snip ready: {} idle strategy(ies), {} on-tool strategy(ies)",
            on_idle.len(),
            on_tool.len()
        );

        let store = Arc::new(
            SessionStore::new(self.persistence).with_transcript_limit(config.transcript_limit),
        );
        let handler = RequestHandler::new(
            Arc::clone(&store),
            Arc::clone(&config),
            Arc::clone(&self.accessor),
        );
        let janitor = Arc::new(Janitor::new(
            Arc::clone(&store),
            Arc::clone(&config),
            Arc::clone(&self.accessor),
            Arc::clone(&notifier),
            Arc::clone(&self.estimator),
            on_idle,
        ));
        let prune_tool = Arc::new(PruneTool::new(
            Arc::clone(&store),
            Arc::clone(&config),
            Arc::clone(&self.accessor),
            notifier,
            self.estimator,
            on_tool,
        ));

        Snip {
            store,
            config,
            handler,
            janitor,
            prune_tool,
        }
    }
}

/// A configured snip instance.
#[derive(Clone)]
pub struct Snip {
    store: Arc<SessionStore>,
    config: Arc<SnipConfig>,
    handler: RequestHandler,
    janitor: Arc<Janitor>,
    prune_tool: Arc<PruneTool>,
}

impl Snip {
    /// Start from `config` with in-memory persistence, no host sessions and
    /// logging notifications.
    pub fn builder(config: SnipConfig) -> SnipBuilder {
        SnipBuilder {
            config,
            accessor: Arc::new(NoSessions),
            persistence: Arc::new(MemoryPersistence::new()),
            notifier: None,
            estimator: Arc::new(CharRatioEstimator::default()),
            completion: None,
        }
    }

    pub fn config(&self) -> &SnipConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn handler(&self) -> &RequestHandler {
        &self.handler
    }

    pub fn janitor(&self) -> &Arc<Janitor> {
        &self.janitor
    }

    pub fn prune_tool(&self) -> &Arc<PruneTool> {
        &self.prune_tool
    }

    /// Request-rewrite hook. `None` means "send the original body".
    pub async fn rewrite(&self, session_id: Option<&str>, body: &[u8]) -> Option<Vec<u8>> {
        self.handler.rewrite(session_id, body).await
    }

    /// Idle-trigger hook. Runs the janitor in the background; must be
    /// called from within a Tokio runtime.
    pub fn on_idle(&self, session_id: &str) {
        drop(self.janitor.spawn(session_id));
    }

    /// Manual prune by numeric IDs.
    pub async fn prune(&self, session_id: &str, ids: Vec<u64>, reason: Option<String>) -> Result<PruneResult> {
        self.prune_tool.prune(session_id, PruneArgs { ids, reason }).await
    }
}
