//! Convenience re-exports for hosts embedding snip.
//!
//! ```ignore
//! use snip_rs::prelude::*;
//! ```

// ── Core ────────────────────────────────────────────────────────────
pub use crate::error::{Result, SnipError};
pub use crate::format::{Format, PRUNED_PLACEHOLDER};
pub use crate::runtime::{Snip, SnipBuilder};

// ── Configuration ───────────────────────────────────────────────────
pub use crate::config::{ConfigIssue, LoadedConfig, SnipConfig};
pub use crate::strategy::StrategyKind;

// ── Host seams ──────────────────────────────────────────────────────
pub use crate::host::{
    HostFuture, NoSessions, Role, SessionAccessor, SessionInfo, Transcript, TranscriptMessage,
    TranscriptPart,
};
pub use crate::notify::{LoggingNotifier, NoopNotifier, Notifier, PruneSummary, Verbosity};
pub use crate::state::{FilePersistence, MemoryPersistence, Persistence, SessionStore};
pub use crate::tokens::{CharRatioEstimator, TokenEstimator};

// ── Entry points ────────────────────────────────────────────────────
pub use crate::handler::{RequestHandler, RewriteOutcome};
pub use crate::janitor::{IdleOutcome, Janitor};
pub use crate::prune_tool::{PruneArgs, PruneResult, PruneTool};
