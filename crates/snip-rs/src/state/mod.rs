//! Per-session state: pruned IDs, tool metadata, counters, numeric aliases.
//!
//! - **[`session`]**: [`SessionState`] and its parts ([`ToolCache`],
//!   [`ToolTracker`], [`PendingGarbage`], [`SessionStats`]).
//! - **[`ids`]**: [`IdRegistry`], numeric aliases for provider call IDs.
//! - **[`store`]**: [`SessionStore`], the process-wide owner of all sessions.
//! - **[`persist`]**: [`Persistence`] backends for the durable subset.

pub mod ids;
pub mod persist;
pub mod session;
pub mod store;

pub use ids::IdRegistry;
pub use persist::{FilePersistence, MemoryPersistence, PersistedSession, Persistence};
pub use session::{
    PendingGarbage, SessionState, SessionStats, ToolCache, ToolCallRecord, ToolTracker,
    is_protected,
};
pub use store::SessionStore;

/// Tool-call IDs are compared case-insensitively; this is their canonical form.
pub fn normalize_id(id: &str) -> String {
    id.to_lowercase()
}
