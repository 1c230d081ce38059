//! Numeric aliases for opaque provider tool-call IDs.
//!
//! Provider call IDs (`toolu_01A9...`, `call_abc...`) are long and
//! meaningless to the model. The registry hands out small integers in
//! first-seen order so the agent can ask for pruning by number. A pair is
//! never reassigned, not even after its output is pruned.

use std::collections::HashMap;

use super::normalize_id;

/// Bidirectional map between numeric IDs and normalized actual IDs.
#[derive(Debug, Clone)]
pub struct IdRegistry {
    next_id: u64,
    to_actual: HashMap<u64, String>,
    to_numeric: HashMap<String, u64>,
}

impl IdRegistry {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            to_actual: HashMap::new(),
            to_numeric: HashMap::new(),
        }
    }

    /// Return the numeric ID for `actual_id`, minting the next one if this is
    /// the first time the ID is seen.
    pub fn get_or_create(&mut self, actual_id: &str) -> u64 {
        let key = normalize_id(actual_id);
        if let Some(&numeric) = self.to_numeric.get(&key) {
            return numeric;
        }
        let numeric = self.next_id;
        self.next_id += 1;
        self.to_actual.insert(numeric, key.clone());
        self.to_numeric.insert(key, numeric);
        numeric
    }

    /// Actual (normalized) ID for a numeric alias.
    pub fn actual_id(&self, numeric: u64) -> Option<&str> {
        self.to_actual.get(&numeric).map(String::as_str)
    }

    /// Numeric alias for an actual ID, if one was minted.
    pub fn numeric_id(&self, actual_id: &str) -> Option<u64> {
        self.to_numeric.get(&normalize_id(actual_id)).copied()
    }

    /// Number of aliases handed out so far.
    pub fn len(&self) -> usize {
        self.to_actual.len()
    }

    pub fn is_empty(&self) -> bool {
        self.to_actual.is_empty()
    }
}

impl Default for IdRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assigns_sequential_ids_in_first_seen_order() {
        let mut reg = IdRegistry::new();
        assert_eq!(reg.get_or_create("call_a"), 1);
        assert_eq!(reg.get_or_create("call_b"), 2);
        assert_eq!(reg.get_or_create("call_c"), 3);
        // Repeated lookups are stable.
        assert_eq!(reg.get_or_create("call_b"), 2);
        assert_eq!(reg.get_or_create("call_a"), 1);
        assert_eq!(reg.len(), 3);
    }

    #[test]
    fn lookups_are_case_insensitive() {
        let mut reg = IdRegistry::new();
        reg.get_or_create("Toolu_ABC");
        assert_eq!(reg.numeric_id("toolu_abc"), Some(1));
        assert_eq!(reg.actual_id(1), Some("toolu_abc"));
        assert_eq!(reg.get_or_create("TOOLU_abc"), 1);
    }

    #[test]
    fn missing_lookups_return_none() {
        let reg = IdRegistry::new();
        assert_eq!(reg.actual_id(7), None);
        assert_eq!(reg.numeric_id("nope"), None);
        assert!(reg.is_empty());
    }

    #[test]
    fn replay_reproduces_assignment() {
        let order = ["x", "y", "x", "z"];
        let mut first = IdRegistry::new();
        for id in order {
            first.get_or_create(id);
        }
        let mut rebuilt = IdRegistry::new();
        for id in order {
            rebuilt.get_or_create(id);
        }
        for id in ["x", "y", "z"] {
            assert_eq!(first.numeric_id(id), rebuilt.numeric_id(id));
        }
    }
}
