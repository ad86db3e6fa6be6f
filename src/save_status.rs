use crate::autosave::SaveState;
use crate::model::SetKey;
use std::collections::HashMap;

/// Save state per set, keyed `session:exercise:setNumber`.
///
/// Owned by whoever drives a session; create it when the session view opens
/// and `clear` it when the view closes.
#[derive(Debug, Default, Clone)]
pub struct SaveStatusStore {
    entries: HashMap<String, SaveState>,
}

impl SaveStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &SetKey, state: SaveState) {
        self.entries.insert(key.to_string(), state);
    }

    pub fn get(&self, key: &SetKey) -> SaveState {
        self.entries
            .get(&key.to_string())
            .copied()
            .unwrap_or(SaveState::Idle)
    }

    pub fn remove(&mut self, key: &SetKey) {
        self.entries.remove(&key.to_string());
    }

    pub fn count(&self, state: SaveState) -> usize {
        self.entries.values().filter(|s| **s == state).count()
    }

    /// True while anything is waiting on the debounce or the sink
    pub fn has_unsaved(&self) -> bool {
        self.entries
            .values()
            .any(|s| matches!(s, SaveState::Pending | SaveState::Saving))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
