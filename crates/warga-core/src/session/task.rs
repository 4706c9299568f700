use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(pub u64);

#[derive(Debug, Default)]
pub struct TaskSeq {
    next: u64,
}

impl TaskSeq {
    pub fn next_id(&mut self) -> TaskId {
        let id = TaskId(self.next);
        self.next = self.next.wrapping_add(1);
        id
    }
}

/// How a profile fetch affects `loading`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    /// Triggered by an identity delivery; holds `loading` until it resolves.
    InitialLoad,
    /// Refresh of an already loaded session; never touches `loading`.
    Background,
}

/// Outstanding initial-load fetches for the current identity.
///
/// Cleared whenever the identity changes, so completions from earlier
/// identities no longer count towards `loading`.
#[derive(Debug, Default, Clone)]
pub struct FetchTracker {
    active: HashSet<TaskId>,
}

impl FetchTracker {
    pub fn is_running(&self) -> bool {
        !self.active.is_empty()
    }

    pub fn on_started(&mut self, id: TaskId) {
        self.active.insert(id);
    }

    pub fn finish_if_active(&mut self, id: TaskId) -> bool {
        self.active.remove(&id)
    }

    pub fn clear(&mut self) {
        self.active.clear();
    }
}
