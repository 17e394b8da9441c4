//! Per-stack-name mutual exclusion for in-process callers

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Set of stack names with an in-flight mutating call.
///
/// Acquisition never blocks: a held name is reported to the caller instead.
#[derive(Debug, Clone, Default)]
pub struct StackLocks {
    held: Arc<Mutex<HashSet<String>>>,
}

impl StackLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to take the lock for `name`; `None` if another call holds it
    pub fn try_acquire(&self, name: &str) -> Option<StackLockGuard> {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        if !held.insert(name.to_string()) {
            return None;
        }
        Some(StackLockGuard {
            name: name.to_string(),
            held: Arc::clone(&self.held),
        })
    }

    pub fn is_held(&self, name: &str) -> bool {
        self.held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(name)
    }
}

/// Releases the stack name on drop
#[derive(Debug)]
pub struct StackLockGuard {
    name: String,
    held: Arc<Mutex<HashSet<String>>>,
}

impl StackLockGuard {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for StackLockGuard {
    fn drop(&mut self) {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        held.remove(&self.name);
    }
}
