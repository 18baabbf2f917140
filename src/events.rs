//! Statement lifecycle events and the bus that dispatches them.
//!
//! SeaORM has no native statement event source, so the crate ships one: an
//! [`EventBus`] instance that engine adapters fire into and listener sets
//! bind against. Registration is explicit: every hook gets a [`HookId`]
//! and removal goes through the same bus instance, never through ambient
//! global lookup.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use sea_orm::{DbBackend, DbErr};

use crate::params::QueryParams;
use crate::state::ContextId;

/// Driver-reported statistics for a completed statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CursorStats {
    pub last_insert_id: Option<u64>,
    pub rows_affected: Option<u64>,
}

/// A statement lifecycle notification, fired immediately before or after a
/// statement is sent to the driver. Ephemeral; hooks borrow it for the
/// duration of the call.
#[derive(Debug)]
pub struct QueryEvent<'a> {
    /// The logical execution context the statement runs under.
    pub context: ContextId,
    pub connection_id: u64,
    pub backend: DbBackend,
    pub statement: &'a str,
    pub parameters: &'a QueryParams,
    /// Populated on after-execute events; empty before execution.
    pub cursor: CursorStats,
    pub is_batch: bool,
}

/// A statement failure notification.
#[derive(Debug)]
pub struct ErrorEvent<'a> {
    pub context: ContextId,
    pub connection_id: u64,
    pub backend: DbBackend,
    pub statement: &'a str,
    pub parameters: &'a QueryParams,
    /// The original driver error; it propagates to the caller unmodified.
    pub exception: &'a DbErr,
    pub is_disconnect: bool,
}

/// Identifies one registered hook for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

pub type QueryHook = Arc<dyn Fn(&QueryEvent<'_>) + Send + Sync>;
pub type ErrorHook = Arc<dyn Fn(&ErrorEvent<'_>) + Send + Sync>;

/// Registry and dispatcher for the three statement lifecycle hooks.
#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    before: Mutex<Vec<(HookId, QueryHook)>>,
    after: Mutex<Vec<(HookId, QueryHook)>>,
    error: Mutex<Vec<(HookId, ErrorHook)>>,
}

// Hooks run inline with the statement; a panicking hook must not poison the
// registry for every later statement.
fn lock<'a, T>(mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> HookId {
        HookId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn on_before_execute(&self, hook: QueryHook) -> HookId {
        let id = self.next_id();
        lock(&self.before).push((id, hook));
        id
    }

    pub fn on_after_execute(&self, hook: QueryHook) -> HookId {
        let id = self.next_id();
        lock(&self.after).push((id, hook));
        id
    }

    pub fn on_error(&self, hook: ErrorHook) -> HookId {
        let id = self.next_id();
        lock(&self.error).push((id, hook));
        id
    }

    /// Remove a previously registered hook. Returns `false` if the id is
    /// unknown (already removed ids are not an error).
    pub fn remove(&self, id: HookId) -> bool {
        let mut removed = false;
        for hooks in [&self.before, &self.after] {
            let mut hooks = lock(hooks);
            let len = hooks.len();
            hooks.retain(|(hook_id, _)| *hook_id != id);
            removed |= hooks.len() != len;
        }
        let mut hooks = lock(&self.error);
        let len = hooks.len();
        hooks.retain(|(hook_id, _)| *hook_id != id);
        removed |= hooks.len() != len;
        removed
    }

    /// Total number of registered hooks across all three events.
    pub fn hook_count(&self) -> usize {
        lock(&self.before).len() + lock(&self.after).len() + lock(&self.error).len()
    }

    pub fn emit_before_execute(&self, event: &QueryEvent<'_>) {
        let hooks: Vec<QueryHook> = lock(&self.before)
            .iter()
            .map(|(_, hook)| Arc::clone(hook))
            .collect();
        for hook in hooks {
            hook(event);
        }
    }

    pub fn emit_after_execute(&self, event: &QueryEvent<'_>) {
        let hooks: Vec<QueryHook> = lock(&self.after)
            .iter()
            .map(|(_, hook)| Arc::clone(hook))
            .collect();
        for hook in hooks {
            hook(event);
        }
    }

    pub fn emit_error(&self, event: &ErrorEvent<'_>) {
        let hooks: Vec<ErrorHook> = lock(&self.error)
            .iter()
            .map(|(_, hook)| Arc::clone(hook))
            .collect();
        for hook in hooks {
            hook(event);
        }
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("before", &lock(&self.before).len())
            .field("after", &lock(&self.after).len())
            .field("error", &lock(&self.error).len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn query_event<'a>(statement: &'a str, parameters: &'a QueryParams) -> QueryEvent<'a> {
        QueryEvent {
            context: ContextId::current_thread(),
            connection_id: 1,
            backend: DbBackend::Sqlite,
            statement,
            parameters,
            cursor: CursorStats::default(),
            is_batch: false,
        }
    }

    #[test]
    fn test_registration_and_counts() {
        let bus = EventBus::new();
        assert_eq!(bus.hook_count(), 0);

        let id = bus.on_before_execute(Arc::new(|_| {}));
        bus.on_after_execute(Arc::new(|_| {}));
        bus.on_error(Arc::new(|_| {}));
        assert_eq!(bus.hook_count(), 3);

        assert!(bus.remove(id));
        assert_eq!(bus.hook_count(), 2);
        assert!(!bus.remove(id));
    }

    #[test]
    fn test_emit_reaches_registered_hooks() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let seen = Arc::clone(&calls);
        bus.on_before_execute(Arc::new(move |event| {
            assert_eq!(event.statement, "SELECT 1");
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        let params = QueryParams::None;
        bus.emit_before_execute(&query_event("SELECT 1", &params));
        bus.emit_before_execute(&query_event("SELECT 1", &params));

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_removed_hook_is_not_called() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let seen = Arc::clone(&calls);
        let id = bus.on_after_execute(Arc::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));
        bus.remove(id);

        let params = QueryParams::None;
        bus.emit_after_execute(&query_event("SELECT 1", &params));

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
