//! Per-execution-context span state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use std::time::Instant;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of the logical execution context a statement runs under.
///
/// Synchronous engines key state by the executing thread; async adapters
/// allocate a task identity per statement, since a resumed future may land
/// on a different worker thread than the one it started on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextId {
    Thread(ThreadId),
    Task(u64),
}

impl ContextId {
    /// The context of the calling thread.
    pub fn current_thread() -> Self {
        ContextId::Thread(thread::current().id())
    }

    /// Allocate a fresh cooperative-task context.
    pub fn new_task() -> Self {
        ContextId::Task(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// The "current execution" slot for one context.
///
/// Both fields are set together when a span opens and cleared together when
/// the slot resets; an empty slot means the context is idle.
#[derive(Debug)]
pub struct ExecutionState<S> {
    pub span: Option<S>,
    pub started_at: Option<Instant>,
}

impl<S> ExecutionState<S> {
    pub fn open(span: S) -> Self {
        Self {
            span: Some(span),
            started_at: Some(Instant::now()),
        }
    }
}

impl<S> Default for ExecutionState<S> {
    fn default() -> Self {
        Self {
            span: None,
            started_at: None,
        }
    }
}

/// Context-keyed store of execution slots.
///
/// Each context only ever touches its own slot, so concurrently progressing
/// executions never observe or overwrite each other's span or start time.
/// Slots are created lazily and removed again when taken or reset.
#[derive(Debug)]
pub struct StateStore<S> {
    slots: Mutex<HashMap<ContextId, ExecutionState<S>>>,
}

impl<S> StateStore<S> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    // Hooks must never panic; if a slot holder panicked mid-update the map
    // itself is still consistent, so recover it instead of poisoning every
    // later statement.
    fn slots(&self) -> MutexGuard<'_, HashMap<ContextId, ExecutionState<S>>> {
        match self.slots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Whether the context currently has an open span.
    pub fn is_open(&self, ctx: ContextId) -> bool {
        self.slots()
            .get(&ctx)
            .map(|state| state.span.is_some())
            .unwrap_or(false)
    }

    /// Replace the context's slot.
    pub fn set(&self, ctx: ContextId, state: ExecutionState<S>) {
        self.slots().insert(ctx, state);
    }

    /// Read and reset the context's slot in one step, returning whatever was
    /// recorded. An untouched context yields an idle state.
    pub fn take(&self, ctx: ContextId) -> ExecutionState<S> {
        self.slots().remove(&ctx).unwrap_or_default()
    }

    /// Clear both fields of the context's slot.
    pub fn reset(&self, ctx: ContextId) {
        self.slots().remove(&ctx);
    }
}

impl<S> Default for StateStore<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untouched_context_is_idle() {
        let store: StateStore<u64> = StateStore::new();
        let ctx = ContextId::current_thread();

        assert!(!store.is_open(ctx));
        let state = store.take(ctx);
        assert!(state.span.is_none());
        assert!(state.started_at.is_none());
    }

    #[test]
    fn test_take_returns_and_resets() {
        let store: StateStore<u64> = StateStore::new();
        let ctx = ContextId::current_thread();

        store.set(ctx, ExecutionState::open(42));
        assert!(store.is_open(ctx));

        let state = store.take(ctx);
        assert_eq!(state.span, Some(42));
        assert!(state.started_at.is_some());
        assert!(!store.is_open(ctx));
    }

    #[test]
    fn test_reset_clears_both_fields() {
        let store: StateStore<u64> = StateStore::new();
        let ctx = ContextId::new_task();

        store.set(ctx, ExecutionState::open(7));
        store.reset(ctx);

        let state = store.take(ctx);
        assert!(state.span.is_none());
        assert!(state.started_at.is_none());
    }

    #[test]
    fn test_contexts_are_isolated() {
        let store: StateStore<u64> = StateStore::new();
        let a = ContextId::new_task();
        let b = ContextId::new_task();

        store.set(a, ExecutionState::open(1));
        store.set(b, ExecutionState::open(2));

        assert_eq!(store.take(a).span, Some(1));
        assert_eq!(store.take(b).span, Some(2));
    }

    #[test]
    fn test_thread_contexts_differ_across_threads() {
        let here = ContextId::current_thread();
        let there = thread::spawn(ContextId::current_thread)
            .join()
            .expect("spawned thread");

        assert_ne!(here, there);
    }
}
