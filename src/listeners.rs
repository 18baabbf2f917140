//! The span lifecycle state machine and its hook bindings.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::client::{
    SpanContext, TraceClient, DB_DURATION, DB_ERROR, DB_LAST_INSERT_ID, DB_ROWS_AFFECTED,
};
use crate::config::ListenerConfig;
use crate::events::{ErrorEvent, EventBus, HookId, QueryEvent};
use crate::state::{ExecutionState, StateStore};

/// Query lifecycle listeners for one trace client.
///
/// Each execution context cycles Idle → SpanOpen → Idle per statement: a
/// span opens on before-execute, gets enriched and finished on
/// after-execute or error, and the context's slot resets either way. The
/// listeners are bound to an [`EventBus`] through [`install`] and detached
/// through [`uninstall`] (or on drop); both are idempotent.
///
/// [`install`]: QueryListeners::install
/// [`uninstall`]: QueryListeners::uninstall
pub struct QueryListeners<C: TraceClient> {
    handler: Arc<Handler<C>>,
    registration: Registration,
}

/// Bookkeeping for the bound hooks: the bus that holds them and the ids
/// needed to remove them, so teardown never depends on ambient lookup.
struct Registration {
    installed: bool,
    bus: Option<Arc<EventBus>>,
    hooks: Vec<HookId>,
}

struct Handler<C: TraceClient> {
    client: C,
    config: ListenerConfig,
    store: StateStore<C::Span>,
}

impl<C: TraceClient> Handler<C> {
    fn before_execute(&self, event: &QueryEvent<'_>) {
        let ctx = event.context;
        if self.store.is_open(ctx) {
            // Genuine reentrancy or a missed reset. Leave the existing span
            // as recorded; it is abandoned, not force-closed.
            tracing::warn!(
                statement = event.statement,
                "span already open for this execution context; not starting another"
            );
            return;
        }

        let query_args = if self.config.log_query_args {
            event.parameters.to_query_args()
        } else {
            Vec::new()
        };
        let span = self
            .client
            .start_span(SpanContext::query(event.statement, query_args));
        self.store.set(ctx, ExecutionState::open(span));
    }

    fn after_execute(&self, event: &QueryEvent<'_>) {
        // Taking the slot resets the context to Idle no matter which fields
        // were recorded; each field is then reported independently so a
        // dropped before-event never cascades here.
        let state = self.store.take(event.context);

        if let Some(started_at) = state.started_at {
            let elapsed = started_at.elapsed();
            let duration_ms = elapsed.as_secs_f64() * 1000.0;

            let mut fields = vec![(DB_DURATION, json!(duration_ms))];
            if self.config.record_cursor_stats {
                fields.push((DB_LAST_INSERT_ID, json!(event.cursor.last_insert_id)));
                fields.push((DB_ROWS_AFFECTED, json!(event.cursor.rows_affected)));
            }
            self.client.add_context(fields);

            if elapsed > self.config.slow_query_threshold {
                tracing::warn!(
                    statement = event.statement,
                    duration_ms,
                    threshold_ms = self.config.slow_query_threshold.as_millis() as u64,
                    "slow query detected"
                );
            }
        }

        if let Some(span) = state.span {
            self.client.finish_span(span);
        }
    }

    fn on_error(&self, event: &ErrorEvent<'_>) {
        let state = self.store.take(event.context);

        let message = self.client.stringify_exception(event.exception);
        self.client.add_context_field(DB_ERROR, Value::String(message));

        if let Some(span) = state.span {
            self.client.finish_span(span);
        }
    }
}

impl<C: TraceClient> QueryListeners<C> {
    /// Create listeners reporting to `client` with the default
    /// configuration.
    pub fn new(client: C) -> Self {
        Self::with_config(client, ListenerConfig::default())
    }

    pub fn with_config(client: C, config: ListenerConfig) -> Self {
        Self {
            handler: Arc::new(Handler {
                client,
                config,
                store: StateStore::new(),
            }),
            registration: Registration {
                installed: false,
                bus: None,
                hooks: Vec::new(),
            },
        }
    }

    /// Whether the three hooks are currently bound to a bus.
    pub fn installed(&self) -> bool {
        self.registration.installed
    }

    /// Detach the hooks from the bus they were installed on. Calling this
    /// while not installed is a no-op.
    pub fn uninstall(&mut self) {
        if !self.registration.installed {
            return;
        }
        if let Some(bus) = self.registration.bus.take() {
            for hook in self.registration.hooks.drain(..) {
                bus.remove(hook);
            }
        }
        self.registration.installed = false;
    }

    /// React to a statement that is about to execute.
    ///
    /// Exposed for engines that dispatch lifecycle notifications directly
    /// instead of through an [`EventBus`].
    pub fn before_execute(&self, event: &QueryEvent<'_>) {
        self.handler.before_execute(event);
    }

    /// React to a statement that completed.
    pub fn after_execute(&self, event: &QueryEvent<'_>) {
        self.handler.after_execute(event);
    }

    /// React to a statement that failed. The driver error itself propagates
    /// to the caller untouched; this only reports it.
    pub fn on_error(&self, event: &ErrorEvent<'_>) {
        self.handler.on_error(event);
    }

    pub fn client(&self) -> &C {
        &self.handler.client
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.handler.config
    }
}

impl<C: TraceClient + 'static> QueryListeners<C> {
    /// Bind the three hooks to `bus`. Installing while already installed is
    /// a no-op; the hooks are registered exactly once.
    pub fn install(&mut self, bus: &Arc<EventBus>) {
        if self.registration.installed {
            return;
        }

        let handler = Arc::clone(&self.handler);
        let before =
            bus.on_before_execute(Arc::new(move |event: &QueryEvent<'_>| {
                handler.before_execute(event)
            }));
        let handler = Arc::clone(&self.handler);
        let after = bus.on_after_execute(Arc::new(move |event: &QueryEvent<'_>| {
            handler.after_execute(event)
        }));
        let handler = Arc::clone(&self.handler);
        let error =
            bus.on_error(Arc::new(move |event: &ErrorEvent<'_>| handler.on_error(event)));

        self.registration = Registration {
            installed: true,
            bus: Some(Arc::clone(bus)),
            hooks: vec![before, after, error],
        };
    }
}

impl<C: TraceClient> Drop for QueryListeners<C> {
    fn drop(&mut self) {
        self.uninstall();
    }
}
