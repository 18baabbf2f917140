//! The trace client seam and a default client backed by `tracing`.

use std::cell::RefCell;
use std::error::Error;
use std::sync::Arc;

use serde_json::Value;
use tracing::field;

/// Name of every query span.
pub const QUERY_SPAN_NAME: &str = "sqlalchemy_query";
/// Span type reported at span start.
pub const SPAN_TYPE_DB: &str = "db";

/// Context field names used by the listeners.
pub const DB_QUERY: &str = "db.query";
pub const DB_QUERY_ARGS: &str = "db.query_args";
pub const DB_DURATION: &str = "db.duration";
pub const DB_LAST_INSERT_ID: &str = "db.last_insert_id";
pub const DB_ROWS_AFFECTED: &str = "db.rows_affected";
pub const DB_ERROR: &str = "db.error";

/// The context mapping handed to [`TraceClient::start_span`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanContext {
    /// Constant [`QUERY_SPAN_NAME`].
    pub name: &'static str,
    /// Constant [`SPAN_TYPE_DB`]; the span's `type` field.
    pub kind: &'static str,
    /// Raw statement text.
    pub query: String,
    /// Serialized bind parameters, in order.
    pub query_args: Vec<String>,
}

impl SpanContext {
    /// Build the span-start context for one statement.
    pub fn query(statement: impl Into<String>, query_args: Vec<String>) -> Self {
        Self {
            name: QUERY_SPAN_NAME,
            kind: SPAN_TYPE_DB,
            query: statement.into(),
            query_args,
        }
    }
}

/// The external tracing client the listeners report to.
///
/// The span handle is opaque to the rest of the crate: it is stored in the
/// execution state slot and handed back for finishing, never inspected.
/// `add_context` / `add_context_field` enrich the execution currently being
/// reported on the calling context, matching how hosted tracing clients
/// scope context to the active span.
pub trait TraceClient: Send + Sync {
    type Span: Send + 'static;

    /// Open a span for a statement that is about to execute.
    fn start_span(&self, context: SpanContext) -> Self::Span;

    /// Finish a span previously returned by [`Self::start_span`].
    fn finish_span(&self, span: Self::Span);

    /// Attach a batch of context fields to the execution being reported.
    fn add_context(&self, fields: Vec<(&'static str, Value)>);

    /// Attach a single context field to the execution being reported.
    fn add_context_field(&self, key: &'static str, value: Value);

    /// Render a driver error for the `db.error` field.
    fn stringify_exception(&self, error: &dyn Error) -> String {
        error.to_string()
    }
}

impl<C: TraceClient + ?Sized> TraceClient for Arc<C> {
    type Span = C::Span;

    fn start_span(&self, context: SpanContext) -> Self::Span {
        (**self).start_span(context)
    }

    fn finish_span(&self, span: Self::Span) {
        (**self).finish_span(span)
    }

    fn add_context(&self, fields: Vec<(&'static str, Value)>) {
        (**self).add_context(fields)
    }

    fn add_context_field(&self, key: &'static str, value: Value) {
        (**self).add_context_field(key, value)
    }

    fn stringify_exception(&self, error: &dyn Error) -> String {
        (**self).stringify_exception(error)
    }
}

thread_local! {
    // Fields attached between a span's completion report and its finish.
    // The lifecycle handler always finishes on the context that reported,
    // so the buffer drains into the right span.
    static PENDING: RefCell<Vec<(&'static str, Value)>> = RefCell::new(Vec::new());
}

/// Default [`TraceClient`] that emits spans through the `tracing` crate.
///
/// Spans declare every context field up front and record them as the
/// listeners report; whatever subscriber is installed decides formatting
/// and transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingClient;

impl TracingClient {
    pub fn new() -> Self {
        Self
    }
}

fn record_value(span: &tracing::Span, key: &str, value: &Value) {
    match value {
        Value::Null => {}
        Value::Bool(v) => {
            span.record(key, *v);
        }
        Value::String(v) => {
            span.record(key, v.as_str());
        }
        Value::Number(n) => {
            if let Some(v) = n.as_u64() {
                span.record(key, v);
            } else if let Some(v) = n.as_i64() {
                span.record(key, v);
            } else if let Some(v) = n.as_f64() {
                span.record(key, v);
            }
        }
        other => {
            span.record(key, field::display(other));
        }
    }
}

impl TraceClient for TracingClient {
    type Span = tracing::Span;

    fn start_span(&self, context: SpanContext) -> Self::Span {
        let span = tracing::info_span!(
            "sqlalchemy_query",
            otel.kind = "client",
            db.query = %context.query,
            db.query_args = ?context.query_args,
            db.duration = field::Empty,
            db.last_insert_id = field::Empty,
            db.rows_affected = field::Empty,
            db.error = field::Empty,
        );
        // Fields left over from an execution that never finished belong to
        // nothing reportable anymore.
        PENDING.with(|pending| pending.borrow_mut().clear());
        span
    }

    fn finish_span(&self, span: Self::Span) {
        let fields = PENDING.with(|pending| std::mem::take(&mut *pending.borrow_mut()));
        for (key, value) in &fields {
            record_value(&span, key, value);
        }
        drop(span);
    }

    fn add_context(&self, fields: Vec<(&'static str, Value)>) {
        PENDING.with(|pending| pending.borrow_mut().extend(fields));
    }

    fn add_context_field(&self, key: &'static str, value: Value) {
        PENDING.with(|pending| pending.borrow_mut().push((key, value)));
    }
}
