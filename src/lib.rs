//! # sea-orm-listeners
//!
//! Query lifecycle listeners for SeaORM that report database spans to a
//! pluggable trace client.
//!
//! This crate turns statement lifecycle events (before execute, after
//! execute, error) into trace spans. A [`QueryListeners`] set owns the span
//! state machine: one span per statement per execution context, opened on
//! start, enriched with duration and cursor statistics on completion (or
//! with `db.error` on failure), and always reset afterwards. Overlapping
//! statements on one context are detected and reported as a warning instead
//! of corrupting the open span.
//!
//! ## Features
//!
//! - **Hook-based instrumentation**: listeners bind to an [`EventBus`] and
//!   react to whatever fires events into it
//! - **Drop-in connection wrapper**: [`InstrumentedConnection`] implements
//!   `ConnectionTrait` and fires the events for you
//! - **Pluggable reporting**: implement [`TraceClient`] for your tracing
//!   backend, or use the bundled [`TracingClient`] that emits `tracing`
//!   spans
//! - **Context isolation**: concurrent statements on different threads or
//!   tasks report independent, never-swapped durations
//! - **Deterministic teardown**: install/uninstall are idempotent and the
//!   registration handle detaches its hooks on drop
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sea_orm::Database;
//! use sea_orm_listeners::prelude::*;
//!
//! let bus = Arc::new(EventBus::new());
//! let mut listeners = QueryListeners::new(TracingClient::new());
//! listeners.install(&bus);
//!
//! let db = Database::connect("postgres://localhost/mydb").await?;
//! let db = db.with_listeners(Arc::clone(&bus));
//!
//! // Every statement through `db` now reports a span.
//! let users = Users::find().all(&db).await?;
//! ```
//!
//! ## Span Context Fields
//!
//! | Field | Description |
//! |-------|-------------|
//! | `name` | Always `"sqlalchemy_query"` |
//! | `type` | Always `"db"` |
//! | `db.query` | Raw statement text |
//! | `db.query_args` | Serialized bind parameters, in order |
//! | `db.duration` | Statement duration in fractional milliseconds |
//! | `db.last_insert_id` | Driver-reported insert id (when available) |
//! | `db.rows_affected` | Rows affected or returned |
//! | `db.error` | Stringified driver error (on failure) |

mod client;
mod config;
mod connection;
mod events;
mod listeners;
mod params;
mod state;

pub use client::{
    SpanContext, TraceClient, TracingClient, DB_DURATION, DB_ERROR, DB_LAST_INSERT_ID,
    DB_QUERY, DB_QUERY_ARGS, DB_ROWS_AFFECTED, QUERY_SPAN_NAME, SPAN_TYPE_DB,
};
pub use config::ListenerConfig;
pub use connection::{InstrumentedConnection, ListenersExt};
pub use events::{CursorStats, ErrorEvent, ErrorHook, EventBus, HookId, QueryEvent, QueryHook};
pub use listeners::QueryListeners;
pub use params::{ParamValue, QueryParams};
pub use state::{ContextId, ExecutionState, StateStore};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        EventBus, InstrumentedConnection, ListenerConfig, ListenersExt, QueryListeners,
        TraceClient, TracingClient,
    };
}
