//! Instrumented database connection wrapper.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::{
    ConnectionTrait, DatabaseConnection, DbBackend, DbErr, ExecResult, QueryResult, Statement,
};

use crate::events::{CursorStats, ErrorEvent, EventBus, QueryEvent};
use crate::params::QueryParams;
use crate::state::ContextId;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// A wrapper around SeaORM's `DatabaseConnection` that fires statement
/// lifecycle events into an [`EventBus`].
///
/// The wrapper implements `ConnectionTrait`, so it drops in wherever a
/// `DatabaseConnection` is used for statement execution. Every statement
/// gets a fresh task context: the before and after events of one statement
/// always pair up, even when the executor resumes the future on a different
/// worker thread, and concurrently executing statements never share a slot.
///
/// Streams and transactions pass through untouched; the lifecycle events
/// cover statement execution only.
///
/// # Example
///
/// ```rust,ignore
/// use sea_orm::Database;
/// use sea_orm_listeners::prelude::*;
/// use std::sync::Arc;
///
/// let bus = Arc::new(EventBus::new());
/// let mut listeners = QueryListeners::new(TracingClient::new());
/// listeners.install(&bus);
///
/// let db = Database::connect("postgres://localhost/mydb").await?;
/// let db = db.with_listeners(Arc::clone(&bus));
///
/// // All statements through `db` now report spans.
/// let users = Users::find().all(&db).await?;
/// ```
#[derive(Debug)]
pub struct InstrumentedConnection {
    inner: DatabaseConnection,
    bus: Arc<EventBus>,
    id: u64,
}

impl InstrumentedConnection {
    /// Wrap a connection so its statements report to `bus`.
    pub fn new(connection: DatabaseConnection, bus: Arc<EventBus>) -> Self {
        Self {
            inner: connection,
            bus,
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Get a reference to the underlying `DatabaseConnection`.
    pub fn inner(&self) -> &DatabaseConnection {
        &self.inner
    }

    /// Consume the wrapper and return the inner `DatabaseConnection`.
    pub fn into_inner(self) -> DatabaseConnection {
        self.inner
    }

    /// The bus this connection reports to.
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    fn emit_before(&self, context: ContextId, statement: &str, parameters: &QueryParams) {
        self.bus.emit_before_execute(&QueryEvent {
            context,
            connection_id: self.id,
            backend: self.inner.get_database_backend(),
            statement,
            parameters,
            cursor: CursorStats::default(),
            is_batch: false,
        });
    }

    fn emit_after(
        &self,
        context: ContextId,
        statement: &str,
        parameters: &QueryParams,
        cursor: CursorStats,
    ) {
        self.bus.emit_after_execute(&QueryEvent {
            context,
            connection_id: self.id,
            backend: self.inner.get_database_backend(),
            statement,
            parameters,
            cursor,
            is_batch: false,
        });
    }

    fn emit_error(
        &self,
        context: ContextId,
        statement: &str,
        parameters: &QueryParams,
        error: &DbErr,
    ) {
        self.bus.emit_error(&ErrorEvent {
            context,
            connection_id: self.id,
            backend: self.inner.get_database_backend(),
            statement,
            parameters,
            exception: error,
            is_disconnect: matches!(error, DbErr::Conn(_) | DbErr::ConnectionAcquire(_)),
        });
    }

    fn exec_stats(&self, result: &ExecResult) -> CursorStats {
        // The Postgres driver exposes no cursor-level insert id; asking for
        // one panics inside the driver holder.
        let last_insert_id = match self.inner.get_database_backend() {
            DbBackend::Postgres => None,
            _ => Some(result.last_insert_id()),
        };
        CursorStats {
            last_insert_id,
            rows_affected: Some(result.rows_affected()),
        }
    }
}

#[async_trait]
impl ConnectionTrait for InstrumentedConnection {
    fn get_database_backend(&self) -> DbBackend {
        self.inner.get_database_backend()
    }

    async fn execute(&self, stmt: Statement) -> Result<ExecResult, DbErr> {
        let sql = stmt.sql.clone();
        let parameters = QueryParams::from_statement(&stmt);
        let context = ContextId::new_task();

        self.emit_before(context, &sql, &parameters);
        let result = self.inner.execute(stmt).await;

        match &result {
            Ok(exec) => self.emit_after(context, &sql, &parameters, self.exec_stats(exec)),
            Err(error) => self.emit_error(context, &sql, &parameters, error),
        }
        result
    }

    async fn execute_unprepared(&self, sql: &str) -> Result<ExecResult, DbErr> {
        let parameters = QueryParams::None;
        let context = ContextId::new_task();

        self.emit_before(context, sql, &parameters);
        let result = self.inner.execute_unprepared(sql).await;

        match &result {
            Ok(exec) => self.emit_after(context, sql, &parameters, self.exec_stats(exec)),
            Err(error) => self.emit_error(context, sql, &parameters, error),
        }
        result
    }

    async fn query_one(&self, stmt: Statement) -> Result<Option<QueryResult>, DbErr> {
        let sql = stmt.sql.clone();
        let parameters = QueryParams::from_statement(&stmt);
        let context = ContextId::new_task();

        self.emit_before(context, &sql, &parameters);
        let result = self.inner.query_one(stmt).await;

        match &result {
            Ok(row) => {
                let cursor = CursorStats {
                    last_insert_id: None,
                    rows_affected: Some(if row.is_some() { 1 } else { 0 }),
                };
                self.emit_after(context, &sql, &parameters, cursor);
            }
            Err(error) => self.emit_error(context, &sql, &parameters, error),
        }
        result
    }

    async fn query_all(&self, stmt: Statement) -> Result<Vec<QueryResult>, DbErr> {
        let sql = stmt.sql.clone();
        let parameters = QueryParams::from_statement(&stmt);
        let context = ContextId::new_task();

        self.emit_before(context, &sql, &parameters);
        let result = self.inner.query_all(stmt).await;

        match &result {
            Ok(rows) => {
                let cursor = CursorStats {
                    last_insert_id: None,
                    rows_affected: Some(rows.len() as u64),
                };
                self.emit_after(context, &sql, &parameters, cursor);
            }
            Err(error) => self.emit_error(context, &sql, &parameters, error),
        }
        result
    }

    fn support_returning(&self) -> bool {
        self.inner.support_returning()
    }

    fn is_mock_connection(&self) -> bool {
        self.inner.is_mock_connection()
    }
}

/// Extension trait for easy wrapping of database connections.
pub trait ListenersExt {
    /// Wrap this connection so its statements report to `bus`.
    fn with_listeners(self, bus: Arc<EventBus>) -> InstrumentedConnection;
}

impl ListenersExt for DatabaseConnection {
    fn with_listeners(self, bus: Arc<EventBus>) -> InstrumentedConnection {
        InstrumentedConnection::new(self, bus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult, RuntimeErr, Value};
    use serde_json::json;

    use crate::client::{SpanContext, TraceClient, DB_ERROR, DB_LAST_INSERT_ID, DB_ROWS_AFFECTED};
    use crate::listeners::QueryListeners;

    #[derive(Default)]
    struct ProbeClient {
        next_span: AtomicU64,
        started: Mutex<Vec<SpanContext>>,
        finished: Mutex<Vec<u64>>,
        batches: Mutex<Vec<Vec<(&'static str, serde_json::Value)>>>,
        fields: Mutex<Vec<(&'static str, serde_json::Value)>>,
    }

    impl TraceClient for ProbeClient {
        type Span = u64;

        fn start_span(&self, context: SpanContext) -> u64 {
            self.started.lock().unwrap().push(context);
            self.next_span.fetch_add(1, Ordering::SeqCst) + 1
        }

        fn finish_span(&self, span: u64) {
            self.finished.lock().unwrap().push(span);
        }

        fn add_context(&self, fields: Vec<(&'static str, serde_json::Value)>) {
            self.batches.lock().unwrap().push(fields);
        }

        fn add_context_field(&self, key: &'static str, value: serde_json::Value) {
            self.fields.lock().unwrap().push((key, value));
        }
    }

    fn wired(
        db: DatabaseConnection,
    ) -> (
        InstrumentedConnection,
        Arc<ProbeClient>,
        QueryListeners<Arc<ProbeClient>>,
    ) {
        let bus = Arc::new(EventBus::new());
        let client = Arc::new(ProbeClient::default());
        let mut listeners = QueryListeners::new(Arc::clone(&client));
        listeners.install(&bus);
        (db.with_listeners(bus), client, listeners)
    }

    #[tokio::test]
    async fn test_execute_reports_span_and_cursor_stats() {
        let db = MockDatabase::new(DatabaseBackend::Sqlite)
            .append_exec_results([MockExecResult {
                last_insert_id: 15,
                rows_affected: 2,
            }])
            .into_connection();
        let (conn, client, _listeners) = wired(db);

        let exec = conn
            .execute(Statement::from_sql_and_values(
                DatabaseBackend::Sqlite,
                "INSERT INTO users (name) VALUES ($1)",
                ["ferris".into()],
            ))
            .await
            .expect("mock execute");
        assert_eq!(exec.rows_affected(), 2);

        let started = client.started.lock().unwrap();
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].query, "INSERT INTO users (name) VALUES ($1)");
        assert_eq!(started[0].query_args, vec!["ferris"]);

        assert_eq!(client.finished.lock().unwrap().len(), 1);

        let batches = client.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert!(batches[0].contains(&(DB_LAST_INSERT_ID, json!(15))));
        assert!(batches[0].contains(&(DB_ROWS_AFFECTED, json!(2))));
    }

    #[tokio::test]
    async fn test_failed_execute_reports_error_and_propagates() {
        let db = MockDatabase::new(DatabaseBackend::Sqlite)
            .append_exec_errors([DbErr::Query(RuntimeErr::Internal(
                "simulated failure".to_owned(),
            ))])
            .into_connection();
        let (conn, client, _listeners) = wired(db);

        let result = conn
            .execute(Statement::from_string(
                DatabaseBackend::Sqlite,
                "SELECT doesnotexist",
            ))
            .await;

        // The caller still observes the original error.
        let error = result.expect_err("mock error");
        assert!(error.to_string().contains("simulated failure"));

        let fields = client.fields.lock().unwrap();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].0, DB_ERROR);
        assert!(fields[0]
            .1
            .as_str()
            .is_some_and(|message| message.contains("simulated failure")));

        assert_eq!(client.finished.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_query_all_reports_row_count() {
        let row_one: BTreeMap<&str, Value> = [("num", Value::Int(Some(1)))].into_iter().collect();
        let row_two: BTreeMap<&str, Value> = [("num", Value::Int(Some(2)))].into_iter().collect();
        let db = MockDatabase::new(DatabaseBackend::Sqlite)
            .append_query_results([vec![row_one, row_two]])
            .into_connection();
        let (conn, client, _listeners) = wired(db);

        let rows = conn
            .query_all(Statement::from_string(
                DatabaseBackend::Sqlite,
                "SELECT num FROM numbers",
            ))
            .await
            .expect("mock query");
        assert_eq!(rows.len(), 2);

        let batches = client.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert!(batches[0].contains(&(DB_ROWS_AFFECTED, json!(2))));
        assert!(batches[0].contains(&(DB_LAST_INSERT_ID, json!(null))));
    }
}
