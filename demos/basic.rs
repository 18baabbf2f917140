//! Basic example showing how to use sea-orm-listeners.
//!
//! Run with: cargo run --example basic

use std::sync::Arc;

use sea_orm::{ConnectionTrait, Database, Statement};
use sea_orm_listeners::prelude::*;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing subscriber
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,sea_orm_listeners=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite::memory:".into());

    tracing::info!("Connecting to database...");
    let db = Database::connect(&database_url).await?;

    // Wire the listeners to an event bus and wrap the connection.
    let bus = Arc::new(EventBus::new());
    let mut listeners = QueryListeners::new(TracingClient::new());
    listeners.install(&bus);

    // Option 1: Simple wrapping with defaults
    let db = db.with_listeners(Arc::clone(&bus));

    // Option 2: With custom configuration
    // let listeners = QueryListeners::with_config(
    //     TracingClient::new(),
    //     ListenerConfig::default()
    //         .with_query_arg_logging(false)
    //         .with_slow_query_threshold(Duration::from_millis(100)),
    // );

    // Option 3: Production preset (no parameter capture)
    // let listeners = QueryListeners::with_config(TracingClient::new(), ListenerConfig::production());

    // Every statement through `db` now reports a span.
    let backend = db.get_database_backend();
    db.execute(Statement::from_string(
        backend,
        "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)",
    ))
    .await?;
    db.execute(Statement::from_sql_and_values(
        backend,
        "INSERT INTO users (name) VALUES ($1)",
        ["ferris".into()],
    ))
    .await?;
    let rows = db
        .query_all(Statement::from_string(backend, "SELECT * FROM users"))
        .await?;

    tracing::info!(rows = rows.len(), "queries executed with span reporting");

    // Deterministic teardown; dropping the listeners would do this too.
    listeners.uninstall();

    Ok(())
}
