//! Todo CRUD service over axum and Postgres.
//!
//! # Overview
//! Requests flow handler → store → database client. `Server` owns the
//! listener task and the database client and coordinates a single,
//! deadline-bounded shutdown.
//!
//! # Design
//! - Persistence sits behind `store::TodoStore`; `PgTodoStore` is the real
//!   backend and `MemoryTodoStore` backs tests and local runs.
//! - The lifecycle only sees `database::DatabaseClient`, so it can be driven
//!   without a database.
//! - Configuration is read once by the binary and handed to each component by
//!   constructor.

use std::sync::Arc;

use axum::Router;

pub mod config;
pub mod context;
pub mod database;
pub mod error;
pub mod handlers;
pub mod logger;
pub mod models;
pub mod router;
pub mod server;
pub mod store;
pub mod telemetry;

pub use config::Config;
pub use models::{TodoItem, TodoPostResponse};
pub use router::AppState;
pub use server::{Exit, LifecycleState, Server, ShutdownOutcome, Trigger};
pub use store::{MemoryTodoStore, PgTodoStore, TodoStore};

/// Router with default middleware settings and a metrics handle that is not
/// installed as the global recorder.
pub fn app(store: Arc<dyn TodoStore>) -> Router {
    router::build(
        &config::HttpRouterConfig::default(),
        AppState::new(store, telemetry::detached_handle()),
    )
}
