//! Server lifecycle against a live listener.
//!
//! # Design
//! Each test binds `127.0.0.1:0`, starts a `Server` over it and talks to it
//! with blocking `ureq` calls on the blocking pool. The database is a test
//! double that counts `shutdown` calls, so no Postgres is needed.

use std::{
    future,
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use axum::{routing::get, Router};
use tokio::{net::TcpListener, sync::Notify};
use todo_api::{
    app,
    config::HttpServerConfig,
    database::DatabaseClient,
    error::{ClientError, ServerError},
    server::{EXIT_FATAL, EXIT_FORCED},
    LifecycleState, MemoryTodoStore, Server, ShutdownOutcome, Trigger,
};

#[derive(Default)]
struct CountingDatabase {
    shutdowns: AtomicUsize,
}

impl CountingDatabase {
    fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DatabaseClient for CountingDatabase {
    async fn shutdown(&self) -> Result<(), ClientError> {
        if self.shutdowns.fetch_add(1, Ordering::SeqCst) > 0 {
            return Err(ClientError::AlreadyClosed);
        }
        Ok(())
    }
}

/// Never finishes closing.
struct StuckDatabase;

#[async_trait]
impl DatabaseClient for StuckDatabase {
    async fn shutdown(&self) -> Result<(), ClientError> {
        future::pending::<()>().await;
        Ok(())
    }
}

fn server_config(port: u16, timeout: Duration) -> HttpServerConfig {
    HttpServerConfig {
        host: "127.0.0.1".to_string(),
        port,
        shutdown_timeout: timeout,
    }
}

async fn local_listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// Status code of a GET, or `None` if the request failed at the transport level.
async fn get_status(url: String) -> Option<u16> {
    tokio::task::spawn_blocking(move || {
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(Duration::from_secs(5)))
            .build()
            .new_agent();
        agent.get(&url).call().ok().map(|resp| resp.status().as_u16())
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn serves_requests_until_signal() {
    let database = Arc::new(CountingDatabase::default());
    let (listener, addr) = local_listener().await;
    let server = Server::new(
        server_config(addr.port(), Duration::from_secs(5)),
        app(Arc::new(MemoryTodoStore::new())),
        database.clone(),
    );

    server.start_on(listener).unwrap();
    assert_eq!(server.state(), LifecycleState::Running);
    assert_eq!(get_status(format!("http://{addr}/api/health")).await, Some(200));
    assert_eq!(get_status(format!("http://{addr}/api/todo/1")).await, Some(204));

    let exit = server.run_until(future::ready(())).await;

    assert!(matches!(exit.trigger, Trigger::Signal));
    assert_eq!(exit.outcome, ShutdownOutcome::Graceful);
    assert_eq!(exit.code(), 0);
    assert_eq!(server.state(), LifecycleState::Stopped);
    assert_eq!(database.shutdowns(), 1);
    assert_eq!(get_status(format!("http://{addr}/api/health")).await, None);
}

#[tokio::test]
async fn bind_failure_is_reported_as_fatal() {
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = occupied.local_addr().unwrap().port();
    let database = Arc::new(CountingDatabase::default());
    let server = Server::new(
        server_config(port, Duration::from_secs(5)),
        app(Arc::new(MemoryTodoStore::new())),
        database.clone(),
    );

    server.start().unwrap();
    let exit = tokio::time::timeout(
        Duration::from_secs(5),
        server.run_until(future::pending::<()>()),
    )
    .await
    .expect("fatal error should end the wait");

    assert!(matches!(exit.trigger, Trigger::Fatal(ServerError::Bind { .. })));
    assert_eq!(exit.outcome, ShutdownOutcome::Graceful);
    assert_eq!(exit.code(), EXIT_FATAL);
    assert_eq!(database.shutdowns(), 1);
    drop(occupied);
}

#[tokio::test]
async fn concurrent_shutdowns_tear_down_once() {
    let database = Arc::new(CountingDatabase::default());
    let (listener, addr) = local_listener().await;
    let server = Arc::new(Server::new(
        server_config(addr.port(), Duration::from_secs(5)),
        app(Arc::new(MemoryTodoStore::new())),
        database.clone(),
    ));
    server.start_on(listener).unwrap();

    let callers: Vec<_> = (0..8)
        .map(|_| {
            let server = server.clone();
            tokio::spawn(async move { server.shutdown().await })
        })
        .collect();

    let signal_exit = server.run_until(future::ready(())).await;
    for caller in callers {
        assert_eq!(caller.await.unwrap(), ShutdownOutcome::Graceful);
    }

    assert_eq!(signal_exit.outcome, ShutdownOutcome::Graceful);
    assert_eq!(database.shutdowns(), 1);
    assert_eq!(server.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn in_flight_request_drains_before_stop() {
    let entered = Arc::new(Notify::new());
    let router = {
        let entered = entered.clone();
        Router::new().route(
            "/slow",
            get(move || {
                let entered = entered.clone();
                async move {
                    entered.notify_one();
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    "done"
                }
            }),
        )
    };

    let database = Arc::new(CountingDatabase::default());
    let (listener, addr) = local_listener().await;
    let server = Server::new(
        server_config(addr.port(), Duration::from_secs(5)),
        router,
        database.clone(),
    );
    server.start_on(listener).unwrap();

    let request = tokio::spawn(get_status(format!("http://{addr}/slow")));
    entered.notified().await;

    assert_eq!(server.shutdown().await, ShutdownOutcome::Graceful);
    assert_eq!(request.await.unwrap(), Some(200));
    assert_eq!(database.shutdowns(), 1);
}

#[tokio::test]
async fn missed_deadline_forces_termination() {
    let (listener, addr) = local_listener().await;
    let server = Server::new(
        server_config(addr.port(), Duration::from_millis(100)),
        app(Arc::new(MemoryTodoStore::new())),
        Arc::new(StuckDatabase),
    );
    server.start_on(listener).unwrap();

    let exit = tokio::time::timeout(
        Duration::from_secs(5),
        server.run_until(future::ready(())),
    )
    .await
    .expect("deadline should bound shutdown");

    assert_eq!(exit.outcome, ShutdownOutcome::DeadlineExceeded);
    assert_eq!(exit.code(), EXIT_FORCED);
    assert_eq!(server.state(), LifecycleState::Stopped);

    // Later triggers see the recorded outcome without running teardown again.
    assert_eq!(server.shutdown().await, ShutdownOutcome::DeadlineExceeded);
}
