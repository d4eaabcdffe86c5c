//! HTTP server lifecycle.
//!
//! # Design
//! `Server` owns the listener task and the database client and moves through
//! `Initialized → Running → ShuttingDown → Stopped`.
//!
//! - The listener runs in its own task. Anything that ends it other than a
//!   shutdown request (bind failure, `serve` error, `serve` returning on its
//!   own) is sent over the fatal channel to whoever is in `run_until`.
//! - `shutdown` is single-fire. The first caller claims the teardown and
//!   spawns it, so dropping that caller does not abandon it half way. Every
//!   caller, concurrent or late, waits for the outcome on a `watch` channel.
//! - Teardown cancels the listener and waits for in-flight requests, then
//!   closes the pool. The listener always goes first so no new request can
//!   reach a closing pool. A failing step is logged and the next one still
//!   runs.
//! - The whole teardown races one deadline. Losing the race aborts the
//!   listener task and reports `DeadlineExceeded`; the binary turns that into
//!   a forced exit.

use std::{
    future::Future,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use axum::Router;
use tokio::{
    net::TcpListener,
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{config::HttpServerConfig, database::DatabaseClient, error::ServerError};

pub const EXIT_FATAL: u8 = 1;
pub const EXIT_FORCED: u8 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    Initialized,
    Running,
    ShuttingDown,
    Stopped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownOutcome {
    Graceful,
    DeadlineExceeded,
}

/// What ended `run_until`.
#[derive(Debug)]
pub enum Trigger {
    Signal,
    Fatal(ServerError),
}

#[derive(Debug)]
pub struct Exit {
    pub trigger: Trigger,
    pub outcome: ShutdownOutcome,
}

impl Exit {
    /// `0` after a signal, `1` after a fatal server error, `2` when the
    /// shutdown deadline forced termination.
    pub fn code(&self) -> u8 {
        match (&self.trigger, self.outcome) {
            (_, ShutdownOutcome::DeadlineExceeded) => EXIT_FORCED,
            (Trigger::Fatal(_), ShutdownOutcome::Graceful) => EXIT_FATAL,
            (Trigger::Signal, ShutdownOutcome::Graceful) => 0,
        }
    }
}

pub struct Server {
    inner: Arc<Inner>,
}

struct Inner {
    config: HttpServerConfig,
    router: Router,
    database: Arc<dyn DatabaseClient>,

    state: watch::Sender<LifecycleState>,
    cancel: CancellationToken,
    http_task: Mutex<Option<JoinHandle<()>>>,
    fatal_tx: mpsc::UnboundedSender<ServerError>,
    fatal_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ServerError>>,

    teardown_claimed: AtomicBool,
    outcome: watch::Sender<Option<ShutdownOutcome>>,
}

impl Server {
    pub fn new(config: HttpServerConfig, router: Router, database: Arc<dyn DatabaseClient>) -> Self {
        let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(LifecycleState::Initialized);
        let (outcome, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                config,
                router,
                database,
                state,
                cancel: CancellationToken::new(),
                http_task: Mutex::new(None),
                fatal_tx,
                fatal_rx: tokio::sync::Mutex::new(fatal_rx),
                teardown_claimed: AtomicBool::new(false),
                outcome,
            }),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.inner.state.borrow()
    }

    /// Spawns the listener on the configured address and returns immediately.
    /// A bind failure arrives later on the fatal channel.
    pub fn start(&self) -> Result<(), ServerError> {
        self.inner.spawn_listener(None)
    }

    /// Like `start`, on a listener the caller already bound.
    pub fn start_on(&self, listener: TcpListener) -> Result<(), ServerError> {
        self.inner.spawn_listener(Some(listener))
    }

    /// Waits for `signal` or a fatal listener error, then shuts down.
    pub async fn run_until<F>(&self, signal: F) -> Exit
    where
        F: Future<Output = ()>,
    {
        let trigger = {
            let mut fatal = self.inner.fatal_rx.lock().await;
            tokio::select! {
                _ = signal => {
                    info!("termination signal received, attempting to gracefully shutdown");
                    Trigger::Signal
                }
                Some(err) = fatal.recv() => {
                    error!(error = %err, "fatal server error, attempting to gracefully shutdown");
                    Trigger::Fatal(err)
                }
            }
        };

        let outcome = self.shutdown().await;
        Exit { trigger, outcome }
    }

    /// Runs the teardown once; every call returns the same outcome. The
    /// teardown keeps running even if the caller that started it is dropped.
    pub async fn shutdown(&self) -> ShutdownOutcome {
        let mut outcome = self.inner.outcome.subscribe();

        if !self.inner.teardown_claimed.swap(true, Ordering::AcqRel) {
            let inner = self.inner.clone();
            tokio::spawn(async move {
                let result = inner.teardown().await;
                inner.outcome.send_replace(Some(result));
            });
        }

        // The sender lives in `inner`, which `self` keeps alive.
        let result = match outcome.wait_for(Option::is_some).await {
            Ok(result) => (*result).unwrap_or(ShutdownOutcome::DeadlineExceeded),
            Err(_) => ShutdownOutcome::DeadlineExceeded,
        };
        result
    }
}

impl Inner {
    fn spawn_listener(&self, listener: Option<TcpListener>) -> Result<(), ServerError> {
        let started = self.state.send_if_modified(|state| {
            if *state != LifecycleState::Initialized {
                return false;
            }
            *state = LifecycleState::Running;
            true
        });
        if !started {
            return Err(ServerError::AlreadyStarted);
        }

        let address = self.config.address();
        let router = self.router.clone();
        let cancel = self.cancel.clone();
        let fatal = self.fatal_tx.clone();

        let task = tokio::spawn(async move {
            match serve(address, listener, router, cancel).await {
                Ok(()) => info!("http server stopped"),
                Err(err) => {
                    error!(error = %err, "http server stopped unexpectedly");
                    // The receiver only goes away with the server itself.
                    let _ = fatal.send(err);
                }
            }
        });

        *self.http_task.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
        Ok(())
    }

    async fn teardown(&self) -> ShutdownOutcome {
        self.state.send_replace(LifecycleState::ShuttingDown);

        let http_task = self
            .http_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let abort = http_task.as_ref().map(JoinHandle::abort_handle);
        let deadline = self.config.shutdown_timeout;

        let outcome = match tokio::time::timeout(deadline, self.shutdown_steps(http_task)).await {
            Ok(()) => ShutdownOutcome::Graceful,
            Err(_) => {
                error!(
                    timeout_ms = deadline.as_millis() as u64,
                    "shutdown deadline reached, terminating remaining processes ungracefully"
                );
                if let Some(abort) = abort {
                    abort.abort();
                }
                ShutdownOutcome::DeadlineExceeded
            }
        };

        self.state.send_replace(LifecycleState::Stopped);
        outcome
    }

    async fn shutdown_steps(&self, http_task: Option<JoinHandle<()>>) {
        self.cancel.cancel();
        match http_task {
            Some(task) => match task.await {
                Ok(()) => info!("shutdown http server gracefully"),
                Err(err) => error!(error = %err, "failed to shutdown http server gracefully"),
            },
            None => debug!("http server was never started"),
        }

        match self.database.shutdown().await {
            Ok(()) => info!("shutdown database gracefully"),
            Err(err) => error!(error = %err, "failed to shutdown database gracefully"),
        }
    }
}

async fn serve(
    address: String,
    listener: Option<TcpListener>,
    router: Router,
    cancel: CancellationToken,
) -> Result<(), ServerError> {
    let listener = match listener {
        Some(listener) => listener,
        None => TcpListener::bind(&address)
            .await
            .map_err(|source| ServerError::Bind {
                addr: address.clone(),
                source,
            })?,
    };
    match listener.local_addr() {
        Ok(local) => info!(address = %local, "running http server"),
        Err(_) => info!(address = %address, "running http server"),
    }

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(cancel.clone().cancelled_owned())
    .await
    .map_err(ServerError::Serve)?;

    if !cancel.is_cancelled() {
        return Err(ServerError::StoppedUnexpectedly);
    }
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "unable to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "unable to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!(signal = "interrupt", "signal received"),
        _ = terminate => info!(signal = "SIGTERM", "signal received"),
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use async_trait::async_trait;

    use super::*;
    use crate::error::ClientError;

    #[derive(Default)]
    struct CountingDatabase {
        shutdowns: AtomicUsize,
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

    /// Takes a while to close and counts how often it is asked to.
    #[derive(Default)]
    struct SlowDatabase {
        shutdowns: AtomicUsize,
    }

    #[async_trait]
    impl DatabaseClient for SlowDatabase {
        async fn shutdown(&self) -> Result<(), ClientError> {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        }
    }

    struct FailingDatabase;

    #[async_trait]
    impl DatabaseClient for FailingDatabase {
        async fn shutdown(&self) -> Result<(), ClientError> {
            Err(ClientError::AlreadyClosed)
        }
    }

    fn config(timeout: Duration) -> HttpServerConfig {
        HttpServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            shutdown_timeout: timeout,
        }
    }

    #[test]
    fn exit_codes() {
        let exit = |trigger, outcome| Exit { trigger, outcome }.code();
        assert_eq!(exit(Trigger::Signal, ShutdownOutcome::Graceful), 0);
        assert_eq!(
            exit(Trigger::Fatal(ServerError::StoppedUnexpectedly), ShutdownOutcome::Graceful),
            EXIT_FATAL
        );
        assert_eq!(exit(Trigger::Signal, ShutdownOutcome::DeadlineExceeded), EXIT_FORCED);
    }

    #[tokio::test]
    async fn shutdown_without_start_still_closes_database() {
        let database = Arc::new(CountingDatabase::default());
        let server = Server::new(config(Duration::from_secs(1)), Router::new(), database.clone());
        assert_eq!(server.state(), LifecycleState::Initialized);

        assert_eq!(server.shutdown().await, ShutdownOutcome::Graceful);
        assert_eq!(server.state(), LifecycleState::Stopped);
        assert_eq!(database.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn repeated_shutdown_runs_teardown_once() {
        let database = Arc::new(CountingDatabase::default());
        let server = Server::new(config(Duration::from_secs(1)), Router::new(), database.clone());

        server.shutdown().await;
        server.shutdown().await;
        assert_eq!(database.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropped_shutdown_caller_does_not_rerun_teardown() {
        let database = Arc::new(SlowDatabase::default());
        let server = Server::new(config(Duration::from_secs(5)), Router::new(), database.clone());

        let abandoned = tokio::time::timeout(Duration::from_millis(50), server.shutdown()).await;
        assert!(abandoned.is_err());

        assert_eq!(server.shutdown().await, ShutdownOutcome::Graceful);
        assert_eq!(server.state(), LifecycleState::Stopped);
        assert_eq!(database.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_database_step_does_not_change_outcome() {
        let server = Server::new(config(Duration::from_secs(1)), Router::new(), Arc::new(FailingDatabase));
        assert_eq!(server.shutdown().await, ShutdownOutcome::Graceful);
        assert_eq!(server.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let server = Server::new(
            config(Duration::from_secs(1)),
            Router::new(),
            Arc::new(CountingDatabase::default()),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        server.start_on(listener).unwrap();
        assert_eq!(server.state(), LifecycleState::Running);
        assert!(matches!(server.start(), Err(ServerError::AlreadyStarted)));
        server.shutdown().await;
    }

    #[tokio::test]
    async fn start_after_shutdown_is_rejected() {
        let server = Server::new(
            config(Duration::from_secs(1)),
            Router::new(),
            Arc::new(CountingDatabase::default()),
        );
        server.shutdown().await;
        assert!(matches!(server.start(), Err(ServerError::AlreadyStarted)));
    }
}
