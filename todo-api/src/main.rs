use std::{process::ExitCode, sync::Arc};

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusHandle;
use todo_api::{
    config::Config,
    database::PgClient,
    logger, router,
    server::{self, EXIT_FORCED},
    telemetry, AppState, PgTodoStore, Server, ShutdownOutcome,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Config, logger or database failures before the server runs.
const EXIT_STARTUP: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load configuration: {err}");
            return ExitCode::from(EXIT_STARTUP);
        }
    };

    if let Err(err) = logger::init(&config) {
        eprintln!("failed to initialize logger: {err}");
        return ExitCode::from(EXIT_STARTUP);
    }

    info!(environment = %config.environment, "setting up todo api service");
    let (server, metrics) = match build_server(&config).await {
        Ok(built) => built,
        Err(err) => {
            error!(error = %format!("{err:#}"), "failed to initialize todo api service");
            return ExitCode::from(EXIT_STARTUP);
        }
    };

    if let Err(err) = server.start() {
        error!(error = %err, "failed to start http server");
        return ExitCode::from(EXIT_STARTUP);
    }

    let upkeep_cancel = CancellationToken::new();
    tokio::spawn(telemetry::run_upkeep(
        metrics,
        telemetry::UPKEEP_INTERVAL,
        upkeep_cancel.clone(),
    ));

    let exit = server.run_until(server::shutdown_signal()).await;
    upkeep_cancel.cancel();
    if exit.outcome == ShutdownOutcome::DeadlineExceeded {
        // In-flight work may still be parked on the runtime; do not wait for it.
        std::process::exit(i32::from(EXIT_FORCED));
    }

    info!(code = exit.code(), "exiting todo api service");
    ExitCode::from(exit.code())
}

async fn build_server(config: &Config) -> anyhow::Result<(Server, PrometheusHandle)> {
    let metrics = telemetry::install().context("failed to install prometheus recorder")?;

    let client = PgClient::connect(&config.database)
        .await
        .context("failed to initialize pg client")?;

    let store = Arc::new(PgTodoStore::new(client.pool().clone()));
    let router = router::build(&config.http_router, AppState::new(store, metrics.clone()));

    let server = Server::new(config.http_server.clone(), router, Arc::new(client));
    Ok((server, metrics))
}
