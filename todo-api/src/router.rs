//! Route table and middleware stack.

use std::{net::SocketAddr, sync::Arc};

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header::USER_AGENT, HeaderName, Request},
    middleware,
    routing::get,
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::{DefaultOnResponse, TraceLayer},
    LatencyUnit,
};
use tracing::Level;

use crate::{
    config::HttpRouterConfig,
    context::REQUEST_ID_HEADER,
    handlers,
    store::TodoStore,
    telemetry,
};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TodoStore>,
    pub metrics: PrometheusHandle,
}

impl AppState {
    pub fn new(store: Arc<dyn TodoStore>, metrics: PrometheusHandle) -> Self {
        Self { store, metrics }
    }
}

pub fn build(config: &HttpRouterConfig, state: AppState) -> Router {
    let todo_routes = Router::new()
        .route(
            "/todo",
            get(handlers::get_todo_by_query)
                .delete(handlers::delete_todo_by_query)
                .post(handlers::post_todo),
        )
        .route(
            "/todo/{id}",
            get(handlers::get_todo).delete(handlers::delete_todo),
        )
        .route_layer(middleware::from_fn(telemetry::track));

    let api = todo_routes.route("/health", get(handlers::health));

    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);
    let layers = ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(request_id.clone(), MakeRequestUuid))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<Body>| {
                    let headers = request.headers();
                    let request_id = headers
                        .get(REQUEST_ID_HEADER)
                        .and_then(|value| value.to_str().ok())
                        .unwrap_or_default();
                    let user_agent = headers
                        .get(USER_AGENT)
                        .and_then(|value| value.to_str().ok())
                        .unwrap_or_default();
                    // Absent when the router is driven without a listener.
                    let remote_addr = request
                        .extensions()
                        .get::<ConnectInfo<SocketAddr>>()
                        .map(|ConnectInfo(addr)| addr.to_string())
                        .unwrap_or_default();
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri(),
                        request_id,
                        remote_addr = %remote_addr,
                        user_agent,
                    )
                })
                .on_response(
                    DefaultOnResponse::new()
                        .level(Level::INFO)
                        .latency_unit(LatencyUnit::Micros),
                ),
        )
        .layer(PropagateRequestIdLayer::new(request_id))
        .layer(CatchPanicLayer::new())
        .layer(TimeoutLayer::new(config.timeout))
        .layer(cors(config));

    Router::new()
        .nest("/api", api)
        .route("/metrics", get(handlers::metrics))
        .layer(layers)
        .with_state(state)
}

fn cors(config: &HttpRouterConfig) -> CorsLayer {
    let origins = if config.allowed_origins.is_empty() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(config.allowed_origins.clone())
    };

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(config.allowed_methods.clone())
        .allow_headers(config.allowed_headers.clone())
        .allow_credentials(false)
}
