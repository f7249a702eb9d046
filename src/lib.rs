//! Portrait registers users together with a profile photo and serves it back.
#![forbid(unsafe_code)]
#![deny(unused_mut)]

pub mod clock;
mod database;
#[cfg(test)]
mod fixtures;
mod photo;
mod router;

pub mod config;
pub mod error;
pub mod locks;
pub mod registration;
pub mod storage;
pub mod telemetry;
pub mod user;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::DefaultBodyLimit;
use axum::http::{Method, StatusCode, header};
use axum::routing::{get, post};
use axum::{Router, middleware as AxumMiddleware};
use metrics_exporter_prometheus::PrometheusHandle;
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::cors::{Any, CorsLayer};
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};

use crate::clock::SystemClock;
use crate::config::Configuration;
use crate::registration::RegistrationService;
use crate::storage::{BlobDirectory, LocalDirectory};
use crate::user::{UserRepository, UserStore};

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    app: Router,
    method: Method,
    path: &str,
    content_type: Option<&str>,
    body: axum::body::Body,
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    let mut request = Request::builder().method(method).uri(path);
    if let Some(content_type) = content_type {
        request = request.header(header::CONTENT_TYPE, content_type);
    }

    app.oneshot(request.body(body).unwrap()).await.unwrap()
}

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Configuration>,
    pub users: Arc<dyn UserStore>,
    pub registration: Arc<RegistrationService>,
    pub metrics: Option<PrometheusHandle>,
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(
                    |chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                        tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                    },
                )
                .make_span_with(
                    DefaultMakeSpan::new()
                        .include_headers(true)
                        .level(tracing::Level::INFO),
                )
                .on_request(DefaultOnRequest::new())
                .on_response(
                    DefaultOnResponse::new()
                        .include_headers(true)
                        .latency_unit(LatencyUnit::Micros),
                ),
        )
        // Set a timeout.
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(10),
        ))
        // Remove senstive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([
            header::AUTHORIZATION,
            header::COOKIE,
        ]))
        // Add CORS preflight support.
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers(Any),
        );

    Router::new()
        // `GET /` goes to `status`.
        .route("/", get(router::status::handler))
        // `POST /register` goes to `register`.
        .route("/register", post(router::register::handler))
        .route("/image/{username}", get(router::image::handler))
        .route("/users", get(router::users::handler))
        .route("/metrics", get(router::metrics))
        .layer(DefaultBodyLimit::max(state.config.storage.max_upload_size))
        .with_state(state)
        .route_layer(AxumMiddleware::from_fn(telemetry::track))
        .layer(middleware)
}

/// Initialize the application state.
pub async fn initialize_state(
    config: Configuration,
    metrics: Option<PrometheusHandle>,
) -> Result<AppState, Box<dyn std::error::Error>> {
    let Some(postgres) = &config.postgres else {
        return Err(
            "missing `postgres` entry on `config.yaml` file or `DB_HOST` variable"
                .into(),
        );
    };
    let db = database::Database::new(postgres).await?;

    // execute migrations scripts on start.
    sqlx::migrate!().run(&db.postgres).await?;

    let users: Arc<dyn UserStore> = Arc::new(UserRepository::new(db.postgres));
    let blobs = LocalDirectory::new(
        config.storage.directory.clone(),
        config.storage.staging.clone(),
    );
    blobs.ensure_root().await?;

    let registration = RegistrationService::new(
        Arc::clone(&users),
        Arc::new(blobs),
        Arc::new(SystemClock),
        &config.storage,
    );

    Ok(AppState {
        config: Arc::new(config),
        users,
        registration: Arc::new(registration),
        metrics,
    })
}
