//! # imgctl: job-scoped image storage
//!
//! `imgctl` is a small HTTP service that stores uploaded images on the local filesystem, grouped
//! into one folder per job. Clients upload an image together with a job id, get back the
//! absolute URL it is served from, and later delete either that single image (by URL) or the
//! whole job folder.
//!
//! ## Endpoints
//!
//! | Method   | Path                         | Purpose                                  |
//! |----------|------------------------------|------------------------------------------|
//! | `GET`    | `/health`                    | Liveness check                           |
//! | `POST`   | `/upload-image`              | Multipart upload (`image`, `jobId`)      |
//! | `GET`    | `/uploads/{jobId}/{file}`    | Stored image bytes                       |
//! | `DELETE` | `/delete-image`              | Delete one image by its URL              |
//! | `DELETE` | `/delete-job/{jobId}`        | Delete a job folder                      |
//! | `GET`    | `/docs`, `/api-docs/openapi.json` | API documentation                   |
//! | `GET`    | `/internal/metrics`          | Prometheus metrics (when enabled)        |
//!
//! Every error is a JSON body of the form `{"error": "..."}`.
//!
//! ## Storage
//!
//! All filesystem access goes through [`storage::Storage`], which confines every path derived
//! from client input to the configured root. See that module for the containment rules.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use imgctl::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = imgctl::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     imgctl::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config)?;
//!     app.serve(async {
//!         tokio::signal::ctrl_c().await.ok();
//!     })
//!     .await
//! }
//! ```

pub mod api;
pub mod config;
pub mod errors;
mod openapi;
pub mod storage;
pub mod telemetry;

#[cfg(test)]
pub mod test_utils;

use anyhow::Context;
use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    handler::HandlerWithoutStateExt,
    http::{HeaderValue, Method},
    routing::{delete, get, post},
};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
use tokio::net::TcpListener;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowHeaders, AllowOrigin, CorsLayer},
    services::ServeDir,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::api::extractors::UPLOADS_PREFIX;
use crate::api::handlers::{health, images, jobs, uploads};
pub use crate::config::Config;
use crate::config::CorsOrigin;
use crate::errors::Error;
use crate::openapi::ApiDoc;
use crate::storage::Storage;

/// Room for multipart boundaries, part headers and the `jobId` field on top of the file itself.
/// The upload handler enforces the file size limit precisely; this only caps the raw body.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Shared state handed to every handler.
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .storage(storage)
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub storage: Storage,
}

fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let cors_config = &config.cors;

    // tower-http refuses a literal `*` inside an origin list
    let allow_origin = if cors_config.allowed_origins.iter().any(|origin| matches!(origin, CorsOrigin::Wildcard)) {
        AllowOrigin::any()
    } else {
        let mut origins = Vec::new();
        for origin in &cors_config.allowed_origins {
            if let CorsOrigin::Url(url) = origin {
                origins.push(url.origin().ascii_serialization().parse::<HeaderValue>()?);
            }
        }
        AllowOrigin::list(origins)
    };

    let mut cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::HEAD, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(cors_config.allow_credentials);

    if let Some(max_age) = cors_config.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(cors)
}

async fn not_found() -> Error {
    Error::NotFound {
        message: "Not found".to_string(),
    }
}

/// Build the application router with all endpoints and middleware.
///
/// Stored images are served straight from the storage root by `ServeDir`; anything it cannot
/// find falls through to the same JSON 404 as unknown routes.
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    let body_limit = usize::try_from(state.config.storage.max_file_size)
        .context("storage.max_file_size does not fit in memory")?
        .saturating_add(MULTIPART_OVERHEAD);

    let api_routes = Router::new()
        .route("/health", get(health::health))
        .route(
            "/upload-image",
            post(uploads::upload_image).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/delete-image", delete(images::delete_image))
        .route("/delete-job/{job_id}", delete(jobs::delete_job))
        .with_state(state.clone());

    let stored_images = ServeDir::new(state.storage.root())
        .append_index_html_on_directories(false)
        .not_found_service(not_found.into_service());

    let mut router = Router::new()
        .merge(api_routes)
        .nest_service(UPLOADS_PREFIX, stored_images)
        .route("/api-docs/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()))
        .fallback(not_found)
        .layer(create_cors_layer(&state.config)?);

    // Add Prometheus metrics if enabled
    if state.config.enable_metrics {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        router = router
            .route("/internal/metrics", get(|| async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    let router = router.layer(CatchPanicLayer::custom(errors::panic_response)).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

pub struct Application {
    router: Router,
    app_state: AppState,
    config: Config,
}

impl Application {
    /// Open the storage root and build the router.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting imgctl with configuration: {:#?}", config);

        let storage = Storage::open(&config.storage.root)
            .with_context(|| format!("failed to open storage root {}", config.storage.root.display()))?;

        let app_state = AppState::builder().config(config.clone()).storage(storage).build();
        let router = build_router(&app_state)?;

        Ok(Self {
            router,
            app_state,
            config,
        })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "imgctl listening on http://{}, storing images in {}",
            bind_addr,
            self.app_state.storage.root().display()
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}
