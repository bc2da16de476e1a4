//! apkforge: Android App Bundle to universal APK conversion service
//!
//! Accepts an `.aab` upload, runs bundletool against it and streams back the
//! signed universal APK.

pub mod config;
pub mod converter;
pub mod error;
pub mod locator;
pub mod packager;
pub mod routes;
pub mod runner;
pub mod upload;
pub mod workspace;

pub use config::Config;
pub use converter::Converter;
pub use error::ConvertError;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use packager::{BundletoolPackager, Packager};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

/// Room for multipart boundaries and part headers on top of the file itself.
const MULTIPART_OVERHEAD_BYTES: u64 = 64 * 1024;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub converter: Converter,
}

impl AppState {
    /// State backed by the real bundletool.
    pub fn new(config: Config) -> Self {
        let packager = Arc::new(BundletoolPackager::from_config(&config));
        Self::with_packager(config, packager)
    }

    pub fn with_packager(config: Config, packager: Arc<dyn Packager>) -> Self {
        let converter = Converter::new(&config, packager);
        info!(
            tmp_root = %converter.tmp_root().display(),
            max_upload_bytes = converter.max_upload_bytes(),
            "initialized apkforge application state"
        );
        Self {
            config: Arc::new(config),
            converter,
        }
    }
}

pub type AppResult<T> = Result<T, ConvertError>;

/// Health check endpoint
async fn healthz() -> impl IntoResponse {
    "OK"
}

/// Create the Axum application router
pub fn create_app(state: AppState) -> Router {
    let body_limit = usize::try_from(
        state
            .config
            .max_upload_bytes
            .saturating_add(MULTIPART_OVERHEAD_BYTES),
    )
    .unwrap_or(usize::MAX);
    let cors = cors_layer(&state.config.cors_allow_origin);

    Router::new()
        .route("/", get(routes::index))
        .route("/healthz", get(healthz))
        .route("/generate-apk", post(routes::generate_apk))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CatchPanicLayer::new())
                .layer(cors),
        )
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([header::CONTENT_DISPOSITION]);

    if origins.iter().any(|origin| origin.trim() == "*") {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin.trim()) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(origin = %origin, error = %err, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}
