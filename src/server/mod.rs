//! # HTTP surface
//!
//! An [`axum`] router exposing the [`Localizer`] operations:
//!
//! | Method | Path              | Handler                               |
//! |--------|-------------------|---------------------------------------|
//! | GET    | `/localize`       | [`localize::localize_url`]            |
//! | POST   | `/localize`       | [`localize::localize_upload`]         |
//! | GET    | `/user/list`      | [`user::list`]                        |
//! | GET    | `/user/history`   | [`user::history`]                     |
//! | POST   | `/user/history`   | [`user::add_history`]                 |
//!
//! Errors are answered as `{"message": "..."}` with status 404 for request input problems and
//! 500 for everything else. Every response allows any origin.
use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderName, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use crate::{localize_errors::LocalizeError, localizer::Localizer};

pub mod localize;
pub mod user;

/// Extra room for the non-image multipart fields and boundaries.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

impl IntoResponse for LocalizeError {
    fn into_response(self) -> Response {
        let status = if self.is_client_error() {
            StatusCode::NOT_FOUND
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (status, Json(json!({ "message": self.to_string() }))).into_response()
    }
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            header::ORIGIN,
            HeaderName::from_static("x-requested-with"),
            header::CONTENT_TYPE,
            header::ACCEPT,
        ])
}

/// Build the application router around a shared [`Localizer`].
pub fn router(localizer: Localizer) -> Router {
    let body_limit = match localizer.params().max_image_bytes {
        Some(max) => DefaultBodyLimit::max(max.saturating_add(MULTIPART_OVERHEAD)),
        None => DefaultBodyLimit::disable(),
    };

    Router::new()
        .route(
            "/localize",
            get(localize::localize_url).post(localize::localize_upload),
        )
        .route("/user/list", get(user::list))
        .route("/user/history", get(user::history).post(user::add_history))
        .layer(body_limit)
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(localizer)
}

/// Serve the router on `listener` until `shutdown` resolves.
pub async fn serve<F>(
    listener: TcpListener,
    localizer: Localizer,
    shutdown: F,
) -> Result<(), LocalizeError>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    info!("Vision localize server listening on {}", listener.local_addr()?);
    axum::serve(listener, router(localizer))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
