//! `civic serve` -- HTTP JSON API for the report workflow engine.
//!
//! Security features:
//! - CORS headers on all responses (permissive for local dev)
//! - Per-IP rate limiting (default: 60 req/min, configurable)
//! - Optional API key authentication (`server.api_key` / `CIVIC_API_KEY`)
//!
//! The acting principal comes from the `x-actor-id` / `x-actor-role`
//! headers set by the gateway in front of this server.
//!
//! Endpoints:
//! - GET  /health                         - Server status (exempt from auth)
//! - POST /reports                        - File a report
//! - GET  /reports                        - List reports
//! - GET  /reports/{id}                   - One report
//! - GET  /reports/{id}/transitions       - Statuses the actor may move it to
//! - POST /reports/{id}/transitions       - Apply a transition
//! - POST /reports/{id}/restore           - Restore a deleted report
//! - POST /reports/bulk                   - Apply one transition to many reports
//! - GET  /audit                          - Query the audit trail
//! - GET  /notifications                  - The actor's notifications
//! - GET  /notifications/unread-count     - The actor's unread count
//! - POST /notifications/read             - Mark notifications read
//! - POST /notifications/read-all         - Mark all notifications read
//! - GET  /notification-types             - Notification type registry
//! - GET  /dead-letters                   - Undelivered notifications
//! - POST /dead-letters/redeliver         - Retry undelivered notifications
//!
//! All responses use Content-Type: application/json.

mod actor;
mod handlers;
mod middleware;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{middleware as axum_middleware, Json, Router};
use civic_engine::{Classifier, ErrorKind, WorkflowError, WorkflowService};
use civic_storage::MemoryStorage;
use tower_http::cors::{Any, CorsLayer};

use self::handlers::{
    handle_allowed_transitions, handle_apply_transition, handle_bulk, handle_create_report,
    handle_dead_letters, handle_get_report, handle_health, handle_list_notifications,
    handle_list_reports, handle_mark_all_read, handle_mark_read, handle_not_found,
    handle_notification_types, handle_query_audit, handle_redeliver, handle_restore,
    handle_unread_count,
};
use self::middleware::{auth_middleware, rate_limit_middleware};
use self::state::{AppState, RateLimiter};
use crate::classifier::HttpClassifier;
use crate::config::ServerConfig;

/// Maximum request body size: 1 MB.
const MAX_BODY_SIZE: usize = 1024 * 1024;

/// Rate limit window duration in seconds (1 minute).
const RATE_LIMIT_WINDOW_SECS: u64 = 60;

/// Construct a JSON error response with the given status code and message.
fn json_error(status: StatusCode, message: &str) -> impl IntoResponse {
    (status, Json(serde_json::json!({"error": message})))
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Unauthorized => StatusCode::FORBIDDEN,
        ErrorKind::InvalidTransition | ErrorKind::PreconditionFailed | ErrorKind::Invalid => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ErrorKind::VersionConflict => StatusCode::CONFLICT,
        ErrorKind::DispatchFailure
        | ErrorKind::StorageFailure
        | ErrorKind::UnknownNotificationType => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Map an engine error to a JSON response carrying its stable kind.
///
/// `DispatchFailure` also returns the committed report, since the
/// transition itself went through.
fn workflow_error(err: WorkflowError) -> Response {
    let kind = err.kind();
    let mut body = serde_json::json!({
        "error": err.to_string(),
        "kind": kind,
    });
    if let WorkflowError::DispatchFailure {
        report,
        audit_entry_id,
        ..
    } = &err
    {
        body["report"] = serde_json::to_value(report).unwrap_or_default();
        body["audit_entry_id"] = serde_json::json!(audit_entry_id);
    }
    (status_for(kind), Json(body)).into_response()
}

fn build_state(config: &ServerConfig) -> Arc<AppState> {
    let storage = Arc::new(MemoryStorage::new());
    let classifier = config.classifier.url.as_ref().map(|url| {
        Arc::new(HttpClassifier::new(url.clone(), config.classifier.timeout_secs))
            as Arc<dyn Classifier>
    });
    Arc::new(AppState {
        workflow: WorkflowService::new(
            storage,
            config.workflow.clone(),
            config.listing.clone(),
        ),
        classifier,
        rate_limiter: RateLimiter::new(config.server.rate_limit),
        api_key: config.server.api_key.clone(),
    })
}

fn router(state: Arc<AppState>) -> Router {
    // CORS: permissive for local dev; tighten behind a production gateway.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/reports", get(handle_list_reports).post(handle_create_report))
        .route("/reports/bulk", post(handle_bulk))
        .route("/reports/{id}", get(handle_get_report))
        .route(
            "/reports/{id}/transitions",
            get(handle_allowed_transitions).post(handle_apply_transition),
        )
        .route("/reports/{id}/restore", post(handle_restore))
        .route("/audit", get(handle_query_audit))
        .route("/notifications", get(handle_list_notifications))
        .route("/notifications/unread-count", get(handle_unread_count))
        .route("/notifications/read", post(handle_mark_read))
        .route("/notifications/read-all", post(handle_mark_all_read))
        .route("/notification-types", get(handle_notification_types))
        .route("/dead-letters", get(handle_dead_letters))
        .route("/dead-letters/redeliver", post(handle_redeliver))
        .fallback(handle_not_found)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .with_state(state)
}

/// Start the HTTP server.
///
/// When TLS cert/key paths are provided, the server listens over HTTPS
/// using `axum-server` with rustls. Otherwise it uses plain HTTP.
pub async fn start_server(
    config: ServerConfig,
    _tls_cert: Option<PathBuf>,
    _tls_key: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let port = config.server.port;
    if config.server.api_key.is_some() {
        tracing::info!("API key authentication enabled");
    }
    if let Some(url) = &config.classifier.url {
        tracing::info!(%url, "category classifier configured");
    }
    tracing::info!(
        rate_limit = config.server.rate_limit,
        officer_may_verify = config.workflow.officer_may_verify,
        include_deleted = config.listing.include_deleted,
        "starting report workflow server"
    );

    let app = router(build_state(&config));
    let addr = format!("0.0.0.0:{}", port);

    #[cfg(feature = "tls")]
    if let (Some(cert_path), Some(key_path)) = (&_tls_cert, &_tls_key) {
        let tls = axum_server::tls_rustls::RustlsConfig::from_pem_file(cert_path, key_path).await?;
        let socket_addr: SocketAddr = addr.parse()?;
        tracing::info!("listening on https://0.0.0.0:{}", port);
        axum_server::bind_rustls(socket_addr, tls)
            .serve(app.into_make_service_with_connect_info::<SocketAddr>())
            .await?;
        return Ok(());
    }

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("listening on http://0.0.0.0:{}", port);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("server shut down");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C).
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
    tracing::info!("received shutdown signal");
}
