//! Route handlers. Each one delegates to the workflow service; no handler
//! makes an authorization decision the engine does not make itself, apart
//! from the admin-only dead-letter endpoints.

use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use civic_engine::registry::{self, REGISTRY_VERSION};
use civic_engine::{ReportDraft, ReportQuery, Status, TransitionExtra};
use civic_storage::AuditQuery;
use serde::Deserialize;
use time::OffsetDateTime;

use super::actor::RequestActor;
use super::state::AppState;
use super::{json_error, workflow_error};
use crate::classifier::classify_blocking;

/// Fallback handler for unmatched routes.
pub(crate) async fn handle_not_found() -> impl IntoResponse {
    json_error(StatusCode::NOT_FOUND, "not found")
}

/// GET /health
pub(crate) async fn handle_health() -> impl IntoResponse {
    let response = serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "registry_version": REGISTRY_VERSION,
    });
    (StatusCode::OK, Json(response))
}

// ── Reports ───────────────────────────────────────────────────────────────────

/// POST /reports
pub(crate) async fn handle_create_report(
    State(state): State<Arc<AppState>>,
    RequestActor(actor): RequestActor,
    Json(draft): Json<ReportDraft>,
) -> Response {
    let classification = match (&state.classifier, &draft.category_id) {
        (Some(classifier), None) if !draft.description.trim().is_empty() => {
            classify_blocking(classifier.clone(), draft.description.clone()).await
        }
        _ => None,
    };

    match state
        .workflow
        .create_report(&actor, draft, classification.as_ref())
        .await
    {
        Ok(report) => (StatusCode::CREATED, Json(report)).into_response(),
        Err(e) => workflow_error(e),
    }
}

/// GET /reports?status=&reporter_id=&officer_id=
pub(crate) async fn handle_list_reports(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ReportQuery>,
) -> Response {
    match state.workflow.list_reports(&query).await {
        Ok(reports) => Json(serde_json::json!({ "reports": reports })).into_response(),
        Err(e) => workflow_error(e),
    }
}

/// GET /reports/{id}
pub(crate) async fn handle_get_report(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.workflow.get_report(&id).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => workflow_error(e),
    }
}

/// GET /reports/{id}/transitions
pub(crate) async fn handle_allowed_transitions(
    State(state): State<Arc<AppState>>,
    RequestActor(actor): RequestActor,
    Path(id): Path<String>,
) -> Response {
    match state.workflow.allowed_transitions(&id, &actor).await {
        Ok(allowed) => Json(serde_json::json!({
            "report_id": id,
            "allowed": allowed,
        }))
        .into_response(),
        Err(e) => workflow_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct TransitionRequest {
    status: Status,
    expected_version: Option<i64>,
    #[serde(flatten)]
    extra: TransitionExtra,
}

/// POST /reports/{id}/transitions
pub(crate) async fn handle_apply_transition(
    State(state): State<Arc<AppState>>,
    RequestActor(actor): RequestActor,
    Path(id): Path<String>,
    Json(request): Json<TransitionRequest>,
) -> Response {
    match state
        .workflow
        .apply_transition(
            &id,
            request.status,
            &actor,
            request.expected_version,
            request.extra,
        )
        .await
    {
        Ok(report) => Json(report).into_response(),
        Err(e) => workflow_error(e),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct RestoreParams {
    expected_version: Option<i64>,
}

/// POST /reports/{id}/restore?expected_version=
pub(crate) async fn handle_restore(
    State(state): State<Arc<AppState>>,
    RequestActor(actor): RequestActor,
    Path(id): Path<String>,
    Query(params): Query<RestoreParams>,
) -> Response {
    match state
        .workflow
        .restore(&id, &actor, params.expected_version)
        .await
    {
        Ok(report) => Json(report).into_response(),
        Err(e) => workflow_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct BulkRequest {
    ids: Vec<String>,
    status: Status,
}

/// POST /reports/bulk
pub(crate) async fn handle_bulk(
    State(state): State<Arc<AppState>>,
    RequestActor(actor): RequestActor,
    Json(request): Json<BulkRequest>,
) -> Response {
    if request.ids.is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "'ids' must not be empty").into_response();
    }
    let result = state
        .workflow
        .bulk_apply(&request.ids, request.status, &actor)
        .await;
    Json(result).into_response()
}

// ── Audit ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct AuditParams {
    report_id: Option<String>,
    actor_id: Option<String>,
    action: Option<String>,
    page: Option<usize>,
    limit: Option<usize>,
}

impl From<AuditParams> for AuditQuery {
    fn from(params: AuditParams) -> Self {
        let defaults = AuditQuery::default();
        AuditQuery {
            report_id: params.report_id,
            actor_id: params.actor_id,
            action: params.action,
            page: params.page.unwrap_or(defaults.page),
            limit: params.limit.unwrap_or(defaults.limit),
        }
    }
}

/// GET /audit?report_id=&actor_id=&action=&page=&limit=
pub(crate) async fn handle_query_audit(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AuditParams>,
) -> Response {
    match state.workflow.audit().query(&params.into()).await {
        Ok(page) => Json(page).into_response(),
        Err(e) => workflow_error(e),
    }
}

// ── Notifications ─────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct NotificationParams {
    unread_only: bool,
}

/// GET /notifications?unread_only=
///
/// Each notification carries a `message` rendered by the registry.
pub(crate) async fn handle_list_notifications(
    State(state): State<Arc<AppState>>,
    RequestActor(actor): RequestActor,
    Query(params): Query<NotificationParams>,
) -> Response {
    let notifications = match state
        .workflow
        .notifications()
        .list(&actor.id, params.unread_only)
        .await
    {
        Ok(n) => n,
        Err(e) => return workflow_error(e),
    };

    let mut rendered = Vec::with_capacity(notifications.len());
    for notification in notifications {
        let message =
            match registry::format_notification(&notification.notification_type, &notification.payload) {
                Ok(m) => m,
                Err(e) => return workflow_error(e),
            };
        let mut value = serde_json::to_value(&notification).unwrap_or_default();
        value["message"] = serde_json::json!(message);
        rendered.push(value);
    }
    Json(serde_json::json!({ "notifications": rendered })).into_response()
}

/// GET /notifications/unread-count
pub(crate) async fn handle_unread_count(
    State(state): State<Arc<AppState>>,
    RequestActor(actor): RequestActor,
) -> Response {
    match state.workflow.notifications().unread_count(&actor.id).await {
        Ok(unread) => Json(serde_json::json!({
            "recipient_id": actor.id,
            "unread": unread,
        }))
        .into_response(),
        Err(e) => workflow_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct MarkReadRequest {
    ids: Vec<String>,
}

/// POST /notifications/read
///
/// Ids that do not belong to the actor are ignored.
pub(crate) async fn handle_mark_read(
    State(state): State<Arc<AppState>>,
    RequestActor(actor): RequestActor,
    Json(request): Json<MarkReadRequest>,
) -> Response {
    let dispatcher = state.workflow.notifications();
    let own: HashSet<String> = match dispatcher.list(&actor.id, true).await {
        Ok(n) => n.into_iter().map(|n| n.id).collect(),
        Err(e) => return workflow_error(e),
    };
    let ids: Vec<String> = request
        .ids
        .into_iter()
        .filter(|id| own.contains(id))
        .collect();

    match dispatcher.mark_read(&ids).await {
        Ok(updated) => Json(serde_json::json!({ "updated": updated })).into_response(),
        Err(e) => workflow_error(e),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct MarkAllReadRequest {
    #[serde(with = "time::serde::rfc3339::option")]
    before: Option<OffsetDateTime>,
}

/// POST /notifications/read-all
pub(crate) async fn handle_mark_all_read(
    State(state): State<Arc<AppState>>,
    RequestActor(actor): RequestActor,
    Json(request): Json<MarkAllReadRequest>,
) -> Response {
    match state
        .workflow
        .notifications()
        .mark_all_read(&actor.id, request.before)
        .await
    {
        Ok(updated) => Json(serde_json::json!({ "updated": updated })).into_response(),
        Err(e) => workflow_error(e),
    }
}

/// GET /notification-types
pub(crate) async fn handle_notification_types() -> impl IntoResponse {
    Json(serde_json::json!({
        "version": REGISTRY_VERSION,
        "types": registry::entries(),
    }))
}

// ── Dead letters (admin only) ─────────────────────────────────────────────────

fn require_admin(actor: &civic_engine::Actor) -> Result<(), Response> {
    if actor.role.is_administrative() {
        Ok(())
    } else {
        Err(json_error(StatusCode::FORBIDDEN, "admin role required").into_response())
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub(crate) struct DeadLetterParams {
    pending_only: bool,
}

impl Default for DeadLetterParams {
    fn default() -> Self {
        Self { pending_only: true }
    }
}

/// GET /dead-letters?pending_only=
pub(crate) async fn handle_dead_letters(
    State(state): State<Arc<AppState>>,
    RequestActor(actor): RequestActor,
    Query(params): Query<DeadLetterParams>,
) -> Response {
    if let Err(denied) = require_admin(&actor) {
        return denied;
    }
    match state
        .workflow
        .notifications()
        .dead_letters(params.pending_only)
        .await
    {
        Ok(dead_letters) => Json(serde_json::json!({ "dead_letters": dead_letters })).into_response(),
        Err(e) => workflow_error(e),
    }
}

/// POST /dead-letters/redeliver
pub(crate) async fn handle_redeliver(
    State(state): State<Arc<AppState>>,
    RequestActor(actor): RequestActor,
) -> Response {
    if let Err(denied) = require_admin(&actor) {
        return denied;
    }
    match state.workflow.notifications().redeliver_dead_letters().await {
        Ok(report) => Json(report).into_response(),
        Err(e) => workflow_error(e),
    }
}
