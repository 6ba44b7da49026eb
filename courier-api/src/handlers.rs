use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::Json,
};
use serde::Deserialize;
use std::collections::HashMap;
use uuid::Uuid;

use courier_core::error::CourierError;
use courier_core::types::{NewNotification, NotificationKind, QuietHours, UserPreferences};

use crate::auth::AuthenticatedUser;
use crate::server::ApiState;

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "courier-api"
    }))
}

fn error_status(e: &CourierError) -> StatusCode {
    match e {
        CourierError::InvalidNotification(_) => StatusCode::BAD_REQUEST,
        CourierError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
        CourierError::Unauthorized => StatusCode::UNAUTHORIZED,
        CourierError::NotFound => StatusCode::NOT_FOUND,
    }
}

/// Producer-facing accept endpoint. Returns as soon as the notification is
/// durably queued; delivery happens asynchronously.
pub async fn send_notification(
    Extension(state): Extension<ApiState>,
    Json(req): Json<NewNotification>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    match state.notify.send(req).await {
        Ok(id) => Ok(Json(serde_json::json!({ "notification_id": id }))),
        Err(e) => Err(error_status(&e)),
    }
}

#[derive(Deserialize)]
pub struct NotificationQuery {
    #[serde(default)]
    pub unread_only: bool,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

pub async fn list_notifications(
    Extension(state): Extension<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(params): Query<NotificationQuery>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let limit = params.limit.unwrap_or(50).min(100);
    let offset = params.offset.unwrap_or(0);

    let notifications = state
        .ctx
        .store
        .list_for_recipient(&user.recipient_id, params.unread_only, limit, offset)
        .await
        .map_err(|e| error_status(&e))?;

    Ok(Json(serde_json::json!(notifications)))
}

pub async fn get_notification_counts(
    Extension(state): Extension<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let count = state
        .notify
        .unread_count(&user.recipient_id)
        .await
        .map_err(|e| error_status(&e))?;

    Ok(Json(serde_json::json!({ "unread": count })))
}

pub async fn mark_notification_read(
    Extension(state): Extension<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let existing = state
        .ctx
        .store
        .get(id)
        .await
        .map_err(|e| error_status(&e))?;

    match existing {
        Some(n) if n.recipient_id == user.recipient_id => {}
        _ => return Err(StatusCode::NOT_FOUND),
    }

    let changed = state
        .notify
        .mark_read(&user.recipient_id, id)
        .await
        .map_err(|e| error_status(&e))?;

    if changed {
        Ok(Json(serde_json::json!({ "status": "ok" })))
    } else {
        Ok(Json(serde_json::json!({ "status": "already_read" })))
    }
}

pub async fn mark_all_read(
    Extension(state): Extension<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let updated = state
        .notify
        .mark_all_read(&user.recipient_id)
        .await
        .map_err(|e| error_status(&e))?;

    Ok(Json(serde_json::json!({ "updated": updated })))
}

pub async fn delete_notification(
    Extension(state): Extension<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let deleted = state
        .notify
        .delete(&user.recipient_id, id)
        .await
        .map_err(|e| error_status(&e))?;

    if deleted {
        Ok(Json(serde_json::json!({ "status": "ok" })))
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

pub async fn clear_all_notifications(
    Extension(state): Extension<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let deleted = state
        .notify
        .clear_all(&user.recipient_id)
        .await
        .map_err(|e| error_status(&e))?;

    Ok(Json(serde_json::json!({ "deleted": deleted })))
}

pub async fn get_preferences(
    Extension(state): Extension<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let prefs = state
        .ctx
        .prefs
        .get(&user.recipient_id)
        .await
        .map_err(|e| error_status(&e))?;

    Ok(Json(serde_json::json!(prefs)))
}

fn default_true() -> bool {
    true
}

/// Full-replace preference document; omitted fields fall back to defaults.
#[derive(Debug, Deserialize)]
pub struct UpdatePreferencesRequest {
    #[serde(default)]
    pub kinds: HashMap<NotificationKind, bool>,
    #[serde(default)]
    pub do_not_disturb: bool,
    #[serde(default)]
    pub quiet_hours: Option<QuietHours>,
    #[serde(default = "default_true")]
    pub in_app_enabled: bool,
    #[serde(default = "default_true")]
    pub email_enabled: bool,
    #[serde(default = "default_true")]
    pub push_enabled: bool,
}

pub async fn update_preferences(
    Extension(state): Extension<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<UpdatePreferencesRequest>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let prefs = UserPreferences {
        recipient_id: user.recipient_id.clone(),
        kinds: req.kinds,
        do_not_disturb: req.do_not_disturb,
        quiet_hours: req.quiet_hours,
        in_app_enabled: req.in_app_enabled,
        email_enabled: req.email_enabled,
        push_enabled: req.push_enabled,
        updated_at: chrono::Utc::now(),
    };

    state
        .ctx
        .prefs
        .set(prefs)
        .await
        .map_err(|e| error_status(&e))?;

    Ok(Json(serde_json::json!({ "status": "ok" })))
}
