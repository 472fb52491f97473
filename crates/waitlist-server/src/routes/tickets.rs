//! Ticket routes: `/servers/{server}/tickets` and `/tickets/{uuid}`.
//!
//! Thin adapters over [`waitlist_core::queue::QueueManager`] and
//! [`waitlist_core::waiter::WaiterRegistry`] — validation and status-code
//! mapping live here, queue/director logic does not.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use waitlist_core::queue::{CreateOutcome, ListParams, LIST_MAX_LIMIT};
use waitlist_core::ticket::{CreateParams, Ticket};
use waitlist_store::SortOrder;

use crate::error::AppError;
use crate::state::AppState;

/// Build the combined `/servers/{server}/tickets` + `/tickets/{uuid}` router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/servers/{server}/tickets", get(list_tickets).post(create_ticket).delete(delete_all_tickets))
        .route("/tickets/{uuid}", get(get_ticket).delete(delete_ticket))
        .route("/tickets/{uuid}/wait", get(wait_ticket))
        .route("/tickets/{uuid}/release", put(release_ticket))
}

// ── Request / response types ──────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<String>,
    pub offset: Option<String>,
    pub attribute: Option<String>,
    pub order: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteAllQuery {
    pub force: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTicketRequest {
    pub scope: String,
    pub id: String,
    pub expires_at: String,
    pub action: Option<String>,
    pub extra: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct CreateTicketResponse {
    pub uuid: Uuid,
    pub queue: Vec<Uuid>,
}

impl From<CreateOutcome> for CreateTicketResponse {
    fn from(outcome: CreateOutcome) -> Self {
        Self {
            uuid: outcome.uuid,
            queue: outcome.queue,
        }
    }
}

// ── Validation ───────────────────────────────────────────────────────
//
// `limit` matches `^[1-9][0-9]*$`, `offset` matches `^([1-9][0-9]*|0)$` —
// implemented once here rather than delegated to individual handlers, per
// the declarative-validation design note.

fn parse_limit(raw: Option<&str>) -> Result<u32, AppError> {
    let Some(raw) = raw else {
        return Ok(LIST_MAX_LIMIT);
    };
    let valid = !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) && !raw.starts_with('0');
    if !valid {
        return Err(AppError::InvalidArgument(format!(
            "limit '{raw}' must match ^[1-9][0-9]*$"
        )));
    }
    raw.parse()
        .map_err(|_| AppError::InvalidArgument(format!("limit '{raw}' is out of range")))
}

fn parse_offset(raw: Option<&str>) -> Result<u32, AppError> {
    let Some(raw) = raw else {
        return Ok(0);
    };
    let valid = raw == "0" || (!raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) && !raw.starts_with('0'));
    if !valid {
        return Err(AppError::InvalidArgument(format!(
            "offset '{raw}' must match ^([1-9][0-9]*|0)$"
        )));
    }
    raw.parse()
        .map_err(|_| AppError::InvalidArgument(format!("offset '{raw}' is out of range")))
}

/// `order` is trimmed and matched case-insensitively against `ASC`/`DESC`.
/// An unrecognized value falls back to `ASC` rather than erroring — the
/// distilled source trims this parameter but never enumerates it, so we
/// treat it the same permissive way (see `DESIGN.md`).
fn parse_order(raw: Option<&str>) -> SortOrder {
    match raw.map(str::trim).map(str::to_ascii_uppercase).as_deref() {
        Some("DESC") => SortOrder::Desc,
        _ => SortOrder::Asc,
    }
}

// ── Handlers ─────────────────────────────────────────────────────────

async fn list_tickets(
    State(state): State<Arc<AppState>>,
    Path(server): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Ticket>>, AppError> {
    let attribute = query.attribute.unwrap_or_default().trim().to_owned();
    let params = ListParams {
        server_uuid: server,
        limit: parse_limit(query.limit.as_deref())?,
        offset: parse_offset(query.offset.as_deref())?,
        attribute: if attribute.is_empty() { "created_at".to_owned() } else { attribute },
        order: parse_order(query.order.as_deref()),
    };

    let tickets = state.queue_manager.list(&params).await?;
    Ok(Json(tickets))
}

async fn create_ticket(
    State(state): State<Arc<AppState>>,
    Path(server): Path<String>,
    Json(body): Json<CreateTicketRequest>,
) -> Result<(StatusCode, Json<CreateTicketResponse>), AppError> {
    let params = CreateParams {
        server_uuid: server,
        scope: body.scope,
        id: body.id,
        expires_at: body.expires_at,
        action: body.action,
        extra: body.extra,
        req_id: Uuid::new_v4().to_string(),
    };

    let outcome = state.queue_manager.create(params).await?;
    Ok((StatusCode::ACCEPTED, Json(outcome.into())))
}

async fn delete_all_tickets(
    State(state): State<Arc<AppState>>,
    Path(server): Path<String>,
    Query(query): Query<DeleteAllQuery>,
) -> Result<StatusCode, AppError> {
    let force = query.force.as_deref() == Some("true");
    if !force {
        return Err(AppError::PreconditionFailed(
            "DELETE requires force=true".to_owned(),
        ));
    }

    state.queue_manager.delete_all(&server, true).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_ticket(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<Uuid>,
) -> Result<Json<Ticket>, AppError> {
    let ticket = state.queue_manager.get(uuid).await?;
    Ok(Json(ticket))
}

async fn delete_ticket(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.queue_manager.delete(uuid).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Blocks until the ticket reaches `active`, `expired`, or `finished`, then
/// returns 204 regardless of which — an expiry while waiting is not an
/// error, so the caller infers the outcome via a subsequent `GET` if it
/// cares which terminal status was reached.
async fn wait_ticket(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let handle = state.waiters.register(state.store.as_ref(), uuid).await?;
    handle.wait().await;
    Ok(StatusCode::NO_CONTENT)
}

async fn release_ticket(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.queue_manager.release(uuid).await?;
    Ok(StatusCode::NO_CONTENT)
}
