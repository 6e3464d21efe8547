//! JSON API over the order workflow.
//!
//! Every request may carry `Authorization: Bearer <token>`; it is required
//! when `security.api_token` is configured. Mutations and manager-only reads
//! name the acting user in `x-user-id`. An optional `x-correlation-id` is
//! echoed in error bodies and log lines.
//!
//! - `POST /api/orders`                                   create an order
//! - `GET  /api/orders/{order_id}`                        order with its document
//! - `POST /api/orders/{order_id}/stage`                  stage transition
//! - `GET  /api/orders/{order_id}/quest`                  current quest and evaluation
//! - `POST /api/orders/{order_id}/quest/approvals`        team approval
//! - `DELETE /api/orders/{order_id}/quest/approvals/{team}` revoke team approval
//! - `POST /api/orders/{order_id}/quest/assignee-approval` assignee sign-off
//! - `POST /api/orders/{order_id}/quest/override`         emergency override
//! - `PUT  /api/orders/{order_id}/urgent`                 urgent flag
//! - `PUT  /api/orders/{order_id}/schedule/{kind}`        measurement/construction date
//! - `PUT  /api/orders/{order_id}/assignments/{domain}`   domain assignees
//! - `GET  /api/orders/{order_id}/events`                 audit trail
//! - `POST /api/orders/{order_id}/events/{event_id}/revert` revert one change
//! - `GET  /api/orders/{order_id}/tasks`                  order tasks
//! - `PUT  /api/tasks/{task_id}/status`                   task status
//! - `POST /api/sla/sweep`                                run time-based task rules
//! - `GET  /api/security-logs`                            recent security log rows

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use uuid::Uuid;

use foms_core::config::SecurityConfig;
use foms_core::document::ScheduleKind;
use foms_core::domain::event::{OrderEvent, OrderEventId};
use foms_core::domain::order::{NewOrder, Order, OrderId};
use foms_core::domain::security::SecurityLog;
use foms_core::domain::task::{OrderTask, OrderTaskId, TaskStatus};
use foms_core::domain::user::{Team, UserId};
use foms_core::errors::{ApplicationError, InterfaceError};
use foms_core::permissions::Domain;
use foms_core::workflow::{Stage, TransitionRequest};
use foms_db::{OperationContext, OrderUpdate, QuestSummary, SweepReport, WorkflowService};

const USER_HEADER: &str = "x-user-id";
const CORRELATION_HEADER: &str = "x-correlation-id";
const DEFAULT_LOG_LIMIT: u32 = 50;
const MAX_LOG_LIMIT: u32 = 500;

#[derive(Clone)]
pub struct ApiState {
    service: WorkflowService,
    security: SecurityConfig,
}

impl ApiState {
    pub fn new(service: WorkflowService, security: SecurityConfig) -> Self {
        Self { service, security }
    }
}

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct TransitionBody {
    pub target: Stage,
    #[serde(default)]
    pub force: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TeamBody {
    pub team: Team,
}

#[derive(Debug, Deserialize)]
pub struct ReasonBody {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UrgentBody {
    pub urgent: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ScheduleBody {
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct AssignBody {
    pub user_ids: Vec<i64>,
}

#[derive(Debug, Deserialize)]
pub struct TaskStatusBody {
    pub status: TaskStatus,
}

#[derive(Debug, Default, Deserialize)]
pub struct LogQuery {
    pub limit: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
    pub correlation_id: String,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/orders", post(create_order))
        .route("/api/orders/{order_id}", get(get_order))
        .route("/api/orders/{order_id}/stage", post(transition_stage))
        .route("/api/orders/{order_id}/quest", get(quest_summary))
        .route("/api/orders/{order_id}/quest/approvals", post(approve_team))
        .route("/api/orders/{order_id}/quest/approvals/{team}", delete(revoke_team_approval))
        .route("/api/orders/{order_id}/quest/assignee-approval", post(approve_as_assignee))
        .route("/api/orders/{order_id}/quest/override", post(emergency_override))
        .route("/api/orders/{order_id}/urgent", put(set_urgent))
        .route("/api/orders/{order_id}/schedule/{kind}", put(set_schedule_date))
        .route("/api/orders/{order_id}/assignments/{domain}", put(assign))
        .route("/api/orders/{order_id}/events", get(list_events))
        .route("/api/orders/{order_id}/events/{event_id}/revert", post(revert_event))
        .route("/api/orders/{order_id}/tasks", get(list_tasks))
        .route("/api/tasks/{task_id}/status", put(update_task_status))
        .route("/api/sla/sweep", post(sla_sweep))
        .route("/api/security-logs", get(security_logs))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request context
// ---------------------------------------------------------------------------

fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
}

fn reject(status: StatusCode, code: &str, message: impl Into<String>, correlation_id: &str) -> (StatusCode, Json<ApiError>) {
    (
        status,
        Json(ApiError {
            code: code.to_string(),
            message: message.into(),
            correlation_id: correlation_id.to_string(),
        }),
    )
}

/// Checks the API token and returns the request's correlation id.
fn authorize(state: &ApiState, headers: &HeaderMap) -> Result<String, (StatusCode, Json<ApiError>)> {
    let correlation_id = correlation_id(headers);
    if !state.security.accepts(bearer_token(headers)) {
        warn!(
            event_name = "api.auth.rejected",
            correlation_id = %correlation_id,
            "request rejected: missing or invalid api token"
        );
        return Err(reject(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "a valid bearer token is required",
            &correlation_id,
        ));
    }
    Ok(correlation_id)
}

/// Token check plus the acting user from `x-user-id`.
fn actor(state: &ApiState, headers: &HeaderMap) -> Result<OperationContext, (StatusCode, Json<ApiError>)> {
    let correlation_id = authorize(state, headers)?;
    let user_id = headers
        .get(USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<i64>().ok())
        .filter(|id| *id > 0)
        .ok_or_else(|| {
            reject(
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                format!("`{USER_HEADER}` header with a user id is required"),
                &correlation_id,
            )
        })?;
    Ok(OperationContext::with_correlation_id(UserId(user_id), correlation_id))
}

fn bad_path(what: &str, value: &str, correlation_id: &str) -> (StatusCode, Json<ApiError>) {
    reject(StatusCode::BAD_REQUEST, "bad_request", format!("unknown {what} `{value}`"), correlation_id)
}

fn into_response_error(error: ApplicationError, correlation_id: &str) -> (StatusCode, Json<ApiError>) {
    let interface = error.into_interface(correlation_id);
    let (status, code) = match &interface {
        InterfaceError::BadRequest { .. } => (StatusCode::BAD_REQUEST, "bad_request"),
        InterfaceError::Forbidden { .. } => (StatusCode::FORBIDDEN, "forbidden"),
        InterfaceError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
        InterfaceError::Conflict { .. } => (StatusCode::CONFLICT, "conflict"),
        InterfaceError::ServiceUnavailable { .. } => {
            (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable")
        }
        InterfaceError::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
    };

    // Server-side failures keep their detail in the log only.
    let message = if status.is_server_error() {
        error!(
            event_name = "api.request.failed",
            correlation_id = %interface.correlation_id(),
            error = %interface.message(),
            "request failed"
        );
        interface.user_message().to_string()
    } else {
        interface.message().to_string()
    };
    reject(status, code, message, interface.correlation_id())
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

pub async fn create_order(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<NewOrder>,
) -> Result<(StatusCode, Json<OrderUpdate>), (StatusCode, Json<ApiError>)> {
    let ctx = actor(&state, &headers)?;
    let update = state
        .service
        .create_order(&ctx, body)
        .await
        .map_err(|error| into_response_error(error, &ctx.correlation_id))?;
    Ok((StatusCode::CREATED, Json(update)))
}

pub async fn get_order(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(order_id): Path<i64>,
) -> ApiResult<Order> {
    let correlation_id = authorize(&state, &headers)?;
    state
        .service
        .get_order(OrderId(order_id))
        .await
        .map(Json)
        .map_err(|error| into_response_error(error, &correlation_id))
}

pub async fn transition_stage(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(order_id): Path<i64>,
    Json(body): Json<TransitionBody>,
) -> ApiResult<OrderUpdate> {
    let ctx = actor(&state, &headers)?;
    let request = TransitionRequest { target: Some(body.target), force: body.force, reason: body.reason };
    state
        .service
        .transition_stage(&ctx, OrderId(order_id), &request)
        .await
        .map(Json)
        .map_err(|error| into_response_error(error, &ctx.correlation_id))
}

pub async fn quest_summary(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(order_id): Path<i64>,
) -> ApiResult<QuestSummary> {
    let correlation_id = authorize(&state, &headers)?;
    state
        .service
        .quest_summary(OrderId(order_id))
        .await
        .map(Json)
        .map_err(|error| into_response_error(error, &correlation_id))
}

pub async fn approve_team(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(order_id): Path<i64>,
    Json(body): Json<TeamBody>,
) -> ApiResult<OrderUpdate> {
    let ctx = actor(&state, &headers)?;
    state
        .service
        .approve_team(&ctx, OrderId(order_id), body.team)
        .await
        .map(Json)
        .map_err(|error| into_response_error(error, &ctx.correlation_id))
}

pub async fn revoke_team_approval(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path((order_id, team)): Path<(i64, String)>,
) -> ApiResult<OrderUpdate> {
    let ctx = actor(&state, &headers)?;
    let team = Team::parse(&team).ok_or_else(|| bad_path("team", &team, &ctx.correlation_id))?;
    state
        .service
        .revoke_team_approval(&ctx, OrderId(order_id), team)
        .await
        .map(Json)
        .map_err(|error| into_response_error(error, &ctx.correlation_id))
}

pub async fn approve_as_assignee(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(order_id): Path<i64>,
) -> ApiResult<OrderUpdate> {
    let ctx = actor(&state, &headers)?;
    state
        .service
        .approve_as_assignee(&ctx, OrderId(order_id))
        .await
        .map(Json)
        .map_err(|error| into_response_error(error, &ctx.correlation_id))
}

pub async fn emergency_override(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(order_id): Path<i64>,
    Json(body): Json<ReasonBody>,
) -> ApiResult<OrderUpdate> {
    let ctx = actor(&state, &headers)?;
    state
        .service
        .emergency_override(&ctx, OrderId(order_id), body.reason.as_deref().unwrap_or_default())
        .await
        .map(Json)
        .map_err(|error| into_response_error(error, &ctx.correlation_id))
}

pub async fn set_urgent(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(order_id): Path<i64>,
    Json(body): Json<UrgentBody>,
) -> ApiResult<OrderUpdate> {
    let ctx = actor(&state, &headers)?;
    state
        .service
        .set_urgent(&ctx, OrderId(order_id), body.urgent, body.reason.as_deref())
        .await
        .map(Json)
        .map_err(|error| into_response_error(error, &ctx.correlation_id))
}

pub async fn set_schedule_date(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path((order_id, kind)): Path<(i64, String)>,
    Json(body): Json<ScheduleBody>,
) -> ApiResult<OrderUpdate> {
    let ctx = actor(&state, &headers)?;
    let kind = ScheduleKind::parse(&kind)
        .ok_or_else(|| bad_path("schedule kind", &kind, &ctx.correlation_id))?;
    state
        .service
        .set_schedule_date(&ctx, OrderId(order_id), kind, body.date)
        .await
        .map(Json)
        .map_err(|error| into_response_error(error, &ctx.correlation_id))
}

pub async fn assign(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path((order_id, domain)): Path<(i64, String)>,
    Json(body): Json<AssignBody>,
) -> ApiResult<OrderUpdate> {
    let ctx = actor(&state, &headers)?;
    let domain =
        Domain::parse(&domain).ok_or_else(|| bad_path("domain", &domain, &ctx.correlation_id))?;
    let user_ids: Vec<UserId> = body.user_ids.into_iter().map(UserId).collect();
    state
        .service
        .assign(&ctx, OrderId(order_id), domain, &user_ids)
        .await
        .map(Json)
        .map_err(|error| into_response_error(error, &ctx.correlation_id))
}

pub async fn list_events(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(order_id): Path<i64>,
) -> ApiResult<Vec<OrderEvent>> {
    let correlation_id = authorize(&state, &headers)?;
    state
        .service
        .list_events(OrderId(order_id))
        .await
        .map(Json)
        .map_err(|error| into_response_error(error, &correlation_id))
}

pub async fn revert_event(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path((order_id, event_id)): Path<(i64, i64)>,
    Json(body): Json<ReasonBody>,
) -> ApiResult<OrderUpdate> {
    let ctx = actor(&state, &headers)?;
    state
        .service
        .revert_event(&ctx, OrderId(order_id), OrderEventId(event_id), body.reason.as_deref())
        .await
        .map(Json)
        .map_err(|error| into_response_error(error, &ctx.correlation_id))
}

pub async fn list_tasks(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(order_id): Path<i64>,
) -> ApiResult<Vec<OrderTask>> {
    let correlation_id = authorize(&state, &headers)?;
    state
        .service
        .list_tasks(OrderId(order_id))
        .await
        .map(Json)
        .map_err(|error| into_response_error(error, &correlation_id))
}

pub async fn update_task_status(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(task_id): Path<i64>,
    Json(body): Json<TaskStatusBody>,
) -> ApiResult<OrderTask> {
    let ctx = actor(&state, &headers)?;
    state
        .service
        .update_task_status(&ctx, OrderTaskId(task_id), body.status)
        .await
        .map(Json)
        .map_err(|error| into_response_error(error, &ctx.correlation_id))
}

pub async fn sla_sweep(State(state): State<ApiState>, headers: HeaderMap) -> ApiResult<SweepReport> {
    let correlation_id = authorize(&state, &headers)?;
    state
        .service
        .sla_sweep(Utc::now())
        .await
        .map(Json)
        .map_err(|error| into_response_error(error, &correlation_id))
}

pub async fn security_logs(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<LogQuery>,
) -> ApiResult<Vec<SecurityLog>> {
    let ctx = actor(&state, &headers)?;
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT).clamp(1, MAX_LOG_LIMIT);
    state
        .service
        .recent_security_logs(&ctx, limit)
        .await
        .map(Json)
        .map_err(|error| into_response_error(error, &ctx.correlation_id))
}
