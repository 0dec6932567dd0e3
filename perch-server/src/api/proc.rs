//! Proc API Handlers
//!
//! Endpoints agents call while running a proc.

use axum::{
    Json,
    extract::{Path, State},
};
use perch_core::domain::Proc;
use perch_core::dto::proc::{AppendLogs, DoneProc, InitProc};

use crate::api::error::ApiResult;
use crate::api::session::Agent;
use crate::service::proc_service;
use crate::state::AppState;

/// POST /api/procs/{id}/init
pub async fn init_proc(
    State(state): State<AppState>,
    _agent: Agent,
    Path(id): Path<i64>,
    Json(req): Json<InitProc>,
) -> ApiResult<Json<Proc>> {
    tracing::debug!(proc = id, machine = %req.machine, "Proc started by agent");
    let proc = proc_service::init(&state, id, req).await?;
    Ok(Json(proc))
}

/// POST /api/procs/{id}/logs
pub async fn append_logs(
    State(state): State<AppState>,
    _agent: Agent,
    Path(id): Path<i64>,
    Json(req): Json<AppendLogs>,
) -> ApiResult<Json<serde_json::Value>> {
    let count = proc_service::append(&state, id, req).await?;
    Ok(Json(serde_json::json!({ "appended": count })))
}

/// POST /api/procs/{id}/done
pub async fn done_proc(
    State(state): State<AppState>,
    _agent: Agent,
    Path(id): Path<i64>,
    Json(req): Json<DoneProc>,
) -> ApiResult<Json<Proc>> {
    tracing::debug!(proc = id, exit_code = req.exit_code, "Proc finished by agent");
    let proc = proc_service::done(&state, id, req).await?;
    Ok(Json(proc))
}
