//! Build API Handlers
//!
//! HTTP endpoints for reading builds and acting on them.

use std::collections::HashMap;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use perch_core::domain::{Build, Status};
use perch_core::dto::build::{ListBuilds, RestartOptions};
use serde::Deserialize;

use crate::api::error::{ApiError, ApiResult};
use crate::api::session::{CurrentUser, OptionalUser, find_repo};
use crate::service::{build_service, cancel_service};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LastBuildQuery {
    pub branch: Option<String>,
}

fn parse_number(raw: &str) -> ApiResult<i64> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid build number: {}", raw)))
}

// =============================================================================
// Queries
// =============================================================================

/// GET /api/repos/{owner}/{name}/builds
pub async fn list_builds(
    State(state): State<AppState>,
    OptionalUser(user): OptionalUser,
    Path((owner, name)): Path<(String, String)>,
    Query(query): Query<ListBuilds>,
) -> ApiResult<Json<Vec<Build>>> {
    let repo = find_repo(&state, &owner, &name, user.as_ref()).await?;
    let builds = build_service::get_builds(&state, &repo, query.page).await?;
    Ok(Json(builds))
}

/// GET /api/repos/{owner}/{name}/builds/{number}
/// `latest` resolves to the last build on `?branch=` or the default branch
pub async fn get_build(
    State(state): State<AppState>,
    OptionalUser(user): OptionalUser,
    Path((owner, name, number)): Path<(String, String, String)>,
    Query(query): Query<LastBuildQuery>,
) -> ApiResult<Json<Build>> {
    let repo = find_repo(&state, &owner, &name, user.as_ref()).await?;

    let build = if number == "latest" {
        build_service::get_build_last(&state, &repo, query.branch.as_deref()).await?
    } else {
        build_service::get_build(&state, &repo, parse_number(&number)?).await?
    };

    Ok(Json(build))
}

/// GET /api/builds/queue
pub async fn get_build_queue(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
) -> ApiResult<Json<Vec<Build>>> {
    let builds = build_service::get_build_queue(&state).await?;
    Ok(Json(builds))
}

// =============================================================================
// Actions
// =============================================================================

/// POST /api/repos/{owner}/{name}/builds/{number}
/// Restart a build. Query keys other than `event`, `deploy_to` and `fork`
/// become build parameters.
pub async fn restart_build(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((owner, name, number)): Path<(String, String, String)>,
    Query(query): Query<HashMap<String, String>>,
) -> ApiResult<impl IntoResponse> {
    let repo = find_repo(&state, &owner, &name, Some(&user)).await?;
    let number = parse_number(&number)?;

    let build = build_service::restart(&state, &repo, number, RestartOptions::from_query(query)).await?;

    let status = if build.status == Status::Error {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::ACCEPTED
    };
    Ok((status, Json(build)))
}

/// DELETE /api/repos/{owner}/{name}/builds/{number}
/// Cancel a pending or running build
pub async fn cancel_build(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((owner, name, number)): Path<(String, String, String)>,
) -> ApiResult<StatusCode> {
    let repo = find_repo(&state, &owner, &name, Some(&user)).await?;
    let number = parse_number(&number)?;

    tracing::debug!(repo = %repo.full_name, build = number, user = %user.login, "Cancelling build");

    cancel_service::cancel(&state, &repo, number).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/repos/{owner}/{name}/builds/{number}/approve
pub async fn approve_build(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((owner, name, number)): Path<(String, String, String)>,
) -> ApiResult<Json<Build>> {
    let repo = find_repo(&state, &owner, &name, Some(&user)).await?;
    let build = build_service::approve(&state, &repo, parse_number(&number)?, &user).await?;
    Ok(Json(build))
}

/// POST /api/repos/{owner}/{name}/builds/{number}/decline
pub async fn decline_build(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((owner, name, number)): Path<(String, String, String)>,
) -> ApiResult<Json<Build>> {
    let repo = find_repo(&state, &owner, &name, Some(&user)).await?;
    let build = build_service::decline(&state, &repo, parse_number(&number)?, &user).await?;
    Ok(Json(build))
}

// =============================================================================
// Logs
// =============================================================================

fn json_bytes(data: Vec<u8>) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "application/json")], data)
}

/// GET /api/repos/{owner}/{name}/logs/{number}/{pid}
pub async fn get_proc_logs(
    State(state): State<AppState>,
    OptionalUser(user): OptionalUser,
    Path((owner, name, number, pid)): Path<(String, String, i64, i64)>,
) -> ApiResult<impl IntoResponse> {
    let repo = find_repo(&state, &owner, &name, user.as_ref()).await?;
    let data = build_service::get_proc_logs(&state, &repo, number, pid).await?;
    Ok(json_bytes(data))
}

/// GET /api/repos/{owner}/{name}/logs/{number}/{ppid}/{proc}
pub async fn get_build_logs(
    State(state): State<AppState>,
    OptionalUser(user): OptionalUser,
    Path((owner, name, number, ppid, proc)): Path<(String, String, i64, i64, String)>,
) -> ApiResult<impl IntoResponse> {
    let repo = find_repo(&state, &owner, &name, user.as_ref()).await?;
    let data = build_service::get_build_logs(&state, &repo, number, ppid, &proc).await?;
    Ok(json_bytes(data))
}

/// DELETE /api/repos/{owner}/{name}/logs/{number}
pub async fn delete_build_logs(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((owner, name, number)): Path<(String, String, i64)>,
) -> ApiResult<StatusCode> {
    let repo = find_repo(&state, &owner, &name, Some(&user)).await?;
    build_service::delete_build_logs(&state, &repo, number, &user).await?;
    Ok(StatusCode::NO_CONTENT)
}
