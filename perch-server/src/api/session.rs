//! Session extractors
//!
//! Callers authenticate with `Authorization: Bearer <token>`. The token is
//! resolved to a user through the store.

use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts};
use perch_core::domain::{Repo, User};

use crate::api::error::ApiError;
use crate::state::AppState;

/// Authenticated caller; rejects with 401 otherwise
pub struct CurrentUser(pub User);

/// Caller that may be anonymous
pub struct OptionalUser(pub Option<User>);

/// Agent calling the proc endpoints
///
/// Requires the configured agent secret as bearer token when one is set.
pub struct Agent;

fn bearer(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

impl FromRequestParts<AppState> for OptionalUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(token) = bearer(parts) else {
            return Ok(OptionalUser(None));
        };
        match state.store.user_find_token(token).await {
            Ok(user) => Ok(OptionalUser(Some(user))),
            Err(err) if err.is_not_found() => Err(ApiError::Unauthorized),
            Err(err) => Err(err.into()),
        }
    }
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        match OptionalUser::from_request_parts(parts, state).await? {
            OptionalUser(Some(user)) => Ok(CurrentUser(user)),
            OptionalUser(None) => Err(ApiError::Unauthorized),
        }
    }
}

impl FromRequestParts<AppState> for Agent {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        match &state.config.agent_secret {
            None => Ok(Agent),
            Some(secret) if bearer(parts) == Some(secret.as_str()) => Ok(Agent),
            Some(_) => Err(ApiError::Unauthorized),
        }
    }
}

/// Load a repository the caller may read.
///
/// Private repositories the caller cannot see are reported as not found.
pub async fn find_repo(
    state: &AppState,
    owner: &str,
    name: &str,
    user: Option<&User>,
) -> Result<Repo, ApiError> {
    let full_name = format!("{}/{}", owner, name);
    let repo = state.store.repo_find_name(&full_name).await?;
    if !repo.private {
        return Ok(repo);
    }

    let visible = match user {
        Some(user) if user.admin => true,
        Some(user) => state
            .store
            .repo_list(user)
            .await?
            .iter()
            .any(|r| r.id == repo.id),
        None => false,
    };
    if visible {
        Ok(repo)
    } else {
        Err(ApiError::NotFound(format!("repository {} not found", full_name)))
    }
}
