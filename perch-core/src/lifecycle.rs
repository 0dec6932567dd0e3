//! Build and proc lifecycle
//!
//! Pure status transitions. Every guard lives here so the services only
//! sequence storage, queue and event bus calls around them. All functions
//! take the current unix time so callers (and tests) control the clock.

use std::fmt;

use crate::domain::build::{Build, EventKind};
use crate::domain::proc::Proc;
use crate::domain::status::Status;
use crate::dto::build::RestartOptions;

/// Exit code recorded for procs killed by cancellation.
pub const KILLED_EXIT_CODE: i32 = 137;

/// Human actions that are guarded by the current build status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Approve,
    Decline,
    Restart,
    Cancel,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Approve => "approve",
            Action::Decline => "decline",
            Action::Restart => "restart",
            Action::Cancel => "cancel",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    /// The action is not permitted from the build's current status.
    #[error("{}", describe(.action, .status))]
    InvalidState { action: Action, status: Status },
}

impl TransitionError {
    pub fn status(&self) -> Status {
        match self {
            TransitionError::InvalidState { status, .. } => *status,
        }
    }
}

fn describe(action: &Action, status: &Status) -> String {
    match action {
        Action::Cancel => "cannot cancel a non-running or non-pending build".to_string(),
        _ => format!("cannot {} a build with status {}", action, status),
    }
}

fn invalid(action: Action, build: &Build) -> TransitionError {
    TransitionError::InvalidState {
        action,
        status: build.status,
    }
}

// =============================================================================
// Build Transitions
// =============================================================================

/// Blocked → pending, recording who approved the build.
pub fn approve(build: &mut Build, reviewer: &str, now: i64) -> Result<(), TransitionError> {
    if build.status != Status::Blocked {
        return Err(invalid(Action::Approve, build));
    }
    build.status = Status::Pending;
    build.reviewer = reviewer.to_string();
    build.reviewed = now;
    build.error.clear();
    Ok(())
}

/// Blocked → declined, recording who declined the build.
pub fn decline(build: &mut Build, reviewer: &str, now: i64) -> Result<(), TransitionError> {
    if build.status != Status::Blocked {
        return Err(invalid(Action::Decline, build));
    }
    build.status = Status::Declined;
    build.reviewer = reviewer.to_string();
    build.reviewed = now;
    Ok(())
}

/// Derive the pending build that restarts `origin`.
///
/// The result has no id or number yet; storage assigns both on insert.
pub fn restart(
    origin: &Build,
    opts: &RestartOptions,
    now: i64,
) -> Result<Build, TransitionError> {
    if matches!(origin.status, Status::Declined | Status::Blocked) {
        return Err(invalid(Action::Restart, origin));
    }

    let mut build = origin.clone();
    build.id = 0;
    build.number = 0;
    build.parent = origin.number;
    build.status = Status::Pending;
    build.started = 0;
    build.finished = 0;
    build.enqueued = now;
    build.error.clear();
    build.procs.clear();

    if let Some(deploy) = &opts.deploy_to {
        build.deploy = deploy.clone();
    }
    if let Some(event) = opts
        .event
        .as_deref()
        .and_then(|e| e.parse::<EventKind>().ok())
        .filter(EventKind::is_user_selectable)
    {
        build.event = event;
    }

    Ok(build)
}

/// Only pending or running builds can be cancelled.
pub fn ensure_cancellable(build: &Build) -> Result<(), TransitionError> {
    if build.status.is_active() {
        Ok(())
    } else {
        Err(invalid(Action::Cancel, build))
    }
}

pub fn kill(build: &mut Build, now: i64) {
    build.status = Status::Killed;
    build.finished = now;
}

/// Mark a build that could not be compiled or dispatched.
pub fn fail(build: &mut Build, error: impl Into<String>, now: i64) {
    build.status = Status::Error;
    build.error = error.into();
    build.started = now;
    build.finished = now;
}

pub fn start(build: &mut Build, now: i64) {
    build.status = Status::Running;
    build.started = now;
}

pub fn finish(build: &mut Build, status: Status, now: i64) {
    build.status = status;
    build.finished = now;
}

/// Terminal status of a build from its root procs.
pub fn aggregate(procs: &[Proc]) -> Status {
    let roots = || procs.iter().filter(|p| p.is_root());
    if roots().any(|p| p.state == Status::Killed) {
        Status::Killed
    } else if roots().any(|p| matches!(p.state, Status::Failure | Status::Error)) {
        Status::Failure
    } else {
        Status::Success
    }
}

// =============================================================================
// Proc Transitions
// =============================================================================

/// A proc that never ran because its parent was cancelled.
///
/// Procs that had already started (detached services) count as successful.
pub fn skip_proc(proc: &mut Proc, stopped: i64) {
    proc.state = Status::Skipped;
    if proc.started != 0 {
        proc.state = Status::Success;
        proc.stopped = stopped;
    }
}

pub fn kill_proc(proc: &mut Proc, now: i64) {
    proc.state = Status::Killed;
    proc.stopped = now;
    if proc.started == 0 {
        proc.started = now;
    }
    proc.exit_code = KILLED_EXIT_CODE;
}

pub fn start_proc(proc: &mut Proc, machine: &str, now: i64) {
    proc.state = Status::Running;
    proc.started = now;
    proc.machine = machine.to_string();
}

pub fn finish_proc(proc: &mut Proc, exit_code: i32, error: Option<&str>, now: i64) {
    proc.exit_code = exit_code;
    proc.stopped = now;
    if proc.started == 0 {
        proc.started = now;
    }
    proc.error = error.unwrap_or_default().to_string();
    proc.state = match (exit_code, error) {
        (KILLED_EXIT_CODE, _) => Status::Killed,
        (_, Some(_)) => Status::Error,
        (0, None) => Status::Success,
        _ => Status::Failure,
    };
}
