//! Stream API Handlers
//!
//! Server-sent event endpoints for build events and live proc logs. The
//! connection policy itself lives in `crate::stream`.

use std::collections::HashSet;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, HeaderName, HeaderValue},
    response::{IntoResponse, Response, Sse},
};
use perch_core::domain::{Repo, Status, User};
use tokio::sync::mpsc;
use tokio_stream::{StreamExt, wrappers::ReceiverStream};

use crate::api::error::ApiResult;
use crate::api::session::{OptionalUser, find_repo};
use crate::logging::LogTail;
use crate::pubsub::{EVENTS_TOPIC, Message};
use crate::state::AppState;
use crate::stream::{self, Frame, LogFeed};

/// Frames queued towards the client per connection
const OUT_CAPACITY: usize = 16;

fn sse(frames: mpsc::Receiver<Frame>) -> Response {
    let sse = Sse::new(ReceiverStream::new(frames).map(stream::into_event));
    (
        [(
            HeaderName::from_static("x-accel-buffering"),
            HeaderValue::from_static("no"),
        )],
        sse,
    )
        .into_response()
}

/// GET /stream/events
/// Build events for every repository the caller can see
pub async fn event_stream(
    State(state): State<AppState>,
    OptionalUser(user): OptionalUser,
) -> ApiResult<Response> {
    let visible = visible_repos(&state, user.as_ref()).await?;

    let cancel = state.shutdown.child_token();
    let subscription = state
        .bus
        .subscribe(EVENTS_TOPIC, event_filter(visible), cancel.clone());

    let (out, frames) = mpsc::channel(OUT_CAPACITY);
    tokio::spawn(stream::run_event_feed(
        subscription,
        out,
        state.config.stream_policy(),
        cancel,
    ));

    Ok(sse(frames))
}

/// GET /stream/logs/{owner}/{name}/{build}/{number}
/// Live log of proc `number` of build `build`. Honours `Last-Event-ID`.
pub async fn log_stream(
    State(state): State<AppState>,
    OptionalUser(user): OptionalUser,
    Path((owner, name, build, number)): Path<(String, String, i64, i64)>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let repo = find_repo(&state, &owner, &name, user.as_ref()).await?;

    let tail = match open_tail(&state, &repo, build, number).await {
        Ok(tail) => tail,
        Err(reason) => {
            tracing::debug!(repo = %repo.full_name, build, proc = number, "log stream: {}", reason);
            return Ok(sse(stream::rejected(reason)));
        }
    };

    let last_event_id = headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(0);

    let (out, frames) = mpsc::channel(OUT_CAPACITY);
    tokio::spawn(stream::run_log_feed(
        LogFeed(tail),
        out,
        last_event_id,
        state.config.stream_policy(),
        state.shutdown.child_token(),
    ));

    Ok(sse(frames))
}

/// Full names of the repositories `user` can see; none for anonymous callers.
async fn visible_repos(state: &AppState, user: Option<&User>) -> ApiResult<HashSet<String>> {
    let Some(user) = user else {
        return Ok(HashSet::new());
    };
    Ok(state
        .store
        .repo_list(user)
        .await?
        .into_iter()
        .map(|r| r.full_name)
        .collect())
}

/// Public events, plus events of the `visible` repositories
fn event_filter(visible: HashSet<String>) -> impl Fn(&Message) -> bool + Send + Sync + 'static {
    move |msg| {
        msg.label("private") == Some("false")
            || msg.label("repo").is_some_and(|repo| visible.contains(repo))
    }
}

async fn open_tail(
    state: &AppState,
    repo: &Repo,
    build: i64,
    number: i64,
) -> Result<LogTail, &'static str> {
    let build = state
        .store
        .get_build_number(repo, build)
        .await
        .map_err(|_| "build not found")?;
    let proc = state
        .store
        .proc_find(&build, number)
        .await
        .map_err(|_| "process not found")?;
    if proc.state != Status::Running {
        return Err("stream not found");
    }
    state.logs.tail(proc.id).ok_or("stream not found")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::event::publish;
    use crate::service::testing::{Fixture, next_event, no_event};
    use perch_core::domain::{Build, EventType, LogLine};
    use tokio_util::sync::CancellationToken;

    async fn rejection(fx: &Fixture, build: i64, number: i64) -> &'static str {
        match open_tail(&fx.state, &fx.repo, build, number).await {
            Ok(_) => panic!("expected the log stream to be rejected"),
            Err(reason) => reason,
        }
    }

    async fn private_repo(fx: &Fixture, name: &str) -> Repo {
        fx.store
            .add_repo(Repo {
                owner: "acme".to_string(),
                name: name.to_string(),
                branch: "main".to_string(),
                private: true,
                ..Default::default()
            })
            .await
    }

    #[tokio::test]
    async fn test_open_tail_rejects_missing_build() {
        let fx = Fixture::new().await;

        assert_eq!(rejection(&fx, 42, 1).await, "build not found");
    }

    #[tokio::test]
    async fn test_open_tail_rejects_missing_proc() {
        let fx = Fixture::new().await;
        let build = fx.build(Status::Running, &[(1, 0, Status::Running)]).await;

        assert_eq!(rejection(&fx, build.number, 9).await, "process not found");
    }

    #[tokio::test]
    async fn test_open_tail_rejects_proc_not_running() {
        let fx = Fixture::new().await;
        let build = fx
            .build(Status::Running, &[(1, 0, Status::Pending), (2, 0, Status::Success)])
            .await;
        let pending = fx.proc(&build, 1).await;
        fx.state.logs.open(pending.id);

        assert_eq!(rejection(&fx, build.number, 1).await, "stream not found");
        assert_eq!(rejection(&fx, build.number, 2).await, "stream not found");
    }

    #[tokio::test]
    async fn test_open_tail_rejects_running_proc_without_stream() {
        let fx = Fixture::new().await;
        let build = fx.build(Status::Running, &[(1, 0, Status::Running)]).await;

        assert_eq!(rejection(&fx, build.number, 1).await, "stream not found");
    }

    #[tokio::test]
    async fn test_open_tail_follows_running_proc() {
        let fx = Fixture::new().await;
        let build = fx.build(Status::Running, &[(1, 0, Status::Running)]).await;
        let proc = fx.proc(&build, 1).await;
        fx.state.logs.open(proc.id);

        let mut tail = open_tail(&fx.state, &fx.repo, build.number, 1).await.unwrap();
        fx.state
            .logs
            .write(proc.id, vec![LogLine::new("step-1", "hello")])
            .unwrap();

        assert_eq!(tail.recv().await.unwrap().out, "hello");
    }

    #[tokio::test]
    async fn test_anonymous_caller_sees_public_events_only() {
        let fx = Fixture::new().await;
        let secret = private_repo(&fx, "secret").await;
        let visible = visible_repos(&fx.state, None).await.unwrap();
        let mut sub = fx
            .state
            .bus
            .subscribe(EVENTS_TOPIC, event_filter(visible), CancellationToken::new());

        publish(&fx.state.bus, EventType::Started, &secret, &Build::default());
        assert!(no_event(&mut sub).await);

        publish(&fx.state.bus, EventType::Started, &fx.repo, &Build::default());
        assert_eq!(next_event(&mut sub).await.repo.full_name, fx.repo.full_name);
    }

    #[tokio::test]
    async fn test_signed_in_caller_sees_granted_private_events() {
        let fx = Fixture::new().await;
        let granted = private_repo(&fx, "granted").await;
        let hidden = private_repo(&fx, "hidden").await;
        fx.store.grant(&fx.user, &granted).await;

        let visible = visible_repos(&fx.state, Some(&fx.user)).await.unwrap();
        let mut sub = fx
            .state
            .bus
            .subscribe(EVENTS_TOPIC, event_filter(visible), CancellationToken::new());

        publish(&fx.state.bus, EventType::Started, &hidden, &Build::default());
        assert!(no_event(&mut sub).await);

        publish(&fx.state.bus, EventType::Started, &granted, &Build::default());
        assert_eq!(next_event(&mut sub).await.repo.full_name, "acme/granted");

        publish(&fx.state.bus, EventType::Started, &fx.repo, &Build::default());
        assert_eq!(next_event(&mut sub).await.repo.full_name, fx.repo.full_name);
    }

    async fn body(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_log_stream_answers_rejection_frames() {
        let fx = Fixture::new().await;

        let response = log_stream(
            State(fx.state.clone()),
            OptionalUser(None),
            Path(("octocat".to_string(), "hello".to_string(), 7, 1)),
            HeaderMap::new(),
        )
        .await
        .unwrap();

        assert_eq!(response.headers()["x-accel-buffering"], "no");
        let body = body(response).await;
        assert!(body.starts_with(": ping"));
        assert!(body.contains("event: error\ndata: build not found"));
    }
}
