//! Streaming Gateway
//!
//! Connection policy shared by the build-event and log SSE streams. Every
//! connection runs two tasks: a pump moving items from its subscription into
//! a small bounded buffer, and the feed loop, which is the only writer of
//! frames to the client. The loop multiplexes the buffer, the heartbeat, the
//! optional age ceiling, client disconnect and cancellation.

use std::convert::Infallible;
use std::time::Duration;

use async_trait::async_trait;
use axum::response::sse::Event;
use perch_core::domain::LogLine;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::logging::LogTail;
use crate::pubsub::Subscription;

/// Capacity of the buffer between the pump and the feed loop
pub const BUFFER_CAPACITY: usize = 10;

/// Payload of the terminal frame sent when a log stream ends
pub const EOF: &str = "eof";

/// One SSE frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// `: ping` keep-alive comment
    Ping,
    Data { id: Option<u64>, data: String },
    /// `event: error` with the message as data
    Error(String),
}

impl From<Frame> for Event {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Ping => Event::default().comment("ping"),
            Frame::Data { id: Some(id), data } => Event::default().id(id.to_string()).data(data),
            Frame::Data { id: None, data } => Event::default().data(data),
            Frame::Error(msg) => Event::default().event("error").data(msg),
        }
    }
}

/// Map frames to the item type axum's `Sse` expects.
pub fn into_event(frame: Frame) -> Result<Event, Infallible> {
    Ok(frame.into())
}

#[derive(Debug, Clone, Copy)]
pub struct StreamPolicy {
    /// Silence after which a ping is sent.
    pub heartbeat: Duration,
    /// Hard ceiling on the life of a log stream.
    pub max_age: Duration,
}

impl Default for StreamPolicy {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_secs(30),
            max_age: Duration::from_secs(60 * 60),
        }
    }
}

/// A source of serialized items for one connection
#[async_trait]
pub trait Feed: Send + 'static {
    /// Next item, or `None` when the source has ended for good.
    async fn next(&mut self) -> Option<String>;
}

#[async_trait]
impl Feed for Subscription {
    async fn next(&mut self) -> Option<String> {
        self.recv()
            .await
            .map(|msg| String::from_utf8_lossy(&msg.data).into_owned())
    }
}

/// Log tail rendered as JSON lines
pub struct LogFeed(pub LogTail);

#[async_trait]
impl Feed for LogFeed {
    async fn next(&mut self) -> Option<String> {
        loop {
            let line: LogLine = self.0.recv().await?;
            match serde_json::to_string(&line) {
                Ok(json) => return Some(json),
                Err(err) => tracing::warn!(error = %err, "Skipping unserializable log line"),
            }
        }
    }
}

/// A stream that ends right after telling the client why.
pub fn rejected(reason: &str) -> mpsc::Receiver<Frame> {
    let (tx, rx) = mpsc::channel(2);
    let _ = tx.try_send(Frame::Ping);
    let _ = tx.try_send(Frame::Error(reason.to_string()));
    rx
}

/// Serve a build-event subscription until the client leaves or `cancel`
/// fires.
pub async fn run_event_feed<F: Feed>(
    feed: F,
    out: mpsc::Sender<Frame>,
    policy: StreamPolicy,
    cancel: CancellationToken,
) {
    tracing::debug!("user feed: connection opened");
    serve(feed, out, Mode::Events, policy, cancel).await;
    tracing::debug!("user feed: connection closed");
}

/// Serve a log tail until it ends, the client leaves, the age ceiling is
/// reached or `cancel` fires.
///
/// Lines are numbered from 1. Lines numbered at or below `last_event_id`
/// are counted but not sent.
pub async fn run_log_feed<F: Feed>(
    feed: F,
    out: mpsc::Sender<Frame>,
    last_event_id: u64,
    policy: StreamPolicy,
    cancel: CancellationToken,
) {
    tracing::debug!("log stream: connection opened");
    if last_event_id != 0 {
        tracing::debug!(last_event_id, "log stream: reconnect");
    }
    serve(feed, out, Mode::Logs { last_event_id }, policy, cancel).await;
    tracing::debug!("log stream: connection closed");
}

#[derive(Clone, Copy)]
enum Mode {
    Events,
    Logs { last_event_id: u64 },
}

async fn serve<F: Feed>(
    feed: F,
    out: mpsc::Sender<Frame>,
    mode: Mode,
    policy: StreamPolicy,
    cancel: CancellationToken,
) {
    let (buffer_tx, mut buffer) = mpsc::channel(BUFFER_CAPACITY);
    let pump = tokio::spawn(pump(feed, buffer_tx, cancel.clone()));

    let deadline = async {
        match mode {
            Mode::Logs { .. } => tokio::time::sleep(policy.max_age).await,
            Mode::Events => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    let mut next_id: u64 = 1;

    if write(&out, Frame::Ping, &cancel).await {
        loop {
            let heartbeat = tokio::time::sleep(policy.heartbeat);

            let frame = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = out.closed() => break,
                _ = &mut deadline => {
                    tracing::debug!("log stream: max age reached");
                    break;
                }
                item = buffer.recv() => match (item, mode) {
                    (Some(data), Mode::Events) => Some(Frame::Data { id: None, data }),
                    (Some(data), Mode::Logs { last_event_id }) => {
                        let id = next_id;
                        next_id += 1;
                        (id > last_event_id).then_some(Frame::Data { id: Some(id), data })
                    }
                    (None, Mode::Logs { .. }) => {
                        write(&out, Frame::Error(EOF.to_string()), &cancel).await;
                        break;
                    }
                    (None, Mode::Events) => break,
                },
                _ = heartbeat => Some(Frame::Ping),
            };

            if let Some(frame) = frame {
                if !write(&out, frame, &cancel).await {
                    break;
                }
            }
        }
    }

    cancel.cancel();
    if let Err(err) = pump.await {
        tracing::warn!(error = %err, "Stream pump task failed");
    }
}

/// Move items into the buffer. Each hand-off either completes or observes
/// cancellation; a send never outlives the buffer. Returning drops the
/// sender, which the feed loop reads as end of stream.
async fn pump<F: Feed>(mut feed: F, buffer: mpsc::Sender<String>, cancel: CancellationToken) {
    loop {
        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            item = feed.next() => item,
        };
        let Some(item) = item else {
            return;
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            sent = buffer.send(item) => {
                if sent.is_err() {
                    return;
                }
            }
        }
    }
}

/// Returns `false` when the client is gone or the connection was cancelled.
async fn write(out: &mpsc::Sender<Frame>, frame: Frame, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = out.send(frame) => sent.is_ok(),
    }
}
