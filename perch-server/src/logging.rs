//! Log Tailer
//!
//! Live log distribution per proc. A stream is opened when an agent starts
//! a proc, receives lines while it runs and is closed when the proc leaves
//! `running`. Tails only see lines written after they subscribed, and
//! their channel ends when the stream closes.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use perch_core::domain::LogLine;
use tokio::sync::mpsc;

/// Receiving end of a tail; yields `None` once the stream is closed.
pub type LogTail = mpsc::UnboundedReceiver<LogLine>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LogError {
    #[error("log stream {0} not open")]
    NotOpen(i64),
}

#[derive(Default)]
struct LogStream {
    next_pos: u64,
    lines: Vec<LogLine>,
    tails: Vec<mpsc::UnboundedSender<LogLine>>,
}

/// Open log streams keyed by proc id
#[derive(Default)]
pub struct LogStreams {
    streams: Mutex<HashMap<i64, LogStream>>,
}

impl LogStreams {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<i64, LogStream>> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the stream for a proc. Opening an open stream keeps it as is.
    pub fn open(&self, proc_id: i64) {
        self.lock().entry(proc_id).or_insert_with(|| LogStream {
            next_pos: 1,
            ..Default::default()
        });
        tracing::debug!(proc = proc_id, "Log stream opened");
    }

    pub fn is_open(&self, proc_id: i64) -> bool {
        self.lock().contains_key(&proc_id)
    }

    /// Append lines, numbering them and handing a copy to every tail.
    pub fn write(&self, proc_id: i64, lines: Vec<LogLine>) -> Result<(), LogError> {
        let mut streams = self.lock();
        let stream = streams.get_mut(&proc_id).ok_or(LogError::NotOpen(proc_id))?;

        for mut line in lines {
            line.pos = stream.next_pos;
            stream.next_pos += 1;
            stream.tails.retain(|tail| tail.send(line.clone()).is_ok());
            stream.lines.push(line);
        }
        Ok(())
    }

    /// Follow a stream from now on. `None` when the stream is not open.
    pub fn tail(&self, proc_id: i64) -> Option<LogTail> {
        let mut streams = self.lock();
        let stream = streams.get_mut(&proc_id)?;
        let (tx, rx) = mpsc::unbounded_channel();
        stream.tails.push(tx);
        Some(rx)
    }

    /// Close a stream, ending every tail, and return the lines it collected.
    pub fn close(&self, proc_id: i64) -> Option<Vec<LogLine>> {
        let stream = self.lock().remove(&proc_id)?;
        tracing::debug!(
            proc = proc_id,
            lines = stream.lines.len(),
            tails = stream.tails.len(),
            "Log stream closed"
        );
        Some(stream.lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(outs: &[&str]) -> Vec<LogLine> {
        outs.iter().map(|out| LogLine::new("build", *out)).collect()
    }

    #[tokio::test]
    async fn test_tail_sees_only_new_lines() {
        let logs = LogStreams::new();
        logs.open(7);
        logs.write(7, lines(&["before"])).unwrap();

        let mut tail = logs.tail(7).unwrap();
        logs.write(7, lines(&["after"])).unwrap();
        logs.close(7);

        let line = tail.recv().await.unwrap();
        assert_eq!(line.out, "after");
        assert_eq!(line.pos, 2);
        assert!(tail.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_every_tail_gets_its_own_copy() {
        let logs = LogStreams::new();
        logs.open(1);
        let mut first = logs.tail(1).unwrap();
        logs.write(1, lines(&["a"])).unwrap();
        let mut second = logs.tail(1).unwrap();
        logs.write(1, lines(&["b"])).unwrap();
        logs.close(1);

        let mut seen = Vec::new();
        while let Some(line) = first.recv().await {
            seen.push(line.out);
        }
        assert_eq!(seen, ["a", "b"]);

        assert_eq!(second.recv().await.unwrap().out, "b");
        assert!(second.recv().await.is_none());
    }

    #[test]
    fn test_close_returns_collected_lines() {
        let logs = LogStreams::new();
        logs.open(3);
        logs.write(3, lines(&["one", "two"])).unwrap();

        let collected = logs.close(3).unwrap();

        let positions: Vec<u64> = collected.iter().map(|l| l.pos).collect();
        assert_eq!(positions, [1, 2]);
        assert!(!logs.is_open(3));
        assert!(logs.close(3).is_none());
    }

    #[test]
    fn test_write_requires_open_stream() {
        let logs = LogStreams::new();
        assert_eq!(logs.write(9, lines(&["x"])), Err(LogError::NotOpen(9)));
        assert!(logs.tail(9).is_none());
    }

    #[test]
    fn test_dropped_tail_is_released() {
        let logs = LogStreams::new();
        logs.open(4);
        drop(logs.tail(4));

        logs.write(4, lines(&["x"])).unwrap();

        assert_eq!(logs.lock()[&4].tails.len(), 0);
    }
}
