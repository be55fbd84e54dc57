//! Message history log
//!
//! A bounded in-memory ring of recent chat events, mirrored line by line
//! into an append-only sink (normally the per-run log file).

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Local};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::lock;
use crate::types::MessageKind;

/// Default ring capacity
pub const HISTORY_CAPACITY: usize = 1000;

/// Immutable record of one loggable event
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub timestamp: DateTime<Local>,
    pub username: String,
    pub content: String,
    pub kind: MessageKind,
}

impl ChatMessage {
    pub fn new(username: &str, content: &str, kind: MessageKind) -> Self {
        Self {
            timestamp: Local::now(),
            username: username.to_string(),
            content: content.to_string(),
            kind,
        }
    }

    /// Render as a single log line (no terminator)
    pub fn render(&self) -> String {
        format!(
            "[{}] [{}] {}: {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.kind,
            self.username,
            self.content
        )
    }
}

/// Durable destination for rendered history lines
pub trait HistorySink: Send {
    fn write_line(&mut self, line: &str) -> io::Result<()>;
}

/// Appends rendered records to a file
///
/// `write_line` only queues the line. A dedicated writer thread owns the
/// file and writes and flushes each line, so disk latency never holds the
/// history lock. Dropping the sink drains the queue and joins the thread.
#[derive(Debug)]
pub struct FileSink {
    tx: Option<mpsc::UnboundedSender<String>>,
    writer: Option<JoinHandle<()>>,
}

impl FileSink {
    /// Open (or create) `path` in append mode and start its writer thread
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = thread::Builder::new()
            .name("history-writer".to_string())
            .spawn(move || file_write_loop(file, rx))?;

        Ok(Self {
            tx: Some(tx),
            writer: Some(writer),
        })
    }
}

fn file_write_loop(mut file: File, mut rx: mpsc::UnboundedReceiver<String>) {
    while let Some(line) = rx.blocking_recv() {
        if let Err(e) = writeln!(file, "{}", line).and_then(|_| file.flush()) {
            warn!("Failed to write history log: {}", e);
        }
    }
    debug!("History writer stopped");
}

impl HistorySink for FileSink {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        let stopped = || io::Error::new(io::ErrorKind::BrokenPipe, "history writer stopped");
        self.tx
            .as_ref()
            .ok_or_else(stopped)?
            .send(line.to_string())
            .map_err(|_| stopped())
    }
}

impl Drop for FileSink {
    fn drop(&mut self) {
        // Closing the queue lets the writer finish what is pending
        self.tx.take();
        if let Some(writer) = self.writer.take() {
            let _ = writer.join();
        }
    }
}

/// Discards everything
#[derive(Debug, Default)]
pub struct NullSink;

impl HistorySink for NullSink {
    fn write_line(&mut self, _line: &str) -> io::Result<()> {
        Ok(())
    }
}

struct HistoryInner {
    ring: VecDeque<ChatMessage>,
    sink: Box<dyn HistorySink>,
}

/// Bounded FIFO of recent events plus its durable sink
///
/// Ring and sink share one lock, so records reach the sink in ring order.
/// Callers must not hold it while writing to the network; `append` and
/// `recent` return before any delivery happens. A capacity of 0 is raised
/// to 1.
pub struct History {
    inner: Mutex<HistoryInner>,
    capacity: usize,
}

impl History {
    pub fn new(capacity: usize, sink: Box<dyn HistorySink>) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(HistoryInner {
                ring: VecDeque::with_capacity(capacity),
                sink,
            }),
            capacity,
        }
    }

    /// In-memory only history
    pub fn in_memory(capacity: usize) -> Self {
        Self::new(capacity, Box::new(NullSink))
    }

    /// Record an event, evicting the oldest entry when full
    ///
    /// Sink failures are logged and otherwise ignored.
    pub fn append(&self, username: &str, content: &str, kind: MessageKind) {
        let record = ChatMessage::new(username, content, kind);
        let rendered = record.render();

        let mut inner = lock(&self.inner);
        while inner.ring.len() >= self.capacity {
            inner.ring.pop_front();
        }
        inner.ring.push_back(record);

        if let Err(e) = inner.sink.write_line(&rendered) {
            warn!("Failed to write history log: {}", e);
        }
    }

    /// The last `n` records, oldest first
    pub fn recent(&self, n: usize) -> Vec<ChatMessage> {
        let inner = lock(&self.inner);
        let skip = inner.ring.len().saturating_sub(n);
        inner.ring.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for History {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("History")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    /// Sink that records lines into shared memory
    struct MemorySink(Arc<Mutex<Vec<String>>>);

    impl HistorySink for MemorySink {
        fn write_line(&mut self, line: &str) -> io::Result<()> {
            self.0.lock().unwrap().push(line.to_string());
            Ok(())
        }
    }

    /// Sink that always fails
    struct BrokenSink;

    impl HistorySink for BrokenSink {
        fn write_line(&mut self, _line: &str) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        }
    }

    #[test]
    fn test_render_format() {
        let msg = ChatMessage::new("alice", "hello", MessageKind::Chat);
        let rendered = msg.render();
        assert!(rendered.starts_with('['));
        assert!(rendered.ends_with("[chat] alice: hello"));
    }

    #[test]
    fn test_ring_evicts_oldest() {
        let history = History::in_memory(HISTORY_CAPACITY);

        for i in 0..=HISTORY_CAPACITY {
            history.append("alice", &format!("msg {}", i), MessageKind::Chat);
        }

        assert_eq!(history.len(), HISTORY_CAPACITY);
        let all = history.recent(HISTORY_CAPACITY);
        assert_eq!(all.first().unwrap().content, "msg 1");
        assert_eq!(all.last().unwrap().content, format!("msg {}", HISTORY_CAPACITY));
        assert!(all.iter().all(|m| m.content != "msg 0"));
    }

    #[test]
    fn test_zero_capacity_keeps_latest_only() {
        let history = History::in_memory(0);

        for i in 0..3 {
            history.append("alice", &format!("msg {}", i), MessageKind::Chat);
        }

        assert_eq!(history.len(), 1);
        assert_eq!(history.recent(10)[0].content, "msg 2");
    }

    #[test]
    fn test_recent_is_chronological() {
        let history = History::in_memory(HISTORY_CAPACITY);
        for i in 0..15 {
            history.append("bob", &i.to_string(), MessageKind::Chat);
        }

        let recent: Vec<String> = history.recent(10).into_iter().map(|m| m.content).collect();
        let expected: Vec<String> = (5..15).map(|i| i.to_string()).collect();
        assert_eq!(recent, expected);
    }

    #[test]
    fn test_recent_with_fewer_entries() {
        let history = History::in_memory(HISTORY_CAPACITY);
        history.append("bob", "only", MessageKind::System);

        let recent = history.recent(10);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].kind, MessageKind::System);
    }

    #[test]
    fn test_sink_receives_rendered_lines() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let history = History::new(HISTORY_CAPACITY, Box::new(MemorySink(lines.clone())));

        history.append("alice", "hi", MessageKind::Whisper);

        let lines = lines.lock().unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with("[whisper] alice: hi"));
    }

    #[test]
    fn test_sink_failure_is_swallowed() {
        let history = History::new(HISTORY_CAPACITY, Box::new(BrokenSink));

        history.append("alice", "still recorded", MessageKind::Chat);

        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_file_sink_writes_from_background_thread() {
        let path = std::env::temp_dir().join(format!(
            "chat_relay_history_{}.log",
            uuid::Uuid::new_v4()
        ));

        {
            let sink = FileSink::open(&path).unwrap();
            let history = History::new(HISTORY_CAPACITY, Box::new(sink));
            history.append("alice", "first", MessageKind::Chat);
            history.append("Server", "alice left the chat", MessageKind::System);
            // Dropping the history joins the writer
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("[chat] alice: first"));
        assert!(lines[1].ends_with("[system] Server: alice left the chat"));
    }

    #[test]
    fn test_file_sink_append_from_async_context() {
        let path = std::env::temp_dir().join(format!(
            "chat_relay_history_{}.log",
            uuid::Uuid::new_v4()
        ));
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();

        let history = History::new(HISTORY_CAPACITY, Box::new(FileSink::open(&path).unwrap()));
        runtime.block_on(async {
            history.append("bob", "from a task", MessageKind::Chat);
        });
        drop(history);

        let contents = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert!(contents.trim_end().ends_with("[chat] bob: from a task"));
    }
}
