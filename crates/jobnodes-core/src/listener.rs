//! Progress listeners for lifecycle actions.
//!
//! Launch and teardown stream progress lines, errors and the raw log of
//! the external job into a [`TaskListener`] owned by the caller.

use std::sync::{Arc, Mutex};

use tracing::{error, info};

/// Sink for progress output of a single lifecycle action.
pub trait TaskListener: Send + Sync {
    /// A progress line.
    fn info(&self, line: &str);

    /// An error line.
    fn error(&self, line: &str);

    /// Raw bytes copied from an external job's log.
    fn write_log(&self, bytes: &[u8]);
}

/// Collects everything in memory.
#[derive(Debug, Clone, Default)]
pub struct BufferListener {
    buf: Arc<Mutex<String>>,
}

impl BufferListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far.
    pub fn contents(&self) -> String {
        self.buf.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn push(&self, text: &str) {
        self.buf
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_str(text);
    }
}

impl TaskListener for BufferListener {
    fn info(&self, line: &str) {
        self.push(line);
        self.push("\n");
    }

    fn error(&self, line: &str) {
        self.push("ERROR: ");
        self.push(line);
        self.push("\n");
    }

    fn write_log(&self, bytes: &[u8]) {
        self.push(&String::from_utf8_lossy(bytes));
    }
}

/// Forwards output to `tracing`, tagged with the node it belongs to.
#[derive(Debug, Clone)]
pub struct TracingListener {
    node: String,
}

impl TracingListener {
    pub fn new(node: impl Into<String>) -> Self {
        Self { node: node.into() }
    }
}

impl TaskListener for TracingListener {
    fn info(&self, line: &str) {
        info!(node = %self.node, "{line}");
    }

    fn error(&self, line: &str) {
        error!(node = %self.node, "{line}");
    }

    fn write_log(&self, bytes: &[u8]) {
        for line in String::from_utf8_lossy(bytes).lines() {
            info!(node = %self.node, job_log = true, "{line}");
        }
    }
}
