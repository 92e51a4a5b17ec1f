//! Boundary to the adapter-protocol output channel.

use serde::Serialize;
use serde_json::{json, Value};
use std::io::Write;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

/// Event name understood by the host UI
pub const SUGGEST_DIAGNOSTIC_TOOL: &str = "suggestDiagnosticTool";

/// Fire-and-forget sink for notifications to the host UI. Delayed checks
/// call it from runtime tasks, so implementations are shared across threads.
pub trait OutputChannel: Send + Sync {
    /// Ask the host to recommend the diagnostic tool to the user
    fn suggest_diagnostic_tool(&self);
}

/// DAP event envelope
#[derive(Debug, Serialize)]
pub struct DapEvent {
    pub seq: i64,
    #[serde(rename = "type")]
    pub r#type: &'static str,
    pub event: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl DapEvent {
    pub fn suggest_diagnostic_tool(seq: i64) -> Self {
        Self {
            seq,
            r#type: "event",
            event: SUGGEST_DIAGNOSTIC_TOOL,
            body: Some(json!({})),
        }
    }
}

/// Writes each event as one JSON line.
pub struct JsonLinesChannel<W: Write> {
    writer: Mutex<W>,
    seq: AtomicI64,
}

impl<W: Write> JsonLinesChannel<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
            seq: AtomicI64::new(1),
        }
    }

    /// Number of events handed to the writer so far
    pub fn sent(&self) -> usize {
        usize::try_from(self.seq.load(Ordering::SeqCst) - 1).unwrap_or(0)
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    fn send(&self, make_event: impl FnOnce(i64) -> DapEvent) {
        // seq is read and bumped under the writer lock so lines stay in order
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let event = make_event(self.seq.load(Ordering::SeqCst));
        let line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to serialize {} event: {}", event.event, e);
                return;
            }
        };
        if let Err(e) = writeln!(writer, "{}", line).and_then(|_| writer.flush()) {
            warn!("Failed to write {} event: {}", event.event, e);
            return;
        }
        debug!("Sent event: {}", line);
        self.seq.fetch_add(1, Ordering::SeqCst);
    }
}

impl<W: Write + Send> OutputChannel for JsonLinesChannel<W> {
    fn suggest_diagnostic_tool(&self) {
        self.send(DapEvent::suggest_diagnostic_tool);
    }
}

/// Counts suggestions, optionally passing them on to another channel.
#[derive(Default)]
pub struct RecordingChannel {
    inner: Option<Arc<dyn OutputChannel>>,
    suggestions: AtomicUsize,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn forwarding(inner: Arc<dyn OutputChannel>) -> Self {
        Self {
            inner: Some(inner),
            suggestions: AtomicUsize::new(0),
        }
    }

    pub fn suggestions(&self) -> usize {
        self.suggestions.load(Ordering::SeqCst)
    }
}

impl OutputChannel for RecordingChannel {
    fn suggest_diagnostic_tool(&self) {
        self.suggestions.fetch_add(1, Ordering::SeqCst);
        if let Some(inner) = &self.inner {
            inner.suggest_diagnostic_tool();
        }
    }
}
