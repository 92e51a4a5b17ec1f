//! Replays recorded debug sessions through the tracker.
//!
//! A trace is JSON lines, one timestamped entry per line:
//!
//! ```text
//! {"at": 0,    "kind": "sessionStart"}
//! {"at": 10,   "kind": "attach", "runtime": "main"}
//! {"at": 40,   "kind": "scriptParsed", "params": {"url": "/app/out/main.js", "sourceMapURL": "main.js.map"}}
//! {"at": 50,   "kind": "breakpointSet"}
//! {"at": 9000, "kind": "sessionEnd"}
//! ```
//!
//! `at` is milliseconds on one clock shared by every session in the trace.
//! Blank lines and lines starting with `#` are skipped.
//!
//! Replay runs on the Tokio clock. Use a paused clock (`start_paused`) so a
//! trace spanning minutes replays instantly and delayed checks fire at the
//! recorded times.

use crate::config::{saturating_millis, SuggesterConfig};
use crate::counter::QualificationCounter;
use crate::error::SuggesterError;
use crate::output::{OutputChannel, RecordingChannel};
use crate::runtime::{BreakpointResolved, RuntimeEvents, ScriptParsed};
use crate::tracker::{SessionOutcome, SessionQualificationTracker};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Runtime name used when an entry does not name one
const DEFAULT_RUNTIME: &str = "main";

fn default_runtime() -> String {
    DEFAULT_RUNTIME.to_string()
}

// ============================================================================
// Trace format
// ============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TraceEntry {
    /// Milliseconds since the start of the trace
    pub at: u64,

    #[serde(flatten)]
    pub event: TraceEvent,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TraceEvent {
    SessionStart,
    Attach {
        #[serde(default = "default_runtime")]
        runtime: String,
    },
    BreakpointSet,
    ScriptParsed {
        #[serde(default = "default_runtime")]
        runtime: String,
        #[serde(default)]
        params: ScriptParsed,
    },
    BreakpointResolved {
        #[serde(default = "default_runtime")]
        runtime: String,
        #[serde(default)]
        params: BreakpointResolved,
    },
    SessionEnd,
}

/// Parse a JSON-lines trace
pub fn parse_trace(reader: impl BufRead) -> Result<Vec<TraceEntry>, SuggesterError> {
    let mut entries = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let entry: TraceEntry = serde_json::from_str(trimmed).map_err(|source| SuggesterError::TraceParse {
            line: index + 1,
            source,
        })?;
        entries.push(entry);
    }
    Ok(entries)
}

// ============================================================================
// Replay
// ============================================================================

/// One replayed session
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    /// 1-based position of the session in the trace
    pub index: usize,
    pub started_at_ms: u64,
    pub ended_at_ms: u64,
    /// Suggestions sent while this session was open
    pub suggested: usize,
    pub outcome: SessionOutcome,
}

struct ActiveSession {
    index: usize,
    started_at_ms: u64,
    tracker: SessionQualificationTracker,
    runtimes: HashMap<String, RuntimeEvents>,
    channel: Arc<RecordingChannel>,
}

pub struct Replayer {
    origin: Instant,
    counter: Arc<QualificationCounter>,
    channel: Arc<dyn OutputChannel>,
    config: SuggesterConfig,
    active: Option<ActiveSession>,
    sessions_started: usize,
    reports: Vec<SessionReport>,
}

impl Replayer {
    pub fn new(
        channel: Arc<dyn OutputChannel>,
        counter: Arc<QualificationCounter>,
        config: SuggesterConfig,
    ) -> Self {
        Self {
            origin: Instant::now(),
            counter,
            channel,
            config,
            active: None,
            sessions_started: 0,
            reports: Vec::new(),
        }
    }

    pub fn now_ms(&self) -> u64 {
        saturating_millis(Instant::now().saturating_duration_since(self.origin))
    }

    /// Move the clock to `at` ms after the origin. Checks due before `at`
    /// get to run; checks due exactly at `at` stay queued until the caller
    /// yields again.
    async fn advance_to(&self, at: u64) {
        let target = self.origin + Duration::from_millis(at);
        let now = Instant::now();
        if target < now {
            warn!(
                "Trace entry at {}ms is earlier than {}ms, applying at current time",
                at,
                self.now_ms()
            );
            return;
        }
        if target == now {
            return;
        }

        let step = Duration::from_millis(1);
        let gap = target - now;
        if gap > step {
            tokio::time::advance(gap - step).await;
        }
        tokio::task::yield_now().await;
        tokio::time::advance(target - Instant::now()).await;
    }

    /// Move the clock to the entry's time, then apply it. Checks due at the
    /// same instant run after the entry.
    pub async fn apply(&mut self, entry: &TraceEntry) {
        self.advance_to(entry.at).await;

        match &entry.event {
            TraceEvent::SessionStart => self.start_session(),
            TraceEvent::Attach { runtime } => {
                let Some(session) = self.active.as_mut() else {
                    warn!("Attach to {} outside a session, skipping", runtime);
                    return;
                };
                let events = session
                    .runtimes
                    .entry(runtime.clone())
                    .or_insert_with(|| RuntimeEvents::new(runtime));
                session.tracker.attach(events);
            }
            TraceEvent::BreakpointSet => match &self.active {
                Some(session) => session.tracker.notify_had_breakpoint(),
                None => warn!("Breakpoint set outside a session, skipping"),
            },
            TraceEvent::ScriptParsed { runtime, params } => {
                if let Some(events) = self.runtime(runtime) {
                    events.emit_script_parsed(params);
                }
            }
            TraceEvent::BreakpointResolved { runtime, params } => {
                if let Some(events) = self.runtime(runtime) {
                    events.emit_breakpoint_resolved(params);
                }
            }
            TraceEvent::SessionEnd => {
                if self.active.is_none() {
                    warn!("Session end without a session, skipping");
                }
                self.end_session();
            }
        }
    }

    /// Apply every entry and close whatever session is still open.
    pub async fn run(mut self, entries: &[TraceEntry]) -> Vec<SessionReport> {
        for entry in entries {
            self.apply(entry).await;
        }
        self.finish()
    }

    pub fn finish(mut self) -> Vec<SessionReport> {
        if self.active.is_some() {
            debug!("Trace ended with an open session, ending it");
            self.end_session();
        }
        self.reports
    }

    fn runtime(&self, name: &str) -> Option<RuntimeEvents> {
        let Some(session) = &self.active else {
            warn!("Runtime event for {} outside a session, skipping", name);
            return None;
        };
        let events = session.runtimes.get(name).cloned();
        if events.is_none() {
            warn!("Runtime {} was never attached, skipping event", name);
        }
        events
    }

    fn start_session(&mut self) {
        if self.active.is_some() {
            warn!("Session started while another is open, ending the previous one");
            self.end_session();
        }
        self.sessions_started += 1;

        let channel = Arc::new(RecordingChannel::forwarding(Arc::clone(&self.channel)));
        let tracker_channel: Arc<dyn OutputChannel> = channel.clone();
        let tracker =
            SessionQualificationTracker::new(tracker_channel, Arc::clone(&self.counter), &self.config);
        info!("Session {} started at {}ms", self.sessions_started, self.now_ms());

        self.active = Some(ActiveSession {
            index: self.sessions_started,
            started_at_ms: self.now_ms(),
            tracker,
            runtimes: HashMap::new(),
            channel,
        });
    }

    fn end_session(&mut self) {
        let Some(mut session) = self.active.take() else {
            return;
        };
        let Some(outcome) = session.tracker.dispose() else {
            return;
        };
        self.reports.push(SessionReport {
            index: session.index,
            started_at_ms: session.started_at_ms,
            ended_at_ms: self.now_ms(),
            suggested: session.channel.suggestions(),
            outcome,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    async fn replay(
        trace: &str,
    ) -> (Vec<SessionReport>, Arc<RecordingChannel>, Arc<QualificationCounter>) {
        let entries = parse_trace(Cursor::new(trace)).unwrap();
        let sink = Arc::new(RecordingChannel::new());
        let channel: Arc<dyn OutputChannel> = sink.clone();
        let counter = Arc::new(QualificationCounter::new());
        let reports = Replayer::new(channel, Arc::clone(&counter), SuggesterConfig::default())
            .run(&entries)
            .await;
        (reports, sink, counter)
    }

    /// A qualifying session starting at `start` and lasting `len` ms
    fn qualifying_session(start: u64, len: u64) -> String {
        format!(
            concat!(
                r#"{{"at": {s}, "kind": "sessionStart"}}"#, "\n",
                r#"{{"at": {s}, "kind": "attach"}}"#, "\n",
                r#"{{"at": {a}, "kind": "scriptParsed", "params": {{"url": "/app/out/main.js", "sourceMapURL": "main.js.map"}}}}"#, "\n",
                r#"{{"at": {a}, "kind": "breakpointSet"}}"#, "\n",
                r#"{{"at": {e}, "kind": "sessionEnd"}}"#, "\n",
            ),
            s = start,
            a = start + 10,
            e = start + len
        )
    }

    #[test]
    fn test_parse_trace_skips_blanks_and_comments() {
        let trace = "# recorded\n\n{\"at\": 0, \"kind\": \"sessionStart\"}\n{\"at\": 5, \"kind\": \"attach\", \"runtime\": \"worker\"}\n";
        let entries = parse_trace(Cursor::new(trace)).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].event, TraceEvent::SessionStart);
        assert_eq!(
            entries[1].event,
            TraceEvent::Attach {
                runtime: "worker".to_string()
            }
        );
    }

    #[test]
    fn test_parse_trace_reports_line_number() {
        let trace = "{\"at\": 0, \"kind\": \"sessionStart\"}\n\n{\"at\": 1, \"kind\": \"explode\"}\n";
        let err = parse_trace(Cursor::new(trace)).unwrap_err();
        assert!(matches!(err, SuggesterError::TraceParse { line: 3, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_third_session_gets_suggestion() {
        let trace = [
            qualifying_session(0, 3000),
            qualifying_session(10_000, 3000),
            qualifying_session(20_000, 8000),
        ]
        .concat();
        let (reports, sink, counter) = replay(&trace).await;

        assert_eq!(reports.len(), 3);
        assert_eq!(reports[0].suggested, 0);
        assert_eq!(reports[1].suggested, 0);
        assert_eq!(reports[2].suggested, 1);
        assert_eq!(sink.suggestions(), 1);
        assert_eq!(counter.read(), 3);
        assert_eq!(reports[2].outcome.counter_after, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_session_breaks_streak() {
        let trace = [
            qualifying_session(0, 3000),
            qualifying_session(10_000, 1000),
            qualifying_session(20_000, 8000),
        ]
        .concat();
        let (reports, sink, counter) = replay(&trace).await;

        assert!(!reports[1].outcome.qualified);
        assert_eq!(reports[1].outcome.counter_after, 0);
        assert_eq!(sink.suggestions(), 0);
        assert_eq!(counter.read(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_ending_at_deadline_sends_nothing() {
        let trace = [
            qualifying_session(0, 3000),
            qualifying_session(10_000, 3000),
            qualifying_session(20_000, 5000),
        ]
        .concat();
        let (reports, sink, _) = replay(&trace).await;
        assert_eq!(reports[2].suggested, 0);
        assert_eq!(sink.suggestions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_sees_entry_at_its_deadline() {
        let trace = [
            qualifying_session(0, 3000),
            qualifying_session(10_000, 3000),
            concat!(
                "{\"at\": 20000, \"kind\": \"sessionStart\"}\n",
                "{\"at\": 20000, \"kind\": \"attach\"}\n",
                "{\"at\": 20010, \"kind\": \"breakpointSet\"}\n",
                "{\"at\": 25000, \"kind\": \"scriptParsed\", \"params\": {\"url\": \"/app/out/main.js\", \"sourceMapURL\": \"m.map\"}}\n",
                "{\"at\": 30000, \"kind\": \"sessionEnd\"}\n",
            )
            .to_string(),
        ]
        .concat();
        let (reports, sink, _) = replay(&trace).await;
        assert_eq!(reports[2].suggested, 1);
        assert_eq!(sink.suggestions(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_runs_before_later_entry() {
        let trace = [
            qualifying_session(0, 3000),
            qualifying_session(10_000, 3000),
            concat!(
                "{\"at\": 20000, \"kind\": \"sessionStart\"}\n",
                "{\"at\": 20000, \"kind\": \"attach\"}\n",
                "{\"at\": 20010, \"kind\": \"scriptParsed\", \"params\": {\"url\": \"/app/out/main.js\", \"sourceMapURL\": \"m.map\"}}\n",
                "{\"at\": 20010, \"kind\": \"breakpointSet\"}\n",
                "{\"at\": 25001, \"kind\": \"breakpointResolved\", \"params\": {\"breakpointId\": \"1\"}}\n",
                "{\"at\": 30000, \"kind\": \"sessionEnd\"}\n",
            )
            .to_string(),
        ]
        .concat();
        let (reports, sink, counter) = replay(&trace).await;
        assert_eq!(reports[2].suggested, 1);
        assert_eq!(sink.suggestions(), 1);
        assert!(!reports[2].outcome.qualified);
        assert_eq!(counter.read(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolved_breakpoint_on_child_runtime() {
        let trace = [
            qualifying_session(0, 3000),
            qualifying_session(10_000, 3000),
            concat!(
                "{\"at\": 20000, \"kind\": \"sessionStart\"}\n",
                "{\"at\": 20000, \"kind\": \"attach\"}\n",
                "{\"at\": 20001, \"kind\": \"attach\", \"runtime\": \"child\"}\n",
                "{\"at\": 20010, \"kind\": \"scriptParsed\", \"params\": {\"url\": \"/app/out/main.js\", \"sourceMapURL\": \"m.map\"}}\n",
                "{\"at\": 20010, \"kind\": \"breakpointSet\"}\n",
                "{\"at\": 21000, \"kind\": \"breakpointResolved\", \"runtime\": \"child\", \"params\": {\"breakpointId\": \"1\"}}\n",
                "{\"at\": 29000, \"kind\": \"sessionEnd\"}\n",
            )
            .to_string(),
        ]
        .concat();
        let (reports, sink, counter) = replay(&trace).await;

        assert_eq!(sink.suggestions(), 0);
        assert!(reports[2].outcome.flags.did_verify_breakpoint);
        assert_eq!(counter.read(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_session_is_ended_by_finish() {
        let trace = concat!(
            "{\"at\": 0, \"kind\": \"sessionStart\"}\n",
            "{\"at\": 4000, \"kind\": \"breakpointSet\"}\n",
        );
        let (reports, _, counter) = replay(trace).await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].ended_at_ms, 4000);
        assert!(!reports[0].outcome.qualified);
        assert_eq!(counter.read(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_for_unknown_runtime_are_skipped() {
        let trace = concat!(
            "{\"at\": 0, \"kind\": \"scriptParsed\", \"params\": {\"url\": \"/a.js\", \"sourceMapURL\": \"a.map\"}}\n",
            "{\"at\": 1, \"kind\": \"sessionStart\"}\n",
            "{\"at\": 2, \"kind\": \"scriptParsed\", \"runtime\": \"ghost\", \"params\": {\"url\": \"/a.js\", \"sourceMapURL\": \"a.map\"}}\n",
            "{\"at\": 3, \"kind\": \"sessionEnd\"}\n",
        );
        let (reports, _, _) = replay(trace).await;
        assert_eq!(reports.len(), 1);
        assert!(!reports[0].outcome.flags.had_non_module_sourcemap);
    }
}
