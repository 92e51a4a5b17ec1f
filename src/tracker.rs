//! Per-session tracker deciding when to suggest the diagnostic tool.
//!
//! A session looks like a path-resolution problem when the user asked for a
//! breakpoint, none ever bound to code, and at least one user script came
//! with a source map. Once enough sessions in a row looked like that, the
//! next session re-checks after a delay and, if the pattern holds again,
//! asks the host to suggest the tool.
//!
//! # Lifecycle
//!
//! ```text
//! Idle --attach--> Listening --dispose--> Finalized
//! Idle --dispose--> Finalized
//! ```
//!
//! `Finalized` is terminal. The process-wide streak is updated exactly once,
//! on the transition into it.
//!
//! The delayed check runs as a Tokio task, so a tracker whose check gets
//! armed must be created inside a runtime.

use crate::config::{saturating_millis, SuggesterConfig};
use crate::counter::QualificationCounter;
use crate::output::OutputChannel;
use crate::runtime::{RuntimeEvents, Subscription};
use crate::schedule::DelayedTask;
use serde::Serialize;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

// ============================================================================
// Session flags
// ============================================================================

/// Monotonic flags shared with the runtime listeners and the delayed check
#[derive(Debug, Default)]
struct FlagCells {
    had_breakpoint: AtomicBool,
    did_verify_breakpoint: AtomicBool,
    had_non_module_sourcemap: AtomicBool,
}

impl FlagCells {
    fn snapshot(&self) -> SessionFlags {
        SessionFlags {
            had_breakpoint: self.had_breakpoint.load(Ordering::SeqCst),
            did_verify_breakpoint: self.did_verify_breakpoint.load(Ordering::SeqCst),
            had_non_module_sourcemap: self.had_non_module_sourcemap.load(Ordering::SeqCst),
        }
    }
}

/// Point-in-time view of a session's flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionFlags {
    /// The user requested at least one breakpoint
    pub had_breakpoint: bool,
    /// The runtime bound at least one breakpoint to code
    pub did_verify_breakpoint: bool,
    /// A user script loaded with a source map
    pub had_non_module_sourcemap: bool,
}

impl SessionFlags {
    pub fn currently_qualifying(&self) -> bool {
        self.had_breakpoint && !self.did_verify_breakpoint && self.had_non_module_sourcemap
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackerState {
    Idle,
    Listening,
    Finalized,
}

/// What a session contributed to the streak
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOutcome {
    /// Counted toward the streak
    pub qualified: bool,
    /// Flag pattern held at teardown, regardless of duration
    pub currently_qualifying: bool,
    pub flags: SessionFlags,
    pub elapsed_ms: u64,
    /// Streak after this session was recorded
    pub counter_after: u32,
}

// ============================================================================
// Tracker
// ============================================================================

pub struct SessionQualificationTracker {
    flags: Arc<FlagCells>,
    counter: Arc<QualificationCounter>,
    started_at: Instant,
    min_duration: Duration,
    subscriptions: Vec<Subscription>,
    check: Option<DelayedTask>,
    state: TrackerState,
}

impl SessionQualificationTracker {
    /// Start tracking a session. Arms the delayed check when the previous
    /// sessions already built a long enough streak.
    pub fn new(
        channel: Arc<dyn OutputChannel>,
        counter: Arc<QualificationCounter>,
        config: &SuggesterConfig,
    ) -> Self {
        let flags = Arc::new(FlagCells::default());
        let streak = counter.read();

        let check = if streak >= config.consecutive_sessions {
            info!(
                "Streak of {} qualifying sessions, checking again in {:?}",
                streak,
                config.suggest_delay()
            );
            let flags = Arc::clone(&flags);
            DelayedTask::spawn(config.suggest_delay(), move || {
                let snapshot = flags.snapshot();
                if snapshot.currently_qualifying() {
                    info!("Session still qualifies, suggesting diagnostic tool");
                    channel.suggest_diagnostic_tool();
                } else {
                    debug!("Session no longer qualifies: {:?}", snapshot);
                }
            })
        } else {
            debug!(
                "Streak {} below threshold {}, no check armed",
                streak, config.consecutive_sessions
            );
            None
        };

        Self {
            flags,
            counter,
            started_at: Instant::now(),
            min_duration: config.min_duration(),
            subscriptions: Vec::new(),
            check,
            state: TrackerState::Idle,
        }
    }

    /// Record that the user asked for a breakpoint.
    pub fn notify_had_breakpoint(&self) {
        if !self.flags.had_breakpoint.swap(true, Ordering::SeqCst) {
            debug!("Session requested its first breakpoint");
        }
    }

    /// Listen to a runtime of this session. May be called once per runtime;
    /// repeated attaches are harmless.
    pub fn attach(&mut self, events: &RuntimeEvents) {
        if self.state == TrackerState::Finalized {
            warn!("Ignoring attach to {} after session end", events.name());
            return;
        }
        self.state = TrackerState::Listening;
        debug!("Attaching to runtime {}", events.name());

        let flags = Arc::clone(&self.flags);
        let runtime = events.name().to_string();
        self.subscriptions.push(events.on_script_parsed(move |event| {
            if flags.had_non_module_sourcemap.load(Ordering::SeqCst) {
                return ControlFlow::Break(());
            }
            if !event.is_non_module_sourcemap() {
                return ControlFlow::Continue(());
            }
            debug!("Runtime {} loaded {} with source map", runtime, event.url);
            flags.had_non_module_sourcemap.store(true, Ordering::SeqCst);
            ControlFlow::Break(())
        }));

        let flags = Arc::clone(&self.flags);
        let runtime = events.name().to_string();
        self.subscriptions
            .push(events.on_breakpoint_resolved(move |event| {
                if !flags.did_verify_breakpoint.swap(true, Ordering::SeqCst) {
                    debug!(
                        "Runtime {} verified breakpoint {}",
                        runtime, event.breakpoint_id
                    );
                }
                ControlFlow::Break(())
            }));
    }

    /// End the session: record its outcome on the streak and release every
    /// listener and the pending check. Returns `None` when already ended.
    pub fn dispose(&mut self) -> Option<SessionOutcome> {
        if self.state == TrackerState::Finalized {
            warn!("Session tracker disposed twice");
            return None;
        }
        self.state = TrackerState::Finalized;

        let elapsed = self.elapsed();
        let flags = self.flags.snapshot();
        let currently_qualifying = flags.currently_qualifying();
        let qualified = currently_qualifying && elapsed > self.min_duration;
        let counter_after = self.counter.record_outcome(qualified);

        if currently_qualifying && !qualified {
            debug!("Session of {:?} too short to count", elapsed);
        }
        info!(
            "Session ended after {:?}: qualified={}, streak={}",
            elapsed, qualified, counter_after
        );

        for subscription in self.subscriptions.drain(..) {
            subscription.dispose();
        }
        if let Some(check) = self.check.take() {
            check.cancel();
        }

        Some(SessionOutcome {
            qualified,
            currently_qualifying,
            flags,
            elapsed_ms: saturating_millis(elapsed),
            counter_after,
        })
    }

    pub fn flags(&self) -> SessionFlags {
        self.flags.snapshot()
    }

    pub fn currently_qualifying(&self) -> bool {
        self.flags.snapshot().currently_qualifying()
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    /// A delayed check is scheduled and has not run yet
    pub fn is_check_armed(&self) -> bool {
        self.check.as_ref().is_some_and(DelayedTask::is_pending)
    }

    pub fn elapsed(&self) -> Duration {
        Instant::now().saturating_duration_since(self.started_at)
    }
}

impl Drop for SessionQualificationTracker {
    fn drop(&mut self) {
        if self.state != TrackerState::Finalized {
            debug!("Session tracker dropped without dispose, outcome not recorded");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
