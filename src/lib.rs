//! Diagnostic Suggester - decides when a debug adapter should recommend its
//! diagnostic tool
//!
//! Watches one debug session at a time: breakpoints the user asked for,
//! breakpoints the runtime managed to bind, and user scripts loaded with
//! source maps. Requested-but-never-bound breakpoints next to source-mapped
//! user code usually mean the source maps do not resolve. When that happens
//! in enough consecutive sessions, the next session re-checks after a short
//! delay and sends a `suggestDiagnosticTool` event to the host.
//!
//! # Pieces
//! - [`tracker::SessionQualificationTracker`]: the per-session state machine
//! - [`counter::QualificationCounter`]: the streak shared across sessions
//! - [`schedule::DelayedTask`]: the cancellable delayed check, on Tokio
//! - [`runtime::RuntimeEvents`] / [`output::OutputChannel`]: its two boundaries
//! - [`trace::Replayer`]: drives recorded sessions through all of the above

pub mod config;
pub mod counter;
pub mod error;
pub mod output;
pub mod runtime;
pub mod schedule;
pub mod trace;
pub mod tracker;

pub use config::SuggesterConfig;
pub use counter::QualificationCounter;
pub use error::SuggesterError;
pub use output::{JsonLinesChannel, OutputChannel, RecordingChannel};
pub use runtime::RuntimeEvents;
pub use schedule::DelayedTask;
pub use tracker::{SessionOutcome, SessionQualificationTracker};
