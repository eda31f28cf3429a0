//! # ward-context
//!
//! The patient context state machine: an LLM-backed analyzer that
//! classifies each utterance into a context action, the service that
//! validates and applies the decision against the registry, and the
//! injector that maintains the ephemeral grounding snapshot at index 0 of
//! the in-memory history.

pub mod analyzer;
pub mod service;
pub mod snapshot;

pub use analyzer::{Analyzer, AnalyzerAction, Decision, LlmAnalyzer, ScriptedAnalyzer};
pub use service::{ClearOutcome, ContextError, ContextService, ServiceDecision, TimingInfo};
pub use snapshot::{inject_snapshot, snapshot_line, strip_snapshots};
