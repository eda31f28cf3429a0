//! # ward-core
//!
//! Core data model for the ward multi-agent orchestrator: conversation
//! messages and histories, the patient context model, branded ids, the
//! error hierarchy, retry math, and runtime configuration.
//!
//! Everything here is synchronous and free of I/O; the async surface
//! lives in the store, context, and runtime crates.

pub mod config;
pub mod context;
pub mod errors;
pub mod ids;
pub mod logging;
pub mod messages;
pub mod patient;
pub mod retry;

pub use config::OrchestratorConfig;
pub use context::{ChatContext, PatientContext};
pub use errors::{PatientIdError, ValidationError};
pub use ids::ConversationId;
pub use messages::{ChatHistory, ChatMessage, Role, SNAPSHOT_PREFIX};
pub use patient::{PatientId, PatientIdPattern, DEFAULT_PATIENT_ID_PATTERN};
