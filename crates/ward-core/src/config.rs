//! Runtime configuration.
//!
//! Two layers, lowest priority first:
//! 1. Compiled defaults: [`OrchestratorConfig::default()`]
//! 2. Environment overrides: `WARD_*` variables via [`OrchestratorConfig::from_env`]
//!
//! The config is loaded once at startup and shared read-only across turns
//! and conversations.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::ValidationError;
use crate::patient::{PatientIdPattern, DEFAULT_PATIENT_ID_PATTERN};

/// Default iteration cap for one scheduler turn.
pub const DEFAULT_MAX_TURN_ITERATIONS: u32 = 30;
/// Default wall-clock deadline for one whole turn, in seconds.
pub const DEFAULT_TURN_DEADLINE_SECONDS: u64 = 120;

/// The command phrases that archive everything and reset the conversation.
/// Matched case-insensitively against the trimmed user text.
pub const DEFAULT_CLEAR_COMMANDS: [&str; 4] =
    ["clear", "clear patient", "clear context", "clear patient context"];

/// Orchestrator-wide runtime options.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Regex validating every extracted patient id.
    #[serde(default = "default_patient_id_pattern")]
    pub patient_id_pattern: String,
    /// Scheduler iteration cap per turn.
    #[serde(default = "default_max_turn_iterations")]
    pub max_turn_iterations: u32,
    /// Per-turn wall-clock deadline in seconds.
    #[serde(default = "default_turn_deadline_seconds")]
    pub turn_deadline_seconds: u64,
    /// Lowercase phrases that trigger the clear path.
    #[serde(default = "default_clear_commands")]
    pub clear_commands: Vec<String>,
    /// Path of the YAML document supplying agent configs.
    #[serde(default)]
    pub agents_config_path: Option<PathBuf>,
}

fn default_patient_id_pattern() -> String {
    DEFAULT_PATIENT_ID_PATTERN.to_owned()
}
fn default_max_turn_iterations() -> u32 {
    DEFAULT_MAX_TURN_ITERATIONS
}
fn default_turn_deadline_seconds() -> u64 {
    DEFAULT_TURN_DEADLINE_SECONDS
}
fn default_clear_commands() -> Vec<String> {
    DEFAULT_CLEAR_COMMANDS.iter().map(|s| (*s).to_owned()).collect()
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            patient_id_pattern: default_patient_id_pattern(),
            max_turn_iterations: default_max_turn_iterations(),
            turn_deadline_seconds: default_turn_deadline_seconds(),
            clear_commands: default_clear_commands(),
            agents_config_path: None,
        }
    }
}

impl OrchestratorConfig {
    /// Defaults with `WARD_*` environment overrides applied.
    ///
    /// Recognized variables: `WARD_PATIENT_ID_PATTERN`,
    /// `WARD_MAX_TURN_ITERATIONS`, `WARD_TURN_DEADLINE_SECONDS`,
    /// `WARD_CLEAR_COMMANDS` (comma-separated), `WARD_AGENTS_CONFIG_PATH`.
    pub fn from_env() -> Result<Self, ValidationError> {
        let mut config = Self::default();

        if let Ok(pattern) = std::env::var("WARD_PATIENT_ID_PATTERN") {
            config.patient_id_pattern = pattern;
        }
        if let Ok(value) = std::env::var("WARD_MAX_TURN_ITERATIONS") {
            config.max_turn_iterations =
                value.parse().map_err(|_| ValidationError::Config {
                    key: "WARD_MAX_TURN_ITERATIONS".into(),
                    message: format!("'{value}' is not an integer"),
                })?;
        }
        if let Ok(value) = std::env::var("WARD_TURN_DEADLINE_SECONDS") {
            config.turn_deadline_seconds =
                value.parse().map_err(|_| ValidationError::Config {
                    key: "WARD_TURN_DEADLINE_SECONDS".into(),
                    message: format!("'{value}' is not an integer"),
                })?;
        }
        if let Ok(value) = std::env::var("WARD_CLEAR_COMMANDS") {
            config.clear_commands = value
                .split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(value) = std::env::var("WARD_AGENTS_CONFIG_PATH") {
            config.agents_config_path = Some(PathBuf::from(value));
        }

        // Fail fast on an uncompilable pattern rather than at first use.
        config.compiled_patient_id_pattern()?;
        Ok(config)
    }

    /// Compile the configured patient id pattern.
    pub fn compiled_patient_id_pattern(&self) -> Result<PatientIdPattern, ValidationError> {
        Ok(PatientIdPattern::new(&self.patient_id_pattern)?)
    }

    /// Whether the trimmed, lowercased user text is a clear command.
    #[must_use]
    pub fn is_clear_command(&self, user_text: &str) -> bool {
        let normalized = user_text.trim().to_lowercase();
        self.clear_commands.iter().any(|c| c == &normalized)
    }
}
