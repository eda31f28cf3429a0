//! End-to-end turn pipeline scenarios, driven through the in-memory blob
//! store, a scripted analyzer, and scripted chat-completion mocks for the
//! agents and the rule evaluator.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use ward_agents::{AgentConfig, AgentFactory, ToolRegistry};
use ward_context::{AnalyzerAction, ContextService, Decision, ScriptedAnalyzer};
use ward_core::config::OrchestratorConfig;
use ward_core::ids::ConversationId;
use ward_core::messages::Role;
use ward_core::patient::{PatientId, PatientIdPattern};
use ward_llm::{MockChatCompletion, MockResponse};
use ward_runtime::{BufferSink, GroupChatScheduler, TurnController, TurnRequest, TurnOutcome};
use ward_store::{BlobStore, FsBlobStore, HistoryStore, MemoryBlobStore, RegistryStore};

struct Harness {
    blob: Arc<dyn BlobStore>,
    history: Arc<HistoryStore>,
    analyzer: Arc<ScriptedAnalyzer>,
    agent_llm: Arc<MockChatCompletion>,
    evaluator: Arc<MockChatCompletion>,
    configs: Vec<AgentConfig>,
    controller: TurnController,
}

fn agent_config(name: &str, facilitator: bool) -> AgentConfig {
    AgentConfig {
        name: name.into(),
        instructions: format!("You are {name} on a tumor board."),
        description: format!("{name} participant"),
        facilitator,
        temperature: 0.0,
        tools: Vec::new(),
        external: false,
        endpoint: None,
    }
}

fn build_harness(blob: Arc<dyn BlobStore>, config: OrchestratorConfig) -> Harness {
    let history = Arc::new(HistoryStore::new(blob.clone()));
    let registry = Arc::new(RegistryStore::new(blob.clone()));
    let analyzer = Arc::new(ScriptedAnalyzer::default());
    let service = Arc::new(ContextService::new(
        analyzer.clone(),
        registry,
        history.clone(),
        PatientIdPattern::default(),
    ));
    let agent_llm = Arc::new(MockChatCompletion::default());
    let evaluator = Arc::new(MockChatCompletion::default());
    let factory = AgentFactory::new(agent_llm.clone(), Arc::new(ToolRegistry::new()));
    let configs = vec![
        agent_config("Orchestrator", true),
        agent_config("Radiology", false),
    ];

    let controller = TurnController::new(
        config,
        history.clone(),
        service,
        factory,
        configs.clone(),
        evaluator.clone(),
    );

    Harness {
        blob,
        history,
        analyzer,
        agent_llm,
        evaluator,
        configs,
        controller,
    }
}

fn harness_with_config(config: OrchestratorConfig) -> Harness {
    build_harness(Arc::new(MemoryBlobStore::new()), config)
}

fn harness() -> Harness {
    harness_with_config(OrchestratorConfig::default())
}

impl Harness {
    fn script_analyzer(&self, action: AnalyzerAction, patient_id: Option<&str>) {
        self.analyzer.push(Decision {
            action,
            patient_id: patient_id.map(str::to_owned),
            reasoning: "scripted".into(),
        });
    }

    fn script_agent(&self, text: &str) {
        self.agent_llm.push(MockResponse::text(text));
    }

    fn script_verdict(&self, verdict: &str) {
        self.evaluator.push(MockResponse::text(format!(
            r#"{{"verdict":"{verdict}","reasoning":"scripted"}}"#
        )));
    }

    async fn turn(&self, user_text: &str) -> BufferSink {
        let sink = BufferSink::new();
        let request = TurnRequest::new("c1", user_text);
        self.controller.handle(&request, &sink).await.unwrap();
        sink
    }

    async fn stored_json(&self, path: &str) -> serde_json::Value {
        let bytes = self.blob.get(path).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }
}

fn conv() -> ConversationId {
    ConversationId::from("c1")
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario 1: first activation
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn first_activation_registers_and_isolates() {
    let h = harness();
    h.script_analyzer(AnalyzerAction::ActivateNew, Some("patient_4"));
    h.script_agent(
        "Here is the proposed plan:\n1. *Radiology* reviews the latest chest imaging\n2. I summarize findings for the team\n\nShall we proceed?",
    );
    h.script_verdict("no");

    let sink = h.turn("start tumor board for patient_4").await;

    // Registry: patient_4 active and rostered.
    let registry = h.stored_json("c1/patient_context_registry.json").await;
    assert_eq!(registry["active_patient_id"], "patient_4");
    assert!(registry["patient_registry"]["patient_4"].is_object());

    // Patient history: exactly the user message and the plan reply, no
    // snapshot, no audit footer.
    let doc = h.stored_json("c1/patient_patient_4_context.json").await;
    let messages = doc["chat_history"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[0]["content"], "start tumor board for patient_4");
    assert_eq!(messages[1]["role"], "assistant");
    assert_eq!(messages[1]["name"], "Orchestrator");
    let raw = h.blob.get("c1/patient_patient_4_context.json").await.unwrap();
    let text = String::from_utf8(raw).unwrap();
    assert!(!text.contains("PATIENT_CONTEXT_JSON"));
    assert!(!text.contains("PT_CTX:"));

    // The outbound reply carries the audit footer exactly once.
    let replies = sink.messages();
    assert_eq!(replies.len(), 1);
    let reply = &replies[0].content;
    assert!(reply.contains("proposed plan"));
    assert_eq!(reply.matches("PT_CTX:").count(), 1);
    assert!(reply.contains("`patient_4` (active)"));

    // The agent saw the fresh grounding snapshot at index 0.
    let request = &h.agent_llm.requests()[0];
    assert!(request.messages[0]
        .content
        .starts_with("PATIENT_CONTEXT_JSON:"));
    assert!(request.messages[0].content.contains("\"patient_id\":\"patient_4\""));
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario 2: the confirmation gate holds without a user message
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn confirmation_gate_holds_without_user_reply() {
    let h = harness();
    h.script_analyzer(AnalyzerAction::ActivateNew, Some("patient_4"));
    h.script_agent("Proposed plan:\n1. *Radiology* reviews imaging\n2. I summarize");
    h.script_verdict("no");
    let _ = h.turn("start tumor board for patient_4").await;
    let calls_before = h.agent_llm.call_count();

    // Ask the scheduler to continue on the persisted history with no new
    // user message: the gate must yield immediately.
    let factory = AgentFactory::new(h.agent_llm.clone(), Arc::new(ToolRegistry::new()));
    let agents = factory.build(&h.configs).unwrap();
    let scheduler = GroupChatScheduler::new(agents, "Orchestrator", h.evaluator.clone(), 30);

    let mut ctx = h
        .history
        .read(&conv(), Some(&PatientId::from_trusted("patient_4")))
        .await
        .unwrap();
    let cancel = CancellationToken::new();
    let outcome = scheduler
        .run_turn(&mut ctx.chat_history, &cancel, &mut |_| {})
        .await;

    assert_eq!(outcome, TurnOutcome::AwaitUser);
    assert_eq!(h.agent_llm.call_count(), calls_before);
    assert_eq!(ctx.chat_history.len(), 2);
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario 3: proceed after confirmation
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn proceed_after_confirmation_runs_the_plan() {
    let h = harness();

    // Turn 1: activation + plan.
    h.script_analyzer(AnalyzerAction::ActivateNew, Some("patient_4"));
    h.script_agent("Proposed plan:\n1. *Radiology* reviews imaging\n2. I summarize");
    h.script_verdict("no");
    let _ = h.turn("start tumor board for patient_4").await;

    // Turn 2: "yes proceed" is under the heuristic threshold, so the
    // analyzer is never consulted; the active patient is restored from the
    // registry.
    let analyzer_calls = h.analyzer.call_count();
    h.script_agent("*Radiology*, please review the latest chest CT and report key findings.");
    h.script_verdict("no");
    h.script_agent("Findings: solitary RUL nodule, no adenopathy. back to you *Orchestrator*");
    h.script_agent("Recommend PET-CT before the next review. Let us know how you would like to proceed.");
    h.script_verdict("yes");

    let sink = h.turn("yes proceed").await;
    assert_eq!(h.analyzer.call_count(), analyzer_calls);

    // History grew by the user message plus three agent messages, and a
    // non-facilitator spoke.
    let doc = h.stored_json("c1/patient_patient_4_context.json").await;
    let messages = doc["chat_history"].as_array().unwrap();
    assert_eq!(messages.len(), 6);
    assert_eq!(messages[2]["content"], "yes proceed");
    assert_eq!(messages[4]["name"], "Radiology");

    // No second patient appeared.
    let registry = h.stored_json("c1/patient_context_registry.json").await;
    assert_eq!(
        registry["patient_registry"].as_object().unwrap().len(),
        1
    );

    // The user saw all three agent messages, each with one footer.
    let replies = sink.messages();
    assert_eq!(replies.len(), 3);
    assert!(replies
        .iter()
        .all(|m| m.content.matches("PT_CTX:").count() == 1));
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario 4: switch to a new patient
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn switching_isolates_histories_and_resets_analyzer() {
    let h = harness();

    h.script_analyzer(AnalyzerAction::ActivateNew, Some("patient_4"));
    h.script_agent("Plan:\n1. *Radiology* reviews imaging");
    h.script_verdict("no");
    let _ = h.turn("start tumor board for patient_4").await;

    let patient_4_before = h.blob.get("c1/patient_patient_4_context.json").await.unwrap();

    h.script_analyzer(AnalyzerAction::ActivateNew, Some("patient_15"));
    h.script_agent("Starting a fresh review for patient_15. What should we focus on?");
    h.script_verdict("yes");
    let sink = h.turn("switch to patient_15").await;

    // Registry now holds both patients with patient_15 active.
    let registry = h.stored_json("c1/patient_context_registry.json").await;
    assert_eq!(registry["active_patient_id"], "patient_15");
    let roster = registry["patient_registry"].as_object().unwrap();
    assert!(roster.contains_key("patient_4"));
    assert!(roster.contains_key("patient_15"));

    // patient_4's history is byte-for-byte untouched.
    let patient_4_after = h.blob.get("c1/patient_patient_4_context.json").await.unwrap();
    assert_eq!(patient_4_before, patient_4_after);

    // patient_15's history holds exactly this turn.
    let doc = h.stored_json("c1/patient_patient_15_context.json").await;
    let messages = doc["chat_history"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["content"], "switch to patient_15");

    // The active patient changed exactly once, so exactly one kernel reset.
    assert_eq!(h.analyzer.reset_count(), 1);

    // The snapshot this turn listed both patients, sorted.
    let last_request = h.agent_llm.requests().pop().unwrap();
    assert!(last_request.messages[0]
        .content
        .contains("\"all_patient_ids\":[\"patient_15\",\"patient_4\"]"));

    // Footer shows the roster with the new active patient.
    assert!(sink.last().unwrap().content.contains("`patient_15` (active)"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario 5: invalid activation
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn invalid_activation_guides_without_mutation() {
    let h = harness();

    h.script_analyzer(AnalyzerAction::ActivateNew, Some("patient_4"));
    h.script_agent("Plan:\n1. review");
    h.script_verdict("no");
    let _ = h.turn("start tumor board for patient_4").await;

    let registry_before = h.blob.get("c1/patient_context_registry.json").await.unwrap();
    let files_before = h.blob.list("c1/").await.unwrap();
    let agent_calls = h.agent_llm.call_count();

    // Switch intent with no usable id.
    h.script_analyzer(AnalyzerAction::SwitchExisting, None);
    let sink = h.turn("switch patient please").await;

    let reply = sink.last().unwrap();
    assert!(reply.content.contains("^patient_[0-9]+$"));

    // Nothing moved: same registry bytes, same file set, no agent ran.
    let registry_after = h.blob.get("c1/patient_context_registry.json").await.unwrap();
    assert_eq!(registry_before, registry_after);
    assert_eq!(h.blob.list("c1/").await.unwrap(), files_before);
    assert_eq!(h.agent_llm.call_count(), agent_calls);
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario 6: clear
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn clear_archives_all_live_artifacts() {
    let h = harness();

    h.script_analyzer(AnalyzerAction::ActivateNew, Some("patient_4"));
    h.script_agent("Plan:\n1. review imaging");
    h.script_verdict("no");
    let _ = h.turn("start tumor board for patient_4").await;

    h.script_analyzer(AnalyzerAction::ActivateNew, Some("patient_15"));
    h.script_agent("Fresh review for patient_15. What should we focus on?");
    h.script_verdict("yes");
    let _ = h.turn("switch to patient_15").await;

    let sink = h.turn("clear patient context").await;
    assert_eq!(sink.last().unwrap().content, "Conversation cleared!");

    // No live patient or registry files; a fresh empty session file.
    let live: Vec<String> = h
        .blob
        .list("c1/")
        .await
        .unwrap()
        .into_iter()
        .filter(|k| !k.contains("/archive/"))
        .collect();
    assert_eq!(live, vec!["c1/session_context.json"]);
    let session = h.stored_json("c1/session_context.json").await;
    assert_eq!(session["chat_history"].as_array().unwrap().len(), 0);
    assert!(session["patient_id"].is_null());

    // One timestamped archive folder holding both patient histories and
    // the registry.
    let archived = h.blob.list("c1/archive/").await.unwrap();
    assert_eq!(archived.len(), 3);
    assert!(archived.iter().any(|k| k.ends_with("_patient_patient_4_archived.json")));
    assert!(archived.iter().any(|k| k.ends_with("_patient_patient_15_archived.json")));
    assert!(archived
        .iter()
        .any(|k| k.ends_with("_patient_context_registry_archived.json")));

    // Clear is idempotent: a second clear still succeeds and leaves the
    // same live set.
    let sink = h.turn("clear").await;
    assert!(sink.last().unwrap().content.starts_with("Conversation cleared!"));
    let live: Vec<String> = h
        .blob
        .list("c1/")
        .await
        .unwrap()
        .into_iter()
        .filter(|k| !k.contains("/archive/"))
        .collect();
    assert_eq!(live, vec!["c1/session_context.json"]);
}

// ─────────────────────────────────────────────────────────────────────────────
// Cross-cutting behaviors
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn turn_after_clear_starts_blank() {
    let h = harness();

    h.script_analyzer(AnalyzerAction::ActivateNew, Some("patient_4"));
    h.script_agent("Plan:\n1. review");
    h.script_verdict("no");
    let _ = h.turn("start tumor board for patient_4").await;
    let _ = h.turn("clear").await;

    // The next utterance finds no registry to restore from.
    h.script_analyzer(AnalyzerAction::None, None);
    h.script_agent("This team reviews oncology cases. Name a patient like patient_4 to begin.");
    h.script_verdict("yes");
    let _ = h.turn("what can this team do for me today").await;

    let session = h.stored_json("c1/session_context.json").await;
    assert!(session["patient_id"].is_null());
    // No patient file was resurrected.
    assert!(h.blob.get("c1/patient_patient_4_context.json").await.is_err());
}

#[tokio::test]
async fn agentless_session_turn_has_no_snapshot() {
    let h = harness();
    h.script_analyzer(AnalyzerAction::None, None);
    h.script_agent("Hello! Name a patient like patient_4 to begin a review.");
    h.script_verdict("yes");

    let sink = h.turn("hello everyone, what is this?").await;

    // No patients known: no snapshot injected, no audit footer.
    let request = &h.agent_llm.requests()[0];
    assert_eq!(request.messages[0].role, Role::User);
    assert!(!sink.last().unwrap().content.contains("PT_CTX:"));

    // The session file carries the exchange.
    let session = h.stored_json("c1/session_context.json").await;
    assert_eq!(session["chat_history"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn expired_deadline_persists_progress_and_reports() {
    let config = OrchestratorConfig {
        turn_deadline_seconds: 0,
        ..OrchestratorConfig::default()
    };
    let h = harness_with_config(config);
    h.script_analyzer(AnalyzerAction::None, None);

    let sink = h.turn("please take your time with this one").await;

    let reply = sink.last().unwrap();
    assert!(reply.content.contains("deadline"));
    // The user message was persisted even though no agent ran.
    let session = h.stored_json("c1/session_context.json").await;
    let messages = session["chat_history"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(h.agent_llm.call_count(), 0);
}

#[tokio::test]
async fn fs_backed_activation_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let h = build_harness(
        Arc::new(FsBlobStore::new(dir.path())),
        OrchestratorConfig::default(),
    );
    h.script_analyzer(AnalyzerAction::ActivateNew, Some("patient_4"));
    h.script_agent("Plan:\n1. *Radiology* reviews imaging");
    h.script_verdict("no");

    let _ = h.turn("start tumor board for patient_4").await;

    let doc = h.stored_json("c1/patient_patient_4_context.json").await;
    assert_eq!(doc["chat_history"].as_array().unwrap().len(), 2);
    let registry = h.stored_json("c1/patient_context_registry.json").await;
    assert_eq!(registry["active_patient_id"], "patient_4");
}

#[tokio::test]
async fn failed_agent_yields_synthetic_message_and_turn_survives() {
    let h = harness();
    h.script_analyzer(AnalyzerAction::ActivateNew, Some("patient_4"));
    // Facilitator hands off; Radiology's provider errors; facilitator
    // recovers and closes the turn.
    h.script_agent("*Radiology*, please take the first pass.");
    h.script_verdict("no");
    h.agent_llm.push(MockResponse::Error(ward_llm::ProviderError::Http {
        status: 500,
        message: "backend exploded".into(),
    }));
    h.script_agent("Radiology is unavailable right now; we will retry shortly. Anything else?");
    h.script_verdict("yes");

    let sink = h.turn("start tumor board for patient_4").await;

    let replies = sink.messages();
    assert_eq!(replies.len(), 3);
    assert!(replies[1].content.contains("could not complete its turn"));

    // The synthetic message is part of the durable record.
    let doc = h.stored_json("c1/patient_patient_4_context.json").await;
    let messages = doc["chat_history"].as_array().unwrap();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[2]["name"], "Radiology");
}
