//! The clinical agents and their dispatch pipeline.
//!
//! Each agent pairs an LLM intent extraction (its own system prompt) with a
//! deterministic executor over its backing store. The dispatcher routes an
//! utterance to one agent, runs the Inspector over the reply, and renders
//! the result for the user.

mod analytics;
mod clinical_decision;
mod ehr;
mod inspector;
mod medication;
mod orders;
mod reply;
mod scheduling;

pub use inspector::{InspectorAgent, Validation};
pub use reply::{AgentReply, ReplyStatus};

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::llm::LlmClient;
use crate::router::Router;
use crate::storage::EhrStore;

use analytics::AnalyticsAgent;
use clinical_decision::ClinicalDecisionAgent;
use ehr::EhrAgent;
use medication::MedicationAgent;
use orders::OrderAgent;
use scheduling::SchedulingAgent;

/// The routable clinical agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentKind {
    Ehr,
    Medication,
    Orders,
    ClinicalDecision,
    Scheduling,
    Analytics,
}

impl AgentKind {
    /// Stable agent name used in validation messages and state tracking.
    pub fn name(&self) -> &'static str {
        match self {
            AgentKind::Ehr => "EHRAgent",
            AgentKind::Medication => "MedicationAgent",
            AgentKind::Orders => "OrderAgent",
            AgentKind::ClinicalDecision => "ClinicalDecisionAgent",
            AgentKind::Scheduling => "SchedulingAgent",
            AgentKind::Analytics => "AnalyticsAgent",
        }
    }
}

/// Routes utterances to agents and validates their replies.
pub struct Dispatcher {
    router: Router,
    ehr: EhrAgent,
    medication: MedicationAgent,
    orders: OrderAgent,
    clinical_decision: ClinicalDecisionAgent,
    scheduling: SchedulingAgent,
    analytics: AnalyticsAgent,
    inspector: InspectorAgent,
}

impl Dispatcher {
    pub fn new(llm: &LlmClient, config: &AppConfig, ehr_store: Arc<EhrStore>) -> Result<Self> {
        let medical_dir = config.medical_data_dir();
        std::fs::create_dir_all(&medical_dir)?;

        info!("Initializing clinical agents...");

        let dispatcher = Self {
            router: Router::new(),
            ehr: EhrAgent::new(llm, ehr_store),
            medication: MedicationAgent::new(llm, &medical_dir),
            orders: OrderAgent::new(llm, &medical_dir),
            clinical_decision: ClinicalDecisionAgent::new(llm, &medical_dir),
            scheduling: SchedulingAgent::new(llm, &medical_dir),
            analytics: AnalyticsAgent::new(llm),
            inspector: InspectorAgent::new(),
        };

        info!("✅ All agents initialized");
        Ok(dispatcher)
    }

    /// Handle one transcribed utterance end to end, returning the text to
    /// show (and speak) to the user.
    pub async fn handle_utterance(&self, text: &str) -> String {
        let Some(kind) = self.router.classify(text) else {
            self.analytics.record_error("routing");
            return "❌ I'm not sure how to handle that request. Please try rephrasing your question.".to_string();
        };

        debug!("Routing to {}", kind.name());
        self.analytics.record_encounter(kind);

        let reply = match kind {
            AgentKind::Ehr => self.ehr.process(text).await,
            AgentKind::Medication => self.medication.process(text).await,
            AgentKind::Orders => self.orders.process(text).await,
            AgentKind::ClinicalDecision => self.clinical_decision.process(text).await,
            AgentKind::Scheduling => self.scheduling.process(text).await,
            AgentKind::Analytics => self.analytics.process(text).await,
        };

        let validation = self.inspector.validate_reply(kind, &reply);
        if !validation.is_valid {
            self.analytics.record_error("validation");
            return InspectorAgent::format_validation(&validation);
        }

        self.inspector.monitor_state(kind, &reply);

        match kind {
            AgentKind::Ehr => ehr::format_reply(&reply),
            AgentKind::Medication => medication::format_reply(&reply),
            AgentKind::Orders => orders::format_reply(&reply),
            AgentKind::ClinicalDecision => clinical_decision::format_reply(&reply),
            AgentKind::Scheduling => scheduling::format_reply(&reply),
            AgentKind::Analytics => analytics::format_reply(&reply),
        }
    }
}
