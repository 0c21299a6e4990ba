//! Keyword-based command classification.
//!
//! Utterances are routed to the first agent whose keyword set matches, in a
//! fixed priority order: clinical guideline questions are checked first so
//! "latest clinical guidelines for diabetes medication" reaches the
//! decision-support agent rather than the medication agent.

use regex::Regex;

use crate::agents::AgentKind;

/// Priority-ordered classification rules.
pub struct Router {
    rules: Vec<(AgentKind, Regex)>,
}

impl Router {
    pub fn new() -> Self {
        // Word-boundary matching with optional plurals, so "testing" or
        // "prehistoric" never trigger a route
        let patterns: [(AgentKind, &str); 6] = [
            (AgentKind::ClinicalDecision, r"(?i)\b(guidelines?|clinical|latest|standards?|protocols?)\b"),
            (AgentKind::Ehr, r"(?i)\b(histor(y|ies)|records?|patients?|medical)\b"),
            (AgentKind::Medication, r"(?i)\b(medications?|drugs?|prescriptions?|interactions?)\b"),
            (AgentKind::Orders, r"(?i)\b(orders?|tests?|labs?|procedures?)\b"),
            (AgentKind::Scheduling, r"(?i)\b(schedules?|appointments?|available|book|cancel)\b"),
            (AgentKind::Analytics, r"(?i)\b(reports?|trends?|analytics|statistics?)\b"),
        ];

        let rules = patterns
            .into_iter()
            .map(|(kind, pattern)| (kind, Regex::new(pattern).expect("classification pattern is valid")))
            .collect();

        Self { rules }
    }

    /// Classify an utterance, or `None` when no keyword matches.
    pub fn classify(&self, text: &str) -> Option<AgentKind> {
        self.rules.iter().find(|(_, pattern)| pattern.is_match(text)).map(|(kind, _)| *kind)
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_commands_route_as_documented() {
        let router = Router::new();
        assert_eq!(router.classify("Show me John Smith's medical history"), Some(AgentKind::Ehr));
        assert_eq!(router.classify("Check interactions between Metformin and Lisinopril"), Some(AgentKind::Medication));
        assert_eq!(router.classify("Schedule an appointment for next week"), Some(AgentKind::Scheduling));
        assert_eq!(router.classify("Order a complete blood count test"), Some(AgentKind::Orders));
        assert_eq!(router.classify("Show me the latest clinical guidelines for diabetes"), Some(AgentKind::ClinicalDecision));
        assert_eq!(router.classify("Generate a report on outcomes"), Some(AgentKind::Analytics));
    }

    #[test]
    fn test_priority_order_clinical_first() {
        let router = Router::new();
        // Mentions medications, but guideline questions win
        assert_eq!(router.classify("latest clinical guidelines for diabetes medication"), Some(AgentKind::ClinicalDecision));
        // Mentions a report, but the patient keyword ranks higher
        assert_eq!(router.classify("Generate a report on patient outcomes"), Some(AgentKind::Ehr));
    }

    #[test]
    fn test_word_boundaries() {
        let router = Router::new();
        // "prehistoric" must not match the EHR history keyword
        assert_eq!(router.classify("tell me about prehistoric protesting"), None);
        assert_eq!(router.classify("bring up the patient records"), Some(AgentKind::Ehr));
    }

    #[test]
    fn test_unroutable_input() {
        let router = Router::new();
        assert_eq!(router.classify("Hello there"), None);
        assert_eq!(router.classify(""), None);
    }
}
