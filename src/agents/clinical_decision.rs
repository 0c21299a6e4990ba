//! Clinical decision agent: retrieval-augmented guideline answering.
//!
//! Questions are answered strictly from a local guideline knowledge base:
//! the top-scoring documents are inlined into the prompt and the model is
//! instructed to refuse when the context is insufficient. An educational
//! disclaimer is always appended.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::llm::{JsonAgent, LlmClient};

use super::reply::AgentReply;

/// How many guideline documents are retrieved per question.
const TOP_K_RESULTS: usize = 4;

const DISCLAIMER: &str = "This information is for educational purposes only and should not be considered a substitute \
for professional medical advice, diagnosis, or treatment. Always seek the advice of your physician or other qualified \
health provider with any questions you may have regarding a medical condition.";

const SYSTEM_PROMPT: &str = r#"You are a helpful AI assistant providing information for a clinical setting.
Your goal is to answer the user's question based ONLY on the provided context documents.
If the context documents do not contain sufficient information to answer the question directly,
clearly state that the information is not available in the provided documents.
Do not use any external knowledge or make assumptions beyond the provided text. Be concise and factual.

You MUST return your response in JSON format with the following structure:
{
    "operation": "analyze_case|check_guidelines|assess_risk",
    "status": "success" or "error",
    "data": {
        "answer": "<your answer based strictly on the context>"
    },
    "error": null or error message
}

Choose the operation that best matches the question:
- analyze_case for questions about a specific patient presentation
- check_guidelines for questions about recommended practice or protocols
- assess_risk for questions about risk factors or prognosis"#;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GuidelineDoc {
    title: String,
    content: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct GuidelineData {
    documents: Vec<GuidelineDoc>,
}

/// Guideline Q&A agent backed by `guidelines.json`.
pub struct ClinicalDecisionAgent {
    llm: JsonAgent,
    documents: Vec<GuidelineDoc>,
}

impl ClinicalDecisionAgent {
    pub fn new(llm: &LlmClient, data_dir: &Path) -> Self {
        let data = load_guideline_data(&data_dir.join("guidelines.json"));
        Self { llm: llm.json_agent(SYSTEM_PROMPT), documents: data.documents }
    }

    pub async fn process(&self, utterance: &str) -> AgentReply {
        let retrieved = retrieve(&self.documents, utterance, TOP_K_RESULTS);

        if retrieved.is_empty() {
            // Never let the model answer from thin air
            return AgentReply::success(
                "check_guidelines",
                json!({"answer": "No relevant documents found in the knowledge base.", "sources": []}),
            );
        }

        debug!("Retrieved {} guideline document(s)", retrieved.len());

        let context: Vec<String> = retrieved.iter().map(|d| format!("Context Document ({}):\n{}", d.title, d.content)).collect();
        let prompt = format!(
            "Context from knowledge base:\n{}\n---\nBased strictly on the context provided above, answer the following question:\nQuestion: {}",
            context.join("\n\n---\n"),
            utterance,
        );

        let value = match self.llm.ask(&prompt).await {
            Ok(value) => value,
            Err(e) => return AgentReply::failure("check_guidelines", e.to_string()),
        };

        let reply = AgentReply::from_llm(value);
        if !reply.is_success() {
            return reply;
        }

        let mut answer = reply
            .data_object()
            .and_then(|d| d.get("answer"))
            .and_then(Value::as_str)
            .unwrap_or("I could not generate an answer based on the available information.")
            .to_string();

        if !answer.to_lowercase().contains(&DISCLAIMER[..40].to_lowercase()) {
            answer.push_str("\n\n");
            answer.push_str(DISCLAIMER);
        }

        let sources: Vec<&str> = retrieved.iter().map(|d| d.title.as_str()).collect();

        AgentReply::success(reply.operation, json!({"answer": answer, "sources": sources}))
    }
}

/// Rank documents by query-term overlap and return the top `k` hits.
fn retrieve<'a>(documents: &'a [GuidelineDoc], query: &str, k: usize) -> Vec<&'a GuidelineDoc> {
    let query_terms: HashSet<String> = terms(query);
    if query_terms.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<(usize, &GuidelineDoc)> = documents
        .iter()
        .map(|doc| {
            let doc_terms = terms(&format!("{} {}", doc.title, doc.content));
            let overlap = query_terms.intersection(&doc_terms).count();
            (overlap, doc)
        })
        .filter(|(score, _)| *score > 0)
        .collect();

    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored.into_iter().take(k).map(|(_, doc)| doc).collect()
}

/// Lowercased alphanumeric terms, with short noise words dropped.
fn terms(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
        .map(str::to_string)
        .collect()
}

fn load_guideline_data(path: &PathBuf) -> GuidelineData {
    match fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!("Malformed guideline data at {}: {}", path.display(), e);
            GuidelineData::default()
        }),
        Err(_) => {
            warn!("No guideline knowledge base at {}; clinical questions will go unanswered", path.display());
            if let Some(parent) = path.parent() {
                let _ = fs::create_dir_all(parent);
            }
            if let Ok(raw) = serde_json::to_string_pretty(&GuidelineData::default()) {
                let _ = fs::write(path, raw);
            }
            GuidelineData::default()
        }
    }
}

/// Render a successful clinical-decision reply for the user.
pub fn format_reply(reply: &AgentReply) -> String {
    let Some(data) = reply.data_object() else {
        return "No answer available.".to_string();
    };

    let mut text = data
        .get("answer")
        .and_then(Value::as_str)
        .unwrap_or("I could not generate an answer based on the available information.")
        .to_string();

    let sources: Vec<&str> = data
        .get("sources")
        .and_then(Value::as_array)
        .map(|s| s.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    if !sources.is_empty() {
        text.push_str(&format!("\n\nSources: {}", sources.join(", ")));
    }

    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn docs() -> Vec<GuidelineDoc> {
        vec![
            GuidelineDoc {
                title: "Diabetes Management".to_string(),
                content: "Metformin is first-line therapy for type 2 diabetes. Target HbA1c below 7 percent.".to_string(),
            },
            GuidelineDoc {
                title: "Hypertension".to_string(),
                content: "ACE inhibitors are preferred initial therapy for hypertension with diabetes.".to_string(),
            },
            GuidelineDoc {
                title: "Asthma".to_string(),
                content: "Inhaled corticosteroids are the cornerstone of persistent asthma control.".to_string(),
            },
        ]
    }

    #[test]
    fn test_retrieve_ranks_by_overlap() {
        let documents = docs();
        let hits = retrieve(&documents, "latest guidelines for type 2 diabetes therapy", 2);
        assert!(!hits.is_empty());
        assert_eq!(hits[0].title, "Diabetes Management");
    }

    #[test]
    fn test_retrieve_skips_irrelevant_documents() {
        let documents = docs();
        let hits = retrieve(&documents, "quarterly parking rota", 4);
        assert!(hits.is_empty());
    }

    #[test]
    fn test_retrieve_respects_top_k() {
        let documents = docs();
        let hits = retrieve(&documents, "therapy for diabetes hypertension asthma", 1);
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_format_appends_sources() {
        let reply = AgentReply::success(
            "check_guidelines",
            serde_json::json!({"answer": "Metformin is first-line.", "sources": ["Diabetes Management"]}),
        );
        let text = format_reply(&reply);
        assert!(text.starts_with("Metformin is first-line."));
        assert!(text.contains("Sources: Diabetes Management"));
    }
}
