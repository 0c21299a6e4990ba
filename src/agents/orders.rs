//! Order agent: clinical orders for tests, medications and procedures.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::warn;

use crate::llm::{JsonAgent, LlmClient};

use super::reply::AgentReply;

const SYSTEM_PROMPT: &str = r#"You are an AI assistant specialized in processing clinical orders and prescriptions.
Your task is to help healthcare providers create and manage orders for tests, medications, and procedures.

You MUST return your response in JSON format with the following structure:
{
    "operation": "create_order|verify_order|cancel_order",
    "status": "success|error",
    "data": {
        "order_type": "test|medication|procedure",
        "order_id": "<order id, for verify/cancel>",
        "details": { "description": "<what was ordered>" }
    },
    "warnings": [],
    "error": null or error message if status is "error"
}

Focus on:
1. Order accuracy and completeness
2. Clinical appropriateness
3. Patient safety
4. Order tracking and status

Always verify orders for completeness before processing."#;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Order {
    order_id: String,
    order_type: String,
    details: Value,
    status: String,
    created_at: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct OrderData {
    orders: Vec<Order>,
}

/// Order management agent backed by `orders.json`.
pub struct OrderAgent {
    llm: JsonAgent,
    data: Mutex<OrderData>,
    path: PathBuf,
}

impl OrderAgent {
    pub fn new(llm: &LlmClient, data_dir: &Path) -> Self {
        let path = data_dir.join("orders.json");
        let data = load_order_data(&path);
        Self { llm: llm.json_agent(SYSTEM_PROMPT), data: Mutex::new(data), path }
    }

    pub async fn process(&self, utterance: &str) -> AgentReply {
        let value = match self.llm.request(utterance).await {
            Ok(value) => value,
            Err(e) => return AgentReply::failure("unknown", e.to_string()),
        };

        let reply = AgentReply::from_llm(value);
        if !reply.is_success() {
            return reply;
        }

        let warnings = reply.warnings.clone();
        let executed = match reply.operation.as_str() {
            "create_order" => self.create_order(&reply),
            "verify_order" => self.set_order_status(&reply, "verified"),
            "cancel_order" => self.set_order_status(&reply, "cancelled"),
            other => AgentReply::failure(other, format!("Unsupported operation: {}", other)),
        };

        executed.with_warnings(warnings)
    }

    fn create_order(&self, reply: &AgentReply) -> AgentReply {
        let data = reply.data_object().cloned().unwrap_or_default();
        let order_type = data.get("order_type").and_then(Value::as_str).unwrap_or("test").to_string();
        let details = data.get("details").cloned().unwrap_or_else(|| json!({}));

        let now = Utc::now();
        let order = Order {
            order_id: format!("ORD-{}", now.format("%Y%m%d%H%M%S")),
            order_type: order_type.clone(),
            details: details.clone(),
            status: "pending".to_string(),
            created_at: now.to_rfc3339(),
        };

        {
            let mut store = self.data.lock();
            store.orders.push(order.clone());
            self.save(&store);
        }

        AgentReply::success(
            "create_order",
            json!({
                "order_id": order.order_id,
                "order_type": order_type,
                "details": details,
                "status": "pending",
                "message": format!("Order {} has been created and is pending verification", order.order_id),
            }),
        )
    }

    fn set_order_status(&self, reply: &AgentReply, status: &str) -> AgentReply {
        let operation = reply.operation.clone();

        let Some(order_id) = reply.data_object().and_then(|d| d.get("order_id")).and_then(Value::as_str).map(str::to_string) else {
            return AgentReply::failure(operation, "No order id specified");
        };

        let mut store = self.data.lock();
        let Some(order) = store.orders.iter_mut().find(|o| o.order_id == order_id) else {
            return AgentReply::failure(operation, format!("Order {} not found", order_id));
        };

        order.status = status.to_string();
        self.save(&store);

        let message = match status {
            "verified" => format!("Order {} has been verified and is ready for processing", order_id),
            _ => format!("Order {} has been cancelled", order_id),
        };

        AgentReply::success(operation, json!({"order_id": order_id, "status": status, "message": message}))
    }

    fn save(&self, data: &OrderData) {
        match serde_json::to_string_pretty(data) {
            Ok(raw) => {
                if let Err(e) = fs::write(&self.path, raw) {
                    warn!("Failed to save order data: {}", e);
                }
            }
            Err(e) => warn!("Failed to serialize order data: {}", e),
        }
    }
}

fn load_order_data(path: &PathBuf) -> OrderData {
    match fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!("Malformed order data at {}: {}", path.display(), e);
            OrderData::default()
        }),
        Err(_) => {
            if let Some(parent) = path.parent() {
                let _ = fs::create_dir_all(parent);
            }
            if let Ok(raw) = serde_json::to_string_pretty(&OrderData::default()) {
                let _ = fs::write(path, raw);
            }
            OrderData::default()
        }
    }
}

/// Render a successful order reply for the user.
pub fn format_reply(reply: &AgentReply) -> String {
    let Some(data) = reply.data_object() else {
        return "No order data provided.".to_string();
    };

    let mut text = data
        .get("message")
        .and_then(Value::as_str)
        .map(|m| format!("✅ {}", m))
        .unwrap_or_else(|| serde_json::to_string(data).unwrap_or_default());

    if !reply.warnings.is_empty() {
        text.push_str("\n\nSpecial instructions:\n");
        for warning in &reply.warnings {
            text.push_str(&format!("- {}\n", warning));
        }
    }

    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_agent(tag: &str) -> OrderAgent {
        use clap::Parser;
        let config = crate::config::AppConfig::try_parse_from(["clinical-voice-assistant", "--groq-api-key", "test-key"]).unwrap();
        let llm = LlmClient::new(&config).unwrap();

        let dir = std::env::temp_dir().join(format!("cva-orders-{}-{}", tag, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        OrderAgent::new(&llm, &dir)
    }

    #[test]
    fn test_create_then_verify_order() {
        let agent = test_agent("verify");
        let envelope = AgentReply::success(
            "create_order",
            json!({"order_type": "test", "details": {"description": "complete blood count"}}),
        );

        let created = agent.create_order(&envelope);
        assert!(created.is_success());
        let order_id = created.data_object().unwrap()["order_id"].as_str().unwrap().to_string();
        assert!(order_id.starts_with("ORD-"));

        let verify_envelope = AgentReply::success("verify_order", json!({"order_id": order_id}));
        let verified = agent.set_order_status(&verify_envelope, "verified");
        assert!(verified.is_success());
        assert_eq!(verified.data_object().unwrap()["status"], "verified");
    }

    #[test]
    fn test_cancel_unknown_order_errors() {
        let agent = test_agent("cancel");
        let envelope = AgentReply::success("cancel_order", json!({"order_id": "ORD-00000000000000"}));
        let reply = agent.set_order_status(&envelope, "cancelled");
        assert!(!reply.is_success());
        assert!(reply.error.unwrap().contains("not found"));
    }

    #[test]
    fn test_format_includes_warnings() {
        let reply = AgentReply::success("create_order", json!({"message": "Order ORD-1 has been created and is pending verification"}))
            .with_warnings(vec!["Fasting required".to_string()]);
        let text = format_reply(&reply);
        assert!(text.starts_with("✅ Order ORD-1"));
        assert!(text.contains("- Fasting required"));
    }
}
