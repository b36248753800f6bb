//! Server→client event vocabulary.
//!
//! Every event serialises to a JSON object with a top-level `type`
//! discriminator and ISO-8601 timestamps. The pipeline emits these; the
//! session hub only ships serialised frames.

use chrono::{DateTime, Utc};
use serde::Serialize;

use arbor_graph::types::{BranchRecommendation, DeleteResult, Node};

/// Descriptor of a graph edge as shown to clients.
#[derive(Debug, Clone, Serialize)]
pub struct EdgeDescriptor {
    pub id: String,
    pub source: String,
    pub target: String,
    pub label: String,
}

impl EdgeDescriptor {
    pub fn between(source: &str, target: &str, label: &str) -> Self {
        Self {
            id: format!("{source}-{target}"),
            source: source.to_string(),
            target: target.to_string(),
            label: label.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TokenUsage {
    pub total_tokens: i64,
}

/// Result payload of a completed non-streaming chat turn.
#[derive(Debug, Clone, Serialize)]
pub struct ChatTurn {
    pub response: String,
    pub node_id: String,
    pub message_id: Option<String>,
    pub branched: bool,
    pub token_usage: TokenUsage,
    pub recommended_branches: Vec<BranchRecommendation>,
}

/// Outcome of an automatic parent summarisation.
#[derive(Debug, Clone, Serialize)]
pub struct ParentSummary {
    pub summary: String,
    pub original_message_count: usize,
    pub token_count: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Greeting sent to a freshly connected sink only.
    Connection { message: String },

    ChatResponse {
        session_id: String,
        data: ChatTurn,
        updated_node: Option<Node>,
    },

    StreamStart {
        session_id: String,
        node_id: String,
        message_id: String,
    },

    StreamChunk {
        session_id: String,
        node_id: String,
        chunk: String,
    },

    StreamEnd {
        session_id: String,
        node_id: String,
        message_id: Option<String>,
        full_response: String,
        recommended_branches: Vec<BranchRecommendation>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    CreatingReferenceNode {
        session_id: String,
        parent_node_id: String,
        message: String,
    },

    ReferenceNodeCreated {
        session_id: String,
        parent_node_id: String,
        reference_node: Node,
        edge: EdgeDescriptor,
    },

    GeneratingSummary {
        session_id: String,
        node_id: String,
        message: String,
    },

    SummaryGenerated {
        session_id: String,
        node_id: String,
        summary: ParentSummary,
    },

    /// A floating summary node finished (or failed) its background fill.
    SummaryCompleted {
        session_id: String,
        node_id: String,
        title: String,
        content: String,
        is_generating: bool,
    },

    NodeCreated {
        session_id: String,
        node: Node,
    },

    NodesDeleted {
        session_id: String,
        result: DeleteResult,
    },

    NodeUpdated {
        session_id: String,
        data: Node,
    },

    Error { message: String },

    Pong { timestamp: DateTime<Utc> },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
        }
    }

    /// Serialise for the wire. Events are plain data; failure here would be
    /// a programming error, so fall back to a bare error frame.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"error","message":"event serialization failed"}"#.to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_carry_snake_case_type_tags() {
        let event = ServerEvent::StreamChunk {
            session_id: "s".into(),
            node_id: "n".into(),
            chunk: "hi".into(),
        };
        let value: serde_json::Value = serde_json::from_str(&event.to_json()).unwrap();
        assert_eq!(value["type"], "stream_chunk");
        assert_eq!(value["chunk"], "hi");
    }

    #[test]
    fn stream_end_omits_absent_error() {
        let ok = ServerEvent::StreamEnd {
            session_id: "s".into(),
            node_id: "n".into(),
            message_id: Some("m".into()),
            full_response: "done".into(),
            recommended_branches: Vec::new(),
            error: None,
        };
        let value: serde_json::Value = serde_json::from_str(&ok.to_json()).unwrap();
        assert!(value.get("error").is_none());

        let failed = ServerEvent::StreamEnd {
            session_id: "s".into(),
            node_id: "n".into(),
            message_id: None,
            full_response: String::new(),
            recommended_branches: Vec::new(),
            error: Some("provider unavailable".into()),
        };
        let value: serde_json::Value = serde_json::from_str(&failed.to_json()).unwrap();
        assert_eq!(value["error"], "provider unavailable");
        assert_eq!(value["message_id"], serde_json::Value::Null);
    }

    #[test]
    fn pong_timestamp_is_iso8601() {
        let event = ServerEvent::Pong {
            timestamp: chrono::Utc::now(),
        };
        let value: serde_json::Value = serde_json::from_str(&event.to_json()).unwrap();
        let ts = value["timestamp"].as_str().unwrap();
        assert!(ts.contains('T'));
    }

    #[test]
    fn edge_descriptor_id_joins_endpoints() {
        let edge = EdgeDescriptor::between("a", "b", "conversation continued");
        assert_eq!(edge.id, "a-b");
        assert_eq!(edge.label, "conversation continued");
    }
}
