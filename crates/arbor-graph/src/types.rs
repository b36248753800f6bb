use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StoreError;

/// Free-form string-keyed metadata attached to sessions and nodes.
pub type Metadata = Map<String, Value>;

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

/// A conversation root. Created together with its root node in one
/// transaction; the root reference never changes afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub title: String,
    pub user_id: Option<String>,
    pub root_node_id: String,
    pub node_count: i64,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewSession {
    pub title: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionPatch {
    pub title: Option<String>,
    pub metadata: Option<Metadata>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionWithNodes {
    #[serde(flatten)]
    pub session: Session,
    pub nodes: Vec<Node>,
}

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Root,
    Main,
    Topic,
    Exploration,
    Question,
    Solution,
    Summary,
    Reference,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Root => "root",
            NodeType::Main => "main",
            NodeType::Topic => "topic",
            NodeType::Exploration => "exploration",
            NodeType::Question => "question",
            NodeType::Solution => "solution",
            NodeType::Summary => "summary",
            NodeType::Reference => "reference",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NodeType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "root" => Ok(NodeType::Root),
            "main" => Ok(NodeType::Main),
            "topic" => Ok(NodeType::Topic),
            "exploration" => Ok(NodeType::Exploration),
            "question" => Ok(NodeType::Question),
            "solution" => Ok(NodeType::Solution),
            "summary" => Ok(NodeType::Summary),
            "reference" => Ok(NodeType::Reference),
            other => Err(StoreError::Malformed(format!("unknown node type: {other}"))),
        }
    }
}

/// Node metadata: a typed core plus a free-form remainder.
///
/// The typed fields cover what branching and the UI actually read;
/// everything else round-trips through `extra` untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_depth: Option<i64>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub auto_generated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(flatten)]
    pub extra: Metadata,
}

impl NodeMetadata {
    pub fn with_extra(entries: &[(&str, Value)]) -> Self {
        let mut extra = Metadata::new();
        for (key, value) in entries {
            extra.insert((*key).to_string(), value.clone());
        }
        Self {
            extra,
            ..Self::default()
        }
    }
}

/// A vertex in the conversation graph.
///
/// `summary` and `reference` nodes may float (no parent); they hang off the
/// graph through `SUMMARIZED_TO` / `REFERENCED_BY` edges recorded in
/// `source_node_ids`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub session_id: String,
    pub parent_id: Option<String>,
    pub title: String,
    pub content: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub depth: i64,
    pub is_active: bool,
    pub is_summary: bool,
    pub is_generating: bool,
    pub summary_content: Option<String>,
    pub source_node_ids: Option<Vec<String>>,
    pub message_count: i64,
    pub token_count: i64,
    #[serde(default)]
    pub metadata: NodeMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewNode {
    #[serde(default)]
    pub parent_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default)]
    pub summary_content: Option<String>,
    #[serde(default)]
    pub source_node_ids: Option<Vec<String>>,
    #[serde(default)]
    pub metadata: NodeMetadata,
}

/// Partial node update — only the mutable fields.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodePatch {
    pub title: Option<String>,
    pub is_active: Option<bool>,
    pub metadata: Option<NodeMetadata>,
    pub summary_content: Option<String>,
    pub is_generating: Option<bool>,
}

impl NodePatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.is_active.is_none()
            && self.metadata.is_none()
            && self.summary_content.is_none()
            && self.is_generating.is_none()
    }
}

/// Recursive tree view rooted at one node.
#[derive(Debug, Clone, Serialize)]
pub struct NodeTree {
    pub node: Node,
    pub children: Vec<NodeTree>,
}

/// Everything adjacent to a node — used by the `/relations` endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct NodeRelations {
    pub current: Option<Node>,
    pub ancestors: Vec<Node>,
    pub descendants: Vec<Node>,
    pub siblings: Vec<Node>,
    pub path: Vec<Node>,
}

/// Outcome of a (batch) node delete. Partial success is surfaced verbatim.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeleteResult {
    pub deleted: Vec<String>,
    pub failed: Vec<String>,
    /// Per requested node: the descendant ids removed alongside it.
    pub cascaded: BTreeMap<String, Vec<String>>,
    pub deleted_count: usize,
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => Err(StoreError::Malformed(format!("unknown role: {other}"))),
        }
    }
}

/// An utterance attached to a node. Immutable after creation except for the
/// optional embedding vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub node_id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub token_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewMessage {
    pub node_id: String,
    pub role: Role,
    pub content: String,
}

// ---------------------------------------------------------------------------
// Branch recommendations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationStatus {
    Pending,
    Created,
    Dismissed,
    Expired,
}

impl RecommendationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendationStatus::Pending => "pending",
            RecommendationStatus::Created => "created",
            RecommendationStatus::Dismissed => "dismissed",
            RecommendationStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for RecommendationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RecommendationStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RecommendationStatus::Pending),
            "created" => Ok(RecommendationStatus::Created),
            "dismissed" => Ok(RecommendationStatus::Dismissed),
            "expired" => Ok(RecommendationStatus::Expired),
            other => Err(StoreError::Malformed(format!(
                "unknown recommendation status: {other}"
            ))),
        }
    }
}

/// An LLM-proposed future branch, attached to the assistant message it came
/// from. Never hard-deleted; only `status`, `created_branch_id`, and
/// `dismissed_at` change after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchRecommendation {
    pub id: String,
    pub session_id: String,
    pub node_id: String,
    pub message_id: String,
    pub title: String,
    pub description: String,
    #[serde(rename = "type")]
    pub rec_type: String,
    pub priority: f64,
    pub estimated_depth: i64,
    pub edge_label: String,
    pub status: RecommendationStatus,
    pub created_branch_id: Option<String>,
    pub dismissed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Recommendation fields produced by branch analysis, before persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationSeed {
    pub title: String,
    pub description: String,
    #[serde(rename = "type")]
    pub rec_type: String,
    pub priority: f64,
    pub estimated_depth: i64,
    pub edge_label: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewRecommendation {
    pub session_id: String,
    pub node_id: String,
    pub message_id: String,
    #[serde(flatten)]
    pub seed: RecommendationSeed,
}

/// A batch of seeds tied to one assistant message.
#[derive(Debug, Clone, Deserialize)]
pub struct RecommendationBatch {
    pub session_id: String,
    pub node_id: String,
    pub message_id: String,
    pub recommendations: Vec<RecommendationSeed>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecommendationPatch {
    pub status: Option<RecommendationStatus>,
    pub created_branch_id: Option<String>,
    pub dismissed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_type_roundtrips_through_str() {
        for t in [
            NodeType::Root,
            NodeType::Main,
            NodeType::Topic,
            NodeType::Exploration,
            NodeType::Question,
            NodeType::Solution,
            NodeType::Summary,
            NodeType::Reference,
        ] {
            assert_eq!(t.as_str().parse::<NodeType>().unwrap(), t);
        }
    }

    #[test]
    fn unknown_node_type_is_malformed() {
        assert!("branchy".parse::<NodeType>().is_err());
    }

    #[test]
    fn node_serialises_type_field() {
        let v = serde_json::to_value(NodeType::Reference).unwrap();
        assert_eq!(v, serde_json::json!("reference"));
    }

    #[test]
    fn status_rejects_unknown() {
        assert!("archived".parse::<RecommendationStatus>().is_err());
    }

    #[test]
    fn node_metadata_keeps_unknown_keys_in_extra() {
        let raw = serde_json::json!({
            "branch_type": "topics",
            "priority": 0.4,
            "custom_flag": true,
        });
        let metadata: NodeMetadata = serde_json::from_value(raw).unwrap();
        assert_eq!(metadata.branch_type.as_deref(), Some("topics"));
        assert_eq!(metadata.extra["custom_flag"], serde_json::json!(true));

        let back = serde_json::to_value(&metadata).unwrap();
        assert_eq!(back["custom_flag"], serde_json::json!(true));
        assert_eq!(back["priority"], serde_json::json!(0.4));
        // Unset typed fields stay off the wire.
        assert!(back.get("created_by").is_none());
    }
}
