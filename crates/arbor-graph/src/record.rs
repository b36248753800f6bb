//! Row decoding — the single place where raw storage rows become typed
//! entities. Repositories select the column lists below verbatim so the
//! positional decoders stay in sync.

use chrono::{DateTime, Utc};
use rusqlite::Row;

use crate::types::{
    BranchRecommendation, Message, Metadata, Node, NodeMetadata, NodeType, RecommendationStatus,
    Role, Session,
};

pub const SESSION_COLS: &str =
    "id, title, user_id, root_node_id, node_count, metadata, created_at, updated_at";

pub const NODE_COLS: &str = "id, session_id, parent_id, title, content, type, depth, is_active, \
     is_summary, is_generating, summary_content, source_node_ids, message_count, token_count, \
     metadata, created_at, updated_at";

pub const MESSAGE_COLS: &str = "id, node_id, role, content, timestamp, token_count, embedding";

pub const RECOMMENDATION_COLS: &str = "id, session_id, node_id, message_id, title, description, \
     type, priority, estimated_depth, edge_label, status, created_branch_id, dismissed_at, \
     created_at, updated_at";

fn invalid(
    idx: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

fn parse_ts(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| invalid(idx, e))
}

/// Composite columns are stored as JSON text. A missing or unparseable map
/// decodes to an empty one — legacy rows predate strict encoding.
fn decode_metadata(raw: Option<String>) -> Metadata {
    raw.and_then(|s| serde_json::from_str::<serde_json::Value>(&s).ok())
        .and_then(|v| match v {
            serde_json::Value::Object(map) => Some(map),
            _ => None,
        })
        .unwrap_or_default()
}

fn decode_node_metadata(raw: Option<String>) -> NodeMetadata {
    raw.and_then(|s| serde_json::from_str::<NodeMetadata>(&s).ok())
        .unwrap_or_default()
}

fn decode_string_list(raw: Option<String>) -> Option<Vec<String>> {
    raw.and_then(|s| serde_json::from_str::<Vec<String>>(&s).ok())
}

fn decode_embedding(raw: Option<String>) -> Option<Vec<f32>> {
    raw.and_then(|s| serde_json::from_str::<Vec<f32>>(&s).ok())
}

pub fn decode_session(row: &Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        title: row.get(1)?,
        user_id: row.get(2)?,
        root_node_id: row.get(3)?,
        node_count: row.get(4)?,
        metadata: decode_metadata(row.get(5)?),
        created_at: parse_ts(6, &row.get::<_, String>(6)?)?,
        updated_at: parse_ts(7, &row.get::<_, String>(7)?)?,
    })
}

pub fn decode_node(row: &Row<'_>) -> rusqlite::Result<Node> {
    let node_type: NodeType = row
        .get::<_, String>(5)?
        .parse()
        .map_err(|e| invalid(5, e))?;
    Ok(Node {
        id: row.get(0)?,
        session_id: row.get(1)?,
        parent_id: row.get(2)?,
        title: row.get(3)?,
        content: row.get(4)?,
        node_type,
        depth: row.get(6)?,
        is_active: row.get(7)?,
        is_summary: row.get(8)?,
        is_generating: row.get(9)?,
        summary_content: row.get(10)?,
        source_node_ids: decode_string_list(row.get(11)?),
        message_count: row.get(12)?,
        token_count: row.get(13)?,
        metadata: decode_node_metadata(row.get(14)?),
        created_at: parse_ts(15, &row.get::<_, String>(15)?)?,
        updated_at: parse_ts(16, &row.get::<_, String>(16)?)?,
    })
}

pub fn decode_message(row: &Row<'_>) -> rusqlite::Result<Message> {
    let role: Role = row
        .get::<_, String>(2)?
        .parse()
        .map_err(|e| invalid(2, e))?;
    Ok(Message {
        id: row.get(0)?,
        node_id: row.get(1)?,
        role,
        content: row.get(3)?,
        timestamp: parse_ts(4, &row.get::<_, String>(4)?)?,
        token_count: row.get(5)?,
        embedding: decode_embedding(row.get(6)?),
    })
}

pub fn decode_recommendation(row: &Row<'_>) -> rusqlite::Result<BranchRecommendation> {
    let status: RecommendationStatus = row
        .get::<_, String>(10)?
        .parse()
        .map_err(|e| invalid(10, e))?;
    let dismissed_at = match row.get::<_, Option<String>>(12)? {
        Some(s) => Some(parse_ts(12, &s)?),
        None => None,
    };
    Ok(BranchRecommendation {
        id: row.get(0)?,
        session_id: row.get(1)?,
        node_id: row.get(2)?,
        message_id: row.get(3)?,
        title: row.get(4)?,
        description: row.get(5)?,
        rec_type: row.get(6)?,
        priority: row.get(7)?,
        estimated_depth: row.get(8)?,
        edge_label: row.get(9)?,
        status,
        created_branch_id: row.get(11)?,
        dismissed_at,
        created_at: parse_ts(13, &row.get::<_, String>(13)?)?,
        updated_at: parse_ts(14, &row.get::<_, String>(14)?)?,
    })
}

/// Encode a metadata map for storage.
pub fn encode_metadata(metadata: &Metadata) -> String {
    serde_json::to_string(metadata).unwrap_or_else(|_| "{}".to_string())
}

/// Encode node metadata for storage.
pub fn encode_node_metadata(metadata: &NodeMetadata) -> String {
    serde_json::to_string(metadata).unwrap_or_else(|_| "{}".to_string())
}

/// Encode an id list for storage.
pub fn encode_string_list(ids: &[String]) -> String {
    serde_json::to_string(ids).unwrap_or_else(|_| "[]".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_metadata_decodes_to_empty_map() {
        assert!(decode_metadata(Some("not json".into())).is_empty());
        assert!(decode_metadata(Some("[1,2]".into())).is_empty());
        assert!(decode_metadata(None).is_empty());
    }

    #[test]
    fn metadata_roundtrips() {
        let mut map = Metadata::new();
        map.insert("branch_type".into(), serde_json::json!("topics"));
        map.insert("priority".into(), serde_json::json!(0.8));
        let decoded = decode_metadata(Some(encode_metadata(&map)));
        assert_eq!(decoded, map);
    }

    #[test]
    fn string_list_roundtrips() {
        let ids = vec!["a".to_string(), "b".to_string()];
        assert_eq!(
            decode_string_list(Some(encode_string_list(&ids))),
            Some(ids)
        );
    }
}
