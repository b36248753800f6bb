//! Client→server WebSocket frames.
//!
//! Frames are JSON objects with a top-level `type` and a nested `data`
//! payload. The raw `type` string is kept around so unknown types can be
//! echoed back verbatim in the error message.

use serde::Deserialize;

use arbor_graph::types::NodeMetadata;

pub const CHAT: &str = "chat";
pub const CREATE_REFERENCE_AND_CHAT: &str = "create_reference_and_chat";
pub const NODE_UPDATE: &str = "node_update";
pub const PING: &str = "ping";

/// A raw inbound frame — dispatch happens on `frame_type`, the payload is
/// decoded per type afterwards.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundFrame {
    #[serde(rename = "type")]
    pub frame_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl InboundFrame {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn data_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.data.clone())
    }
}

/// Payload of `chat` and `create_reference_and_chat` frames.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatParams {
    pub node_id: String,
    pub message: String,
    #[serde(default = "default_true")]
    pub stream: bool,
    #[serde(default = "default_true")]
    pub auto_branch: bool,
}

/// Payload of `node_update` frames.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeUpdateParams {
    pub node_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub metadata: Option<NodeMetadata>,
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_frame_parses_with_defaults() {
        let frame = InboundFrame::parse(
            r#"{"type":"chat","data":{"node_id":"n1","message":"hi"}}"#,
        )
        .unwrap();
        assert_eq!(frame.frame_type, CHAT);
        let params: ChatParams = frame.data_as().unwrap();
        assert_eq!(params.node_id, "n1");
        assert!(params.stream);
        assert!(params.auto_branch);
    }

    #[test]
    fn chat_frame_honours_explicit_flags() {
        let frame = InboundFrame::parse(
            r#"{"type":"chat","data":{"node_id":"n1","message":"hi","stream":true,"auto_branch":false}}"#,
        )
        .unwrap();
        let params: ChatParams = frame.data_as().unwrap();
        assert!(!params.auto_branch);
    }

    #[test]
    fn ping_frame_needs_no_data() {
        let frame = InboundFrame::parse(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(frame.frame_type, PING);
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(InboundFrame::parse("{not json").is_err());
    }

    #[test]
    fn missing_required_field_fails_payload_decode() {
        let frame =
            InboundFrame::parse(r#"{"type":"chat","data":{"message":"hi"}}"#).unwrap();
        assert!(frame.data_as::<ChatParams>().is_err());
    }
}
