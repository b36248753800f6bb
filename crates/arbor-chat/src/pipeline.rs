//! The chat turn pipeline: persist → assemble → stream → persist → analyse.
//!
//! Streaming turns broadcast their progress through the session hub; the
//! auto-reference rule redirects writes away from nodes that already have
//! children. A client going away mid-turn only severs its sink — the turn
//! itself runs to completion so the assistant message and recommendations
//! are still persisted.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

use arbor_agent::{prompt, ChatMessage, LlmAdapter, StreamEvent};
use arbor_graph::types::{Message, NewMessage, NewNode, Node, NodeMetadata, NodeType, Role};
use arbor_graph::{MessageRepo, NodeRepo};
use arbor_hub::SessionHub;
use arbor_protocol::events::{ChatTurn, EdgeDescriptor, TokenUsage};
use arbor_protocol::ServerEvent;

use crate::branching::BranchAnalyzer;
use crate::context::{ContextAssembler, ConversationHistory};
use crate::error::{ChatError, Result};
use crate::summary::SummaryEngine;

/// Context budget; histories above this get their parent portion collapsed
/// into a single summary message.
pub const TOKEN_LIMIT: i64 = 4000;
const CHAT_TEMPERATURE: f32 = 0.7;
/// At most this many conversation turns are sent, newest last.
const MAX_CONTEXT_MESSAGES: usize = 20;
const STREAM_BUFFER: usize = 64;

/// Result of a non-streaming chat turn.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub turn: ChatTurn,
    pub updated_node: Option<Node>,
}

#[derive(Clone)]
pub struct ChatPipeline {
    nodes: NodeRepo,
    messages: MessageRepo,
    assembler: ContextAssembler,
    summaries: SummaryEngine,
    analyzer: BranchAnalyzer,
    llm: Arc<dyn LlmAdapter>,
    hub: Arc<SessionHub>,
}

impl ChatPipeline {
    pub fn new(
        nodes: NodeRepo,
        messages: MessageRepo,
        assembler: ContextAssembler,
        summaries: SummaryEngine,
        analyzer: BranchAnalyzer,
        llm: Arc<dyn LlmAdapter>,
        hub: Arc<SessionHub>,
    ) -> Self {
        Self {
            nodes,
            messages,
            assembler,
            summaries,
            analyzer,
            llm,
            hub,
        }
    }

    /// Streaming chat turn.
    ///
    /// A node that already has children cannot take new messages; the turn
    /// transparently forks a reference node first and streams against it.
    #[instrument(skip(self, text), fields(session_id, node_id, auto_branch))]
    pub async fn chat_streaming(
        &self,
        session_id: &str,
        node_id: &str,
        text: &str,
        auto_branch: bool,
    ) -> Result<()> {
        let working_node = if self.nodes.has_children(node_id)? {
            self.auto_reference(session_id, node_id).await?
        } else {
            node_id.to_string()
        };
        self.stream_turn(session_id, &working_node, text, auto_branch)
            .await
    }

    /// Explicit fork-and-chat: always creates a reference node under the
    /// target and streams against it, without branch analysis.
    #[instrument(skip(self, text), fields(session_id, parent_node_id))]
    pub async fn create_reference_and_chat(
        &self,
        session_id: &str,
        parent_node_id: &str,
        text: &str,
    ) -> Result<()> {
        let parent = self
            .nodes
            .get(parent_node_id)?
            .ok_or_else(|| arbor_graph::StoreError::not_found("node", parent_node_id))?;

        let reference = self.nodes.create(
            session_id,
            NewNode {
                parent_id: Some(parent.id.clone()),
                title: format!("Reference: {}", parent.title),
                content: String::new(),
                node_type: NodeType::Reference,
                summary_content: None,
                source_node_ids: Some(vec![parent.id.clone()]),
                metadata: NodeMetadata::default(),
            },
        )?;

        if !has_summary(&parent) {
            if let Err(e) = self.summaries.summarize_parent_if_needed(parent_node_id).await {
                warn!(parent_node_id, error = %e, "parent summary failed, continuing");
            }
        }

        self.hub.broadcast(
            session_id,
            &ServerEvent::ReferenceNodeCreated {
                session_id: session_id.to_string(),
                parent_node_id: parent_node_id.to_string(),
                reference_node: reference.clone(),
                edge: EdgeDescriptor::between(parent_node_id, &reference.id, "reference"),
            },
            None,
        );

        self.stream_turn(session_id, &reference.id, text, false).await
    }

    /// Non-streaming chat turn; the caller ships the outcome as a single
    /// `chat_response` event or HTTP body.
    #[instrument(skip(self, text), fields(session_id, node_id, auto_branch))]
    pub async fn chat(
        &self,
        session_id: &str,
        node_id: &str,
        text: &str,
        auto_branch: bool,
    ) -> Result<ChatOutcome> {
        self.messages.create(NewMessage {
            node_id: node_id.to_string(),
            role: Role::User,
            content: text.to_string(),
        })?;

        let history = self.assembler.assemble(node_id, true)?;
        let llm_messages = self.build_llm_messages(&history, node_id).await?;

        // The user message survives even when the provider fails — only
        // the assistant side of the turn is lost.
        let response = self.llm.chat(&llm_messages, CHAT_TEMPERATURE).await?;
        if response.content.trim().is_empty() {
            return Err(ChatError::Adapter(arbor_agent::AdapterError::Parse(
                "provider returned an empty completion".into(),
            )));
        }

        let assistant = self.messages.create(NewMessage {
            node_id: node_id.to_string(),
            role: Role::Assistant,
            content: response.content.clone(),
        })?;

        let recommended_branches = if auto_branch {
            let mut conversation = llm_messages;
            conversation.push(ChatMessage::assistant(response.content.clone()));
            self.analyzer
                .analyze_and_store(&conversation, session_id, node_id, &assistant.id)
                .await
        } else {
            Vec::new()
        };

        let updated_node = self.nodes.get(node_id)?;
        Ok(ChatOutcome {
            turn: ChatTurn {
                response: response.content,
                node_id: node_id.to_string(),
                message_id: Some(assistant.id),
                branched: false,
                token_usage: TokenUsage {
                    total_tokens: history.total_tokens,
                },
                recommended_branches,
            },
            updated_node,
        })
    }

    /// The auto-reference preamble: announce, fork, summarise the parent,
    /// and hand back the node the turn should actually write to.
    async fn auto_reference(&self, session_id: &str, parent_id: &str) -> Result<String> {
        let parent = self
            .nodes
            .get(parent_id)?
            .ok_or_else(|| arbor_graph::StoreError::not_found("node", parent_id))?;

        self.hub.broadcast(
            session_id,
            &ServerEvent::CreatingReferenceNode {
                session_id: session_id.to_string(),
                parent_node_id: parent_id.to_string(),
                message: "Creating a reference node…".into(),
            },
            None,
        );

        let reference = self.nodes.create(
            session_id,
            NewNode {
                parent_id: Some(parent.id.clone()),
                title: format!("Continued: {}", parent.title),
                content: String::new(),
                node_type: NodeType::Reference,
                summary_content: None,
                source_node_ids: Some(vec![parent.id.clone()]),
                metadata: NodeMetadata::default(),
            },
        )?;

        self.hub.broadcast(
            session_id,
            &ServerEvent::ReferenceNodeCreated {
                session_id: session_id.to_string(),
                parent_node_id: parent_id.to_string(),
                reference_node: reference.clone(),
                edge: EdgeDescriptor::between(parent_id, &reference.id, "conversation continued"),
            },
            None,
        );

        if !has_summary(&parent) {
            self.hub.broadcast(
                session_id,
                &ServerEvent::GeneratingSummary {
                    session_id: session_id.to_string(),
                    node_id: parent_id.to_string(),
                    message: "Summarising the parent node…".into(),
                },
                None,
            );
            match self.summaries.summarize_parent_if_needed(parent_id).await {
                Ok(Some(summary)) => {
                    self.hub.broadcast(
                        session_id,
                        &ServerEvent::SummaryGenerated {
                            session_id: session_id.to_string(),
                            node_id: parent_id.to_string(),
                            summary,
                        },
                        None,
                    );
                }
                Ok(None) => {}
                Err(e) => warn!(parent_id, error = %e, "parent summary failed, continuing"),
            }
        }

        info!(parent_id, reference_id = %reference.id, "auto-reference fork");
        Ok(reference.id)
    }

    /// One streaming turn against a writable node.
    async fn stream_turn(
        &self,
        session_id: &str,
        node_id: &str,
        text: &str,
        auto_branch: bool,
    ) -> Result<()> {
        // A failed user-message insert aborts before any stream event.
        let user_message = self.messages.create(NewMessage {
            node_id: node_id.to_string(),
            role: Role::User,
            content: text.to_string(),
        })?;

        self.hub.broadcast(
            session_id,
            &ServerEvent::StreamStart {
                session_id: session_id.to_string(),
                node_id: node_id.to_string(),
                message_id: user_message.id.clone(),
            },
            None,
        );

        let history = self.assembler.assemble(node_id, true)?;
        let llm_messages = self.build_llm_messages(&history, node_id).await?;

        let (tx, mut rx) = mpsc::channel(STREAM_BUFFER);
        let llm = Arc::clone(&self.llm);
        let request = llm_messages.clone();
        let worker =
            tokio::spawn(async move { llm.stream(&request, CHAT_TEMPERATURE, tx).await });

        let mut full_response = String::new();
        let mut failure: Option<String> = None;
        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::TextDelta { text } => {
                    full_response.push_str(&text);
                    self.hub.broadcast(
                        session_id,
                        &ServerEvent::StreamChunk {
                            session_id: session_id.to_string(),
                            node_id: node_id.to_string(),
                            chunk: text,
                        },
                        None,
                    );
                }
                StreamEvent::Done { .. } => break,
                StreamEvent::Error { message } => {
                    failure = Some(message);
                    break;
                }
            }
        }
        // Unblock the worker before joining it, whatever state it is in.
        drop(rx);
        match worker.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                failure.get_or_insert_with(|| e.to_string());
            }
            Err(e) => {
                failure.get_or_insert_with(|| e.to_string());
            }
        }
        if failure.is_none() && full_response.trim().is_empty() {
            failure = Some("provider returned an empty completion".into());
        }

        // A partial reply is never persisted; the stream ends with the
        // error payload instead.
        if let Some(error) = failure {
            warn!(node_id, %error, "stream failed");
            self.hub.broadcast(
                session_id,
                &ServerEvent::StreamEnd {
                    session_id: session_id.to_string(),
                    node_id: node_id.to_string(),
                    message_id: None,
                    full_response: String::new(),
                    recommended_branches: Vec::new(),
                    error: Some(error),
                },
                None,
            );
            return Ok(());
        }

        let assistant = self.messages.create(NewMessage {
            node_id: node_id.to_string(),
            role: Role::Assistant,
            content: full_response.clone(),
        })?;

        let recommended_branches = if auto_branch {
            let mut conversation = llm_messages;
            conversation.push(ChatMessage::assistant(full_response.clone()));
            self.analyzer
                .analyze_and_store(&conversation, session_id, node_id, &assistant.id)
                .await
        } else {
            Vec::new()
        };

        self.hub.broadcast(
            session_id,
            &ServerEvent::StreamEnd {
                session_id: session_id.to_string(),
                node_id: node_id.to_string(),
                message_id: Some(assistant.id),
                full_response,
                recommended_branches,
                error: None,
            },
            None,
        );
        Ok(())
    }

    /// Turn an assembled history into the request message list: system
    /// instruction first, then the (possibly budget-collapsed) turns,
    /// capped to the most recent [`MAX_CONTEXT_MESSAGES`].
    async fn build_llm_messages(
        &self,
        history: &ConversationHistory,
        node_id: &str,
    ) -> Result<Vec<ChatMessage>> {
        let mut turns: Vec<ChatMessage>;

        if history.total_tokens > TOKEN_LIMIT {
            let (parent, current): (Vec<&Message>, Vec<&Message>) = history
                .messages
                .iter()
                .partition(|m| m.node_id != node_id);

            if parent.is_empty() {
                turns = current.into_iter().map(to_chat_message).collect();
            } else {
                info!(
                    node_id,
                    total_tokens = history.total_tokens,
                    "token budget exceeded, summarising parent context"
                );
                let contents: Vec<String> = parent
                    .iter()
                    .map(|m| format!("{}: {}", m.role, m.content))
                    .collect();
                match self.llm.summarize(&contents, None).await {
                    Ok(output) => {
                        turns = vec![ChatMessage::system(format!(
                            "Earlier context summary: {}",
                            output.summary
                        ))];
                        turns.extend(current.into_iter().map(to_chat_message));
                    }
                    Err(e) => {
                        warn!(node_id, error = %e, "budget summarisation failed, sending full history");
                        turns = history.messages.iter().map(to_chat_message).collect();
                    }
                }
            }
        } else {
            turns = history.messages.iter().map(to_chat_message).collect();
        }

        if turns.len() > MAX_CONTEXT_MESSAGES {
            turns.drain(..turns.len() - MAX_CONTEXT_MESSAGES);
        }

        let mut out = vec![ChatMessage::system(prompt::CHAT_SYSTEM_PROMPT)];
        out.extend(turns);
        Ok(out)
    }
}

fn has_summary(node: &Node) -> bool {
    node.summary_content.as_deref().is_some_and(|s| !s.is_empty())
}

fn to_chat_message(message: &Message) -> ChatMessage {
    match message.role {
        Role::User => ChatMessage::user(message.content.clone()),
        Role::Assistant => ChatMessage::assistant(message.content.clone()),
        Role::System => ChatMessage::system(message.content.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::sync::mpsc::Receiver;

    use arbor_agent::{AdapterError, BranchSuggestion, BranchType, ChatResponse, SummaryOutput};
    use arbor_core::ids::ConnId;
    use arbor_graph::types::NewSession;
    use arbor_graph::{GraphStore, RecommendationRepo, SessionRepo};

    /// Deterministic adapter that records every completion request.
    struct ScriptedAdapter {
        chunks: Vec<String>,
        fail_after: Option<usize>,
        summary: String,
        branches: Vec<BranchSuggestion>,
        requests: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl Default for ScriptedAdapter {
        fn default() -> Self {
            Self {
                chunks: vec!["Hel".into(), "lo".into()],
                fail_after: None,
                summary: "condensed context".into(),
                branches: Vec::new(),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmAdapter for ScriptedAdapter {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn chat(
            &self,
            messages: &[ChatMessage],
            _temperature: f32,
        ) -> std::result::Result<ChatResponse, AdapterError> {
            self.requests.lock().unwrap().push(messages.to_vec());
            Ok(ChatResponse {
                content: self.chunks.concat(),
                finish_reason: Some("stop".into()),
                usage: None,
            })
        }

        async fn stream(
            &self,
            messages: &[ChatMessage],
            _temperature: f32,
            tx: mpsc::Sender<StreamEvent>,
        ) -> std::result::Result<(), AdapterError> {
            self.requests.lock().unwrap().push(messages.to_vec());
            for (i, chunk) in self.chunks.iter().enumerate() {
                if self.fail_after == Some(i) {
                    let _ = tx
                        .send(StreamEvent::Error {
                            message: "provider unavailable".into(),
                        })
                        .await;
                    return Err(AdapterError::Stream("provider unavailable".into()));
                }
                let _ = tx
                    .send(StreamEvent::TextDelta {
                        text: chunk.clone(),
                    })
                    .await;
            }
            let _ = tx
                .send(StreamEvent::Done {
                    finish_reason: Some("stop".into()),
                })
                .await;
            Ok(())
        }

        async fn summarize(
            &self,
            _contents: &[String],
            _instructions: Option<&str>,
        ) -> std::result::Result<SummaryOutput, AdapterError> {
            Ok(SummaryOutput {
                title: "Summary".into(),
                summary: self.summary.clone(),
            })
        }

        async fn analyze_branches(
            &self,
            _messages: &[ChatMessage],
            _temperature: f32,
        ) -> std::result::Result<Vec<BranchSuggestion>, AdapterError> {
            Ok(self.branches.clone())
        }
    }

    struct Fixture {
        pipeline: ChatPipeline,
        nodes: NodeRepo,
        messages: MessageRepo,
        recommendations: RecommendationRepo,
        llm: Arc<ScriptedAdapter>,
        session_id: String,
        root: String,
        events: Receiver<String>,
    }

    fn fixture(adapter: ScriptedAdapter) -> Fixture {
        let store = Arc::new(GraphStore::open_in_memory().unwrap());
        let sessions = SessionRepo::new(Arc::clone(&store));
        let nodes = NodeRepo::new(Arc::clone(&store));
        let messages = MessageRepo::new(Arc::clone(&store));
        let recommendations = RecommendationRepo::new(Arc::clone(&store));

        let scripted = Arc::new(adapter);
        let llm: Arc<dyn LlmAdapter> = Arc::clone(&scripted) as Arc<dyn LlmAdapter>;
        let hub = Arc::new(SessionHub::new());
        let session = sessions
            .create(NewSession {
                title: "S".into(),
                ..Default::default()
            })
            .unwrap();

        let (tx, mut events) = mpsc::channel(arbor_hub::OUTBOUND_QUEUE_CAPACITY);
        hub.connect(&session.id, ConnId::new(), tx);
        // Discard the connection greeting.
        events.try_recv().unwrap();

        let assembler = ContextAssembler::new(nodes.clone(), messages.clone());
        let summaries = SummaryEngine::new(
            nodes.clone(),
            messages.clone(),
            Arc::clone(&llm),
            Arc::clone(&hub),
        );
        let analyzer = BranchAnalyzer::new(recommendations.clone(), Arc::clone(&llm));
        let pipeline = ChatPipeline::new(
            nodes.clone(),
            messages.clone(),
            assembler,
            summaries,
            analyzer,
            llm,
            hub,
        );

        Fixture {
            pipeline,
            nodes,
            messages,
            recommendations,
            llm: scripted,
            session_id: session.id,
            root: session.root_node_id,
            events,
        }
    }

    fn drain(events: &mut Receiver<String>) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        while let Ok(frame) = events.try_recv() {
            out.push(serde_json::from_str(&frame).unwrap());
        }
        out
    }

    fn types_of(events: &[serde_json::Value]) -> Vec<String> {
        events
            .iter()
            .map(|e| e["type"].as_str().unwrap().to_string())
            .collect()
    }

    #[tokio::test]
    async fn streaming_turn_emits_ordered_events_and_persists_both_sides() {
        let mut f = fixture(ScriptedAdapter::default());
        f.pipeline
            .chat_streaming(&f.session_id, &f.root, "hi there", false)
            .await
            .unwrap();

        let events = drain(&mut f.events);
        assert_eq!(
            types_of(&events),
            vec!["stream_start", "stream_chunk", "stream_chunk", "stream_end"]
        );
        let end = events.last().unwrap();
        assert_eq!(end["full_response"], "Hello");
        assert!(end["message_id"].is_string());
        assert!(end.get("error").is_none());

        let stored = f.messages.list_by_node(&f.root).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].role, Role::User);
        assert_eq!(stored[1].role, Role::Assistant);
        assert_eq!(stored[1].content, "Hello");
    }

    #[tokio::test]
    async fn chat_on_parent_forks_a_reference_node_before_streaming() {
        let mut f = fixture(ScriptedAdapter::default());
        // Root earns two messages and a child, so it is a parent without a
        // summary.
        f.messages
            .create(NewMessage {
                node_id: f.root.clone(),
                role: Role::User,
                content: "earlier question".into(),
            })
            .unwrap();
        f.messages
            .create(NewMessage {
                node_id: f.root.clone(),
                role: Role::Assistant,
                content: "earlier answer".into(),
            })
            .unwrap();
        f.nodes
            .create(
                &f.session_id,
                NewNode {
                    parent_id: Some(f.root.clone()),
                    title: "existing child".into(),
                    content: String::new(),
                    node_type: NodeType::Topic,
                    summary_content: None,
                    source_node_ids: None,
                    metadata: NodeMetadata::default(),
                },
            )
            .unwrap();
        drain(&mut f.events);

        f.pipeline
            .chat_streaming(&f.session_id, &f.root, "follow-up", false)
            .await
            .unwrap();

        let events = drain(&mut f.events);
        let types = types_of(&events);
        assert_eq!(
            types,
            vec![
                "creating_reference_node",
                "reference_node_created",
                "generating_summary",
                "summary_generated",
                "stream_start",
                "stream_chunk",
                "stream_chunk",
                "stream_end",
            ]
        );

        let created = &events[1]["reference_node"];
        let reference_id = created["id"].as_str().unwrap();
        assert_eq!(created["type"], "reference");
        assert_eq!(created["parent_id"], f.root.as_str());
        assert_eq!(created["source_node_ids"][0], f.root.as_str());
        assert_eq!(events[1]["edge"]["source"], f.root.as_str());
        assert_eq!(events[1]["edge"]["target"], reference_id);

        // The stream ran against the reference node, not the parent.
        assert_eq!(events[4]["node_id"], reference_id);

        let reference = f.nodes.get(reference_id).unwrap().unwrap();
        assert_eq!(reference.node_type, NodeType::Reference);
        assert_eq!(reference.parent_id.as_deref(), Some(f.root.as_str()));

        let parent = f.nodes.get(&f.root).unwrap().unwrap();
        assert_eq!(parent.summary_content.as_deref(), Some("condensed context"));
    }

    #[tokio::test]
    async fn token_budget_collapses_parent_history_into_one_system_message() {
        let adapter = ScriptedAdapter::default();
        let f = fixture(adapter);
        let long = "word ".repeat(3000);
        f.messages
            .create(NewMessage {
                node_id: f.root.clone(),
                role: Role::User,
                content: long.clone(),
            })
            .unwrap();
        let child = f
            .nodes
            .create(
                &f.session_id,
                NewNode {
                    parent_id: Some(f.root.clone()),
                    title: "child".into(),
                    content: String::new(),
                    node_type: NodeType::Topic,
                    summary_content: None,
                    source_node_ids: None,
                    metadata: NodeMetadata::default(),
                },
            )
            .unwrap();

        f.pipeline
            .chat_streaming(&f.session_id, &child.id, "short question", false)
            .await
            .unwrap();

        let requests = f.llm.requests.lock().unwrap();
        let request = requests.last().unwrap();

        let collapsed: Vec<_> = request
            .iter()
            .filter(|m| m.content.starts_with("Earlier context summary:"))
            .collect();
        assert_eq!(collapsed.len(), 1);
        assert!(collapsed[0].content.contains("condensed context"));

        // The oversized parent transcript itself must be gone, while the
        // current node's message is still there verbatim.
        assert!(!request.iter().any(|m| m.content.contains("word word")));
        assert!(request.iter().any(|m| m.content == "short question"));
    }

    #[tokio::test]
    async fn stream_failure_emits_error_end_and_skips_assistant_persist() {
        let mut f = fixture(ScriptedAdapter {
            fail_after: Some(1),
            ..Default::default()
        });
        f.pipeline
            .chat_streaming(&f.session_id, &f.root, "hi", false)
            .await
            .unwrap();

        let events = drain(&mut f.events);
        assert_eq!(
            types_of(&events),
            vec!["stream_start", "stream_chunk", "stream_end"]
        );
        let end = events.last().unwrap();
        assert_eq!(end["error"], "provider unavailable");
        assert_eq!(end["message_id"], serde_json::Value::Null);

        // Only the user message survives a failed stream.
        let stored = f.messages.list_by_node(&f.root).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].role, Role::User);
    }

    #[tokio::test]
    async fn auto_branch_persists_recommendations_and_ships_them() {
        let mut f = fixture(ScriptedAdapter {
            branches: vec![
                BranchSuggestion {
                    title: "Dig into error handling strategies".into(),
                    branch_type: BranchType::Details,
                    description: "d1".into(),
                    priority: None,
                    estimated_depth: None,
                },
                BranchSuggestion {
                    title: "Alternative designs".into(),
                    branch_type: BranchType::Alternatives,
                    description: "d2".into(),
                    priority: Some(0.5),
                    estimated_depth: Some(4),
                },
            ],
            ..Default::default()
        });

        f.pipeline
            .chat_streaming(&f.session_id, &f.root, "hi", true)
            .await
            .unwrap();

        let events = drain(&mut f.events);
        let end = events.last().unwrap();
        let shipped = end["recommended_branches"].as_array().unwrap();
        assert_eq!(shipped.len(), 2);
        assert!(shipped[0]["id"].is_string());
        assert_eq!(shipped[0]["priority"], 0.8);
        assert_eq!(shipped[0]["edge_label"], "Dig into error handl");
        assert_eq!(shipped[1]["priority"], 0.5);
        assert_eq!(shipped[1]["estimated_depth"], 4);

        let message_id = end["message_id"].as_str().unwrap();
        let persisted = f.recommendations.list_by_message(message_id).unwrap();
        assert_eq!(persisted.len(), 2);
    }

    #[tokio::test]
    async fn non_streaming_chat_returns_the_turn() {
        let f = fixture(ScriptedAdapter::default());
        let outcome = f
            .pipeline
            .chat(&f.session_id, &f.root, "hello", false)
            .await
            .unwrap();

        assert_eq!(outcome.turn.response, "Hello");
        assert!(outcome.turn.message_id.is_some());
        let node = outcome.updated_node.unwrap();
        assert_eq!(node.message_count, 2);
    }
}
