//! Summary generation — a synchronous placeholder plus an asynchronous
//! fill, and the parent auto-summary that runs when a node becomes a
//! parent.

use std::sync::Arc;

use tracing::{info, warn};

use arbor_agent::LlmAdapter;
use arbor_graph::tokens;
use arbor_graph::types::{NewMessage, Node, Role};
use arbor_graph::{MessageRepo, NodeRepo};
use arbor_hub::SessionHub;
use arbor_protocol::events::ParentSummary;
use arbor_protocol::ServerEvent;

use crate::error::Result;

/// Minimum messages a node needs before an auto-summary is worth running.
const AUTO_SUMMARY_MIN_MESSAGES: usize = 2;

#[derive(Clone)]
pub struct SummaryEngine {
    nodes: NodeRepo,
    messages: MessageRepo,
    llm: Arc<dyn LlmAdapter>,
    hub: Arc<SessionHub>,
}

impl SummaryEngine {
    pub fn new(
        nodes: NodeRepo,
        messages: MessageRepo,
        llm: Arc<dyn LlmAdapter>,
        hub: Arc<SessionHub>,
    ) -> Self {
        Self {
            nodes,
            messages,
            llm,
            hub,
        }
    }

    /// Create a summary node over `source_ids`.
    ///
    /// Returns the placeholder immediately (`is_generating = true`); the
    /// LLM fill runs in a background task and broadcasts
    /// `summary_completed` when the node is updated.
    pub fn create_summary(
        &self,
        source_ids: &[String],
        is_manual: bool,
        instructions: Option<String>,
    ) -> Result<Node> {
        let placeholder =
            self.nodes
                .create_summary(source_ids, is_manual, instructions.as_deref())?;

        let mut sources = Vec::new();
        for source_id in source_ids {
            if let Some(node) = self.nodes.get(source_id)? {
                sources.push(node);
            }
        }

        let engine = self.clone();
        let node = placeholder.clone();
        tokio::spawn(async move {
            engine.fill(node, sources, instructions).await;
        });

        Ok(placeholder)
    }

    /// Background half of `create_summary`. Whatever happens, the node
    /// must not stay in `is_generating = true`.
    async fn fill(&self, node: Node, sources: Vec<Node>, instructions: Option<String>) {
        let contents: Vec<String> = sources.iter().map(render_source).collect();

        match self.llm.summarize(&contents, instructions.as_deref()).await {
            Ok(output) => {
                if let Err(e) = self.nodes.finish_summary(&node.id, &output.title, &output.summary)
                {
                    warn!(node_id = %node.id, error = %e, "summary node update failed");
                    return;
                }
                // The summary becomes a message too, so context assembly
                // picks it up when the walk halts at this node.
                if let Err(e) = self.messages.create(NewMessage {
                    node_id: node.id.clone(),
                    role: Role::Assistant,
                    content: output.summary.clone(),
                }) {
                    warn!(node_id = %node.id, error = %e, "summary message insert failed");
                }

                info!(node_id = %node.id, "summary generated");
                self.hub.broadcast(
                    &node.session_id,
                    &ServerEvent::SummaryCompleted {
                        session_id: node.session_id.clone(),
                        node_id: node.id.clone(),
                        title: output.title,
                        content: output.summary,
                        is_generating: false,
                    },
                    None,
                );
            }
            Err(e) => {
                warn!(node_id = %node.id, error = %e, "summary generation failed");
                let diagnostic = match &instructions {
                    Some(instructions) => format!("[summary failed] {instructions}"),
                    None => format!("Failed to summarise {} source nodes: {e}", sources.len()),
                };
                if let Err(e) = self.nodes.fail_summary(&node.id, &diagnostic) {
                    warn!(node_id = %node.id, error = %e, "failed summary node could not be marked");
                }
            }
        }
    }

    /// Parent auto-summary: when a node becomes a parent and has no
    /// `summary_content` yet but at least two messages, compress its
    /// conversation into the node itself.
    ///
    /// Returns `None` when nothing needed doing.
    pub async fn summarize_parent_if_needed(
        &self,
        parent_id: &str,
    ) -> Result<Option<ParentSummary>> {
        let Some(parent) = self.nodes.get(parent_id)? else {
            return Ok(None);
        };
        if parent
            .summary_content
            .as_deref()
            .is_some_and(|s| !s.is_empty())
        {
            return Ok(None);
        }

        let messages = self.messages.list_by_node(parent_id)?;
        if messages.len() < AUTO_SUMMARY_MIN_MESSAGES {
            return Ok(None);
        }

        let transcript: Vec<String> = messages
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect();
        let output = self.llm.summarize(&transcript, None).await?;
        self.nodes.set_summary_content(parent_id, &output.summary)?;

        info!(parent_id, "parent auto-summary stored");
        Ok(Some(ParentSummary {
            token_count: tokens::estimate(&output.summary),
            original_message_count: messages.len(),
            summary: output.summary,
        }))
    }

    /// Fire-and-forget variant used on plain node creation. Failure is
    /// logged and otherwise ignored.
    pub fn spawn_parent_summary(&self, parent_id: String) {
        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.summarize_parent_if_needed(&parent_id).await {
                warn!(%parent_id, error = %e, "parent auto-summary failed");
            }
        });
    }
}

fn render_source(node: &Node) -> String {
    let title = if node.title.is_empty() {
        "Untitled"
    } else {
        node.title.as_str()
    };
    if node.content.is_empty() {
        format!("[{title}]")
    } else {
        format!("[{title}]\n{}", node.content)
    }
}
