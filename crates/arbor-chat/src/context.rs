//! Context assembly — walks the graph from a target node upward to build
//! the message list fed to the LLM.
//!
//! Summary nodes act as boundaries: the walk stops at (and includes) the
//! first summary-typed ancestor, so the compressed form stands in for
//! everything above it. Reference nodes pull in their parent's context and
//! the partial chains of every source node, deduplicated and re-sorted by
//! time.

use std::collections::HashSet;

use arbor_graph::tokens;
use arbor_graph::types::{Message, Node, NodeType};
use arbor_graph::{MessageRepo, NodeRepo};

use crate::error::Result;

/// Ordered message list plus the budget inputs derived from it.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    pub messages: Vec<Message>,
    pub total_tokens: i64,
    pub is_summarized: bool,
}

#[derive(Clone)]
pub struct ContextAssembler {
    nodes: NodeRepo,
    messages: MessageRepo,
}

impl ContextAssembler {
    pub fn new(nodes: NodeRepo, messages: MessageRepo) -> Self {
        Self { nodes, messages }
    }

    /// Assemble the conversation context for `node_id`.
    ///
    /// Deterministic for a fixed graph snapshot; the result is strictly
    /// time-ordered and free of duplicate message ids.
    pub fn assemble(&self, node_id: &str, include_ancestors: bool) -> Result<ConversationHistory> {
        let Some(node) = self.nodes.get(node_id)? else {
            return Err(arbor_graph::StoreError::not_found("node", node_id).into());
        };

        if node.node_type == NodeType::Reference {
            return self.assemble_reference(&node);
        }

        if !include_ancestors {
            let messages = self.messages.list_by_node(node_id)?;
            return Ok(finish(messages, false));
        }

        let (chain, halted) = self.chain_to_summary(&node)?;
        let messages = self.messages.list_by_nodes(&chain)?;
        Ok(finish(messages, halted))
    }

    /// Reference nodes merge three strands: the parent's recursively
    /// assembled context, each source node's chain up to its summary
    /// boundary, and the reference node's own messages.
    fn assemble_reference(&self, node: &Node) -> Result<ConversationHistory> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut collected: Vec<Message> = Vec::new();
        let mut is_summarized = false;

        if let Some(parent_id) = &node.parent_id {
            let parent_history = self.assemble(parent_id, true)?;
            is_summarized |= parent_history.is_summarized;
            for message in parent_history.messages {
                if seen.insert(message.id.clone()) {
                    collected.push(message);
                }
            }
        }

        let mut source_ids = node.source_node_ids.clone().unwrap_or_default();
        if source_ids.is_empty() {
            source_ids = self.nodes.sources_of(&node.id)?;
        }

        for source_id in &source_ids {
            let Some(source) = self.nodes.get(source_id)? else {
                continue;
            };
            let (chain, halted) = self.chain_to_summary(&source)?;
            is_summarized |= halted;
            for message in self.messages.list_by_nodes(&chain)? {
                if seen.insert(message.id.clone()) {
                    collected.push(message);
                }
            }
        }

        for message in self.messages.list_by_node(&node.id)? {
            if seen.insert(message.id.clone()) {
                collected.push(message);
            }
        }

        collected.sort_by_key(|m| m.timestamp);
        Ok(finish(collected, is_summarized))
    }

    /// Node ids from `node` root-ward, stopping at (and including) the
    /// first summary-typed member. Returns whether the walk halted early.
    fn chain_to_summary(&self, node: &Node) -> Result<(Vec<String>, bool)> {
        let mut chain = vec![node.id.clone()];
        if is_summary(node) {
            return Ok((chain, true));
        }

        let mut ancestors = self.nodes.ancestors(&node.id)?;
        ancestors.reverse();
        for ancestor in ancestors {
            let halt = is_summary(&ancestor);
            chain.push(ancestor.id);
            if halt {
                return Ok((chain, true));
            }
        }
        Ok((chain, false))
    }
}

fn is_summary(node: &Node) -> bool {
    node.is_summary || node.node_type == NodeType::Summary
}

fn finish(messages: Vec<Message>, is_summarized: bool) -> ConversationHistory {
    let total_tokens = messages.iter().map(|m| tokens::estimate(&m.content)).sum();
    ConversationHistory {
        messages,
        total_tokens,
        is_summarized,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use arbor_graph::types::{NewMessage, NewNode, NewSession, NodeMetadata, Role};
    use arbor_graph::{GraphStore, SessionRepo};

    struct Graph {
        assembler: ContextAssembler,
        nodes: NodeRepo,
        messages: MessageRepo,
        session_id: String,
        root: String,
    }

    fn graph() -> Graph {
        let store = Arc::new(GraphStore::open_in_memory().unwrap());
        let sessions = SessionRepo::new(Arc::clone(&store));
        let nodes = NodeRepo::new(Arc::clone(&store));
        let messages = MessageRepo::new(Arc::clone(&store));
        let session = sessions
            .create(NewSession {
                title: "S".into(),
                ..Default::default()
            })
            .unwrap();
        Graph {
            assembler: ContextAssembler::new(nodes.clone(), messages.clone()),
            nodes,
            messages,
            session_id: session.id,
            root: session.root_node_id,
        }
    }

    impl Graph {
        fn node(&self, parent: &str, title: &str, node_type: NodeType) -> String {
            self.nodes
                .create(
                    &self.session_id,
                    NewNode {
                        parent_id: Some(parent.to_string()),
                        title: title.to_string(),
                        content: String::new(),
                        node_type,
                        summary_content: None,
                        source_node_ids: if node_type == NodeType::Reference {
                            Some(vec![parent.to_string()])
                        } else {
                            None
                        },
                        metadata: NodeMetadata::default(),
                    },
                )
                .unwrap()
                .id
        }

        fn say(&self, node: &str, content: &str) -> String {
            self.messages
                .create(NewMessage {
                    node_id: node.to_string(),
                    role: Role::User,
                    content: content.to_string(),
                })
                .unwrap()
                .id
        }

        fn contents(&self, node: &str, include_ancestors: bool) -> Vec<String> {
            self.assembler
                .assemble(node, include_ancestors)
                .unwrap()
                .messages
                .into_iter()
                .map(|m| m.content)
                .collect()
        }
    }

    #[test]
    fn node_without_ancestors_yields_own_messages() {
        let g = graph();
        g.say(&g.root, "hello");
        let history = g.assembler.assemble(&g.root, true).unwrap();
        assert_eq!(history.messages.len(), 1);
        assert!(!history.is_summarized);
        assert_eq!(history.total_tokens, tokens::estimate("hello"));
    }

    #[test]
    fn ancestors_are_included_in_time_order() {
        let g = graph();
        g.say(&g.root, "root says");
        let child = g.node(&g.root, "child", NodeType::Topic);
        g.say(&child, "child says");

        assert_eq!(g.contents(&child, true), vec!["root says", "child says"]);
        assert_eq!(g.contents(&child, false), vec!["child says"]);
    }

    #[test]
    fn walk_stops_inclusively_at_summary_ancestor() {
        let g = graph();
        g.say(&g.root, "ancient history");
        // A floating summary over the root, then a branch growing below it.
        let summary = g
            .nodes
            .create_summary(&[g.root.clone()], false, None)
            .unwrap()
            .id;
        g.say(&summary, "the summary text");
        let below = g.node(&summary, "below", NodeType::Topic);
        g.say(&below, "new question");

        let history = g.assembler.assemble(&below, true).unwrap();
        let contents: Vec<_> = history.messages.iter().map(|m| m.content.clone()).collect();
        assert!(history.is_summarized);
        assert_eq!(contents, vec!["the summary text", "new question"]);
        assert!(!contents.contains(&"ancient history".to_string()));
    }

    #[test]
    fn reference_merges_parent_and_sources_without_duplicates() {
        let g = graph();
        g.say(&g.root, "shared root");
        let parent = g.node(&g.root, "parent", NodeType::Topic);
        g.say(&parent, "parent talk");
        let reference = g.node(&parent, "ref", NodeType::Reference);
        g.say(&reference, "continued here");

        // Parent context and the source chain overlap entirely; every
        // message must appear exactly once, in time order.
        assert_eq!(
            g.contents(&reference, true),
            vec!["shared root", "parent talk", "continued here"]
        );
    }

    #[test]
    fn reference_source_walk_respects_summary_boundary() {
        let g = graph();
        g.say(&g.root, "beyond the boundary");
        let summary = g
            .nodes
            .create_summary(&[g.root.clone()], false, None)
            .unwrap()
            .id;
        g.say(&summary, "compressed");
        let mid = g.node(&summary, "mid", NodeType::Topic);
        g.say(&mid, "mid talk");

        // A floating reference whose single source sits below the summary.
        let reference = g
            .nodes
            .create_reference(&[mid.clone()], None, None)
            .unwrap()
            .id;
        g.say(&reference, "ref talk");

        let history = g.assembler.assemble(&reference, true).unwrap();
        let contents: Vec<_> = history.messages.iter().map(|m| m.content.clone()).collect();
        assert!(history.is_summarized);
        assert_eq!(contents, vec!["compressed", "mid talk", "ref talk"]);
    }

    #[test]
    fn assembly_is_deterministic() {
        let g = graph();
        g.say(&g.root, "one");
        let child = g.node(&g.root, "child", NodeType::Topic);
        g.say(&child, "two");

        let first = g.contents(&child, true);
        let second = g.contents(&child, true);
        assert_eq!(first, second);
    }

    #[test]
    fn unknown_node_is_an_error() {
        let g = graph();
        assert!(g.assembler.assemble("missing", true).is_err());
    }
}
