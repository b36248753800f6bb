use std::collections::HashMap;
use std::sync::Arc;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{info, instrument, warn};

use arbor_core::ids;

use crate::error::{Result, StoreError};
use crate::record::{self, decode_node, NODE_COLS};
use crate::schema::labels;
use crate::store::{link, GraphStore};
use crate::tokens;
use crate::types::{
    DeleteResult, NewNode, Node, NodeMetadata, NodePatch, NodeRelations, NodeTree, NodeType,
};

/// Placeholder title shown while a summary node is being filled in.
pub const SUMMARY_PLACEHOLDER_TITLE: &str = "Summary in progress…";
/// Placeholder body for a freshly created summary node.
pub const SUMMARY_PLACEHOLDER_CONTENT: &str =
    "The summary is being generated. Check back in a moment…";
/// Title applied when summary generation fails.
pub const SUMMARY_FAILED_TITLE: &str = "Summary failed";

/// Entity-level access to conversation nodes.
///
/// Enforces the structural invariants on every write: depth follows
/// parentage, `HAS_CHILD` stays a forest, summary/reference nodes carry
/// same-session sources with their relation edges created atomically.
#[derive(Clone)]
pub struct NodeRepo {
    store: Arc<GraphStore>,
}

impl NodeRepo {
    pub fn new(store: Arc<GraphStore>) -> Self {
        Self { store }
    }

    /// Create a node under `session_id`.
    ///
    /// Parented nodes get `depth = parent.depth + 1` and a `HAS_CHILD` edge;
    /// floating summary/reference nodes stay at depth 0. Source relations
    /// (`SUMMARIZED_TO` / `REFERENCED_BY`) are created in the same
    /// transaction as the node.
    #[instrument(skip(self, new), fields(title = %new.title, node_type = %new.node_type))]
    pub fn create(&self, session_id: &str, new: NewNode) -> Result<Node> {
        let aggregates = matches!(new.node_type, NodeType::Summary | NodeType::Reference);
        let sources = new.source_node_ids.clone().unwrap_or_default();
        if aggregates && sources.is_empty() {
            return Err(StoreError::Conflict(format!(
                "{} nodes require source_node_ids",
                new.node_type
            )));
        }
        if !aggregates && !sources.is_empty() {
            return Err(StoreError::Conflict(
                "source_node_ids are only valid for summary and reference nodes".into(),
            ));
        }

        let node_id = ids::new_id();
        let now = ids::now();
        let ts = now.to_rfc3339();

        let mut conn = self.store.conn();
        let tx = conn.transaction()?;

        session_exists(&tx, session_id)?;

        let depth = match &new.parent_id {
            Some(parent_id) => {
                let (parent_session, parent_depth) = node_brief(&tx, parent_id)?
                    .ok_or_else(|| StoreError::not_found("node", parent_id.clone()))?;
                if parent_session != session_id {
                    return Err(StoreError::Conflict(format!(
                        "parent {parent_id} belongs to another session"
                    )));
                }
                parent_depth + 1
            }
            None => 0,
        };

        for source_id in &sources {
            let (source_session, _) = node_brief(&tx, source_id)?
                .ok_or_else(|| StoreError::not_found("node", source_id.clone()))?;
            if source_session != session_id {
                return Err(StoreError::Conflict(format!(
                    "source {source_id} belongs to another session"
                )));
            }
        }

        let is_summary = new.node_type == NodeType::Summary;
        let source_json = if sources.is_empty() {
            None
        } else {
            Some(record::encode_string_list(&sources))
        };

        tx.execute(
            "INSERT INTO nodes
             (id, session_id, parent_id, title, content, type, depth, is_active, is_summary,
              is_generating, summary_content, source_node_ids, metadata, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8, 0, ?9, ?10, ?11, ?12, ?12)",
            params![
                node_id,
                session_id,
                new.parent_id,
                new.title,
                new.content,
                new.node_type.as_str(),
                depth,
                is_summary,
                new.summary_content,
                source_json,
                record::encode_node_metadata(&new.metadata),
                ts,
            ],
        )?;

        link(&tx, session_id, labels::HAS_NODE, &node_id)?;
        if let Some(parent_id) = &new.parent_id {
            link(&tx, parent_id, labels::HAS_CHILD, &node_id)?;
        }
        let source_label = match new.node_type {
            NodeType::Summary => labels::SUMMARIZED_TO,
            _ => labels::REFERENCED_BY,
        };
        for source_id in &sources {
            link(&tx, source_id, source_label, &node_id)?;
        }

        bump_session_nodes(&tx, session_id, 1, &ts)?;
        tx.commit()?;

        Ok(Node {
            id: node_id,
            session_id: session_id.to_string(),
            parent_id: new.parent_id,
            title: new.title,
            content: new.content,
            node_type: new.node_type,
            depth,
            is_active: true,
            is_summary,
            is_generating: false,
            summary_content: new.summary_content,
            source_node_ids: if sources.is_empty() { None } else { Some(sources) },
            message_count: 0,
            token_count: 0,
            metadata: new.metadata,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn get(&self, node_id: &str) -> Result<Option<Node>> {
        let conn = self.store.conn();
        let node = conn
            .query_row(
                &format!("SELECT {NODE_COLS} FROM nodes WHERE id = ?1"),
                params![node_id],
                decode_node,
            )
            .optional()?;
        Ok(node)
    }

    pub fn list(&self, session_id: &str, skip: usize, limit: usize) -> Result<Vec<Node>> {
        let conn = self.store.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {NODE_COLS} FROM nodes WHERE session_id = ?1
             ORDER BY created_at, rowid LIMIT ?2 OFFSET ?3"
        ))?;
        let result = collect_nodes(stmt.query_map(params![session_id, limit as i64, skip as i64], decode_node)?);
        result
    }

    /// Direct children in creation order.
    pub fn children(&self, node_id: &str) -> Result<Vec<Node>> {
        let conn = self.store.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {NODE_COLS} FROM nodes n
             JOIN edges e ON e.dst = n.id
             WHERE e.label = 'HAS_CHILD' AND e.src = ?1
             ORDER BY n.created_at, n.rowid"
        ))?;
        let result = collect_nodes(stmt.query_map(params![node_id], decode_node)?);
        result
    }

    /// O(1) existence check for outgoing `HAS_CHILD` edges.
    pub fn has_children(&self, node_id: &str) -> Result<bool> {
        let conn = self.store.conn();
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM edges WHERE label = 'HAS_CHILD' AND src = ?1)",
            params![node_id],
            |r| r.get(0),
        )?;
        Ok(exists)
    }

    /// All ancestors of a node, root first.
    pub fn ancestors(&self, node_id: &str) -> Result<Vec<Node>> {
        let conn = self.store.conn();
        let mut stmt = conn.prepare(&format!(
            "WITH RECURSIVE up(id) AS (
                 SELECT e.src FROM edges e WHERE e.label = 'HAS_CHILD' AND e.dst = ?1
                 UNION
                 SELECT e.src FROM edges e JOIN up ON e.dst = up.id
                 WHERE e.label = 'HAS_CHILD'
             )
             SELECT {NODE_COLS} FROM nodes WHERE id IN (SELECT id FROM up)
             ORDER BY depth ASC"
        ))?;
        let result = collect_nodes(stmt.query_map(params![node_id], decode_node)?);
        result
    }

    /// Transitive children, shallowest first; `max_depth` bounds the walk.
    pub fn descendants(&self, node_id: &str, max_depth: Option<i64>) -> Result<Vec<Node>> {
        let conn = self.store.conn();
        match max_depth {
            Some(max_depth) => {
                let mut stmt = conn.prepare(&format!(
                    "WITH RECURSIVE down(id, lvl) AS (
                         SELECT e.dst, 1 FROM edges e
                         WHERE e.label = 'HAS_CHILD' AND e.src = ?1
                         UNION
                         SELECT e.dst, down.lvl + 1 FROM edges e
                         JOIN down ON e.src = down.id
                         WHERE e.label = 'HAS_CHILD' AND down.lvl < ?2
                     )
                     SELECT {NODE_COLS} FROM nodes WHERE id IN (SELECT id FROM down)
                     ORDER BY depth ASC, created_at ASC, rowid ASC"
                ))?;
                let result = collect_nodes(stmt.query_map(params![node_id, max_depth], decode_node)?);
                result
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "WITH RECURSIVE down(id) AS (
                         SELECT e.dst FROM edges e
                         WHERE e.label = 'HAS_CHILD' AND e.src = ?1
                         UNION
                         SELECT e.dst FROM edges e JOIN down ON e.src = down.id
                         WHERE e.label = 'HAS_CHILD'
                     )
                     SELECT {NODE_COLS} FROM nodes WHERE id IN (SELECT id FROM down)
                     ORDER BY depth ASC, created_at ASC, rowid ASC"
                ))?;
                let result = collect_nodes(stmt.query_map(params![node_id], decode_node)?);
                result
            }
        }
    }

    /// Root → self, inclusive. Empty when the node does not exist.
    pub fn path(&self, node_id: &str) -> Result<Vec<Node>> {
        let Some(current) = self.get(node_id)? else {
            return Ok(Vec::new());
        };
        let mut path = self.ancestors(node_id)?;
        path.push(current);
        Ok(path)
    }

    /// Nodes of a session with no children, newest first.
    pub fn leaves(&self, session_id: &str) -> Result<Vec<Node>> {
        let conn = self.store.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {NODE_COLS} FROM nodes n
             WHERE n.session_id = ?1
               AND NOT EXISTS (
                   SELECT 1 FROM edges e WHERE e.label = 'HAS_CHILD' AND e.src = n.id
               )
             ORDER BY n.created_at DESC, n.rowid DESC"
        ))?;
        let result = collect_nodes(stmt.query_map(params![session_id], decode_node)?);
        result
    }

    /// Current node plus ancestors, descendants, siblings, and root path.
    pub fn relations(&self, node_id: &str) -> Result<NodeRelations> {
        let Some(current) = self.get(node_id)? else {
            return Ok(NodeRelations {
                current: None,
                ancestors: Vec::new(),
                descendants: Vec::new(),
                siblings: Vec::new(),
                path: Vec::new(),
            });
        };

        let ancestors = self.ancestors(node_id)?;
        let descendants = self.descendants(node_id, None)?;
        let siblings = match &current.parent_id {
            Some(parent_id) => self
                .children(parent_id)?
                .into_iter()
                .filter(|n| n.id != node_id)
                .collect(),
            None => Vec::new(),
        };
        let mut path = ancestors.clone();
        path.push(current.clone());

        Ok(NodeRelations {
            current: Some(current),
            ancestors,
            descendants,
            siblings,
            path,
        })
    }

    /// Recursive tree view rooted at `node_id`.
    pub fn tree(&self, node_id: &str) -> Result<Option<NodeTree>> {
        let Some(node) = self.get(node_id)? else {
            return Ok(None);
        };
        Ok(Some(self.build_tree(node)?))
    }

    fn build_tree(&self, node: Node) -> Result<NodeTree> {
        let mut children = Vec::new();
        for child in self.children(&node.id)? {
            children.push(self.build_tree(child)?);
        }
        Ok(NodeTree { node, children })
    }

    /// Token total of the node and its ancestors — the cost of assembling
    /// context at this node.
    pub fn context_tokens(&self, node_id: &str) -> Result<i64> {
        let conn = self.store.conn();
        let total: i64 = conn.query_row(
            "WITH RECURSIVE up(id) AS (
                 SELECT ?1
                 UNION
                 SELECT e.src FROM edges e JOIN up ON e.dst = up.id
                 WHERE e.label = 'HAS_CHILD'
             )
             SELECT COALESCE(SUM(token_count), 0) FROM nodes
             WHERE id IN (SELECT id FROM up)",
            params![node_id],
            |r| r.get(0),
        )?;
        Ok(total)
    }

    /// Partial update of the mutable node fields.
    pub fn update(&self, node_id: &str, patch: NodePatch) -> Result<Option<Node>> {
        let conn = self.store.conn();
        let Some(mut node) = conn
            .query_row(
                &format!("SELECT {NODE_COLS} FROM nodes WHERE id = ?1"),
                params![node_id],
                decode_node,
            )
            .optional()?
        else {
            return Ok(None);
        };

        if patch.is_empty() {
            return Ok(Some(node));
        }

        if let Some(title) = patch.title {
            node.title = title;
        }
        if let Some(is_active) = patch.is_active {
            node.is_active = is_active;
        }
        if let Some(metadata) = patch.metadata {
            node.metadata = metadata;
        }
        if let Some(summary_content) = patch.summary_content {
            node.summary_content = Some(summary_content);
        }
        if let Some(is_generating) = patch.is_generating {
            node.is_generating = is_generating;
        }
        node.updated_at = ids::now();

        conn.execute(
            "UPDATE nodes SET title = ?1, is_active = ?2, metadata = ?3,
                 summary_content = ?4, is_generating = ?5, updated_at = ?6
             WHERE id = ?7",
            params![
                node.title,
                node.is_active,
                record::encode_node_metadata(&node.metadata),
                node.summary_content,
                node.is_generating,
                node.updated_at.to_rfc3339(),
                node_id,
            ],
        )?;
        Ok(Some(node))
    }

    /// Batch delete. With `cascade`, each node takes its whole subtree and
    /// the subtree's messages along; without, children are orphaned
    /// (`parent_id` cleared) and survive. Partial success is surfaced
    /// verbatim — unknown ids land in `failed` without failing the batch.
    #[instrument(skip(self, node_ids), fields(count = node_ids.len(), cascade))]
    pub fn delete(&self, node_ids: &[String], cascade: bool) -> Result<DeleteResult> {
        let mut result = DeleteResult::default();
        let mut per_session: HashMap<String, i64> = HashMap::new();
        let ts = ids::now().to_rfc3339();

        let mut conn = self.store.conn();
        let tx = conn.transaction()?;

        for node_id in node_ids {
            let Some((session_id, _)) = node_brief(&tx, node_id)? else {
                warn!(%node_id, "delete skipped: node not found");
                result.failed.push(node_id.clone());
                continue;
            };

            if cascade {
                let descendant_ids = descendant_ids(&tx, node_id)?;
                for id in descendant_ids.iter().chain(std::iter::once(node_id)) {
                    delete_single(&tx, id)?;
                    result.deleted.push(id.clone());
                }
                *per_session.entry(session_id).or_insert(0) +=
                    descendant_ids.len() as i64 + 1;
                result.cascaded.insert(node_id.clone(), descendant_ids);
            } else {
                tx.execute(
                    "UPDATE nodes SET parent_id = NULL WHERE parent_id = ?1",
                    params![node_id],
                )?;
                tx.execute(
                    "DELETE FROM edges WHERE label = 'HAS_CHILD' AND src = ?1",
                    params![node_id],
                )?;
                delete_single(&tx, node_id)?;
                result.deleted.push(node_id.clone());
                *per_session.entry(session_id).or_insert(0) += 1;
            }
        }

        for (session_id, removed) in &per_session {
            tx.execute(
                "UPDATE sessions SET node_count = MAX(node_count - ?1, 0), updated_at = ?2
                 WHERE id = ?3",
                params![removed, ts, session_id],
            )?;
        }
        tx.commit()?;

        result.deleted_count = result.deleted.len();
        info!(
            deleted = result.deleted_count,
            failed = result.failed.len(),
            "node delete finished"
        );
        Ok(result)
    }

    /// Create a floating summary placeholder over `source_ids`.
    ///
    /// Returns immediately with `is_generating = true`; the caller fills the
    /// node in asynchronously via [`NodeRepo::finish_summary`].
    #[instrument(skip(self, source_ids, instructions), fields(sources = source_ids.len()))]
    pub fn create_summary(
        &self,
        source_ids: &[String],
        is_manual: bool,
        instructions: Option<&str>,
    ) -> Result<Node> {
        self.create_aggregate(
            source_ids,
            NodeType::Summary,
            SUMMARY_PLACEHOLDER_TITLE,
            SUMMARY_PLACEHOLDER_CONTENT,
            NodeMetadata::with_extra(&[
                ("is_manual", serde_json::json!(is_manual)),
                ("instructions", serde_json::json!(instructions)),
                ("source_count", serde_json::json!(source_ids.len())),
            ]),
        )
    }

    /// Create a floating reference node over `source_ids`.
    #[instrument(skip(self, source_ids, title, content), fields(sources = source_ids.len()))]
    pub fn create_reference(
        &self,
        source_ids: &[String],
        title: Option<&str>,
        content: Option<&str>,
    ) -> Result<Node> {
        let default_title = format!("Reference ({} nodes)", source_ids.len());
        let default_content = format!("Reference to {} selected nodes", source_ids.len());
        self.create_aggregate(
            source_ids,
            NodeType::Reference,
            title.unwrap_or(&default_title),
            content.unwrap_or(&default_content),
            NodeMetadata::with_extra(&[(
                "referenced_node_ids",
                serde_json::json!(source_ids),
            )]),
        )
    }

    fn create_aggregate(
        &self,
        source_ids: &[String],
        node_type: NodeType,
        title: &str,
        content: &str,
        metadata: NodeMetadata,
    ) -> Result<Node> {
        if source_ids.is_empty() {
            return Err(StoreError::Conflict(format!(
                "{node_type} nodes require at least one source node"
            )));
        }

        let node_id = ids::new_id();
        let now = ids::now();
        let ts = now.to_rfc3339();
        let is_summary = node_type == NodeType::Summary;

        let mut conn = self.store.conn();
        let tx = conn.transaction()?;

        let (session_id, _) = node_brief(&tx, &source_ids[0])?
            .ok_or_else(|| StoreError::not_found("node", source_ids[0].clone()))?;
        for source_id in &source_ids[1..] {
            let (source_session, _) = node_brief(&tx, source_id)?
                .ok_or_else(|| StoreError::not_found("node", source_id.clone()))?;
            if source_session != session_id {
                return Err(StoreError::Conflict(format!(
                    "source {source_id} belongs to another session"
                )));
            }
        }

        tx.execute(
            "INSERT INTO nodes
             (id, session_id, parent_id, title, content, type, depth, is_active, is_summary,
              is_generating, source_node_ids, metadata, created_at, updated_at)
             VALUES (?1, ?2, NULL, ?3, ?4, ?5, 0, 1, ?6, ?7, ?8, ?9, ?10, ?10)",
            params![
                node_id,
                session_id,
                title,
                content,
                node_type.as_str(),
                is_summary,
                is_summary,
                record::encode_string_list(source_ids),
                record::encode_node_metadata(&metadata),
                ts,
            ],
        )?;

        link(&tx, &session_id, labels::HAS_NODE, &node_id)?;
        let label = if is_summary {
            labels::SUMMARIZED_TO
        } else {
            labels::REFERENCED_BY
        };
        for source_id in source_ids {
            link(&tx, source_id, label, &node_id)?;
        }
        bump_session_nodes(&tx, &session_id, 1, &ts)?;
        tx.commit()?;

        Ok(Node {
            id: node_id,
            session_id,
            parent_id: None,
            title: title.to_string(),
            content: content.to_string(),
            node_type,
            depth: 0,
            is_active: true,
            is_summary,
            is_generating: is_summary,
            summary_content: None,
            source_node_ids: Some(source_ids.to_vec()),
            message_count: 0,
            token_count: 0,
            metadata,
            created_at: now,
            updated_at: now,
        })
    }

    /// Source node ids of an aggregate, recovered from the relation edges.
    /// Fallback for rows whose denormalised `source_node_ids` is missing.
    pub fn sources_of(&self, node_id: &str) -> Result<Vec<String>> {
        let conn = self.store.conn();
        let mut stmt = conn.prepare(
            "SELECT src FROM edges
             WHERE dst = ?1 AND label IN ('SUMMARIZED_TO', 'REFERENCED_BY')
             ORDER BY rowid",
        )?;
        let rows = stmt.query_map(params![node_id], |r| r.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Store the auto-generated compression of a parent node's messages.
    pub fn set_summary_content(&self, node_id: &str, content: &str) -> Result<()> {
        let conn = self.store.conn();
        let changed = conn.execute(
            "UPDATE nodes SET summary_content = ?1, updated_at = ?2 WHERE id = ?3",
            params![content, ids::now().to_rfc3339(), node_id],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("node", node_id));
        }
        Ok(())
    }

    /// Fill a generating summary node with its final title and content.
    pub fn finish_summary(&self, node_id: &str, title: &str, summary: &str) -> Result<()> {
        let conn = self.store.conn();
        let changed = conn.execute(
            "UPDATE nodes SET title = ?1, content = ?2, summary_content = ?2,
                 token_count = ?3, is_generating = 0, updated_at = ?4
             WHERE id = ?5",
            params![
                title,
                summary,
                tokens::estimate(summary),
                ids::now().to_rfc3339(),
                node_id,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("node", node_id));
        }
        Ok(())
    }

    /// Mark a generating summary node as failed. The node must never be
    /// left with `is_generating = true`.
    pub fn fail_summary(&self, node_id: &str, diagnostic: &str) -> Result<()> {
        let conn = self.store.conn();
        let changed = conn.execute(
            "UPDATE nodes SET title = ?1, content = ?2, is_generating = 0, updated_at = ?3
             WHERE id = ?4",
            params![
                SUMMARY_FAILED_TITLE,
                diagnostic,
                ids::now().to_rfc3339(),
                node_id,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("node", node_id));
        }
        Ok(())
    }
}

fn collect_nodes(
    rows: impl Iterator<Item = rusqlite::Result<Node>>,
) -> Result<Vec<Node>> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn session_exists(conn: &Connection, session_id: &str) -> Result<()> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sessions WHERE id = ?1)",
        params![session_id],
        |r| r.get(0),
    )?;
    if !exists {
        return Err(StoreError::not_found("session", session_id));
    }
    Ok(())
}

fn node_brief(conn: &Connection, node_id: &str) -> Result<Option<(String, i64)>> {
    Ok(conn
        .query_row(
            "SELECT session_id, depth FROM nodes WHERE id = ?1",
            params![node_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?)
}

fn descendant_ids(conn: &Connection, node_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "WITH RECURSIVE down(id) AS (
             SELECT e.dst FROM edges e WHERE e.label = 'HAS_CHILD' AND e.src = ?1
             UNION
             SELECT e.dst FROM edges e JOIN down ON e.src = down.id
             WHERE e.label = 'HAS_CHILD'
         )
         SELECT id FROM down",
    )?;
    let rows = stmt.query_map(params![node_id], |r| r.get::<_, String>(0))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Remove one node, its messages, and every edge touching it.
fn delete_single(conn: &Connection, node_id: &str) -> Result<()> {
    conn.execute("DELETE FROM messages WHERE node_id = ?1", params![node_id])?;
    conn.execute(
        "DELETE FROM edges WHERE src = ?1 OR dst = ?1",
        params![node_id],
    )?;
    conn.execute("DELETE FROM nodes WHERE id = ?1", params![node_id])?;
    Ok(())
}

fn bump_session_nodes(
    conn: &Connection,
    session_id: &str,
    delta: i64,
    ts: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE sessions SET node_count = MAX(node_count + ?1, 0), updated_at = ?2
         WHERE id = ?3",
        params![delta, ts, session_id],
    )?;
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::SessionRepo;
    use crate::types::NewSession;

    fn setup() -> (NodeRepo, SessionRepo, String, String) {
        let store = Arc::new(GraphStore::open_in_memory().unwrap());
        let sessions = SessionRepo::new(Arc::clone(&store));
        let nodes = NodeRepo::new(store);
        let session = sessions
            .create(NewSession {
                title: "S".into(),
                ..Default::default()
            })
            .unwrap();
        let root = session.root_node_id.clone();
        (nodes, sessions, session.id, root)
    }

    fn child(nodes: &NodeRepo, session: &str, parent: &str, title: &str) -> Node {
        nodes
            .create(
                session,
                NewNode {
                    parent_id: Some(parent.to_string()),
                    title: title.to_string(),
                    content: String::new(),
                    node_type: NodeType::Topic,
                    summary_content: None,
                    source_node_ids: None,
                    metadata: NodeMetadata::default(),
                },
            )
            .unwrap()
    }

    #[test]
    fn depth_follows_parentage() {
        let (nodes, _, session, root) = setup();
        let a = child(&nodes, &session, &root, "a");
        let b = child(&nodes, &session, &a.id, "b");
        assert_eq!(a.depth, 1);
        assert_eq!(b.depth, 2);
        assert_eq!(nodes.get(&b.id).unwrap().unwrap().depth, 2);
    }

    #[test]
    fn create_rejects_unknown_parent_and_session() {
        let (nodes, _, session, _) = setup();
        let err = nodes.create(
            &session,
            NewNode {
                parent_id: Some("missing".into()),
                title: "x".into(),
                content: String::new(),
                node_type: NodeType::Topic,
                summary_content: None,
                source_node_ids: None,
                metadata: NodeMetadata::default(),
            },
        );
        assert!(matches!(err, Err(StoreError::NotFound { .. })));

        let err = nodes.create(
            "missing-session",
            NewNode {
                parent_id: None,
                title: "x".into(),
                content: String::new(),
                node_type: NodeType::Topic,
                summary_content: None,
                source_node_ids: None,
                metadata: NodeMetadata::default(),
            },
        );
        assert!(matches!(err, Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn traversals_agree_on_a_chain() {
        let (nodes, _, session, root) = setup();
        let a = child(&nodes, &session, &root, "a");
        let b = child(&nodes, &session, &a.id, "b");
        let c = child(&nodes, &session, &b.id, "c");

        let ancestors: Vec<_> = nodes
            .ancestors(&c.id)
            .unwrap()
            .into_iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(ancestors, vec![root.clone(), a.id.clone(), b.id.clone()]);

        let path: Vec<_> = nodes.path(&c.id).unwrap().into_iter().map(|n| n.id).collect();
        assert_eq!(path, vec![root.clone(), a.id.clone(), b.id.clone(), c.id.clone()]);

        let descendants: Vec<_> = nodes
            .descendants(&root, None)
            .unwrap()
            .into_iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(descendants, vec![a.id.clone(), b.id.clone(), c.id.clone()]);

        let bounded = nodes.descendants(&root, Some(2)).unwrap();
        assert_eq!(bounded.len(), 2);

        assert!(nodes.has_children(&a.id).unwrap());
        assert!(!nodes.has_children(&c.id).unwrap());
    }

    #[test]
    fn leaves_are_childless_nodes() {
        let (nodes, _, session, root) = setup();
        let a = child(&nodes, &session, &root, "a");
        let b = child(&nodes, &session, &root, "b");
        child(&nodes, &session, &a.id, "a1");

        let leaves: Vec<_> = nodes
            .leaves(&session)
            .unwrap()
            .into_iter()
            .map(|n| n.title)
            .collect();
        assert!(leaves.contains(&"a1".to_string()));
        assert!(leaves.contains(&"b".to_string()));
        assert!(!leaves.contains(&"a".to_string()));
        let _ = b;
    }

    #[test]
    fn cascade_delete_removes_subtree_and_is_idempotent() {
        let (nodes, sessions, session, root) = setup();
        let a = child(&nodes, &session, &root, "a");
        let b = child(&nodes, &session, &a.id, "b");
        let c = child(&nodes, &session, &b.id, "c");
        let d = child(&nodes, &session, &c.id, "d");

        let result = nodes.delete(&[b.id.clone()], true).unwrap();
        assert_eq!(result.deleted_count, 3);
        assert!(result.failed.is_empty());
        assert_eq!(result.cascaded[&b.id].len(), 2);

        assert!(nodes.get(&b.id).unwrap().is_none());
        assert!(nodes.get(&c.id).unwrap().is_none());
        assert!(nodes.get(&d.id).unwrap().is_none());
        assert!(nodes.get(&a.id).unwrap().is_some());

        // Re-deleting the same id succeeds with nothing deleted.
        let again = nodes.delete(&[b.id.clone()], true).unwrap();
        assert_eq!(again.deleted_count, 0);
        assert_eq!(again.failed, vec![b.id.clone()]);

        let remaining = sessions.get(&session).unwrap().unwrap();
        assert_eq!(remaining.node_count, 2);
    }

    #[test]
    fn non_cascade_delete_orphans_children() {
        let (nodes, _, session, root) = setup();
        let a = child(&nodes, &session, &root, "a");
        let b = child(&nodes, &session, &a.id, "b");

        let result = nodes.delete(&[a.id.clone()], false).unwrap();
        assert_eq!(result.deleted_count, 1);

        let orphan = nodes.get(&b.id).unwrap().unwrap();
        assert!(orphan.parent_id.is_none());
        assert!(nodes.ancestors(&b.id).unwrap().is_empty());
    }

    #[test]
    fn summary_placeholder_has_sources_and_generating_flag() {
        let (nodes, _, session, root) = setup();
        let a = child(&nodes, &session, &root, "a");
        let b = child(&nodes, &session, &root, "b");

        let summary = nodes
            .create_summary(&[a.id.clone(), b.id.clone()], false, None)
            .unwrap();
        assert_eq!(summary.node_type, NodeType::Summary);
        assert!(summary.is_generating);
        assert!(summary.is_summary);
        assert!(summary.parent_id.is_none());
        assert_eq!(summary.depth, 0);
        assert_eq!(
            summary.source_node_ids.as_deref(),
            Some(&[a.id.clone(), b.id.clone()][..])
        );

        nodes.finish_summary(&summary.id, "Short title", "the summary").unwrap();
        let filled = nodes.get(&summary.id).unwrap().unwrap();
        assert!(!filled.is_generating);
        assert_eq!(filled.title, "Short title");
        assert_eq!(filled.summary_content.as_deref(), Some("the summary"));
    }

    #[test]
    fn summary_requires_sources() {
        let (nodes, _, _, _) = setup();
        assert!(matches!(
            nodes.create_summary(&[], false, None),
            Err(StoreError::Conflict(_))
        ));
    }

    #[test]
    fn cross_session_sources_are_rejected() {
        let store = Arc::new(GraphStore::open_in_memory().unwrap());
        let sessions = SessionRepo::new(Arc::clone(&store));
        let nodes = NodeRepo::new(store);
        let s1 = sessions
            .create(NewSession {
                title: "one".into(),
                ..Default::default()
            })
            .unwrap();
        let s2 = sessions
            .create(NewSession {
                title: "two".into(),
                ..Default::default()
            })
            .unwrap();

        let err = nodes.create_reference(
            &[s1.root_node_id.clone(), s2.root_node_id.clone()],
            None,
            None,
        );
        assert!(matches!(err, Err(StoreError::Conflict(_))));
    }

    #[test]
    fn reference_node_can_be_parented_with_sources() {
        let (nodes, _, session, root) = setup();
        let reference = nodes
            .create(
                &session,
                NewNode {
                    parent_id: Some(root.clone()),
                    title: "Continued: Root".into(),
                    content: String::new(),
                    node_type: NodeType::Reference,
                    summary_content: None,
                    source_node_ids: Some(vec![root.clone()]),
                    metadata: NodeMetadata::default(),
                },
            )
            .unwrap();
        assert_eq!(reference.parent_id.as_deref(), Some(root.as_str()));
        assert_eq!(reference.depth, 1);
        assert_eq!(reference.source_node_ids.as_deref(), Some(&[root][..]));
    }

    #[test]
    fn update_touches_only_mutable_fields() {
        let (nodes, _, session, root) = setup();
        let a = child(&nodes, &session, &root, "a");

        let updated = nodes
            .update(
                &a.id,
                NodePatch {
                    title: Some("renamed".into()),
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .unwrap()
            .unwrap();
        assert_eq!(updated.title, "renamed");
        assert!(!updated.is_active);
        assert_eq!(updated.node_type, NodeType::Topic);

        assert!(nodes.update("missing", NodePatch::default()).unwrap().is_none());
    }

    #[test]
    fn tree_reflects_structure() {
        let (nodes, _, session, root) = setup();
        let a = child(&nodes, &session, &root, "a");
        child(&nodes, &session, &a.id, "a1");
        child(&nodes, &session, &root, "b");

        let tree = nodes.tree(&root).unwrap().unwrap();
        assert_eq!(tree.children.len(), 2);
        let a_branch = tree
            .children
            .iter()
            .find(|t| t.node.id == a.id)
            .unwrap();
        assert_eq!(a_branch.children.len(), 1);
    }
}
