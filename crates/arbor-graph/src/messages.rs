use std::sync::Arc;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::instrument;

use arbor_core::ids;

use crate::error::{Result, StoreError};
use crate::record::{decode_message, MESSAGE_COLS};
use crate::schema::labels;
use crate::store::{link, GraphStore};
use crate::tokens;
use crate::types::{Message, NewMessage};

/// Entity-level access to messages.
///
/// Creating or deleting a message recomputes the host node's
/// `message_count` and `token_count` in the same transaction, so the node
/// aggregates always match the adjacent `HAS_MESSAGE` edges.
#[derive(Clone)]
pub struct MessageRepo {
    store: Arc<GraphStore>,
}

impl MessageRepo {
    pub fn new(store: Arc<GraphStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self, new), fields(node_id = %new.node_id, role = %new.role))]
    pub fn create(&self, new: NewMessage) -> Result<Message> {
        if new.content.trim().is_empty() {
            return Err(StoreError::Conflict("message content must not be empty".into()));
        }

        let message_id = ids::new_id();
        let now = ids::now();
        let ts = now.to_rfc3339();
        let token_count = tokens::estimate(&new.content);

        let mut conn = self.store.conn();
        let tx = conn.transaction()?;

        let node_exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM nodes WHERE id = ?1)",
            params![new.node_id],
            |r| r.get(0),
        )?;
        if !node_exists {
            return Err(StoreError::not_found("node", new.node_id));
        }

        tx.execute(
            "INSERT INTO messages (id, node_id, role, content, timestamp, token_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![message_id, new.node_id, new.role.as_str(), new.content, ts, token_count],
        )?;
        link(&tx, &new.node_id, labels::HAS_MESSAGE, &message_id)?;
        recompute_node_stats(&tx, &new.node_id, &ts)?;
        tx.commit()?;

        Ok(Message {
            id: message_id,
            node_id: new.node_id,
            role: new.role,
            content: new.content,
            timestamp: now,
            token_count,
            embedding: None,
        })
    }

    pub fn get(&self, message_id: &str) -> Result<Option<Message>> {
        let conn = self.store.conn();
        let message = conn
            .query_row(
                &format!("SELECT {MESSAGE_COLS} FROM messages WHERE id = ?1"),
                params![message_id],
                decode_message,
            )
            .optional()?;
        Ok(message)
    }

    /// All messages of a node in timestamp order.
    pub fn list_by_node(&self, node_id: &str) -> Result<Vec<Message>> {
        let conn = self.store.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLS} FROM messages WHERE node_id = ?1
             ORDER BY timestamp, rowid"
        ))?;
        let rows = stmt.query_map(params![node_id], decode_message)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn list_by_node_paginated(
        &self,
        node_id: &str,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let conn = self.store.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLS} FROM messages WHERE node_id = ?1
             ORDER BY timestamp, rowid LIMIT ?2 OFFSET ?3"
        ))?;
        let rows =
            stmt.query_map(params![node_id, limit as i64, skip as i64], decode_message)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Messages of several nodes in one batch, globally timestamp-ordered.
    pub fn list_by_nodes(&self, node_ids: &[String]) -> Result<Vec<Message>> {
        if node_ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.store.conn();
        let placeholders = vec!["?"; node_ids.len()].join(", ");
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLS} FROM messages WHERE node_id IN ({placeholders})
             ORDER BY timestamp, rowid"
        ))?;
        let rows = stmt.query_map(rusqlite::params_from_iter(node_ids), decode_message)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn delete(&self, message_id: &str) -> Result<bool> {
        let mut conn = self.store.conn();
        let tx = conn.transaction()?;

        let node_id: Option<String> = tx
            .query_row(
                "SELECT node_id FROM messages WHERE id = ?1",
                params![message_id],
                |r| r.get(0),
            )
            .optional()?;
        let Some(node_id) = node_id else {
            return Ok(false);
        };

        tx.execute("DELETE FROM messages WHERE id = ?1", params![message_id])?;
        tx.execute(
            "DELETE FROM edges WHERE src = ?1 OR dst = ?1",
            params![message_id],
        )?;
        recompute_node_stats(&tx, &node_id, &ids::now().to_rfc3339())?;
        tx.commit()?;
        Ok(true)
    }

    /// Attach (or replace) the embedding vector of a message.
    pub fn set_embedding(&self, message_id: &str, embedding: &[f32]) -> Result<()> {
        let conn = self.store.conn();
        let encoded = serde_json::to_string(embedding)?;
        let changed = conn.execute(
            "UPDATE messages SET embedding = ?1 WHERE id = ?2",
            params![encoded, message_id],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("message", message_id));
        }
        Ok(())
    }
}

/// Recompute `message_count` and `token_count` from the actual messages.
fn recompute_node_stats(conn: &Connection, node_id: &str, ts: &str) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE nodes SET
             message_count = (SELECT COUNT(*) FROM messages WHERE node_id = ?1),
             token_count   = (SELECT COALESCE(SUM(token_count), 0) FROM messages
                              WHERE node_id = ?1),
             updated_at    = ?2
         WHERE id = ?1",
        params![node_id, ts],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::NodeRepo;
    use crate::sessions::SessionRepo;
    use crate::types::{NewSession, Role};

    fn setup() -> (MessageRepo, NodeRepo, String) {
        let store = Arc::new(GraphStore::open_in_memory().unwrap());
        let sessions = SessionRepo::new(Arc::clone(&store));
        let nodes = NodeRepo::new(Arc::clone(&store));
        let messages = MessageRepo::new(store);
        let session = sessions
            .create(NewSession {
                title: "S".into(),
                ..Default::default()
            })
            .unwrap();
        (messages, nodes, session.root_node_id)
    }

    fn msg(node_id: &str, role: Role, content: &str) -> NewMessage {
        NewMessage {
            node_id: node_id.to_string(),
            role,
            content: content.to_string(),
        }
    }

    #[test]
    fn create_updates_node_stats() {
        let (messages, nodes, node_id) = setup();
        messages.create(msg(&node_id, Role::User, "one two three four")).unwrap();
        messages.create(msg(&node_id, Role::Assistant, "five six")).unwrap();

        let node = nodes.get(&node_id).unwrap().unwrap();
        assert_eq!(node.message_count, 2);
        assert_eq!(node.token_count, 6 + 3);
    }

    #[test]
    fn empty_content_is_rejected() {
        let (messages, _, node_id) = setup();
        assert!(matches!(
            messages.create(msg(&node_id, Role::User, "   ")),
            Err(StoreError::Conflict(_))
        ));
    }

    #[test]
    fn unknown_node_is_rejected() {
        let (messages, _, _) = setup();
        assert!(matches!(
            messages.create(msg("missing", Role::User, "hi")),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn list_preserves_timestamp_order() {
        let (messages, _, node_id) = setup();
        let first = messages.create(msg(&node_id, Role::User, "first")).unwrap();
        let second = messages.create(msg(&node_id, Role::Assistant, "second")).unwrap();

        let listed = messages.list_by_node(&node_id).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, first.id);
        assert_eq!(listed[1].id, second.id);

        let page = messages.list_by_node_paginated(&node_id, 1, 10).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, second.id);
    }

    #[test]
    fn delete_recomputes_stats() {
        let (messages, nodes, node_id) = setup();
        let m = messages.create(msg(&node_id, Role::User, "a b")).unwrap();
        assert!(messages.delete(&m.id).unwrap());
        assert!(!messages.delete(&m.id).unwrap());

        let node = nodes.get(&node_id).unwrap().unwrap();
        assert_eq!(node.message_count, 0);
        assert_eq!(node.token_count, 0);
    }

    #[test]
    fn embedding_roundtrips() {
        let (messages, _, node_id) = setup();
        let m = messages.create(msg(&node_id, Role::User, "embed me")).unwrap();
        messages.set_embedding(&m.id, &[0.25, -1.0]).unwrap();
        let loaded = messages.get(&m.id).unwrap().unwrap();
        assert_eq!(loaded.embedding, Some(vec![0.25, -1.0]));
    }
}
