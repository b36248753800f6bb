use std::sync::Arc;

use rusqlite::{params, OptionalExtension};
use tracing::{info, instrument};

use arbor_core::ids;

use crate::error::{Result, StoreError};
use crate::record::{self, decode_node, decode_session, NODE_COLS, SESSION_COLS};
use crate::schema::labels;
use crate::store::{link, GraphStore};
use crate::types::{NewSession, Node, Session, SessionPatch, SessionWithNodes};

/// Entity-level access to sessions.
///
/// A session and its root node are born in the same transaction and the
/// `ROOT_NODE` reference never changes. Deleting a session removes the whole
/// subgraph: messages first, then nodes, then the session row itself.
#[derive(Clone)]
pub struct SessionRepo {
    store: Arc<GraphStore>,
}

impl SessionRepo {
    pub fn new(store: Arc<GraphStore>) -> Self {
        Self { store }
    }

    /// Create a session together with its root node.
    #[instrument(skip(self, new), fields(title = %new.title))]
    pub fn create(&self, new: NewSession) -> Result<Session> {
        if new.title.trim().is_empty() {
            return Err(StoreError::Conflict("session title must not be empty".into()));
        }

        let session_id = ids::new_id();
        let root_node_id = ids::new_id();
        let now = ids::now();
        let ts = now.to_rfc3339();
        let metadata = record::encode_metadata(&new.metadata);

        let mut conn = self.store.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO sessions
             (id, title, user_id, root_node_id, node_count, metadata, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6, ?6)",
            params![session_id, new.title, new.user_id, root_node_id, metadata, ts],
        )?;
        tx.execute(
            "INSERT INTO nodes
             (id, session_id, parent_id, title, content, type, depth, created_at, updated_at)
             VALUES (?1, ?2, NULL, 'Root', '', 'root', 0, ?3, ?3)",
            params![root_node_id, session_id, ts],
        )?;
        link(&tx, &session_id, labels::HAS_NODE, &root_node_id)?;
        link(&tx, &session_id, labels::ROOT_NODE, &root_node_id)?;
        tx.commit()?;

        info!(%session_id, %root_node_id, "session created");
        Ok(Session {
            id: session_id,
            title: new.title,
            user_id: new.user_id,
            root_node_id,
            node_count: 1,
            metadata: new.metadata,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn get(&self, session_id: &str) -> Result<Option<Session>> {
        let conn = self.store.conn();
        let session = conn
            .query_row(
                &format!("SELECT {SESSION_COLS} FROM sessions WHERE id = ?1"),
                params![session_id],
                decode_session,
            )
            .optional()?;
        Ok(session)
    }

    /// List sessions, most recently updated first.
    pub fn list(
        &self,
        user_id: Option<&str>,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<Session>> {
        let conn = self.store.conn();
        let mut out = Vec::new();
        match user_id {
            Some(uid) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SESSION_COLS} FROM sessions WHERE user_id = ?1
                     ORDER BY updated_at DESC LIMIT ?2 OFFSET ?3"
                ))?;
                let rows =
                    stmt.query_map(params![uid, limit as i64, skip as i64], decode_session)?;
                for row in rows {
                    out.push(row?);
                }
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SESSION_COLS} FROM sessions
                     ORDER BY updated_at DESC LIMIT ?1 OFFSET ?2"
                ))?;
                let rows = stmt.query_map(params![limit as i64, skip as i64], decode_session)?;
                for row in rows {
                    out.push(row?);
                }
            }
        }
        Ok(out)
    }

    /// Partial update of the mutable session fields.
    pub fn update(&self, session_id: &str, patch: SessionPatch) -> Result<Option<Session>> {
        {
            let conn = self.store.conn();
            let ts = ids::now().to_rfc3339();
            let changed = match (&patch.title, &patch.metadata) {
                (Some(title), Some(metadata)) => conn.execute(
                    "UPDATE sessions SET title = ?1, metadata = ?2, updated_at = ?3 WHERE id = ?4",
                    params![title, record::encode_metadata(metadata), ts, session_id],
                )?,
                (Some(title), None) => conn.execute(
                    "UPDATE sessions SET title = ?1, updated_at = ?2 WHERE id = ?3",
                    params![title, ts, session_id],
                )?,
                (None, Some(metadata)) => conn.execute(
                    "UPDATE sessions SET metadata = ?1, updated_at = ?2 WHERE id = ?3",
                    params![record::encode_metadata(metadata), ts, session_id],
                )?,
                (None, None) => 1,
            };
            if changed == 0 {
                return Ok(None);
            }
        }
        self.get(session_id)
    }

    /// Cascade delete: messages, then nodes, then the session. Returns
    /// `false` when the session does not exist.
    #[instrument(skip(self))]
    pub fn delete(&self, session_id: &str) -> Result<bool> {
        let mut conn = self.store.conn();
        let tx = conn.transaction()?;

        let exists: Option<String> = tx
            .query_row(
                "SELECT id FROM sessions WHERE id = ?1",
                params![session_id],
                |r| r.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Ok(false);
        }

        tx.execute(
            "DELETE FROM messages WHERE node_id IN
                 (SELECT id FROM nodes WHERE session_id = ?1)",
            params![session_id],
        )?;
        tx.execute(
            "DELETE FROM edges WHERE src = ?1 OR dst = ?1
                 OR src IN (SELECT id FROM nodes WHERE session_id = ?1)
                 OR dst IN (SELECT id FROM nodes WHERE session_id = ?1)",
            params![session_id],
        )?;
        tx.execute(
            "DELETE FROM recommendations WHERE session_id = ?1",
            params![session_id],
        )?;
        tx.execute("DELETE FROM nodes WHERE session_id = ?1", params![session_id])?;
        tx.execute("DELETE FROM sessions WHERE id = ?1", params![session_id])?;
        tx.commit()?;

        info!(session_id, "session deleted");
        Ok(true)
    }

    /// All nodes of a session in creation order.
    pub fn nodes(&self, session_id: &str) -> Result<Vec<Node>> {
        let conn = self.store.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {NODE_COLS} FROM nodes WHERE session_id = ?1 ORDER BY created_at, id"
        ))?;
        let rows = stmt.query_map(params![session_id], decode_node)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn with_nodes(&self, session_id: &str) -> Result<Option<SessionWithNodes>> {
        let Some(session) = self.get(session_id)? else {
            return Ok(None);
        };
        let nodes = self.nodes(session_id)?;
        Ok(Some(SessionWithNodes { session, nodes }))
    }
}
