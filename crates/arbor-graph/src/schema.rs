use rusqlite::Connection;

use crate::error::Result;

/// Relationship labels persisted in the `edges` table.
pub mod labels {
    pub const HAS_NODE: &str = "HAS_NODE";
    pub const ROOT_NODE: &str = "ROOT_NODE";
    pub const HAS_CHILD: &str = "HAS_CHILD";
    pub const HAS_MESSAGE: &str = "HAS_MESSAGE";
    pub const SUMMARIZED_TO: &str = "SUMMARIZED_TO";
    pub const REFERENCED_BY: &str = "REFERENCED_BY";
    pub const HAS_RECOMMENDATION: &str = "HAS_RECOMMENDATION";
    pub const FOR_NODE: &str = "FOR_NODE";
}

/// Initialise entity tables, the edge table, and all lookup indexes.
///
/// Safe to call on every startup — uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS sessions (
            id            TEXT PRIMARY KEY,
            title         TEXT NOT NULL,
            user_id       TEXT,
            root_node_id  TEXT NOT NULL,
            node_count    INTEGER NOT NULL DEFAULT 1,
            metadata      TEXT NOT NULL DEFAULT '{}',
            created_at    TEXT NOT NULL,
            updated_at    TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS nodes (
            id              TEXT PRIMARY KEY,
            session_id      TEXT NOT NULL,
            parent_id       TEXT,
            title           TEXT NOT NULL,
            content         TEXT NOT NULL DEFAULT '',
            type            TEXT NOT NULL,
            depth           INTEGER NOT NULL DEFAULT 0,
            is_active       INTEGER NOT NULL DEFAULT 1,
            is_summary      INTEGER NOT NULL DEFAULT 0,
            is_generating   INTEGER NOT NULL DEFAULT 0,
            summary_content TEXT,
            source_node_ids TEXT,
            message_count   INTEGER NOT NULL DEFAULT 0,
            token_count     INTEGER NOT NULL DEFAULT 0,
            metadata        TEXT NOT NULL DEFAULT '{}',
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS messages (
            id          TEXT PRIMARY KEY,
            node_id     TEXT NOT NULL,
            role        TEXT NOT NULL,
            content     TEXT NOT NULL,
            timestamp   TEXT NOT NULL,
            token_count INTEGER NOT NULL DEFAULT 0,
            embedding   TEXT
        );

        CREATE TABLE IF NOT EXISTS recommendations (
            id                TEXT PRIMARY KEY,
            session_id        TEXT NOT NULL,
            node_id           TEXT NOT NULL,
            message_id        TEXT NOT NULL,
            title             TEXT NOT NULL,
            description       TEXT NOT NULL,
            type              TEXT NOT NULL,
            priority          REAL NOT NULL DEFAULT 0.5,
            estimated_depth   INTEGER NOT NULL DEFAULT 3,
            edge_label        TEXT NOT NULL,
            status            TEXT NOT NULL DEFAULT 'pending',
            created_branch_id TEXT,
            dismissed_at      TEXT,
            created_at        TEXT NOT NULL,
            updated_at        TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS edges (
            src   TEXT NOT NULL,
            dst   TEXT NOT NULL,
            label TEXT NOT NULL,
            PRIMARY KEY (src, label, dst)
        );

        CREATE INDEX IF NOT EXISTS idx_sessions_user
            ON sessions(user_id, updated_at DESC);
        CREATE INDEX IF NOT EXISTS idx_nodes_session   ON nodes(session_id);
        CREATE INDEX IF NOT EXISTS idx_nodes_parent    ON nodes(parent_id);
        CREATE INDEX IF NOT EXISTS idx_nodes_type      ON nodes(type);
        CREATE INDEX IF NOT EXISTS idx_messages_node   ON messages(node_id, timestamp);
        CREATE INDEX IF NOT EXISTS idx_recs_session    ON recommendations(session_id, status);
        CREATE INDEX IF NOT EXISTS idx_recs_node       ON recommendations(node_id, status);
        CREATE INDEX IF NOT EXISTS idx_recs_message    ON recommendations(message_id);
        CREATE INDEX IF NOT EXISTS idx_edges_label_src ON edges(label, src);
        CREATE INDEX IF NOT EXISTS idx_edges_label_dst ON edges(label, dst);",
    )?;
    Ok(())
}
