use std::collections::BTreeMap;
use std::sync::Arc;

use rusqlite::{params, OptionalExtension};
use tracing::{instrument, warn};

use arbor_core::ids;

use crate::error::{Result, StoreError};
use crate::record::{decode_recommendation, RECOMMENDATION_COLS};
use crate::schema::labels;
use crate::store::{link, GraphStore};
use crate::types::{
    BranchRecommendation, NewRecommendation, RecommendationBatch, RecommendationPatch,
    RecommendationStatus,
};

/// Entity-level access to branch recommendations.
///
/// Recommendations are append-only: after creation only `status`,
/// `created_branch_id`, and `dismissed_at` may change, and
/// `created_branch_id` is set exactly when `status = created`.
#[derive(Clone)]
pub struct RecommendationRepo {
    store: Arc<GraphStore>,
}

impl RecommendationRepo {
    pub fn new(store: Arc<GraphStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self, new), fields(node_id = %new.node_id, title = %new.seed.title))]
    pub fn create(&self, new: NewRecommendation) -> Result<BranchRecommendation> {
        let rec_id = ids::new_id();
        let now = ids::now();
        let ts = now.to_rfc3339();

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
        let message_exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM messages WHERE id = ?1)",
            params![new.message_id],
            |r| r.get(0),
        )?;
        if !message_exists {
            return Err(StoreError::not_found("message", new.message_id));
        }

        tx.execute(
            "INSERT INTO recommendations
             (id, session_id, node_id, message_id, title, description, type, priority,
              estimated_depth, edge_label, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'pending', ?11, ?11)",
            params![
                rec_id,
                new.session_id,
                new.node_id,
                new.message_id,
                new.seed.title,
                new.seed.description,
                new.seed.rec_type,
                new.seed.priority,
                new.seed.estimated_depth,
                new.seed.edge_label,
                ts,
            ],
        )?;
        link(&tx, &new.message_id, labels::HAS_RECOMMENDATION, &rec_id)?;
        link(&tx, &rec_id, labels::FOR_NODE, &new.node_id)?;
        tx.commit()?;

        Ok(BranchRecommendation {
            id: rec_id,
            session_id: new.session_id,
            node_id: new.node_id,
            message_id: new.message_id,
            title: new.seed.title,
            description: new.seed.description,
            rec_type: new.seed.rec_type,
            priority: new.seed.priority,
            estimated_depth: new.seed.estimated_depth,
            edge_label: new.seed.edge_label,
            status: RecommendationStatus::Pending,
            created_branch_id: None,
            dismissed_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Persist a whole analysis batch. Individual failures are logged and
    /// skipped so one bad seed cannot sink the rest.
    pub fn create_batch(&self, batch: RecommendationBatch) -> Result<Vec<BranchRecommendation>> {
        let mut created = Vec::new();
        for seed in batch.recommendations {
            let new = NewRecommendation {
                session_id: batch.session_id.clone(),
                node_id: batch.node_id.clone(),
                message_id: batch.message_id.clone(),
                seed,
            };
            match self.create(new) {
                Ok(rec) => created.push(rec),
                Err(e) => warn!(error = %e, "skipping recommendation in batch"),
            }
        }
        Ok(created)
    }

    pub fn get(&self, rec_id: &str) -> Result<Option<BranchRecommendation>> {
        let conn = self.store.conn();
        let rec = conn
            .query_row(
                &format!("SELECT {RECOMMENDATION_COLS} FROM recommendations WHERE id = ?1"),
                params![rec_id],
                decode_recommendation,
            )
            .optional()?;
        Ok(rec)
    }

    /// Recommendations spawned by one assistant message, best first.
    pub fn list_by_message(&self, message_id: &str) -> Result<Vec<BranchRecommendation>> {
        let conn = self.store.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECOMMENDATION_COLS} FROM recommendations
             WHERE message_id = ?1 ORDER BY priority DESC, rowid"
        ))?;
        let rows = stmt.query_map(params![message_id], decode_recommendation)?;
        collect(rows)
    }

    pub fn list_by_node(
        &self,
        node_id: &str,
        status: Option<RecommendationStatus>,
    ) -> Result<Vec<BranchRecommendation>> {
        let conn = self.store.conn();
        match status {
            Some(status) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {RECOMMENDATION_COLS} FROM recommendations
                     WHERE node_id = ?1 AND status = ?2
                     ORDER BY created_at DESC, priority DESC, rowid"
                ))?;
                let rows =
                    stmt.query_map(params![node_id, status.as_str()], decode_recommendation)?;
                collect(rows)
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {RECOMMENDATION_COLS} FROM recommendations
                     WHERE node_id = ?1
                     ORDER BY created_at DESC, priority DESC, rowid"
                ))?;
                let rows = stmt.query_map(params![node_id], decode_recommendation)?;
                collect(rows)
            }
        }
    }

    /// Every non-expired recommendation of a session, grouped by node.
    pub fn list_active_by_session(
        &self,
        session_id: &str,
    ) -> Result<BTreeMap<String, Vec<BranchRecommendation>>> {
        let conn = self.store.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECOMMENDATION_COLS} FROM recommendations
             WHERE session_id = ?1 AND status IN ('pending', 'created', 'dismissed')
             ORDER BY node_id, created_at DESC, priority DESC, rowid"
        ))?;
        let rows = stmt.query_map(params![session_id], decode_recommendation)?;

        let mut grouped: BTreeMap<String, Vec<BranchRecommendation>> = BTreeMap::new();
        for row in rows {
            let rec = row?;
            grouped.entry(rec.node_id.clone()).or_default().push(rec);
        }
        Ok(grouped)
    }

    /// Apply a partial update, guarding the status/branch/dismissal coupling.
    pub fn update(
        &self,
        rec_id: &str,
        patch: RecommendationPatch,
    ) -> Result<BranchRecommendation> {
        let Some(mut rec) = self.get(rec_id)? else {
            return Err(StoreError::not_found("recommendation", rec_id));
        };

        if let Some(status) = patch.status {
            rec.status = status;
        }
        if let Some(branch_id) = patch.created_branch_id {
            rec.created_branch_id = Some(branch_id);
        }
        if let Some(dismissed_at) = patch.dismissed_at {
            rec.dismissed_at = Some(dismissed_at);
        }

        match rec.status {
            RecommendationStatus::Created if rec.created_branch_id.is_none() => {
                return Err(StoreError::Conflict(
                    "status 'created' requires created_branch_id".into(),
                ));
            }
            RecommendationStatus::Dismissed if rec.dismissed_at.is_none() => {
                return Err(StoreError::Conflict(
                    "status 'dismissed' requires dismissed_at".into(),
                ));
            }
            _ if rec.created_branch_id.is_some()
                && rec.status != RecommendationStatus::Created =>
            {
                return Err(StoreError::Conflict(
                    "created_branch_id is only valid with status 'created'".into(),
                ));
            }
            _ => {}
        }

        rec.updated_at = ids::now();
        self.persist(&rec)?;
        Ok(rec)
    }

    /// A branch was created from this recommendation.
    ///
    /// Dismissal is terminal, so reviving a dismissed recommendation into
    /// `created` is a conflict.
    pub fn mark_created(&self, rec_id: &str, branch_id: &str) -> Result<BranchRecommendation> {
        let Some(mut rec) = self.get(rec_id)? else {
            return Err(StoreError::not_found("recommendation", rec_id));
        };
        if rec.status == RecommendationStatus::Dismissed {
            return Err(StoreError::Conflict(
                "recommendation was already dismissed".into(),
            ));
        }
        rec.status = RecommendationStatus::Created;
        rec.created_branch_id = Some(branch_id.to_string());
        rec.updated_at = ids::now();
        self.persist(&rec)?;
        Ok(rec)
    }

    /// Dismiss a recommendation. Idempotent — repeated dismissal keeps the
    /// earliest `dismissed_at`; dismissing an already-created one conflicts.
    pub fn mark_dismissed(&self, rec_id: &str) -> Result<BranchRecommendation> {
        let Some(mut rec) = self.get(rec_id)? else {
            return Err(StoreError::not_found("recommendation", rec_id));
        };
        match rec.status {
            RecommendationStatus::Dismissed => Ok(rec),
            RecommendationStatus::Created => Err(StoreError::Conflict(
                "a created recommendation cannot be dismissed".into(),
            )),
            _ => {
                rec.status = RecommendationStatus::Dismissed;
                rec.dismissed_at = Some(ids::now());
                rec.updated_at = ids::now();
                self.persist(&rec)?;
                Ok(rec)
            }
        }
    }

    fn persist(&self, rec: &BranchRecommendation) -> Result<()> {
        let conn = self.store.conn();
        conn.execute(
            "UPDATE recommendations SET status = ?1, created_branch_id = ?2,
                 dismissed_at = ?3, updated_at = ?4
             WHERE id = ?5",
            params![
                rec.status.as_str(),
                rec.created_branch_id,
                rec.dismissed_at.map(|dt| dt.to_rfc3339()),
                rec.updated_at.to_rfc3339(),
                rec.id,
            ],
        )?;
        Ok(())
    }
}

fn collect(
    rows: impl Iterator<Item = rusqlite::Result<BranchRecommendation>>,
) -> Result<Vec<BranchRecommendation>> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::MessageRepo;
    use crate::sessions::SessionRepo;
    use crate::types::{NewMessage, NewSession, RecommendationSeed, Role};

    struct Fixture {
        recs: RecommendationRepo,
        session_id: String,
        node_id: String,
        message_id: String,
    }

    fn setup() -> Fixture {
        let store = Arc::new(GraphStore::open_in_memory().unwrap());
        let sessions = SessionRepo::new(Arc::clone(&store));
        let messages = MessageRepo::new(Arc::clone(&store));
        let recs = RecommendationRepo::new(store);

        let session = sessions
            .create(NewSession {
                title: "S".into(),
                ..Default::default()
            })
            .unwrap();
        let message = messages
            .create(NewMessage {
                node_id: session.root_node_id.clone(),
                role: Role::Assistant,
                content: "an answer".into(),
            })
            .unwrap();

        Fixture {
            recs,
            session_id: session.id,
            node_id: session.root_node_id,
            message_id: message.id,
        }
    }

    fn seed(title: &str, priority: f64) -> RecommendationSeed {
        RecommendationSeed {
            title: title.to_string(),
            description: format!("explore {title}"),
            rec_type: "topics".into(),
            priority,
            estimated_depth: 3,
            edge_label: title.chars().take(20).collect(),
        }
    }

    fn create(f: &Fixture, title: &str, priority: f64) -> BranchRecommendation {
        f.recs
            .create(NewRecommendation {
                session_id: f.session_id.clone(),
                node_id: f.node_id.clone(),
                message_id: f.message_id.clone(),
                seed: seed(title, priority),
            })
            .unwrap()
    }

    #[test]
    fn create_starts_pending() {
        let f = setup();
        let rec = create(&f, "alpha", 0.8);
        assert_eq!(rec.status, RecommendationStatus::Pending);
        assert!(rec.created_branch_id.is_none());
        assert!(rec.dismissed_at.is_none());
    }

    #[test]
    fn list_by_message_orders_by_priority() {
        let f = setup();
        create(&f, "low", 0.3);
        create(&f, "high", 0.9);
        let listed = f.recs.list_by_message(&f.message_id).unwrap();
        assert_eq!(listed[0].title, "high");
        assert_eq!(listed[1].title, "low");
    }

    #[test]
    fn created_iff_branch_id_present() {
        let f = setup();
        let rec = create(&f, "alpha", 0.8);

        let marked = f.recs.mark_created(&rec.id, "branch-1").unwrap();
        assert_eq!(marked.status, RecommendationStatus::Created);
        assert_eq!(marked.created_branch_id.as_deref(), Some("branch-1"));

        // The invariant also guards the generic patch path.
        let other = create(&f, "beta", 0.7);
        let err = f.recs.update(
            &other.id,
            RecommendationPatch {
                status: Some(RecommendationStatus::Created),
                ..Default::default()
            },
        );
        assert!(matches!(err, Err(StoreError::Conflict(_))));
    }

    #[test]
    fn dismissal_is_terminal_and_idempotent() {
        let f = setup();
        let rec = create(&f, "alpha", 0.8);

        let first = f.recs.mark_dismissed(&rec.id).unwrap();
        let first_ts = first.dismissed_at.unwrap();
        let second = f.recs.mark_dismissed(&rec.id).unwrap();
        assert_eq!(second.dismissed_at.unwrap(), first_ts);
        assert_eq!(second.status, RecommendationStatus::Dismissed);

        assert!(matches!(
            f.recs.mark_created(&rec.id, "b"),
            Err(StoreError::Conflict(_))
        ));
    }

    #[test]
    fn created_cannot_be_dismissed() {
        let f = setup();
        let rec = create(&f, "alpha", 0.8);
        f.recs.mark_created(&rec.id, "branch-1").unwrap();
        assert!(matches!(
            f.recs.mark_dismissed(&rec.id),
            Err(StoreError::Conflict(_))
        ));
    }

    #[test]
    fn active_by_session_groups_by_node() {
        let f = setup();
        create(&f, "alpha", 0.8);
        create(&f, "beta", 0.7);
        let grouped = f.recs.list_active_by_session(&f.session_id).unwrap();
        assert_eq!(grouped.len(), 1);
        assert_eq!(grouped[&f.node_id].len(), 2);
    }

    #[test]
    fn batch_skips_bad_seeds() {
        let f = setup();
        let batch = RecommendationBatch {
            session_id: f.session_id.clone(),
            node_id: f.node_id.clone(),
            message_id: "missing-message".into(),
            recommendations: vec![seed("alpha", 0.8)],
        };
        let created = f.recs.create_batch(batch).unwrap();
        assert!(created.is_empty());

        let good = RecommendationBatch {
            session_id: f.session_id.clone(),
            node_id: f.node_id.clone(),
            message_id: f.message_id.clone(),
            recommendations: vec![seed("alpha", 0.8), seed("beta", 0.7)],
        };
        assert_eq!(f.recs.create_batch(good).unwrap().len(), 2);
    }
}
