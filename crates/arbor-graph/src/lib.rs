//! Graph-backed storage for branching conversations.
//!
//! The conversation graph lives in SQLite: one table per entity kind plus a
//! labelled `edges` table carrying the relationship structure
//! (`HAS_NODE`, `ROOT_NODE`, `HAS_CHILD`, `HAS_MESSAGE`, `SUMMARIZED_TO`,
//! `REFERENCED_BY`, `HAS_RECOMMENDATION`, `FOR_NODE`). Tree traversals run
//! as recursive CTEs over `HAS_CHILD` edges.
//!
//! `GraphStore` owns the connection and the schema; the repositories
//! (`SessionRepo`, `NodeRepo`, `MessageRepo`, `RecommendationRepo`) own the
//! entity-level invariants.

pub mod error;
pub mod messages;
pub mod nodes;
pub mod record;
pub mod recommendations;
pub mod schema;
pub mod sessions;
pub mod store;
pub mod tokens;
pub mod types;

pub use error::{Result, StoreError};
pub use messages::MessageRepo;
pub use nodes::NodeRepo;
pub use recommendations::RecommendationRepo;
pub use sessions::SessionRepo;
pub use store::GraphStore;
