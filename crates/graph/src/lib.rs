//! Catalog graph access for the Atlas assistant.
//!
//! The orchestration core is agnostic to the storage engine: it talks to
//! [`GraphStore`], which any graph-query-capable backend can implement.
//! This crate ships the vocabulary types, the store contract, and a
//! deterministic in-memory catalog used by tests, the CLI, and the
//! default server wiring.

pub mod matching;
pub mod memory;
pub mod query;
pub mod types;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

pub use matching::{name_similarity, rank_matches, NodeMatch};
pub use memory::MemoryGraphStore;
pub use query::{label_tokens, name_literals};
pub use types::{EntityKind, GraphData, GraphEdge, GraphNode, GraphPath, QueryOutcome};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("no catalog node named `{name}`")]
    NodeNotFound { name: String },
    #[error("query execution failed: {0}")]
    QueryFailed(String),
    #[error("graph backend failure: {0}")]
    Backend(String),
}

/// Read-side contract the orchestration core depends on.
///
/// `run_query` reports the entity names the query filtered on alongside
/// the data, so callers never have to re-derive them from raw query text.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Case-insensitive fuzzy lookup among nodes of one kind, ranked by
    /// similarity to `name_fragment` (best first).
    async fn lookup_nodes(
        &self,
        kind: EntityKind,
        name_fragment: &str,
    ) -> Result<Vec<NodeMatch>, GraphError>;

    /// Execute a read query and return the matched subgraph.
    async fn run_query(
        &self,
        query: &str,
        params: &Map<String, Value>,
    ) -> Result<QueryOutcome, GraphError>;

    /// Shortest relationship paths between two named nodes.
    async fn shortest_paths(
        &self,
        from_name: &str,
        to_name: &str,
        max_depth: u32,
    ) -> Result<Vec<GraphPath>, GraphError>;
}
