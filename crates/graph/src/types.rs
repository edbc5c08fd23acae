use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Node labels in the business catalog.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Industry,
    Sector,
    Department,
    PainPoint,
    AiProject,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Industry,
        EntityKind::Sector,
        EntityKind::Department,
        EntityKind::PainPoint,
        EntityKind::AiProject,
    ];

    /// Graph label as it appears in query text.
    pub fn label(&self) -> &'static str {
        match self {
            EntityKind::Industry => "Industry",
            EntityKind::Sector => "Sector",
            EntityKind::Department => "Department",
            EntityKind::PainPoint => "PainPoint",
            EntityKind::AiProject => "AiProject",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        let normalized = label.trim().replace(['_', '-', ' '], "").to_ascii_lowercase();
        Self::ALL.into_iter().find(|kind| kind.label().to_ascii_lowercase() == normalized)
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub kind: EntityKind,
    pub name: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
}

impl GraphNode {
    pub fn new(kind: EntityKind, name: impl Into<String>) -> Self {
        let name = name.into();
        let id = format!("{}-{}", kind.label().to_ascii_lowercase(), slug(&name));
        Self { id, kind, name, properties: Map::new() }
    }

    pub fn with_property(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
    pub relationship: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphData {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl GraphData {
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }

    /// Merge another subgraph, deduplicating nodes by id and edges by
    /// (from, to, relationship).
    pub fn merge(&mut self, other: GraphData) {
        for node in other.nodes {
            if !self.nodes.iter().any(|existing| existing.id == node.id) {
                self.nodes.push(node);
            }
        }
        for edge in other.edges {
            if !self.edges.contains(&edge) {
                self.edges.push(edge);
            }
        }
    }
}

/// One relationship path, nodes and edges in traversal order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphPath {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl GraphPath {
    /// Path length in hops.
    pub fn hops(&self) -> usize {
        self.edges.len()
    }
}

/// Result of [`crate::GraphStore::run_query`]: the matched subgraph plus
/// the entity names the query filtered on.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryOutcome {
    pub data: GraphData,
    pub filtered_entities: Vec<String>,
}

fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_dash = false;
    for ch in name.to_ascii_lowercase().chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
            last_dash = false;
        } else if !last_dash && !out.is_empty() {
            out.push('-');
            last_dash = true;
        }
    }
    out.trim_end_matches('-').to_string()
}
