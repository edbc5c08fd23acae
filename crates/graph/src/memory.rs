//! Deterministic in-memory catalog store.
//!
//! Backs tests, the CLI, and the default server wiring. `run_query`
//! interprets query text deterministically: quoted name literals and
//! label tokens are matched against the catalog and the matched nodes'
//! neighborhoods are returned. Unknown names produce an empty subgraph
//! with the attempted names reported in `filtered_entities`.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::matching::{name_similarity, rank_matches, NodeMatch};
use crate::query::{label_tokens, name_literals};
use crate::types::{EntityKind, GraphData, GraphEdge, GraphNode, GraphPath, QueryOutcome};
use crate::{GraphError, GraphStore};

pub struct MemoryGraphStore {
    nodes: Vec<GraphNode>,
    edges: Vec<GraphEdge>,
    // node id -> (neighbor node index, edge index), undirected
    adjacency: HashMap<String, Vec<(usize, usize)>>,
}

impl MemoryGraphStore {
    pub fn new(nodes: Vec<GraphNode>, edges: Vec<GraphEdge>) -> Self {
        let index_by_id: HashMap<&str, usize> =
            nodes.iter().enumerate().map(|(index, node)| (node.id.as_str(), index)).collect();

        let mut adjacency: HashMap<String, Vec<(usize, usize)>> = HashMap::new();
        for (edge_index, edge) in edges.iter().enumerate() {
            let (Some(&from), Some(&to)) =
                (index_by_id.get(edge.from.as_str()), index_by_id.get(edge.to.as_str()))
            else {
                continue;
            };
            adjacency.entry(edge.from.clone()).or_default().push((to, edge_index));
            adjacency.entry(edge.to.clone()).or_default().push((from, edge_index));
        }

        Self { nodes, edges, adjacency }
    }

    /// The demo business catalog: industries → sectors → departments →
    /// pain points → AI project recommendations.
    pub fn seeded() -> Self {
        let mut nodes = Vec::new();
        let mut edges = Vec::new();

        let mut add = |kind: EntityKind, name: &str, nodes: &mut Vec<GraphNode>| -> String {
            let node = GraphNode::new(kind, name);
            let id = node.id.clone();
            nodes.push(node);
            id
        };
        let mut link = |from: &str, to: &str, relationship: &str, edges: &mut Vec<GraphEdge>| {
            edges.push(GraphEdge {
                from: from.to_string(),
                to: to.to_string(),
                relationship: relationship.to_string(),
            });
        };

        let banking = add(EntityKind::Industry, "Banking", &mut nodes);
        let insurance = add(EntityKind::Industry, "Insurance", &mut nodes);
        let retail = add(EntityKind::Industry, "Retail", &mut nodes);
        let healthcare = add(EntityKind::Industry, "Healthcare", &mut nodes);
        let manufacturing = add(EntityKind::Industry, "Manufacturing", &mut nodes);

        let retail_banking = add(EntityKind::Sector, "Retail Banking", &mut nodes);
        let corporate_banking = add(EntityKind::Sector, "Corporate Banking", &mut nodes);
        let payments = add(EntityKind::Sector, "Payments", &mut nodes);
        let life_insurance = add(EntityKind::Sector, "Life Insurance", &mut nodes);
        let property_casualty = add(EntityKind::Sector, "Property and Casualty", &mut nodes);
        let ecommerce = add(EntityKind::Sector, "E-Commerce", &mut nodes);
        let hospitals = add(EntityKind::Sector, "Hospitals", &mut nodes);
        let discrete_manufacturing = add(EntityKind::Sector, "Discrete Manufacturing", &mut nodes);
        link(&banking, &retail_banking, "HAS_SECTOR", &mut edges);
        link(&banking, &corporate_banking, "HAS_SECTOR", &mut edges);
        link(&banking, &payments, "HAS_SECTOR", &mut edges);
        link(&insurance, &life_insurance, "HAS_SECTOR", &mut edges);
        link(&insurance, &property_casualty, "HAS_SECTOR", &mut edges);
        link(&retail, &ecommerce, "HAS_SECTOR", &mut edges);
        link(&healthcare, &hospitals, "HAS_SECTOR", &mut edges);
        link(&manufacturing, &discrete_manufacturing, "HAS_SECTOR", &mut edges);

        let customer_service = add(EntityKind::Department, "Customer Service", &mut nodes);
        let fraud_operations = add(EntityKind::Department, "Fraud Operations", &mut nodes);
        let claims_processing = add(EntityKind::Department, "Claims Processing", &mut nodes);
        let underwriting = add(EntityKind::Department, "Underwriting", &mut nodes);
        let supply_chain = add(EntityKind::Department, "Supply Chain", &mut nodes);
        let patient_intake = add(EntityKind::Department, "Patient Intake", &mut nodes);
        link(&retail_banking, &customer_service, "HAS_DEPARTMENT", &mut edges);
        link(&retail_banking, &fraud_operations, "HAS_DEPARTMENT", &mut edges);
        link(&payments, &fraud_operations, "HAS_DEPARTMENT", &mut edges);
        link(&corporate_banking, &underwriting, "HAS_DEPARTMENT", &mut edges);
        link(&life_insurance, &underwriting, "HAS_DEPARTMENT", &mut edges);
        link(&property_casualty, &claims_processing, "HAS_DEPARTMENT", &mut edges);
        link(&ecommerce, &customer_service, "HAS_DEPARTMENT", &mut edges);
        link(&ecommerce, &supply_chain, "HAS_DEPARTMENT", &mut edges);
        link(&discrete_manufacturing, &supply_chain, "HAS_DEPARTMENT", &mut edges);
        link(&hospitals, &patient_intake, "HAS_DEPARTMENT", &mut edges);

        let high_call_volume = add(EntityKind::PainPoint, "High Call Volume", &mut nodes);
        let fraud_latency = add(EntityKind::PainPoint, "Fraud Detection Latency", &mut nodes);
        let manual_triage = add(EntityKind::PainPoint, "Manual Claims Triage", &mut nodes);
        let slow_underwriting = add(EntityKind::PainPoint, "Slow Underwriting Decisions", &mut nodes);
        let forecast_errors = add(EntityKind::PainPoint, "Inventory Forecast Errors", &mut nodes);
        let document_backlog = add(EntityKind::PainPoint, "Document Processing Backlog", &mut nodes);
        link(&customer_service, &high_call_volume, "FACES", &mut edges);
        link(&fraud_operations, &fraud_latency, "FACES", &mut edges);
        link(&claims_processing, &manual_triage, "FACES", &mut edges);
        link(&underwriting, &slow_underwriting, "FACES", &mut edges);
        link(&supply_chain, &forecast_errors, "FACES", &mut edges);
        link(&patient_intake, &document_backlog, "FACES", &mut edges);
        link(&claims_processing, &document_backlog, "FACES", &mut edges);

        let support_chatbot = add(EntityKind::AiProject, "Support Deflection Chatbot", &mut nodes);
        let fraud_scoring = add(EntityKind::AiProject, "Real-Time Fraud Scoring Engine", &mut nodes);
        let triage_copilot = add(EntityKind::AiProject, "Claims Triage Copilot", &mut nodes);
        let underwriting_assistant =
            add(EntityKind::AiProject, "Underwriting Risk Assistant", &mut nodes);
        let demand_forecasting = add(EntityKind::AiProject, "Demand Forecasting Model", &mut nodes);
        let document_pipeline =
            add(EntityKind::AiProject, "Document Intelligence Pipeline", &mut nodes);
        link(&high_call_volume, &support_chatbot, "ADDRESSED_BY", &mut edges);
        link(&fraud_latency, &fraud_scoring, "ADDRESSED_BY", &mut edges);
        link(&manual_triage, &triage_copilot, "ADDRESSED_BY", &mut edges);
        link(&slow_underwriting, &underwriting_assistant, "ADDRESSED_BY", &mut edges);
        link(&forecast_errors, &demand_forecasting, "ADDRESSED_BY", &mut edges);
        link(&document_backlog, &document_pipeline, "ADDRESSED_BY", &mut edges);

        Self::new(nodes, edges)
    }

    pub fn node_names(&self, kind: EntityKind) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|node| node.kind == kind)
            .map(|node| node.name.clone())
            .collect()
    }

    fn find_by_name(&self, name: &str, kinds: &[EntityKind]) -> Option<usize> {
        self.nodes.iter().position(|node| {
            (kinds.is_empty() || kinds.contains(&node.kind))
                && name_similarity(&node.name, name) >= 0.999
        })
    }

    /// A node plus its direct neighbors and the connecting edges.
    fn neighborhood(&self, node_index: usize) -> GraphData {
        let node = &self.nodes[node_index];
        let mut data = GraphData { nodes: vec![node.clone()], edges: Vec::new() };

        if let Some(neighbors) = self.adjacency.get(&node.id) {
            for &(neighbor_index, edge_index) in neighbors {
                data.merge(GraphData {
                    nodes: vec![self.nodes[neighbor_index].clone()],
                    edges: vec![self.edges[edge_index].clone()],
                });
            }
        }

        data
    }

    /// All shortest paths between two node indices, bounded by `max_depth`
    /// hops, over undirected adjacency.
    fn bfs_paths(&self, from: usize, to: usize, max_depth: u32) -> Vec<GraphPath> {
        if from == to {
            return vec![GraphPath { nodes: vec![self.nodes[from].clone()], edges: Vec::new() }];
        }

        let mut distance: HashMap<usize, u32> = HashMap::from([(from, 0)]);
        // node index -> (predecessor node index, edge index) pairs on shortest paths
        let mut parents: HashMap<usize, Vec<(usize, usize)>> = HashMap::new();
        let mut queue = VecDeque::from([from]);

        while let Some(current) = queue.pop_front() {
            let current_distance = distance[&current];
            if current_distance >= max_depth {
                continue;
            }
            let Some(neighbors) = self.adjacency.get(&self.nodes[current].id) else { continue };

            for &(neighbor, edge_index) in neighbors {
                match distance.get(&neighbor) {
                    None => {
                        distance.insert(neighbor, current_distance + 1);
                        parents.entry(neighbor).or_default().push((current, edge_index));
                        queue.push_back(neighbor);
                    }
                    Some(&known) if known == current_distance + 1 => {
                        parents.entry(neighbor).or_default().push((current, edge_index));
                    }
                    Some(_) => {}
                }
            }
        }

        if !distance.contains_key(&to) {
            return Vec::new();
        }

        let mut paths = Vec::new();
        let mut stack = vec![(to, vec![to], Vec::<usize>::new())];
        while let Some((current, node_trail, edge_trail)) = stack.pop() {
            if current == from {
                let nodes = node_trail.iter().rev().map(|&i| self.nodes[i].clone()).collect();
                let edges = edge_trail.iter().rev().map(|&i| self.edges[i].clone()).collect();
                paths.push(GraphPath { nodes, edges });
                continue;
            }
            for &(parent, edge_index) in parents.get(&current).into_iter().flatten() {
                let mut next_nodes = node_trail.clone();
                next_nodes.push(parent);
                let mut next_edges = edge_trail.clone();
                next_edges.push(edge_index);
                stack.push((parent, next_nodes, next_edges));
            }
        }

        paths.sort_by_key(|path| path.nodes.iter().map(|node| node.id.clone()).collect::<Vec<_>>());
        paths
    }
}

impl Default for MemoryGraphStore {
    fn default() -> Self {
        Self::seeded()
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn lookup_nodes(
        &self,
        kind: EntityKind,
        name_fragment: &str,
    ) -> Result<Vec<NodeMatch>, GraphError> {
        let candidates: Vec<GraphNode> =
            self.nodes.iter().filter(|node| node.kind == kind).cloned().collect();
        Ok(rank_matches(&candidates, name_fragment))
    }

    async fn run_query(
        &self,
        query: &str,
        params: &Map<String, Value>,
    ) -> Result<QueryOutcome, GraphError> {
        if query.trim().is_empty() {
            return Err(GraphError::QueryFailed("query text is empty".to_string()));
        }

        let mut names = name_literals(query);
        for value in params.values() {
            if let Value::String(name) = value {
                let trimmed = name.trim();
                if !trimmed.is_empty() && !names.iter().any(|seen| seen == trimmed) {
                    names.push(trimmed.to_string());
                }
            }
        }
        let labels = label_tokens(query);

        if names.is_empty() && labels.is_empty() {
            return Err(GraphError::QueryFailed(
                "query names no catalog labels or entities".to_string(),
            ));
        }

        let mut data = GraphData::default();
        if names.is_empty() {
            // Label-only query: the full slice of those kinds, plus the
            // edges that stay inside the slice.
            for node in self.nodes.iter().filter(|node| labels.contains(&node.kind)) {
                data.merge(GraphData { nodes: vec![node.clone()], edges: Vec::new() });
            }
            for edge in &self.edges {
                let inside = |id: &str| data.nodes.iter().any(|node| node.id == id);
                if inside(&edge.from) && inside(&edge.to) {
                    data.merge(GraphData { nodes: Vec::new(), edges: vec![edge.clone()] });
                }
            }
        } else {
            for name in &names {
                if let Some(index) = self.find_by_name(name, &labels) {
                    data.merge(self.neighborhood(index));
                }
            }
        }

        Ok(QueryOutcome { data, filtered_entities: names })
    }

    async fn shortest_paths(
        &self,
        from_name: &str,
        to_name: &str,
        max_depth: u32,
    ) -> Result<Vec<GraphPath>, GraphError> {
        let from = self
            .find_by_name(from_name, &[])
            .ok_or_else(|| GraphError::NodeNotFound { name: from_name.to_string() })?;
        let to = self
            .find_by_name(to_name, &[])
            .ok_or_else(|| GraphError::NodeNotFound { name: to_name.to_string() })?;

        Ok(self.bfs_paths(from, to, max_depth))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lookup_ranks_exact_catalog_name_first() {
        let store = MemoryGraphStore::seeded();
        let matches = store.lookup_nodes(EntityKind::Industry, "banking").await.unwrap();

        assert_eq!(matches[0].node.name, "Banking");
        assert_eq!(matches[0].confidence, 1.0);
    }

    #[tokio::test]
    async fn lookup_finds_fuzzy_match_for_typo() {
        let store = MemoryGraphStore::seeded();
        let matches = store.lookup_nodes(EntityKind::Industry, "Bnking").await.unwrap();

        assert!(!matches.is_empty());
        assert_eq!(matches[0].node.name, "Banking");
        assert!(matches[0].confidence < 1.0);
    }

    #[tokio::test]
    async fn query_with_known_name_returns_neighborhood() {
        let store = MemoryGraphStore::seeded();
        let outcome = store
            .run_query("MATCH (i:Industry {name: 'Banking'})-->(s) RETURN s", &Map::new())
            .await
            .unwrap();

        assert_eq!(outcome.filtered_entities, vec!["Banking"]);
        assert!(outcome.data.nodes.iter().any(|node| node.name == "Banking"));
        assert!(outcome.data.nodes.iter().any(|node| node.name == "Retail Banking"));
        assert!(!outcome.data.edges.is_empty());
    }

    #[tokio::test]
    async fn query_with_unknown_name_reports_it_without_data() {
        let store = MemoryGraphStore::seeded();
        let outcome = store
            .run_query("MATCH (i:Industry {name: 'Quantum Bank'}) RETURN i", &Map::new())
            .await
            .unwrap();

        assert!(outcome.data.is_empty());
        assert_eq!(outcome.filtered_entities, vec!["Quantum Bank"]);
    }

    #[tokio::test]
    async fn label_only_query_returns_whole_slice() {
        let store = MemoryGraphStore::seeded();
        let outcome = store.run_query("MATCH (p:PainPoint) RETURN p", &Map::new()).await.unwrap();

        assert!(outcome.data.nodes.iter().all(|node| node.kind == EntityKind::PainPoint));
        assert!(outcome.data.node_count() >= 5);
        assert!(outcome.filtered_entities.is_empty());
    }

    #[tokio::test]
    async fn query_params_contribute_filtered_names() {
        let store = MemoryGraphStore::seeded();
        let mut params = Map::new();
        params.insert("name".to_string(), Value::String("Banking".to_string()));
        let outcome =
            store.run_query("MATCH (i:Industry {name: $name}) RETURN i", &params).await.unwrap();

        assert_eq!(outcome.filtered_entities, vec!["Banking"]);
        assert!(!outcome.data.is_empty());
    }

    #[tokio::test]
    async fn unintelligible_query_is_an_execution_error() {
        let store = MemoryGraphStore::seeded();
        let result = store.run_query("SELECT * FROM warehouses", &Map::new()).await;

        assert!(matches!(result, Err(GraphError::QueryFailed(_))));
    }

    #[tokio::test]
    async fn shortest_paths_connect_industry_to_project() {
        let store = MemoryGraphStore::seeded();
        let paths = store
            .shortest_paths("Banking", "Support Deflection Chatbot", 6)
            .await
            .unwrap();

        assert!(!paths.is_empty());
        let path = &paths[0];
        assert_eq!(path.nodes.first().map(|n| n.name.as_str()), Some("Banking"));
        assert_eq!(path.nodes.last().map(|n| n.name.as_str()), Some("Support Deflection Chatbot"));
        assert_eq!(path.hops(), path.nodes.len() - 1);
    }

    #[tokio::test]
    async fn shortest_paths_respect_max_depth() {
        let store = MemoryGraphStore::seeded();
        let paths = store.shortest_paths("Banking", "Support Deflection Chatbot", 2).await.unwrap();

        assert!(paths.is_empty(), "project is more than two hops from the industry");
    }

    #[tokio::test]
    async fn shortest_paths_fail_for_unknown_endpoint() {
        let store = MemoryGraphStore::seeded();
        let result = store.shortest_paths("Banking", "Quantum Bank", 4).await;

        assert_eq!(result, Err(GraphError::NodeNotFound { name: "Quantum Bank".to_string() }));
        let message = result.unwrap_err().to_string();
        assert_eq!(message, "no catalog node named `Quantum Bank`");
    }
}
