//! Fuzzy name matching for catalog entities.
//!
//! Confidence is a normalized similarity score in `0.0..=1.0`. Exact
//! matches score 1.0, containment matches land in a middle band, and
//! everything else falls back to normalized edit distance. A score of
//! 0.0 means no plausible match.

use crate::types::GraphNode;

/// A candidate node with its similarity to the requested name.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeMatch {
    pub node: GraphNode,
    pub confidence: f64,
}

/// Similarity between a catalog name and a user-supplied fragment.
pub fn name_similarity(candidate: &str, fragment: &str) -> f64 {
    let candidate = normalize(candidate);
    let fragment = normalize(fragment);

    if candidate.is_empty() || fragment.is_empty() {
        return 0.0;
    }
    if candidate == fragment {
        return 1.0;
    }

    let (shorter, longer) = if candidate.len() <= fragment.len() {
        (&candidate, &fragment)
    } else {
        (&fragment, &candidate)
    };
    if longer.contains(shorter.as_str()) {
        // Containment band: longer overlaps score closer to an exact hit.
        let ratio = shorter.chars().count() as f64 / longer.chars().count() as f64;
        return 0.55 + 0.35 * ratio;
    }

    let distance = edit_distance(&candidate, &fragment) as f64;
    let max_len = candidate.chars().count().max(fragment.chars().count()) as f64;
    let raw = 1.0 - distance / max_len;
    if raw < 0.35 {
        0.0
    } else {
        raw * 0.8
    }
}

/// Rank `nodes` by similarity to `fragment`, best first, dropping nodes
/// with no plausible match at all.
pub fn rank_matches(nodes: &[GraphNode], fragment: &str) -> Vec<NodeMatch> {
    let mut matches: Vec<NodeMatch> = nodes
        .iter()
        .map(|node| NodeMatch { node: node.clone(), confidence: name_similarity(&node.name, fragment) })
        .filter(|candidate| candidate.confidence > 0.0)
        .collect();

    matches.sort_by(|left, right| {
        right
            .confidence
            .partial_cmp(&left.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| left.node.name.cmp(&right.node.name))
    });
    matches
}

fn normalize(value: &str) -> String {
    value
        .chars()
        .filter(|ch| ch.is_alphanumeric() || ch.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn edit_distance(left: &str, right: &str) -> usize {
    let left: Vec<char> = left.chars().collect();
    let right: Vec<char> = right.chars().collect();

    let mut previous: Vec<usize> = (0..=right.len()).collect();
    let mut current = vec![0usize; right.len() + 1];

    for (i, lch) in left.iter().enumerate() {
        current[0] = i + 1;
        for (j, rch) in right.iter().enumerate() {
            let substitution = previous[j] + usize::from(lch != rch);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[right.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntityKind;

    fn industry(name: &str) -> GraphNode {
        GraphNode::new(EntityKind::Industry, name)
    }

    #[test]
    fn exact_match_scores_one_regardless_of_case() {
        assert_eq!(name_similarity("Banking", "banking"), 1.0);
        assert_eq!(name_similarity("Retail Banking", "retail   banking"), 1.0);
    }

    #[test]
    fn single_typo_stays_a_plausible_match() {
        let score = name_similarity("Banking", "Bnking");
        assert!(score > 0.5, "one dropped letter should stay plausible, got {score}");
        assert!(score < 1.0);
    }

    #[test]
    fn unrelated_names_score_zero() {
        assert_eq!(name_similarity("Banking", "Quantum Mining Conglomerate"), 0.0);
    }

    #[test]
    fn containment_scores_in_middle_band() {
        let score = name_similarity("Retail Banking", "banking");
        assert!((0.55..1.0).contains(&score), "containment should land mid-band, got {score}");
    }

    #[test]
    fn rank_matches_orders_best_first_and_drops_implausible() {
        let nodes = vec![industry("Banking"), industry("Insurance"), industry("Retail Banking")];
        let ranked = rank_matches(&nodes, "banking");

        assert_eq!(ranked[0].node.name, "Banking");
        assert_eq!(ranked[0].confidence, 1.0);
        assert!(ranked.iter().all(|m| m.node.name != "Insurance"));
    }
}
