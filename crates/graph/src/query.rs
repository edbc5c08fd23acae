//! Query-text scanning helpers.
//!
//! This is the single place that derives entity names and labels from
//! raw query text. Stores report the names a query filtered on through
//! [`crate::QueryOutcome::filtered_entities`], so nothing downstream
//! ever pattern-matches query strings again.

use crate::types::EntityKind;

/// Quoted name literals in a query, in order of appearance, deduplicated.
///
/// Both single- and double-quoted strings count; escaped quotes inside a
/// literal are kept verbatim.
pub fn name_literals(query: &str) -> Vec<String> {
    let mut literals = Vec::new();
    let mut chars = query.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '\'' && ch != '"' {
            continue;
        }
        let quote = ch;
        let mut literal = String::new();
        let mut closed = false;

        while let Some(next) = chars.next() {
            if next == '\\' {
                if let Some(escaped) = chars.next() {
                    literal.push(escaped);
                }
                continue;
            }
            if next == quote {
                closed = true;
                break;
            }
            literal.push(next);
        }

        let trimmed = literal.trim();
        if closed && !trimmed.is_empty() && !literals.iter().any(|seen: &String| seen == trimmed) {
            literals.push(trimmed.to_string());
        }
    }

    literals
}

/// Catalog labels mentioned in a query, deduplicated.
///
/// Tokens are split on non-identifier characters so both `(:Industry)`
/// and bare `pain_point` mentions are recognized.
pub fn label_tokens(query: &str) -> Vec<EntityKind> {
    let mut kinds = Vec::new();

    for token in query.split(|ch: char| !ch.is_alphanumeric() && ch != '_') {
        if token.is_empty() {
            continue;
        }
        if let Some(kind) = EntityKind::from_label(token) {
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
    }

    kinds
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_quoted_literals_in_order() {
        let query = "MATCH (i:Industry {name: 'Banking'})-->(s) WHERE s.name = \"Retail Banking\"";
        assert_eq!(name_literals(query), vec!["Banking", "Retail Banking"]);
    }

    #[test]
    fn deduplicates_repeated_literals() {
        let query = "WHERE i.name = 'Banking' OR s.industry = 'Banking'";
        assert_eq!(name_literals(query), vec!["Banking"]);
    }

    #[test]
    fn ignores_unterminated_and_empty_literals() {
        assert!(name_literals("WHERE name = ''").is_empty());
        assert!(name_literals("WHERE name = 'dangling").is_empty());
    }

    #[test]
    fn finds_labels_in_both_cypher_and_snake_case_form() {
        let query = "MATCH (:Industry)-[:HAS_SECTOR]->(:Sector) RETURN pain_point";
        assert_eq!(
            label_tokens(query),
            vec![EntityKind::Industry, EntityKind::Sector, EntityKind::PainPoint]
        );
    }

    #[test]
    fn unknown_tokens_produce_no_labels() {
        assert!(label_tokens("SELECT * FROM warehouses").is_empty());
    }
}
