use std::collections::{BTreeSet, HashMap};

use diesel::*;
use serde::Serialize;
use tracing::info;

use crate::errors::Error;
use crate::models::{EntityStatus, PLACEHOLDER_NODE_TYPE_ID};

/// Generic profession terms that seed the qualified head set.
pub const QUALIFIED_HEAD_SEEDS: &[&str] = &[
    "nurse",
    "therapist",
    "counselor",
    "specialist",
    "coordinator",
    "manager",
    "worker",
    "navigator",
    "assistant",
    "associate",
];

/// The term sets downstream qualifier matchers consume, derived from the
/// Master hierarchy. Everything is lowercased.
#[derive(Debug, Clone, Serialize)]
pub struct Vocabulary {
    pub strong_heads: BTreeSet<String>,
    pub qualified_heads: BTreeSet<String>,
    pub qualifiers: BTreeSet<String>,
}

/// Builds the vocabulary from (level, value) pairs of active
/// non-placeholder nodes.
pub fn build(entries: &[(i32, String)]) -> Vocabulary {
    let values: Vec<(i32, String)> =
        entries.iter().map(|(entry_level, value)| (*entry_level, value.to_lowercase())).collect();

    // multi-token deep values are heads in their own right
    let mut strong_heads = BTreeSet::new();
    for (entry_level, value) in &values {
        if *entry_level >= 4 && value.split_whitespace().count() >= 2 {
            strong_heads.insert(value.clone());
        }
    }

    // seed terms plus the trailing tokens of any deep value built on one
    let mut qualified_heads: BTreeSet<String> =
        QUALIFIED_HEAD_SEEDS.iter().map(|seed| seed.to_string()).collect();
    for (entry_level, value) in &values {
        if *entry_level < 3 {
            continue;
        }
        if QUALIFIED_HEAD_SEEDS.iter().any(|seed| value.contains(seed)) {
            let tokens: Vec<&str> = value.split_whitespace().collect();
            if let Some(last) = tokens.last() {
                qualified_heads.insert((*last).to_string());
            }
            if tokens.len() >= 2 {
                qualified_heads.insert(tokens[tokens.len() - 2..].join(" "));
            }
        }
    }

    // shallow values qualify deeper ones, as does any prefix that precedes
    // a strong head inside another value
    let mut qualifiers = BTreeSet::new();
    for (entry_level, value) in &values {
        if *entry_level <= 3 {
            qualifiers.insert(value.clone());
        }
    }
    for (_, value) in &values {
        for head in &strong_heads {
            if value == head {
                continue;
            }
            if let Some(position) = value.find(head.as_str()) {
                let prefix = value[..position].trim();
                if !prefix.is_empty() {
                    qualifiers.insert(prefix.to_string());
                }
            }
        }
    }

    Vocabulary { strong_heads, qualified_heads, qualifiers }
}

/// Loads and caches vocabularies per taxonomy. One extractor lives for the
/// duration of an invocation or process, matching how the downstream
/// matchers consume it.
#[derive(Default)]
pub struct VocabularyCache {
    cache: HashMap<(String, String), Vocabulary>,
}

impl VocabularyCache {
    pub fn new() -> VocabularyCache {
        VocabularyCache::default()
    }

    pub fn extract(
        &mut self,
        conn: &mut PgConnection,
        customer: &str,
        taxonomy: &str,
    ) -> Result<Vocabulary, Error> {
        let key = (customer.to_string(), taxonomy.to_string());

        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached.clone());
        }

        let entries = load_entries(conn, customer, taxonomy)?;
        let vocabulary = build(&entries);
        info!(
            customer_id = customer,
            taxonomy_id = taxonomy,
            strong_heads = vocabulary.strong_heads.len(),
            qualified_heads = vocabulary.qualified_heads.len(),
            qualifiers = vocabulary.qualifiers.len(),
            "Vocabulary extracted"
        );

        self.cache.insert(key, vocabulary.clone());
        Ok(vocabulary)
    }
}

fn load_entries(
    conn: &mut PgConnection,
    customer: &str,
    taxonomy: &str,
) -> Result<Vec<(i32, String)>, Error> {
    use crate::schema::nodes::dsl::*;

    let entries = nodes
        .filter(customer_id.eq(customer))
        .filter(taxonomy_id.eq(taxonomy))
        .filter(status.eq(EntityStatus::Active))
        .filter(node_type_id.ne(PLACEHOLDER_NODE_TYPE_ID))
        .select((level, value))
        .load(conn)?;

    Ok(entries)
}


#[cfg(test)]
mod tests {
    use super::*;

    fn entries() -> Vec<(i32, String)> {
        vec![
            (0, "Healthcare".to_string()),
            (1, "Nursing".to_string()),
            (2, "Registered Nursing".to_string()),
            (3, "Travel Nurse".to_string()),
            (4, "Registered Nurse".to_string()),
            (4, "Pediatric Registered Nurse".to_string()),
            (5, "LCSW".to_string()),
        ]
    }

    #[test]
    fn strong_heads_need_depth_and_multiple_tokens() {
        let vocabulary = build(&entries());
        assert!(vocabulary.strong_heads.contains("registered nurse"));
        assert!(vocabulary.strong_heads.contains("pediatric registered nurse"));
        // single token, even though deep
        assert!(!vocabulary.strong_heads.contains("lcsw"));
        // multi token but shallow
        assert!(!vocabulary.strong_heads.contains("travel nurse"));
    }

    #[test]
    fn qualified_heads_keep_the_seeds_and_trailing_tokens() {
        let vocabulary = build(&entries());
        for seed in QUALIFIED_HEAD_SEEDS {
            assert!(vocabulary.qualified_heads.contains(*seed));
        }
        // from "travel nurse" (level 3) and the level 4 values
        assert!(vocabulary.qualified_heads.contains("travel nurse"));
        assert!(vocabulary.qualified_heads.contains("registered nurse"));
        // shallow values never contribute
        assert!(!vocabulary.qualified_heads.contains("registered nursing"));
    }

    #[test]
    fn qualifiers_take_shallow_values_and_strong_head_prefixes() {
        let vocabulary = build(&entries());
        assert!(vocabulary.qualifiers.contains("healthcare"));
        assert!(vocabulary.qualifiers.contains("nursing"));
        assert!(vocabulary.qualifiers.contains("travel nurse"));
        // "pediatric" precedes the strong head "registered nurse"
        assert!(vocabulary.qualifiers.contains("pediatric"));
        // deep values are not qualifiers by themselves
        assert!(!vocabulary.qualifiers.contains("lcsw"));
    }

    #[test]
    fn an_empty_master_still_yields_the_seeds() {
        let vocabulary = build(&[]);
        assert!(vocabulary.strong_heads.is_empty());
        assert!(vocabulary.qualifiers.is_empty());
        assert_eq!(vocabulary.qualified_heads.len(), QUALIFIED_HEAD_SEEDS.len());
    }
}
