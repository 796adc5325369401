use diesel::*;

use crate::config;
use crate::errors::{Error, NaChainError};
use crate::models::{EntityStatus, NewNode, PLACEHOLDER_NODE_TYPE_ID};

pub const PLACEHOLDER_VALUE: &str = "N/A";

/// The levels a placeholder chain has to cover between a semantic parent and
/// a target node. Empty when the parent sits directly above the target.
pub fn levels_to_bridge(
    target_level: i32,
    parent_level: i32,
) -> Result<std::ops::Range<i32>, NaChainError> {
    let max_depth = config::max_hierarchy_depth();

    if target_level < 0 || target_level > max_depth {
        return Err(NaChainError::LevelOutOfRange(target_level, max_depth));
    }
    if parent_level < 0 || parent_level > max_depth {
        return Err(NaChainError::LevelOutOfRange(parent_level, max_depth));
    }
    if parent_level >= target_level && target_level > 0 {
        return Err(NaChainError::InvertedRange { parent: parent_level, start: target_level });
    }

    if target_level == 0 {
        return Ok(0..0);
    }
    Ok(parent_level + 1..target_level)
}

/// Returns the parent id to use for a node at `target_level`, inserting or
/// reusing N/A placeholder nodes for every skipped level in between.
///
/// Placeholders are deduplicated by (taxonomy, level, parent) so repeated
/// gaps in one taxonomy share a single chain.
pub fn resolve_parent(
    conn: &mut PgConnection,
    taxonomy_id: &str,
    customer_id: &str,
    load_id: i64,
    row_id: Option<i64>,
    target_level: i32,
    semantic_parent: Option<i64>,
    semantic_parent_level: i32,
) -> Result<Option<i64>, Error> {
    let gap = levels_to_bridge(target_level, semantic_parent_level)?;

    if target_level == 0 {
        return Ok(None);
    }

    let mut current = semantic_parent;
    for level in gap {
        let placeholder =
            find_or_create(conn, taxonomy_id, customer_id, level, current, load_id, row_id)?;
        current = Some(placeholder);
    }

    Ok(current)
}

fn find_or_create(
    conn: &mut PgConnection,
    taxonomy: &str,
    customer: &str,
    placeholder_level: i32,
    parent: Option<i64>,
    load: i64,
    row: Option<i64>,
) -> Result<i64, Error> {
    use crate::schema::nodes::dsl::*;

    let existing = nodes
        .filter(taxonomy_id.eq(taxonomy))
        .filter(customer_id.eq(customer))
        .filter(node_type_id.eq(PLACEHOLDER_NODE_TYPE_ID))
        .filter(level.eq(placeholder_level))
        .filter(parent_id.is_not_distinct_from(parent))
        .filter(status.eq(EntityStatus::Active))
        .select(id)
        .order(id.asc())
        .first::<i64>(conn)
        .optional()?;

    if let Some(found) = existing {
        return Ok(found);
    }

    let created = diesel::insert_into(nodes)
        .values(NewNode {
            node_type_id: PLACEHOLDER_NODE_TYPE_ID,
            taxonomy_id: taxonomy.to_string(),
            customer_id: customer.to_string(),
            parent_id: parent,
            value: PLACEHOLDER_VALUE.to_string(),
            value_lower: PLACEHOLDER_VALUE.to_lowercase(),
            profession: Some(PLACEHOLDER_VALUE.to_string()),
            level: placeholder_level,
            status: EntityStatus::Active,
            load_id: load,
            row_id: row,
        })
        .returning(id)
        .get_result::<i64>(conn)?;

    Ok(created)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adjacent_parent_needs_no_placeholders() {
        assert!(levels_to_bridge(3, 2).unwrap().is_empty());
        assert!(levels_to_bridge(1, 0).unwrap().is_empty());
    }

    #[test]
    fn roots_never_bridge() {
        assert!(levels_to_bridge(0, 0).unwrap().is_empty());
    }

    #[test]
    fn skipped_levels_are_enumerated() {
        let levels: Vec<i32> = levels_to_bridge(5, 1).unwrap().collect();
        assert_eq!(levels, vec![2, 3, 4]);

        // an orphan deep node bridges all the way down from the root
        let levels: Vec<i32> = levels_to_bridge(5, 0).unwrap().collect();
        assert_eq!(levels, vec![1, 2, 3, 4]);
    }

    #[test]
    fn out_of_range_levels_are_refused() {
        assert!(matches!(levels_to_bridge(-1, 0), Err(NaChainError::LevelOutOfRange(-1, _))));
        assert!(matches!(levels_to_bridge(99, 0), Err(NaChainError::LevelOutOfRange(99, _))));
        assert!(matches!(levels_to_bridge(2, -1), Err(NaChainError::LevelOutOfRange(-1, _))));
    }

    #[test]
    fn inverted_ranges_are_refused() {
        assert!(matches!(
            levels_to_bridge(2, 2),
            Err(NaChainError::InvertedRange { parent: 2, start: 2 })
        ));
        assert!(matches!(levels_to_bridge(1, 4), Err(NaChainError::InvertedRange { .. })));
    }
}
