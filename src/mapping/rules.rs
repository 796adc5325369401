use std::collections::HashMap;

use diesel::*;
use regex::RegexBuilder;

use crate::errors::{Error, MappingError};
use crate::models::{EntityStatus, MappingRule, Node, RuleAssignment, RuleCommand, Taxonomy};

/// An enabled assignment joined with its rule, in evaluation order.
#[derive(Debug, Clone)]
pub struct CachedRule {
    pub assignment: RuleAssignment,
    pub rule: MappingRule,
}

/// The per-invocation cache of enabled, non-AI rule assignments, grouped by
/// (master node type, child node type) and ordered by priority. Dropped
/// when the engine returns.
pub struct RuleCache {
    groups: HashMap<(i64, i64), Vec<CachedRule>>,
}

impl RuleCache {
    pub fn load(conn: &mut PgConnection) -> Result<RuleCache, Error> {
        use crate::schema::{mapping_rules, rule_assignments};

        let rows: Vec<(RuleAssignment, MappingRule)> = rule_assignments::table
            .inner_join(mapping_rules::table)
            .filter(rule_assignments::enabled.eq(true))
            .filter(mapping_rules::enabled.eq(true))
            .filter(mapping_rules::ai.eq(false))
            .order((rule_assignments::priority.asc(), rule_assignments::id.asc()))
            .select((RuleAssignment::as_select(), MappingRule::as_select()))
            .load(conn)?;

        let mut groups: HashMap<(i64, i64), Vec<CachedRule>> = HashMap::new();
        for (assignment, rule) in rows {
            let key = (assignment.master_node_type_id, assignment.child_node_type_id);
            groups.entry(key).or_default().push(CachedRule { assignment, rule });
        }

        Ok(RuleCache { groups })
    }

    /// All assignments that apply to a child node type, lowest priority
    /// number first.
    pub fn for_child_type(&self, child_type: i64) -> Vec<&CachedRule> {
        let mut merged: Vec<&CachedRule> = self
            .groups
            .iter()
            .filter(|((_, child), _)| *child == child_type)
            .flat_map(|(_, cached)| cached.iter())
            .collect();

        merged.sort_by_key(|cached| (cached.assignment.priority, cached.assignment.id));
        merged
    }

    #[cfg(test)]
    fn insert(&mut self, cached: CachedRule) {
        let key = (cached.assignment.master_node_type_id, cached.assignment.child_node_type_id);
        self.groups.entry(key).or_default().push(cached);
    }
}

/// The needle a LIKE-style command compares against: the rule pattern when
/// one is set, the child value otherwise. Always lowercased.
pub fn command_needle(rule: &MappingRule, child: &Node) -> String {
    match &rule.pattern {
        Some(pattern) if !pattern.is_empty() => pattern.to_lowercase(),
        _ => child.value_lower.clone(),
    }
}

/// Executes one assignment's command against the active Master nodes of
/// the assigned type, returning at most one match. Candidates are ordered
/// by id so repeated runs pick the same winner.
pub fn find_match(
    conn: &mut PgConnection,
    master: &Taxonomy,
    cached: &CachedRule,
    child: &Node,
) -> Result<Option<i64>, Error> {
    use crate::schema::nodes::dsl::*;

    let base = || {
        nodes
            .filter(taxonomy_id.eq(master.taxonomy_id.clone()))
            .filter(customer_id.eq(master.customer_id.clone()))
            .filter(node_type_id.eq(cached.assignment.master_node_type_id))
            .filter(status.eq(EntityStatus::Active))
    };

    let needle = command_needle(&cached.rule, child);

    let found = match cached.rule.command {
        RuleCommand::Equals => base()
            .filter(value_lower.eq(needle))
            .order(id.asc())
            .select(id)
            .first::<i64>(conn)
            .optional()?,

        RuleCommand::Contains => base()
            .filter(value_lower.like(format!("%{needle}%")))
            .order(id.asc())
            .select(id)
            .first::<i64>(conn)
            .optional()?,

        RuleCommand::StartsWith => base()
            .filter(value_lower.like(format!("{needle}%")))
            .order(id.asc())
            .select(id)
            .first::<i64>(conn)
            .optional()?,

        RuleCommand::EndsWith => base()
            .filter(value_lower.like(format!("%{needle}")))
            .order(id.asc())
            .select(id)
            .first::<i64>(conn)
            .optional()?,

        RuleCommand::Regex => {
            let pattern = match &cached.rule.pattern {
                Some(pattern) if !pattern.is_empty() => pattern.clone(),
                _ => regex::escape(&child.value),
            };
            let matcher = RegexBuilder::new(&pattern)
                .case_insensitive(true)
                .build()
                .map_err(|err| MappingError::InvalidPattern(cached.rule.name.clone(), err))?;

            let candidates: Vec<(i64, String)> =
                base().order(id.asc()).select((id, value)).load(conn)?;

            candidates
                .into_iter()
                .find(|(_, candidate)| matcher.is_match(candidate))
                .map(|(found_id, _)| found_id)
        }
    };

    Ok(found)
}


#[cfg(test)]
mod tests {
    use super::*;

    fn rule(rule_id: i64, command: RuleCommand, pattern: Option<&str>) -> MappingRule {
        MappingRule {
            id: rule_id,
            name: format!("rule-{rule_id}"),
            enabled: true,
            command,
            pattern: pattern.map(str::to_string),
            ai: false,
            human: false,
        }
    }

    fn assignment(rule_id: i64, master_type: i64, child_type: i64, priority: i32) -> RuleAssignment {
        RuleAssignment {
            id: rule_id,
            rule_id,
            master_node_type_id: master_type,
            child_node_type_id: child_type,
            priority,
            enabled: true,
        }
    }

    fn child(value: &str) -> Node {
        Node {
            id: 1,
            node_type_id: 7,
            taxonomy_id: "9".to_string(),
            customer_id: "3".to_string(),
            parent_id: None,
            value: value.to_string(),
            value_lower: value.to_lowercase(),
            profession: None,
            level: 1,
            status: EntityStatus::Active,
            load_id: 1,
            row_id: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn the_child_value_stands_in_for_an_empty_pattern() {
        let with_pattern = rule(1, RuleCommand::Contains, Some("Nurse"));
        assert_eq!(command_needle(&with_pattern, &child("RN")), "nurse");

        let without = rule(2, RuleCommand::Equals, None);
        assert_eq!(command_needle(&without, &child("RN")), "rn");

        let empty = rule(3, RuleCommand::Equals, Some(""));
        assert_eq!(command_needle(&empty, &child("LCSW")), "lcsw");
    }

    #[test]
    fn child_type_lookups_merge_groups_in_priority_order() {
        let mut cache = RuleCache { groups: HashMap::new() };
        cache.insert(CachedRule {
            assignment: assignment(1, 100, 7, 20),
            rule: rule(1, RuleCommand::Contains, Some("nurse")),
        });
        cache.insert(CachedRule {
            assignment: assignment(2, 101, 7, 10),
            rule: rule(2, RuleCommand::Equals, None),
        });
        cache.insert(CachedRule {
            assignment: assignment(3, 100, 8, 5),
            rule: rule(3, RuleCommand::Equals, None),
        });

        let ordered = cache.for_child_type(7);
        let priorities: Vec<i32> =
            ordered.iter().map(|cached| cached.assignment.priority).collect();
        assert_eq!(priorities, vec![10, 20]);

        assert!(cache.for_child_type(99).is_empty());
    }
}
