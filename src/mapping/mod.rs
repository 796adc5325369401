pub mod gold;
pub mod rules;
pub mod seed;
pub mod versions;

use std::time::Instant;

use chrono::{DateTime, Utc};
use diesel::*;
use tracing::{info, warn};

use crate::config;
use crate::database::{self, PgPool};
use crate::errors::Error;
use crate::events::{MapRequest, MapResponse, MapResults};
use crate::ingest::versions as taxonomy_versions;
use crate::models::{EntityStatus, LoadType, Mapping, NewMapping, Node, Taxonomy, TaxonomyType};
use crate::utils::new_progress_bar;
use self::rules::RuleCache;

/// Command rules always map with full confidence.
pub const COMMAND_RULE_CONFIDENCE: i32 = 100;

pub const PROCESS_STATUS_DONE: &str = "done";

/// The state transition decided for one child node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Create,
    Unchanged,
    Supersede,
    Deactivate,
    Noop,
}

/// The exists-diff transition table. `hit` and `existing` carry the Master
/// node id of the match and of the currently active mapping.
pub fn decide(hit: Option<i64>, existing: Option<i64>, load_type: LoadType) -> Transition {
    match (hit, existing, load_type) {
        (Some(_), None, _) => Transition::Create,
        (Some(matched), Some(current), _) if matched == current => Transition::Unchanged,
        (Some(_), Some(_), _) => Transition::Supersede,
        (None, Some(_), LoadType::Updated) => Transition::Deactivate,
        (None, _, _) => Transition::Noop,
    }
}

/// Runs one mapping job: ensures the taxonomy version, evaluates the rule
/// cache against every in-scope child node, applies the per-node state
/// transitions, writes the counters back and refreshes Gold. The whole job
/// is one transaction; individual nodes are isolated with savepoints.
pub fn run(pool: &PgPool, request: &MapRequest) -> Result<MapResponse, Error> {
    let started = Instant::now();
    let customer = request.customer_id.to_string();
    let taxonomy = request.taxonomy_id.to_string();

    let mut conn = pool.get()?;

    let (results, version_id, errors) = conn.build_transaction().serializable().run(|conn| {
        database::apply_deadline(conn)?;

        let version = taxonomy_versions::ensure_for_mapping(
            conn,
            &customer,
            &taxonomy,
            request.load_id,
            request.load_type,
        )?;

        let master = resolve_master_taxonomy(conn)?;
        let cache = RuleCache::load(conn)?;
        let children = load_children(conn, &customer, &taxonomy, request)?;

        info!(load_id = request.load_id, nodes = children.len(), "Mapping customer nodes");

        let bar = new_progress_bar(children.len(), "Mapping nodes");
        let mut results = MapResults::default();
        let mut errors: Vec<String> = Vec::new();

        for child in &children {
            results.nodes_processed += 1;

            // a savepoint per node so one failure cannot poison the rest
            let outcome = conn.transaction(|conn| {
                map_node(conn, &cache, &master, child, request.load_type)
            });

            match outcome {
                Ok((transition, eval_error)) => {
                    match transition {
                        Transition::Create => results.mappings_created += 1,
                        Transition::Unchanged => results.mappings_unchanged += 1,
                        Transition::Supersede => results.mappings_updated += 1,
                        Transition::Deactivate => results.mappings_deactivated += 1,
                        Transition::Noop => {}
                    }
                    if let Some(message) = eval_error {
                        results.failures += 1;
                        errors.push(format!("node {}: {}", child.id, message));
                    }
                }
                Err(err) => {
                    results.failures += 1;
                    errors.push(format!("node {}: {}", child.id, err));
                    warn!(node_id = child.id, error = %err, "Node mapping failed");
                }
            }
            bar.inc(1);
        }
        bar.finish();

        taxonomy_versions::update_counters(
            conn,
            version.id,
            results.nodes_processed,
            results.mappings_created,
            results.mappings_updated + results.mappings_deactivated,
            results.mappings_unchanged,
            results.failures,
            PROCESS_STATUS_DONE,
        )?;

        gold::sync(conn)?;

        Ok::<_, Error>((results, version.id, errors))
    })?;

    let success = results.failures == 0 || results.failures < results.nodes_processed;

    Ok(MapResponse {
        success,
        load_id: request.load_id,
        customer_id: customer,
        taxonomy_id: taxonomy,
        results,
        version_id: Some(version_id),
        errors: (!errors.is_empty()).then_some(errors),
        processing_time_ms: started.elapsed().as_millis() as u64,
    })
}

/// First-match-wins rule evaluation followed by the state transition. A
/// command evaluation error downgrades the node to a no-match and is
/// reported alongside whatever transition that implies.
fn map_node(
    conn: &mut PgConnection,
    cache: &RuleCache,
    master: &Taxonomy,
    child: &Node,
    load_type: LoadType,
) -> Result<(Transition, Option<String>), Error> {
    let mut eval_error = None;
    let mut hit: Option<(i64, i64)> = None;

    for cached in cache.for_child_type(child.node_type_id) {
        match rules::find_match(conn, master, cached, child) {
            Ok(Some(master_node)) => {
                hit = Some((cached.rule.id, master_node));
                break;
            }
            Ok(None) => {}
            Err(err @ Error::Mapping(_)) => {
                eval_error = Some(err.to_string());
                break;
            }
            Err(err) => return Err(err),
        }
    }

    let existing = active_mapping(conn, child.id)?;
    let transition = decide(
        hit.map(|(_, master_node)| master_node),
        existing.as_ref().map(|mapping| mapping.master_node_id),
        load_type,
    );
    let now = Utc::now();

    match transition {
        Transition::Create => {
            if let Some((rule, master_node)) = hit {
                let mapping = insert_mapping(conn, rule, master_node, child.id)?;
                versions::open(conn, mapping.id, now)?;
            }
        }

        Transition::Supersede => {
            if let (Some((rule, master_node)), Some(current)) = (hit, existing) {
                deactivate_mapping(conn, current.id, now)?;
                let mapping = insert_mapping(conn, rule, master_node, child.id)?;
                versions::supersede(conn, current.id, mapping.id, now)?;
            }
        }

        Transition::Deactivate => {
            if let Some(current) = existing {
                deactivate_mapping(conn, current.id, now)?;
                versions::close(conn, current.id, now)?;
            }
        }

        Transition::Unchanged | Transition::Noop => {}
    }

    Ok((transition, eval_error))
}

fn load_children(
    conn: &mut PgConnection,
    customer: &str,
    taxonomy: &str,
    request: &MapRequest,
) -> Result<Vec<Node>, Error> {
    use crate::schema::nodes::dsl::*;

    let mapping_level = request.level.unwrap_or_else(config::mapping_level);

    let mut query = nodes
        .select(Node::as_select())
        .into_boxed()
        .filter(customer_id.eq(customer.to_string()))
        .filter(taxonomy_id.eq(taxonomy.to_string()))
        .filter(status.eq(EntityStatus::Active))
        .filter(level.eq(mapping_level));

    // update loads only remap the nodes the ingestion actually touched
    if let Some(scope) = &request.node_ids {
        query = query.filter(id.eq_any(scope.clone()));
    }

    let children = query.order(id.asc()).load(conn)?;
    Ok(children)
}

fn resolve_master_taxonomy(conn: &mut PgConnection) -> Result<Taxonomy, Error> {
    use crate::errors::LookupError;
    use crate::schema::taxonomies::dsl::*;

    let mut masters: Vec<Taxonomy> = taxonomies
        .filter(taxonomy_type.eq(TaxonomyType::Master))
        .filter(status.eq(EntityStatus::Active))
        .select(Taxonomy::as_select())
        .load(conn)?;

    match masters.len() {
        1 => Ok(masters.remove(0)),
        0 => Err(LookupError::MasterTaxonomy.into()),
        found => Err(LookupError::AmbiguousMasterTaxonomy(found).into()),
    }
}

fn active_mapping(conn: &mut PgConnection, child: i64) -> Result<Option<Mapping>, Error> {
    use crate::schema::mappings::dsl::*;

    let found = mappings
        .filter(child_node_id.eq(child))
        .filter(status.eq(EntityStatus::Active))
        .select(Mapping::as_select())
        .first::<Mapping>(conn)
        .optional()?;

    Ok(found)
}

fn insert_mapping(
    conn: &mut PgConnection,
    rule: i64,
    master_node: i64,
    child_node: i64,
) -> Result<Mapping, Error> {
    use crate::schema::mappings::dsl::*;

    let mapping = diesel::insert_into(mappings)
        .values(NewMapping {
            rule_id: rule,
            master_node_id: master_node,
            child_node_id: child_node,
            confidence: COMMAND_RULE_CONFIDENCE,
            status: EntityStatus::Active,
            created_by: None,
        })
        .returning(Mapping::as_returning())
        .get_result(conn)?;

    Ok(mapping)
}

fn deactivate_mapping(
    conn: &mut PgConnection,
    mapping: i64,
    now: DateTime<Utc>,
) -> Result<(), Error> {
    use crate::schema::mappings::dsl::*;

    diesel::update(mappings.filter(id.eq(mapping)))
        .set((status.eq(EntityStatus::Inactive), updated_at.eq(now)))
        .execute(conn)?;

    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_hit_with_no_existing_mapping_creates() {
        assert_eq!(decide(Some(5), None, LoadType::New), Transition::Create);
        assert_eq!(decide(Some(5), None, LoadType::Updated), Transition::Create);
    }

    #[test]
    fn a_hit_on_the_same_master_is_unchanged() {
        assert_eq!(decide(Some(5), Some(5), LoadType::New), Transition::Unchanged);
        assert_eq!(decide(Some(5), Some(5), LoadType::Updated), Transition::Unchanged);
    }

    #[test]
    fn a_hit_on_a_different_master_supersedes() {
        assert_eq!(decide(Some(6), Some(5), LoadType::New), Transition::Supersede);
        assert_eq!(decide(Some(6), Some(5), LoadType::Updated), Transition::Supersede);
    }

    #[test]
    fn a_miss_only_deactivates_on_update_loads() {
        assert_eq!(decide(None, Some(5), LoadType::Updated), Transition::Deactivate);
        assert_eq!(decide(None, Some(5), LoadType::New), Transition::Noop);
        assert_eq!(decide(None, None, LoadType::Updated), Transition::Noop);
        assert_eq!(decide(None, None, LoadType::New), Transition::Noop);
    }
}
