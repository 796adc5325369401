use std::collections::HashSet;

use diesel::*;
use tracing::info;

use crate::errors::Error;
use crate::models::EntityStatus;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct GoldSync {
    pub inserted: usize,
    pub deleted: usize,
}

/// Synchronizes Gold with the active, non-AI subset of the Silver
/// mappings. Idempotent set difference: missing rows are inserted, rows
/// whose mapping left the subset are removed, everything else is
/// untouched.
pub fn sync(conn: &mut PgConnection) -> Result<GoldSync, Error> {
    let silver: Vec<(i64, i64, i64)> = {
        use crate::schema::{mapping_rules, mappings};

        mappings::table
            .inner_join(mapping_rules::table)
            .filter(mappings::status.eq(EntityStatus::Active))
            .filter(mapping_rules::ai.eq(false))
            .select((mappings::id, mappings::master_node_id, mappings::child_node_id))
            .load(conn)?
    };

    use crate::schema::gold_mappings::dsl::*;

    let projected: Vec<i64> = gold_mappings.select(mapping_id).load(conn)?;
    let projected: HashSet<i64> = projected.into_iter().collect();
    let silver_ids: HashSet<i64> = silver.iter().map(|(silver_id, _, _)| *silver_id).collect();

    let missing: Vec<_> = silver
        .iter()
        .filter(|(silver_id, _, _)| !projected.contains(silver_id))
        .map(|(silver_id, master, child)| {
            (mapping_id.eq(*silver_id), master_node_id.eq(*master), child_node_id.eq(*child))
        })
        .collect();

    let inserted = diesel::insert_into(gold_mappings)
        .values(&missing)
        .on_conflict(mapping_id)
        .do_nothing()
        .execute(conn)?;

    let stale: Vec<i64> = projected
        .iter()
        .filter(|projected_id| !silver_ids.contains(projected_id))
        .copied()
        .collect();

    let deleted =
        diesel::delete(gold_mappings.filter(mapping_id.eq_any(&stale))).execute(conn)?;

    info!(inserted, deleted, "Gold projection refreshed");

    Ok(GoldSync { inserted, deleted })
}
