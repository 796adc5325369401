use std::collections::HashMap;

use diesel::upsert::{excluded, on_constraint};
use diesel::*;

use crate::errors::{Error, InvariantError};
use crate::events::RawRow;
use crate::ingest::dictionaries::Dictionaries;
use crate::ingest::layout::{self, CustomerLayout, Layout, MasterLayout};
use crate::ingest::placeholders;
use crate::models::{EntityStatus, LoadType, NewNode, NewNodeAttribute, TaxonomyType};

/// A cell is N/A when it is blank or one of the not-applicable literals.
/// N/A cells never become nodes or attributes on their own.
pub fn is_na(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty() || trimmed.eq_ignore_ascii_case("n/a") || trimmed.eq_ignore_ascii_case("na")
}

/// Multi-valued cells hold sibling nodes separated by `;`.
pub fn split_siblings(value: &str) -> Vec<&str> {
    value.split(';').map(str::trim).filter(|part| !is_na(part)).collect()
}

fn cell<'r>(record: &'r RawRow, key: &str) -> &'r str {
    record.get(key).map(String::as_str).unwrap_or("")
}


/// Per-level memory of the most recently created node while walking the
/// rows of one Master load in source order. Scoped to a single invocation.
#[derive(Debug, Default)]
pub struct RollingAncestors {
    last_seen: HashMap<i32, i64>,
}

impl RollingAncestors {
    pub fn new() -> RollingAncestors {
        RollingAncestors::default()
    }

    /// Finds the semantic parent for a node at `level`: the nearest lower
    /// level that has been seen before and whose cell in the current row is
    /// not N/A. Falls back to (none, level 0) when nothing qualifies.
    pub fn resolve<F>(&self, level: i32, cell_present: F) -> (Option<i64>, i32)
    where
        F: Fn(i32) -> bool,
    {
        for candidate in (0..level).rev() {
            if let Some(node_id) = self.last_seen.get(&candidate) {
                if cell_present(candidate) {
                    return (Some(*node_id), candidate);
                }
            }
        }
        (None, 0)
    }

    pub fn record(&mut self, level: i32, node_id: i64) {
        self.last_seen.insert(level, node_id);
    }
}


/// Transforms one source row into Silver hierarchy rows and attribute
/// facts. Holds the rolling ancestor state for the duration of a load.
pub struct RowTransformer<'a> {
    load_id: i64,
    load_type: LoadType,
    taxonomy_type: TaxonomyType,
    customer_id: &'a str,
    taxonomy_id: &'a str,
    layout: &'a Layout,
    /// Record upserts into the reconciliation staging tables.
    staging: bool,
    dictionaries: Dictionaries,
    ancestors: RollingAncestors,
    /// Every node id this load touched, in processing order.
    pub processed_node_ids: Vec<i64>,
}

impl<'a> RowTransformer<'a> {
    pub fn new(
        load_id: i64,
        load_type: LoadType,
        taxonomy_type: TaxonomyType,
        customer_id: &'a str,
        taxonomy_id: &'a str,
        layout: &'a Layout,
        staging: bool,
    ) -> RowTransformer<'a> {
        RowTransformer {
            load_id,
            load_type,
            taxonomy_type,
            customer_id,
            taxonomy_id,
            layout,
            staging,
            dictionaries: Dictionaries::new(Some(load_id)),
            ancestors: RollingAncestors::new(),
            processed_node_ids: Vec::new(),
        }
    }

    pub fn process_row(
        &mut self,
        conn: &mut PgConnection,
        record: &RawRow,
        row_id: i64,
    ) -> Result<(), Error> {
        match (self.taxonomy_type, self.layout) {
            (TaxonomyType::Master, Layout::Master(master)) => {
                self.process_master_row(conn, master, record, row_id)
            }
            (TaxonomyType::Customer, Layout::Customer(customer)) => {
                self.process_customer_row(conn, customer, record, row_id)
            }
            // the coordinator resolves the layout from the same taxonomy type
            _ => unreachable!("layout does not match the taxonomy type"),
        }
    }

    /// Walks the declared levels in ascending order and upserts every
    /// non-N/A cell at its explicit level. Single-node-per-row files carry
    /// one non-N/A level so the walk degenerates to exactly that node.
    fn process_master_row(
        &mut self,
        conn: &mut PgConnection,
        master: &MasterLayout,
        record: &RawRow,
        row_id: i64,
    ) -> Result<(), Error> {
        let deepest = master
            .node_levels
            .iter()
            .rev()
            .find(|column| !is_na(cell(record, &column.key)))
            .map(|column| column.level);

        let profession_cell = cell(record, &master.profession.key);
        let profession =
            (!is_na(profession_cell)).then(|| profession_cell.trim().to_string());

        let mut last_node = None;

        for column in &master.node_levels {
            let value = cell(record, &column.key);
            if is_na(value) {
                continue;
            }

            let (semantic_parent, semantic_level) = self.ancestors.resolve(column.level, |k| {
                master
                    .node_levels
                    .iter()
                    .find(|level_column| level_column.level == k)
                    .map(|level_column| !is_na(cell(record, &level_column.key)))
                    .unwrap_or(false)
            });

            let parent = placeholders::resolve_parent(
                conn,
                self.taxonomy_id,
                self.customer_id,
                self.load_id,
                Some(row_id),
                column.level,
                semantic_parent,
                semantic_level,
            )?;

            // a bridged gap means placeholder nodes are part of this load
            if self.staging && column.level > 0 && semantic_level < column.level - 1 {
                self.stage_node(
                    conn,
                    crate::models::PLACEHOLDER_NODE_TYPE_ID,
                    &placeholders::PLACEHOLDER_VALUE.to_lowercase(),
                )?;
            }

            let type_id = self.dictionaries.node_type(conn, &column.name)?;
            let node_profession = if Some(column.level) == deepest { profession.clone() } else { None };

            let mut last_sibling = None;
            for sibling in split_siblings(value) {
                let node_id = self.upsert_node(
                    conn,
                    type_id,
                    parent,
                    sibling,
                    node_profession.clone(),
                    column.level,
                    row_id,
                )?;
                self.processed_node_ids.push(node_id);
                last_sibling = Some(node_id);
            }

            if let Some(node_id) = last_sibling {
                self.ancestors.record(column.level, node_id);
                last_node = Some(node_id);
            }
        }

        // attributes and the profession string belong to the deepest node
        if let Some(node_id) = last_node {
            for column in &master.attributes {
                if column.key == master.profession.key {
                    continue;
                }
                let value = cell(record, &column.key);
                if is_na(value) {
                    continue;
                }
                let attribute_type = self.dictionaries.attribute_type(conn, &column.name)?;
                self.upsert_attribute(conn, node_id, attribute_type, value.trim(), row_id)?;
            }
        }

        Ok(())
    }

    /// Customer rows are flat: one node at level 1 with no parent, every
    /// other column a dynamic attribute.
    fn process_customer_row(
        &mut self,
        conn: &mut PgConnection,
        customer: &CustomerLayout,
        record: &RawRow,
        row_id: i64,
    ) -> Result<(), Error> {
        let profession_value = cell(record, &customer.profession.key);
        if is_na(profession_value) {
            return Ok(());
        }
        let profession_value = profession_value.trim();

        let type_id = self.dictionaries.node_type(conn, &customer.profession.name)?;
        let node_id = self.upsert_node(
            conn,
            type_id,
            None,
            profession_value,
            Some(profession_value.to_string()),
            1,
            row_id,
        )?;
        self.processed_node_ids.push(node_id);

        for (key, value) in record.iter() {
            if key == &customer.profession.key || is_na(value) {
                continue;
            }
            let attribute_type =
                self.dictionaries.attribute_type(conn, &layout::column_name(key))?;
            self.upsert_attribute(conn, node_id, attribute_type, value.trim(), row_id)?;
        }

        Ok(())
    }

    /// Natural-key upsert. New loads never modify an existing node; updated
    /// loads refresh the parent, profession, level, status and lineage.
    fn upsert_node(
        &mut self,
        conn: &mut PgConnection,
        type_id: i64,
        parent: Option<i64>,
        node_value: &str,
        node_profession: Option<String>,
        node_level: i32,
        source_row_id: i64,
    ) -> Result<i64, Error> {
        use crate::schema::nodes::dsl::*;

        let lowered = node_value.to_lowercase();
        let record = NewNode {
            node_type_id: type_id,
            taxonomy_id: self.taxonomy_id.to_string(),
            customer_id: self.customer_id.to_string(),
            parent_id: parent,
            value: node_value.to_string(),
            value_lower: lowered.clone(),
            profession: node_profession,
            level: node_level,
            status: EntityStatus::Active,
            load_id: self.load_id,
            row_id: Some(source_row_id),
        };

        let node_id = match self.load_type {
            LoadType::New => {
                let inserted = diesel::insert_into(nodes)
                    .values(&record)
                    .on_conflict(on_constraint("nodes_natural_key"))
                    .do_nothing()
                    .returning(id)
                    .get_result::<i64>(conn)
                    .optional()?;

                match inserted {
                    Some(new_id) => new_id,
                    // first-seen casing wins, re-select the existing row
                    None => nodes
                        .filter(taxonomy_id.eq(self.taxonomy_id))
                        .filter(node_type_id.eq(type_id))
                        .filter(customer_id.eq(self.customer_id))
                        .filter(parent_id.is_not_distinct_from(parent))
                        .filter(value_lower.eq(&lowered))
                        .select(id)
                        .get_result::<i64>(conn)?,
                }
            }

            LoadType::Updated => diesel::insert_into(nodes)
                .values(&record)
                .on_conflict(on_constraint("nodes_natural_key"))
                .do_update()
                .set((
                    parent_id.eq(excluded(parent_id)),
                    profession.eq(excluded(profession)),
                    level.eq(excluded(level)),
                    status.eq(EntityStatus::Active),
                    load_id.eq(excluded(load_id)),
                    row_id.eq(excluded(row_id)),
                    updated_at.eq(chrono::Utc::now()),
                ))
                .returning(id)
                .get_result::<i64>(conn)?,
        };

        if parent == Some(node_id) {
            return Err(InvariantError::SelfParent(node_id).into());
        }

        if self.staging {
            self.stage_node(conn, type_id, &lowered)?;
        }

        Ok(node_id)
    }

    fn upsert_attribute(
        &mut self,
        conn: &mut PgConnection,
        owning_node_id: i64,
        type_id: i64,
        attribute_value: &str,
        source_row_id: i64,
    ) -> Result<(), Error> {
        use crate::schema::node_attributes::dsl::*;

        let lowered = attribute_value.to_lowercase();
        let record = NewNodeAttribute {
            node_id: owning_node_id,
            attribute_type_id: type_id,
            value: attribute_value.to_string(),
            value_lower: lowered.clone(),
            status: EntityStatus::Active,
            load_id: self.load_id,
            row_id: Some(source_row_id),
        };

        match self.load_type {
            LoadType::New => {
                diesel::insert_into(node_attributes)
                    .values(&record)
                    .on_conflict((node_id, attribute_type_id, value_lower))
                    .do_nothing()
                    .execute(conn)?;
            }

            // refreshing the status reactivates attributes that a previous
            // reconciliation turned off
            LoadType::Updated => {
                diesel::insert_into(node_attributes)
                    .values(&record)
                    .on_conflict((node_id, attribute_type_id, value_lower))
                    .do_update()
                    .set((
                        status.eq(EntityStatus::Active),
                        load_id.eq(excluded(load_id)),
                        row_id.eq(excluded(row_id)),
                        updated_at.eq(chrono::Utc::now()),
                    ))
                    .execute(conn)?;
            }
        }

        if self.staging {
            use crate::schema::loaded_attributes::dsl as staged;
            diesel::insert_into(staged::loaded_attributes)
                .values((
                    staged::node_id.eq(owning_node_id),
                    staged::attribute_type_id.eq(type_id),
                    staged::value_lower.eq(&lowered),
                ))
                .execute(conn)?;
        }

        Ok(())
    }

    fn stage_node(
        &mut self,
        conn: &mut PgConnection,
        type_id: i64,
        lowered: &str,
    ) -> Result<(), Error> {
        use crate::schema::loaded_nodes::dsl as staged;

        diesel::insert_into(staged::loaded_nodes)
            .values((
                staged::taxonomy_id.eq(self.taxonomy_id),
                staged::customer_id.eq(self.customer_id),
                staged::node_type_id.eq(type_id),
                staged::value_lower.eq(lowered),
            ))
            .execute(conn)?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_and_literal_cells_are_na() {
        assert!(is_na(""));
        assert!(is_na("   "));
        assert!(is_na("N/A"));
        assert!(is_na("n/a"));
        assert!(is_na("NA"));
        assert!(is_na("na"));
        assert!(!is_na("Nurse"));
        assert!(!is_na("0"));
    }

    #[test]
    fn sibling_cells_split_and_drop_na_parts() {
        assert_eq!(split_siblings("LCSW"), vec!["LCSW"]);
        assert_eq!(split_siblings("LCSW; LMSW ;RN"), vec!["LCSW", "LMSW", "RN"]);
        assert_eq!(split_siblings("LCSW; N/A; "), vec!["LCSW"]);
        assert!(split_siblings("N/A").is_empty());
    }

    #[test]
    fn ancestors_prefer_the_nearest_eligible_level() {
        let mut ancestors = RollingAncestors::new();
        ancestors.record(0, 10);
        ancestors.record(1, 20);

        // all cells present, the closest level wins
        assert_eq!(ancestors.resolve(2, |_| true), (Some(20), 1));

        // the level 1 cell is N/A in this row so level 0 steps in
        assert_eq!(ancestors.resolve(2, |k| k == 0), (Some(10), 0));

        // nothing qualifies
        assert_eq!(ancestors.resolve(2, |_| false), (None, 0));
    }

    #[test]
    fn ancestors_ignore_levels_never_seen() {
        let mut ancestors = RollingAncestors::new();
        ancestors.record(0, 10);
        assert_eq!(ancestors.resolve(5, |_| true), (Some(10), 0));
        assert_eq!(ancestors.resolve(0, |_| true), (None, 0));
    }

    #[test]
    fn newly_recorded_levels_shadow_old_ones() {
        let mut ancestors = RollingAncestors::new();
        ancestors.record(1, 20);
        ancestors.record(1, 21);
        assert_eq!(ancestors.resolve(2, |_| true), (Some(21), 1));
    }
}
