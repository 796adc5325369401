use diesel::dsl::{exists, not};
use diesel::*;

use crate::errors::Error;
use crate::models::{AffectedAttribute, AffectedNode, EntityStatus};

/// Creates the per-transaction staging tables the row transformer records
/// into. They are session scoped and vanish when the load commits or rolls
/// back.
pub fn create_staging_tables(conn: &mut PgConnection) -> Result<(), Error> {
    diesel::sql_query(
        "CREATE TEMPORARY TABLE loaded_nodes (
            taxonomy_id TEXT NOT NULL,
            customer_id TEXT NOT NULL,
            node_type_id BIGINT NOT NULL,
            value_lower TEXT NOT NULL
        ) ON COMMIT DROP",
    )
    .execute(conn)?;

    diesel::sql_query(
        "CREATE TEMPORARY TABLE loaded_attributes (
            node_id BIGINT NOT NULL,
            attribute_type_id BIGINT NOT NULL,
            value_lower TEXT NOT NULL
        ) ON COMMIT DROP",
    )
    .execute(conn)?;

    Ok(())
}

/// Soft-deletes every active node and attribute of the taxonomy that the
/// current load did not re-send. Only runs for Master updated loads;
/// customer updates are partial by design and never reconcile.
pub fn run(
    conn: &mut PgConnection,
    taxonomy: &str,
    customer: &str,
    load: i64,
) -> Result<(Vec<AffectedNode>, Vec<AffectedAttribute>), Error> {
    let node_victims = deactivate_missing_nodes(conn, taxonomy, customer, load)?;
    let attribute_victims = deactivate_missing_attributes(conn, taxonomy, customer, load)?;
    Ok((node_victims, attribute_victims))
}

fn deactivate_missing_nodes(
    conn: &mut PgConnection,
    taxonomy: &str,
    customer: &str,
    load: i64,
) -> Result<Vec<AffectedNode>, Error> {
    use crate::schema::loaded_nodes::dsl as staged;
    use crate::schema::nodes::dsl::*;

    let victims: Vec<(i64, String, i64)> = nodes
        .filter(taxonomy_id.eq(taxonomy))
        .filter(customer_id.eq(customer))
        .filter(status.eq(EntityStatus::Active))
        .filter(not(exists(
            staged::loaded_nodes
                .filter(staged::taxonomy_id.eq(taxonomy_id))
                .filter(staged::customer_id.eq(customer_id))
                .filter(staged::node_type_id.eq(node_type_id))
                .filter(staged::value_lower.eq(value_lower)),
        )))
        .select((id, value, node_type_id))
        .load(conn)?;

    let ids: Vec<i64> = victims.iter().map(|(victim_id, _, _)| *victim_id).collect();

    diesel::update(nodes.filter(id.eq_any(&ids)))
        .set((
            status.eq(EntityStatus::Inactive),
            load_id.eq(load),
            updated_at.eq(chrono::Utc::now()),
        ))
        .execute(conn)?;

    Ok(victims
        .into_iter()
        .map(|(victim_id, victim_value, victim_type)| AffectedNode {
            id: victim_id,
            value: victim_value,
            node_type_id: victim_type,
            new_status: EntityStatus::Inactive,
        })
        .collect())
}

fn deactivate_missing_attributes(
    conn: &mut PgConnection,
    taxonomy: &str,
    customer: &str,
    load: i64,
) -> Result<Vec<AffectedAttribute>, Error> {
    use crate::schema::loaded_attributes::dsl as staged;
    use crate::schema::node_attributes::dsl::*;
    use crate::schema::nodes;

    let victims: Vec<(i64, String, i64)> = node_attributes
        .inner_join(nodes::table)
        .filter(nodes::taxonomy_id.eq(taxonomy))
        .filter(nodes::customer_id.eq(customer))
        .filter(status.eq(EntityStatus::Active))
        .filter(not(exists(
            staged::loaded_attributes
                .filter(staged::node_id.eq(node_id))
                .filter(staged::attribute_type_id.eq(attribute_type_id))
                .filter(staged::value_lower.eq(value_lower)),
        )))
        .select((id, value, attribute_type_id))
        .load(conn)?;

    let ids: Vec<i64> = victims.iter().map(|(victim_id, _, _)| *victim_id).collect();

    diesel::update(node_attributes.filter(id.eq_any(&ids)))
        .set((
            status.eq(EntityStatus::Inactive),
            load_id.eq(load),
            updated_at.eq(chrono::Utc::now()),
        ))
        .execute(conn)?;

    Ok(victims
        .into_iter()
        .map(|(victim_id, victim_value, victim_type)| AffectedAttribute {
            id: victim_id,
            value: victim_value,
            attribute_type_id: victim_type,
            new_status: EntityStatus::Inactive,
        })
        .collect())
}
