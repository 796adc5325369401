use chrono::{DateTime, Utc};
use diesel::dsl::max;
use diesel::*;

use crate::errors::{Error, InvariantError};
use crate::models::{AffectedAttribute, AffectedNode, LoadType, NewTaxonomyVersion, TaxonomyVersion};

pub const CHANGE_INITIAL_LOAD: &str = "initial load";
pub const CHANGE_UPDATE: &str = "update";
pub const CHANGE_REMAPPING: &str = "remapping";

/// Emits the single version record for an ingestion load. New loads start
/// the chain at 1; updated loads close the open version and append the
/// next number with the change manifest collected by reconciliation.
pub fn create_for_load(
    conn: &mut PgConnection,
    customer: &str,
    taxonomy: &str,
    load: i64,
    load_type: LoadType,
    affected_nodes: &[AffectedNode],
    affected_attributes: &[AffectedAttribute],
) -> Result<TaxonomyVersion, Error> {
    match load_type {
        LoadType::New => initial(conn, customer, taxonomy, load),
        LoadType::Updated => next(
            conn,
            customer,
            taxonomy,
            load,
            CHANGE_UPDATE,
            serde_json::to_value(affected_nodes)?,
            serde_json::to_value(affected_attributes)?,
            false,
        ),
    }
}

/// Finds or creates the version a mapping job runs under. A version
/// produced by the triggering load is reused; otherwise a remapping
/// version is appended to the chain.
pub fn ensure_for_mapping(
    conn: &mut PgConnection,
    customer: &str,
    taxonomy: &str,
    load: i64,
    load_type: LoadType,
) -> Result<TaxonomyVersion, Error> {
    use crate::schema::taxonomy_versions::dsl::*;

    let existing = taxonomy_versions
        .filter(customer_id.eq(customer))
        .filter(taxonomy_id.eq(taxonomy))
        .filter(load_id.eq(load))
        .select(TaxonomyVersion::as_select())
        .order(id.desc())
        .first::<TaxonomyVersion>(conn)
        .optional()?;

    if let Some(version) = existing {
        return Ok(version);
    }

    match load_type {
        LoadType::New => initial(conn, customer, taxonomy, load),
        LoadType::Updated => next(
            conn,
            customer,
            taxonomy,
            load,
            CHANGE_REMAPPING,
            serde_json::json!([]),
            serde_json::json!([]),
            true,
        ),
    }
}

/// Writes the mapping counters back onto the version once a job finishes.
pub fn update_counters(
    conn: &mut PgConnection,
    version_id: i64,
    processed: i32,
    new: i32,
    changed: i32,
    unchanged: i32,
    failed: i32,
    status: &str,
) -> Result<(), Error> {
    use crate::schema::taxonomy_versions::dsl::*;

    diesel::update(taxonomy_versions.filter(id.eq(version_id)))
        .set((
            nodes_processed.eq(processed),
            nodes_new.eq(new),
            nodes_changed.eq(changed),
            nodes_unchanged.eq(unchanged),
            nodes_failed.eq(failed),
            process_status.eq(status),
        ))
        .execute(conn)?;

    Ok(())
}

fn initial(
    conn: &mut PgConnection,
    customer: &str,
    taxonomy: &str,
    load: i64,
) -> Result<TaxonomyVersion, Error> {
    use crate::schema::taxonomy_versions::dsl::*;

    let version = diesel::insert_into(taxonomy_versions)
        .values(NewTaxonomyVersion {
            customer_id: customer.to_string(),
            taxonomy_id: taxonomy.to_string(),
            version_number: 1,
            change_type: CHANGE_INITIAL_LOAD.to_string(),
            affected_nodes: serde_json::json!([]),
            affected_attributes: serde_json::json!([]),
            remapping: false,
            from_ts: Utc::now(),
            to_ts: None,
            load_id: load,
        })
        .returning(TaxonomyVersion::as_returning())
        .get_result(conn)?;

    Ok(version)
}

#[allow(clippy::too_many_arguments)]
fn next(
    conn: &mut PgConnection,
    customer: &str,
    taxonomy: &str,
    load: i64,
    change: &str,
    affected_nodes_doc: serde_json::Value,
    affected_attributes_doc: serde_json::Value,
    for_remapping: bool,
) -> Result<TaxonomyVersion, Error> {
    use crate::schema::taxonomy_versions::dsl::*;

    let now: DateTime<Utc> = Utc::now();

    let open: Vec<i64> = taxonomy_versions
        .filter(customer_id.eq(customer))
        .filter(taxonomy_id.eq(taxonomy))
        .filter(to_ts.is_null())
        .select(id)
        .load(conn)?;

    if open.len() > 1 {
        return Err(
            InvariantError::OpenVersions(customer.to_string(), taxonomy.to_string(), open.len())
                .into(),
        );
    }

    diesel::update(taxonomy_versions.filter(id.eq_any(&open)))
        .set(to_ts.eq(now))
        .execute(conn)?;

    let highest: Option<i32> = taxonomy_versions
        .filter(customer_id.eq(customer))
        .filter(taxonomy_id.eq(taxonomy))
        .select(max(version_number))
        .get_result(conn)?;

    let version = diesel::insert_into(taxonomy_versions)
        .values(NewTaxonomyVersion {
            customer_id: customer.to_string(),
            taxonomy_id: taxonomy.to_string(),
            version_number: highest.unwrap_or(0) + 1,
            change_type: change.to_string(),
            affected_nodes: affected_nodes_doc,
            affected_attributes: affected_attributes_doc,
            remapping: for_remapping,
            from_ts: now,
            to_ts: None,
            load_id: load,
        })
        .returning(TaxonomyVersion::as_returning())
        .get_result(conn)?;

    Ok(version)
}
