pub mod dictionaries;
pub mod layout;
pub mod placeholders;
pub mod reconcile;
pub mod rows;
pub mod versions;

use chrono::Utc;
use diesel::*;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{self, RowFailurePolicy};
use crate::database::{self, PgPool};
use crate::errors::Error;
use crate::events::{self, ApiLayout, IngestEvent, IngestResponse, RawRow};
use crate::models::{
    Load,
    LoadStatus,
    LoadType,
    NewLoad,
    NewLoadRow,
    NewTaxonomy,
    RowStatus,
    Taxonomy,
    TaxonomyType,
    EntityStatus,
};
use crate::utils::new_progress_bar;
use self::layout::Layout;
use self::rows::RowTransformer;


/// The layout raw material carried by a request. Resolution happens after
/// the load record is opened so a malformed layout is recorded against it.
#[derive(Debug, Clone)]
pub enum LayoutSource {
    /// Spreadsheet-style headers with suffix markers.
    Headers(Vec<String>),
    /// The layout fragment of an API payload.
    Api(ApiLayout),
}

/// Everything one ingestion invocation needs, assembled from an event plus
/// the rows the out-of-core parsers delivered.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub customer_id: String,
    pub taxonomy_id: String,
    pub taxonomy_type: TaxonomyType,
    pub taxonomy_name: Option<String>,
    pub layout_source: LayoutSource,
    pub rows: Vec<RawRow>,
    pub source: serde_json::Value,
}

impl IngestRequest {
    pub fn from_event(
        event: IngestEvent,
        delivered_rows: Option<Vec<RawRow>>,
        delivered_name: Option<String>,
    ) -> Result<IngestRequest, Error> {
        match event {
            IngestEvent::S3 { taxonomy_type, bucket, key } => {
                let parsed = events::parse_object_key(&key)?;
                events::check_key_against_event(&parsed, taxonomy_type)?;

                let rows = delivered_rows.unwrap_or_default();
                let headers: Vec<String> = rows
                    .first()
                    .map(|row| row.keys().cloned().collect())
                    .unwrap_or_default();

                Ok(IngestRequest {
                    customer_id: parsed.customer_id,
                    taxonomy_id: parsed.taxonomy_id,
                    taxonomy_type,
                    taxonomy_name: delivered_name,
                    layout_source: LayoutSource::Headers(headers),
                    rows,
                    source: json!({ "source": "s3", "bucket": bucket, "key": key }),
                })
            }

            IngestEvent::Api { taxonomy_type, payload } => {
                let source = json!({
                    "source": "api",
                    "customer_id": payload.customer_id,
                    "taxonomy_id": payload.taxonomy_id,
                });

                Ok(IngestRequest {
                    customer_id: payload.customer_id.to_string(),
                    taxonomy_id: payload.taxonomy_id.to_string(),
                    taxonomy_type,
                    taxonomy_name: delivered_name.or(Some(payload.taxonomy_name)),
                    layout_source: LayoutSource::Api(payload.layout),
                    rows: delivered_rows.unwrap_or(payload.rows),
                    source,
                })
            }
        }
    }
}


struct LoadSummary {
    completed: usize,
    failures: Vec<(i64, String)>,
    node_ids: Vec<i64>,
}

/// Runs one ingestion invocation end to end: opens the load header, runs
/// the Bronze to Silver transformation inside a single serializable
/// transaction, and finalizes the header. On any error the header is
/// marked failed in a best-effort statement outside the aborted
/// transaction and the original error propagates.
pub fn run(pool: &PgPool, request: &IngestRequest) -> Result<IngestResponse, Error> {
    let mut conn = pool.get()?;

    let load = open_load(&mut conn, request)?;
    info!(load_id = load.id, customer_id = %request.customer_id, taxonomy_id = %request.taxonomy_id, "Load opened");

    match execute_load(&mut conn, &load, request) {
        Ok(response) => Ok(response),
        Err(err) => {
            mark_load_failed(&mut conn, &load, &err);
            Err(err)
        }
    }
}

fn open_load(conn: &mut PgConnection, request: &IngestRequest) -> Result<Load, Error> {
    use crate::schema::loads::dsl::*;

    let load = diesel::insert_into(loads)
        .values(NewLoad {
            taxonomy_type: request.taxonomy_type,
            status: LoadStatus::InProgress,
            details: json!({
                "source": request.source,
                "request_id": Uuid::new_v4(),
            }),
            started_at: Utc::now(),
        })
        .returning(Load::as_returning())
        .get_result(conn)?;

    Ok(load)
}

fn execute_load(
    conn: &mut PgConnection,
    load: &Load,
    request: &IngestRequest,
) -> Result<IngestResponse, Error> {
    let layout = match &request.layout_source {
        LayoutSource::Headers(headers) => Layout::resolve(headers, request.taxonomy_type)?,
        LayoutSource::Api(api) => Layout::from_api(api, request.taxonomy_type)?,
    };

    // the load type falls out of the taxonomy header's existence
    let existing = find_taxonomy(conn, &request.customer_id, &request.taxonomy_id)?;
    let load_type = match existing {
        Some(_) => LoadType::Updated,
        None => LoadType::New,
    };

    let mut details_doc = load.details.clone();
    if let Some(doc) = details_doc.as_object_mut() {
        doc.insert("layout".to_string(), layout.fragment());
    }

    {
        use crate::schema::loads;
        diesel::update(loads::table.filter(loads::id.eq(load.id)))
            .set((
                loads::customer_id.eq(&request.customer_id),
                loads::taxonomy_id.eq(&request.taxonomy_id),
                loads::load_type.eq(load_type),
                loads::row_count.eq(request.rows.len() as i32),
                loads::details.eq(&details_doc),
            ))
            .execute(conn)?;
    }

    let reconciling =
        load_type == LoadType::Updated && request.taxonomy_type == TaxonomyType::Master;

    let summary = conn.build_transaction().serializable().run(|conn| {
        database::apply_deadline(conn)?;
        upsert_taxonomy(conn, request, load, load_type)?;

        if reconciling {
            reconcile::create_staging_tables(conn)?;
        }

        let mut transformer = RowTransformer::new(
            load.id,
            load_type,
            request.taxonomy_type,
            &request.customer_id,
            &request.taxonomy_id,
            &layout,
            reconciling,
        );

        let policy = config::row_failure_policy();
        let bar = new_progress_bar(request.rows.len(), "Transforming rows");
        let mut completed = 0;
        let mut failures: Vec<(i64, String)> = Vec::new();

        // rows are processed strictly in source order, the rolling
        // ancestor state depends on it
        for row in &request.rows {
            let row_id = insert_bronze_row(conn, load, request, row)?;

            match transformer.process_row(conn, row, row_id) {
                Ok(()) => {
                    mark_row(conn, row_id, RowStatus::Completed)?;
                    completed += 1;
                }
                Err(err) => {
                    mark_row(conn, row_id, RowStatus::Failed)?;
                    warn!(load_id = load.id, row_id, error = %err, "Row failed");
                    failures.push((row_id, err.to_string()));
                    if policy == RowFailurePolicy::Abort {
                        return Err(err);
                    }
                }
            }
            bar.inc(1);
        }
        bar.finish();

        let (affected_nodes, affected_attributes) = if reconciling {
            reconcile::run(conn, &request.taxonomy_id, &request.customer_id, load.id)?
        } else {
            (Vec::new(), Vec::new())
        };

        versions::create_for_load(
            conn,
            &request.customer_id,
            &request.taxonomy_id,
            load.id,
            load_type,
            &affected_nodes,
            &affected_attributes,
        )?;

        Ok(LoadSummary {
            completed,
            failures,
            node_ids: transformer.processed_node_ids,
        })
    })?;

    let final_status = finalize_load(conn, load, request, &summary, &details_doc)?;

    info!(
        load_id = load.id,
        status = %final_status,
        rows = request.rows.len(),
        failed = summary.failures.len(),
        "Load finalized"
    );

    let mut node_ids = summary.node_ids;
    node_ids.sort();
    node_ids.dedup();

    Ok(IngestResponse {
        ok: !matches!(final_status, LoadStatus::Failed),
        load_id: load.id,
        customer_id: request.customer_id.clone(),
        taxonomy_id: request.taxonomy_id.clone(),
        taxonomy_type: request.taxonomy_type,
        load_type,
        status: final_status,
        rows_processed: summary.completed as i32,
        node_ids_processed: (request.taxonomy_type == TaxonomyType::Customer).then_some(node_ids),
    })
}

fn finalize_load(
    conn: &mut PgConnection,
    load: &Load,
    request: &IngestRequest,
    summary: &LoadSummary,
    details_doc: &serde_json::Value,
) -> Result<LoadStatus, Error> {
    use crate::schema::loads::dsl::*;

    let total = request.rows.len();
    let final_status = if summary.failures.is_empty() {
        LoadStatus::Completed
    } else if summary.completed == 0 && total > 0 {
        LoadStatus::Failed
    } else {
        LoadStatus::PartiallyCompleted
    };

    let mut doc = details_doc.clone();
    if !summary.failures.is_empty() {
        if let Some(map) = doc.as_object_mut() {
            let errors: Vec<serde_json::Value> = summary
                .failures
                .iter()
                .map(|(failed_row, error)| json!({ "row_id": failed_row, "error": error }))
                .collect();
            map.insert("row_errors".to_string(), json!(errors));
        }
    }

    diesel::update(loads.filter(id.eq(load.id)))
        .set((
            status.eq(final_status),
            finished_at.eq(Some(Utc::now())),
            details.eq(doc),
        ))
        .execute(conn)?;

    Ok(final_status)
}

/// Best-effort failure write, separate from the aborted transaction. Never
/// masks the original error.
fn mark_load_failed(conn: &mut PgConnection, load: &Load, err: &Error) {
    use crate::schema::loads::dsl::*;

    let mut doc = loads
        .filter(id.eq(load.id))
        .select(details)
        .get_result::<serde_json::Value>(conn)
        .unwrap_or_else(|_| load.details.clone());

    if let Some(map) = doc.as_object_mut() {
        map.insert("Error".to_string(), json!(err.to_string()));
    }

    let written = diesel::update(loads.filter(id.eq(load.id)))
        .set((
            status.eq(LoadStatus::Failed),
            finished_at.eq(Some(Utc::now())),
            details.eq(doc),
        ))
        .execute(conn);

    if let Err(write_err) = written {
        warn!(load_id = load.id, error = %write_err, "Could not record the load failure");
    }
}

fn find_taxonomy(
    conn: &mut PgConnection,
    customer: &str,
    taxonomy: &str,
) -> Result<Option<Taxonomy>, Error> {
    use crate::schema::taxonomies::dsl::*;

    let found = taxonomies
        .filter(customer_id.eq(customer))
        .filter(taxonomy_id.eq(taxonomy))
        .select(Taxonomy::as_select())
        .first::<Taxonomy>(conn)
        .optional()?;

    Ok(found)
}

fn upsert_taxonomy(
    conn: &mut PgConnection,
    request: &IngestRequest,
    load: &Load,
    _load_type: LoadType,
) -> Result<(), Error> {
    use crate::schema::taxonomies::dsl::*;
    use diesel::upsert::excluded;

    let record = NewTaxonomy {
        customer_id: request.customer_id.clone(),
        taxonomy_id: request.taxonomy_id.clone(),
        name: request.taxonomy_name.clone(),
        taxonomy_type: request.taxonomy_type,
        status: EntityStatus::Active,
        last_load_id: Some(load.id),
    };

    if request.taxonomy_name.is_some() {
        diesel::insert_into(taxonomies)
            .values(&record)
            .on_conflict((customer_id, taxonomy_id))
            .do_update()
            .set((
                name.eq(excluded(name)),
                status.eq(EntityStatus::Active),
                last_load_id.eq(excluded(last_load_id)),
            ))
            .execute(conn)?;
    } else {
        // keep whatever name a previous load recorded
        diesel::insert_into(taxonomies)
            .values(&record)
            .on_conflict((customer_id, taxonomy_id))
            .do_update()
            .set((
                status.eq(EntityStatus::Active),
                last_load_id.eq(excluded(last_load_id)),
            ))
            .execute(conn)?;
    }

    Ok(())
}

fn insert_bronze_row(
    conn: &mut PgConnection,
    load: &Load,
    request: &IngestRequest,
    row: &RawRow,
) -> Result<i64, Error> {
    use crate::schema::load_rows::dsl::*;

    let bronze_id = diesel::insert_into(load_rows)
        .values(NewLoadRow {
            load_id: load.id,
            customer_id: request.customer_id.clone(),
            taxonomy_id: request.taxonomy_id.clone(),
            record: serde_json::to_value(row)?,
            status: RowStatus::InProgress,
            active: true,
        })
        .returning(id)
        .get_result::<i64>(conn)?;

    Ok(bronze_id)
}

fn mark_row(conn: &mut PgConnection, row: i64, row_status: RowStatus) -> Result<(), Error> {
    use crate::schema::load_rows::dsl::*;

    diesel::update(load_rows.filter(id.eq(row)))
        .set(status.eq(row_status))
        .execute(conn)?;

    Ok(())
}
