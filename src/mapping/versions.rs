use chrono::{DateTime, Utc};
use diesel::dsl::max;
use diesel::*;

use crate::errors::{Error, InvariantError};
use crate::models::{MappingVersion, NewMappingVersion};

/// Starts the version chain for a freshly created mapping.
pub fn open(conn: &mut PgConnection, mapping: i64, now: DateTime<Utc>) -> Result<MappingVersion, Error> {
    use crate::schema::mapping_versions::dsl::*;

    let version = diesel::insert_into(mapping_versions)
        .values(NewMappingVersion {
            mapping_id: mapping,
            version_number: 1,
            from_ts: now,
        })
        .returning(MappingVersion::as_returning())
        .get_result(conn)?;

    Ok(version)
}

/// Closes the open version of a mapping that is being deactivated without
/// a replacement.
pub fn close(conn: &mut PgConnection, mapping: i64, now: DateTime<Utc>) -> Result<(), Error> {
    use crate::schema::mapping_versions::dsl::*;

    let open_version = open_version_id(conn, mapping)?;

    diesel::update(mapping_versions.filter(id.eq(open_version)))
        .set(to_ts.eq(now))
        .execute(conn)?;

    Ok(())
}

/// Supersession: closes the old mapping's open version, pointing it at its
/// replacement, and continues the chain on the new mapping with the next
/// number.
pub fn supersede(
    conn: &mut PgConnection,
    old_mapping: i64,
    new_mapping: i64,
    now: DateTime<Utc>,
) -> Result<MappingVersion, Error> {
    use crate::schema::mapping_versions::dsl::*;

    let open_version = open_version_id(conn, old_mapping)?;

    diesel::update(mapping_versions.filter(id.eq(open_version)))
        .set((to_ts.eq(now), superseded_by.eq(new_mapping), superseded_at.eq(now)))
        .execute(conn)?;

    let highest: Option<i32> = mapping_versions
        .filter(mapping_id.eq(old_mapping))
        .select(max(version_number))
        .get_result(conn)?;

    let version = diesel::insert_into(mapping_versions)
        .values(NewMappingVersion {
            mapping_id: new_mapping,
            version_number: highest.unwrap_or(0) + 1,
            from_ts: now,
        })
        .returning(MappingVersion::as_returning())
        .get_result(conn)?;

    Ok(version)
}

fn open_version_id(conn: &mut PgConnection, mapping: i64) -> Result<i64, Error> {
    use crate::schema::mapping_versions::dsl::*;

    let open: Vec<i64> = mapping_versions
        .filter(mapping_id.eq(mapping))
        .filter(to_ts.is_null())
        .select(id)
        .load(conn)?;

    match open.as_slice() {
        [only] => Ok(*only),
        _ => Err(InvariantError::OpenMappingVersions(mapping, open.len()).into()),
    }
}
