use std::sync::OnceLock;

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::ParseError;
use crate::models::{LoadStatus, LoadType, TaxonomyType};

/// One source record as delivered by the out-of-core parsers: column name
/// to value string, in source column order.
pub type RawRow = IndexMap<String, String>;


/// The two event discriminants the ingestion pipeline consumes.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum IngestEvent {
    S3 {
        #[serde(rename = "taxonomyType")]
        taxonomy_type: TaxonomyType,
        bucket: String,
        key: String,
    },
    Api {
        #[serde(rename = "taxonomyType")]
        taxonomy_type: TaxonomyType,
        payload: ApiPayload,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiPayload {
    pub customer_id: i64,
    pub taxonomy_id: i64,
    pub taxonomy_name: String,
    pub layout: ApiLayout,
    #[serde(default)]
    pub rows: Vec<RawRow>,
}

/// The layout fragment of an API payload. Master payloads carry node
/// levels; customer payloads only name the profession column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiLayout {
    #[serde(rename = "nodeLevels", alias = "node_levels", default)]
    pub node_levels: Vec<ApiNodeLevel>,
    #[serde(default)]
    pub attributes: Vec<String>,
    #[serde(rename = "professionColumn", alias = "profession_column")]
    pub profession_column: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiNodeLevel {
    pub level: i32,
    pub name: String,
}

/// The identity parsed out of an object-store key such as
/// `Master 101 7 mid-year refresh.xlsx`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectKey {
    pub taxonomy_type: TaxonomyType,
    pub customer_id: String,
    pub taxonomy_id: String,
}

static OBJECT_KEY: OnceLock<Regex> = OnceLock::new();

pub fn parse_object_key(key: &str) -> Result<ObjectKey, ParseError> {
    let re = OBJECT_KEY.get_or_init(|| {
        Regex::new(r"(?i)^(master|customer)\s+(-?\d+)\s+(-?\d+)(?:\s+.*?)?(?:\.xlsx)?$")
            .expect("invalid object key regex")
    });

    // keys can carry a bucket prefix, the convention only binds the filename
    let filename = key.rsplit('/').next().unwrap_or(key);

    let captures = re
        .captures(filename)
        .ok_or_else(|| ParseError::InvalidObjectKey(key.to_string()))?;

    let taxonomy_type = match captures[1].to_lowercase().as_str() {
        "master" => TaxonomyType::Master,
        _ => TaxonomyType::Customer,
    };

    Ok(ObjectKey {
        taxonomy_type,
        customer_id: captures[2].to_string(),
        taxonomy_id: captures[3].to_string(),
    })
}

/// Checks the key-derived taxonomy type against the event discriminant.
pub fn check_key_against_event(key: &ObjectKey, event_type: TaxonomyType) -> Result<(), ParseError> {
    if key.taxonomy_type != event_type {
        return Err(ParseError::TaxonomyTypeMismatch {
            key: key.taxonomy_type.to_string(),
            event: event_type.to_string(),
        });
    }
    Ok(())
}


#[derive(Debug, Clone, Serialize)]
pub struct IngestResponse {
    pub ok: bool,
    pub load_id: i64,
    pub customer_id: String,
    pub taxonomy_id: String,
    pub taxonomy_type: TaxonomyType,
    pub load_type: LoadType,
    pub status: LoadStatus,
    pub rows_processed: i32,
    /// Node ids touched by a customer load, used to scope the follow-up
    /// mapping job.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_ids_processed: Option<Vec<i64>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MapRequest {
    pub load_id: i64,
    pub customer_id: i64,
    pub taxonomy_id: i64,
    pub load_type: LoadType,
    pub taxonomy_type: TaxonomyType,
    /// Restricts an update-load remap to the nodes the ingestion touched.
    #[serde(default)]
    pub node_ids: Option<Vec<i64>>,
    /// Overrides the configured mapping level.
    #[serde(default)]
    pub level: Option<i32>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MapResults {
    pub nodes_processed: i32,
    pub mappings_created: i32,
    pub mappings_updated: i32,
    pub mappings_deactivated: i32,
    pub mappings_unchanged: i32,
    pub failures: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct MapResponse {
    pub success: bool,
    pub load_id: i64,
    pub customer_id: String,
    pub taxonomy_id: String,
    pub results: MapResults,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
    pub processing_time_ms: u64,
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_keys_parse_with_and_without_extras() {
        let key = parse_object_key("Master 101 7.xlsx").unwrap();
        assert_eq!(key.taxonomy_type, TaxonomyType::Master);
        assert_eq!(key.customer_id, "101");
        assert_eq!(key.taxonomy_id, "7");

        let key = parse_object_key("customer -3 42 mid-year refresh").unwrap();
        assert_eq!(key.taxonomy_type, TaxonomyType::Customer);
        assert_eq!(key.customer_id, "-3");
        assert_eq!(key.taxonomy_id, "42");

        let key = parse_object_key("incoming/Customer 5 6 drop.xlsx").unwrap();
        assert_eq!(key.customer_id, "5");
    }

    #[test]
    fn object_keys_reject_malformed_names() {
        assert!(parse_object_key("report.xlsx").is_err());
        assert!(parse_object_key("Master five 7.xlsx").is_err());
        assert!(parse_object_key("Master 101").is_err());
    }

    #[test]
    fn key_and_event_types_must_agree() {
        let key = parse_object_key("Master 1 2.xlsx").unwrap();
        assert!(check_key_against_event(&key, TaxonomyType::Master).is_ok());
        assert!(check_key_against_event(&key, TaxonomyType::Customer).is_err());
    }

    #[test]
    fn s3_events_deserialize() {
        let event: IngestEvent = serde_json::from_str(
            r#"{"source": "s3", "taxonomyType": "master", "bucket": "drops", "key": "Master 1 2.xlsx"}"#,
        )
        .unwrap();
        match event {
            IngestEvent::S3 { taxonomy_type, bucket, key } => {
                assert_eq!(taxonomy_type, TaxonomyType::Master);
                assert_eq!(bucket, "drops");
                assert_eq!(key, "Master 1 2.xlsx");
            }
            _ => panic!("expected an s3 event"),
        }
    }

    #[test]
    fn api_events_deserialize_with_rows() {
        let event: IngestEvent = serde_json::from_str(
            r#"{
                "source": "api",
                "taxonomyType": "customer",
                "payload": {
                    "customer_id": 3,
                    "taxonomy_id": 9,
                    "taxonomy_name": "Acme Titles",
                    "layout": {"professionColumn": "Job Title"},
                    "rows": [{"Job Title": "RN", "State": "CA"}]
                }
            }"#,
        )
        .unwrap();
        match event {
            IngestEvent::Api { payload, .. } => {
                assert_eq!(payload.taxonomy_name, "Acme Titles");
                assert_eq!(payload.rows.len(), 1);
                assert_eq!(payload.rows[0]["State"], "CA");
            }
            _ => panic!("expected an api event"),
        }
    }
}
