use std::io::Write;

use chrono::{DateTime, Utc};
use diesel::deserialize::{self, FromSql, FromSqlRow};
use diesel::expression::AsExpression;
use diesel::pg::{Pg, PgValue};
use diesel::prelude::*;
use diesel::serialize::{self, IsNull, Output, ToSql};
use diesel::sql_types::Text;
use serde::{Deserialize, Serialize};

use crate::errors::ParseError;
use crate::schema::*;

/// The reserved node type id for N/A placeholder nodes.
pub const PLACEHOLDER_NODE_TYPE_ID: i64 = -1;

/// Generates the string conversions and the diesel text column impls for a
/// status-like enum. The database stores the lowercase form.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $value:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $value),+
                }
            }

            pub fn parse(value: &str) -> Result<Self, ParseError> {
                match value {
                    $($value => Ok(Self::$variant),)+
                    other => Err(ParseError::InvalidValue(other.to_string())),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ToSql<Text, Pg> for $name {
            fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
                out.write_all(self.as_str().as_bytes())?;
                Ok(IsNull::No)
            }
        }

        impl FromSql<Text, Pg> for $name {
            fn from_sql(bytes: PgValue) -> deserialize::Result<Self> {
                let value = std::str::from_utf8(bytes.as_bytes())?;
                Ok(Self::parse(value)?)
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsExpression, FromSqlRow, Serialize, Deserialize)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "lowercase")]
pub enum TaxonomyType {
    Master,
    Customer,
}

text_enum!(TaxonomyType {
    Master => "master",
    Customer => "customer",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, AsExpression, FromSqlRow, Serialize, Deserialize)]
#[diesel(sql_type = Text)]
pub enum LoadType {
    #[serde(rename = "new")]
    New,
    // mapping requests say "update", ingestion says "updated". both arrive here
    #[serde(rename = "updated", alias = "update")]
    Updated,
}

text_enum!(LoadType {
    New => "new",
    Updated => "updated",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, AsExpression, FromSqlRow, Serialize, Deserialize)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "snake_case")]
pub enum LoadStatus {
    InProgress,
    Completed,
    PartiallyCompleted,
    Failed,
}

text_enum!(LoadStatus {
    InProgress => "in_progress",
    Completed => "completed",
    PartiallyCompleted => "partially_completed",
    Failed => "failed",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, AsExpression, FromSqlRow, Serialize, Deserialize)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    InProgress,
    Completed,
    Failed,
}

text_enum!(RowStatus {
    InProgress => "in_progress",
    Completed => "completed",
    Failed => "failed",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, AsExpression, FromSqlRow, Serialize, Deserialize)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "lowercase")]
pub enum EntityStatus {
    Active,
    Inactive,
}

text_enum!(EntityStatus {
    Active => "active",
    Inactive => "inactive",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, AsExpression, FromSqlRow, Serialize, Deserialize)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "lowercase")]
pub enum RuleCommand {
    Equals,
    Contains,
    StartsWith,
    EndsWith,
    Regex,
}

text_enum!(RuleCommand {
    Equals => "equals",
    Contains => "contains",
    StartsWith => "startswith",
    EndsWith => "endswith",
    Regex => "regex",
});

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = loads)]
pub struct Load {
    pub id: i64,
    pub customer_id: Option<String>,
    pub taxonomy_id: Option<String>,
    pub taxonomy_type: TaxonomyType,
    pub load_type: Option<LoadType>,
    pub status: LoadStatus,
    pub row_count: Option<i32>,
    pub details: serde_json::Value,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = loads)]
pub struct NewLoad {
    pub taxonomy_type: TaxonomyType,
    pub status: LoadStatus,
    pub details: serde_json::Value,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = load_rows)]
pub struct LoadRow {
    pub id: i64,
    pub load_id: i64,
    pub customer_id: String,
    pub taxonomy_id: String,
    pub record: serde_json::Value,
    pub status: RowStatus,
    pub active: bool,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = load_rows)]
pub struct NewLoadRow {
    pub load_id: i64,
    pub customer_id: String,
    pub taxonomy_id: String,
    pub record: serde_json::Value,
    pub status: RowStatus,
    pub active: bool,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = taxonomies)]
pub struct Taxonomy {
    pub id: i64,
    pub customer_id: String,
    pub taxonomy_id: String,
    pub name: Option<String>,
    pub taxonomy_type: TaxonomyType,
    pub status: EntityStatus,
    pub last_load_id: Option<i64>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = taxonomies)]
pub struct NewTaxonomy {
    pub customer_id: String,
    pub taxonomy_id: String,
    pub name: Option<String>,
    pub taxonomy_type: TaxonomyType,
    pub status: EntityStatus,
    pub last_load_id: Option<i64>,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = node_types)]
pub struct NodeType {
    pub id: i64,
    pub name: String,
    pub name_lower: String,
    pub load_id: Option<i64>,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = attribute_types)]
pub struct AttributeType {
    pub id: i64,
    pub name: String,
    pub name_lower: String,
    pub load_id: Option<i64>,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = nodes)]
pub struct Node {
    pub id: i64,
    pub node_type_id: i64,
    pub taxonomy_id: String,
    pub customer_id: String,
    pub parent_id: Option<i64>,
    pub value: String,
    pub value_lower: String,
    pub profession: Option<String>,
    pub level: i32,
    pub status: EntityStatus,
    pub load_id: i64,
    pub row_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = nodes)]
pub struct NewNode {
    pub node_type_id: i64,
    pub taxonomy_id: String,
    pub customer_id: String,
    pub parent_id: Option<i64>,
    pub value: String,
    pub value_lower: String,
    pub profession: Option<String>,
    pub level: i32,
    pub status: EntityStatus,
    pub load_id: i64,
    pub row_id: Option<i64>,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = node_attributes)]
pub struct NodeAttribute {
    pub id: i64,
    pub node_id: i64,
    pub attribute_type_id: i64,
    pub value: String,
    pub value_lower: String,
    pub status: EntityStatus,
    pub load_id: i64,
    pub row_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = node_attributes)]
pub struct NewNodeAttribute {
    pub node_id: i64,
    pub attribute_type_id: i64,
    pub value: String,
    pub value_lower: String,
    pub status: EntityStatus,
    pub load_id: i64,
    pub row_id: Option<i64>,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = taxonomy_versions)]
pub struct TaxonomyVersion {
    pub id: i64,
    pub customer_id: String,
    pub taxonomy_id: String,
    pub version_number: i32,
    pub change_type: String,
    pub affected_nodes: serde_json::Value,
    pub affected_attributes: serde_json::Value,
    pub remapping: bool,
    pub nodes_processed: i32,
    pub nodes_new: i32,
    pub nodes_changed: i32,
    pub nodes_unchanged: i32,
    pub nodes_failed: i32,
    pub process_status: Option<String>,
    pub from_ts: DateTime<Utc>,
    pub to_ts: Option<DateTime<Utc>>,
    pub load_id: i64,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = taxonomy_versions)]
pub struct NewTaxonomyVersion {
    pub customer_id: String,
    pub taxonomy_id: String,
    pub version_number: i32,
    pub change_type: String,
    pub affected_nodes: serde_json::Value,
    pub affected_attributes: serde_json::Value,
    pub remapping: bool,
    pub from_ts: DateTime<Utc>,
    pub to_ts: Option<DateTime<Utc>>,
    pub load_id: i64,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = mapping_rules)]
pub struct MappingRule {
    pub id: i64,
    pub name: String,
    pub enabled: bool,
    pub command: RuleCommand,
    pub pattern: Option<String>,
    pub ai: bool,
    pub human: bool,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = rule_assignments)]
pub struct RuleAssignment {
    pub id: i64,
    pub rule_id: i64,
    pub master_node_type_id: i64,
    pub child_node_type_id: i64,
    pub priority: i32,
    pub enabled: bool,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = mappings)]
pub struct Mapping {
    pub id: i64,
    pub rule_id: i64,
    pub master_node_id: i64,
    pub child_node_id: i64,
    pub confidence: i32,
    pub status: EntityStatus,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = mappings)]
pub struct NewMapping {
    pub rule_id: i64,
    pub master_node_id: i64,
    pub child_node_id: i64,
    pub confidence: i32,
    pub status: EntityStatus,
    pub created_by: Option<String>,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = mapping_versions)]
pub struct MappingVersion {
    pub id: i64,
    pub mapping_id: i64,
    pub version_number: i32,
    pub from_ts: DateTime<Utc>,
    pub to_ts: Option<DateTime<Utc>>,
    pub superseded_by: Option<i64>,
    pub superseded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = mapping_versions)]
pub struct NewMappingVersion {
    pub mapping_id: i64,
    pub version_number: i32,
    pub from_ts: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = gold_mappings)]
pub struct GoldMapping {
    pub mapping_id: i64,
    pub master_node_id: i64,
    pub child_node_id: i64,
    pub projected_at: DateTime<Utc>,
}

/// An entry in a taxonomy version change manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AffectedNode {
    pub id: i64,
    pub value: String,
    #[serde(rename = "type")]
    pub node_type_id: i64,
    pub new_status: EntityStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AffectedAttribute {
    pub id: i64,
    pub value: String,
    #[serde(rename = "type")]
    pub attribute_type_id: i64,
    pub new_status: EntityStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_enums_round_trip_their_storage_form() {
        assert_eq!(LoadStatus::parse("partially_completed").unwrap(), LoadStatus::PartiallyCompleted);
        assert_eq!(LoadStatus::PartiallyCompleted.as_str(), "partially_completed");
        assert_eq!(RuleCommand::parse("startswith").unwrap(), RuleCommand::StartsWith);
        assert!(EntityStatus::parse("deleted").is_err());
    }

    #[test]
    fn load_type_accepts_both_wire_spellings() {
        let from_mapping: LoadType = serde_json::from_str("\"update\"").unwrap();
        let from_ingest: LoadType = serde_json::from_str("\"updated\"").unwrap();
        assert_eq!(from_mapping, LoadType::Updated);
        assert_eq!(from_ingest, LoadType::Updated);
    }
}
