use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::errors::LayoutError;
use crate::events::ApiLayout;
use crate::models::TaxonomyType;

/// A resolved source column. `name` is the marker-stripped display name used
/// for dictionary entries, `key` is the verbatim header that indexes the
/// delivered row maps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Column {
    pub name: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LevelColumn {
    pub level: i32,
    pub name: String,
    pub key: String,
}

/// Master sources declare the hierarchy levels up front.
#[derive(Debug, Clone, Serialize)]
pub struct MasterLayout {
    /// Sorted ascending by level.
    pub node_levels: Vec<LevelColumn>,
    /// Declared and implicit attribute columns, profession included.
    pub attributes: Vec<Column>,
    pub profession: Column,
}

/// Customer sources only name the profession column. Everything else is a
/// dynamic attribute discovered per row.
#[derive(Debug, Clone, Serialize)]
pub struct CustomerLayout {
    pub profession: Column,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Layout {
    Master(MasterLayout),
    Customer(CustomerLayout),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Marker {
    Node(i32),
    Profession,
    Attribute,
    Unmarked,
}

static MARKER: OnceLock<Regex> = OnceLock::new();

/// Splits a source header into its display name and suffix marker.
/// Headers without a recognized marker are implicit attributes.
fn parse_marker(header: &str) -> Result<(String, Marker), LayoutError> {
    let re = MARKER.get_or_init(|| {
        Regex::new(r"(?i)^\s*(.*?)\s*\(\s*(node\s+\d+|profession|attribute)\s*\)\s*$")
            .expect("invalid marker regex")
    });

    let Some(captures) = re.captures(header) else {
        return Ok((header.trim().to_string(), Marker::Unmarked));
    };

    let name = captures[1].to_string();
    let marker = captures[2].to_lowercase();

    let marker = match marker.as_str() {
        "profession" => Marker::Profession,
        "attribute" => Marker::Attribute,
        node => {
            let level = node
                .trim_start_matches("node")
                .trim()
                .parse::<i32>()
                .map_err(|_| LayoutError::InvalidMarker(header.to_string()))?;
            Marker::Node(level)
        }
    };

    Ok((name, marker))
}

/// The display name of an arbitrary header, marker stripped. Used for the
/// dynamic attributes of customer rows.
pub fn column_name(header: &str) -> String {
    match parse_marker(header) {
        Ok((name, _)) => name,
        Err(_) => header.trim().to_string(),
    }
}

impl Layout {
    /// Resolves spreadsheet-style headers into a typed layout.
    pub fn resolve(headers: &[String], taxonomy_type: TaxonomyType) -> Result<Layout, LayoutError> {
        match taxonomy_type {
            TaxonomyType::Master => Ok(Layout::Master(resolve_master(headers)?)),
            TaxonomyType::Customer => Ok(Layout::Customer(resolve_customer(headers)?)),
        }
    }

    /// Resolves the layout fragment of an API payload. API rows are keyed by
    /// the plain column names, so name and key coincide.
    pub fn from_api(layout: &ApiLayout, taxonomy_type: TaxonomyType) -> Result<Layout, LayoutError> {
        let profession = Column {
            name: layout.profession_column.clone(),
            key: layout.profession_column.clone(),
        };

        if profession.name.is_empty() {
            return Err(LayoutError::MissingProfession);
        }

        match taxonomy_type {
            TaxonomyType::Customer => Ok(Layout::Customer(CustomerLayout { profession })),

            TaxonomyType::Master => {
                if layout.node_levels.is_empty() {
                    return Err(LayoutError::MissingNodeLevels);
                }

                let mut node_levels = Vec::new();
                for level in &layout.node_levels {
                    if level.level < 0 {
                        return Err(LayoutError::InvalidMarker(level.name.clone()));
                    }
                    node_levels.push(LevelColumn {
                        level: level.level,
                        name: level.name.clone(),
                        key: level.name.clone(),
                    });
                }
                node_levels.sort_by_key(|column| column.level);
                check_level_duplicates(&node_levels)?;

                let mut attributes: Vec<Column> = layout
                    .attributes
                    .iter()
                    .map(|name| Column { name: name.clone(), key: name.clone() })
                    .collect();

                // the profession column is always part of the attribute set
                if !attributes.iter().any(|column| column.key == profession.key) {
                    attributes.push(profession.clone());
                }

                Ok(Layout::Master(MasterLayout { node_levels, attributes, profession }))
            }
        }
    }

    pub fn profession(&self) -> &Column {
        match self {
            Layout::Master(layout) => &layout.profession,
            Layout::Customer(layout) => &layout.profession,
        }
    }

    /// The layout fragment recorded in the load header provenance.
    pub fn fragment(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

fn resolve_master(headers: &[String]) -> Result<MasterLayout, LayoutError> {
    let mut node_levels = Vec::new();
    let mut attributes = Vec::new();
    let mut profession: Option<Column> = None;

    for header in headers {
        let (name, marker) = parse_marker(header)?;
        let column = Column { name, key: header.clone() };

        match marker {
            Marker::Node(level) => node_levels.push(LevelColumn {
                level,
                name: column.name,
                key: column.key,
            }),
            Marker::Profession => match profession {
                None => profession = Some(column),
                Some(existing) => {
                    return Err(LayoutError::DuplicateProfession(existing.key, column.key))
                }
            },
            Marker::Attribute | Marker::Unmarked => attributes.push(column),
        }
    }

    if node_levels.is_empty() {
        return Err(LayoutError::MissingNodeLevels);
    }
    let profession = profession.ok_or(LayoutError::MissingProfession)?;

    node_levels.sort_by_key(|column| column.level);
    check_level_duplicates(&node_levels)?;

    if !attributes.iter().any(|column| column.key == profession.key) {
        attributes.push(profession.clone());
    }

    Ok(MasterLayout { node_levels, attributes, profession })
}

fn resolve_customer(headers: &[String]) -> Result<CustomerLayout, LayoutError> {
    let mut profession: Option<Column> = None;

    for header in headers {
        let (name, marker) = parse_marker(header)?;
        if marker == Marker::Profession {
            match profession {
                None => profession = Some(Column { name, key: header.clone() }),
                Some(existing) => {
                    return Err(LayoutError::DuplicateProfession(existing.key, header.clone()))
                }
            }
        }
    }

    let profession = profession.ok_or(LayoutError::MissingProfession)?;
    Ok(CustomerLayout { profession })
}

fn check_level_duplicates(node_levels: &[LevelColumn]) -> Result<(), LayoutError> {
    for pair in node_levels.windows(2) {
        if pair[0].level == pair[1].level {
            return Err(LayoutError::DuplicateNodeLevel(pair[0].level));
        }
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ApiNodeLevel;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn master_headers_resolve_markers() {
        let headers = headers(&[
            "Industry (node 0)",
            "Occupation (node 2)",
            "Group (node 1)",
            "License (attribute)",
            "Notes",
            "Profession (profession)",
        ]);

        let layout = match Layout::resolve(&headers, TaxonomyType::Master).unwrap() {
            Layout::Master(layout) => layout,
            _ => panic!("expected a master layout"),
        };

        let levels: Vec<(i32, &str)> = layout
            .node_levels
            .iter()
            .map(|column| (column.level, column.name.as_str()))
            .collect();
        assert_eq!(levels, vec![(0, "Industry"), (1, "Group"), (2, "Occupation")]);

        let attribute_names: Vec<&str> =
            layout.attributes.iter().map(|column| column.name.as_str()).collect();
        assert_eq!(attribute_names, vec!["License", "Notes", "Profession"]);

        assert_eq!(layout.profession.name, "Profession");
        assert_eq!(layout.profession.key, "Profession (profession)");
    }

    #[test]
    fn master_headers_require_levels_and_profession() {
        let missing_levels = headers(&["Profession (profession)", "Notes"]);
        assert!(matches!(
            Layout::resolve(&missing_levels, TaxonomyType::Master),
            Err(LayoutError::MissingNodeLevels)
        ));

        let missing_profession = headers(&["Industry (node 0)"]);
        assert!(matches!(
            Layout::resolve(&missing_profession, TaxonomyType::Master),
            Err(LayoutError::MissingProfession)
        ));
    }

    #[test]
    fn duplicate_levels_are_rejected() {
        let headers = headers(&["A (node 1)", "B (node 1)", "P (profession)"]);
        assert!(matches!(
            Layout::resolve(&headers, TaxonomyType::Master),
            Err(LayoutError::DuplicateNodeLevel(1))
        ));
    }

    #[test]
    fn markers_are_case_insensitive() {
        let headers = headers(&["Industry (NODE 0)", "Title (Profession)"]);
        let layout = Layout::resolve(&headers, TaxonomyType::Master).unwrap();
        assert_eq!(layout.profession().name, "Title");
    }

    #[test]
    fn customer_headers_need_exactly_one_profession() {
        let ok = headers(&["Job Title (profession)", "State", "Years"]);
        let layout = match Layout::resolve(&ok, TaxonomyType::Customer).unwrap() {
            Layout::Customer(layout) => layout,
            _ => panic!("expected a customer layout"),
        };
        assert_eq!(layout.profession.name, "Job Title");

        let none = headers(&["State", "Years"]);
        assert!(matches!(
            Layout::resolve(&none, TaxonomyType::Customer),
            Err(LayoutError::MissingProfession)
        ));

        let two = headers(&["A (profession)", "B (profession)"]);
        assert!(matches!(
            Layout::resolve(&two, TaxonomyType::Customer),
            Err(LayoutError::DuplicateProfession(_, _))
        ));
    }

    #[test]
    fn api_layouts_sort_levels_and_absorb_the_profession_column() {
        let api = ApiLayout {
            node_levels: vec![
                ApiNodeLevel { level: 1, name: "Group".to_string() },
                ApiNodeLevel { level: 0, name: "Industry".to_string() },
            ],
            attributes: vec!["Level".to_string(), "Status".to_string()],
            profession_column: "Profession".to_string(),
        };

        let layout = match Layout::from_api(&api, TaxonomyType::Master).unwrap() {
            Layout::Master(layout) => layout,
            _ => panic!("expected a master layout"),
        };

        assert_eq!(layout.node_levels[0].level, 0);
        assert!(layout.attributes.iter().any(|column| column.name == "Profession"));
    }

    #[test]
    fn unmarked_headers_keep_their_name() {
        assert_eq!(column_name("State"), "State");
        assert_eq!(column_name("Licenses (attribute)"), "Licenses");
        assert_eq!(column_name("  Years  "), "Years");
    }
}
