use std::path::Path;

use indexmap::IndexMap;

use crate::errors::Error;
use crate::events::RawRow;

/// Reads source rows from a local file, standing in for the object-store
/// and HTTP collaborators. CSV files become column-name to value maps in
/// header order; JSON files must hold an array of string-valued objects.
pub fn read_rows(path: &Path) -> Result<Vec<RawRow>, Error> {
    match path.extension().and_then(|extension| extension.to_str()) {
        Some("json") => read_json_rows(path),
        _ => read_csv_rows(path),
    }
}

pub fn read_csv_rows(path: &Path) -> Result<Vec<RawRow>, Error> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result?;
        let mut row: RawRow = IndexMap::new();
        for (header, field) in headers.iter().zip(record.iter()) {
            row.insert(header.to_string(), field.to_string());
        }
        rows.push(row);
    }

    Ok(rows)
}

pub fn read_json_rows(path: &Path) -> Result<Vec<RawRow>, Error> {
    let content = std::fs::read_to_string(path)?;
    let rows: Vec<RawRow> = serde_json::from_str(&content)?;
    Ok(rows)
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn csv_rows_keep_header_order() {
        let mut file = tempfile::NamedTempFile::with_suffix(".csv").unwrap();
        writeln!(file, "Industry (node 0),Profession (profession),State").unwrap();
        writeln!(file, "Healthcare,LCSW,CA").unwrap();
        writeln!(file, "Healthcare,RN,").unwrap();

        let rows = read_rows(file.path()).unwrap();
        assert_eq!(rows.len(), 2);

        let keys: Vec<&String> = rows[0].keys().collect();
        assert_eq!(keys, vec!["Industry (node 0)", "Profession (profession)", "State"]);
        assert_eq!(rows[0]["Profession (profession)"], "LCSW");
        assert_eq!(rows[1]["State"], "");
    }

    #[test]
    fn json_rows_deserialize_as_string_maps() {
        let mut file = tempfile::NamedTempFile::with_suffix(".json").unwrap();
        write!(file, r#"[{{"Job Title": "RN", "State": "CA"}}]"#).unwrap();

        let rows = read_rows(file.path()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["Job Title"], "RN");
    }
}
