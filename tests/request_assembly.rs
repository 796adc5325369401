use std::io::Write;

use taxbridge::events::IngestEvent;
use taxbridge::ingest::layout::Layout;
use taxbridge::ingest::{IngestRequest, LayoutSource};
use taxbridge::models::TaxonomyType;
use taxbridge::readers;

#[test]
fn an_s3_event_and_a_csv_file_assemble_into_a_master_request() {
    let mut file = tempfile::NamedTempFile::with_suffix(".csv").unwrap();
    writeln!(file, "Industry (node 0),Group (node 1),Occupation (node 2),Level,Status,Profession (profession)").unwrap();
    writeln!(file, "Healthcare,Social Work,LCSW,Licensed,Active,LCSW").unwrap();
    writeln!(file, "Healthcare,Social Work,LCSW,Licensed,Temporary,LCSW").unwrap();

    let event: IngestEvent = serde_json::from_str(
        r#"{"source": "s3", "taxonomyType": "master", "bucket": "drops", "key": "Master 101 7 q3 refresh.xlsx"}"#,
    )
    .unwrap();

    let rows = readers::read_rows(file.path()).unwrap();
    let request =
        IngestRequest::from_event(event, Some(rows), Some("Master Occupations".to_string()))
            .unwrap();

    assert_eq!(request.customer_id, "101");
    assert_eq!(request.taxonomy_id, "7");
    assert_eq!(request.taxonomy_type, TaxonomyType::Master);
    assert_eq!(request.taxonomy_name.as_deref(), Some("Master Occupations"));
    assert_eq!(request.rows.len(), 2);

    // the headers resolve into the typed layout the transformer consumes
    let LayoutSource::Headers(headers) = &request.layout_source else {
        panic!("expected spreadsheet headers");
    };
    let layout = Layout::resolve(headers, request.taxonomy_type).unwrap();
    let Layout::Master(master) = layout else {
        panic!("expected a master layout");
    };

    assert_eq!(master.node_levels.len(), 3);
    assert_eq!(master.node_levels[2].name, "Occupation");
    assert_eq!(master.profession.key, "Profession (profession)");
    let attribute_names: Vec<&str> =
        master.attributes.iter().map(|column| column.name.as_str()).collect();
    assert_eq!(attribute_names, vec!["Level", "Status", "Profession"]);
}

#[test]
fn an_api_event_supplies_layout_and_rows_inline() {
    let event: IngestEvent = serde_json::from_str(
        r#"{
            "source": "api",
            "taxonomyType": "customer",
            "payload": {
                "customer_id": 3,
                "taxonomy_id": 9,
                "taxonomy_name": "Acme Job Titles",
                "layout": {"professionColumn": "Job Title"},
                "rows": [
                    {"Job Title": "Licensed Clinical Social Worker", "State": "CA", "Years Experience": "5"},
                    {"Job Title": "RN", "State": "NY", "Years Experience": ""}
                ]
            }
        }"#,
    )
    .unwrap();

    let request = IngestRequest::from_event(event, None, None).unwrap();

    assert_eq!(request.customer_id, "3");
    assert_eq!(request.taxonomy_id, "9");
    assert_eq!(request.taxonomy_name.as_deref(), Some("Acme Job Titles"));
    assert_eq!(request.rows.len(), 2);

    let LayoutSource::Api(api) = &request.layout_source else {
        panic!("expected an api layout fragment");
    };
    let layout = Layout::from_api(api, request.taxonomy_type).unwrap();
    assert_eq!(layout.profession().name, "Job Title");
}

#[test]
fn a_mismatched_key_is_rejected_before_any_load_opens() {
    let event: IngestEvent = serde_json::from_str(
        r#"{"source": "s3", "taxonomyType": "customer", "bucket": "drops", "key": "Master 101 7.xlsx"}"#,
    )
    .unwrap();

    assert!(IngestRequest::from_event(event, None, None).is_err());
}
