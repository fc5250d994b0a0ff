use super::*;
use crate::document::{DocumentSource, XlsxReader};
use crate::types::CellValue;
use crate::schema::FieldSource;
use tempfile::TempDir;

const SCHEMA: &str = r#"
name: staff
columns:
  - { field: id, name: ID, sort: 1, type: long, kind: numeric }
  - { field: name, name: Name, sort: 2 }
  - { field: sex, name: Gender, sort: 3, dict: sex, combo_from_dict: true }
  - { field: salary, name: Salary, sort: 4, type: double, statistics: true }
dictionaries:
  sex:
    - { value: "0", label: Male }
    - { value: "1", label: Female }
"#;

const DATA: &str = r#"
- { id: 1, name: Ann, sex: "1", salary: 1200.5 }
- { id: 2, name: "=cmd", sex: "0", salary: 900 }
"#;

fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

fn export_request(dir: &TempDir, output: Option<PathBuf>) -> ExportRequest {
    ExportRequest {
        schema: write(dir, "staff.yaml", SCHEMA),
        data: write(dir, "data.yaml", DATA),
        output,
        sheet: Some("Staff".into()),
        ..Default::default()
    }
}

#[test]
fn test_is_workbook_path() {
    let dir = TempDir::new().unwrap();
    assert!(is_workbook_path(Path::new("out.xlsx")));
    assert!(is_workbook_path(Path::new("OUT.XLSX")));
    assert!(!is_workbook_path(Path::new("out")));
    assert!(!is_workbook_path(dir.path()));
}

#[test]
fn test_load_config_defaults() {
    let config = load_config(None).unwrap();
    assert_eq!(config, EngineConfig::default());
}

#[test]
fn test_export_to_file_then_import() {
    let dir = TempDir::new().unwrap();
    let xlsx = dir.path().join("staff.xlsx");
    export(export_request(&dir, Some(xlsx.clone())), EngineConfig::default()).unwrap();

    let mut reader = XlsxReader::open(&xlsx).unwrap();
    let sheet = reader.read_sheet("Staff").unwrap();
    assert_eq!(sheet.cell(1, 2), &CellValue::Text("Female".into()));
    assert_eq!(sheet.cell(3, 0), &CellValue::Text("Total".into()));
    assert_eq!(sheet.cell(3, 3), &CellValue::Number(2100.5));

    let out = dir.path().join("back.json");
    import(
        ImportRequest {
            schema: dir.path().join("staff.yaml"),
            input: xlsx,
            output: out.clone(),
            ..Default::default()
        },
        EngineConfig::default(),
    )
    .unwrap();
    let records = load_records(&out).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].field("name"), FieldValue::Text("=cmd".into()));
    assert_eq!(records[0].field("sex"), FieldValue::Text("1".into()));
}

#[test]
fn test_export_to_directory_uses_uuid_name() {
    let dir = TempDir::new().unwrap();
    let out_dir = dir.path().join("download");
    export(export_request(&dir, Some(out_dir.clone())), EngineConfig::default()).unwrap();

    let files: Vec<_> = fs::read_dir(&out_dir).unwrap().collect();
    assert_eq!(files.len(), 1);
    let name = files[0].as_ref().unwrap().file_name();
    assert!(name.to_string_lossy().ends_with("_Staff.xlsx"));
}

#[test]
fn test_template_and_inspect() {
    let dir = TempDir::new().unwrap();
    let schema = write(&dir, "staff.yaml", SCHEMA);
    let out = dir.path().join("template.xlsx");
    template(
        schema.clone(),
        out.clone(),
        None,
        Some("Staff import".into()),
        EngineConfig::default(),
    )
    .unwrap();
    assert!(out.exists());
    inspect(schema, EngineConfig::default()).unwrap();
}

#[test]
fn test_missing_schema_is_error() {
    let dir = TempDir::new().unwrap();
    let err = inspect(dir.path().join("nope.yaml"), EngineConfig::default()).unwrap_err();
    assert!(matches!(err, TabulaError::Resource { .. }));
}
