use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn kbob_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("kbob");
    path
}

fn inline(cell: &str, text: &str) -> String {
    format!(
        r#"<c r="{}" t="inlineStr"><is><t>{}</t></is></c>"#,
        cell, text
    )
}

fn number(cell: &str, value: &str) -> String {
    format!(r#"<c r="{}"><v>{}</v></c>"#, cell, value)
}

/// Workbook shaped like the KBOB publication: a title row, German
/// headers on row 3, data from row 4.
fn write_workbook(path: &Path) {
    let headers = [
        "UUID-Nummer",
        "Kategorie",
        "BAUMATERIALIEN",
        "Rohdichte",
        "Bezug",
        "UBP Total",
        "UBP Herstellung",
        "UBP Entsorgung",
        "THG Total",
        "THG Herstellung",
        "THG Entsorgung",
        "Bemerkung",
    ];
    let cols = ["A", "B", "C", "D", "E", "F", "G", "H", "I", "J", "K", "L"];

    let mut rows = String::new();
    rows.push_str(&format!(
        r#"<row r="1">{}</row>"#,
        inline("A1", "Ökobilanzdaten im Baubereich")
    ));
    let header_cells: String = cols
        .iter()
        .zip(headers.iter())
        .map(|(c, h)| inline(&format!("{}3", c), h))
        .collect();
    rows.push_str(&format!(r#"<row r="3">{}</row>"#, header_cells));

    let data = [
        ("4", "U-100", "Beton", "Hochbaubeton", "2400"),
        ("5", "U-200", "Holz", "Brettschichtholz", "470"),
        ("6", "U-100", "Beton", "Hochbaubeton (neu)", "2450"),
        ("7", "U-300", "Holz", "Spanplatte", "-5"),
    ];
    for (r, uuid, group, name, density) in data {
        let mut cells = String::new();
        cells.push_str(&inline(&format!("A{}", r), uuid));
        cells.push_str(&inline(&format!("B{}", r), group));
        cells.push_str(&inline(&format!("C{}", r), name));
        cells.push_str(&number(&format!("D{}", r), density));
        cells.push_str(&inline(&format!("E{}", r), "kg"));
        for c in ["F", "G", "H", "I", "J", "K"] {
            cells.push_str(&number(&format!("{}{}", c, r), "1.5"));
        }
        rows.push_str(&format!(r#"<row r="{}">{}</row>"#, r, cells));
    }

    let file = fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let opts = zip::write::SimpleFileOptions::default();
    zip.start_file("xl/worksheets/sheet1.xml", opts).unwrap();
    write!(
        zip,
        r#"<?xml version="1.0"?><worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>{}</sheetData></worksheet>"#,
        rows
    )
    .unwrap();
    zip.finish().unwrap();
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let workbook = root.join("kbob.xlsx");
    write_workbook(&workbook);

    let config_content = format!(
        r#"[server]
bind = "127.0.0.1:0"

[source]
dataset_url = "file://{}"
format = "xlsx"
header_row = 3

[source.columns]
"UUID-Nummer" = "uuid"
"Kategorie" = "group"
"BAUMATERIALIEN" = "name"
"Rohdichte" = "density"
"Bezug" = "unit"
"UBP Total" = "ubpTotal"
"UBP Herstellung" = "ubpProduction"
"UBP Entsorgung" = "ubpDisposal"
"THG Total" = "ghgTotal"
"THG Herstellung" = "ghgProduction"
"THG Entsorgung" = "ghgDisposal"

[ingestion]
interval_secs = 0
persist_path = "{}/data/snapshot.json"
"#,
        workbook.display(),
        root.display()
    );

    let config_path = config_dir.join("kbob.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_kbob(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = kbob_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run kbob binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_sync_dry_run_reports_rejects() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_kbob(&config_path, &["sync", "--dry-run"]);
    assert!(success, "dry run failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("accepted: 2"), "{}", stdout);
    assert!(stdout.contains("rejected: 2"), "{}", stdout);
    assert!(stdout.contains("DuplicateUUID"));
    assert!(stdout.contains("InvalidNumber"));
    assert!(!tmp.path().join("data/snapshot.json").exists());
}

#[test]
fn test_sync_publishes_and_persists() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_kbob(&config_path, &["sync"]);
    assert!(success, "sync failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Published 2 materials (2 rejected)"), "{}", stdout);

    let persisted = fs::read_to_string(tmp.path().join("data/snapshot.json")).unwrap();
    let doc: serde_json::Value = serde_json::from_str(&persisted).unwrap();
    let materials = doc["materials"].as_array().unwrap();
    assert_eq!(materials.len(), 2);
    // Later duplicate wins; source order of survivors is kept.
    assert_eq!(materials[0]["uuid"], "U-200");
    assert_eq!(materials[1]["uuid"], "U-100");
    assert_eq!(materials[1]["name"], "Hochbaubeton (neu)");
    assert_eq!(materials[1]["density"], 2450.0);
}

#[test]
fn test_sync_fails_when_source_missing() {
    let (tmp, config_path) = setup_test_env();
    fs::remove_file(tmp.path().join("kbob.xlsx")).unwrap();

    let (_, stderr, success) = run_kbob(&config_path, &["sync"]);
    assert!(!success);
    assert!(stderr.contains("SourceUnavailable"), "{}", stderr);
}

#[test]
fn test_check_link_rejects_malformed_url() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_kbob(&config_path, &["check-link", "not-a-url"]);
    assert!(!success);
    assert!(stderr.contains("invalid link format"), "{}", stderr);

    let (stdout, _, success) = run_kbob(&config_path, &["check-link", "http://127.0.0.1:1/x"]);
    assert!(!success);
    assert!(stdout.contains("unreachable"));
}

#[test]
fn test_invalid_config_is_reported() {
    let (_tmp, config_path) = setup_test_env();
    let content = fs::read_to_string(&config_path).unwrap();
    fs::write(&config_path, content.replace("header_row = 3", "header_row = 0")).unwrap();

    let (_, stderr, success) = run_kbob(&config_path, &["sync", "--dry-run"]);
    assert!(!success);
    assert!(stderr.contains("header_row"), "{}", stderr);
}
