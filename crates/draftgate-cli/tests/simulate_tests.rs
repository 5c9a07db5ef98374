//! End-to-end simulator runs over files on disk
//!
//! Run with: cargo test --package draftgate-cli --test simulate_tests

use std::fs;
use std::path::{Path, PathBuf};

use draftgate_cli::{load_rules, run_simulator, SimulatorConfig};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

const CATALOG: &str = r#"[
  {"id": "p01", "project_id": "shop", "fields": {"title": "Blue Kettle"}},
  {"id": "p02", "project_id": "shop", "fields": {"title": "Red Mug"}},
  {"id": "p03", "project_id": "shop", "fields": {"title": "Tea Tin", "seo_title": "done"}},
  {"id": "p04", "project_id": "shop", "fields": {"title": "Oak Tray"}},
  {"id": "p05", "project_id": "other", "fields": {"title": "Spoon"}}
]"#;

fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path
}

fn setup() -> (TempDir, SimulatorConfig) {
    let dir = TempDir::new().unwrap();
    let catalog = write(dir.path(), "catalog.json", CATALOG);
    let rules = write(
        dir.path(),
        "rules.json",
        r#"{"prefix": "Acme | ", "maxLength": 60}"#,
    );
    let mut config = SimulatorConfig::new(catalog, rules);
    config.project = "shop".to_string();
    (dir, config)
}

#[tokio::test]
async fn test_simulation_passes_without_failures() {
    let (_dir, config) = setup();
    let report = run_simulator(config).await.unwrap();

    assert_eq!(report.scope_size, 3);
    assert_eq!(report.failed_proposals, 0);
    assert!(report.first_apply.is_complete());
    assert!(!report.first_apply.already_applied);
    assert_eq!(report.first_apply.written_this_call, 3);
    assert!(report.second_apply.already_applied);
    assert_eq!(report.second_apply.written_this_call, 0);
    assert_eq!(report.audit_entries, 3);
    assert!(report.chain_intact);
    assert!(report.passed());
}

#[tokio::test]
async fn test_failed_writes_resume_on_reapply() {
    let (_dir, mut config) = setup();
    config.fail_writes = vec!["p02".to_string()];

    let report = run_simulator(config).await.unwrap();

    assert_eq!(report.first_apply.applied_count, 2);
    assert_eq!(report.first_apply.errors.len(), 1);
    assert_eq!(report.first_apply.errors[0].target_id.as_str(), "p02");
    assert_eq!(report.second_apply.written_this_call, 1);
    assert_eq!(report.second_apply.applied_count, 3);
    assert!(report.second_apply.is_complete());
    // one failure plus three writes
    assert_eq!(report.audit_entries, 4);
    assert!(report.chain_intact);
    assert!(report.passed());

    let text = report.generate_text();
    assert!(text.contains("Audit Chain: INTACT"));
    assert!(text.contains("Result: PASS"));
}

#[tokio::test]
async fn test_sample_size_limits_preview() {
    let (_dir, mut config) = setup();
    config.sample = Some(1);

    let report = run_simulator(config).await.unwrap();

    assert_eq!(report.sample.len(), 1);
    assert_eq!(report.sample[0].target_id.as_str(), "p01");
    let fields = report.sample[0].proposed_fields().unwrap();
    assert_eq!(fields.get("seo_title").unwrap(), "Acme | Blue Kettle");
}

#[tokio::test]
async fn test_missing_catalog_is_an_error() {
    let (dir, mut config) = setup();
    config.catalog_path = dir.path().join("absent.json");
    assert!(run_simulator(config).await.is_err());
}

#[test]
fn test_rule_formats_share_a_fingerprint() {
    let dir = TempDir::new().unwrap();
    let json = write(
        dir.path(),
        "rules.json",
        r#"{"prefix": "Acme | ", "maxLength": 60, "forbiddenPhrases": ["cheap"]}"#,
    );
    let yaml = write(
        dir.path(),
        "rules.yaml",
        "forbiddenPhrases:\n  - cheap\nmaxLength: 60\nprefix: 'Acme | '\n",
    );
    let toml = write(
        dir.path(),
        "rules.toml",
        "maxLength = 60\nprefix = \"Acme | \"\nforbiddenPhrases = [\"cheap\"]\n",
    );

    let from_json = load_rules(&json).unwrap().fingerprint();
    assert_eq!(load_rules(&yaml).unwrap().fingerprint(), from_json);
    assert_eq!(load_rules(&toml).unwrap().fingerprint(), from_json);
}

#[test]
fn test_unsupported_rules_extension() {
    let dir = TempDir::new().unwrap();
    let path = write(dir.path(), "rules.ini", "prefix=Acme");
    let err = load_rules(&path).unwrap_err();
    assert!(err.to_string().contains("unsupported rules format"));
}
