// ABOUTME: Integration tests for the CLI application
// ABOUTME: Runs the labgraph binary against isolated storage roots

use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

use labgraph::discriminator::DiscriminatorSet;
use labgraph::engine::TaskConfiguration;

mod common;
use common::{engine, filesystem_storage, Behavior, TestTask};

fn labgraph(dir: &TempDir, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_labgraph"))
        .args(args)
        .current_dir(dir.path())
        .env("LABGRAPH_STORAGE_ROOT", dir.path().join("store"))
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute labgraph")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

async fn populate(dir: &TempDir) -> (String, String) {
    let engine = engine(filesystem_storage(dir).await);

    let good = engine
        .execute(TestTask::new("Train").with("algo", "svm").build())
        .await
        .unwrap();
    let bad = engine
        .execute(
            TestTask::new("Evaluate")
                .with("metric", "f1")
                .behavior(Behavior::Fail("missing labels".to_string()))
                .build(),
        )
        .await
        .unwrap();

    (
        good.context_id("Train").unwrap().to_string(),
        bad.context_id("Evaluate").unwrap().to_string(),
    )
}

#[test]
fn test_cli_help_command() {
    let dir = TempDir::new().unwrap();
    let output = labgraph(&dir, &["--help"]);

    assert!(output.status.success());
    let stdout = stdout(&output);
    assert!(stdout.contains("labgraph"));
    assert!(stdout.contains("fingerprint"));
}

#[test]
fn test_cli_version_command() {
    let dir = TempDir::new().unwrap();
    let output = labgraph(&dir, &["--version"]);

    assert!(output.status.success());
    assert!(stdout(&output).contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_cli_fingerprint_matches_library() {
    let dir = TempDir::new().unwrap();
    let output = labgraph(
        &dir,
        &["fingerprint", "Train", "seed=42", "algo=svm", "--info", "note=x"],
    );
    assert!(output.status.success());

    let expected = TaskConfiguration::new(
        "Train",
        DiscriminatorSet::new()
            .with("algo", "svm")
            .unwrap()
            .with("seed", 42)
            .unwrap(),
    )
    .context_id()
    .unwrap();
    assert_eq!(stdout(&output).trim(), expected.as_str());

    // argument order does not matter
    let reordered = labgraph(&dir, &["fingerprint", "Train", "algo=svm", "seed=42"]);
    assert_eq!(stdout(&reordered).trim(), expected.as_str());
}

#[test]
fn test_cli_fingerprint_json_and_invalid_input() {
    let dir = TempDir::new().unwrap();

    let output = labgraph(&dir, &["--format", "json", "fingerprint", "Train", "lr=0.1"]);
    assert!(output.status.success());
    let parsed: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(parsed["task_type"], "Train");
    assert_eq!(parsed["context_id"].as_str().unwrap().len(), 64);

    let invalid = labgraph(&dir, &["fingerprint", "Train", "no-equals-sign"]);
    assert!(!invalid.status.success());
}

#[test]
fn test_cli_list_empty_store() {
    let dir = TempDir::new().unwrap();
    let output = labgraph(&dir, &["list"]);

    assert!(output.status.success());
    assert!(stdout(&output).contains("No contexts found"));
}

#[tokio::test]
async fn test_cli_list_show_and_filter() {
    let dir = TempDir::new().unwrap();
    let (train_id, evaluate_id) = populate(&dir).await;

    let output = labgraph(&dir, &["list", "--format", "json"]);
    assert!(output.status.success());
    let listed: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(listed.as_array().unwrap().len(), 2);

    let failed = labgraph(&dir, &["list", "--status", "failed", "--format", "json"]);
    let failed: serde_json::Value = serde_json::from_str(&stdout(&failed)).unwrap();
    assert_eq!(failed.as_array().unwrap().len(), 1);
    assert_eq!(failed[0]["id"], evaluate_id.as_str());

    let shown = labgraph(&dir, &["show", &train_id[..12]]);
    assert!(shown.status.success());
    let text = stdout(&shown);
    assert!(text.contains(&train_id));
    assert!(text.contains("algo = svm"));
    assert!(text.contains("output"));

    let bad_status = labgraph(&dir, &["list", "--status", "exploded"]);
    assert!(!bad_status.status.success());
}

#[tokio::test]
async fn test_cli_gc_and_delete() {
    let dir = TempDir::new().unwrap();
    let (train_id, evaluate_id) = populate(&dir).await;
    let store = dir.path().join("store");

    let dry_run = labgraph(&dir, &["gc", "--dry-run"]);
    assert!(dry_run.status.success());
    assert!(stdout(&dry_run).contains("Would remove 1 failed context(s)"));
    assert!(context_exists(&store, &evaluate_id));

    let gc = labgraph(&dir, &["gc"]);
    assert!(gc.status.success());
    assert!(!context_exists(&store, &evaluate_id));
    assert!(context_exists(&store, &train_id));

    let deleted = labgraph(&dir, &["delete", &train_id]);
    assert!(deleted.status.success());
    assert!(!context_exists(&store, &train_id));

    let missing = labgraph(&dir, &["show", &train_id]);
    assert!(!missing.status.success());
}

fn context_exists(store: &Path, id: &str) -> bool {
    store.join(id).join("context.json").exists()
}
