use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("notes");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("alpha.md"),
        "# Alpha Document\n\nThis is the alpha document about Rust programming.\n\nIt covers cargo and crates.",
    )
    .unwrap();
    fs::write(
        files_dir.join("beta.txt"),
        "Beta plain text file.\n\nNotes about deployment and infrastructure.",
    )
    .unwrap();

    let config_content = format!(
        r#"[library]
embedding_model = "test:tiny"
embedding_dims = 2
backend = "sqlite"

[library.sqlite]
path = "{root}/data/polymath.sqlite"

[chunking]
max_tokens = 20

[ingest]
output_dir = "{root}/libraries"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("polymath.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_polymath(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_polymath"))
        .arg("--config")
        .arg(config_path)
        .args(args)
        .output()
        .expect("Failed to run polymath binary");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_polymath(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));

    let (_, _, success) = run_polymath(&config_path, &["init"]);
    assert!(success, "Second init failed (not idempotent)");
}

#[test]
fn test_import_then_inspect() {
    let (tmp, config_path) = setup_test_env();
    let notes = tmp.path().join("notes");

    let (stdout, stderr, success) =
        run_polymath(&config_path, &["import", "filesystem", notes.to_str().unwrap()]);
    assert!(success, "import failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("filesystem-notes.json"), "got: {}", stdout);

    let library = tmp.path().join("libraries/filesystem-notes.json");
    assert!(library.exists());

    let (stdout, _, success) = run_polymath(&config_path, &["inspect", library.to_str().unwrap()]);
    assert!(success);
    assert!(stdout.contains("embedding model: test:tiny"), "got: {}", stdout);
    assert!(stdout.contains("documents:       2"), "got: {}", stdout);
    assert!(stdout.contains("embedded bits:   0"), "got: {}", stdout);
}

#[test]
fn test_import_with_upload() {
    let (tmp, config_path) = setup_test_env();
    let notes = tmp.path().join("notes");

    let (stdout, stderr, success) = run_polymath(
        &config_path,
        &["import", "filesystem", notes.to_str().unwrap(), "--upload"],
    );
    assert!(success, "import failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("uploaded:"), "got: {}", stdout);
    assert!(tmp.path().join("data/polymath.sqlite").exists());
}

#[test]
fn test_unknown_importer_fails() {
    let (_tmp, config_path) = setup_test_env();
    let (_, stderr, success) = run_polymath(&config_path, &["import", "notion", "."]);
    assert!(!success);
    assert!(stderr.contains("Unknown importer"), "got: {}", stderr);
}

#[test]
fn test_query_needs_servers() {
    let (_tmp, config_path) = setup_test_env();
    let (_, stderr, success) = run_polymath(&config_path, &["query", "--random"]);
    assert!(!success);
    assert!(stderr.contains("No library servers"), "got: {}", stderr);
}

#[test]
fn test_inspect_missing_file() {
    let (tmp, config_path) = setup_test_env();
    let missing = tmp.path().join("nope.json");
    let (_, stderr, success) = run_polymath(&config_path, &["inspect", missing.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("Failed to read library file"), "got: {}", stderr);
}
