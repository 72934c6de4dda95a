use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn ctxa_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("ctxa");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    // One Spring Boot repository under the base path
    let repo = root.join("repos").join("billing");
    fs::create_dir_all(repo.join(".git")).unwrap();
    fs::create_dir_all(repo.join("src/main/java")).unwrap();
    fs::write(
        repo.join("pom.xml"),
        "<project><dependencies><dependency>\
         <groupId>org.springframework.boot</groupId>\
         <artifactId>spring-boot-starter-data-jpa</artifactId>\
         <version>3.2.0</version>\
         </dependency></dependencies></project>",
    )
    .unwrap();
    fs::write(
        repo.join("src/main/java/InvoiceRepository.java"),
        "public interface InvoiceRepository {\n    Invoice findByNumber(String number);\n}\n",
    )
    .unwrap();

    let config_content = format!(
        r#"[repositories]
base_path = "{root}/repos"
cache_dir = "{root}/data/cache"

[context]
store_dir = "{root}/data/contexts"

[logging]
level = "warn"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("ctxa.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_ctxa(config_path: &Path, args: &[&str]) -> (Value, String, bool) {
    let binary = ctxa_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run ctxa binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let json: Value = serde_json::from_str(&stdout)
        .unwrap_or_else(|e| panic!("stdout is not JSON ({}): {}\nstderr: {}", e, stdout, stderr));
    (json, stderr, output.status.success())
}

#[test]
fn test_scan_reports_repositories() {
    let (_tmp, config_path) = setup_test_env();

    let (out, stderr, success) = run_ctxa(&config_path, &["scan"]);
    assert!(success, "scan failed: {} {}", out, stderr);
    assert_eq!(out["status"], "success");
    assert_eq!(out["total_repositories"], 1);
    assert_eq!(out["repositories"][0]["name"], "billing");
    assert_eq!(out["repositories"][0]["primary_language"], "java");
}

#[test]
fn test_repos_commands_use_persisted_cache() {
    let (_tmp, config_path) = setup_test_env();
    run_ctxa(&config_path, &["scan"]);

    let (out, _, success) = run_ctxa(&config_path, &["repos", "show", "billing"]);
    assert!(success);
    let frameworks = out["repository"]["frameworks"].as_array().unwrap();
    assert!(frameworks.iter().any(|f| f == "spring-boot"));

    let (out, _, success) = run_ctxa(&config_path, &["repos", "search", "findbynumber"]);
    assert!(success);
    assert_eq!(out["total_matches"], 1);
    assert_eq!(out["matches"][0]["line_number"], 2);

    let (out, _, success) = run_ctxa(&config_path, &["repos", "deps", "billing"]);
    assert!(success);
    assert_eq!(
        out["dependencies"]["maven"][0]["name"],
        "org.springframework.boot:spring-boot-starter-data-jpa"
    );
}

#[test]
fn test_read_outside_repository_is_rejected() {
    let (_tmp, config_path) = setup_test_env();
    run_ctxa(&config_path, &["scan"]);

    let (out, _, success) = run_ctxa(&config_path, &["repos", "read", "billing", "../../config/ctxa.toml"]);
    assert!(!success);
    assert_eq!(out["status"], "error");
    assert_eq!(out["kind"], "validation");
}

#[test]
fn test_show_missing_repository() {
    let (_tmp, config_path) = setup_test_env();

    let (out, _, success) = run_ctxa(&config_path, &["repos", "show", "nope"]);
    assert!(!success);
    assert_eq!(out["kind"], "validation");
    assert!(out["error"].as_str().unwrap().contains("not found"));
}

#[test]
fn test_context_workflow_across_invocations() {
    let (_tmp, config_path) = setup_test_env();
    run_ctxa(&config_path, &["scan"]);

    let (out, stderr, success) = run_ctxa(
        &config_path,
        &[
            "context",
            "create",
            "INV-9",
            "Speed up the spring invoice repository lookup",
            "--type",
            "technical",
        ],
    );
    assert!(success, "create failed: {} {}", out, stderr);
    let id = out["context_id"].as_str().unwrap().to_string();

    let (out, _, success) = run_ctxa(&config_path, &["context", "repos", &id, "billing"]);
    assert!(success);
    assert_eq!(out["summary"]["repositories"]["count"], 1);

    let (_, _, success) = run_ctxa(&config_path, &["context", "step", &id, "answers"]);
    assert!(success);

    let (out, _, success) = run_ctxa(&config_path, &["context", "current"]);
    assert!(success);
    assert_eq!(out["context"]["context_id"], id.as_str());
    assert_eq!(out["context"]["task_context"]["workflow_step"], "answers");

    let (_, _, success) = run_ctxa(&config_path, &["context", "step", &id, "questions"]);
    assert!(success);

    let (out, _, success) = run_ctxa(&config_path, &["context", "step", &id, "done"]);
    assert!(!success);
    assert_eq!(out["kind"], "validation");

    let (out, _, success) = run_ctxa(&config_path, &["context", "cleanup", "--max-age-hours=-1"]);
    assert!(!success);
    assert_eq!(out["kind"], "validation");
}

#[test]
fn test_db_commands_without_database_section() {
    let (_tmp, config_path) = setup_test_env();

    let (out, _, success) = run_ctxa(&config_path, &["db", "test"]);
    assert!(!success);
    assert_eq!(out["kind"], "configuration");
}

#[test]
fn test_invalid_config_is_reported() {
    let (tmp, _) = setup_test_env();
    let bad = tmp.path().join("config/bad.toml");
    fs::write(&bad, "[repositories]\nbase_path = \"/definitely/not/here\"\n").unwrap();

    let (out, _, success) = run_ctxa(&bad, &["scan"]);
    assert!(!success);
    assert_eq!(out["status"], "error");
    assert!(out["error"].as_str().unwrap().contains("base_path"));
}
