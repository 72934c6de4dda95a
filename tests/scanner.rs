use context_assembly::config::RepositoriesConfig;
use context_assembly::models::FileNode;
use context_assembly::scanner::RepositoryScanner;
use context_assembly::Error;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const POM: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<project>
  <groupId>com.example</groupId>
  <artifactId>billing</artifactId>
  <dependencies>
    <dependency>
      <groupId>org.springframework.boot</groupId>
      <artifactId>spring-boot-starter-web</artifactId>
      <version>3.2.0</version>
    </dependency>
    <dependency>
      <groupId>junit</groupId>
      <artifactId>junit</artifactId>
      <version>4.13.2</version>
      <scope>test</scope>
    </dependency>
  </dependencies>
</project>
"#;

fn write(path: &Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

/// Base directory with a Spring Boot service, a small Python tool nested one
/// level down, and a plain directory that is not a repository.
fn setup_repos() -> TempDir {
    let tmp = TempDir::new().unwrap();
    let base = tmp.path().join("repos");

    let billing = base.join("billing");
    fs::create_dir_all(billing.join(".git")).unwrap();
    write(&billing.join("pom.xml"), POM);
    write(
        &billing.join("src/main/java/com/example/PaymentService.java"),
        "package com.example;\n\n@RestController\npublic class PaymentService {\n    // charge the card\n}\n",
    );
    write(
        &billing.join("src/main/java/com/example/Invoice.java"),
        "package com.example;\n\npublic class Invoice {}\n",
    );
    write(
        &billing.join("src/test/java/com/example/PaymentServiceTest.java"),
        "class PaymentServiceTest {}\n",
    );
    write(&billing.join("src/main/resources/application.yml"), "server:\n  port: 8080\n");
    write(&billing.join("target/classes/PaymentService.class"), "binary");

    let tools = base.join("team").join("tools");
    fs::create_dir_all(tools.join(".git")).unwrap();
    write(&tools.join("requirements.txt"), "flask==3.0.0\nrequests>=2.31\n");
    write(&tools.join("app.py"), "from flask import Flask\napp = Flask(__name__)\n");

    write(&base.join("notes").join("README.md"), "not a repository\n");
    tmp
}

fn config(tmp: &TempDir) -> RepositoriesConfig {
    RepositoriesConfig::new(tmp.path().join("repos"), tmp.path().join("cache"))
}

#[tokio::test]
async fn test_scan_detects_spring_boot_service() {
    let tmp = setup_repos();
    let scanner = RepositoryScanner::open(&config(&tmp)).await.unwrap();

    let repos = scanner.scan(false).await.unwrap();
    assert_eq!(repos.len(), 2);

    let billing = scanner.get_repository("billing").await.unwrap();
    assert_eq!(billing.primary_language, "java");
    assert!(billing.frameworks.contains(&"spring-boot".to_string()));
    assert!(billing.frameworks.contains(&"spring".to_string()));

    let web = billing
        .dependencies
        .iter()
        .find(|d| d.name == "org.springframework.boot:spring-boot-starter-web")
        .unwrap();
    assert_eq!(web.version.as_deref(), Some("3.2.0"));
    assert_eq!(web.scope, "compile");
    assert_eq!(web.ecosystem, "maven");

    let junit = billing.dependencies.iter().find(|d| d.name == "junit:junit").unwrap();
    assert_eq!(junit.scope, "test");

    // target/ is pruned
    assert!(!billing.file_structure.contains_key("target"));
}

#[tokio::test]
async fn test_scan_finds_nested_repository() {
    let tmp = setup_repos();
    let scanner = RepositoryScanner::open(&config(&tmp)).await.unwrap();
    scanner.scan(false).await.unwrap();

    let tools = scanner.get_repository("tools").await.unwrap();
    assert_eq!(tools.primary_language, "python");
    assert!(tools.frameworks.contains(&"flask".to_string()));
    assert!(scanner.get_repository("notes").await.is_none());
}

#[tokio::test]
async fn test_scan_is_idempotent_within_ttl() {
    let tmp = setup_repos();
    let scanner = RepositoryScanner::open(&config(&tmp)).await.unwrap();

    let first = scanner.scan(false).await.unwrap();
    let second = scanner.scan(false).await.unwrap();
    assert_eq!(first, second);

    let forced = scanner.scan(true).await.unwrap();
    assert_eq!(forced.len(), first.len());
    for (a, b) in first.iter().zip(&forced) {
        assert_eq!(a.name, b.name);
        assert!(b.last_scanned >= a.last_scanned);
    }
}

#[tokio::test]
async fn test_cache_survives_reopen() {
    let tmp = setup_repos();
    {
        let scanner = RepositoryScanner::open(&config(&tmp)).await.unwrap();
        scanner.scan(false).await.unwrap();
    }
    assert!(tmp.path().join("cache/repository_cache.json").exists());

    let reopened = RepositoryScanner::open(&config(&tmp)).await.unwrap();
    let names: Vec<String> = reopened
        .list_repositories()
        .await
        .into_iter()
        .map(|s| s.name)
        .collect();
    assert_eq!(names, vec!["billing".to_string(), "tools".to_string()]);
}

#[tokio::test]
async fn test_corrupt_cache_is_ignored() {
    let tmp = setup_repos();
    write(&tmp.path().join("cache/repository_cache.json"), "{ not json");

    let scanner = RepositoryScanner::open(&config(&tmp)).await.unwrap();
    assert!(scanner.list_repositories().await.is_empty());
    assert_eq!(scanner.scan(false).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_missing_base_path_is_config_error() {
    let tmp = TempDir::new().unwrap();
    let cfg = RepositoriesConfig::new(tmp.path().join("nope"), tmp.path().join("cache"));
    match RepositoryScanner::open(&cfg).await {
        Err(Error::Config(_)) => {}
        Err(other) => panic!("expected config error, got {}", other),
        Ok(_) => panic!("expected config error"),
    }
}

#[tokio::test]
async fn test_search_is_case_insensitive() {
    let tmp = setup_repos();
    let scanner = RepositoryScanner::open(&config(&tmp)).await.unwrap();
    scanner.scan(false).await.unwrap();

    let matches = scanner.search("paymentservice", None, None).await.unwrap();
    assert!(!matches.is_empty());
    assert!(matches.iter().all(|m| m.repository == "billing"));
    let decl = matches
        .iter()
        .find(|m| m.file_path == "src/main/java/com/example/PaymentService.java")
        .unwrap();
    assert_eq!(decl.line_number, 4);
    assert_eq!(decl.line_content, "public class PaymentService {");

    // yml is not a searchable extension
    assert!(scanner.search("8080", None, None).await.unwrap().is_empty());

    let limited = scanner.search("class", None, Some(1)).await.unwrap();
    assert_eq!(limited.len(), 1);

    let filtered = scanner
        .search("flask", Some(&["billing".to_string()]), None)
        .await
        .unwrap();
    assert!(filtered.is_empty());
}

#[tokio::test]
async fn test_search_rejects_empty_pattern() {
    let tmp = setup_repos();
    let scanner = RepositoryScanner::open(&config(&tmp)).await.unwrap();
    assert!(matches!(
        scanner.search("", None, None).await,
        Err(Error::Validation(_))
    ));
}

#[tokio::test]
async fn test_read_file_stays_inside_repository() {
    let tmp = setup_repos();
    let scanner = RepositoryScanner::open(&config(&tmp)).await.unwrap();
    scanner.scan(false).await.unwrap();

    let content = scanner.read_file("tools", "app.py").await.unwrap();
    assert!(content.contains("Flask"));

    assert!(matches!(
        scanner.read_file("tools", "../../notes/README.md").await,
        Err(Error::Validation(_))
    ));
    assert!(matches!(
        scanner.read_file("tools", "/etc/passwd").await,
        Err(Error::Validation(_))
    ));
    assert!(matches!(
        scanner.read_file("tools", "missing.py").await,
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        scanner.read_file("nope", "app.py").await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn test_dependencies_and_file_structure() {
    let tmp = setup_repos();
    let scanner = RepositoryScanner::open(&config(&tmp)).await.unwrap();
    scanner.scan(false).await.unwrap();

    let deps = scanner.dependencies("tools").await.unwrap();
    let pip = deps.get("pip").unwrap();
    assert!(pip.iter().any(|d| d.name == "flask"));

    let tree = scanner.file_structure("billing", 1).await.unwrap();
    match tree.get("src") {
        Some(FileNode::Directory { children, truncated }) => {
            assert!(children.is_empty());
            assert!(*truncated);
        }
        other => panic!("expected truncated src directory, got {:?}", other),
    }
    match tree.get("pom.xml") {
        Some(FileNode::File { is_config, .. }) => assert!(*is_config),
        other => panic!("expected pom.xml file node, got {:?}", other),
    }
}
