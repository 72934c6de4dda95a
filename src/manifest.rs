//! Dependency manifest parsing.
//!
//! Only manifests at the repository root are read. Each parser turns one
//! manifest into [`DependencyInfo`] records tagged with its ecosystem:
//!
//! | File | Ecosystem | Scopes |
//! |------|-----------|--------|
//! | `pom.xml` | `maven` | `<scope>` or `compile` |
//! | `package.json` | `npm` | `runtime`, `development` |
//! | `requirements.txt` | `pip` | `runtime` |
//! | `Cargo.toml` | `cargo` | `runtime`, `development`, `build` |

use once_cell::sync::Lazy;
use quick_xml::events::Event;
use regex::Regex;

use crate::error::{Error, Result};
use crate::models::DependencyInfo;

/// Manifest file names understood by [`parse_manifest`], in the order they
/// are read.
pub const MANIFEST_FILES: &[&str] = &["pom.xml", "package.json", "requirements.txt", "Cargo.toml"];

static REQUIREMENT_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z0-9\-_.]+)(?:\[[^\]]*\])?\s*([<>=!~]+)?\s*([0-9][^\s;#,]*)?")
        .expect("valid regex")
});

/// Parse a manifest by file name. Unknown file names yield no dependencies.
pub fn parse_manifest(file_name: &str, content: &str) -> Result<Vec<DependencyInfo>> {
    match file_name {
        "pom.xml" => parse_pom(content),
        "package.json" => parse_package_json(content),
        "requirements.txt" => Ok(parse_requirements(content)),
        "Cargo.toml" => parse_cargo_toml(content),
        _ => Ok(Vec::new()),
    }
}

#[derive(Default)]
struct PomDependency {
    group_id: Option<String>,
    artifact_id: Option<String>,
    version: Option<String>,
    scope: Option<String>,
}

/// Every `<dependency>` element, wherever it appears, with a group and
/// artifact id becomes `group:artifact`.
pub fn parse_pom(content: &str) -> Result<Vec<DependencyInfo>> {
    let mut reader = quick_xml::Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut deps = Vec::new();
    let mut path: Vec<Vec<u8>> = Vec::new();
    let mut current: Option<PomDependency> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.local_name().as_ref().to_vec();
                if name == b"dependency" {
                    current = Some(PomDependency::default());
                }
                path.push(name);
            }
            Ok(Event::Text(te)) => {
                let in_dependency =
                    path.len() >= 2 && path[path.len() - 2].as_slice() == b"dependency";
                if let (true, Some(dep)) = (in_dependency, current.as_mut()) {
                    let text = te
                        .unescape()
                        .map_err(|e| Error::Manifest(format!("pom.xml: {}", e)))?
                        .trim()
                        .to_string();
                    match path.last().map(|n| n.as_slice()) {
                        Some(b"groupId") => dep.group_id = Some(text),
                        Some(b"artifactId") => dep.artifact_id = Some(text),
                        Some(b"version") => dep.version = Some(text),
                        Some(b"scope") => dep.scope = Some(text),
                        _ => {}
                    }
                }
            }
            Ok(Event::End(_)) => {
                if path.pop().as_deref() == Some(b"dependency".as_slice()) {
                    if let Some(PomDependency {
                        group_id: Some(group),
                        artifact_id: Some(artifact),
                        version,
                        scope,
                    }) = current.take()
                    {
                        deps.push(DependencyInfo {
                            name: format!("{}:{}", group, artifact),
                            version,
                            scope: scope.unwrap_or_else(|| "compile".to_string()),
                            ecosystem: "maven".to_string(),
                        });
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::Manifest(format!("pom.xml: {}", e))),
            _ => {}
        }
    }

    Ok(deps)
}

pub fn parse_package_json(content: &str) -> Result<Vec<DependencyInfo>> {
    let data: serde_json::Value = serde_json::from_str(content)
        .map_err(|e| Error::Manifest(format!("package.json: {}", e)))?;

    let mut deps = Vec::new();
    for (section, scope) in [("dependencies", "runtime"), ("devDependencies", "development")] {
        if let Some(map) = data.get(section).and_then(|v| v.as_object()) {
            for (name, version) in map {
                deps.push(DependencyInfo {
                    name: name.clone(),
                    version: version.as_str().map(str::to_string),
                    scope: scope.to_string(),
                    ecosystem: "npm".to_string(),
                });
            }
        }
    }
    Ok(deps)
}

/// Comment lines, blank lines, and pip options (`-r`, `--index-url`) are
/// ignored.
pub fn parse_requirements(content: &str) -> Vec<DependencyInfo> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('-'))
        .filter_map(|line| REQUIREMENT_LINE.captures(line))
        .map(|caps| DependencyInfo {
            name: caps[1].to_string(),
            version: caps.get(3).map(|m| m.as_str().to_string()),
            scope: "runtime".to_string(),
            ecosystem: "pip".to_string(),
        })
        .collect()
}

pub fn parse_cargo_toml(content: &str) -> Result<Vec<DependencyInfo>> {
    let data: toml::Table = content
        .parse()
        .map_err(|e| Error::Manifest(format!("Cargo.toml: {}", e)))?;

    let mut deps = Vec::new();
    for (section, scope) in [
        ("dependencies", "runtime"),
        ("dev-dependencies", "development"),
        ("build-dependencies", "build"),
    ] {
        if let Some(table) = data.get(section).and_then(|v| v.as_table()) {
            for (name, spec) in table {
                let version = match spec {
                    toml::Value::String(v) => Some(v.clone()),
                    toml::Value::Table(t) => t
                        .get("version")
                        .and_then(|v| v.as_str())
                        .map(str::to_string),
                    _ => None,
                };
                deps.push(DependencyInfo {
                    name: name.clone(),
                    version,
                    scope: scope.to_string(),
                    ecosystem: "cargo".to_string(),
                });
            }
        }
    }
    Ok(deps)
}

#[cfg(test)]
mod tests {
    use super::*;

    const POM: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<project xmlns="http://maven.apache.org/POM/4.0.0">
  <groupId>com.acme</groupId>
  <artifactId>billing</artifactId>
  <dependencies>
    <dependency>
      <groupId>org.springframework.boot</groupId>
      <artifactId>spring-boot-starter-web</artifactId>
    </dependency>
    <dependency>
      <groupId>junit</groupId>
      <artifactId>junit</artifactId>
      <version>4.13.2</version>
      <scope>test</scope>
    </dependency>
  </dependencies>
</project>"#;

    #[test]
    fn test_parse_pom() {
        let deps = parse_pom(POM).unwrap();
        assert_eq!(deps.len(), 2);
        assert_eq!(
            deps[0].name,
            "org.springframework.boot:spring-boot-starter-web"
        );
        assert_eq!(deps[0].scope, "compile");
        assert_eq!(deps[0].version, None);
        assert_eq!(deps[1].version.as_deref(), Some("4.13.2"));
        assert_eq!(deps[1].scope, "test");
        assert!(deps.iter().all(|d| d.ecosystem == "maven"));
    }

    #[test]
    fn test_parse_pom_rejects_broken_xml() {
        assert!(matches!(
            parse_pom("<project><dependencies></project>"),
            Err(Error::Manifest(_))
        ));
    }

    #[test]
    fn test_parse_package_json() {
        let json = r#"{"dependencies":{"react":"^18.2.0"},"devDependencies":{"jest":"29.0.0"}}"#;
        let deps = parse_package_json(json).unwrap();
        assert_eq!(deps.len(), 2);
        assert_eq!(deps[0].name, "react");
        assert_eq!(deps[0].scope, "runtime");
        assert_eq!(deps[1].name, "jest");
        assert_eq!(deps[1].scope, "development");
    }

    #[test]
    fn test_parse_requirements() {
        let txt = "# web\nDjango==4.2.1\nrequests>=2.0\n\n-r base.txt\nuvicorn[standard]\n";
        let deps = parse_requirements(txt);
        let names: Vec<_> = deps.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["Django", "requests", "uvicorn"]);
        assert_eq!(deps[0].version.as_deref(), Some("4.2.1"));
        assert_eq!(deps[2].version, None);
    }

    #[test]
    fn test_parse_cargo_toml() {
        let toml = r#"
[package]
name = "svc"

[dependencies]
serde = { version = "1", features = ["derive"] }
tokio = "1"
local = { path = "../local" }

[dev-dependencies]
tempfile = "3"
"#;
        let deps = parse_cargo_toml(toml).unwrap();
        assert_eq!(deps.len(), 4);
        let serde = deps.iter().find(|d| d.name == "serde").unwrap();
        assert_eq!(serde.version.as_deref(), Some("1"));
        let local = deps.iter().find(|d| d.name == "local").unwrap();
        assert_eq!(local.version, None);
        let tempfile = deps.iter().find(|d| d.name == "tempfile").unwrap();
        assert_eq!(tempfile.scope, "development");
    }
}
