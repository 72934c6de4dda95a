//! Data-driven detection tables for languages, config files, test files, and
//! frameworks.
//!
//! Everything the scanner knows about file classification lives in the
//! static tables below. Lookups are pure functions over those tables; adding
//! a language or framework means adding a row, not a branch.

use std::collections::BTreeSet;

/// Language name to the file extensions (with leading dot) or exact file
/// names that identify it. First matching row wins.
pub const LANGUAGES: &[(&str, &[&str])] = &[
    ("java", &[".java"]),
    ("python", &[".py"]),
    ("typescript", &[".ts", ".tsx"]),
    ("javascript", &[".js", ".jsx", ".mjs", ".cjs"]),
    ("csharp", &[".cs"]),
    ("cpp", &[".cpp", ".cc", ".cxx", ".c++", ".hpp"]),
    ("c", &[".c", ".h"]),
    ("go", &[".go"]),
    ("rust", &[".rs"]),
    ("php", &[".php"]),
    ("ruby", &[".rb"]),
    ("swift", &[".swift"]),
    ("kotlin", &[".kt", ".kts"]),
    ("scala", &[".scala"]),
    ("groovy", &[".groovy"]),
    ("shell", &[".sh", ".bash", ".zsh"]),
    ("sql", &[".sql"]),
    ("xml", &[".xml"]),
    ("json", &[".json"]),
    ("yaml", &[".yml", ".yaml"]),
    ("properties", &[".properties"]),
    ("dockerfile", &["Dockerfile", "dockerfile"]),
];

/// Lowercase substrings marking a file name as configuration.
pub const CONFIG_PATTERNS: &[&str] = &[
    "config",
    ".properties",
    ".yml",
    ".yaml",
    ".json",
    ".xml",
    ".toml",
    ".env",
    "dockerfile",
    "docker-compose",
    ".gitignore",
    "readme",
];

/// Lowercase substrings marking a relative path as test code.
pub const TEST_PATTERNS: &[&str] = &["test", "spec", "__tests__"];

/// Directories never descended into.
pub const SKIP_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "build",
    "dist",
    ".vscode",
    ".idea",
    "__pycache__",
];

/// Extensions eligible for code-pattern search.
pub const SEARCH_EXTENSIONS: &[&str] = &[
    ".java", ".py", ".js", ".ts", ".jsx", ".tsx", ".cs", ".cpp", ".c", ".go", ".rs",
];

/// Languages whose source files are sampled for framework signatures.
pub const SAMPLED_LANGUAGES: &[&str] = &["java", "javascript", "typescript", "python"];

/// Files sampled per language.
pub const SAMPLE_LIMIT: usize = 20;

/// Framework to literal substrings that betray it inside source code.
pub const SOURCE_SIGNATURES: &[(&str, &[&str])] = &[
    (
        "spring",
        &["@SpringBootApplication", "@RestController", "org.springframework"],
    ),
    ("react", &["import React", "from \"react\"", "from 'react'"]),
    ("angular", &["@angular/", "@Component", "@Injectable"]),
    ("vue", &["Vue.js", "vue-router", "vuex"]),
    ("django", &["from django", "django."]),
    ("flask", &["from flask", "Flask("]),
    ("express", &["express()", "require(\"express\")", "require('express')"]),
    ("nestjs", &["@nestjs/"]),
    ("fastapi", &["from fastapi", "FastAPI()"]),
    ("hibernate", &["org.hibernate", "hibernate."]),
    ("jpa", &["javax.persistence", "jakarta.persistence"]),
    ("mybatis", &["@Mapper", "mybatis."]),
];

/// How a manifest's signatures are matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// Every signature found anywhere in the raw file counts.
    Content,
    /// Each declared dependency name yields at most its first matching signature.
    DependencyNames,
}

/// A manifest file and the dependency substrings that imply a framework.
pub struct ManifestRule {
    pub file_name: &'static str,
    pub mode: MatchMode,
    pub signatures: &'static [(&'static str, &'static str)],
}

pub const MANIFEST_RULES: &[ManifestRule] = &[
    ManifestRule {
        file_name: "pom.xml",
        mode: MatchMode::Content,
        signatures: &[
            ("spring-boot-starter", "spring-boot"),
            ("org.springframework", "spring"),
            ("hibernate", "hibernate"),
            ("junit", "junit"),
        ],
    },
    ManifestRule {
        file_name: "build.gradle",
        mode: MatchMode::Content,
        signatures: &[
            ("spring-boot-starter", "spring-boot"),
            ("org.springframework", "spring"),
            ("hibernate", "hibernate"),
            ("junit", "junit"),
        ],
    },
    ManifestRule {
        file_name: "package.json",
        mode: MatchMode::DependencyNames,
        signatures: &[
            ("react", "react"),
            ("angular", "angular"),
            ("vue", "vue"),
            ("express", "express"),
            ("next", "nextjs"),
        ],
    },
    ManifestRule {
        file_name: "requirements.txt",
        mode: MatchMode::DependencyNames,
        signatures: &[
            ("django", "django"),
            ("flask", "flask"),
            ("fastapi", "fastapi"),
            ("sqlalchemy", "sqlalchemy"),
        ],
    },
    ManifestRule {
        file_name: "Cargo.toml",
        mode: MatchMode::DependencyNames,
        signatures: &[
            ("actix", "actix"),
            ("axum", "axum"),
            ("rocket", "rocket"),
            ("diesel", "diesel"),
            ("sqlx", "sqlx"),
            ("tokio", "tokio"),
        ],
    },
];

/// Classify a file by its name.
pub fn detect_language(file_name: &str) -> Option<&'static str> {
    let ext = file_name
        .rfind('.')
        .map(|i| file_name[i..].to_lowercase())
        .unwrap_or_default();
    LANGUAGES
        .iter()
        .find(|(_, patterns)| {
            patterns.iter().any(|p| {
                if p.starts_with('.') {
                    !ext.is_empty() && ext == *p
                } else {
                    file_name == *p
                }
            })
        })
        .map(|(lang, _)| *lang)
}

pub fn is_config_file(file_name: &str) -> bool {
    let lower = file_name.to_lowercase();
    CONFIG_PATTERNS.iter().any(|p| lower.contains(p))
}

pub fn is_test_file(relative_path: &str) -> bool {
    let lower = relative_path.to_lowercase();
    TEST_PATTERNS.iter().any(|p| lower.contains(p))
}

pub fn is_searchable(file_name: &str) -> bool {
    let lower = file_name.to_lowercase();
    SEARCH_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

pub fn manifest_rule(file_name: &str) -> Option<&'static ManifestRule> {
    MANIFEST_RULES.iter().find(|r| r.file_name == file_name)
}

/// Frameworks implied by a manifest, given its raw content and the
/// dependency names parsed from it.
pub fn frameworks_in_manifest(
    rule: &ManifestRule,
    content: &str,
    dependency_names: &[String],
) -> BTreeSet<&'static str> {
    let mut found = BTreeSet::new();
    match rule.mode {
        MatchMode::Content => {
            for (needle, framework) in rule.signatures {
                if content.contains(needle) {
                    found.insert(*framework);
                }
            }
        }
        MatchMode::DependencyNames => {
            for name in dependency_names {
                let lower = name.to_lowercase();
                if let Some((_, framework)) =
                    rule.signatures.iter().find(|(needle, _)| lower.contains(needle))
                {
                    found.insert(*framework);
                }
            }
        }
    }
    found
}

/// Frameworks whose signatures appear in a source file.
pub fn frameworks_in_source(content: &str) -> BTreeSet<&'static str> {
    SOURCE_SIGNATURES
        .iter()
        .filter(|(_, patterns)| patterns.iter().any(|p| content.contains(p)))
        .map(|(framework, _)| *framework)
        .collect()
}
