//! Core data models shared by the scanner, introspector, relevance engine,
//! and context manager.
//!
//! Scanner and introspector outputs ([`RepositoryInfo`], [`SchemaAnalysis`])
//! are immutable snapshots; the context manager embeds them by value into a
//! [`WorkflowContext`], which it alone mutates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

// ============ Repository scanner ============

/// Per-file metadata gathered during a repository scan.
#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    /// Path relative to the repository root, `/`-separated.
    pub path: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub language: Option<String>,
    pub is_config: bool,
    pub is_test: bool,
}

/// A dependency declared in a build manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyInfo {
    pub name: String,
    pub version: Option<String>,
    /// `compile`, `test`, `runtime`, `development`, ...
    pub scope: String,
    /// `maven`, `npm`, `pip`, `cargo`.
    pub ecosystem: String,
}

/// Version-control state of a repository checkout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitInfo {
    pub branch: String,
    pub last_commit: String,
    pub last_commit_date: DateTime<Utc>,
    pub remote_url: Option<String>,
    pub is_dirty: bool,
}

/// A node of the hierarchical file-tree summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FileNode {
    File {
        size: u64,
        language: Option<String>,
        is_config: bool,
        is_test: bool,
    },
    Directory {
        children: BTreeMap<String, FileNode>,
        /// Set on projections where children were cut off by a depth limit.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        truncated: bool,
    },
}

impl FileNode {
    /// Project a tree down to `max_depth` directory levels.
    ///
    /// Directories at the depth limit keep their entry but lose their
    /// children and are flagged `truncated`.
    pub fn truncate_tree(
        tree: &BTreeMap<String, FileNode>,
        max_depth: usize,
    ) -> BTreeMap<String, FileNode> {
        tree.iter()
            .map(|(name, node)| (name.clone(), node.truncated(max_depth, 1)))
            .collect()
    }

    fn truncated(&self, max_depth: usize, depth: usize) -> FileNode {
        match self {
            FileNode::File { .. } => self.clone(),
            FileNode::Directory { children, .. } => {
                if depth >= max_depth {
                    FileNode::Directory {
                        children: BTreeMap::new(),
                        truncated: !children.is_empty(),
                    }
                } else {
                    FileNode::Directory {
                        children: children
                            .iter()
                            .map(|(name, node)| (name.clone(), node.truncated(max_depth, depth + 1)))
                            .collect(),
                        truncated: false,
                    }
                }
            }
        }
    }
}

/// Complete scan snapshot of one repository root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryInfo {
    pub name: String,
    pub path: String,
    pub primary_language: String,
    pub languages: Vec<String>,
    pub frameworks: Vec<String>,
    pub dependencies: Vec<DependencyInfo>,
    pub file_structure: BTreeMap<String, FileNode>,
    pub git_info: Option<GitInfo>,
    pub size_bytes: u64,
    pub file_count: usize,
    pub last_scanned: DateTime<Utc>,
    /// Wall-clock scan time in seconds.
    pub scan_duration: f64,
}

/// Listing projection of a [`RepositoryInfo`].
#[derive(Debug, Clone, Serialize)]
pub struct RepositorySummary {
    pub name: String,
    pub path: String,
    pub primary_language: String,
    pub languages: Vec<String>,
    pub frameworks: Vec<String>,
    pub file_count: usize,
    pub size_mb: f64,
}

impl From<&RepositoryInfo> for RepositorySummary {
    fn from(repo: &RepositoryInfo) -> Self {
        let size_mb = (repo.size_bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0;
        Self {
            name: repo.name.clone(),
            path: repo.path.clone(),
            primary_language: repo.primary_language.clone(),
            languages: repo.languages.clone(),
            frameworks: repo.frameworks.clone(),
            file_count: repo.file_count,
            size_mb,
        }
    }
}

/// A single line matched by a code-pattern search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchMatch {
    pub repository: String,
    pub file_path: String,
    pub line_number: usize,
    pub line_content: String,
}

// ============ Schema introspection ============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub default_value: Option<String>,
    pub max_length: Option<i64>,
    pub precision: Option<i64>,
    pub scale: Option<i64>,
    pub is_primary_key: bool,
    pub is_foreign_key: bool,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub table_name: String,
    /// Indexed columns in key order.
    pub columns: Vec<String>,
    pub is_unique: bool,
    pub is_primary: bool,
    pub index_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKeyInfo {
    pub name: String,
    pub source_table: String,
    pub source_columns: Vec<String>,
    pub target_table: String,
    pub target_columns: Vec<String>,
    pub delete_rule: String,
    pub update_rule: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub schema: String,
    pub table_type: String,
    pub columns: Vec<ColumnInfo>,
    pub indexes: Vec<IndexInfo>,
    pub foreign_keys: Vec<ForeignKeyInfo>,
    pub row_count: Option<i64>,
    pub comment: Option<String>,
    pub last_analyzed: DateTime<Utc>,
}

/// Structural snapshot of one database schema.
///
/// `total_columns` always equals the sum of `columns.len()` over `tables`,
/// and table names are unique within one analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaAnalysis {
    pub schema_name: String,
    pub tables: Vec<TableInfo>,
    pub views: Vec<String>,
    pub sequences: Vec<String>,
    pub procedures: Vec<String>,
    pub functions: Vec<String>,
    pub total_tables: usize,
    pub total_columns: usize,
    pub analysis_date: DateTime<Utc>,
    /// Seconds spent analyzing.
    pub analysis_duration: f64,
}

impl SchemaAnalysis {
    /// Case-insensitive table lookup.
    pub fn table(&self, name: &str) -> Option<&TableInfo> {
        self.tables.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }
}

/// Result of a validated, masked read-only query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    pub row_count: usize,
    /// Seconds spent executing.
    pub execution_time: f64,
    /// Hex SHA-256 of `(query_text, parameters)`; also the cache key.
    pub query_hash: String,
}

/// Tables a table's foreign keys point to (`parents`) and tables whose
/// foreign keys point to it (`children`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableRelationships {
    pub parents: Vec<String>,
    pub children: Vec<String>,
}

// ============ Workflow context ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Feature,
    Bug,
    Technical,
    Infrastructure,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Feature => "feature",
            TaskType::Bug => "bug",
            TaskType::Technical => "technical",
            TaskType::Infrastructure => "infrastructure",
        }
    }
}

impl FromStr for TaskType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "feature" => Ok(TaskType::Feature),
            "bug" => Ok(TaskType::Bug),
            "technical" => Ok(TaskType::Technical),
            "infrastructure" => Ok(TaskType::Infrastructure),
            other => Err(Error::Validation(format!(
                "unknown task type '{}': expected feature, bug, technical, or infrastructure",
                other
            ))),
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position of a task in the agent workflow, set by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStep {
    Questions,
    Answers,
    CardGeneration,
}

impl WorkflowStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStep::Questions => "questions",
            WorkflowStep::Answers => "answers",
            WorkflowStep::CardGeneration => "card_generation",
        }
    }
}

impl FromStr for WorkflowStep {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "questions" => Ok(WorkflowStep::Questions),
            "answers" => Ok(WorkflowStep::Answers),
            "card_generation" => Ok(WorkflowStep::CardGeneration),
            other => Err(Error::Validation(format!(
                "unknown workflow step '{}': expected questions, answers, or card_generation",
                other
            ))),
        }
    }
}

impl fmt::Display for WorkflowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskContext {
    pub task_id: String,
    pub task_description: String,
    pub task_type: TaskType,
    pub technologies: Vec<String>,
    pub keywords: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub workflow_step: WorkflowStep,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryContext {
    pub selected_repositories: Vec<String>,
    pub repository_info: BTreeMap<String, RepositoryInfo>,
    /// Relevance score in `[0, 1]` per selected repository.
    pub relevance_scores: BTreeMap<String, f64>,
    pub last_updated: DateTime<Utc>,
    pub task_keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseContext {
    pub selected_schema: String,
    pub schema_analysis: Option<SchemaAnalysis>,
    /// Most relevant tables first, at most ten.
    pub relevant_tables: Vec<String>,
    /// Relationships for at most the top five relevant tables.
    pub table_relationships: BTreeMap<String, TableRelationships>,
    pub connection_status: bool,
    pub last_updated: DateTime<Utc>,
}

/// Complete persisted state of one task's pass through the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowContext {
    pub context_id: String,
    pub task_context: TaskContext,
    pub repository_context: Option<RepositoryContext>,
    pub database_context: Option<DatabaseContext>,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
}
