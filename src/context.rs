//! Workflow context lifecycle.
//!
//! The [`ContextManager`] is the only owner of [`WorkflowContext`] values.
//! It derives task keywords, pulls repository snapshots from the scanner and
//! schema snapshots from the introspector, scores them, and persists the
//! whole context through a [`ContextStore`] after every mutation.
//!
//! Every mutation runs under one lock and is persisted before it becomes
//! visible in memory: a failed write leaves the previous state in place.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::introspect::SchemaIntrospector;
use crate::models::{
    DatabaseContext, RepositoryContext, TableRelationships, TaskContext, TaskType,
    WorkflowContext, WorkflowStep,
};
use crate::relevance::{self, RelevanceEngine};
use crate::scanner::RepositoryScanner;
use crate::store::{validate_context_id, ContextStore};

/// Relationships are fetched for at most this many of the relevant tables.
pub const MAX_RELATIONSHIP_TABLES: usize = 5;

/// Entries in a relevance report.
pub const MAX_TOP_MATCHES: usize = 10;

#[derive(Default)]
struct ManagerState {
    active: BTreeMap<String, WorkflowContext>,
    current: Option<String>,
}

pub struct ContextManager {
    scanner: Arc<RepositoryScanner>,
    introspector: Option<Arc<SchemaIntrospector>>,
    relevance: RelevanceEngine,
    store: Arc<dyn ContextStore>,
    state: Mutex<ManagerState>,
}

// ============ Projections ============

#[derive(Debug, Clone, Serialize)]
pub struct TaskSummary {
    pub id: String,
    pub description: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub technologies: Vec<String>,
    pub keywords: Vec<String>,
    pub workflow_step: WorkflowStep,
}

#[derive(Debug, Clone, Serialize)]
pub struct RepositoriesSummary {
    pub selected: Vec<String>,
    pub count: usize,
    pub relevance_scores: BTreeMap<String, f64>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseSummary {
    pub schema: String,
    pub connection_status: bool,
    pub relevant_tables: Vec<String>,
    pub table_count: usize,
    pub last_updated: DateTime<Utc>,
}

/// Flattened view of a context for external consumers.
#[derive(Debug, Clone, Serialize)]
pub struct ContextSummary {
    pub context_id: String,
    pub task: TaskSummary,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repositories: Option<RepositoriesSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseSummary>,
}

impl From<&WorkflowContext> for ContextSummary {
    fn from(ctx: &WorkflowContext) -> Self {
        let task = &ctx.task_context;
        Self {
            context_id: ctx.context_id.clone(),
            task: TaskSummary {
                id: task.task_id.clone(),
                description: task.task_description.clone(),
                task_type: task.task_type,
                technologies: task.technologies.clone(),
                keywords: task.keywords.clone(),
                workflow_step: task.workflow_step,
            },
            created_at: ctx.created_at,
            last_accessed: ctx.last_accessed,
            repositories: ctx.repository_context.as_ref().map(|r| RepositoriesSummary {
                selected: r.selected_repositories.clone(),
                count: r.selected_repositories.len(),
                relevance_scores: r.relevance_scores.clone(),
                last_updated: r.last_updated,
            }),
            database: ctx.database_context.as_ref().map(|d| DatabaseSummary {
                schema: d.selected_schema.clone(),
                connection_status: d.connection_status,
                relevant_tables: d.relevant_tables.clone(),
                table_count: d.relevant_tables.len(),
                last_updated: d.last_updated,
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RepositoryMatch {
    pub name: String,
    pub relevance_score: f64,
    pub primary_language: String,
    pub frameworks: Vec<String>,
    pub file_count: usize,
}

/// All known repositories ranked against a context's task.
#[derive(Debug, Clone, Serialize)]
pub struct RelevanceReport {
    pub task_id: String,
    pub task_technologies: Vec<String>,
    pub task_keywords: Vec<String>,
    pub top_matches: Vec<RepositoryMatch>,
    pub total_repositories: usize,
    pub analysis_timestamp: DateTime<Utc>,
}

fn context_not_found(context_id: &str) -> Error {
    Error::NotFound(format!("context '{}'", context_id))
}

fn validate_task_id(task_id: &str) -> Result<()> {
    let ok = !task_id.is_empty()
        && task_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if ok {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "task id '{}' may only contain letters, digits, '.', '_' and '-'",
            task_id
        )))
    }
}

impl ContextManager {
    /// Build a manager and eagerly load every persisted context. The current
    /// context becomes the one accessed most recently.
    pub async fn open(
        scanner: Arc<RepositoryScanner>,
        introspector: Option<Arc<SchemaIntrospector>>,
        store: Arc<dyn ContextStore>,
        relevance_cache_ttl_secs: u64,
    ) -> Result<Self> {
        let mut state = ManagerState::default();
        for ctx in store.load_all().await? {
            state.active.insert(ctx.context_id.clone(), ctx);
        }
        state.current = state
            .active
            .values()
            .max_by(|a, b| {
                a.last_accessed
                    .cmp(&b.last_accessed)
                    .then_with(|| a.context_id.cmp(&b.context_id))
            })
            .map(|ctx| ctx.context_id.clone());
        info!(contexts = state.active.len(), "loaded workflow contexts");

        Ok(Self {
            scanner,
            introspector,
            relevance: RelevanceEngine::new(relevance_cache_ttl_secs),
            store,
            state: Mutex::new(state),
        })
    }

    pub fn scanner(&self) -> &Arc<RepositoryScanner> {
        &self.scanner
    }

    pub fn introspector(&self) -> Option<&Arc<SchemaIntrospector>> {
        self.introspector.as_ref()
    }

    /// Make sure a context is in the active map, reloading it from the store
    /// if needed.
    async fn ensure_loaded(&self, context_id: &str) -> Result<WorkflowContext> {
        validate_context_id(context_id)?;
        let mut state = self.state.lock().await;
        if let Some(ctx) = state.active.get(context_id) {
            return Ok(ctx.clone());
        }
        let ctx = self
            .store
            .load(context_id)
            .await?
            .ok_or_else(|| context_not_found(context_id))?;
        state.active.insert(context_id.to_string(), ctx.clone());
        Ok(ctx)
    }

    /// Apply `f` to a copy of the context, stamp `last_accessed`, persist,
    /// and only then publish the copy.
    async fn mutate<F>(&self, context_id: &str, f: F) -> Result<WorkflowContext>
    where
        F: FnOnce(&mut WorkflowContext) -> Result<()>,
    {
        let mut state = self.state.lock().await;
        let slot = state
            .active
            .get_mut(context_id)
            .ok_or_else(|| context_not_found(context_id))?;

        let mut updated = slot.clone();
        f(&mut updated)?;
        updated.last_accessed = Utc::now().max(updated.last_accessed);
        self.store.save(&updated).await?;
        *slot = updated.clone();
        Ok(updated)
    }

    pub async fn create_task_context(
        &self,
        task_id: &str,
        description: &str,
        task_type: TaskType,
    ) -> Result<String> {
        validate_task_id(task_id)?;
        if description.trim().is_empty() {
            return Err(Error::Validation("task description must not be empty".into()));
        }

        let keywords = relevance::extract_keywords(description);
        let technologies = relevance::identify_technologies(description);
        let now = Utc::now();

        let mut state = self.state.lock().await;
        let mut millis = now.timestamp_millis();
        let context_id = loop {
            let candidate = format!("ctx_{}_{}", task_id, millis);
            let taken = state.active.contains_key(&candidate)
                || match self.store.load(&candidate).await {
                    Ok(found) => found.is_some(),
                    // an undecodable record still occupies the id
                    Err(Error::Format(_)) | Err(Error::Serialization(_)) => true,
                    Err(e) => return Err(e),
                };
            if !taken {
                break candidate;
            }
            millis += 1;
        };

        let ctx = WorkflowContext {
            context_id: context_id.clone(),
            task_context: TaskContext {
                task_id: task_id.to_string(),
                task_description: description.to_string(),
                task_type,
                technologies,
                keywords,
                created_at: now,
                workflow_step: WorkflowStep::Questions,
            },
            repository_context: None,
            database_context: None,
            created_at: now,
            last_accessed: now,
        };

        self.store.save(&ctx).await?;
        state.active.insert(context_id.clone(), ctx);
        state.current = Some(context_id.clone());

        info!(context_id = %context_id, task_id, "created task context");
        Ok(context_id)
    }

    /// Attach the named repositories to a context.
    ///
    /// Every name must be in the scanner cache; a single unknown name rejects
    /// the call and leaves the context untouched. With `auto_analyze`, scores
    /// are computed over all cached repositories and kept for the selected
    /// ones.
    pub async fn set_repository_context(
        &self,
        context_id: &str,
        names: &[String],
        auto_analyze: bool,
    ) -> Result<()> {
        let ctx = self.ensure_loaded(context_id).await?;
        let available = self.scanner.repositories().await;

        let unknown: Vec<&str> = names
            .iter()
            .filter(|n| !available.iter().any(|r| &r.name == *n))
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            return Err(Error::Validation(format!(
                "unknown repositories: {}",
                unknown.join(", ")
            )));
        }

        let mut selected: Vec<String> = Vec::new();
        for name in names {
            if !selected.contains(name) {
                selected.push(name.clone());
            }
        }

        let mut repository_info = BTreeMap::new();
        for repo in &available {
            if selected.contains(&repo.name) && !repository_info.contains_key(&repo.name) {
                repository_info.insert(repo.name.clone(), repo.clone());
            }
        }

        let relevance_scores = if auto_analyze {
            let all = self
                .relevance
                .score_all(&ctx.task_context.task_description, &available)
                .await;
            selected
                .iter()
                .map(|n| (n.clone(), all.get(n).copied().unwrap_or(0.0)))
                .collect()
        } else {
            BTreeMap::new()
        };

        let repo_context = RepositoryContext {
            selected_repositories: selected.clone(),
            repository_info,
            relevance_scores,
            last_updated: Utc::now(),
            task_keywords: ctx.task_context.keywords.clone(),
        };

        self.mutate(context_id, move |ctx| {
            ctx.repository_context = Some(repo_context);
            Ok(())
        })
        .await?;

        info!(context_id, repositories = ?selected, "set repository context");
        Ok(())
    }

    /// Attach a database schema to a context.
    ///
    /// The connection test must pass. With `analyze`, the schema is analyzed,
    /// the relevant tables ranked, and relationships fetched for the top
    /// few. A failed analysis is logged and recorded as an absent analysis.
    pub async fn set_database_context(
        &self,
        context_id: &str,
        schema: &str,
        analyze: bool,
    ) -> Result<()> {
        let ctx = self.ensure_loaded(context_id).await?;
        let introspector = self
            .introspector
            .as_ref()
            .ok_or_else(|| Error::Config("no [database] section is configured".into()))?;

        introspector.test_connection().await?;

        let mut schema_analysis = None;
        let mut relevant_tables = Vec::new();
        let mut table_relationships = BTreeMap::new();

        if analyze {
            match introspector.analyze(schema, false).await {
                Ok(analysis) => {
                    relevant_tables =
                        relevance::rank_tables(&analysis.tables, &ctx.task_context.keywords)
                            .into_iter()
                            .map(|(name, _)| name)
                            .collect();
                    for table in relevant_tables.iter().take(MAX_RELATIONSHIP_TABLES) {
                        match introspector.get_table_relationships(table, schema).await {
                            Ok(rels) => {
                                table_relationships.insert(table.clone(), rels);
                            }
                            Err(e) => {
                                warn!(context_id, table = %table, error = %e, "skipping table relationships");
                                table_relationships.insert(table.clone(), TableRelationships::default());
                            }
                        }
                    }
                    schema_analysis = Some(analysis);
                }
                Err(e) => warn!(context_id, schema, error = %e, "schema analysis failed"),
            }
        }

        let db_context = DatabaseContext {
            selected_schema: schema.to_string(),
            schema_analysis,
            relevant_tables,
            table_relationships,
            connection_status: true,
            last_updated: Utc::now(),
        };

        self.mutate(context_id, move |ctx| {
            ctx.database_context = Some(db_context);
            Ok(())
        })
        .await?;

        info!(context_id, schema, "set database context");
        Ok(())
    }

    /// Fetch a context, refreshing and persisting its `last_accessed`.
    pub async fn get_context(&self, context_id: &str) -> Result<WorkflowContext> {
        self.ensure_loaded(context_id).await?;
        self.mutate(context_id, |_| Ok(())).await
    }

    pub async fn get_current_context(&self) -> Result<Option<WorkflowContext>> {
        let current = self.state.lock().await.current.clone();
        match current {
            Some(id) => match self.get_context(&id).await {
                Ok(ctx) => Ok(Some(ctx)),
                Err(Error::NotFound(_)) => Ok(None),
                Err(e) => Err(e),
            },
            None => Ok(None),
        }
    }

    pub async fn set_current_context(&self, context_id: &str) -> Result<()> {
        self.ensure_loaded(context_id).await?;
        self.state.lock().await.current = Some(context_id.to_string());
        Ok(())
    }

    /// Set the workflow step chosen by the caller.
    pub async fn update_workflow_step(&self, context_id: &str, step: WorkflowStep) -> Result<()> {
        self.ensure_loaded(context_id).await?;
        self.mutate(context_id, |ctx| {
            ctx.task_context.workflow_step = step;
            Ok(())
        })
        .await?;
        info!(context_id, step = %step, "updated workflow step");
        Ok(())
    }

    pub async fn get_context_summary(&self, context_id: &str) -> Result<ContextSummary> {
        let ctx = self.get_context(context_id).await?;
        Ok(ContextSummary::from(&ctx))
    }

    /// Rank every cached repository against the context's task.
    pub async fn analyze_repository_relevance(&self, context_id: &str) -> Result<RelevanceReport> {
        let ctx = self.get_context(context_id).await?;
        let available = self.scanner.repositories().await;
        if available.is_empty() {
            return Err(Error::NotFound(
                "scanned repositories (run a scan first)".into(),
            ));
        }

        let scores = self
            .relevance
            .score_all(&ctx.task_context.task_description, &available)
            .await;

        let mut ranked: Vec<(&String, f64)> = scores.iter().map(|(n, s)| (n, *s)).collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));

        let top_matches = ranked
            .into_iter()
            .take(MAX_TOP_MATCHES)
            .filter_map(|(name, score)| {
                available.iter().find(|r| &r.name == name).map(|r| RepositoryMatch {
                    name: name.clone(),
                    relevance_score: score,
                    primary_language: r.primary_language.clone(),
                    frameworks: r.frameworks.clone(),
                    file_count: r.file_count,
                })
            })
            .collect();

        Ok(RelevanceReport {
            task_id: ctx.task_context.task_id.clone(),
            task_technologies: ctx.task_context.technologies.clone(),
            task_keywords: ctx.task_context.keywords.clone(),
            top_matches,
            total_repositories: available.len(),
            analysis_timestamp: Utc::now(),
        })
    }

    pub async fn cleanup_old_contexts(&self, max_age_hours: i64) -> Result<usize> {
        self.cleanup_old_contexts_at(max_age_hours, Utc::now()).await
    }

    /// Evict and delete every context whose `last_accessed` is older than
    /// `max_age_hours` relative to `now`. Persisted records not yet in memory
    /// are considered too.
    pub async fn cleanup_old_contexts_at(
        &self,
        max_age_hours: i64,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        if max_age_hours < 0 {
            return Err(Error::Validation(format!(
                "max_age_hours must be >= 0, got {}",
                max_age_hours
            )));
        }
        let cutoff = Duration::try_hours(max_age_hours)
            .and_then(|age| now.checked_sub_signed(age))
            .ok_or_else(|| {
                Error::Validation(format!("max_age_hours {} is out of range", max_age_hours))
            })?;
        let persisted = self.store.load_all().await?;

        let mut state = self.state.lock().await;
        for ctx in persisted {
            state.active.entry(ctx.context_id.clone()).or_insert(ctx);
        }

        let expired: Vec<String> = state
            .active
            .values()
            .filter(|ctx| ctx.last_accessed < cutoff)
            .map(|ctx| ctx.context_id.clone())
            .collect();

        let mut removed = 0;
        for id in &expired {
            match self.store.delete(id).await {
                Ok(_) => {
                    state.active.remove(id);
                    if state.current.as_deref() == Some(id.as_str()) {
                        state.current = None;
                    }
                    removed += 1;
                }
                Err(e) => warn!(context_id = %id, error = %e, "failed to delete expired context"),
            }
        }

        info!(removed, max_age_hours, "cleaned up old contexts");
        Ok(removed)
    }
}
