//! # Context Assembly CLI (`ctxa`)
//!
//! The `ctxa` binary drives the scanner, the schema introspector, and the
//! context manager from the command line. Every command prints one JSON
//! document to stdout: `{"status": "success", ...}` on success, or
//! `{"status": "error", "error": ..., "kind": ...}` with a non-zero exit
//! code on failure. Logs go to stderr.
//!
//! ## Usage
//!
//! ```bash
//! ctxa --config ./config/ctxa.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ctxa scan` | Discover and analyze repositories under the base path |
//! | `ctxa repos <action>` | Inspect scanned repositories |
//! | `ctxa db <action>` | Introspect the configured database |
//! | `ctxa context <action>` | Create and evolve workflow contexts |
//!
//! ## Examples
//!
//! ```bash
//! ctxa scan --force
//! ctxa repos search "PaymentService" --repo billing --limit 20
//! ctxa db analyze
//! ctxa context create PROJ-42 "Add Oracle audit columns to the Spring Boot billing service" --type feature
//! ctxa context repos ctx_PROJ-42_1700000000000 billing ledger
//! ctxa context step ctx_PROJ-42_1700000000000 answers
//! ```

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use context_assembly::config::{self, Config};
use context_assembly::context::ContextManager;
use context_assembly::error::{ErrorKind, ErrorPayload};
use context_assembly::introspect::SchemaIntrospector;
use context_assembly::models::{TaskType, WorkflowStep};
use context_assembly::scanner::RepositoryScanner;
use context_assembly::store::FileContextStore;
use context_assembly::Error;

/// Context Assembly CLI: scored repository and schema context for
/// natural-language tasks.
#[derive(Parser)]
#[command(
    name = "ctxa",
    about = "Assemble repository and database context for agent tasks",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ctxa.toml")]
    config: PathBuf,

    /// Log at debug level. RUST_LOG still takes precedence.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan the repository base path.
    ///
    /// Results younger than the cache TTL are reused unless `--force` is set.
    Scan {
        /// Rescan every repository regardless of cache age.
        #[arg(long)]
        force: bool,
    },

    /// Inspect scanned repositories.
    Repos {
        #[command(subcommand)]
        action: ReposAction,
    },

    /// Introspect the configured database.
    Db {
        #[command(subcommand)]
        action: DbAction,
    },

    /// Manage workflow contexts.
    Context {
        #[command(subcommand)]
        action: ContextAction,
    },
}

#[derive(Subcommand)]
enum ReposAction {
    /// List repository summaries.
    List,
    /// Show the full analysis of one repository.
    Show { name: String },
    /// Dependencies of one repository, grouped by ecosystem.
    Deps { name: String },
    /// File tree of one repository.
    Tree {
        name: String,
        /// Directory levels to include.
        #[arg(long, default_value_t = 3)]
        depth: usize,
    },
    /// Print a file from a repository.
    Read { name: String, path: String },
    /// Case-insensitive text search over source files.
    Search {
        pattern: String,
        /// Restrict to these repositories (repeatable).
        #[arg(long = "repo")]
        repos: Vec<String>,
        /// Maximum number of matches.
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[derive(Subcommand)]
enum DbAction {
    /// Check that the database answers.
    Test,
    /// Analyze a schema.
    Analyze {
        #[arg(long)]
        schema: Option<String>,
        /// Ignore cached analyses.
        #[arg(long)]
        force: bool,
    },
    /// Describe one table.
    Table {
        name: String,
        #[arg(long)]
        schema: Option<String>,
    },
    /// Tables whose name contains a pattern.
    Tables {
        pattern: String,
        #[arg(long)]
        schema: Option<String>,
    },
    /// Parent and child tables of one table.
    Relations {
        name: String,
        #[arg(long)]
        schema: Option<String>,
    },
    /// Sample rows from one table.
    Sample {
        name: String,
        #[arg(long)]
        schema: Option<String>,
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },
    /// Run a read-only query.
    Query {
        sql: String,
        /// Positional parameter, parsed as JSON when possible (repeatable).
        #[arg(long = "param")]
        params: Vec<String>,
        /// Bypass the query result cache.
        #[arg(long)]
        no_cache: bool,
    },
}

#[derive(Subcommand)]
enum ContextAction {
    /// Create a context for a task.
    Create {
        task_id: String,
        description: String,
        /// feature, bug, technical, or infrastructure.
        #[arg(long = "type", default_value = "feature")]
        task_type: String,
    },
    /// Attach repositories to a context.
    Repos {
        context_id: String,
        #[arg(required = true)]
        names: Vec<String>,
        /// Skip relevance scoring.
        #[arg(long)]
        no_analyze: bool,
    },
    /// Attach a database schema to a context.
    Db {
        context_id: String,
        #[arg(long)]
        schema: Option<String>,
        /// Skip schema analysis.
        #[arg(long)]
        no_analyze: bool,
    },
    /// Print a full context.
    Show { context_id: String },
    /// Print the current context.
    Current,
    /// Print a context summary.
    Summary { context_id: String },
    /// Rank all repositories against a context's task.
    Relevance { context_id: String },
    /// Set the workflow step.
    Step { context_id: String, step: String },
    /// Delete contexts not accessed within the age limit.
    Cleanup {
        /// Defaults to `context.max_age_hours` from the config.
        #[arg(long)]
        max_age_hours: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(value) => {
            print_json(&value);
            ExitCode::SUCCESS
        }
        Err(err) => {
            let payload = match err.downcast_ref::<Error>() {
                Some(e) => ErrorPayload::from(e),
                None => ErrorPayload {
                    status: "error",
                    error: format!("{:#}", err),
                    kind: ErrorKind::Configuration,
                },
            };
            print_json(&payload);
            ExitCode::FAILURE
        }
    }
}

fn print_json(value: &impl Serialize) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(e) => eprintln!("failed to encode output: {}", e),
    }
}

fn init_logging(cfg: &Config, verbose: bool) {
    let level = if verbose { "debug" } else { cfg.logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}

/// `{"status": "success", <key>: <value>}`
fn success(key: &str, value: impl Serialize) -> anyhow::Result<Value> {
    let mut map = Map::new();
    map.insert("status".into(), Value::from("success"));
    map.insert(key.into(), serde_json::to_value(value)?);
    Ok(Value::Object(map))
}

async fn open_scanner(cfg: &Config) -> anyhow::Result<Arc<RepositoryScanner>> {
    Ok(Arc::new(RepositoryScanner::open(&cfg.repositories).await?))
}

fn open_introspector(cfg: &Config) -> anyhow::Result<Option<Arc<SchemaIntrospector>>> {
    match &cfg.database {
        Some(db) => {
            let introspector =
                SchemaIntrospector::connect_lazy(db, Some(cfg.repositories.cache_dir.clone()))?;
            Ok(Some(Arc::new(introspector)))
        }
        None => Ok(None),
    }
}

fn require_introspector(cfg: &Config) -> anyhow::Result<(Arc<SchemaIntrospector>, String)> {
    let db = cfg
        .database
        .as_ref()
        .ok_or_else(|| Error::Config("no [database] section is configured".into()))?;
    let introspector = open_introspector(cfg)?
        .ok_or_else(|| Error::Config("no [database] section is configured".into()))?;
    Ok((introspector, db.default_schema.clone()))
}

fn parse_param(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

async fn run(cli: Cli) -> anyhow::Result<Value> {
    let cfg = config::load_config(&cli.config)?;
    init_logging(&cfg, cli.verbose);

    match cli.command {
        Commands::Scan { force } => {
            let scanner = open_scanner(&cfg).await?;
            let report = scanner.scan_report(force).await?;
            Ok(json!({
                "status": "success",
                "total_repositories": report.repositories.len(),
                "repositories": report
                    .repositories
                    .iter()
                    .map(context_assembly::models::RepositorySummary::from)
                    .collect::<Vec<_>>(),
                "skipped": report.skipped,
                "duration": report.duration,
            }))
        }
        Commands::Repos { action } => run_repos(&cfg, action).await,
        Commands::Db { action } => run_db(&cfg, action).await,
        Commands::Context { action } => run_context(&cfg, action).await,
    }
}

async fn run_repos(cfg: &Config, action: ReposAction) -> anyhow::Result<Value> {
    let scanner = open_scanner(cfg).await?;
    match action {
        ReposAction::List => success("repositories", scanner.list_repositories().await),
        ReposAction::Show { name } => {
            let repo = scanner
                .get_repository(&name)
                .await
                .ok_or_else(|| Error::NotFound(format!("repository '{}'", name)))?;
            success("repository", repo)
        }
        ReposAction::Deps { name } => success("dependencies", scanner.dependencies(&name).await?),
        ReposAction::Tree { name, depth } => {
            success("file_structure", scanner.file_structure(&name, depth).await?)
        }
        ReposAction::Read { name, path } => {
            let content = scanner.read_file(&name, &path).await?;
            Ok(json!({
                "status": "success",
                "repository": name,
                "path": path,
                "content": content,
            }))
        }
        ReposAction::Search {
            pattern,
            repos,
            limit,
        } => {
            let filter = if repos.is_empty() { None } else { Some(repos.as_slice()) };
            let matches = scanner.search(&pattern, filter, limit).await?;
            Ok(json!({
                "status": "success",
                "pattern": pattern,
                "total_matches": matches.len(),
                "matches": matches,
            }))
        }
    }
}

async fn run_db(cfg: &Config, action: DbAction) -> anyhow::Result<Value> {
    let (introspector, default_schema) = require_introspector(cfg)?;
    let schema_or = |s: Option<String>| s.unwrap_or_else(|| default_schema.clone());

    match action {
        DbAction::Test => {
            introspector.test_connection().await?;
            success("connected", true)
        }
        DbAction::Analyze { schema, force } => {
            success("analysis", introspector.analyze(&schema_or(schema), force).await?)
        }
        DbAction::Table { name, schema } => {
            success("table", introspector.get_table_info(&name, &schema_or(schema)).await?)
        }
        DbAction::Tables { pattern, schema } => {
            success("tables", introspector.search_tables(&pattern, &schema_or(schema)).await?)
        }
        DbAction::Relations { name, schema } => success(
            "relationships",
            introspector
                .get_table_relationships(&name, &schema_or(schema))
                .await?,
        ),
        DbAction::Sample {
            name,
            schema,
            limit,
        } => success(
            "sample",
            introspector
                .get_table_sample(&name, &schema_or(schema), limit)
                .await?,
        ),
        DbAction::Query {
            sql,
            params,
            no_cache,
        } => {
            let params: Vec<Value> = params.iter().map(|p| parse_param(p)).collect();
            success("result", introspector.execute(&sql, &params, !no_cache).await?)
        }
    }
}

async fn run_context(cfg: &Config, action: ContextAction) -> anyhow::Result<Value> {
    let scanner = open_scanner(cfg).await?;
    let introspector = open_introspector(cfg)?;
    let store = Arc::new(FileContextStore::new(&cfg.context.store_dir));
    let manager = ContextManager::open(
        scanner,
        introspector,
        store,
        cfg.context.relevance_cache_ttl_secs,
    )
    .await?;

    match action {
        ContextAction::Create {
            task_id,
            description,
            task_type,
        } => {
            let task_type: TaskType = task_type.parse()?;
            let context_id = manager
                .create_task_context(&task_id, &description, task_type)
                .await?;
            success("context_id", context_id)
        }
        ContextAction::Repos {
            context_id,
            names,
            no_analyze,
        } => {
            manager
                .set_repository_context(&context_id, &names, !no_analyze)
                .await?;
            success("summary", manager.get_context_summary(&context_id).await?)
        }
        ContextAction::Db {
            context_id,
            schema,
            no_analyze,
        } => {
            let schema = schema
                .or_else(|| cfg.database.as_ref().map(|d| d.default_schema.clone()))
                .unwrap_or_else(|| "main".to_string());
            manager
                .set_database_context(&context_id, &schema, !no_analyze)
                .await?;
            success("summary", manager.get_context_summary(&context_id).await?)
        }
        ContextAction::Show { context_id } => {
            success("context", manager.get_context(&context_id).await?)
        }
        ContextAction::Current => match manager.get_current_context().await? {
            Some(ctx) => success("context", ctx),
            None => Err(Error::NotFound("current context".into()).into()),
        },
        ContextAction::Summary { context_id } => {
            success("summary", manager.get_context_summary(&context_id).await?)
        }
        ContextAction::Relevance { context_id } => success(
            "relevance",
            manager.analyze_repository_relevance(&context_id).await?,
        ),
        ContextAction::Step { context_id, step } => {
            let step: WorkflowStep = step.parse()?;
            manager.update_workflow_step(&context_id, step).await?;
            success("workflow_step", step)
        }
        ContextAction::Cleanup { max_age_hours } => {
            let hours = max_age_hours.unwrap_or(cfg.context.max_age_hours);
            success("removed", manager.cleanup_old_contexts(hours).await?)
        }
    }
}
