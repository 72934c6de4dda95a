//! Schema introspection over a read-only SQLite pool.
//!
//! [`SchemaIntrospector::analyze`] enumerates a schema's tables and views
//! with one catalog query, then analyzes every table concurrently on a
//! [`JoinSet`]. The pool's `max_connections` is the effective concurrency
//! ceiling. A table whose analysis fails is logged and left out; the rest of
//! the analysis still succeeds.
//!
//! [`SchemaIntrospector::execute`] is the only path for caller-supplied SQL.
//! It runs the read-only gate from [`crate::security`] before touching the
//! pool and masks sensitive columns in the result.
//!
//! Two caches sit in front of the database: analyses keyed by schema name
//! (also persisted as `<cache_dir>/schema_<name>.json`) and query results
//! keyed by the SHA-256 of the query text and parameters (memory only).

use base64::Engine;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::{Column, Executor, Row, Statement, ValueRef};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::cache::TtlCache;
use crate::config::DatabaseConfig;
use crate::db;
use crate::error::{Error, Result};
use crate::models::{
    ColumnInfo, ForeignKeyInfo, IndexInfo, QueryResult, SchemaAnalysis, TableInfo,
    TableRelationships,
};
use crate::outcome::{partition, Outcome};
use crate::record;
use crate::security;

/// Upper bound on rows returned by [`SchemaIntrospector::get_table_sample`].
pub const MAX_SAMPLE_ROWS: i64 = 1000;

static DECLARED_TYPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([A-Za-z][A-Za-z0-9_ ]*?)\s*\(\s*(\d+)\s*(?:,\s*(\d+)\s*)?\)")
        .expect("valid regex")
});

static PERSISTABLE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("valid regex"));

pub struct SchemaIntrospector {
    pool: SqlitePool,
    cache_dir: Option<PathBuf>,
    schema_cache: Mutex<TtlCache<String, SchemaAnalysis>>,
    query_cache: Mutex<TtlCache<String, QueryResult>>,
}

impl SchemaIntrospector {
    pub fn new(pool: SqlitePool, config: &DatabaseConfig, cache_dir: Option<PathBuf>) -> Self {
        Self {
            pool,
            cache_dir,
            schema_cache: Mutex::new(TtlCache::new(config.schema_cache_ttl_secs)),
            query_cache: Mutex::new(TtlCache::new(config.query_cache_ttl_secs)),
        }
    }

    /// Build an introspector and open the first pooled connection now.
    pub async fn connect(config: &DatabaseConfig, cache_dir: Option<PathBuf>) -> Result<Self> {
        Ok(Self::new(db::connect(config).await?, config, cache_dir))
    }

    /// Build an introspector over a lazily connecting pool. Nothing touches
    /// the database until the first operation.
    pub fn connect_lazy(config: &DatabaseConfig, cache_dir: Option<PathBuf>) -> Result<Self> {
        Ok(Self::new(db::connect_lazy(config)?, config, cache_dir))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Round-trip a trivial query.
    pub async fn test_connection(&self) -> Result<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }

    // ============ Schema analysis ============

    pub async fn analyze(&self, schema: &str, force_refresh: bool) -> Result<SchemaAnalysis> {
        if !force_refresh {
            if let Some(hit) = self.cached_analysis(schema).await {
                debug!(schema, "using cached schema analysis");
                return Ok(hit);
            }
        }

        let started = Instant::now();
        info!(schema, "analyzing schema");

        let catalog = format!(
            "SELECT name, type FROM {}.sqlite_master \
             WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%' ORDER BY name",
            quote_ident(schema)
        );
        let entries = sqlx::query(&catalog).fetch_all(&self.pool).await?;

        let mut table_names = Vec::new();
        let mut views = Vec::new();
        for row in &entries {
            let name: String = row.try_get("name")?;
            let kind: String = row.try_get("type")?;
            if kind == "view" {
                views.push(name);
            } else {
                table_names.push(name);
            }
        }

        let has_stat1 = self.catalog_has(schema, "sqlite_stat1").await?;
        let sequences = if self.catalog_has(schema, "sqlite_sequence").await? {
            let sql = format!(
                "SELECT name FROM {}.sqlite_sequence ORDER BY name",
                quote_ident(schema)
            );
            sqlx::query_scalar::<_, String>(&sql)
                .fetch_all(&self.pool)
                .await?
        } else {
            Vec::new()
        };

        let mut set = JoinSet::new();
        for table in table_names {
            let pool = self.pool.clone();
            let schema = schema.to_string();
            set.spawn(async move {
                match analyze_table(&pool, &schema, &table, has_stat1).await {
                    Ok(info) => Outcome::Done(info),
                    Err(e) => Outcome::skipped(table, e),
                }
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = set.join_next().await {
            outcomes.push(joined.unwrap_or_else(|e| Outcome::skipped("table task", e)));
        }
        let (tables, skipped) = partition(outcomes);
        for unit in &skipped {
            warn!(schema, table = %unit.unit, reason = %unit.reason, "skipped table");
        }

        // One entry per table name, ordered by name.
        let tables: Vec<TableInfo> = tables
            .into_iter()
            .map(|t| (t.name.clone(), t))
            .collect::<BTreeMap<_, _>>()
            .into_values()
            .collect();
        let total_columns = tables.iter().map(|t| t.columns.len()).sum();

        let analysis = SchemaAnalysis {
            schema_name: schema.to_string(),
            total_tables: tables.len(),
            total_columns,
            tables,
            views,
            sequences,
            procedures: Vec::new(),
            functions: Vec::new(),
            analysis_date: Utc::now(),
            analysis_duration: started.elapsed().as_secs_f64(),
        };

        info!(
            schema,
            tables = analysis.total_tables,
            columns = analysis.total_columns,
            skipped = skipped.len(),
            seconds = analysis.analysis_duration,
            "schema analysis complete"
        );

        self.store_analysis(&analysis).await;
        Ok(analysis)
    }

    async fn cached_analysis(&self, schema: &str) -> Option<SchemaAnalysis> {
        let mut cache = self.schema_cache.lock().await;
        if let Some(hit) = cache.get(&schema.to_string()) {
            return Some(hit);
        }

        // Fall back to a persisted analysis that is still inside the TTL.
        let path = self.analysis_path(schema)?;
        let raw = tokio::fs::read_to_string(&path).await.ok()?;
        match record::decode_schema_analysis(&raw) {
            Ok(analysis) if analysis.schema_name == schema => {
                cache.insert_at(schema.to_string(), analysis.clone(), analysis.analysis_date);
                cache.get(&schema.to_string())
            }
            Ok(_) => None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring persisted schema analysis");
                None
            }
        }
    }

    async fn store_analysis(&self, analysis: &SchemaAnalysis) {
        self.schema_cache.lock().await.insert_at(
            analysis.schema_name.clone(),
            analysis.clone(),
            analysis.analysis_date,
        );

        let Some(path) = self.analysis_path(&analysis.schema_name) else {
            return;
        };
        let written = match record::encode_schema_analysis(analysis) {
            Ok(encoded) => record::write_atomic(&path, &encoded).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            warn!(path = %path.display(), error = %e, "failed to persist schema analysis");
        }
    }

    fn analysis_path(&self, schema: &str) -> Option<PathBuf> {
        let dir = self.cache_dir.as_ref()?;
        if !PERSISTABLE_NAME.is_match(schema) {
            return None;
        }
        Some(dir.join(format!("schema_{}.json", schema)))
    }

    async fn catalog_has(&self, schema: &str, table: &str) -> Result<bool> {
        let sql = format!(
            "SELECT COUNT(*) FROM {}.sqlite_master WHERE type = 'table' AND name = ?1",
            quote_ident(schema)
        );
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(table)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    /// Resolve a table name case-insensitively to its catalog spelling.
    async fn resolve_table(&self, schema: &str, table: &str) -> Result<String> {
        let sql = format!(
            "SELECT name FROM {}.sqlite_master \
             WHERE type = 'table' AND name = ?1 COLLATE NOCASE AND name NOT LIKE 'sqlite_%'",
            quote_ident(schema)
        );
        sqlx::query_scalar::<_, String>(&sql)
            .bind(table)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("table '{}.{}'", schema, table)))
    }

    // ============ Read-only helpers ============

    pub async fn get_table_info(&self, table: &str, schema: &str) -> Result<TableInfo> {
        let name = self.resolve_table(schema, table).await?;
        let has_stat1 = self.catalog_has(schema, "sqlite_stat1").await?;
        analyze_table(&self.pool, schema, &name, has_stat1).await
    }

    /// Table names containing `pattern`, case-insensitively.
    pub async fn search_tables(&self, pattern: &str, schema: &str) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT name FROM {}.sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' AND instr(LOWER(name), ?1) > 0 \
             ORDER BY name",
            quote_ident(schema)
        );
        let needle = Value::String(pattern.to_lowercase());
        let result = self.execute(&sql, &[needle], false).await?;
        Ok(first_column_strings(&result))
    }

    /// Tables this table references (`parents`) and tables referencing it
    /// (`children`).
    pub async fn get_table_relationships(
        &self,
        table: &str,
        schema: &str,
    ) -> Result<TableRelationships> {
        let params = [
            Value::String(table.to_string()),
            Value::String(schema.to_string()),
        ];

        let parents_sql = "SELECT DISTINCT fk.\"table\" AS parent_table \
                           FROM pragma_foreign_key_list(?1, ?2) AS fk ORDER BY parent_table";
        let parents = self.execute(parents_sql, &params, false).await?;

        let children_sql = format!(
            "SELECT DISTINCT m.name AS child_table FROM {}.sqlite_master AS m \
             JOIN pragma_foreign_key_list(m.name, ?2) AS fk \
             WHERE m.type = 'table' AND fk.\"table\" = ?1 COLLATE NOCASE \
             ORDER BY child_table",
            quote_ident(schema)
        );
        let children = self.execute(&children_sql, &params, false).await?;

        Ok(TableRelationships {
            parents: first_column_strings(&parents),
            children: first_column_strings(&children),
        })
    }

    /// Up to `limit` rows in physical (rowid) order, masked.
    pub async fn get_table_sample(
        &self,
        table: &str,
        schema: &str,
        limit: i64,
    ) -> Result<QueryResult> {
        let name = self.resolve_table(schema, table).await?;
        let sql = format!(
            "SELECT * FROM {}.{} ORDER BY rowid LIMIT ?1",
            quote_ident(schema),
            quote_ident(&name)
        );
        let limit = limit.clamp(1, MAX_SAMPLE_ROWS);
        self.execute(&sql, &[Value::from(limit)], false).await
    }

    // ============ Query execution ============

    /// Run a validated read-only query with positional parameters.
    ///
    /// Rejected queries fail with [`Error::QueryRejected`] before any
    /// connection is acquired. Results are masked and, when `use_cache` is
    /// set, served from and stored in the query cache.
    pub async fn execute(&self, query: &str, params: &[Value], use_cache: bool) -> Result<QueryResult> {
        security::validate_query(query)?;

        let query_hash = query_hash(query, params)?;
        if use_cache {
            if let Some(hit) = self.query_cache.lock().await.get(&query_hash) {
                debug!(hash = %query_hash, "query cache hit");
                return Ok(hit);
            }
        }

        let started = Instant::now();
        let mut q = sqlx::query(query);
        for param in params {
            q = match param {
                Value::Null => q.bind(None::<String>),
                Value::Bool(b) => q.bind(*b),
                Value::Number(n) => match n.as_i64() {
                    Some(i) => q.bind(i),
                    None => q.bind(n.as_f64()),
                },
                Value::String(s) => q.bind(s.clone()),
                other => q.bind(other.to_string()),
            };
        }
        let rows = q.fetch_all(&self.pool).await?;

        let columns: Vec<String> = match rows.first() {
            Some(row) => row.columns().iter().map(|c| c.name().to_string()).collect(),
            None => {
                let statement = (&self.pool).prepare(query).await?;
                statement
                    .columns()
                    .iter()
                    .map(|c| c.name().to_string())
                    .collect()
            }
        };

        let mut values: Vec<Vec<Value>> = rows
            .iter()
            .map(|row| (0..columns.len()).map(|idx| decode_cell(row, idx)).collect())
            .collect();
        security::mask_rows(&columns, &mut values);

        let result = QueryResult {
            row_count: values.len(),
            columns,
            rows: values,
            execution_time: started.elapsed().as_secs_f64(),
            query_hash: query_hash.clone(),
        };

        if use_cache {
            self.query_cache
                .lock()
                .await
                .insert(query_hash, result.clone());
        }
        Ok(result)
    }
}

/// Double-quote an identifier for interpolation into SQL.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Hex SHA-256 over the query text and its JSON-encoded parameters.
pub fn query_hash(query: &str, params: &[Value]) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(query.as_bytes());
    hasher.update([0u8]);
    hasher.update(serde_json::to_vec(params)?);
    Ok(hex::encode(hasher.finalize()))
}

fn first_column_strings(result: &QueryResult) -> Vec<String> {
    result
        .rows
        .iter()
        .filter_map(|row| row.first().and_then(|v| v.as_str()).map(str::to_string))
        .collect()
}

fn decode_cell(row: &SqliteRow, idx: usize) -> Value {
    match row.try_get_raw(idx) {
        Ok(raw) if !raw.is_null() => {}
        _ => return Value::Null,
    }
    if let Ok(v) = row.try_get::<i64, _>(idx) {
        return Value::from(v);
    }
    if let Ok(v) = row.try_get::<f64, _>(idx) {
        return serde_json::Number::from_f64(v)
            .map(Value::Number)
            .unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<String, _>(idx) {
        return Value::String(v);
    }
    if let Ok(v) = row.try_get::<Vec<u8>, _>(idx) {
        return Value::String(base64::engine::general_purpose::STANDARD.encode(v));
    }
    Value::Null
}

/// Length, precision, and scale from a declared type such as `VARCHAR(64)`
/// or `DECIMAL(10,2)`.
pub fn parse_declared_type(declared: &str) -> (Option<i64>, Option<i64>, Option<i64>) {
    let Some(caps) = DECLARED_TYPE.captures(declared) else {
        return (None, None, None);
    };
    let base = caps[1].to_uppercase();
    let first = caps.get(2).and_then(|m| m.as_str().parse().ok());
    let second = caps.get(3).and_then(|m| m.as_str().parse().ok());
    let is_textual = ["CHAR", "TEXT", "CLOB", "BINARY", "BLOB"]
        .iter()
        .any(|t| base.contains(t));
    if is_textual {
        (first, None, None)
    } else {
        (None, first, second)
    }
}

async fn analyze_table(
    pool: &SqlitePool,
    schema: &str,
    table: &str,
    has_stat1: bool,
) -> Result<TableInfo> {
    let foreign_keys = load_foreign_keys(pool, schema, table).await?;
    let indexes = load_indexes(pool, schema, table).await?;

    let column_rows = sqlx::query(
        "SELECT cid, name, type, \"notnull\", dflt_value, pk \
         FROM pragma_table_info(?1, ?2) ORDER BY cid",
    )
    .bind(table)
    .bind(schema)
    .fetch_all(pool)
    .await?;
    if column_rows.is_empty() {
        return Err(Error::NotFound(format!("columns of table '{}.{}'", schema, table)));
    }

    let mut columns = Vec::with_capacity(column_rows.len());
    for row in &column_rows {
        let name: String = row.try_get("name")?;
        let data_type: String = row.try_get("type")?;
        let notnull: i64 = row.try_get("notnull")?;
        let pk: i64 = row.try_get("pk")?;
        let (max_length, precision, scale) = parse_declared_type(&data_type);
        columns.push(ColumnInfo {
            is_foreign_key: foreign_keys
                .iter()
                .any(|fk| fk.source_columns.iter().any(|c| c.eq_ignore_ascii_case(&name))),
            name,
            data_type,
            nullable: notnull == 0 && pk == 0,
            default_value: row.try_get("dflt_value")?,
            max_length,
            precision,
            scale,
            is_primary_key: pk > 0,
            comment: None,
        });
    }

    let row_count = row_count(pool, schema, table, has_stat1).await;

    Ok(TableInfo {
        name: table.to_string(),
        schema: schema.to_string(),
        table_type: "TABLE".to_string(),
        columns,
        indexes,
        foreign_keys,
        row_count,
        comment: None,
        last_analyzed: Utc::now(),
    })
}

async fn load_indexes(pool: &SqlitePool, schema: &str, table: &str) -> Result<Vec<IndexInfo>> {
    let list = sqlx::query(
        "SELECT name, \"unique\", origin, partial FROM pragma_index_list(?1, ?2) ORDER BY name",
    )
    .bind(table)
    .bind(schema)
    .fetch_all(pool)
    .await?;

    let mut indexes = Vec::with_capacity(list.len());
    for row in &list {
        let name: String = row.try_get("name")?;
        let unique: i64 = row.try_get("unique")?;
        let origin: String = row.try_get("origin")?;
        let partial: i64 = row.try_get("partial")?;

        let columns: Vec<Option<String>> = sqlx::query_scalar(
            "SELECT name FROM pragma_index_info(?1, ?2) ORDER BY seqno",
        )
        .bind(&name)
        .bind(schema)
        .fetch_all(pool)
        .await?;

        indexes.push(IndexInfo {
            table_name: table.to_string(),
            columns: columns.into_iter().flatten().collect(),
            is_unique: unique != 0,
            is_primary: origin == "pk",
            index_type: if partial != 0 { "BTREE PARTIAL" } else { "BTREE" }.to_string(),
            name,
        });
    }
    Ok(indexes)
}

async fn load_foreign_keys(
    pool: &SqlitePool,
    schema: &str,
    table: &str,
) -> Result<Vec<ForeignKeyInfo>> {
    let rows = sqlx::query(
        "SELECT id, seq, \"table\", \"from\", \"to\", on_update, on_delete \
         FROM pragma_foreign_key_list(?1, ?2) ORDER BY id, seq",
    )
    .bind(table)
    .bind(schema)
    .fetch_all(pool)
    .await?;

    let mut by_id: BTreeMap<i64, ForeignKeyInfo> = BTreeMap::new();
    let mut implicit_targets = Vec::new();
    for row in &rows {
        let id: i64 = row.try_get("id")?;
        let target: String = row.try_get("table")?;
        let from: String = row.try_get("from")?;
        let to: Option<String> = row.try_get("to")?;
        let fk = by_id.entry(id).or_insert_with(|| ForeignKeyInfo {
            name: format!("fk_{}_{}", table, id),
            source_table: table.to_string(),
            source_columns: Vec::new(),
            target_table: target.clone(),
            target_columns: Vec::new(),
            delete_rule: String::new(),
            update_rule: String::new(),
        });
        fk.delete_rule = row.try_get("on_delete")?;
        fk.update_rule = row.try_get("on_update")?;
        fk.source_columns.push(from);
        match to {
            Some(col) => fk.target_columns.push(col),
            None => implicit_targets.push(id),
        }
    }

    // `REFERENCES parent` without a column list points at the parent's
    // primary key.
    for id in implicit_targets {
        if let Some(fk) = by_id.get_mut(&id) {
            if fk.target_columns.is_empty() {
                fk.target_columns = sqlx::query_scalar(
                    "SELECT name FROM pragma_table_info(?1, ?2) WHERE pk > 0 ORDER BY pk",
                )
                .bind(&fk.target_table)
                .bind(schema)
                .fetch_all(pool)
                .await?;
            }
        }
    }

    Ok(by_id.into_values().collect())
}

/// Row count from `sqlite_stat1` when available, else `COUNT(*)`, else
/// absent.
async fn row_count(pool: &SqlitePool, schema: &str, table: &str, has_stat1: bool) -> Option<i64> {
    if has_stat1 {
        let sql = format!(
            "SELECT stat FROM {}.sqlite_stat1 WHERE tbl = ?1 LIMIT 1",
            quote_ident(schema)
        );
        match sqlx::query_scalar::<_, String>(&sql)
            .bind(table)
            .fetch_optional(pool)
            .await
        {
            Ok(Some(stat)) => {
                if let Some(n) = stat.split_whitespace().next().and_then(|s| s.parse().ok()) {
                    return Some(n);
                }
            }
            Ok(None) => {}
            Err(e) => debug!(table, error = %e, "sqlite_stat1 lookup failed"),
        }
    }

    let sql = format!(
        "SELECT COUNT(*) FROM {}.{}",
        quote_ident(schema),
        quote_ident(table)
    );
    match sqlx::query_scalar::<_, i64>(&sql).fetch_one(pool).await {
        Ok(n) => Some(n),
        Err(e) => {
            debug!(table, error = %e, "row count unavailable");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_declared_type() {
        assert_eq!(parse_declared_type("VARCHAR(64)"), (Some(64), None, None));
        assert_eq!(parse_declared_type("decimal(10, 2)"), (None, Some(10), Some(2)));
        assert_eq!(parse_declared_type("NUMERIC(5)"), (None, Some(5), None));
        assert_eq!(parse_declared_type("INTEGER"), (None, None, None));
        assert_eq!(parse_declared_type(""), (None, None, None));
    }

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("main"), "\"main\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_query_hash_covers_parameters() {
        let a = query_hash("SELECT ?1", &[json!(1)]).unwrap();
        let b = query_hash("SELECT ?1", &[json!(2)]).unwrap();
        let c = query_hash("SELECT ?1", &[json!(1)]).unwrap();
        assert_ne!(a, b);
        assert_eq!(a, c);
        assert_eq!(a.len(), 64);
    }
}
