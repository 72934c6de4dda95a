use context_assembly::config::DatabaseConfig;
use context_assembly::introspect::SchemaIntrospector;
use context_assembly::security::REDACTED;
use context_assembly::Error;
use serde_json::{json, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tempfile::TempDir;

const FIXTURE: &[&str] = &[
    "CREATE TABLE users (
        id INTEGER PRIMARY KEY,
        email VARCHAR(120) NOT NULL,
        password_hash TEXT,
        display_name TEXT
    )",
    "CREATE TABLE orders (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        total DECIMAL(10,2),
        status VARCHAR(20) DEFAULT 'new'
    )",
    "CREATE TABLE order_items (
        id INTEGER PRIMARY KEY,
        order_id INTEGER NOT NULL REFERENCES orders,
        sku TEXT NOT NULL,
        quantity INTEGER NOT NULL DEFAULT 1
    )",
    "CREATE UNIQUE INDEX idx_users_email ON users(email)",
    "CREATE INDEX idx_orders_user ON orders(user_id)",
    "CREATE VIEW user_orders AS SELECT u.email, o.total FROM users u JOIN orders o ON o.user_id = u.id",
    "INSERT INTO users (id, email, password_hash, display_name) VALUES (1, 'ada@example.com', 'x1y2z3', 'Ada')",
    "INSERT INTO users (id, email, password_hash, display_name) VALUES (2, 'bob@example.com', NULL, 'Bob')",
    "INSERT INTO users (id, email, password_hash, display_name) VALUES (3, 'cy@example.com', 'q9', NULL)",
    "INSERT INTO orders (user_id, total, status) VALUES (1, 19.5, 'paid')",
    "INSERT INTO orders (user_id, total) VALUES (2, 7)",
    "INSERT INTO order_items (order_id, sku, quantity) VALUES (1, 'SKU-1', 2)",
];

fn database_url(path: &Path) -> String {
    format!("sqlite://{}", path.display())
}

async fn build_fixture(path: &Path) {
    let options = SqliteConnectOptions::from_str(&database_url(path))
        .unwrap()
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Delete);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();
    for statement in FIXTURE {
        sqlx::query(statement).execute(&pool).await.unwrap();
    }
    pool.close().await;
}

async fn setup() -> (TempDir, SchemaIntrospector) {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("app.sqlite");
    build_fixture(&db_path).await;

    let config = DatabaseConfig::new(database_url(&db_path));
    let introspector =
        SchemaIntrospector::connect_lazy(&config, Some(tmp.path().join("cache"))).unwrap();
    (tmp, introspector)
}

#[tokio::test]
async fn test_connection_succeeds() {
    let (_tmp, introspector) = setup().await;
    introspector.test_connection().await.unwrap();
}

#[tokio::test]
async fn test_eager_connect() {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("eager.sqlite");
    build_fixture(&db_path).await;

    let config = DatabaseConfig::new(database_url(&db_path));
    let introspector = SchemaIntrospector::connect(&config, None).await.unwrap();
    let result = introspector
        .execute("SELECT COUNT(*) AS n FROM orders", &[], false)
        .await
        .unwrap();
    assert_eq!(result.rows, vec![vec![json!(2)]]);

    let missing = DatabaseConfig::new(database_url(&tmp.path().join("missing.sqlite")));
    assert!(matches!(
        SchemaIntrospector::connect(&missing, None).await,
        Err(Error::Database(_))
    ));
}

#[tokio::test]
async fn test_connection_to_missing_database_fails() {
    let tmp = TempDir::new().unwrap();
    let config = DatabaseConfig::new(database_url(&tmp.path().join("missing.sqlite")));
    let introspector = SchemaIntrospector::connect_lazy(&config, None).unwrap();
    assert!(introspector.test_connection().await.is_err());
    // read-only handles never create the file
    assert!(!tmp.path().join("missing.sqlite").exists());
}

#[tokio::test]
async fn test_analyze_schema() {
    let (tmp, introspector) = setup().await;
    let analysis = introspector.analyze("main", false).await.unwrap();

    let names: Vec<&str> = analysis.tables.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["order_items", "orders", "users"]);
    assert_eq!(analysis.total_tables, 3);
    assert_eq!(
        analysis.total_columns,
        analysis.tables.iter().map(|t| t.columns.len()).sum::<usize>()
    );
    assert_eq!(analysis.total_columns, 12);
    assert_eq!(analysis.views, vec!["user_orders".to_string()]);
    assert_eq!(analysis.sequences, vec!["orders".to_string()]);
    assert!(analysis.procedures.is_empty());

    let orders = analysis.table("ORDERS").unwrap();
    assert_eq!(orders.row_count, Some(2));
    let user_id = orders.columns.iter().find(|c| c.name == "user_id").unwrap();
    assert!(!user_id.nullable);
    assert!(user_id.is_foreign_key);
    let total = orders.columns.iter().find(|c| c.name == "total").unwrap();
    assert_eq!((total.precision, total.scale), (Some(10), Some(2)));
    let status = orders.columns.iter().find(|c| c.name == "status").unwrap();
    assert_eq!(status.max_length, Some(20));
    assert_eq!(status.default_value.as_deref(), Some("'new'"));

    let fk = &orders.foreign_keys[0];
    assert_eq!(fk.target_table, "users");
    assert_eq!(fk.source_columns, vec!["user_id".to_string()]);
    assert_eq!(fk.target_columns, vec!["id".to_string()]);
    assert_eq!(fk.delete_rule, "CASCADE");

    // `REFERENCES orders` without a column resolves to the primary key
    let items = analysis.table("order_items").unwrap();
    assert_eq!(items.foreign_keys[0].target_columns, vec!["id".to_string()]);

    let users = analysis.table("users").unwrap();
    let email_idx = users.indexes.iter().find(|i| i.name == "idx_users_email").unwrap();
    assert!(email_idx.is_unique);
    assert_eq!(email_idx.columns, vec!["email".to_string()]);

    assert!(tmp.path().join("cache/schema_main.json").exists());
}

#[tokio::test]
async fn test_analysis_is_cached() {
    let (_tmp, introspector) = setup().await;
    let first = introspector.analyze("main", false).await.unwrap();
    let second = introspector.analyze("main", false).await.unwrap();
    assert_eq!(first.analysis_date, second.analysis_date);

    let forced = introspector.analyze("main", true).await.unwrap();
    assert!(forced.analysis_date >= first.analysis_date);
    assert_eq!(forced.total_columns, first.total_columns);
}

#[tokio::test]
async fn test_table_relationships() {
    let (_tmp, introspector) = setup().await;
    let rels = introspector
        .get_table_relationships("orders", "main")
        .await
        .unwrap();
    assert_eq!(rels.parents, vec!["users".to_string()]);
    assert_eq!(rels.children, vec!["order_items".to_string()]);

    let leaf = introspector
        .get_table_relationships("order_items", "main")
        .await
        .unwrap();
    assert_eq!(leaf.parents, vec!["orders".to_string()]);
    assert!(leaf.children.is_empty());
}

#[tokio::test]
async fn test_search_tables_and_table_info() {
    let (_tmp, introspector) = setup().await;
    let found = introspector.search_tables("ORDER", "main").await.unwrap();
    assert_eq!(found, vec!["order_items".to_string(), "orders".to_string()]);
    // wildcard characters match literally
    assert_eq!(
        introspector.search_tables("_", "main").await.unwrap(),
        vec!["order_items".to_string()]
    );
    assert!(introspector.search_tables("%", "main").await.unwrap().is_empty());

    let info = introspector.get_table_info("Users", "main").await.unwrap();
    assert_eq!(info.name, "users");
    assert!(matches!(
        introspector.get_table_info("nope", "main").await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn test_sample_masks_sensitive_columns() {
    let (_tmp, introspector) = setup().await;
    let sample = introspector.get_table_sample("users", "main", 10).await.unwrap();

    assert_eq!(sample.row_count, 3);
    let pw = sample.columns.iter().position(|c| c == "password_hash").unwrap();
    assert_eq!(sample.rows[0][pw], json!(REDACTED));
    assert_eq!(sample.rows[1][pw], Value::Null);
    assert_eq!(sample.rows[2][pw], json!(REDACTED));

    let name = sample.columns.iter().position(|c| c == "display_name").unwrap();
    assert_eq!(sample.rows[0][name], json!("Ada"));

    let limited = introspector.get_table_sample("users", "main", 1).await.unwrap();
    assert_eq!(limited.row_count, 1);
}

#[tokio::test]
async fn test_execute_with_params_and_cache() {
    let (_tmp, introspector) = setup().await;
    let query = "SELECT id, email FROM users WHERE id >= ?1 ORDER BY id";

    let result = introspector.execute(query, &[json!(2)], true).await.unwrap();
    assert_eq!(result.columns, vec!["id".to_string(), "email".to_string()]);
    assert_eq!(result.rows, vec![
        vec![json!(2), json!("bob@example.com")],
        vec![json!(3), json!("cy@example.com")],
    ]);

    let cached = introspector.execute(query, &[json!(2)], true).await.unwrap();
    assert_eq!(cached, result);

    let other = introspector.execute(query, &[json!(3)], true).await.unwrap();
    assert_ne!(other.query_hash, result.query_hash);
    assert_eq!(other.row_count, 1);
}

#[tokio::test]
async fn test_execute_empty_result_keeps_columns() {
    let (_tmp, introspector) = setup().await;
    let result = introspector
        .execute("SELECT id, sku FROM order_items WHERE id < 0", &[], false)
        .await
        .unwrap();
    assert_eq!(result.row_count, 0);
    assert_eq!(result.columns, vec!["id".to_string(), "sku".to_string()]);
}

#[tokio::test]
async fn test_write_statements_rejected_before_connecting() {
    // The database does not exist: a rejection proves no connection was tried.
    let tmp = TempDir::new().unwrap();
    let config = DatabaseConfig::new(database_url(&tmp.path().join("never.sqlite")));
    let introspector = SchemaIntrospector::connect_lazy(&config, None).unwrap();

    for query in [
        "DROP TABLE users",
        "drop table users",
        "DrOp TaBlE users",
        "SELECT 1; DROP TABLE users",
        "select * from users where 1=1; delete from users",
        "WITH x AS (SELECT 1) INSERT INTO users(id) SELECT * FROM x",
        "UPDATE users SET email = ''",
        "PRAGMA table_info(users)",
        "ATTACH DATABASE 'x.db' AS x",
    ] {
        match introspector.execute(query, &[], false).await {
            Err(Error::QueryRejected(_)) => {}
            other => panic!("expected rejection for {:?}, got {:?}", query, other),
        }
    }
}
