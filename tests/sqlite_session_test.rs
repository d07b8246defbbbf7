//! Integration tests for sessions over a real SQLite file.
//!
//! Tests verify that:
//! - Raw and built statements execute with list expansion
//! - Table helpers (insert, find, get, count, update, delete) work end to end
//! - Transactions commit, roll back and reject reuse
//! - The prepared-statement cache reuses handles and re-prepares after reset

use db_session::db::{Database, SessionState, SqlxDriver};
use db_session::expr::{Comparison, Cond, Condition, Operator, and, or};
use db_session::sql::Statement;
use db_session::{Context, DbError, Value};
use std::collections::BTreeMap;
use tempfile::NamedTempFile;

/// Create a SQLite database with a `users` table.
async fn setup_db(query: &str) -> (Database<SqlxDriver>, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let url = format!("sqlite:{}{}", temp_file.path().display(), query);
    let db = Database::connect(&Context::background(), &url).await.unwrap();

    let session = db.session();
    session
        .exec(
            &Context::background(),
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, age INTEGER)",
            vec![],
        )
        .await
        .unwrap();
    (db, temp_file)
}

fn user(name: &str, age: i64) -> BTreeMap<String, Value> {
    let mut row = BTreeMap::new();
    row.insert("name".to_string(), Value::from(name));
    row.insert("age".to_string(), Value::from(age));
    row
}

#[tokio::test]
async fn test_raw_query_expands_lists() {
    let (db, _file) = setup_db("").await;
    let ctx = Context::background();
    let session = db.session();

    for (name, age) in [("Ana", 18), ("Bo", 25), ("Cy", 40)] {
        session
            .exec(
                &ctx,
                "INSERT INTO users (name, age) VALUES (?, ?)",
                vec![name.into(), age.into()],
            )
            .await
            .unwrap();
    }

    let rows = session
        .query(
            &ctx,
            "SELECT name FROM users WHERE age IN ? ORDER BY name",
            vec![Value::from(vec![18, 40])],
        )
        .await
        .unwrap();
    let names: Vec<_> = rows.iter().map(|r| r["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["Ana", "Cy"]);

    // An empty list matches nothing instead of failing to parse
    let rows = session
        .query(
            &ctx,
            "SELECT name FROM users WHERE age IN ?",
            vec![Value::List(vec![])],
        )
        .await
        .unwrap();
    assert!(rows.is_empty());

    let row = session
        .query_row(&ctx, "SELECT COUNT(*) AS n FROM users", vec![])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row["n"], 3);
}

#[tokio::test]
async fn test_table_helpers() {
    let (db, _file) = setup_db("").await;
    let ctx = Context::background();
    let session = db.session();

    let result = session.insert(&ctx, "users", &user("Ana", 18)).await.unwrap();
    assert_eq!(result.rows_affected, 1);
    assert_eq!(result.last_insert_id, Some(1));
    session.insert(&ctx, "users", &user("Bo", 25)).await.unwrap();
    session.insert(&ctx, "users", &user("Cy", 40)).await.unwrap();

    let adults = session
        .find(&ctx, "users", Cond::new().with("age >=", 21))
        .await
        .unwrap();
    assert_eq!(adults.len(), 2);

    let ana = session.get(&ctx, "users", 1).await.unwrap().unwrap();
    assert_eq!(ana["name"], "Ana");
    assert!(session.get(&ctx, "users", 99).await.unwrap().is_none());

    let filter = or([
        Condition::new("name", Comparison::eq("Ana")),
        Condition::new("age", Comparison::gt(30)),
    ]);
    assert_eq!(session.count(&ctx, "users", filter).await.unwrap(), 2);
    assert_eq!(session.count(&ctx, "users", Cond::new()).await.unwrap(), 3);

    let mut changes = BTreeMap::new();
    changes.insert("age".to_string(), Value::from(19));
    let updated = session
        .update(&ctx, "users", &changes, Cond::new().with("name", "Ana"))
        .await
        .unwrap();
    assert_eq!(updated.rows_affected, 1);

    let deleted = session
        .delete(
            &ctx,
            "users",
            and([Condition::new("age", Comparison::between(20, 30))]),
        )
        .await
        .unwrap();
    assert_eq!(deleted.rows_affected, 1);

    session.truncate(&ctx, "users").await.unwrap();
    assert_eq!(session.count(&ctx, "users", Cond::new()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_primary_keys_are_cached() {
    let (db, _file) = setup_db("").await;
    let ctx = Context::background();
    let session = db.session();

    let keys = session.primary_keys(&ctx, "users").await.unwrap();
    assert_eq!(keys, vec!["id".to_string()]);

    let collection = session.collection(&ctx, "users").await.unwrap();
    assert_eq!(collection.primary_key(), Some("id"));

    // Dropping the table does not invalidate the cache until reset
    session.exec(&ctx, "DROP TABLE users", vec![]).await.unwrap();
    assert_eq!(session.primary_keys(&ctx, "users").await.unwrap(), keys);
    session.reset().await;
    assert!(session.primary_keys(&ctx, "users").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_build_errors_never_reach_the_driver() {
    let (db, _file) = setup_db("").await;
    let ctx = Context::background();
    let session = db.session();

    let stmt = Statement::select("users").filter(Condition::new(
        "age",
        Comparison::new(Operator::Between, 5),
    ));
    let err = session.query_statement(&ctx, &stmt).await.unwrap_err();
    assert!(err.is_build(), "unexpected error: {err}");

    let err = session
        .exec(&ctx, "SELEC nonsense", vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Database { .. }));
}

#[tokio::test]
async fn test_transaction_commit_and_rollback() {
    let (db, _file) = setup_db("").await;
    let ctx = Context::background();
    let session = db.session();

    let tx = session.new_transaction(&ctx).await.unwrap();
    assert_eq!(tx.state(), SessionState::InTransaction);
    assert!(tx.transaction_id().is_some());
    tx.insert(&ctx, "users", &user("Ana", 18)).await.unwrap();
    tx.rollback(&ctx).await.unwrap();
    assert_eq!(tx.state(), SessionState::RolledBack);

    let err = tx
        .exec(&ctx, "SELECT 1", vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Transaction { .. }));
    assert_eq!(session.count(&ctx, "users", Cond::new()).await.unwrap(), 0);

    let tx = session.new_transaction(&ctx).await.unwrap();
    tx.insert(&ctx, "users", &user("Bo", 25)).await.unwrap();
    tx.commit(&ctx).await.unwrap();
    assert_eq!(tx.state(), SessionState::Committed);
    assert!(tx.commit(&ctx).await.is_err());
    assert_eq!(session.count(&ctx, "users", Cond::new()).await.unwrap(), 1);
}

#[tokio::test]
async fn test_run_in_transaction() {
    let (db, _file) = setup_db("").await;
    let ctx = Context::background();
    let session = db.session();
    let ctx_ref = &ctx;

    let id = session
        .run_in_transaction(&ctx, move |tx| async move {
            let result = tx.insert(ctx_ref, "users", &user("Ana", 18)).await?;
            Ok(result.last_insert_id)
        })
        .await
        .unwrap();
    assert_eq!(id, Some(1));

    // Application errors roll back and are returned untouched
    let err = session
        .run_in_transaction(&ctx, move |tx| async move {
            tx.insert(ctx_ref, "users", &user("Bo", 25)).await?;
            Err::<(), _>(DbError::invalid_input("age out of range"))
        })
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::InvalidInput { .. }));
    assert_eq!(session.count(&ctx, "users", Cond::new()).await.unwrap(), 1);
}

#[tokio::test]
async fn test_prepared_statement_cache() {
    let (db, _file) = setup_db("?prepared_statement_cache=true").await;
    let ctx = Context::background();
    let session = db.session();
    assert!(session.prepared_statement_cache_enabled());

    for age in [18, 25] {
        session
            .exec(
                &ctx,
                "INSERT INTO users (name, age) VALUES (?, ?)",
                vec!["x".into(), age.into()],
            )
            .await
            .unwrap();
    }
    assert_eq!(session.statement_prepares(), 1);
    assert_eq!(session.cached_statements().await, 1);

    session.reset().await;
    assert_eq!(session.cached_statements().await, 0);
    session
        .exec(
            &ctx,
            "INSERT INTO users (name, age) VALUES (?, ?)",
            vec!["y".into(), 30.into()],
        )
        .await
        .unwrap();
    assert_eq!(session.statement_prepares(), 2);

    session.set_prepared_statement_cache(false);
    session.exec(&ctx, "DELETE FROM users", vec![]).await.unwrap();
    assert_eq!(session.statement_prepares(), 2);
}

#[tokio::test]
async fn test_explicit_prepare() {
    let (db, _file) = setup_db("").await;
    let ctx = Context::background();
    let session = db.session();

    let insert = session
        .prepare(&ctx, "INSERT INTO users (name, age) VALUES (?, ?)")
        .await
        .unwrap();
    for (name, age) in [("Ana", 18), ("Bo", 25)] {
        insert.exec(&ctx, vec![name.into(), age.into()]).await.unwrap();
    }
    insert.close().await;

    let select = session
        .prepare(&ctx, "SELECT name FROM users WHERE age > ?")
        .await
        .unwrap();
    let rows = select.query(&ctx, vec![20.into()]).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["name"], "Bo");
    select.close().await;

    let tx = session.new_transaction(&ctx).await.unwrap();
    assert!(tx.prepare(&ctx, "SELECT 1").await.is_err());
    tx.rollback(&ctx).await.unwrap();
}

#[tokio::test]
async fn test_closed_session_rejects_calls() {
    let (db, _file) = setup_db("").await;
    let ctx = Context::background();
    let session = db.session();

    session.close().await.unwrap();
    assert_eq!(session.state(), SessionState::Closed);
    let err = session.exec(&ctx, "SELECT 1", vec![]).await.unwrap_err();
    assert!(matches!(err, DbError::SessionClosed));

    // Other sessions are unaffected
    let other = db.session();
    assert_ne!(other.id(), session.id());
    other.exec(&ctx, "SELECT 1", vec![]).await.unwrap();
}

#[tokio::test]
async fn test_cancelled_context() {
    let (db, _file) = setup_db("").await;
    let session = db.session();
    let ctx = Context::background();
    ctx.cancel();

    let err = session.exec(&ctx, "SELECT 1", vec![]).await.unwrap_err();
    assert!(err.is_cancellation());
}

/// Test that requires a running PostgreSQL database.
/// Set TEST_POSTGRES_URL environment variable to run this test.
#[tokio::test]
async fn test_postgres_insert_returning() {
    let url = match std::env::var("TEST_POSTGRES_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("Skipping test: TEST_POSTGRES_URL not set");
            return;
        }
    };
    let ctx = Context::background();
    let db = Database::connect(&ctx, &url).await.unwrap();
    let session = db.session();

    session
        .exec(&ctx, "DROP TABLE IF EXISTS db_session_users", vec![])
        .await
        .unwrap();
    session
        .exec(
            &ctx,
            "CREATE TABLE db_session_users (id SERIAL PRIMARY KEY, name TEXT NOT NULL, age INTEGER)",
            vec![],
        )
        .await
        .unwrap();

    let result = session
        .insert(&ctx, "db_session_users", &user("Ana", 18))
        .await
        .unwrap();
    assert_eq!(result.last_insert_id, Some(1));

    let rows = session
        .find(&ctx, "db_session_users", Cond::new().with("id", vec![1, 2]))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);

    session
        .exec(&ctx, "DROP TABLE db_session_users", vec![])
        .await
        .unwrap();
    db.close().await;
}
