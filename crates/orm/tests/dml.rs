//! Two-phase update and destroy

mod common;

use std::sync::Arc;

use common::blog;
use elif_assoc::testing::{MockExecutor, RecordingHooks};
use elif_assoc::{ModelError, MutationKind, Transaction};
use serde_json::json;

#[tokio::test]
async fn test_update_targets_matched_keys() {
    let registry = blog();
    let mock = MockExecutor::new();
    mock.when("SELECT \"posts\".\"id\" FROM", vec![json!({"id": 1}), json!({"id": 2}), json!({"id": 1})])
        .push_affected(2);
    let conn = mock.connection();

    let updated = registry
        .query("Post")
        .where_eq("user_id", 4)
        .update(&conn, json!({"title": "renamed"}))
        .await
        .unwrap();

    assert_eq!(updated, 2);
    let statements = mock.statements();
    assert_eq!(
        statements[0].sql,
        "SELECT \"posts\".\"id\" FROM \"posts\" WHERE \"posts\".\"deleted_at\" IS NULL AND \"posts\".\"user_id\" = $1"
    );
    assert_eq!(statements[1].sql, "UPDATE \"posts\" SET \"title\" = $1 WHERE \"id\" IN ($2, $3)");
    assert_eq!(statements[1].params, vec![json!("renamed"), json!(1), json!(2)]);
}

#[tokio::test]
async fn test_empty_match_issues_no_mutation() {
    let registry = blog();
    let mock = MockExecutor::new();
    let conn = mock.connection();

    let updated = registry
        .query("Post")
        .update(&conn, json!({"published": false}))
        .await
        .unwrap();
    let destroyed = registry.query("Comment").destroy(&conn).await.unwrap();

    assert_eq!((updated, destroyed), (0, 0));
    assert!(mock.sql().iter().all(|sql| sql.starts_with("SELECT")));
}

#[tokio::test]
async fn test_update_rejects_unknown_columns() {
    let registry = blog();
    let mock = MockExecutor::new();
    let conn = mock.connection();

    let err = registry
        .query("Post")
        .update(&conn, json!({"colour": "red"}))
        .await
        .unwrap_err();

    assert!(matches!(err, ModelError::UnknownColumn { ref column, .. } if column == "colour"));
    assert_eq!(mock.call_count(), 0);
}

#[tokio::test]
async fn test_destroy_cascades_inside_one_transaction() {
    let registry = blog();
    let mock = MockExecutor::new();
    mock.when("FROM \"users\"", vec![json!({"id": 1})])
        .when("FROM \"posts\"", vec![json!({"id": 10}), json!({"id": 11})])
        .when("FROM \"comments\"", vec![json!({"id": 100})]);
    let hooks = RecordingHooks::new();
    let conn = mock.connection().with_hooks(Arc::new(hooks.clone()));

    registry.query("User").where_eq("id", 1).destroy(&conn).await.unwrap();

    let sql = mock.sql();
    assert_eq!(sql.len(), 6);
    assert!(sql[0].starts_with("SELECT \"users\".\"id\" FROM \"users\""));
    assert!(sql[1].ends_with("\"posts\".\"user_id\" IN ($1)"));
    assert!(sql[2].ends_with("\"comments\".\"post_id\" IN ($1, $2)"));
    assert_eq!(sql[3], "DELETE FROM \"comments\" WHERE \"id\" IN ($1)");
    assert_eq!(sql[4], "UPDATE \"posts\" SET \"deleted_at\" = $1 WHERE \"id\" IN ($2, $3)");
    assert_eq!(sql[5], "UPDATE \"users\" SET \"deleted_at\" = $1 WHERE \"id\" IN ($2)");

    let began = mock.began();
    assert_eq!(began.len(), 1);
    assert_eq!(mock.committed(), began);
    assert!(mock
        .transactions_used()
        .iter()
        .all(|used| used.as_ref() == Some(&began[0])));
    assert_eq!(hooks.commits(), began);

    let kinds: Vec<(String, MutationKind)> = hooks
        .mutations()
        .into_iter()
        .map(|mutation| (mutation.entity, mutation.kind))
        .collect();
    assert_eq!(
        kinds,
        vec![
            ("Comment".to_string(), MutationKind::Destroy),
            ("Post".to_string(), MutationKind::SoftDestroy),
            ("Post".to_string(), MutationKind::SoftDestroy),
            ("User".to_string(), MutationKind::SoftDestroy),
        ]
    );
}

#[tokio::test]
async fn test_failed_destroy_rolls_back() {
    let registry = blog();
    let mock = MockExecutor::new();
    mock.push_rows(vec![json!({"id": 1})])
        .push_rows(vec![])
        .push_error("disk full");
    let hooks = RecordingHooks::new();
    let conn = mock.connection().with_hooks(Arc::new(hooks.clone()));

    let err = registry.query("User").destroy(&conn).await.unwrap_err();

    assert!(matches!(err, ModelError::StatementExecution { .. }));
    assert_eq!(mock.rolled_back().len(), 1);
    assert!(mock.committed().is_empty());
    assert!(hooks.commits().is_empty());
    assert!(hooks.mutations().is_empty());
}

#[tokio::test]
async fn test_bound_transaction_is_reused() {
    let registry = blog();
    let mock = MockExecutor::new();
    mock.when("FROM \"users\"", vec![json!({"id": 1})]);
    let conn = mock.connection();

    let transaction = Transaction::begin(&conn).await.unwrap();
    registry
        .query("User")
        .with_transaction(transaction.handle())
        .destroy(&conn)
        .await
        .unwrap();

    assert_eq!(mock.began().len(), 1);
    assert!(mock.committed().is_empty());
    transaction.rollback().await.unwrap();
    assert_eq!(mock.rolled_back().len(), 1);
}

#[tokio::test]
async fn test_really_destroy_deletes_soft_deleting_rows() {
    let registry = blog();
    let mock = MockExecutor::new();
    mock.when("SELECT \"posts\".\"id\"", vec![json!({"id": 10})]);
    let conn = mock.connection();

    registry.query("Post").where_eq("id", 10).really_destroy(&conn).await.unwrap();

    assert!(mock.sql().contains(&"DELETE FROM \"posts\" WHERE \"id\" IN ($1)".to_string()));
}

#[tokio::test]
async fn test_undestroy_restores_deleted_rows() {
    let registry = blog();
    let mock = MockExecutor::new();
    mock.when("SELECT \"posts\".\"id\"", vec![json!({"id": 10})]);
    let hooks = RecordingHooks::new();
    let conn = mock.connection().with_hooks(Arc::new(hooks.clone()));

    registry.query("Post").where_eq("id", 10).undestroy(&conn).await.unwrap();

    let sql = mock.sql();
    assert_eq!(
        sql[0],
        "SELECT \"posts\".\"id\" FROM \"posts\" WHERE \"posts\".\"id\" = $1 AND \"posts\".\"deleted_at\" IS NOT NULL"
    );
    // comments do not soft delete, so the cascade skips them
    assert_eq!(sql.last().unwrap(), "UPDATE \"posts\" SET \"deleted_at\" = NULL WHERE \"id\" IN ($1)");
    assert_eq!(hooks.mutations()[0].kind, MutationKind::Undestroy);

    let err = registry.query("Comment").undestroy(&conn).await.unwrap_err();
    assert!(matches!(err, ModelError::Configuration(_)));
}
