//! Batched association loading against a scripted executor

mod common;

use common::{blog, comment, image, member, org, post, rating, user};
use elif_assoc::testing::MockExecutor;
use elif_assoc::{EagerLoader, LoadPlan, ModelError, Passthrough, QueryContext, Record, Transaction, WhereClause, WhereValue};
use serde_json::{json, Value};

fn ids(records: &[Record]) -> Vec<Value> {
    records.iter().map(Record::primary_key).collect()
}

fn values(records: &[Record], column: &str) -> Vec<Value> {
    records.iter().map(|record| record.value(column)).collect()
}

#[tokio::test]
async fn test_preload_issues_one_query_per_level() {
    let registry = blog();
    let mock = MockExecutor::new();
    mock.when("FROM \"users\"", vec![user(1), user(2), user(3)])
        .when("FROM \"posts\"", vec![post(10, 1), post(11, 1), post(12, 2)])
        .when("FROM \"comments\"", vec![comment(100, 10), comment(101, 12), comment(102, 12)]);
    let conn = mock.connection();

    let users = registry
        .query("User")
        .preload("posts.comments")
        .all(&conn)
        .await
        .unwrap();

    assert_eq!(mock.call_count(), 3);
    let sql = mock.sql();
    assert_eq!(sql[0], "SELECT \"users\".* FROM \"users\" WHERE \"users\".\"deleted_at\" IS NULL");
    assert_eq!(
        sql[1],
        "SELECT \"posts\".* FROM \"posts\" WHERE \"posts\".\"deleted_at\" IS NULL AND \"posts\".\"user_id\" IN ($1, $2, $3)"
    );
    assert_eq!(
        sql[2],
        "SELECT \"comments\".* FROM \"comments\" WHERE \"comments\".\"post_id\" IN ($1, $2, $3)"
    );

    assert_eq!(ids(users[0].many("posts").unwrap()), vec![json!(10), json!(11)]);
    assert_eq!(ids(users[1].many("posts").unwrap()), vec![json!(12)]);
    assert!(users[2].many("posts").unwrap().is_empty());

    let posts = users[1].many("posts").unwrap();
    assert_eq!(ids(posts[0].many("comments").unwrap()), vec![json!(101), json!(102)]);
    assert!(users[0].many("posts").unwrap()[1].many("comments").unwrap().is_empty());
}

#[tokio::test]
async fn test_no_roots_skips_association_queries() {
    let registry = blog();
    let mock = MockExecutor::new();
    let conn = mock.connection();

    let users = registry.query("User").preload("posts").all(&conn).await.unwrap();

    assert!(users.is_empty());
    assert_eq!(mock.call_count(), 1);
}

#[tokio::test]
async fn test_through_chains_agree_at_every_depth() {
    let registry = blog();
    let mock = MockExecutor::new();
    mock.when("FROM \"users\"", vec![user(1)])
        .when("FROM \"posts\"", vec![post(10, 1)])
        .when("FROM \"comments\"", vec![comment(100, 10), comment(101, 10)])
        .when(
            "FROM \"ratings\"",
            vec![rating(1000, 100, 5), rating(1001, 101, 4)],
        );
    let conn = mock.connection();

    // one hop
    let comments = registry.query("Comment").preload("ratings").all(&conn).await.unwrap();
    let mut direct: Vec<Value> = comments
        .iter()
        .flat_map(|comment| values(comment.many("ratings").unwrap(), "value"))
        .collect();
    direct.sort_by_key(|value| value.as_i64());
    assert_eq!(direct, vec![json!(4), json!(5)]);

    // two hops
    let posts = registry.query("Post").preload("ratings").all(&conn).await.unwrap();
    assert_eq!(values(posts[0].many("ratings").unwrap(), "value"), vec![json!(4), json!(5)]);

    // three hops, through a through association
    mock.clear_statements();
    let users = registry.query("User").preload("ratings").all(&conn).await.unwrap();
    assert_eq!(values(users[0].many("ratings").unwrap(), "value"), vec![json!(4), json!(5)]);
    assert_eq!(mock.call_count(), 4);
    assert!(mock.sql()[3].ends_with("ORDER BY \"ratings\".\"value\" ASC, \"ratings\".\"value\" ASC"));
}

#[tokio::test]
async fn test_through_bridge_slots_stay_hidden() {
    let registry = blog();
    let mock = MockExecutor::new();
    mock.when("FROM \"users\"", vec![user(1)])
        .when("FROM \"posts\"", vec![post(10, 1)])
        .when("FROM \"comments\"", vec![comment(100, 10)]);
    let conn = mock.connection();

    let users = registry.query("User").preload("comments").all(&conn).await.unwrap();

    let json = users[0].to_json();
    let keys: Vec<&String> = json.as_object().unwrap().keys().collect();
    assert!(keys.iter().all(|key| !key.starts_with("__")));
    assert_eq!(json["comments"][0]["id"], json!(100));
    assert!(!users[0].is_loaded("posts"));
}

#[tokio::test]
async fn test_polymorphic_belongs_to_groups_by_type() {
    let registry = blog();
    let mock = MockExecutor::new();
    mock.when(
        "FROM \"images\"",
        vec![image(1, "User", 1), image(2, "Post", 1), image(3, "Post", 1)],
    )
    .when("FROM \"users\"", vec![user(1)])
    .when("FROM \"posts\"", vec![post(1, 7)]);
    let conn = mock.connection();

    let images = registry.query("Image").preload("imageable").all(&conn).await.unwrap();

    // one query for images, one per candidate type
    assert_eq!(mock.call_count(), 3);
    assert!(mock.sql()[1].contains("\"users\".\"id\" IN ($1)"));
    assert!(mock.sql()[2].contains("\"posts\".\"id\" IN ($1)"));

    let owner = images[0].one("imageable").unwrap().unwrap();
    assert_eq!(owner.entity(), "User");
    for image in &images[1..] {
        let owner = image.one("imageable").unwrap().unwrap();
        assert_eq!(owner.entity(), "Post");
        assert_eq!(owner.value("user_id"), json!(7));
    }
}

#[tokio::test]
async fn test_polymorphic_has_many_filters_on_owner_type() {
    let registry = blog();
    let mock = MockExecutor::new();
    mock.when("FROM \"posts\"", vec![post(10, 1)])
        .when("FROM \"images\"", vec![image(1, "Post", 10)]);
    let conn = mock.connection();

    let posts = registry.query("Post").preload("images").all(&conn).await.unwrap();

    let statement = &mock.statements()[1];
    assert_eq!(
        statement.sql,
        "SELECT \"images\".* FROM \"images\" WHERE \"images\".\"imageable_type\" = $1 AND \"images\".\"imageable_id\" IN ($2)"
    );
    assert_eq!(statement.params, vec![json!("Post"), json!(10)]);
    assert_eq!(ids(posts[0].many("images").unwrap()), vec![json!(1)]);
}

#[tokio::test]
async fn test_null_foreign_key_loads_as_absent() {
    let registry = blog();
    let mock = MockExecutor::new();
    mock.when(
        "FROM \"comments\"",
        vec![json!({"id": 1, "post_id": null, "user_id": 1, "body": "orphan"})],
    );
    let conn = mock.connection();

    let comments = registry.query("Comment").preload("post").all(&conn).await.unwrap();

    assert_eq!(mock.call_count(), 1);
    assert!(comments[0].is_loaded("post"));
    assert!(comments[0].one("post").unwrap().is_none());
}

#[tokio::test]
async fn test_loading_twice_is_a_no_op() {
    let registry = blog();
    let mock = MockExecutor::new();
    mock.when("FROM \"users\"", vec![user(1)])
        .when("FROM \"posts\"", vec![post(10, 1)])
        .when("FROM \"comments\"", vec![comment(100, 10)]);
    let conn = mock.connection();

    let mut users = registry.query("User").preload("posts").all(&conn).await.unwrap();
    assert_eq!(mock.call_count(), 2);

    let loader = EagerLoader::new(registry.clone(), &conn, QueryContext::new());
    loader.load(&mut users, &LoadPlan::new().load("posts")).await.unwrap();
    assert_eq!(mock.call_count(), 2);

    // only the new level is queried
    loader
        .load(&mut users, &LoadPlan::new().load("posts.comments"))
        .await
        .unwrap();
    assert_eq!(mock.call_count(), 3);
    assert!(mock.sql()[2].contains("FROM \"comments\""));
    assert_eq!(users[0].many("posts").unwrap().len(), 1);
}

#[tokio::test]
async fn test_unloaded_association_access_fails() {
    let registry = blog();
    let mock = MockExecutor::new();
    mock.when("FROM \"users\"", vec![user(1)]);
    let conn = mock.connection();

    let users = registry.query("User").all(&conn).await.unwrap();

    let err = users[0].many("posts").unwrap_err();
    assert!(matches!(err, ModelError::NonLoadedAssociation { ref association, .. } if association == "posts"));
}

#[tokio::test]
async fn test_unknown_association_fails() {
    let registry = blog();
    let mock = MockExecutor::new();
    mock.when("FROM \"users\"", vec![user(1)]);
    let conn = mock.connection();

    let err = registry.query("User").preload("followers").all(&conn).await.unwrap_err();

    assert!(matches!(err, ModelError::UnknownAssociation { ref association, .. } if association == "followers"));
}

#[tokio::test]
async fn test_relationship_conditions_apply_to_loads() {
    let registry = blog();
    let mock = MockExecutor::new();
    mock.when("FROM \"users\"", vec![user(1)]);
    let conn = mock.connection();

    registry.query("User").preload("published_posts").all(&conn).await.unwrap();

    let statement = &mock.statements()[1];
    assert!(statement.sql.contains("\"posts\".\"published\" = $1"));
    assert_eq!(statement.params[0], json!(true));
}

#[tokio::test]
async fn test_call_site_conditions_use_passthrough() {
    let registry = blog();
    let mock = MockExecutor::new();
    mock.when("FROM \"users\"", vec![user(1)]);
    let conn = mock.connection();

    registry
        .query("User")
        .passthrough(&Passthrough::new().with("title", "hello"))
        .preload_where("posts", WhereClause::new().with("title", WhereValue::passthrough("title")))
        .all(&conn)
        .await
        .unwrap();

    let statement = &mock.statements()[1];
    assert!(statement.sql.contains("\"posts\".\"title\" = $1"));
    assert_eq!(statement.params[0], json!("hello"));
}

#[tokio::test]
async fn test_root_scope_bypass_does_not_reach_associations() {
    let registry = blog();
    let mock = MockExecutor::new();
    mock.when("FROM \"users\"", vec![user(1)]);
    let conn = mock.connection();

    registry
        .query("User")
        .remove_default_scope("soft_delete")
        .preload("posts")
        .all(&conn)
        .await
        .unwrap();
    assert!(!mock.sql()[0].contains("deleted_at"));
    assert!(mock.sql()[1].contains("\"posts\".\"deleted_at\" IS NULL"));

    mock.clear_statements();
    registry
        .query("User")
        .remove_default_scope_including_associations("soft_delete")
        .preload("posts")
        .all(&conn)
        .await
        .unwrap();
    assert!(!mock.sql()[0].contains("deleted_at"));
    assert!(!mock.sql()[1].contains("deleted_at"));
}

#[tokio::test]
async fn test_loads_run_in_the_bound_transaction() {
    let registry = blog();
    let mock = MockExecutor::new();
    mock.when("FROM \"users\"", vec![user(1)])
        .when("FROM \"posts\"", vec![post(10, 1)]);
    let conn = mock.connection();

    let transaction = Transaction::begin(&conn).await.unwrap();
    registry
        .query("User")
        .with_transaction(transaction.handle())
        .preload("posts.comments")
        .all(&conn)
        .await
        .unwrap();

    let used = mock.transactions_used();
    assert_eq!(used.len(), 3);
    assert!(used.iter().all(|handle| handle.as_ref() == Some(transaction.handle())));
    transaction.commit().await.unwrap();
    assert_eq!(mock.committed().len(), 1);
}

#[tokio::test]
async fn test_failed_level_leaves_records_untouched() {
    let registry = blog();
    let mock = MockExecutor::new();
    mock.when("FROM \"users\"", vec![user(1)]);
    let conn = mock.connection();
    let mut users = registry.query("User").all(&conn).await.unwrap();

    mock.push_rows(vec![post(10, 1)]).push_error("connection reset");
    let loader = EagerLoader::new(registry.clone(), &conn, QueryContext::new());
    let err = loader
        .load(&mut users, &LoadPlan::new().load("posts.comments"))
        .await
        .unwrap_err();

    assert!(matches!(err, ModelError::StatementExecution { ref cause, .. } if cause.contains("connection reset")));
    assert!(!users[0].is_loaded("posts"));

    // nothing was sealed, so a retry queries again
    mock.clear_statements();
    mock.when("FROM \"posts\"", vec![post(10, 1)]);
    loader.load(&mut users, &LoadPlan::new().load("posts")).await.unwrap();
    assert_eq!(mock.call_count(), 1);
    assert_eq!(ids(users[0].many("posts").unwrap()), vec![json!(10)]);
}

#[tokio::test]
async fn test_failed_preload_returns_only_the_error() {
    let registry = blog();
    let mock = MockExecutor::new();
    mock.push_rows(vec![user(1)])
        .push_rows(vec![post(10, 1)])
        .push_error("timeout");
    let conn = mock.connection();

    let result = registry.query("User").preload("posts.comments").all(&conn).await;

    assert!(matches!(result, Err(ModelError::StatementExecution { .. })));
    assert_eq!(mock.call_count(), 3);
}

#[tokio::test]
async fn test_sti_roots_load_only_where_declared() {
    let registry = org();
    let mock = MockExecutor::new();
    mock.when("FROM \"members\"", vec![member(1, 7, "Member"), member(2, 7, "Admin")])
        .when("FROM \"audits\"", vec![json!({"id": 500, "member_id": 2, "action": "login"})]);
    let conn = mock.connection();

    let members = registry.query("Member").preload("audits").all(&conn).await.unwrap();

    assert_eq!(members[0].entity(), "Member");
    assert_eq!(members[1].entity(), "Admin");
    let statement = &mock.statements()[1];
    assert_eq!(
        statement.sql,
        "SELECT \"audits\".* FROM \"audits\" WHERE \"audits\".\"member_id\" IN ($1)"
    );
    assert_eq!(statement.params, vec![json!(2)]);
    assert_eq!(ids(members[1].many("audits").unwrap()), vec![json!(500)]);
    assert!(!members[0].is_loaded("audits"));

    // no root declares it at all
    let plain = MockExecutor::new();
    plain.when("FROM \"members\"", vec![member(1, 7, "Member")]);
    let err = registry
        .query("Member")
        .preload("audits")
        .all(&plain.connection())
        .await
        .unwrap_err();
    assert!(matches!(err, ModelError::UnknownAssociation { ref association, .. } if association == "audits"));
}

#[tokio::test]
async fn test_inherited_association_is_one_query_for_mixed_roots() {
    let registry = org();
    let mock = MockExecutor::new();
    mock.when("FROM \"members\"", vec![member(1, 7, "Member"), member(2, 7, "Admin")])
        .when("FROM \"profiles\"", vec![json!({"id": 10, "member_id": 2, "bio": "ops"})]);
    let conn = mock.connection();

    let members = registry.query("Member").preload("profile").all(&conn).await.unwrap();

    assert_eq!(mock.call_count(), 2);
    assert_eq!(mock.statements()[1].params, vec![json!(1), json!(2)]);

    // has_one: a single record or a loaded absence
    assert!(members[0].one("profile").unwrap().is_none());
    let profile = members[1].one("profile").unwrap().unwrap();
    assert_eq!(profile.value("bio"), json!("ops"));
    assert_eq!(members[0].to_json()["profile"], Value::Null);
    assert_eq!(members[1].to_json()["profile"]["id"], json!(10));
}

#[tokio::test]
async fn test_distinct_through_association_drops_repeats() {
    let registry = org();
    let mock = MockExecutor::new();
    mock.when("FROM \"members\"", vec![member(1, 7, "Member")])
        .when(
            "FROM \"notes\"",
            vec![
                json!({"id": 1, "article_id": 50, "member_id": 1}),
                json!({"id": 2, "article_id": 51, "member_id": 1}),
                json!({"id": 3, "article_id": 50, "member_id": 1}),
            ],
        )
        .when(
            "FROM \"articles\"",
            vec![json!({"id": 50, "member_id": 9}), json!({"id": 51, "member_id": 9})],
        );
    let conn = mock.connection();

    let members = registry
        .query("Member")
        .preload("noted_articles")
        .all(&conn)
        .await
        .unwrap();

    assert_eq!(ids(members[0].many("noted_articles").unwrap()), vec![json!(50), json!(51)]);
    assert_eq!(mock.statements()[2].params, vec![json!(50), json!(51)]);
}

#[tokio::test]
async fn test_self_conditions_compare_against_the_owner() {
    let registry = org();
    let mock = MockExecutor::new();
    mock.when(
        "FROM \"members\"",
        vec![
            member(1, 7, "Member"),
            member(2, 7, "Admin"),
            member(3, 7, "Member"),
            member(4, 8, "Member"),
        ],
    )
    .when("FROM \"teams\"", vec![json!({"id": 7, "name": "core"}), json!({"id": 8, "name": "web"})])
    .when("FROM \"articles\"", vec![json!({"id": 50, "member_id": 1})])
    .when(
        "FROM \"notes\"",
        vec![
            json!({"id": 1, "article_id": 50, "member_id": 1}),
            json!({"id": 2, "article_id": 50, "member_id": 2}),
            json!({"id": 3, "article_id": 50, "member_id": 1}),
        ],
    );
    let conn = mock.connection();

    // through: everyone on the owner's team except the owner
    let members = registry.query("Member").preload("teammates").all(&conn).await.unwrap();
    assert_eq!(ids(members[0].many("teammates").unwrap()), vec![json!(2), json!(3)]);
    assert_eq!(ids(members[1].many("teammates").unwrap()), vec![json!(1), json!(3)]);
    assert!(members[3].many("teammates").unwrap().is_empty());

    // direct: only notes written by the article's author
    let articles = registry.query("Article").preload("author_notes").all(&conn).await.unwrap();
    assert_eq!(ids(articles[0].many("author_notes").unwrap()), vec![json!(1), json!(3)]);
}
