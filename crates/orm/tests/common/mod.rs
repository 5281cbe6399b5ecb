//! Shared fixtures: a small blog schema

#![allow(dead_code)]

use std::sync::Arc;

use elif_assoc::model::ColumnType::{BigInt, Boolean, Integer, Text};
use elif_assoc::{ops, Entity, Registry, Relationship, WhereClause};
use serde_json::Value;

pub fn blog() -> Arc<Registry> {
    Registry::builder()
        .entity(
            Entity::new("User", "users")
                .column("id", BigInt)
                .column("email", Text)
                .column("team_id", BigInt)
                .soft_delete(),
        )
        .entity(
            Entity::new("Post", "posts")
                .column("id", BigInt)
                .column("user_id", BigInt)
                .column("title", Text)
                .column("published", Boolean)
                .column("views", Integer)
                .soft_delete()
                .scope("popular", |query| {
                    query.where_clause(WhereClause::new().with("views", ops::greater_than(100)))
                }),
        )
        .entity(
            Entity::new("Comment", "comments")
                .column("id", BigInt)
                .column("post_id", BigInt)
                .column("user_id", BigInt)
                .column("body", Text),
        )
        .entity(
            Entity::new("Rating", "ratings")
                .column("id", BigInt)
                .column("comment_id", BigInt)
                .column("value", Integer),
        )
        .entity(
            Entity::new("Image", "images")
                .column("id", BigInt)
                .column("imageable_id", BigInt)
                .column("imageable_type", Text)
                .column("url", Text),
        )
        .register_relationship("User", "posts", Relationship::has_many("Post").dependent_destroy())
        .register_relationship(
            "User",
            "published_posts",
            Relationship::has_many("Post").on(WhereClause::new().with("published", true)),
        )
        .register_relationship(
            "User",
            "comments",
            Relationship::has_many_through("posts").order_by("id"),
        )
        .register_relationship(
            "User",
            "ratings",
            Relationship::has_many_through("comments").order_by("value"),
        )
        .register_relationship(
            "User",
            "images",
            Relationship::has_many("Image").polymorphic_as("imageable"),
        )
        .register_relationship("Post", "author", Relationship::belongs_to("User"))
        .register_relationship("Post", "comments", Relationship::has_many("Comment").dependent_destroy())
        .register_relationship(
            "Post",
            "ratings",
            Relationship::has_many_through("comments").order_by("value"),
        )
        .register_relationship(
            "Post",
            "images",
            Relationship::has_many("Image").polymorphic_as("imageable"),
        )
        .register_relationship("Comment", "post", Relationship::belongs_to("Post"))
        .register_relationship("Comment", "ratings", Relationship::has_many("Rating").order_by("value"))
        .register_relationship(
            "Image",
            "imageable",
            Relationship::belongs_to_any(["User", "Post"]),
        )
        .build()
        .expect("blog registry")
}

pub fn user(id: i64) -> Value {
    serde_json::json!({"id": id, "email": format!("user{}@example.com", id), "team_id": 1, "deleted_at": null})
}

pub fn post(id: i64, user_id: i64) -> Value {
    serde_json::json!({"id": id, "user_id": user_id, "title": format!("post {}", id), "published": true, "views": 10, "deleted_at": null})
}

pub fn comment(id: i64, post_id: i64) -> Value {
    serde_json::json!({"id": id, "post_id": post_id, "user_id": 1, "body": "nice"})
}

pub fn rating(id: i64, comment_id: i64, value: i64) -> Value {
    serde_json::json!({"id": id, "comment_id": comment_id, "value": value})
}

pub fn image(id: i64, owner_type: &str, owner_id: i64) -> Value {
    serde_json::json!({"id": id, "imageable_id": owner_id, "imageable_type": owner_type, "url": format!("/img/{}.png", id)})
}

/// Teams of members, one of them an admin (single table inheritance)
pub fn org() -> Arc<Registry> {
    Registry::builder()
        .entity(Entity::new("Team", "teams").column("id", BigInt).column("name", Text))
        .entity(
            Entity::new("Member", "members")
                .column("id", BigInt)
                .column("team_id", BigInt)
                .column("type", Text),
        )
        .entity(Entity::sti_child("Admin", "Member"))
        .entity(
            Entity::new("Profile", "profiles")
                .column("id", BigInt)
                .column("member_id", BigInt)
                .column("bio", Text),
        )
        .entity(
            Entity::new("Audit", "audits")
                .column("id", BigInt)
                .column("member_id", BigInt)
                .column("action", Text),
        )
        .entity(
            Entity::new("Article", "articles")
                .column("id", BigInt)
                .column("member_id", BigInt),
        )
        .entity(
            Entity::new("Note", "notes")
                .column("id", BigInt)
                .column("article_id", BigInt)
                .column("member_id", BigInt),
        )
        .register_relationship("Team", "members", Relationship::has_many("Member"))
        .register_relationship("Member", "team", Relationship::belongs_to("Team"))
        .register_relationship(
            "Member",
            "teammates",
            Relationship::has_many_through("team")
                .source("members")
                .self_not_on("id", "id"),
        )
        .register_relationship("Member", "profile", Relationship::has_one("Profile"))
        .register_relationship("Member", "notes", Relationship::has_many("Note"))
        .register_relationship(
            "Member",
            "noted_articles",
            Relationship::has_many_through("notes").source("article").distinct(),
        )
        .register_relationship("Admin", "audits", Relationship::has_many("Audit"))
        .register_relationship("Note", "article", Relationship::belongs_to("Article"))
        .register_relationship("Article", "notes", Relationship::has_many("Note"))
        .register_relationship(
            "Article",
            "author_notes",
            Relationship::has_many("Note").self_on("member_id", "member_id"),
        )
        .build()
        .expect("org registry")
}

pub fn member(id: i64, team_id: i64, kind: &str) -> Value {
    serde_json::json!({"id": id, "team_id": team_id, "type": kind})
}
