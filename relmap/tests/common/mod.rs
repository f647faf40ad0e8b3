#![allow(dead_code)]

use chrono::{DateTime, Utc};
use relmap::db::{Entity, Row, Value};
use relmap::testing::MemoryDriver;

#[derive(Debug, Default, Clone, PartialEq, Entity)]
#[entity(table = "media")]
pub struct Media {
    #[column(primary_key, ignored)]
    pub id: i64,
    #[column(name = "file_path")]
    pub path: String,
}

#[derive(Debug, Default, Clone, PartialEq, Entity)]
#[entity(table = "users")]
pub struct User {
    #[column(primary_key, ignored)]
    pub id: i64,
    pub username: String,
    pub is_active: bool,
    #[column(default = "now()")]
    pub created_at: DateTime<Utc>,
    pub avatar_id: Option<i64>,
    #[column(reference)]
    pub avatar: Option<Media>,
    #[column(reference, foreign_key = "author_id")]
    pub articles: Vec<Article>,
}

#[derive(Debug, Default, Clone, PartialEq, Entity)]
#[entity(table = "articles")]
pub struct Article {
    #[column(primary_key, ignored)]
    pub id: i64,
    pub title: String,
    pub author_id: i64,
    pub deleted_at: Option<DateTime<Utc>>,
    #[column(reference)]
    pub author: Option<Box<User>>,
    #[column(reference)]
    pub comments: Vec<Comment>,
}

#[derive(Debug, Default, Clone, PartialEq, Entity)]
#[entity(table = "comments")]
pub struct Comment {
    #[column(primary_key, ignored)]
    pub id: i64,
    pub article_id: i64,
    pub body: String,
}

pub fn driver() -> MemoryDriver {
    MemoryDriver::new()
        .with_table("media", "id")
        .with_table("users", "id")
        .with_table("articles", "id")
        .with_table("comments", "id")
}

fn row(pairs: &[(&str, Value)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

pub fn seed_media(db: &MemoryDriver, id: i64, path: &str) {
    db.seed(
        "media",
        row(&[("id", Value::Int(id)), ("file_path", Value::from(path))]),
    )
    .unwrap();
}

pub fn seed_user(db: &MemoryDriver, id: i64, username: &str, avatar_id: Option<i64>) {
    db.seed(
        "users",
        row(&[
            ("id", Value::Int(id)),
            ("username", Value::from(username)),
            ("is_active", Value::Bool(true)),
            ("created_at", Value::Timestamp(Utc::now())),
            ("avatar_id", avatar_id.map(Value::Int).unwrap_or(Value::Null)),
        ]),
    )
    .unwrap();
}

pub fn seed_article(db: &MemoryDriver, id: i64, author_id: i64, title: &str) {
    db.seed(
        "articles",
        row(&[
            ("id", Value::Int(id)),
            ("title", Value::from(title)),
            ("author_id", Value::Int(author_id)),
            ("deleted_at", Value::Null),
        ]),
    )
    .unwrap();
}

pub fn seed_comment(db: &MemoryDriver, id: i64, article_id: i64, body: &str) {
    db.seed(
        "comments",
        row(&[
            ("id", Value::Int(id)),
            ("article_id", Value::Int(article_id)),
            ("body", Value::from(body)),
        ]),
    )
    .unwrap();
}

/// Three users with avatars 1..=3 and ten articles written round-robin.
pub fn blog() -> MemoryDriver {
    let db = driver();
    for id in 1..=3 {
        seed_media(&db, id, &format!("avatars/{}.png", id));
        seed_user(&db, id, &format!("user{}", id), Some(id));
    }
    for id in 1..=10 {
        seed_article(&db, id, (id - 1) % 3 + 1, &format!("article {}", id));
    }
    db
}

pub fn articles(db: &MemoryDriver) -> Vec<Article> {
    db.rows("articles")
        .iter()
        .map(|r| Article::from_row(r).unwrap())
        .collect()
}
