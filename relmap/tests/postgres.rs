//! Runs against a live PostgreSQL server:
//! `DATABASE_URL=postgres:///relmap_test cargo test -- --ignored`

mod common;

use common::{Article, User};
use relmap::ClientOptions;
use relmap::db::{Driver, PgDriver, Value, find_by_params, get_by_params, preload, save};
use relmap::params;

const SCHEMA: &[&str] = &[
    "CREATE TEMP TABLE media (id BIGSERIAL PRIMARY KEY, file_path TEXT NOT NULL)",
    "CREATE TEMP TABLE users (
        id BIGSERIAL PRIMARY KEY,
        username TEXT NOT NULL UNIQUE,
        is_active BOOLEAN NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        avatar_id BIGINT
    )",
    "CREATE TEMP TABLE articles (
        id BIGSERIAL PRIMARY KEY,
        title TEXT NOT NULL,
        author_id BIGINT NOT NULL,
        deleted_at TIMESTAMPTZ
    )",
    "CREATE TEMP TABLE comments (id BIGSERIAL PRIMARY KEY, article_id BIGINT NOT NULL, body TEXT NOT NULL)",
    "CREATE TEMP TABLE prices (id BIGSERIAL PRIMARY KEY, amount NUMERIC(10, 2))",
];

/// A single pooled connection so the temporary tables stay visible.
async fn connect() -> Option<PgDriver> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let options = ClientOptions {
        max_connections: 1,
        ..ClientOptions::new(url)
    };
    let db = PgDriver::connect_lazy(&options).unwrap();
    for ddl in SCHEMA {
        db.execute(ddl, &[]).await.unwrap();
    }
    Some(db)
}

fn new_user(username: &str, avatar_id: Option<i64>) -> User {
    User {
        username: username.to_string(),
        is_active: true,
        avatar_id,
        ..Default::default()
    }
}

#[tokio::test]
#[ignore]
async fn test_save_and_read_back_nullable_columns() {
    let Some(db) = connect().await else {
        return;
    };

    let mut ann = new_user("ann", None);
    save(&db, &mut ann).await.unwrap();
    assert!(ann.id > 0);

    let fetched: User = get_by_params(&db, params! { "id" => ann.id }).await.unwrap();
    assert_eq!(fetched, ann);

    let fetched: User = get_by_params(&db, params! { "avatar_id" => Value::Null })
        .await
        .unwrap();
    assert_eq!(fetched.username, "ann");

    ann.avatar_id = Some(3);
    save(&db, &mut ann).await.unwrap();
    ann.avatar_id = None;
    save(&db, &mut ann).await.unwrap();
    let fetched: User = get_by_params(&db, params! { "id" => ann.id }).await.unwrap();
    assert_eq!(fetched.avatar_id, None);
}

#[tokio::test]
#[ignore]
async fn test_preload_through_postgres() {
    let Some(db) = connect().await else {
        return;
    };

    let mut authors = Vec::new();
    for name in ["ann", "bob"] {
        let mut user = new_user(name, None);
        save(&db, &mut user).await.unwrap();
        authors.push(user);
    }
    for n in 0..6 {
        let mut article = Article {
            title: format!("article {}", n),
            author_id: authors[n % 2].id,
            ..Default::default()
        };
        save(&db, &mut article).await.unwrap();
    }

    let mut articles: Vec<Article> = find_by_params(&db, params! {}).await.unwrap();
    let queries = preload(&db, &mut articles, &["author.avatar", "comments"])
        .await
        .unwrap();

    assert_eq!(queries.len(), 2);
    for article in &articles {
        assert_eq!(article.author.as_ref().unwrap().id, article.author_id);
        assert!(article.comments.is_empty());
    }
}

#[tokio::test]
#[ignore]
async fn test_errors_keep_their_class() {
    let Some(db) = connect().await else {
        return;
    };

    let mut ann = new_user("ann", None);
    save(&db, &mut ann).await.unwrap();
    let err = save(&db, &mut new_user("ann", None)).await.unwrap_err();
    assert_eq!(err.code(), "integrity_violation");

    let err = db
        .execute("UPDATE users SET avatar_id = 'x'::text", &[])
        .await
        .unwrap_err();
    assert_eq!(err.code(), "driver_error");
    assert!(err.to_string().contains("42804"));
}

#[tokio::test]
#[ignore]
async fn test_numeric_decodes_as_float() {
    let Some(db) = connect().await else {
        return;
    };

    let row = db
        .fetch_one(
            "INSERT INTO prices (amount) VALUES (12.50) RETURNING id, amount",
            &[],
        )
        .await
        .unwrap();
    assert_eq!(row["amount"], Value::Float(12.5));
}
