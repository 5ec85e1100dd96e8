//! Integration tests for the Database façade over embedded SQLite

#![cfg(feature = "sqlite")]

use tabula::connection::DatabaseConfig;
use tabula::database::{Database, Persisted};
use tabula::error::ErrorCategory;
use tabula::meta::{ColumnDescriptor, Entity, TableDescriptor};
use tabula::types::{FromValue, SqlType, Value};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Default, Clone)]
struct Article {
    id: i64,
    title: String,
    views: i64,
}

impl Entity for Article {
    fn descriptor() -> TableDescriptor<Self> {
        TableDescriptor::new("article", "id")
            .auto_increment()
            .column(ColumnDescriptor::new(
                "id",
                SqlType::BigInt,
                |a: &Article| a.id.into(),
                |a, v| {
                    a.id = FromValue::from_value(v)?;
                    Ok(())
                },
            ))
            .column(ColumnDescriptor::new(
                "title",
                SqlType::Text,
                |a: &Article| a.title.clone().into(),
                |a, v| {
                    a.title = FromValue::from_value(v)?;
                    Ok(())
                },
            ))
            .column(ColumnDescriptor::new(
                "views",
                SqlType::BigInt,
                |a: &Article| a.views.into(),
                |a, v| {
                    a.views = FromValue::from_value(v)?;
                    Ok(())
                },
            ))
    }
}

#[derive(Debug, Default)]
struct Voucher {
    code: String,
    label: String,
}

impl Entity for Voucher {
    fn descriptor() -> TableDescriptor<Self> {
        TableDescriptor::new("voucher", "code")
            .column(ColumnDescriptor::new(
                "code",
                SqlType::Text,
                |v: &Voucher| v.code.clone().into(),
                |v, x| {
                    v.code = FromValue::from_value(x)?;
                    Ok(())
                },
            ))
            .column(ColumnDescriptor::new(
                "label",
                SqlType::Text,
                |v: &Voucher| v.label.clone().into(),
                |v, x| {
                    v.label = FromValue::from_value(x)?;
                    Ok(())
                },
            ))
    }
}

// Secondary UNIQUE column lets an insert fail while a primary-key update
// matches nothing, which is the pathological insert-or-update case.
#[derive(Debug, Default)]
struct Registration {
    id: i64,
    code: String,
}

impl Entity for Registration {
    fn descriptor() -> TableDescriptor<Self> {
        TableDescriptor::new("registration", "id")
            .auto_increment()
            .column(ColumnDescriptor::new(
                "id",
                SqlType::BigInt,
                |r: &Registration| r.id.into(),
                |r, v| {
                    r.id = FromValue::from_value(v)?;
                    Ok(())
                },
            ))
            .column(
                ColumnDescriptor::new(
                    "code",
                    SqlType::Text,
                    |r: &Registration| r.code.clone().into(),
                    |r, v| {
                        r.code = FromValue::from_value(v)?;
                        Ok(())
                    },
                )
                .unique(),
            )
    }
}

fn memory_db() -> Database {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();
    Database::new(
        DatabaseConfig::new(":memory:", "sqlite").with_keep_connection_alive(true),
    )
    .unwrap()
}

fn article_schema(db: &Database) {
    db.execute(
        "CREATE TABLE article (id INTEGER PRIMARY KEY AUTOINCREMENT, \
         title TEXT NOT NULL, views INTEGER NOT NULL DEFAULT 0)",
        &[],
    )
    .unwrap();
}

fn seed_articles(db: &Database, count: i64) {
    for n in 0..count {
        let mut article = Article {
            title: format!("article {n}"),
            views: n,
            ..Article::default()
        };
        db.insert(&mut article).unwrap();
    }
}

#[test]
fn test_insert_assigns_generated_key() {
    let db = memory_db();
    article_schema(&db);

    let mut article = Article {
        title: "first".into(),
        views: 3,
        ..Article::default()
    };
    let key = db.insert(&mut article).unwrap();
    assert_eq!(key, Value::Int64(article.id));
    assert!(article.id > 0);

    let loaded: Article = db.find(article.id).unwrap().unwrap();
    assert_eq!(loaded.title, "first");
    assert_eq!(loaded.views, 3);
}

#[test]
fn test_execute_scalar_counts_rows() {
    let db = memory_db();
    article_schema(&db);
    seed_articles(&db, 4);

    let count: i64 = db
        .execute_scalar("SELECT COUNT(*) FROM article WHERE views >= @0", &[1i64.into()])
        .unwrap();
    assert_eq!(count, 3);

    let missing: Option<String> = db
        .execute_scalar("SELECT title FROM article WHERE id = @0", &[999i64.into()])
        .unwrap();
    assert!(missing.is_none());
}

#[test]
fn test_update_persists_changes() {
    let db = memory_db();
    article_schema(&db);

    let mut article = Article {
        title: "draft".into(),
        ..Article::default()
    };
    db.insert(&mut article).unwrap();

    article.title = "published".into();
    article.views = 10;
    assert_eq!(db.update(&article).unwrap(), 1);

    let loaded: Article = db.find(article.id).unwrap().unwrap();
    assert_eq!(loaded.title, "published");
    assert_eq!(loaded.views, 10);
}

#[test]
fn test_update_only_touches_named_columns() {
    let db = memory_db();
    article_schema(&db);

    let mut article = Article {
        title: "original".into(),
        views: 1,
        ..Article::default()
    };
    db.insert(&mut article).unwrap();

    article.title = "renamed".into();
    article.views = 99;
    db.update_only(&article, &["title"]).unwrap();

    let loaded: Article = db.find(article.id).unwrap().unwrap();
    assert_eq!(loaded.title, "renamed");
    // views was not in the column subset
    assert_eq!(loaded.views, 1);
}

#[test]
fn test_delete_and_exists() {
    let db = memory_db();
    article_schema(&db);
    seed_articles(&db, 2);

    assert!(db.exists::<Article>(1i64).unwrap());
    assert_eq!(db.delete_by_key::<Article>(1i64).unwrap(), 1);
    assert!(!db.exists::<Article>(1i64).unwrap());
    assert!(db.find::<Article>(1i64).unwrap().is_none());
}

#[test]
fn test_save_dispatches_between_insert_and_update() {
    let db = memory_db();
    article_schema(&db);

    let mut article = Article {
        title: "v1".into(),
        ..Article::default()
    };
    assert!(db.is_new(&article).unwrap());
    db.save(&mut article).unwrap();
    assert!(article.id > 0);
    assert!(!db.is_new(&article).unwrap());

    article.title = "v2".into();
    db.save(&mut article).unwrap();

    let count: i64 = db.execute_scalar("SELECT COUNT(*) FROM article", &[]).unwrap();
    assert_eq!(count, 1);
    let loaded: Article = db.find(article.id).unwrap().unwrap();
    assert_eq!(loaded.title, "v2");
}

#[test]
fn test_fetch_expands_where_fragment() {
    let db = memory_db();
    article_schema(&db);
    seed_articles(&db, 5);

    let hot: Vec<Article> = db
        .fetch("WHERE views >= @0 ORDER BY views DESC", &[3i64.into()])
        .unwrap();
    assert_eq!(hot.len(), 2);
    assert_eq!(hot[0].views, 4);
    assert_eq!(hot[1].views, 3);
}

#[test]
fn test_fetch_rows_without_destination_type() {
    let db = memory_db();
    article_schema(&db);
    seed_articles(&db, 2);

    let rows = db
        .fetch_rows("SELECT title, views FROM article ORDER BY id", &[])
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].columns(), ["title", "views"]);
    assert_eq!(rows[0].get_named("title"), Some(&Value::String("article 0".into())));
    assert_eq!(rows[1].get_named("VIEWS"), Some(&Value::Int64(1)));
}

#[test]
fn test_first_and_single_cardinality() {
    let db = memory_db();
    article_schema(&db);
    seed_articles(&db, 3);

    let first: Article = db.first("ORDER BY id", &[]).unwrap();
    assert_eq!(first.views, 0);

    let one: Article = db.single("WHERE views = @0", &[2i64.into()]).unwrap();
    assert_eq!(one.views, 2);

    let err = db.single::<Article>("WHERE views >= @0", &[0i64.into()]).unwrap_err();
    assert!(err.to_string().contains("more than one row"));

    assert!(db
        .first_or_none::<Article>("WHERE views = @0", &[77i64.into()])
        .unwrap()
        .is_none());
}

#[test]
fn test_page_splits_count_and_window_arguments() {
    let db = memory_db();
    article_schema(&db);
    seed_articles(&db, 25);

    let page = db
        .page::<Article>(2, 10, "WHERE views >= @0 ORDER BY id", &[0i64.into()])
        .unwrap();
    assert_eq!(page.current_page, 2);
    assert_eq!(page.total_items, 25);
    assert_eq!(page.total_pages, 3);
    assert_eq!(page.items.len(), 10);
    assert_eq!(page.items[0].views, 10);

    let last = db
        .page::<Article>(3, 10, "WHERE views >= @0 ORDER BY id", &[0i64.into()])
        .unwrap();
    assert_eq!(last.items.len(), 5);
}

#[test]
fn test_skip_take_window() {
    let db = memory_db();
    article_schema(&db);
    seed_articles(&db, 25);

    let window: Vec<Article> = db.skip_take(20, 10, "ORDER BY id", &[]).unwrap();
    assert_eq!(window.len(), 5);
    assert_eq!(window[0].views, 20);
}

#[test]
fn test_insert_or_update_inserts_then_updates() {
    let db = memory_db();
    db.execute(
        "CREATE TABLE voucher (code TEXT PRIMARY KEY, label TEXT NOT NULL)",
        &[],
    )
    .unwrap();

    let mut voucher = Voucher {
        code: "SPRING".into(),
        label: "spring sale".into(),
    };
    assert_eq!(db.insert_or_update(&mut voucher).unwrap(), Persisted::Inserted);

    voucher.label = "extended spring sale".into();
    assert_eq!(db.insert_or_update(&mut voucher).unwrap(), Persisted::Updated);

    let count: i64 = db.execute_scalar("SELECT COUNT(*) FROM voucher", &[]).unwrap();
    assert_eq!(count, 1);
    let loaded: Voucher = db.find("SPRING").unwrap().unwrap();
    assert_eq!(loaded.label, "extended spring sale");
}

#[test]
fn test_insert_or_update_with_custom_clause() {
    let db = memory_db();
    db.execute(
        "CREATE TABLE voucher (code TEXT PRIMARY KEY, label TEXT NOT NULL)",
        &[],
    )
    .unwrap();
    db.execute(
        "INSERT INTO voucher (code, label) VALUES (@0, @1)",
        &[Value::String("WINTER".into()), Value::String("old".into())],
    )
    .unwrap();

    let mut voucher = Voucher {
        code: "WINTER".into(),
        label: "new".into(),
    };
    let outcome = db
        .insert_or_update_with(
            &mut voucher,
            "SET label = @0 WHERE code = @1",
            &[
                Value::String("new".into()),
                Value::String("WINTER".into()),
            ],
        )
        .unwrap();
    assert_eq!(outcome, Persisted::Updated);

    let loaded: Voucher = db.find("WINTER").unwrap().unwrap();
    assert_eq!(loaded.label, "new");
}

#[test]
fn test_insert_or_update_gives_up_when_stuck() {
    let db = memory_db();
    db.execute(
        "CREATE TABLE registration (id INTEGER PRIMARY KEY AUTOINCREMENT, \
         code TEXT NOT NULL UNIQUE)",
        &[],
    )
    .unwrap();
    db.execute(
        "INSERT INTO registration (code) VALUES (@0)",
        &[Value::String("X".into())],
    )
    .unwrap();

    // Every insert violates the UNIQUE code; the update clause matches
    // nothing, so the alternation exhausts its rounds.
    let mut stuck = Registration {
        code: "X".into(),
        ..Registration::default()
    };
    let err = db
        .insert_or_update_with(&mut stuck, "SET code = @0 WHERE 1 = 0", &[Value::String("X".into())])
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Data);
    assert!(err.to_string().contains("could not be inserted"));
}

#[test]
fn test_transaction_commit_and_rollback() {
    let db = memory_db();
    article_schema(&db);

    let tx = db.transaction().unwrap();
    seed_articles(&db, 2);
    tx.abort().unwrap();
    let count: i64 = db.execute_scalar("SELECT COUNT(*) FROM article", &[]).unwrap();
    assert_eq!(count, 0);

    let tx = db.transaction().unwrap();
    seed_articles(&db, 2);
    tx.complete().unwrap();
    let count: i64 = db.execute_scalar("SELECT COUNT(*) FROM article", &[]).unwrap();
    assert_eq!(count, 2);
}

#[test]
fn test_exception_hook_observes_failures() {
    let mut db = memory_db();
    let failures = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&failures);
    db.on_exception(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let err = db.execute("SELECT FROM WHERE", &[]).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Query);
    assert_eq!(failures.load(Ordering::SeqCst), 1);
}

#[test]
fn test_command_hooks_and_diagnostics() {
    let mut db = memory_db();
    let commands = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&commands);
    db.on_executed_command(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    article_schema(&db);
    db.execute(
        "INSERT INTO article (title, views) VALUES (@0, @1)",
        &[Value::String("a".into()), Value::Int64(1)],
    )
    .unwrap();

    assert_eq!(commands.load(Ordering::SeqCst), 2);
    assert!(db.last_sql().starts_with("INSERT INTO article"));
    let formatted = db.last_command();
    assert!(formatted.contains("@0 = String(\"a\")"));
    assert!(formatted.contains("@1 = Int64(1)"));
}

#[derive(Debug, Default)]
struct OrderLine {
    id: i64,
    item: String,
    customer_id: i64,
}

impl Entity for OrderLine {
    fn descriptor() -> TableDescriptor<Self> {
        TableDescriptor::new("order_line", "id")
            .auto_increment()
            .column(ColumnDescriptor::new(
                "id",
                SqlType::BigInt,
                |o: &OrderLine| o.id.into(),
                |o, v| {
                    o.id = FromValue::from_value(v)?;
                    Ok(())
                },
            ))
            .column(ColumnDescriptor::new(
                "item",
                SqlType::Text,
                |o: &OrderLine| o.item.clone().into(),
                |o, v| {
                    o.item = FromValue::from_value(v)?;
                    Ok(())
                },
            ))
            .column(ColumnDescriptor::new(
                "customer_id",
                SqlType::BigInt,
                |o: &OrderLine| o.customer_id.into(),
                |o, v| {
                    o.customer_id = FromValue::from_value(v)?;
                    Ok(())
                },
            ))
    }
}

#[derive(Debug, Default)]
struct Customer {
    id: i64,
    name: String,
}

impl Entity for Customer {
    fn descriptor() -> TableDescriptor<Self> {
        TableDescriptor::new("customer", "id")
            .auto_increment()
            .column(ColumnDescriptor::new(
                "id",
                SqlType::BigInt,
                |c: &Customer| c.id.into(),
                |c, v| {
                    c.id = FromValue::from_value(v)?;
                    Ok(())
                },
            ))
            .column(ColumnDescriptor::new(
                "name",
                SqlType::Text,
                |c: &Customer| c.name.clone().into(),
                |c, v| {
                    c.name = FromValue::from_value(v)?;
                    Ok(())
                },
            ))
    }
}

#[test]
fn test_fetch_two_over_left_join() {
    let db = memory_db();
    db.execute(
        "CREATE TABLE customer (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL)",
        &[],
    )
    .unwrap();
    db.execute(
        "CREATE TABLE order_line (id INTEGER PRIMARY KEY AUTOINCREMENT, \
         item TEXT NOT NULL, customer_id INTEGER)",
        &[],
    )
    .unwrap();
    db.execute("INSERT INTO customer (name) VALUES (@0)", &[Value::String("acme".into())])
        .unwrap();
    db.execute(
        "INSERT INTO order_line (item, customer_id) VALUES (@0, @1), (@2, @3)",
        &[
            Value::String("anvil".into()),
            Value::Int64(1),
            Value::String("rocket".into()),
            Value::Null,
        ],
    )
    .unwrap();

    let pairs = db
        .fetch_two::<OrderLine, Customer>(
            "SELECT o.id, o.item, o.customer_id, c.id, c.name \
             FROM order_line o LEFT JOIN customer c ON c.id = o.customer_id \
             ORDER BY o.id",
            &[],
        )
        .unwrap();
    assert_eq!(pairs.len(), 2);
    assert_eq!(pairs[0].0.item, "anvil");
    assert_eq!(pairs[0].1.as_ref().map(|c| c.name.as_str()), Some("acme"));
    assert_eq!(pairs[1].0.item, "rocket");
    assert!(pairs[1].1.is_none());
}

#[test]
fn test_file_database_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let url = dir.path().join("articles.db").to_string_lossy().into_owned();

    {
        let db = Database::new(DatabaseConfig::new(&url, "sqlite")).unwrap();
        article_schema(&db);
        let mut article = Article {
            title: "durable".into(),
            views: 7,
            ..Article::default()
        };
        db.insert(&mut article).unwrap();
    }

    let db = Database::new(DatabaseConfig::new(&url, "sqlite")).unwrap();
    let loaded: Article = db.first("ORDER BY id", &[]).unwrap();
    assert_eq!(loaded.title, "durable");
    assert_eq!(loaded.views, 7);
}

#[test]
fn test_auto_select_escape_hatch() {
    let db = memory_db();
    article_schema(&db);
    seed_articles(&db, 1);

    // A leading semicolon suppresses expansion; the statement runs verbatim.
    let all: Vec<Article> = db
        .fetch("; SELECT id, title, views FROM article", &[])
        .unwrap();
    assert_eq!(all.len(), 1);

    let err = db.fetch::<Article>("; WHERE views = @0", &[1i64.into()]).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Query);
}

#[test]
fn test_table_exists_probe() {
    let db = memory_db();
    article_schema(&db);

    assert!(db.table_exists("article").unwrap());
    assert!(!db.table_exists("no_such_table").unwrap());
}
