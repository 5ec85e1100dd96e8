//! Integration tests driving built SQL fragments through SQLite

#![cfg(feature = "sqlite")]

use tabula::connection::DatabaseConfig;
use tabula::database::Database;
use tabula::meta::{ColumnDescriptor, Entity, TableDescriptor};
use tabula::sql::Sql;
use tabula::types::{FromValue, SqlType, Value};

#[derive(Debug, Default)]
struct Track {
    id: i64,
    title: String,
    plays: i64,
    genre: String,
}

impl Entity for Track {
    fn descriptor() -> TableDescriptor<Self> {
        TableDescriptor::new("track", "id")
            .auto_increment()
            .column(ColumnDescriptor::new(
                "id",
                SqlType::BigInt,
                |t: &Track| t.id.into(),
                |t, v| {
                    t.id = FromValue::from_value(v)?;
                    Ok(())
                },
            ))
            .column(ColumnDescriptor::new(
                "title",
                SqlType::Text,
                |t: &Track| t.title.clone().into(),
                |t, v| {
                    t.title = FromValue::from_value(v)?;
                    Ok(())
                },
            ))
            .column(ColumnDescriptor::new(
                "plays",
                SqlType::BigInt,
                |t: &Track| t.plays.into(),
                |t, v| {
                    t.plays = FromValue::from_value(v)?;
                    Ok(())
                },
            ))
            .column(ColumnDescriptor::new(
                "genre",
                SqlType::Text,
                |t: &Track| t.genre.clone().into(),
                |t, v| {
                    t.genre = FromValue::from_value(v)?;
                    Ok(())
                },
            ))
    }
}

fn seeded_db() -> Database {
    let db = Database::new(
        DatabaseConfig::new(":memory:", "sqlite").with_keep_connection_alive(true),
    )
    .unwrap();
    db.execute(
        "CREATE TABLE track (id INTEGER PRIMARY KEY AUTOINCREMENT, \
         title TEXT NOT NULL, plays INTEGER NOT NULL, genre TEXT NOT NULL)",
        &[],
    )
    .unwrap();
    for (title, plays, genre) in [
        ("alpha", 5i64, "rock"),
        ("beta", 15, "rock"),
        ("gamma", 25, "jazz"),
        ("delta", 40, "jazz"),
    ] {
        db.execute(
            "INSERT INTO track (title, plays, genre) VALUES (@0, @1, @2)",
            &[title.into(), plays.into(), genre.into()],
        )
        .unwrap();
    }
    db
}

#[test]
fn test_built_select_fetches_rows() {
    let db = seeded_db();

    let (text, args) = Sql::new()
        .select(&["title", "plays"])
        .from(&["track"])
        .where_clause("plays >= @0", [Value::Int64(15)])
        .order_by(&["plays DESC"])
        .build()
        .unwrap();

    let rows = db.fetch_rows(&text, &args).unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].get_named("title"), Some(&Value::String("delta".into())));
    assert_eq!(rows[2].get_named("plays"), Some(&Value::Int64(15)));
}

#[test]
fn test_built_fragment_feeds_typed_fetch() {
    let db = seeded_db();

    let (text, args) = Sql::new()
        .where_clause("genre = @0", [Value::String("rock".into())])
        .order_by(&["plays"])
        .build()
        .unwrap();

    let tracks: Vec<Track> = db.fetch(&text, &args).unwrap();
    assert_eq!(tracks.len(), 2);
    assert_eq!(tracks[0].title, "alpha");
    assert_eq!(tracks[1].title, "beta");
}

#[test]
fn test_where_clauses_coalesce_and_filter() {
    let db = seeded_db();

    let (text, args) = Sql::new()
        .where_clause("genre = @0", [Value::String("jazz".into())])
        .where_clause("plays > @0", [Value::Int64(30)])
        .build()
        .unwrap();

    let tracks: Vec<Track> = db.fetch(&text, &args).unwrap();
    assert_eq!(tracks.len(), 1);
    assert_eq!(tracks[0].title, "delta");
}

#[test]
fn test_join_built_and_executed() {
    let db = seeded_db();
    db.execute(
        "CREATE TABLE genre_info (name TEXT PRIMARY KEY, label TEXT NOT NULL)",
        &[],
    )
    .unwrap();
    db.execute(
        "INSERT INTO genre_info (name, label) VALUES (@0, @1), (@2, @3)",
        &[
            "rock".into(),
            "Rock & Roll".into(),
            "jazz".into(),
            "Jazz".into(),
        ],
    )
    .unwrap();

    let (text, args) = Sql::new()
        .select(&["t.title", "g.label"])
        .from(&["track t"])
        .inner_join("genre_info g")
        .on("g.name = t.genre", [])
        .where_clause("t.plays >= @0", [Value::Int64(25)])
        .order_by(&["t.title"])
        .build()
        .unwrap();

    let rows = db.fetch_rows(&text, &args).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get_named("title"), Some(&Value::String("delta".into())));
    assert_eq!(rows[0].get_named("label"), Some(&Value::String("Jazz".into())));
}

#[test]
fn test_group_by_aggregate() {
    let db = seeded_db();

    let (text, args) = Sql::new()
        .select(&["genre", "COUNT(*) AS n", "SUM(plays) AS total"])
        .from(&["track"])
        .group_by(&["genre"])
        .order_by(&["genre"])
        .build()
        .unwrap();

    let rows = db.fetch_rows(&text, &args).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get_named("genre"), Some(&Value::String("jazz".into())));
    assert_eq!(rows[0].get_named("total"), Some(&Value::Int64(65)));
    assert_eq!(rows[1].get_named("n"), Some(&Value::Int64(2)));
}

#[test]
fn test_array_argument_expands_through_pipeline() {
    let db = seeded_db();

    let (text, args) = Sql::new()
        .where_clause(
            "title IN (@0)",
            [Value::Array(vec![
                Value::String("alpha".into()),
                Value::String("gamma".into()),
            ])],
        )
        .order_by(&["title"])
        .build()
        .unwrap();
    assert!(text.contains("IN (@0,@1)"));

    let tracks: Vec<Track> = db.fetch(&text, &args).unwrap();
    assert_eq!(tracks.len(), 2);
    assert_eq!(tracks[0].title, "alpha");
    assert_eq!(tracks[1].title, "gamma");
}

#[test]
fn test_named_markers_bind_by_name() {
    let db = seeded_db();

    let (text, args) = Sql::new()
        .append(Sql::raw_named(
            "WHERE (genre = @genre AND plays >= @floor)",
            [
                ("genre".to_string(), Value::String("rock".into())),
                ("floor".to_string(), Value::Int64(10)),
            ],
        ))
        .build()
        .unwrap();
    assert_eq!(text, "WHERE (genre = @0 AND plays >= @1)");

    let tracks: Vec<Track> = db.fetch(&text, &args).unwrap();
    assert_eq!(tracks.len(), 1);
    assert_eq!(tracks[0].title, "beta");
}
