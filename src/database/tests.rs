//! End-to-end scenarios over the public API

use super::*;
use crate::crypto::EncryptionContext;
use crate::data::Value;

const USERS_IDL: &str = r#"
    table users {
        id: int (id);
        name: string;
        email: string (key);
        age: int;
    }
"#;

const USERS_AGE_INDEXED_IDL: &str = r#"
    table users {
        id: int (id);
        name: string;
        email: string (key);
        age: int (key);
    }
"#;

const USERS_ENCRYPTED_IDL: &str = r#"
    table users {
        id: int (id);
        name: string;
        email: string (encrypted: 7);
        age: int;
    }
"#;

/// Test payload layout:
/// 0..4 root offset (zeros), 4..8 file id, 8..12 id (i32 LE),
/// 12..16 age (i32 LE), 16..18 name length (u16 LE), name bytes,
/// then email length (u16 LE) and email bytes.
fn user_payload(id: i32, name: &str, email: &[u8], age: i32) -> Vec<u8> {
    let mut p = vec![0u8; 4];
    p.extend_from_slice(b"USER");
    p.extend_from_slice(&id.to_le_bytes());
    p.extend_from_slice(&age.to_le_bytes());
    p.extend_from_slice(&(name.len() as u16).to_le_bytes());
    p.extend_from_slice(name.as_bytes());
    p.extend_from_slice(&(email.len() as u16).to_le_bytes());
    p.extend_from_slice(email);
    p
}

fn frame(payload: &[u8]) -> Vec<u8> {
    let mut out = (payload.len() as u32).to_le_bytes().to_vec();
    out.extend_from_slice(payload);
    out
}

fn email_range(data: &[u8]) -> (usize, usize) {
    let name_len = u16::from_le_bytes(data[16..18].try_into().unwrap()) as usize;
    let len_at = 18 + name_len;
    let email_len = u16::from_le_bytes(data[len_at..len_at + 2].try_into().unwrap()) as usize;
    (len_at + 2, len_at + 2 + email_len)
}

fn users_extractor() -> FieldExtractor {
    Arc::new(|data: &[u8], field: &str| match field {
        "id" => Value::Int32(i32::from_le_bytes(data[8..12].try_into().unwrap())),
        "age" => Value::Int32(i32::from_le_bytes(data[12..16].try_into().unwrap())),
        "name" => {
            let name_len = u16::from_le_bytes(data[16..18].try_into().unwrap()) as usize;
            Value::Str(String::from_utf8_lossy(&data[18..18 + name_len]).into_owned())
        }
        "email" => {
            let (start, end) = email_range(data);
            Value::Str(String::from_utf8_lossy(&data[start..end]).into_owned())
        }
        _ => Value::Null,
    })
}

/// Extractor for the encrypted schema: the email field carries ciphertext and
/// is surfaced as raw bytes for the decryption hook.
fn users_encrypted_extractor() -> FieldExtractor {
    let plain = users_extractor();
    Arc::new(move |data: &[u8], field: &str| match field {
        "email" => {
            let (start, end) = email_range(data);
            Value::Bytes(data[start..end].to_vec())
        }
        other => plain(data, other),
    })
}

fn users_fast_extractor(
    data: &[u8],
    column: usize,
    ctx: &mut rusqlite::vtab::Context,
) -> rusqlite::Result<bool> {
    match column {
        0 => {
            ctx.set_result(&(i32::from_le_bytes(data[8..12].try_into().unwrap()) as i64))?;
            Ok(true)
        }
        3 => {
            ctx.set_result(&(i32::from_le_bytes(data[12..16].try_into().unwrap()) as i64))?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

fn users_batch_extractor(data: &[u8], out: &mut Vec<Value>) {
    let name_len = u16::from_le_bytes(data[16..18].try_into().unwrap()) as usize;
    let (start, end) = email_range(data);
    out.push(Value::Int32(i32::from_le_bytes(data[8..12].try_into().unwrap())));
    out.push(Value::Str(
        String::from_utf8_lossy(&data[18..18 + name_len]).into_owned(),
    ));
    out.push(Value::Str(String::from_utf8_lossy(&data[start..end]).into_owned()));
    out.push(Value::Int32(i32::from_le_bytes(data[12..16].try_into().unwrap())));
}

fn setup(idl: &str) -> Database {
    let mut db = Database::from_schema(idl, "test_db").unwrap();
    db.register_file_id("USER", "users").unwrap();
    db.set_field_extractor("users", users_extractor()).unwrap();
    db
}

fn seed_three(db: &mut Database) {
    let mut stream = Vec::new();
    stream.extend_from_slice(&frame(&user_payload(1, "a", b"a@x", 30)));
    stream.extend_from_slice(&frame(&user_payload(2, "b", b"b@x", 25)));
    stream.extend_from_slice(&frame(&user_payload(3, "c", b"c@x", 40)));
    let (consumed, records) = db.ingest(&stream);
    assert_eq!(consumed, stream.len());
    assert_eq!(records, 3);
}

#[test]
fn test_basic_ingest_and_point_query() {
    let mut db = setup(USERS_IDL);
    seed_three(&mut db);

    let result = db
        .query_with_params(
            "SELECT id, name FROM users WHERE email = ?",
            &[Value::Str("b@x".into())],
        )
        .unwrap();
    assert_eq!(result.columns, vec!["id", "name"]);
    assert_eq!(result.rows, vec![vec![Value::Int64(2), Value::Str("b".into())]]);

    assert_eq!(db.query_count("SELECT * FROM users", &[]).unwrap(), 3);
}

#[test]
fn test_tombstone_hides_rows_until_cleared() {
    let mut db = setup(USERS_IDL);
    seed_three(&mut db);

    db.mark_deleted("users", 2).unwrap();
    assert_eq!(db.deleted_count("users"), 1);
    assert_eq!(db.query_count("SELECT * FROM users", &[]).unwrap(), 2);

    let hidden = db
        .query_with_params(
            "SELECT * FROM users WHERE email = ?",
            &[Value::Str("b@x".into())],
        )
        .unwrap();
    assert_eq!(hidden.row_count(), 0);

    db.clear_tombstones("users").unwrap();
    assert_eq!(db.query_count("SELECT * FROM users", &[]).unwrap(), 3);
    let restored = db
        .query_with_params(
            "SELECT * FROM users WHERE email = ?",
            &[Value::Str("b@x".into())],
        )
        .unwrap();
    assert_eq!(restored.row_count(), 1);
}

#[test]
fn test_multi_source_unified_view() {
    let mut db = setup(USERS_IDL);
    db.register_source("A").unwrap();
    db.register_source("B").unwrap();
    db.create_unified_views().unwrap();

    let mut stream_a = Vec::new();
    stream_a.extend_from_slice(&frame(&user_payload(1, "a", b"a@x", 30)));
    stream_a.extend_from_slice(&frame(&user_payload(2, "b", b"b@x", 25)));
    let mut stream_b = Vec::new();
    stream_b.extend_from_slice(&frame(&user_payload(3, "c", b"c@x", 40)));
    stream_b.extend_from_slice(&frame(&user_payload(4, "d", b"d@x", 35)));
    stream_b.extend_from_slice(&frame(&user_payload(5, "e", b"e@x", 20)));

    assert_eq!(db.ingest_with_source(&stream_a, "A").1, 2);
    assert_eq!(db.ingest_with_source(&stream_b, "B").1, 3);

    assert_eq!(db.query_count("SELECT * FROM users", &[]).unwrap(), 5);

    let grouped = db
        .query("SELECT _source, COUNT(*) FROM users GROUP BY _source ORDER BY _source")
        .unwrap();
    assert_eq!(
        grouped.rows,
        vec![
            vec![Value::Str("A".into()), Value::Int64(2)],
            vec![Value::Str("B".into()), Value::Int64(3)],
        ]
    );

    assert_eq!(db.list_sources(), vec!["A".to_string(), "B".to_string()]);
    assert!(db.list_tables().contains(&"users@A".to_string()));
}

#[test]
fn test_duplicate_source_rejected() {
    let mut db = setup(USERS_IDL);
    db.register_source("A").unwrap();
    assert!(matches!(
        db.register_source("A"),
        Err(StreamError::DuplicateSource(_))
    ));
}

#[test]
fn test_range_by_indexed_column() {
    let mut db = setup(USERS_AGE_INDEXED_IDL);
    let mut stream = Vec::new();
    for i in 1..=100 {
        let email = format!("u{}@x", i);
        stream.extend_from_slice(&frame(&user_payload(i, "u", email.as_bytes(), i)));
    }
    db.ingest(&stream);

    let count = db
        .query_count(
            "SELECT * FROM users WHERE age BETWEEN ? AND ?",
            &[Value::Int64(20), Value::Int64(40)],
        )
        .unwrap();
    assert_eq!(count, 21);

    let rows = db
        .query_with_params(
            "SELECT id FROM users WHERE age >= ? AND age <= ? ORDER BY id",
            &[Value::Int64(98), Value::Int64(100)],
        )
        .unwrap();
    assert_eq!(
        rows.rows,
        vec![
            vec![Value::Int64(98)],
            vec![Value::Int64(99)],
            vec![Value::Int64(100)],
        ]
    );
}

#[test]
fn test_export_reimport_round_trip() {
    let mut db = setup(USERS_IDL);
    seed_three(&mut db);
    let before = db
        .query("SELECT id, name, email, age FROM users ORDER BY id")
        .unwrap();
    let bytes = db.export();

    let mut db2 = setup(USERS_IDL);
    db2.load_and_rebuild(&bytes);
    let after = db2
        .query("SELECT id, name, email, age FROM users ORDER BY id")
        .unwrap();

    assert_eq!(after, before);
    assert_eq!(after.row_count(), 3);
    // The log itself survives unchanged
    assert_eq!(db2.export(), bytes);
}

#[test]
fn test_encrypted_column_round_trip() {
    let key: Vec<u8> = (1..=32).collect();
    let ctx = EncryptionContext::new(&key);
    let ciphertext = match ctx.encrypt_value(&Value::Str("a@x".into()), 7) {
        Value::Bytes(b) => b,
        other => panic!("expected bytes ciphertext, got {:?}", other),
    };

    let mut db = Database::from_schema(USERS_ENCRYPTED_IDL, "test_db").unwrap();
    db.register_file_id("USER", "users").unwrap();
    db.set_field_extractor("users", users_encrypted_extractor())
        .unwrap();
    db.set_encryption_key(&key).unwrap();
    assert!(db.has_encrypted_fields());

    db.ingest_one(&user_payload(1, "a", &ciphertext, 30));

    let result = db
        .query_with_params("SELECT email FROM users WHERE id = ?", &[Value::Int64(1)])
        .unwrap();
    assert_eq!(result.rows, vec![vec![Value::Str("a@x".into())]]);

    // The stored stream carries the ciphertext, not the plaintext
    let exported = db.export();
    assert!(!exported.windows(3).any(|w| w == b"a@x"));
    assert!(exported
        .windows(ciphertext.len())
        .any(|w| w == ciphertext.as_slice()));
}

#[test]
fn test_hmac_requires_key() {
    let mut db = setup(USERS_IDL);
    assert!(matches!(
        db.compute_hmac(b"buf"),
        Err(StreamError::CryptoUnavailable)
    ));

    let key = [7u8; 32];
    db.set_encryption_key(&key).unwrap();
    let mac = db.compute_hmac(b"buf").unwrap();
    assert!(db.verify_hmac(b"buf", &mac).unwrap());
    assert!(!db.verify_hmac(b"other", &mac).unwrap());
}

#[test]
fn test_fast_path_matches_executor_point_lookup() {
    let mut db = setup(USERS_IDL);
    seed_three(&mut db);

    // Same predicate, one shape intercepted and one executed by SQLite
    let fast = db
        .query_with_params(
            "SELECT * FROM users WHERE email = ?",
            &[Value::Str("b@x".into())],
        )
        .unwrap();
    let slow = db
        .query_with_params(
            "SELECT * FROM users WHERE email = ? AND 1",
            &[Value::Str("b@x".into())],
        )
        .unwrap();
    assert_eq!(fast, slow);
    assert_eq!(fast.row_count(), 1);

    // Missing key: both empty with identical columns
    let fast_miss = db
        .query_with_params(
            "SELECT * FROM users WHERE email = ?",
            &[Value::Str("nobody@x".into())],
        )
        .unwrap();
    let slow_miss = db
        .query_with_params(
            "SELECT * FROM users WHERE email = ? AND 1",
            &[Value::Str("nobody@x".into())],
        )
        .unwrap();
    assert_eq!(fast_miss, slow_miss);
    assert_eq!(fast_miss.row_count(), 0);
}

#[test]
fn test_fast_path_matches_executor_full_scan() {
    let mut db = setup(USERS_IDL);
    seed_three(&mut db);
    db.mark_deleted("users", 3).unwrap();

    let fast = db.query("SELECT * FROM users").unwrap();
    let slow = db.query("SELECT * FROM users WHERE 1").unwrap();
    assert_eq!(fast, slow);
    assert_eq!(fast.row_count(), 2);
    assert_eq!(
        fast.columns,
        vec!["id", "name", "email", "age", "_source", "_rowid", "_offset", "_data"]
    );
}

#[test]
fn test_rowid_lookup_strategy() {
    let mut db = setup(USERS_IDL);
    seed_three(&mut db);

    let row = db
        .query_with_params("SELECT id FROM users WHERE rowid = ?", &[Value::Int64(2)])
        .unwrap();
    assert_eq!(row.rows, vec![vec![Value::Int64(2)]]);

    let miss = db
        .query_with_params("SELECT id FROM users WHERE rowid = ?", &[Value::Int64(99)])
        .unwrap();
    assert_eq!(miss.row_count(), 0);
}

#[test]
fn test_virtual_columns() {
    let mut db = setup(USERS_IDL);
    seed_three(&mut db);

    let result = db
        .query("SELECT _rowid, _offset, _source, _data FROM users ORDER BY _rowid")
        .unwrap();
    assert_eq!(result.row_count(), 3);
    assert_eq!(result.rows[0][0], Value::Int64(1));
    assert_eq!(result.rows[0][1], Value::Int64(0));
    assert_eq!(result.rows[0][2], Value::Str("".into()));
    assert_eq!(result.rows[0][3], Value::Bytes(user_payload(1, "a", b"a@x", 30)));
}

#[test]
fn test_fast_and_batch_extractors() {
    let mut db = setup(USERS_IDL);
    db.set_fast_field_extractor("users", users_fast_extractor)
        .unwrap();
    db.set_batch_extractor("users", users_batch_extractor).unwrap();
    seed_three(&mut db);

    let result = db
        .query("SELECT id, name, email, age FROM users ORDER BY id")
        .unwrap();
    assert_eq!(
        result.rows[1],
        vec![
            Value::Int64(2),
            Value::Str("b".into()),
            Value::Str("b@x".into()),
            Value::Int64(25),
        ]
    );

    // The intercepted shape goes through the batch extractor
    let fast = db.query("SELECT * FROM users").unwrap();
    assert_eq!(fast.row_count(), 3);
    assert_eq!(fast.rows[0][0], Value::Int64(1));
}

#[test]
fn test_unknown_file_id_stored_not_indexed() {
    let mut db = setup(USERS_IDL);
    seed_three(&mut db);

    let mut stray = vec![0u8; 4];
    stray.extend_from_slice(b"EVNT");
    stray.extend_from_slice(&[1, 2, 3]);
    let seq = db.ingest_one(&stray);
    assert_eq!(seq, 4);

    assert_eq!(db.query_count("SELECT * FROM users", &[]).unwrap(), 3);
    // The record still occupies the log
    let exported = db.export();
    assert!(exported.windows(4).any(|w| w == b"EVNT"));
}

#[test]
fn test_direct_index_api() {
    let mut db = setup(USERS_IDL);
    seed_three(&mut db);

    let hits = db.find_by_index("users", "email", &Value::Str("c@x".into()));
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].sequence, 3);

    let one = db
        .find_one_by_index("users", "email", &Value::Str("a@x".into()))
        .unwrap();
    assert_eq!(one.sequence, 1);
    assert!(one.data.is_empty());

    let (data, length, sequence) = db
        .find_raw_by_index("users", "email", &Value::Str("b@x".into()))
        .unwrap();
    assert_eq!(sequence, 2);
    assert_eq!(length as usize, data.len());
    assert_eq!(data, user_payload(2, "b", b"b@x", 25));

    assert!(db
        .find_raw_by_index("users", "email", &Value::Str("zz@x".into()))
        .is_none());
    assert!(db.find_raw_by_index("users", "name", &Value::Str("a".into())).is_none());

    let mut seqs = Vec::new();
    db.iterate_all("users", |_, seq| seqs.push(seq));
    assert_eq!(seqs, vec![1, 2, 3]);
}

#[test]
fn test_stats_and_introspection() {
    let mut db = setup(USERS_IDL);
    seed_three(&mut db);

    let stats = db.stats();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].table_name, "users");
    assert_eq!(stats[0].file_id, "USER");
    assert_eq!(stats[0].record_count, 3);
    assert_eq!(stats[0].indexes, vec!["email".to_string(), "id".to_string()]);

    assert_eq!(db.list_tables(), vec!["users".to_string()]);
    assert_eq!(db.table_def("users").unwrap().columns.len(), 4);
    assert!(db.table_def("missing").is_none());
}

#[test]
fn test_query_errors_surface() {
    let mut db = setup(USERS_IDL);
    seed_three(&mut db);

    assert!(matches!(
        db.query("SELECT * FROM nonexistent_table WHERE 1"),
        Err(StreamError::Sql(_))
    ));
    assert!(matches!(
        db.register_file_id("POST", "posts"),
        Err(StreamError::TableNotFound(_))
    ));
    assert!(matches!(
        db.mark_deleted("posts", 1),
        Err(StreamError::TableNotFound(_))
    ));
}

#[test]
fn test_partial_ingest_resume() {
    let mut db = setup(USERS_IDL);
    let full = frame(&user_payload(1, "a", b"a@x", 30));
    let mut stream = full.clone();
    stream.extend_from_slice(&frame(&user_payload(2, "b", b"b@x", 25))[..7]);

    let (consumed, records) = db.ingest(&stream);
    assert_eq!(consumed, full.len());
    assert_eq!(records, 1);

    let (consumed2, records2) = db.ingest(&frame(&user_payload(2, "b", b"b@x", 25)));
    assert_eq!(records2, 1);
    assert!(consumed2 > 0);
    assert_eq!(db.query_count("SELECT * FROM users", &[]).unwrap(), 2);
}

const BLOG_IDL: &str = r#"
    table users {
        id: int (id);
        name: string;
        email: string (key);
        age: int;
    }

    table posts {
        id: int (id);
        user_id: int (key);
        title: string;
    }
"#;

/// Posts payload: 0..4 root, 4..8 file id, 8..12 id, 12..16 user_id, title.
fn post_payload(id: i32, user_id: i32, title: &str) -> Vec<u8> {
    let mut p = vec![0u8; 4];
    p.extend_from_slice(b"POST");
    p.extend_from_slice(&id.to_le_bytes());
    p.extend_from_slice(&user_id.to_le_bytes());
    p.extend_from_slice(title.as_bytes());
    p
}

fn posts_extractor() -> FieldExtractor {
    Arc::new(|data: &[u8], field: &str| match field {
        "id" => Value::Int32(i32::from_le_bytes(data[8..12].try_into().unwrap())),
        "user_id" => Value::Int32(i32::from_le_bytes(data[12..16].try_into().unwrap())),
        "title" => Value::Str(String::from_utf8_lossy(&data[16..]).into_owned()),
        _ => Value::Null,
    })
}

#[test]
fn test_two_tables_routed_by_file_id() {
    let mut db = Database::from_schema(BLOG_IDL, "blog").unwrap();
    db.register_file_id("USER", "users").unwrap();
    db.register_file_id("POST", "posts").unwrap();
    db.set_field_extractor("users", users_extractor()).unwrap();
    db.set_field_extractor("posts", posts_extractor()).unwrap();

    let mut stream = Vec::new();
    stream.extend_from_slice(&frame(&user_payload(1, "a", b"a@x", 30)));
    stream.extend_from_slice(&frame(&post_payload(10, 1, "hello")));
    stream.extend_from_slice(&frame(&user_payload(2, "b", b"b@x", 25)));
    stream.extend_from_slice(&frame(&post_payload(11, 2, "world")));
    let (_, records) = db.ingest(&stream);
    assert_eq!(records, 4);

    assert_eq!(db.query_count("SELECT * FROM users", &[]).unwrap(), 2);
    assert_eq!(db.query_count("SELECT * FROM posts", &[]).unwrap(), 2);

    // Joins run entirely inside the SQL executor over both virtual tables
    let joined = db
        .query_with_params(
            "SELECT u.name, p.title FROM users u JOIN posts p ON p.user_id = u.id \
             WHERE u.id = ? ORDER BY p.id",
            &[Value::Int64(1)],
        )
        .unwrap();
    assert_eq!(
        joined.rows,
        vec![vec![Value::Str("a".into()), Value::Str("hello".into())]]
    );
}

#[test]
fn test_extractor_installed_after_ingest() {
    let mut db = Database::from_schema(USERS_IDL, "test_db").unwrap();
    db.register_file_id("USER", "users").unwrap();

    // No extractor yet: stored and counted, not indexed
    db.ingest_one(&user_payload(1, "a", b"a@x", 30));
    db.ingest_one(&user_payload(2, "b", b"b@x", 25));
    assert_eq!(db.query_count("SELECT * FROM users", &[]).unwrap(), 2);

    db.set_field_extractor("users", users_extractor()).unwrap();
    let miss = db
        .query_with_params(
            "SELECT * FROM users WHERE email = ?",
            &[Value::Str("a@x".into())],
        )
        .unwrap();
    assert_eq!(miss.row_count(), 0);

    // Replaying the log rebuilds the indexes with the extractor in place,
    // without double-counting the already-routed records
    let bytes = db.export();
    db.load_and_rebuild(&bytes);
    assert_eq!(db.query_count("SELECT * FROM users", &[]).unwrap(), 2);
    let hit = db
        .query_with_params(
            "SELECT * FROM users WHERE email = ?",
            &[Value::Str("a@x".into())],
        )
        .unwrap();
    assert_eq!(hit.row_count(), 1);
}

#[test]
fn test_source_tombstones_are_independent() {
    let mut db = setup(USERS_IDL);
    db.register_source("A").unwrap();
    db.register_source("B").unwrap();
    db.create_unified_views().unwrap();

    let seq_a = db.ingest_one_with_source(&user_payload(1, "a", b"a@x", 30), "A");
    db.ingest_one_with_source(&user_payload(2, "b", b"b@x", 25), "B");
    assert_eq!(db.query_count("SELECT * FROM users", &[]).unwrap(), 2);

    db.mark_deleted("users@A", seq_a).unwrap();
    assert_eq!(db.deleted_count("users@A"), 1);
    assert_eq!(db.deleted_count("users@B"), 0);
    assert_eq!(db.query_count("SELECT * FROM users", &[]).unwrap(), 1);

    db.clear_tombstones("users@A").unwrap();
    assert_eq!(db.query_count("SELECT * FROM users", &[]).unwrap(), 2);
}

#[test]
fn test_json_schema_database() {
    let json = r#"{
        "name": "events",
        "properties": {
            "id": {"type": "integer", "format": "int64"},
            "score": {"type": "number"},
            "label": {"type": "string"}
        }
    }"#;

    let mut db = Database::from_schema(json, "metrics").unwrap();
    db.register_file_id("EVNT", "events").unwrap();
    db.set_field_extractor(
        "events",
        Arc::new(|data: &[u8], field: &str| match field {
            "id" => Value::Int64(i64::from_le_bytes(data[8..16].try_into().unwrap())),
            "score" => Value::Float64(f64::from_le_bytes(data[16..24].try_into().unwrap())),
            "label" => Value::Str(String::from_utf8_lossy(&data[24..]).into_owned()),
            _ => Value::Null,
        }),
    )
    .unwrap();

    let mut payload = vec![0u8; 4];
    payload.extend_from_slice(b"EVNT");
    payload.extend_from_slice(&42i64.to_le_bytes());
    payload.extend_from_slice(&0.5f64.to_le_bytes());
    payload.extend_from_slice(b"ok");
    db.ingest_one(&payload);

    let result = db.query("SELECT id, score, label FROM events").unwrap();
    assert_eq!(
        result.rows,
        vec![vec![Value::Int64(42), Value::Float64(0.5), Value::Str("ok".into())]]
    );
}

#[test]
fn test_file_id_rebinding_overwrites() {
    let mut db = Database::from_schema(BLOG_IDL, "blog").unwrap();
    db.set_field_extractor("users", users_extractor()).unwrap();
    db.set_field_extractor("posts", posts_extractor()).unwrap();
    db.register_file_id("USER", "users").unwrap();

    db.ingest_one(&user_payload(1, "a", b"a@x", 30));

    // Rebind the identifier: the newest binding wins for future ingest
    db.register_file_id("USER", "posts").unwrap();
    db.ingest_one(&user_payload(2, "b", b"b@x", 25));

    let stats = db.stats();
    let users = stats.iter().find(|s| s.table_name == "users").unwrap();
    let posts = stats.iter().find(|s| s.table_name == "posts").unwrap();
    assert_eq!(users.record_count, 1);
    assert_eq!(posts.record_count, 1);
}

#[test]
fn test_case_insensitive_table_resolution() {
    let mut db = setup(USERS_IDL);
    seed_three(&mut db);

    assert_eq!(db.query_count("SELECT * FROM USERS", &[]).unwrap(), 3);
    let result = db
        .query_with_params(
            "SELECT * FROM \"Users\" WHERE email = ?",
            &[Value::Str("a@x".into())],
        )
        .unwrap();
    assert_eq!(result.row_count(), 1);
}
