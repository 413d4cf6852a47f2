mod common;

use seqdb::{config::DL_CAPACITY, Database, ErrorKind, ExecOutput};

fn open_db() -> (tempfile::TempDir, Database) {
    common::setup();
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(dir.path()).unwrap();
    (dir, db)
}

fn bytes_of(out: ExecOutput) -> Vec<u8> {
    match out {
        ExecOutput::Bytes(b) => b,
        _ => panic!("statement returned no bytes"),
    }
}

#[test]
fn test_create_insert_read_round_trip() {
    let (_dir, db) = open_db();

    db.execute("create x u32;").unwrap();
    db.execute("insert x[0..4] = [10, 20, 30, 40];").unwrap();

    let got = bytes_of(db.execute("read x[0..4];").unwrap());
    let mut expect = Vec::new();
    for v in &[10u32, 20, 30, 40] {
        expect.extend_from_slice(&v.to_le_bytes());
    }
    assert_eq!(got, expect);

    // Single-element read
    let got = bytes_of(db.execute("read x[2];").unwrap());
    assert_eq!(got, 30u32.to_le_bytes().to_vec());

    db.close().unwrap();
}

#[test]
fn test_write_overwrites() {
    let (_dir, db) = open_db();

    db.execute("create x i16;").unwrap();
    db.execute("insert x[0..4] = [1, 2, 3, 4];").unwrap();
    db.execute("write x[1..3] = [-5, -6];").unwrap();

    let got = bytes_of(db.execute("read x[0..4];").unwrap());
    let mut expect = Vec::new();
    for v in &[1i16, -5, -6, 4] {
        expect.extend_from_slice(&v.to_le_bytes());
    }
    assert_eq!(got, expect);

    db.close().unwrap();
}

#[test]
fn test_delete_then_recreate() {
    let (_dir, db) = open_db();

    db.execute("create x u8;").unwrap();
    let big = 10000;
    db.execute(&format!("insert x[0..{}] = 7;", big)).unwrap();

    db.execute("delete x;").unwrap();
    let got = db.execute("read x[0..1];");
    assert_eq!(got.unwrap_err().kind(), ErrorKind::DoesntExist);

    // The name is free again and the freed pages get reused.
    db.execute("create x u8;").unwrap();
    let got = bytes_of(db.execute("read x[0..10];").unwrap());
    assert!(got.is_empty());

    db.close().unwrap();
}

#[test]
fn test_duplicate_create() {
    let (_dir, db) = open_db();

    db.execute("create x u8;").unwrap();
    let got = db.execute("create x u16;");
    assert_eq!(got.unwrap_err().kind(), ErrorKind::AlreadyExists);

    db.close().unwrap();
}

#[test]
fn test_missing_variable() {
    let (_dir, db) = open_db();

    let got = db.execute("read nope[0..1];");
    assert_eq!(got.unwrap_err().kind(), ErrorKind::DoesntExist);

    let got = db.execute("delete nope;");
    assert_eq!(got.unwrap_err().kind(), ErrorKind::DoesntExist);

    db.close().unwrap();
}

#[test]
fn test_literal_range_errors() {
    let (_dir, db) = open_db();

    db.execute("create x u8;").unwrap();
    let got = db.execute("insert x[0..1] = 256;");
    assert_eq!(got.unwrap_err().kind(), ErrorKind::Arith);

    db.execute("create y i8;").unwrap();
    let got = db.execute("insert y[0..1] = -129;");
    assert_eq!(got.unwrap_err().kind(), ErrorKind::Arith);

    // A failed statement leaves nothing behind.
    let got = bytes_of(db.execute("read x[0..4];").unwrap());
    assert!(got.is_empty());

    db.close().unwrap();
}

#[test]
fn test_string_overflow_into_fixed_array() {
    let (_dir, db) = open_db();

    db.execute("create tag [4]u8;").unwrap();
    let got = db.execute("insert tag[0..1] = \"12345\";");
    assert_eq!(got.unwrap_err().kind(), ErrorKind::Arith);

    db.execute("insert tag[0..1] = \"abc\";").unwrap();
    let got = bytes_of(db.execute("read tag[0];").unwrap());
    assert_eq!(got, b"abc\0".to_vec());

    db.close().unwrap();
}

#[test]
fn test_struct_and_enum_variables() {
    let (_dir, db) = open_db();

    db.execute("create p struct { x u8, y u16 };").unwrap();
    db.execute("insert p[0..2] = [1, 256, 2, 512];").unwrap();
    let got = bytes_of(db.execute("read p[0..2];").unwrap());
    assert_eq!(got, vec![1, 0, 1, 2, 0, 2]);

    db.execute("create s enum { off, on };").unwrap();
    db.execute("insert s[0..3] = [on, off, on];").unwrap();
    let got = bytes_of(db.execute("read s[0..3];").unwrap());
    assert_eq!(got, vec![1, 0, 1]);

    db.close().unwrap();
}

#[test]
fn test_bool_and_float_variables() {
    let (_dir, db) = open_db();

    db.execute("create flags bool;").unwrap();
    db.execute("insert flags[0..2] = [true, false];").unwrap();
    let got = bytes_of(db.execute("read flags[0..2];").unwrap());
    assert_eq!(got, vec![1, 0]);

    db.execute("create t f64;").unwrap();
    db.execute("insert t[0..2] = [1.5, -2.25];").unwrap();
    let got = bytes_of(db.execute("read t[0..2];").unwrap());
    let mut expect = 1.5f64.to_le_bytes().to_vec();
    expect.extend_from_slice(&(-2.25f64).to_le_bytes());
    assert_eq!(got, expect);

    db.execute("create c cf128;").unwrap();
    db.execute("insert c[0..1] = 3.0+i4.0;").unwrap();
    let got = bytes_of(db.execute("read c[0];").unwrap());
    let mut expect = 3.0f64.to_le_bytes().to_vec();
    expect.extend_from_slice(&4.0f64.to_le_bytes());
    assert_eq!(got, expect);

    db.close().unwrap();
}

#[test]
fn test_syntax_errors() {
    let (_dir, db) = open_db();

    assert_eq!(
        db.execute("creat x u8;").unwrap_err().kind(),
        ErrorKind::Syntax
    );
    assert_eq!(
        db.execute("create x nosuchtype;").unwrap_err().kind(),
        ErrorKind::Syntax
    );
    assert_eq!(
        db.execute("read x[0..1]").unwrap_err().kind(),
        ErrorKind::Syntax
    );

    db.close().unwrap();
}

#[test]
fn test_large_insert_spans_many_pages() {
    let (_dir, db) = open_db();

    db.execute("create x u8;").unwrap();
    let n = 4 * DL_CAPACITY;
    db.execute(&format!("insert x[0..{}] = 42;", n)).unwrap();

    let got = bytes_of(db.execute(&format!("read x[0..{}];", n)).unwrap());
    assert_eq!(got.len(), n);
    assert!(got.iter().all(|b| *b == 42));

    // Reads past the end stop at EOF
    let got = bytes_of(
        db.execute(&format!("read x[{}..{}];", n - 2, n + 10)).unwrap(),
    );
    assert_eq!(got, vec![42, 42]);

    db.close().unwrap();
}

#[test]
fn test_insert_prepends_and_appends() {
    let (_dir, db) = open_db();

    db.execute("create x u8;").unwrap();
    db.execute("insert x[0..3] = [5, 6, 7];").unwrap();
    // Insert at the front shifts the rest right
    db.execute("insert x[0..2] = [1, 2];").unwrap();
    // Insert past the current end appends
    db.execute("insert x[5..6] = 9;").unwrap();

    let got = bytes_of(db.execute("read x[0..6];").unwrap());
    assert_eq!(got, vec![1, 2, 5, 6, 7, 9]);

    db.close().unwrap();
}
