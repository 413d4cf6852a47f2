mod common;

use seqdb::{Database, ExecOutput};

/// Concurrent readers observe either the pre-insert or the post-insert
/// sequence for any given read, never a mixture.
#[test]
fn test_readers_see_whole_states() {
    common::setup();
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(dir.path()).unwrap();

    db.execute("create x u8;").unwrap();
    db.execute("insert x[0..64] = 1;").unwrap();

    let before: Vec<u8> = vec![1; 64];
    let mut after: Vec<u8> = vec![2; 32];
    after.extend(vec![1; 64]);

    crossbeam::thread::scope(|s| {
        let dbref = &db;
        let before = &before;
        let after = &after;

        // One writer splices 32 twos at the front.
        s.spawn(move |_| {
            dbref.execute("insert x[0..32] = 2;").unwrap();
        });

        // Readers hammer the variable while the writer runs.
        for _ in 0..4 {
            s.spawn(move |_| {
                for _ in 0..50 {
                    let got = dbref.execute("read x[0..96];").unwrap();
                    match got {
                        ExecOutput::Bytes(b) => {
                            assert!(
                                b == *before || b == *after,
                                "read observed a torn state: {:?}",
                                &b[..8.min(b.len())]
                            );
                        }
                        _ => panic!("read returned nothing"),
                    }
                }
            });
        }
    })
    .unwrap();

    // Finally the post-state is the only state.
    let got = db.execute("read x[0..96];").unwrap();
    assert_eq!(got, ExecOutput::Bytes(after));

    db.close().unwrap();
}

/// Interleaved writers on distinct variables stay isolated.
#[test]
fn test_parallel_writers_distinct_variables() {
    common::setup();
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(dir.path()).unwrap();

    for i in 0..4 {
        db.execute(&format!("create v{} u32;", i)).unwrap();
    }

    crossbeam::thread::scope(|s| {
        for i in 0..4 {
            let dbref = &db;
            s.spawn(move |_| {
                dbref
                    .execute(&format!("insert v{}[0..200] = range(0, 200);", i))
                    .unwrap();
                dbref
                    .execute(&format!("write v{}[0..1] = {};", i, i))
                    .unwrap();
            });
        }
    })
    .unwrap();

    for i in 0..4u32 {
        let got = db.execute(&format!("read v{}[0..2];", i)).unwrap();
        let mut expect = i.to_le_bytes().to_vec();
        expect.extend_from_slice(&1u32.to_le_bytes());
        assert_eq!(got, ExecOutput::Bytes(expect));
    }

    db.close().unwrap();
}
