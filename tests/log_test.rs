mod common;

use common::RawDb;

use seqdb::{
    cbuffer::CBuffer,
    cursor::Cursor,
    dtype::{Prim, Ty},
    hash_map::HashIndex,
    rptree::RpTree,
    Database, ExecOutput,
};

fn u32_ramp(n: u32) -> Vec<u8> {
    let mut out = Vec::new();
    for v in 0..n {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Scenario: insert 2048 u32 elements, read them back, then restart
/// without a checkpoint and read again.
#[test]
fn test_committed_writes_survive_crash() {
    common::setup();
    let dir = tempfile::tempdir().unwrap();

    let db = Database::open(dir.path()).unwrap();
    db.execute("create x u32;").unwrap();
    db.execute("insert x[0..2048] = range(0, 2048);").unwrap();

    let expect = u32_ramp(2048);
    let got = db.execute("read x[0..2048];").unwrap();
    assert_eq!(got, ExecOutput::Bytes(expect.clone()));

    db.crash();

    let db = Database::open(dir.path()).unwrap();
    let got = db.execute("read x[0..2048];").unwrap();
    assert_eq!(got, ExecOutput::Bytes(expect));
    db.close().unwrap();
}

/// Scenario: a transaction that never commits is rolled back by
/// restart recovery.
#[test]
fn test_uncommitted_insert_is_undone() {
    let mut db = RawDb::create();

    // Committed: the variable exists but is empty.
    let mut tx = db.pager.begin_txn().unwrap();
    let mut cursor = Cursor::new(HashIndex);
    cursor
        .create(&mut db.pager, &mut tx, "x", Ty::Prim(Prim::U32))
        .unwrap();
    db.pager.commit(&mut tx).unwrap();

    // Uncommitted: insert 1000 elements, then crash before commit.
    let mut tx = db.pager.begin_txn().unwrap();
    let var = db.hm.get(&mut db.pager, &mut tx, "x").unwrap();
    let mut r = RpTree::open(Some(var.pg0), &mut db.pager, &mut tx).unwrap();
    r.seek(0, &mut db.pager).unwrap();
    r.insert(&u32_ramp(1000), &mut db.pager, &mut tx).unwrap();

    let mut db = db.crash_and_reopen();

    // The read comes back empty.
    let mut tx = db.pager.begin_txn().unwrap();
    let var = db.hm.get(&mut db.pager, &mut tx, "x").unwrap();
    let mut r = RpTree::open(Some(var.pg0), &mut db.pager, &mut tx).unwrap();
    let mut buf = vec![0u8; 4000];
    r.seek(0, &mut db.pager).unwrap();
    let got = r.read(&mut buf, 4, 1000, 1, &mut db.pager).unwrap();
    assert_eq!(got, 0);
    assert!(r.eof());

    db.pager.commit(&mut tx).unwrap();
    db.pager.close().unwrap();
}

/// Scenario: T1 commits, T2 crashes pre-commit; restart keeps T1's
/// writes and drops T2's.
#[test]
fn test_winner_and_loser_transactions() {
    let mut db = RawDb::create();

    let mut tx = db.pager.begin_txn().unwrap();
    let mut cursor = Cursor::new(HashIndex);
    cursor
        .create(&mut db.pager, &mut tx, "a", Ty::Prim(Prim::U8))
        .unwrap();
    cursor
        .create(&mut db.pager, &mut tx, "b", Ty::Prim(Prim::U8))
        .unwrap();
    db.pager.commit(&mut tx).unwrap();

    // T1: insert into a, commit.
    let mut t1 = db.pager.begin_txn().unwrap();
    let var_a = db.hm.get(&mut db.pager, &mut t1, "a").unwrap();
    let mut ra = RpTree::open(Some(var_a.pg0), &mut db.pager, &mut t1).unwrap();
    ra.seek(0, &mut db.pager).unwrap();
    ra.insert(&[1, 2, 3, 4], &mut db.pager, &mut t1).unwrap();
    db.pager.commit(&mut t1).unwrap();

    // T2: insert into b, crash before commit.
    let mut t2 = db.pager.begin_txn().unwrap();
    let var_b = db.hm.get(&mut db.pager, &mut t2, "b").unwrap();
    let mut rb = RpTree::open(Some(var_b.pg0), &mut db.pager, &mut t2).unwrap();
    rb.seek(0, &mut db.pager).unwrap();
    rb.insert(&[9, 9, 9], &mut db.pager, &mut t2).unwrap();

    let mut db = db.crash_and_reopen();

    let mut tx = db.pager.begin_txn().unwrap();

    let var_a = db.hm.get(&mut db.pager, &mut tx, "a").unwrap();
    let mut ra = RpTree::open(Some(var_a.pg0), &mut db.pager, &mut tx).unwrap();
    let mut buf = vec![0u8; 8];
    ra.seek(0, &mut db.pager).unwrap();
    let got = ra.read(&mut buf, 1, 8, 1, &mut db.pager).unwrap();
    assert_eq!(got, 4);
    assert_eq!(&buf[..4], &[1, 2, 3, 4]);

    let var_b = db.hm.get(&mut db.pager, &mut tx, "b").unwrap();
    let mut rb = RpTree::open(Some(var_b.pg0), &mut db.pager, &mut tx).unwrap();
    rb.seek(0, &mut db.pager).unwrap();
    let got = rb.read(&mut buf, 1, 8, 1, &mut db.pager).unwrap();
    assert_eq!(got, 0);

    db.pager.commit(&mut tx).unwrap();
    db.pager.close().unwrap();
}

/// Running recovery again over the same log is a no-op.
#[test]
fn test_recovery_is_idempotent() {
    common::setup();
    let dir = tempfile::tempdir().unwrap();

    let db = Database::open(dir.path()).unwrap();
    db.execute("create x u16;").unwrap();
    db.execute("insert x[0..100] = range(0, 100);").unwrap();
    db.crash();

    // First recovery.
    let db = Database::open(dir.path()).unwrap();
    let first = db.execute("read x[0..100];").unwrap();
    db.crash();

    // Second recovery over the same (now longer) log.
    let db = Database::open(dir.path()).unwrap();
    let second = db.execute("read x[0..100];").unwrap();
    assert_eq!(first, second);
    db.close().unwrap();
}

/// Checkpoint then restart without further writes leaves the data file
/// bit-for-bit identical.
#[test]
fn test_checkpoint_restart_is_stable() {
    common::setup();
    let dir = tempfile::tempdir().unwrap();

    let db = Database::open(dir.path()).unwrap();
    db.execute("create x u64;").unwrap();
    db.execute("insert x[0..500] = range(0, 500);").unwrap();
    db.checkpoint().unwrap();
    db.close().unwrap();

    let image_before = std::fs::read(dir.path().join("data.db")).unwrap();

    let db = Database::open(dir.path()).unwrap();
    let got = db.execute("read x[0..500];").unwrap();
    match got {
        ExecOutput::Bytes(b) => assert_eq!(b.len(), 500 * 8),
        _ => panic!("read returned nothing"),
    }
    db.close().unwrap();

    let image_after = std::fs::read(dir.path().join("data.db")).unwrap();
    assert_eq!(image_before, image_after);
}

/// Crash after a checkpoint: analysis starts at the master LSN and
/// still recovers the tail.
#[test]
fn test_recovery_from_checkpoint() {
    common::setup();
    let dir = tempfile::tempdir().unwrap();

    let db = Database::open(dir.path()).unwrap();
    db.execute("create x u32;").unwrap();
    db.execute("insert x[0..100] = range(0, 100);").unwrap();
    db.checkpoint().unwrap();

    // Post-checkpoint work that only the WAL knows about.
    db.execute("insert x[100..200] = range(100, 200);").unwrap();
    db.crash();

    let db = Database::open(dir.path()).unwrap();
    let got = db.execute("read x[0..200];").unwrap();
    assert_eq!(got, ExecOutput::Bytes(u32_ramp(200)));
    db.close().unwrap();
}

/// Rollback mid-transaction restores the pre-statement images without
/// a restart.
#[test]
fn test_abort_rolls_back_in_place() {
    let mut db = RawDb::create();

    let mut tx = db.pager.begin_txn().unwrap();
    let mut cursor = Cursor::new(HashIndex);
    cursor
        .create(&mut db.pager, &mut tx, "x", Ty::Prim(Prim::U8))
        .unwrap();
    cursor
        .insert(&mut db.pager, &mut tx, "x", 0, 4)
        .unwrap();
    let mut io = CBuffer::with_capacity(64);
    io.write(&[1, 2, 3, 4]);
    while !cursor.idle() {
        cursor.execute(&mut db.pager, &mut tx, &mut io).unwrap();
    }
    db.pager.commit(&mut tx).unwrap();

    // Overwrite, then abort.
    let mut tx = db.pager.begin_txn().unwrap();
    let var = db.hm.get(&mut db.pager, &mut tx, "x").unwrap();
    let mut r = RpTree::open(Some(var.pg0), &mut db.pager, &mut tx).unwrap();
    r.seek(0, &mut db.pager).unwrap();
    r.write(&[9, 9, 9, 9], 1, 4, 1, &mut db.pager, &mut tx)
        .unwrap();
    db.pager.abort(&mut tx).unwrap();

    let mut tx = db.pager.begin_txn().unwrap();
    let var = db.hm.get(&mut db.pager, &mut tx, "x").unwrap();
    let mut r = RpTree::open(Some(var.pg0), &mut db.pager, &mut tx).unwrap();
    let mut buf = [0u8; 4];
    r.seek(0, &mut db.pager).unwrap();
    r.read(&mut buf, 1, 4, 1, &mut db.pager).unwrap();
    assert_eq!(buf, [1, 2, 3, 4]);

    db.pager.commit(&mut tx).unwrap();
    db.pager.close().unwrap();
}
