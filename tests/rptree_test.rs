mod common;

use common::RawDb;

use seqdb::{
    config::DL_CAPACITY,
    paging::{PageType, PG_ANY},
    rptree::RpTree,
};

fn pattern(n: usize) -> Vec<u8> {
    (0..n).map(|i| (i % 251) as u8).collect()
}

#[test]
fn test_insert_then_read_single_leaf() {
    let mut db = RawDb::create();
    let mut tx = db.pager.begin_txn().unwrap();

    let mut r = RpTree::open(None, &mut db.pager, &mut tx).unwrap();
    let data = pattern(100);

    r.seek(0, &mut db.pager).unwrap();
    assert!(r.eof());
    let written = r.insert(&data, &mut db.pager, &mut tx).unwrap();
    assert_eq!(written, 100);

    let mut back = vec![0u8; 100];
    r.seek(0, &mut db.pager).unwrap();
    let got = r.read(&mut back, 1, 100, 1, &mut db.pager).unwrap();
    assert_eq!(got, 100);
    assert_eq!(back, data);

    db.pager.commit(&mut tx).unwrap();
    db.pager.close().unwrap();
}

#[test]
fn test_exact_capacity_keeps_single_leaf() {
    let mut db = RawDb::create();
    let mut tx = db.pager.begin_txn().unwrap();

    let mut r = RpTree::open(None, &mut db.pager, &mut tx).unwrap();
    let data = pattern(DL_CAPACITY);
    r.insert(&data, &mut db.pager, &mut tx).unwrap();

    // The root is still the data list itself: no inner node yet.
    let h = db.pager.get(PG_ANY, r.pg0()).unwrap();
    assert_eq!(
        db.pager.page(&h).get_type().unwrap(),
        PageType::DataList
    );
    assert_eq!(db.pager.page(&h).dl_used() as usize, DL_CAPACITY);
    db.pager.release_ro(h, PG_ANY).unwrap();

    db.pager.commit(&mut tx).unwrap();
    db.pager.close().unwrap();
}

#[test]
fn test_capacity_plus_one_splits_once() {
    let mut db = RawDb::create();
    let mut tx = db.pager.begin_txn().unwrap();

    let mut r = RpTree::open(None, &mut db.pager, &mut tx).unwrap();
    let data = pattern(DL_CAPACITY + 1);
    r.insert(&data, &mut db.pager, &mut tx).unwrap();

    // Exactly one inner node with two leaves, keys summing to the
    // total byte count.
    let h = db.pager.get(PG_ANY, r.pg0()).unwrap();
    assert_eq!(
        db.pager.page(&h).get_type().unwrap(),
        PageType::InnerNode
    );
    assert_eq!(db.pager.page(&h).in_nkeys(), 2);
    assert_eq!(
        db.pager.page(&h).in_total() as usize,
        DL_CAPACITY + 1
    );

    // Both leaves honor the half-full minimum.
    let children = db.pager.page(&h).in_children();
    db.pager.release_ro(h, PG_ANY).unwrap();
    for (pg, len) in children {
        assert!(len as usize >= DL_CAPACITY / 2);
        let lh = db.pager.get(PageType::DataList.mask(), pg).unwrap();
        assert_eq!(db.pager.page(&lh).dl_used() as usize, len as usize);
        db.pager.release_ro(lh, PG_ANY).unwrap();
    }

    // And the bytes read back in order.
    let mut back = vec![0u8; DL_CAPACITY + 1];
    r.seek(0, &mut db.pager).unwrap();
    let got = r
        .read(&mut back, 1, (DL_CAPACITY + 1) as u64, 1, &mut db.pager)
        .unwrap();
    assert_eq!(got as usize, DL_CAPACITY + 1);
    assert_eq!(back, data);

    let total = r.check_integrity(true, &mut db.pager).unwrap();
    assert_eq!(total as usize, DL_CAPACITY + 1);

    db.pager.commit(&mut tx).unwrap();
    db.pager.close().unwrap();
}

#[test]
fn test_five_pages_slice_read() {
    let mut db = RawDb::create();
    let mut tx = db.pager.begin_txn().unwrap();

    let n = 5 * DL_CAPACITY;
    let data = pattern(n);

    let mut r = RpTree::open(None, &mut db.pager, &mut tx).unwrap();
    r.insert(&data, &mut db.pager, &mut tx).unwrap();

    // Slice out the middle page worth of bytes.
    let from = 2 * DL_CAPACITY;
    let to = 3 * DL_CAPACITY;
    let mut back = vec![0u8; to - from];
    r.seek(from as u64, &mut db.pager).unwrap();
    let got = r
        .read(&mut back, 1, (to - from) as u64, 1, &mut db.pager)
        .unwrap();
    assert_eq!(got as usize, to - from);
    assert_eq!(back, data[from..to].to_vec());

    // Inner node keys sum to the full length.
    let h = db.pager.get(PageType::InnerNode.mask(), r.pg0()).unwrap();
    assert_eq!(db.pager.page(&h).in_total() as usize, n);
    db.pager.release_ro(h, PG_ANY).unwrap();
    assert_eq!(
        r.check_integrity(true, &mut db.pager).unwrap() as usize,
        n
    );

    db.pager.commit(&mut tx).unwrap();
    db.pager.close().unwrap();
}

#[test]
fn test_insert_in_middle() {
    let mut db = RawDb::create();
    let mut tx = db.pager.begin_txn().unwrap();

    let mut r = RpTree::open(None, &mut db.pager, &mut tx).unwrap();
    r.insert(&[1, 2, 3, 4], &mut db.pager, &mut tx).unwrap();

    r.seek(2, &mut db.pager).unwrap();
    r.insert(&[9, 9], &mut db.pager, &mut tx).unwrap();

    let mut back = vec![0u8; 6];
    r.seek(0, &mut db.pager).unwrap();
    r.read(&mut back, 1, 6, 1, &mut db.pager).unwrap();
    assert_eq!(back, vec![1, 2, 9, 9, 3, 4]);

    db.pager.commit(&mut tx).unwrap();
    db.pager.close().unwrap();
}

#[test]
fn test_strided_read() {
    let mut db = RawDb::create();
    let mut tx = db.pager.begin_txn().unwrap();

    // Four u32 elements
    let mut data = Vec::new();
    for v in 0u32..8 {
        data.extend_from_slice(&v.to_le_bytes());
    }

    let mut r = RpTree::open(None, &mut db.pager, &mut tx).unwrap();
    r.insert(&data, &mut db.pager, &mut tx).unwrap();

    // Every second element
    let mut back = vec![0u8; 16];
    r.seek(0, &mut db.pager).unwrap();
    let got = r.read(&mut back, 4, 4, 2, &mut db.pager).unwrap();
    assert_eq!(got, 4);
    for (i, chunk) in back.chunks(4).enumerate() {
        assert_eq!(u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]), 2 * i as u32);
    }

    db.pager.commit(&mut tx).unwrap();
    db.pager.close().unwrap();
}

#[test]
fn test_write_overwrites_in_place() {
    let mut db = RawDb::create();
    let mut tx = db.pager.begin_txn().unwrap();

    let mut r = RpTree::open(None, &mut db.pager, &mut tx).unwrap();
    r.insert(&pattern(64), &mut db.pager, &mut tx).unwrap();

    r.seek(10, &mut db.pager).unwrap();
    let wrote = r
        .write(&[0xaa; 4], 1, 4, 1, &mut db.pager, &mut tx)
        .unwrap();
    assert_eq!(wrote, 4);

    let mut back = vec![0u8; 64];
    r.seek(0, &mut db.pager).unwrap();
    r.read(&mut back, 1, 64, 1, &mut db.pager).unwrap();

    let mut expect = pattern(64);
    expect[10..14].copy_from_slice(&[0xaa; 4]);
    assert_eq!(back, expect);

    // Write never grows the sequence
    r.seek(62, &mut db.pager).unwrap();
    let wrote = r
        .write(&[1; 8], 1, 8, 1, &mut db.pager, &mut tx)
        .unwrap();
    assert_eq!(wrote, 2);
    assert!(r.eof());

    db.pager.commit(&mut tx).unwrap();
    db.pager.close().unwrap();
}

#[test]
fn test_delete_range_and_rebalance() {
    let mut db = RawDb::create();
    let mut tx = db.pager.begin_txn().unwrap();

    let n = 3 * DL_CAPACITY;
    let data = pattern(n);

    let mut r = RpTree::open(None, &mut db.pager, &mut tx).unwrap();
    r.insert(&data, &mut db.pager, &mut tx).unwrap();

    // Carve a hole spanning a page boundary.
    let from = DL_CAPACITY - 100;
    let count = DL_CAPACITY + 200;
    r.seek(from as u64, &mut db.pager).unwrap();
    let removed = r
        .delete(1, count as u64, 1, &mut db.pager, &mut tx)
        .unwrap();
    assert_eq!(removed as usize, count);

    let mut expect = data[..from].to_vec();
    expect.extend_from_slice(&data[from + count..]);

    let remaining = n - count;
    let mut back = vec![0u8; remaining];
    r.seek(0, &mut db.pager).unwrap();
    let got = r
        .read(&mut back, 1, remaining as u64, 1, &mut db.pager)
        .unwrap();
    assert_eq!(got as usize, remaining);
    assert_eq!(back, expect);

    // Structure is sound and the freed pages sit on the free list.
    assert_eq!(
        r.check_integrity(true, &mut db.pager).unwrap() as usize,
        remaining
    );
    assert!(db.pager.check_free_list().unwrap() >= 1);

    db.pager.commit(&mut tx).unwrap();
    db.pager.close().unwrap();
}

#[test]
fn test_take_copies_out() {
    let mut db = RawDb::create();
    let mut tx = db.pager.begin_txn().unwrap();

    let mut r = RpTree::open(None, &mut db.pager, &mut tx).unwrap();
    r.insert(&pattern(32), &mut db.pager, &mut tx).unwrap();

    let mut taken = vec![0u8; 8];
    r.seek(4, &mut db.pager).unwrap();
    let got = r
        .take(&mut taken, 1, 8, 1, &mut db.pager, &mut tx)
        .unwrap();
    assert_eq!(got, 8);
    assert_eq!(taken, pattern(32)[4..12].to_vec());

    let mut back = vec![0u8; 24];
    r.seek(0, &mut db.pager).unwrap();
    r.read(&mut back, 1, 24, 1, &mut db.pager).unwrap();

    let mut expect = pattern(32)[..4].to_vec();
    expect.extend_from_slice(&pattern(32)[12..]);
    assert_eq!(back, expect);

    db.pager.commit(&mut tx).unwrap();
    db.pager.close().unwrap();
}

#[test]
fn test_delete_everything_leaves_empty_root() {
    let mut db = RawDb::create();
    let mut tx = db.pager.begin_txn().unwrap();

    let n = 2 * DL_CAPACITY;
    let mut r = RpTree::open(None, &mut db.pager, &mut tx).unwrap();
    r.insert(&pattern(n), &mut db.pager, &mut tx).unwrap();

    r.seek(0, &mut db.pager).unwrap();
    let removed = r.delete(1, n as u64, 1, &mut db.pager, &mut tx).unwrap();
    assert_eq!(removed as usize, n);

    let mut back = vec![0u8; 16];
    r.seek(0, &mut db.pager).unwrap();
    let got = r.read(&mut back, 1, 16, 1, &mut db.pager).unwrap();
    assert_eq!(got, 0);
    assert!(r.eof());

    assert_eq!(r.check_integrity(true, &mut db.pager).unwrap(), 0);
    db.pager.check_free_list().unwrap();

    db.pager.commit(&mut tx).unwrap();
    db.pager.close().unwrap();
}

#[test]
fn test_deleted_tree_pages_are_reused() {
    let mut db = RawDb::create();
    let mut tx = db.pager.begin_txn().unwrap();

    let r = {
        let mut r = RpTree::open(None, &mut db.pager, &mut tx).unwrap();
        r.insert(&pattern(4 * DL_CAPACITY), &mut db.pager, &mut tx)
            .unwrap();
        r
    };
    let npages_before = db.pager.npages();

    r.delete_chain(&mut db.pager, &mut tx).unwrap();

    // A new tree of the same size reuses the freed pages.
    let mut r2 = RpTree::open(None, &mut db.pager, &mut tx).unwrap();
    r2.insert(&pattern(4 * DL_CAPACITY), &mut db.pager, &mut tx)
        .unwrap();
    assert_eq!(db.pager.npages(), npages_before);

    db.pager.commit(&mut tx).unwrap();
    db.pager.close().unwrap();
}
