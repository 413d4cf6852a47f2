// Each integration test binary pulls this module in; not all of them
// use every helper.
#![allow(dead_code)]

use std::sync::{Arc, Once};

use seqdb::{
    hash_map::HashIndex,
    pager::Pager,
    transaction::LockTable,
};

static INIT: Once = Once::new();

pub fn setup() {
    INIT.call_once(|| {
        use env_logger::Builder;
        use std::io::Write;

        let mut builder = Builder::from_default_env();
        builder
            .format_timestamp_secs()
            .format(|buf, record| {
                writeln!(
                    buf,
                    "[{} - {}] [{}:{}] {}",
                    record.level(),
                    record.target(),
                    record.file().unwrap_or("?"),
                    record.line().unwrap_or(0),
                    record.args()
                )
            })
            .is_test(true)
            .init();
    });
}

/// A raw storage stack rooted in a scratch directory: pager + lock
/// table + variable index, opened the way the database facade does it.
pub struct RawDb {
    pub dir: tempfile::TempDir,
    pub pager: Pager,
    pub hm: HashIndex,
}

impl RawDb {
    pub fn create() -> RawDb {
        setup();
        let dir = tempfile::tempdir().unwrap();
        let (pager, hm) = RawDb::boot(&dir);
        RawDb { dir, pager, hm }
    }

    fn boot(dir: &tempfile::TempDir) -> (Pager, HashIndex) {
        let lockt = Arc::new(LockTable::new());
        let mut pager = Pager::open(
            dir.path().join("data.db"),
            Some(dir.path().join("data.wal")),
            Arc::clone(&lockt),
        )
        .unwrap();

        let mut tx = pager.begin_txn().unwrap();
        let hm = HashIndex::open(&mut pager, &mut tx).unwrap();
        pager.commit(&mut tx).unwrap();
        lockt.release_all(tx.tid());

        (pager, hm)
    }

    /// Drop everything on the floor and come back up through restart
    /// recovery.
    pub fn crash_and_reopen(self) -> RawDb {
        let RawDb { dir, pager, .. } = self;
        pager.crash();

        let (pager, hm) = RawDb::boot(&dir);
        RawDb { dir, pager, hm }
    }

    /// Clean shutdown followed by a reopen.
    pub fn reopen(self) -> RawDb {
        let RawDb { dir, mut pager, .. } = self;
        pager.close().unwrap();
        drop(pager);

        let (pager, hm) = RawDb::boot(&dir);
        RawDb { dir, pager, hm }
    }
}
