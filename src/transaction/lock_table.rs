use core::fmt;
use std::{
    collections::HashMap,
    sync::Mutex,
    thread::sleep,
    time::{Duration, Instant},
};

use crate::{
    config::LOCK_TIMEOUT_SECS,
    error::{DbError, ErrorKind},
    types::{DbResult, Pgno, Tid},
};

/// Logical lock names. Keys form a hierarchy:
///
/// database: Db
///   root page (page 0): Root
///     first tombstone: FirstTombstone
///     master lsn: MasterLsn
///   hash directory (page 1): HashDir
///     bucket: HashBucket(pos)
///   variable: Var(pgno)
///   rptree: RpTree(pgno)
///   tombstone: Tombstone(pgno)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockKey {
    Db,
    Root,
    FirstTombstone,
    MasterLsn,
    HashDir,
    HashBucket(u16),
    Var(Pgno),
    RpTree(Pgno),
    Tombstone(Pgno),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    S,
    X,
}

#[derive(Default)]
struct LockState {
    s_holders: HashMap<Tid, u32>,
    x_holder: Option<(Tid, u32)>,
}

impl LockState {
    fn is_free(&self) -> bool {
        self.s_holders.is_empty() && self.x_holder.is_none()
    }
}

struct Inner {
    locks: HashMap<LockKey, LockState>,

    /// Locks held per transaction, in acquisition order. Commit and
    /// rollback release in LIFO order.
    held: HashMap<Tid, Vec<(LockKey, LockMode)>>,
}

/// A single process-wide table mapping logical lock names to granted
/// shared/exclusive counts. Requests block by polling with a timeout.
pub struct LockTable {
    inner: Mutex<Inner>,
}

impl LockTable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                locks: HashMap::new(),
                held: HashMap::new(),
            }),
        }
    }

    /// Request a lock. This api is blocking; a request that cannot be
    /// granted within the timeout fails with an Io-kind error.
    pub fn lock(&self, tid: Tid, key: LockKey, mode: LockMode) -> DbResult {
        let start_time = Instant::now();
        while Instant::now().duration_since(start_time).as_secs() < LOCK_TIMEOUT_SECS {
            {
                let mut inner = self.inner.lock().unwrap();
                if Self::try_grant(&mut inner, tid, key, mode) {
                    return Ok(());
                }
            }

            sleep(Duration::from_millis(10));
        }

        let err = DbError::new(
            ErrorKind::Io,
            format!(
                "acquire lock timeout, args: {:?}, {:?}, tx_{}",
                key, mode, tid
            ),
        );
        err.show_backtrace();
        Err(err)
    }

    fn try_grant(inner: &mut Inner, tid: Tid, key: LockKey, mode: LockMode) -> bool {
        let state = inner.locks.entry(key).or_insert_with(LockState::default);

        // An X holder other than us blocks everything.
        if let Some((holder, _)) = state.x_holder {
            if holder != tid {
                return false;
            }
        }

        match mode {
            LockMode::S => {
                // Re-entrant; our own X lock subsumes S.
                if state.x_holder.is_none() {
                    *state.s_holders.entry(tid).or_insert(0) += 1;
                } else {
                    let (_, count) = state.x_holder.as_mut().unwrap();
                    *count += 1;
                }
            }
            LockMode::X => {
                // S holders other than us block an X request. Our own
                // shared grants fold into the exclusive one (sole-holder
                // upgrade).
                if state.s_holders.keys().any(|t| *t != tid) {
                    return false;
                }
                let own_s = state.s_holders.remove(&tid).unwrap_or(0);
                match state.x_holder.as_mut() {
                    Some((_, count)) => *count += 1 + own_s,
                    None => state.x_holder = Some((tid, 1 + own_s)),
                }
            }
        }

        inner.held.entry(tid).or_insert_with(Vec::new).push((key, mode));
        true
    }

    /// Upgrade S -> X. Granted once the caller is the sole S holder.
    pub fn upgrade(&self, tid: Tid, key: LockKey) -> DbResult {
        let start_time = Instant::now();
        while Instant::now().duration_since(start_time).as_secs() < LOCK_TIMEOUT_SECS {
            {
                let mut inner = self.inner.lock().unwrap();
                let state = inner.locks.entry(key).or_insert_with(LockState::default);

                let sole_s = state.s_holders.len() == 1
                    && state.s_holders.contains_key(&tid)
                    && state.x_holder.is_none();
                let already_x = matches!(state.x_holder, Some((h, _)) if h == tid);

                if already_x {
                    return Ok(());
                }
                if sole_s {
                    let count = state.s_holders.remove(&tid).unwrap();
                    state.x_holder = Some((tid, count));

                    // Rewrite the newest held entry for this key
                    if let Some(held) = inner.held.get_mut(&tid) {
                        if let Some(entry) =
                            held.iter_mut().rev().find(|(k, _)| *k == key)
                        {
                            entry.1 = LockMode::X;
                        }
                    }
                    return Ok(());
                }
            }

            sleep(Duration::from_millis(10));
        }

        let err = DbError::new(
            ErrorKind::Io,
            format!("lock upgrade timeout, args: {:?}, tx_{}", key, tid),
        );
        err.show_backtrace();
        Err(err)
    }

    fn release_one(inner: &mut Inner, tid: Tid, key: LockKey, mode: LockMode) {
        if let Some(state) = inner.locks.get_mut(&key) {
            match mode {
                LockMode::S => {
                    let mut emptied = false;
                    // An upgraded lock releases its S entries from the
                    // X grant.
                    if let Some((holder, count)) = state.x_holder.as_mut() {
                        if *holder == tid {
                            *count -= 1;
                            emptied = *count == 0;
                        }
                    }
                    if emptied {
                        state.x_holder = None;
                    } else if let Some(count) = state.s_holders.get_mut(&tid) {
                        *count -= 1;
                        if *count == 0 {
                            state.s_holders.remove(&tid);
                        }
                    }
                }
                LockMode::X => {
                    if let Some((holder, count)) = state.x_holder.as_mut() {
                        if *holder == tid {
                            *count -= 1;
                            if *count == 0 {
                                state.x_holder = None;
                            }
                        }
                    }
                }
            }

            if state.is_free() {
                inner.locks.remove(&key);
            }
        }
    }

    /// Release everything a transaction holds, newest first.
    pub fn release_all(&self, tid: Tid) {
        let mut inner = self.inner.lock().unwrap();
        let held = inner.held.remove(&tid).unwrap_or_default();
        for (key, mode) in held.into_iter().rev() {
            Self::release_one(&mut inner, tid, key, mode);
        }
    }
}

impl fmt::Debug for LockTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let inner = self.inner.lock().unwrap();
        writeln!(f, "lock table:")?;
        for (key, state) in inner.locks.iter() {
            writeln!(
                f,
                "\t{:?} -> s: {:?}, x: {:?}",
                key,
                state.s_holders.keys().collect::<Vec<_>>(),
                state.x_holder
            )?;
        }
        Ok(())
    }
}
