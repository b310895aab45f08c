mod common;

use std::path::Path;
use std::sync::Mutex;
use std::thread;

use common::{Pair, disk_pair, memory_pair, pairs, rw_create};
use libsqlvfs::lock::{Acquire, check_acquire, check_release};
use libsqlvfs::{FileRecord, LockLevel, Vfs};
use quickcheck::{Arbitrary, Gen, QuickCheck, TestResult};

#[derive(Debug, Clone, Copy)]
struct Op {
    who: usize,
    unlock: bool,
    level: LockLevel,
}

impl Arbitrary for Op {
    fn arbitrary(g: &mut Gen) -> Self {
        Op {
            who: usize::arbitrary(g) % 3,
            unlock: bool::arbitrary(g),
            level: *g.choose(&LockLevel::ALL).unwrap(),
        }
    }
}

fn apply(rec: &mut FileRecord, op: Op) -> libsqlvfs::Result<()> {
    if op.unlock {
        rec.unlock(op.level)
    } else {
        rec.lock(op.level)
    }
}

/// One record alone never meets contention, so every legal request succeeds
/// and every illegal one is rejected without moving the level.
fn single_record_follows_legal_edges(ops: Vec<Op>) -> TestResult {
    let pair = memory_pair();
    let mut rec = pair.one.open(Some(Path::new("solo.db")), rw_create()).unwrap();
    for op in ops {
        let from = rec.lock_level();
        let res = apply(&mut rec, op);
        let to = rec.lock_level();
        let expected_ok = if op.unlock {
            check_release(from, op.level).is_ok()
        } else {
            check_acquire(from, op.level).is_ok()
        };
        match res {
            Ok(()) if expected_ok => {
                let want = match (op.unlock, check_acquire(from, op.level)) {
                    (true, _) => from.min(op.level),
                    (false, Ok(Acquire::Noop)) => from,
                    (false, _) => op.level,
                };
                if to != want {
                    return TestResult::error(format!("{from:?} {op:?} landed on {to:?}"));
                }
            }
            Err(e) if !expected_ok && e.is_protocol() => {
                if to != from {
                    return TestResult::error(format!("rejected {op:?} moved {from:?} to {to:?}"));
                }
            }
            other => {
                return TestResult::error(format!("{from:?} {op:?} gave {other:?}"));
            }
        }
    }
    rec.close().unwrap();
    TestResult::passed()
}

/// Records 0 and 1 share an adapter, record 2 uses the other one. After
/// every request, no two records hold incompatible levels.
fn records_never_conflict(pair: &Pair, ops: Vec<Op>) -> TestResult {
    let path = Path::new("shared.db");
    let open = |vfs: &Vfs| vfs.open(Some(path), rw_create()).unwrap();
    let mut recs = vec![open(&pair.one), open(&pair.one), open(&pair.two)];
    for op in ops {
        let _ = apply(&mut recs[op.who], op);
        for i in 0..recs.len() {
            for j in i + 1..recs.len() {
                let (a, b) = (recs[i].lock_level(), recs[j].lock_level());
                if !a.compatible_with(b) {
                    return TestResult::error(format!(
                        "after {op:?}: record {i} at {a:?}, record {j} at {b:?}"
                    ));
                }
            }
        }
    }
    for mut rec in recs {
        rec.close().unwrap();
    }
    TestResult::passed()
}

fn memory_records_never_conflict(ops: Vec<Op>) -> TestResult {
    records_never_conflict(&memory_pair(), ops)
}

fn disk_records_never_conflict(ops: Vec<Op>) -> TestResult {
    records_never_conflict(&disk_pair(), ops)
}

#[test]
fn lock_sequences_on_one_record() {
    QuickCheck::new()
        .tests(300)
        .quickcheck(single_record_follows_legal_edges as fn(Vec<Op>) -> TestResult);
}

#[test]
fn lock_sequences_in_memory() {
    QuickCheck::new()
        .tests(300)
        .quickcheck(memory_records_never_conflict as fn(Vec<Op>) -> TestResult);
}

#[test]
fn lock_sequences_on_disk() {
    QuickCheck::new()
        .tests(50)
        .quickcheck(disk_records_never_conflict as fn(Vec<Op>) -> TestResult);
}

#[test]
fn everything_can_always_be_released() {
    let pair = memory_pair();
    let path = Path::new("drain.db");
    let mut a = pair.one.open(Some(path), rw_create()).unwrap();
    let mut b = pair.two.open(Some(path), rw_create()).unwrap();
    a.lock(LockLevel::Shared).unwrap();
    a.lock(LockLevel::Reserved).unwrap();
    a.lock(LockLevel::Pending).unwrap();
    a.lock(LockLevel::Exclusive).unwrap();
    assert!(b.lock(LockLevel::Shared).unwrap_err().is_busy());
    a.unlock(LockLevel::Unlocked).unwrap();
    b.lock(LockLevel::Shared).unwrap();
    b.lock(LockLevel::Exclusive).unwrap();
    b.unlock(LockLevel::Unlocked).unwrap();
}

/// Threads split across two adapters climb and release on one path. Each
/// publishes its level in a shared tally (raising it after a grant, lowering
/// it before a release), so the tally never overstates a holder and any
/// incompatible pair it shows is a real one.
#[test]
fn threads_never_hold_conflicting_levels() {
    const THREADS: usize = 6;
    const ROUNDS: usize = 200;

    for (kind, pair) in pairs() {
        let path = Path::new("threads.db");
        let tally = Mutex::new([LockLevel::Unlocked; THREADS]);
        thread::scope(|s| {
            for t in 0..THREADS {
                let vfs = if t % 2 == 0 { pair.one.clone() } else { pair.two.clone() };
                let tally = &tally;
                s.spawn(move || {
                    let publish = |level: LockLevel| {
                        let mut held = tally.lock().unwrap();
                        held[t] = level;
                        for (other, theirs) in held.iter().enumerate() {
                            assert!(
                                other == t || level.compatible_with(*theirs),
                                "{kind}: thread {t} at {level:?}, thread {other} at {theirs:?}"
                            );
                        }
                    };

                    let mut rec = vfs.open(Some(path), rw_create()).unwrap();
                    for round in 0..ROUNDS {
                        let goal = match (t + round) % 3 {
                            0 => LockLevel::Shared,
                            1 => LockLevel::Reserved,
                            _ => LockLevel::Exclusive,
                        };
                        for step in [LockLevel::Shared, LockLevel::Reserved, LockLevel::Exclusive] {
                            if step > goal {
                                break;
                            }
                            let res = rec.lock(step);
                            publish(rec.lock_level());
                            if let Err(e) = res {
                                assert!(e.is_busy(), "{kind}: {e}");
                                break;
                            }
                        }
                        let release = if round % 2 == 0 {
                            LockLevel::Unlocked
                        } else {
                            LockLevel::Shared
                        };
                        publish(rec.lock_level().min(release));
                        rec.unlock(release).unwrap();
                        thread::yield_now();
                    }
                    publish(LockLevel::Unlocked);
                    rec.close().unwrap();
                });
            }
        });
    }
}
