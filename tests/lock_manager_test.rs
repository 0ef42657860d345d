use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use crossbeam::channel;

use keeldb::common::types::Rid;
use keeldb::transaction::{
    IsolationLevel, LockError, LockManager, LockManagerConfig, Transaction, TransactionState, VictimPolicy,
};

fn lock_manager(policy: VictimPolicy) -> Result<Arc<LockManager>> {
    Ok(Arc::new(LockManager::new(LockManagerConfig {
        cycle_detection_interval: Duration::from_millis(10),
        victim_policy: policy,
    })?))
}

fn txn(id: u32) -> Arc<Transaction> {
    Arc::new(Transaction::new(id, IsolationLevel::RepeatableRead))
}

#[test]
fn test_shared_locks_are_compatible() -> Result<()> {
    let lm = lock_manager(VictimPolicy::Youngest)?;
    let rid = Rid::new(1, 1);
    let (t1, t2) = (txn(1), txn(2));

    lm.lock_shared(&t1, rid)?;
    lm.lock_shared(&t2, rid)?;
    assert!(t1.is_shared_locked(&rid));
    assert!(t2.is_shared_locked(&rid));

    lm.release_all(&t1);
    lm.release_all(&t2);
    assert_eq!(lm.locked_record_count(), 0);
    Ok(())
}

#[test]
fn test_exclusive_blocks_until_release() -> Result<()> {
    let lm = lock_manager(VictimPolicy::Youngest)?;
    let rid = Rid::new(1, 1);
    let (t1, t2) = (txn(1), txn(2));
    lm.lock_exclusive(&t1, rid)?;

    let (tx, rx) = channel::unbounded();
    let handle = {
        let lm = Arc::clone(&lm);
        let t2 = Arc::clone(&t2);
        thread::spawn(move || {
            let result = lm.lock_shared(&t2, rid);
            let _ = tx.send(());
            result
        })
    };

    // Still waiting while t1 holds the exclusive lock
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

    lm.release_all(&t1);
    rx.recv_timeout(Duration::from_secs(5))?;
    handle.join().expect("reader thread panicked")?;
    assert!(t2.is_shared_locked(&rid));
    Ok(())
}

#[test]
fn test_writer_waits_for_all_readers() -> Result<()> {
    let lm = lock_manager(VictimPolicy::Youngest)?;
    let rid = Rid::new(2, 0);
    let (t1, t2, t3) = (txn(1), txn(2), txn(3));
    lm.lock_shared(&t1, rid)?;
    lm.lock_shared(&t2, rid)?;

    let (tx, rx) = channel::unbounded();
    let handle = {
        let lm = Arc::clone(&lm);
        let t3 = Arc::clone(&t3);
        thread::spawn(move || {
            let result = lm.lock_exclusive(&t3, rid);
            let _ = tx.send(());
            result
        })
    };

    lm.release_all(&t1);
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    lm.release_all(&t2);
    rx.recv_timeout(Duration::from_secs(5))?;
    handle.join().expect("writer thread panicked")?;
    assert!(t3.is_exclusive_locked(&rid));
    Ok(())
}

#[test]
fn test_two_transaction_deadlock_aborts_youngest() -> Result<()> {
    let lm = lock_manager(VictimPolicy::Youngest)?;
    let (a, b) = (Rid::new(1, 0), Rid::new(1, 1));
    let (t1, t2) = (txn(1), txn(2));
    lm.lock_exclusive(&t1, a)?;
    lm.lock_exclusive(&t2, b)?;

    let spawn_waiter = |t: Arc<Transaction>, rid: Rid| {
        let lm = Arc::clone(&lm);
        thread::spawn(move || {
            let result = lm.lock_exclusive(&t, rid);
            if result.is_err() {
                // A victim gives up everything so the survivor can proceed
                lm.release_all(&t);
            }
            result
        })
    };
    let h1 = spawn_waiter(Arc::clone(&t1), b);
    let h2 = spawn_waiter(Arc::clone(&t2), a);

    let r1 = h1.join().expect("t1 panicked");
    let r2 = h2.join().expect("t2 panicked");

    assert!(r1.is_ok());
    assert_eq!(r2, Err(LockError::Deadlock(2)));
    assert_eq!(t2.state(), TransactionState::Aborted);
    assert!(t1.is_exclusive_locked(&b));
    Ok(())
}

#[test]
fn test_oldest_victim_policy() -> Result<()> {
    let lm = lock_manager(VictimPolicy::Oldest)?;
    let (a, b) = (Rid::new(3, 0), Rid::new(3, 1));
    let (t1, t2) = (txn(1), txn(2));
    lm.lock_exclusive(&t1, a)?;
    lm.lock_exclusive(&t2, b)?;

    let spawn_waiter = |t: Arc<Transaction>, rid: Rid| {
        let lm = Arc::clone(&lm);
        thread::spawn(move || {
            let result = lm.lock_exclusive(&t, rid);
            if result.is_err() {
                lm.release_all(&t);
            }
            result
        })
    };
    let h1 = spawn_waiter(Arc::clone(&t1), b);
    let h2 = spawn_waiter(Arc::clone(&t2), a);

    assert_eq!(h1.join().expect("t1 panicked"), Err(LockError::Deadlock(1)));
    assert!(h2.join().expect("t2 panicked").is_ok());
    Ok(())
}

#[test]
fn test_protocol_errors() -> Result<()> {
    let lm = lock_manager(VictimPolicy::Youngest)?;
    let rid = Rid::new(4, 0);

    let dirty_reader = Transaction::new(1, IsolationLevel::ReadUncommitted);
    assert_eq!(lm.lock_shared(&dirty_reader, rid), Err(LockError::SharedOnReadUncommitted(1)));

    let t2 = txn(2);
    assert_eq!(lm.lock_upgrade(&t2, rid), Err(LockError::UpgradeWithoutShared(2, rid)));
    assert_eq!(lm.unlock(&t2, rid), Err(LockError::LockNotHeld(2, rid)));

    // Two-phase: no new locks once shrinking
    lm.lock_shared(&t2, rid)?;
    lm.unlock(&t2, rid)?;
    assert_eq!(t2.state(), TransactionState::Shrinking);
    assert_eq!(lm.lock_shared(&t2, Rid::new(4, 1)), Err(LockError::LockOnShrinking(2)));
    Ok(())
}

#[test]
fn test_upgrade_waits_for_other_readers() -> Result<()> {
    let lm = lock_manager(VictimPolicy::Youngest)?;
    let rid = Rid::new(5, 0);
    let (t1, t2) = (txn(1), txn(2));
    lm.lock_shared(&t1, rid)?;
    lm.lock_shared(&t2, rid)?;

    let (tx, rx) = channel::unbounded();
    let handle = {
        let lm = Arc::clone(&lm);
        let t1 = Arc::clone(&t1);
        thread::spawn(move || {
            let result = lm.lock_upgrade(&t1, rid);
            let _ = tx.send(());
            result
        })
    };

    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    lm.release_all(&t2);
    rx.recv_timeout(Duration::from_secs(5))?;
    handle.join().expect("upgrader panicked")?;

    assert!(t1.is_exclusive_locked(&rid));
    assert!(!t1.is_shared_locked(&rid));
    Ok(())
}

#[test]
fn test_concurrent_upgrades_deadlock() -> Result<()> {
    let lm = lock_manager(VictimPolicy::Youngest)?;
    let rid = Rid::new(6, 0);
    let (t1, t2) = (txn(1), txn(2));
    lm.lock_shared(&t1, rid)?;
    lm.lock_shared(&t2, rid)?;

    // Each upgrade needs the other's shared lock gone
    let spawn_upgrader = |t: Arc<Transaction>| {
        let lm = Arc::clone(&lm);
        thread::spawn(move || {
            let result = lm.lock_exclusive(&t, rid);
            if result.is_err() {
                lm.release_all(&t);
            }
            result
        })
    };
    let h1 = spawn_upgrader(Arc::clone(&t1));
    thread::sleep(Duration::from_millis(20));
    let h2 = spawn_upgrader(Arc::clone(&t2));

    let r1 = h1.join().expect("t1 panicked");
    let r2 = h2.join().expect("t2 panicked");

    assert!(r1.is_ok());
    assert_eq!(r2, Err(LockError::Deadlock(2)));
    assert_eq!(t2.state(), TransactionState::Aborted);
    assert!(t1.is_exclusive_locked(&rid));
    assert!(!t1.is_shared_locked(&rid));
    assert!(!t2.is_shared_locked(&rid));

    lm.release_all(&t1);
    assert_eq!(lm.locked_record_count(), 0);
    Ok(())
}
