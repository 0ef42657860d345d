//! Record-level locking under strict two-phase locking, with a background
//! thread that breaks deadlocks.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, warn};
use parking_lot::{Condvar, Mutex, MutexGuard};
use thiserror::Error;

use crate::common::types::{Rid, TxnId};
use crate::transaction::concurrency::transaction::{IsolationLevel, Transaction, TransactionState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error("Transaction {0} requested a lock while shrinking")]
    LockOnShrinking(TxnId),

    #[error("Transaction {0} requested a shared lock under read uncommitted")]
    SharedOnReadUncommitted(TxnId),

    #[error("Transaction {0} tried to upgrade a lock on {1} it does not share")]
    UpgradeWithoutShared(TxnId, Rid),

    #[error("Transaction {0} does not hold a lock on {1}")]
    LockNotHeld(TxnId, Rid),

    #[error("Transaction {0} is not active")]
    TransactionNotActive(TxnId),

    #[error("Transaction {0} was chosen as a deadlock victim")]
    Deadlock(TxnId),
}

pub type Result<T> = std::result::Result<T, LockError>;

/// Which transaction in a cycle is aborted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VictimPolicy {
    /// Highest transaction id
    #[default]
    Youngest,
    /// Lowest transaction id
    Oldest,
}

impl VictimPolicy {
    fn choose(self, cycle: &[TxnId]) -> Option<TxnId> {
        match self {
            VictimPolicy::Youngest => cycle.iter().copied().max(),
            VictimPolicy::Oldest => cycle.iter().copied().min(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LockManagerConfig {
    pub cycle_detection_interval: Duration,
    pub victim_policy: VictimPolicy,
}

impl Default for LockManagerConfig {
    fn default() -> Self {
        Self {
            cycle_detection_interval: Duration::from_millis(50),
            victim_policy: VictimPolicy::Youngest,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct LockRequest {
    txn_id: TxnId,
    mode: LockMode,
    granted: bool,
}

#[derive(Debug, Default)]
struct QueueState {
    /// FIFO; granted requests always form a prefix
    requests: Vec<LockRequest>,
    /// Transaction with an upgrade in flight
    upgrading: Option<TxnId>,
    /// Transactions waiting for the in-flight upgrade to finish
    upgrade_waiters: Vec<TxnId>,
}

impl QueueState {
    fn granted_prefix(&self) -> usize {
        self.requests.iter().take_while(|r| r.granted).count()
    }

    fn pending_index(&self, txn_id: TxnId) -> Option<usize> {
        self.requests.iter().position(|r| r.txn_id == txn_id && !r.granted)
    }

    fn grantable(&self, idx: usize) -> bool {
        let request = &self.requests[idx];
        let earlier = &self.requests[..idx];
        match request.mode {
            LockMode::Shared => earlier.iter().all(|r| r.granted && r.mode == LockMode::Shared),
            LockMode::Exclusive => earlier.iter().all(|r| r.txn_id == request.txn_id),
        }
    }

    /// Remove the granted request of `txn_id`, if any
    fn remove_granted(&mut self, txn_id: TxnId) -> Option<LockMode> {
        let idx = self.requests.iter().position(|r| r.txn_id == txn_id && r.granted)?;
        Some(self.requests.remove(idx).mode)
    }

    fn is_idle(&self) -> bool {
        self.requests.is_empty() && self.upgrading.is_none() && self.upgrade_waiters.is_empty()
    }
}

#[derive(Debug, Default)]
struct LockRequestQueue {
    state: Mutex<QueueState>,
    cv: Condvar,
}

struct LockTable {
    queues: Mutex<HashMap<Rid, Arc<LockRequestQueue>>>,
    /// Transactions picked by the detector that have not noticed yet.
    /// Lock order: a queue's state before this set.
    victims: Mutex<HashSet<TxnId>>,
    victim_policy: VictimPolicy,
}

/// Lock manager handing out shared and exclusive record locks
pub struct LockManager {
    table: Arc<LockTable>,
    shutdown: Mutex<Option<Sender<()>>>,
    detector: Mutex<Option<JoinHandle<()>>>,
}

impl LockManager {
    /// Create a lock manager and start its deadlock detector
    pub fn new(config: LockManagerConfig) -> std::io::Result<Self> {
        let table = Arc::new(LockTable {
            queues: Mutex::new(HashMap::new()),
            victims: Mutex::new(HashSet::new()),
            victim_policy: config.victim_policy,
        });

        let (shutdown_tx, shutdown_rx) = bounded(1);
        let detector_table = Arc::clone(&table);
        let interval = config.cycle_detection_interval;
        let handle = thread::Builder::new()
            .name("keeldb-deadlock-detector".to_string())
            .spawn(move || run_detector(detector_table, shutdown_rx, interval))?;

        Ok(Self {
            table,
            shutdown: Mutex::new(Some(shutdown_tx)),
            detector: Mutex::new(Some(handle)),
        })
    }

    pub fn lock_shared(&self, txn: &Transaction, rid: Rid) -> Result<()> {
        check_can_lock(txn)?;
        if txn.isolation_level() == IsolationLevel::ReadUncommitted {
            return Err(LockError::SharedOnReadUncommitted(txn.id()));
        }
        if txn.is_shared_locked(&rid) || txn.is_exclusive_locked(&rid) {
            return Ok(());
        }

        let queue = self.table.queue(rid);
        let mut state = queue.state.lock();
        state.requests.push(LockRequest {
            txn_id: txn.id(),
            mode: LockMode::Shared,
            granted: false,
        });
        self.table.wait_for_grant(txn, &queue, &mut state)?;
        drop(state);

        txn.add_shared_lock(rid);
        Ok(())
    }

    /// Take an exclusive lock. A transaction holding the shared lock on
    /// `rid` upgrades it instead.
    pub fn lock_exclusive(&self, txn: &Transaction, rid: Rid) -> Result<()> {
        check_can_lock(txn)?;
        if txn.is_exclusive_locked(&rid) {
            return Ok(());
        }
        if txn.is_shared_locked(&rid) {
            return self.lock_upgrade(txn, rid);
        }

        let queue = self.table.queue(rid);
        let mut state = queue.state.lock();
        state.requests.push(LockRequest {
            txn_id: txn.id(),
            mode: LockMode::Exclusive,
            granted: false,
        });
        self.table.wait_for_grant(txn, &queue, &mut state)?;
        drop(state);

        txn.add_exclusive_lock(rid);
        Ok(())
    }

    /// Turn a held shared lock into an exclusive one. Only one upgrade per
    /// record runs at a time; a second upgrader waits for the first.
    pub fn lock_upgrade(&self, txn: &Transaction, rid: Rid) -> Result<()> {
        check_can_lock(txn)?;
        if txn.is_exclusive_locked(&rid) {
            return Ok(());
        }
        if !txn.is_shared_locked(&rid) {
            return Err(LockError::UpgradeWithoutShared(txn.id(), rid));
        }

        let queue = self.table.queue(rid);
        let mut state = queue.state.lock();

        while state.upgrading.is_some_and(|id| id != txn.id()) {
            state.upgrade_waiters.push(txn.id());
            let aborted = self.table.take_victim(txn.id());
            if !aborted {
                queue.cv.wait(&mut state);
            }
            if let Some(pos) = state.upgrade_waiters.iter().position(|&id| id == txn.id()) {
                state.upgrade_waiters.remove(pos);
            }
            if aborted || self.table.take_victim(txn.id()) {
                txn.set_state(TransactionState::Aborted);
                warn!("Transaction {} aborted as deadlock victim while upgrading {}", txn.id(), rid);
                return Err(LockError::Deadlock(txn.id()));
            }
        }

        state.upgrading = Some(txn.id());
        let insert_at = state.granted_prefix();
        state.requests.insert(
            insert_at,
            LockRequest {
                txn_id: txn.id(),
                mode: LockMode::Exclusive,
                granted: false,
            },
        );

        let result = self.table.wait_for_grant(txn, &queue, &mut state);
        state.upgrading = None;
        if result.is_ok() {
            // The exclusive request now stands in for the shared one
            if let Some(idx) = state
                .requests
                .iter()
                .position(|r| r.txn_id == txn.id() && r.granted && r.mode == LockMode::Shared)
            {
                state.requests.remove(idx);
            }
        }
        queue.cv.notify_all();
        drop(state);
        result?;

        txn.remove_shared_lock(&rid);
        txn.add_exclusive_lock(rid);
        Ok(())
    }

    /// Release one lock. A growing transaction starts shrinking, except
    /// when it drops a shared lock under read committed.
    pub fn unlock(&self, txn: &Transaction, rid: Rid) -> Result<()> {
        let mode = self
            .table
            .release(txn.id(), rid)
            .ok_or(LockError::LockNotHeld(txn.id(), rid))?;

        match mode {
            LockMode::Shared => txn.remove_shared_lock(&rid),
            LockMode::Exclusive => txn.remove_exclusive_lock(&rid),
        };

        let keeps_growing = mode == LockMode::Shared && txn.isolation_level() == IsolationLevel::ReadCommitted;
        if !keeps_growing && txn.state() == TransactionState::Growing {
            txn.set_state(TransactionState::Shrinking);
        }
        Ok(())
    }

    /// Release every lock held by `txn` without changing its state
    pub fn release_all(&self, txn: &Transaction) {
        for rid in txn.take_all_locks() {
            self.table.release(txn.id(), rid);
        }
        self.table.victims.lock().remove(&txn.id());
    }

    /// Run one round of deadlock detection now and return the victims
    pub fn detect_deadlocks(&self) -> Vec<TxnId> {
        self.table.detect_and_break()
    }

    /// Number of records with a live request queue
    pub fn locked_record_count(&self) -> usize {
        self.table.queues.lock().len()
    }

    /// Stop the deadlock detector. Called on drop.
    pub fn shutdown(&self) {
        drop(self.shutdown.lock().take());
        if let Some(handle) = self.detector.lock().take() {
            if handle.join().is_err() {
                error!("Deadlock detector thread panicked");
            }
        }
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn check_can_lock(txn: &Transaction) -> Result<()> {
    match txn.state() {
        TransactionState::Growing => Ok(()),
        TransactionState::Shrinking => Err(LockError::LockOnShrinking(txn.id())),
        TransactionState::Committed | TransactionState::Aborted => {
            Err(LockError::TransactionNotActive(txn.id()))
        }
    }
}

impl LockTable {
    fn queue(&self, rid: Rid) -> Arc<LockRequestQueue> {
        Arc::clone(self.queues.lock().entry(rid).or_default())
    }

    fn take_victim(&self, txn_id: TxnId) -> bool {
        self.victims.lock().remove(&txn_id)
    }

    /// Block until the pending request of `txn` is granted or the detector
    /// picks it as a victim
    fn wait_for_grant(
        &self,
        txn: &Transaction,
        queue: &LockRequestQueue,
        state: &mut MutexGuard<'_, QueueState>,
    ) -> Result<()> {
        loop {
            let Some(idx) = state.pending_index(txn.id()) else {
                return Ok(());
            };

            if state.grantable(idx) {
                // Every earlier request is granted, so the prefix stays contiguous
                state.requests[idx].granted = true;
                self.victims.lock().remove(&txn.id());
                return Ok(());
            }

            if self.take_victim(txn.id()) {
                state.requests.remove(idx);
                queue.cv.notify_all();
                txn.set_state(TransactionState::Aborted);
                warn!("Transaction {} aborted as deadlock victim", txn.id());
                return Err(LockError::Deadlock(txn.id()));
            }

            queue.cv.wait(state);
        }
    }

    /// Remove the granted request of `txn_id` on `rid` and wake waiters
    fn release(&self, txn_id: TxnId, rid: Rid) -> Option<LockMode> {
        let queue = self.queues.lock().get(&rid).cloned()?;
        let mode = {
            let mut state = queue.state.lock();
            let mode = state.remove_granted(txn_id);
            queue.cv.notify_all();
            mode
        };
        drop(queue);
        self.prune(rid);
        mode
    }

    /// Drop the queue for `rid` when nobody uses it
    fn prune(&self, rid: Rid) {
        let mut queues = self.queues.lock();
        let idle = match queues.get(&rid) {
            Some(queue) => Arc::strong_count(queue) == 1 && queue.state.lock().is_idle(),
            None => false,
        };
        if idle {
            queues.remove(&rid);
        }
    }

    /// Build the wait-for graph, abort one victim per cycle and wake the
    /// victims so they can back out
    fn detect_and_break(&self) -> Vec<TxnId> {
        let (mut graph, waiting_on) = self.wait_for_graph();

        let mut victims = Vec::new();
        while let Some(cycle) = find_cycle(&graph) {
            let Some(victim) = self.victim_policy.choose(&cycle) else {
                break;
            };
            debug!("Deadlock cycle {:?}, victim {}", cycle, victim);
            graph.remove(&victim);
            for edges in graph.values_mut() {
                edges.remove(&victim);
            }
            victims.push(victim);
        }

        self.flag_victims(victims, &waiting_on)
    }

    /// Snapshot of who waits for whom, with the queue each waiter sleeps on.
    /// Queues are locked one at a time, so the graph can be stale.
    fn wait_for_graph(&self) -> (BTreeMap<TxnId, BTreeSet<TxnId>>, HashMap<TxnId, Arc<LockRequestQueue>>) {
        let queues: Vec<Arc<LockRequestQueue>> = self.queues.lock().values().cloned().collect();

        let mut graph: BTreeMap<TxnId, BTreeSet<TxnId>> = BTreeMap::new();
        let mut waiting_on: HashMap<TxnId, Arc<LockRequestQueue>> = HashMap::new();

        for queue in &queues {
            let state = queue.state.lock();
            for (idx, request) in state.requests.iter().enumerate() {
                if request.granted {
                    continue;
                }
                let edges = graph.entry(request.txn_id).or_default();
                for earlier in &state.requests[..idx] {
                    if earlier.txn_id == request.txn_id {
                        continue;
                    }
                    let compatible = request.mode == LockMode::Shared
                        && earlier.mode == LockMode::Shared
                        && earlier.granted;
                    if !compatible {
                        edges.insert(earlier.txn_id);
                    }
                }
                waiting_on.insert(request.txn_id, Arc::clone(queue));
            }

            if let Some(upgrader) = state.upgrading {
                for &waiter in &state.upgrade_waiters {
                    graph.entry(waiter).or_default().insert(upgrader);
                    waiting_on.insert(waiter, Arc::clone(queue));
                }
            }
        }

        (graph, waiting_on)
    }

    /// Flag each victim that is still waiting where the snapshot saw it.
    /// A transaction granted in the meantime is left alone; the next round
    /// rebuilds the graph if the cycle is still there.
    fn flag_victims(&self, victims: Vec<TxnId>, waiting_on: &HashMap<TxnId, Arc<LockRequestQueue>>) -> Vec<TxnId> {
        let mut flagged = Vec::new();
        for victim in victims {
            let Some(queue) = waiting_on.get(&victim) else {
                continue;
            };
            let state = queue.state.lock();
            let still_waiting = state.pending_index(victim).is_some() || state.upgrade_waiters.contains(&victim);
            if !still_waiting {
                debug!("Transaction {} stopped waiting before it was flagged", victim);
                continue;
            }
            self.victims.lock().insert(victim);
            queue.cv.notify_all();
            flagged.push(victim);
        }
        flagged
    }
}

/// First cycle found by a depth-first search in ascending id order
fn find_cycle(graph: &BTreeMap<TxnId, BTreeSet<TxnId>>) -> Option<Vec<TxnId>> {
    let mut visited = HashSet::new();
    for &start in graph.keys() {
        if visited.contains(&start) {
            continue;
        }
        let mut path = Vec::new();
        if let Some(cycle) = dfs(graph, start, &mut visited, &mut path) {
            return Some(cycle);
        }
    }
    None
}

fn dfs(
    graph: &BTreeMap<TxnId, BTreeSet<TxnId>>,
    node: TxnId,
    visited: &mut HashSet<TxnId>,
    path: &mut Vec<TxnId>,
) -> Option<Vec<TxnId>> {
    visited.insert(node);
    path.push(node);

    if let Some(edges) = graph.get(&node) {
        for &next in edges {
            if let Some(pos) = path.iter().position(|&id| id == next) {
                return Some(path[pos..].to_vec());
            }
            if !visited.contains(&next) {
                if let Some(cycle) = dfs(graph, next, visited, path) {
                    return Some(cycle);
                }
            }
        }
    }

    path.pop();
    None
}

fn run_detector(table: Arc<LockTable>, shutdown: Receiver<()>, interval: Duration) {
    loop {
        match shutdown.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {
                let victims = table.detect_and_break();
                if !victims.is_empty() {
                    debug!("Deadlock detector aborted {:?}", victims);
                }
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}
