//! The Lock Table (§4.7): a wait-for graph over row UIDs with fair FIFO
//! hand-off and timestamped-DFS cycle detection.

use std::collections::{HashMap, HashSet, VecDeque};

use parking_lot::Mutex;

use ferrodb_error::{FerroError, Result};
use ferrodb_types::{Uid, Xid};

use crate::gate::Gate;

/// Outcome of `acquire`.
pub enum Acquired {
    /// The lock was free (or already held by the caller); proceed.
    NoWait,
    /// Another transaction holds the row; block on this gate until it's
    /// released, then proceed.
    Wait(Gate),
}

struct LockState {
    held: HashMap<Xid, HashSet<Uid>>,
    owner: HashMap<Uid, Xid>,
    wait_queue: HashMap<Uid, VecDeque<Xid>>,
    waiting_for: HashMap<Xid, Uid>,
    gates: HashMap<Xid, Gate>,
    stamp: u64,
}

/// Row-level pessimistic lock table with deadlock detection.
pub struct LockTable {
    state: Mutex<LockState>,
}

impl LockTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LockState {
                held: HashMap::new(),
                owner: HashMap::new(),
                wait_queue: HashMap::new(),
                waiting_for: HashMap::new(),
                gates: HashMap::new(),
                stamp: 0,
            }),
        }
    }

    /// Acquire an exclusive lock on `uid` on behalf of `xid`.
    pub fn acquire(&self, xid: Xid, uid: Uid) -> Result<Acquired> {
        let mut state = self.state.lock();

        if state.held.get(&xid).is_some_and(|uids| uids.contains(&uid)) {
            return Ok(Acquired::NoWait);
        }

        if !state.owner.contains_key(&uid) {
            state.owner.insert(uid, xid);
            state.held.entry(xid).or_default().insert(uid);
            return Ok(Acquired::NoWait);
        }

        state.waiting_for.insert(xid, uid);
        state.wait_queue.entry(uid).or_default().push_back(xid);

        if Self::has_cycle(&mut state, xid) {
            state.waiting_for.remove(&xid);
            if let Some(queue) = state.wait_queue.get_mut(&uid) {
                queue.retain(|waiter| *waiter != xid);
            }
            return Err(FerroError::Deadlock);
        }

        let gate = Gate::new();
        state.gates.insert(xid, gate.clone());
        Ok(Acquired::Wait(gate))
    }

    /// Timestamped DFS over `xid -> waiting_for[xid] -> owner[uid]`,
    /// looking for a path back to the original requester.
    fn has_cycle(state: &mut LockState, start: Xid) -> bool {
        state.stamp += 1;
        let stamp = state.stamp;
        let mut visited: HashMap<Xid, u64> = HashMap::new();
        let mut current = start;
        loop {
            let Some(&uid) = state.waiting_for.get(&current) else {
                return false;
            };
            let Some(&holder) = state.owner.get(&uid) else {
                return false;
            };
            if holder == start {
                return true;
            }
            if visited.get(&holder) == Some(&stamp) {
                return false; // converges on an already-walked node, no cycle through `start`.
            }
            visited.insert(holder, stamp);
            current = holder;
        }
    }

    /// Release every row held by `xid`, handing each off FIFO to the next
    /// waiter (if any).
    pub fn release_all(&self, xid: Xid) {
        let mut state = self.state.lock();
        let Some(uids) = state.held.remove(&xid) else {
            state.waiting_for.remove(&xid);
            state.gates.remove(&xid);
            return;
        };

        for uid in uids {
            state.owner.remove(&uid);
            let next = state
                .wait_queue
                .get_mut(&uid)
                .and_then(VecDeque::pop_front);
            if let Some(next_xid) = next {
                state.owner.insert(uid, next_xid);
                state.held.entry(next_xid).or_default().insert(uid);
                state.waiting_for.remove(&next_xid);
                if let Some(gate) = state.gates.remove(&next_xid) {
                    gate.open();
                }
            } else {
                state.wait_queue.remove(&uid);
            }
        }
        state.waiting_for.remove(&xid);
        state.gates.remove(&xid);
    }
}

impl Default for LockTable {
    fn default() -> Self {
        Self::new()
    }
}
