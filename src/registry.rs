//! Registry of outstanding inhibit locks.
//!
//! Every lock holds an inhibitor acquired from the gateway. A lock leaves the map and has its
//! inhibitor released as one step, so nobody ever observes an entry whose inhibitor is gone.
//!
//! The map is guarded by a single mutex. Gateway calls (acquiring and releasing inhibitors) always
//! happen with the mutex unlocked.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::io;
use std::sync::Mutex;

use crate::inhibitor::{HeldInhibitor, InhibitorGateway};

/// Who placed a lock.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Owner {
    /// The bridge itself, for the manual inhibit. Always considered alive.
    Local,
    /// A client on the bus, identified by its unique name.
    Peer(String),
}

impl Owner {
    pub fn peer(name: impl Into<String>) -> Self {
        Self::Peer(name.into())
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Owner::Local => f.write_str("self"),
            Owner::Peer(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("error acquiring inhibitor: {0:#}")]
    AcquisitionFailed(anyhow::Error),
    #[error("{0} is an invalid cookie")]
    NotFound(u32),
    #[error("{owner} is not the originating peer for cookie {cookie}")]
    PermissionDenied { cookie: u32, owner: Owner },
    #[error("error releasing inhibitor for cookie {cookie}")]
    ReleaseFailed {
        cookie: u32,
        #[source]
        source: io::Error,
    },
}

/// One outstanding inhibition.
#[derive(Debug)]
pub struct Lock {
    pub cookie: u32,
    pub owner: Owner,
    pub who: String,
    pub why: String,
    inhibitor: Box<dyn HeldInhibitor>,
}

impl Lock {
    /// Releases the underlying inhibitor.
    pub fn release(self) -> Result<(), RequestError> {
        let cookie = self.cookie;
        trace!("releasing {self}");
        self.inhibitor
            .release()
            .map_err(|source| RequestError::ReleaseFailed { cookie, source })
    }
}

impl fmt::Display for Lock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} / {:?} ({}, {})",
            self.who, self.why, self.owner, self.cookie
        )
    }
}

/// Counts used to derive the display status.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    /// Number of locks, including the local one.
    pub locks: usize,
    /// Whether the local (manual) lock is present.
    pub local: bool,
}

pub struct Registry {
    gateway: Box<dyn InhibitorGateway>,
    locks: Mutex<Locks>,
}

struct Locks {
    map: HashMap<u32, Lock>,
    rng: fastrand::Rng,
}

impl Locks {
    fn vacant_cookie(&mut self) -> u32 {
        // Start from 1 because some clients don't like 0.
        loop {
            let cookie = self.rng.u32(1..);
            if !self.map.contains_key(&cookie) {
                return cookie;
            }
        }
    }

    fn summary(&self) -> Summary {
        Summary {
            locks: self.map.len(),
            local: self.map.values().any(|lock| lock.owner == Owner::Local),
        }
    }
}

impl Registry {
    pub fn new(gateway: Box<dyn InhibitorGateway>) -> Self {
        Self::with_rng(gateway, fastrand::Rng::new())
    }

    pub fn with_rng(gateway: Box<dyn InhibitorGateway>, rng: fastrand::Rng) -> Self {
        Self {
            gateway,
            locks: Mutex::new(Locks {
                map: HashMap::new(),
                rng,
            }),
        }
    }

    /// Acquires an inhibitor and records it under a fresh cookie.
    pub fn add(&self, owner: Owner, who: &str, why: &str) -> Result<u32, RequestError> {
        let inhibitor = self
            .gateway
            .acquire(who, why)
            .map_err(RequestError::AcquisitionFailed)?;

        let mut locks = self.locks.lock().unwrap();
        let cookie = locks.vacant_cookie();
        let lock = Lock {
            cookie,
            owner,
            who: who.to_owned(),
            why: why.to_owned(),
            inhibitor,
        };
        debug!("inhibit: {lock}");
        locks.map.insert(cookie, lock);

        Ok(cookie)
    }

    /// Removes a lock on behalf of `owner`.
    ///
    /// The entry is gone even when releasing its inhibitor fails.
    pub fn remove(&self, owner: &Owner, cookie: u32) -> Result<(), RequestError> {
        let lock = {
            let mut locks = self.locks.lock().unwrap();
            let entry = match locks.map.entry(cookie) {
                Entry::Occupied(entry) => entry,
                Entry::Vacant(_) => return Err(RequestError::NotFound(cookie)),
            };

            if entry.get().owner != *owner {
                return Err(RequestError::PermissionDenied {
                    cookie,
                    owner: owner.clone(),
                });
            }

            entry.remove()
        };

        debug!("uninhibit: {lock}");
        lock.release()
    }

    /// Removes every lock held by a peer that is not in `live`.
    ///
    /// The local lock is never touched. Returned locks still hold their inhibitors; the caller
    /// releases them after the registry is unlocked.
    pub fn take_orphaned(&self, live: &HashSet<String>) -> Vec<Lock> {
        let mut locks = self.locks.lock().unwrap();

        let orphaned: Vec<u32> = locks
            .map
            .values()
            .filter(|lock| match &lock.owner {
                Owner::Local => false,
                Owner::Peer(name) => !live.contains(name),
            })
            .map(|lock| lock.cookie)
            .collect();

        orphaned
            .into_iter()
            .filter_map(|cookie| locks.map.remove(&cookie))
            .collect()
    }

    /// Removes every lock regardless of owner.
    pub fn take_all(&self) -> Vec<Lock> {
        let mut locks = self.locks.lock().unwrap();
        locks.map.drain().map(|(_, lock)| lock).collect()
    }

    /// Cookies and owners of the current locks.
    pub fn snapshot(&self) -> Vec<(u32, Owner)> {
        let locks = self.locks.lock().unwrap();
        let mut snapshot: Vec<_> = locks
            .map
            .values()
            .map(|lock| (lock.cookie, lock.owner.clone()))
            .collect();
        snapshot.sort_unstable_by_key(|(cookie, _)| *cookie);
        snapshot
    }

    pub fn summary(&self) -> Summary {
        self.locks.lock().unwrap().summary()
    }

    pub fn len(&self) -> usize {
        self.locks.lock().unwrap().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
