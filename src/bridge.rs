//! The bridge facade.
//!
//! Inbound requests, liveness ticks and manual inhibit transitions all go through [`Bridge`], which
//! owns the registry and keeps the status display up to date.

use std::collections::HashSet;
use std::sync::Mutex;

use crate::registry::{Owner, Registry, RequestError, Summary};

/// What the status display shows.
///
/// A manual inhibit takes precedence over locks placed by peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayStatus {
    Uninhibited,
    AutoInhibited,
    ManuallyInhibited,
}

impl DisplayStatus {
    pub fn from_summary(summary: Summary) -> Self {
        if summary.local {
            Self::ManuallyInhibited
        } else if summary.locks > 0 {
            Self::AutoInhibited
        } else {
            Self::Uninhibited
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusReport {
    pub display: DisplayStatus,
    pub locks: usize,
    pub manual: bool,
}

impl StatusReport {
    pub fn title(&self, prog: &str) -> String {
        format!(
            "{prog}: {} inhibits (manual: {})",
            self.locks, self.manual
        )
    }
}

impl From<Summary> for StatusReport {
    fn from(summary: Summary) -> Self {
        Self {
            display: DisplayStatus::from_summary(summary),
            locks: summary.locks,
            manual: summary.local,
        }
    }
}

/// Receives status changes, e.g. to update an indicator.
///
/// Called outside the registry lock, but must not block for long.
pub trait StatusSink: Send + Sync {
    fn set_status(&self, report: &StatusReport);
}

pub struct Bridge {
    registry: Registry,
    sink: Box<dyn StatusSink>,
    shown: Mutex<Option<StatusReport>>,
}

impl Bridge {
    pub fn new(registry: Registry, sink: Box<dyn StatusSink>) -> Self {
        let bridge = Self {
            registry,
            sink,
            shown: Mutex::new(None),
        };
        bridge.refresh_status();
        bridge
    }

    pub fn inhibit(&self, owner: Owner, who: &str, why: &str) -> Result<u32, RequestError> {
        let cookie = self.registry.add(owner, who, why)?;
        self.refresh_status();
        Ok(cookie)
    }

    pub fn un_inhibit(&self, owner: &Owner, cookie: u32) -> Result<(), RequestError> {
        let res = self.registry.remove(owner, cookie);

        // A failed release still removes the lock.
        if matches!(res, Ok(()) | Err(RequestError::ReleaseFailed { .. })) {
            self.refresh_status();
        }

        res
    }

    /// Whether any lock is held by a peer, as opposed to the bridge itself.
    pub fn has_peer_locks(&self) -> bool {
        self.registry
            .snapshot()
            .iter()
            .any(|(_, owner)| *owner != Owner::Local)
    }

    /// Reclaims the locks of every peer missing from `live`.
    ///
    /// Returns the number of reclaimed locks.
    pub fn tick(&self, live: &HashSet<String>) -> usize {
        let orphaned = self.registry.take_orphaned(live);
        let count = orphaned.len();

        for lock in orphaned {
            info!("missing peer {}; dropping {lock}", lock.owner);
            if let Err(err) = lock.release() {
                warn!("error reclaiming lock: {err:?}");
            }
        }

        if count > 0 {
            self.refresh_status();
        }

        count
    }

    /// Removes and releases every remaining lock, including the manual one.
    pub fn release_all(&self) -> usize {
        let locks = self.registry.take_all();
        let count = locks.len();

        for lock in locks {
            debug!("releasing at shutdown: {lock}");
            if let Err(err) = lock.release() {
                warn!("error releasing lock at shutdown: {err:?}");
            }
        }

        self.refresh_status();
        count
    }

    pub fn status(&self) -> StatusReport {
        StatusReport::from(self.registry.summary())
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    fn refresh_status(&self) {
        // Computed under the display lock, so the last report to reach the sink is the latest.
        let mut shown = self.shown.lock().unwrap();
        let report = self.status();
        if *shown != Some(report) {
            trace!("status: {report:?}");
            self.sink.set_status(&report);
            *shown = Some(report);
        }
    }
}
