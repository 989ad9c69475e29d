//! Fakes for the bridge's collaborators.

use std::collections::HashSet;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::bail;

use crate::bridge::{DisplayStatus, StatusReport, StatusSink};
use crate::inhibitor::{HeldInhibitor, InhibitorGateway};
use crate::liveness::PeerLister;
use crate::notification::Notifier;
use crate::shutdown::InboundEndpoint;

/// Polls `condition` until it holds or a generous deadline passes.
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

#[derive(Default)]
struct GatewayState {
    next_id: AtomicU64,
    acquired: AtomicUsize,
    released: Mutex<Vec<u64>>,
    leaked: AtomicUsize,
    fail_acquire: AtomicBool,
    fail_release: AtomicBool,
}

/// Hands out inhibitors that record their release.
#[derive(Clone, Default)]
pub struct FakeGateway {
    state: Arc<GatewayState>,
}

impl FakeGateway {
    pub fn fail_acquire(&self, fail: bool) {
        self.state.fail_acquire.store(fail, Ordering::SeqCst);
    }

    pub fn fail_release(&self, fail: bool) {
        self.state.fail_release.store(fail, Ordering::SeqCst);
    }

    pub fn acquired(&self) -> usize {
        self.state.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.state.released.lock().unwrap().len()
    }

    /// Inhibitors that were dropped without being released.
    pub fn leaked(&self) -> usize {
        self.state.leaked.load(Ordering::SeqCst)
    }

    /// Inhibitors neither released nor leaked.
    pub fn outstanding(&self) -> usize {
        self.acquired() - self.released() - self.leaked()
    }

    pub fn duplicate_releases(&self) -> usize {
        let released = self.state.released.lock().unwrap();
        let unique: HashSet<_> = released.iter().collect();
        released.len() - unique.len()
    }
}

impl InhibitorGateway for FakeGateway {
    fn acquire(&self, _who: &str, _why: &str) -> anyhow::Result<Box<dyn HeldInhibitor>> {
        if self.state.fail_acquire.load(Ordering::SeqCst) {
            bail!("logind refused the inhibitor");
        }

        self.state.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeInhibitor {
            id: self.state.next_id.fetch_add(1, Ordering::SeqCst),
            state: self.state.clone(),
            released: false,
        }))
    }
}

struct FakeInhibitor {
    id: u64,
    state: Arc<GatewayState>,
    released: bool,
}

impl fmt::Debug for FakeInhibitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeInhibitor").field("id", &self.id).finish()
    }
}

impl HeldInhibitor for FakeInhibitor {
    fn release(mut self: Box<Self>) -> io::Result<()> {
        self.released = true;
        self.state.released.lock().unwrap().push(self.id);

        if self.state.fail_release.load(Ordering::SeqCst) {
            Err(io::Error::other("close failed"))
        } else {
            Ok(())
        }
    }
}

impl Drop for FakeInhibitor {
    fn drop(&mut self) {
        if !self.released {
            self.state.leaked.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[derive(Default)]
struct PeersState {
    live: Mutex<HashSet<String>>,
    fail: AtomicBool,
    calls: AtomicUsize,
}

#[derive(Clone)]
pub struct FakePeers {
    state: Arc<PeersState>,
}

impl FakePeers {
    pub fn new(live: &[&str]) -> Self {
        let state = PeersState {
            live: Mutex::new(live.iter().map(|name| String::from(*name)).collect()),
            ..Default::default()
        };
        Self {
            state: Arc::new(state),
        }
    }

    pub fn set(&self, live: &[&str]) {
        *self.state.live.lock().unwrap() = live.iter().map(|name| String::from(*name)).collect();
    }

    pub fn fail(&self, fail: bool) {
        self.state.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }
}

impl PeerLister for FakePeers {
    fn list_active_peers(&self) -> anyhow::Result<HashSet<String>> {
        self.state.calls.fetch_add(1, Ordering::SeqCst);
        if self.state.fail.load(Ordering::SeqCst) {
            bail!("ListNames timed out");
        }
        Ok(self.state.live.lock().unwrap().clone())
    }
}

#[derive(Clone, Default)]
pub struct RecordingSink {
    reports: Arc<Mutex<Vec<StatusReport>>>,
}

impl RecordingSink {
    pub fn displays(&self) -> Vec<DisplayStatus> {
        let reports = self.reports.lock().unwrap();
        reports.iter().map(|report| report.display).collect()
    }

    pub fn last(&self) -> Option<StatusReport> {
        self.reports.lock().unwrap().last().copied()
    }
}

impl StatusSink for RecordingSink {
    fn set_status(&self, report: &StatusReport) {
        self.reports.lock().unwrap().push(*report);
    }
}

/// Records `(message, replaces)` pairs and hands out increasing ids starting at 1.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    messages: Arc<Mutex<Vec<(String, u32)>>>,
    next_id: Arc<AtomicU32>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<(String, u32)> {
        self.messages.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, message: &str, replaces: u32) -> u32 {
        self.messages
            .lock()
            .unwrap()
            .push((String::from(message), replaces));
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Inbound endpoint that records when it was detached.
#[derive(Clone, Default)]
pub struct FakeEndpoint {
    detached: Arc<AtomicBool>,
}

impl FakeEndpoint {
    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }
}

impl InboundEndpoint for FakeEndpoint {
    fn detach(&mut self) -> anyhow::Result<()> {
        self.detached.store(true, Ordering::SeqCst);
        Ok(())
    }
}
