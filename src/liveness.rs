//! Periodic reclamation of locks held by peers that left the bus.
//!
//! Not every client implements `org.freedesktop.DBus.Peer`, so instead of pinging owners we list
//! every name on the bus and drop the locks of owners that are no longer there.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{ensure, Context};
use calloop::channel::{self, Channel, Sender};
use calloop::timer::{TimeoutAction, Timer};
use calloop::{EventLoop, LoopSignal};

use crate::bridge::Bridge;

/// Lists the identities currently present on the bus.
pub trait PeerLister: Send + 'static {
    fn list_active_peers(&self) -> anyhow::Result<HashSet<String>>;
}

/// Runs one liveness check.
///
/// Returns the number of reclaimed locks. When listing peers fails, nothing is reclaimed and the
/// check is simply retried on the next tick.
pub fn tick(bridge: &Bridge, peers: &dyn PeerLister) -> usize {
    if !bridge.has_peer_locks() {
        trace!("no peer locks to check");
        return 0;
    }

    // Listing peers is a bus round trip, so it happens without holding the registry.
    let live = match peers.list_active_peers() {
        Ok(live) => live,
        Err(err) => {
            warn!("error listing bus peers, skipping heartbeat: {err:?}");
            return 0;
        }
    };

    bridge.tick(&live)
}

/// Handle to the heartbeat thread.
pub struct LivenessMonitor {
    to_monitor: Sender<()>,
    thread: JoinHandle<()>,
}

struct MonitorState {
    bridge: Arc<Bridge>,
    peers: Box<dyn PeerLister>,
    signal: LoopSignal,
}

impl LivenessMonitor {
    pub fn start(
        bridge: Arc<Bridge>,
        peers: impl PeerLister,
        interval: Duration,
    ) -> anyhow::Result<Self> {
        ensure!(!interval.is_zero(), "heartbeat interval must not be zero");

        let (to_monitor, from_main) = channel::channel();
        let peers: Box<dyn PeerLister> = Box::new(peers);

        let thread = thread::Builder::new()
            .name(String::from("Liveness Monitor"))
            .spawn(move || {
                if let Err(err) = run(bridge, peers, interval, from_main) {
                    warn!("liveness monitor failed: {err:?}");
                }
            })
            .context("error spawning the liveness monitor thread")?;

        Ok(Self { to_monitor, thread })
    }

    /// Stops the monitor and waits until its loop has exited.
    ///
    /// No tick runs after this returns.
    pub fn stop(self) {
        if self.to_monitor.send(()).is_err() {
            debug!("liveness monitor had already exited");
        }

        if self.thread.join().is_err() {
            warn!("liveness monitor thread panicked");
        }
    }
}

fn run(
    bridge: Arc<Bridge>,
    peers: Box<dyn PeerLister>,
    interval: Duration,
    from_main: Channel<()>,
) -> anyhow::Result<()> {
    let mut event_loop: EventLoop<MonitorState> =
        EventLoop::try_new().context("error creating the liveness monitor event loop")?;
    let handle = event_loop.handle();

    handle
        .insert_source(Timer::from_duration(interval), move |_, _, state| {
            trace!("heartbeat checker running");
            tick(&state.bridge, &*state.peers);
            TimeoutAction::ToDuration(interval)
        })
        .map_err(|err| err.error)?;

    handle
        .insert_source(from_main, |event, _, state| match event {
            channel::Event::Msg(()) | channel::Event::Closed => state.signal.stop(),
        })
        .map_err(|err| err.error)?;

    let mut state = MonitorState {
        bridge,
        peers,
        signal: event_loop.get_signal(),
    };

    debug!("heartbeat checker started, interval {interval:?}");
    event_loop.run(None, &mut state, |_| ())?;
    debug!("heartbeat checker stopped");

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::registry::{Owner, Registry};
    use crate::tests::fixture::{wait_until, FakeGateway, FakePeers, RecordingSink};

    fn bridge() -> (Arc<Bridge>, FakeGateway) {
        let gateway = FakeGateway::default();
        let registry = Registry::new(Box::new(gateway.clone()));
        let bridge = Bridge::new(registry, Box::new(RecordingSink::default()));
        (Arc::new(bridge), gateway)
    }

    #[test]
    fn tick_reclaims_dead_peers_only() {
        let (bridge, gateway) = bridge();
        let alive = bridge.inhibit(Owner::peer(":1.1"), "a", "b").unwrap();
        bridge.inhibit(Owner::peer(":1.2"), "a", "b").unwrap();
        bridge.inhibit(Owner::peer(":1.2"), "c", "d").unwrap();

        let peers = FakePeers::new(&[":1.1", ":1.3"]);
        assert_eq!(tick(&bridge, &peers), 2);
        assert_eq!(
            bridge.registry().snapshot(),
            [(alive, Owner::peer(":1.1"))]
        );
        assert_eq!(gateway.released(), 2);
        assert_eq!(gateway.duplicate_releases(), 0);
    }

    #[test]
    fn tick_skips_when_listing_fails() {
        let (bridge, gateway) = bridge();
        bridge.inhibit(Owner::peer(":1.1"), "a", "b").unwrap();

        let peers = FakePeers::new(&[]);
        peers.fail(true);
        assert_eq!(tick(&bridge, &peers), 0);
        assert_eq!(bridge.registry().len(), 1);
        assert_eq!(gateway.released(), 0);

        peers.fail(false);
        assert_eq!(tick(&bridge, &peers), 1);
        assert!(bridge.registry().is_empty());
    }

    #[test]
    fn tick_without_peer_locks_does_not_list() {
        let (bridge, _gateway) = bridge();
        bridge.inhibit(Owner::Local, "manual", "toggled").unwrap();

        let peers = FakePeers::new(&[]);
        assert_eq!(tick(&bridge, &peers), 0);
        assert_eq!(peers.calls(), 0);
        assert_eq!(bridge.registry().len(), 1);
    }

    #[test]
    fn monitor_reclaims_in_background() {
        let (bridge, gateway) = bridge();
        bridge.inhibit(Owner::peer(":1.4"), "x", "y").unwrap();

        let peers = FakePeers::new(&[]);
        let monitor =
            LivenessMonitor::start(bridge.clone(), peers.clone(), Duration::from_millis(10))
                .unwrap();

        assert!(wait_until(|| bridge.registry().is_empty()));
        monitor.stop();
        assert_eq!(gateway.released(), 1);
    }

    #[test]
    fn stop_does_not_wait_for_next_tick() {
        let (bridge, _gateway) = bridge();
        let monitor = LivenessMonitor::start(
            bridge,
            FakePeers::new(&[]),
            Duration::from_secs(3600),
        )
        .unwrap();

        let start = Instant::now();
        monitor.stop();
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn no_ticks_after_stop() {
        let (bridge, _gateway) = bridge();
        bridge.inhibit(Owner::peer(":1.4"), "x", "y").unwrap();

        let peers = FakePeers::new(&[":1.4"]);
        let monitor =
            LivenessMonitor::start(bridge.clone(), peers.clone(), Duration::from_millis(5))
                .unwrap();
        assert!(wait_until(|| peers.calls() > 0));
        monitor.stop();

        let calls = peers.calls();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(peers.calls(), calls);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let (bridge, _gateway) = bridge();
        assert!(LivenessMonitor::start(bridge, FakePeers::new(&[]), Duration::ZERO).is_err());
    }
}
