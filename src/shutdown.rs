//! Ordered teardown.
//!
//! Each step stops one component and waits for it before the next step starts:
//!
//! 1. the inbound endpoint stops accepting `Inhibit`/`UnInhibit`,
//! 2. the manual inhibit controller exits, with any expiry timer cancelled,
//! 3. the liveness monitor exits,
//! 4. every remaining lock is released,
//! 5. the bus connections are dropped.
//!
//! Releasing locks before the loops have exited could close an inhibitor that one of them still
//! considers live.

use std::sync::Arc;
use std::time::Instant;

use crate::bridge::Bridge;
use crate::liveness::LivenessMonitor;
use crate::manual::ManualController;
use crate::utils::format_duration;

/// The peer-facing side of the bridge.
pub trait InboundEndpoint: Send {
    /// Stops accepting new requests.
    fn detach(&mut self) -> anyhow::Result<()>;
}

/// Everything that runs after setup.
pub struct Services {
    pub inbound: Box<dyn InboundEndpoint>,
    pub manual: ManualController,
    pub liveness: LivenessMonitor,
    pub bridge: Arc<Bridge>,
    pub connections: Vec<zbus::blocking::Connection>,
}

impl Services {
    /// Tears everything down. Returns the number of locks released in the final drain.
    pub fn shutdown(self) -> usize {
        let Self {
            mut inbound,
            manual,
            liveness,
            bridge,
            connections,
        } = self;

        debug!("stopping inbound requests");
        if let Err(err) = inbound.detach() {
            warn!("error detaching the inbound endpoint: {err:?}");
        }

        debug!("stopping manual inhibit");
        let state = manual.stop();
        if let Some(left) = state.remaining(Instant::now()) {
            debug!("manual inhibit still had {} to go", format_duration(left));
        }

        debug!("stopping heartbeat checker");
        liveness.stop();

        let released = bridge.release_all();
        debug!("released {released} remaining locks");

        drop(bridge);
        drop(inbound);
        for conn in connections {
            trace!("closing bus connection {:?}", conn.unique_name());
            drop(conn);
        }

        released
    }
}
