use std::collections::HashSet;

use anyhow::Context;
use zbus::blocking::fdo::DBusProxy;

use crate::liveness::PeerLister;

/// Lists peers with `org.freedesktop.DBus.ListNames`.
pub struct BusPeers {
    proxy: DBusProxy<'static>,
}

impl BusPeers {
    pub fn new(conn: &zbus::blocking::Connection) -> anyhow::Result<Self> {
        let proxy = DBusProxy::new(conn).context("error creating a DBusProxy")?;
        Ok(Self { proxy })
    }
}

impl PeerLister for BusPeers {
    fn list_active_peers(&self) -> anyhow::Result<HashSet<String>> {
        let names = self.proxy.list_names().context("error calling ListNames")?;
        Ok(names.into_iter().map(|name| name.to_string()).collect())
    }
}
