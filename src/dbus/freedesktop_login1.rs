//! Idle inhibitors from systemd-logind.
//!
//! logind hands out a file descriptor per inhibitor; the inhibition lasts until it is closed.

use std::io;
use std::os::fd::IntoRawFd;

use anyhow::Context;
use zbus::dbus_proxy;
use zbus::zvariant::OwnedFd;

use crate::inhibitor::{HeldInhibitor, InhibitorGateway};

const WHAT: &str = "idle";
const MODE: &str = "block";

#[dbus_proxy(
    interface = "org.freedesktop.login1.Manager",
    default_service = "org.freedesktop.login1",
    default_path = "/org/freedesktop/login1",
    gen_async = false
)]
trait Manager {
    fn inhibit(&self, what: &str, who: &str, why: &str, mode: &str) -> zbus::Result<OwnedFd>;
}

pub struct Login1Inhibitor {
    proxy: ManagerProxy<'static>,
    label: String,
}

impl Login1Inhibitor {
    /// Connects to logind on the system bus. `label` is shown as the inhibitor's "who".
    pub fn connect(label: impl Into<String>) -> anyhow::Result<Self> {
        let conn =
            zbus::blocking::Connection::system().context("error connecting to the system bus")?;
        let proxy = ManagerProxy::new(&conn).context("error creating a login1 proxy")?;

        Ok(Self {
            proxy,
            label: label.into(),
        })
    }

    pub fn connection(&self) -> &zbus::blocking::Connection {
        self.proxy.inner().connection()
    }
}

impl InhibitorGateway for Login1Inhibitor {
    fn acquire(&self, who: &str, why: &str) -> anyhow::Result<Box<dyn HeldInhibitor>> {
        let why = format!("{who} {why}");
        let fd = self
            .proxy
            .inhibit(WHAT, &self.label, &why, MODE)
            .context("error calling login1 Inhibit")?;

        Ok(Box::new(IdleInhibitor { fd: Some(fd) }))
    }
}

#[derive(Debug)]
pub struct IdleInhibitor {
    fd: Option<OwnedFd>,
}

impl HeldInhibitor for IdleInhibitor {
    fn release(mut self: Box<Self>) -> io::Result<()> {
        let Some(fd) = self.fd.take() else {
            return Ok(());
        };

        // Closed by hand rather than on drop, to see whether it worked.
        let raw = fd.into_raw_fd();
        if unsafe { libc::close(raw) } == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}
