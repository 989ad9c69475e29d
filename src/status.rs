//! Status display sinks.
//!
//! The bridge has no indicator of its own. Status changes go to the log, and to systemd when
//! running as a service, where they show up in `systemctl --user status`.

use std::sync::atomic::Ordering;

use sd_notify::NotifyState;

use crate::bridge::{StatusReport, StatusSink};
use crate::utils::IS_SYSTEMD_SERVICE;

pub struct ServiceStatus {
    prog: String,
    systemd: bool,
}

impl ServiceStatus {
    pub fn new(prog: impl Into<String>) -> Self {
        Self {
            prog: prog.into(),
            systemd: IS_SYSTEMD_SERVICE.load(Ordering::Relaxed),
        }
    }
}

impl StatusSink for ServiceStatus {
    fn set_status(&self, report: &StatusReport) {
        let title = report.title(&self.prog);
        debug!("{title} ({:?})", report.display);

        if self.systemd {
            if let Err(err) = sd_notify::notify(false, &[NotifyState::Status(&title)]) {
                warn!("error notifying systemd of status: {err:?}");
            }
        }
    }
}
