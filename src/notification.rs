//! Desktop notifications about manual inhibit changes.

use std::time::Duration;

const EXPIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Shows a notification, best-effort.
///
/// `replaces` is the id of an earlier notification to replace, or 0. Returns the id of the shown
/// notification, or 0 if nothing was shown.
pub trait Notifier: Send {
    fn notify(&self, message: &str, replaces: u32) -> u32;
}

/// Used when notifications are turned off.
pub struct NoNotifications;

impl Notifier for NoNotifications {
    fn notify(&self, message: &str, _replaces: u32) -> u32 {
        trace!("not showing notification: {message}");
        0
    }
}

#[cfg(feature = "notifications")]
pub struct DesktopNotifier {
    app_name: String,
}

#[cfg(feature = "notifications")]
impl DesktopNotifier {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
        }
    }
}

#[cfg(feature = "notifications")]
impl Notifier for DesktopNotifier {
    fn notify(&self, message: &str, replaces: u32) -> u32 {
        let mut notification = notify_rust::Notification::new();
        notification
            .appname(&self.app_name)
            .summary(&self.app_name)
            .body(message)
            .timeout(notify_rust::Timeout::Milliseconds(
                EXPIRE_TIMEOUT.as_millis() as u32,
            ))
            .urgency(notify_rust::Urgency::Normal);

        if replaces != 0 {
            notification.id(replaces);
        }

        match notification.show() {
            Ok(handle) => handle.id(),
            Err(err) => {
                warn!("error sending notification: {err:?}");
                0
            }
        }
    }
}

/// Picks the notifier for the current build and settings.
pub fn notifier(enabled: bool, app_name: &str) -> Box<dyn Notifier> {
    #[cfg(feature = "notifications")]
    if enabled {
        return Box::new(DesktopNotifier::new(app_name));
    }

    #[cfg(not(feature = "notifications"))]
    if enabled {
        debug!("{app_name} was built without notification support");
    }

    Box::new(NoNotifications)
}
