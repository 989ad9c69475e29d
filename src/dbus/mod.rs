//! D-Bus collaborators: the inbound ScreenSaver interface, the logind gateway and the bus peer
//! listing.

pub mod freedesktop_dbus;
pub mod freedesktop_login1;
pub mod freedesktop_screensaver;
