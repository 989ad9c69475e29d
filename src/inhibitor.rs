//! Gateway to the session manager's idle inhibitor.

use std::fmt;
use std::io;

/// Something that can hand out idle inhibitors.
///
/// Acquisition may block on the session manager, so it must never be called while holding the
/// registry lock.
pub trait InhibitorGateway: Send + Sync {
    fn acquire(&self, who: &str, why: &str) -> anyhow::Result<Box<dyn HeldInhibitor>>;
}

/// An inhibitor that stays in effect for as long as it is held.
///
/// Releasing consumes the handle, so it can only happen once.
pub trait HeldInhibitor: Send + fmt::Debug {
    fn release(self: Box<Self>) -> io::Result<()>;
}
