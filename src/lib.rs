#[macro_use]
extern crate tracing;

pub mod bridge;
pub mod cli;
pub mod dbus;
pub mod inhibitor;
pub mod liveness;
pub mod manual;
pub mod notification;
pub mod registry;
pub mod shutdown;
pub mod status;
pub mod utils;

#[cfg(test)]
mod tests;
