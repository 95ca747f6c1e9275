//! Application instances and their debugging ports
//!
//! The [`PortAllocator`] hands out port reservations; the
//! [`InstanceManager`] spawns, tracks and terminates the processes bound to
//! them. Nothing outside this module mutates either table.

mod manager;
mod ports;
mod probe;

pub use manager::{AppLaunch, InstanceInfo, InstanceManager, InstanceState, StartOptions};
pub use ports::PortAllocator;
pub use probe::PortProbe;

#[cfg(test)]
pub(crate) use probe::test_support;
