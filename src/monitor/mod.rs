//! Host presence monitoring: reachability probes, per-host monitors, and
//! the registry that owns them.

pub mod host;
pub mod probe;
pub mod registry;
