//! netdev: watch hosts on the local network and run commands when they
//! appear or disappear.
//!
//! Rules live in `*.rules` files inside one directory. Each rule names a
//! host, a transition (`discover` or `lost`), and the actions to run. A
//! probing task per host pings it with ICMP echo requests and fires the
//! matching rules whenever reachability flips; a reconciler keeps the
//! loaded rules in step with the directory.

pub mod actions;
#[cfg(feature = "cli")]
pub mod cli_app;
pub mod core;
pub mod daemon;
pub mod logger;
pub mod monitor;
pub mod rules;
