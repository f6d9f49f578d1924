//! Startup privilege check for raw ICMP sockets.

use crate::core::errors::{NdError, Result};

/// Fail unless the process may open raw ICMP sockets: effective root, or
/// a non-root process that was granted `CAP_NET_RAW`.
pub fn ensure_privileged() -> Result<()> {
    if can_open_raw_socket() {
        return Ok(());
    }
    Err(NdError::InsufficientPrivilege {
        details: "netdev must be run as root (or with CAP_NET_RAW) to send ICMP probes"
            .to_string(),
    })
}

#[cfg(unix)]
fn can_open_raw_socket() -> bool {
    use nix::sys::socket::{AddressFamily, SockFlag, SockProtocol, SockType, socket};

    if nix::unistd::geteuid().is_root() {
        return true;
    }
    socket(
        AddressFamily::Inet,
        SockType::Raw,
        SockFlag::empty(),
        SockProtocol::Icmp,
    )
    .is_ok()
}

#[cfg(not(unix))]
fn can_open_raw_socket() -> bool {
    false
}
