//! Reachability probing: the `Probe` seam and the ICMP echo implementation.

use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs};
use std::time::Duration;

use crate::core::errors::{NdError, Result};

/// A successful probe: who answered and how long it took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeReply {
    /// Address that sent the reply.
    pub address: IpAddr,
    /// Round-trip time measured from send to receive.
    pub rtt: Duration,
}

/// Timed liveness check against a named host.
///
/// Implementations block for at most `timeout` and report `None` when the
/// host did not answer (including when its name does not resolve).
pub trait Probe: Send + Sync {
    /// Probe `hostname` once.
    fn probe(&self, hostname: &str, timeout: Duration, packet_size: usize) -> Option<ProbeReply>;
}

/// Resolve `hostname` to its first IPv4 address.
pub fn resolve_ipv4(hostname: &str) -> Result<Ipv4Addr> {
    if let Ok(addr) = hostname.parse::<Ipv4Addr>() {
        return Ok(addr);
    }
    let addrs = (hostname, 0)
        .to_socket_addrs()
        .map_err(|err| NdError::Probe {
            hostname: hostname.to_string(),
            details: format!("name resolution failed: {err}"),
        })?;
    addrs
        .filter_map(|addr| match addr.ip() {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        })
        .next()
        .ok_or_else(|| NdError::Probe {
            hostname: hostname.to_string(),
            details: "no IPv4 address".to_string(),
        })
}

/// RFC 1071 one's-complement checksum.
#[must_use]
pub fn internet_checksum(bytes: &[u8]) -> u16 {
    let mut sum: u32 = bytes
        .chunks(2)
        .map(|pair| {
            let hi = u32::from(pair[0]) << 8;
            let lo = pair.get(1).copied().map_or(0, u32::from);
            hi | lo
        })
        .sum();
    while sum > 0xffff {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !u16::try_from(sum).unwrap_or(u16::MAX)
}

const ICMP_ECHO_REQUEST: u8 = 8;
const ICMP_ECHO_REPLY: u8 = 0;
const ICMP_HEADER_LEN: usize = 8;

/// Build an ICMP echo request with `payload_len` bytes of payload.
#[must_use]
pub fn echo_request(ident: u16, sequence: u16, payload_len: usize) -> Vec<u8> {
    let mut packet = Vec::with_capacity(ICMP_HEADER_LEN + payload_len);
    packet.extend_from_slice(&[ICMP_ECHO_REQUEST, 0, 0, 0]);
    packet.extend_from_slice(&ident.to_be_bytes());
    packet.extend_from_slice(&sequence.to_be_bytes());
    packet.extend((0..payload_len).map(|i| u8::try_from(i % 256).unwrap_or_default()));
    let checksum = internet_checksum(&packet);
    packet[2..4].copy_from_slice(&checksum.to_be_bytes());
    packet
}

/// Whether an IPv4 datagram (header included, as raw sockets deliver it)
/// carries the echo reply for `ident`/`sequence`.
#[must_use]
pub fn is_echo_reply(datagram: &[u8], ident: u16, sequence: u16) -> bool {
    let Some(first) = datagram.first() else {
        return false;
    };
    let header_len = usize::from(first & 0x0f) * 4;
    let Some(icmp) = datagram.get(header_len..header_len + ICMP_HEADER_LEN) else {
        return false;
    };
    icmp[0] == ICMP_ECHO_REPLY
        && icmp[4..6] == ident.to_be_bytes()
        && icmp[6..8] == sequence.to_be_bytes()
}

#[cfg(unix)]
pub use icmp::IcmpProbe;

#[cfg(unix)]
mod icmp {
    use std::net::{IpAddr, SocketAddrV4};
    use std::os::fd::{AsRawFd, OwnedFd};
    use std::sync::atomic::{AtomicU16, Ordering};
    use std::time::{Duration, Instant};

    use nix::errno::Errno;
    use nix::sys::socket::{
        AddressFamily, MsgFlags, SockFlag, SockProtocol, SockType, SockaddrIn, recvfrom,
        sendto, setsockopt, socket, sockopt,
    };
    use nix::sys::time::{TimeVal, TimeValLike};
    use tracing::debug;

    use super::{Probe, ProbeReply, echo_request, is_echo_reply, resolve_ipv4};
    use crate::core::errors::{NdError, Result};

    /// Room for the largest IPv4 header in front of the echoed packet.
    const MAX_IP_HEADER: usize = 60;

    /// ICMP echo over a raw IPv4 socket. Requires root or `CAP_NET_RAW`.
    #[derive(Debug, Default)]
    pub struct IcmpProbe {
        sequence: AtomicU16,
    }

    impl IcmpProbe {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        fn echo(
            &self,
            hostname: &str,
            timeout: Duration,
            packet_size: usize,
        ) -> Result<Option<ProbeReply>> {
            let target = resolve_ipv4(hostname)?;
            let fail = |details: String| NdError::Probe {
                hostname: hostname.to_string(),
                details,
            };

            let fd: OwnedFd = socket(
                AddressFamily::Inet,
                SockType::Raw,
                SockFlag::empty(),
                SockProtocol::Icmp,
            )
            .map_err(|err| fail(format!("raw socket: {err}")))?;

            let ident: u16 = rand::random();
            let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
            let packet = echo_request(ident, sequence, packet_size);
            let dest = SockaddrIn::from(SocketAddrV4::new(target, 0));

            let sent_at = Instant::now();
            sendto(fd.as_raw_fd(), &packet, &dest, MsgFlags::empty())
                .map_err(|err| fail(format!("send: {err}")))?;

            let deadline = sent_at + timeout;
            let mut buf = vec![0_u8; MAX_IP_HEADER + packet.len()];
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Ok(None);
                }
                let micros = i64::try_from(remaining.as_micros()).unwrap_or(i64::MAX).max(1);
                setsockopt(&fd, sockopt::ReceiveTimeout, &TimeVal::microseconds(micros))
                    .map_err(|err| fail(format!("set receive timeout: {err}")))?;

                match recvfrom::<SockaddrIn>(fd.as_raw_fd(), &mut buf) {
                    Ok((len, from)) => {
                        let from_target = from
                            .is_some_and(|addr| *SocketAddrV4::from(addr).ip() == target);
                        if from_target && is_echo_reply(&buf[..len], ident, sequence) {
                            return Ok(Some(ProbeReply {
                                address: IpAddr::V4(target),
                                rtt: sent_at.elapsed(),
                            }));
                        }
                    }
                    Err(Errno::EAGAIN) => return Ok(None),
                    Err(Errno::EINTR) => {}
                    Err(err) => return Err(fail(format!("receive: {err}"))),
                }
            }
        }
    }

    impl Probe for IcmpProbe {
        fn probe(
            &self,
            hostname: &str,
            timeout: Duration,
            packet_size: usize,
        ) -> Option<ProbeReply> {
            match self.echo(hostname, timeout, packet_size) {
                Ok(reply) => reply,
                Err(err) => {
                    debug!(code = err.code(), "{err}");
                    None
                }
            }
        }
    }
}
