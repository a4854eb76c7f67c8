use anyhow::{anyhow, Context, Result};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::mem::MaybeUninit;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Create a raw IPv4 ICMP socket.
///
/// Raw sockets need elevated privilege; failure here is a fatal setup error
/// and is never retried.
pub fn create_raw_icmp_socket() -> Result<Socket> {
    let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4)).map_err(|e| {
        if e.kind() == io::ErrorKind::PermissionDenied {
            let binary_path = std::env::current_exe()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|_| "hoptrace".to_string());
            anyhow!(
                "Insufficient permissions for raw ICMP sockets.\n\n\
                 Fix options:\n\
                 \u{2022} Run with sudo: sudo hoptrace <target>\n\
                 \u{2022} Add capability: sudo setcap cap_net_raw+ep {}",
                binary_path
            )
        } else {
            anyhow!(e).context("failed to create raw ICMP socket")
        }
    })?;

    socket.set_nonblocking(false)?;
    socket.set_read_timeout(Some(Duration::from_secs(1)))?;
    Ok(socket)
}

/// Set the outbound IP TTL on a send socket.
pub fn set_ttl(socket: &Socket, ttl: u8) -> Result<()> {
    socket
        .set_ttl(ttl as u32)
        .with_context(|| format!("failed to set TTL {}", ttl))?;
    Ok(())
}

/// Send an ICMP packet to the target.
pub fn send_icmp(socket: &Socket, packet: &[u8], target: IpAddr) -> Result<usize> {
    let addr = SocketAddr::new(target, 0);
    let sent = socket.send_to(packet, &SockAddr::from(addr))?;
    Ok(sent)
}

/// Block for one datagram, for at most `wait`. Returns `Ok(None)` when the
/// wait elapses without a packet.
pub fn recv_datagram(
    socket: &Socket,
    buffer: &mut [MaybeUninit<u8>],
    wait: Duration,
) -> Result<Option<usize>> {
    socket.set_read_timeout(Some(wait))?;
    match socket.recv_from(buffer) {
        Ok((len, _addr)) => Ok(Some(len)),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}
