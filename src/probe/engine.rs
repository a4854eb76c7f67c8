//! One-shot ICMP probe: send an echo request, block for the matching reply.
//!
//! Probing is strictly sequential; one probe is in flight at a time, so
//! identifier/sequence matching on a shared raw socket stays unambiguous.

use anyhow::Result;
use std::mem::MaybeUninit;
use std::net::IpAddr;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::probe::codec::{
    self, ParsedReply, ICMP_DEST_UNREACHABLE, ICMP_ECHO_REPLY, ICMP_TIME_EXCEEDED,
};
use crate::probe::socket::{create_raw_icmp_socket, recv_datagram, send_icmp, set_ttl};

const RECV_BUFFER_SIZE: usize = 2048;

/// Parameters for one send-and-await attempt.
#[derive(Debug, Clone)]
pub struct ProbeSpec {
    pub destination: IpAddr,
    pub identifier: u16,
    pub sequence: u16,
    pub timeout: Duration,
    /// Outbound TTL for the send socket; `None` leaves the kernel default.
    pub ttl: Option<u8>,
}

/// Which ICMP error a router reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolKind {
    Unreachable,
    TimeExceeded,
}

impl ProtocolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolKind::Unreachable => "unreachable",
            ProtocolKind::TimeExceeded => "time-exceeded",
        }
    }
}

/// Terminal outcome of one probe. Every probe sent resolves to exactly one
/// of these; raw packets never cross this boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    Success {
        rtt_ms: f64,
        source: IpAddr,
        icmp_type: u8,
        icmp_code: u8,
    },
    ProtocolError {
        kind: ProtocolKind,
        source: IpAddr,
    },
    Timeout,
    DecodeError {
        reason: String,
    },
}

impl ProbeOutcome {
    /// Source address carried by the outcome, when one exists.
    pub fn source(&self) -> Option<IpAddr> {
        match self {
            ProbeOutcome::Success { source, .. } | ProbeOutcome::ProtocolError { source, .. } => {
                Some(*source)
            }
            ProbeOutcome::Timeout | ProbeOutcome::DecodeError { .. } => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ProbeOutcome::Success { .. })
    }
}

/// Seam between the runners and the network layer; tests substitute a
/// scripted responder here.
pub trait Prober {
    fn probe(&self, spec: &ProbeSpec) -> Result<ProbeOutcome>;
}

/// Raw-socket ICMP prober.
#[derive(Debug, Clone, Copy)]
pub struct IcmpProber {
    /// Strict mode (ping path): every received reply must carry a valid ICMP
    /// checksum, and a matched echo reply must carry the payload timestamp.
    /// The traceroute path runs non-strict; router checksums vary too much
    /// to revalidate.
    pub strict: bool,
}

impl IcmpProber {
    pub fn new(strict: bool) -> Self {
        Self { strict }
    }
}

impl Prober for IcmpProber {
    fn probe(&self, spec: &ProbeSpec) -> Result<ProbeOutcome> {
        send_and_await(spec, self.strict)
    }
}

/// Send one echo request and wait for its terminal outcome.
///
/// Two raw sockets are opened per call: the send socket carries the per-probe
/// TTL option, the receive socket's read timeout is re-armed to the remaining
/// budget each iteration. Both close on every exit path via `Drop`.
pub fn send_and_await(spec: &ProbeSpec, strict: bool) -> Result<ProbeOutcome> {
    let send_sock = create_raw_icmp_socket()?;
    let recv_sock = create_raw_icmp_socket()?;

    if let Some(ttl) = spec.ttl {
        set_ttl(&send_sock, ttl)?;
    }

    let send_timestamp = epoch_seconds();
    let packet = codec::encode_echo_request(spec.identifier, spec.sequence, send_timestamp);
    let sent_at = Instant::now();
    send_icmp(&send_sock, &packet, spec.destination)?;

    let deadline = sent_at + spec.timeout;
    let mut buffer = [MaybeUninit::<u8>::uninit(); RECV_BUFFER_SIZE];

    // The budget is computed from elapsed wall-clock time rather than
    // re-armed per iteration, so a noise burst just under the deadline can
    // overshoot the nominal timeout by one blocking-call granularity. That
    // bound is accepted, not eliminated.
    loop {
        let now = Instant::now();
        if now >= deadline {
            return Ok(ProbeOutcome::Timeout);
        }
        let remaining = deadline - now;

        let len = match recv_datagram(&recv_sock, &mut buffer, remaining)? {
            Some(len) => len,
            None => return Ok(ProbeOutcome::Timeout),
        };
        let datagram = unsafe { std::slice::from_raw_parts(buffer.as_ptr() as *const u8, len) };

        let reply = match codec::decode(datagram) {
            Ok(reply) => reply,
            // Malformed packet: discard and keep waiting on the same budget
            Err(_) => continue,
        };

        let rtt_ms = sent_at.elapsed().as_secs_f64() * 1000.0;
        if let Some(outcome) = classify_reply(&reply, spec, strict, rtt_ms) {
            return Ok(outcome);
        }
    }
}

/// Decide whether a decoded reply terminates the probe.
///
/// `None` means the packet is not ours (or fails strict validation) and the
/// caller keeps waiting on its remaining budget. Echo replies match on the
/// outer identifier+sequence; router errors (type 3/11) match on the
/// identifier quoted from our original datagram, since their outer header
/// carries no echo fields.
fn classify_reply(
    reply: &ParsedReply,
    spec: &ProbeSpec,
    strict: bool,
    rtt_ms: f64,
) -> Option<ProbeOutcome> {
    if strict && !reply.checksum_ok {
        return None;
    }

    match reply.icmp_type {
        ICMP_ECHO_REPLY => {
            if reply.identifier != Some(spec.identifier)
                || reply.sequence != Some(spec.sequence)
            {
                return None;
            }
            if strict && reply.embedded_timestamp.is_none() {
                // Matched reply without the timestamp payload; the probe is
                // resolved, but not as a success.
                return Some(ProbeOutcome::DecodeError {
                    reason: "no timestamp in payload".to_string(),
                });
            }
            Some(ProbeOutcome::Success {
                rtt_ms,
                source: reply.source,
                icmp_type: reply.icmp_type,
                icmp_code: reply.icmp_code,
            })
        }
        ICMP_TIME_EXCEEDED | ICMP_DEST_UNREACHABLE => {
            if reply.embedded_identifier != Some(spec.identifier) {
                return None;
            }
            let kind = if reply.icmp_type == ICMP_DEST_UNREACHABLE {
                ProtocolKind::Unreachable
            } else {
                ProtocolKind::TimeExceeded
            };
            Some(ProbeOutcome::ProtocolError {
                kind,
                source: reply.source,
            })
        }
        // Foreign traffic: not counted, not logged
        _ => None,
    }
}

/// Wall-clock epoch seconds, as embedded in the echo payload.
pub fn epoch_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Process identifier for the ICMP identification field.
pub fn process_identifier() -> u16 {
    std::process::id() as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn spec() -> ProbeSpec {
        ProbeSpec {
            destination: IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)),
            identifier: 0x1234,
            sequence: 7,
            timeout: Duration::from_secs(1),
            ttl: None,
        }
    }

    fn echo_reply(identifier: u16, sequence: u16) -> ParsedReply {
        ParsedReply {
            icmp_type: ICMP_ECHO_REPLY,
            icmp_code: 0,
            source: IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)),
            identifier: Some(identifier),
            sequence: Some(sequence),
            embedded_identifier: None,
            embedded_timestamp: Some(1234.5),
            is_truncated: false,
            checksum_ok: true,
        }
    }

    fn router_error(icmp_type: u8, embedded_identifier: Option<u16>) -> ParsedReply {
        ParsedReply {
            icmp_type,
            icmp_code: 0,
            source: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            identifier: None,
            sequence: None,
            embedded_identifier,
            embedded_timestamp: None,
            is_truncated: true,
            checksum_ok: true,
        }
    }

    #[test]
    fn test_classify_matched_echo_reply() {
        let outcome = classify_reply(&echo_reply(0x1234, 7), &spec(), true, 3.5);
        assert_eq!(
            outcome,
            Some(ProbeOutcome::Success {
                rtt_ms: 3.5,
                source: IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)),
                icmp_type: ICMP_ECHO_REPLY,
                icmp_code: 0,
            })
        );
    }

    #[test]
    fn test_classify_discards_foreign_id_and_seq() {
        // Wrong identifier, wrong sequence, and both: all keep waiting.
        assert_eq!(classify_reply(&echo_reply(0x9999, 7), &spec(), false, 1.0), None);
        assert_eq!(classify_reply(&echo_reply(0x1234, 8), &spec(), false, 1.0), None);
        assert_eq!(classify_reply(&echo_reply(0x9999, 8), &spec(), false, 1.0), None);
    }

    #[test]
    fn test_classify_matches_router_error_on_quoted_id() {
        let outcome = classify_reply(
            &router_error(ICMP_TIME_EXCEEDED, Some(0x1234)),
            &spec(),
            false,
            1.0,
        );
        assert_eq!(
            outcome,
            Some(ProbeOutcome::ProtocolError {
                kind: ProtocolKind::TimeExceeded,
                source: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            })
        );

        let outcome = classify_reply(
            &router_error(ICMP_DEST_UNREACHABLE, Some(0x1234)),
            &spec(),
            false,
            1.0,
        );
        assert!(matches!(
            outcome,
            Some(ProbeOutcome::ProtocolError {
                kind: ProtocolKind::Unreachable,
                ..
            })
        ));
    }

    #[test]
    fn test_classify_discards_router_error_for_other_flow() {
        // Quoted identifier from someone else's probe, or missing entirely
        // (quote truncated before the inner echo header).
        let other = router_error(ICMP_TIME_EXCEEDED, Some(0x9999));
        assert_eq!(classify_reply(&other, &spec(), false, 1.0), None);
        let truncated = router_error(ICMP_TIME_EXCEEDED, None);
        assert_eq!(classify_reply(&truncated, &spec(), false, 1.0), None);
    }

    #[test]
    fn test_classify_strict_requires_timestamp() {
        let mut reply = echo_reply(0x1234, 7);
        reply.embedded_timestamp = None;
        reply.is_truncated = true;

        // Strict: the probe resolves, but not as a success.
        assert_eq!(
            classify_reply(&reply, &spec(), true, 1.0),
            Some(ProbeOutcome::DecodeError {
                reason: "no timestamp in payload".to_string(),
            })
        );
        // Non-strict: still a success.
        assert!(matches!(
            classify_reply(&reply, &spec(), false, 1.0),
            Some(ProbeOutcome::Success { .. })
        ));
    }

    #[test]
    fn test_classify_strict_discards_any_bad_checksum() {
        let mut reply = echo_reply(0x1234, 7);
        reply.checksum_ok = false;
        assert_eq!(classify_reply(&reply, &spec(), true, 1.0), None);

        // Corrupted router errors are discarded on the strict path too.
        let mut error = router_error(ICMP_TIME_EXCEEDED, Some(0x1234));
        error.checksum_ok = false;
        assert_eq!(classify_reply(&error, &spec(), true, 1.0), None);
        // The non-strict path accepts them.
        assert!(classify_reply(&error, &spec(), false, 1.0).is_some());
    }

    #[test]
    fn test_classify_ignores_foreign_types() {
        let mut reply = echo_reply(0x1234, 7);
        reply.icmp_type = 13;
        assert_eq!(classify_reply(&reply, &spec(), false, 1.0), None);
    }

    #[test]
    fn test_outcome_source_accessor() {
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let success = ProbeOutcome::Success {
            rtt_ms: 1.0,
            source: ip,
            icmp_type: 0,
            icmp_code: 0,
        };
        assert_eq!(success.source(), Some(ip));
        assert!(success.is_success());

        assert_eq!(ProbeOutcome::Timeout.source(), None);
        assert!(!ProbeOutcome::Timeout.is_success());

        let err = ProbeOutcome::ProtocolError {
            kind: ProtocolKind::TimeExceeded,
            source: ip,
        };
        assert_eq!(err.source(), Some(ip));
    }

    #[test]
    fn test_protocol_kind_labels() {
        assert_eq!(ProtocolKind::Unreachable.as_str(), "unreachable");
        assert_eq!(ProtocolKind::TimeExceeded.as_str(), "time-exceeded");
    }
}
