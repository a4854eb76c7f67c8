//! ICMP echo packet construction and reply parsing.
//!
//! Encoding goes through pnet's echo-request builder; the internet checksum
//! and all reply parsing are done here at the byte level because replies
//! arrive as full IP datagrams and error replies (type 3/11) quote the
//! original datagram per RFC 792, which pnet's typed views don't reach into.

use pnet::packet::icmp::echo_request::MutableEchoRequestPacket;
use pnet::packet::icmp::{IcmpCode, IcmpTypes};
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::MutablePacket;
use std::net::IpAddr;
use thiserror::Error;

/// ICMP header size (fixed)
pub const ICMP_HEADER_SIZE: usize = 8;
/// Echo payload: one f64 send timestamp
pub const TIMESTAMP_PAYLOAD_SIZE: usize = 8;
/// Minimum IPv4 header size
const MIN_IP_HEADER: usize = 20;

pub const ICMP_ECHO_REPLY: u8 = 0;
pub const ICMP_DEST_UNREACHABLE: u8 = 3;
pub const ICMP_ECHO_REQUEST: u8 = 8;
pub const ICMP_TIME_EXCEEDED: u8 = 11;

/// Malformed datagram, distinguished by where parsing stopped.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Shorter than a minimal IPv4 header.
    #[error("short packet")]
    ShortPacket,
    /// IP header present but no room for an 8-byte ICMP header.
    #[error("short ICMP")]
    ShortIcmp,
}

/// Structured view of one received IP+ICMP datagram.
///
/// Carries no reference to the raw buffer; the buffer is scoped to the
/// receive call that produced it.
#[derive(Debug, Clone)]
pub struct ParsedReply {
    pub icmp_type: u8,
    pub icmp_code: u8,
    /// Source address from the outer IP header.
    pub source: IpAddr,
    /// Identifier from the outer ICMP header (meaningful for echo replies).
    pub identifier: Option<u16>,
    /// Sequence from the outer ICMP header (meaningful for echo replies).
    pub sequence: Option<u16>,
    /// Identifier recovered from the quoted original datagram (types 3/11).
    pub embedded_identifier: Option<u16>,
    /// Send timestamp recovered from the echo payload, when present.
    pub embedded_timestamp: Option<f64>,
    /// Payload too short to carry the timestamp.
    pub is_truncated: bool,
    /// Whether the outer ICMP checksum verifies. Consulted on the ping path
    /// only; error replies from intermediate routers are not revalidated.
    pub checksum_ok: bool,
}

/// Internet checksum (RFC 1071): one's-complement sum of 16-bit words in
/// network order, trailing odd byte padded with zero, carries folded.
pub fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;

    let mut i = 0;
    while i + 1 < data.len() {
        sum += u16::from_be_bytes([data[i], data[i + 1]]) as u32;
        i += 2;
    }
    if i < data.len() {
        sum += (data[i] as u32) << 8;
    }

    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !sum as u16
}

/// Verify the checksum of a complete ICMP message (header + payload).
/// A correct message sums to 0xFFFF before complementing, so the complement
/// comes out zero. 0xFFFF covers the all-zero-checksum corner.
pub fn verify_checksum(data: &[u8]) -> bool {
    if data.len() < 4 {
        return false;
    }
    matches!(internet_checksum(data), 0x0000 | 0xFFFF)
}

/// Build an ICMP echo request: 8-byte header plus an 8-byte payload holding
/// the send timestamp as raw f64 bits in network order.
pub fn encode_echo_request(identifier: u16, sequence: u16, send_timestamp: f64) -> Vec<u8> {
    let mut buffer = vec![0u8; ICMP_HEADER_SIZE + TIMESTAMP_PAYLOAD_SIZE];

    let mut packet = MutableEchoRequestPacket::new(&mut buffer).unwrap();
    packet.set_icmp_type(IcmpTypes::EchoRequest);
    packet.set_icmp_code(IcmpCode::new(0));
    packet.set_identifier(identifier);
    packet.set_sequence_number(sequence);
    packet
        .payload_mut()
        .copy_from_slice(&send_timestamp.to_bits().to_be_bytes());

    // Checksum over header+payload with the placeholder still zero
    let cksum = internet_checksum(&buffer);
    let mut packet = MutableEchoRequestPacket::new(&mut buffer).unwrap();
    packet.set_checksum(cksum);

    buffer
}

/// Parse a received IP datagram into a [`ParsedReply`].
///
/// Types other than 0/3/11 are returned as-is; the caller treats them as
/// noise pending its timeout.
pub fn decode(datagram: &[u8]) -> Result<ParsedReply, DecodeError> {
    if datagram.len() < MIN_IP_HEADER {
        return Err(DecodeError::ShortPacket);
    }

    let ip = Ipv4Packet::new(datagram).ok_or(DecodeError::ShortPacket)?;
    let ihl = ip.get_header_length() as usize * 4;
    if datagram.len() < ihl + ICMP_HEADER_SIZE {
        return Err(DecodeError::ShortIcmp);
    }
    let source = IpAddr::V4(ip.get_source());

    let icmp = &datagram[ihl..];
    let icmp_type = icmp[0];
    let icmp_code = icmp[1];
    let identifier = u16::from_be_bytes([icmp[4], icmp[5]]);
    let sequence = u16::from_be_bytes([icmp[6], icmp[7]]);
    let checksum_ok = verify_checksum(icmp);

    let mut reply = ParsedReply {
        icmp_type,
        icmp_code,
        source,
        identifier: None,
        sequence: None,
        embedded_identifier: None,
        embedded_timestamp: None,
        is_truncated: false,
        checksum_ok,
    };

    match icmp_type {
        ICMP_ECHO_REPLY => {
            reply.identifier = Some(identifier);
            reply.sequence = Some(sequence);
            let payload = &icmp[ICMP_HEADER_SIZE..];
            if payload.len() >= TIMESTAMP_PAYLOAD_SIZE {
                reply.embedded_timestamp = Some(read_timestamp(payload));
            } else {
                reply.is_truncated = true;
            }
        }
        ICMP_TIME_EXCEEDED | ICMP_DEST_UNREACHABLE => {
            decode_quoted_original(&mut reply, datagram, ihl);
        }
        _ => {}
    }

    Ok(reply)
}

/// Recover the identifier (and, when quoted, the timestamp) from the original
/// datagram embedded in a type 3/11 error reply.
///
/// RFC 792 only guarantees the original IP header plus 8 bytes of its
/// payload, so the 8-byte timestamp payload is frequently absent; any
/// shortfall here is non-fatal and leaves the optional fields `None`.
fn decode_quoted_original(reply: &mut ParsedReply, datagram: &[u8], ihl: usize) {
    let inner_off = ihl + ICMP_HEADER_SIZE;
    if datagram.len() < inner_off + MIN_IP_HEADER {
        reply.is_truncated = true;
        return;
    }

    let inner_ihl = (datagram[inner_off] & 0x0F) as usize * 4;
    let inner_icmp_off = inner_off + inner_ihl;
    if datagram.len() < inner_icmp_off + ICMP_HEADER_SIZE {
        reply.is_truncated = true;
        return;
    }

    let inner_icmp = &datagram[inner_icmp_off..];
    reply.embedded_identifier = Some(u16::from_be_bytes([inner_icmp[4], inner_icmp[5]]));

    let inner_payload = &inner_icmp[ICMP_HEADER_SIZE..];
    if inner_payload.len() >= TIMESTAMP_PAYLOAD_SIZE {
        reply.embedded_timestamp = Some(read_timestamp(inner_payload));
    } else {
        reply.is_truncated = true;
    }
}

fn read_timestamp(payload: &[u8]) -> f64 {
    let mut bits = [0u8; 8];
    bits.copy_from_slice(&payload[..8]);
    f64::from_bits(u64::from_be_bytes(bits))
}
