pub mod codec;
pub mod engine;
pub mod socket;

pub use codec::{decode, encode_echo_request, DecodeError, ParsedReply};
pub use engine::{
    epoch_seconds, process_identifier, IcmpProber, ProbeOutcome, ProbeSpec, Prober, ProtocolKind,
};
pub use socket::{create_raw_icmp_socket, send_icmp, set_ttl};
