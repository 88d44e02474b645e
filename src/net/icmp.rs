//! ICMPv4 echo, destination-unreachable and time-exceeded message handling.

use crate::error::PacketError;
use crate::net::internet_checksum;

pub const TYPE_ECHO_REPLY: u8 = 0;
pub const TYPE_DEST_UNREACHABLE: u8 = 3;
pub const TYPE_ECHO_REQUEST: u8 = 8;
pub const TYPE_TIME_EXCEEDED: u8 = 11;

pub const CODE_NET_UNREACHABLE: u8 = 0;
pub const CODE_HOST_UNREACHABLE: u8 = 1;
pub const CODE_PORT_UNREACHABLE: u8 = 3;

pub const CODE_TTL_EXCEEDED_IN_TRANSIT: u8 = 0;

/// Minimum ICMP header length: type(1) + code(1) + checksum(2) + rest-of-header(4).
pub const HEADER_LEN: usize = 8;

/// An echo request/reply header view (type 8 or type 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoHeader {
    pub icmp_type: u8,
    pub code: u8,
    pub checksum: u16,
    pub identifier: u16,
    pub sequence: u16,
}

impl EchoHeader {
    pub fn parse(data: &[u8]) -> Result<Self, PacketError> {
        PacketError::require(data.len(), HEADER_LEN)?;
        Ok(Self {
            icmp_type: data[0],
            code: data[1],
            checksum: u16::from_be_bytes([data[2], data[3]]),
            identifier: u16::from_be_bytes([data[4], data[5]]),
            sequence: u16::from_be_bytes([data[6], data[7]]),
        })
    }

    pub fn is_echo_request(&self) -> bool {
        self.icmp_type == TYPE_ECHO_REQUEST
    }

    pub fn is_echo_reply(&self) -> bool {
        self.icmp_type == TYPE_ECHO_REPLY
    }
}

/// Verifies the ICMP checksum over exactly `len` bytes starting at `data`
/// (the specification requires computing it over `total_length -
/// ip_header_len` bytes, which the caller slices out beforehand).
pub fn verify_checksum(data: &[u8]) -> Result<(), PacketError> {
    PacketError::require(data.len(), HEADER_LEN)?;
    if internet_checksum(data) != 0 {
        return Err(PacketError::IcmpChecksumMismatch);
    }
    Ok(())
}

/// Recomputes and writes back the checksum over the whole ICMP message.
pub fn recompute_checksum(data: &mut [u8]) {
    data[2] = 0;
    data[3] = 0;
    let sum = internet_checksum(data);
    data[2..4].copy_from_slice(&sum.to_be_bytes());
}

/// Overwrites the 16-bit identifier field of an echo message in place
/// (used by the NAT path to rewrite ICMP query ids).
pub fn set_identifier(data: &mut [u8], id: u16) {
    data[4..6].copy_from_slice(&id.to_be_bytes());
}

pub fn identifier(data: &[u8]) -> u16 {
    u16::from_be_bytes([data[4], data[5]])
}

/// Turns an echo request in place into an echo reply: flips the type,
/// recomputes the checksum. The caller is responsible for swapping the
/// surrounding IP addresses.
pub fn rewrite_request_to_reply(data: &mut [u8]) {
    data[0] = TYPE_ECHO_REPLY;
    recompute_checksum(data);
}

/// Builds a destination-unreachable or time-exceeded message carrying the
/// offending IP header plus the first 8 bytes of its payload, as RFC 792
/// requires and as the specification's §6 mandates.
///
/// `original_ip_packet` is the full received IP packet (header + payload);
/// `ip_header_len` is that packet's *actual* header length (honouring a
/// non-default IHL), not a hardcoded 20.
pub fn build_error(icmp_type: u8, code: u8, original_ip_packet: &[u8], ip_header_len: usize) -> Vec<u8> {
    let take = (ip_header_len + 8).min(original_ip_packet.len());
    let mut msg = Vec::with_capacity(HEADER_LEN + take);
    msg.push(icmp_type);
    msg.push(code);
    msg.push(0); // checksum placeholder
    msg.push(0);
    msg.extend_from_slice(&[0u8; 4]); // unused / next-hop MTU, unused here
    msg.extend_from_slice(&original_ip_packet[..take]);
    recompute_checksum(&mut msg);
    msg
}
