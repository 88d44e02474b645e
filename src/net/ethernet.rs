//! Ethernet II frame parsing and construction.

use crate::error::PacketError;
use crate::net::MacAddress;

/// Ethernet header size: dst(6) + src(6) + ethertype(2).
pub const HEADER_LEN: usize = 14;

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_ARP: u16 = 0x0806;

/// A parsed Ethernet frame: a structural view over the caller's buffer.
#[derive(Debug, Clone, Copy)]
pub struct EthernetFrame<'a> {
    pub dst_mac: MacAddress,
    pub src_mac: MacAddress,
    pub ethertype: u16,
    pub payload: &'a [u8],
}

impl<'a> EthernetFrame<'a> {
    /// Parses an Ethernet frame out of `data`. Refuses to construct a view
    /// that would read past the buffer.
    pub fn parse(data: &'a [u8]) -> Result<Self, PacketError> {
        PacketError::require(data.len(), HEADER_LEN)?;

        let mut dst = [0u8; 6];
        let mut src = [0u8; 6];
        dst.copy_from_slice(&data[0..6]);
        src.copy_from_slice(&data[6..12]);
        let ethertype = u16::from_be_bytes([data[12], data[13]]);

        Ok(Self {
            dst_mac: MacAddress(dst),
            src_mac: MacAddress(src),
            ethertype,
            payload: &data[HEADER_LEN..],
        })
    }
}

/// Builds a complete Ethernet frame (header + payload) into a fresh buffer.
pub fn build(dst: MacAddress, src: MacAddress, ethertype: u16, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&dst.0);
    frame.extend_from_slice(&src.0);
    frame.extend_from_slice(&ethertype.to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Overwrites the destination and source MAC fields of an already-built
/// frame in place. Used by the send path, which fills these in only once
/// ARP resolution has completed.
pub fn set_addresses(frame: &mut [u8], dst: MacAddress, src: MacAddress) {
    frame[0..6].copy_from_slice(&dst.0);
    frame[6..12].copy_from_slice(&src.0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_then_parse_round_trips() {
        let dst = MacAddress([0xFF; 6]);
        let src = MacAddress([0x52, 0x54, 0x00, 0x12, 0x34, 0x56]);
        let payload = b"hello";

        let frame = build(dst, src, ETHERTYPE_IPV4, payload);
        let parsed = EthernetFrame::parse(&frame).unwrap();

        assert_eq!(parsed.dst_mac, dst);
        assert_eq!(parsed.src_mac, src);
        assert_eq!(parsed.ethertype, ETHERTYPE_IPV4);
        assert_eq!(parsed.payload, payload);
    }

    #[test]
    fn parse_rejects_short_buffer() {
        let short = [0u8; 10];
        assert!(EthernetFrame::parse(&short).is_err());
    }

    #[test]
    fn set_addresses_overwrites_in_place() {
        let mut frame = build(MacAddress::ZERO, MacAddress::ZERO, ETHERTYPE_ARP, &[]);
        let dst = MacAddress([1, 2, 3, 4, 5, 6]);
        let src = MacAddress([6, 5, 4, 3, 2, 1]);
        set_addresses(&mut frame, dst, src);
        let parsed = EthernetFrame::parse(&frame).unwrap();
        assert_eq!(parsed.dst_mac, dst);
        assert_eq!(parsed.src_mac, src);
    }
}
