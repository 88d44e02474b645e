//! ARP (RFC 826) packet parsing and construction for Ethernet/IPv4.

use std::net::Ipv4Addr;

use crate::error::PacketError;
use crate::net::MacAddress;

pub const HARDWARE_ETHERNET: u16 = 1;
pub const PROTOCOL_IPV4: u16 = 0x0800;
pub const OP_REQUEST: u16 = 1;
pub const OP_REPLY: u16 = 2;

/// ARP header size for the Ethernet/IPv4 combination this router supports.
pub const PACKET_LEN: usize = 28;

/// A parsed ARP packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpPacket {
    pub operation: u16,
    pub sender_mac: MacAddress,
    pub sender_ip: Ipv4Addr,
    pub target_mac: MacAddress,
    pub target_ip: Ipv4Addr,
}

impl ArpPacket {
    pub fn is_request(&self) -> bool {
        self.operation == OP_REQUEST
    }

    pub fn is_reply(&self) -> bool {
        self.operation == OP_REPLY
    }

    /// Parses an ARP packet, validating hardware type = Ethernet and
    /// protocol = IPv4 as the specification requires.
    pub fn parse(data: &[u8]) -> Result<Self, PacketError> {
        PacketError::require(data.len(), PACKET_LEN)?;

        let htype = u16::from_be_bytes([data[0], data[1]]);
        let ptype = u16::from_be_bytes([data[2], data[3]]);
        let hlen = data[4];
        let plen = data[5];
        let operation = u16::from_be_bytes([data[6], data[7]]);

        if htype != HARDWARE_ETHERNET || ptype != PROTOCOL_IPV4 || hlen != 6 || plen != 4 {
            return Err(PacketError::UnsupportedArpFormat);
        }

        let mut sender_mac = [0u8; 6];
        sender_mac.copy_from_slice(&data[8..14]);
        let sender_ip = Ipv4Addr::new(data[14], data[15], data[16], data[17]);

        let mut target_mac = [0u8; 6];
        target_mac.copy_from_slice(&data[18..24]);
        let target_ip = Ipv4Addr::new(data[24], data[25], data[26], data[27]);

        Ok(Self {
            operation,
            sender_mac: MacAddress(sender_mac),
            sender_ip,
            target_mac: MacAddress(target_mac),
            target_ip,
        })
    }

    /// Serializes this packet to its 28-byte wire form.
    pub fn to_bytes(&self) -> [u8; PACKET_LEN] {
        let mut buf = [0u8; PACKET_LEN];
        buf[0..2].copy_from_slice(&HARDWARE_ETHERNET.to_be_bytes());
        buf[2..4].copy_from_slice(&PROTOCOL_IPV4.to_be_bytes());
        buf[4] = 6;
        buf[5] = 4;
        buf[6..8].copy_from_slice(&self.operation.to_be_bytes());
        buf[8..14].copy_from_slice(&self.sender_mac.0);
        buf[14..18].copy_from_slice(&self.sender_ip.octets());
        buf[18..24].copy_from_slice(&self.target_mac.0);
        buf[24..28].copy_from_slice(&self.target_ip.octets());
        buf
    }

    /// Builds a request for `target_ip`, sent from `sender_mac`/`sender_ip`.
    pub fn request(sender_mac: MacAddress, sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Self {
        Self {
            operation: OP_REQUEST,
            sender_mac,
            sender_ip,
            target_mac: MacAddress::ZERO,
            target_ip,
        }
    }

    /// Builds a reply from a received request, swapping sender/target roles.
    pub fn reply_to(request: &ArpPacket, our_mac: MacAddress, our_ip: Ipv4Addr) -> Self {
        Self {
            operation: OP_REPLY,
            sender_mac: our_mac,
            sender_ip: our_ip,
            target_mac: request.sender_mac,
            target_ip: request.sender_ip,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips_through_bytes() {
        let mac = MacAddress([0x52, 0x54, 0x00, 0x12, 0x34, 0x56]);
        let pkt = ArpPacket::request(mac, Ipv4Addr::new(10, 0, 2, 15), Ipv4Addr::new(10, 0, 2, 1));
        let bytes = pkt.to_bytes();
        let parsed = ArpPacket::parse(&bytes).unwrap();
        assert_eq!(parsed, pkt);
        assert!(parsed.is_request());
    }

    #[test]
    fn reply_to_swaps_roles() {
        let our_mac = MacAddress([1; 6]);
        let our_ip = Ipv4Addr::new(10, 0, 1, 1);
        let req = ArpPacket::request(
            MacAddress([2; 6]),
            Ipv4Addr::new(10, 0, 1, 10),
            our_ip,
        );
        let reply = ArpPacket::reply_to(&req, our_mac, our_ip);
        assert!(reply.is_reply());
        assert_eq!(reply.sender_mac, our_mac);
        assert_eq!(reply.target_mac, req.sender_mac);
        assert_eq!(reply.target_ip, req.sender_ip);
    }

    #[test]
    fn parse_rejects_wrong_hardware_type() {
        let mut bytes = ArpPacket::request(
            MacAddress::ZERO,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
        )
        .to_bytes();
        bytes[1] = 2; // hardware type != Ethernet
        assert!(ArpPacket::parse(&bytes).is_err());
    }
}
