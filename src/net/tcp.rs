//! TCP header parsing, construction, and pseudo-header checksum.

use std::net::Ipv4Addr;

use bitflags::bitflags;

use crate::error::PacketError;
use crate::net::internet_checksum;

/// Minimum TCP header length (data offset 5, no options).
pub const MIN_HEADER_LEN: usize = 20;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TcpFlags: u8 {
        const FIN = 0x01;
        const SYN = 0x02;
        const RST = 0x04;
        const PSH = 0x08;
        const ACK = 0x10;
        const URG = 0x20;
    }
}

/// A parsed TCP header view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u32,
    pub ack: u32,
    pub data_offset: u8,
    pub flags: TcpFlags,
    pub window: u16,
    pub checksum: u16,
}

impl TcpHeader {
    pub fn header_len(&self) -> usize {
        self.data_offset as usize * 4
    }

    pub fn parse(data: &[u8]) -> Result<Self, PacketError> {
        PacketError::require(data.len(), MIN_HEADER_LEN)?;

        let data_offset = data[12] >> 4;
        if data_offset < 5 {
            return Err(PacketError::TcpDataOffsetTooShort(data_offset));
        }

        Ok(Self {
            src_port: u16::from_be_bytes([data[0], data[1]]),
            dst_port: u16::from_be_bytes([data[2], data[3]]),
            seq: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            ack: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
            data_offset,
            flags: TcpFlags::from_bits_truncate(data[13]),
            window: u16::from_be_bytes([data[14], data[15]]),
            checksum: u16::from_be_bytes([data[16], data[17]]),
        })
    }

    pub fn set_src_port(data: &mut [u8], port: u16) {
        data[0..2].copy_from_slice(&port.to_be_bytes());
    }

    pub fn set_dst_port(data: &mut [u8], port: u16) {
        data[2..4].copy_from_slice(&port.to_be_bytes());
    }
}

/// Builds the TCP pseudo-header (RFC 793 §3.1) used for checksum
/// computation: source IP, destination IP, a zero byte, protocol = 6,
/// and the TCP segment length.
fn pseudo_header(src: Ipv4Addr, dst: Ipv4Addr, tcp_len: u16) -> [u8; 12] {
    let mut buf = [0u8; 12];
    buf[0..4].copy_from_slice(&src.octets());
    buf[4..8].copy_from_slice(&dst.octets());
    buf[8] = 0;
    buf[9] = 6; // protocol = TCP
    buf[10..12].copy_from_slice(&tcp_len.to_be_bytes());
    buf
}

/// Computes the checksum over the pseudo-header concatenated with the
/// TCP segment, padding a trailing odd byte with zero.
fn pseudo_checksum(src: Ipv4Addr, dst: Ipv4Addr, segment: &[u8]) -> u16 {
    let header = pseudo_header(src, dst, segment.len() as u16);
    let mut buf = Vec::with_capacity(header.len() + segment.len());
    buf.extend_from_slice(&header);
    buf.extend_from_slice(segment);
    internet_checksum(&buf)
}

/// Verifies the TCP checksum of a received segment.
pub fn verify_checksum(src: Ipv4Addr, dst: Ipv4Addr, segment: &[u8]) -> Result<(), PacketError> {
    if pseudo_checksum(src, dst, segment) != 0 {
        return Err(PacketError::TcpChecksumMismatch);
    }
    Ok(())
}

/// Recomputes and writes back the checksum field (bytes 16..18) of a TCP
/// segment, zeroing it first as the idiom requires.
pub fn recompute_checksum(src: Ipv4Addr, dst: Ipv4Addr, segment: &mut [u8]) {
    segment[16] = 0;
    segment[17] = 0;
    let sum = pseudo_checksum(src, dst, segment);
    segment[16..18].copy_from_slice(&sum.to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_segment() -> Vec<u8> {
        let mut buf = vec![0u8; MIN_HEADER_LEN];
        TcpHeader::set_src_port(&mut buf, 40000);
        TcpHeader::set_dst_port(&mut buf, 80);
        buf[4..8].copy_from_slice(&1000u32.to_be_bytes());
        buf[12] = 5 << 4;
        buf[13] = TcpFlags::SYN.bits();
        buf[14..16].copy_from_slice(&65535u16.to_be_bytes());
        buf
    }

    #[test]
    fn checksum_round_trips() {
        let src = Ipv4Addr::new(10, 0, 1, 10);
        let dst = Ipv4Addr::new(8, 8, 8, 8);
        let mut seg = sample_segment();
        recompute_checksum(src, dst, &mut seg);
        verify_checksum(src, dst, &seg).unwrap();
    }

    #[test]
    fn checksum_detects_tampering() {
        let src = Ipv4Addr::new(10, 0, 1, 10);
        let dst = Ipv4Addr::new(8, 8, 8, 8);
        let mut seg = sample_segment();
        recompute_checksum(src, dst, &mut seg);
        seg[0] ^= 0xFF;
        assert!(verify_checksum(src, dst, &seg).is_err());
    }

    #[test]
    fn parse_rejects_data_offset_below_five() {
        let mut seg = sample_segment();
        seg[12] = 4 << 4;
        assert!(TcpHeader::parse(&seg).is_err());
    }

    #[test]
    fn flags_round_trip() {
        let seg = sample_segment();
        let header = TcpHeader::parse(&seg).unwrap();
        assert!(header.flags.contains(TcpFlags::SYN));
        assert!(!header.flags.contains(TcpFlags::ACK));
    }
}
