//! Error types for the router core.
//!
//! Mirrors the failure taxonomy of the packet pipeline: malformed wire
//! data is rejected by the codec layer with [`PacketError`], while
//! [`RouterError`] covers the higher-level conditions the pipeline and
//! NAT engine must react to (unroutable, unresolvable, unmapped, etc).
//! Every variant is consumed at the point of detection — nothing here
//! is meant to propagate past the pipeline boundary.

use std::fmt;

use thiserror::Error;

/// Errors raised while parsing or constructing a wire-format header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("buffer too short: need at least {need} bytes, have {have}")]
    BufferTooShort { need: usize, have: usize },
    #[error("IP header checksum mismatch")]
    IpChecksumMismatch,
    #[error("ICMP checksum mismatch")]
    IcmpChecksumMismatch,
    #[error("TCP checksum mismatch")]
    TcpChecksumMismatch,
    #[error("unsupported IP version {0}")]
    UnsupportedIpVersion(u8),
    #[error("IP total length {0} is shorter than the minimum header size")]
    IpTotalLengthTooShort(u16),
    #[error("TCP data offset {0} is shorter than the minimum header size")]
    TcpDataOffsetTooShort(u8),
    #[error("unsupported ARP hardware/protocol combination")]
    UnsupportedArpFormat,
}

impl PacketError {
    pub fn require(len: usize, need: usize) -> Result<(), PacketError> {
        if len < need {
            Err(PacketError::BufferTooShort { need, have: len })
        } else {
            Ok(())
        }
    }
}

/// Errors raised by the pipeline and NAT engine.
///
/// Each variant corresponds to one row of the error taxonomy in the
/// specification: propagation stops here, and the pipeline translates
/// most variants into an outbound ICMP message before dropping the
/// original packet.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] PacketError),

    #[error("no route to {dst}")]
    Unroutable { dst: std::net::Ipv4Addr },

    #[error("ARP resolution for {ip} exhausted its retry budget")]
    Unresolvable { ip: std::net::Ipv4Addr },

    #[error("no NAT mapping for external {kind:?} identifier {aux_ext}")]
    UnmappedInbound { kind: NatKindDisplay, aux_ext: u16 },

    #[error("TTL exhausted before reaching {dst}")]
    TtlExhausted { dst: std::net::Ipv4Addr },

    #[error("external TCP connection to restricted port {port}")]
    LocalRestrictedPort { port: u16 },

    #[error("internal packet addressed to router IP carries TCP/UDP")]
    PolicyRejectLocal,

    #[error("external identifier range exhausted for {kind:?}")]
    PortRangeExhausted { kind: NatKindDisplay },

    #[error("unknown interface {0:?}")]
    UnknownInterface(String),
}

/// Lightweight `Debug`-friendly stand-in used only to format `MappingKind`
/// in error messages without creating a dependency cycle with `nat::mapping`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NatKindDisplay {
    Icmp,
    Tcp,
}

impl fmt::Display for NatKindDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NatKindDisplay::Icmp => write!(f, "ICMP"),
            NatKindDisplay::Tcp => write!(f, "TCP"),
        }
    }
}

pub type Result<T> = std::result::Result<T, RouterError>;
