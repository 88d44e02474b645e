//! NAT mapping and per-mapping connection records.
//!
//! These are the types [`crate::nat::NatEngine`] owns internally and the
//! owned snapshots it hands back to callers. Snapshots are read-only —
//! every mutation goes through a keyed `touch_*` call on the engine, per
//! the snapshot-vs-truth split mandated by the specification.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::Instant;

/// Which protocol a mapping translates identifiers for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MappingKind {
    Icmp,
    Tcp,
}

/// The natural key of a mapping from the internal side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InternalKey {
    pub kind: MappingKind,
    pub ip_int: Ipv4Addr,
    pub aux_int: u16,
}

/// TCP connection state, named per RFC 793 (plus the router-local
/// `Closed` terminal state, which the spec tracks explicitly so an
/// established connection that sees FIN+ACK can be reaped).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpConnState {
    Closed,
    Listen,
    SynSent,
    SynReceived,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    Closing,
    LastAck,
    TimeWait,
}

impl TcpConnState {
    /// Connections in these states use the long "established" idle
    /// timeout; all others use the short "transitory" one.
    pub fn is_established_class(&self) -> bool {
        matches!(
            self,
            TcpConnState::Established
                | TcpConnState::FinWait1
                | TcpConnState::FinWait2
                | TcpConnState::CloseWait
        )
    }
}

/// A per-mapping TCP connection, keyed by the remote (external) peer IP.
#[derive(Debug, Clone)]
pub struct Connection {
    pub remote_ip: Ipv4Addr,
    pub state: TcpConnState,
    pub client_seq: u32,
    pub server_seq: u32,
    pub last_touched: Instant,
}

impl Connection {
    pub fn new(remote_ip: Ipv4Addr, now: Instant) -> Self {
        Self {
            remote_ip,
            state: TcpConnState::Closed,
            client_seq: 0,
            server_seq: 0,
            last_touched: now,
        }
    }
}

/// An installed NAT binding between an internal (IP, identifier) and an
/// external identifier.
#[derive(Debug, Clone)]
pub struct Mapping {
    pub kind: MappingKind,
    pub ip_int: Ipv4Addr,
    pub ip_ext: Ipv4Addr,
    pub aux_int: u16,
    pub aux_ext: u16,
    pub last_touched: Instant,
    pub connections: HashMap<Ipv4Addr, Connection>,
}

impl Mapping {
    pub fn internal_key(&self) -> InternalKey {
        InternalKey { kind: self.kind, ip_int: self.ip_int, aux_int: self.aux_int }
    }

    /// True once every connection under this mapping has been reaped;
    /// ICMP mappings (which never have connections) are never eligible
    /// by this rule alone — the sweeper ages those out by timeout instead.
    pub fn has_no_connections(&self) -> bool {
        self.kind == MappingKind::Tcp && self.connections.is_empty()
    }
}
