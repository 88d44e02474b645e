//! The NAT state engine: mapping table, per-mapping connection subtables,
//! the unsolicited-SYN holding table, the external-identifier allocator,
//! and the periodic timeout sweep — all guarded by a single lock.
//!
//! Every public method here acquires the lock, does its work, and
//! releases it before returning; no method calls another while still
//! holding it, so a plain (non-reentrant) [`std::sync::Mutex`] is
//! sufficient even though the specification describes a recursive one.

pub mod connection;
pub mod mapping;
pub mod syn_queue;

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::error::{NatKindDisplay, RouterError};
use crate::nat::connection::{transition, Direction};
use crate::nat::mapping::{Connection, InternalKey, Mapping, MappingKind, TcpConnState};
use crate::nat::syn_queue::SynTable;
use crate::net::tcp::TcpFlags;

const MIN_EXTERNAL_ID: u16 = 1024;
const MAX_EXTERNAL_ID: u16 = 65535;

/// An action the sweeper must carry out after a sweep pass: a parked SYN
/// that timed out with no mapping ever appearing for it gets an ICMP
/// port-unreachable sent back to its source.
#[derive(Debug, Clone)]
pub enum NatSweepAction {
    UnsolicitedSynExpired { original_frame: Vec<u8> },
}

struct Inner {
    mappings: HashMap<InternalKey, Mapping>,
    external_index: HashMap<(MappingKind, u16), InternalKey>,
    syn_table: SynTable,
    icmp_next_id: u16,
    tcp_next_id: u16,
}

impl Inner {
    fn allocate_external_id(&mut self, kind: MappingKind) -> Result<u16, RouterError> {
        let counter = match kind {
            MappingKind::Icmp => &mut self.icmp_next_id,
            MappingKind::Tcp => &mut self.tcp_next_id,
        };

        let start = *counter;
        let mut candidate = start;
        loop {
            if !self.external_index.contains_key(&(kind, candidate)) {
                *counter = if candidate == MAX_EXTERNAL_ID { MIN_EXTERNAL_ID } else { candidate + 1 };
                return Ok(candidate);
            }
            candidate = if candidate == MAX_EXTERNAL_ID { MIN_EXTERNAL_ID } else { candidate + 1 };
            if candidate == start {
                return Err(RouterError::PortRangeExhausted { kind: display_kind(kind) });
            }
        }
    }
}

fn display_kind(kind: MappingKind) -> NatKindDisplay {
    match kind {
        MappingKind::Icmp => NatKindDisplay::Icmp,
        MappingKind::Tcp => NatKindDisplay::Tcp,
    }
}

/// The NAT state engine. Construct one per NAT instance — the external
/// identifier counters live here rather than as process globals, so
/// multiple engines (e.g. in tests) never interfere with each other.
pub struct NatEngine {
    inner: Mutex<Inner>,
    icmp_query_timeout: Duration,
    tcp_established_idle_timeout: Duration,
    tcp_transitory_idle_timeout: Duration,
    unsolicited_syn_grace: Duration,
}

impl NatEngine {
    pub fn new(
        icmp_query_timeout: Duration,
        tcp_established_idle_timeout: Duration,
        tcp_transitory_idle_timeout: Duration,
        unsolicited_syn_grace: Duration,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                mappings: HashMap::new(),
                external_index: HashMap::new(),
                syn_table: SynTable::new(),
                icmp_next_id: MIN_EXTERNAL_ID,
                tcp_next_id: MIN_EXTERNAL_ID,
            }),
            icmp_query_timeout,
            tcp_established_idle_timeout,
            tcp_transitory_idle_timeout,
            unsolicited_syn_grace,
        }
    }

    /// Returns an owned snapshot of the mapping for (ip_int, aux_int, kind), if any.
    pub fn lookup_internal(&self, ip_int: Ipv4Addr, aux_int: u16, kind: MappingKind) -> Option<Mapping> {
        let inner = self.inner.lock().unwrap();
        inner.mappings.get(&InternalKey { kind, ip_int, aux_int }).cloned()
    }

    /// Returns an owned snapshot of the mapping for (aux_ext, kind), if any.
    pub fn lookup_external(&self, aux_ext: u16, kind: MappingKind) -> Option<Mapping> {
        let inner = self.inner.lock().unwrap();
        let key = inner.external_index.get(&(kind, aux_ext))?;
        inner.mappings.get(key).cloned()
    }

    pub fn has_external_mapping(&self, aux_ext: u16, kind: MappingKind) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.external_index.contains_key(&(kind, aux_ext))
    }

    /// Idempotent: returns the existing mapping's snapshot if one is
    /// already installed for this internal key, otherwise allocates a
    /// fresh external identifier and installs a new mapping.
    ///
    /// The returned mapping's `ip_ext` is `Ipv4Addr::UNSPECIFIED` on
    /// first creation — callers must follow up with [`Self::touch_mapping`]
    /// to set it to the external interface's address, per the
    /// snapshot-vs-truth split (see module docs and the design notes in
    /// SPEC_FULL.md §9).
    pub fn insert_mapping(
        &self,
        ip_int: Ipv4Addr,
        aux_int: u16,
        kind: MappingKind,
        now: Instant,
    ) -> Result<Mapping, RouterError> {
        let mut inner = self.inner.lock().unwrap();
        let key = InternalKey { kind, ip_int, aux_int };

        if let Some(existing) = inner.mappings.get(&key) {
            return Ok(existing.clone());
        }

        let aux_ext = inner.allocate_external_id(kind)?;
        let mapping = Mapping {
            kind,
            ip_int,
            ip_ext: Ipv4Addr::UNSPECIFIED,
            aux_int,
            aux_ext,
            last_touched: now,
            connections: HashMap::new(),
        };

        inner.external_index.insert((kind, aux_ext), key);
        inner.mappings.insert(key, mapping.clone());
        info!("nat: new {kind:?} mapping {ip_int}:{aux_int} -> *:{aux_ext}");
        Ok(mapping)
    }

    /// Updates the mapping located by its internal key in place: bumps
    /// `last_touched` to `now`, and if `ip_ext` is `Some`, sets the
    /// mapping's external IP. Returns `false` if no such mapping exists.
    pub fn touch_mapping(
        &self,
        ip_int: Ipv4Addr,
        aux_int: u16,
        kind: MappingKind,
        now: Instant,
        ip_ext: Option<Ipv4Addr>,
    ) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let key = InternalKey { kind, ip_int, aux_int };
        let Some(mapping) = inner.mappings.get_mut(&key) else { return false };
        mapping.last_touched = now;
        if let Some(ip_ext) = ip_ext {
            mapping.ip_ext = ip_ext;
        }
        true
    }

    /// Returns a snapshot of the connection keyed by `remote_ip` under
    /// the mapping identified by `mapping_key`, creating it (in state
    /// `Closed`) if absent.
    pub fn get_or_create_connection(
        &self,
        mapping_key: InternalKey,
        remote_ip: Ipv4Addr,
        now: Instant,
    ) -> Option<Connection> {
        let mut inner = self.inner.lock().unwrap();
        let mapping = inner.mappings.get_mut(&mapping_key)?;
        mapping.last_touched = now;
        let conn = mapping
            .connections
            .entry(remote_ip)
            .or_insert_with(|| Connection::new(remote_ip, now));
        Some(conn.clone())
    }

    /// Writes back the result of a state machine transition for the
    /// connection keyed by (`mapping_key`, `remote_ip`).
    pub fn touch_connection(
        &self,
        mapping_key: InternalKey,
        remote_ip: Ipv4Addr,
        state: Option<TcpConnState>,
        client_seq: Option<u32>,
        server_seq: Option<u32>,
        now: Instant,
    ) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(mapping) = inner.mappings.get_mut(&mapping_key) else { return false };
        mapping.last_touched = now;
        let Some(conn) = mapping.connections.get_mut(&remote_ip) else { return false };
        if let Some(state) = state {
            conn.state = state;
        }
        if let Some(seq) = client_seq {
            conn.client_seq = seq;
        }
        if let Some(seq) = server_seq {
            conn.server_seq = seq;
        }
        conn.last_touched = now;
        true
    }

    /// Drives the TCP state machine for a segment on (`mapping_key`,
    /// `remote_ip`), applying the result and parking an unsolicited SYN
    /// entry when the transition says to. `external_port` is the mapping's
    /// own `aux_ext` - the NAT-facing port a parked entry must be checked
    /// against on sweep, not the remote peer's source port. Returns the
    /// resulting state.
    pub fn drive_tcp(
        &self,
        mapping_key: InternalKey,
        remote_ip: Ipv4Addr,
        external_port: u16,
        dir: Direction,
        flags: TcpFlags,
        seq: u32,
        ack: u32,
        original_frame_for_park: Option<&[u8]>,
        now: Instant,
    ) -> Option<TcpConnState> {
        let conn = self.get_or_create_connection(mapping_key, remote_ip, now)?;
        let result = transition(conn.state, dir, flags, seq, ack, conn.client_seq, conn.server_seq);
        self.touch_connection(
            mapping_key,
            remote_ip,
            Some(result.state),
            result.client_seq,
            result.server_seq,
            now,
        );
        if result.park_as_unsolicited {
            if let Some(frame) = original_frame_for_park {
                self.park_syn(remote_ip, external_port, frame.to_vec(), now);
            }
        }
        Some(result.state)
    }

    /// Deduplicated insert into the unsolicited-SYN table, keyed by the
    /// NAT-facing external port the SYN was addressed to.
    pub fn park_syn(&self, remote_ip: Ipv4Addr, external_port: u16, frame: Vec<u8>, now: Instant) {
        let mut inner = self.inner.lock().unwrap();
        inner.syn_table.park(remote_ip, external_port, frame, now);
    }

    /// One full timeout sweep: ages out unsolicited SYNs, ICMP query
    /// mappings, and TCP connections/mappings, per the timeouts this
    /// engine was configured with. Returns the ICMP actions the caller
    /// (which owns the send path) must carry out.
    pub fn sweep(&self, now: Instant) -> Vec<NatSweepAction> {
        let mut inner = self.inner.lock().unwrap();
        let mut actions = Vec::new();

        // 1. Unsolicited SYNs past their grace period.
        let expired_syns = inner.syn_table.take_expired(now, self.unsolicited_syn_grace);
        for (key, parked) in expired_syns {
            let still_unmapped = !inner.external_index.contains_key(&(MappingKind::Tcp, key.external_port));
            if still_unmapped {
                actions.push(NatSweepAction::UnsolicitedSynExpired { original_frame: parked.frame });
            }
        }

        // 2. ICMP query mappings past their timeout.
        let expired_icmp: Vec<InternalKey> = inner
            .mappings
            .values()
            .filter(|m| m.kind == MappingKind::Icmp)
            .filter(|m| now.saturating_duration_since(m.last_touched) >= self.icmp_query_timeout)
            .map(|m| m.internal_key())
            .collect();
        for key in expired_icmp {
            if let Some(mapping) = inner.mappings.remove(&key) {
                inner.external_index.remove(&(key.kind, mapping.aux_ext));
                debug!("nat: reaped idle ICMP mapping {key:?}");
            }
        }

        // 3. TCP connections/mappings: two-phase — collect victims, then remove.
        let tcp_keys: Vec<InternalKey> = inner
            .mappings
            .values()
            .filter(|m| m.kind == MappingKind::Tcp)
            .map(|m| m.internal_key())
            .collect();

        for key in tcp_keys {
            let established_idle = self.tcp_established_idle_timeout;
            let transitory_idle = self.tcp_transitory_idle_timeout;

            let Some(mapping) = inner.mappings.get_mut(&key) else { continue };
            let dead_remotes: Vec<Ipv4Addr> = mapping
                .connections
                .values()
                .filter(|c| {
                    let age = now.saturating_duration_since(c.last_touched);
                    let timeout = if c.state.is_established_class() { established_idle } else { transitory_idle };
                    age >= timeout
                })
                .map(|c| c.remote_ip)
                .collect();

            for remote in &dead_remotes {
                mapping.connections.remove(remote);
            }

            if mapping.has_no_connections() {
                let aux_ext = mapping.aux_ext;
                inner.mappings.remove(&key);
                inner.external_index.remove(&(key.kind, aux_ext));
                debug!("nat: reaped TCP mapping {key:?} with no remaining connections");
            }
        }

        if !actions.is_empty() {
            warn!("nat: {} unsolicited SYN(s) timed out unmapped", actions.len());
        }

        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> NatEngine {
        NatEngine::new(
            Duration::from_secs(60),
            Duration::from_secs(7440),
            Duration::from_secs(240),
            Duration::from_secs(6),
        )
    }

    #[test]
    fn insert_mapping_is_idempotent() {
        let engine = engine();
        let now = Instant::now();
        let ip = Ipv4Addr::new(10, 0, 1, 10);

        let first = engine.insert_mapping(ip, 40000, MappingKind::Tcp, now).unwrap();
        let second = engine.insert_mapping(ip, 40000, MappingKind::Tcp, now).unwrap();
        assert_eq!(first.aux_ext, second.aux_ext);
        assert_eq!(first.aux_ext, 1024);
    }

    #[test]
    fn distinct_internal_keys_get_distinct_external_ids() {
        let engine = engine();
        let now = Instant::now();
        let m1 = engine.insert_mapping(Ipv4Addr::new(10, 0, 1, 10), 1, MappingKind::Tcp, now).unwrap();
        let m2 = engine.insert_mapping(Ipv4Addr::new(10, 0, 1, 11), 1, MappingKind::Tcp, now).unwrap();
        assert_ne!(m1.aux_ext, m2.aux_ext);
    }

    #[test]
    fn touch_mapping_sets_external_ip_without_disturbing_insert_snapshot() {
        let engine = engine();
        let now = Instant::now();
        let ip = Ipv4Addr::new(10, 0, 1, 10);
        let inserted = engine.insert_mapping(ip, 40000, MappingKind::Tcp, now).unwrap();
        assert_eq!(inserted.ip_ext, Ipv4Addr::UNSPECIFIED);

        let ext_ip = Ipv4Addr::new(172, 16, 0, 1);
        assert!(engine.touch_mapping(ip, 40000, MappingKind::Tcp, now, Some(ext_ip)));

        let looked_up = engine.lookup_internal(ip, 40000, MappingKind::Tcp).unwrap();
        assert_eq!(looked_up.ip_ext, ext_ip);
    }

    #[test]
    fn external_id_allocator_wraps_and_skips_live_identifiers() {
        let engine = engine();
        let now = Instant::now();

        // Exhaust down to one free id near the top of the range by
        // directly driving the allocator through many inserts.
        for i in 0..(65535 - 1024 + 1) {
            let ip = Ipv4Addr::from(u32::from(Ipv4Addr::new(10, 0, 0, 0)) + i as u32);
            engine.insert_mapping(ip, 1, MappingKind::Icmp, now).unwrap();
        }

        // The range (1024..=65535 inclusive, 64512 values) is now fully
        // allocated; the next insert must fail.
        let result = engine.insert_mapping(Ipv4Addr::new(255, 255, 255, 254), 1, MappingKind::Icmp, now);
        assert!(result.is_err());
    }

    #[test]
    fn sweep_reaps_idle_icmp_mapping() {
        let engine = engine();
        let t0 = Instant::now();
        let ip = Ipv4Addr::new(10, 0, 1, 10);
        engine.insert_mapping(ip, 7, MappingKind::Icmp, t0).unwrap();

        let later = t0 + Duration::from_secs(61);
        engine.sweep(later);
        assert!(engine.lookup_internal(ip, 7, MappingKind::Icmp).is_none());
    }

    #[test]
    fn sweep_reaps_tcp_mapping_once_its_only_connection_expires() {
        let engine = engine();
        let t0 = Instant::now();
        let ip = Ipv4Addr::new(10, 0, 1, 10);
        let mapping = engine.insert_mapping(ip, 40000, MappingKind::Tcp, t0).unwrap();
        let key = mapping.internal_key();
        engine.get_or_create_connection(key, Ipv4Addr::new(8, 8, 8, 8), t0);

        let later = t0 + Duration::from_secs(241); // past transitory idle timeout
        engine.sweep(later);
        assert!(engine.lookup_internal(ip, 40000, MappingKind::Tcp).is_none());
    }

    #[test]
    fn sweep_emits_port_unreachable_for_unmapped_expired_syn() {
        let engine = engine();
        let t0 = Instant::now();
        engine.park_syn(Ipv4Addr::new(203, 0, 113, 9), 5555, vec![9, 9, 9], t0);

        let actions = engine.sweep(t0 + Duration::from_secs(7));
        assert_eq!(actions.len(), 1);
        assert!(matches!(&actions[0], NatSweepAction::UnsolicitedSynExpired { original_frame } if original_frame == &vec![9, 9, 9]));
    }

    #[test]
    fn sweep_drops_expired_syn_silently_once_mapping_exists() {
        let engine = engine();
        let t0 = Instant::now();
        // A mapping shows up for some internal flow, allocating an external
        // port, before the grace period ends - the SYN is parked against
        // that exact external port, not the internal one.
        let mapping = engine.insert_mapping(Ipv4Addr::new(10, 0, 1, 10), 40000, MappingKind::Tcp, t0).unwrap();
        engine.park_syn(Ipv4Addr::new(203, 0, 113, 9), mapping.aux_ext, vec![9], t0);

        let actions = engine.sweep(t0 + Duration::from_secs(7));
        assert!(actions.is_empty());
    }
}
