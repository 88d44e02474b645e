//! The unsolicited-SYN holding table: inbound TCP SYNs parked for the
//! RFC 5382 grace period while we wait to see whether a NAT mapping
//! ever appears for their destination port.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::Instant;

/// Key for a parked SYN: at most one entry per (remote IP, external port).
/// `external_port` is the NAT-facing port the SYN was addressed to (the
/// mapping's `aux_ext`, or the segment's raw destination port when no
/// mapping exists yet) - not the remote peer's own source port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SynKey {
    pub remote_ip: Ipv4Addr,
    pub external_port: u16,
}

#[derive(Debug, Clone)]
pub struct ParkedSyn {
    pub frame: Vec<u8>,
    pub first_seen: Instant,
}

#[derive(Debug, Default)]
pub struct SynTable {
    entries: HashMap<SynKey, ParkedSyn>,
}

impl SynTable {
    pub fn new() -> Self {
        Self { entries: HashMap::new() }
    }

    /// Deduplicated insert: a SYN already parked for this (ip, port) is
    /// left untouched rather than overwritten, so its grace period keeps
    /// counting from the first sighting.
    pub fn park(&mut self, remote_ip: Ipv4Addr, external_port: u16, frame: Vec<u8>, now: Instant) {
        self.entries
            .entry(SynKey { remote_ip, external_port })
            .or_insert(ParkedSyn { frame, first_seen: now });
    }

    pub fn contains(&self, remote_ip: Ipv4Addr, external_port: u16) -> bool {
        self.entries.contains_key(&SynKey { remote_ip, external_port })
    }

    /// Removes and returns every entry older than `grace`, for the
    /// sweeper to judge against the current mapping table.
    pub fn take_expired(&mut self, now: Instant, grace: std::time::Duration) -> Vec<(SynKey, ParkedSyn)> {
        let expired_keys: Vec<SynKey> = self
            .entries
            .iter()
            .filter(|(_, parked)| now.saturating_duration_since(parked.first_seen) >= grace)
            .map(|(key, _)| *key)
            .collect();

        expired_keys
            .into_iter()
            .filter_map(|key| self.entries.remove(&key).map(|parked| (key, parked)))
            .collect()
    }
}
