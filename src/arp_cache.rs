//! ARP cache: resolved-address entries plus pending requests with their
//! queued packets. Shared by every pipeline thread and the cache's own
//! sweeper thread, serialized by a single mutex.
//!
//! The cache never performs I/O itself — [`ArpCache::sweep`] only
//! mutates its own tables and returns the actions the caller must carry
//! out (retransmit a request, or fail queued packets), so that no lock
//! is ever held across a blocking send.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::debug;

use crate::net::MacAddress;

/// A packet parked behind an unresolved ARP request.
#[derive(Debug, Clone)]
pub struct QueuedPacket {
    pub frame: Vec<u8>,
    pub out_interface: String,
}

#[derive(Debug, Clone)]
struct ArpEntry {
    mac: MacAddress,
    inserted_at: Instant,
}

#[derive(Debug, Clone)]
struct PendingRequestState {
    first_sent: Instant,
    last_sent: Instant,
    retransmissions: u32,
    queue: Vec<QueuedPacket>,
}

/// A snapshot of a pending ARP request, returned to callers so they can
/// act on it (send a probe, or flush queued packets) without holding
/// the cache's lock.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub target_ip: Ipv4Addr,
    pub queue: Vec<QueuedPacket>,
}

/// Action the sweeper must carry out after a sweep pass.
#[derive(Debug, Clone)]
pub enum SweepAction {
    /// Fewer than the retry limit of probes have been sent; send another.
    Retransmit { target_ip: Ipv4Addr },
    /// The retry budget is exhausted; these packets must each produce an
    /// ICMP host-unreachable back to their original source.
    Failed { queued: Vec<QueuedPacket> },
}

struct Inner {
    entries: HashMap<Ipv4Addr, ArpEntry>,
    pending: HashMap<Ipv4Addr, PendingRequestState>,
}

/// Shared, mutex-guarded ARP cache.
pub struct ArpCache {
    inner: Mutex<Inner>,
    entry_ttl: Duration,
    probe_interval: Duration,
    probe_retry_limit: u32,
}

impl ArpCache {
    pub fn new(entry_ttl: Duration, probe_interval: Duration, probe_retry_limit: u32) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                pending: HashMap::new(),
            }),
            entry_ttl,
            probe_interval,
            probe_retry_limit,
        }
    }

    /// Returns `(mac, remaining_ttl)` iff a live (unexpired) entry exists.
    pub fn lookup(&self, ip: Ipv4Addr, now: Instant) -> Option<(MacAddress, Duration)> {
        let inner = self.inner.lock().unwrap();
        let entry = inner.entries.get(&ip)?;
        let age = now.saturating_duration_since(entry.inserted_at);
        if age >= self.entry_ttl {
            return None;
        }
        Some((entry.mac, self.entry_ttl - age))
    }

    /// Inserts or refreshes an entry. If a pending request existed for
    /// this IP, it is removed and returned so the caller can flush its
    /// queued packets.
    pub fn insert(&self, ip: Ipv4Addr, mac: MacAddress, now: Instant) -> Option<PendingRequest> {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.insert(ip, ArpEntry { mac, inserted_at: now });
        debug!("arp: learned {ip} -> {mac}");

        inner.pending.remove(&ip).map(|state| PendingRequest {
            target_ip: ip,
            queue: state.queue,
        })
    }

    /// Appends `packet` to the pending request for `ip`, creating the
    /// request if absent. Returns the live request; the caller should
    /// emit an ARP probe immediately if this call created the request
    /// (i.e. the returned queue has exactly one packet and no probe has
    /// been sent for it yet — distinguished by `is_new`).
    pub fn queue(&self, ip: Ipv4Addr, packet: QueuedPacket, now: Instant) -> (PendingRequest, bool) {
        let mut inner = self.inner.lock().unwrap();
        let is_new = !inner.pending.contains_key(&ip);
        let state = inner.pending.entry(ip).or_insert_with(|| PendingRequestState {
            first_sent: now,
            last_sent: now,
            retransmissions: 0,
            queue: Vec::new(),
        });
        state.queue.push(packet);
        let snapshot = PendingRequest {
            target_ip: ip,
            queue: state.queue.clone(),
        };
        (snapshot, is_new)
    }

    /// Runs one sweep pass: retransmits requests older than the probe
    /// interval (up to the retry limit), and fails requests that have
    /// exhausted it. Two-phase: victims are collected and removed under
    /// one lock acquisition, before any action is returned to the caller.
    pub fn sweep(&self, now: Instant) -> Vec<SweepAction> {
        let mut inner = self.inner.lock().unwrap();

        // Phase 1: expire stale resolved entries.
        inner
            .entries
            .retain(|_, entry| now.saturating_duration_since(entry.inserted_at) < self.entry_ttl);

        // Phase 2: decide per-pending-request action without removing
        // anything yet that we still need to read.
        let mut to_retransmit = Vec::new();
        let mut to_fail = Vec::new();
        for (ip, state) in inner.pending.iter() {
            if state.retransmissions >= self.probe_retry_limit {
                to_fail.push(*ip);
            } else if now.saturating_duration_since(state.last_sent) >= self.probe_interval {
                to_retransmit.push(*ip);
            }
        }

        let mut actions = Vec::with_capacity(to_retransmit.len() + to_fail.len());

        for ip in to_retransmit {
            if let Some(state) = inner.pending.get_mut(&ip) {
                state.last_sent = now;
                state.retransmissions += 1;
                actions.push(SweepAction::Retransmit { target_ip: ip });
            }
        }

        for ip in to_fail {
            if let Some(state) = inner.pending.remove(&ip) {
                debug!(
                    "arp: resolution for {ip} failed after {} probes, dropping {} queued packet(s)",
                    state.retransmissions,
                    state.queue.len()
                );
                actions.push(SweepAction::Failed { queued: state.queue });
            }
        }

        actions
    }
}
