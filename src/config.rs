//! Process-wide configuration, set once at startup and read-only thereafter.
//!
//! Parsing this from flags or a file is the job of an external
//! collaborator (out of scope per the specification); this struct is
//! just the typed destination for whatever populates it.

use std::time::Duration;

/// Router-wide configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Whether the NAT-aware IP handler is installed instead of the plain one.
    pub nat_enabled: bool,
    /// Name of the "internal" NAT interface.
    pub internal_if: String,
    /// Name of the "external" NAT interface.
    pub external_if: String,
    /// ICMP query mapping idle timeout.
    pub icmp_query_timeout: Duration,
    /// TCP idle timeout while a connection is established (or closing gracefully).
    pub tcp_established_idle_timeout: Duration,
    /// TCP idle timeout while a connection is still being set up or torn down.
    pub tcp_transitory_idle_timeout: Duration,
    /// Interval between NAT engine timeout sweeps.
    pub nat_sweep_interval: Duration,
    /// Grace period an unsolicited inbound SYN is held before it is failed.
    pub unsolicited_syn_grace: Duration,
    /// ARP cache entry TTL.
    pub arp_entry_ttl: Duration,
    /// Number of ARP request retransmissions before giving up.
    pub arp_probe_retry_limit: u32,
    /// Interval between ARP request retransmissions.
    pub arp_probe_interval: Duration,
    /// Interval between ARP cache sweeps.
    pub arp_sweep_interval: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            nat_enabled: false,
            internal_if: "eth1".to_string(),
            external_if: "eth2".to_string(),
            icmp_query_timeout: Duration::from_secs(60),
            tcp_established_idle_timeout: Duration::from_secs(7440),
            tcp_transitory_idle_timeout: Duration::from_secs(240),
            nat_sweep_interval: Duration::from_secs(1),
            unsolicited_syn_grace: Duration::from_secs(6),
            arp_entry_ttl: Duration::from_secs(15),
            arp_probe_retry_limit: 5,
            arp_probe_interval: Duration::from_secs(1),
            arp_sweep_interval: Duration::from_secs(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_specification() {
        let cfg = RouterConfig::default();
        assert!(!cfg.nat_enabled);
        assert_eq!(cfg.internal_if, "eth1");
        assert_eq!(cfg.external_if, "eth2");
        assert_eq!(cfg.icmp_query_timeout, Duration::from_secs(60));
        assert_eq!(cfg.tcp_established_idle_timeout, Duration::from_secs(7440));
        assert_eq!(cfg.tcp_transitory_idle_timeout, Duration::from_secs(240));
        assert_eq!(cfg.arp_entry_ttl, Duration::from_secs(15));
        assert_eq!(cfg.arp_probe_retry_limit, 5);
        assert_eq!(cfg.unsolicited_syn_grace, Duration::from_secs(6));
    }
}
