//! The packet pipeline: Ethernet dispatch, ARP handling, plain IP
//! forwarding, and (when enabled) the NAT-aware IP path.
//!
//! [`Pipeline::handle_frame`] is the single entry point a reader thread
//! calls with whatever bytes arrived on one interface; it never performs
//! I/O itself, instead returning the [`SendAction`]s the caller must
//! carry out. The periodic sweepers ([`Pipeline::sweep_arp`],
//! [`Pipeline::sweep_nat`]) follow the same discipline.

use std::net::Ipv4Addr;
use std::time::Instant;

use log::{debug, warn};

use crate::arp_cache::{ArpCache, PendingRequest, QueuedPacket, SweepAction};
use crate::config::RouterConfig;
use crate::interfaces::{Interface, InterfaceRegistry};
use crate::nat::connection::Direction;
use crate::nat::mapping::MappingKind;
use crate::nat::{NatEngine, NatSweepAction};
use crate::net::arp::ArpPacket;
use crate::net::ethernet::{self, EthernetFrame};
use crate::net::icmp::{self, EchoHeader};
use crate::net::ip::{self, Ipv4Header};
use crate::net::tcp::{self, TcpFlags, TcpHeader};
use crate::net::MacAddress;
use crate::routing::RoutingTable;

/// A frame the caller must transmit out a given interface.
#[derive(Debug, Clone)]
pub struct SendAction {
    pub interface: String,
    pub frame: Vec<u8>,
}

pub struct Pipeline {
    interfaces: InterfaceRegistry,
    routing: RoutingTable,
    arp: ArpCache,
    nat: Option<NatEngine>,
    nat_internal_if: String,
    nat_external_if: String,
}

impl Pipeline {
    pub fn new(config: &RouterConfig, interfaces: InterfaceRegistry, routing: RoutingTable) -> Self {
        let nat = config.nat_enabled.then(|| {
            NatEngine::new(
                config.icmp_query_timeout,
                config.tcp_established_idle_timeout,
                config.tcp_transitory_idle_timeout,
                config.unsolicited_syn_grace,
            )
        });

        Self {
            interfaces,
            routing,
            arp: ArpCache::new(config.arp_entry_ttl, config.arp_probe_interval, config.arp_probe_retry_limit),
            nat,
            nat_internal_if: config.internal_if.clone(),
            nat_external_if: config.external_if.clone(),
        }
    }

    /// Processes one received Ethernet frame, returning the frames that
    /// must now be sent as a result.
    pub fn handle_frame(&self, in_interface: &str, frame: &[u8], now: Instant) -> Vec<SendAction> {
        if self.interfaces.get(in_interface).is_none() {
            warn!("pipeline: frame arrived on unknown interface {in_interface:?}");
            return Vec::new();
        }
        let Ok(eth) = EthernetFrame::parse(frame) else {
            debug!("pipeline: dropping undersized frame on {in_interface}");
            return Vec::new();
        };

        match eth.ethertype {
            ethernet::ETHERTYPE_ARP => self.handle_arp(&eth, now),
            ethernet::ETHERTYPE_IPV4 => {
                if self.nat.is_some() {
                    self.handle_ip_nat(in_interface, &eth, frame, now)
                } else {
                    self.handle_ip_plain(&eth, now)
                }
            }
            other => {
                debug!("pipeline: dropping frame with unhandled ethertype {other:#06x}");
                Vec::new()
            }
        }
    }

    /// Runs one ARP cache sweep, translating the actions it returns into
    /// frames to send (a retransmitted probe, or host-unreachable ICMPs
    /// for packets that exhausted their retry budget).
    pub fn sweep_arp(&self, now: Instant) -> Vec<SendAction> {
        let mut out = Vec::new();
        for action in self.arp.sweep(now) {
            match action {
                SweepAction::Retransmit { target_ip } => {
                    if let Some(iface) = self.outbound_interface_for(target_ip) {
                        let req = ArpPacket::request(iface.mac, iface.ip, target_ip);
                        let frame = ethernet::build(MacAddress::BROADCAST, iface.mac, ethernet::ETHERTYPE_ARP, &req.to_bytes());
                        out.push(SendAction { interface: iface.name.to_string(), frame });
                    }
                }
                SweepAction::Failed { queued } => {
                    for q in queued {
                        out.extend(self.reply_icmp_error_for_frame(
                            &q.frame,
                            icmp::TYPE_DEST_UNREACHABLE,
                            icmp::CODE_HOST_UNREACHABLE,
                            now,
                        ));
                    }
                }
            }
        }
        out
    }

    /// Runs one NAT timeout sweep, translating expired-unsolicited-SYN
    /// actions into port-unreachable ICMPs. A no-op if NAT is disabled.
    pub fn sweep_nat(&self, now: Instant) -> Vec<SendAction> {
        let Some(nat) = &self.nat else { return Vec::new() };
        let mut out = Vec::new();
        for action in nat.sweep(now) {
            match action {
                NatSweepAction::UnsolicitedSynExpired { original_frame } => {
                    out.extend(self.reply_icmp_error_for_frame(
                        &original_frame,
                        icmp::TYPE_DEST_UNREACHABLE,
                        icmp::CODE_PORT_UNREACHABLE,
                        now,
                    ));
                }
            }
        }
        out
    }

    // ---- ARP -------------------------------------------------------

    fn handle_arp(&self, eth: &EthernetFrame, now: Instant) -> Vec<SendAction> {
        let Ok(packet) = ArpPacket::parse(eth.payload) else {
            debug!("pipeline: dropping malformed ARP packet");
            return Vec::new();
        };

        if !self.interfaces.owns_ip(packet.target_ip) {
            debug!("pipeline: dropping ARP packet not addressed to a local interface");
            return Vec::new();
        }

        let mut actions = Vec::new();

        if let Some(flushed) = self.arp.insert(packet.sender_ip, packet.sender_mac, now) {
            actions.extend(self.flush_pending(flushed, packet.sender_mac));
        }

        if packet.is_request() {
            if let Some(iface) = self.interfaces.get_by_ip(packet.target_ip) {
                let reply = ArpPacket::reply_to(&packet, iface.mac, iface.ip);
                let frame = ethernet::build(packet.sender_mac, iface.mac, ethernet::ETHERTYPE_ARP, &reply.to_bytes());
                actions.push(SendAction { interface: iface.name.to_string(), frame });
            }
        }

        actions
    }

    fn flush_pending(&self, pending: PendingRequest, mac: MacAddress) -> Vec<SendAction> {
        pending
            .queue
            .into_iter()
            .filter_map(|q| {
                let iface = self.interfaces.get(&q.out_interface)?;
                let mut frame = q.frame;
                ethernet::set_addresses(&mut frame, mac, iface.mac);
                Some(SendAction { interface: iface.name.to_string(), frame })
            })
            .collect()
    }

    fn outbound_interface_for(&self, ip: Ipv4Addr) -> Option<Interface> {
        let route = self.routing.longest_prefix_match(ip)?;
        self.interfaces.get(route.interface)
    }

    // ---- Plain (non-NAT) IP -----------------------------------------

    fn handle_ip_plain(&self, eth: &EthernetFrame, now: Instant) -> Vec<SendAction> {
        let Ok(header) = Ipv4Header::parse(eth.payload) else {
            debug!("pipeline: dropping malformed IP packet");
            return Vec::new();
        };
        if Ipv4Header::verify_checksum(eth.payload).is_err() {
            debug!("pipeline: dropping IP packet with bad checksum");
            return Vec::new();
        }

        if self.interfaces.owns_ip(header.destination) {
            return self.handle_local_delivery(&header, eth.payload, now);
        }

        if header.ttl <= 1 {
            return self.reply_icmp_error(&header, eth.payload, icmp::TYPE_TIME_EXCEEDED, icmp::CODE_TTL_EXCEEDED_IN_TRANSIT, now);
        }

        self.decrement_ttl_and_forward(&header, eth.payload, now)
    }

    fn handle_local_delivery(&self, header: &Ipv4Header, payload: &[u8], now: Instant) -> Vec<SendAction> {
        let header_len = header.header_len();
        match header.protocol {
            ip::PROTO_ICMP => {
                let Some(icmp_data) = payload.get(header_len..) else { return Vec::new() };
                if icmp::verify_checksum(icmp_data).is_err() {
                    debug!("pipeline: dropping ICMP message with bad checksum");
                    return Vec::new();
                }
                let Ok(echo) = EchoHeader::parse(icmp_data) else { return Vec::new() };
                if !echo.is_echo_request() {
                    return Vec::new();
                }

                let mut packet = payload.to_vec();
                icmp::rewrite_request_to_reply(&mut packet[header_len..]);

                let mut reply_header = *header;
                reply_header.source = header.destination;
                reply_header.destination = header.source;
                reply_header.ttl = 64;
                reply_header.write_fixed(&mut packet[..ip::MIN_HEADER_LEN]);
                Ipv4Header::recompute_checksum(&mut packet);

                self.route_and_send(reply_header.destination, packet, now)
            }
            ip::PROTO_TCP | ip::PROTO_UDP => {
                self.reply_icmp_error(header, payload, icmp::TYPE_DEST_UNREACHABLE, icmp::CODE_PORT_UNREACHABLE, now)
            }
            other => {
                debug!("pipeline: dropping locally-addressed packet with protocol {other}");
                Vec::new()
            }
        }
    }

    fn decrement_ttl_and_forward(&self, header: &Ipv4Header, payload: &[u8], now: Instant) -> Vec<SendAction> {
        let Some(route) = self.routing.longest_prefix_match(header.destination) else {
            return self.reply_icmp_error(header, payload, icmp::TYPE_DEST_UNREACHABLE, icmp::CODE_NET_UNREACHABLE, now);
        };

        let mut packet = payload.to_vec();
        packet[8] -= 1;
        Ipv4Header::recompute_checksum(&mut packet);

        let next_hop = if route.gateway.is_unspecified() { header.destination } else { route.gateway };
        self.send_ip_packet(route.interface, next_hop, packet, now)
    }

    fn route_and_send(&self, dst: Ipv4Addr, packet: Vec<u8>, now: Instant) -> Vec<SendAction> {
        match self.routing.longest_prefix_match(dst) {
            Some(route) => {
                let next_hop = if route.gateway.is_unspecified() { dst } else { route.gateway };
                self.send_ip_packet(route.interface, next_hop, packet, now)
            }
            None => Vec::new(),
        }
    }

    // ---- NAT-aware IP -------------------------------------------------

    fn handle_ip_nat(&self, in_interface: &str, eth: &EthernetFrame, full_frame: &[u8], now: Instant) -> Vec<SendAction> {
        let nat = self.nat.as_ref().expect("handle_ip_nat only called when NAT is enabled");

        let Ok(header) = Ipv4Header::parse(eth.payload) else {
            debug!("pipeline: dropping malformed IP packet");
            return Vec::new();
        };
        if Ipv4Header::verify_checksum(eth.payload).is_err() {
            debug!("pipeline: dropping IP packet with bad checksum");
            return Vec::new();
        }

        if in_interface == self.nat_internal_if {
            // An internal host reaching for a router IP is rejected with
            // port-unreachable unconditionally - unlike the plain path,
            // the NAT-aware handler carves out no ICMP-echo exception here.
            if self.interfaces.owns_ip(header.destination) {
                return self.reply_icmp_error(&header, eth.payload, icmp::TYPE_DEST_UNREACHABLE, icmp::CODE_PORT_UNREACHABLE, now);
            }
            if header.ttl <= 1 {
                return self.reply_icmp_error(&header, eth.payload, icmp::TYPE_TIME_EXCEEDED, icmp::CODE_TTL_EXCEEDED_IN_TRANSIT, now);
            }
            self.handle_nat_outbound(nat, &header, eth.payload, now)
        } else if in_interface == self.nat_external_if {
            // NAT-translated inbound traffic is, by construction,
            // addressed to the router's own external IP - that is not a
            // "to us" delivery here, it is the mapping's job to decide.
            if !self.interfaces.owns_ip(header.destination) {
                debug!("pipeline: dropping external packet not addressed to our external IP");
                return Vec::new();
            }
            if header.ttl <= 1 {
                return self.reply_icmp_error(&header, eth.payload, icmp::TYPE_TIME_EXCEEDED, icmp::CODE_TTL_EXCEEDED_IN_TRANSIT, now);
            }
            self.handle_nat_inbound(nat, &header, eth.payload, full_frame, now)
        } else {
            // Neither of the two interfaces the NAT-aware handler is
            // configured for - the specification only defines
            // internal->external and external->internal directions.
            debug!("pipeline: dropping frame on {in_interface:?}, which is neither the NAT internal nor external interface");
            Vec::new()
        }
    }

    fn handle_nat_outbound(&self, nat: &NatEngine, header: &Ipv4Header, payload: &[u8], now: Instant) -> Vec<SendAction> {
        let Some(ext_iface) = self.interfaces.get(&self.nat_external_if) else {
            warn!("pipeline: NAT external interface {:?} is not registered", self.nat_external_if);
            return Vec::new();
        };
        let header_len = header.header_len();

        match header.protocol {
            ip::PROTO_ICMP => {
                let Some(icmp_data) = payload.get(header_len..) else { return Vec::new() };
                if icmp::verify_checksum(icmp_data).is_err() {
                    return Vec::new();
                }
                let Ok(echo) = EchoHeader::parse(icmp_data) else { return Vec::new() };
                if !echo.is_echo_request() {
                    debug!("pipeline: dropping non-query ICMP outbound through NAT");
                    return Vec::new();
                }

                let Ok(mapping) = nat.insert_mapping(header.source, echo.identifier, MappingKind::Icmp, now) else {
                    warn!("nat: ICMP identifier space exhausted");
                    return Vec::new();
                };
                nat.touch_mapping(header.source, echo.identifier, MappingKind::Icmp, now, Some(ext_iface.ip));

                let mut packet = payload.to_vec();
                icmp::set_identifier(&mut packet[header_len..], mapping.aux_ext);
                icmp::recompute_checksum(&mut packet[header_len..]);

                let mut new_header = *header;
                new_header.source = ext_iface.ip;
                new_header.ttl -= 1;
                new_header.write_fixed(&mut packet[..ip::MIN_HEADER_LEN]);
                Ipv4Header::recompute_checksum(&mut packet);

                self.route_and_send(new_header.destination, packet, now)
            }
            ip::PROTO_TCP => {
                let Some(tcp_data) = payload.get(header_len..) else { return Vec::new() };
                let Ok(tcp) = TcpHeader::parse(tcp_data) else { return Vec::new() };
                if tcp::verify_checksum(header.source, header.destination, tcp_data).is_err() {
                    debug!("pipeline: dropping TCP segment with bad checksum");
                    return Vec::new();
                }

                let Ok(mapping) = nat.insert_mapping(header.source, tcp.src_port, MappingKind::Tcp, now) else {
                    warn!("nat: TCP port space exhausted");
                    return Vec::new();
                };
                nat.touch_mapping(header.source, tcp.src_port, MappingKind::Tcp, now, Some(ext_iface.ip));
                nat.drive_tcp(
                    mapping.internal_key(),
                    header.destination,
                    mapping.aux_ext,
                    Direction::Outbound,
                    tcp.flags,
                    tcp.seq,
                    tcp.ack,
                    None,
                    now,
                );

                let mut packet = payload.to_vec();
                TcpHeader::set_src_port(&mut packet[header_len..], mapping.aux_ext);

                let mut new_header = *header;
                new_header.source = ext_iface.ip;
                new_header.ttl -= 1;
                new_header.write_fixed(&mut packet[..ip::MIN_HEADER_LEN]);
                tcp::recompute_checksum(new_header.source, new_header.destination, &mut packet[header_len..]);
                Ipv4Header::recompute_checksum(&mut packet);

                self.route_and_send(new_header.destination, packet, now)
            }
            other => {
                debug!("pipeline: dropping outbound protocol {other} through NAT (UDP NAT is out of scope)");
                Vec::new()
            }
        }
    }

    fn handle_nat_inbound(
        &self,
        nat: &NatEngine,
        header: &Ipv4Header,
        payload: &[u8],
        full_frame: &[u8],
        now: Instant,
    ) -> Vec<SendAction> {
        let header_len = header.header_len();

        match header.protocol {
            ip::PROTO_ICMP => {
                let Some(icmp_data) = payload.get(header_len..) else { return Vec::new() };
                if icmp::verify_checksum(icmp_data).is_err() {
                    return Vec::new();
                }
                let Ok(echo) = EchoHeader::parse(icmp_data) else { return Vec::new() };
                if !echo.is_echo_reply() {
                    debug!("pipeline: dropping non-reply ICMP inbound through NAT");
                    return Vec::new();
                }

                let Some(mapping) = nat.lookup_external(echo.identifier, MappingKind::Icmp) else {
                    debug!("nat: no mapping for inbound ICMP identifier {}", echo.identifier);
                    return Vec::new();
                };
                nat.touch_mapping(mapping.ip_int, mapping.aux_int, MappingKind::Icmp, now, None);

                let mut packet = payload.to_vec();
                icmp::set_identifier(&mut packet[header_len..], mapping.aux_int);
                icmp::recompute_checksum(&mut packet[header_len..]);

                let mut new_header = *header;
                new_header.destination = mapping.ip_int;
                new_header.ttl -= 1;
                new_header.write_fixed(&mut packet[..ip::MIN_HEADER_LEN]);
                Ipv4Header::recompute_checksum(&mut packet);

                self.route_and_send(new_header.destination, packet, now)
            }
            ip::PROTO_TCP => {
                let Some(tcp_data) = payload.get(header_len..) else { return Vec::new() };
                let Ok(tcp) = TcpHeader::parse(tcp_data) else { return Vec::new() };
                if tcp::verify_checksum(header.source, header.destination, tcp_data).is_err() {
                    return Vec::new();
                }
                if tcp.dst_port < 1024 {
                    return self.reply_icmp_error(header, payload, icmp::TYPE_DEST_UNREACHABLE, icmp::CODE_PORT_UNREACHABLE, now);
                }

                match nat.lookup_external(tcp.dst_port, MappingKind::Tcp) {
                    Some(mapping) => {
                        nat.drive_tcp(
                            mapping.internal_key(),
                            header.source,
                            mapping.aux_ext,
                            Direction::Inbound,
                            tcp.flags,
                            tcp.seq,
                            tcp.ack,
                            Some(full_frame),
                            now,
                        );

                        let mut packet = payload.to_vec();
                        TcpHeader::set_dst_port(&mut packet[header_len..], mapping.aux_int);

                        let mut new_header = *header;
                        new_header.destination = mapping.ip_int;
                        new_header.ttl -= 1;
                        new_header.write_fixed(&mut packet[..ip::MIN_HEADER_LEN]);
                        tcp::recompute_checksum(new_header.source, new_header.destination, &mut packet[header_len..]);
                        Ipv4Header::recompute_checksum(&mut packet);

                        self.route_and_send(new_header.destination, packet, now)
                    }
                    None => {
                        if tcp.flags.contains(TcpFlags::SYN) && !tcp.flags.contains(TcpFlags::ACK) {
                            debug!("nat: parking unsolicited SYN from {} targeting external port {}", header.source, tcp.dst_port);
                            nat.park_syn(header.source, tcp.dst_port, full_frame.to_vec(), now);
                        }
                        Vec::new()
                    }
                }
            }
            other => {
                debug!("pipeline: dropping inbound protocol {other} through NAT with no mapping");
                Vec::new()
            }
        }
    }

    // ---- Shared send path --------------------------------------------

    fn send_ip_packet(&self, out_interface: &str, next_hop: Ipv4Addr, ip_packet: Vec<u8>, now: Instant) -> Vec<SendAction> {
        let Some(iface) = self.interfaces.get(out_interface) else {
            warn!("pipeline: route names unknown interface {out_interface:?}");
            return Vec::new();
        };

        let frame = ethernet::build(MacAddress::ZERO, iface.mac, ethernet::ETHERTYPE_IPV4, &ip_packet);

        if let Some((mac, _ttl)) = self.arp.lookup(next_hop, now) {
            let mut frame = frame;
            ethernet::set_addresses(&mut frame, mac, iface.mac);
            return vec![SendAction { interface: iface.name.to_string(), frame }];
        }

        let (_pending, is_new) = self.arp.queue(next_hop, QueuedPacket { frame, out_interface: iface.name.to_string() }, now);
        if !is_new {
            return Vec::new();
        }

        let req = ArpPacket::request(iface.mac, iface.ip, next_hop);
        let req_frame = ethernet::build(MacAddress::BROADCAST, iface.mac, ethernet::ETHERTYPE_ARP, &req.to_bytes());
        vec![SendAction { interface: iface.name.to_string(), frame: req_frame }]
    }

    fn reply_icmp_error(&self, header: &Ipv4Header, offending_packet: &[u8], icmp_type: u8, code: u8, now: Instant) -> Vec<SendAction> {
        let Some(route) = self.routing.longest_prefix_match(header.source) else {
            debug!("pipeline: no return route for ICMP error to {}", header.source);
            return Vec::new();
        };
        let Some(iface) = self.interfaces.get(route.interface) else { return Vec::new() };

        let icmp_body = icmp::build_error(icmp_type, code, offending_packet, header.header_len());
        let total_length = (ip::MIN_HEADER_LEN + icmp_body.len()) as u16;

        let reply_header = Ipv4Header {
            version: 4,
            ihl: 5,
            tos: 0,
            total_length,
            identification: 0,
            flags: 0,
            fragment_offset: 0,
            ttl: 64,
            protocol: ip::PROTO_ICMP,
            checksum: 0,
            source: iface.ip,
            destination: header.source,
        };

        let mut packet = vec![0u8; ip::MIN_HEADER_LEN + icmp_body.len()];
        reply_header.write_fixed(&mut packet);
        packet[ip::MIN_HEADER_LEN..].copy_from_slice(&icmp_body);
        Ipv4Header::recompute_checksum(&mut packet);

        let next_hop = if route.gateway.is_unspecified() { header.source } else { route.gateway };
        self.send_ip_packet(route.interface, next_hop, packet, now)
    }

    fn reply_icmp_error_for_frame(&self, frame: &[u8], icmp_type: u8, code: u8, now: Instant) -> Vec<SendAction> {
        let Ok(eth) = EthernetFrame::parse(frame) else { return Vec::new() };
        let Ok(header) = Ipv4Header::parse(eth.payload) else { return Vec::new() };
        self.reply_icmp_error(&header, eth.payload, icmp_type, code, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::RouteEntry;
    use std::time::Duration;

    fn internal_iface() -> Interface {
        Interface { name: "eth1", mac: MacAddress([1; 6]), ip: Ipv4Addr::new(10, 0, 1, 1) }
    }

    fn external_iface() -> Interface {
        Interface { name: "eth2", mac: MacAddress([2; 6]), ip: Ipv4Addr::new(172, 16, 0, 1) }
    }

    fn plain_pipeline() -> Pipeline {
        let interfaces = InterfaceRegistry::new(vec![internal_iface(), external_iface()]);
        let routing = RoutingTable::new(vec![
            RouteEntry {
                destination: Ipv4Addr::new(10, 0, 1, 0),
                netmask: Ipv4Addr::new(255, 255, 255, 0),
                gateway: Ipv4Addr::UNSPECIFIED,
                interface: "eth1",
            },
            RouteEntry {
                destination: Ipv4Addr::UNSPECIFIED,
                netmask: Ipv4Addr::UNSPECIFIED,
                gateway: Ipv4Addr::new(172, 16, 0, 254),
                interface: "eth2",
            },
        ]);
        let mut config = RouterConfig::default();
        config.nat_enabled = false;
        Pipeline::new(&config, interfaces, routing)
    }

    fn nat_pipeline() -> Pipeline {
        let interfaces = InterfaceRegistry::new(vec![internal_iface(), external_iface()]);
        let routing = RoutingTable::new(vec![
            RouteEntry {
                destination: Ipv4Addr::new(10, 0, 1, 0),
                netmask: Ipv4Addr::new(255, 255, 255, 0),
                gateway: Ipv4Addr::UNSPECIFIED,
                interface: "eth1",
            },
            RouteEntry {
                destination: Ipv4Addr::UNSPECIFIED,
                netmask: Ipv4Addr::UNSPECIFIED,
                gateway: Ipv4Addr::new(172, 16, 0, 254),
                interface: "eth2",
            },
        ]);
        let mut config = RouterConfig::default();
        config.nat_enabled = true;
        config.internal_if = "eth1".to_string();
        config.external_if = "eth2".to_string();
        Pipeline::new(&config, interfaces, routing)
    }

    fn arp_request_frame(sender_mac: MacAddress, sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Vec<u8> {
        let pkt = ArpPacket::request(sender_mac, sender_ip, target_ip);
        ethernet::build(MacAddress::BROADCAST, sender_mac, ethernet::ETHERTYPE_ARP, &pkt.to_bytes())
    }

    fn echo_request_frame(dst_mac: MacAddress, src_mac: MacAddress, src_ip: Ipv4Addr, dst_ip: Ipv4Addr) -> Vec<u8> {
        let mut icmp_buf = vec![icmp::TYPE_ECHO_REQUEST, 0, 0, 0, 0, 1, 0, 1];
        icmp::recompute_checksum(&mut icmp_buf);

        let header = Ipv4Header {
            version: 4,
            ihl: 5,
            tos: 0,
            total_length: (ip::MIN_HEADER_LEN + icmp_buf.len()) as u16,
            identification: 0x10,
            flags: 0,
            fragment_offset: 0,
            ttl: 64,
            protocol: ip::PROTO_ICMP,
            checksum: 0,
            source: src_ip,
            destination: dst_ip,
        };
        let mut ip_packet = vec![0u8; ip::MIN_HEADER_LEN + icmp_buf.len()];
        header.write_fixed(&mut ip_packet);
        ip_packet[ip::MIN_HEADER_LEN..].copy_from_slice(&icmp_buf);
        Ipv4Header::recompute_checksum(&mut ip_packet);

        ethernet::build(dst_mac, src_mac, ethernet::ETHERTYPE_IPV4, &ip_packet)
    }

    fn tcp_syn_frame(dst_mac: MacAddress, src_mac: MacAddress, src_ip: Ipv4Addr, dst_ip: Ipv4Addr, src_port: u16, dst_port: u16) -> Vec<u8> {
        let mut seg = vec![0u8; tcp::MIN_HEADER_LEN];
        TcpHeader::set_src_port(&mut seg, src_port);
        TcpHeader::set_dst_port(&mut seg, dst_port);
        seg[4..8].copy_from_slice(&1000u32.to_be_bytes());
        seg[12] = 5 << 4;
        seg[13] = TcpFlags::SYN.bits();
        seg[14..16].copy_from_slice(&65535u16.to_be_bytes());
        tcp::recompute_checksum(src_ip, dst_ip, &mut seg);

        let header = Ipv4Header {
            version: 4,
            ihl: 5,
            tos: 0,
            total_length: (ip::MIN_HEADER_LEN + seg.len()) as u16,
            identification: 0x20,
            flags: 0,
            fragment_offset: 0,
            ttl: 64,
            protocol: ip::PROTO_TCP,
            checksum: 0,
            source: src_ip,
            destination: dst_ip,
        };
        let mut ip_packet = vec![0u8; ip::MIN_HEADER_LEN + seg.len()];
        header.write_fixed(&mut ip_packet);
        ip_packet[ip::MIN_HEADER_LEN..].copy_from_slice(&seg);
        Ipv4Header::recompute_checksum(&mut ip_packet);

        ethernet::build(dst_mac, src_mac, ethernet::ETHERTYPE_IPV4, &ip_packet)
    }

    #[test]
    fn arp_request_for_our_ip_gets_a_reply() {
        let pipeline = plain_pipeline();
        let host_mac = MacAddress([9; 6]);
        let frame = arp_request_frame(host_mac, Ipv4Addr::new(10, 0, 1, 50), Ipv4Addr::new(10, 0, 1, 1));

        let actions = pipeline.handle_frame("eth1", &frame, Instant::now());
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].interface, "eth1");
        let reply = ArpPacket::parse(EthernetFrame::parse(&actions[0].frame).unwrap().payload).unwrap();
        assert!(reply.is_reply());
        assert_eq!(reply.sender_mac, internal_iface().mac);
    }

    #[test]
    fn echo_request_to_router_gets_echo_reply() {
        let pipeline = plain_pipeline();
        let now = Instant::now();
        let host_mac = MacAddress([9; 6]);
        let frame = echo_request_frame(internal_iface().mac, host_mac, Ipv4Addr::new(10, 0, 1, 50), Ipv4Addr::new(10, 0, 1, 1));

        let actions = pipeline.handle_frame("eth1", &frame, now);
        assert_eq!(actions.len(), 1);
        let eth = EthernetFrame::parse(&actions[0].frame).unwrap();
        let header = Ipv4Header::parse(eth.payload).unwrap();
        assert_eq!(header.source, Ipv4Addr::new(10, 0, 1, 1));
        assert_eq!(header.destination, Ipv4Addr::new(10, 0, 1, 50));
        let echo = EchoHeader::parse(&eth.payload[header.header_len()..]).unwrap();
        assert!(echo.is_echo_reply());
    }

    #[test]
    fn plain_forward_to_unresolved_next_hop_emits_arp_request_and_queues() {
        let pipeline = plain_pipeline();
        let now = Instant::now();
        let host_mac = MacAddress([9; 6]);
        let frame = echo_request_frame(internal_iface().mac, host_mac, Ipv4Addr::new(10, 0, 1, 50), Ipv4Addr::new(8, 8, 8, 8));

        let actions = pipeline.handle_frame("eth1", &frame, now);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].interface, "eth2");
        let arp = ArpPacket::parse(EthernetFrame::parse(&actions[0].frame).unwrap().payload).unwrap();
        assert!(arp.is_request());
        assert_eq!(arp.target_ip, Ipv4Addr::new(172, 16, 0, 254));
    }

    #[test]
    fn nat_outbound_tcp_syn_rewrites_source_and_triggers_arp() {
        let pipeline = nat_pipeline();
        let now = Instant::now();
        let host_mac = MacAddress([9; 6]);
        let frame = tcp_syn_frame(internal_iface().mac, host_mac, Ipv4Addr::new(10, 0, 1, 50), Ipv4Addr::new(93, 184, 216, 34), 40000, 80);

        let actions = pipeline.handle_frame("eth1", &frame, now);
        // No ARP entry for the default gateway yet: we expect exactly one
        // outbound ARP request queued behind the translated packet.
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].interface, "eth2");
        assert!(ArpPacket::parse(EthernetFrame::parse(&actions[0].frame).unwrap().payload).unwrap().is_request());
    }

    #[test]
    fn nat_inbound_syn_with_no_mapping_is_parked_not_forwarded() {
        let pipeline = nat_pipeline();
        let now = Instant::now();
        let remote_mac = MacAddress([8; 6]);
        let frame = tcp_syn_frame(external_iface().mac, remote_mac, Ipv4Addr::new(93, 184, 216, 34), Ipv4Addr::new(172, 16, 0, 1), 51000, 5555);

        let actions = pipeline.handle_frame("eth2", &frame, now);
        assert!(actions.is_empty());

        // Past the grace period with still no mapping, it should surface
        // as a port-unreachable.
        let later = now + Duration::from_secs(7);
        let actions = pipeline.sweep_nat(later);
        assert_eq!(actions.len(), 1);
    }
}
