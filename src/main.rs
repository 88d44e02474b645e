//! Router daemon entry point: loads configuration and topology, wires up
//! the packet pipeline, and runs the reader threads plus the ARP and NAT
//! sweeper threads until asked to stop.
//!
//! Bringing up real network interfaces (raw sockets, pcap, a TAP device)
//! is a platform-specific concern the specification leaves to the
//! deployment environment; [`NetworkPort`] is the seam a real backend
//! plugs into. [`NoopPort`] here only logs, so this binary runs and
//! sweeps correctly but never actually moves a frame until a real port
//! is substituted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{error, info, warn};

use natrouter::config::RouterConfig;
use natrouter::interfaces::{Interface, InterfaceRegistry};
use natrouter::net::MacAddress;
use natrouter::pipeline::{Pipeline, SendAction};
use natrouter::routing::{RouteEntry, RoutingTable};

/// A source and sink of raw Ethernet frames for one interface.
trait NetworkPort: Send + Sync {
    fn name(&self) -> &str;
    fn recv(&self) -> Option<Vec<u8>>;
    fn send(&self, frame: &[u8]);
}

/// Placeholder port used until a real capture backend is wired in.
struct NoopPort {
    name: String,
}

impl NetworkPort for NoopPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn recv(&self) -> Option<Vec<u8>> {
        thread::sleep(Duration::from_millis(250));
        None
    }

    fn send(&self, frame: &[u8]) {
        warn!("{}: would transmit {} byte frame (no backend attached)", self.name, frame.len());
    }
}

/// Hardcoded two-interface topology: `eth1` faces the internal network,
/// `eth2` faces the internet. A real deployment would load this from a
/// config file instead.
fn topology() -> (InterfaceRegistry, RoutingTable) {
    let eth1 = Interface { name: "eth1", mac: MacAddress([0x52, 0x54, 0x00, 0x01, 0x01, 0x01]), ip: std::net::Ipv4Addr::new(10, 0, 1, 1) };
    let eth2 = Interface { name: "eth2", mac: MacAddress([0x52, 0x54, 0x00, 0x02, 0x02, 0x02]), ip: std::net::Ipv4Addr::new(172, 16, 0, 2) };

    let interfaces = InterfaceRegistry::new(vec![eth1, eth2]);
    let routing = RoutingTable::new(vec![
        RouteEntry {
            destination: std::net::Ipv4Addr::new(10, 0, 1, 0),
            netmask: std::net::Ipv4Addr::new(255, 255, 255, 0),
            gateway: std::net::Ipv4Addr::UNSPECIFIED,
            interface: "eth1",
        },
        RouteEntry {
            destination: std::net::Ipv4Addr::UNSPECIFIED,
            netmask: std::net::Ipv4Addr::UNSPECIFIED,
            gateway: std::net::Ipv4Addr::new(172, 16, 0, 1),
            interface: "eth2",
        },
    ]);

    (interfaces, routing)
}

fn dispatch(ports: &[Arc<dyn NetworkPort>], actions: Vec<SendAction>) {
    for action in actions {
        match ports.iter().find(|p| p.name() == action.interface) {
            Some(port) => port.send(&action.frame),
            None => error!("pipeline produced a send action for unknown interface {:?}", action.interface),
        }
    }
}

fn main() {
    env_logger::init();

    let config = RouterConfig::default();
    info!("starting router (nat_enabled={})", config.nat_enabled);

    let (interfaces, routing) = topology();
    let pipeline = Arc::new(Pipeline::new(&config, interfaces, routing));
    let shutdown = Arc::new(AtomicBool::new(false));

    let ports: Vec<Arc<dyn NetworkPort>> = vec![
        Arc::new(NoopPort { name: "eth1".to_string() }),
        Arc::new(NoopPort { name: "eth2".to_string() }),
    ];

    let mut handles = Vec::new();

    for port in &ports {
        let port = Arc::clone(port);
        let pipeline = Arc::clone(&pipeline);
        let shutdown = Arc::clone(&shutdown);
        let ports_for_dispatch = ports.clone();

        handles.push(thread::spawn(move || {
            info!("reader thread for {} started", port.name());
            while !shutdown.load(Ordering::Relaxed) {
                let Some(frame) = port.recv() else { continue };
                let actions = pipeline.handle_frame(port.name(), &frame, Instant::now());
                dispatch(&ports_for_dispatch, actions);
            }
            info!("reader thread for {} stopping", port.name());
        }));
    }

    {
        let pipeline = Arc::clone(&pipeline);
        let shutdown = Arc::clone(&shutdown);
        let ports = ports.clone();
        let interval = config.arp_sweep_interval;
        handles.push(thread::spawn(move || {
            while !shutdown.load(Ordering::Relaxed) {
                thread::sleep(interval);
                let actions = pipeline.sweep_arp(Instant::now());
                dispatch(&ports, actions);
            }
        }));
    }

    {
        let pipeline = Arc::clone(&pipeline);
        let shutdown = Arc::clone(&shutdown);
        let ports = ports.clone();
        let interval = config.nat_sweep_interval;
        handles.push(thread::spawn(move || {
            while !shutdown.load(Ordering::Relaxed) {
                thread::sleep(interval);
                let actions = pipeline.sweep_nat(Instant::now());
                dispatch(&ports, actions);
            }
        }));
    }

    for handle in handles {
        let _ = handle.join();
    }
}
