//! Software IPv4 router with a stateful NAT for ICMP query and TCP traffic.
//!
//! The crate is organized the way the pipeline itself is laid out:
//! [`net`] is the zero-copy wire codec, [`arp_cache`] and [`routing`] hold
//! the router's address-resolution and forwarding state, [`nat`] holds
//! the translation engine, and [`pipeline`] wires all of it into the
//! per-frame decision logic that [`config`] and the binary entry point
//! drive.

pub mod arp_cache;
pub mod config;
pub mod error;
pub mod interfaces;
pub mod nat;
pub mod net;
pub mod pipeline;
pub mod routing;

pub use config::RouterConfig;
pub use error::{PacketError, RouterError};
pub use interfaces::{Interface, InterfaceRegistry};
pub use pipeline::{Pipeline, SendAction};
pub use routing::{RouteEntry, RoutingTable};
