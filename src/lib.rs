//! Discrete-event simulator of a wired Ethernet/IPv4 network: a shared-medium
//! CSMA/CD physical layer, hubs and learning bridges above it, and a per-host
//! IPv4 stack with ARP, routing, and fragmentation/reassembly on top.

pub mod addr;
pub mod arp;
pub mod bridge;
pub mod checksum;
pub mod config;
pub mod engine;
pub mod error;
pub mod frame;
pub mod host;
pub mod hub;
pub mod interface;
pub mod ip;
pub mod medium;
pub mod phy;
pub mod util;
