// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Host networking stack — L2/L3 interface manager, ARP, IPv4,
//! ICMP, UDP + socket table, DHCP client, DNS/mDNS resolver, NTP clock
//! discipline, and the NIC driver bus contract.
//! OWNERS: @runtime
//! STATUS: Experimental
//! API_STABILITY: Unstable
//! TEST_COVERAGE: per-module unit tests (see each module's `tests` block)
//!
//! PUBLIC API:
//!   - stack::Stack: per-instance root owning L2/L3 state, sockets, DHCP,
//!     DNS cache, mDNS registry, NTP peers
//!   - driver::{NetDriver, NicBus, NicSlot}: the bus/driver contract
//!     concrete drivers (in the sibling `net-virtio` crate) implement
//!   - l2::L2Interface, l3::{L3Ipv4Interface, L3Mode, RoutingTable}
//!   - arp::{ArpTable, PendingResolve}: ARP cache and polled resolver
//!   - ipv4, icmp, udp: IPv4 header codec + tx-scope selection, ICMP echo
//!     and rendezvous table, UDP datagram codec and socket table
//!   - dhcp::DhcpState: client state machine (Init..Bound/Renewing/Rebinding)
//!   - dns::Cache, mdns::MdnsService: resolver cache and responder/announcer
//!   - ntp::{NtpPeer, ClockState}: client sampling, filtering, discipline
//!   - fmt_buf, deflate, png: self-contained utility leaves
//!
//! ADR: docs/adr/0005-dsoftbus-architecture.md

#![cfg_attr(not(feature = "std"), no_std)]
#![forbid(unsafe_code)]

extern crate alloc;

pub mod addr;
pub mod arp;
pub mod buffer;
pub mod checksum;
pub mod config;
pub mod deflate;
pub mod dhcp;
pub mod dns;
pub mod driver;
pub mod error;
pub mod eth;
pub mod icmp;
pub mod ipv4;
pub mod ipv6;
pub mod l2;
pub mod l3;
pub mod mdns;
pub mod ntp;
pub mod png;
pub mod rng;
pub mod stack;
pub mod udp;

#[path = "fmt.rs"]
pub mod fmt_buf;

pub use error::{NetStackError, Result};
pub use stack::Stack;
