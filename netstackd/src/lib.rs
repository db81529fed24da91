//! CONTEXT: host networking service — owns the `netstack::Stack` instance,
//! drives its periodic daemons (ARP aging, DHCP, DNS cache aging, NTP,
//! mDNS), and exposes the application-facing resolve/ping/socket API.
//! OWNERS: see repository root.
//! PUBLIC API: [`scheduler::Scheduler`], [`daemons`] (the five tick
//! functions shared by both entry points below), and either
//! [`host`] (threaded, `std`) or [`os_lite`] (cooperative, `no_std`)
//! depending on which feature is active.
//! DEPENDS_ON: `netstack` (protocol state machines and wire codecs),
//! `net-virtio` (NIC drivers), `log`+`parking_lot` under `std`.
//! INVARIANTS: `daemons`/`scheduler` build identically under both
//! features — no direct `std` or threading reference leaks into them.

#![cfg_attr(not(feature = "std"), no_std)]
#![forbid(unsafe_code)]

pub mod daemons;
pub mod scheduler;

#[cfg(feature = "std")]
mod host;
#[cfg(feature = "std")]
pub use host::*;

#[cfg(not(feature = "std"))]
mod os_lite;
#[cfg(not(feature = "std"))]
pub use os_lite::*;
