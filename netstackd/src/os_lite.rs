//! Cooperative bare-metal entry: no threads, no blocking. A kernel
//! scheduler loop owns time and calls [`NetstackService::poll`] once per
//! tick; everything else is a non-blocking peek at state the daemons have
//! already updated.

extern crate alloc;

use alloc::vec::Vec;

use netstack::addr::{Endpoint, Ipv4Addr, MacAddr};
use netstack::arp::{PendingResolve, PollOutcome};
use netstack::config::StackConfig;
use netstack::dns;
use netstack::driver::NicBus;
use netstack::icmp::PingStatus;
use netstack::l3::{L3Mode, RuntimeOpts};
use netstack::udp::BindSpec;
use netstack::{NetStackError, Result, Stack};

use crate::daemons::{ArpAgeDaemon, DhcpDaemon, DnsCacheDaemon, MdnsDaemon, NtpDaemon};

/// Bundles the stack and every periodic daemon behind a single `poll`
/// entry point, for a caller with no thread scheduler of its own.
pub struct NetstackService {
    pub stack: Stack,
    arp_age: ArpAgeDaemon,
    dhcp: DhcpDaemon,
    dns_cache: DnsCacheDaemon,
    ntp: NtpDaemon,
    mdns: MdnsDaemon,
}

impl NetstackService {
    pub fn new(config: StackConfig, host_name: alloc::string::String, chaddr_seed: u64) -> Self {
        NetstackService {
            stack: Stack::new(config, host_name),
            arp_age: ArpAgeDaemon::new(),
            dhcp: DhcpDaemon::new(chaddr_seed),
            dns_cache: DnsCacheDaemon,
            ntp: NtpDaemon::new(),
            mdns: MdnsDaemon,
        }
    }

    /// Enumerate NICs over `bus` (plus the always-present loopback slot
    /// `loopback` supplies), replacing whatever was adopted before.
    pub fn adopt_nics(&mut self, bus: &NicBus, addrs: &[(u64, u32)], loopback: alloc::boxed::Box<dyn netstack::driver::NetDriver>) {
        let slots = bus.enumerate(addrs, loopback);
        self.stack.adopt_nics(slots);
    }

    /// Drive the net task and every daemon once. Callers pick their own
    /// cadence; the daemons internally gate on their own intervals so
    /// calling this faster than, say, the NTP poll interval is harmless.
    pub fn poll(&mut self, delta_ms: u64, now_ms: u64) {
        while self.stack.net_task_step(now_ms) {}
        self.arp_age.tick(&mut self.stack, delta_ms);
        self.dhcp.tick(&mut self.stack, delta_ms);
        self.dns_cache.tick(&mut self.stack, delta_ms);
        self.ntp.tick(&mut self.stack, delta_ms, now_ms);
        self.mdns.tick(&mut self.stack, delta_ms);
    }

    /// Apply a static IPv4 configuration and flag the interface for a
    /// DHCPINFORM on the next `poll`.
    pub fn configure_static_ipv4(&mut self, l3_id: u32, ip: Ipv4Addr, mask: Ipv4Addr, gw: Ipv4Addr) -> Result<()> {
        let l3 = self.stack.l3_ipv4_find_by_id_mut(l3_id).ok_or(NetStackError::NotFound)?;
        l3.update(ip, mask, gw, L3Mode::Static, RuntimeOpts::default());
        l3.needs_inform = true;
        Ok(())
    }

    /// Non-blocking ARP resolve step: call once per `poll` tick with the
    /// same `PendingResolve` until it returns `Some`. Unlike the host's
    /// blocking `resolve_on`, there is no scheduler here to sleep on.
    pub fn arp_resolve_step(&mut self, ifindex: u32, pending: &mut PendingResolve, delta_ms: u64) -> Option<Result<MacAddr>> {
        let outcome = {
            let l2 = self.stack.l2_interface_find_by_index(ifindex)?;
            pending.poll(&l2.arp, delta_ms)
        };
        match outcome {
            PollOutcome::Resolved(mac) => Some(Ok(mac)),
            PollOutcome::TimedOut => Some(Err(NetStackError::Timeout)),
            PollOutcome::SendRequest(ip) => {
                let _ = self.stack.arp_send_request(ifindex, ip);
                None
            }
            PollOutcome::Waiting => None,
        }
    }

    /// Non-blocking ping step: start (or keep polling) a rendezvous slot.
    pub fn icmp_ping_start(&mut self, dst: Ipv4Addr, id: u16, seq: u16, now_ms: u64, ttl: u8) -> Result<usize> {
        self.stack.icmp_ping_start(dst, id, seq, now_ms, ttl)
    }

    pub fn icmp_ping_poll(&self, slot: usize) -> Option<PingStatus> {
        self.stack.icmp_ping_poll(slot)
    }

    pub fn icmp_ping_free(&mut self, slot: usize) {
        self.stack.icmp_ping_free(slot)
    }

    pub fn socket_bind_udp(&mut self, l3_id: Option<u32>, port: u16) -> Result<u32> {
        let bind = match l3_id {
            Some(id) => BindSpec::BoundL3(id),
            None => BindSpec::Unbound,
        };
        self.stack.sockets.bind(bind, port)
    }

    pub fn socket_sendto_udp(&mut self, socket_id: u32, to: Endpoint, payload: &[u8]) -> Result<()> {
        self.stack.udp_send_to(socket_id, to, payload)
    }

    pub fn socket_recvfrom_udp(&mut self, socket_id: u32) -> Option<(Endpoint, Vec<u8>)> {
        self.stack.sockets.get_mut(socket_id).and_then(|s| s.try_recv())
    }

    pub fn socket_close_udp(&mut self, socket_id: u32) {
        self.stack.sockets.close(socket_id);
    }

    /// Cache-only A-record lookup; callers needing an actual query (mDNS or
    /// unicast DNS) drive it themselves over their own cooperative loop,
    /// since a no_std entry has no blocking wait to offer.
    pub fn dns_cache_lookup(&self, name: &str) -> Option<Ipv4Addr> {
        self.stack.dns_cache.lookup(name, dns::TYPE_A).and_then(|a| a.as_v4())
    }

    /// Cache-only AAAA-record lookup, per `spec.md` §6's `dns_resolve_aaaa`;
    /// same caveat as [`dns_cache_lookup`] about driving the actual query.
    pub fn dns_cache_lookup_aaaa(&self, name: &str) -> Option<[u8; 16]> {
        self.stack.dns_cache.lookup(name, dns::TYPE_AAAA).and_then(|a| a.as_v6())
    }
}
