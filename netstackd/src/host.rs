//! Threaded host implementation: a real `std::time::Instant`-backed
//! [`Scheduler`], a `Mutex`-shared [`Stack`], one OS thread per daemon, and
//! the blocking application-facing API (`resolve_on`, `icmp_ping`,
//! `dns_resolve_{a,aaaa}{,_on_l3}`, the UDP socket calls) that `spec.md` §5
//! describes as synchronous from the caller's point of view.

use std::net::Ipv4Addr as StdIpv4Addr;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use netstack::addr::{Endpoint, IpAddr, Ipv4Addr, MacAddr};
use netstack::arp::{PendingResolve, PollOutcome};
use netstack::config::StackConfig;
use netstack::dns;
use netstack::driver::NicBus;
use netstack::icmp::PingStatus;
use netstack::l3::{L3Mode, RuntimeOpts};
use netstack::mdns;
use netstack::udp::BindSpec;
use netstack::{NetStackError, Result, Stack};

use crate::daemons::{ArpAgeDaemon, DhcpDaemon, DnsCacheDaemon, MdnsDaemon, NtpDaemon, NET_TASK_IDLE_SLEEP_MS};
use crate::scheduler::Scheduler;

pub type SharedStack = Arc<Mutex<Stack>>;

/// `std::time::Instant`-backed [`Scheduler`]: monotonic from the process's
/// own start, which is all the daemons need.
pub struct HostScheduler {
    epoch: Instant,
}

impl HostScheduler {
    pub fn new() -> Self {
        HostScheduler { epoch: Instant::now() }
    }
}

impl Default for HostScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for HostScheduler {
    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn sleep_ms(&self, ms: u64) {
        thread::sleep(Duration::from_millis(ms));
    }
}

const DAEMON_POLL_MS: u64 = 50;
const DNS_SERVER_PORT: u16 = 53;

/// Build a `Stack` over whatever NICs the bus enumerates (plus the always-
/// present loopback), spawn every periodic daemon on its own thread, and
/// return the shared handle the application-facing calls below operate on.
/// Callers that also want the bus's real NIC addresses pass them in
/// `addrs`; a host-only dev/test build with nothing attached can pass `&[]`
/// and still get a loopback-backed, DHCP/NTP/mDNS-capable stack.
pub fn service_main_loop(addrs: &[(u64, u32)], config: StackConfig, host_name: String, chaddr_seed: u64) -> SharedStack {
    let bus = NicBus::new();
    let slots = bus.enumerate(addrs, Box::new(net_virtio::LoopbackDriver::new()));

    let mut stack = Stack::new(config, host_name);
    stack.adopt_nics(slots);
    let shared: SharedStack = Arc::new(Mutex::new(stack));

    spawn_net_task(shared.clone());
    spawn_daemon("arp-age", shared.clone(), ArpAgeDaemon::TICK_MS.min(1_000), {
        let mut daemon = ArpAgeDaemon::new();
        move |stack, delta_ms, _now_ms| daemon.tick(stack, delta_ms)
    });
    spawn_daemon("dhcp", shared.clone(), DAEMON_POLL_MS, {
        let mut daemon = DhcpDaemon::new(chaddr_seed);
        move |stack, delta_ms, _now_ms| daemon.tick(stack, delta_ms)
    });
    spawn_daemon("dns-cache", shared.clone(), 1_000, {
        let mut daemon = DnsCacheDaemon;
        move |stack, delta_ms, _now_ms| daemon.tick(stack, delta_ms)
    });
    spawn_daemon("ntp", shared.clone(), DAEMON_POLL_MS, {
        let mut daemon = NtpDaemon::new();
        move |stack, delta_ms, now_ms| daemon.tick(stack, delta_ms, now_ms)
    });
    spawn_daemon("mdns", shared.clone(), DAEMON_POLL_MS, {
        let mut daemon = MdnsDaemon;
        move |stack, delta_ms, _now_ms| daemon.tick(stack, delta_ms)
    });

    shared
}

fn spawn_net_task(shared: SharedStack) {
    thread::spawn(move || {
        let sched = HostScheduler::new();
        loop {
            let now_ms = sched.now_ms();
            let did_work = shared.lock().net_task_step(now_ms);
            if !did_work {
                sched.sleep_ms(NET_TASK_IDLE_SLEEP_MS);
            }
        }
    });
}

/// Run `tick` every `period_ms` on its own thread, passing the elapsed
/// delta and wall clock each time; `log::warn!` on a held lock would be
/// noise here since contention with `net_task` is expected and benign.
fn spawn_daemon<F>(name: &'static str, shared: SharedStack, period_ms: u64, mut tick: F)
where
    F: FnMut(&mut Stack, u64, u64) + Send + 'static,
{
    thread::Builder::new()
        .name(name.into())
        .spawn(move || {
            let sched = HostScheduler::new();
            let mut last_ms = sched.now_ms();
            loop {
                sched.sleep_ms(period_ms);
                let now_ms = sched.now_ms();
                let delta_ms = now_ms.saturating_sub(last_ms);
                last_ms = now_ms;
                tick(&mut shared.lock(), delta_ms, now_ms);
            }
        })
        .expect("failed to spawn daemon thread");
}

/// Apply a static IPv4 configuration and flag the interface for a
/// DHCPINFORM, per `spec.md` §4.9's "static address, DHCP-supplied options"
/// path; `DhcpDaemon::send_pending_informs` picks the flag up on its next
/// tick.
pub fn configure_static_ipv4(shared: &SharedStack, l3_id: u32, ip: Ipv4Addr, mask: Ipv4Addr, gw: Ipv4Addr) -> Result<()> {
    let mut stack = shared.lock();
    let l3 = stack.l3_ipv4_find_by_id_mut(l3_id).ok_or(NetStackError::NotFound)?;
    l3.update(ip, mask, gw, L3Mode::Static, RuntimeOpts::default());
    l3.needs_inform = true;
    Ok(())
}

/// Blocking ARP resolve, per `arp.rs`'s own module doc comment naming this
/// as the daemon-side wrapper around `PendingResolve`. Polls every 100ms.
pub fn resolve_on(shared: &SharedStack, sched: &HostScheduler, ifindex: u32, target: Ipv4Addr, timeout_ms: u64) -> Result<MacAddr> {
    const POLL_MS: u64 = 100;
    let mut pending = PendingResolve::new(target, timeout_ms);
    let mut last_ms = sched.now_ms();
    loop {
        let outcome = {
            let mut stack = shared.lock();
            let delta_ms = {
                let now_ms = sched.now_ms();
                let d = now_ms.saturating_sub(last_ms);
                last_ms = now_ms;
                d
            };
            let outcome = {
                let l2 = stack.l2_interface_find_by_index(ifindex).ok_or(NetStackError::NotFound)?;
                pending.poll(&l2.arp, delta_ms)
            };
            if let PollOutcome::SendRequest(ip) = outcome {
                let _ = stack.arp_send_request(ifindex, ip);
            }
            outcome
        };
        match outcome {
            PollOutcome::Resolved(mac) => return Ok(mac),
            PollOutcome::TimedOut => return Err(NetStackError::Timeout),
            PollOutcome::Waiting | PollOutcome::SendRequest(_) => sched.sleep_ms(POLL_MS),
        }
    }
}

/// Blocking ICMP echo, per `spec.md` §4.7's "application asks, daemon
/// rendezvous-polls" model.
pub fn icmp_ping(shared: &SharedStack, sched: &HostScheduler, dst: Ipv4Addr, id: u16, seq: u16, ttl: u8, timeout_ms: u64) -> Result<PingStatus> {
    const POLL_MS: u64 = 20;
    let start_ms = sched.now_ms();
    let slot = shared.lock().icmp_ping_start(dst, id, seq, start_ms, ttl)?;
    loop {
        let (status, elapsed_ms) = {
            let stack = shared.lock();
            (stack.icmp_ping_poll(slot), stack.icmp_ping_elapsed_ms(slot, sched.now_ms()))
        };
        if let Some(status) = status {
            shared.lock().icmp_ping_free(slot);
            return Ok(status);
        }
        if elapsed_ms >= timeout_ms {
            shared.lock().icmp_ping_free(slot);
            return Err(NetStackError::Timeout);
        }
        sched.sleep_ms(POLL_MS);
    }
}

/// Blocking A-record resolve: cache, then mDNS for `.local` names,
/// otherwise unicast DNS against the interface's configured servers, per
/// `spec.md` §4.8.
pub fn dns_resolve_a(shared: &SharedStack, sched: &HostScheduler, name: &str, timeout_ms: u64) -> Result<Ipv4Addr> {
    as_v4(dns_resolve(shared, sched, name, dns::TYPE_A, None, timeout_ms)?)
}

/// Blocking AAAA-record resolve, per `spec.md` §6's `dns_resolve_aaaa`. The
/// `.local` path queries the same IPv4 224.0.0.251:5353 multicast group as
/// `dns_resolve_a` (the stack has no IPv6 transmit path — `ipv6` only
/// provides leaf address utilities) with `qtype = AAAA`; unicast DNS
/// queries the interface's configured (IPv4) servers the same way.
pub fn dns_resolve_aaaa(shared: &SharedStack, sched: &HostScheduler, name: &str, timeout_ms: u64) -> Result<[u8; 16]> {
    as_v6(dns_resolve(shared, sched, name, dns::TYPE_AAAA, None, timeout_ms)?)
}

/// Like [`dns_resolve_a`], but mDNS/unicast queries are pinned to `l3_id`:
/// the mDNS socket binds to that interface and unicast DNS only tries that
/// interface's configured servers.
pub fn dns_resolve_a_on_l3(shared: &SharedStack, sched: &HostScheduler, l3_id: u32, name: &str, timeout_ms: u64) -> Result<Ipv4Addr> {
    as_v4(dns_resolve(shared, sched, name, dns::TYPE_A, Some(l3_id), timeout_ms)?)
}

/// Like [`dns_resolve_aaaa`], pinned to `l3_id`.
pub fn dns_resolve_aaaa_on_l3(shared: &SharedStack, sched: &HostScheduler, l3_id: u32, name: &str, timeout_ms: u64) -> Result<[u8; 16]> {
    as_v6(dns_resolve(shared, sched, name, dns::TYPE_AAAA, Some(l3_id), timeout_ms)?)
}

fn as_v4(addr: dns::Addr) -> Result<Ipv4Addr> {
    addr.as_v4().ok_or(NetStackError::Protocol)
}

fn as_v6(addr: dns::Addr) -> Result<[u8; 16]> {
    addr.as_v6().ok_or(NetStackError::Protocol)
}

fn dns_resolve(
    shared: &SharedStack,
    sched: &HostScheduler,
    name: &str,
    qtype: u16,
    l3_id: Option<u32>,
    timeout_ms: u64,
) -> Result<dns::Addr> {
    if let Some(addr) = shared.lock().dns_cache.lookup(name, qtype) {
        return Ok(addr);
    }
    if name.ends_with(".local") {
        dns_resolve_mdns(shared, sched, name, qtype, l3_id, timeout_ms)
    } else {
        dns_resolve_unicast(shared, sched, name, qtype, l3_id, timeout_ms)
    }
}

fn dns_resolve_mdns(
    shared: &SharedStack,
    sched: &HostScheduler,
    name: &str,
    qtype: u16,
    l3_id: Option<u32>,
    timeout_ms: u64,
) -> Result<dns::Addr> {
    const POLL_MS: u64 = 50;
    let bind = match l3_id {
        Some(id) => BindSpec::BoundL3(id),
        None => BindSpec::Unbound,
    };
    let socket_id = {
        let mut stack = shared.lock();
        stack.sockets.bind(bind, 0)?
    };
    let query = mdns::build_query(name, qtype)?;
    {
        let mut stack = shared.lock();
        stack.udp_send_to(socket_id, mdns::multicast_endpoint(), &query)?;
    }

    let start_ms = sched.now_ms();
    loop {
        let reply = {
            let mut stack = shared.lock();
            stack.sockets.get_mut(socket_id).and_then(|s| s.try_recv())
        };
        if let Some((_from, payload)) = reply {
            if let Ok(Some(addr)) = mdns::parse_first_answer(&payload, name, qtype) {
                shared.lock().sockets.close(socket_id);
                shared.lock().dns_cache.insert(name, addr, 120);
                return Ok(addr);
            }
        }
        if sched.now_ms().saturating_sub(start_ms) >= timeout_ms {
            shared.lock().sockets.close(socket_id);
            return Err(NetStackError::Timeout);
        }
        sched.sleep_ms(POLL_MS);
    }
}

fn dns_resolve_unicast(
    shared: &SharedStack,
    sched: &HostScheduler,
    name: &str,
    qtype: u16,
    l3_id: Option<u32>,
    timeout_ms: u64,
) -> Result<dns::Addr> {
    const POLL_MS: u64 = 50;
    let (socket_id, servers) = {
        let mut stack = shared.lock();
        let bind = match l3_id {
            Some(id) => BindSpec::BoundL3(id),
            None => BindSpec::Unbound,
        };
        let socket_id = stack.sockets.bind(bind, 0)?;
        let servers: Vec<Ipv4Addr> = match l3_id {
            Some(id) => stack
                .l3_ipv4_find_by_id(id)
                .map(|l3| l3.runtime_opts.dns.iter().copied().filter(|ip| !ip.is_unspecified()).collect())
                .unwrap_or_default(),
            None => stack
                .all_ipv4_interfaces()
                .flat_map(|l3| l3.runtime_opts.dns.iter().copied().filter(|ip| !ip.is_unspecified()))
                .collect(),
        };
        (socket_id, servers)
    };
    if servers.is_empty() {
        shared.lock().sockets.close(socket_id);
        return Err(NetStackError::NotFound);
    }

    let xid = (sched.now_ms() as u16) ^ 0x5a5a;
    let query = dns::build_query(xid, name, qtype)?;
    let start_ms = sched.now_ms();
    let mut server_idx = 0usize;
    let mut last_send_ms = 0u64;

    loop {
        let now_ms = sched.now_ms();
        if now_ms.saturating_sub(last_send_ms) >= timeout_ms / servers.len().max(1) as u64 || last_send_ms == 0 {
            let server = servers[server_idx % servers.len()];
            server_idx += 1;
            last_send_ms = now_ms;
            let to = Endpoint { addr: IpAddr::V4(server), port: DNS_SERVER_PORT };
            let _ = shared.lock().udp_send_to(socket_id, to, &query);
        }

        let reply = {
            let mut stack = shared.lock();
            stack.sockets.get_mut(socket_id).and_then(|s| s.try_recv())
        };
        if let Some((_from, payload)) = reply {
            if let Ok(Some(addr)) = dns::parse_first_address_answer(&payload, xid, name, qtype) {
                shared.lock().sockets.close(socket_id);
                shared.lock().dns_cache.insert(name, addr, 300);
                return Ok(addr);
            }
        }
        if now_ms.saturating_sub(start_ms) >= timeout_ms {
            shared.lock().sockets.close(socket_id);
            return Err(NetStackError::Timeout);
        }
        sched.sleep_ms(POLL_MS);
    }
}

/// Open an application UDP socket bound to `l3_id` (or unbound if `None`).
pub fn socket_bind_udp(shared: &SharedStack, l3_id: Option<u32>, port: u16) -> Result<u32> {
    let bind = match l3_id {
        Some(id) => BindSpec::BoundL3(id),
        None => BindSpec::Unbound,
    };
    shared.lock().sockets.bind(bind, port)
}

pub fn socket_sendto_udp(shared: &SharedStack, socket_id: u32, to: StdIpv4Addr, port: u16, payload: &[u8]) -> Result<()> {
    let addr = Ipv4Addr::from_octets(to.octets()[0], to.octets()[1], to.octets()[2], to.octets()[3]);
    shared.lock().udp_send_to(socket_id, Endpoint::v4(addr, port), payload)
}

pub fn socket_recvfrom_udp(shared: &SharedStack, socket_id: u32) -> Option<(Endpoint, Vec<u8>)> {
    shared.lock().sockets.get_mut(socket_id).and_then(|s| s.try_recv())
}

pub fn socket_close_udp(shared: &SharedStack, socket_id: u32) {
    shared.lock().sockets.close(socket_id);
}
