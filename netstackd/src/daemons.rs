//! Periodic maintenance daemons, factored out as plain tick functions over
//! `&mut netstack::Stack` so both the threaded host scheduler
//! ([`crate::host`]) and the cooperative bare-metal entry
//! ([`crate::os_lite`]) drive the exact same logic — only who calls
//! `tick` and how time elapses between calls differs.

extern crate alloc;

use alloc::vec::Vec;

use netstack::addr::{Endpoint, Ipv4Addr, MacAddr};
use netstack::dhcp::{self, Action, DhcpMessage};
use netstack::ipv4::{self, TxScope};
use netstack::l3::{L3Mode, RuntimeOpts};
use netstack::mdns;
use netstack::ntp;
use netstack::rng::Rng;
use netstack::udp::{self, BindSpec};
use netstack::Stack;

/// Ages every interface's ARP table every 10s, per `spec.md` §4.5.
pub struct ArpAgeDaemon {
    accum_ms: u64,
}

impl ArpAgeDaemon {
    pub const TICK_MS: u64 = 10_000;

    pub fn new() -> Self {
        ArpAgeDaemon { accum_ms: 0 }
    }

    pub fn tick(&mut self, stack: &mut Stack, delta_ms: u64) {
        self.accum_ms += delta_ms;
        if self.accum_ms >= Self::TICK_MS {
            stack.arp_tick_all(self.accum_ms);
            self.accum_ms = 0;
        }
    }
}

impl Default for ArpAgeDaemon {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns the shared DHCP client/server socket (port 68) and drives every
/// active `DhcpState`, per `spec.md` §4.9. One datagram is drained per
/// tick so a single `DhcpState::tick` call never double-applies it.
pub struct DhcpDaemon {
    chaddr_seed: u64,
    socket_id: Option<u32>,
    inform_rng: Rng,
}

impl DhcpDaemon {
    pub fn new(chaddr_seed: u64) -> Self {
        DhcpDaemon {
            chaddr_seed,
            socket_id: None,
            inform_rng: Rng::new(chaddr_seed ^ 0x5a5a_a5a5_dead_beef),
        }
    }

    fn socket(&mut self, stack: &mut Stack) -> netstack::Result<u32> {
        if let Some(id) = self.socket_id {
            return Ok(id);
        }
        let id = stack.sockets.bind(BindSpec::Unbound, dhcp::CLIENT_PORT)?;
        self.socket_id = Some(id);
        Ok(id)
    }

    pub fn tick(&mut self, stack: &mut Stack, delta_ms: u64) {
        if self.socket(stack).is_err() {
            return; // port already owned elsewhere; nothing this daemon can do.
        }
        let socket_id = self.socket_id.expect("bound above");

        stack.dhcp_reconcile(self.chaddr_seed);

        let incoming = stack
            .sockets
            .get_mut(socket_id)
            .and_then(|s| s.try_recv())
            .and_then(|(_from, payload)| DhcpMessage::parse(&payload));

        let l3_ids: Vec<u32> = stack.dhcp_states.keys().copied().collect();
        for l3_id in l3_ids {
            let action = match stack.dhcp_states.get_mut(&l3_id) {
                Some(state) => state.tick(delta_ms, incoming.as_ref()),
                None => continue,
            };
            self.apply_action(stack, l3_id, action);
        }

        self.send_pending_informs(stack);
    }

    fn apply_action(&mut self, stack: &mut Stack, l3_id: u32, action: Action) {
        match action {
            Action::None => {}
            Action::Send { dst_broadcast, server, payload } => {
                let dst = if dst_broadcast { Ipv4Addr::BROADCAST } else { server };
                let src_ip = stack.l3_ipv4_find_by_id(l3_id).map(|l3| l3.ip).unwrap_or(Ipv4Addr::UNSPECIFIED);
                let datagram = udp::build_datagram(src_ip, dst, dhcp::CLIENT_PORT, dhcp::SERVER_PORT, &payload);
                let _ = stack.send_ipv4(TxScope::BoundL3(l3_id), dst, ipv4::PROTO_UDP, 64, &datagram);
            }
            Action::Bind(lease) => {
                let xid = stack.dhcp_states.get(&l3_id).map(|s| s.xid).unwrap_or(0);
                if let Some(l3) = stack.l3_ipv4_find_by_id_mut(l3_id) {
                    l3.update(
                        lease.ip,
                        lease.mask,
                        lease.gw,
                        L3Mode::Dhcp,
                        RuntimeOpts {
                            dns: lease.dns,
                            ntp: lease.ntp,
                            mtu: lease.mtu,
                            lease_ms: lease.lease_ms,
                            t1_ms: lease.t1_ms,
                            t2_ms: lease.t2_ms,
                            server_ip: lease.server,
                            xid,
                        },
                    );
                }
            }
            Action::Unbind => {
                if let Some(l3) = stack.l3_ipv4_find_by_id_mut(l3_id) {
                    l3.clear();
                }
            }
        }
    }

    /// DHCPINFORM for statically-configured interfaces that want the
    /// resolved DNS/NTP options without leasing an address (RFC 2131 §3.4).
    fn send_pending_informs(&mut self, stack: &mut Stack) {
        let targets: Vec<(u32, u32, Ipv4Addr)> = stack
            .all_ipv4_interfaces()
            .filter(|l3| l3.needs_inform && matches!(l3.mode, L3Mode::Static))
            .map(|l3| (l3.l3_id, l3.ifindex, l3.ip))
            .collect();

        for (l3_id, ifindex, ciaddr) in targets {
            let chaddr = stack
                .l2_interface_find_by_index(ifindex)
                .map(|l2| l2.mac)
                .unwrap_or(MacAddr::ZERO);
            let xid = self.inform_rng.next_u32();
            let payload = dhcp::build_inform(xid, chaddr, ciaddr);
            let datagram = udp::build_datagram(ciaddr, Ipv4Addr::BROADCAST, dhcp::CLIENT_PORT, dhcp::SERVER_PORT, &payload);
            let _ = stack.send_ipv4(TxScope::BoundL3(l3_id), Ipv4Addr::BROADCAST, ipv4::PROTO_UDP, 64, &datagram);
            if let Some(l3) = stack.l3_ipv4_find_by_id_mut(l3_id) {
                l3.needs_inform = false;
            }
        }
    }
}

/// Ages the DNS resolver cache's TTLs, per `spec.md` §4.8.
pub struct DnsCacheDaemon;

impl DnsCacheDaemon {
    pub fn tick(&mut self, stack: &mut Stack, delta_ms: u64) {
        stack.dns_cache.tick(delta_ms);
    }
}

#[derive(Clone, Copy)]
enum NtpPhase {
    Bootstrap { attempts: u32 },
    Warming,
    Steady,
}

/// NTP client: bootstrap at a fast cadence, warm the 8-sample filter, then
/// settle into the steady-state poll interval from `StackConfig`, per
/// `spec.md` §4.11.
pub struct NtpDaemon {
    socket_id: Option<u32>,
    phase: NtpPhase,
    accum_ms: u64,
    round_robin: usize,
    pending: Option<Pending>,
}

struct Pending {
    peer_idx: usize,
    sent_xmit: ntp::NtpTimestamp,
}

const NTP_BOOTSTRAP_BASE_MS: u64 = 250;
const NTP_BOOTSTRAP_MAX_ATTEMPTS: u32 = 8;
const NTP_WARMING_INTERVAL_MS: u64 = 400;

impl NtpDaemon {
    pub fn new() -> Self {
        NtpDaemon {
            socket_id: None,
            phase: NtpPhase::Bootstrap { attempts: 0 },
            accum_ms: 0,
            round_robin: 0,
            pending: None,
        }
    }

    fn socket(&mut self, stack: &mut Stack) -> netstack::Result<u32> {
        if let Some(id) = self.socket_id {
            return Ok(id);
        }
        let id = stack.sockets.bind(BindSpec::Unbound, 0)?;
        self.socket_id = Some(id);
        Ok(id)
    }

    fn bootstrap_or_warming_interval_ms(&self) -> u64 {
        match self.phase {
            NtpPhase::Bootstrap { attempts } => NTP_BOOTSTRAP_BASE_MS << attempts.min(4),
            NtpPhase::Warming => NTP_WARMING_INTERVAL_MS,
            NtpPhase::Steady => unreachable!("tick reads the steady interval from StackConfig directly"),
        }
    }

    pub fn tick(&mut self, stack: &mut Stack, delta_ms: u64, now_ms: u64) {
        if self.socket(stack).is_err() {
            return;
        }
        let socket_id = self.socket_id.expect("bound above");

        self.drain_reply(stack, socket_id, now_ms);

        self.accum_ms += delta_ms;
        let interval = match self.phase {
            NtpPhase::Steady => stack.config.ntp_poll_interval_ms,
            _ => self.bootstrap_or_warming_interval_ms(),
        };
        if self.accum_ms < interval {
            return;
        }
        self.accum_ms = 0;
        self.advance_phase(stack);
        self.send_query(stack, socket_id, now_ms);
    }

    fn advance_phase(&mut self, stack: &mut Stack) {
        match self.phase {
            NtpPhase::Bootstrap { attempts } => {
                let attempts = attempts + 1;
                self.phase = if attempts >= NTP_BOOTSTRAP_MAX_ATTEMPTS {
                    NtpPhase::Warming
                } else {
                    NtpPhase::Bootstrap { attempts }
                };
            }
            NtpPhase::Warming => {
                let warm = stack
                    .ntp_peers
                    .iter()
                    .any(|p| p.filter.len() >= stack.config.ntp_filter_n);
                if warm {
                    self.phase = NtpPhase::Steady;
                }
            }
            NtpPhase::Steady => {}
        }
    }

    fn send_query(&mut self, stack: &mut Stack, socket_id: u32, now_ms: u64) {
        if stack.ntp_peers.is_empty() {
            return;
        }
        let idx = self.round_robin % stack.ntp_peers.len();
        self.round_robin = self.round_robin.wrapping_add(1);
        let addr = stack.ntp_peers[idx].addr;

        let xmit = ntp::NtpTimestamp::from_unix_us(now_ms as i64 * 1000);
        let query = ntp::NtpPacket::client_query(xmit).write();
        let to = Endpoint::v4(addr, ntp::SERVER_PORT);
        if stack.udp_send_to(socket_id, to, &query).is_ok() {
            self.pending = Some(Pending { peer_idx: idx, sent_xmit: xmit });
        }
    }

    fn drain_reply(&mut self, stack: &mut Stack, socket_id: u32, now_ms: u64) {
        let Some(pending) = self.pending.take() else { return };
        let Some(sock) = stack.sockets.get_mut(socket_id) else { return };
        let Some((from, payload)) = sock.try_recv() else {
            self.pending = Some(pending);
            return;
        };
        if pending.peer_idx >= stack.ntp_peers.len() || stack.ntp_peers[pending.peer_idx].addr != from.addr.as_v4().unwrap_or(Ipv4Addr::UNSPECIFIED) {
            return;
        }
        let Ok(reply) = ntp::NtpPacket::parse(&payload) else { return };
        match ntp::validate_reply(&reply, pending.sent_xmit) {
            ntp::ReplyOutcome::KissOfDeath => {
                stack.ntp_peers[pending.peer_idx].kiss_of_death = true;
            }
            ntp::ReplyOutcome::Invalid => {}
            ntp::ReplyOutcome::Accepted => {
                let t1 = pending.sent_xmit.to_unix_us();
                let t2 = reply.recv_ts.to_unix_us();
                let t3 = reply.xmit_ts.to_unix_us();
                let t4 = now_ms as i64 * 1000;
                let sample = ntp::compute_sample(t1, t2, t3, t4, now_ms);
                stack.ntp_peers[pending.peer_idx].filter.insert(sample);
                if let Some(best_idx) = ntp::select_best_peer(&stack.ntp_peers, now_ms) {
                    if let Some(offset) = stack.ntp_peers[best_idx].filter.best_offset(now_ms) {
                        let _ = stack.clock.discipline(offset, 0, now_ms);
                    }
                }
            }
        }
    }
}

impl Default for NtpDaemon {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives the mDNS responder/announcer burst scheduler and multicasts
/// whatever it produces, per `spec.md` §4.10.
pub struct MdnsDaemon;

impl MdnsDaemon {
    pub fn tick(&mut self, stack: &mut Stack, delta_ms: u64) {
        let host = stack.host_name.clone();
        let packets = stack.mdns.tick(delta_ms, &host);
        for packet in packets {
            let datagram = udp::build_datagram(
                Ipv4Addr::UNSPECIFIED,
                mdns::MULTICAST_GROUP,
                mdns::MULTICAST_PORT,
                mdns::MULTICAST_PORT,
                &packet,
            );
            let _ = stack.send_ipv4(TxScope::Unbound, mdns::MULTICAST_GROUP, ipv4::PROTO_UDP, 1, &datagram);
        }
    }
}

/// `Stack::net_task_step` already carries its own pump logic; this just
/// names the cadence both schedulers use (`spec.md` §4.3: poll immediately
/// when work was found, otherwise back off).
pub const NET_TASK_IDLE_SLEEP_MS: u64 = 10;
