//! DHCP client state machine, wire codec, and backoff (`spec.md` §4.9).
//!
//! One [`DhcpState`] per L3 interface. The daemon loop calls [`tick`]
//! every 100 ms with elapsed time and any datagram that arrived for this
//! lease's socket; `tick` returns the action the caller must perform
//! (send a specific message, or nothing) and the caller applies any
//! resulting address change through `L3Ipv4Interface::update`.

extern crate alloc;

use alloc::vec::Vec;

use crate::addr::{MacAddr, Ipv4Addr};
use crate::rng::Rng;

pub const SERVER_PORT: u16 = 67;
pub const CLIENT_PORT: u16 = 68;

const OP_BOOTREQUEST: u8 = 1;
const OP_BOOTREPLY: u8 = 2;
const HTYPE_ETHERNET: u8 = 1;
const HLEN_ETHERNET: u8 = 6;
const MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];

const OPT_PAD: u8 = 0;
const OPT_SUBNET_MASK: u8 = 1;
const OPT_ROUTER: u8 = 3;
const OPT_DNS: u8 = 6;
const OPT_REQUESTED_IP: u8 = 50;
const OPT_LEASE_TIME: u8 = 51;
const OPT_MESSAGE_TYPE: u8 = 53;
const OPT_SERVER_ID: u8 = 54;
const OPT_PARAM_REQUEST_LIST: u8 = 55;
const OPT_T1: u8 = 58;
const OPT_T2: u8 = 59;
const OPT_END: u8 = 255;
const OPT_INTERFACE_MTU: u8 = 26;
const OPT_NTP_SERVERS: u8 = 42;

pub const MSG_DISCOVER: u8 = 1;
pub const MSG_OFFER: u8 = 2;
pub const MSG_REQUEST: u8 = 3;
pub const MSG_ACK: u8 = 5;
pub const MSG_NAK: u8 = 6;
pub const MSG_INFORM: u8 = 8;

const BACKOFF_START_MS: u64 = 4000;
const BACKOFF_CAP_MS: u64 = 64_000;
const BACKOFF_JITTER_MS: i64 = 1000;
const BACKOFF_FLOOR_MS: u64 = 1000;
const SELECTING_TIMEOUT_MS: u64 = 5000;
const RENEW_TIMEOUT_MS: u64 = 2000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Init,
    Selecting,
    Requesting,
    Bound,
    Renewing,
    Rebinding,
}

#[derive(Clone, Debug, Default)]
pub struct Lease {
    pub ip: Ipv4Addr,
    pub mask: Ipv4Addr,
    pub gw: Ipv4Addr,
    pub dns: [Ipv4Addr; 2],
    pub ntp: [Ipv4Addr; 2],
    pub mtu: u16,
    pub server: Ipv4Addr,
    pub lease_ms: u32,
    pub t1_ms: u32,
    pub t2_ms: u32,
}

/// What the caller must do this tick.
pub enum Action {
    None,
    Send { dst_broadcast: bool, server: Ipv4Addr, payload: Vec<u8> },
    Bind(Lease),
    Unbind,
}

pub struct DhcpState {
    pub phase: Phase,
    pub xid: u32,
    pub chaddr: MacAddr,
    retry_left_ms: u64,
    backoff_ms: u64,
    t1_left_ms: u64,
    t2_left_ms: u64,
    lease_left_ms: u64,
    offer_server: Ipv4Addr,
    offer: Option<Lease>,
    pub force_renew: bool,
    rng: Rng,
}

impl DhcpState {
    pub fn new(chaddr: MacAddr, seed: u64) -> Self {
        DhcpState {
            phase: Phase::Init,
            xid: 0,
            chaddr,
            retry_left_ms: 0,
            backoff_ms: BACKOFF_START_MS,
            t1_left_ms: 0,
            t2_left_ms: 0,
            lease_left_ms: 0,
            offer_server: Ipv4Addr::UNSPECIFIED,
            offer: None,
            force_renew: false,
            rng: Rng::new(seed),
        }
    }

    fn next_backoff(&mut self) -> u64 {
        let jitter = self.rng.jitter_ms(BACKOFF_JITTER_MS);
        let with_jitter = (self.backoff_ms as i64 + jitter).max(BACKOFF_FLOOR_MS as i64) as u64;
        self.backoff_ms = (self.backoff_ms * 2).min(BACKOFF_CAP_MS);
        with_jitter
    }

    fn fresh_xid(&mut self) -> u32 {
        self.xid = self.rng.next_u32();
        self.xid
    }

    fn schedule_retry(&mut self) {
        self.phase = Phase::Init;
        self.retry_left_ms = self.next_backoff();
        self.offer = None;
    }

    /// Advance the FSM by `delta_ms`, optionally with one received
    /// message for this xid/chaddr already decoded. Mirrors the state
    /// table exactly.
    pub fn tick(&mut self, delta_ms: u64, incoming: Option<&DhcpMessage>) -> Action {
        self.retry_left_ms = self.retry_left_ms.saturating_sub(delta_ms);

        if let Some(msg) = incoming {
            if msg.xid == self.xid && msg.chaddr == self.chaddr {
                match (self.phase, msg.msg_type) {
                    (Phase::Selecting, MSG_OFFER) => {
                        self.offer_server = msg.server_id;
                        self.offer = Some(msg.to_lease());
                        self.phase = Phase::Requesting;
                        self.retry_left_ms = SELECTING_TIMEOUT_MS;
                        return Action::Send {
                            dst_broadcast: true,
                            server: Ipv4Addr::BROADCAST,
                            payload: build_request(self.xid, self.chaddr, msg.offered_ip, RequestKind::Selecting, self.offer_server),
                        };
                    }
                    (Phase::Requesting, MSG_ACK) => return self.apply_ack(msg),
                    (Phase::Requesting, MSG_NAK) => {
                        self.schedule_retry();
                        return Action::Unbind;
                    }
                    (Phase::Renewing, MSG_ACK) => return self.apply_ack(msg),
                    (Phase::Renewing, MSG_NAK) => {
                        self.schedule_retry();
                        return Action::Unbind;
                    }
                    (Phase::Rebinding, MSG_ACK) => return self.apply_ack(msg),
                    (Phase::Rebinding, MSG_NAK) => {
                        self.schedule_retry();
                        return Action::Unbind;
                    }
                    _ => {}
                }
            }
        }

        match self.phase {
            Phase::Init => {
                if self.retry_left_ms == 0 {
                    let xid = self.fresh_xid();
                    self.phase = Phase::Selecting;
                    self.retry_left_ms = SELECTING_TIMEOUT_MS;
                    Action::Send {
                        dst_broadcast: true,
                        server: Ipv4Addr::BROADCAST,
                        payload: build_discover(xid, self.chaddr),
                    }
                } else {
                    Action::None
                }
            }
            Phase::Selecting => {
                if self.retry_left_ms == 0 {
                    self.schedule_retry();
                }
                Action::None
            }
            Phase::Requesting => {
                if self.retry_left_ms == 0 {
                    self.schedule_retry();
                    Action::Unbind
                } else {
                    Action::None
                }
            }
            Phase::Bound => {
                if self.force_renew {
                    self.force_renew = false;
                    self.phase = Phase::Renewing;
                    self.retry_left_ms = RENEW_TIMEOUT_MS;
                    let lease = self.offer.as_ref().expect("bound implies a lease");
                    return Action::Send {
                        dst_broadcast: false,
                        server: lease.server,
                        payload: build_request(self.xid, self.chaddr, lease.ip, RequestKind::Renewing, Ipv4Addr::UNSPECIFIED),
                    };
                }
                self.t1_left_ms = self.t1_left_ms.saturating_sub(delta_ms);
                self.t2_left_ms = self.t2_left_ms.saturating_sub(delta_ms);
                self.lease_left_ms = self.lease_left_ms.saturating_sub(delta_ms);
                if self.t1_left_ms == 0 {
                    self.phase = Phase::Renewing;
                    self.retry_left_ms = RENEW_TIMEOUT_MS;
                    let lease = self.offer.as_ref().expect("bound implies a lease");
                    Action::Send {
                        dst_broadcast: false,
                        server: lease.server,
                        payload: build_request(self.xid, self.chaddr, lease.ip, RequestKind::Renewing, Ipv4Addr::UNSPECIFIED),
                    }
                } else if self.t2_left_ms == 0 {
                    self.phase = Phase::Rebinding;
                    self.retry_left_ms = RENEW_TIMEOUT_MS;
                    let lease = self.offer.as_ref().expect("bound implies a lease");
                    Action::Send {
                        dst_broadcast: true,
                        server: Ipv4Addr::BROADCAST,
                        payload: build_request(self.xid, self.chaddr, lease.ip, RequestKind::Rebinding, Ipv4Addr::UNSPECIFIED),
                    }
                } else {
                    Action::None
                }
            }
            Phase::Renewing => {
                if self.retry_left_ms == 0 {
                    self.phase = Phase::Rebinding;
                    self.retry_left_ms = RENEW_TIMEOUT_MS;
                    let lease = self.offer.as_ref().expect("bound implies a lease");
                    Action::Send {
                        dst_broadcast: true,
                        server: Ipv4Addr::BROADCAST,
                        payload: build_request(self.xid, self.chaddr, lease.ip, RequestKind::Rebinding, Ipv4Addr::UNSPECIFIED),
                    }
                } else {
                    Action::None
                }
            }
            Phase::Rebinding => {
                if self.retry_left_ms == 0 {
                    self.schedule_retry();
                    Action::Unbind
                } else {
                    Action::None
                }
            }
        }
    }

    fn apply_ack(&mut self, msg: &DhcpMessage) -> Action {
        let lease = msg.to_lease();
        self.t1_left_ms = lease.t1_ms as u64;
        self.t2_left_ms = lease.t2_ms as u64;
        self.lease_left_ms = lease.lease_ms as u64;
        self.backoff_ms = BACKOFF_START_MS;
        self.phase = Phase::Bound;
        self.offer = Some(lease.clone());
        Action::Bind(lease)
    }

    pub fn request_renew(&mut self) {
        self.force_renew = true;
    }
}

#[derive(Clone, Debug, Default)]
pub struct DhcpMessage {
    pub op: u8,
    pub xid: u32,
    pub chaddr: MacAddr,
    pub offered_ip: Ipv4Addr,
    pub msg_type: u8,
    pub subnet_mask: Ipv4Addr,
    pub router: Ipv4Addr,
    pub dns: [Ipv4Addr; 2],
    pub ntp: [Ipv4Addr; 2],
    pub mtu: u16,
    pub lease_s: u32,
    pub t1_s: u32,
    pub t2_s: u32,
    pub server_id: Ipv4Addr,
}

impl DhcpMessage {
    fn to_lease(&self) -> Lease {
        let lease_s = if self.lease_s == 0 { 86_400 } else { self.lease_s };
        let t1_s = if self.t1_s == 0 { lease_s / 2 } else { self.t1_s };
        let t2_s = if self.t2_s == 0 { lease_s * 7 / 8 } else { self.t2_s };
        let mut dns = self.dns;
        if dns[0].is_unspecified() && !self.router.is_unspecified() {
            dns[0] = self.router;
        }
        Lease {
            ip: self.offered_ip,
            mask: self.subnet_mask,
            gw: self.router,
            dns,
            ntp: self.ntp,
            mtu: self.mtu,
            server: self.server_id,
            lease_ms: lease_s.saturating_mul(1000),
            t1_ms: t1_s.saturating_mul(1000),
            t2_ms: t2_s.saturating_mul(1000),
        }
    }

    /// Parse and validate htype/hlen/magic cookie/xid/chaddr as required
    /// by `spec.md` §4.9's offer-parsing rules. `expect_xid`/`expect_chaddr`
    /// are `None` when the caller hasn't committed to a transaction yet
    /// (not used by the client, which always knows its own xid).
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 240 {
            return None;
        }
        let op = data[0];
        let htype = data[1];
        let hlen = data[2];
        if htype != HTYPE_ETHERNET || hlen != HLEN_ETHERNET {
            return None;
        }
        let xid = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let yiaddr = Ipv4Addr::from_be_bytes([data[16], data[17], data[18], data[19]]);
        let chaddr = MacAddr([data[28], data[29], data[30], data[31], data[32], data[33]]);
        if data[236..240] != MAGIC_COOKIE {
            return None;
        }

        let mut msg = DhcpMessage {
            op,
            xid,
            chaddr,
            offered_ip: yiaddr,
            ..Default::default()
        };

        let mut i = 240;
        while i < data.len() {
            let code = data[i];
            if code == OPT_END {
                break;
            }
            if code == OPT_PAD {
                i += 1;
                continue;
            }
            if i + 1 >= data.len() {
                break;
            }
            let len = data[i + 1] as usize;
            let start = i + 2;
            let end = start + len;
            if end > data.len() {
                break;
            }
            let body = &data[start..end];
            match code {
                OPT_MESSAGE_TYPE if len == 1 => msg.msg_type = body[0],
                OPT_SUBNET_MASK if len == 4 => {
                    msg.subnet_mask = Ipv4Addr::from_be_bytes([body[0], body[1], body[2], body[3]])
                }
                OPT_ROUTER if len >= 4 => {
                    msg.router = Ipv4Addr::from_be_bytes([body[0], body[1], body[2], body[3]])
                }
                OPT_DNS if len >= 4 => {
                    msg.dns[0] = Ipv4Addr::from_be_bytes([body[0], body[1], body[2], body[3]]);
                    if len >= 8 {
                        msg.dns[1] = Ipv4Addr::from_be_bytes([body[4], body[5], body[6], body[7]]);
                    }
                }
                OPT_NTP_SERVERS if len >= 4 => {
                    msg.ntp[0] = Ipv4Addr::from_be_bytes([body[0], body[1], body[2], body[3]]);
                    if len >= 8 {
                        msg.ntp[1] = Ipv4Addr::from_be_bytes([body[4], body[5], body[6], body[7]]);
                    }
                }
                OPT_INTERFACE_MTU if len == 2 => msg.mtu = u16::from_be_bytes([body[0], body[1]]),
                OPT_LEASE_TIME if len == 4 => {
                    msg.lease_s = u32::from_be_bytes([body[0], body[1], body[2], body[3]])
                }
                OPT_T1 if len == 4 => msg.t1_s = u32::from_be_bytes([body[0], body[1], body[2], body[3]]),
                OPT_T2 if len == 4 => msg.t2_s = u32::from_be_bytes([body[0], body[1], body[2], body[3]]),
                OPT_SERVER_ID if len == 4 => {
                    msg.server_id = Ipv4Addr::from_be_bytes([body[0], body[1], body[2], body[3]])
                }
                _ => {}
            }
            i = end;
        }

        Some(msg)
    }
}

fn base_packet(xid: u32, chaddr: MacAddr, ciaddr: Ipv4Addr) -> Vec<u8> {
    let mut out = Vec::with_capacity(240 + 64);
    out.push(OP_BOOTREQUEST);
    out.push(HTYPE_ETHERNET);
    out.push(HLEN_ETHERNET);
    out.push(0); // hops
    out.extend_from_slice(&xid.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes()); // secs
    out.extend_from_slice(&0u16.to_be_bytes()); // flags
    out.extend_from_slice(&ciaddr.to_be_bytes());
    out.extend_from_slice(&[0u8; 4]); // yiaddr
    out.extend_from_slice(&[0u8; 4]); // siaddr
    out.extend_from_slice(&[0u8; 4]); // giaddr
    let mut chaddr_field = [0u8; 16];
    chaddr_field[..6].copy_from_slice(&chaddr.0);
    out.extend_from_slice(&chaddr_field);
    out.extend_from_slice(&[0u8; 64]); // sname
    out.extend_from_slice(&[0u8; 128]); // file
    out.extend_from_slice(&MAGIC_COOKIE);
    out
}

fn push_option(out: &mut Vec<u8>, code: u8, body: &[u8]) {
    out.push(code);
    out.push(body.len() as u8);
    out.extend_from_slice(body);
}

pub fn build_discover(xid: u32, chaddr: MacAddr) -> Vec<u8> {
    let mut out = base_packet(xid, chaddr, Ipv4Addr::UNSPECIFIED);
    push_option(&mut out, OPT_MESSAGE_TYPE, &[MSG_DISCOVER]);
    push_option(
        &mut out,
        OPT_PARAM_REQUEST_LIST,
        &[OPT_SUBNET_MASK, OPT_ROUTER, OPT_DNS, OPT_INTERFACE_MTU, OPT_NTP_SERVERS, OPT_T1, OPT_T2],
    );
    out.push(OPT_END);
    out
}

/// Which DHCPREQUEST variant is being built, per RFC 2131 table 5 (and the
/// original's distinct `DHCPK_SELECT`/`DHCPK_RENEW` request kinds): only
/// `Selecting` carries `ciaddr = 0` plus option 50 (requested IP) and
/// option 54 (server id); `Renewing`/`Rebinding` carry `ciaddr =
/// requested_ip` and neither option.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestKind {
    Selecting,
    Renewing,
    Rebinding,
}

pub fn build_request(xid: u32, chaddr: MacAddr, requested_ip: Ipv4Addr, kind: RequestKind, server: Ipv4Addr) -> Vec<u8> {
    let ciaddr = match kind {
        RequestKind::Selecting => Ipv4Addr::UNSPECIFIED,
        RequestKind::Renewing | RequestKind::Rebinding => requested_ip,
    };
    let mut out = base_packet(xid, chaddr, ciaddr);
    push_option(&mut out, OPT_MESSAGE_TYPE, &[MSG_REQUEST]);
    if kind == RequestKind::Selecting {
        push_option(&mut out, OPT_REQUESTED_IP, &requested_ip.to_be_bytes());
        push_option(&mut out, OPT_SERVER_ID, &server.to_be_bytes());
    }
    out.push(OPT_END);
    out
}

pub fn build_inform(xid: u32, chaddr: MacAddr, ciaddr: Ipv4Addr) -> Vec<u8> {
    let mut out = base_packet(xid, chaddr, ciaddr);
    push_option(&mut out, OPT_MESSAGE_TYPE, &[MSG_INFORM]);
    out.push(OPT_END);
    out
}
