//! NTP client: wire codec, sample filter, peer selection, and clock
//! discipline (`spec.md` §4.11). Time quantities below are microseconds
//! unless named `_ms`/`_s`.

extern crate alloc;

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use crate::addr::Ipv4Addr;
use crate::error::{NetStackError, Result};

pub const SERVER_PORT: u16 = 123;
pub const UNIX_TO_NTP_EPOCH_SECS: u64 = 2_208_988_800; // 1970 - 1900

const LI_ALARM: u8 = 3;
const MODE_CLIENT: u8 = 3;
const MODE_SERVER: u8 = 4;

const STEP_THRESHOLD_US: i64 = 128_000;
const FREQ_GATE_MARGIN_US: i64 = 2_000;
const FREQ_CLAMP_PPM: i64 = 500;
const FILTER_SIZE: usize = 8;
const DISPERSION_GROWTH_US_PER_MS: i64 = 15; // ~15 ppm per RFC 5905 guidance

const KOD_DENY: [u8; 4] = *b"DENY";
const KOD_RSTR: [u8; 4] = *b"RSTR";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NtpTimestamp(pub u64); // NTP64 fixed-point seconds since 1900, big-endian on the wire.

impl NtpTimestamp {
    pub fn from_unix_us(unix_us: i64) -> Self {
        let secs = (unix_us / 1_000_000) as u64 + UNIX_TO_NTP_EPOCH_SECS;
        let frac_us = (unix_us % 1_000_000) as u64;
        let frac = (frac_us << 32) / 1_000_000;
        NtpTimestamp((secs << 32) | frac)
    }

    pub fn to_unix_us(self) -> i64 {
        let secs = (self.0 >> 32) as i64 - UNIX_TO_NTP_EPOCH_SECS as i64;
        let frac = self.0 & 0xFFFF_FFFF;
        let frac_us = (frac * 1_000_000) >> 32;
        secs * 1_000_000 + frac_us as i64
    }
}

#[derive(Clone, Copy, Debug)]
pub struct NtpPacket {
    pub li: u8,
    pub vn: u8,
    pub mode: u8,
    pub stratum: u8,
    pub ref_id: [u8; 4],
    pub orig_ts: NtpTimestamp,
    pub recv_ts: NtpTimestamp,
    pub xmit_ts: NtpTimestamp,
}

impl NtpPacket {
    pub const LEN: usize = 48;

    pub fn client_query(xmit_ts: NtpTimestamp) -> Self {
        NtpPacket {
            li: 0,
            vn: 4,
            mode: MODE_CLIENT,
            stratum: 0,
            ref_id: [0; 4],
            orig_ts: NtpTimestamp(0),
            recv_ts: NtpTimestamp(0),
            xmit_ts,
        }
    }

    pub fn write(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        out[0] = (self.li << 6) | (self.vn << 3) | self.mode;
        out[1] = self.stratum;
        out[2] = 6; // poll interval, log2 seconds
        out[3] = (-20i8) as u8; // precision
        out[16..24].copy_from_slice(&self.orig_ts.0.to_be_bytes());
        out[24..32].copy_from_slice(&self.recv_ts.0.to_be_bytes());
        out[40..48].copy_from_slice(&self.xmit_ts.0.to_be_bytes());
        out
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::LEN {
            return Err(NetStackError::WireFormat);
        }
        Ok(NtpPacket {
            li: data[0] >> 6,
            vn: (data[0] >> 3) & 0x07,
            mode: data[0] & 0x07,
            stratum: data[1],
            ref_id: [data[12], data[13], data[14], data[15]],
            orig_ts: NtpTimestamp(u64::from_be_bytes(data[24..32].try_into().unwrap())),
            recv_ts: NtpTimestamp(u64::from_be_bytes(data[32..40].try_into().unwrap())),
            xmit_ts: NtpTimestamp(u64::from_be_bytes(data[40..48].try_into().unwrap())),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplyOutcome {
    Accepted,
    KissOfDeath,
    Invalid,
}

/// Validate a reply against what we sent: LI≠3, mode=server, VN∈{3,4},
/// stratum∈[1,15], origTs matches, recv/xmit non-zero, txTs≥recvTs.
/// Stratum 0 with a DENY/RSTR refId is a Kiss-of-Death.
pub fn validate_reply(reply: &NtpPacket, sent_xmit_ts: NtpTimestamp) -> ReplyOutcome {
    if reply.stratum == 0 {
        if reply.ref_id == KOD_DENY || reply.ref_id == KOD_RSTR {
            return ReplyOutcome::KissOfDeath;
        }
        return ReplyOutcome::Invalid;
    }
    if reply.li == LI_ALARM || reply.mode != MODE_SERVER || !(3..=4).contains(&reply.vn) {
        return ReplyOutcome::Invalid;
    }
    if !(1..=15).contains(&reply.stratum) {
        return ReplyOutcome::Invalid;
    }
    if reply.orig_ts != sent_xmit_ts {
        return ReplyOutcome::Invalid;
    }
    if reply.recv_ts.0 == 0 || reply.xmit_ts.0 == 0 || reply.xmit_ts.0 < reply.recv_ts.0 {
        return ReplyOutcome::Invalid;
    }
    ReplyOutcome::Accepted
}

#[derive(Clone, Copy, Debug)]
pub struct Sample {
    pub offset_us: i64,
    pub delay_us: i64,
    pub dispersion_us: i64,
    pub t_sample_ms: u64,
}

/// Compute one sample from the four NTP timestamps of a client/server
/// exchange: `t1`=send (client clock), `T2`=recv (server), `T3`=xmit
/// (server), `t4`=receive (client clock); all in microseconds.
pub fn compute_sample(t1_us: i64, t2_us: i64, t3_us: i64, t4_us: i64, now_ms: u64) -> Sample {
    let rtt = ((t4_us - t1_us) - (t3_us - t2_us)).max(0);
    let offset = ((t2_us - t1_us) + (t3_us - t4_us)) / 2;
    Sample {
        offset_us: offset,
        delay_us: rtt,
        dispersion_us: rtt / 2 + 1000,
        t_sample_ms: now_ms,
    }
}

/// Size-8 newest-first sample filter.
#[derive(Default)]
pub struct Filter {
    samples: VecDeque<Sample>,
}

impl Filter {
    pub fn insert(&mut self, s: Sample) {
        self.samples.push_front(s);
        if self.samples.len() > FILTER_SIZE {
            self.samples.pop_back();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Index of the best sample by (delay, age-inflated dispersion)
    /// lexicographic order, age measured against `now_ms`.
    fn best_index(&self, now_ms: u64) -> Option<usize> {
        self.samples
            .iter()
            .enumerate()
            .min_by_key(|(_, s)| {
                let age_ms = now_ms.saturating_sub(s.t_sample_ms) as i64;
                let inflated_disp = s.dispersion_us + age_ms * DISPERSION_GROWTH_US_PER_MS;
                (s.delay_us, inflated_disp)
            })
            .map(|(i, _)| i)
    }

    fn best(&self, now_ms: u64) -> Option<&Sample> {
        self.best_index(now_ms).map(|i| &self.samples[i])
    }

    /// RMS of offsets around the best sample's offset.
    fn jitter_us(&self, best_offset_us: i64) -> i64 {
        if self.samples.len() < 2 {
            return 0;
        }
        let sum_sq: i64 = self
            .samples
            .iter()
            .map(|s| {
                let d = s.offset_us - best_offset_us;
                d * d
            })
            .sum();
        integer_sqrt((sum_sq / self.samples.len() as i64).max(0))
    }

    /// Root distance contribution from this peer's filter alone (does
    /// not include the peer's own root delay/dispersion, added by the
    /// caller).
    pub fn root_distance_contribution(&self, now_ms: u64) -> Option<i64> {
        let best = self.best(now_ms)?;
        let jitter = self.jitter_us(best.offset_us);
        Some(best.delay_us / 2 + best.dispersion_us + jitter)
    }

    pub fn best_offset(&self, now_ms: u64) -> Option<i64> {
        self.best(now_ms).map(|s| s.offset_us)
    }

    pub fn best_delay(&self, now_ms: u64) -> Option<i64> {
        self.best(now_ms).map(|s| s.delay_us)
    }
}

fn integer_sqrt(v: i64) -> i64 {
    if v <= 0 {
        return 0;
    }
    let mut x = v;
    let mut y = (x + 1) / 2;
    while y < x {
        x = y;
        y = (x + v / x) / 2;
    }
    x
}

pub struct NtpPeer {
    pub addr: Ipv4Addr,
    pub filter: Filter,
    pub root_disp_us: i64,
    pub root_delay_us: i64,
    pub kiss_of_death: bool,
}

impl NtpPeer {
    pub fn new(addr: Ipv4Addr) -> Self {
        NtpPeer {
            addr,
            filter: Filter::default(),
            root_disp_us: 0,
            root_delay_us: 0,
            kiss_of_death: false,
        }
    }

    pub fn root_distance(&self, now_ms: u64) -> Option<i64> {
        let contribution = self.filter.root_distance_contribution(now_ms)?;
        Some(self.root_disp_us + self.root_delay_us / 2 + contribution)
    }
}

/// Select the peer with minimum root distance, tie-breaking by smaller
/// best delay. Peers under Kiss-of-Death backoff are excluded.
pub fn select_best_peer(peers: &[NtpPeer], now_ms: u64) -> Option<usize> {
    peers
        .iter()
        .enumerate()
        .filter(|(_, p)| !p.kiss_of_death)
        .filter_map(|(i, p)| Some((i, p.root_distance(now_ms)?, p.filter.best_delay(now_ms)?)))
        .min_by_key(|&(_, dist, delay)| (dist, delay))
        .map(|(i, _, _)| i)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Discipline {
    Step(i64),
    Slew(i64),
}

pub struct ClockState {
    pub synced: bool,
    pub freq_ppm: i64,
    prev_offset_us: Option<i64>,
    prev_gate_met: bool,
    prev_sample_ms: u64,
}

impl ClockState {
    pub fn new() -> Self {
        ClockState {
            synced: false,
            freq_ppm: 0,
            prev_offset_us: None,
            prev_gate_met: false,
            prev_sample_ms: 0,
        }
    }

    /// Apply a fresh (offset, jitter) sample and decide step vs. slew,
    /// updating the frequency estimate per `spec.md` §4.11.
    pub fn discipline(&mut self, offset_us: i64, jitter_us: i64, now_ms: u64) -> Discipline {
        if !self.synced {
            self.synced = true;
            self.freq_ppm = 0;
            self.prev_offset_us = None;
            self.prev_gate_met = false;
            self.prev_sample_ms = now_ms;
            return Discipline::Step(offset_us);
        }
        if offset_us.abs() > STEP_THRESHOLD_US {
            self.prev_offset_us = None;
            self.prev_gate_met = false;
            self.prev_sample_ms = now_ms;
            return Discipline::Step(offset_us);
        }

        let gate = offset_us.abs() <= 4 * jitter_us + FREQ_GATE_MARGIN_US;
        let interval_ok = now_ms.saturating_sub(self.prev_sample_ms) >= 1000;
        if gate && self.prev_gate_met && interval_ok {
            if let Some(prev) = self.prev_offset_us {
                let dt_us = (now_ms.saturating_sub(self.prev_sample_ms) as i64).max(1) * 1000;
                // est in ppm: (offset change over interval) / interval, scaled to parts-per-million.
                let est_ppm = ((offset_us - prev) * 1_000_000) / dt_us;
                self.freq_ppm = (7 * self.freq_ppm + est_ppm) / 8;
                self.freq_ppm = self.freq_ppm.clamp(-FREQ_CLAMP_PPM, FREQ_CLAMP_PPM);
            }
        }
        self.prev_offset_us = Some(offset_us);
        self.prev_gate_met = gate;
        self.prev_sample_ms = now_ms;
        Discipline::Slew(offset_us)
    }
}

impl Default for ClockState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ntp_timestamp_roundtrips_through_unix_us() {
        let unix_us = 1_700_000_000_000_000i64;
        let ts = NtpTimestamp::from_unix_us(unix_us);
        let back = ts.to_unix_us();
        assert!((back - unix_us).abs() < 2);
    }

    #[test]
    fn packet_roundtrips() {
        let sent = NtpPacket::client_query(NtpTimestamp::from_unix_us(1_700_000_000_000_000));
        let bytes = sent.write();
        let parsed = NtpPacket::parse(&bytes).unwrap();
        assert_eq!(parsed.mode, MODE_CLIENT);
        assert_eq!(parsed.xmit_ts, sent.xmit_ts);
    }

    #[test]
    fn kiss_of_death_detected_on_stratum_zero_deny() {
        let reply = NtpPacket {
            li: 0,
            vn: 4,
            mode: MODE_SERVER,
            stratum: 0,
            ref_id: KOD_DENY,
            orig_ts: NtpTimestamp(5),
            recv_ts: NtpTimestamp(6),
            xmit_ts: NtpTimestamp(7),
        };
        assert_eq!(validate_reply(&reply, NtpTimestamp(5)), ReplyOutcome::KissOfDeath);
    }

    #[test]
    fn mismatched_origin_timestamp_is_invalid() {
        let reply = NtpPacket {
            li: 0,
            vn: 4,
            mode: MODE_SERVER,
            stratum: 2,
            ref_id: [0; 4],
            orig_ts: NtpTimestamp(99),
            recv_ts: NtpTimestamp(6),
            xmit_ts: NtpTimestamp(7),
        };
        assert_eq!(validate_reply(&reply, NtpTimestamp(5)), ReplyOutcome::Invalid);
    }

    #[test]
    fn first_sample_always_steps() {
        let mut clock = ClockState::new();
        assert_eq!(clock.discipline(50_000, 1000, 0), Discipline::Step(50_000));
        assert!(clock.synced);
    }

    #[test]
    fn large_offset_after_sync_steps_again() {
        let mut clock = ClockState::new();
        clock.discipline(100, 1000, 0);
        assert_eq!(clock.discipline(200_000, 1000, 1000), Discipline::Step(200_000));
    }

    #[test]
    fn small_offset_after_sync_slews() {
        let mut clock = ClockState::new();
        clock.discipline(100, 1000, 0);
        assert_eq!(clock.discipline(500, 1000, 1000), Discipline::Slew(500));
    }

    #[test]
    fn peer_selection_prefers_minimum_root_distance() {
        let mut near = NtpPeer::new(Ipv4Addr::from_octets(10, 0, 0, 1));
        near.filter.insert(compute_sample(0, 1000, 1000, 2000, 0));
        let mut far = NtpPeer::new(Ipv4Addr::from_octets(10, 0, 0, 2));
        far.filter.insert(compute_sample(0, 50_000, 50_000, 100_000, 0));

        let peers = [near, far];
        assert_eq!(select_best_peer(&peers, 0), Some(0));
    }
}
