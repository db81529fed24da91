//! Runtime-tunable constants (`spec.md` §6 "Runtime knobs"), gathered into
//! one struct so a host build can load them from config while a `no_std`
//! bring-up build can still construct one as a `const`-friendly literal.

#[cfg_attr(feature = "std", derive(serde::Deserialize))]
#[derive(Clone, Copy, Debug)]
pub struct StackConfig {
    pub max_l2_interfaces: usize,
    pub max_ipv4_per_interface: usize,
    pub arp_table_max: usize,
    pub dns_cache_max: usize,
    pub dhcp_query_timeout_select_ms: u64,
    pub dhcp_query_timeout_renew_ms: u64,
    pub ntp_poll_interval_ms: u64,
    pub ntp_step_us: i64,
    pub ntp_freq_max_ppm: i64,
    pub ntp_filter_n: usize,
    pub icmp_rendezvous_max: usize,
}

impl Default for StackConfig {
    fn default() -> Self {
        StackConfig {
            max_l2_interfaces: 8,
            max_ipv4_per_interface: 4,
            arp_table_max: 64,
            dns_cache_max: 32,
            dhcp_query_timeout_select_ms: 5000,
            dhcp_query_timeout_renew_ms: 2000,
            ntp_poll_interval_ms: 60_000,
            ntp_step_us: 128_000,
            ntp_freq_max_ppm: 500,
            ntp_filter_n: 8,
            icmp_rendezvous_max: 16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_knobs() {
        let c = StackConfig::default();
        assert_eq!(c.max_l2_interfaces, 8);
        assert_eq!(c.arp_table_max, 64);
        assert_eq!(c.dns_cache_max, 32);
        assert_eq!(c.ntp_filter_n, 8);
        assert_eq!(c.icmp_rendezvous_max, 16);
    }
}
