//! Driver capability set (`spec.md` §4.2, §6) and the NIC bus that
//! multiplexes concrete drivers.
//!
//! Concrete drivers (virtio-net, loopback) live in the sibling `net-virtio`
//! crate and implement [`NetDriver`] for this trait object; this module
//! only defines the contract and the bus-side bookkeeping the dispatch
//! loop and `L2Interface` need.

extern crate alloc;

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;

use crate::addr::MacAddr;
use crate::buffer::PacketBuffer;
use crate::error::Result;

/// Half-duplex / full-duplex, matching the original `get_duplex()` return.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Duplex {
    Half,
    Full,
}

/// The capability set every NIC driver must expose. Mirrors
/// `NetDriver` in the original (`net_driver.hpp`): enumerate-time init,
/// buffer allocation sized for the driver's own header, blocking-free
/// send/receive handoff, and static descriptors (MAC/MTU/header
/// size/speed/duplex). `sync_multicast` has a default no-op impl, as in
/// the original base class.
pub trait NetDriver {
    /// Initialize the device at the given bus address with the given base
    /// IRQ vector. Returns `false` (not an error) if the specific device at
    /// that address does not match or fails self-test — the bus continues
    /// enumerating past a `false`.
    fn init_at(&mut self, addr: u64, irq_base: u32) -> bool;

    /// Allocate a transmit-side buffer sized for `size` bytes of payload,
    /// with headroom reserved for this driver's `header_size()` plus the
    /// caller's own encapsulation needs.
    fn allocate_packet(&self, size: usize) -> Result<PacketBuffer>;

    /// Submit a buffer for transmission. Returns `Ok(true)` if accepted,
    /// `Ok(false)` if the ring is full (caller should retry later),
    /// `Err(DriverFailure)` on hard rejection.
    fn send_packet(&mut self, buf: &PacketBuffer) -> Result<bool>;

    /// Non-blocking poll for one received buffer, if any is ready.
    fn handle_receive_packet(&mut self) -> Option<PacketBuffer>;

    /// Acknowledge that a previously submitted TX buffer has completed.
    fn handle_sent_packet(&mut self);

    fn get_mac(&self) -> MacAddr;
    fn get_mtu(&self) -> u16;
    /// Bytes this driver prepends before the Ethernet header (0 for
    /// loopback and most virtio-net configurations without a virtio header
    /// passed through to the stack).
    fn get_header_size(&self) -> u16;
    fn get_speed_mbps(&self) -> u32;
    fn get_duplex(&self) -> Duplex;

    /// Install a new multicast filter. Default: accept unconditionally
    /// (matches the original base-class no-op default).
    fn sync_multicast(&mut self, _macs: &[MacAddr]) -> bool {
        true
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum L2Kind {
    Eth,
    Wifi,
    Loopback,
    Other,
}

/// One enumerated NIC: its driver and the bus-assigned name
/// (`eth<N>`/`wif<N>`/`net<N>`/`lo0`).
pub struct NicSlot {
    pub name: String,
    pub kind: L2Kind,
    pub driver: Box<dyn NetDriver>,
}

/// A factory the bus tries against each enumerated bus address; returns
/// `Some(driver)` on a vendor/device match, `None` to let the bus try the
/// next factory. Standing in for the original's PCI vendor/device switch.
pub type DriverFactory = Box<dyn Fn(u64, u32) -> Option<(Box<dyn NetDriver>, L2Kind)>>;

/// Enumerates NICs by probing each bus address against the registered
/// factories, naming the result, and always appending a loopback at the
/// end. A factory/driver that fails `init_at` must not abort the rest of
/// enumeration (`spec.md` §4.2).
pub struct NicBus {
    factories: Vec<DriverFactory>,
}

impl NicBus {
    pub fn new() -> Self {
        NicBus { factories: Vec::new() }
    }

    pub fn register(&mut self, factory: DriverFactory) {
        self.factories.push(factory);
    }

    /// Probe `addrs` (bus address, irq base) against the registered
    /// factories in order, then append the loopback driver supplied by the
    /// caller (kept generic here since the concrete `LoopbackDriver` type
    /// lives in `net-virtio`).
    pub fn enumerate(
        &self,
        addrs: &[(u64, u32)],
        loopback: Box<dyn NetDriver>,
    ) -> Vec<NicSlot> {
        let mut slots = Vec::new();
        let mut eth_n = 0u32;
        let mut wif_n = 0u32;
        let mut net_n = 0u32;

        for &(addr, irq) in addrs {
            let mut matched = None;
            for factory in &self.factories {
                if let Some((mut driver, kind)) = factory(addr, irq) {
                    if driver.init_at(addr, irq) {
                        matched = Some((driver, kind));
                    }
                    // A factory match that fails init_at is logged by the
                    // caller and enumeration continues past it.
                    break;
                }
            }
            if let Some((driver, kind)) = matched {
                let name = match kind {
                    L2Kind::Eth => {
                        let n = eth_n;
                        eth_n += 1;
                        alloc::format!("eth{n}")
                    }
                    L2Kind::Wifi => {
                        let n = wif_n;
                        wif_n += 1;
                        alloc::format!("wif{n}")
                    }
                    L2Kind::Loopback | L2Kind::Other => {
                        let n = net_n;
                        net_n += 1;
                        alloc::format!("net{n}")
                    }
                };
                slots.push(NicSlot { name, kind, driver });
            }
        }

        slots.push(NicSlot {
            name: String::from("lo0"),
            kind: L2Kind::Loopback,
            driver: loopback,
        });
        slots
    }
}

impl Default for NicBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NetStackError;

    struct StubDriver {
        mac: MacAddr,
        ok: bool,
    }

    impl NetDriver for StubDriver {
        fn init_at(&mut self, _addr: u64, _irq_base: u32) -> bool {
            self.ok
        }
        fn allocate_packet(&self, size: usize) -> Result<PacketBuffer> {
            PacketBuffer::alloc(size + 64, 64, 0).map_err(|_| NetStackError::OutOfMemory)
        }
        fn send_packet(&mut self, _buf: &PacketBuffer) -> Result<bool> {
            Ok(true)
        }
        fn handle_receive_packet(&mut self) -> Option<PacketBuffer> {
            None
        }
        fn handle_sent_packet(&mut self) {}
        fn get_mac(&self) -> MacAddr {
            self.mac
        }
        fn get_mtu(&self) -> u16 {
            1500
        }
        fn get_header_size(&self) -> u16 {
            0
        }
        fn get_speed_mbps(&self) -> u32 {
            1000
        }
        fn get_duplex(&self) -> Duplex {
            Duplex::Full
        }
    }

    fn loopback_stub() -> Box<dyn NetDriver> {
        Box::new(StubDriver {
            mac: MacAddr::ZERO,
            ok: true,
        })
    }

    #[test]
    fn enumeration_continues_past_one_failed_nic() {
        let mut bus = NicBus::new();
        bus.register(Box::new(|addr, _irq| {
            Some((
                Box::new(StubDriver {
                    mac: MacAddr([0, 0, 0, 0, 0, addr as u8]),
                    ok: addr != 1,
                }) as Box<dyn NetDriver>,
                L2Kind::Eth,
            ))
        }));

        let slots = bus.enumerate(&[(0, 32), (1, 33), (2, 34)], loopback_stub());
        // addr 1 fails init_at and is skipped; two eth NICs plus lo0 remain.
        assert_eq!(slots.len(), 3);
        assert_eq!(slots[0].name, "eth0");
        assert_eq!(slots[1].name, "eth1");
        assert_eq!(slots[2].name, "lo0");
        assert_eq!(slots[2].kind, L2Kind::Loopback);
    }

    #[test]
    fn loopback_always_present_even_with_no_nics() {
        let bus = NicBus::new();
        let slots = bus.enumerate(&[], loopback_stub());
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].name, "lo0");
    }
}
