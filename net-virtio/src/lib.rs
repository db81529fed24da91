// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]

//! CONTEXT: VirtIO net (virtio-mmio) driver and loopback driver, both
//! implementing `netstack::driver::NetDriver`.
//! OWNERS: @runtime
//! STATUS: In Progress
//! API_STABILITY: Unstable (bring-up)
//! TEST_COVERAGE: probe/queue-setup unit tests (host) + NetDriver impl tests
//!
//! PUBLIC API:
//! - `Bus`: register-level MMIO access trait (folded in from a shared HAL
//!   trait; small enough not to warrant its own crate here)
//! - `VirtioNetMmio`: virtio-mmio net device control plane (probe, feature
//!   negotiation, queue programming) plus its `NetDriver` impl
//! - `LoopbackDriver`: in-memory loopback `NetDriver`, always appended by
//!   `NicBus::enumerate`
//!
//! NOTE:
//! - This crate is intentionally minimal and polling-oriented for bring-up.
//! - Data-plane ring (descriptor/avail/used) walking for rx/tx is left to
//!   the concrete board's DMA setup; `NetDriver::send_packet`/
//!   `handle_receive_packet` here operate on an in-memory staging queue fed
//!   by that DMA layer, matching the original's userspace-first posture.

extern crate alloc;

use alloc::boxed::Box;
use alloc::collections::VecDeque;

use netstack::addr::MacAddr;
use netstack::buffer::PacketBuffer;
use netstack::driver::{Duplex, L2Kind, NetDriver};
use netstack::error::{NetStackError, Result};

/// Register-level bus access, addressed by byte offset. Folded in from the
/// original's shared HAL trait rather than pulled in as its own dependency.
pub trait Bus {
    fn read(&self, addr: usize) -> u32;
    fn write(&self, addr: usize, value: u32);
}

/// VirtIO MMIO magic ("virt" LE).
pub const VIRTIO_MMIO_MAGIC: u32 = 0x7472_6976;
/// VirtIO MMIO legacy version.
pub const VIRTIO_MMIO_VERSION_LEGACY: u32 = 1;
/// VirtIO MMIO modern version.
pub const VIRTIO_MMIO_VERSION_MODERN: u32 = 2;
/// VirtIO device id for network cards.
pub const VIRTIO_DEVICE_ID_NET: u32 = 1;

// VirtIO MMIO register offsets (bytes).
const REG_MAGIC: usize = 0x000;
const REG_VERSION: usize = 0x004;
const REG_DEVICE_ID: usize = 0x008;
const REG_VENDOR_ID: usize = 0x00c;
const REG_DEVICE_FEATURES: usize = 0x010;
const REG_DEVICE_FEATURES_SEL: usize = 0x014;
const REG_DRIVER_FEATURES: usize = 0x020;
const REG_DRIVER_FEATURES_SEL: usize = 0x024;
const REG_GUEST_PAGE_SIZE: usize = 0x028; // legacy only
const REG_QUEUE_SEL: usize = 0x030;
const REG_QUEUE_NUM_MAX: usize = 0x034;
const REG_QUEUE_NUM: usize = 0x038;
const REG_QUEUE_ALIGN: usize = 0x03c; // legacy only
const REG_QUEUE_PFN: usize = 0x040; // legacy only
const REG_QUEUE_READY: usize = 0x044;
const REG_QUEUE_NOTIFY: usize = 0x050;
const REG_STATUS: usize = 0x070;

const REG_QUEUE_DESC_LOW: usize = 0x080;
const REG_QUEUE_DRIVER_LOW: usize = 0x090;
const REG_QUEUE_DEVICE_LOW: usize = 0x0a0;

// Status bits (VirtIO 1.0).
const STATUS_ACKNOWLEDGE: u32 = 1;
const STATUS_DRIVER: u32 = 2;
const STATUS_DRIVER_OK: u32 = 4;
const STATUS_FEATURES_OK: u32 = 8;
const STATUS_FAILED: u32 = 128;

/// Errors for minimal virtio-mmio probe/init.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VirtioError {
    BadMagic,
    UnsupportedVersion,
    NotNetDevice,
    QueueUnavailable,
    QueueTooSmall,
    DeviceRejectedFeatures,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub version: u32,
    pub device_id: u32,
    pub vendor_id: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueSetup {
    pub size: u16,
    pub desc_paddr: u64,
    pub avail_paddr: u64,
    pub used_paddr: u64,
}

/// A virtio-mmio net device: control-plane register programming plus the
/// `NetDriver` glue the stack drives it through. The rx/tx staging queues
/// are filled/drained by the board's DMA layer via [`Self::stage_received`]
/// and [`Self::take_staged_sends`]; this crate doesn't own the ring memory.
pub struct VirtioNetMmio<B: Bus> {
    bus: B,
    mac: MacAddr,
    mtu: u16,
    rx_staged: VecDeque<PacketBuffer>,
    tx_staged: VecDeque<PacketBuffer>,
}

impl<B: Bus> VirtioNetMmio<B> {
    pub fn new(bus: B, mac: MacAddr, mtu: u16) -> Self {
        Self {
            bus,
            mac,
            mtu,
            rx_staged: VecDeque::new(),
            tx_staged: VecDeque::new(),
        }
    }

    pub fn probe(&self) -> core::result::Result<DeviceInfo, VirtioError> {
        let magic = self.bus.read(REG_MAGIC);
        if magic != VIRTIO_MMIO_MAGIC {
            return Err(VirtioError::BadMagic);
        }
        let version = self.bus.read(REG_VERSION);
        if version != VIRTIO_MMIO_VERSION_LEGACY && version != VIRTIO_MMIO_VERSION_MODERN {
            return Err(VirtioError::UnsupportedVersion);
        }
        let device_id = self.bus.read(REG_DEVICE_ID);
        if device_id != VIRTIO_DEVICE_ID_NET {
            return Err(VirtioError::NotNetDevice);
        }
        let vendor_id = self.bus.read(REG_VENDOR_ID);
        Ok(DeviceInfo {
            version,
            device_id,
            vendor_id,
        })
    }

    /// Resets the device status to 0.
    pub fn reset(&self) {
        self.bus.write(REG_STATUS, 0);
    }

    /// Minimal feature negotiation: accept feature bits exactly as provided.
    ///
    /// Bring-up policy: caller typically passes 0 (disable all optional features).
    pub fn negotiate_features(&self, driver_features: u64) -> core::result::Result<(), VirtioError> {
        self.bus
            .write(REG_STATUS, STATUS_ACKNOWLEDGE | STATUS_DRIVER);

        self.bus.write(REG_DEVICE_FEATURES_SEL, 0);
        let dev_lo = self.bus.read(REG_DEVICE_FEATURES);
        self.bus.write(REG_DEVICE_FEATURES_SEL, 1);
        let dev_hi = self.bus.read(REG_DEVICE_FEATURES);
        let dev = (dev_lo as u64) | ((dev_hi as u64) << 32);

        let accept = driver_features & dev;
        let out_lo = (accept & 0xffff_ffff) as u32;
        let out_hi = (accept >> 32) as u32;
        self.bus.write(REG_DRIVER_FEATURES_SEL, 0);
        self.bus.write(REG_DRIVER_FEATURES, out_lo);
        self.bus.write(REG_DRIVER_FEATURES_SEL, 1);
        self.bus.write(REG_DRIVER_FEATURES, out_hi);

        let st = self.bus.read(REG_STATUS);
        self.bus.write(REG_STATUS, st | STATUS_FEATURES_OK);

        let st2 = self.bus.read(REG_STATUS);
        if st2 & STATUS_FEATURES_OK == 0 {
            self.bus.write(REG_STATUS, st2 | STATUS_FAILED);
            return Err(VirtioError::DeviceRejectedFeatures);
        }
        Ok(())
    }

    /// Programs a queue's descriptor/avail/used addresses (physical) and marks it READY.
    ///
    /// Caller must ensure memory is DMA-safe and correctly aligned.
    pub fn setup_queue(&self, index: u32, cfg: &QueueSetup) -> core::result::Result<(), VirtioError> {
        self.bus.write(REG_QUEUE_SEL, index);
        let max = self.bus.read(REG_QUEUE_NUM_MAX);
        if max == 0 {
            return Err(VirtioError::QueueUnavailable);
        }
        if (cfg.size as u32) > max {
            return Err(VirtioError::QueueTooSmall);
        }
        self.bus.write(REG_QUEUE_NUM, cfg.size as u32);

        let version = self.bus.read(REG_VERSION);
        if version == VIRTIO_MMIO_VERSION_MODERN {
            write_u64_mmio(&self.bus, REG_QUEUE_DESC_LOW, cfg.desc_paddr);
            write_u64_mmio(&self.bus, REG_QUEUE_DRIVER_LOW, cfg.avail_paddr);
            write_u64_mmio(&self.bus, REG_QUEUE_DEVICE_LOW, cfg.used_paddr);
            self.bus.write(REG_QUEUE_READY, 1);
            Ok(())
        } else if version == VIRTIO_MMIO_VERSION_LEGACY {
            self.bus.write(REG_GUEST_PAGE_SIZE, 4096);
            self.bus.write(REG_QUEUE_ALIGN, 4);
            let pfn = (cfg.desc_paddr >> 12) as u32;
            self.bus.write(REG_QUEUE_PFN, pfn);
            Ok(())
        } else {
            Err(VirtioError::UnsupportedVersion)
        }
    }

    pub fn set_driver_ok(&self) {
        let st = self.bus.read(REG_STATUS);
        self.bus.write(REG_STATUS, st | STATUS_DRIVER_OK);
    }

    pub fn notify_queue(&self, queue_index: u32) {
        self.bus.write(REG_QUEUE_NOTIFY, queue_index);
    }

    /// Hand a received buffer (already copied out of the rx ring by the
    /// board's DMA layer) to the driver for `handle_receive_packet` to
    /// return on its next poll.
    pub fn stage_received(&mut self, buf: PacketBuffer) {
        self.rx_staged.push_back(buf);
    }

    /// Drain buffers queued by `send_packet`, for the board's DMA layer to
    /// place into the tx ring and notify.
    pub fn take_staged_sends(&mut self) -> VecDeque<PacketBuffer> {
        core::mem::take(&mut self.tx_staged)
    }
}

fn write_u64_mmio<B: Bus>(bus: &B, low_reg: usize, value: u64) {
    let lo = (value & 0xffff_ffff) as u32;
    let hi = (value >> 32) as u32;
    bus.write(low_reg, lo);
    bus.write(low_reg + 4, hi);
}

impl<B: Bus> NetDriver for VirtioNetMmio<B> {
    fn init_at(&mut self, _addr: u64, _irq_base: u32) -> bool {
        let Ok(info) = self.probe() else { return false };
        if info.device_id != VIRTIO_DEVICE_ID_NET {
            return false;
        }
        self.reset();
        self.negotiate_features(0).is_ok()
    }

    fn allocate_packet(&self, size: usize) -> Result<PacketBuffer> {
        PacketBuffer::alloc(size + self.get_header_size() as usize, self.get_header_size() as usize, 0)
    }

    fn send_packet(&mut self, buf: &PacketBuffer) -> Result<bool> {
        if self.tx_staged.len() >= 256 {
            return Ok(false);
        }
        self.tx_staged.push_back(buf.r#ref());
        Ok(true)
    }

    fn handle_receive_packet(&mut self) -> Option<PacketBuffer> {
        self.rx_staged.pop_front()
    }

    fn handle_sent_packet(&mut self) {}

    fn get_mac(&self) -> MacAddr {
        self.mac
    }

    fn get_mtu(&self) -> u16 {
        self.mtu
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

/// In-memory loopback: every sent buffer is immediately available to the
/// next `handle_receive_packet` poll. `NicBus::enumerate` always appends
/// exactly one of these as `lo0`.
pub struct LoopbackDriver {
    mac: MacAddr,
    queue: VecDeque<PacketBuffer>,
}

impl LoopbackDriver {
    pub fn new() -> Self {
        LoopbackDriver {
            mac: MacAddr::ZERO,
            queue: VecDeque::new(),
        }
    }
}

impl Default for LoopbackDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl NetDriver for LoopbackDriver {
    fn init_at(&mut self, _addr: u64, _irq_base: u32) -> bool {
        true
    }

    fn allocate_packet(&self, size: usize) -> Result<PacketBuffer> {
        PacketBuffer::alloc(size, 0, 0)
    }

    fn send_packet(&mut self, buf: &PacketBuffer) -> Result<bool> {
        if self.queue.len() >= 64 {
            return Err(NetStackError::Busy);
        }
        self.queue.push_back(buf.r#ref());
        Ok(true)
    }

    fn handle_receive_packet(&mut self) -> Option<PacketBuffer> {
        self.queue.pop_front()
    }

    fn handle_sent_packet(&mut self) {}

    fn get_mac(&self) -> MacAddr {
        self.mac
    }

    fn get_mtu(&self) -> u16 {
        65535
    }

    fn get_header_size(&self) -> u16 {
        0
    }

    fn get_speed_mbps(&self) -> u32 {
        0
    }

    fn get_duplex(&self) -> Duplex {
        Duplex::Full
    }
}
