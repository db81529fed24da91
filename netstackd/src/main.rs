#![cfg_attr(not(feature = "std"), no_std, no_main)]

//! CONTEXT: netstackd — networking owner service
//! OWNERS: see repository root
//! STATUS: bring-up
//!
//! Thin entry point: all daemon/scheduler logic lives in the library
//! (`netstackd::host` for the threaded std build, `netstackd::os_lite` for
//! the cooperative bare-metal build); this binary just starts it.

#[cfg(feature = "std")]
fn main() {
    use netstackd::scheduler::Scheduler as _;

    let stack_config = netstack::config::StackConfig::default();
    let host_name = netstack::mdns::host_name(0);
    let chaddr_seed: u64 = 0x4e45_5453_5441_434b; // "NETSTACK" ascii, arbitrary stable seed

    let shared = netstackd::service_main_loop(&[], stack_config, host_name, chaddr_seed);
    let sched = netstackd::HostScheduler::new();

    log::info!("netstackd: loopback-backed stack running");
    loop {
        sched.sleep_ms(60_000);
        let _ = &shared;
    }
}

#[cfg(not(feature = "std"))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {
        core::hint::spin_loop();
    }
}

#[cfg(not(feature = "std"))]
#[no_mangle]
pub extern "C" fn _start() -> ! {
    // Bare-metal boot glue (device probing, interrupt wiring) is owned by
    // whatever kernel links this in; it constructs a
    // `netstackd::NetstackService` directly via the library API and drives
    // `poll()` from its own scheduler loop rather than going through this
    // binary target at all. This stub only exists so the crate still
    // produces a valid `no_std`/`no_main` binary artifact in isolation.
    loop {
        core::hint::spin_loop();
    }
}
