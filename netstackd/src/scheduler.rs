//! Timekeeping/sleep abstraction the daemons poll through.
//!
//! Kept trait-only (no `std` bound) so [`crate::daemons`] stays buildable
//! under `os-lite`; the host binary supplies [`crate::host::HostScheduler`]
//! and a bare-metal entry supplies its own tick-counter-backed impl.

/// Wall-clock + sleep surface a daemon loop needs. `now_ms` must be
/// monotonic for a single process lifetime; it need not track real UTC.
pub trait Scheduler {
    fn now_ms(&self) -> u64;
    fn sleep_ms(&self, ms: u64);
}
