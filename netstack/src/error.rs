//! Cross-module error taxonomy.
//!
//! Mirrors the error kinds in the design: allocator refusal, malformed
//! input, missing lookups, timeouts, busy resources, wire-format failures,
//! protocol-level surprises, and driver rejection. `WireFormat` errors are
//! absorbed at the dispatch boundary and never propagate out of input
//! paths; state machines treat `Protocol` as an event, not an exception.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetStackError {
    OutOfMemory,
    InvalidArgument,
    NotFound,
    Timeout,
    Busy,
    WireFormat,
    Protocol,
    DriverFailure,
}

impl fmt::Display for NetStackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NetStackError::OutOfMemory => "out of memory",
            NetStackError::InvalidArgument => "invalid argument",
            NetStackError::NotFound => "not found",
            NetStackError::Timeout => "timed out",
            NetStackError::Busy => "busy",
            NetStackError::WireFormat => "malformed wire data",
            NetStackError::Protocol => "unexpected protocol event",
            NetStackError::DriverFailure => "driver rejected operation",
        };
        f.write_str(s)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for NetStackError {}

pub type Result<T> = core::result::Result<T, NetStackError>;
