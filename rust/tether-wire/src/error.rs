//! Result codes for the serialization entry points.

use std::fmt;

/// Error codes aligned with gRPC numbering, trimmed to what this layer
/// can actually produce.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Malformed header, size mismatch, truncated buffer, or an object
    /// that cannot be resolved.
    InvalidArgument = 3,
    /// Handle transfer forbidden on this link; route through a broker
    /// relay instead. A protocol signal, not a hard failure.
    PermissionDenied = 6,
    /// Caller-supplied capacity insufficient; retry with the reported
    /// sizes.
    ResourceExhausted = 7,
    /// Object kind recognized by tag but no decoder exists in this build.
    Unimplemented = 11,
    /// Internal error.
    Internal = 12,
    /// Operation not available on this platform or in this configuration.
    Unavailable = 13,
}

impl ErrorCode {
    /// Convert from a u32 wire value.
    /// Returns None if the value doesn't match a known error code.
    pub fn from_u32(val: u32) -> Option<Self> {
        Some(match val {
            3 => ErrorCode::InvalidArgument,
            6 => ErrorCode::PermissionDenied,
            7 => ErrorCode::ResourceExhausted,
            11 => ErrorCode::Unimplemented,
            12 => ErrorCode::Internal,
            13 => ErrorCode::Unavailable,
            _ => return None,
        })
    }

    /// Convert to u32 for wire transmission.
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Get a human-readable description of this error code.
    pub fn description(self) -> &'static str {
        match self {
            ErrorCode::InvalidArgument => "invalid argument",
            ErrorCode::PermissionDenied => "permission denied",
            ErrorCode::ResourceExhausted => "resource exhausted",
            ErrorCode::Unimplemented => "not implemented",
            ErrorCode::Internal => "internal error",
            ErrorCode::Unavailable => "unavailable",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description(), self.as_u32())
    }
}
