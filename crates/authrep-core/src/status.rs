//! Status vocabulary returned to the host adapter
//!
//! Codes follow the gRPC numbering so hosts can forward them unchanged.

use std::fmt;
use std::time::Duration;

/// Outcome code of an authorization check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Code {
    Ok = 0,
    Unknown = 2,
    InvalidArgument = 3,
    PermissionDenied = 7,
    Internal = 13,
    Unavailable = 14,
}

impl Code {
    /// Numeric gRPC code
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Code::Ok => "OK",
            Code::Unknown => "UNKNOWN",
            Code::InvalidArgument => "INVALID_ARGUMENT",
            Code::PermissionDenied => "PERMISSION_DENIED",
            Code::Internal => "INTERNAL",
            Code::Unavailable => "UNAVAILABLE",
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Code plus a human-readable message (empty on success)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub code: Code,
    pub message: String,
}

impl Status {
    pub fn ok() -> Self {
        Self {
            code: Code::Ok,
            message: String::new(),
        }
    }

    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == Code::Ok
    }
}

/// Result handed back to the host for a single authorization call
///
/// Usage is reported as part of the authorization itself, so hosts must never
/// cache a decision: every result carries a zero validity duration and a
/// negative use count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub status: Status,
    /// How long the host may reuse this decision
    pub valid_duration: Duration,
    /// How many times the host may reuse this decision (negative disables reuse)
    pub valid_use_count: i32,
}

impl CheckResult {
    /// Build a result with caching disabled
    pub fn new(status: Status) -> Self {
        Self {
            status,
            valid_duration: Duration::ZERO,
            valid_use_count: -1,
        }
    }

    pub fn ok() -> Self {
        Self::new(Status::ok())
    }

    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }

    pub fn code(&self) -> Code {
        self.status.code
    }
}
