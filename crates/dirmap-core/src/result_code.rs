//! LDAP result codes.
//!
//! Directory servers report the outcome of every operation as a numeric code. This module keeps
//! the code as a transparent newtype so unknown codes survive untouched, and maps the codes
//! defined by RFC 4511 (plus the common extensions) to their canonical lowercase names.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric LDAP result code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultCode(u32);

impl ResultCode {
    /// The operation completed successfully.
    pub const SUCCESS: Self = Self(0);
    /// Generic server-side operations error.
    pub const OPERATIONS_ERROR: Self = Self(1);
    /// The request violated the protocol.
    pub const PROTOCOL_ERROR: Self = Self(2);
    /// The server-side time limit was reached.
    pub const TIME_LIMIT_EXCEEDED: Self = Self(3);
    /// The size limit was reached; partial results may accompany this code.
    pub const SIZE_LIMIT_EXCEEDED: Self = Self(4);
    /// A compare assertion did not match.
    pub const COMPARE_FALSE: Self = Self(5);
    /// A compare assertion matched.
    pub const COMPARE_TRUE: Self = Self(6);
    /// A critical control was not recognized by the server.
    pub const UNAVAILABLE_CRITICAL_EXTENSION: Self = Self(12);
    /// The attribute does not exist on the entry.
    pub const NO_SUCH_ATTRIBUTE: Self = Self(16);
    /// The target entry does not exist.
    pub const NO_SUCH_OBJECT: Self = Self(32);
    /// The supplied credentials were rejected.
    pub const INVALID_CREDENTIALS: Self = Self(49);
    /// The bound identity lacks the required rights.
    pub const INSUFFICIENT_ACCESS_RIGHTS: Self = Self(50);
    /// The server refused to perform the operation.
    pub const UNWILLING_TO_PERFORM: Self = Self(53);
    /// The operation is only allowed on leaf entries.
    pub const NOT_ALLOWED_ON_NON_LEAF: Self = Self(66);
    /// An entry with the requested DN already exists.
    pub const ENTRY_ALREADY_EXISTS: Self = Self(68);
    /// Catch-all error code.
    pub const OTHER: Self = Self(80);

    /// Wraps a raw numeric code.
    #[must_use]
    pub const fn new(code: u32) -> Self {
        Self(code)
    }

    /// Returns the raw numeric code.
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }

    /// Returns true for the `success` code.
    #[must_use]
    pub const fn is_success(self) -> bool {
        self.0 == 0
    }

    /// Returns the canonical human-readable name of the code.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self.0 {
            0 => "success",
            1 => "operations error",
            2 => "protocol error",
            3 => "time limit exceeded",
            4 => "size limit exceeded",
            5 => "compare false",
            6 => "compare true",
            7 => "auth method not supported",
            8 => "stronger auth required",
            10 => "referral",
            11 => "admin limit exceeded",
            12 => "unavailable critical extension",
            13 => "confidentiality required",
            14 => "sasl bind in progress",
            16 => "no such attribute",
            17 => "undefined attribute type",
            18 => "inappropriate matching",
            19 => "constraint violation",
            20 => "attribute or value exists",
            21 => "invalid attribute syntax",
            32 => "no such object",
            33 => "alias problem",
            34 => "invalid dn syntax",
            36 => "alias dereferencing problem",
            48 => "inappropriate authentication",
            49 => "invalid credentials",
            50 => "insufficient access rights",
            51 => "busy",
            52 => "unavailable",
            53 => "unwilling to perform",
            54 => "loop detect",
            64 => "naming violation",
            65 => "object class violation",
            66 => "not allowed on nonleaf",
            67 => "not allowed on rdn",
            68 => "entry already exists",
            69 => "object class mods prohibited",
            71 => "affects multiple dsas",
            80 => "other",
            118 => "canceled",
            119 => "no such operation",
            120 => "too late",
            121 => "cannot cancel",
            122 => "assertion failed",
            123 => "authorization denied",
            _ => "unknown",
        }
    }
}

impl From<u32> for ResultCode {
    fn from(code: u32) -> Self {
        Self(code)
    }
}

impl From<ResultCode> for u32 {
    fn from(code: ResultCode) -> Self {
        code.0
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.0, self.name())
    }
}
