//! Record version types
//!
//! Every stored record carries a version. Every read can return the version
//! alongside the value, and every conditional write names the version it
//! expects to replace.
//!
//! ## Version Variants
//!
//! Different table drivers use different versioning schemes:
//!
//! - **Counter**: Write counter shared by every record of a table or store
//!   (in-memory and store-backed tables). Each write takes the next value, so a
//!   record that is removed and created again never repeats an old version.
//!
//! - **Sequence**: Position in an append-only log (log-backed tables).
//!   The version of a record is the log position of the write that produced it.
//!
//! Callers never interpret a version. They receive one from a read and hand it
//! back on a write.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque per-record version
///
/// ## Invariants
///
/// - Versions are monotonically increasing within a record, across removal
/// - Two reads of an unchanged record return equal versions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Version {
    /// Log position of the write that produced the record
    Sequence(u64),

    /// Position in the table's write counter
    Counter(u64),
}

impl Version {
    /// First version a counter-versioned table hands out
    pub const fn initial_counter() -> Self {
        Version::Counter(1)
    }

    /// Create a Sequence version
    pub const fn seq(n: u64) -> Self {
        Version::Sequence(n)
    }

    /// Create a Counter version
    pub const fn counter(n: u64) -> Self {
        Version::Counter(n)
    }

    /// Get the numeric value
    ///
    /// Useful for storage and display, but NOT for cross-variant comparison.
    #[inline]
    pub const fn as_u64(&self) -> u64 {
        match self {
            Version::Sequence(v) => *v,
            Version::Counter(v) => *v,
        }
    }

    /// Increment the version, preserving the variant
    pub const fn increment(&self) -> Self {
        match self {
            Version::Sequence(v) => Version::Sequence(v.saturating_add(1)),
            Version::Counter(v) => Version::Counter(v.saturating_add(1)),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Version::Sequence(v) => write!(f, "seq:{}", v),
            Version::Counter(v) => write!(f, "cnt:{}", v),
        }
    }
}

/// A value with its version information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Versioned<T> {
    /// The actual value
    pub value: T,

    /// Version identifier
    pub version: Version,
}

impl<T> Versioned<T> {
    /// Wrap a value with its version
    pub fn new(value: T, version: Version) -> Self {
        Versioned { value, version }
    }

    /// Map the inner value to a new type
    pub fn map<U, F>(self, f: F) -> Versioned<U>
    where
        F: FnOnce(T) -> U,
    {
        Versioned {
            value: f(self.value),
            version: self.version,
        }
    }

    /// Map the inner value with a fallible conversion
    pub fn try_map<U, E, F>(self, f: F) -> Result<Versioned<U>, E>
    where
        F: FnOnce(T) -> Result<U, E>,
    {
        Ok(Versioned {
            value: f(self.value)?,
            version: self.version,
        })
    }

    /// Get a reference to the inner value
    #[inline]
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Consume and return the inner value
    #[inline]
    pub fn into_value(self) -> T {
        self.value
    }

    /// Get the version
    #[inline]
    pub fn version(&self) -> Version {
        self.version
    }
}

/// Group-wide optimistic concurrency token
///
/// The version of a group's sentinel record, or "absent" when the group has
/// not been created. Every structural change to a group moves its etag, so a
/// write conditioned on an etag fails if anything changed since it was read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Etag(Option<Version>);

impl Etag {
    /// The etag of a group whose sentinel record does not exist
    pub const fn absent() -> Self {
        Etag(None)
    }

    /// Wrap a sentinel record version
    pub const fn from_version(version: Option<Version>) -> Self {
        Etag(version)
    }

    /// The sentinel record version this etag stands for
    pub const fn version(&self) -> Option<Version> {
        self.0
    }

    /// Whether the sentinel record was absent when this etag was taken
    pub const fn is_absent(&self) -> bool {
        self.0.is_none()
    }
}

impl fmt::Display for Etag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(v) => write!(f, "{}", v),
            None => write!(f, "absent"),
        }
    }
}
