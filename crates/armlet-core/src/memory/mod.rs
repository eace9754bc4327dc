//! Sparse guest address space built from page-aligned mapped regions.

/// Access-kind classification and byte-level read/write paths.
pub mod access;
/// Region descriptors, permissions, and the map/unmap/protect bookkeeping.
pub mod map;

use std::fmt;

use thiserror::Error;

pub use access::AccessKind;
pub use map::{Memory, MemoryRegion, Permissions, PAGE_SIZE};

/// Memory-space failures for host requests and engine accesses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum MemoryError {
    /// Requested mapping intersects a region that is already mapped.
    #[error("mapping {address:#010x}+{size:#x} overlaps region at {existing:#010x}")]
    Overlap {
        /// Requested base address.
        address: u32,
        /// Requested size in bytes.
        size: u32,
        /// Base address of the region it collides with.
        existing: u32,
    },
    /// Mapping request is empty, not page aligned, or wraps the address space.
    #[error("invalid mapping {address:#010x}+{size:#x}")]
    InvalidMapping {
        /// Requested base address.
        address: u32,
        /// Requested size in bytes.
        size: u32,
    },
    /// Unmap/protect request does not name exactly one mapped region.
    #[error("no region mapped exactly at {address:#010x}+{size:#x}")]
    NotMapped {
        /// Requested base address.
        address: u32,
        /// Requested size in bytes.
        size: u32,
    },
    /// At least one byte of the access falls outside every mapped region.
    #[error("unmapped {access} of {len} bytes at {address:#010x}")]
    Unmapped {
        /// First address of the access.
        address: u32,
        /// Access length in bytes.
        len: usize,
        /// Kind of access attempted.
        access: AccessKind,
    },
    /// Access touches a region whose permissions forbid it.
    #[error("{access} of {len} bytes at {address:#010x} denied by region permissions")]
    Protected {
        /// First address of the access.
        address: u32,
        /// Access length in bytes.
        len: usize,
        /// Kind of access attempted.
        access: AccessKind,
    },
}

/// Failure of a single access; the only errors engine-side accesses raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum AccessError {
    /// At least one byte falls outside every mapped region.
    #[error("unmapped {access} of {len} bytes at {address:#010x}")]
    Unmapped {
        /// First address of the access.
        address: u32,
        /// Access length in bytes.
        len: usize,
        /// Kind of access attempted.
        access: AccessKind,
    },
    /// A touched region's permissions forbid the access.
    #[error("{access} of {len} bytes at {address:#010x} denied by region permissions")]
    Protected {
        /// First address of the access.
        address: u32,
        /// Access length in bytes.
        len: usize,
        /// Kind of access attempted.
        access: AccessKind,
    },
}

impl AccessError {
    /// First address of the failed access.
    #[must_use]
    pub const fn address(&self) -> u32 {
        match self {
            Self::Unmapped { address, .. } | Self::Protected { address, .. } => *address,
        }
    }
}

impl From<AccessError> for MemoryError {
    fn from(error: AccessError) -> Self {
        match error {
            AccessError::Unmapped {
                address,
                len,
                access,
            } => Self::Unmapped {
                address,
                len,
                access,
            },
            AccessError::Protected {
                address,
                len,
                access,
            } => Self::Protected {
                address,
                len,
                access,
            },
        }
    }
}

impl MemoryError {
    /// Returns the guest address the error refers to.
    #[must_use]
    pub const fn address(&self) -> u32 {
        match self {
            Self::Overlap { address, .. }
            | Self::InvalidMapping { address, .. }
            | Self::NotMapped { address, .. }
            | Self::Unmapped { address, .. }
            | Self::Protected { address, .. } => *address,
        }
    }
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Fetch => "fetch",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::{AccessError, AccessKind, MemoryError};

    #[test]
    fn error_messages_name_the_access() {
        let error = MemoryError::Unmapped {
            address: 0x0002_0000,
            len: 4,
            access: AccessKind::Write,
        };
        assert_eq!(error.to_string(), "unmapped write of 4 bytes at 0x00020000");
        assert_eq!(error.address(), 0x0002_0000);
    }

    #[test]
    fn access_errors_keep_their_shape_as_memory_errors() {
        let denied = AccessError::Protected {
            address: 0x40,
            len: 2,
            access: AccessKind::Fetch,
        };
        assert_eq!(
            MemoryError::from(denied),
            MemoryError::Protected {
                address: 0x40,
                len: 2,
                access: AccessKind::Fetch,
            }
        );
        assert_eq!(denied.to_string(), MemoryError::from(denied).to_string());
    }
}
