//! Allocator errors.

use std::fmt;

use tagheap_membrane::GrowError;
use thiserror::Error;

use crate::errno::{EINVAL, ENOMEM};

/// Why a pointer was rejected by deallocate or resize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerFault {
    Null,
    Misaligned,
    /// Header not strictly between the prologue and the epilogue.
    OutOfBounds,
    NotAllocated,
    /// Block is sitting in a quick cache; freeing it again is a double free.
    Cached,
    BadBlockSize,
    RequestedSizeMismatch,
    PrevFlagMismatch,
    /// No allocation has happened yet.
    Uninitialized,
}

impl PointerFault {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Null => "null pointer",
            Self::Misaligned => "payload not row-aligned",
            Self::OutOfBounds => "header outside the heap",
            Self::NotAllocated => "block not allocated",
            Self::Cached => "block already freed into a quick cache",
            Self::BadBlockSize => "invalid block size",
            Self::RequestedSizeMismatch => "requested size exceeds block",
            Self::PrevFlagMismatch => "previous-allocated flag disagrees with predecessor",
            Self::Uninitialized => "heap not initialized",
        }
    }
}

impl fmt::Display for PointerFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeapError {
    #[error("zero-size request")]
    ZeroSize,
    /// `source` is set when the page provider refused to grow.
    #[error("out of memory: cannot serve {requested} bytes")]
    OutOfMemory {
        requested: usize,
        #[source]
        source: Option<GrowError>,
    },
    #[error("invalid pointer {address:#x}: {reason}")]
    InvalidPointer { address: usize, reason: PointerFault },
    #[error("heap corrupted at {address:#x}: {reason}")]
    Corrupted { address: usize, reason: String },
}

impl HeapError {
    /// Error number reported by the plain operations, if any.
    #[must_use]
    pub fn errno(&self) -> Option<i32> {
        match self {
            Self::ZeroSize | Self::Corrupted { .. } => None,
            Self::OutOfMemory { .. } => Some(ENOMEM),
            Self::InvalidPointer { .. } => Some(EINVAL),
        }
    }

    pub(crate) const fn out_of_memory(requested: usize) -> Self {
        Self::OutOfMemory {
            requested,
            source: None,
        }
    }

    pub(crate) const fn from_grow(err: GrowError, requested: usize) -> Self {
        Self::OutOfMemory {
            requested,
            source: Some(err),
        }
    }

    pub(crate) fn corrupted(address: usize, reason: impl Into<String>) -> Self {
        Self::Corrupted {
            address,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping() {
        assert_eq!(HeapError::ZeroSize.errno(), None);
        assert_eq!(HeapError::out_of_memory(1).errno(), Some(ENOMEM));
        let invalid = HeapError::InvalidPointer {
            address: 0x1010,
            reason: PointerFault::Cached,
        };
        assert_eq!(invalid.errno(), Some(EINVAL));
        assert_eq!(HeapError::corrupted(0x1000, "x").errno(), None);
    }

    #[test]
    fn grow_failure_becomes_oom_and_keeps_the_reason() {
        use std::error::Error as _;

        let limit = GrowError::LimitReached { max_bytes: 16384 };
        let err = HeapError::from_grow(limit, 20000);
        assert_eq!(err.errno(), Some(ENOMEM));
        assert_eq!(err.to_string(), "out of memory: cannot serve 20000 bytes");
        assert_eq!(
            err.source().map(ToString::to_string),
            Some("heap limit of 16384 bytes reached".to_string())
        );

        let overflow = HeapError::from_grow(GrowError::AddressOverflow, 64);
        assert_ne!(overflow, HeapError::from_grow(limit, 64));
        assert!(HeapError::out_of_memory(64).source().is_none());
    }

    #[test]
    fn messages_name_the_address() {
        let err = HeapError::InvalidPointer {
            address: 0x1038,
            reason: PointerFault::NotAllocated,
        };
        assert_eq!(err.to_string(), "invalid pointer 0x1038: block not allocated");
    }
}
