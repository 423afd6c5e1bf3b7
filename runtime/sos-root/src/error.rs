//! Error taxonomy for the root-task core.
//!
//! One variant per failure mode named in the error handling design: allocators
//! never panic on a caller-observable failure, only on a violated internal
//! invariant (a bug, not a resource shortage).

use thiserror::Error;

/// The kernel's raw invocation error code, propagated verbatim when no more
/// specific variant applies.
pub type KernelErrorCode = i32;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CoreError {
    #[error("out of untyped memory (requested size_bits={requested_bits})")]
    OutOfMemory { requested_bits: u8 },

    #[error("capability space has no free slot")]
    OutOfSlots,

    #[error("size_bits {size_bits} outside the allocator's tracked range")]
    InvalidSize { size_bits: u8 },

    #[error("kernel refused the mapping: {0:?}")]
    MappingFailed(KernelErrorCode),

    #[error("frame already mapped at this address")]
    AlreadyMapped,

    #[error("two segments share a frame with conflicting permissions")]
    PermissionConflict,

    #[error("malformed ELF image")]
    BadELF,

    #[error("no CPIO entry for the requested app name")]
    AppNotFound,

    #[error("no free IRQ identifier bit available")]
    OutOfBits,

    #[error("IRQ {irq} is already registered")]
    IrqAlreadyRegistered { irq: u32 },

    #[error("kernel error: {0}")]
    Kernel(KernelErrorCode),
}

pub type Result<T> = core::result::Result<T, CoreError>;

impl From<KernelErrorCode> for CoreError {
    fn from(code: KernelErrorCode) -> Self {
        CoreError::Kernel(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_memory_carries_requested_size() {
        let err = CoreError::OutOfMemory { requested_bits: 12 };
        assert!(matches!(err, CoreError::OutOfMemory { requested_bits: 12 }));
    }

    #[test]
    fn kernel_code_converts_via_from() {
        let err: CoreError = 6.into();
        assert_eq!(err, CoreError::Kernel(6));
    }
}
