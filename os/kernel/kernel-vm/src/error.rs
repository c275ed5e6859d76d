use crate::addresses::{VirtualAddress, VirtualPage};
use crate::page_table::MapError;
use crate::swap::SwapError;

/// Caller errors: the request is rejected and nothing changed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VmError {
    #[error("address {0} is not page-aligned")]
    Misaligned(VirtualAddress),
    #[error("zero-length mapping")]
    ZeroLength,
    #[error("range starting at {0} overlaps an existing page")]
    Overlap(VirtualAddress),
    #[error("page {0} is already reserved")]
    AlreadyReserved(VirtualPage),
    #[error("range starting at {0} leaves the user address space")]
    OutOfRange(VirtualAddress),
    #[error("{0} is not the base of a live mapping")]
    NotMappingBase(VirtualAddress),
    #[error("{0} is not a user address")]
    InvalidAddress(VirtualAddress),
    #[error("backing file could not be reopened")]
    Reopen,
    #[error("file-backed page at {0} needs a file initializer")]
    MissingFile(VirtualAddress),
    #[error("segment of {0} bytes is not a whole number of pages")]
    PartialPage(usize),
    #[error("file window of {0} bytes does not fit in one page")]
    OversizedWindow(usize),
    #[error("page fault could not be resolved: {0}")]
    Fault(#[from] FaultError),
}

/// Outcome of a fault that could not be resolved.
///
/// Everything except [`FaultError::OutOfMemory`] means "terminate the faulting
/// process"; that decision belongs to the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FaultError {
    #[error("fault at null or kernel address {0}")]
    InvalidAddress(VirtualAddress),
    #[error("no page reserved at {0}")]
    NotMapped(VirtualAddress),
    #[error("write to read-only page at {0}")]
    WriteProtected(VirtualAddress),
    #[error("protection violation at {0}")]
    ProtectionViolation(VirtualAddress),
    #[error("failed to populate page: {0}")]
    Io(#[from] IoError),
    #[error("failed to install mapping: {0}")]
    MapFailed(#[from] MapError),
    #[error("out of physical frames and nothing can be evicted")]
    OutOfMemory,
}

impl FaultError {
    /// Resource exhaustion; no recovery path exists.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::OutOfMemory)
    }
}

/// Backing-store I/O failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IoError {
    #[error("short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },
    #[error("short write: expected {expected} bytes, wrote {actual}")]
    ShortWrite { expected: usize, actual: usize },
    #[error("swap: {0}")]
    Swap(#[from] SwapError),
}
