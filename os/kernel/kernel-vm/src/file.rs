//! Backing files for file-backed and segment-loaded pages.

use alloc::sync::Arc;

/// An open file as seen by the pager.
///
/// Positional I/O only; pages of one mapping share a single handle and may
/// be populated concurrently. Dropping the last `Arc` closes the handle.
pub trait VmFile: Send + Sync {
    /// Open an independent handle to the same file.
    fn reopen(&self) -> Option<Arc<dyn VmFile>>;

    /// Current length in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read up to `buf.len()` bytes at `offset`; returns the bytes read.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> usize;

    /// Write `data` at `offset`; returns the bytes written.
    fn write_at(&self, offset: u64, data: &[u8]) -> usize;
}
