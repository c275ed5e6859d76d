//! Anonymous-page backing store.

use crate::frame_alloc::FrameBytes;
use core::fmt;

/// Index of one page-sized slot on the swap device.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SwapSlot(pub u32);

impl fmt::Display for SwapSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "swap#{}", self.0)
    }
}

impl fmt::Debug for SwapSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Block device holding evicted anonymous pages. Slot allocation is up to
/// the implementation.
pub trait SwapDevice: Send {
    /// Store one page and return the slot it landed in.
    ///
    /// # Errors
    /// [`SwapError::Full`] when no slot is free.
    fn swap_out(&mut self, data: &FrameBytes) -> Result<SwapSlot, SwapError>;

    /// Load the page stored in `slot` into `out` and free the slot.
    ///
    /// # Errors
    /// [`SwapError::InvalidSlot`] if the slot holds no page.
    fn swap_in(&mut self, slot: SwapSlot, out: &mut FrameBytes) -> Result<(), SwapError>;

    /// Free `slot` without reading it.
    fn discard(&mut self, slot: SwapSlot);
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SwapError {
    #[error("swap device is full")]
    Full,
    #[error("{0} holds no page")]
    InvalidSlot(SwapSlot),
}
