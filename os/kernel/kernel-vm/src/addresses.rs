//! # Virtual and Physical Page Addresses
//!
//! Thin `u64` newtypes that keep virtual and physical values apart at the type
//! level. Demand paging only ever works at 4 KiB granularity, so the page
//! types here are fixed to [`PAGE_SIZE`] instead of being generic over a page
//! size marker.
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`VirtualAddress`] | Any byte address in a process address space. |
//! | [`VirtualPage`] | A page-aligned virtual base; the key of the supplemental page table. |
//! | [`PhysicalAddress`] | Any byte address in physical memory. |
//! | [`PhysicalPage`] | A page-aligned physical frame base. |
//!
//! ```rust
//! # use kernel_vm::addresses::*;
//! let va = VirtualAddress::new(0x4000_1234);
//! let page = va.page();
//! assert_eq!(page.base().as_u64(), 0x4000_1000);
//! assert_eq!(va.page_offset(), 0x234);
//! assert_eq!(page.next().base().as_u64(), 0x4000_2000);
//! ```

use crate::layout::{PAGE_MASK, PAGE_SIZE, USERSPACE_END};
use core::fmt;
use core::ops::{Add, Sub};

/// Virtual memory address.
///
/// Carries no alignment guarantee; use [`VirtualAddress::page`] to obtain the
/// containing page.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualAddress(u64);

impl VirtualAddress {
    #[inline]
    #[must_use]
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// The page that contains this address (low bits cleared).
    #[inline]
    #[must_use]
    pub const fn page(self) -> VirtualPage {
        VirtualPage(self.0 & !PAGE_MASK)
    }

    /// Byte offset of this address within its page.
    #[inline]
    #[must_use]
    pub const fn page_offset(self) -> usize {
        (self.0 & PAGE_MASK) as usize
    }

    #[inline]
    #[must_use]
    pub const fn is_page_aligned(self) -> bool {
        self.0 & PAGE_MASK == 0
    }

    /// Lower-half address that user mode may reference.
    #[inline]
    #[must_use]
    pub const fn is_user(self) -> bool {
        self.0 < USERSPACE_END
    }

    /// Anything at or above [`USERSPACE_END`].
    #[inline]
    #[must_use]
    pub const fn is_kernel(self) -> bool {
        !self.is_user()
    }

    #[inline]
    #[must_use]
    pub const fn checked_add(self, rhs: u64) -> Option<Self> {
        match self.0.checked_add(rhs) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn saturating_sub(self, rhs: u64) -> Self {
        Self(self.0.saturating_sub(rhs))
    }
}

impl fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl fmt::Debug for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtualAddress({:#018X})", self.0)
    }
}

impl Add<u64> for VirtualAddress {
    type Output = Self;

    #[inline]
    fn add(self, rhs: u64) -> Self {
        Self(self.0 + rhs)
    }
}

impl Sub<u64> for VirtualAddress {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: u64) -> Self {
        Self(self.0 - rhs)
    }
}

impl From<u64> for VirtualAddress {
    #[inline]
    fn from(v: u64) -> Self {
        Self::new(v)
    }
}

/// Page-aligned virtual base of one 4 KiB page.
///
/// ### Invariants
/// - The low 12 bits are always zero.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualPage(u64);

impl VirtualPage {
    /// Page that contains `addr` (aligns down).
    #[inline]
    #[must_use]
    pub const fn containing_address(addr: VirtualAddress) -> Self {
        addr.page()
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> VirtualAddress {
        VirtualAddress(self.0)
    }

    /// The page directly above this one.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + PAGE_SIZE as u64)
    }

    /// The `n`-th page above this one.
    #[inline]
    #[must_use]
    pub const fn offset_by(self, n: u64) -> Self {
        Self(self.0 + n * PAGE_SIZE as u64)
    }
}

impl fmt::Display for VirtualPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}/4K", self.0)
    }
}

impl fmt::Debug for VirtualPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtualPage({:#018X})", self.0)
    }
}

impl TryFrom<VirtualAddress> for VirtualPage {
    type Error = ();

    #[inline]
    fn try_from(va: VirtualAddress) -> Result<Self, ()> {
        if va.is_page_aligned() {
            Ok(va.page())
        } else {
            Err(())
        }
    }
}

/// Physical memory address.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalAddress(u64);

impl PhysicalAddress {
    #[inline]
    #[must_use]
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// The frame that contains this address.
    #[inline]
    #[must_use]
    pub const fn page(self) -> PhysicalPage {
        PhysicalPage(self.0 & !PAGE_MASK)
    }
}

impl fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl fmt::Debug for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysicalAddress({:#018X})", self.0)
    }
}

/// Page-aligned base of one physical 4 KiB frame.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalPage(u64);

impl PhysicalPage {
    #[inline]
    #[must_use]
    pub const fn from_addr(pa: PhysicalAddress) -> Self {
        pa.page()
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        PhysicalAddress(self.0)
    }
}

impl fmt::Display for PhysicalPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}/4K", self.0)
    }
}

impl fmt::Debug for PhysicalPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysicalPage({:#018X})", self.0)
    }
}

/// Round `len` up to a whole number of pages.
#[inline]
#[must_use]
pub const fn page_count(len: u64) -> u64 {
    len.div_ceil(PAGE_SIZE as u64)
}
