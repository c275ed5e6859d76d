//! # Demand-Paged User Virtual Memory
//!
//! Lazy population, eviction and file mapping for user address spaces. A user
//! page costs nothing until it is touched: reserving it only records *what*
//! it should contain, and the page-fault path turns that record into a
//! resident frame.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────── per process ─────────────────────────┐
//! │ AddressSpace                                                 │
//! │   • SupplementalPageTable  (va → Page)                       │
//! │   • fault resolver, mmap regions, user copies                │
//! │   • page table handle  ◄───────────────────────┐             │
//! └──────────────┬─────────────────────────────────│─────────────┘
//!                │ acquire / release / pin         │ clear victim
//! ┌──────────────▼─────────────── kernel-wide ─────┴─────────────┐
//! │ Vm                                                           │
//! │   • FrameTable  (clock eviction over resident frames)        │
//! │   • FrameAlloc pool, SwapDevice, PhysMapper                  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Page lifecycle
//!
//! | Event | Effect |
//! |-------|--------|
//! | [`AddressSpace::reserve`], [`AddressSpace::map`], [`AddressSpace::load_segment`] | `Uninit` page with an initializer |
//! | first fault ([`AddressSpace::handle_fault`]) | frame acquired, contents loaded, page becomes anonymous or file-backed |
//! | frame pressure | victim written to swap or back to its file, translation cleared |
//! | next fault | contents read back into a fresh frame |
//! | [`AddressSpace::unmap`], [`AddressSpace::destroy`] | dirty file pages written back, frames and swap slots freed |
//!
//! ## Collaborators
//!
//! The crate does not touch hardware. Frames come from a [`FrameAlloc`],
//! frame contents are reached through a [`PhysMapper`], translations go
//! through a [`PageTable`], and backing data lives behind [`VmFile`] and
//! [`SwapDevice`].
//!
//! ## Errors
//!
//! Request validation fails with [`VmError`] and leaves no trace. Faults fail
//! with [`FaultError`]; the caller terminates the process, except for
//! [`FaultError::OutOfMemory`], which [`FaultError::is_fatal`] flags as
//! unrecoverable.

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

pub mod address_space;
pub mod addresses;
pub mod error;
pub mod fault;
pub mod file;
pub mod frame_alloc;
pub mod frame_table;
pub mod layout;
pub mod mmap;
pub mod page;
pub mod page_table;
pub mod spt;
pub mod swap;
pub mod vm;

pub use address_space::AddressSpace;
pub use addresses::{PhysicalAddress, PhysicalPage, VirtualAddress, VirtualPage};
pub use error::{FaultError, IoError, VmError};
pub use fault::{PageFault, PageFaultErrorCode};
pub use file::VmFile;
pub use frame_alloc::{FrameAlloc, FrameBytes, PhysMapper, RegionFrameAlloc};
pub use mmap::{MappingId, MmapRegion};
pub use page::{FileRange, Initializer, Page, PageKind, PageType};
pub use page_table::{MapError, PageTable, SoftPageTable, Translation};
pub use spt::SupplementalPageTable;
pub use swap::{SwapDevice, SwapError, SwapSlot};
pub use vm::Vm;
