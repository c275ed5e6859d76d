//! # Pages
//!
//! A [`Page`] is the bookkeeping record for one page-aligned user address. Its
//! contents come from one of three variants:
//!
//! ```text
//!             first fault
//!   Uninit ───────────────┬──► Anonymous   (zero-fill or segment load; evicts to swap)
//!                         └──► FileBacked  (mmap; evicts by writeback to the file)
//! ```
//!
//! `Uninit` carries an [`Initializer`] and the variant it will become. The
//! transition happens exactly once, on the first successful population, and
//! never reverses.
//!
//! The mutable half of a page (variant payload plus the frame it occupies)
//! sits behind a shared lock so the frame table can evict it from another
//! process's fault path. The frame table holds the other end of that link.

use crate::addresses::{PhysicalPage, VirtualPage};
use crate::error::{IoError, VmError};
use crate::frame_alloc::{FrameBytes, PhysMapper, read_frame, write_frame, zero_tail};
use crate::frame_table::FrameHandle;
use crate::file::VmFile;
use crate::layout::PAGE_SIZE;
use crate::mmap::MappingId;
use crate::swap::{SwapDevice, SwapSlot};
use alloc::boxed::Box;
use alloc::sync::Arc;
use core::fmt;
use log::{error, trace};
use spin::Mutex;

/// The concrete variant a page has, or will have once populated.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PageType {
    Anonymous,
    FileBacked,
}

/// A page-sized window into a backing file: `read_bytes` from `offset`,
/// followed by `zero_bytes` of zero fill.
///
/// The two byte counts always add up to one page.
#[derive(Clone)]
pub struct FileRange {
    file: Arc<dyn VmFile>,
    offset: u64,
    read_bytes: usize,
    zero_bytes: usize,
}

impl FileRange {
    /// # Errors
    /// [`VmError::OversizedWindow`] if `read_bytes` exceeds one page.
    pub fn new(file: Arc<dyn VmFile>, offset: u64, read_bytes: usize) -> Result<Self, VmError> {
        let zero_bytes = PAGE_SIZE
            .checked_sub(read_bytes)
            .ok_or(VmError::OversizedWindow(read_bytes))?;
        Ok(Self {
            file,
            offset,
            read_bytes,
            zero_bytes,
        })
    }

    #[must_use]
    pub fn file(&self) -> &Arc<dyn VmFile> {
        &self.file
    }

    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    #[must_use]
    pub const fn read_bytes(&self) -> usize {
        self.read_bytes
    }

    #[must_use]
    pub const fn zero_bytes(&self) -> usize {
        self.zero_bytes
    }

    /// Read the window into `frame` and zero the rest. A short read fails.
    fn load(&self, mapper: &dyn PhysMapper, frame: PhysicalPage) -> Result<(), IoError> {
        let mut result = Ok(());
        mapper.with_frame(frame, &mut |bytes| {
            let actual = self.file.read_at(self.offset, &mut bytes[..self.read_bytes]);
            if actual != self.read_bytes {
                result = Err(IoError::ShortRead {
                    expected: self.read_bytes,
                    actual,
                });
            }
        });
        result?;
        zero_tail(mapper, frame, self.read_bytes);
        Ok(())
    }

    /// Write the first `read_bytes` of `frame` back to the file.
    fn store(&self, mapper: &dyn PhysMapper, frame: PhysicalPage) -> Result<(), IoError> {
        let mut actual = 0;
        mapper.with_frame(frame, &mut |bytes| {
            actual = self.file.write_at(self.offset, &bytes[..self.read_bytes]);
        });
        if actual == self.read_bytes {
            Ok(())
        } else {
            Err(IoError::ShortWrite {
                expected: self.read_bytes,
                actual,
            })
        }
    }
}

impl fmt::Debug for FileRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileRange")
            .field("offset", &self.offset)
            .field("read_bytes", &self.read_bytes)
            .field("zero_bytes", &self.zero_bytes)
            .finish_non_exhaustive()
    }
}

/// How an `Uninit` page gets its first contents.
#[derive(Debug, Clone)]
pub enum Initializer {
    /// Zero-filled.
    Zero,
    /// Read from a file window.
    Load(FileRange),
}

#[derive(Debug, Clone, Default)]
pub struct AnonPage {
    /// Where the contents went on the last eviction.
    swap: Option<SwapSlot>,
    /// All zero and never written; eviction can drop it without swapping.
    pristine: bool,
}

impl AnonPage {
    #[must_use]
    pub const fn swap_slot(&self) -> Option<SwapSlot> {
        self.swap
    }
}

#[derive(Debug, Clone)]
pub struct FilePage {
    range: FileRange,
}

impl FilePage {
    #[must_use]
    pub const fn range(&self) -> &FileRange {
        &self.range
    }
}

#[derive(Debug, Clone)]
pub enum PageKind {
    Uninit {
        init: Initializer,
        target: PageType,
    },
    Anonymous(AnonPage),
    FileBacked(FilePage),
}

/// Backing stores needed by the variant operations.
#[derive(Copy, Clone)]
pub(crate) struct Backing<'a> {
    pub mapper: &'a dyn PhysMapper,
    pub swap: &'a Mutex<Box<dyn SwapDevice>>,
}

/// Mutable, shared half of a [`Page`].
#[derive(Debug)]
pub struct PageState {
    pub(crate) kind: PageKind,
    pub(crate) frame: Option<FrameHandle>,
}

pub(crate) type SharedPageState = Arc<Mutex<PageState>>;

impl PageState {
    /// Fill `frame` with this page's contents (swap in).
    ///
    /// An `Uninit` page runs its initializer and becomes concrete on success.
    /// On failure the variant is left untouched.
    pub(crate) fn populate(
        &mut self,
        frame: PhysicalPage,
        backing: Backing<'_>,
    ) -> Result<(), IoError> {
        let mapper = backing.mapper;
        if let PageKind::Uninit { init, target } = &self.kind {
            match init {
                Initializer::Zero => zero_tail(mapper, frame, 0),
                Initializer::Load(range) => range.load(mapper, frame)?,
            }
            let next = match (target, init) {
                (PageType::FileBacked, Initializer::Load(range)) => {
                    PageKind::FileBacked(FilePage {
                        range: range.clone(),
                    })
                }
                (_, init) => PageKind::Anonymous(AnonPage {
                    swap: None,
                    pristine: matches!(init, Initializer::Zero),
                }),
            };
            self.kind = next;
            trace!("initialized {frame} as {:?}", self.page_type());
            return Ok(());
        }

        match &mut self.kind {
            PageKind::Anonymous(anon) => match anon.swap {
                Some(slot) => {
                    let mut buf: Box<FrameBytes> = Box::new([0; PAGE_SIZE]);
                    backing.swap.lock().swap_in(slot, &mut buf)?;
                    write_frame(mapper, frame, &buf);
                    anon.swap = None;
                    anon.pristine = false;
                    trace!("swapped {slot} into {frame}");
                }
                None => zero_tail(mapper, frame, 0),
            },
            PageKind::FileBacked(file) => file.range.load(mapper, frame)?,
            PageKind::Uninit { .. } => {}
        }
        Ok(())
    }

    /// Save the contents of `frame` before it is taken away (swap out).
    pub(crate) fn evict(
        &mut self,
        frame: PhysicalPage,
        dirty: bool,
        backing: Backing<'_>,
    ) -> Result<(), IoError> {
        match &mut self.kind {
            PageKind::Anonymous(anon) => {
                if anon.pristine && !dirty {
                    return Ok(());
                }
                let mut buf: Box<FrameBytes> = Box::new([0; PAGE_SIZE]);
                read_frame(backing.mapper, frame, &mut buf);
                anon.swap = Some(backing.swap.lock().swap_out(&buf)?);
                anon.pristine = false;
                Ok(())
            }
            PageKind::FileBacked(file) if dirty => file.range.store(backing.mapper, frame),
            PageKind::FileBacked(_) | PageKind::Uninit { .. } => Ok(()),
        }
    }

    /// Release variant resources. `resident` is the frame the page occupied,
    /// if any, together with its dirty bit.
    pub(crate) fn destroy(&mut self, resident: Option<(PhysicalPage, bool)>, backing: Backing<'_>) {
        match &mut self.kind {
            PageKind::FileBacked(file) => {
                if let Some((frame, true)) = resident {
                    if let Err(e) = file.range.store(backing.mapper, frame) {
                        error!("writeback at offset {} failed: {e}", file.range.offset);
                    }
                }
            }
            PageKind::Anonymous(anon) => {
                if let Some(slot) = anon.swap.take() {
                    backing.swap.lock().discard(slot);
                }
            }
            PageKind::Uninit { .. } => {}
        }
    }

    #[must_use]
    pub const fn page_type(&self) -> PageType {
        match &self.kind {
            PageKind::Uninit { target, .. } => *target,
            PageKind::Anonymous(_) => PageType::Anonymous,
            PageKind::FileBacked(_) => PageType::FileBacked,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> &PageKind {
        &self.kind
    }

    #[must_use]
    pub const fn frame(&self) -> Option<FrameHandle> {
        self.frame
    }
}

/// One reserved user page.
pub struct Page {
    va: VirtualPage,
    writable: bool,
    mapping: Option<MappingId>,
    pub(crate) state: SharedPageState,
}

impl Page {
    pub(crate) fn new(
        va: VirtualPage,
        writable: bool,
        mapping: Option<MappingId>,
        kind: PageKind,
    ) -> Self {
        Self {
            va,
            writable,
            mapping,
            state: Arc::new(Mutex::new(PageState { kind, frame: None })),
        }
    }

    pub(crate) fn uninit(
        va: VirtualPage,
        writable: bool,
        mapping: Option<MappingId>,
        init: Initializer,
        target: PageType,
    ) -> Self {
        Self::new(va, writable, mapping, PageKind::Uninit { init, target })
    }

    #[must_use]
    pub const fn va(&self) -> VirtualPage {
        self.va
    }

    #[must_use]
    pub const fn writable(&self) -> bool {
        self.writable
    }

    /// The mmap region this page belongs to, if any.
    #[must_use]
    pub const fn mapping(&self) -> Option<MappingId> {
        self.mapping
    }

    /// Eventual concrete type, also while still `Uninit`.
    #[must_use]
    pub fn page_type(&self) -> PageType {
        self.state.lock().page_type()
    }

    #[must_use]
    pub fn is_uninit(&self) -> bool {
        matches!(self.state.lock().kind, PageKind::Uninit { .. })
    }

    /// Frame currently holding this page.
    #[must_use]
    pub fn frame(&self) -> Option<PhysicalPage> {
        self.state.lock().frame.map(|h| h.frame())
    }

    /// Run `f` against the locked page state.
    pub fn inspect<R>(&self, f: impl FnOnce(&PageState) -> R) -> R {
        f(&self.state.lock())
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("va", &self.va)
            .field("writable", &self.writable)
            .field("mapping", &self.mapping)
            .finish_non_exhaustive()
    }
}
