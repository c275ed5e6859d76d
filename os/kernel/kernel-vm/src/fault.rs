//! # Page-Fault Resolution
//!
//! The trap handler decodes CR2 and the pushed error code into a
//! [`PageFault`] and hands it to [`AddressSpace::handle_fault`]. The resolver
//! either leaves a valid translation behind or reports why it could not; it
//! never decides the fate of the process.
//!
//! ```text
//!  null / kernel address ─────────────────────────────► InvalidAddress
//!  user access ─► remember rsp
//!  below stack top, within limit, ≥ rsp-8, unreserved ─► grow stack, claim
//!  not present ─► lookup ─┬─ none ─────────────────────► NotMapped
//!                         ├─ write to read-only ───────► WriteProtected
//!                         └─ claim ────────────────────► resolved
//!  present (protection) ──────────────────────────────► ProtectionViolation
//! ```

use crate::address_space::AddressSpace;
use crate::addresses::VirtualAddress;
use crate::error::FaultError;
use crate::layout::{STACK_SLACK, USER_STACK_LIMIT, USER_STACK_TOP};
use crate::page::{Initializer, Page, PageType};
use bitfield_struct::bitfield;
use log::{debug, warn};

/// Page-fault error code layout (x86-64).
///
/// Reference: Intel SDM Vol. 3A, §6.15.1 "Page-Fault Exception (#PF)".
#[bitfield(u64)]
pub struct PageFaultErrorCode {
    /// 0 = non-present page.
    /// 1 = protection violation (page present but access disallowed).
    pub present: bool,

    /// 0 = read or execute.
    /// 1 = write access.
    pub write: bool,

    /// 0 = supervisor (CPL 0–2).
    /// 1 = user mode (CPL 3).
    pub user: bool,

    /// 1 = caused by reserved bit set in a paging structure.
    pub reserved_bit: bool,

    /// 1 = instruction fetch (execute access).
    pub instruction_fetch: bool,

    #[bits(59)]
    __: u64,
}

impl PageFaultErrorCode {
    #[must_use]
    pub const fn explain(&self) -> &'static str {
        if !self.present() {
            "Non-present page (not populated yet or evicted)"
        } else if self.write() {
            "Write access to protected page"
        } else if self.instruction_fetch() {
            "Instruction fetch on protected page"
        } else {
            "Read access to protected page"
        }
    }
}

/// One fault, as seen by the resolver.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PageFault {
    /// Faulting address (CR2).
    pub addr: VirtualAddress,
    /// User `rsp` at the time of the fault.
    pub stack_pointer: VirtualAddress,
    pub write: bool,
    pub user: bool,
    /// No translation was installed, as opposed to a permission violation.
    pub not_present: bool,
}

impl PageFault {
    #[must_use]
    pub const fn from_error_code(
        addr: VirtualAddress,
        stack_pointer: VirtualAddress,
        code: PageFaultErrorCode,
    ) -> Self {
        Self {
            addr,
            stack_pointer,
            write: code.write(),
            user: code.user(),
            not_present: !code.present(),
        }
    }

    /// A user-mode access to a page without a translation.
    #[must_use]
    pub const fn user_missing(
        addr: VirtualAddress,
        stack_pointer: VirtualAddress,
        write: bool,
    ) -> Self {
        Self {
            addr,
            stack_pointer,
            write,
            user: true,
            not_present: true,
        }
    }

    /// A kernel access on behalf of the process (syscall copy).
    #[must_use]
    pub const fn kernel_missing(addr: VirtualAddress, write: bool) -> Self {
        Self {
            addr,
            stack_pointer: VirtualAddress::zero(),
            write,
            user: false,
            not_present: true,
        }
    }
}

impl AddressSpace {
    /// Resolve `fault`.
    ///
    /// On `Ok` the faulting page is resident and mapped. On `Err` the caller
    /// is expected to terminate the process, or halt if
    /// [`FaultError::is_fatal`].
    ///
    /// # Errors
    /// See [`FaultError`].
    pub fn handle_fault(&mut self, fault: PageFault) -> Result<(), FaultError> {
        let addr = fault.addr;
        if addr.is_null() || addr.is_kernel() {
            warn!("fault at invalid address {addr}");
            return Err(FaultError::InvalidAddress(addr));
        }

        if fault.user {
            self.stack_pointer = Some(fault.stack_pointer);
        }

        if self.is_stack_growth(addr) {
            return self.grow_stack(addr);
        }

        if !fault.not_present {
            warn!("protection fault at {addr} (write: {})", fault.write);
            return Err(FaultError::ProtectionViolation(addr));
        }

        let Some(page) = self.spt.find(addr) else {
            warn!("fault at unreserved address {addr}");
            return Err(FaultError::NotMapped(addr));
        };
        if fault.write && !page.writable() {
            warn!("write fault on read-only page {}", page.va());
            return Err(FaultError::WriteProtected(addr));
        }
        self.claim_page(page, false).map(|_| ())
    }

    fn is_stack_growth(&self, addr: VirtualAddress) -> bool {
        let Some(sp) = self.stack_pointer else {
            return false;
        };
        let raw = addr.as_u64();
        raw < USER_STACK_TOP
            && raw >= USER_STACK_TOP - USER_STACK_LIMIT
            && raw >= sp.as_u64().saturating_sub(STACK_SLACK)
            && self.spt.find(addr).is_none()
    }

    fn grow_stack(&mut self, addr: VirtualAddress) -> Result<(), FaultError> {
        let va = addr.page();
        debug!("growing stack to {va}");
        let page = Page::uninit(va, true, None, Initializer::Zero, PageType::Anonymous);
        if self.spt.insert(page).is_err() {
            return Err(FaultError::NotMapped(addr));
        }
        let claimed = match self.spt.find(addr) {
            Some(page) => self.claim_page(page, false).map(|_| ()),
            None => Err(FaultError::NotMapped(addr)),
        };
        if claimed.is_err() {
            self.discard(va);
        }
        claimed
    }
}
