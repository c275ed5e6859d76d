//! # User Address-Space Layout

/// Size of one virtual page and one physical frame.
pub const PAGE_SIZE: usize = 4096;

/// Mask of the in-page offset bits.
pub const PAGE_MASK: u64 = PAGE_SIZE as u64 - 1;

/// End of the userspace VA range; everything at or above is kernel space.
pub const USERSPACE_END: u64 = 0x0000_8000_0000_0000;

/// Top of the user stack. The first stack page lives directly below it.
pub const USER_STACK_TOP: u64 = 0x0000_7fff_ffff_f000;

/// Maximum size the user stack may grow to.
pub const USER_STACK_LIMIT: u64 = 1024 * 1024;

/// How far below the recorded stack pointer an access may land and still
/// count as stack growth. One machine word: `push` writes below `rsp` before
/// the register is updated.
pub const STACK_SLACK: u64 = 8;

const _: () = {
    assert!(PAGE_SIZE.is_power_of_two());
    assert!(USER_STACK_TOP.is_multiple_of(PAGE_SIZE as u64));
    assert!(USER_STACK_LIMIT.is_multiple_of(PAGE_SIZE as u64));
    assert!(USER_STACK_TOP < USERSPACE_END);
    assert!(USER_STACK_LIMIT < USER_STACK_TOP);
};
