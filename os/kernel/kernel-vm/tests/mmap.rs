mod common;

use common::{MemFile, PAGE, harness, pattern, peek};
use kernel_vm::layout::USERSPACE_END;
use kernel_vm::{
    FaultError, FileRange, Initializer, IoError, PageFault, PageKind, PageType, VirtualAddress, VmError,
};
use proptest::prelude::*;

const BASE: u64 = 0x1000_0000;

fn va(v: u64) -> VirtualAddress {
    VirtualAddress::new(v)
}

fn window(p: &kernel_vm::AddressSpace, v: VirtualAddress) -> (usize, usize) {
    p.spt().find(v).unwrap().inspect(|s| match s.kind() {
        PageKind::Uninit {
            init: Initializer::Load(range),
            ..
        } => (range.read_bytes(), range.zero_bytes()),
        PageKind::FileBacked(file) => (file.range().read_bytes(), file.range().zero_bytes()),
        other => panic!("unexpected page kind {other:?}"),
    })
}

#[test]
fn written_bytes_survive_unmap_and_remap() {
    let h = harness(8, 8);
    let file = MemFile::patterned(3 * PAGE);
    let mut p = h.process();
    let a = va(BASE);

    assert_eq!(p.map(a, 2 * PAGE, true, &file, 0), Ok(a));
    p.copy_to_user(a + 100, b"hello").unwrap();
    p.copy_to_user(a + PAGE as u64 + 7, b"world").unwrap();
    p.unmap(a).unwrap();
    assert!(p.spt().is_empty());
    assert_eq!(h.vm.resident_frames(), 0);

    let bytes = file.bytes();
    assert_eq!(&bytes[100..105], b"hello");
    assert_eq!(&bytes[PAGE + 7..PAGE + 12], b"world");
    assert_eq!(bytes[99], pattern(99));

    p.map(a, 2 * PAGE, false, &file, 0).unwrap();
    let mut buf = [0u8; 5];
    p.copy_from_user(a + 100, &mut buf).unwrap();
    assert_eq!(&buf, b"hello");
}

#[test]
fn final_page_is_padded_with_zeroes() {
    let h = harness(4, 4);
    let file = MemFile::patterned(8 * PAGE);
    let mut p = h.process();
    let a = va(BASE);

    p.map(a, PAGE + 10, false, &file, 0).unwrap();
    assert_eq!(p.spt().len(), 2);
    assert_eq!(window(&p, a), (PAGE, 0));
    assert_eq!(window(&p, a + PAGE as u64), (10, PAGE - 10));

    let second = (a + PAGE as u64).as_u64();
    assert_eq!(peek(&mut p, second + 9), pattern(PAGE + 9));
    assert_eq!(peek(&mut p, second + 10), 0);
    assert_eq!(peek(&mut p, second + PAGE as u64 - 1), 0);
}

#[test]
fn mapping_past_end_of_file_reads_zero_and_rejects_mid_unmap() {
    let h = harness(4, 4);
    let file = MemFile::patterned(PAGE + 5);
    let mut p = h.process();
    let a = va(BASE);
    let sp = va(0x7fff_0000_0000);

    p.map(a, 2 * PAGE, false, &file, 0).unwrap();
    p.handle_fault(PageFault::user_missing(a, sp, false))
        .unwrap();
    p.handle_fault(PageFault::user_missing(a + PAGE as u64, sp, false))
        .unwrap();
    assert_eq!(peek(&mut p, BASE + PAGE as u64 + 4), pattern(PAGE + 4));
    assert_eq!(peek(&mut p, BASE + PAGE as u64 + 5), 0);

    let mid = a + PAGE as u64;
    assert_eq!(p.unmap(mid), Err(VmError::NotMappingBase(mid)));
    assert_eq!(p.unmap(a + 1), Err(VmError::NotMappingBase(a + 1)));
    assert_eq!(p.spt().len(), 2);
    assert_eq!(p.mappings().count(), 1);

    p.unmap(a).unwrap();
    assert!(p.spt().is_empty());
    assert_eq!(p.mappings().count(), 0);
    assert_eq!(p.unmap(a), Err(VmError::NotMappingBase(a)));
}

#[test]
fn writeback_never_extends_the_file() {
    let h = harness(4, 4);
    let file = MemFile::patterned(PAGE + 5);
    let mut p = h.process();
    let a = va(BASE);

    p.map(a, 2 * PAGE, true, &file, 0).unwrap();
    p.copy_to_user(a + PAGE as u64, &[0xAA; 64]).unwrap();
    p.unmap(a).unwrap();

    let bytes = file.bytes();
    assert_eq!(bytes.len(), PAGE + 5);
    assert!(bytes[PAGE..].iter().all(|&b| b == 0xAA));
}

#[test]
fn clean_pages_are_not_written_back() {
    let h = harness(4, 4);
    let file = MemFile::patterned(PAGE);
    let mut p = h.process();
    let a = va(BASE);

    p.map(a, PAGE, true, &file, 0).unwrap();
    assert_eq!(peek(&mut p, BASE), pattern(0));
    assert!(!p.is_dirty(a));

    // Someone else updates the file behind the mapping.
    kernel_vm::VmFile::write_at(&file, 0, b"XY");
    p.unmap(a).unwrap();
    assert_eq!(&file.bytes()[..2], b"XY");
}

#[test]
fn mapping_honours_file_offset() {
    let h = harness(4, 4);
    let file = MemFile::patterned(4 * PAGE);
    let mut p = h.process();
    let a = va(BASE);

    p.map(a, 2 * PAGE, true, &file, 3 * PAGE as u64).unwrap();
    assert_eq!(window(&p, a), (PAGE, 0));
    assert_eq!(window(&p, a + PAGE as u64), (0, PAGE));
    assert_eq!(peek(&mut p, BASE + 1), pattern(3 * PAGE + 1));

    p.copy_to_user(a, b"Z").unwrap();
    p.unmap(a).unwrap();
    assert_eq!(file.bytes()[3 * PAGE], b'Z');
}

#[test]
fn invalid_requests_change_nothing() {
    let h = harness(4, 4);
    let file = MemFile::patterned(PAGE);
    let mut p = h.process();

    assert_eq!(
        p.map(va(0), PAGE, true, &file, 0),
        Err(VmError::InvalidAddress(va(0)))
    );
    assert_eq!(
        p.map(va(BASE + 1), PAGE, true, &file, 0),
        Err(VmError::Misaligned(va(BASE + 1)))
    );
    assert_eq!(
        p.map(va(BASE), 0, true, &file, 0),
        Err(VmError::ZeroLength)
    );
    let top = va(USERSPACE_END - PAGE as u64);
    assert_eq!(
        p.map(top, 2 * PAGE, true, &file, 0),
        Err(VmError::OutOfRange(top))
    );
    assert_eq!(
        p.map(va(BASE), usize::MAX, true, &file, 0),
        Err(VmError::OutOfRange(va(BASE)))
    );
    assert_eq!(
        p.map(va(BASE), usize::MAX - PAGE, true, &file, 0),
        Err(VmError::OutOfRange(va(BASE)))
    );
    assert_eq!(
        p.map(va(BASE), PAGE, true, &MemFile::unreopenable(), 0),
        Err(VmError::Reopen)
    );
    assert!(p.spt().is_empty());
    assert_eq!(p.mappings().count(), 0);

    // The last user page is fine.
    assert_eq!(p.map(top, PAGE, true, &file, 0), Ok(top));
}

#[test]
fn overlapping_mappings_are_rejected() {
    let h = harness(4, 4);
    let file = MemFile::patterned(4 * PAGE);
    let mut p = h.process();
    let a = va(BASE);

    p.map(a, 2 * PAGE, true, &file, 0).unwrap();
    let b = va(BASE - PAGE as u64);
    assert_eq!(
        p.map(b, 2 * PAGE, true, &file, 0),
        Err(VmError::Overlap(b))
    );
    p.reserve(PageType::Anonymous, va(BASE + 3 * PAGE as u64), true, Initializer::Zero)
        .unwrap();
    let c = va(BASE + 2 * PAGE as u64);
    assert_eq!(
        p.map(c, 2 * PAGE, true, &file, 0),
        Err(VmError::Overlap(c))
    );
    assert_eq!(p.spt().len(), 3);
    assert_eq!(p.map(b, PAGE, true, &file, 0), Ok(b));
}

#[test]
fn short_read_fails_the_fault_and_releases_the_frame() {
    let h = harness(4, 4);
    let file = MemFile::patterned(2 * PAGE);
    let mut p = h.process();
    let a = va(BASE);
    let sp = va(0x7fff_0000_0000);

    p.map(a, 2 * PAGE, false, &file, 0).unwrap();
    file.truncate(PAGE + 5);

    let second = a + PAGE as u64;
    assert_eq!(
        p.handle_fault(PageFault::user_missing(second, sp, false)),
        Err(FaultError::Io(IoError::ShortRead {
            expected: PAGE,
            actual: 5
        }))
    );
    assert!(p.translate(second).is_none());
    assert!(p.spt().find(second).unwrap().is_uninit());
    assert_eq!(h.vm.resident_frames(), 0);

    // The first page is still intact.
    assert_eq!(peek(&mut p, BASE + 1), pattern(1));
}

#[test]
fn pages_share_one_reopened_handle() {
    let h = harness(4, 4);
    let file = MemFile::patterned(2 * PAGE);
    let mut p = h.process();
    p.map(va(BASE), 2 * PAGE, false, &file, 0).unwrap();

    let region = p.mappings().next().unwrap();
    assert_eq!(region.pages(), 2);
    assert_eq!(region.base(), va(BASE).page());
    assert_eq!(region.file().len(), 2 * PAGE as u64);
    for page in p.spt().iter() {
        assert_eq!(page.mapping(), Some(region.id()));
        assert_eq!(page.page_type(), PageType::FileBacked);
    }
    assert_eq!(file.reads(), 0);
}

#[test]
fn exit_writes_back_dirty_mapped_pages() {
    let h = harness(4, 4);
    let file = MemFile::patterned(PAGE);
    {
        let mut p = h.process();
        p.map(va(BASE), PAGE, true, &file, 0).unwrap();
        p.copy_to_user(va(BASE + 10), b"bye").unwrap();
    }
    assert_eq!(&file.bytes()[10..13], b"bye");
    assert_eq!(h.vm.resident_frames(), 0);
}

#[test]
fn executable_segments_load_lazily_as_anonymous_pages() {
    let h = harness(4, 4);
    let file = MemFile::patterned(2 * PAGE);
    let mut p = h.process();
    let text = va(0x40_0000);

    assert_eq!(
        p.load_segment(&file.handle(), 0, text, PAGE, 10, false),
        Err(VmError::PartialPage(PAGE + 10))
    );
    p.load_segment(&file.handle(), 0, text, PAGE + 100, PAGE - 100, true)
        .unwrap();
    assert_eq!(p.spt().len(), 2);
    assert_eq!(window(&p, text + PAGE as u64), (100, PAGE - 100));
    assert_eq!(file.reads(), 0);

    assert_eq!(peek(&mut p, 0x40_0000 + PAGE as u64 + 99), pattern(PAGE + 99));
    assert_eq!(peek(&mut p, 0x40_0000 + PAGE as u64 + 100), 0);
    let page = p.spt().find(text + PAGE as u64).unwrap();
    assert_eq!(page.page_type(), PageType::Anonymous);

    // Segment pages never write back to the executable.
    p.copy_to_user(text, b"patched").unwrap();
    drop(p);
    assert_eq!(file.bytes()[0], pattern(0));
}

#[test]
fn oversized_segments_are_rejected() {
    let h = harness(4, 4);
    let file = MemFile::patterned(PAGE);
    let mut p = h.process();
    let text = va(0x40_0000);

    assert_eq!(
        p.load_segment(&file.handle(), 0, text, usize::MAX, 1, false),
        Err(VmError::OutOfRange(text))
    );
    assert_eq!(
        p.load_segment(&file.handle(), 0, text, usize::MAX - PAGE + 1, 0, false),
        Err(VmError::OutOfRange(text))
    );
    assert!(p.spt().is_empty());
    assert_eq!(file.reads(), 0);
}

#[test]
fn file_windows_never_exceed_one_page() {
    let h = harness(4, 4);
    let file = MemFile::patterned(2 * PAGE);
    let mut p = h.process();

    assert_eq!(
        FileRange::new(file.handle(), 0, PAGE + 1).err(),
        Some(VmError::OversizedWindow(PAGE + 1))
    );
    let full = FileRange::new(file.handle(), PAGE as u64, PAGE).unwrap();
    assert_eq!((full.read_bytes(), full.zero_bytes()), (PAGE, 0));

    p.reserve(PageType::FileBacked, va(BASE), true, Initializer::Load(full))
        .unwrap();
    assert_eq!(peek(&mut p, BASE + PAGE as u64 - 1), pattern(2 * PAGE - 1));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn every_page_reads_at_most_a_page_and_zero_fills_the_rest(
        length in 1usize..6 * PAGE,
        file_len in 0usize..5 * PAGE,
    ) {
        let h = harness(1, 1);
        let file = MemFile::patterned(file_len);
        let mut p = h.process();
        p.map(va(BASE), length, false, &file, 0).unwrap();

        let pages = length.div_ceil(PAGE);
        prop_assert_eq!(p.spt().len(), pages);
        let mut total = 0;
        for i in 0..pages {
            let (read, zero) = window(&p, va(BASE + (i * PAGE) as u64));
            prop_assert!(read <= PAGE);
            prop_assert_eq!(read + zero, PAGE);
            total += read;
        }
        prop_assert_eq!(total, length.min(file_len));
    }
}
