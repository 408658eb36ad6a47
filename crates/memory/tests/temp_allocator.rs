//! Temp allocator chunk management

mod common;

use common::CountingVm;
use pretty_assertions::assert_eq;
use strata_memory::arena::TempAllocator;
use strata_memory::core::TempConfig;

fn temp(vm: &CountingVm) -> TempAllocator<&CountingVm> {
    TempAllocator::with_config(TempConfig::default(), vm).unwrap()
}

#[test]
fn newest_allocation_grows_in_place() {
    let vm = CountingVm::new();
    let mut temp = temp(&vm);

    let p = temp.alloc(16);
    assert_eq!(temp.realloc(p, 16, 4000), p);
    assert_eq!(temp.stats().used_bytes, 4000);
}

#[test]
fn zero_byte_allocations_are_distinct() {
    let vm = CountingVm::new();
    let mut temp = temp(&vm);

    let zero = temp.alloc(0);
    let next = temp.alloc(8);
    assert_ne!(zero, next);
    // SAFETY: next is an 8-byte allocation
    unsafe { next.as_ptr().write_bytes(0xAB, 8) };

    // Not the newest allocation, so growing it must move.
    let grown = temp.realloc(zero, 0, 64);
    assert_ne!(grown, zero);
    // SAFETY: next is still live
    let neighbour = unsafe { std::slice::from_raw_parts(next.as_ptr(), 8) };
    assert_eq!(neighbour, [0xAB; 8]);
}

#[test]
fn shrinking_newest_to_zero_keeps_it_distinct() {
    let vm = CountingVm::new();
    let mut temp = temp(&vm);

    let p = temp.alloc(64);
    assert_eq!(temp.realloc(p, 64, 0), p);
    assert_ne!(temp.alloc(8), p);
}

#[test]
fn realloc_copies_when_moving() {
    let vm = CountingVm::new();
    let mut temp = temp(&vm);

    let a = temp.alloc(32);
    // SAFETY: a is a 32-byte allocation
    unsafe { a.as_ptr().copy_from_nonoverlapping(b"scratch-bytes-scratch-bytes-1234".as_ptr(), 32) };
    temp.alloc(8);

    let b = temp.realloc(a, 32, 64);
    assert_ne!(a, b);
    // SAFETY: b holds the 32 copied bytes
    let copied = unsafe { std::slice::from_raw_parts(b.as_ptr(), 32) };
    assert_eq!(copied, b"scratch-bytes-scratch-bytes-1234");
}

#[test]
fn chunks_are_reserved_and_committed_whole() {
    let vm = CountingVm::new();
    let mut temp = temp(&vm);

    temp.alloc(100);
    assert_eq!(vm.reserves.borrow().as_slice(), &[64 * 1024]);
    assert_eq!(vm.commits(), vec![64 * 1024]);
}

#[test]
fn oversized_request_gets_dedicated_chunk() {
    let vm = CountingVm::new();
    let mut temp = temp(&vm);

    temp.alloc(8);
    temp.alloc(100_000);
    assert_eq!(vm.reserves.borrow().as_slice(), &[64 * 1024, 102_400]);

    let stats = temp.stats();
    assert_eq!(stats.regular_chunks, 1);
    assert_eq!(stats.oversized_chunks, 1);
}

#[test]
fn reset_keeps_regular_chunks_and_drops_oversized() {
    let vm = CountingVm::new();
    let mut temp = temp(&vm);

    let first = temp.alloc(60 * 1024);
    temp.alloc(60 * 1024);
    temp.alloc(1 << 20);
    assert_eq!(vm.reserves.borrow().len(), 3);

    temp.reset();
    assert_eq!(vm.releases.get(), 1);
    assert_eq!(temp.stats().used_bytes, 0);

    // Retained chunks are reused in order without new reservations.
    assert_eq!(temp.alloc(8), first);
    temp.alloc(63 * 1024);
    assert_eq!(vm.reserves.borrow().len(), 3);
}

#[test]
fn free_of_older_allocation_is_ignored() {
    let vm = CountingVm::new();
    let mut temp = temp(&vm);

    let a = temp.alloc(64);
    let b = temp.alloc(64);
    temp.free(a, 64);
    assert_eq!(temp.stats().used_bytes, 128);

    temp.free(b, 64);
    assert_eq!(temp.stats().used_bytes, 64);
}

#[test]
fn drop_releases_every_chunk() {
    let vm = CountingVm::new();
    {
        let mut temp = temp(&vm);
        temp.alloc(60 * 1024);
        temp.alloc(60 * 1024);
        temp.alloc(1 << 20);
    }
    assert_eq!(vm.releases.get(), 3);
}

#[test]
fn system_temp_allocator_round_trip() {
    let mut temp = TempAllocator::new();
    let ptr = temp.alloc(256);
    // SAFETY: 256-byte allocation
    unsafe { ptr.as_ptr().write_bytes(1, 256) };
    temp.reset();
    assert_eq!(temp.alloc(256), ptr);
}
