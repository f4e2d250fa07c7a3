//! Memory-path integration tests: boot memory map through the frame
//! allocator, and allocation patterns against the chunk heap.

use obsidian_kernel::mm::bootloader::parse_memory_map;
use obsidian_kernel::mm::frame_allocator::{FrameBitmap, FRAME_SIZE};
use obsidian_kernel::mm::heap::{Heap, HeapBacking, HEAP_MIN_SIZE};
use obsidian_kernel::mm::PAGE_SIZE;

/// One raw Multiboot mmap entry.
fn raw_entry(base: u64, len: u64, kind: u32) -> [u8; 24] {
    let mut entry = [0u8; 24];
    entry[0..4].copy_from_slice(&20u32.to_le_bytes());
    entry[4..12].copy_from_slice(&base.to_le_bytes());
    entry[12..20].copy_from_slice(&len.to_le_bytes());
    entry[20..24].copy_from_slice(&kind.to_le_bytes());
    entry
}

#[test]
fn boot_map_to_frame_allocator() {
    // A small machine: 636 KiB low memory, a hole, 32 MiB high memory.
    let mut map = Vec::new();
    map.extend_from_slice(&raw_entry(0, 0x9F000, 1));
    map.extend_from_slice(&raw_entry(0x9F000, 0x61000, 2));
    map.extend_from_slice(&raw_entry(0x10_0000, 32 * 1024 * 1024, 1));

    let mut bitmap = Box::new(FrameBitmap::new());
    let kernel_start = 0x10_0000u32;
    let kernel_end = 0x30_0000u32; // 2 MiB image
    bitmap.init(parse_memory_map(&map), kernel_start, kernel_end);

    // Only the high region counts; low memory stays reserved.
    assert_eq!(bitmap.total_memory(), 32 * 1024 * 1024);
    assert_eq!(
        bitmap.free_memory(),
        32 * 1024 * 1024 - (kernel_end - kernel_start) as u64
    );

    // First allocation lands right after the kernel image.
    let first = bitmap.alloc_page();
    assert_eq!(first.as_u32(), kernel_end);

    // Drain everything; the count must match the accounting exactly.
    let mut allocated = 1u64;
    while bitmap.free_memory() > 0 {
        bitmap.alloc_pages(1);
        allocated += 1;
    }
    assert_eq!(
        allocated,
        (32 * 1024 * 1024 - (kernel_end - kernel_start) as u64) / FRAME_SIZE as u64
    );
}

struct BufferBacking;

impl HeapBacking for BufferBacking {
    fn commit(&mut self, _virt: usize, _pages: usize) {}
    fn release(&mut self, _virt: usize, _pages: usize) {}
}

fn page_aligned_arena(bytes: usize) -> (usize, Vec<u8>) {
    let buf = vec![0u8; bytes + PAGE_SIZE];
    let start = (buf.as_ptr() as usize + PAGE_SIZE - 1) & !(PAGE_SIZE - 1);
    (start, buf)
}

#[test]
fn heap_survives_mixed_workload() {
    let (start, _buf) = page_aligned_arena(2 * HEAP_MIN_SIZE);
    let mut heap = Heap::create(start, HEAP_MIN_SIZE, start + 2 * HEAP_MIN_SIZE, BufferBacking);

    // Interleave allocations and frees with growing sizes.
    let mut live: Vec<(*mut u8, usize, u8)> = Vec::new();
    for round in 0u8..8 {
        for step in 0..32usize {
            let size = 16 + step * 61 + round as usize * 13;
            let ptr = heap.alloc(size);
            assert!(!ptr.is_null());
            // Pattern the block to catch overlap between live blocks.
            unsafe { core::ptr::write_bytes(ptr, round ^ step as u8, size) };
            live.push((ptr, size, round ^ step as u8));
        }
        // Free every other block.
        let mut index = 0;
        live.retain(|&(ptr, size, pattern)| {
            index += 1;
            if index % 2 == 0 {
                unsafe {
                    assert_eq!(*ptr, pattern);
                    assert_eq!(*ptr.add(size - 1), pattern);
                }
                heap.free(ptr);
                false
            } else {
                true
            }
        });
    }

    // Verify and release the survivors, in reverse.
    for &(ptr, size, pattern) in live.iter().rev() {
        unsafe {
            assert_eq!(*ptr, pattern);
            assert_eq!(*ptr.add(size - 1), pattern);
        }
        heap.free(ptr);
    }

    // Everything freed: one chunk spans the whole (minimum-size) window.
    let stats = heap.stats();
    assert_eq!(stats.free_chunks, 1);
    assert_eq!(stats.largest_free, heap.size());
    assert_eq!(heap.size(), HEAP_MIN_SIZE);
}

#[test]
fn heap_page_aligned_blocks_interleaved() {
    let (start, _buf) = page_aligned_arena(2 * HEAP_MIN_SIZE);
    let mut heap = Heap::create(start, HEAP_MIN_SIZE, start + 2 * HEAP_MIN_SIZE, BufferBacking);

    let skew = heap.alloc(100);
    let a = heap.paligned_alloc(PAGE_SIZE);
    let b = heap.paligned_alloc(64);
    assert_eq!(a as usize % PAGE_SIZE, 0);
    assert_eq!(b as usize % PAGE_SIZE, 0);

    heap.free(a);
    heap.free(skew);
    heap.free(b);

    let stats = heap.stats();
    assert_eq!(stats.free_chunks, 1);
    assert_eq!(stats.largest_free, HEAP_MIN_SIZE);
}
