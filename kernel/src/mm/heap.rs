//! Kernel heap.
//!
//! A boundary-tag chunk allocator over a contiguous virtual window
//! `[start, end)` that can grow up to `max`. Every chunk carries a `head`
//! word encoding its size (16-byte granularity) plus the PINUSE ("previous
//! chunk in use") and CINUSE ("this chunk in use") bits; free chunks mirror
//! their size in the `prev_foot` footer of their successor so frees can
//! coalesce backwards without a search. Free chunks sit on one intrusive
//! doubly-linked list ordered by ascending size, which makes allocation a
//! smallest-sufficient-fit scan.
//!
//! Physical frames are committed lazily through the [`HeapBacking`] seam:
//! the kernel backing maps frames from the frame allocator into the window,
//! and the host tests back the window with a plain buffer so the whole
//! allocator runs under the standard test harness.
//!
//! Structural inconsistencies (double free, out-of-range pointer, corrupt
//! neighbor) are unrecoverable and panic with a corruption report.

use core::ptr;

use super::PAGE_SIZE;

/// The heap never contracts below this many bytes.
pub const HEAP_MIN_SIZE: usize = 0x10_0000;

/// Kernel heap window start.
pub const KERNEL_HEAP_START: usize = 0x0100_0000;

/// Kernel heap window limit.
pub const KERNEL_HEAP_MAX: usize = 0x0200_0000;

const WORD: usize = core::mem::size_of::<usize>();

/// Allocation granularity (two pointer words).
pub const ALIGNMENT: usize = 2 * core::mem::size_of::<*const u8>();
const ALIGN_MASK: usize = ALIGNMENT - 1;

/// Per-allocation bookkeeping overhead (the `head` word).
pub const CHUNK_OVERHEAD: usize = WORD;

const PINUSE: usize = 1;
const CINUSE: usize = 2;
#[allow(dead_code)]
const RESERVED: usize = 4;
const INUSE_BITS: usize = PINUSE | CINUSE;
const FLAG_BITS: usize = PINUSE | CINUSE | RESERVED;

/// Smallest chunk the allocator will track.
pub const MIN_CHUNK_SIZE: usize = (core::mem::size_of::<Chunk>() + ALIGN_MASK) & !ALIGN_MASK;

/// Requests at or below this size round up to [`MIN_CHUNK_SIZE`].
const MIN_REQUEST: usize = MIN_CHUNK_SIZE - CHUNK_OVERHEAD - 1;

/// Offset from a chunk header to the memory handed to callers.
const MEM_OFFSET: usize = 2 * WORD;

/// Pad a request to a chunk size.
pub const fn request_to_size(req: usize) -> usize {
    if req < MIN_REQUEST {
        MIN_CHUNK_SIZE
    } else {
        (req + CHUNK_OVERHEAD + ALIGN_MASK) & !ALIGN_MASK
    }
}

const fn page_align_up(value: usize) -> usize {
    (value + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

// ---------------------------------------------------------------------------
// Chunk layout
// ---------------------------------------------------------------------------

/// Chunk header. Only the first two words exist for in-use chunks; the
/// list links are live while the chunk is on the free list.
#[repr(C)]
struct Chunk {
    /// Size of the previous chunk, valid only when the previous chunk is
    /// free (its footer).
    prev_foot: usize,
    /// Chunk size in the high bits, PINUSE/CINUSE in the low bits.
    head: usize,
    prev: *mut Chunk,
    next: *mut Chunk,
}

#[inline]
unsafe fn chunk_size(c: *mut Chunk) -> usize {
    // SAFETY: Caller guarantees `c` points at a live chunk header.
    unsafe { (*c).head & !FLAG_BITS }
}

#[inline]
unsafe fn pinuse(c: *mut Chunk) -> bool {
    // SAFETY: As above.
    unsafe { (*c).head & PINUSE != 0 }
}

#[inline]
unsafe fn cinuse(c: *mut Chunk) -> bool {
    // SAFETY: As above.
    unsafe { (*c).head & CINUSE != 0 }
}

#[inline]
fn chunk_plus(c: *mut Chunk, bytes: usize) -> *mut Chunk {
    (c as usize + bytes) as *mut Chunk
}

#[inline]
fn chunk_minus(c: *mut Chunk, bytes: usize) -> *mut Chunk {
    (c as usize - bytes) as *mut Chunk
}

#[inline]
fn mem_from_chunk(c: *mut Chunk) -> *mut u8 {
    (c as usize + MEM_OFFSET) as *mut u8
}

#[inline]
fn chunk_from_mem(mem: *mut u8) -> *mut Chunk {
    (mem as usize - MEM_OFFSET) as *mut Chunk
}

// ---------------------------------------------------------------------------
// Backing seam
// ---------------------------------------------------------------------------

/// Supplies and reclaims the pages behind the heap window.
pub trait HeapBacking {
    /// Make `[virt, virt + pages * PAGE_SIZE)` usable memory.
    fn commit(&mut self, virt: usize, pages: usize);
    /// Release `[virt, virt + pages * PAGE_SIZE)`.
    fn release(&mut self, virt: usize, pages: usize);
}

/// Kernel backing: fresh frames from the frame allocator, mapped writable
/// into the window; released pages are unmapped and their frames freed.
pub struct KernelBacking;

impl HeapBacking for KernelBacking {
    fn commit(&mut self, virt: usize, pages: usize) {
        use super::page_table::EntryFlags;
        let phys = super::frame_allocator::alloc_pages(pages);
        super::vmm::map_pages(
            super::VirtualAddress::new(virt as u32),
            phys,
            pages,
            EntryFlags::PRESENT | EntryFlags::WRITABLE,
        );
    }

    fn release(&mut self, virt: usize, pages: usize) {
        super::vmm::unmap_and_free_pages(super::VirtualAddress::new(virt as u32), pages);
    }
}

// ---------------------------------------------------------------------------
// Heap
// ---------------------------------------------------------------------------

/// Free-list summary, mostly for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    /// Number of free chunks.
    pub free_chunks: usize,
    /// Bytes in free chunks (headers included).
    pub free_bytes: usize,
    /// Largest single free chunk.
    pub largest_free: usize,
}

pub struct Heap<B: HeapBacking> {
    start: usize,
    end: usize,
    max: usize,
    /// Smallest chunk first; null when the heap is exhausted.
    free_list: *mut Chunk,
    backing: B,
}

// SAFETY: The raw chunk pointers all point into the heap window owned by
// this value; the containing lock provides the exclusion.
unsafe impl<B: HeapBacking + Send> Send for Heap<B> {}

impl<B: HeapBacking> Heap<B> {
    /// Create a heap over `[start, start + size)`, growable to `max`.
    ///
    /// `start` and `size` must be page-aligned. The initial window is
    /// committed immediately and becomes one free chunk.
    pub fn create(start: usize, size: usize, max: usize, mut backing: B) -> Self {
        assert_eq!(start % PAGE_SIZE, 0, "heap start not page-aligned");
        assert_eq!(size % PAGE_SIZE, 0, "heap size not page-aligned");
        assert!(size >= MIN_CHUNK_SIZE && start + size <= max);

        backing.commit(start, size / PAGE_SIZE);

        let mut heap = Self {
            start,
            end: start + size,
            max,
            free_list: ptr::null_mut(),
            backing,
        };

        let hole = start as *mut Chunk;
        // SAFETY: The window was just committed; `hole` is the first chunk
        // header in it and nothing else aliases the region.
        unsafe {
            (*hole).prev_foot = 0;
            (*hole).head = size | PINUSE;
            heap.insert_chunk(hole);
        }

        heap
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    /// Current window size in bytes.
    pub fn size(&self) -> usize {
        self.end - self.start
    }

    /// Walk the free list.
    pub fn stats(&self) -> HeapStats {
        let mut stats = HeapStats {
            free_chunks: 0,
            free_bytes: 0,
            largest_free: 0,
        };
        let mut cursor = self.free_list;
        while !cursor.is_null() {
            // SAFETY: Free-list nodes are valid chunk headers inside the
            // window by the list invariant.
            unsafe {
                let size = chunk_size(cursor);
                stats.free_chunks += 1;
                stats.free_bytes += size;
                if size > stats.largest_free {
                    stats.largest_free = size;
                }
                cursor = (*cursor).next;
            }
        }
        stats
    }

    fn in_window(&self, addr: usize) -> bool {
        addr >= self.start && addr < self.end
    }

    // -- free list ----------------------------------------------------------

    /// First chunk with `chunk_size >= size`, exploiting the ascending
    /// order.
    unsafe fn find_smallest(&self, size: usize) -> Option<*mut Chunk> {
        let mut cursor = self.free_list;
        while !cursor.is_null() {
            // SAFETY: List invariant, see `stats`.
            unsafe {
                if chunk_size(cursor) >= size {
                    return Some(cursor);
                }
                cursor = (*cursor).next;
            }
        }
        None
    }

    /// Insert keeping the list sorted by ascending size.
    unsafe fn insert_chunk(&mut self, chunk: *mut Chunk) {
        // SAFETY: Caller hands a valid free chunk; every dereference below
        // touches either it or list nodes that satisfy the list invariant.
        unsafe {
            let size = chunk_size(chunk);
            let mut cursor = self.free_list;
            let mut prev: *mut Chunk = ptr::null_mut();

            while !cursor.is_null() && chunk_size(cursor) < size {
                prev = cursor;
                cursor = (*cursor).next;
            }

            (*chunk).prev = prev;
            (*chunk).next = cursor;
            if !cursor.is_null() {
                (*cursor).prev = chunk;
            }
            if prev.is_null() {
                self.free_list = chunk;
            } else {
                (*prev).next = chunk;
            }
        }
    }

    unsafe fn remove_chunk(&mut self, chunk: *mut Chunk) {
        // SAFETY: Caller guarantees the chunk is on the free list.
        unsafe {
            let prev = (*chunk).prev;
            let next = (*chunk).next;
            if prev.is_null() {
                self.free_list = next;
            } else {
                (*prev).next = next;
            }
            if !next.is_null() {
                (*next).prev = prev;
            }
        }
    }

    // -- window growth ------------------------------------------------------

    /// Grow the window to `new_size` bytes (page-aligned up).
    fn expand(&mut self, new_size: usize) {
        let new_size = page_align_up(new_size);
        assert!(new_size > self.size());
        assert!(
            self.start + new_size <= self.max,
            "kernel heap window exhausted ({} bytes requested, {} max)",
            new_size,
            self.max - self.start
        );

        let old_end = self.end;
        self.end = self.start + new_size;
        self.backing.commit(old_end, (self.end - old_end) / PAGE_SIZE);
    }

    /// Shrink the window to `new_size` bytes (page-aligned up, clamped to
    /// [`HEAP_MIN_SIZE`]). Returns the size actually kept.
    fn contract(&mut self, new_size: usize) -> usize {
        let mut new_size = page_align_up(new_size);
        if new_size < HEAP_MIN_SIZE {
            new_size = HEAP_MIN_SIZE;
        }
        if new_size >= self.size() {
            return self.size();
        }

        let old_end = self.end;
        self.end = self.start + new_size;
        self.backing
            .release(self.end, (old_end - self.end) / PAGE_SIZE);

        new_size
    }

    // -- allocation ---------------------------------------------------------

    /// Allocate `req` bytes. The returned pointer is `ALIGNMENT`-aligned
    /// and stays valid until [`free`](Self::free).
    pub fn alloc(&mut self, req: usize) -> *mut u8 {
        let nb = request_to_size(req);

        loop {
            // SAFETY: All chunk pointers below come from the free list or
            // from in-window arithmetic guarded by the window bounds.
            unsafe {
                if let Some(hole) = self.find_smallest(nb) {
                    self.remove_chunk(hole);
                    let hole_size = chunk_size(hole);

                    let used = if hole_size >= nb + MIN_CHUNK_SIZE {
                        // Split: the remainder becomes a free chunk.
                        let rem = chunk_plus(hole, nb);
                        let rem_size = hole_size - nb;
                        (*rem).head = rem_size;
                        let rem_end = rem as usize + rem_size;
                        if rem_end < self.end {
                            // Free-chunk footer for backward coalescing.
                            (*chunk_plus(rem, rem_size)).prev_foot = rem_size;
                        }
                        self.insert_chunk(rem);
                        nb
                    } else {
                        hole_size
                    };

                    self.set_inuse(hole, used);
                    return mem_from_chunk(hole);
                }

                // No fit: grow the window and merge the new space with a
                // top chunk that abuts the old end, then retry.
                let old_end = self.end;
                self.expand(self.size() + nb);

                let mut top = self.highest_free_chunk();
                let mut top_size = 0usize;

                if let Some(candidate) = top {
                    if !pinuse(candidate) && cinuse(candidate) {
                        panic!("heap alloc: Memory Corrupt");
                    }
                    let candidate_size = chunk_size(candidate);
                    if candidate as usize + candidate_size != old_end {
                        top = None;
                    } else {
                        self.remove_chunk(candidate);
                        top_size = self.end - candidate as usize;
                    }
                }

                let top = match top {
                    Some(chunk) => chunk,
                    None => {
                        top_size = self.end - old_end;
                        old_end as *mut Chunk
                    }
                };

                (*top).head = top_size | PINUSE;
                self.insert_chunk(top);
            }
        }
    }

    /// Allocate `req` bytes at a page-aligned address.
    ///
    /// Over-allocates by a page plus a minimum chunk, then gives the
    /// leading slack back as a free chunk so the returned pointer lands on
    /// a page boundary; trailing slack beyond a minimum chunk is returned
    /// too.
    pub fn paligned_alloc(&mut self, req: usize) -> *mut u8 {
        let nb = request_to_size(req);
        let padded = nb + PAGE_SIZE + MIN_CHUNK_SIZE - CHUNK_OVERHEAD;

        let mem = self.alloc(padded);

        // SAFETY: `mem` was just produced by `alloc`, so the chunk algebra
        // below stays inside the allocated region plus its header.
        unsafe {
            let mut chunk = chunk_from_mem(mem);

            if (mem as usize) % PAGE_SIZE != 0 {
                // First page boundary whose leading slack still holds a
                // minimum chunk.
                let boundary =
                    chunk_from_mem(page_align_up(mem as usize + 1) as *mut u8);
                let split = if boundary as usize - chunk as usize >= MIN_CHUNK_SIZE {
                    boundary
                } else {
                    chunk_plus(boundary, PAGE_SIZE)
                };

                let lead_size = split as usize - chunk as usize;
                let new_size = chunk_size(chunk) - lead_size;

                // The aligned part takes over the allocation; the leading
                // slack becomes a free chunk whose footer is the new
                // chunk's prev_foot.
                (*split).head = new_size | CINUSE;
                (*split).prev_foot = lead_size;
                (*chunk).head = lead_size | PINUSE;
                self.insert_chunk(chunk);

                chunk = split;
            }

            // Trim the tail down to the request.
            let chunk_sz = chunk_size(chunk);
            if chunk_sz > nb + MIN_CHUNK_SIZE {
                let rem_size = chunk_sz - nb;
                let rem = chunk_plus(chunk, nb);
                self.set_inuse(chunk, nb);
                self.set_inuse(rem, rem_size);
                self.free(mem_from_chunk(rem));
            }

            let mem = mem_from_chunk(chunk);
            debug_assert_eq!(mem as usize % PAGE_SIZE, 0);
            debug_assert!(cinuse(chunk));
            mem
        }
    }

    /// Mark `chunk` (of `size` bytes) in use and set the successor's
    /// PINUSE bit.
    unsafe fn set_inuse(&mut self, chunk: *mut Chunk, size: usize) {
        // SAFETY: Caller guarantees chunk+size lies within the window or
        // exactly at its end; the successor update is bounds-checked.
        unsafe {
            (*chunk).head = ((*chunk).head & PINUSE) | CINUSE | size;
            let next = chunk_plus(chunk, size);
            if (next as usize) < self.end {
                (*next).head |= PINUSE;
            }
        }
    }

    // -- free ---------------------------------------------------------------

    /// Return `mem` to the heap, coalescing with free neighbors and
    /// contracting the window when the tail opens up.
    ///
    /// Panics on null-adjacent corruption: out-of-window pointers, frees
    /// of chunks that are not in use (double free), or inconsistent
    /// neighbor metadata.
    pub fn free(&mut self, mem: *mut u8) {
        if mem.is_null() {
            return;
        }

        if !self.in_window(mem as usize) {
            panic!("heap free: Memory Corrupt (address {:#x})", mem as usize);
        }

        // SAFETY: The pointer was vetted against the window; every chunk
        // dereference below is either the chunk being freed or a neighbor
        // reached through validated boundary tags.
        unsafe {
            let mut block = chunk_from_mem(mem);

            // A free chunk has CINUSE clear and PINUSE set; matching that
            // pattern here means a double free.
            if (*block).head & INUSE_BITS == PINUSE {
                panic!("heap free: Memory Corrupt (double free)");
            }

            let mut size = chunk_size(block);
            let next = chunk_plus(block, size);

            // Backward coalesce via the predecessor's footer.
            if !pinuse(block) {
                let prev_size = (*block).prev_foot;
                let prev = chunk_minus(block, prev_size);
                if !self.in_window(prev as usize) {
                    panic!("heap free: Memory Corrupt (bad footer)");
                }
                size += prev_size;
                block = prev;
                self.remove_chunk(block);
            }

            // Forward handling only when a successor exists.
            if (next as usize) < self.end {
                if !pinuse(next) {
                    panic!("heap free: Memory Corrupt (successor tag)");
                }
                if cinuse(next) {
                    (*next).head &= !PINUSE;
                } else {
                    let next_size = chunk_size(next);
                    if next as usize + next_size > self.end {
                        panic!("heap free: Memory Corrupt (successor size)");
                    }
                    self.remove_chunk(next);
                    size += next_size;
                }
            }

            if block as usize + size == self.end {
                // The coalesced chunk is the top; give whole pages back.
                let old_size = self.size();
                let mut keep = block as usize - self.start;
                if keep % PAGE_SIZE != 0 {
                    keep += MIN_CHUNK_SIZE;
                }
                let kept = self.contract(keep);
                let released = old_size - kept;

                if size > released {
                    size -= released;
                } else {
                    return;
                }
            } else {
                // Footer for backward coalescing by our successor.
                (*chunk_plus(block, size)).prev_foot = size;
            }

            (*block).head = size | PINUSE;
            self.insert_chunk(block);
        }
    }

    /// Highest-addressed chunk on the free list.
    unsafe fn highest_free_chunk(&self) -> Option<*mut Chunk> {
        let mut best: *mut Chunk = ptr::null_mut();
        let mut cursor = self.free_list;
        while !cursor.is_null() {
            if cursor > best {
                best = cursor;
            }
            // SAFETY: List invariant.
            cursor = unsafe { (*cursor).next };
        }
        if best.is_null() {
            None
        } else {
            Some(best)
        }
    }
}

// ---------------------------------------------------------------------------
// Kernel-wide instance and GlobalAlloc
// ---------------------------------------------------------------------------

/// The kernel heap. Plain mutex-wrapped option rather than a once-cell:
/// installing it must not itself allocate.
static KERNEL_HEAP: spin::Mutex<Option<Heap<KernelBacking>>> = spin::Mutex::new(None);

/// Create the kernel heap over its fixed window.
pub fn init() {
    let heap = Heap::create(
        KERNEL_HEAP_START,
        HEAP_MIN_SIZE,
        KERNEL_HEAP_MAX,
        KernelBacking,
    );
    let mut guard = KERNEL_HEAP.lock();
    assert!(guard.is_none(), "kernel heap initialized twice");
    *guard = Some(heap);

    log::info!(
        "kernel heap at {:#010x}..{:#010x} (max {:#010x})",
        KERNEL_HEAP_START,
        KERNEL_HEAP_START + HEAP_MIN_SIZE,
        KERNEL_HEAP_MAX
    );
}

/// Free-list summary of the kernel heap.
pub fn kernel_heap_stats() -> Option<HeapStats> {
    KERNEL_HEAP.lock().as_ref().map(|heap| heap.stats())
}

/// `GlobalAlloc` front end over the kernel heap (bare metal only).
pub struct KernelAllocator;

// SAFETY: alloc/dealloc delegate to the locked kernel heap; the chunk
// allocator hands out ALIGNMENT-aligned, non-overlapping blocks and the
// page-aligned path covers larger alignment requests.
unsafe impl core::alloc::GlobalAlloc for KernelAllocator {
    unsafe fn alloc(&self, layout: core::alloc::Layout) -> *mut u8 {
        let mut guard = KERNEL_HEAP.lock();
        let heap = guard.as_mut().expect("kernel heap used before init");
        if layout.align() > ALIGNMENT {
            assert!(
                layout.align() <= PAGE_SIZE,
                "unsupported alignment {}",
                layout.align()
            );
            heap.paligned_alloc(layout.size())
        } else {
            heap.alloc(layout.size())
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: core::alloc::Layout) {
        let mut guard = KERNEL_HEAP.lock();
        let heap = guard.as_mut().expect("kernel heap used before init");
        heap.free(ptr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use alloc::vec::Vec;

    /// Test backing over a preallocated buffer: commit/release are no-ops
    /// because the whole arena is already real memory.
    struct BufferBacking;

    impl HeapBacking for BufferBacking {
        fn commit(&mut self, _virt: usize, _pages: usize) {}
        fn release(&mut self, _virt: usize, _pages: usize) {}
    }

    /// A page-aligned arena inside a leaked-for-the-test buffer.
    fn arena(bytes: usize) -> (usize, Vec<u8>) {
        let buf = vec![0u8; bytes + PAGE_SIZE];
        let start = (buf.as_ptr() as usize + PAGE_SIZE - 1) & !(PAGE_SIZE - 1);
        (start, buf)
    }

    fn test_heap(window: usize, max: usize) -> (Heap<BufferBacking>, Vec<u8>) {
        let (start, buf) = arena(max);
        (
            Heap::create(start, window, start + max, BufferBacking),
            buf,
        )
    }

    #[test]
    fn fresh_heap_is_one_chunk() {
        let (heap, _buf) = test_heap(HEAP_MIN_SIZE, HEAP_MIN_SIZE);
        let stats = heap.stats();
        assert_eq!(stats.free_chunks, 1);
        assert_eq!(stats.largest_free, HEAP_MIN_SIZE);
    }

    #[test]
    fn small_alloc_splits_top_and_free_restores_it() {
        let (mut heap, _buf) = test_heap(HEAP_MIN_SIZE, HEAP_MIN_SIZE);

        let p = heap.alloc(16);
        assert!(!p.is_null());
        assert_eq!(p as usize % ALIGNMENT, 0);

        let stats = heap.stats();
        assert_eq!(stats.free_chunks, 1);
        assert_eq!(
            stats.largest_free,
            HEAP_MIN_SIZE - request_to_size(16),
        );

        heap.free(p);
        let stats = heap.stats();
        assert_eq!(stats.free_chunks, 1);
        assert_eq!(stats.largest_free, HEAP_MIN_SIZE);
    }

    #[test]
    fn writes_do_not_corrupt_neighbors() {
        let (mut heap, _buf) = test_heap(HEAP_MIN_SIZE, HEAP_MIN_SIZE);

        let a = heap.alloc(64);
        let b = heap.alloc(128);

        // SAFETY: Both blocks were just allocated with these sizes.
        unsafe {
            ptr::write_bytes(a, 0xAA, 64);
            ptr::write_bytes(b, 0xBB, 128);
            assert_eq!(*a, 0xAA);
            assert_eq!(*a.add(63), 0xAA);
            assert_eq!(*b, 0xBB);
        }

        heap.free(a);
        heap.free(b);
        assert_eq!(heap.stats().free_chunks, 1);
    }

    #[test]
    fn free_in_any_order_coalesces_to_one_chunk() {
        let (mut heap, _buf) = test_heap(HEAP_MIN_SIZE, HEAP_MIN_SIZE);

        let sizes = [16usize, 200, 48, 4096, 32, 1000, 64, 24];
        let blocks: Vec<*mut u8> = sizes.iter().map(|&s| heap.alloc(s)).collect();

        // Free in a scrambled order: middle-out, then the rest.
        for &i in &[3usize, 0, 6, 1, 7, 2, 5, 4] {
            heap.free(blocks[i]);
        }

        let stats = heap.stats();
        assert_eq!(stats.free_chunks, 1);
        assert_eq!(stats.largest_free, HEAP_MIN_SIZE);
        assert_eq!(heap.size(), HEAP_MIN_SIZE);
    }

    #[test]
    fn smallest_sufficient_chunk_is_chosen() {
        let (mut heap, _buf) = test_heap(HEAP_MIN_SIZE, HEAP_MIN_SIZE);

        // Carve out two holes of different sizes.
        let small = heap.alloc(64);
        let _guard1 = heap.alloc(16);
        let large = heap.alloc(512);
        let _guard2 = heap.alloc(16);

        heap.free(small);
        heap.free(large);
        assert_eq!(heap.stats().free_chunks, 3); // two holes + top

        // A 64-byte request must come from the small hole, not the large.
        let again = heap.alloc(64);
        assert_eq!(again, small);
    }

    #[test]
    fn paligned_alloc_returns_page_boundary() {
        let (mut heap, _buf) = test_heap(HEAP_MIN_SIZE, HEAP_MIN_SIZE);

        // Misalign the heap cursor first.
        let _skew = heap.alloc(48);

        let p = heap.paligned_alloc(1024);
        assert_eq!(p as usize % PAGE_SIZE, 0);

        // SAFETY: 1024 bytes were just allocated at p.
        unsafe {
            ptr::write_bytes(p, 0xCC, 1024);
            assert_eq!(*p.add(1023), 0xCC);
        }

        heap.free(p);
    }

    #[test]
    fn expand_grows_window_and_contract_returns_it() {
        let window = 16 * PAGE_SIZE;
        let max = HEAP_MIN_SIZE + 16 * PAGE_SIZE;
        let (start, _buf) = arena(max);
        let mut heap = Heap::create(start, window, start + max, BufferBacking);

        // Larger than the initial window: forces expansion.
        let big = heap.alloc(window + PAGE_SIZE);
        assert!(heap.size() > window);
        assert!(heap.end() <= start + max);

        heap.free(big);
        // Contract floor is HEAP_MIN_SIZE, which exceeds our small window,
        // so the window stays put but the space is one free chunk again.
        let stats = heap.stats();
        assert_eq!(stats.free_chunks, 1);
        assert_eq!(stats.free_bytes, heap.size());
    }

    #[test]
    fn window_contracts_after_large_free() {
        let window = HEAP_MIN_SIZE;
        let max = 2 * HEAP_MIN_SIZE;
        let (start, _buf) = arena(max);
        let mut heap = Heap::create(start, window, start + max, BufferBacking);

        // Fill most of the initial window, then force an expansion.
        let a = heap.alloc(HEAP_MIN_SIZE - 4 * PAGE_SIZE);
        let b = heap.alloc(64 * PAGE_SIZE);
        assert!(heap.size() > HEAP_MIN_SIZE);

        // Whole-page tails are released down to the floor.
        heap.free(b);
        heap.free(a);
        assert_eq!(heap.size(), HEAP_MIN_SIZE);

        let stats = heap.stats();
        assert_eq!(stats.free_chunks, 1);
        assert_eq!(stats.largest_free, HEAP_MIN_SIZE);
    }

    #[test]
    #[should_panic(expected = "Memory Corrupt")]
    fn double_free_panics() {
        let (mut heap, _buf) = test_heap(HEAP_MIN_SIZE, HEAP_MIN_SIZE);
        let p = heap.alloc(64);
        heap.free(p);
        heap.free(p);
    }

    #[test]
    #[should_panic(expected = "Memory Corrupt")]
    fn foreign_pointer_panics() {
        let (mut heap, _buf) = test_heap(HEAP_MIN_SIZE, HEAP_MIN_SIZE);
        let mut outside = 0u8;
        heap.free(&mut outside as *mut u8);
    }

    #[test]
    fn chunk_size_constants() {
        // Chunk sizes are multiples of the alignment and never smaller
        // than a header.
        assert_eq!(MIN_CHUNK_SIZE % ALIGNMENT, 0);
        assert!(MIN_CHUNK_SIZE >= core::mem::size_of::<Chunk>());
        assert_eq!(request_to_size(0), MIN_CHUNK_SIZE);
        assert_eq!(request_to_size(1), MIN_CHUNK_SIZE);
        let padded = request_to_size(1000);
        assert_eq!(padded % ALIGNMENT, 0);
        assert!(padded >= 1000 + CHUNK_OVERHEAD);
    }
}
