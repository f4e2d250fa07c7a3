//! Physical frame allocator.
//!
//! A bitmap with one bit per 4 KiB frame across the 32-bit physical address
//! space (1,048,576 bits in 32,768 words). Set means used. Everything starts
//! used; `init` releases the loader-reported available regions above 1 MiB
//! and then re-reserves the kernel image. Allocation is linear first-fit,
//! including for multi-frame runs.
//!
//! Exhaustion and double frees are unrecoverable accounting failures and
//! panic; callers that can tolerate shortage must check
//! [`free_memory`](free_memory) first.

use spin::Mutex;

use super::{FrameNumber, MemoryRegion, PhysicalAddress, LOW_MEMORY_LIMIT, MAX_FRAMES, PAGE_SIZE};

/// Size of a physical frame (4 KiB).
pub const FRAME_SIZE: usize = PAGE_SIZE;

/// Words in the frame bitmap.
pub const BITMAP_WORDS: usize = MAX_FRAMES / 32;

/// The frame bitmap engine.
///
/// Kept free of global state so the kernel wraps one instance in a lock and
/// the tests drive their own instances with synthetic memory maps.
pub struct FrameBitmap {
    bitmap: [u32; BITMAP_WORDS],
    used_frames: u32,
    /// Bytes of RAM handed to `insert_region`, i.e. the managed total.
    memory_size: u64,
}

impl FrameBitmap {
    /// A bitmap with every frame marked used.
    pub const fn new() -> Self {
        Self {
            bitmap: [u32::MAX; BITMAP_WORDS],
            used_frames: 0,
            memory_size: 0,
        }
    }

    fn set_bit(&mut self, frame: usize) {
        self.bitmap[frame / 32] |= 1 << (frame % 32);
    }

    fn clear_bit(&mut self, frame: usize) {
        self.bitmap[frame / 32] &= !(1 << (frame % 32));
    }

    fn test_bit(&self, frame: usize) -> bool {
        self.bitmap[frame / 32] & (1 << (frame % 32)) != 0
    }

    /// Release an available region to the allocator.
    ///
    /// The region is shrunk inward to frame boundaries; regions (or parts)
    /// beyond the 4 GiB bitmap are ignored.
    pub fn insert_region(&mut self, base: u64, length: u64) {
        let start = base.div_ceil(FRAME_SIZE as u64);
        let end = (base + length) / FRAME_SIZE as u64;
        if start >= end {
            return;
        }

        let mut released = 0u64;
        for frame in start..end {
            if frame >= MAX_FRAMES as u64 {
                break;
            }
            if self.test_bit(frame as usize) {
                self.clear_bit(frame as usize);
                released += 1;
            }
        }
        self.memory_size += released * FRAME_SIZE as u64;
    }

    /// Re-reserve a region (kernel image, firmware holes).
    ///
    /// Widened outward to frame boundaries so a partially covered frame is
    /// never handed out.
    pub fn reserve_region(&mut self, base: u64, length: u64) {
        let start = base / FRAME_SIZE as u64;
        let end = (base + length).div_ceil(FRAME_SIZE as u64);

        for frame in start..end {
            if frame >= MAX_FRAMES as u64 {
                break;
            }
            if !self.test_bit(frame as usize) {
                self.set_bit(frame as usize);
                self.used_frames += 1;
            }
        }
    }

    /// Populate the bitmap from a bootloader memory map and the kernel
    /// image placement.
    pub fn init<I>(&mut self, regions: I, kernel_start: u32, kernel_end: u32)
    where
        I: IntoIterator<Item = MemoryRegion>,
    {
        for region in regions {
            log::debug!(
                "map: {:#012x}..{:#012x} {:?}",
                region.base,
                region.end(),
                region.kind
            );
            // Low memory stays reserved: the BIOS data area, the EBDA and
            // the AP trampoline all live there.
            if region.is_available() && region.base >= LOW_MEMORY_LIMIT {
                self.insert_region(region.base, region.length);
            }
        }

        if kernel_end > kernel_start {
            self.reserve_region(kernel_start as u64, (kernel_end - kernel_start) as u64);
        }

        log::info!(
            "{} KiB total, {} KiB used, {} KiB free",
            self.total_memory() / 1024,
            self.used_memory() / 1024,
            self.free_memory() / 1024
        );
    }

    /// Allocate `count` physically contiguous frames (first fit).
    ///
    /// Panics when no run of `count` free frames exists.
    pub fn alloc_pages(&mut self, count: usize) -> PhysicalAddress {
        assert!(count > 0, "alloc_pages: zero-length allocation");

        let mut frame = 0usize;
        'search: while frame + count <= MAX_FRAMES {
            for offset in 0..count {
                if self.test_bit(frame + offset) {
                    // Skip past the used frame that broke the run.
                    frame += offset + 1;
                    continue 'search;
                }
            }

            for offset in 0..count {
                self.set_bit(frame + offset);
            }
            self.used_frames += count as u32;
            return FrameNumber::new(frame as u32).base_addr();
        }

        panic!("out of physical memory ({count} contiguous frames requested)");
    }

    /// Allocate one frame.
    pub fn alloc_page(&mut self) -> PhysicalAddress {
        self.alloc_pages(1)
    }

    /// Free `count` frames starting at `base`.
    ///
    /// Panics on a frame that was not allocated (double free) or a range
    /// outside the bitmap.
    pub fn free_pages(&mut self, base: PhysicalAddress, count: usize) {
        if count == 0 {
            return;
        }

        let start = base.frame().as_u32() as usize;
        assert!(
            start + count <= MAX_FRAMES,
            "free_pages: range outside physical memory"
        );

        for frame in start..start + count {
            assert!(self.test_bit(frame), "free_pages: double free");
            self.clear_bit(frame);
        }
        self.used_frames -= count as u32;
    }

    /// Free one frame.
    pub fn free_page(&mut self, addr: PhysicalAddress) {
        self.free_pages(addr, 1);
    }

    /// Bytes of RAM under management.
    pub fn total_memory(&self) -> u64 {
        self.memory_size
    }

    /// Bytes currently allocated (kernel image included).
    pub fn used_memory(&self) -> u64 {
        self.used_frames as u64 * FRAME_SIZE as u64
    }

    /// Bytes still allocatable.
    pub fn free_memory(&self) -> u64 {
        (self.memory_size / FRAME_SIZE as u64).saturating_sub(self.used_frames as u64)
            * FRAME_SIZE as u64
    }
}

impl Default for FrameBitmap {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Kernel-wide instance
// ---------------------------------------------------------------------------

static FRAME_ALLOCATOR: Mutex<FrameBitmap> = Mutex::new(FrameBitmap::new());

/// Initialize the kernel frame allocator from the boot memory map.
pub fn init<I>(regions: I)
where
    I: IntoIterator<Item = MemoryRegion>,
{
    let (kernel_start, kernel_end) = crate::arch::kernel_image_range();
    FRAME_ALLOCATOR
        .lock()
        .init(regions, kernel_start, kernel_end);
}

/// Re-reserve a physical range (boot modules, firmware tables).
pub fn reserve_region(base: u64, length: u64) {
    FRAME_ALLOCATOR.lock().reserve_region(base, length);
}

/// Allocate one physical frame.
pub fn alloc_page() -> PhysicalAddress {
    FRAME_ALLOCATOR.lock().alloc_page()
}

/// Allocate `count` physically contiguous frames.
pub fn alloc_pages(count: usize) -> PhysicalAddress {
    FRAME_ALLOCATOR.lock().alloc_pages(count)
}

/// Return one frame.
pub fn free_page(addr: PhysicalAddress) {
    FRAME_ALLOCATOR.lock().free_page(addr);
}

/// Return `count` frames starting at `base`.
pub fn free_pages(base: PhysicalAddress, count: usize) {
    FRAME_ALLOCATOR.lock().free_pages(base, count);
}

/// Bytes of RAM under management.
pub fn total_memory() -> u64 {
    FRAME_ALLOCATOR.lock().total_memory()
}

/// Bytes still allocatable.
pub fn free_memory() -> u64 {
    FRAME_ALLOCATOR.lock().free_memory()
}

/// Bytes currently allocated.
pub fn used_memory() -> u64 {
    FRAME_ALLOCATOR.lock().used_memory()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::MemoryRegionKind;

    fn region(base: u64, length: u64, kind: MemoryRegionKind) -> MemoryRegion {
        MemoryRegion::new(base, length, kind)
    }

    fn boxed_bitmap() -> alloc::boxed::Box<FrameBitmap> {
        // 128 KiB of bitmap; keep test instances off the stack.
        alloc::boxed::Box::new(FrameBitmap::new())
    }

    #[test]
    fn init_releases_exactly_available_frames() {
        let mut bm = boxed_bitmap();
        bm.init(
            [
                region(0, 0x9FC00, MemoryRegionKind::Available),
                region(0x10_0000, 16 * FRAME_SIZE as u64, MemoryRegionKind::Available),
                region(0x20_0000, 0x1000, MemoryRegionKind::Reserved),
            ],
            0,
            0,
        );

        // The sub-1MiB region is ignored, the reserved one too.
        assert_eq!(bm.total_memory(), 16 * FRAME_SIZE as u64);

        // Allocating to exhaustion yields exactly the available frames.
        for _ in 0..16 {
            bm.alloc_page();
        }
        assert_eq!(bm.free_memory(), 0);
    }

    #[test]
    fn kernel_image_is_reserved() {
        let mut bm = boxed_bitmap();
        bm.init(
            [region(
                0x10_0000,
                16 * FRAME_SIZE as u64,
                MemoryRegionKind::Available,
            )],
            0x10_0000,
            0x10_0000 + 4 * FRAME_SIZE as u32,
        );

        // Four frames are covered by the image, twelve remain.
        assert_eq!(bm.free_memory(), 12 * FRAME_SIZE as u64);
        let first = bm.alloc_page();
        assert_eq!(first.as_u32(), 0x10_0000 + 4 * FRAME_SIZE as u32);
    }

    #[test]
    fn unaligned_region_shrinks_inward() {
        let mut bm = boxed_bitmap();
        // 0x100200..0x103200 covers frames 0x101 and 0x102 fully.
        bm.insert_region(0x10_0200, 0x3000);
        assert_eq!(bm.total_memory(), 2 * FRAME_SIZE as u64);
    }

    #[test]
    fn contiguous_run_allocation() {
        let mut bm = boxed_bitmap();
        bm.insert_region(0x10_0000, 8 * FRAME_SIZE as u64);

        let a = bm.alloc_page();
        let run = bm.alloc_pages(4);
        assert_eq!(run.as_u32(), a.as_u32() + FRAME_SIZE as u32);

        // Freeing the single frame leaves a hole too small for another
        // 4-frame run before the tail.
        bm.free_page(a);
        let run2 = bm.alloc_pages(3);
        assert_eq!(run2.as_u32(), run.as_u32() + 4 * FRAME_SIZE as u32);
    }

    #[test]
    fn free_then_realloc_reuses_frame() {
        let mut bm = boxed_bitmap();
        bm.insert_region(0x10_0000, 4 * FRAME_SIZE as u64);
        let a = bm.alloc_page();
        bm.free_page(a);
        let b = bm.alloc_page();
        assert_eq!(a, b);
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn double_free_panics() {
        let mut bm = boxed_bitmap();
        bm.insert_region(0x10_0000, 4 * FRAME_SIZE as u64);
        let a = bm.alloc_page();
        bm.free_page(a);
        bm.free_page(a);
    }

    #[test]
    #[should_panic(expected = "out of physical memory")]
    fn exhaustion_panics() {
        let mut bm = boxed_bitmap();
        bm.insert_region(0x10_0000, 2 * FRAME_SIZE as u64);
        bm.alloc_pages(3);
    }
}
