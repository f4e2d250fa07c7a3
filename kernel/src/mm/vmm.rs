//! Virtual memory manager.
//!
//! Operates on the live kernel address space through the recursive mapping
//! described in [`super::page_table`]: the directory's last slot points at
//! the directory itself, so every PDE/PTE has a fixed virtual address and
//! mapping edits never require a scratch window or cause a page fault.
//!
//! All tasks share this single kernel address space. The map/unmap entry
//! points are only meaningful after [`init`] has installed the directory on
//! the boot processor; the pure entry/index layer lives in `page_table` and
//! is exercised by the host tests.

use core::ptr;
use core::sync::atomic::{AtomicU32, Ordering};

use super::frame_allocator;
use super::page_table::{
    pde_window, pt_window_base, pte_window, Entry, EntryFlags, RECURSIVE_SLOT, TABLE_ENTRIES,
};
use super::{PhysicalAddress, VirtualAddress, PAGE_SIZE};

/// Sentinel returned by [`virt_to_phys`] for an unmapped address.
pub const TRANSLATE_FAILED: u32 = 0xFFFF_FFFF;

/// Physical address of the kernel page directory, shared with the AP
/// trampoline.
static KERNEL_DIRECTORY: AtomicU32 = AtomicU32::new(0);

/// Build the kernel address space and switch paging on.
///
/// Layout after this call:
/// - PD slot 0: a page table identity-mapping the first 4 MiB, so the
///   kernel image and loader data stay addressable.
/// - PD slot 1023: the directory itself (recursive mapping).
///
/// Also claims vector 14 so page faults report through [`super::page_fault`].
pub fn init() {
    let pd_phys = frame_allocator::alloc_page();
    let pt_phys = frame_allocator::alloc_page();

    // Paging is still disabled here, so the fresh frames are written through
    // their physical addresses.
    //
    // SAFETY: Both frames were just allocated, are page-aligned and unused;
    // with paging off a physical address is a valid pointer.
    unsafe {
        let pd = pd_phys.as_usize() as *mut Entry;
        let pt = pt_phys.as_usize() as *mut Entry;

        for i in 0..TABLE_ENTRIES {
            ptr::write(pd.add(i), Entry::empty());
            ptr::write(
                pt.add(i),
                Entry::new(
                    PhysicalAddress::new((i * PAGE_SIZE) as u32),
                    EntryFlags::PRESENT | EntryFlags::WRITABLE,
                ),
            );
        }

        ptr::write(
            pd,
            Entry::new(pt_phys, EntryFlags::PRESENT | EntryFlags::WRITABLE),
        );
        ptr::write(
            pd.add(RECURSIVE_SLOT),
            Entry::new(pd_phys, EntryFlags::PRESENT | EntryFlags::WRITABLE),
        );
    }

    crate::irq::register_isr(14, super::page_fault::handle);

    KERNEL_DIRECTORY.store(pd_phys.as_u32(), Ordering::Release);
    crate::arch::load_page_directory(pd_phys.as_u32());
    crate::arch::enable_paging();

    log::info!("paging enabled, directory at {:#010x}", pd_phys.as_u32());
}

/// Physical address of the kernel page directory (for CR3 and the APs).
pub fn kernel_directory() -> u32 {
    KERNEL_DIRECTORY.load(Ordering::Acquire)
}

fn pde_ptr(virt: VirtualAddress) -> *mut Entry {
    pde_window(virt) as *mut Entry
}

fn pte_ptr(virt: VirtualAddress) -> *mut Entry {
    pte_window(virt) as *mut Entry
}

/// Make sure the page table covering `virt` exists, widening the PDE flags
/// with the caller's request.
fn ensure_page_table(virt: VirtualAddress, flags: EntryFlags) {
    // SAFETY: pde_ptr yields the recursive-window address of the PDE, which
    // is mapped as long as the recursive slot is installed (init invariant).
    let pde = unsafe { &mut *pde_ptr(virt) };

    if !pde.is_present() {
        let pt_frame = frame_allocator::alloc_page();
        pde.set(pt_frame, EntryFlags::PRESENT | EntryFlags::WRITABLE | flags);

        // The new table becomes visible through the PT window once the stale
        // translation for that window page is flushed; then zero it.
        let window = pt_window_base(virt);
        crate::arch::flush_tlb(window);
        // SAFETY: window is the recursive-window page for the table just
        // installed; it is PAGE_SIZE bytes of fresh, exclusively owned frame.
        unsafe {
            ptr::write_bytes(window as *mut u8, 0, PAGE_SIZE);
        }
    } else {
        pde.set(pde.address(), pde.flags() | flags);
    }
}

/// Map one page. Both addresses are aligned down to page boundaries.
pub fn map_page(virt: VirtualAddress, phys: PhysicalAddress, flags: EntryFlags) {
    let virt = virt.align_down();
    let phys = phys.align_down();

    ensure_page_table(virt, flags & (EntryFlags::WRITABLE | EntryFlags::USER));

    // SAFETY: The covering page table exists (ensured above), so the PTE
    // window address is mapped.
    unsafe {
        (*pte_ptr(virt)).set(phys, flags);
    }
    crate::arch::flush_tlb(virt.as_u32());
}

/// Map `count` consecutive pages starting at `virt` to consecutive frames
/// starting at `phys`.
pub fn map_pages(virt: VirtualAddress, phys: PhysicalAddress, count: usize, flags: EntryFlags) {
    let virt = virt.align_down();
    let phys = phys.align_down();
    for i in 0..count {
        map_page(
            virt.offset((i * PAGE_SIZE) as u32),
            PhysicalAddress::new(phys.as_u32() + (i * PAGE_SIZE) as u32),
            flags,
        );
    }
}

/// Remove the mapping for `virt`, leaving the backing frame alone.
///
/// Unmapping a non-present page is a silent no-op. The frame is the
/// caller's business: use [`unmap_and_free_page`] for frames the caller
/// owns through the frame allocator.
pub fn unmap_page(virt: VirtualAddress) {
    let virt = virt.align_down();

    // SAFETY: Recursive-window reads; the PDE window is always mapped and
    // the PTE window is only dereferenced behind the PDE present check.
    unsafe {
        let pde = &*pde_ptr(virt);
        if !pde.is_present() {
            return;
        }
        let pte = &mut *pte_ptr(virt);
        if !pte.is_present() {
            return;
        }
        pte.clear();
    }
    crate::arch::flush_tlb(virt.as_u32());
}

/// Remove the mapping for `virt` and return its frame to the allocator.
pub fn unmap_and_free_page(virt: VirtualAddress) {
    let virt = virt.align_down();

    // SAFETY: Same window discipline as `unmap_page`.
    let freed = unsafe {
        let pde = &*pde_ptr(virt);
        if !pde.is_present() {
            return;
        }
        let pte = &mut *pte_ptr(virt);
        if !pte.is_present() {
            return;
        }
        let frame = pte.address();
        pte.clear();
        Some(frame)
    };

    if let Some(frame) = freed {
        crate::arch::flush_tlb(virt.as_u32());
        frame_allocator::free_page(frame);
    }
}

/// Unmap `count` pages starting at `virt` (frames untouched).
pub fn unmap_pages(virt: VirtualAddress, count: usize) {
    let virt = virt.align_down();
    for i in 0..count {
        unmap_page(virt.offset((i * PAGE_SIZE) as u32));
    }
}

/// Unmap `count` pages starting at `virt`, freeing each backing frame.
pub fn unmap_and_free_pages(virt: VirtualAddress, count: usize) {
    let virt = virt.align_down();
    for i in 0..count {
        unmap_and_free_page(virt.offset((i * PAGE_SIZE) as u32));
    }
}

/// Translate a virtual address.
///
/// Returns [`TRANSLATE_FAILED`] when no present mapping covers `virt`,
/// otherwise the frame base plus the intra-page offset.
pub fn virt_to_phys(virt: VirtualAddress) -> u32 {
    // SAFETY: PDE window always mapped; PTE window only read behind the
    // PDE present check.
    unsafe {
        let pde = &*pde_ptr(virt);
        if !pde.is_present() {
            return TRANSLATE_FAILED;
        }
        let pte = &*pte_ptr(virt);
        if !pte.is_present() {
            return TRANSLATE_FAILED;
        }
        pte.address().as_u32() | virt.page_offset()
    }
}
