//! Buddy-style untyped memory table (SPEC_FULL.md §4.1), grounded on
//! `original_source/sos/src/ut.{h,c}` (not `ut_manager/ut_allocator.c`, an
//! older bitfield-pool allocator this system does not use).
//!
//! Owns every 4 KiB non-device untyped the kernel handed us through a single
//! arena, addressable in O(1) by physical address at page granularity. Splits
//! flow downward from a free list per `size_bits`; there is no coalescing
//! (SPEC_FULL.md §4.1 Non-goals).

use crate::bootinfo::CPtr;
use crate::config::{ENDPOINT_BITS, PAGE_BITS};
use crate::cspace::{CSpace, ObjectType};
use crate::error::{CoreError, Result};
use alloc::vec::Vec;
use log::trace;

/// Spare struct slots manufactured per bookkeeping page consumed by
/// `ensure_new_structures`. Arbitrary but fixed, unlike the original's
/// `PAGE_SIZE / sizeof(ut_t)` - our arena entries don't share the C struct's
/// layout, so there is no natural count to derive this from.
const STRUCTS_PER_PAGE: usize = 32;

#[derive(Debug, Clone, Copy)]
struct UtEntry {
    cap: CPtr,
    paddr: usize,
    size_bits: u8,
    valid: bool,
    next: Option<usize>,
}

/// A handle to one untyped capability, carrying its arena index so it can be
/// returned to `UntypedTable::free`. Analogous to the `ut_t*` pointer the
/// original hands around; here it is a stable arena index instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ut {
    index: usize,
    cap: CPtr,
    paddr: usize,
    size_bits: u8,
}

impl Ut {
    pub fn cap(&self) -> CPtr {
        self.cap
    }

    pub fn paddr(&self) -> usize {
        self.paddr
    }

    pub fn size_bits(&self) -> u8 {
        self.size_bits
    }
}

pub struct UntypedTable {
    /// arena[0..n_pages) mirror physical pages in [base_paddr, base_paddr +
    /// n_pages*4096) one-to-one; arena[n_pages..] is the dynamically grown
    /// struct pool used for sub-page splits.
    arena: Vec<UtEntry>,
    free_lists: [Option<usize>; (PAGE_BITS - ENDPOINT_BITS + 1) as usize],
    free_structs: Option<usize>,
    base_paddr: usize,
    n_pages: usize,
    device: Vec<UtEntry>,
}

fn list_index(size_bits: u8) -> Result<usize> {
    if size_bits < ENDPOINT_BITS || size_bits > PAGE_BITS {
        Err(CoreError::InvalidSize { size_bits })
    } else {
        Ok((size_bits - ENDPOINT_BITS) as usize)
    }
}

impl UntypedTable {
    /// `page_capacity` is the number of 4 KiB pages in [base_paddr,
    /// base_paddr + page_capacity*4096) this table will ever track; it must
    /// cover every non-device untyped later added via `add_untyped_range`.
    pub fn new(base_paddr: usize, page_capacity: usize) -> Self {
        let arena = (0..page_capacity)
            .map(|i| UtEntry { cap: 0, paddr: base_paddr + i * (1 << PAGE_BITS), size_bits: PAGE_BITS, valid: false, next: None })
            .collect();
        Self {
            arena,
            free_lists: [None; (PAGE_BITS - ENDPOINT_BITS + 1) as usize],
            free_structs: None,
            base_paddr,
            n_pages: page_capacity,
            device: Vec::new(),
        }
    }

    fn page_index(&self, paddr: usize) -> Option<usize> {
        if paddr < self.base_paddr {
            return None;
        }
        let idx = (paddr - self.base_paddr) >> PAGE_BITS;
        if idx < self.n_pages {
            Some(idx)
        } else {
            None
        }
    }

    /// Register `n_pages` consecutive 4 KiB untyped capabilities starting at
    /// `paddr`, with consecutive cptrs starting at `first_cap` (the shape the
    /// bootstrap sequence's retype-into-consecutive-slots loop produces).
    pub fn add_untyped_range(&mut self, paddr: usize, first_cap: CPtr, n_pages: usize) {
        let list_idx = list_index(PAGE_BITS).unwrap();
        for i in 0..n_pages {
            let Some(idx) = self.page_index(paddr + i * (1 << PAGE_BITS)) else {
                trace!("untyped range extends past tracked bounds, truncating at page {i}");
                break;
            };
            self.arena[idx].cap = first_cap + i;
            self.arena[idx].valid = true;
            self.arena[idx].next = self.free_lists[list_idx];
            self.free_lists[list_idx] = Some(idx);
        }
    }

    /// Register a device untyped at its natural size. Device ranges are
    /// never split and never enter the size-bucketed free lists.
    pub fn add_device_untyped(&mut self, paddr: usize, cap: CPtr, size_bits: u8) {
        self.device.push(UtEntry { cap, paddr, size_bits, valid: true, next: None });
    }

    pub fn find_device_untyped(&self, paddr: usize) -> Option<Ut> {
        self.device.iter().enumerate().find(|(_, e)| e.paddr == paddr).map(|(i, e)| Ut {
            index: self.n_pages + i, // disjoint index space; device entries are never freed through the normal path
            cap: e.cap,
            paddr: e.paddr,
            size_bits: e.size_bits,
        })
    }

    fn count_free_structs(&self) -> usize {
        let mut n = 0;
        let mut cur = self.free_structs;
        while let Some(idx) = cur {
            n += 1;
            cur = self.arena[idx].next;
        }
        n
    }

    /// Allocate a 4 KiB untyped directly from the page-indexed free list.
    /// This is the only allocation path that bottoms out without recursing
    /// back into `alloc`, which is what makes the watermark discipline work.
    pub fn alloc_4k(&mut self) -> Result<Ut> {
        let list_idx = list_index(PAGE_BITS)?;
        let idx = self.free_lists[list_idx].ok_or(CoreError::OutOfMemory { requested_bits: PAGE_BITS })?;
        self.free_lists[list_idx] = self.arena[idx].next;
        self.arena[idx].next = None;
        let e = self.arena[idx];
        Ok(Ut { index: idx, cap: e.cap, paddr: e.paddr, size_bits: e.size_bits })
    }

    /// Grow the spare-struct pool until at least `min_free` slots are
    /// available, by retiring one 4 KiB page into `STRUCTS_PER_PAGE` empty
    /// arena entries. The page's own Ut entry is consumed (its cap becomes
    /// bookkeeping storage, not spare untyped) so it is not returned to any
    /// free list.
    fn ensure_new_structures(&mut self, min_free: usize) -> Result<()> {
        while self.count_free_structs() < min_free {
            let page = self.alloc_4k()?;
            trace!("retiring page paddr={:#x} into {} spare ut structs", page.paddr, STRUCTS_PER_PAGE);
            for _ in 0..STRUCTS_PER_PAGE {
                let idx = self.arena.len();
                self.arena.push(UtEntry { cap: 0, paddr: 0, size_bits: 0, valid: false, next: self.free_structs });
                self.free_structs = Some(idx);
            }
        }
        Ok(())
    }

    fn take_free_struct(&mut self) -> usize {
        let idx = self.free_structs.expect("ensure_new_structures must run first");
        self.free_structs = self.arena[idx].next;
        idx
    }

    /// Allocate an untyped of exactly `size_bits`, splitting a larger one if
    /// none is free at that size. `cspace` supplies the two slots each split
    /// consumes for the resulting children.
    pub fn alloc(&mut self, size_bits: u8, cspace: &mut CSpace) -> Result<Ut> {
        list_index(size_bits)?;
        if size_bits == PAGE_BITS {
            return self.alloc_4k();
        }
        let li = list_index(size_bits).unwrap();
        if let Some(idx) = self.free_lists[li] {
            self.free_lists[li] = self.arena[idx].next;
            self.arena[idx].next = None;
            let e = self.arena[idx];
            return Ok(Ut { index: idx, cap: e.cap, paddr: e.paddr, size_bits: e.size_bits });
        }

        let parent = self.alloc(size_bits + 1, cspace)?;
        self.ensure_new_structures(2)?;

        let slot0 = cspace.alloc_slot(self);
        let slot0 = match slot0 {
            Ok(s) => s,
            Err(e) => {
                self.free(parent);
                return Err(e);
            }
        };
        let slot1 = match cspace.alloc_slot(self) {
            Ok(s) => s,
            Err(e) => {
                cspace.free_slot(slot0);
                self.free(parent);
                return Err(e);
            }
        };

        let child_size = 1usize << size_bits;
        if let Err(e) = cspace.untyped_retype(&parent, slot0, ObjectType::Untyped, size_bits) {
            cspace.free_slot(slot0);
            cspace.free_slot(slot1);
            self.free(parent);
            return Err(e);
        }
        if let Err(e) = cspace.untyped_retype(&parent, slot1, ObjectType::Untyped, size_bits) {
            cspace.free_slot(slot1);
            return Err(e);
        }

        let idx0 = self.take_free_struct();
        self.arena[idx0] = UtEntry { cap: slot0, paddr: parent.paddr, size_bits, valid: true, next: self.free_lists[li] };
        self.free_lists[li] = Some(idx0);

        let idx1 = self.take_free_struct();
        self.arena[idx1] =
            UtEntry { cap: slot1, paddr: parent.paddr + child_size, size_bits, valid: true, next: self.free_lists[li] };
        self.free_lists[li] = Some(idx1);

        // The parent untyped was destroyed by the retype; its own arena slot
        // (if it came from the page table rather than the struct pool)
        // simply stays invalid and unreferenced.
        self.arena[parent.index].valid = false;

        let idx = self.free_lists[li].unwrap();
        self.free_lists[li] = self.arena[idx].next;
        self.arena[idx].next = None;
        let e = self.arena[idx];
        Ok(Ut { index: idx, cap: e.cap, paddr: e.paddr, size_bits: e.size_bits })
    }

    /// Return an untyped to its size's free list. Does not coalesce with a
    /// buddy (SPEC_FULL.md §4.1 Non-goals).
    pub fn free(&mut self, ut: Ut) {
        let Ok(li) = list_index(ut.size_bits) else { return };
        self.arena[ut.index].next = self.free_lists[li];
        self.free_lists[li] = Some(ut.index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootinfo::mock_bootinfo;

    fn table_with_mock_memory() -> (UntypedTable, CSpace) {
        let bi = mock_bootinfo();
        let (base, _) = bi.memory_bounds().unwrap();
        let mut ut = UntypedTable::new(base, 1 << 16);
        for u in bi.non_device_untyped() {
            ut.add_untyped_range(u.paddr, u.cap, 1usize << (u.size_bits - PAGE_BITS));
        }
        for u in bi.device_untyped() {
            ut.add_device_untyped(u.paddr, u.cap, u.size_bits);
        }
        let cs = CSpace::new_two_level(bi.init_cnode, 6, 6, 4);
        (ut, cs)
    }

    #[test]
    fn alloc_4k_drains_the_page_free_list() {
        let (mut ut, _cs) = table_with_mock_memory();
        let a = ut.alloc_4k().unwrap();
        let b = ut.alloc_4k().unwrap();
        assert_ne!(a.paddr(), b.paddr());
        assert_eq!(a.size_bits(), PAGE_BITS);
    }

    #[test]
    fn alloc_smaller_than_page_triggers_a_split() {
        let (mut ut, mut cs) = table_with_mock_memory();
        let small = ut.alloc(ENDPOINT_BITS, &mut cs).unwrap();
        assert_eq!(small.size_bits(), ENDPOINT_BITS);
    }

    #[test]
    fn split_children_cover_disjoint_address_ranges() {
        let (mut ut, mut cs) = table_with_mock_memory();
        let a = ut.alloc(PAGE_BITS - 1, &mut cs).unwrap();
        let b = ut.alloc(PAGE_BITS - 1, &mut cs).unwrap();
        assert_ne!(a.paddr(), b.paddr());
        assert_eq!(a.size_bits(), PAGE_BITS - 1);
    }

    #[test]
    fn free_then_alloc_reuses_the_same_slot_without_coalescing() {
        let (mut ut, mut cs) = table_with_mock_memory();
        let a = ut.alloc(ENDPOINT_BITS, &mut cs).unwrap();
        let paddr = a.paddr();
        ut.free(a);
        let b = ut.alloc(ENDPOINT_BITS, &mut cs).unwrap();
        assert_eq!(b.paddr(), paddr);
    }

    #[test]
    fn invalid_size_bits_is_rejected() {
        let (mut ut, mut cs) = table_with_mock_memory();
        let err = ut.alloc(3, &mut cs).unwrap_err();
        assert_eq!(err, CoreError::InvalidSize { size_bits: 3 });
        let err = ut.alloc(PAGE_BITS + 1, &mut cs).unwrap_err();
        assert_eq!(err, CoreError::InvalidSize { size_bits: PAGE_BITS + 1 });
    }

    #[test]
    fn out_of_memory_once_all_pages_are_allocated() {
        let mut ut = UntypedTable::new(0, 2);
        ut.add_untyped_range(0, 100, 2);
        let _a = ut.alloc_4k().unwrap();
        let _b = ut.alloc_4k().unwrap();
        let err = ut.alloc_4k().unwrap_err();
        assert_eq!(err, CoreError::OutOfMemory { requested_bits: PAGE_BITS });
    }

    #[test]
    fn device_untyped_is_not_split_and_found_by_paddr() {
        let (ut, _cs) = table_with_mock_memory();
        let bi = mock_bootinfo();
        let dev = bi.device_untyped().next().unwrap();
        let found = ut.find_device_untyped(dev.paddr).unwrap();
        assert_eq!(found.cap(), dev.cap);
        assert_eq!(found.size_bits(), dev.size_bits);
    }
}
