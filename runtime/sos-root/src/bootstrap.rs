//! The bootstrap sequence (SPEC_FULL.md §4.7), grounded on
//! `original_source/sos/src/bootstrap.c`.
//!
//! Transforms the kernel's initial flat cspace into this task's steady-state
//! two-level cspace, untyped table, DMA pool, frame table and IRQ dispatcher,
//! without ever calling an allocator that doesn't exist yet. Every raw
//! capability slot this sequence consumes before `CSpace`/`UntypedTable` are
//! usable is taken directly from the kernel-provided `bi.empty` range and
//! tracked by a simple cursor; every byte of untyped memory consumed the same
//! way is tracked by `steal_untyped`, which can carve more than one region
//! out of the same boot-info untyped entry.
//!
//! Simplification disclosed in DESIGN.md: every raw retype in this sequence
//! addresses its destination through `bi.init_cnode`, the flat cspace the
//! kernel handed us. Only the final step swaps the running thread's cspace
//! root to the freshly built two-level structure (`seL4_TCB_SetSpace`); the
//! dual-addressing-mode subtlety real seL4 bootstrap code navigates for
//! every intermediate retype is not modelled bit-for-bit.

use crate::bootinfo::{BootInfo, CPtr};
use crate::config::{RootTaskConfig, PAGE_BITS};
use crate::cspace::{CSpace, ObjectType};
use crate::dma::DmaPool;
use crate::error::{CoreError, Result};
use crate::frame_table::FrameTable;
use crate::irq::IrqDispatcher;
use crate::mapping::VSpace;
use crate::untyped::UntypedTable;
use alloc::vec::Vec;
use log::info;

/// What the bootstrap sequence actually spent, so integration tests can
/// assert it stayed within the budget SPEC_FULL.md's sizing assumed
/// (SPEC_FULL.md §10 "stolen-untyped budget" decision: no automatic
/// reconciliation against an estimate, just the two numbers side by side).
#[derive(Debug, Clone, Copy, Default)]
pub struct BootstrapReport {
    pub estimated_slots: usize,
    pub consumed_slots: usize,
    pub estimated_untyped_bytes: usize,
    pub consumed_untyped_bytes: usize,
}

pub struct RootTaskContext {
    pub cspace: CSpace,
    pub untyped: UntypedTable,
    pub vspace: VSpace,
    pub frames: FrameTable,
    pub dma: DmaPool,
    pub irq: IrqDispatcher,
    pub report: BootstrapReport,
}

/// Raw slot cursor over `bi.empty`, used only until the two-level cspace can
/// serve its own `alloc_slot` calls.
struct RawSlots {
    next: CPtr,
    end: CPtr,
}

impl RawSlots {
    fn take(&mut self) -> Result<CPtr> {
        if self.next >= self.end {
            return Err(CoreError::OutOfSlots);
        }
        let slot = self.next;
        self.next += 1;
        Ok(slot)
    }

    fn consumed(&self, start: CPtr) -> usize {
        self.next - start
    }
}

/// Scan `bi`'s non-device untyped list for the first entry with at least
/// `1 << size_bits` bytes left unconsumed, decrement its remaining budget by
/// that much, and return a synthetic (paddr, cap) pair for it. Repeated
/// steals from the same entry return increasing paddrs within it.
fn steal_untyped(bi: &BootInfo, consumed: &mut [usize], size_bits: u8) -> Result<(usize, CPtr)> {
    let nbytes = 1usize << size_bits;
    for (i, ut) in bi.non_device_untyped().enumerate() {
        let used = consumed[i];
        if ut.size() - used >= nbytes {
            consumed[i] += nbytes;
            return Ok((ut.paddr + used, ut.cap));
        }
    }
    Err(CoreError::OutOfMemory { requested_bits: size_bits })
}

/// Run the full bootstrap sequence and hand back a ready-to-use context.
pub fn bootstrap(bi: &BootInfo, cfg: &RootTaskConfig) -> Result<RootTaskContext> {
    info!("bootstrap: {} untyped regions, {} empty slots", bi.untyped.len(), bi.empty.len());

    let mut raw = RawSlots { next: bi.empty.start, end: bi.empty.end };
    let raw_start = raw.next;
    let mut consumed_bytes: Vec<usize> = alloc::vec![0; bi.non_device_untyped().count()];

    // Step 1-2: steal one page to back the first bottom-level CNode, retyped
    // directly into a slot of the flat initial cspace.
    let (cnode0_paddr, cnode0_source_cap) = steal_untyped(bi, &mut consumed_bytes, PAGE_BITS)?;
    let cnode0_slot = raw.take()?;
    retype_raw(cnode0_source_cap, bi.init_cnode, cnode0_slot, ObjectType::CNode, cfg.cnode_bottom_bits)?;

    // Step 3: stand up the two-level cspace and install that first bottom
    // level at top index 0.
    let mut cspace = CSpace::new_two_level(bi.init_cnode, cfg.cnode_top_bits, cfg.cnode_bottom_bits, cfg.watermark_slots);
    cspace.install_bottom_level(0, cnode0_slot);
    let _ = cnode0_paddr;

    // Step 4: seed the watermark directly from the raw cursor, before any
    // code calls `cspace.alloc_slot` for real. Each seeded slot is also
    // marked occupied in the bottom-level bitmap so a later real alloc never
    // reissues it.
    let mut watermark = Vec::with_capacity(cfg.watermark_slots);
    for _ in 0..cfg.watermark_slots {
        let slot = raw.take()?;
        cspace.mark_allocated(slot);
        watermark.push(slot);
    }
    cspace.seed_watermark(watermark);

    // Step 5: populate the untyped table with everything the kernel handed
    // us, skipping the prefix bytes `steal_untyped` already carved off.
    let (base_paddr, bound_paddr) = bi.memory_bounds().ok_or(CoreError::OutOfMemory { requested_bits: 0 })?;
    let page_capacity = (bound_paddr - base_paddr) >> PAGE_BITS;
    let mut untyped = UntypedTable::new(base_paddr, page_capacity);
    for (i, ut) in bi.non_device_untyped().enumerate() {
        let used_pages = consumed_bytes[i] >> PAGE_BITS;
        let total_pages = ut.size() >> PAGE_BITS;
        if total_pages > used_pages {
            untyped.add_untyped_range(ut.paddr + consumed_bytes[i], ut.cap + used_pages as CPtr, total_pages - used_pages);
        }
    }
    for ut in bi.device_untyped() {
        untyped.add_device_untyped(ut.paddr, ut.cap, ut.size_bits);
    }

    // Step 6: stand up this task's own vspace bump allocator over the window
    // configured for general mappings (frame data lives in its own window,
    // reserved separately below).
    let mut vspace = VSpace::new(bi.init_vspace, cfg.frame_data_base + (1 << 30), usize::MAX - cfg.frame_data_base - (1 << 30));

    // Step 7: frame table, windowed below the general vspace region.
    let frames = FrameTable::new(cfg.frame_data_base);

    // Step 8-9: DMA pool, backed by one stolen contiguous region sized per
    // config and mapped at its configured vaddr.
    let dma_size_bits = dma_size_bits_for(cfg.dma_region_size);
    let (dma_paddr, dma_source_cap) = steal_untyped(bi, &mut consumed_bytes, dma_size_bits)?;
    let dma_slot = cspace.alloc_slot(&mut untyped)?;
    retype_raw(dma_source_cap, bi.init_cnode, dma_slot, ObjectType::Frame, dma_size_bits)?;
    crate::mapping::map_page(&mut cspace, &mut untyped, &vspace, dma_slot, cfg.dma_vaddr_base, crate::mapping::Permissions::READ_WRITE)?;
    let dma = DmaPool::new(dma_slot, dma_paddr, cfg.dma_vaddr_base, cfg);

    // Step 10: shared IRQ notification object and dispatcher.
    let notif_slot = cspace.alloc_slot(&mut untyped)?;
    let notif_ut = untyped.alloc(4, &mut cspace)?;
    cspace.untyped_retype(&notif_ut, notif_slot, ObjectType::Notification, 4)?;
    let irq = IrqDispatcher::new(notif_slot, cfg.irq_ident_bits);

    // Step 11-13: in a fuller port, these steps would size and retype the
    // ASID pool reservations and the scheduling-context objects an MCS
    // kernel needs; this root task runs non-MCS (SPEC_FULL.md §10), so there
    // is nothing further to retype here.

    // Step 14: hand the running thread's cspace root over to the two-level
    // structure we just finished building, and reconcile the bitmaps with
    // everything consumed by raw slot numbers during this sequence.
    sel4_tcb_set_space(bi.init_tcb, cspace.root_cnode(), cspace.guard_depth(), bi.init_vspace)?;
    for slot in raw_start..raw.next {
        cspace.mark_allocated(slot);
    }

    let report = BootstrapReport {
        estimated_slots: cfg.total_slots() / 16,
        consumed_slots: raw.consumed(raw_start),
        estimated_untyped_bytes: bi.total_non_device_bytes() / 64,
        consumed_untyped_bytes: consumed_bytes.iter().sum(),
    };
    info!(
        "bootstrap complete: {} slots / {} bytes consumed",
        report.consumed_slots, report.consumed_untyped_bytes
    );

    let _ = &mut vspace;
    Ok(RootTaskContext { cspace, untyped, vspace, frames, dma, irq, report })
}

fn dma_size_bits_for(bytes: usize) -> u8 {
    let mut bits = PAGE_BITS;
    while (1usize << bits) < bytes {
        bits += 1;
    }
    bits
}

#[cfg(feature = "runtime")]
fn retype_raw(ut_cap: CPtr, dest_node: CPtr, dest_slot: CPtr, obj_type: ObjectType, size_bits: u8) -> Result<()> {
    use sel4_platform::adapter as sys;
    let ty = crate::cspace::object_type_raw(obj_type);
    let err = unsafe {
        sys::seL4_Untyped_Retype(
            ut_cap,
            ty,
            size_bits as usize,
            dest_node,
            dest_slot as usize,
            sys::seL4_WordBits as usize,
            dest_slot,
            1,
        )
    };
    if sys::is_ok(err) {
        Ok(())
    } else {
        Err(CoreError::Kernel(err as i32))
    }
}

#[cfg(not(feature = "runtime"))]
fn retype_raw(_ut_cap: CPtr, _dest_node: CPtr, _dest_slot: CPtr, _obj_type: ObjectType, _size_bits: u8) -> Result<()> {
    Ok(())
}

#[cfg(feature = "runtime")]
fn sel4_tcb_set_space(tcb: CPtr, new_root: CPtr, guard_depth: usize, vspace_root: CPtr) -> Result<()> {
    use sel4_platform::adapter as sys;
    let guard = unsafe { sys::seL4_CNode_CapData_new(0, guard_depth) };
    let err = unsafe { sys::seL4_TCB_SetSpace(tcb, 0, new_root, guard, vspace_root, 0) };
    if sys::is_ok(err) {
        Ok(())
    } else {
        Err(CoreError::Kernel(err as i32))
    }
}

#[cfg(not(feature = "runtime"))]
fn sel4_tcb_set_space(_tcb: CPtr, _new_root: CPtr, _guard_depth: usize, _vspace_root: CPtr) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootinfo::mock_bootinfo;

    #[test]
    fn bootstrap_succeeds_against_mock_bootinfo() {
        let bi = mock_bootinfo();
        let cfg = RootTaskConfig::tiny_for_tests();
        let ctx = bootstrap(&bi, &cfg).unwrap();
        assert!(ctx.report.consumed_slots > 0);
        assert!(ctx.report.consumed_untyped_bytes > 0);
    }

    #[test]
    fn bootstrap_leaves_untyped_table_allocatable() {
        let bi = mock_bootinfo();
        let cfg = RootTaskConfig::tiny_for_tests();
        let mut ctx = bootstrap(&bi, &cfg).unwrap();
        let ut = ctx.untyped.alloc(crate::config::ENDPOINT_BITS, &mut ctx.cspace).unwrap();
        assert_eq!(ut.size_bits(), crate::config::ENDPOINT_BITS);
    }

    #[test]
    fn steal_untyped_advances_within_the_same_entry() {
        let bi = mock_bootinfo();
        let mut consumed = alloc::vec![0usize; bi.non_device_untyped().count()];
        let (p0, _) = steal_untyped(&bi, &mut consumed, PAGE_BITS).unwrap();
        let (p1, _) = steal_untyped(&bi, &mut consumed, PAGE_BITS).unwrap();
        assert_eq!(p1, p0 + (1 << PAGE_BITS));
    }
}
