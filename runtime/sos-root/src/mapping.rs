//! Virtual address space management and lazy paging-structure materialisation
//! (SPEC_FULL.md §4.3), grounded on `original_source/sos/src/mapping.c` for
//! the retry-on-missing-level behaviour and on `cap_broker/src/vspace.rs` for
//! the bump-allocator/dual-mode-syscall shape.

use crate::bootinfo::CPtr;
use crate::cspace::{CSpace, ObjectType};
use crate::error::{CoreError, Result};
use crate::untyped::UntypedTable;
use log::trace;

/// Levels of the paging tree a map can be missing, from the point of view of
/// a single `seL4_ARCH_Page_Map` attempt. Order matters: the kernel reports
/// the highest missing level first, so materialising top-down converges in
/// at most `PAGING_LEVELS` retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MissingLevel {
    PageUpperDirectory,
    PageDirectory,
    PageTable,
}

/// Number of intermediate paging levels above the leaf frame in a 4-level
/// tree (VSpace root -> PUD -> PD -> PT -> frame).
const PAGING_LEVELS: usize = 3;

/// Page permissions, independent of the kernel's `seL4_CapRights_t` encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permissions {
    pub read: bool,
    pub write: bool,
    pub execute: bool,
}

impl Permissions {
    pub const READ_ONLY: Permissions = Permissions { read: true, write: false, execute: false };
    pub const READ_WRITE: Permissions = Permissions { read: true, write: true, execute: false };
    pub const READ_EXECUTE: Permissions = Permissions { read: true, write: false, execute: true };
    pub const READ_WRITE_EXECUTE: Permissions = Permissions { read: true, write: true, execute: true };
}

/// A bump-allocated region of an address space. Addresses are handed out and
/// never reclaimed (matching `cap_broker`'s `VSpaceManager::allocate_vaddr` -
/// a root task's own address space churns only at bootstrap and process
/// creation, not in steady state).
pub struct VSpace {
    root: CPtr,
    vaddr_base: usize,
    vaddr_size: usize,
    next_vaddr: usize,
}

impl VSpace {
    pub fn new(root: CPtr, vaddr_base: usize, vaddr_size: usize) -> Self {
        Self { root, vaddr_base, vaddr_size, next_vaddr: vaddr_base }
    }

    pub fn root(&self) -> CPtr {
        self.root
    }

    /// Reserve `size` bytes of virtual address space, page-aligned.
    pub fn allocate_vaddr(&mut self, size: usize) -> Result<usize> {
        let page_size = 1usize << crate::config::PAGE_BITS;
        let aligned = (size + page_size - 1) & !(page_size - 1);
        if self.next_vaddr + aligned > self.vaddr_base + self.vaddr_size {
            return Err(CoreError::OutOfMemory { requested_bits: 0 });
        }
        let addr = self.next_vaddr;
        self.next_vaddr += aligned;
        Ok(addr)
    }
}

/// Map `frame_cap` into `vspace` at `vaddr`, materialising any missing
/// intermediate page-table-tree levels along the way. Each materialised
/// level consumes one untyped (a 4 KiB page retyped into the paging
/// structure) and one cspace slot; on a real kernel those retries are driven
/// by the specific "no page table at this level" error the kernel returns,
/// capped at `PAGING_LEVELS` attempts so a genuinely broken mapping fails
/// rather than looping forever.
pub fn map_page(
    cspace: &mut CSpace,
    ut: &mut UntypedTable,
    vspace: &VSpace,
    frame_cap: CPtr,
    vaddr: usize,
    rights: Permissions,
) -> Result<()> {
    for attempt in 0..=PAGING_LEVELS {
        match sel4_page_map(frame_cap, vspace.root(), vaddr, rights, DEFAULT_VM_ATTRS) {
            Ok(()) => return Ok(()),
            Err(MapOutcome::AlreadyMapped) => return Err(CoreError::AlreadyMapped),
            Err(MapOutcome::Missing(level)) if attempt < PAGING_LEVELS => {
                trace!("mapping vaddr={vaddr:#x}: materialising {level:?} (attempt {attempt})");
                materialise_level(cspace, ut, vspace, vaddr, level)?;
            }
            Err(MapOutcome::Missing(level)) => {
                return Err(CoreError::MappingFailed(missing_level_code(level)));
            }
            Err(MapOutcome::Other(code)) => return Err(CoreError::MappingFailed(code)),
        }
    }
    Err(CoreError::MappingFailed(-1))
}

/// Default VM attributes (cacheable/write-back) used by every mapping call
/// that doesn't need to say otherwise.
const DEFAULT_VM_ATTRS: usize = 0;

fn materialise_level(
    cspace: &mut CSpace,
    ut: &mut UntypedTable,
    vspace: &VSpace,
    vaddr: usize,
    level: MissingLevel,
) -> Result<()> {
    let obj_type = level_object_type(level);
    let size_bits = crate::config::PAGE_BITS;
    let backing = ut.alloc(size_bits, cspace)?;
    let slot = match cspace.alloc_slot(ut) {
        Ok(s) => s,
        Err(e) => {
            ut.free(backing);
            return Err(e);
        }
    };
    if let Err(e) = cspace.untyped_retype(&backing, slot, obj_type, size_bits) {
        cspace.free_slot(slot);
        ut.free(backing);
        return Err(e);
    }
    sel4_structure_map(slot, vspace.root(), vaddr, obj_type, DEFAULT_VM_ATTRS)
}

fn level_object_type(level: MissingLevel) -> ObjectType {
    match level {
        MissingLevel::PageUpperDirectory => ObjectType::PageUpperDirectory,
        MissingLevel::PageDirectory => ObjectType::PageDirectory,
        MissingLevel::PageTable => ObjectType::PageTable,
    }
}

/// Map `frame_cap` into `vspace` at `vaddr`, the same materialisation loop as
/// `map_page`, but any intermediate paging structure the helper needs to
/// create consumes a capability slot from the caller-supplied `slots`
/// (advancing `*used`) rather than calling `cspace.alloc_slot` itself
/// (SPEC_FULL.md §4.3 Contract). Used during cspace bootstrapping, before the
/// cspace's own allocator is in a state where it can safely recurse into
/// itself. `attrs` carries the raw kernel VM-attribute bits (cacheability
/// etc.) instead of always defaulting to write-back.
pub fn map_frame_with_slots(
    cspace: &mut CSpace,
    ut: &mut UntypedTable,
    vspace: &VSpace,
    frame_cap: CPtr,
    vaddr: usize,
    rights: Permissions,
    attrs: usize,
    slots: &[CPtr],
    used: &mut usize,
) -> Result<()> {
    for attempt in 0..=PAGING_LEVELS {
        match sel4_page_map(frame_cap, vspace.root(), vaddr, rights, attrs) {
            Ok(()) => return Ok(()),
            Err(MapOutcome::AlreadyMapped) => return Err(CoreError::AlreadyMapped),
            Err(MapOutcome::Missing(level)) if attempt < PAGING_LEVELS => {
                trace!("mapping (pre-reserved slots) vaddr={vaddr:#x}: materialising {level:?} (attempt {attempt})");
                materialise_level_with_slot(cspace, ut, vspace, vaddr, level, attrs, slots, used)?;
            }
            Err(MapOutcome::Missing(level)) => {
                return Err(CoreError::MappingFailed(missing_level_code(level)));
            }
            Err(MapOutcome::Other(code)) => return Err(CoreError::MappingFailed(code)),
        }
    }
    Err(CoreError::MappingFailed(-1))
}

fn materialise_level_with_slot(
    cspace: &mut CSpace,
    ut: &mut UntypedTable,
    vspace: &VSpace,
    vaddr: usize,
    level: MissingLevel,
    attrs: usize,
    slots: &[CPtr],
    used: &mut usize,
) -> Result<()> {
    let obj_type = level_object_type(level);
    let size_bits = crate::config::PAGE_BITS;
    let slot = *slots.get(*used).ok_or(CoreError::OutOfSlots)?;
    let backing = ut.alloc(size_bits, cspace)?;
    if let Err(e) = cspace.untyped_retype(&backing, slot, obj_type, size_bits) {
        ut.free(backing);
        return Err(e);
    }
    *used += 1;
    sel4_structure_map(slot, vspace.root(), vaddr, obj_type, attrs)
}

/// Map MMIO device memory: same materialisation loop as `map_page`, but the
/// frame capability is a device untyped retyped directly (never cached,
/// never zeroed, SPEC_FULL.md §4.3 "Device mapping").
pub fn map_device(
    cspace: &mut CSpace,
    ut: &mut UntypedTable,
    vspace: &VSpace,
    device_paddr: usize,
    vaddr: usize,
) -> Result<()> {
    let dev = ut.find_device_untyped(device_paddr).ok_or(CoreError::OutOfMemory { requested_bits: 0 })?;
    let slot = cspace.alloc_slot(ut)?;
    cspace.untyped_retype(&dev, slot, ObjectType::Frame, dev.size_bits())?;
    map_page(cspace, ut, vspace, slot, vaddr, Permissions::READ_WRITE)
}

enum MapOutcome {
    Missing(MissingLevel),
    AlreadyMapped,
    Other(i32),
}

fn missing_level_code(level: MissingLevel) -> i32 {
    match level {
        MissingLevel::PageUpperDirectory => -10,
        MissingLevel::PageDirectory => -11,
        MissingLevel::PageTable => -12,
    }
}

#[cfg(feature = "runtime")]
fn sel4_page_map(
    frame_cap: CPtr,
    vspace_root: CPtr,
    vaddr: usize,
    rights: Permissions,
    attrs: usize,
) -> core::result::Result<(), MapOutcome> {
    use sel4_platform::adapter as sys;
    let r = sys::seL4_CapRights_new(false, rights.write, rights.read, rights.write);
    let err = unsafe { sys::seL4_ARCH_Page_Map(frame_cap, vspace_root, vaddr, r, attrs) };
    classify(err)
}

#[cfg(not(feature = "runtime"))]
fn sel4_page_map(
    _frame_cap: CPtr,
    _vspace_root: CPtr,
    _vaddr: usize,
    _rights: Permissions,
    _attrs: usize,
) -> core::result::Result<(), MapOutcome> {
    Ok(())
}

#[cfg(feature = "runtime")]
fn sel4_structure_map(struct_cap: CPtr, vspace_root: CPtr, vaddr: usize, obj_type: ObjectType, attrs: usize) -> Result<()> {
    use sel4_platform::adapter as sys;
    let err = unsafe {
        match obj_type {
            ObjectType::PageTable => sys::seL4_ARCH_PageTable_Map(struct_cap, vspace_root, vaddr, attrs),
            ObjectType::PageDirectory => sys::seL4_ARCH_PageDirectory_Map(struct_cap, vspace_root, vaddr, attrs),
            ObjectType::PageUpperDirectory => sys::seL4_ARCH_PageUpperDirectory_Map(struct_cap, vspace_root, vaddr, attrs),
            other => unreachable!("materialise_level never requests {other:?} as a paging structure"),
        }
    };
    if sys::is_ok(err) {
        Ok(())
    } else {
        Err(CoreError::MappingFailed(err as i32))
    }
}

#[cfg(not(feature = "runtime"))]
fn sel4_structure_map(_struct_cap: CPtr, _vspace_root: CPtr, _vaddr: usize, _obj_type: ObjectType, _attrs: usize) -> Result<()> {
    Ok(())
}

#[cfg(feature = "runtime")]
fn classify(err: sel4_platform::adapter::Error) -> core::result::Result<(), MapOutcome> {
    use sel4_platform::adapter as sys;
    if sys::is_ok(err) {
        Ok(())
    } else if err == sys::seL4_DeleteFirst {
        Err(MapOutcome::AlreadyMapped)
    } else if err == sys::seL4_FailedLookup {
        // TODO: the real lookup-failure fault carries which level was
        // missing in its IPC message registers; until that's wired through
        // the platform seam this always retries from the top.
        Err(MapOutcome::Missing(MissingLevel::PageUpperDirectory))
    } else {
        Err(MapOutcome::Other(err as i32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_vaddr_bumps_and_page_aligns() {
        let mut vs = VSpace::new(1, 0x1000_0000, 0x10_0000);
        let a = vs.allocate_vaddr(100).unwrap();
        let b = vs.allocate_vaddr(100).unwrap();
        assert_eq!(a, 0x1000_0000);
        assert_eq!(b, 0x1000_1000);
    }

    #[test]
    fn allocate_vaddr_respects_region_bound() {
        let mut vs = VSpace::new(1, 0, 0x2000);
        vs.allocate_vaddr(0x1000).unwrap();
        vs.allocate_vaddr(0x1000).unwrap();
        assert!(vs.allocate_vaddr(0x1000).is_err());
    }

    #[test]
    fn map_page_succeeds_in_mock_mode() {
        use crate::bootinfo::mock_bootinfo;
        let bi = mock_bootinfo();
        let mut ut = UntypedTable::new(bi.memory_bounds().unwrap().0, 1 << 16);
        for u in bi.non_device_untyped() {
            ut.add_untyped_range(u.paddr, u.cap, 1usize << (u.size_bits - crate::config::PAGE_BITS));
        }
        let mut cs = CSpace::new_two_level(bi.init_cnode, 4, 4, 2);
        let vs = VSpace::new(bi.init_vspace, 0x2000_0000, 0x10_0000);
        let frame = ut.alloc(crate::config::PAGE_BITS, &mut cs).unwrap();
        let slot = cs.alloc_slot(&mut ut).unwrap();
        cs.untyped_retype(&frame, slot, ObjectType::Frame, crate::config::PAGE_BITS).unwrap();
        map_page(&mut cs, &mut ut, &vs, slot, 0x2000_0000, Permissions::READ_WRITE).unwrap();
    }

    #[test]
    fn map_frame_with_slots_consumes_preallocated_slots_not_cspace_alloc() {
        use crate::bootinfo::mock_bootinfo;
        let bi = mock_bootinfo();
        let mut ut = UntypedTable::new(bi.memory_bounds().unwrap().0, 1 << 16);
        for u in bi.non_device_untyped() {
            ut.add_untyped_range(u.paddr, u.cap, 1usize << (u.size_bits - crate::config::PAGE_BITS));
        }
        let mut cs = CSpace::new_two_level(bi.init_cnode, 4, 4, 2);
        let vs = VSpace::new(bi.init_vspace, 0x2100_0000, 0x10_0000);
        let frame = ut.alloc(crate::config::PAGE_BITS, &mut cs).unwrap();
        let slot = cs.alloc_slot(&mut ut).unwrap();
        cs.untyped_retype(&frame, slot, ObjectType::Frame, crate::config::PAGE_BITS).unwrap();

        let reserved: alloc::vec::Vec<CPtr> =
            (0..PAGING_LEVELS).map(|_| cs.alloc_slot(&mut ut).unwrap()).collect();
        let mut used = 0;
        map_frame_with_slots(&mut cs, &mut ut, &vs, slot, 0x2100_0000, Permissions::READ_WRITE, DEFAULT_VM_ATTRS, &reserved, &mut used)
            .unwrap();
    }

    #[test]
    fn map_device_looks_up_by_paddr() {
        use crate::bootinfo::mock_bootinfo;
        let bi = mock_bootinfo();
        let mut ut = UntypedTable::new(bi.memory_bounds().unwrap().0, 1 << 20);
        for u in bi.device_untyped() {
            ut.add_device_untyped(u.paddr, u.cap, u.size_bits);
        }
        let mut cs = CSpace::new_two_level(bi.init_cnode, 4, 4, 2);
        let vs = VSpace::new(bi.init_vspace, 0x3000_0000, 0x10_0000);
        let dev = bi.device_untyped().next().unwrap();
        map_device(&mut cs, &mut ut, &vs, dev.paddr, 0x3000_0000).unwrap();
    }
}
