//! Two-level capability space (SPEC_FULL.md §4.2), grounded on
//! `original_source/libsel4cspace/src/cspace.c`.
//!
//! A one-level cspace is the two-level structure degenerated to a single
//! bottom level equal to the root CNode itself (`bottom_bits == 0` is not
//! used; instead `levels == 1` skips the top/bottom split entirely).

use crate::bitmap::Bitmap;
use crate::bootinfo::CPtr;
use crate::config::RootTaskConfig;
use crate::error::{CoreError, Result};
use crate::untyped::{Ut, UntypedTable};
use alloc::vec::Vec;
use bitflags::bitflags;
use log::{debug, trace, warn};
use static_assertions::const_assert_eq;

const_assert_eq!(WORD_BITS, core::mem::size_of::<usize>() * 8);

/// Kernel object types we ever retype an untyped into. Mirrors the subset of
/// `seL4_ObjectType` this core invokes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    Untyped,
    CNode,
    Endpoint,
    Notification,
    Tcb,
    Reply,
    Frame,
    PageTable,
    PageDirectory,
    PageUpperDirectory,
    VSpace,
}

struct BottomLevel {
    cnode: CPtr,
    bitmap: Bitmap,
}

pub struct CSpace {
    root_cnode: CPtr,
    levels: u8,
    top_bits: u8,
    bottom_bits: u8,
    /// depth word stored in minted guards: `seL4_WordBits - levels*slot_bits`.
    guard_depth: usize,
    top_bitmap: Bitmap,
    bottom: Vec<Option<BottomLevel>>,
    watermark: Vec<CPtr>,
    watermark_target: usize,
}

const WORD_BITS: usize = 64;

impl CSpace {
    /// Construct a fresh cspace whose root CNode capability already exists at
    /// `root_cnode` (retyped and self-minted by the bootstrap sequence).
    /// No bottom levels are materialised yet; they are created lazily by
    /// `alloc_slot`, or seeded directly via `install_bottom_level` by the
    /// bootstrap sequence for the levels it pre-retyped.
    pub fn new_two_level(root_cnode: CPtr, top_bits: u8, bottom_bits: u8, watermark_target: usize) -> Self {
        let guard_depth = WORD_BITS - (top_bits as usize + bottom_bits as usize);
        Self {
            root_cnode,
            levels: 2,
            top_bits,
            bottom_bits,
            guard_depth,
            top_bitmap: Bitmap::new_clear(1usize << top_bits),
            bottom: (0..(1usize << top_bits)).map(|_| None).collect(),
            watermark: Vec::new(),
            watermark_target,
        }
    }

    pub fn new_one_level(root_cnode: CPtr, slot_bits: u8, watermark_target: usize) -> Self {
        let guard_depth = WORD_BITS - slot_bits as usize;
        Self {
            root_cnode,
            levels: 1,
            top_bits: slot_bits,
            bottom_bits: 0,
            guard_depth,
            top_bitmap: Bitmap::new_clear(1usize << slot_bits),
            bottom: Vec::new(),
            watermark: Vec::new(),
            watermark_target,
        }
    }

    pub fn from_config(root_cnode: CPtr, cfg: &RootTaskConfig) -> Self {
        Self::new_two_level(root_cnode, cfg.cnode_top_bits, cfg.cnode_bottom_bits, cfg.watermark_slots)
    }

    pub fn root_cnode(&self) -> CPtr {
        self.root_cnode
    }

    pub fn guard_depth(&self) -> usize {
        self.guard_depth
    }

    pub fn total_slots(&self) -> usize {
        if self.levels == 1 {
            1usize << self.top_bits
        } else {
            (1usize << self.top_bits) * (1usize << self.bottom_bits)
        }
    }

    fn compose(&self, top_index: usize, bottom_index: usize) -> CPtr {
        if self.levels == 1 {
            top_index
        } else {
            (top_index << self.bottom_bits) | bottom_index
        }
    }

    fn decompose(&self, cptr: CPtr) -> (usize, usize) {
        if self.levels == 1 {
            (cptr, 0)
        } else {
            (cptr >> self.bottom_bits, cptr & ((1usize << self.bottom_bits) - 1))
        }
    }

    /// Seed an already-materialised bottom-level CNode (used by the
    /// bootstrap sequence for the levels it pre-retyped in step 3).
    pub fn install_bottom_level(&mut self, top_index: usize, cnode_cptr: CPtr) {
        debug_assert_eq!(self.levels, 2);
        self.bottom[top_index] = Some(BottomLevel {
            cnode: cnode_cptr,
            bitmap: Bitmap::new_clear(1usize << self.bottom_bits),
        });
    }

    /// Mark a cptr as allocated directly in the bitmaps, without going
    /// through the normal alloc path - used by bootstrap step 14 to
    /// reconcile slots consumed before the allocator was steady-state.
    pub fn mark_allocated(&mut self, cptr: CPtr) {
        let (top, bottom) = self.decompose(cptr);
        if self.levels == 1 {
            self.top_bitmap.set(top);
            return;
        }
        if self.bottom[top].is_none() {
            // Bootstrap may mark slots in a bottom CNode it created directly
            // via install_bottom_level already; if not yet installed this is
            // a caller error, but we still record the top bit defensively.
            warn!("mark_allocated on uninstalled bottom level {top}");
        }
        if let Some(level) = self.bottom[top].as_mut() {
            level.bitmap.set(bottom);
            if level.bitmap.is_full() {
                self.top_bitmap.set(top);
            }
        }
    }

    /// Ensure the bottom-level CNode addressed by `top_index` exists,
    /// materialising it from a fresh untyped if necessary (SPEC_FULL.md
    /// §4.2 "Bottom-level materialisation"). Uses a watermark slot for the
    /// new CNode's own cptr so this can run *inside* `alloc_slot` without
    /// recursing into it.
    fn ensure_bottom_level(&mut self, top_index: usize, ut: &mut UntypedTable) -> Result<()> {
        if self.bottom[top_index].is_some() {
            return Ok(());
        }
        let cnode_cptr = self.take_watermark_slot()?;
        let page = ut.alloc_4k()?;
        self.untyped_retype_raw(page.cap(), cnode_cptr, ObjectType::CNode, self.bottom_bits)?;
        self.bottom[top_index] = Some(BottomLevel {
            cnode: cnode_cptr,
            bitmap: Bitmap::new_clear(1usize << self.bottom_bits),
        });
        trace!("materialised bottom cnode {top_index} at cptr {cnode_cptr}");
        Ok(())
    }

    fn take_watermark_slot(&mut self) -> Result<CPtr> {
        self.watermark.pop().ok_or(CoreError::OutOfSlots)
    }

    /// Seed the watermark directly, bypassing `alloc_slot`. Used once, by
    /// the bootstrap sequence, before any bottom-level CNode exists to
    /// allocate the watermark's own slots from.
    pub fn seed_watermark(&mut self, slots: Vec<CPtr>) {
        self.watermark = slots;
    }

    /// Refill the watermark back up to its configured size. Must only be
    /// called once the outer allocation this watermark slot served has
    /// already completed (SPEC_FULL.md §4.2 "Watermark").
    fn refill_watermark(&mut self, ut: &mut UntypedTable) -> Result<()> {
        while self.watermark.len() < self.watermark_target {
            let slot = self.alloc_slot_no_refill(ut)?;
            self.watermark.push(slot);
        }
        Ok(())
    }

    fn alloc_slot_no_refill(&mut self, ut: &mut UntypedTable) -> Result<CPtr> {
        let top_index = self.top_bitmap.first_free().ok_or(CoreError::OutOfSlots)?;
        if self.levels == 2 {
            self.ensure_bottom_level(top_index, ut)?;
            let level = self.bottom[top_index].as_mut().unwrap();
            let bit = level.bitmap.first_free().ok_or(CoreError::OutOfSlots)?;
            level.bitmap.set(bit);
            if level.bitmap.is_full() {
                self.top_bitmap.set(top_index);
            }
            Ok(self.compose(top_index, bit))
        } else {
            self.top_bitmap.set(top_index);
            Ok(top_index)
        }
    }

    /// Allocate a fresh capability slot, materialising bookkeeping structures
    /// as needed. `ut` supplies the untyped memory any such bookkeeping
    /// consumes.
    pub fn alloc_slot(&mut self, ut: &mut UntypedTable) -> Result<CPtr> {
        let cptr = self.alloc_slot_no_refill(ut)?;
        self.refill_watermark(ut)?;
        Ok(cptr)
    }

    /// Free a previously allocated slot. Does not destroy whatever
    /// capability currently occupies it - callers must `cnode_delete` first
    /// if the slot is non-empty.
    pub fn free_slot(&mut self, cptr: CPtr) {
        let (top, bottom) = self.decompose(cptr);
        if self.levels == 1 {
            self.top_bitmap.clear(top);
            return;
        }
        if let Some(level) = self.bottom[top].as_mut() {
            level.bitmap.clear(bottom);
            self.top_bitmap.clear(top);
        }
    }

    fn untyped_retype_raw(&self, ut_cap: CPtr, dest: CPtr, obj_type: ObjectType, size_bits: u8) -> Result<()> {
        let (dest_node, dest_index, dest_depth) = self.retype_destination(dest);
        sel4_untyped_retype(ut_cap, obj_type, size_bits, dest_node, dest_index, dest_depth)
    }

    /// Compute which bottom CNode a target cptr falls in, so the kernel
    /// deposits the retyped capability there rather than into the root
    /// (SPEC_FULL.md §4.2 "Retype orientation"). Exposed to callers
    /// (e.g. `irq.rs`'s `IRQControl_Get`) that must invoke a kernel
    /// operation addressing a slot directly rather than through
    /// `untyped_retype`/`copy`/`mint`.
    pub fn retype_destination(&self, dest: CPtr) -> (CPtr, CPtr, u8) {
        if self.levels == 1 {
            (self.root_cnode, dest, self.top_bits)
        } else {
            let (top, bottom) = self.decompose(dest);
            let node = self.bottom[top].as_ref().map(|l| l.cnode).unwrap_or(self.root_cnode);
            (node, bottom, self.bottom_bits)
        }
    }

    /// Retype `ut`'s untyped capability into a typed object of `obj_type`
    /// at cptr `dest`, which must already be a free slot owned by this
    /// cspace (callers allocate the slot first with `alloc_slot`).
    pub fn untyped_retype(&mut self, ut: &Ut, dest: CPtr, obj_type: ObjectType, size_bits: u8) -> Result<()> {
        debug!("untyped_retype cap={} -> dest={dest} type={obj_type:?} size_bits={size_bits}", ut.cap());
        self.untyped_retype_raw(ut.cap(), dest, obj_type, size_bits)
    }

    pub fn copy(&self, dest: CPtr, src: CPtr, rights: CapRights) -> Result<()> {
        let (dn, di, dd) = self.retype_destination(dest);
        let (sn, si, sd) = self.retype_destination(src);
        sel4_cnode_copy(dn, di, dd, sn, si, sd, rights)
    }

    pub fn mint(&self, dest: CPtr, src: CPtr, rights: CapRights, badge: usize) -> Result<()> {
        let (dn, di, dd) = self.retype_destination(dest);
        let (sn, si, sd) = self.retype_destination(src);
        sel4_cnode_mint(dn, di, dd, sn, si, sd, rights, badge)
    }

    /// Mint `src` (resolved through this cspace's own layout) into a slot of
    /// a *different* cspace, addressed directly by that cspace's own CNode
    /// cap, a raw slot index and a depth (SPEC_FULL.md §4.8 "badged endpoint
    /// minted into the child"). Needed because a freshly created child's
    /// cspace isn't reachable through `retype_destination`, which only knows
    /// this cspace's own slot layout.
    pub fn mint_into(&self, dest_node: CPtr, dest_index: CPtr, dest_depth: u8, src: CPtr, rights: CapRights, badge: usize) -> Result<()> {
        let (sn, si, sd) = self.retype_destination(src);
        sel4_cnode_mint(dest_node, dest_index, dest_depth, sn, si, sd, rights, badge)
    }

    pub fn move_cap(&self, dest: CPtr, src: CPtr) -> Result<()> {
        let (dn, di, dd) = self.retype_destination(dest);
        let (sn, si, sd) = self.retype_destination(src);
        sel4_cnode_move(dn, di, dd, sn, si, sd)
    }

    pub fn delete(&self, cptr: CPtr) -> Result<()> {
        let (n, i, d) = self.retype_destination(cptr);
        sel4_cnode_delete(n, i, d)
    }

    /// Save the TCB's implicit reply capability into `dest`
    /// (SPEC_FULL.md §4.9 "Reply-capability lifecycle").
    pub fn save_reply_cap(&self, dest: CPtr) -> Result<()> {
        let (n, i, d) = self.retype_destination(dest);
        sel4_cnode_save_caller(n, i, d)
    }
}

bitflags! {
    /// Capability rights bundle, matching `seL4_CapRights_t`.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct CapRights: u8 {
        const GRANT_REPLY = 0b0001;
        const GRANT       = 0b0010;
        const READ        = 0b0100;
        const WRITE       = 0b1000;
    }
}

impl CapRights {
    pub const ALL: CapRights = CapRights::GRANT_REPLY.union(CapRights::GRANT).union(CapRights::READ).union(CapRights::WRITE);
    pub const READ_ONLY: CapRights = CapRights::READ;
    pub const READ_WRITE: CapRights = CapRights::READ.union(CapRights::WRITE);
}

#[cfg(feature = "runtime")]
fn sel4_untyped_retype(
    ut_cap: CPtr,
    obj_type: ObjectType,
    size_bits: u8,
    dest_node: CPtr,
    dest_index: CPtr,
    dest_depth: u8,
) -> Result<()> {
    use sel4_platform::adapter as sys;
    let ty = object_type_raw(obj_type);
    let err = unsafe {
        sys::seL4_Untyped_Retype(ut_cap, ty, size_bits as usize, dest_node, dest_index as usize, dest_depth as usize, dest_index, 1)
    };
    check(err)
}

#[cfg(not(feature = "runtime"))]
fn sel4_untyped_retype(
    _ut_cap: CPtr,
    _obj_type: ObjectType,
    _size_bits: u8,
    _dest_node: CPtr,
    _dest_index: CPtr,
    _dest_depth: u8,
) -> Result<()> {
    Ok(())
}

#[cfg(feature = "runtime")]
pub(crate) fn object_type_raw(obj_type: ObjectType) -> usize {
    use sel4_platform::adapter as sys;
    match obj_type {
        ObjectType::Untyped => sys::seL4_UntypedObject,
        ObjectType::CNode => sys::seL4_CapTableObject,
        ObjectType::Endpoint => sys::seL4_EndpointObject,
        ObjectType::Notification => sys::seL4_NotificationObject,
        ObjectType::Tcb => sys::seL4_TCBObject,
        ObjectType::Reply => sys::seL4_ReplyObject,
        ObjectType::Frame => sys::seL4_ARCH_4KPage,
        ObjectType::PageTable => sys::seL4_ARCH_PageTableObject,
        ObjectType::PageDirectory => sys::seL4_ARCH_PageDirectoryObject,
        ObjectType::PageUpperDirectory => sys::seL4_ARCH_PageUpperDirectoryObject,
        ObjectType::VSpace => sys::seL4_ARCH_VSpaceObject,
    }
}

#[cfg(feature = "runtime")]
fn sel4_cnode_copy(dn: CPtr, di: CPtr, dd: u8, sn: CPtr, si: CPtr, sd: u8, rights: CapRights) -> Result<()> {
    use sel4_platform::adapter as sys;
    let r = sys::seL4_CapRights_new(
        rights.contains(CapRights::GRANT_REPLY),
        rights.contains(CapRights::GRANT),
        rights.contains(CapRights::READ),
        rights.contains(CapRights::WRITE),
    );
    let err = unsafe { sys::seL4_CNode_Copy(dn, di, dd, sn, si, sd, r) };
    check(err)
}

#[cfg(not(feature = "runtime"))]
fn sel4_cnode_copy(_dn: CPtr, _di: CPtr, _dd: u8, _sn: CPtr, _si: CPtr, _sd: u8, _rights: CapRights) -> Result<()> {
    Ok(())
}

#[cfg(feature = "runtime")]
fn sel4_cnode_mint(dn: CPtr, di: CPtr, dd: u8, sn: CPtr, si: CPtr, sd: u8, rights: CapRights, badge: usize) -> Result<()> {
    use sel4_platform::adapter as sys;
    let r = sys::seL4_CapRights_new(
        rights.contains(CapRights::GRANT_REPLY),
        rights.contains(CapRights::GRANT),
        rights.contains(CapRights::READ),
        rights.contains(CapRights::WRITE),
    );
    let err = unsafe { sys::seL4_CNode_Mint(dn, di, dd, sn, si, sd, r, badge) };
    check(err)
}

#[cfg(not(feature = "runtime"))]
fn sel4_cnode_mint(_dn: CPtr, _di: CPtr, _dd: u8, _sn: CPtr, _si: CPtr, _sd: u8, _rights: CapRights, _badge: usize) -> Result<()> {
    Ok(())
}

#[cfg(feature = "runtime")]
fn sel4_cnode_move(dn: CPtr, di: CPtr, dd: u8, sn: CPtr, si: CPtr, sd: u8) -> Result<()> {
    use sel4_platform::adapter as sys;
    let err = unsafe { sys::seL4_CNode_Move(dn, di, dd, sn, si, sd) };
    check(err)
}

#[cfg(not(feature = "runtime"))]
fn sel4_cnode_move(_dn: CPtr, _di: CPtr, _dd: u8, _sn: CPtr, _si: CPtr, _sd: u8) -> Result<()> {
    Ok(())
}

#[cfg(feature = "runtime")]
fn sel4_cnode_delete(n: CPtr, i: CPtr, d: u8) -> Result<()> {
    use sel4_platform::adapter as sys;
    let err = unsafe { sys::seL4_CNode_Delete(n, i, d) };
    check(err)
}

#[cfg(not(feature = "runtime"))]
fn sel4_cnode_delete(_n: CPtr, _i: CPtr, _d: u8) -> Result<()> {
    Ok(())
}

#[cfg(feature = "runtime")]
fn sel4_cnode_save_caller(n: CPtr, i: CPtr, d: u8) -> Result<()> {
    use sel4_platform::adapter as sys;
    let err = unsafe { sys::seL4_CNode_SaveCaller(n, i, d) };
    check(err)
}

#[cfg(not(feature = "runtime"))]
fn sel4_cnode_save_caller(_n: CPtr, _i: CPtr, _d: u8) -> Result<()> {
    Ok(())
}

#[cfg(feature = "runtime")]
fn check(err: sel4_platform::adapter::Error) -> Result<()> {
    if sel4_platform::adapter::is_ok(err) {
        Ok(())
    } else {
        Err(CoreError::Kernel(err as i32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootinfo::mock_bootinfo;

    fn fresh(top_bits: u8, bottom_bits: u8, watermark: usize) -> (CSpace, UntypedTable) {
        let bi = mock_bootinfo();
        let mut ut = UntypedTable::new(bi.memory_bounds().unwrap().0, 4096);
        for u in bi.non_device_untyped() {
            ut.add_untyped_range(u.paddr, u.cap, 1usize << (u.size_bits - 12));
        }
        let cs = CSpace::new_two_level(1000, top_bits, bottom_bits, watermark);
        (cs, ut)
    }

    #[test]
    fn alloc_then_free_then_alloc_returns_same_slot() {
        let (mut cs, mut ut) = fresh(2, 2, 2);
        let a = cs.alloc_slot(&mut ut).unwrap();
        let b = cs.alloc_slot(&mut ut).unwrap();
        assert_ne!(a, b);
        cs.free_slot(b);
        let c = cs.alloc_slot(&mut ut).unwrap();
        assert_eq!(b, c);
    }

    #[test]
    fn fill_and_drain_cspace() {
        let (mut cs, mut ut) = fresh(2, 2, 1);
        let total = cs.total_slots();
        let mut allocated = Vec::new();
        // Reserve one watermark slot's worth of headroom; try to fill the rest.
        loop {
            match cs.alloc_slot(&mut ut) {
                Ok(cptr) => allocated.push(cptr),
                Err(CoreError::OutOfSlots) => break,
                Err(e) => panic!("unexpected error {e:?}"),
            }
            if allocated.len() > total {
                panic!("allocated more slots than exist");
            }
        }
        let unique: alloc::collections::BTreeSet<_> = allocated.iter().copied().collect();
        assert_eq!(unique.len(), allocated.len(), "all allocated cptrs must be distinct");

        let last = *allocated.last().unwrap();
        cs.free_slot(last);
        let reused = cs.alloc_slot(&mut ut).unwrap();
        assert_eq!(reused, last);
    }

    #[test]
    fn guard_depth_for_two_level() {
        let cs = CSpace::new_two_level(1, 8, 8, 4);
        assert_eq!(cs.guard_depth(), 64 - 16);
    }

    #[test]
    fn one_level_compose_is_identity() {
        let mut cs = CSpace::new_one_level(1, 4, 2);
        let mut ut = UntypedTable::new(0, 4096);
        ut.add_untyped_range(0, 50, 16);
        let a = cs.alloc_slot(&mut ut).unwrap();
        assert!(a < 16);
    }
}
