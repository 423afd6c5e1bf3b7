//! Shared-notification IRQ multiplexer (SPEC_FULL.md §4.6), grounded on
//! `original_source/sos/src/irq.c`.
//!
//! All interrupts are delivered through one shared `Notification` object.
//! Its badge is split into a flag bit (set for IRQ deliveries, clear for
//! ordinary IPC on the same endpoint-notification pair) and one bit per
//! registered IRQ identifier. A single `seL4_Wait`/`seL4_Recv` can therefore
//! wake up with several IRQs coalesced into one badge; dispatch always walks
//! the set bits from lowest to highest so a single delivery services every
//! pending IRQ in a fixed order, never starving the high bits.

use crate::bitmap::Bitmap;
use crate::bootinfo::CPtr;
use crate::cspace::CSpace;
use crate::error::{CoreError, Result};
use crate::untyped::UntypedTable;
use alloc::vec::Vec;
use log::{trace, warn};

/// A registered IRQ's callback: `(opaque_data, irq_number, handler_cap)`,
/// mirroring the C ABI `void (*callback)(void *data, int irq, seL4_CPtr
/// handler)` the IRQ protocol specifies (SPEC_FULL.md §6 "IRQ protocol to
/// callbacks"). The callback acknowledges the IRQ itself through
/// `handler_cap` before returning; `dispatch` does not ack on its behalf.
pub type IrqCallback = fn(data: *mut (), irq: u32, handler_cap: CPtr);

struct Registration {
    irq_number: u32,
    handler_cap: CPtr,
    notification_cap: CPtr,
    callback: IrqCallback,
    data: *mut (),
}

pub struct IrqDispatcher {
    notification: CPtr,
    ident_bits: u32,
    allocated: Bitmap,
    registrations: Vec<Option<Registration>>,
}

impl IrqDispatcher {
    pub fn new(notification: CPtr, ident_bits: u32) -> Self {
        Self {
            notification,
            ident_bits,
            allocated: Bitmap::new_clear(ident_bits as usize),
            registrations: (0..ident_bits).map(|_| None).collect(),
        }
    }

    /// Bit position marking an IRQ delivery vs. an ordinary IPC badge.
    pub fn flag_bit(&self) -> u32 {
        self.ident_bits
    }

    fn badge_for(&self, ident: usize) -> usize {
        (1usize << self.flag_bit()) | (1usize << ident)
    }

    /// Register interest in `irq_number`, returning the ident bit assigned
    /// to it. Every step that allocates a resource is undone in reverse if a
    /// later step fails, so a failed registration leaves no dangling caps or
    /// reserved bits behind.
    pub fn register(
        &mut self,
        cspace: &mut CSpace,
        ut: &mut UntypedTable,
        irq_control: CPtr,
        irq_number: u32,
        callback: IrqCallback,
        data: *mut (),
    ) -> Result<u32> {
        let ident = self.allocated.first_free().ok_or(CoreError::OutOfBits)? as u32;
        self.allocated.set(ident as usize);

        let handler_slot = match cspace.alloc_slot(ut) {
            Ok(s) => s,
            Err(e) => {
                self.allocated.clear(ident as usize);
                return Err(e);
            }
        };
        let (dest_node, dest_index, dest_depth) = cspace.retype_destination(handler_slot);
        if let Err(e) = sel4_irq_control_get(irq_control, irq_number, dest_node, dest_index, dest_depth) {
            cspace.free_slot(handler_slot);
            self.allocated.clear(ident as usize);
            return Err(e);
        }

        let notify_slot = match cspace.alloc_slot(ut) {
            Ok(s) => s,
            Err(e) => {
                cspace.free_slot(handler_slot);
                self.allocated.clear(ident as usize);
                return Err(e);
            }
        };
        let badge = self.badge_for(ident as usize);
        if let Err(e) = cspace.mint(notify_slot, self.notification, crate::cspace::CapRights::READ_WRITE, badge) {
            cspace.free_slot(notify_slot);
            cspace.free_slot(handler_slot);
            self.allocated.clear(ident as usize);
            return Err(e);
        }

        if let Err(e) = sel4_irq_handler_set_notification(handler_slot, notify_slot) {
            cspace.free_slot(notify_slot);
            cspace.free_slot(handler_slot);
            self.allocated.clear(ident as usize);
            return Err(e);
        }

        if let Err(e) = sel4_irq_handler_ack(handler_slot) {
            cspace.free_slot(notify_slot);
            cspace.free_slot(handler_slot);
            self.allocated.clear(ident as usize);
            return Err(e);
        }

        trace!("irq {irq_number} registered at ident bit {ident}, badge {badge:#x}");
        self.registrations[ident as usize] =
            Some(Registration { irq_number, handler_cap: handler_slot, notification_cap: notify_slot, callback, data });
        Ok(ident)
    }

    /// Walk the ident bits set in `badge`, lowest first, invoking each
    /// registered ident's own stored callback with `(data, irq_number,
    /// handler_cap)` (SPEC_FULL.md §6 "IRQ protocol to callbacks"). The
    /// callback, not this dispatcher, acknowledges the IRQ.
    pub fn dispatch(&self, badge: usize) {
        let mut from = 0;
        while let Some(bit) = self.next_set_ident(badge, from) {
            if let Some(reg) = &self.registrations[bit] {
                (reg.callback)(reg.data, reg.irq_number, reg.handler_cap);
            } else {
                warn!("dispatch saw set ident bit {bit} with no registration");
            }
            from = bit + 1;
        }
    }

    fn next_set_ident(&self, badge: usize, from: usize) -> Option<usize> {
        (from..self.ident_bits as usize).find(|&i| badge & (1 << i) != 0)
    }
}

#[cfg(feature = "runtime")]
fn sel4_irq_control_get(irq_control: CPtr, irq_number: u32, dest_node: CPtr, dest_index: CPtr, dest_depth: u8) -> Result<()> {
    use sel4_platform::adapter as sys;
    let err = unsafe {
        sys::seL4_IRQControl_Get(irq_control, irq_number as usize, dest_node, dest_index, dest_depth as usize)
    };
    if sys::is_ok(err) {
        Ok(())
    } else {
        Err(CoreError::Kernel(err as i32))
    }
}

#[cfg(not(feature = "runtime"))]
fn sel4_irq_control_get(_irq_control: CPtr, _irq_number: u32, _dest_node: CPtr, _dest_index: CPtr, _dest_depth: u8) -> Result<()> {
    Ok(())
}

#[cfg(feature = "runtime")]
fn sel4_irq_handler_set_notification(handler: CPtr, notification: CPtr) -> Result<()> {
    use sel4_platform::adapter as sys;
    let err = unsafe { sys::seL4_IRQHandler_SetNotification(handler, notification) };
    if sys::is_ok(err) {
        Ok(())
    } else {
        Err(CoreError::Kernel(err as i32))
    }
}

#[cfg(not(feature = "runtime"))]
fn sel4_irq_handler_set_notification(_handler: CPtr, _notification: CPtr) -> Result<()> {
    Ok(())
}

#[cfg(feature = "runtime")]
fn sel4_irq_handler_ack(handler: CPtr) -> Result<()> {
    use sel4_platform::adapter as sys;
    let err = unsafe { sys::seL4_IRQHandler_Ack(handler) };
    if sys::is_ok(err) {
        Ok(())
    } else {
        Err(CoreError::Kernel(err as i32))
    }
}

#[cfg(not(feature = "runtime"))]
fn sel4_irq_handler_ack(_handler: CPtr) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootinfo::mock_bootinfo;

    fn noop_callback(_data: *mut (), _irq: u32, _handler: CPtr) {}

    fn harness() -> (CSpace, UntypedTable, IrqDispatcher) {
        let bi = mock_bootinfo();
        let mut ut = UntypedTable::new(bi.memory_bounds().unwrap().0, 1 << 16);
        for u in bi.non_device_untyped() {
            ut.add_untyped_range(u.paddr, u.cap, 1usize << (u.size_bits - crate::config::PAGE_BITS));
        }
        let cs = CSpace::new_two_level(bi.init_cnode, 6, 6, 4);
        let irq = IrqDispatcher::new(100, 8);
        (cs, ut, irq)
    }

    #[test]
    fn register_assigns_increasing_ident_bits() {
        let (mut cs, mut ut, mut irq) = harness();
        let a = irq.register(&mut cs, &mut ut, 5, 33, noop_callback, core::ptr::null_mut()).unwrap();
        let b = irq.register(&mut cs, &mut ut, 5, 34, noop_callback, core::ptr::null_mut()).unwrap();
        assert_eq!(a, 0);
        assert_eq!(b, 1);
    }

    #[test]
    fn badge_combines_flag_bit_and_ident_bit() {
        let (mut cs, mut ut, mut irq) = harness();
        let ident = irq.register(&mut cs, &mut ut, 5, 33, noop_callback, core::ptr::null_mut()).unwrap();
        let badge = irq.badge_for(ident as usize);
        assert_eq!(badge, (1 << irq.flag_bit()) | 1);
    }

    #[test]
    fn exhausting_ident_bits_errors() {
        let (mut cs, mut ut, mut irq) = tiny_harness();
        for i in 0..4 {
            irq.register(&mut cs, &mut ut, 5, i, noop_callback, core::ptr::null_mut()).unwrap();
        }
        let err = irq.register(&mut cs, &mut ut, 5, 99, noop_callback, core::ptr::null_mut()).unwrap_err();
        assert_eq!(err, CoreError::OutOfBits);
    }

    fn tiny_harness() -> (CSpace, UntypedTable, IrqDispatcher) {
        let bi = mock_bootinfo();
        let mut ut = UntypedTable::new(bi.memory_bounds().unwrap().0, 1 << 16);
        for u in bi.non_device_untyped() {
            ut.add_untyped_range(u.paddr, u.cap, 1usize << (u.size_bits - crate::config::PAGE_BITS));
        }
        let cs = CSpace::new_two_level(bi.init_cnode, 6, 6, 4);
        let irq = IrqDispatcher::new(100, 4);
        (cs, ut, irq)
    }

    fn record_irq_callback(data: *mut (), irq: u32, _handler: CPtr) {
        let seen = unsafe { &mut *(data as *mut Vec<u32>) };
        seen.push(irq);
    }

    #[test]
    fn dispatch_visits_set_bits_ascending() {
        let (mut cs, mut ut, mut irq) = harness();
        let mut seen: Vec<u32> = Vec::new();
        let seen_ptr = &mut seen as *mut Vec<u32> as *mut ();
        let a = irq.register(&mut cs, &mut ut, 5, 10, record_irq_callback, seen_ptr).unwrap();
        let b = irq.register(&mut cs, &mut ut, 5, 20, record_irq_callback, seen_ptr).unwrap();
        let c = irq.register(&mut cs, &mut ut, 5, 30, record_irq_callback, seen_ptr).unwrap();
        let badge = irq.badge_for(a as usize) | irq.badge_for(c as usize);
        irq.dispatch(badge);
        assert_eq!(seen, alloc::vec![10, 30]);
        let _ = b;
    }
}
