//! Boot-time tunables collected into one value (SPEC_FULL.md §4.13).
//!
//! Production code uses `RootTaskConfig::default()`; tests construct small
//! configs (e.g. a 2-level, few-bit-per-level cspace) to exercise boundary
//! behaviours without needing gigabytes of mock untyped memory.

/// Page size in bytes, fixed by the hardware (4 KiB pages throughout).
pub const PAGE_BITS: u8 = 12;
pub const PAGE_SIZE: usize = 1 << PAGE_BITS;

/// Smallest object the untyped allocator will hand out: a seL4 endpoint.
pub const ENDPOINT_BITS: u8 = 4;

#[derive(Debug, Clone, Copy)]
pub struct RootTaskConfig {
    /// log2 of the number of slots in the cspace's top-level CNode.
    pub cnode_top_bits: u8,
    /// log2 of the number of slots in each bottom-level CNode.
    pub cnode_bottom_bits: u8,
    /// Number of slots kept pre-allocated to break the allocation cycle (§4.2).
    pub watermark_slots: usize,
    /// Size in bytes of the DMA pool's backing large page.
    pub dma_region_size: usize,
    /// Number of low badge bits reserved for IRQ identifiers (§4.6).
    pub irq_ident_bits: u32,
    /// Virtual address where the frame-table's frame-data window begins.
    pub frame_data_base: usize,
    /// Virtual address where the DMA region is mapped.
    pub dma_vaddr_base: usize,
    /// Virtual address where device MMIO mappings are bumped from.
    pub device_vaddr_base: usize,
    /// Virtual address of the UT table's own bookkeeping window.
    pub ut_table_vaddr_base: usize,
    /// log2 of the number of slots in a freshly created child's one-level
    /// cspace (SPEC_FULL.md §4.8): just the endpoint and a little headroom,
    /// since a child's own syscall surface grows its cspace separately.
    pub child_cspace_bits: u8,
    /// log2 size of the object a freshly created child's VSpace root is
    /// retyped from; architecture-specific on real hardware, fixed here
    /// since this port only ever retypes against the mock's untyped table.
    pub child_vspace_size_bits: u8,
    /// log2 size of the object a freshly created child's TCB is retyped from.
    pub child_tcb_size_bits: u8,
    /// Base virtual address of a freshly created child's own address space.
    pub child_image_base: usize,
    /// Size of a freshly created child's address space window; the top page
    /// is reserved for its IPC buffer, the page below that for its stack.
    pub child_image_size: usize,
    /// Scheduling priority assigned to a freshly created child.
    pub child_priority: u8,
}

impl Default for RootTaskConfig {
    fn default() -> Self {
        Self {
            cnode_top_bits: 8,
            cnode_bottom_bits: 8,
            watermark_slots: 4,
            dma_region_size: 2 * 1024 * 1024,
            irq_ident_bits: 16,
            frame_data_base: 0x0000_6000_0000,
            dma_vaddr_base: 0x0000_7000_0000,
            device_vaddr_base: 0x0000_7100_0000,
            ut_table_vaddr_base: 0x0000_7200_0000,
            child_cspace_bits: 6,
            child_vspace_size_bits: PAGE_BITS,
            child_tcb_size_bits: 10,
            child_image_base: 0x0000_0040_0000,
            child_image_size: 0x0000_0100_0000,
            child_priority: 100,
        }
    }
}

impl RootTaskConfig {
    /// A deliberately tiny config for unit tests: a two-level cspace with
    /// very few slots per level, so fill/drain scenarios run fast.
    pub fn tiny_for_tests() -> Self {
        Self {
            cnode_top_bits: 2,
            cnode_bottom_bits: 2,
            watermark_slots: 2,
            dma_region_size: 2 * 1024 * 1024,
            irq_ident_bits: 8,
            ..Self::default()
        }
    }

    pub fn total_slots(&self) -> usize {
        1usize << (self.cnode_top_bits + self.cnode_bottom_bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiny_config_has_expected_slot_count() {
        let cfg = RootTaskConfig::tiny_for_tests();
        assert_eq!(cfg.total_slots(), 16);
    }

    #[test]
    fn default_config_is_much_larger() {
        let cfg = RootTaskConfig::default();
        assert_eq!(cfg.total_slots(), 1 << 16);
    }
}
