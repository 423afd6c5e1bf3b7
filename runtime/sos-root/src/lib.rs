//! Root task core: untyped memory, capability space, address space and
//! process management for the initial userspace thread (SPEC_FULL.md §1).
//!
//! Structured the way `cap_broker` structures itself: one module per
//! concern, re-exported flat off the crate root, with a single bundling
//! context type (`RootTaskContext`, in `bootstrap`) other code constructs
//! once at startup and threads through everything else.

#![no_std]
#![cfg_attr(not(test), allow(dead_code))]

#[cfg(test)]
#[macro_use]
extern crate std;

extern crate alloc;

mod bitmap;
mod bootinfo;
mod bootstrap;
mod config;
mod cpio;
mod cspace;
mod dma;
mod elf_load;
mod error;
mod frame_table;
mod irq;
mod logging;
mod mapping;
mod process;
mod syscall_loop;
mod untyped;

pub use bootinfo::{BootInfo, CPtr, SlotRegion, UntypedDescriptor};
pub use bootstrap::{bootstrap, BootstrapReport, RootTaskContext};
pub use config::{RootTaskConfig, ENDPOINT_BITS, PAGE_BITS, PAGE_SIZE};
pub use cspace::{CSpace, CapRights, ObjectType};
pub use dma::DmaPool;
pub use elf_load::{load_elf, LoadedImage};
pub use error::{CoreError, Result};
pub use frame_table::{FrameRef, FrameTable};
pub use irq::IrqDispatcher;
pub use mapping::{map_device, map_frame_with_slots, map_page, Permissions, VSpace};
pub use process::{build_initial_stack, load_and_start, setup_process_stack, Process};
pub use syscall_loop::{run_once, SyscallHandler, SyscallOutcome, SyscallRequest};
pub use untyped::{Ut, UntypedTable};

#[cfg(not(feature = "runtime"))]
pub use bootinfo::mock_bootinfo;

pub use logging::init as init_logging;
#[cfg(not(feature = "runtime"))]
pub use logging::mock_log_lines;

#[cfg(test)]
mod integration_tests {
    use super::*;
    use log::LevelFilter;

    /// End-to-end smoke test: bootstrap, then build a child process's
    /// stack and load a tiny synthetic ELF image into its vspace. This is
    /// the closest thing to "boot the root task" this crate can exercise
    /// without a real kernel underneath it.
    #[test]
    fn bootstrap_then_stage_a_child_process() {
        init_logging(LevelFilter::Info);
        let bi = mock_bootinfo();
        let cfg = RootTaskConfig::tiny_for_tests();
        let mut ctx = bootstrap(&bi, &cfg).unwrap();

        let child_vspace = VSpace::new(bi.init_vspace, 0x4000_0000, 0x10_0000);
        let stack_top = 0x4000_0000 + 0x10_0000;
        let sp = process::setup_process_stack(&mut ctx.cspace, &mut ctx.untyped, &child_vspace, &mut ctx.frames, stack_top, 0x5000_0000, 0)
            .unwrap();
        assert!(sp < stack_top);
        assert!(sp > stack_top - 4096);
    }
}
