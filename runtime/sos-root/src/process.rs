//! Process records and initial stack staging (SPEC_FULL.md §4.8), grounded
//! on `init_process_stack`/`stack_write` in `original_source/sos/src/main.c`.

use crate::bootinfo::{BootInfo, CPtr};
use crate::bootstrap::RootTaskContext;
use crate::config::{RootTaskConfig, PAGE_BITS};
use crate::cspace::{CSpace, CapRights, ObjectType};
use crate::elf_load::load_elf;
use crate::error::{CoreError, Result};
use crate::frame_table::FrameTable;
use crate::mapping::{map_page, Permissions, VSpace};
use crate::untyped::UntypedTable;
use alloc::vec::Vec;

/// Slot a freshly created child's endpoint cap is minted into, within its own
/// one-level cspace. Fixed rather than allocated because the child's cspace
/// is built fresh for exactly this purpose - there is nothing else competing
/// for low slot numbers yet.
const CHILD_ENDPOINT_SLOT: CPtr = 1;

const WORD_SIZE: usize = core::mem::size_of::<usize>();

/// System-V auxiliary vector tags this root task actually populates. Every
/// other tag (there are dozens in a full libc ABI) is left unset, matching
/// what the original root task hands its children.
const AT_NULL: usize = 0;
const AT_SYSINFO: usize = 32;
const AT_PAGESZ: usize = 6;
const AT_SEL4_IPC_BUFFER_PTR: usize = 201;

/// Bookkeeping for one child process: its own cspace/vspace roots and the
/// resources it owns. Real scheduling state (TCB priority, scheduling
/// context) lives behind the platform seam; this struct is the root task's
/// side of the relationship.
pub struct Process {
    pub tcb: CPtr,
    pub cspace_root: CPtr,
    pub vspace: VSpace,
    pub ipc_buffer_vaddr: usize,
    pub stack_top: usize,
}

/// Write `value` at `ptr[index]` (where `index` may be negative, indexing
/// backward from `ptr`) and return `index - 1`, mirroring the original's
/// `stack_write` helper used to build the aux vector/argv/envp from the top
/// of the stack downward.
fn stack_write(buf: &mut [usize], index: isize, value: usize) -> isize {
    let len = buf.len() as isize;
    buf[(len + index) as usize] = value;
    index - 1
}

/// Stage the initial stack for a child about to start running: aux vector,
/// a null-terminated (empty) envp, a null-terminated (empty) argv, and
/// `argc = 0`, written backward from the top of a scratch buffer exactly the
/// way `init_process_stack` builds it, then mapped into the child's address
/// space as its final stack page.
///
/// `sysinfo` is `AT_SYSINFO`'s value - the virtual address of the child
/// image's `__vsyscall` table (SPEC_FULL.md §4.8 step 8, §6), or `0` if the
/// image carries no such section (`elf_load::LoadedImage::vsyscall_sysinfo`).
///
/// Returns the final (negative) word index `stack_write` left behind, the
/// same value the original adds to `stack_top` (in words) to get the
/// initial stack pointer - callers should not reinterpret it as an array
/// subscript themselves.
pub fn build_initial_stack(scratch: &mut [usize], ipc_buffer_vaddr: usize, page_size: usize, sysinfo: usize) -> isize {
    let mut index: isize = -2;

    // AT_NULL pair terminates the aux vector.
    index = stack_write(scratch, index, AT_NULL);
    index = stack_write(scratch, index, AT_NULL);

    index = stack_write(scratch, index, ipc_buffer_vaddr);
    index = stack_write(scratch, index, AT_SEL4_IPC_BUFFER_PTR);

    index = stack_write(scratch, index, page_size);
    index = stack_write(scratch, index, AT_PAGESZ);

    index = stack_write(scratch, index, sysinfo);
    index = stack_write(scratch, index, AT_SYSINFO);

    index = stack_write(scratch, index, AT_NULL); // envp terminator
    index = stack_write(scratch, index, AT_NULL); // argv terminator
    index = stack_write(scratch, index, 0); // argc = 0

    index
}

/// Allocate a process's stack frame, build its initial contents through the
/// frame table's own mapped window (so the root task never needs a second,
/// temporary local mapping), map it as the top page of the child's stack
/// region, and return the resulting initial stack pointer.
pub fn setup_process_stack(
    cspace: &mut CSpace,
    ut: &mut UntypedTable,
    vspace: &VSpace,
    frames: &mut FrameTable,
    stack_top_vaddr: usize,
    ipc_buffer_vaddr: usize,
    sysinfo: usize,
) -> Result<usize> {
    let page_size = 1usize << crate::config::PAGE_BITS;
    let frame = frames.alloc(cspace, ut, vspace)?;

    let words_per_page = page_size / WORD_SIZE;
    let mut scratch: Vec<usize> = alloc::vec![0usize; words_per_page];
    let final_index = build_initial_stack(&mut scratch, ipc_buffer_vaddr, page_size, sysinfo);

    let bytes = frames.data_mut(frame);
    for (i, word) in scratch.iter().enumerate() {
        bytes[i * WORD_SIZE..(i + 1) * WORD_SIZE].copy_from_slice(&word.to_ne_bytes());
    }

    let frame_cap = frames.cap(frame);
    let stack_page_vaddr = stack_top_vaddr - page_size;
    map_page(cspace, ut, vspace, frame_cap, stack_page_vaddr, Permissions::READ_WRITE)?;

    Ok((stack_top_vaddr as isize + final_index * WORD_SIZE as isize) as usize)
}

/// Load `app_name` out of `cpio_archive` and start it as a brand-new child
/// process (SPEC_FULL.md §4.8 Contract `load_and_start(app_name, endpoint)`):
/// retype a VSpace root and assign it an ASID, build the child's own
/// one-level cspace and mint a badged endpoint into it, create and map an
/// IPC buffer frame, retype and configure a TCB against that cspace/vspace,
/// load the ELF image found in the archive, stage its initial stack, then
/// write its entry PC/SP and resume it.
///
/// Grounded on `original_source/sos/src/main.c`'s `start_process`: locate the
/// ELF via `cpio_get_file`, `elf_load` it, `sos_stack_write` the initial
/// stack, then `seL4_TCB_WriteRegisters` + `seL4_TCB_Resume`.
pub fn load_and_start(
    ctx: &mut RootTaskContext,
    bi: &BootInfo,
    cfg: &RootTaskConfig,
    cpio_archive: &[u8],
    app_name: &str,
    endpoint: CPtr,
    badge: usize,
) -> Result<Process> {
    let image_bytes = crate::cpio::lookup(cpio_archive, app_name).ok_or(CoreError::AppNotFound)?;

    // VSpace root, retyped fresh and assigned its own ASID.
    let vspace_ut = ctx.untyped.alloc(cfg.child_vspace_size_bits, &mut ctx.cspace)?;
    let vspace_root = ctx.cspace.alloc_slot(&mut ctx.untyped)?;
    ctx.cspace.untyped_retype(&vspace_ut, vspace_root, ObjectType::VSpace, cfg.child_vspace_size_bits)?;
    sel4_asid_pool_assign(bi.init_asid_pool, vspace_root)?;
    let child_vspace = VSpace::new(vspace_root, cfg.child_image_base, cfg.child_image_size);

    // A one-level cspace, just large enough for the child's endpoint plus
    // headroom, and the guard depth the kernel needs to resolve it fully.
    let cnode_ut = ctx.untyped.alloc(cfg.child_cspace_bits, &mut ctx.cspace)?;
    let cnode_root = ctx.cspace.alloc_slot(&mut ctx.untyped)?;
    ctx.cspace.untyped_retype(&cnode_ut, cnode_root, ObjectType::CNode, cfg.child_cspace_bits)?;
    let child_guard_depth = CSpace::new_one_level(cnode_root, cfg.child_cspace_bits, 0).guard_depth();

    // A badged endpoint, minted directly into the child's cspace - the root
    // task's own cspace can resolve `endpoint` as a source, but the
    // destination lives in a cspace it has no slot layout for, hence
    // `mint_into` rather than `mint`.
    ctx.cspace.mint_into(cnode_root, CHILD_ENDPOINT_SLOT, cfg.child_cspace_bits, endpoint, CapRights::READ_WRITE | CapRights::GRANT, badge)?;

    // IPC buffer: one frame, mapped at the top of the child's window.
    let page_size = 1usize << PAGE_BITS;
    let ipc_ut = ctx.untyped.alloc(PAGE_BITS, &mut ctx.cspace)?;
    let ipc_frame = ctx.cspace.alloc_slot(&mut ctx.untyped)?;
    ctx.cspace.untyped_retype(&ipc_ut, ipc_frame, ObjectType::Frame, PAGE_BITS)?;
    let ipc_buffer_vaddr = cfg.child_image_base + cfg.child_image_size - page_size;
    map_page(&mut ctx.cspace, &mut ctx.untyped, &child_vspace, ipc_frame, ipc_buffer_vaddr, Permissions::READ_WRITE)?;

    // TCB: retyped, then pointed at the new cspace/vspace and given its IPC
    // buffer and priority.
    let tcb_ut = ctx.untyped.alloc(cfg.child_tcb_size_bits, &mut ctx.cspace)?;
    let tcb = ctx.cspace.alloc_slot(&mut ctx.untyped)?;
    ctx.cspace.untyped_retype(&tcb_ut, tcb, ObjectType::Tcb, cfg.child_tcb_size_bits)?;
    sel4_tcb_set_space(tcb, cnode_root, child_guard_depth, vspace_root)?;
    sel4_tcb_set_ipc_buffer(tcb, ipc_buffer_vaddr, ipc_frame)?;
    sel4_tcb_set_priority(tcb, bi.init_tcb, cfg.child_priority)?;

    // Load the binary and stage its initial stack one page below the IPC
    // buffer.
    let image = load_elf(&image_bytes, &mut ctx.cspace, &mut ctx.untyped, &child_vspace, &mut ctx.frames)?;
    let stack_top = ipc_buffer_vaddr;
    let sp = setup_process_stack(&mut ctx.cspace, &mut ctx.untyped, &child_vspace, &mut ctx.frames, stack_top, ipc_buffer_vaddr, image.vsyscall_sysinfo)?;

    sel4_write_entry_and_resume(tcb, image.entry_point, sp)?;

    Ok(Process { tcb, cspace_root: cnode_root, vspace: child_vspace, ipc_buffer_vaddr, stack_top })
}

#[cfg(feature = "runtime")]
fn sel4_asid_pool_assign(asid_pool: CPtr, vspace_root: CPtr) -> Result<()> {
    use sel4_platform::adapter as sys;
    let err = unsafe { sys::seL4_ARCH_ASIDPool_Assign(asid_pool, vspace_root) };
    if sys::is_ok(err) {
        Ok(())
    } else {
        Err(CoreError::Kernel(err as i32))
    }
}

#[cfg(not(feature = "runtime"))]
fn sel4_asid_pool_assign(_asid_pool: CPtr, _vspace_root: CPtr) -> Result<()> {
    Ok(())
}

#[cfg(feature = "runtime")]
fn sel4_tcb_set_space(tcb: CPtr, cnode_root: CPtr, guard_depth: usize, vspace_root: CPtr) -> Result<()> {
    use sel4_platform::adapter as sys;
    let guard = unsafe { sys::seL4_CNode_CapData_new(0, guard_depth) };
    let err = unsafe { sys::seL4_TCB_SetSpace(tcb, 0, cnode_root, guard, vspace_root, 0) };
    if sys::is_ok(err) {
        Ok(())
    } else {
        Err(CoreError::Kernel(err as i32))
    }
}

#[cfg(not(feature = "runtime"))]
fn sel4_tcb_set_space(_tcb: CPtr, _cnode_root: CPtr, _guard_depth: usize, _vspace_root: CPtr) -> Result<()> {
    Ok(())
}

#[cfg(feature = "runtime")]
fn sel4_tcb_set_ipc_buffer(tcb: CPtr, buffer_addr: usize, buffer_frame: CPtr) -> Result<()> {
    use sel4_platform::adapter as sys;
    let err = unsafe { sys::seL4_TCB_SetIPCBuffer(tcb, buffer_addr, buffer_frame) };
    if sys::is_ok(err) {
        Ok(())
    } else {
        Err(CoreError::Kernel(err as i32))
    }
}

#[cfg(not(feature = "runtime"))]
fn sel4_tcb_set_ipc_buffer(_tcb: CPtr, _buffer_addr: usize, _buffer_frame: CPtr) -> Result<()> {
    Ok(())
}

#[cfg(feature = "runtime")]
fn sel4_tcb_set_priority(tcb: CPtr, authority: CPtr, priority: u8) -> Result<()> {
    use sel4_platform::adapter as sys;
    let err = unsafe { sys::seL4_TCB_SetPriority(tcb, authority, priority) };
    if sys::is_ok(err) {
        Ok(())
    } else {
        Err(CoreError::Kernel(err as i32))
    }
}

#[cfg(not(feature = "runtime"))]
fn sel4_tcb_set_priority(_tcb: CPtr, _authority: CPtr, _priority: u8) -> Result<()> {
    Ok(())
}

/// Write a child's entry PC and initial SP, then resume it. The user-context
/// struct's layout is architecture-specific (`pc`/`sp` on aarch64, `rip`/
/// `rsp` on x86_64); every other register is left zeroed, matching what a
/// freshly retyped TCB already holds.
#[cfg(feature = "runtime")]
fn sel4_write_entry_and_resume(tcb: CPtr, entry: usize, sp: usize) -> Result<()> {
    use sel4_platform::adapter as sys;
    let mut regs: sys::seL4_UserContext = unsafe { core::mem::zeroed() };
    #[cfg(target_arch = "aarch64")]
    {
        regs.pc = entry as u64;
        regs.sp = sp as u64;
    }
    #[cfg(target_arch = "x86_64")]
    {
        regs.rip = entry as u64;
        regs.rsp = sp as u64;
    }
    let err = unsafe { sys::seL4_TCB_WriteRegisters(tcb, 0, 0, 2, &mut regs as *mut _) };
    if !sys::is_ok(err) {
        return Err(CoreError::Kernel(err as i32));
    }
    let err = unsafe { sys::seL4_TCB_Resume(tcb) };
    if sys::is_ok(err) {
        Ok(())
    } else {
        Err(CoreError::Kernel(err as i32))
    }
}

#[cfg(not(feature = "runtime"))]
fn sel4_write_entry_and_resume(_tcb: CPtr, _entry: usize, _sp: usize) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootinfo::mock_bootinfo;
    use crate::bootstrap::bootstrap;

    /// Serialize a minimal but valid ELF64 executable: one `PT_LOAD` segment
    /// mapping a handful of code bytes at `0x10000`, entry point at the same
    /// address, no section headers (so `vsyscall_sysinfo` resolves to `0`).
    fn build_tiny_elf() -> Vec<u8> {
        const VADDR: u64 = 0x10000;
        let code: &[u8] = &[0x90, 0x90, 0x90, 0xC3];
        let phoff: u64 = 64;
        let data_off: u64 = phoff + 56;

        let mut out = Vec::new();
        out.extend_from_slice(&[0x7f, b'E', b'L', b'F', 2, 1, 1, 0]);
        out.extend_from_slice(&[0u8; 8]); // e_ident padding
        out.extend_from_slice(&2u16.to_le_bytes()); // e_type = ET_EXEC
        out.extend_from_slice(&0x3Eu16.to_le_bytes()); // e_machine = EM_X86_64
        out.extend_from_slice(&1u32.to_le_bytes()); // e_version
        out.extend_from_slice(&VADDR.to_le_bytes()); // e_entry
        out.extend_from_slice(&phoff.to_le_bytes()); // e_phoff
        out.extend_from_slice(&0u64.to_le_bytes()); // e_shoff
        out.extend_from_slice(&0u32.to_le_bytes()); // e_flags
        out.extend_from_slice(&64u16.to_le_bytes()); // e_ehsize
        out.extend_from_slice(&56u16.to_le_bytes()); // e_phentsize
        out.extend_from_slice(&1u16.to_le_bytes()); // e_phnum
        out.extend_from_slice(&0u16.to_le_bytes()); // e_shentsize
        out.extend_from_slice(&0u16.to_le_bytes()); // e_shnum
        out.extend_from_slice(&0u16.to_le_bytes()); // e_shstrndx
        assert_eq!(out.len() as u64, phoff);

        out.extend_from_slice(&1u32.to_le_bytes()); // p_type = PT_LOAD
        out.extend_from_slice(&5u32.to_le_bytes()); // p_flags = R | X
        out.extend_from_slice(&data_off.to_le_bytes()); // p_offset
        out.extend_from_slice(&VADDR.to_le_bytes()); // p_vaddr
        out.extend_from_slice(&VADDR.to_le_bytes()); // p_paddr
        out.extend_from_slice(&(code.len() as u64).to_le_bytes()); // p_filesz
        out.extend_from_slice(&4096u64.to_le_bytes()); // p_memsz
        out.extend_from_slice(&4096u64.to_le_bytes()); // p_align
        assert_eq!(out.len() as u64, data_off);

        out.extend_from_slice(code);
        out
    }

    /// Build a CPIO "newc" archive containing one named entry, matching the
    /// layout `cpio::lookup` parses.
    fn build_archive(name: &str, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        push_cpio_entry(&mut out, name, data, 0o100644);
        push_cpio_entry(&mut out, "TRAILER!!!", &[], 0);
        out
    }

    fn push_cpio_entry(out: &mut Vec<u8>, name: &str, data: &[u8], mode: u32) {
        let namesize = name.len() + 1;
        let header = alloc::format!(
            "070701{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}",
            0u32,
            mode,
            0u32,
            0u32,
            1u32,
            0u32,
            data.len() as u32,
            0u32,
            0u32,
            0u32,
            0u32,
            namesize as u32,
            0u32,
        );
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(name.as_bytes());
        out.push(0);
        while out.len() % 4 != 0 {
            out.push(0);
        }
        out.extend_from_slice(data);
        while out.len() % 4 != 0 {
            out.push(0);
        }
    }

    #[test]
    fn load_and_start_builds_a_real_process() {
        let bi = mock_bootinfo();
        let cfg = RootTaskConfig::tiny_for_tests();
        let mut ctx = bootstrap(&bi, &cfg).unwrap();

        let ep_ut = ctx.untyped.alloc(crate::config::ENDPOINT_BITS, &mut ctx.cspace).unwrap();
        let endpoint = ctx.cspace.alloc_slot(&mut ctx.untyped).unwrap();
        ctx.cspace.untyped_retype(&ep_ut, endpoint, ObjectType::Endpoint, crate::config::ENDPOINT_BITS).unwrap();

        let archive = build_archive("init", &build_tiny_elf());
        let proc = load_and_start(&mut ctx, &bi, &cfg, &archive, "init", endpoint, 7).unwrap();

        let page_size = 1usize << PAGE_BITS;
        assert_eq!(proc.ipc_buffer_vaddr, cfg.child_image_base + cfg.child_image_size - page_size);
        assert_eq!(proc.stack_top, proc.ipc_buffer_vaddr);
        assert_ne!(proc.cspace_root, 0);
        assert_ne!(proc.tcb, 0);
        assert_ne!(proc.tcb, proc.cspace_root);
        assert_ne!(proc.vspace.root(), proc.cspace_root);
    }

    #[test]
    fn load_and_start_reports_missing_app() {
        let bi = mock_bootinfo();
        let cfg = RootTaskConfig::tiny_for_tests();
        let mut ctx = bootstrap(&bi, &cfg).unwrap();
        let archive = build_archive("init", &build_tiny_elf());
        let err = load_and_start(&mut ctx, &bi, &cfg, &archive, "missing", 1, 0).unwrap_err();
        assert_eq!(err, CoreError::AppNotFound);
    }

    #[test]
    fn stack_write_walks_backward() {
        let mut buf = [0usize; 8];
        let idx = stack_write(&mut buf, -1, 0xAA);
        assert_eq!(idx, -2);
        assert_eq!(buf[7], 0xAA);
    }

    #[test]
    fn build_initial_stack_terminates_argv_and_envp_with_null() {
        let mut scratch = [0usize; 64];
        let final_index = build_initial_stack(&mut scratch, 0x1000, 4096, 0);
        // argc was the last word written, one slot above the final index.
        let argc_pos = (64 + final_index + 1) as usize;
        assert_eq!(scratch[argc_pos], 0);
        // The AT_NULL pair terminating the aux vector sits at the very top.
        assert_eq!(scratch[62], 0);
        assert_eq!(scratch[61], 0);
    }

    #[test]
    fn build_initial_stack_records_ipc_buffer_and_pagesize() {
        let mut scratch = [0usize; 64];
        build_initial_stack(&mut scratch, 0xBEEF000, 4096, 0);
        let ipc_entry = scratch.iter().position(|&w| w == AT_SEL4_IPC_BUFFER_PTR).unwrap();
        assert_eq!(scratch[ipc_entry + 1], 0xBEEF000);
        let pagesz_entry = scratch.iter().position(|&w| w == AT_PAGESZ).unwrap();
        assert_eq!(scratch[pagesz_entry + 1], 4096);
    }

    #[test]
    fn build_initial_stack_records_nonzero_sysinfo() {
        let mut scratch = [0usize; 64];
        build_initial_stack(&mut scratch, 0xBEEF000, 4096, 0xDEAD_0000);
        let sysinfo_entry = scratch.iter().position(|&w| w == AT_SYSINFO).unwrap();
        assert_eq!(scratch[sysinfo_entry + 1], 0xDEAD_0000);
    }
}
