//! 32-bit x86 implementation.
//!
//! Issues the real control-register, `invlpg` and interrupt-flag instructions. The bit
//! definitions come from the x86_64 crate; CR0, CR4 and EFLAGS keep the same layout in
//! 32-bit protected mode.

use core::arch::asm;

use x86_64::registers::{
    control::{Cr0Flags, Cr4Flags},
    rflags::RFlags,
};

use crate::{PhysicalAddress, VirtualAddress};

use super::PagingHardware;

/// CR4 bits that must be clear for two-level paging with 4 KiB pages only.
const CR4_LEGACY_PAGING_CLEAR: u32 =
    (Cr4Flags::PHYSICAL_ADDRESS_EXTENSION.bits() | Cr4Flags::PAGE_SIZE_EXTENSION.bits()) as u32;

/// The paging hardware of the processor the kernel runs on.
#[derive(Debug, Default, Clone, Copy)]
pub struct X86Paging;

impl X86Paging {
    /// Returns the handle to the executing processor's paging hardware.
    pub const fn new() -> Self {
        Self
    }

    fn read_cr3() -> u32 {
        let value: u32;
        // SAFETY: Reading CR3 has no side effects.
        unsafe { asm!("mov {}, cr3", out(reg) value, options(nomem, nostack, preserves_flags)) };
        value
    }
}

impl PagingHardware for X86Paging {
    unsafe fn load_directory(&self, directory: PhysicalAddress) {
        // SAFETY: Caller guarantees the directory is valid.
        unsafe {
            asm!("mov cr3, {}", in(reg) directory.as_u32(), options(nostack, preserves_flags));
        }
    }

    unsafe fn configure_paging(&self) {
        // SAFETY: Paging is still disabled, so changing the paging mode is allowed.
        unsafe {
            asm!(
                "mov {tmp}, cr4",
                "and {tmp}, {mask}",
                "mov cr4, {tmp}",
                tmp = out(reg) _,
                mask = in(reg) !CR4_LEGACY_PAGING_CLEAR,
                options(nostack, preserves_flags),
            );
        }
    }

    unsafe fn enable_paging(&self) {
        // SAFETY: Caller guarantees the loaded directory maps the executing code.
        unsafe {
            asm!(
                "mov {tmp}, cr0",
                "or {tmp}, {paging}",
                "mov cr0, {tmp}",
                tmp = out(reg) _,
                paging = in(reg) Cr0Flags::PAGING.bits() as u32,
                options(nostack, preserves_flags),
            );
        }
    }

    fn flush_all(&self) {
        let cr3 = Self::read_cr3();
        // SAFETY: Reloading CR3 with its current value only invalidates the TLB.
        unsafe { asm!("mov cr3, {}", in(reg) cr3, options(nostack, preserves_flags)) };
    }

    fn flush_entry(&self, page: VirtualAddress) {
        // SAFETY: invlpg only invalidates the TLB entry of the given page.
        unsafe { asm!("invlpg [{}]", in(reg) page.as_u32(), options(nostack, preserves_flags)) };
    }

    fn interrupts_enabled(&self) -> bool {
        let eflags: u32;
        // SAFETY: Reading EFLAGS has no side effects.
        unsafe { asm!("pushfd", "pop {}", out(reg) eflags, options(nomem, preserves_flags)) };
        eflags & RFlags::INTERRUPT_FLAG.bits() as u32 != 0
    }

    unsafe fn disable_interrupts(&self) {
        // SAFETY: Caller restores the interrupt state.
        unsafe { asm!("cli", options(nostack)) };
    }

    unsafe fn enable_interrupts(&self) {
        // SAFETY: Caller guarantees no masked sequence is in progress.
        unsafe { asm!("sti", options(nostack)) };
    }
}
