//! Architecture-specific implementations of the paging hardware.
//!
//! This module conditionally imports either the 32-bit x86 implementation, which issues
//! real processor instructions, or the software emulation, which records every call and
//! simulates translation so the manager can be tested on the host.

use crate::{PhysicalAddress, VirtualAddress};

// Use the x86 hardware implementation when building for a 32-bit x86 kernel.
#[cfg(target_arch = "x86")]
mod x86;
#[cfg(target_arch = "x86")]
pub use x86::X86Paging;

// Use software emulation ONLY when:
// - Running tests, OR
// - software-emulation feature is explicitly enabled
#[cfg(any(test, feature = "software-emulation"))]
mod software;
#[cfg(any(test, feature = "software-emulation"))]
pub use software::{EmulatedFrameAllocator, EmulatedMemory, HardwareEvent, SoftwareMmu};

/// The processor operations the virtual memory manager depends on.
///
/// Everything the manager does to the CPU goes through this trait: loading the
/// translation-base register, switching paging on, invalidating the TLB and masking
/// interrupts around multi-step table updates.
pub trait PagingHardware {
    /// Loads the translation-base register (CR3) with the directory at `directory`.
    ///
    /// # Safety
    ///
    /// Once paging is enabled, the directory must map the executing code, its stack and
    /// every table the kernel is about to touch.
    unsafe fn load_directory(&self, directory: PhysicalAddress);

    /// Performs the platform setup that must precede [`PagingHardware::enable_paging`],
    /// such as selecting two-level 4 KiB paging.
    ///
    /// # Safety
    ///
    /// Must only be called while paging is disabled.
    unsafe fn configure_paging(&self);

    /// Sets the paging bit (CR0.PG).
    ///
    /// # Safety
    ///
    /// A directory that identity-maps the executing code and its stack must already be
    /// loaded.
    unsafe fn enable_paging(&self);

    /// Discards every cached translation by reloading the translation-base register.
    fn flush_all(&self);

    /// Discards the cached translation of the page containing `page`.
    fn flush_entry(&self, page: VirtualAddress);

    /// Returns whether maskable interrupts are currently enabled.
    fn interrupts_enabled(&self) -> bool;

    /// Masks maskable interrupts.
    ///
    /// # Safety
    ///
    /// The caller must re-enable them if they were enabled before.
    unsafe fn disable_interrupts(&self);

    /// Unmasks maskable interrupts.
    ///
    /// # Safety
    ///
    /// Must not be called in the middle of a sequence that relies on interrupts being masked.
    unsafe fn enable_interrupts(&self);
}
