#![cfg_attr(not(any(test, feature = "software-emulation")), no_std)]

//! # Polaris Virtual Memory Manager (VMM)
//!
//! The Polaris Virtual Memory Manager manages address translation for a 32-bit x86 kernel
//! using the classic two-level scheme: a page directory of 1024 entries, each referring to a
//! page table of 1024 entries that map 4 KiB pages. It provides:
//!
//! - Strongly typed physical and virtual addresses and a codec for page entries.
//! - Bootstrapping of the kernel address space (identity map of the first 4 MiB and a
//!   recursive self-mapping in the last directory slot) and enabling paging.
//! - Mapping and unmapping of pages with lazy creation and reclamation of page tables.
//! - Directory switching, TLB invalidation and address translation.
//! - Software emulation of the paging hardware for testing in non-kernel environments.

#[cfg(any(test, feature = "software-emulation"))]
extern crate alloc;

/// Emits a trace record only when the `detailed-logging` feature is enabled.
macro_rules! trace_detailed {
    ($($arg:tt)*) => {
        #[cfg(feature = "detailed-logging")]
        log::trace!($($arg)*);
    };
}

mod address;
mod arch;
mod critical;
mod entry;
mod flags;
mod frame;
mod manager;
pub mod recursive;
mod table;

pub use address::{AddressTranslator, DirectoryIndex, PhysicalAddress, TableIndex, VirtualAddress};
pub use arch::PagingHardware;
#[cfg(target_arch = "x86")]
pub use arch::X86Paging;
#[cfg(any(test, feature = "software-emulation"))]
pub use arch::{EmulatedFrameAllocator, EmulatedMemory, HardwareEvent, SoftwareMmu};
pub use critical::CriticalSection;
pub use entry::PageEntry;
pub use flags::PageFlags;
pub use frame::{FrameAllocator, PhysicalFrame};
pub use manager::{
    DirectoryFrame, MapError, PageWalk, VirtualMemory, alloc_page, free_page, try_alloc_page,
};
pub use table::{PageDirectory, PageTable};

/// Size of a page and of a physical frame.
pub const PAGE_SIZE: u32 = 4096;

/// Number of entries in a page directory or page table.
pub const ENTRY_COUNT: usize = 1024;

/// Size of the region mapped by one page table.
pub const REGION_SIZE: u32 = PAGE_SIZE * ENTRY_COUNT as u32;

/// End of the identity-mapped region set up by [`VirtualMemory::bootstrap`].
pub const IDENTITY_MAP_END: VirtualAddress = VirtualAddress::new(REGION_SIZE);
