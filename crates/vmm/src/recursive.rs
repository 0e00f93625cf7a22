//! Addresses of the recursive page table window.
//!
//! The last directory slot of every active directory points back at the directory itself.
//! Once paging is on, that makes the top 4 MiB of the address space a window onto the
//! translation structures: the page table of directory slot `i` appears at
//! `0xFFC0_0000 + i * 4096`, and the directory itself appears as the last of those pages.

use crate::{DirectoryIndex, PAGE_SIZE, VirtualAddress};

/// First address of the recursive window.
pub const WINDOW_BASE: VirtualAddress = DirectoryIndex::RECURSIVE.region_start();

/// Returns the virtual address at which the page table of directory slot `index` appears.
pub const fn table_window(index: DirectoryIndex) -> VirtualAddress {
    VirtualAddress::new(WINDOW_BASE.as_u32() + index.as_usize() as u32 * PAGE_SIZE)
}

/// Returns the virtual address at which the active page directory appears.
pub const fn directory_window() -> VirtualAddress {
    table_window(DirectoryIndex::RECURSIVE)
}

/// Returns the virtual address of the page table entry that maps `virt`.
pub const fn entry_window(virt: VirtualAddress) -> VirtualAddress {
    let table = table_window(virt.directory_index());
    VirtualAddress::new(table.as_u32() + virt.table_index().as_usize() as u32 * 4)
}

/// Returns true if `virt` lies inside the recursive window.
///
/// Pages in the window must never be mapped or unmapped directly; doing so would rewrite
/// the directory as if it were a page table.
pub const fn in_window(virt: VirtualAddress) -> bool {
    virt.as_u32() >= WINDOW_BASE.as_u32()
}
