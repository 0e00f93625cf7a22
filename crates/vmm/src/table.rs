//! Page directory and page table structures.
//!
//! Both levels of the 32-bit x86 translation structure are one 4 KiB frame holding 1024
//! [`PageEntry`] values. They are indexed only by [`DirectoryIndex`] and [`TableIndex`],
//! which come out of splitting a [`VirtualAddress`], so indexing cannot go out of range.

use core::ops::{Index, IndexMut};

use crate::{
    AddressTranslator, DirectoryIndex, ENTRY_COUNT, PAGE_SIZE, PhysicalAddress, TableIndex,
    entry::PageEntry, flags::PageFlags,
};

/// Macro to define the common functionality of both table levels.
macro_rules! impl_table_common {
    ($name:ident, $index:ident) => {
        impl $name {
            /// Creates a new table with every entry empty (not present).
            pub const fn new() -> Self {
                Self {
                    entries: [PageEntry::empty(); ENTRY_COUNT],
                }
            }

            /// Returns true if no entry of this table is present.
            pub fn is_empty(&self) -> bool {
                !self.entries.iter().any(|entry| entry.is_present())
            }

            /// Returns the number of present entries.
            pub fn present_count(&self) -> usize {
                self.entries.iter().filter(|entry| entry.is_present()).count()
            }

            /// Iterates over all entries together with their index.
            pub fn iter(&self) -> impl Iterator<Item = ($index, PageEntry)> + '_ {
                $index::all().zip(self.entries.iter().copied())
            }

            /// Returns the table stored in the frame at `phys`.
            ///
            /// # Safety
            ///
            /// The frame must hold an initialized table of this kind and be reachable through
            /// the current [`AddressTranslator`]. No mutable reference to it may be live.
            ///
            /// # Panics
            ///
            /// Panics if `phys` is null or not frame-aligned.
            pub unsafe fn from_physical<'a>(phys: PhysicalAddress) -> &'a Self {
                Self::check_frame(phys);
                let ptr = AddressTranslator::current().phys_to_ptr::<Self>(phys);
                // SAFETY: Caller guarantees the frame holds a table of this kind.
                unsafe { &*ptr }
            }

            /// Returns the table stored in the frame at `phys` for modification.
            ///
            /// # Safety
            ///
            /// The frame must hold an initialized table of this kind and be reachable through
            /// the current [`AddressTranslator`]. No other reference to it may be live.
            ///
            /// # Panics
            ///
            /// Panics if `phys` is null or not frame-aligned.
            pub unsafe fn from_physical_mut<'a>(phys: PhysicalAddress) -> &'a mut Self {
                Self::check_frame(phys);
                let ptr = AddressTranslator::current().phys_to_ptr::<Self>(phys);
                // SAFETY: Caller guarantees the frame holds a table of this kind.
                unsafe { &mut *ptr }
            }

            /// Writes an empty table into the frame at `phys` and returns it.
            ///
            /// # Safety
            ///
            /// The frame must be owned by the caller and reachable through the current
            /// [`AddressTranslator`]. Whatever the frame held before is overwritten.
            ///
            /// # Panics
            ///
            /// Panics if `phys` is null or not frame-aligned.
            pub unsafe fn init_at<'a>(phys: PhysicalAddress) -> &'a mut Self {
                Self::check_frame(phys);
                let ptr = AddressTranslator::current().phys_to_ptr::<Self>(phys);
                // SAFETY: Caller owns the frame; it is large and aligned enough for a table.
                unsafe {
                    ptr.write(Self::new());
                    &mut *ptr
                }
            }

            fn check_frame(phys: PhysicalAddress) {
                assert!(phys.as_u32() != 0, "null table address");
                assert!(phys.is_aligned(PAGE_SIZE), "table address {} is not frame-aligned", phys);
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl Index<$index> for $name {
            type Output = PageEntry;

            fn index(&self, index: $index) -> &Self::Output {
                &self.entries[index.as_usize()]
            }
        }

        impl IndexMut<$index> for $name {
            fn index_mut(&mut self, index: $index) -> &mut Self::Output {
                &mut self.entries[index.as_usize()]
            }
        }
    };
}

/// A leaf page table: 1024 entries each mapping one 4 KiB page of a 4 MiB region.
#[derive(Clone)]
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageEntry; ENTRY_COUNT],
}

impl_table_common!(PageTable, TableIndex);

impl PageTable {
    /// Maps every page of this table to the frame at the same address, so that the
    /// region covered by `region` translates to itself.
    pub fn identity_map(&mut self, region: DirectoryIndex, flags: PageFlags) {
        let base = region.region_start().as_u32();
        for index in TableIndex::all() {
            let entry = &mut self[index];
            entry.set_frame(PhysicalAddress::new(base + index.region_offset()));
            entry.add_flags(flags);
        }
    }
}

/// A page directory: 1024 entries each referring to the page table of one 4 MiB region.
#[derive(Clone)]
#[repr(C, align(4096))]
pub struct PageDirectory {
    entries: [PageEntry; ENTRY_COUNT],
}

impl_table_common!(PageDirectory, DirectoryIndex);

impl PageDirectory {
    /// Points the slot at `index` to the page table in frame `table`.
    pub fn install_table(&mut self, index: DirectoryIndex, table: PhysicalAddress, flags: PageFlags) {
        let entry = &mut self[index];
        entry.set_frame(table);
        entry.add_flags(flags);
    }

    /// Installs the recursive self-mapping into the last slot.
    ///
    /// `own_address` must be the physical address of this directory.
    pub fn install_recursive(&mut self, own_address: PhysicalAddress) {
        self.install_table(DirectoryIndex::RECURSIVE, own_address, PageFlags::RECURSIVE);
    }

    /// Returns the recursive slot.
    pub fn recursive_entry(&self) -> PageEntry {
        self[DirectoryIndex::RECURSIVE]
    }
}

const _: () = assert!(core::mem::size_of::<PageTable>() == PAGE_SIZE as usize);
const _: () = assert!(core::mem::size_of::<PageDirectory>() == PAGE_SIZE as usize);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VirtualAddress;

    #[test]
    fn new_table_is_empty() {
        let table = PageTable::new();
        assert!(table.is_empty());
        assert_eq!(table.present_count(), 0);
    }

    #[test]
    fn single_present_entry_is_not_empty() {
        let mut table = PageTable::new();
        let index = VirtualAddress::new(0x0000_5000).table_index();
        table[index] = PageEntry::new(PhysicalAddress::new(0x9000), PageFlags::PRESENT);
        assert!(!table.is_empty());

        table[index].del_flags(PageFlags::PRESENT);
        assert!(table.is_empty());
    }

    #[test]
    fn identity_map_region_zero() {
        let mut table = PageTable::new();
        let region = VirtualAddress::new(0).directory_index();
        table.identity_map(region, PageFlags::KERNEL_IDENTITY);

        assert_eq!(table.present_count(), ENTRY_COUNT);
        for (index, entry) in table.iter() {
            assert_eq!(entry.frame().as_u32(), index.as_usize() as u32 * PAGE_SIZE);
            assert_eq!(entry.flags(), PageFlags::KERNEL_IDENTITY);
        }
    }

    #[test]
    fn identity_map_other_region() {
        let mut table = PageTable::new();
        let region = VirtualAddress::new(0x0080_0000).directory_index();
        table.identity_map(region, PageFlags::PRESENT);

        let index = VirtualAddress::new(0x0080_3000).table_index();
        assert_eq!(table[index].frame(), PhysicalAddress::new(0x0080_3000));
    }

    #[test]
    fn install_table_sets_frame_and_flags() {
        let mut dir = PageDirectory::new();
        let index = VirtualAddress::new(0x0040_0000).directory_index();
        dir.install_table(index, PhysicalAddress::new(0x0020_0000), PageFlags::KERNEL_IDENTITY);

        assert_eq!(dir[index].frame(), PhysicalAddress::new(0x0020_0000));
        assert_eq!(dir[index].flags(), PageFlags::KERNEL_IDENTITY);
        assert_eq!(dir.present_count(), 1);
    }

    #[test]
    fn recursive_slot_is_last_entry() {
        let mut dir = PageDirectory::new();
        dir.install_recursive(PhysicalAddress::new(0x0010_0000));

        let (last_index, last) = dir.iter().last().unwrap();
        assert_eq!(last_index, DirectoryIndex::RECURSIVE);
        assert_eq!(last, dir.recursive_entry());
        assert_eq!(last.frame(), PhysicalAddress::new(0x0010_0000));
        assert_eq!(last.flags(), PageFlags::PRESENT | PageFlags::WRITABLE);
    }

    #[test]
    #[should_panic(expected = "null table address")]
    fn rejects_null_table() {
        unsafe {
            PageTable::from_physical(PhysicalAddress::new(0));
        }
    }

    #[test]
    #[should_panic(expected = "is not frame-aligned")]
    fn rejects_unaligned_table() {
        unsafe {
            PageDirectory::from_physical(PhysicalAddress::new(0x1234));
        }
    }
}
