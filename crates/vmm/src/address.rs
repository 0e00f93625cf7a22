//! Address types for physical and virtual memory on 32-bit x86.
//!
//! This module provides strongly typed 32-bit physical and virtual addresses, the
//! address-splitting accessors that derive page directory and page table indices from a
//! virtual address, and the [`AddressTranslator`] that lets the kernel reach physical memory
//! (page tables in particular) through a pointer.

use core::fmt;
use core::ops::{Add, Sub};

use crate::{ENTRY_COUNT, PAGE_SIZE};

#[cfg(any(test, feature = "software-emulation"))]
use crate::arch::EmulatedMemory;

/// Address translator for converting between physical addresses and kernel pointers.
///
/// This enum supports two modes:
/// - Hardware: physical memory is reachable at a fixed offset (`0` for an identity-mapped kernel)
/// - Emulated: physical memory is a host buffer (testing mode)
pub enum AddressTranslator {
    /// Hardware translation using a fixed offset.
    Hardware { offset: usize },
    /// Emulated translation using a simulated physical memory region.
    #[cfg(any(test, feature = "software-emulation"))]
    Emulated(EmulatedMemory),
}

impl AddressTranslator {
    /// Creates a hardware translator that reaches physical memory at `offset`.
    pub const fn hardware(offset: usize) -> Self {
        Self::Hardware { offset }
    }

    /// Creates a hardware translator for a kernel that identity-maps the memory it allocates
    /// page tables from.
    pub const fn identity() -> Self {
        Self::Hardware { offset: 0 }
    }

    /// Creates a new emulated translator backed by `frames` page frames of host memory,
    /// starting at physical address `base`.
    #[cfg(any(test, feature = "software-emulation"))]
    pub fn emulated(base: PhysicalAddress, frames: usize) -> Self {
        Self::Emulated(EmulatedMemory::new(base, frames))
    }

    /// Sets the global address translator.
    ///
    /// This function must be called exactly once during initialization, before the
    /// virtual memory manager is bootstrapped.
    ///
    /// # Panics
    ///
    /// Panics if the translator has already been set.
    pub fn set_current(translator: AddressTranslator) {
        #[cfg(not(any(test, feature = "software-emulation")))]
        {
            if ADDRESS_TRANSLATOR.get().is_some() {
                panic!("address translator already set");
            }
            ADDRESS_TRANSLATOR.call_once(|| translator);
        }

        #[cfg(any(test, feature = "software-emulation"))]
        {
            ADDRESS_TRANSLATOR.with(|t| {
                if t.get().is_some() {
                    panic!("address translator already set");
                }
                t.call_once(|| translator);
            });
        }
    }

    /// Returns a reference to the current global address translator.
    ///
    /// # Panics
    ///
    /// Panics if the translator has not been set yet.
    pub fn current() -> &'static AddressTranslator {
        Self::try_current().expect(
            "address translator not set; call AddressTranslator::set_current during initialization",
        )
    }

    /// Returns a reference to the current global address translator if it has been set.
    pub fn try_current() -> Option<&'static AddressTranslator> {
        #[cfg(not(any(test, feature = "software-emulation")))]
        {
            ADDRESS_TRANSLATOR.get()
        }

        #[cfg(any(test, feature = "software-emulation"))]
        {
            ADDRESS_TRANSLATOR.with(|t| {
                t.get().map(|translator| {
                    // SAFETY: Each thread owns its ADDRESS_TRANSLATOR, which is never modified
                    // once set and lives as long as the thread does.
                    unsafe { &*(translator as *const AddressTranslator) }
                })
            })
        }
    }

    /// Translates a physical address to a typed pointer through which the kernel can
    /// access it.
    pub fn phys_to_ptr<T>(&self, phys: PhysicalAddress) -> *mut T {
        match self {
            Self::Hardware { offset } => phys.as_usize().wrapping_add(*offset) as *mut T,
            #[cfg(any(test, feature = "software-emulation"))]
            Self::Emulated(mem) => mem.translate(phys) as *mut T,
        }
    }

    /// Returns the emulated physical memory, if this is an emulated translator.
    #[cfg(any(test, feature = "software-emulation"))]
    pub fn emulated_memory(&self) -> Option<&EmulatedMemory> {
        match self {
            Self::Hardware { .. } => None,
            Self::Emulated(mem) => Some(mem),
        }
    }
}

/// Global address translator.
///
/// This is initialized once during kernel initialization (with the Hardware variant).
/// In test/software-emulation mode, this is thread-local to allow each test to have its own
/// emulated physical memory.
#[cfg(not(any(test, feature = "software-emulation")))]
static ADDRESS_TRANSLATOR: spin::Once<AddressTranslator> = spin::Once::new();

#[cfg(any(test, feature = "software-emulation"))]
std::thread_local! {
    static ADDRESS_TRANSLATOR: spin::Once<AddressTranslator> = const { spin::Once::new() };
}

/// Macro to define common address type functionality.
///
/// This macro generates the basic structure and methods common to both physical
/// and virtual address types, reducing code duplication.
macro_rules! impl_address_common {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        #[repr(transparent)]
        pub struct $name(u32);

        impl $name {
            /// Creates a new address.
            #[inline]
            pub const fn new(addr: u32) -> Self {
                Self(addr)
            }

            /// Returns the raw 32-bit address value.
            #[inline]
            pub const fn as_u32(self) -> u32 {
                self.0
            }

            /// Returns the raw address value widened to `usize`.
            #[inline]
            pub const fn as_usize(self) -> usize {
                self.0 as usize
            }

            /// Checks if the address is aligned to the given alignment.
            ///
            /// # Panics
            ///
            /// Panics if `align` is not a power of two.
            #[inline]
            pub const fn is_aligned(self, align: u32) -> bool {
                assert!(align.is_power_of_two(), "alignment must be a power of two");
                self.0 & (align - 1) == 0
            }

            /// Aligns the address down to the given alignment.
            ///
            /// # Panics
            ///
            /// Panics if `align` is not a power of two.
            #[inline]
            pub const fn align_down(self, align: u32) -> Self {
                assert!(align.is_power_of_two(), "alignment must be a power of two");
                Self(self.0 & !(align - 1))
            }

            /// Returns true if the address lies on a page boundary.
            #[inline]
            pub const fn is_page_aligned(self) -> bool {
                self.is_aligned(PAGE_SIZE)
            }

            /// Returns the offset of this address within its 4 KiB page or frame.
            #[inline]
            pub const fn page_offset(self) -> u32 {
                self.0 & (PAGE_SIZE - 1)
            }
        }

        impl fmt::Pointer for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#010x}", self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#x})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }

        impl From<u32> for $name {
            #[inline]
            fn from(addr: u32) -> Self {
                Self::new(addr)
            }
        }

        impl Add<u32> for $name {
            type Output = Self;

            #[inline]
            fn add(self, rhs: u32) -> Self::Output {
                Self::new(self.0 + rhs)
            }
        }

        impl Sub<u32> for $name {
            type Output = Self;

            #[inline]
            fn sub(self, rhs: u32) -> Self::Output {
                Self::new(self.0 - rhs)
            }
        }

        impl Sub<$name> for $name {
            type Output = u32;

            #[inline]
            fn sub(self, rhs: $name) -> Self::Output {
                self.0 - rhs.0
            }
        }
    };
}

impl_address_common!(
    PhysicalAddress,
    "A 32-bit physical memory address.\n\n\
     Frame-aligned physical addresses are what page directory and page table entries store."
);

impl_address_common!(
    VirtualAddress,
    "A 32-bit virtual memory address.\n\n\
     Bits 31..22 select the page directory entry, bits 21..12 select the page table entry\n\
     and bits 11..0 are the offset within the page."
);

impl VirtualAddress {
    /// Returns the page directory index (bits 31..22) of this address.
    #[inline]
    pub const fn directory_index(self) -> DirectoryIndex {
        DirectoryIndex((self.0 >> 22) as u16)
    }

    /// Returns the page table index (bits 21..12) of this address.
    #[inline]
    pub const fn table_index(self) -> TableIndex {
        TableIndex(((self.0 >> 12) & 0x3FF) as u16)
    }
}

/// Macro to define the strongly typed table index types.
macro_rules! impl_table_index {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        pub struct $name(u16);

        impl $name {
            /// Returns the raw index, always in `0..1024`.
            #[inline]
            pub const fn as_usize(self) -> usize {
                self.0 as usize
            }

            /// Iterates over every index of a table, in ascending order.
            pub fn all() -> impl Iterator<Item = Self> + Clone {
                (0..ENTRY_COUNT as u16).map(Self)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

impl_table_index!(
    DirectoryIndex,
    "Index of an entry in a page directory.\n\n\
     Only produced by splitting a [`VirtualAddress`], so it is always in range."
);

impl_table_index!(
    TableIndex,
    "Index of an entry in a page table.\n\n\
     Only produced by splitting a [`VirtualAddress`], so it is always in range."
);

impl DirectoryIndex {
    /// The last directory slot, which holds the recursive self-mapping.
    pub const RECURSIVE: Self = Self(ENTRY_COUNT as u16 - 1);

    /// Returns the first virtual address of the 4 MiB region covered by this slot.
    #[inline]
    pub const fn region_start(self) -> VirtualAddress {
        VirtualAddress::new((self.0 as u32) << 22)
    }
}

impl TableIndex {
    /// Returns the offset of this page within its 4 MiB region.
    #[inline]
    pub const fn region_offset(self) -> u32 {
        (self.0 as u32) * PAGE_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod physical_address {
        use super::*;

        #[test]
        fn alignment() {
            let addr = PhysicalAddress::new(0x5000);
            assert!(addr.is_page_aligned());
            assert!(!PhysicalAddress::new(0x5001).is_page_aligned());
        }

        #[test]
        fn align_down() {
            let addr = PhysicalAddress::new(0x5123);
            assert_eq!(addr.align_down(PAGE_SIZE), PhysicalAddress::new(0x5000));
            assert_eq!(addr.align_down(0x10), PhysicalAddress::new(0x5120));
        }

        #[test]
        #[should_panic(expected = "alignment must be a power of two")]
        fn rejects_odd_alignment() {
            PhysicalAddress::new(0x5000).is_aligned(3);
        }

        #[test]
        fn operators() {
            let addr = PhysicalAddress::new(0x1000);
            assert_eq!(addr + 0x234, PhysicalAddress::new(0x1234));
            assert_eq!(addr - 0x1000, PhysicalAddress::new(0));
            assert_eq!(PhysicalAddress::new(0x3000) - addr, 0x2000);
        }

        #[test]
        fn formatting() {
            let addr = PhysicalAddress::new(0x1234);
            assert_eq!(format!("{:?}", addr), "PhysicalAddress(0x1234)");
            assert_eq!(format!("{}", addr), "0x1234");
            assert_eq!(format!("{:p}", addr), "0x00001234");
        }
    }

    mod virtual_address {
        use super::*;

        #[test]
        fn splits_indices() {
            let addr = VirtualAddress::new(0x0040_1123);
            assert_eq!(addr.directory_index().as_usize(), 1);
            assert_eq!(addr.table_index().as_usize(), 1);
            assert_eq!(addr.page_offset(), 0x123);
        }

        #[test]
        fn splits_top_of_address_space() {
            let addr = VirtualAddress::new(0xFFFF_FFFF);
            assert_eq!(addr.directory_index(), DirectoryIndex::RECURSIVE);
            assert_eq!(addr.table_index().as_usize(), 1023);
            assert_eq!(addr.page_offset(), 0xFFF);
        }

        #[test]
        fn region_start() {
            let index = VirtualAddress::new(0x0123_4567).directory_index();
            assert_eq!(index.region_start(), VirtualAddress::new(0x0100_0000));
        }

        #[test]
        fn all_indices_cover_a_table() {
            assert_eq!(TableIndex::all().count(), ENTRY_COUNT);
            assert_eq!(DirectoryIndex::all().last(), Some(DirectoryIndex::RECURSIVE));
        }
    }

    mod translation {
        use super::*;

        #[test]
        fn hardware_offset() {
            let translator = AddressTranslator::hardware(0xC000_0000);
            let phys = PhysicalAddress::new(0x0010_0000);
            let ptr = translator.phys_to_ptr::<u8>(phys);
            assert_eq!(ptr as usize, 0xC010_0000);
        }

        #[test]
        fn identity_is_zero_offset() {
            let translator = AddressTranslator::identity();
            let ptr = translator.phys_to_ptr::<u8>(PhysicalAddress::new(0x2000));
            assert_eq!(ptr as usize, 0x2000);
        }

        #[test]
        #[should_panic(expected = "address translator already set")]
        fn panics_on_double_set() {
            AddressTranslator::set_current(AddressTranslator::identity());
            AddressTranslator::set_current(AddressTranslator::identity());
        }
    }
}
