//! Page directory and page table entry flags.

use core::fmt;
use core::ops::{BitOr, BitOrAssign};

use x86_64::structures::paging::PageTableFlags;

/// Flag bits of a 32-bit page directory or page table entry.
///
/// The low twelve bits of a legacy 32-bit entry share their layout with the long-mode
/// entry, so this wraps the x86_64 crate's [`PageTableFlags`] truncated to those bits.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageFlags(PageTableFlags);

impl PageFlags {
    /// Bits of an entry that hold flags rather than the frame address.
    pub(crate) const MASK: u32 = 0x0000_0FFF;

    /// The entry maps a table or a page.
    pub const PRESENT: Self = Self(PageTableFlags::PRESENT);
    /// Writes are allowed through this entry.
    pub const WRITABLE: Self = Self(PageTableFlags::WRITABLE);
    /// Ring 3 may access memory through this entry.
    pub const USER: Self = Self(PageTableFlags::USER_ACCESSIBLE);
    /// Write-through caching.
    pub const WRITE_THROUGH: Self = Self(PageTableFlags::WRITE_THROUGH);
    /// Caching disabled.
    pub const NO_CACHE: Self = Self(PageTableFlags::NO_CACHE);
    /// Set by the CPU on access.
    pub const ACCESSED: Self = Self(PageTableFlags::ACCESSED);
    /// Set by the CPU on write (page table entries only).
    pub const DIRTY: Self = Self(PageTableFlags::DIRTY);
    /// Translation survives a CR3 reload (page table entries only, needs CR4.PGE).
    pub const GLOBAL: Self = Self(PageTableFlags::GLOBAL);
    /// Bits 9..11, ignored by the CPU and reserved for kernel bookkeeping.
    pub const AVAILABLE: Self = Self(
        PageTableFlags::BIT_9
            .union(PageTableFlags::BIT_10)
            .union(PageTableFlags::BIT_11),
    );

    /// The flags the kernel uses for its own identity mapping and the tables behind it.
    pub const KERNEL_IDENTITY: Self = Self(
        PageTableFlags::PRESENT
            .union(PageTableFlags::WRITABLE)
            .union(PageTableFlags::USER_ACCESSIBLE),
    );

    /// The flags of the recursive directory slot.
    pub const RECURSIVE: Self = Self(PageTableFlags::PRESENT.union(PageTableFlags::WRITABLE));

    /// Creates empty page flags (page not present).
    pub const fn empty() -> Self {
        Self(PageTableFlags::empty())
    }

    /// Creates flags from the low twelve bits of a raw entry, discarding everything else.
    pub(crate) const fn from_entry_bits(bits: u32) -> Self {
        Self(PageTableFlags::from_bits_truncate((bits & Self::MASK) as u64))
    }

    /// Returns the flags as the low twelve bits of an entry.
    pub(crate) const fn entry_bits(self) -> u32 {
        (self.0.bits() as u32) & Self::MASK
    }

    /// Returns true if every flag in `other` is also set in `self`.
    pub const fn contains(self, other: Self) -> bool {
        self.0.contains(other.0)
    }

    /// Returns whether the present bit is set.
    pub const fn is_present(self) -> bool {
        self.contains(Self::PRESENT)
    }

    /// Returns whether the writable bit is set.
    pub const fn is_writable(self) -> bool {
        self.contains(Self::WRITABLE)
    }

    /// Returns whether the user-accessible bit is set.
    pub const fn is_user(self) -> bool {
        self.contains(Self::USER)
    }

    /// Sets or clears the present bit.
    pub fn set_present(&mut self, present: bool) {
        self.0.set(PageTableFlags::PRESENT, present);
    }
}

impl Default for PageFlags {
    fn default() -> Self {
        Self::empty()
    }
}

impl BitOr for PageFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for PageFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for PageFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(PageFlags, char); 5] = [
            (PageFlags::PRESENT, 'P'),
            (PageFlags::WRITABLE, 'W'),
            (PageFlags::USER, 'U'),
            (PageFlags::ACCESSED, 'A'),
            (PageFlags::DIRTY, 'D'),
        ];

        f.write_str("PageFlags(")?;
        for (flag, name) in NAMES {
            let c = if self.contains(flag) { name } else { '-' };
            fmt::Write::write_char(f, c)?;
        }
        write!(f, " {:#05x})", self.entry_bits())
    }
}
