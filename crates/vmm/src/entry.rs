//! Page directory and page table entries for 32-bit x86.

use core::fmt;

use crate::{PhysicalAddress, flags::PageFlags};

/// A single page directory or page table entry.
///
/// Directory and table entries share one shape: bits 31..12 hold a frame-aligned physical
/// address and bits 11..0 hold [`PageFlags`]. Every accessor touches only its own bit range,
/// so the frame survives flag changes and vice versa. The raw integer is never exposed.
///
/// When the entry is not present, the frame bits carry no meaning for translation but may
/// still hold whatever the previous mapping left behind.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct PageEntry(u32);

impl PageEntry {
    /// Bits 31..12 contain the frame address.
    const FRAME_MASK: u32 = 0xFFFF_F000;

    /// Creates an empty (not present) entry.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Creates an entry pointing at `frame` with `flags`.
    pub fn new(frame: PhysicalAddress, flags: PageFlags) -> Self {
        let mut entry = Self::empty();
        entry.set_frame(frame);
        entry.add_flags(flags);
        entry
    }

    /// Replaces the frame address, leaving the flags untouched.
    ///
    /// The low twelve bits of `frame` are discarded: callers are responsible for passing a
    /// frame-aligned address.
    pub fn set_frame(&mut self, frame: PhysicalAddress) {
        self.0 = (self.0 & !Self::FRAME_MASK) | (frame.as_u32() & Self::FRAME_MASK);
    }

    /// Sets `flags`, leaving the frame address and all other flags untouched.
    pub fn add_flags(&mut self, flags: PageFlags) {
        self.0 |= flags.entry_bits();
    }

    /// Clears `flags`, leaving the frame address and all other flags untouched.
    pub fn del_flags(&mut self, flags: PageFlags) {
        self.0 &= !flags.entry_bits();
    }

    /// Returns the frame address stored in this entry, present or not.
    pub const fn frame(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 & Self::FRAME_MASK)
    }

    /// Returns the flags of this entry.
    pub const fn flags(self) -> PageFlags {
        PageFlags::from_entry_bits(self.0)
    }

    /// Returns whether this entry is present.
    pub const fn is_present(self) -> bool {
        self.flags().is_present()
    }

    /// Returns the frame address if the entry is present.
    pub const fn address(self) -> Option<PhysicalAddress> {
        if self.is_present() {
            Some(self.frame())
        } else {
            None
        }
    }
}

impl fmt::Debug for PageEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageEntry")
            .field("frame", &self.frame())
            .field("flags", &self.flags())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_frame_keeps_flags() {
        let mut entry = PageEntry::empty();
        entry.add_flags(PageFlags::PRESENT | PageFlags::USER);
        entry.set_frame(PhysicalAddress::new(0x0012_3000));

        assert_eq!(entry.frame(), PhysicalAddress::new(0x0012_3000));
        assert_eq!(entry.flags(), PageFlags::PRESENT | PageFlags::USER);
    }

    #[test]
    fn set_frame_replaces_previous_frame() {
        let mut entry = PageEntry::new(PhysicalAddress::new(0xFFFF_F000), PageFlags::PRESENT);
        entry.set_frame(PhysicalAddress::new(0x0000_1000));
        assert_eq!(entry.frame(), PhysicalAddress::new(0x1000));
        assert!(entry.is_present());
    }

    #[test]
    fn set_frame_discards_unaligned_bits() {
        let mut entry = PageEntry::empty();
        entry.set_frame(PhysicalAddress::new(0x0050_0FFF));

        assert_eq!(entry.frame(), PhysicalAddress::new(0x0050_0000));
        assert_eq!(entry.flags(), PageFlags::empty());
    }

    #[test]
    fn flags_never_touch_frame() {
        let frame = PhysicalAddress::new(0xDEAD_B000);
        let mut entry = PageEntry::new(frame, PageFlags::KERNEL_IDENTITY);

        entry.add_flags(PageFlags::AVAILABLE);
        assert_eq!(entry.frame(), frame);
        entry.del_flags(PageFlags::WRITABLE | PageFlags::AVAILABLE);
        assert_eq!(entry.frame(), frame);
        assert_eq!(entry.flags(), PageFlags::PRESENT | PageFlags::USER);
    }

    #[test]
    fn clearing_present_keeps_frame_bits() {
        let frame = PhysicalAddress::new(0x0040_0000);
        let mut entry = PageEntry::new(frame, PageFlags::PRESENT | PageFlags::WRITABLE);

        entry.del_flags(PageFlags::PRESENT);

        assert!(!entry.is_present());
        assert_eq!(entry.frame(), frame);
        assert_eq!(entry.address(), None);
        assert_eq!(entry.flags(), PageFlags::WRITABLE);
    }

    #[test]
    fn address_requires_present() {
        let frame = PhysicalAddress::new(0x7000);
        assert_eq!(PageEntry::new(frame, PageFlags::PRESENT).address(), Some(frame));
        assert_eq!(PageEntry::new(frame, PageFlags::WRITABLE).address(), None);
    }
}
