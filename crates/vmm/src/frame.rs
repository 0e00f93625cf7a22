//! Physical frames and the interface to the physical frame allocator.

use core::fmt;

use crate::{PAGE_SIZE, PhysicalAddress};

/// A 4 KiB-aligned unit of physical memory, identified by its base address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PhysicalFrame(PhysicalAddress);

impl PhysicalFrame {
    /// Returns the frame containing `address`.
    pub const fn containing(address: PhysicalAddress) -> Self {
        Self(address.align_down(PAGE_SIZE))
    }

    /// Returns the physical address at the start of this frame.
    pub const fn start_address(self) -> PhysicalAddress {
        self.0
    }
}

impl fmt::Debug for PhysicalFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysicalFrame({:#x})", self.0.as_u32())
    }
}

/// Supplies and reclaims physical frames.
///
/// The virtual memory manager only calls the allocator with interrupts masked, so an
/// implementation does not need to be reentrant.
pub trait FrameAllocator {
    /// Takes one free frame, or returns `None` if physical memory is exhausted.
    fn allocate_frame(&mut self) -> Option<PhysicalFrame>;

    /// Returns a frame previously handed out by [`FrameAllocator::allocate_frame`].
    fn deallocate_frame(&mut self, frame: PhysicalFrame);
}

impl<A: FrameAllocator + ?Sized> FrameAllocator for &mut A {
    fn allocate_frame(&mut self) -> Option<PhysicalFrame> {
        (**self).allocate_frame()
    }

    fn deallocate_frame(&mut self, frame: PhysicalFrame) {
        (**self).deallocate_frame(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn containing_rounds_down() {
        let frame = PhysicalFrame::containing(PhysicalAddress::new(0x3FFF));
        assert_eq!(frame.start_address(), PhysicalAddress::new(0x3000));
    }

    #[test]
    fn debug_format() {
        let frame = PhysicalFrame::containing(PhysicalAddress::new(0x0010_0000));
        assert_eq!(format!("{:?}", frame), "PhysicalFrame(0x100000)");
    }
}
