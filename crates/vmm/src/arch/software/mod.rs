//! Software emulation implementation for testing and development.
//!
//! This module provides a software-emulated platform that can run on any host:
//!
//! - [`EmulatedMemory`] stands in for physical memory. It is a host buffer of real 4 KiB
//!   frames starting at a configurable physical base address, so page tables built by the
//!   manager live in it exactly as they would in RAM.
//! - [`EmulatedFrameAllocator`] hands out those frames and counts how many are free.
//! - [`SoftwareMmu`] implements [`PagingHardware`](super::PagingHardware) by recording each
//!   call and simulating the processor's table walk, including a TLB that only forgets a
//!   translation when it is told to.

mod frames;
mod mmu;

use alloc::vec::Vec;
use core::cell::UnsafeCell;

use crate::{PAGE_SIZE, PhysicalAddress, frame::PhysicalFrame};

pub use frames::EmulatedFrameAllocator;
pub use mmu::{HardwareEvent, SoftwareMmu};

/// One emulated physical frame.
#[repr(C, align(4096))]
struct FrameBuffer([u8; PAGE_SIZE as usize]);

/// Emulated physical memory for software simulation.
///
/// This provides a simulated physical memory region for testing page table operations
/// without requiring actual hardware or virtual memory support from the host OS.
pub struct EmulatedMemory {
    /// Physical address of the first frame.
    base: PhysicalAddress,
    /// The underlying frames.
    frames: Vec<UnsafeCell<FrameBuffer>>,
}

impl EmulatedMemory {
    /// Creates a zeroed emulated memory region of `frames` frames starting at `base`.
    ///
    /// # Panics
    ///
    /// Panics if `base` is not frame-aligned or the region does not fit in 32 bits.
    pub fn new(base: PhysicalAddress, frames: usize) -> Self {
        assert!(base.is_page_aligned(), "emulated memory base must be frame-aligned");
        let size = (frames as u64) * PAGE_SIZE as u64;
        assert!(
            base.as_u32() as u64 + size <= 1 << 32,
            "emulated memory must fit in the 32-bit physical address space"
        );

        let mut buffer = Vec::with_capacity(frames);
        buffer.resize_with(frames, || UnsafeCell::new(FrameBuffer([0; PAGE_SIZE as usize])));

        Self {
            base,
            frames: buffer,
        }
    }

    /// Returns the number of emulated frames.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Returns true if `phys` lies inside the emulated region.
    pub fn contains(&self, phys: PhysicalAddress) -> bool {
        phys >= self.base && ((phys - self.base) as usize) < self.size()
    }

    /// Iterates over every emulated frame, lowest address first.
    pub fn frames(&self) -> impl Iterator<Item = PhysicalFrame> + '_ {
        (0..self.frame_count() as u32)
            .map(|index| PhysicalFrame::containing(self.base + index * PAGE_SIZE))
    }

    /// Translates a physical address to a pointer into the emulated memory.
    ///
    /// # Panics
    ///
    /// Panics if `phys` lies outside the emulated region.
    pub fn translate(&self, phys: PhysicalAddress) -> *mut u8 {
        assert!(
            self.contains(phys),
            "physical address {} outside emulated memory",
            phys
        );
        let offset = (phys - self.base) as usize;
        let frame = self.frames[offset / PAGE_SIZE as usize].get();
        // SAFETY: The offset within the frame is below PAGE_SIZE.
        unsafe { frame.cast::<u8>().add(offset % PAGE_SIZE as usize) }
    }

    fn size(&self) -> usize {
        self.frames.len() * PAGE_SIZE as usize
    }
}
