//! Frame allocator over emulated physical memory.

use alloc::vec::Vec;

use crate::{
    AddressTranslator,
    frame::{FrameAllocator, PhysicalFrame},
};

use super::{EmulatedMemory, HardwareEvent, SoftwareMmu};

/// A stack of free frames with an observable free count.
///
/// Frames are handed out lowest address first. Returning a frame that is already free
/// panics, which turns a double free in the code under test into a test failure.
///
/// An allocator [observed](EmulatedFrameAllocator::observed_by) by a [`SoftwareMmu`] logs
/// every frame it hands out or takes back into that processor's event log, interleaved with
/// the hardware calls.
pub struct EmulatedFrameAllocator {
    /// Free frames; the next frame to hand out is at the end.
    free: Vec<PhysicalFrame>,
    total: usize,
    observer: Option<SoftwareMmu>,
}

impl EmulatedFrameAllocator {
    /// Creates an allocator owning every frame of `memory`.
    pub fn new(memory: &EmulatedMemory) -> Self {
        Self::with_frames(memory.frames())
    }

    /// Creates an allocator owning every frame of the current emulated memory.
    ///
    /// # Panics
    ///
    /// Panics if the current [`AddressTranslator`] is not emulated.
    pub fn from_current() -> Self {
        let memory = AddressTranslator::current()
            .emulated_memory()
            .expect("current address translator is not emulated");
        Self::new(memory)
    }

    /// Creates an allocator owning exactly `frames`.
    pub fn with_frames(frames: impl IntoIterator<Item = PhysicalFrame>) -> Self {
        let mut free: Vec<_> = frames.into_iter().collect();
        free.reverse();
        let total = free.len();
        Self {
            free,
            total,
            observer: None,
        }
    }

    /// Records every allocation and deallocation into the event log of `mmu`.
    pub fn observed_by(mut self, mmu: &SoftwareMmu) -> Self {
        self.observer = Some(mmu.clone());
        self
    }

    fn notify(&self, event: HardwareEvent) {
        if let Some(mmu) = &self.observer {
            mmu.record(event);
        }
    }

    /// Creates an allocator with no frames at all.
    pub fn exhausted() -> Self {
        Self::with_frames([])
    }

    /// Returns the number of frames available for allocation.
    pub fn free_frames(&self) -> usize {
        self.free.len()
    }

    /// Returns the number of frames currently handed out.
    pub fn allocated_frames(&self) -> usize {
        self.total.saturating_sub(self.free.len())
    }

    /// Returns true if `frame` is currently free.
    pub fn is_free(&self, frame: PhysicalFrame) -> bool {
        self.free.contains(&frame)
    }
}

impl FrameAllocator for EmulatedFrameAllocator {
    fn allocate_frame(&mut self) -> Option<PhysicalFrame> {
        let frame = self.free.pop()?;
        self.notify(HardwareEvent::FrameAllocated(frame));
        Some(frame)
    }

    fn deallocate_frame(&mut self, frame: PhysicalFrame) {
        assert!(!self.is_free(frame), "{:?} freed twice", frame);
        self.notify(HardwareEvent::FrameFreed(frame));
        self.free.push(frame);
    }
}
