//! Interrupt-masked critical sections.

use crate::arch::PagingHardware;

/// RAII guard that masks interrupts on creation and restores them on drop.
///
/// [`CriticalSection::enter`] snapshots whether interrupts are enabled. If they were, it
/// masks them, and on drop it unmasks them again **only** in that case, so nested sections
/// leave interrupts masked until the outermost one ends.
///
/// Every multi-step change to the translation structures runs inside one of these, so an
/// interrupt handler never observes a half-installed table or races the table-emptiness scan.
#[must_use = "interrupts are restored as soon as the guard is dropped"]
pub struct CriticalSection<'a, H: PagingHardware + ?Sized> {
    hardware: &'a H,
    were_enabled: bool,
}

impl<'a, H: PagingHardware + ?Sized> CriticalSection<'a, H> {
    /// Masks interrupts until the returned guard is dropped.
    pub fn enter(hardware: &'a H) -> Self {
        let were_enabled = hardware.interrupts_enabled();
        if were_enabled {
            // SAFETY: They are re-enabled when the guard drops.
            unsafe { hardware.disable_interrupts() };
        }
        Self {
            hardware,
            were_enabled,
        }
    }
}

impl<H: PagingHardware + ?Sized> Drop for CriticalSection<'_, H> {
    fn drop(&mut self) {
        if self.were_enabled {
            // SAFETY: Interrupts were enabled before this section masked them.
            unsafe { self.hardware.enable_interrupts() };
        }
    }
}
