//! Recording, translating stand-in for the paging hardware.

use alloc::{collections::BTreeMap, sync::Arc, vec::Vec};

use crate::{
    PhysicalAddress, VirtualAddress,
    arch::PagingHardware,
    entry::PageEntry,
    frame::PhysicalFrame,
    table::{PageDirectory, PageTable},
};

/// A call made to the emulated paging hardware, or to a frame allocator observed by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareEvent {
    /// CR3 was loaded with this directory.
    LoadDirectory(PhysicalAddress),
    /// The paging mode was set up ahead of enabling paging.
    ConfigurePaging,
    /// CR0.PG was set.
    EnablePaging,
    /// The whole TLB was invalidated.
    FlushAll,
    /// The TLB entry of this page was invalidated.
    FlushEntry(VirtualAddress),
    /// Interrupts were masked.
    InterruptsMasked,
    /// Interrupts were unmasked.
    InterruptsRestored,
    /// An observed [`EmulatedFrameAllocator`](super::EmulatedFrameAllocator) handed out
    /// this frame.
    FrameAllocated(PhysicalFrame),
    /// An observed [`EmulatedFrameAllocator`](super::EmulatedFrameAllocator) took this frame
    /// back.
    FrameFreed(PhysicalFrame),
}

struct State {
    cr3: Option<PhysicalAddress>,
    paging_enabled: bool,
    interrupts_enabled: bool,
    /// Cached leaf entries, keyed by virtual page number.
    tlb: BTreeMap<u32, PageEntry>,
    events: Vec<HardwareEvent>,
}

/// Emulated paging hardware.
///
/// Every call is appended to an event log. [`SoftwareMmu::access`] translates a virtual
/// address the way the processor would: through the TLB if it holds the page, otherwise by
/// walking the directory loaded in the emulated CR3 and caching the result. Translations
/// therefore go stale exactly when the real TLB would.
///
/// Starts with paging disabled and interrupts enabled. Clones share one emulated processor,
/// so a clone handed to an allocator records into the same event log.
#[derive(Clone)]
pub struct SoftwareMmu {
    state: Arc<spin::Mutex<State>>,
}

impl SoftwareMmu {
    /// Creates a processor with paging disabled, interrupts enabled and an empty TLB.
    pub fn new() -> Self {
        Self {
            state: Arc::new(spin::Mutex::new(State {
                cr3: None,
                paging_enabled: false,
                interrupts_enabled: true,
                tlb: BTreeMap::new(),
                events: Vec::new(),
            })),
        }
    }

    /// Returns every call recorded so far.
    pub fn events(&self) -> Vec<HardwareEvent> {
        self.state.lock().events.clone()
    }

    /// Forgets the recorded calls.
    pub fn clear_events(&self) {
        self.state.lock().events.clear();
    }

    /// Returns the directory loaded in the emulated CR3.
    pub fn loaded_directory(&self) -> Option<PhysicalAddress> {
        self.state.lock().cr3
    }

    /// Returns whether paging has been enabled.
    pub fn paging_enabled(&self) -> bool {
        self.state.lock().paging_enabled
    }

    /// Appends an event raised outside the paging hardware itself.
    pub(super) fn record(&self, event: HardwareEvent) {
        self.state.lock().events.push(event);
    }

    /// Returns true if the TLB holds a translation for the page containing `virt`.
    pub fn is_cached(&self, virt: VirtualAddress) -> bool {
        self.state.lock().tlb.contains_key(&page_number(virt))
    }

    /// Translates `virt` as the processor would on a memory access.
    ///
    /// Returns `None` where the processor would raise a page fault. With paging disabled,
    /// every address translates to itself.
    pub fn access(&self, virt: VirtualAddress) -> Option<PhysicalAddress> {
        let mut state = self.state.lock();
        if !state.paging_enabled {
            return Some(PhysicalAddress::new(virt.as_u32()));
        }

        let page = page_number(virt);
        let leaf = match state.tlb.get(&page) {
            Some(entry) => *entry,
            None => {
                let cr3 = state.cr3?;
                let entry = walk(cr3, virt)?;
                state.tlb.insert(page, entry);
                entry
            }
        };

        Some(leaf.frame() + virt.page_offset())
    }
}

impl Default for SoftwareMmu {
    fn default() -> Self {
        Self::new()
    }
}

fn page_number(virt: VirtualAddress) -> u32 {
    virt.as_u32() >> 12
}

/// Walks the two-level structure rooted at `cr3`, returning the present leaf entry.
fn walk(cr3: PhysicalAddress, virt: VirtualAddress) -> Option<PageEntry> {
    // SAFETY: The emulated CR3 only ever holds directories built in emulated memory.
    let directory = unsafe { PageDirectory::from_physical(cr3) };
    let table = directory[virt.directory_index()].address()?;

    // SAFETY: A present directory entry refers to a page table.
    let table = unsafe { PageTable::from_physical(table) };
    let leaf = table[virt.table_index()];
    leaf.is_present().then_some(leaf)
}

impl PagingHardware for SoftwareMmu {
    unsafe fn load_directory(&self, directory: PhysicalAddress) {
        let mut state = self.state.lock();
        state.cr3 = Some(directory);
        state.tlb.clear();
        state.events.push(HardwareEvent::LoadDirectory(directory));
    }

    unsafe fn configure_paging(&self) {
        let mut state = self.state.lock();
        assert!(!state.paging_enabled, "paging mode changed while paging is enabled");
        state.events.push(HardwareEvent::ConfigurePaging);
    }

    unsafe fn enable_paging(&self) {
        let mut state = self.state.lock();
        assert!(
            state.cr3.is_some(),
            "paging enabled without a page directory loaded"
        );
        state.paging_enabled = true;
        state.events.push(HardwareEvent::EnablePaging);
    }

    fn flush_all(&self) {
        let mut state = self.state.lock();
        state.tlb.clear();
        state.events.push(HardwareEvent::FlushAll);
    }

    fn flush_entry(&self, page: VirtualAddress) {
        let mut state = self.state.lock();
        state.tlb.remove(&page_number(page));
        state.events.push(HardwareEvent::FlushEntry(page));
    }

    fn interrupts_enabled(&self) -> bool {
        self.state.lock().interrupts_enabled
    }

    unsafe fn disable_interrupts(&self) {
        let mut state = self.state.lock();
        state.interrupts_enabled = false;
        state.events.push(HardwareEvent::InterruptsMasked);
    }

    unsafe fn enable_interrupts(&self) {
        let mut state = self.state.lock();
        state.interrupts_enabled = true;
        state.events.push(HardwareEvent::InterruptsRestored);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AddressTranslator, flags::PageFlags};

    const BASE: PhysicalAddress = PhysicalAddress::new(0x0010_0000);

    /// Builds a directory at BASE whose region 1 table (at BASE + 4 KiB) maps
    /// 0x0040_0000 to 0x0050_0000.
    fn build_tables() {
        AddressTranslator::set_current(AddressTranslator::emulated(BASE, 2));
        let table_phys = BASE + 0x1000;
        unsafe {
            let directory = PageDirectory::init_at(BASE);
            let table = PageTable::init_at(table_phys);
            let virt = VirtualAddress::new(0x0040_0000);
            directory.install_table(virt.directory_index(), table_phys, PageFlags::PRESENT);
            table[virt.table_index()] =
                PageEntry::new(PhysicalAddress::new(0x0050_0000), PageFlags::PRESENT);
        }
    }

    fn leaf(virt: VirtualAddress) -> &'static mut PageEntry {
        let directory = unsafe { PageDirectory::from_physical(BASE) };
        let table = unsafe { PageTable::from_physical_mut(directory[virt.directory_index()].frame()) };
        &mut table[virt.table_index()]
    }

    #[test]
    fn identity_before_paging() {
        let mmu = SoftwareMmu::new();
        let virt = VirtualAddress::new(0xDEAD_BEEF);
        assert_eq!(mmu.access(virt), Some(PhysicalAddress::new(0xDEAD_BEEF)));
    }

    #[test]
    #[should_panic(expected = "without a page directory loaded")]
    fn enabling_paging_requires_directory() {
        let mmu = SoftwareMmu::new();
        unsafe { mmu.enable_paging() };
    }

    #[test]
    fn walks_loaded_directory() {
        build_tables();
        let mmu = SoftwareMmu::new();
        unsafe {
            mmu.load_directory(BASE);
            mmu.enable_paging();
        }

        assert_eq!(
            mmu.access(VirtualAddress::new(0x0040_0ABC)),
            Some(PhysicalAddress::new(0x0050_0ABC))
        );
        assert_eq!(mmu.access(VirtualAddress::new(0x0040_1000)), None);
        assert_eq!(mmu.access(VirtualAddress::new(0x0080_0000)), None);
    }

    #[test]
    fn stale_until_flushed() {
        build_tables();
        let mmu = SoftwareMmu::new();
        unsafe {
            mmu.load_directory(BASE);
            mmu.enable_paging();
        }
        let virt = VirtualAddress::new(0x0040_0000);
        assert!(mmu.access(virt).is_some());
        assert!(mmu.is_cached(virt));

        leaf(virt).del_flags(PageFlags::PRESENT);
        assert_eq!(mmu.access(virt), Some(PhysicalAddress::new(0x0050_0000)));

        mmu.flush_entry(virt);
        assert_eq!(mmu.access(virt), None);
    }

    #[test]
    fn flush_all_forgets_everything() {
        build_tables();
        let mmu = SoftwareMmu::new();
        unsafe {
            mmu.load_directory(BASE);
            mmu.enable_paging();
        }
        let virt = VirtualAddress::new(0x0040_0000);
        mmu.access(virt);
        mmu.flush_all();
        assert!(!mmu.is_cached(virt));
    }

    #[test]
    fn records_calls_in_order() {
        let mmu = SoftwareMmu::new();
        unsafe {
            mmu.load_directory(BASE);
            mmu.configure_paging();
            mmu.enable_paging();
        }
        mmu.flush_entry(VirtualAddress::new(0x1000));

        assert_eq!(
            mmu.events(),
            [
                HardwareEvent::LoadDirectory(BASE),
                HardwareEvent::ConfigurePaging,
                HardwareEvent::EnablePaging,
                HardwareEvent::FlushEntry(VirtualAddress::new(0x1000)),
            ]
        );
        assert_eq!(mmu.loaded_directory(), Some(BASE));
        assert!(mmu.paging_enabled());
    }
}
