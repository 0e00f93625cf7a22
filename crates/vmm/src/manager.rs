//! The virtual memory manager.
//!
//! [`VirtualMemory`] owns the paging hardware, the frame allocator and the record of which
//! page directory is active. It bootstraps the kernel's address space, maps and unmaps
//! pages (creating page tables on first use of a 4 MiB region and reclaiming them once they
//! are empty) and answers translation queries.

use core::fmt;

use crate::{
    DirectoryIndex, PAGE_SIZE, PhysicalAddress, TableIndex, VirtualAddress,
    arch::PagingHardware,
    critical::CriticalSection,
    entry::PageEntry,
    flags::PageFlags,
    frame::{FrameAllocator, PhysicalFrame},
    recursive,
    table::{PageDirectory, PageTable},
};

/// Errors that can occur while building translation structures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    /// The frame allocator has no frame left.
    OutOfFrames,
    /// The page already maps a frame.
    AlreadyMapped(VirtualAddress),
}

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfFrames => write!(f, "out of physical frames"),
            Self::AlreadyMapped(virt) => write!(f, "page {} is already mapped", virt),
        }
    }
}

/// A page directory built by a [`VirtualMemory`], identified by its physical address.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DirectoryFrame(PhysicalAddress);

impl DirectoryFrame {
    /// Returns the physical address of the directory, the value loaded into CR3.
    pub const fn physical_address(self) -> PhysicalAddress {
        self.0
    }

    /// # Safety
    ///
    /// No mutable reference to the directory may be live.
    unsafe fn table<'a>(self) -> &'a PageDirectory {
        // SAFETY: Directory frames are only created by `new_directory`.
        unsafe { PageDirectory::from_physical(self.0) }
    }

    /// # Safety
    ///
    /// No other reference to the directory may be live.
    unsafe fn table_mut<'a>(self) -> &'a mut PageDirectory {
        // SAFETY: Directory frames are only created by `new_directory`.
        unsafe { PageDirectory::from_physical_mut(self.0) }
    }
}

impl fmt::Debug for DirectoryFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DirectoryFrame({:#x})", self.0.as_u32())
    }
}

/// The outcome of walking the active translation structures for one virtual address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageWalk {
    /// No directory has been activated yet.
    NoDirectory,
    /// The directory slot covering the address has no page table.
    NoTable { directory: DirectoryIndex },
    /// The page table exists but the page is not present.
    NotPresent {
        directory: DirectoryIndex,
        table: TableIndex,
        entry: PageEntry,
    },
    /// The page is mapped; `physical` includes the offset within the page.
    Mapped {
        entry: PageEntry,
        physical: PhysicalAddress,
    },
}

impl PageWalk {
    /// Returns the translated physical address if the page is mapped.
    pub const fn physical(self) -> Option<PhysicalAddress> {
        match self {
            Self::Mapped { physical, .. } => Some(physical),
            _ => None,
        }
    }
}

/// Takes a frame from `frames` and binds it into `entry` with `flags`.
///
/// On failure `entry` is left untouched.
pub fn try_alloc_page<A: FrameAllocator + ?Sized>(
    frames: &mut A,
    entry: &mut PageEntry,
    flags: PageFlags,
) -> Result<PhysicalAddress, MapError> {
    let frame = frames.allocate_frame().ok_or(MapError::OutOfFrames)?;
    entry.set_frame(frame.start_address());
    entry.add_flags(flags);
    Ok(frame.start_address())
}

/// Takes a frame from `frames` and binds it into `entry` with `flags`.
///
/// # Panics
///
/// Running out of physical frames is fatal: there is nothing to reclaim at this layer.
pub fn alloc_page<A: FrameAllocator + ?Sized>(
    frames: &mut A,
    entry: &mut PageEntry,
    flags: PageFlags,
) -> PhysicalAddress {
    try_alloc_page(frames, entry, flags).unwrap_or_else(|error| fatal("a page", error))
}

/// Returns the frame of a present `entry` to `frames` and marks the entry not present.
///
/// Does nothing to the allocator if the entry is not present, so freeing an entry twice is
/// harmless. The frame bits are left in place.
pub fn free_page<A: FrameAllocator + ?Sized>(frames: &mut A, entry: &mut PageEntry) {
    if let Some(frame) = entry.address() {
        frames.deallocate_frame(PhysicalFrame::containing(frame));
    }
    entry.del_flags(PageFlags::PRESENT);
}

fn fatal(what: &str, error: MapError) -> ! {
    log::error!("cannot allocate {}: {}", what, error);
    panic!("cannot allocate {}: {}", what, error);
}

/// Allocates a frame and initializes an empty page table in it.
fn create_table<A: FrameAllocator + ?Sized>(frames: &mut A) -> Result<PhysicalAddress, MapError> {
    let frame = frames.allocate_frame().ok_or(MapError::OutOfFrames)?;
    // SAFETY: The allocator just handed this frame to us.
    unsafe { PageTable::init_at(frame.start_address()) };
    Ok(frame.start_address())
}

/// Allocates a frame, initializes an empty page directory in it and installs the recursive
/// self-mapping.
fn new_directory<A: FrameAllocator + ?Sized>(frames: &mut A) -> Result<DirectoryFrame, MapError> {
    let frame = frames.allocate_frame().ok_or(MapError::OutOfFrames)?;
    let phys = frame.start_address();
    // SAFETY: The allocator just handed this frame to us.
    let directory = unsafe { PageDirectory::init_at(phys) };
    directory.install_recursive(phys);
    Ok(DirectoryFrame(phys))
}

/// Returns the leaf entry for `virt`, creating the page table of its region if the
/// directory slot is not present.
fn leaf_or_create<'a, A: FrameAllocator + ?Sized>(
    directory: &'a mut PageDirectory,
    frames: &mut A,
    virt: VirtualAddress,
    flags: PageFlags,
) -> Result<&'a mut PageEntry, MapError> {
    let index = virt.directory_index();
    let slot = &mut directory[index];
    if !slot.is_present() {
        let table = create_table(frames)?;
        *slot = PageEntry::new(table, flags);
        log::debug!(
            "created page table {} for region {}",
            table,
            index.region_start()
        );
    }

    // SAFETY: A present directory slot refers to a page table.
    let table = unsafe { PageTable::from_physical_mut(slot.frame()) };
    Ok(&mut table[virt.table_index()])
}

/// Frees the page table of directory slot `index` if none of its entries is present.
fn reclaim_if_empty<A: FrameAllocator + ?Sized>(
    directory: &mut PageDirectory,
    frames: &mut A,
    index: DirectoryIndex,
) {
    let slot = &mut directory[index];
    let Some(table) = slot.address() else {
        return;
    };

    // SAFETY: A present directory slot refers to a page table.
    if unsafe { PageTable::from_physical(table) }.is_empty() {
        frames.deallocate_frame(PhysicalFrame::containing(table));
        slot.del_flags(PageFlags::PRESENT);
        log::debug!(
            "reclaimed empty page table {} of region {}",
            table,
            index.region_start()
        );
    }
}

/// The virtual memory manager of one processor.
///
/// Holds the paging hardware, the frame allocator and the active page directory. Every
/// operation that changes the translation structures runs with interrupts masked and ends by
/// invalidating the TLB for the affected page.
pub struct VirtualMemory<H: PagingHardware, A: FrameAllocator> {
    hardware: H,
    frames: A,
    current: Option<DirectoryFrame>,
    bootstrapped: bool,
}

impl<H: PagingHardware, A: FrameAllocator> VirtualMemory<H, A> {
    /// Creates a manager with no active directory.
    ///
    /// The [`AddressTranslator`](crate::AddressTranslator) must be set before any table is
    /// built.
    pub const fn new(hardware: H, frames: A) -> Self {
        Self {
            hardware,
            frames,
            current: None,
            bootstrapped: false,
        }
    }

    /// Returns the paging hardware.
    pub fn hardware(&self) -> &H {
        &self.hardware
    }

    /// Returns the frame allocator.
    pub fn frames(&self) -> &A {
        &self.frames
    }

    /// Returns the frame allocator for use with [`alloc_page`] and [`free_page`].
    pub fn frames_mut(&mut self) -> &mut A {
        &mut self.frames
    }

    /// Returns true once [`VirtualMemory::bootstrap`] has enabled paging.
    pub fn is_bootstrapped(&self) -> bool {
        self.bootstrapped
    }

    /// Builds the kernel's address space and switches paging on.
    ///
    /// The new directory identity-maps the first 4 MiB, carries the recursive self-mapping
    /// in its last slot, and is made active before the paging bit is set.
    ///
    /// # Safety
    ///
    /// The executing code, its stack and every page table frame handed out by the allocator
    /// must lie in the first 4 MiB of physical memory or otherwise stay reachable through the
    /// [`AddressTranslator`](crate::AddressTranslator) once paging is on.
    ///
    /// # Panics
    ///
    /// Panics if called more than once, or if the allocator cannot supply the two frames
    /// needed.
    pub unsafe fn bootstrap(&mut self) -> DirectoryFrame {
        assert!(!self.bootstrapped, "virtual memory is already bootstrapped");

        let region = VirtualAddress::new(0).directory_index();
        let directory = {
            let _cs = CriticalSection::enter(&self.hardware);
            let directory = new_directory(&mut self.frames)
                .unwrap_or_else(|error| fatal("the kernel page directory", error));
            let identity = create_table(&mut self.frames)
                .unwrap_or_else(|error| fatal("the identity page table", error));

            // SAFETY: Both frames were just initialized and are not yet active.
            unsafe {
                PageTable::from_physical_mut(identity)
                    .identity_map(region, PageFlags::KERNEL_IDENTITY);
                directory
                    .table_mut()
                    .install_table(region, identity, PageFlags::KERNEL_IDENTITY);
            }
            log::debug!(
                "kernel page directory at {}, identity table at {}",
                directory.physical_address(),
                identity
            );
            directory
        };

        // SAFETY: The directory identity-maps the low 4 MiB the kernel runs from.
        unsafe {
            self.switch_directory(directory);
            self.hardware.configure_paging();
            self.hardware.enable_paging();
        }
        self.bootstrapped = true;
        log::debug!("paging enabled");

        directory
    }

    /// Builds an empty page directory carrying only the recursive self-mapping.
    pub fn try_create_directory(&mut self) -> Result<DirectoryFrame, MapError> {
        let _cs = CriticalSection::enter(&self.hardware);
        new_directory(&mut self.frames)
    }

    /// Builds an empty page directory carrying only the recursive self-mapping.
    ///
    /// # Panics
    ///
    /// Panics if the allocator has no frame left.
    pub fn create_directory(&mut self) -> DirectoryFrame {
        self.try_create_directory()
            .unwrap_or_else(|error| fatal("a page directory", error))
    }

    /// Makes `directory` the active directory and loads it into the translation-base
    /// register, then discards every cached translation.
    ///
    /// # Safety
    ///
    /// Once paging is on, `directory` must map the executing code and its stack.
    pub unsafe fn switch_directory(&mut self, directory: DirectoryFrame) {
        let _cs = CriticalSection::enter(&self.hardware);
        self.current = Some(directory);
        // SAFETY: Caller guarantees the directory is usable.
        unsafe { self.hardware.load_directory(directory.physical_address()) };
        self.hardware.flush_all();
        log::debug!("switched to page directory {}", directory.physical_address());
    }

    /// Returns the active directory, if one has been activated.
    pub fn current_directory(&self) -> Option<DirectoryFrame> {
        self.current
    }

    /// Returns the contents of the active directory.
    pub fn directory_table(&self) -> Option<&PageDirectory> {
        // SAFETY: Mutation requires `&mut self`, which this borrow excludes.
        self.current.map(|directory| unsafe { directory.table() })
    }

    /// Maps the page containing `virt` to the frame at `physical`.
    ///
    /// The page table of the region is created with `flags` if the region has none. The
    /// present flag is always set on the new entries.
    ///
    /// Every page below [`recursive::WINDOW_BASE`] can be mapped and then translates to
    /// `physical` plus its offset. The top 4 MiB are excluded: that region is the recursive
    /// window onto the tables themselves, so a page there cannot be mapped independently.
    ///
    /// # Panics
    ///
    /// Panics if no directory is active, if `virt` lies in the recursive window, or if a
    /// page table is needed and the allocator has no frame left.
    pub fn map(&mut self, physical: PhysicalAddress, virt: VirtualAddress, flags: PageFlags) {
        self.try_map(physical, virt, flags)
            .unwrap_or_else(|error| fatal("a page table", error))
    }

    /// Maps the page containing `virt` to the frame at `physical`.
    ///
    /// Returns [`MapError::OutOfFrames`] without changing anything if a page table is needed
    /// and the allocator has no frame left.
    ///
    /// # Panics
    ///
    /// Panics if no directory is active or if `virt` lies in the recursive window.
    pub fn try_map(
        &mut self,
        physical: PhysicalAddress,
        virt: VirtualAddress,
        mut flags: PageFlags,
    ) -> Result<(), MapError> {
        let directory = self.mutable_directory(virt);
        flags.set_present(true);

        let _cs = CriticalSection::enter(&self.hardware);
        // SAFETY: The active directory is only changed here, with interrupts masked.
        let leaf = leaf_or_create(unsafe { directory.table_mut() }, &mut self.frames, virt, flags)?;
        leaf.set_frame(physical);
        leaf.add_flags(flags);
        self.hardware.flush_entry(virt);

        trace_detailed!("mapped {} -> {} ({:?})", virt, physical, flags);
        Ok(())
    }

    /// Backs the page containing `virt` with a newly allocated frame and returns the frame.
    ///
    /// The frame belongs to the mapping; [`VirtualMemory::unmap_and_free`] gives it back.
    ///
    /// # Panics
    ///
    /// Panics if the page is already mapped or the allocator runs dry, and in the cases
    /// listed for [`VirtualMemory::map`].
    pub fn map_fresh(&mut self, virt: VirtualAddress, flags: PageFlags) -> PhysicalAddress {
        self.try_map_fresh(virt, flags)
            .unwrap_or_else(|error| fatal("a page", error))
    }

    /// Backs the page containing `virt` with a newly allocated frame and returns the frame.
    ///
    /// On error nothing changes: a page table created for the attempt is reclaimed.
    pub fn try_map_fresh(
        &mut self,
        virt: VirtualAddress,
        mut flags: PageFlags,
    ) -> Result<PhysicalAddress, MapError> {
        let directory = self.mutable_directory(virt);
        flags.set_present(true);

        let _cs = CriticalSection::enter(&self.hardware);
        // SAFETY: The active directory is only changed here, with interrupts masked.
        let table = unsafe { directory.table_mut() };
        let leaf = leaf_or_create(table, &mut self.frames, virt, flags)?;
        if leaf.is_present() {
            return Err(MapError::AlreadyMapped(virt.align_down(PAGE_SIZE)));
        }

        match try_alloc_page(&mut self.frames, leaf, flags) {
            Ok(frame) => {
                self.hardware.flush_entry(virt);
                trace_detailed!("mapped {} -> fresh frame {} ({:?})", virt, frame, flags);
                Ok(frame)
            }
            Err(error) => {
                reclaim_if_empty(table, &mut self.frames, virt.directory_index());
                Err(error)
            }
        }
    }

    /// Removes the mapping of the page containing `virt`.
    ///
    /// The mapped frame is not returned to the allocator; the page table is, once it no
    /// longer maps anything. Unmapping an unmapped page only invalidates its TLB entry.
    ///
    /// # Panics
    ///
    /// Panics if no directory is active or if `virt` lies in the recursive window.
    pub fn unmap(&mut self, virt: VirtualAddress) {
        self.release(virt, false);
    }

    /// Removes the mapping of the page containing `virt` and returns its frame to the
    /// allocator, together with the page table if it no longer maps anything.
    ///
    /// # Panics
    ///
    /// Panics if no directory is active or if `virt` lies in the recursive window.
    pub fn unmap_and_free(&mut self, virt: VirtualAddress) {
        self.release(virt, true);
    }

    fn release(&mut self, virt: VirtualAddress, free_frame: bool) {
        let directory = self.mutable_directory(virt);

        let _cs = CriticalSection::enter(&self.hardware);
        // SAFETY: The active directory is only changed here, with interrupts masked.
        let table = unsafe { directory.table_mut() };
        let index = virt.directory_index();
        if let Some(table_phys) = table[index].address() {
            // SAFETY: A present directory slot refers to a page table.
            let leaf = &mut unsafe { PageTable::from_physical_mut(table_phys) }[virt.table_index()];
            if free_frame {
                free_page(&mut self.frames, leaf);
            } else {
                leaf.del_flags(PageFlags::PRESENT);
            }
            reclaim_if_empty(table, &mut self.frames, index);
        }
        self.hardware.flush_entry(virt);

        trace_detailed!("unmapped {}", virt);
    }

    /// Walks the active translation structures for `virt` without changing them.
    pub fn walk(&self, virt: VirtualAddress) -> PageWalk {
        let Some(directory) = self.directory_table() else {
            return PageWalk::NoDirectory;
        };

        let index = virt.directory_index();
        let Some(table) = directory[index].address() else {
            return PageWalk::NoTable { directory: index };
        };

        // SAFETY: A present directory slot refers to a page table.
        let entry = unsafe { PageTable::from_physical(table) }[virt.table_index()];
        match entry.address() {
            Some(frame) => PageWalk::Mapped {
                entry,
                physical: frame + virt.page_offset(),
            },
            None => PageWalk::NotPresent {
                directory: index,
                table: virt.table_index(),
                entry,
            },
        }
    }

    /// Translates `virt` through the active directory, or returns `None` if it is unmapped.
    pub fn translate(&self, virt: VirtualAddress) -> Option<PhysicalAddress> {
        self.walk(virt).physical()
    }

    /// Discards every cached translation.
    pub fn flush_all(&self) {
        self.hardware.flush_all();
        trace_detailed!("flushed TLB");
    }

    /// Discards the cached translation of the page containing `virt`.
    pub fn flush_entry(&self, virt: VirtualAddress) {
        self.hardware.flush_entry(virt);
        trace_detailed!("flushed TLB entry {}", virt);
    }

    /// Returns the active directory for a change affecting `virt`.
    fn mutable_directory(&self, virt: VirtualAddress) -> DirectoryFrame {
        assert!(
            !recursive::in_window(virt),
            "{} lies in the recursive page table window",
            virt
        );
        self.current
            .expect("no page directory is active; bootstrap virtual memory first")
    }
}
