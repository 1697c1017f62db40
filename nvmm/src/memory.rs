//! Guest RAM.
//!
//! [`GuestMemory`] owns the stage-2 table of a guest together with the range
//! of guest physical addresses that backs its RAM. Pages of the range that the
//! image loader did not touch are populated on first use, either by a guest
//! page fault or by a hypercall that copies into or out of the page.
use crate::{
    config::GUEST_PHYS_LIMIT,
    mm::Page,
    probe::Probe,
    stage2::{Permission, StageMappingError, StagePageTable},
    vm::Gpa,
    Resource, VmError,
};
use abyss::addressing::{Pa, PAGE_MASK};

/// A copy between guest and host stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Truncated {
    /// Bytes copied before the failure.
    pub done: usize,
    /// Why the next page could not be reached.
    pub error: VmError,
}

/// Guest RAM and its stage-2 table.
pub struct GuestMemory {
    table: StagePageTable,
    base: Gpa,
    size: usize,
    // Size as asked by the creator, before rounding.
    requested: usize,
}

impl GuestMemory {
    /// Create guest RAM of `size` bytes from `base`. Nothing is mapped yet.
    ///
    /// `size` is rounded up to a page.
    pub fn new(base: Gpa, requested: usize) -> Result<Self, VmError> {
        let size = requested
            .checked_add(PAGE_MASK)
            .map(|s| s & !PAGE_MASK)
            .ok_or(VmError::ResourceExhausted(Resource::GuestAddressSpace))?;
        match base.checked_add(size) {
            Some(end) if base.is_page_aligned() && end.into_usize() <= GUEST_PHYS_LIMIT => (),
            _ => return Err(VmError::ResourceExhausted(Resource::GuestAddressSpace)),
        }
        Ok(Self {
            table: StagePageTable::new().ok_or(VmError::ResourceExhausted(Resource::Memory))?,
            base,
            size,
            requested,
        })
    }

    /// First address of guest RAM.
    #[inline]
    pub fn base(&self) -> Gpa {
        self.base
    }

    /// Size of guest RAM in bytes, a whole number of pages.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Size of guest RAM as given to [`GuestMemory::new`].
    #[inline]
    pub fn requested_size(&self) -> usize {
        self.requested
    }

    /// The stage-2 table of this guest.
    #[inline]
    pub fn table(&self) -> &StagePageTable {
        &self.table
    }

    /// Whether `gpa` is guest RAM.
    #[inline]
    pub fn contains(&self, gpa: Gpa) -> bool {
        gpa >= self.base && gpa - self.base < self.size
    }

    /// Whether `[gpa, gpa + len)` lies in guest RAM.
    pub fn contains_range(&self, gpa: Gpa, len: usize) -> bool {
        gpa >= self.base
            && (gpa - self.base)
                .checked_add(len)
                .map(|end| end <= self.size)
                .unwrap_or(false)
    }

    /// Map `pg` at `gpa` with `perm`.
    pub fn map(&mut self, gpa: Gpa, pg: Page, perm: Permission) -> Result<(), StageMappingError> {
        self.table.map(gpa, pg, perm)
    }

    /// Back the page of `gpa` with a zeroed frame.
    ///
    /// `gpa` must be guest RAM. A page that is already mapped is left alone.
    pub fn populate(&mut self, gpa: Gpa) -> Result<Pa, VmError> {
        if !self.contains(gpa) {
            return Err(VmError::GuestAddressFault(gpa));
        }
        let pg = Page::new().ok_or(VmError::ResourceExhausted(Resource::Memory))?;
        let pa = pg.pa();
        match self.table.map(
            gpa.page(),
            pg,
            Permission::READ | Permission::WRITE | Permission::EXECUTABLE,
        ) {
            Ok(()) => Ok(pa + gpa.offset()),
            Err(StageMappingError::Duplicated) => {
                self.gpa2hpa(gpa).ok_or(VmError::GuestAddressFault(gpa))
            }
            Err(StageMappingError::OutOfMemory) => {
                Err(VmError::ResourceExhausted(Resource::Memory))
            }
            Err(_) => Err(VmError::GuestAddressFault(gpa)),
        }
    }

    /// Translate `gpa` for an `access`, populating guest RAM on first touch.
    pub fn resolve(&mut self, gpa: Gpa, access: Permission) -> Result<Pa, VmError> {
        match self.table.walk(gpa.page()) {
            Ok(pte) if pte.permission().contains(access) => pte
                .pa()
                .map(|pa| pa + gpa.offset())
                .ok_or(VmError::GuestAddressFault(gpa)),
            Ok(_) => Err(VmError::GuestAddressFault(gpa)),
            Err(StageMappingError::NotExist) if self.contains(gpa) => self.populate(gpa),
            Err(_) => Err(VmError::GuestAddressFault(gpa)),
        }
    }

    /// Copy guest memory at `src` into `buf`.
    ///
    /// Stops at the first page that cannot be read.
    pub fn read(&mut self, src: Gpa, buf: &mut [u8]) -> Result<(), Truncated> {
        let mut done = 0;
        while done < buf.len() {
            let (gpa, chunk) = self.next_chunk(src, done, buf.len())?;
            let pa = self
                .resolve(gpa, Permission::READ)
                .map_err(|error| Truncated { done, error })?;
            unsafe {
                core::ptr::copy_nonoverlapping(
                    pa.into_va().into_usize() as *const u8,
                    buf[done..].as_mut_ptr(),
                    chunk,
                );
            }
            done += chunk;
        }
        Ok(())
    }

    /// Copy `buf` into guest memory at `dst`.
    ///
    /// Stops at the first page that cannot be written.
    pub fn write(&mut self, dst: Gpa, buf: &[u8]) -> Result<(), Truncated> {
        let mut done = 0;
        while done < buf.len() {
            let (gpa, chunk) = self.next_chunk(dst, done, buf.len())?;
            let pa = self
                .resolve(gpa, Permission::WRITE)
                .map_err(|error| Truncated { done, error })?;
            unsafe {
                core::ptr::copy_nonoverlapping(
                    buf[done..].as_ptr(),
                    pa.into_va().into_usize() as *mut u8,
                    chunk,
                );
            }
            done += chunk;
        }
        Ok(())
    }

    // Address and length of the part of a copy that stays in one page.
    fn next_chunk(&self, start: Gpa, done: usize, len: usize) -> Result<(Gpa, usize), Truncated> {
        let gpa = start.checked_add(done).ok_or(Truncated {
            done,
            error: VmError::GuestAddressFault(start),
        })?;
        Ok((gpa, gpa.page_remaining().min(len - done)))
    }
}

impl Probe for GuestMemory {
    fn gpa2hpa(&self, gpa: Gpa) -> Option<Pa> {
        self.table.gpa2hpa(gpa)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GUEST_RAM_BASE;
    use abyss::addressing::PAGE_SIZE;

    fn ram(size: usize) -> GuestMemory {
        GuestMemory::new(Gpa::new(GUEST_RAM_BASE), size).unwrap()
    }

    #[test]
    fn size_is_page_rounded() {
        let mem = ram(PAGE_SIZE + 1);
        assert_eq!(mem.size(), 2 * PAGE_SIZE);
        assert_eq!(mem.requested_size(), PAGE_SIZE + 1);
        assert!(mem.contains(Gpa::new(GUEST_RAM_BASE + 2 * PAGE_SIZE - 1)));
        assert!(!mem.contains(Gpa::new(GUEST_RAM_BASE + 2 * PAGE_SIZE)));
        assert!(!mem.contains(Gpa::new(GUEST_RAM_BASE - 1)));
        assert!(mem.contains_range(Gpa::new(GUEST_RAM_BASE), 2 * PAGE_SIZE));
        assert!(!mem.contains_range(Gpa::new(GUEST_RAM_BASE + 1), 2 * PAGE_SIZE));
    }

    #[test]
    fn rejects_ram_beyond_sv39x4() {
        assert_eq!(
            GuestMemory::new(Gpa::new(GUEST_PHYS_LIMIT - PAGE_SIZE), 2 * PAGE_SIZE).err(),
            Some(VmError::ResourceExhausted(Resource::GuestAddressSpace))
        );
        assert_eq!(
            GuestMemory::new(Gpa::new(GUEST_RAM_BASE), usize::MAX).err(),
            Some(VmError::ResourceExhausted(Resource::GuestAddressSpace))
        );
    }

    #[test]
    fn lazy_population() {
        let mut mem = ram(16 * PAGE_SIZE);
        let gpa = Gpa::new(GUEST_RAM_BASE + 3 * PAGE_SIZE + 8);
        assert!(mem.gpa2hpa(gpa).is_none());
        let pa = mem.resolve(gpa, Permission::WRITE).unwrap();
        assert_eq!(pa.offset(), 8);
        assert_eq!(mem.gpa2hpa(gpa), Some(pa));
        // A second touch reuses the same frame.
        assert_eq!(mem.populate(gpa).unwrap(), pa);
        assert_eq!(
            mem.resolve(Gpa::new(GUEST_RAM_BASE + 16 * PAGE_SIZE), Permission::READ),
            Err(VmError::GuestAddressFault(Gpa::new(GUEST_RAM_BASE + 16 * PAGE_SIZE)))
        );
    }

    #[test]
    fn copy_across_pages() {
        let mut mem = ram(4 * PAGE_SIZE);
        let dst = Gpa::new(GUEST_RAM_BASE + PAGE_SIZE - 5);
        let data = (0..64u8).collect::<Vec<_>>();
        mem.write(dst, &data).unwrap();
        let mut back = [0u8; 64];
        mem.read(dst, &mut back).unwrap();
        assert_eq!(&back[..], &data[..]);
    }

    #[test]
    fn copy_truncates_at_end_of_ram() {
        let mut mem = ram(2 * PAGE_SIZE);
        let dst = Gpa::new(GUEST_RAM_BASE + 2 * PAGE_SIZE - 10);
        let err = mem.write(dst, &[0xaa; 30]).unwrap_err();
        assert_eq!(err.done, 10);
        assert_eq!(
            err.error,
            VmError::GuestAddressFault(Gpa::new(GUEST_RAM_BASE + 2 * PAGE_SIZE))
        );
    }

    #[test]
    fn write_needs_write_permission() {
        let mut mem = ram(2 * PAGE_SIZE);
        let text = Gpa::new(GUEST_RAM_BASE);
        mem.map(text, Page::new().unwrap(), Permission::READ | Permission::EXECUTABLE)
            .unwrap();
        let err = mem.write(text, b"x").unwrap_err();
        assert_eq!(err.done, 0);
        let mut byte = [1u8];
        mem.read(text, &mut byte).unwrap();
        assert_eq!(byte, [0]);
    }
}
