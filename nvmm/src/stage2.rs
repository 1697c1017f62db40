//! Stage-2 (guest physical to host physical) translation.
//!
//! ## Background
//! A guest kernel manages its own Sv39 page table, which translates guest
//! virtual addresses into guest physical addresses. The hypervisor owns a
//! second table per guest, the G-stage table, which translates guest physical
//! addresses into host physical addresses. The hart walks both tables on
//! every guest memory access.
//!
//! The G-stage uses Sv39x4: the same three-level format as Sv39, except that
//! the root table is four times larger (2048 entries, 16 KiB, 16 KiB aligned)
//! and translates 41 bits of guest physical address. Every leaf must carry
//! the `U` bit because G-stage accesses are checked as user accesses.
//!
//! The hart finds the table through `hgatp`, which packs the translation
//! mode, the vmid and the physical page number of the root table. [`Hgatp`]
//! builds and decodes that value.
use crate::{
    config::GUEST_PHYS_LIMIT,
    mm::Page,
    probe::Probe,
    vm::Gpa,
    vmid::VmId,
};
use abyss::{
    addressing::{Pa, Va, PAGE_MASK, PAGE_SHIFT},
    riscv::csr::hgatp,
};
use alloc::{
    alloc::{alloc_zeroed, Layout},
    boxed::Box,
};
use core::ops::{Deref, DerefMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageMappingError {
    /// Unaligned address
    Unaligned,
    /// Not exist
    NotExist,
    /// Has a duplicated mapping.
    Duplicated,
    /// Beyond the 41 bits Sv39x4 translates.
    OutOfRange,
    /// No frame for an intermediate table.
    OutOfMemory,
}

bitflags::bitflags! {
    /// Flags of a Sv39x4 page table entry.
    pub struct StagePteFlags: u64 {
        /// Valid.
        const V = 1 << 0;
        /// Readable.
        const R = 1 << 1;
        /// Writable.
        const W = 1 << 2;
        /// Executable.
        const X = 1 << 3;
        /// User accessible. Required on every G-stage leaf.
        const U = 1 << 4;
        /// Global.
        const G = 1 << 5;
        /// Accessed.
        const A = 1 << 6;
        /// Dirty.
        const D = 1 << 7;
    }
}

bitflags::bitflags! {
    /// Possible memory permissions.
    pub struct Permission: u64 {
        /// Page is readable.
        const READ = 1 << 0;
        /// Page is writable.
        const WRITE = 1 << 1;
        /// Page is executable.
        const EXECUTABLE = 1 << 2;
    }
}

impl From<Permission> for StagePteFlags {
    fn from(perm: Permission) -> Self {
        let mut flags = StagePteFlags::empty();
        flags.set(StagePteFlags::R, perm.contains(Permission::READ));
        flags.set(StagePteFlags::W, perm.contains(Permission::WRITE));
        flags.set(StagePteFlags::X, perm.contains(Permission::EXECUTABLE));
        flags
    }
}

const PTE_PPN_SHIFT: u64 = 10;
const ENTRIES: usize = 512;
const ROOT_ENTRIES: usize = 2048;

/// Sv39x4 page table entry.
#[derive(Clone, Copy)]
#[repr(transparent)]
pub struct StagePte(u64);

impl StagePte {
    /// Get a physical address pointed by this entry.
    #[inline]
    pub fn pa(&self) -> Option<Pa> {
        if self.flags().contains(StagePteFlags::V) {
            Pa::new(((self.0 >> PTE_PPN_SHIFT) << PAGE_SHIFT) as usize)
        } else {
            None
        }
    }

    /// Get a flags this entry.
    #[inline]
    pub const fn flags(&self) -> StagePteFlags {
        StagePteFlags::from_bits_truncate(self.0)
    }

    /// Permission granted by this leaf.
    #[inline]
    pub fn permission(&self) -> Permission {
        let flags = self.flags();
        let mut perm = Permission::empty();
        perm.set(Permission::READ, flags.contains(StagePteFlags::R));
        perm.set(Permission::WRITE, flags.contains(StagePteFlags::W));
        perm.set(Permission::EXECUTABLE, flags.contains(StagePteFlags::X));
        perm
    }

    /// A valid entry with any of R, W or X set maps a page instead of
    /// pointing to the next level.
    #[inline]
    pub fn is_leaf(&self) -> bool {
        let flags = self.flags();
        flags.contains(StagePteFlags::V)
            && flags.intersects(StagePteFlags::R | StagePteFlags::W | StagePteFlags::X)
    }

    /// Set physical address of this entry.
    ///
    /// # WARNING
    /// Permission of this entry is not changed.
    #[inline]
    pub fn set_pa(&mut self, pa: Pa) -> Result<&mut Self, StageMappingError> {
        let pa = pa.into_usize();
        if pa & PAGE_MASK != 0 {
            Err(StageMappingError::Unaligned)
        } else {
            self.0 = (((pa >> PAGE_SHIFT) as u64) << PTE_PPN_SHIFT)
                | (self.0 & StagePteFlags::all().bits());
            Ok(self)
        }
    }

    /// Set a permission of this entry.
    #[inline]
    pub fn set_perm(&mut self, perm: StagePteFlags) -> &mut Self {
        self.0 = perm.bits() | (self.0 & !StagePteFlags::all().bits());
        self
    }

    /// Invalidate this entry.
    #[inline]
    pub fn clear(&mut self) {
        self.0 = 0;
    }

    /// Get a mutable reference of the next level table pointed by this entry.
    #[inline]
    pub fn into_table_mut(&mut self) -> Result<&mut [StagePte], StageMappingError> {
        if self.is_leaf() {
            return Err(StageMappingError::Duplicated);
        }
        let pa = self.pa().ok_or(StageMappingError::NotExist)?;
        unsafe {
            Ok(core::slice::from_raw_parts_mut(
                pa.into_va().into_usize() as *mut StagePte,
                ENTRIES,
            ))
        }
    }

    /// Get a reference of the next level table pointed by this entry.
    #[inline]
    pub fn into_table(&self) -> Result<&[StagePte], StageMappingError> {
        if self.is_leaf() {
            return Err(StageMappingError::NotExist);
        }
        let pa = self.pa().ok_or(StageMappingError::NotExist)?;
        unsafe {
            Ok(core::slice::from_raw_parts(
                pa.into_va().into_usize() as *const StagePte,
                ENTRIES,
            ))
        }
    }
}

// Sv39x4 root must be aligned to 16 KiB.
#[repr(C, align(16384))]
struct Root([StagePte; ROOT_ENTRIES]);
impl Deref for Root {
    type Target = [StagePte; ROOT_ENTRIES];
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
impl DerefMut for Root {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// Indices of `gpa` into the root, middle and last level tables.
#[inline]
fn indices(gpa: Gpa) -> [usize; 3] {
    let gpa = gpa.into_usize();
    [
        (gpa >> 30) & (ROOT_ENTRIES - 1),
        (gpa >> 21) & (ENTRIES - 1),
        (gpa >> 12) & (ENTRIES - 1),
    ]
}

/// Second stage page table that holds guest-physical to host-physical mapping.
///
/// Every frame mapped by a leaf is owned by the table and freed with it.
pub struct StagePageTable(Box<Root>);

impl StagePageTable {
    /// Create an empty table. Returns None when out of memory.
    pub fn new() -> Option<Self> {
        let layout = Layout::new::<Root>();
        unsafe {
            let root = alloc_zeroed(layout) as *mut Root;
            if root.is_null() {
                None
            } else {
                Some(Self(Box::from_raw(root)))
            }
        }
    }

    /// Physical address of the root table.
    pub fn pa(&self) -> Pa {
        Va::from_ptr(&*self.0 as *const Root).into_pa()
    }

    /// `hgatp` that activates this table for `vmid`.
    #[inline]
    pub fn hgatp(&self, vmid: VmId) -> Hgatp {
        Hgatp::encode(vmid, self.pa())
    }

    /// Map `pg` into `gpa` with permission `perm`.
    pub fn map(&mut self, gpa: Gpa, pg: Page, perm: Permission) -> Result<(), StageMappingError> {
        let hpa = pg.into_raw();
        unsafe { self.do_map(gpa, hpa, perm) }.map_err(|e| {
            // The table did not take the page.
            drop(unsafe { Page::from_pa(hpa) });
            e
        })
    }

    /// Map `hpa` into `gpa` with permission `perm`.
    ///
    /// # Safety
    /// `hpa` must be a frame from [`Page::into_raw`]. The table owns it on success.
    pub unsafe fn do_map(
        &mut self,
        gpa: Gpa,
        hpa: Pa,
        perm: Permission,
    ) -> Result<(), StageMappingError> {
        if !gpa.is_page_aligned() || hpa.offset() != 0 {
            return Err(StageMappingError::Unaligned);
        }
        if gpa.into_usize() >= GUEST_PHYS_LIMIT {
            return Err(StageMappingError::OutOfRange);
        }
        let [l2, l1, l0] = indices(gpa);
        let pmd = Self::next_table(&mut self.0[l2])?;
        let pt = Self::next_table(&mut pmd[l1])?;
        let pte = &mut pt[l0];
        if pte.flags().contains(StagePteFlags::V) {
            return Err(StageMappingError::Duplicated);
        }
        pte.set_pa(hpa)?.set_perm(
            StagePteFlags::from(perm)
                | StagePteFlags::V
                | StagePteFlags::U
                | StagePteFlags::A
                | StagePteFlags::D,
        );
        Ok(())
    }

    // Descend through `entry`, allocating the next level table if absent.
    fn next_table(entry: &mut StagePte) -> Result<&mut [StagePte], StageMappingError> {
        if !entry.flags().contains(StagePteFlags::V) {
            let pg = Page::new().ok_or(StageMappingError::OutOfMemory)?;
            entry.set_pa(pg.into_raw())?.set_perm(StagePteFlags::V);
        }
        entry.into_table_mut()
    }

    /// Unmap the `gpa` and returns `Page` that was mapped to `gpa`.
    ///
    /// The caller flushes the stale translation from the hart.
    pub fn unmap(&mut self, gpa: Gpa) -> Result<Page, StageMappingError> {
        if !gpa.is_page_aligned() {
            return Err(StageMappingError::Unaligned);
        }
        if gpa.into_usize() >= GUEST_PHYS_LIMIT {
            return Err(StageMappingError::OutOfRange);
        }
        let [l2, l1, l0] = indices(gpa);
        let pte = &mut self.0[l2].into_table_mut()?[l1].into_table_mut()?[l0];
        let pa = pte.pa().ok_or(StageMappingError::NotExist)?;
        pte.clear();
        Ok(unsafe { Page::from_pa(pa) })
    }

    /// Walk the table and return the leaf entry of `gpa` if exist.
    pub fn walk(&self, gpa: Gpa) -> Result<&StagePte, StageMappingError> {
        if gpa.into_usize() >= GUEST_PHYS_LIMIT {
            return Err(StageMappingError::OutOfRange);
        }
        let [l2, l1, l0] = indices(gpa);
        let pte = &self.0[l2].into_table()?[l1].into_table()?[l0];
        if pte.is_leaf() {
            Ok(pte)
        } else {
            Err(StageMappingError::NotExist)
        }
    }
}

impl Drop for StagePageTable {
    fn drop(&mut self) {
        for l2 in self.0.iter_mut() {
            if let Ok(pmd) = l2.into_table_mut() {
                for l1 in pmd.iter_mut() {
                    if let Ok(pt) = l1.into_table_mut() {
                        for pte in pt.iter().filter(|pte| pte.is_leaf()) {
                            if let Some(pa) = pte.pa() {
                                drop(unsafe { Page::from_pa(pa) });
                            }
                        }
                        if let Some(pa) = l1.pa() {
                            drop(unsafe { Page::from_pa(pa) });
                        }
                    }
                }
                if let Some(pa) = l2.pa() {
                    drop(unsafe { Page::from_pa(pa) });
                }
            }
        }
    }
}

impl Probe for StagePageTable {
    fn gpa2hpa(&self, gpa: Gpa) -> Option<Pa> {
        self.walk(gpa.page())
            .ok()
            .and_then(|pte| pte.pa())
            .map(|pa| pa + gpa.offset())
    }
}

/// Value of the `hgatp` register.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Hgatp(u64);

impl Hgatp {
    /// Pack the Sv39x4 mode, `vmid` and the root table at `root`.
    pub const fn encode(vmid: VmId, root: Pa) -> Self {
        Self(
            hgatp::MODE_SV39X4
                | ((vmid.into_u64() & (hgatp::VMID_SIZE - 1)) << hgatp::VMID_SHIFT)
                | (root.ppn() as u64 & hgatp::PPN_MASK),
        )
    }

    /// Wrap a raw `hgatp` value.
    #[inline]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    #[inline]
    pub const fn bits(&self) -> u64 {
        self.0
    }

    /// Translation mode field, in place.
    #[inline]
    pub const fn mode(&self) -> u64 {
        self.0 & hgatp::MODE_MASK
    }

    #[inline]
    pub const fn vmid(&self) -> VmId {
        VmId::from_field((self.0 >> hgatp::VMID_SHIFT) & (hgatp::VMID_SIZE - 1))
    }

    /// Physical address of the root table.
    #[inline]
    pub fn root(&self) -> Pa {
        // A 44 bit ppn always fits in a 56 bit physical address.
        Pa::new(((self.0 & hgatp::PPN_MASK) << PAGE_SHIFT) as usize).unwrap_or(Pa::ZERO)
    }

    /// Unpack into mode, vmid and root table.
    #[inline]
    pub fn decode(&self) -> (u64, VmId, Pa) {
        (self.mode(), self.vmid(), self.root())
    }
}

impl core::fmt::Debug for Hgatp {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Hgatp(0x{:x})", self.0)
    }
}
