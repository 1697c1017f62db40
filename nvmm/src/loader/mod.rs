//! Guest kernel image loader.
//!
//! Loads every `PT_LOAD` segment of a RISC-V ELF executable into guest RAM.
//! Segments are placed at their virtual address, which for a kernel running
//! with translation off is its guest physical address. The file part of a
//! segment is copied and the rest up to its memory size is zero filled.
//!
//! A segment is rejected when
//! - its memory size is smaller than its file size,
//! - its address range or file range overflows,
//! - its address is not page aligned,
//! - it does not lie inside guest RAM, or
//! - it overlaps a segment loaded before it.
pub mod elf;

use crate::{
    memory::GuestMemory,
    mm::Page,
    stage2::{Permission, StageMappingError},
    vm::Gpa,
    Resource, VmError,
};
use abyss::addressing::PAGE_SIZE;
use core::convert::TryFrom;
use elf::{PFlags, PType, Peeker, Phdr, ELF};

/// Reasons an image is refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageError {
    /// No image at the path.
    NotFound,
    /// Failed to read the image.
    Io,
    /// Not an ELF file.
    BadMagic,
    /// ELF file for another class, byte order, type or machine.
    UnsupportedFormat,
    MemSizeBelowFileSize,
    AddressOverflow,
    Misaligned,
    /// The segment or the entry point lies outside guest RAM.
    OutOfGuestMemory,
    Overlap,
}

impl From<ImageError> for VmError {
    fn from(e: ImageError) -> Self {
        VmError::InvalidImage(e)
    }
}

/// Where guest images come from.
pub trait ImageSource {
    type Image: Peeker;

    /// Open the image at `path`.
    fn open(&self, path: &str) -> Option<Self::Image>;
}

/// Load `image` into `memory`. Returns the entry address.
///
/// On failure, pages already mapped stay owned by `memory` and go away with it.
pub fn load<P: Peeker>(memory: &mut GuestMemory, image: P) -> Result<Gpa, VmError> {
    let elf = ELF::from_peeker(image)?;
    for phdr in elf.phdrs() {
        let phdr = phdr?;
        if phdr.type_() == Some(PType::Load) {
            load_phdr(memory, &elf, &phdr)?;
        }
    }
    let entry = usize::try_from(elf.entry())
        .map(Gpa::new)
        .map_err(|_| ImageError::AddressOverflow)?;
    if memory.contains(entry) {
        Ok(entry)
    } else {
        Err(ImageError::OutOfGuestMemory.into())
    }
}

fn load_phdr<P: Peeker>(
    memory: &mut GuestMemory,
    elf: &ELF<P>,
    phdr: &Phdr,
) -> Result<(), VmError> {
    if phdr.memsz() < phdr.filesz() {
        return Err(ImageError::MemSizeBelowFileSize.into());
    }
    let to_usize = |v: u64| usize::try_from(v).map_err(|_| ImageError::AddressOverflow);
    let (vaddr, memsz, filesz, offset) = (
        to_usize(phdr.vaddr())?,
        to_usize(phdr.memsz())?,
        to_usize(phdr.filesz())?,
        to_usize(phdr.offset())?,
    );
    if vaddr.checked_add(memsz).is_none() || offset.checked_add(filesz).is_none() {
        return Err(ImageError::AddressOverflow.into());
    }
    let vaddr = Gpa::new(vaddr);
    if !vaddr.is_page_aligned() {
        return Err(ImageError::Misaligned.into());
    }
    if !memory.contains_range(vaddr, memsz) {
        return Err(ImageError::OutOfGuestMemory.into());
    }

    let mut perm = Permission::READ;
    perm.set(Permission::WRITE, phdr.flags().contains(PFlags::W));
    perm.set(Permission::EXECUTABLE, phdr.flags().contains(PFlags::X));

    for ofs in (0..memsz).step_by(PAGE_SIZE) {
        let mut pg = Page::new().ok_or(VmError::ResourceExhausted(Resource::Memory))?;
        if ofs < filesz {
            let len = PAGE_SIZE.min(filesz - ofs);
            elf.peeker()
                .peek_bytes(offset + ofs, &mut pg.inner_mut()[..len])
                .map_err(|_| ImageError::Io)?;
        }
        memory.map(vaddr + ofs, pg, perm).map_err(|e| match e {
            StageMappingError::Duplicated => VmError::InvalidImage(ImageError::Overlap),
            StageMappingError::OutOfMemory => VmError::ResourceExhausted(Resource::Memory),
            _ => VmError::InvalidImage(ImageError::OutOfGuestMemory),
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::GUEST_RAM_BASE, probe::Probe, testing::ImageBuilder};

    const BASE: u64 = GUEST_RAM_BASE as u64;

    fn ram() -> GuestMemory {
        GuestMemory::new(Gpa::new(GUEST_RAM_BASE), 0x10_0000).unwrap()
    }

    fn byte_at(mem: &GuestMemory, gpa: usize) -> u8 {
        let va = mem.gpa2hva(Gpa::new(gpa)).unwrap();
        unsafe { *(va.into_usize() as *const u8) }
    }

    #[test]
    fn load_text_and_bss() {
        let text = (0..0x1800).map(|i| i as u8).collect::<Vec<_>>();
        let image = ImageBuilder::new(BASE + 0x40)
            .segment(BASE, PFlags::R | PFlags::X, &text, 0x2000)
            .segment(BASE + 0x4000, PFlags::R | PFlags::W, b"data", 0x3000)
            .build();
        let mut mem = ram();
        let entry = load(&mut mem, image).unwrap();
        assert_eq!(entry, Gpa::new(GUEST_RAM_BASE + 0x40));

        assert_eq!(byte_at(&mem, GUEST_RAM_BASE + 0x17ff), 0xff);
        assert_eq!(byte_at(&mem, GUEST_RAM_BASE + 0x1800), 0);
        assert_eq!(byte_at(&mem, GUEST_RAM_BASE + 0x4003), b'a');
        // Zero filled up to the memory size.
        assert_eq!(byte_at(&mem, GUEST_RAM_BASE + 0x6fff), 0);
        // Untouched RAM stays unmapped.
        assert!(mem.gpa2hpa(Gpa::new(GUEST_RAM_BASE + 0x2000)).is_none());
        assert!(mem.gpa2hpa(Gpa::new(GUEST_RAM_BASE + 0x7000)).is_none());

        let text = mem.table().walk(Gpa::new(GUEST_RAM_BASE)).unwrap();
        assert_eq!(text.permission(), Permission::READ | Permission::EXECUTABLE);
        let data = mem.table().walk(Gpa::new(GUEST_RAM_BASE + 0x5000)).unwrap();
        assert_eq!(data.permission(), Permission::READ | Permission::WRITE);
    }

    #[test]
    fn skip_non_load_segments() {
        let image = ImageBuilder::new(BASE)
            .note()
            .segment(BASE, PFlags::R | PFlags::X, b"x", 0x1000)
            .build();
        assert!(load(&mut ram(), image).is_ok());
    }

    fn refused(image: Vec<u8>) -> VmError {
        load(&mut ram(), image).unwrap_err()
    }

    #[test]
    fn reject_malformed_segments() {
        assert_eq!(
            refused(
                ImageBuilder::new(BASE)
                    .segment(BASE, PFlags::R, &[1; 0x20], 0x10)
                    .build()
            ),
            VmError::InvalidImage(ImageError::MemSizeBelowFileSize)
        );
        assert_eq!(
            refused(
                ImageBuilder::new(BASE)
                    .segment(BASE + 0x10, PFlags::R, b"", 0x1000)
                    .build()
            ),
            VmError::InvalidImage(ImageError::Misaligned)
        );
        assert_eq!(
            refused(
                ImageBuilder::new(BASE)
                    .segment(u64::MAX & !0xfff, PFlags::R, b"", 0x2000)
                    .build()
            ),
            VmError::InvalidImage(ImageError::AddressOverflow)
        );
        assert_eq!(
            refused(
                ImageBuilder::new(BASE)
                    .segment(BASE + 0xf_f000, PFlags::R, b"", 0x2000)
                    .build()
            ),
            VmError::InvalidImage(ImageError::OutOfGuestMemory)
        );
        assert_eq!(
            refused(
                ImageBuilder::new(BASE)
                    .segment(BASE, PFlags::R, b"", 0x2000)
                    .segment(BASE + 0x1000, PFlags::R, b"", 0x1000)
                    .build()
            ),
            VmError::InvalidImage(ImageError::Overlap)
        );
    }

    #[test]
    fn reject_entry_outside_ram() {
        assert_eq!(
            refused(
                ImageBuilder::new(0x1000)
                    .segment(BASE, PFlags::R | PFlags::X, b"x", 0x1000)
                    .build()
            ),
            VmError::InvalidImage(ImageError::OutOfGuestMemory)
        );
    }
}
