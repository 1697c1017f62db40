//! 64-bit little-endian RISC-V ELF reader.
use super::ImageError;
use alloc::vec::Vec;
use core::convert::TryFrom;
use num_enum::TryFromPrimitive;

/// Byte peekable object.
pub trait Peeker {
    type Error;
    fn peek_bytes(&self, pos: usize, slice: &mut [u8]) -> Result<(), Self::Error>;
}

impl Peeker for &[u8] {
    type Error = ();
    fn peek_bytes(&self, pos: usize, slice: &mut [u8]) -> Result<(), Self::Error> {
        let end = pos.checked_add(slice.len()).ok_or(())?;
        slice.copy_from_slice(self.get(pos..end).ok_or(())?);
        Ok(())
    }
}

impl Peeker for Vec<u8> {
    type Error = ();
    fn peek_bytes(&self, pos: usize, slice: &mut [u8]) -> Result<(), Self::Error> {
        self.as_slice().peek_bytes(pos, slice)
    }
}

const EHDR_SIZE: usize = 64;
const PHDR_SIZE: usize = 56;
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;
const ET_EXEC: u16 = 2;
const EM_RISCV: u16 = 0xf3;

#[repr(u32)]
#[derive(Clone, Copy, PartialEq, Eq, Debug, TryFromPrimitive)]
pub enum PType {
    Null = 0x0,
    Load = 0x1,
    Dynamic = 0x2,
    Interp = 0x3,
    Note = 0x4,
    Shlib = 0x5,
    Phdr = 0x6,
    Tls = 0x7,
    GnuEhFrame = 0x6474e550,
    GnuStack = 0x6474e551,
    GnuRelro = 0x6474e552,
    RiscvAttributes = 0x70000003,
}

bitflags::bitflags! {
    /// Segment permission flags.
    pub struct PFlags: u32 {
        const X = 1 << 0;
        const W = 1 << 1;
        const R = 1 << 2;
    }
}

fn u16_at(raw: &[u8], pos: usize) -> u16 {
    u16::from_le_bytes([raw[pos], raw[pos + 1]])
}

fn u32_at(raw: &[u8], pos: usize) -> u32 {
    let mut b = [0; 4];
    b.copy_from_slice(&raw[pos..pos + 4]);
    u32::from_le_bytes(b)
}

fn u64_at(raw: &[u8], pos: usize) -> u64 {
    let mut b = [0; 8];
    b.copy_from_slice(&raw[pos..pos + 8]);
    u64::from_le_bytes(b)
}

/// Generic ELF representation.
pub struct ELF<T>
where
    T: Peeker,
{
    entry: u64,
    phoff: u64,
    phnum: u16,
    peeker: T,
}

impl<T> ELF<T>
where
    T: Peeker,
{
    /// Parse the file header.
    pub fn from_peeker(peeker: T) -> Result<ELF<T>, ImageError> {
        let mut raw = [0u8; EHDR_SIZE];
        peeker
            .peek_bytes(0, &mut raw)
            .map_err(|_| ImageError::BadMagic)?;
        if &raw[0..4] != b"\x7FELF" {
            return Err(ImageError::BadMagic);
        }
        if raw[4] != ELFCLASS64
            || raw[5] != ELFDATA2LSB
            || u16_at(&raw, 16) != ET_EXEC
            || u16_at(&raw, 18) != EM_RISCV
            || u16_at(&raw, 54) as usize != PHDR_SIZE
        {
            return Err(ImageError::UnsupportedFormat);
        }
        Ok(Self {
            entry: u64_at(&raw, 24),
            phoff: u64_at(&raw, 32),
            phnum: u16_at(&raw, 56),
            peeker,
        })
    }

    #[inline]
    pub fn peeker(&self) -> &T {
        &self.peeker
    }

    /// Get entry point of this binary.
    #[inline]
    pub fn entry(&self) -> u64 {
        self.entry
    }

    /// Get iterator that iterates over program headers in this binary.
    pub fn phdrs(&self) -> PhdrIterator<'_, T> {
        PhdrIterator {
            base: self.phoff,
            size: self.phnum,
            cursor: 0,
            elf: self,
        }
    }
}

/// Program header.
#[derive(Clone, Copy, Debug)]
pub struct Phdr {
    p_type: u32,
    p_flags: u32,
    p_offset: u64,
    p_vaddr: u64,
    p_filesz: u64,
    p_memsz: u64,
}

impl Phdr {
    /// Segment type, or None for types this reader does not know.
    #[inline]
    pub fn type_(&self) -> Option<PType> {
        PType::try_from(self.p_type).ok()
    }

    #[inline]
    pub fn flags(&self) -> PFlags {
        PFlags::from_bits_truncate(self.p_flags)
    }

    #[inline]
    pub fn offset(&self) -> u64 {
        self.p_offset
    }

    #[inline]
    pub fn vaddr(&self) -> u64 {
        self.p_vaddr
    }

    #[inline]
    pub fn filesz(&self) -> u64 {
        self.p_filesz
    }

    #[inline]
    pub fn memsz(&self) -> u64 {
        self.p_memsz
    }
}

/// Program header iterator created by [`ELF::phdrs`] method.
pub struct PhdrIterator<'a, T>
where
    T: Peeker,
{
    base: u64,
    size: u16,
    cursor: u16,
    elf: &'a ELF<T>,
}

impl<'a, T> Iterator for PhdrIterator<'a, T>
where
    T: Peeker,
{
    type Item = Result<Phdr, ImageError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.size {
            return None;
        }
        let pos = (self.cursor as u64)
            .checked_mul(PHDR_SIZE as u64)
            .and_then(|off| off.checked_add(self.base))
            .and_then(|pos| usize::try_from(pos).ok());
        self.cursor += 1;

        let mut raw = [0u8; PHDR_SIZE];
        Some(
            pos.ok_or(ImageError::AddressOverflow)
                .and_then(|pos| {
                    self.elf
                        .peeker
                        .peek_bytes(pos, &mut raw)
                        .map_err(|_| ImageError::Io)
                })
                .map(|_| Phdr {
                    p_type: u32_at(&raw, 0),
                    p_flags: u32_at(&raw, 4),
                    p_offset: u64_at(&raw, 8),
                    p_vaddr: u64_at(&raw, 16),
                    p_filesz: u64_at(&raw, 32),
                    p_memsz: u64_at(&raw, 40),
                }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ImageBuilder;

    #[test]
    fn parse_headers() {
        let image = ImageBuilder::new(0x8000_0010)
            .segment(0x8000_0000, PFlags::R | PFlags::X, b"text", 0x1000)
            .note()
            .segment(0x8000_1000, PFlags::R | PFlags::W, b"", 0x2000)
            .build();
        let elf = ELF::from_peeker(image.as_slice()).unwrap();
        assert_eq!(elf.entry(), 0x8000_0010);

        let phdrs = elf.phdrs().collect::<Result<Vec<_>, _>>().unwrap();
        assert_eq!(phdrs.len(), 3);
        assert_eq!(phdrs[0].type_(), Some(PType::Load));
        assert_eq!(phdrs[0].flags(), PFlags::R | PFlags::X);
        assert_eq!(phdrs[0].filesz(), 4);
        assert_eq!(phdrs[0].memsz(), 0x1000);
        let mut text = [0u8; 4];
        elf.peeker()
            .peek_bytes(phdrs[0].offset() as usize, &mut text)
            .unwrap();
        assert_eq!(&text, b"text");
        assert_eq!(phdrs[1].type_(), Some(PType::Note));
        assert_eq!(phdrs[2].vaddr(), 0x8000_1000);
    }

    #[test]
    fn reject_foreign_files() {
        assert_eq!(
            ELF::from_peeker(&b"#!/bin/sh\n"[..]).err(),
            Some(ImageError::BadMagic)
        );
        let mut image = ImageBuilder::new(0).build();
        image[0] = 0;
        assert_eq!(
            ELF::from_peeker(image).err(),
            Some(ImageError::BadMagic)
        );
        let x86 = ImageBuilder::new(0).machine(0x3e).build();
        assert_eq!(
            ELF::from_peeker(x86).err(),
            Some(ImageError::UnsupportedFormat)
        );
    }

    #[test]
    fn truncated_phdr_table() {
        let mut image = ImageBuilder::new(0)
            .segment(0x8000_0000, PFlags::R, b"", 0x1000)
            .build();
        image.truncate(EHDR_SIZE + 8);
        let elf = ELF::from_peeker(image).unwrap();
        assert!(matches!(elf.phdrs().next(), Some(Err(ImageError::Io))));
    }
}
