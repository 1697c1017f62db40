//! Physical and virtual addresses of the host.
//!
//! The host kernel maps every physical page at the virtual address of the same
//! value, so converting between [`Pa`] and [`Va`] never changes the number.

/// Size of a page.
pub const PAGE_SIZE: usize = 0x1000;
/// Number of bits in a page offset.
pub const PAGE_SHIFT: usize = 12;
/// Mask of a page offset.
pub const PAGE_MASK: usize = 0xfff;

/// Physical addresses of Sv39 hosts are 56 bits wide.
const PA_LIMIT: usize = 1 << 56;

/// Physical address.
#[repr(transparent)]
#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct Pa(usize);

impl Pa {
    /// Zero physical address.
    pub const ZERO: Self = Self(0);

    /// Create a new physical address with a check.
    #[inline]
    pub const fn new(addr: usize) -> Option<Self> {
        if addr < PA_LIMIT {
            Some(Self(addr))
        } else {
            None
        }
    }

    /// Cast into usize.
    #[inline]
    pub const fn into_usize(self) -> usize {
        self.0
    }

    /// Physical page number of this address.
    #[inline]
    pub const fn ppn(self) -> usize {
        self.0 >> PAGE_SHIFT
    }

    /// Offset of this address within its page.
    #[inline]
    pub const fn offset(self) -> usize {
        self.0 & PAGE_MASK
    }

    /// Convert to the kernel virtual address of the direct mapping.
    #[inline]
    pub const fn into_va(self) -> Va {
        Va(self.0)
    }
}

/// Kernel virtual address.
#[repr(transparent)]
#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct Va(usize);

impl Va {
    /// Virtual address of a kernel object.
    #[inline]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr as usize)
    }

    /// Cast into usize.
    #[inline]
    pub const fn into_usize(self) -> usize {
        self.0
    }

    /// Convert to the physical address of the direct mapping.
    #[inline]
    pub const fn into_pa(self) -> Pa {
        Pa(self.0)
    }
}

macro_rules! impl_arith {
    ($t: ty) => {
        impl core::ops::Add<usize> for $t {
            type Output = Self;

            fn add(self, other: usize) -> Self::Output {
                Self(self.0 + other)
            }
        }
        impl core::ops::AddAssign<usize> for $t {
            fn add_assign(&mut self, other: usize) {
                self.0 = self.0 + other
            }
        }
        impl core::ops::Sub<usize> for $t {
            type Output = Self;

            fn sub(self, other: usize) -> Self::Output {
                Self(self.0 - other)
            }
        }
        impl core::ops::BitAnd<usize> for $t {
            type Output = Self;

            fn bitand(self, other: usize) -> Self {
                Self(self.0 & other)
            }
        }
    };
}

impl_arith!(Va);
impl_arith!(Pa);

impl core::fmt::Debug for Va {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Va(0x{:x})", self.0)
    }
}
impl core::fmt::Display for Va {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Va(0x{:x})", self.0)
    }
}

impl core::fmt::Debug for Pa {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Pa(0x{:x})", self.0)
    }
}
impl core::fmt::Display for Pa {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Pa(0x{:x})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_mapping_is_identity() {
        let pa = Pa::new(0x8020_1000).unwrap();
        assert_eq!(pa.into_va().into_usize(), 0x8020_1000);
        assert_eq!(pa.into_va().into_pa(), pa);
        assert_eq!(pa.ppn(), 0x80201);
        assert_eq!((pa + 0x10).offset(), 0x10);
        assert!(Pa::new(1 << 56).is_none());
    }
}
