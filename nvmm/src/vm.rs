//! Guest addresses.
use abyss::addressing::{PAGE_MASK, PAGE_SIZE};

/// Guest physical address
///
/// The value comes from the guest, so no range is implied. Translation through
/// the stage-2 table decides whether it means anything.
#[repr(transparent)]
#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct Gpa(usize);

impl Gpa {
    /// Create a new guest physical address.
    #[inline]
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    /// Cast into usize.
    #[inline]
    pub const fn into_usize(self) -> usize {
        self.0
    }

    /// Offset within the page.
    #[inline]
    pub const fn offset(self) -> usize {
        self.0 & PAGE_MASK
    }

    /// Start of the page that contains this address.
    #[inline]
    pub const fn page(self) -> Self {
        Self(self.0 & !PAGE_MASK)
    }

    #[inline]
    pub const fn is_page_aligned(self) -> bool {
        self.0 & PAGE_MASK == 0
    }

    /// `self + off`, or None when it wraps.
    #[inline]
    pub fn checked_add(self, off: usize) -> Option<Self> {
        self.0.checked_add(off).map(Self)
    }

    /// Bytes left in the page that contains this address.
    #[inline]
    pub const fn page_remaining(self) -> usize {
        PAGE_SIZE - self.offset()
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
        impl core::ops::Sub<$t> for $t {
            type Output = usize;

            fn sub(self, other: $t) -> Self::Output {
                self.0 - other.0
            }
        }
    };
}

impl_arith!(Gpa);

impl core::fmt::Debug for Gpa {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Gpa(0x{:x})", self.0)
    }
}
impl core::fmt::Display for Gpa {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Gpa(0x{:x})", self.0)
    }
}
