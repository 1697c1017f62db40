//! Physical pages.
//!
//! Frames come from the kernel's global allocator. Every frame is page
//! aligned and its kernel virtual address equals its physical address.
use abyss::addressing::{Pa, Va, PAGE_SIZE};
use alloc::alloc::{alloc_zeroed, dealloc, Layout};

const PAGE_LAYOUT: Layout = unsafe { Layout::from_size_align_unchecked(PAGE_SIZE, PAGE_SIZE) };

/// An owned, zero-initialized physical page.
pub struct Page {
    va: Va,
}

impl Page {
    /// Allocate a zeroed page. Returns None when out of memory.
    pub fn new() -> Option<Self> {
        let ptr = unsafe { alloc_zeroed(PAGE_LAYOUT) };
        if ptr.is_null() {
            None
        } else {
            Some(Self {
                va: Va::from_ptr(ptr as *const u8),
            })
        }
    }

    /// Kernel virtual address of this page.
    #[inline]
    pub fn va(&self) -> Va {
        self.va
    }

    /// Physical address of this page.
    #[inline]
    pub fn pa(&self) -> Pa {
        self.va.into_pa()
    }

    /// Give up the ownership of this page.
    ///
    /// The frame stays allocated until [`Page::from_pa`] rebuilds the page.
    #[inline]
    pub fn into_raw(self) -> Pa {
        let pa = self.pa();
        core::mem::forget(self);
        pa
    }

    /// Take the ownership of the frame at `pa`.
    ///
    /// # Safety
    /// `pa` must come from [`Page::into_raw`] and must not be owned elsewhere.
    #[inline]
    pub unsafe fn from_pa(pa: Pa) -> Self {
        Self { va: pa.into_va() }
    }

    /// Contents of this page.
    #[inline]
    pub fn inner(&self) -> &[u8; PAGE_SIZE] {
        unsafe { &*(self.va.into_usize() as *const [u8; PAGE_SIZE]) }
    }

    /// Mutable contents of this page.
    #[inline]
    pub fn inner_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        unsafe { &mut *(self.va.into_usize() as *mut [u8; PAGE_SIZE]) }
    }
}

impl Drop for Page {
    fn drop(&mut self) {
        unsafe { dealloc(self.va.into_usize() as *mut u8, PAGE_LAYOUT) }
    }
}
