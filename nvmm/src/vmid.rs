//! Virtual machine identifiers.
//!
//! A vmid tags the stage-2 translations of a guest so that the hart can keep
//! translations of different guests in its caches at the same time. Vmids
//! are handed out in increasing order and are never reused. The `hgatp`
//! field is 14 bits wide, so at most `VMID_SIZE - 1` guests can be created
//! during the lifetime of the host.
use crate::{Resource, VmError};
use abyss::riscv::csr::hgatp::VMID_SIZE;
use abyss::spin_lock::SpinLock;

/// Identifier of a virtual machine.
#[repr(transparent)]
#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Ord, Hash, Debug)]
pub struct VmId(u64);

impl VmId {
    /// Cast into u64.
    #[inline]
    pub const fn into_u64(self) -> u64 {
        self.0
    }

    /// Rebuild a vmid from the `hgatp` field.
    #[inline]
    pub(crate) const fn from_field(v: u64) -> Self {
        Self(v)
    }
}

impl core::fmt::Display for VmId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Allocator of vmids.
pub struct VmIdAllocator {
    next: SpinLock<u64>,
}

impl VmIdAllocator {
    /// Create an allocator whose first vmid is 1.
    pub const fn new() -> Self {
        Self::starting_at(1)
    }

    pub(crate) const fn starting_at(first: u64) -> Self {
        Self {
            next: SpinLock::new(first),
        }
    }

    /// Issue the next vmid.
    pub fn allocate(&self) -> Result<VmId, VmError> {
        let mut next = self.next.lock();
        if *next >= VMID_SIZE {
            return Err(VmError::ResourceExhausted(Resource::VmId));
        }
        let vmid = VmId(*next);
        *next += 1;
        Ok(vmid)
    }
}

impl Default for VmIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
