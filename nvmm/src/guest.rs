//! Per-guest state.
use crate::{
    config::Config,
    frame::GuestFrame,
    memory::GuestMemory,
    stage2::Hgatp,
    vm::Gpa,
    vmid::VmId,
};
use abyss::riscv::{GeneralPurposeRegisters, Scause};

/// Snapshot of the exit that killed a guest.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FaultRecord {
    pub cause: Scause,
    /// Guest program counter at the exit.
    pub sepc: u64,
    /// Faulting address or instruction.
    pub stval: u64,
}

/// Virtualization state of a guest process.
///
/// Owns the stage-2 address space and the register banks. Dropping it tears
/// the address space down.
pub struct GuestContext {
    vmid: VmId,
    memory: GuestMemory,
    frame: GuestFrame,
    last_fault: Option<FaultRecord>,
}

impl GuestContext {
    /// Build the context of a guest whose image is loaded in `memory` and
    /// starts at `entry`.
    pub fn new(vmid: VmId, memory: GuestMemory, entry: Gpa, config: &Config) -> Self {
        Self {
            vmid,
            memory,
            frame: GuestFrame::new(
                entry.into_usize() as u64,
                config.guest_sstatus,
                config.guest_hstatus,
            ),
            last_fault: None,
        }
    }

    #[inline]
    pub fn vmid(&self) -> VmId {
        self.vmid
    }

    /// Size of guest RAM in bytes, as configured at creation.
    #[inline]
    pub fn mem_size(&self) -> usize {
        self.memory.requested_size()
    }

    #[inline]
    pub fn memory(&self) -> &GuestMemory {
        &self.memory
    }

    #[inline]
    pub fn memory_mut(&mut self) -> &mut GuestMemory {
        &mut self.memory
    }

    #[inline]
    pub fn frame(&self) -> &GuestFrame {
        &self.frame
    }

    #[inline]
    pub fn frame_mut(&mut self) -> &mut GuestFrame {
        &mut self.frame
    }

    /// Guest general purpose registers.
    #[inline]
    pub fn gprs_mut(&mut self) -> &mut GeneralPurposeRegisters {
        &mut self.frame.guest
    }

    /// Descriptor that activates this guest's address space.
    ///
    /// Computed from the live table on every call.
    #[inline]
    pub fn hgatp(&self) -> Hgatp {
        self.memory.table().hgatp(self.vmid)
    }

    /// The exit that killed this guest, if any.
    #[inline]
    pub fn last_fault(&self) -> Option<FaultRecord> {
        self.last_fault
    }

    pub(crate) fn record_fault(&mut self, cause: Scause, stval: u64) {
        self.last_fault = Some(FaultRecord {
            cause,
            sepc: self.frame.guest_sepc,
            stval,
        });
    }
}
