//! Privileged hart state used by the vmm.
//!
//! Everything the dispatcher and the exit controllers do to the hart goes
//! through [`HardwarePort`]. [`RiscvHart`] is the implementation that runs on
//! the target.
use crate::{frame::GuestFrame, stage2::Hgatp, vm::Gpa, vmid::VmId};
use abyss::riscv::{
    csr::{CounterEnable, ExceptionDelegation, InterruptDelegation},
    Scause,
};

#[cfg(target_arch = "riscv64")]
mod riscv;
#[cfg(target_arch = "riscv64")]
pub use riscv::RiscvHart;

/// Trap registers read right after the guest exits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrapInfo {
    pub scause: Scause,
    pub stval: u64,
    /// Guest physical address of a guest page fault, shifted right by 2.
    pub htval: u64,
}

impl TrapInfo {
    /// Trap info of an exit that carries no address.
    pub const fn new(scause: Scause) -> Self {
        Self {
            scause,
            stval: 0,
            htval: 0,
        }
    }

    /// Guest physical address of a guest page fault.
    #[inline]
    pub fn fault_gpa(&self) -> Gpa {
        Gpa::new(((self.htval << 2) | (self.stval & 0x3)) as usize)
    }
}

/// Class of a device interrupt that the host handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceInterrupt {
    /// Timer tick.
    Timer,
    External,
    Software,
}

/// The host kernel's device interrupt handler.
pub trait HostInterrupts {
    /// Handle the interrupt of `cause` if it is a device interrupt.
    ///
    /// Returns None when `cause` is not a device interrupt.
    fn devintr(&mut self, cause: Scause) -> Option<DeviceInterrupt>;
}

/// Narrow port to the privileged state of the current hart.
pub trait HardwarePort {
    /// Install the stage-2 descriptor (`hgatp`).
    fn set_translation(&mut self, hgatp: Hgatp);
    /// Install the delegation masks (`hedeleg`, `hideleg`).
    fn set_delegation(&mut self, exceptions: ExceptionDelegation, interrupts: InterruptDelegation);
    /// Install the guest counter enables (`hcounteren`).
    fn set_counter_enable(&mut self, counters: CounterEnable);
    /// Drop interrupts injected into the guest by software (`hvip`).
    fn clear_pending(&mut self);
    /// Clear the guest-visible tick (`vsip.SSIP`).
    ///
    /// The host timer reaches supervisor mode as a software interrupt, and
    /// that is the bit a tick leaves pending in the guest.
    fn clear_guest_tick(&mut self);
    fn enable_interrupts(&mut self);
    fn disable_interrupts(&mut self);
    /// Run the guest until it traps.
    ///
    /// The host is suspended while the guest runs. On return, `frame.guest`
    /// holds the guest registers and `frame.guest_sepc` the trapping pc.
    fn enter_guest(&mut self, frame: &mut GuestFrame) -> TrapInfo;
    /// Let the host handle a device interrupt that arrived in the guest.
    fn device_interrupt(&mut self, cause: Scause) -> Option<DeviceInterrupt>;
    /// The guest's status register (`vsstatus`).
    fn vsstatus(&self) -> u64;
    fn set_vsstatus(&mut self, vsstatus: u64);
    /// The guest's trap vector (`vstvec`). Zero until the guest installs one.
    fn vstvec(&self) -> u64;
    /// Fill the guest's trap registers (`vscause`, `vstval`, `vsepc`).
    fn set_guest_trap(&mut self, cause: Scause, tval: u64, epc: u64);
    /// Index of the current hart.
    fn hart_id(&self) -> u64;
    /// Flush stale translations of `gpa` tagged with `vmid`.
    fn fence_guest(&mut self, vmid: VmId, gpa: Gpa);
}
