//! Device interrupt vmexit controller.
//!
//! A device interrupt that arrives while the guest runs exits to the host,
//! which handles it on its own interrupt path. Only timer ticks concern the
//! guest. A guest that installed a trap vector receives the tick as a virtual
//! interrupt. A guest without one never asked for ticks, so the tick is
//! dropped.
use crate::{
    hw::{DeviceInterrupt, HardwarePort},
    vcpu::{GenericVCpuState, VmexitResult},
    VmError,
};
use abyss::riscv::{csr::Sstatus, Scause};

/// Device interrupt vmexit controller.
pub struct Controller;

impl super::VmexitController for Controller {
    fn handle<H: HardwarePort>(
        &mut self,
        reason: Scause,
        generic_vcpu_state: &mut GenericVCpuState<'_, H>,
    ) -> Result<VmexitResult, VmError> {
        if !reason.is_interrupt() {
            return Err(VmError::HandleExitFailed(reason));
        }
        match generic_vcpu_state.port.device_interrupt(reason) {
            Some(DeviceInterrupt::Timer) => {
                if generic_vcpu_state.port.vstvec() == 0 {
                    generic_vcpu_state.port.clear_guest_tick();
                } else {
                    delegate_to_guest(generic_vcpu_state, reason);
                }
                Ok(VmexitResult::Ok)
            }
            Some(DeviceInterrupt::External | DeviceInterrupt::Software) => Ok(VmexitResult::Ok),
            None => Err(VmError::HandleExitFailed(reason)),
        }
    }
}

/// Where the guest's trap handler starts for `cause`.
///
/// In vectored mode interrupts jump to `base + 4 * code`. Like the hart, the
/// computation wraps around the address space.
pub fn trap_vector(vstvec: u64, cause: Scause) -> u64 {
    let base = vstvec & !0x3;
    if vstvec & 0x3 == 1 && cause.is_interrupt() {
        base.wrapping_add(4 * cause.code())
    } else {
        base
    }
}

/// Inject `cause` into the guest as if the guest's hart trapped.
///
/// Nothing happens while the guest has interrupts disabled. The event stays
/// pending in the hart and exits again once the guest enables them.
pub fn delegate_to_guest<H: HardwarePort>(
    GenericVCpuState {
        port, guest, trap, ..
    }: &mut GenericVCpuState<'_, H>,
    cause: Scause,
) {
    let vsstatus = port.vsstatus();
    if vsstatus & Sstatus::SIE.bits() == 0 {
        return;
    }
    let frame = guest.frame_mut();

    port.set_guest_trap(cause, trap.stval, frame.guest_sepc);

    // SPIE takes the SIE checked above, then SIE is masked for the handler.
    let mut next = (vsstatus & !(Sstatus::SPP | Sstatus::SIE).bits()) | Sstatus::SPIE.bits();
    if frame.guest_sstatus().contains(Sstatus::SPP) {
        next |= Sstatus::SPP.bits();
    }
    port.set_vsstatus(next);

    frame.guest_sepc = trap_vector(port.vstvec(), cause);
    // The handler runs in VS-mode.
    frame.guest_sstatus |= Sstatus::SPP.bits();
}
