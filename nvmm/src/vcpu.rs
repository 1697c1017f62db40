//! Virtual CPU run loop.
//!
//! A guest has exactly one vcpu, and the process hosting the guest runs it.
//! [`vcpu_loop`] alternates between two states. In the host it configures
//! the hart with interrupts off and triages the last exit. In the guest the
//! host is suspended until the next trap.
use crate::{
    config::Config,
    guest::GuestContext,
    hw::{HardwarePort, TrapInfo},
    proc::Proc,
    vmexits::VmexitController,
    VmError,
};

/// Possible vmexit results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmexitResult {
    /// Vmexit is handled; resume the guest.
    Ok,
    /// The vcpu must stop with the exit code.
    Exited(i32),
}

/// A visible state for VCpu.
pub struct GenericVCpuState<'a, H: HardwarePort> {
    /// Privileged state of the current hart.
    pub port: &'a mut H,
    /// The guest this vcpu belongs to.
    pub guest: &'a mut GuestContext,
    /// Process that hosts the guest.
    pub proc: &'a Proc,
    /// Trap registers of the last exit.
    pub trap: TrapInfo,
}

/// Run the guest until it exits or gets killed. Returns the exit status.
///
/// The caller holds the context lock of `proc`, so no other hart can run
/// this guest.
pub fn vcpu_loop<H, C>(
    port: &mut H,
    proc: &Proc,
    guest: &mut GuestContext,
    config: &Config,
    controller: &mut C,
) -> i32
where
    H: HardwarePort,
    C: VmexitController,
{
    port.disable_interrupts();
    loop {
        port.set_translation(guest.hgatp());
        port.set_delegation(config.exception_delegation, config.interrupt_delegation);
        port.set_counter_enable(config.counter_enable);
        port.clear_pending();

        let trap = port.enter_guest(guest.frame_mut());
        debug!(
            "guest {}: exit {:?} sepc=0x{:x}",
            guest.vmid(),
            trap.scause,
            guest.frame().guest_sepc
        );

        let mut state = GenericVCpuState {
            port: &mut *port,
            guest: &mut *guest,
            proc,
            trap,
        };
        match controller.handle(trap.scause, &mut state) {
            Ok(VmexitResult::Ok) => (),
            Ok(VmexitResult::Exited(code)) => return code,
            Err(e) => {
                let e = match e {
                    VmError::HandleExitFailed(cause) => VmError::UnsupportedTrapCause(cause),
                    e => e,
                };
                warning!(
                    "guest {}: {} sepc=0x{:x} stval=0x{:x}",
                    guest.vmid(),
                    e,
                    guest.frame().guest_sepc,
                    trap.stval
                );
                guest.record_fault(trap.scause, trap.stval);
                proc.set_killed();
            }
        }

        if proc.killed() {
            return -1;
        }
    }
}
