//! Hypercall vmexit controller.
use crate::{
    console::Console,
    hw::HardwarePort,
    hypercall::Hypercall,
    vcpu::{GenericVCpuState, VmexitResult},
    VmError,
};
use abyss::riscv::{Exception, Scause, Trap, ECALL_INSN_LEN};

/// Hypercall vmexit controller.
pub struct Controller<'c, C: Console> {
    console: &'c C,
}

impl<'c, C: Console> Controller<'c, C> {
    /// Create a new hypercall controller.
    pub fn new(console: &'c C) -> Self {
        Self { console }
    }
}

impl<'c, C: Console> super::VmexitController for Controller<'c, C> {
    fn handle<H: HardwarePort>(
        &mut self,
        reason: Scause,
        GenericVCpuState {
            port, guest, proc, ..
        }: &mut GenericVCpuState<'_, H>,
    ) -> Result<VmexitResult, VmError> {
        match reason.decode() {
            Trap::Exception(Exception::VirtualSupervisorEnvCall) => {
                if proc.killed() {
                    return Ok(VmexitResult::Exited(-1));
                }
                // Resume after the ecall. The pc wraps like the hart's.
                let frame = guest.frame_mut();
                frame.guest_sepc = frame.guest_sepc.wrapping_add(ECALL_INSN_LEN);
                let hc = Hypercall::resolve(&guest.frame().guest);
                let hart = port.hart_id();

                port.enable_interrupts();
                let ret = hc.serve(guest, self.console, hart).unwrap_or_else(|e| {
                    warning!("guest {}: {}", guest.vmid(), e);
                    u64::MAX
                });
                port.disable_interrupts();

                guest.gprs_mut().a0 = ret;
                Ok(VmexitResult::Ok)
            }
            _ => Err(VmError::HandleExitFailed(reason)),
        }
    }
}
