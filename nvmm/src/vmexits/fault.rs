//! Guest page fault vmexit controller.
//!
//! Guest RAM is populated on first touch. A guest page fault on an unmapped
//! page of guest RAM maps a zeroed page and retries the access. Any other
//! guest page fault is left to the next controller.
use crate::{
    hw::HardwarePort,
    probe::Probe,
    vcpu::{GenericVCpuState, VmexitResult},
    VmError,
};
use abyss::riscv::{Exception, Scause, Trap};

/// Guest page fault vmexit controller.
pub struct Controller;

impl super::VmexitController for Controller {
    fn handle<H: HardwarePort>(
        &mut self,
        reason: Scause,
        GenericVCpuState {
            port, guest, trap, ..
        }: &mut GenericVCpuState<'_, H>,
    ) -> Result<VmexitResult, VmError> {
        match reason.decode() {
            Trap::Exception(
                Exception::InstructionGuestPageFault
                | Exception::LoadGuestPageFault
                | Exception::StoreGuestPageFault,
            ) => {
                let gpa = trap.fault_gpa();
                let vmid = guest.vmid();
                let memory = guest.memory_mut();
                if !memory.contains(gpa) || memory.gpa2hpa(gpa).is_some() {
                    return Err(VmError::HandleExitFailed(reason));
                }
                memory.populate(gpa)?;
                port.fence_guest(vmid, gpa.page());
                Ok(VmexitResult::Ok)
            }
            _ => Err(VmError::HandleExitFailed(reason)),
        }
    }
}
