//! Interface to play with vmexits.
//!
//! Controllers are chained as nested pairs. The first controller that
//! recognizes the exit handles it; the rest never see it.
use crate::{
    hw::HardwarePort,
    vcpu::{GenericVCpuState, VmexitResult},
    VmError,
};
use abyss::riscv::Scause;

pub mod fault;
pub mod hypercall;
pub mod interrupt;

/// Controller that defines action on vmexit.
pub trait VmexitController {
    /// Handle the vmexit on this controller.
    ///
    /// Returns [`VmError::HandleExitFailed`] when failed to handle vmexit on this controller.
    fn handle<H: HardwarePort>(
        &mut self,
        reason: Scause,
        generic_vcpu_state: &mut GenericVCpuState<'_, H>,
    ) -> Result<VmexitResult, VmError>;
}

impl VmexitController for () {
    fn handle<H: HardwarePort>(
        &mut self,
        reason: Scause,
        _generic_vcpu_state: &mut GenericVCpuState<'_, H>,
    ) -> Result<VmexitResult, VmError> {
        Err(VmError::HandleExitFailed(reason))
    }
}

impl<A: VmexitController, B: VmexitController> VmexitController for (A, B) {
    fn handle<H: HardwarePort>(
        &mut self,
        reason: Scause,
        generic_vcpu_state: &mut GenericVCpuState<'_, H>,
    ) -> Result<VmexitResult, VmError> {
        let (a, b) = self;
        match a.handle(reason, generic_vcpu_state) {
            Err(VmError::HandleExitFailed(reason)) => b.handle(reason, generic_vcpu_state),
            r => r,
        }
    }
}
