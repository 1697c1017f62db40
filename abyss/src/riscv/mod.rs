//! RISC-V hypervisor extension.
//!
//! The host kernel runs in HS-mode. A guest kernel runs in VS-mode and its
//! user programs run in VU-mode. The registers defined here are the ones a
//! type 2 hypervisor touches to enter and leave the guest.

mod cause;
pub mod csr;
#[cfg(target_arch = "riscv64")]
pub mod interrupt;
mod registers;

pub use cause::{Exception, Interrupt, Scause, Trap};
pub use registers::GeneralPurposeRegisters;

/// Width of the instruction that raised an environment call.
pub const ECALL_INSN_LEN: u64 = 4;
