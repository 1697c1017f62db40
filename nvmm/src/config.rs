//! Compile-time limits and the per-hypervisor configuration.
use crate::vm::Gpa;
use abyss::riscv::csr::{CounterEnable, ExceptionDelegation, Hstatus, InterruptDelegation, Sstatus};

/// Number of process slots.
pub const NPROC: usize = 64;

/// Guest kernels are linked to run from this guest physical address.
pub const GUEST_RAM_BASE: usize = 0x8000_0000;

/// Sv39x4 translates 41 bits of guest physical address.
pub const GUEST_PHYS_LIMIT: usize = 1 << 41;

/// Configuration of a [`Hypervisor`].
///
/// [`Hypervisor`]: crate::Hypervisor
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// Number of process slots.
    pub nproc: usize,
    /// First guest physical address of guest RAM.
    pub ram_base: Gpa,
    /// Exceptions the guest handles itself (`hedeleg`).
    pub exception_delegation: ExceptionDelegation,
    /// Interrupts the guest handles itself (`hideleg`).
    pub interrupt_delegation: InterruptDelegation,
    /// Counters the guest may read (`hcounteren`).
    pub counter_enable: CounterEnable,
    /// `hstatus` of a new guest.
    pub guest_hstatus: Hstatus,
    /// `sstatus` of a new guest. `sret` consumes it on the first entry.
    pub guest_sstatus: Sstatus,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            nproc: NPROC,
            ram_base: Gpa::new(GUEST_RAM_BASE),
            exception_delegation: ExceptionDelegation::INSTRUCTION_MISALIGNED
                | ExceptionDelegation::INSTRUCTION_FAULT
                | ExceptionDelegation::LOAD_MISALIGNED
                | ExceptionDelegation::LOAD_FAULT
                | ExceptionDelegation::STORE_MISALIGNED
                | ExceptionDelegation::STORE_FAULT
                | ExceptionDelegation::USER_ECALL
                | ExceptionDelegation::INSTRUCTION_PAGE_FAULT
                | ExceptionDelegation::LOAD_PAGE_FAULT
                | ExceptionDelegation::STORE_PAGE_FAULT,
            interrupt_delegation: InterruptDelegation::VSSIP
                | InterruptDelegation::VSTIP
                | InterruptDelegation::VSEIP,
            counter_enable: CounterEnable::TM,
            guest_hstatus: Hstatus::VTW | Hstatus::SPVP | Hstatus::SPV,
            guest_sstatus: Sstatus::SPP | Sstatus::SPIE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_masks() {
        let c = Config::default();
        assert_eq!(c.exception_delegation.bits(), 0xb1f3);
        assert_eq!(c.interrupt_delegation.bits(), 0x444);
        assert_eq!(c.counter_enable.bits(), 0x2);
        assert_eq!(c.guest_hstatus.bits(), (1 << 21) | (1 << 8) | (1 << 7));
        assert_eq!(c.guest_sstatus.bits(), (1 << 8) | (1 << 5));
    }
}
