//! Interrupt enable state of the current hart.
use super::csr::Sstatus;

/// Enable supervisor interrupts on this hart.
#[inline]
pub fn intr_on() {
    unsafe { core::arch::asm!("csrs sstatus, {0}", in(reg) Sstatus::SIE.bits()) };
}

/// Disable supervisor interrupts on this hart.
#[inline]
pub fn intr_off() {
    unsafe { core::arch::asm!("csrc sstatus, {0}", in(reg) Sstatus::SIE.bits()) };
}
