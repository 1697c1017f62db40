use core::convert::TryFrom;
use num_enum::TryFromPrimitive;

const INTERRUPT_BIT: u64 = 1 << 63;

/// Value of the `scause` register.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Scause(u64);

impl Scause {
    /// Wrap a raw `scause` value.
    #[inline]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Cause of the synchronous exception `e`.
    #[inline]
    pub const fn exception(e: Exception) -> Self {
        Self(e as u64)
    }

    /// Cause of the interrupt `i`.
    #[inline]
    pub const fn interrupt(i: Interrupt) -> Self {
        Self(INTERRUPT_BIT | i as u64)
    }

    #[inline]
    pub const fn bits(&self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_interrupt(&self) -> bool {
        self.0 & INTERRUPT_BIT != 0
    }

    /// Exception or interrupt code without the interrupt bit.
    #[inline]
    pub const fn code(&self) -> u64 {
        self.0 & !INTERRUPT_BIT
    }

    /// Decode the cause.
    pub fn decode(&self) -> Trap {
        if self.is_interrupt() {
            Interrupt::try_from(self.code())
                .map(Trap::Interrupt)
                .unwrap_or(Trap::Unknown(*self))
        } else {
            Exception::try_from(self.code())
                .map(Trap::Exception)
                .unwrap_or(Trap::Unknown(*self))
        }
    }
}

impl core::fmt::Debug for Scause {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Scause(0x{:x})", self.0)
    }
}

/// Synchronous exception codes seen by HS-mode.
#[repr(u64)]
#[derive(Clone, Copy, PartialEq, Eq, Debug, TryFromPrimitive)]
pub enum Exception {
    InstructionMisaligned = 0,
    InstructionFault = 1,
    IllegalInstruction = 2,
    Breakpoint = 3,
    LoadMisaligned = 4,
    LoadFault = 5,
    StoreMisaligned = 6,
    StoreFault = 7,
    UserEnvCall = 8,
    SupervisorEnvCall = 9,
    /// `ecall` executed in VS-mode. This is how a guest issues a hypercall.
    VirtualSupervisorEnvCall = 10,
    MachineEnvCall = 11,
    InstructionPageFault = 12,
    LoadPageFault = 13,
    StorePageFault = 15,
    InstructionGuestPageFault = 20,
    LoadGuestPageFault = 21,
    VirtualInstruction = 22,
    StoreGuestPageFault = 23,
}

/// Interrupt codes seen by HS-mode.
#[repr(u64)]
#[derive(Clone, Copy, PartialEq, Eq, Debug, TryFromPrimitive)]
pub enum Interrupt {
    SupervisorSoftware = 1,
    VirtualSupervisorSoftware = 2,
    SupervisorTimer = 5,
    VirtualSupervisorTimer = 6,
    SupervisorExternal = 9,
    VirtualSupervisorExternal = 10,
    SupervisorGuestExternal = 12,
}

/// Decoded `scause`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Trap {
    Exception(Exception),
    Interrupt(Interrupt),
    /// Reserved or platform specific code.
    Unknown(Scause),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_hypercall() {
        let c = Scause::from_bits(10);
        assert!(!c.is_interrupt());
        assert_eq!(
            c.decode(),
            Trap::Exception(Exception::VirtualSupervisorEnvCall)
        );
    }

    #[test]
    fn decode_interrupts() {
        let c = Scause::from_bits(0x8000_0000_0000_0001);
        assert!(c.is_interrupt());
        assert_eq!(c.code(), 1);
        assert_eq!(c.decode(), Trap::Interrupt(Interrupt::SupervisorSoftware));
        assert_eq!(
            Scause::interrupt(Interrupt::SupervisorTimer).bits(),
            0x8000_0000_0000_0005
        );
    }

    #[test]
    fn decode_reserved() {
        let c = Scause::from_bits(14);
        assert_eq!(c.decode(), Trap::Unknown(c));
        let c = Scause::from_bits(0x8000_0000_0000_0003);
        assert_eq!(c.decode(), Trap::Unknown(c));
    }
}
