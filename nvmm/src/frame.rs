//! Register banks saved across a transfer of control.
use abyss::riscv::{
    csr::{Hstatus, Sstatus},
    GeneralPurposeRegisters,
};

/// Register bank of an ordinary process.
#[repr(C)]
#[derive(Default, Clone, Debug)]
pub struct TrapFrame {
    pub gprs: GeneralPurposeRegisters,
    /// User program counter.
    pub epc: u64,
}

/// Paired host and guest register banks of a guest process.
///
/// While the guest runs, `guest` is live in the hart and `host` holds the
/// suspended host context. On a trap the entry trampoline swaps them back.
/// The trampoline addresses the fields by offset, so the layout is fixed.
#[repr(C)]
#[derive(Default, Clone, Debug)]
pub struct GuestFrame {
    /// Host callee context while the guest runs.
    pub host: GeneralPurposeRegisters,
    /// Guest registers while the host runs.
    pub guest: GeneralPurposeRegisters,
    pub host_sstatus: u64,
    pub host_hstatus: u64,
    pub host_scounteren: u64,
    pub host_sscratch: u64,
    pub host_stvec: u64,
    /// `sstatus` restored before `sret` into the guest.
    pub guest_sstatus: u64,
    /// `hstatus` restored before `sret` into the guest.
    pub guest_hstatus: u64,
    pub guest_scounteren: u64,
    /// Guest program counter. `sret` jumps here.
    pub guest_sepc: u64,
}

impl GuestFrame {
    /// Frame of a guest that has never run.
    ///
    /// Both banks are zero. The first entry starts at `entry` in VS-mode.
    pub fn new(entry: u64, sstatus: Sstatus, hstatus: Hstatus) -> Self {
        Self {
            guest_sstatus: sstatus.bits(),
            guest_hstatus: hstatus.bits(),
            guest_sepc: entry,
            ..Default::default()
        }
    }

    /// Status the guest's `sret` restores.
    #[inline]
    pub fn guest_sstatus(&self) -> Sstatus {
        Sstatus::from_bits_truncate(self.guest_sstatus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memoffset::offset_of;

    #[test]
    fn trampoline_layout() {
        assert_eq!(offset_of!(GuestFrame, host), 0);
        assert_eq!(offset_of!(GuestFrame, guest), 248);
        assert_eq!(offset_of!(GuestFrame, host_sstatus), 496);
        assert_eq!(offset_of!(GuestFrame, host_hstatus), 504);
        assert_eq!(offset_of!(GuestFrame, host_scounteren), 512);
        assert_eq!(offset_of!(GuestFrame, host_sscratch), 520);
        assert_eq!(offset_of!(GuestFrame, host_stvec), 528);
        assert_eq!(offset_of!(GuestFrame, guest_sstatus), 536);
        assert_eq!(offset_of!(GuestFrame, guest_hstatus), 544);
        assert_eq!(offset_of!(GuestFrame, guest_scounteren), 552);
        assert_eq!(offset_of!(GuestFrame, guest_sepc), 560);
        assert_eq!(core::mem::size_of::<GuestFrame>(), 568);
    }

    #[test]
    fn fresh_guest() {
        let frame = GuestFrame::new(
            0x8000_0000,
            Sstatus::SPP | Sstatus::SPIE,
            Hstatus::SPV | Hstatus::SPVP,
        );
        assert_eq!(frame.guest_sepc, 0x8000_0000);
        assert_eq!(frame.guest, GeneralPurposeRegisters::default());
        assert_eq!(frame.guest_sstatus(), Sstatus::SPP | Sstatus::SPIE);
        assert_eq!(frame.guest_hstatus, Hstatus::SPV.bits() | Hstatus::SPVP.bits());
    }
}
