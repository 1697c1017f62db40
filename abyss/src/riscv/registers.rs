/// RISC-V general purpose registers, `x0` excluded.
///
/// The order is fixed; the guest entry trampoline addresses each register by
/// its offset.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GeneralPurposeRegisters {
    pub ra: u64,
    pub sp: u64,
    pub gp: u64,
    pub tp: u64,
    pub t0: u64,
    pub t1: u64,
    pub t2: u64,
    // callee-preserved.
    pub s0: u64,
    // callee-preserved.
    pub s1: u64,
    pub a0: u64,
    pub a1: u64,
    pub a2: u64,
    pub a3: u64,
    pub a4: u64,
    pub a5: u64,
    pub a6: u64,
    pub a7: u64,
    // s2 to s11 are callee-preserved.
    pub s2: u64,
    pub s3: u64,
    pub s4: u64,
    pub s5: u64,
    pub s6: u64,
    pub s7: u64,
    pub s8: u64,
    pub s9: u64,
    pub s10: u64,
    pub s11: u64,
    pub t3: u64,
    pub t4: u64,
    pub t5: u64,
    pub t6: u64,
}

impl GeneralPurposeRegisters {
    /// Argument register `a<n>` for `n` in `0..6`.
    #[inline]
    pub fn arg(&self, n: usize) -> Option<u64> {
        match n {
            0 => Some(self.a0),
            1 => Some(self.a1),
            2 => Some(self.a2),
            3 => Some(self.a3),
            4 => Some(self.a4),
            5 => Some(self.a5),
            _ => None,
        }
    }
}
