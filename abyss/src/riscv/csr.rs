//! Control and status registers.
//!
//! Field layouts are available on every target so that the vmm can be unit
//! tested on the build host. The accessors themselves only exist on riscv64.

bitflags::bitflags! {
    /// Supervisor status register (`sstatus`, also the layout of `vsstatus`).
    pub struct Sstatus: u64 {
        /// Supervisor interrupt enable.
        const SIE = 1 << 1;
        /// Supervisor previous interrupt enable.
        ///
        /// Holds the value of SIE at the time the trap was taken.
        const SPIE = 1 << 5;
        /// Supervisor previous privilege. 1 when the trap came from supervisor mode.
        const SPP = 1 << 8;
    }
}

bitflags::bitflags! {
    /// Hypervisor status register (`hstatus`).
    pub struct Hstatus: u64 {
        /// Virtual supervisor big endian.
        const VSBE = 1 << 5;
        /// Guest virtual address. Set when stval holds a guest virtual address.
        const GVA = 1 << 6;
        /// Supervisor previous virtualization mode.
        ///
        /// `sret` enters virtualized mode when this bit is set.
        const SPV = 1 << 7;
        /// Supervisor previous virtual privilege. 1 when the guest was in VS-mode.
        const SPVP = 1 << 8;
        /// Hypervisor in U-mode.
        const HU = 1 << 9;
        /// Trap virtual memory. `sfence.vma` and `satp` accesses in VS-mode raise
        /// a virtual instruction exception.
        const VTVM = 1 << 20;
        /// Timeout wait. `wfi` in VS-mode raises a virtual instruction exception.
        const VTW = 1 << 21;
        /// Trap sret. `sret` in VS-mode raises a virtual instruction exception.
        const VTSR = 1 << 22;
    }
}

bitflags::bitflags! {
    /// Hypervisor exception delegation register (`hedeleg`).
    ///
    /// A set bit hands the synchronous exception of the same code straight to
    /// the guest's VS-mode trap handler without exiting to the host.
    pub struct ExceptionDelegation: u64 {
        const INSTRUCTION_MISALIGNED = 1 << 0;
        const INSTRUCTION_FAULT = 1 << 1;
        const ILLEGAL_INSTRUCTION = 1 << 2;
        const BREAKPOINT = 1 << 3;
        const LOAD_MISALIGNED = 1 << 4;
        const LOAD_FAULT = 1 << 5;
        const STORE_MISALIGNED = 1 << 6;
        const STORE_FAULT = 1 << 7;
        /// Environment call from VU-mode.
        const USER_ECALL = 1 << 8;
        const INSTRUCTION_PAGE_FAULT = 1 << 12;
        const LOAD_PAGE_FAULT = 1 << 13;
        const STORE_PAGE_FAULT = 1 << 15;
    }
}

bitflags::bitflags! {
    /// Hypervisor interrupt delegation register (`hideleg`).
    pub struct InterruptDelegation: u64 {
        /// Virtual supervisor software interrupt.
        const VSSIP = 1 << 2;
        /// Virtual supervisor timer interrupt.
        const VSTIP = 1 << 6;
        /// Virtual supervisor external interrupt.
        const VSEIP = 1 << 10;
    }
}

bitflags::bitflags! {
    /// Hypervisor counter enable register (`hcounteren`).
    pub struct CounterEnable: u64 {
        /// `cycle`.
        const CY = 1 << 0;
        /// `time`.
        const TM = 1 << 1;
        /// `instret`.
        const IR = 1 << 2;
    }
}

/// Field layout of the hypervisor guest address translation and protection
/// register (`hgatp`).
pub mod hgatp {
    /// Sv39x4 translation mode.
    pub const MODE_SV39X4: u64 = 8 << 60;
    /// Mask of the mode field.
    pub const MODE_MASK: u64 = 0xf << 60;
    /// Shift of the vmid field.
    pub const VMID_SHIFT: u64 = 44;
    /// Number of vmids the field can hold.
    pub const VMID_SIZE: u64 = 1 << 14;
    /// Mask of the root table's physical page number.
    pub const PPN_MASK: u64 = (1 << 44) - 1;

    /// Write the register.
    ///
    /// # Safety
    /// Changes the translation of the current hart.
    #[cfg(target_arch = "riscv64")]
    #[inline(always)]
    pub unsafe fn write(x: u64) {
        core::arch::asm!("csrw 0x680, {0}", in(reg) x);
    }
}

#[cfg(target_arch = "riscv64")]
macro_rules! csr_rw {
    ($(#[$attr:meta])* $name:ident, $csr:literal) => {
        $(#[$attr])*
        pub mod $name {
            /// Read the register.
            #[inline(always)]
            pub fn read() -> u64 {
                let x: u64;
                unsafe { core::arch::asm!(concat!("csrr {0}, ", $csr), out(reg) x) };
                x
            }

            /// Write the register.
            ///
            /// # Safety
            /// Changes privileged state of the current hart.
            #[inline(always)]
            pub unsafe fn write(x: u64) {
                core::arch::asm!(concat!("csrw ", $csr, ", {0}"), in(reg) x);
            }
        }
    };
}

#[cfg(target_arch = "riscv64")]
csr_rw!(
    /// Supervisor status.
    sstatus, "sstatus"
);
#[cfg(target_arch = "riscv64")]
csr_rw!(
    /// Supervisor trap cause.
    scause, "scause"
);
#[cfg(target_arch = "riscv64")]
csr_rw!(
    /// Supervisor trap value.
    stval, "stval"
);
#[cfg(target_arch = "riscv64")]
csr_rw!(
    /// Supervisor exception program counter.
    sepc, "sepc"
);
#[cfg(target_arch = "riscv64")]
csr_rw!(
    /// Hypervisor status.
    hstatus, "0x600"
);
#[cfg(target_arch = "riscv64")]
csr_rw!(
    /// Hypervisor exception delegation.
    hedeleg, "0x602"
);
#[cfg(target_arch = "riscv64")]
csr_rw!(
    /// Hypervisor interrupt delegation.
    hideleg, "0x603"
);
#[cfg(target_arch = "riscv64")]
csr_rw!(
    /// Hypervisor counter enable.
    hcounteren, "0x606"
);
#[cfg(target_arch = "riscv64")]
csr_rw!(
    /// Hypervisor trap value. Guest physical address of a guest page fault, shifted right by 2.
    htval, "0x643"
);
#[cfg(target_arch = "riscv64")]
csr_rw!(
    /// Hypervisor virtual interrupt pending.
    hvip, "0x645"
);
#[cfg(target_arch = "riscv64")]
csr_rw!(
    /// Virtual supervisor status.
    vsstatus, "0x200"
);
#[cfg(target_arch = "riscv64")]
csr_rw!(
    /// Virtual supervisor trap vector.
    vstvec, "0x205"
);
#[cfg(target_arch = "riscv64")]
csr_rw!(
    /// Virtual supervisor exception program counter.
    vsepc, "0x241"
);
#[cfg(target_arch = "riscv64")]
csr_rw!(
    /// Virtual supervisor trap cause.
    vscause, "0x242"
);
#[cfg(target_arch = "riscv64")]
csr_rw!(
    /// Virtual supervisor trap value.
    vstval, "0x243"
);
#[cfg(target_arch = "riscv64")]
csr_rw!(
    /// Virtual supervisor interrupt pending.
    vsip, "0x244"
);

/// Read the thread pointer, which holds the hart id in the kernel.
#[cfg(target_arch = "riscv64")]
#[inline(always)]
pub fn read_tp() -> u64 {
    let x: u64;
    unsafe { core::arch::asm!("mv {0}, tp", out(reg) x) };
    x
}

/// Flush the guest-physical translations of `vmid` that cover `gpa`.
///
/// # Safety
/// Changes privileged state of the current hart.
#[cfg(target_arch = "riscv64")]
#[inline(always)]
pub unsafe fn hfence_gvma(gpa: usize, vmid: u64) {
    // hfence.gvma takes the guest physical address shifted right by 2.
    core::arch::asm!("hfence.gvma {0}, {1}", in(reg) gpa >> 2, in(reg) vmid);
}
