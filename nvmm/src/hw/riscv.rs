//! [`HardwarePort`] of a RISC-V hart with the hypervisor extension.
use super::{DeviceInterrupt, HardwarePort, HostInterrupts, TrapInfo};
use crate::{frame::GuestFrame, stage2::Hgatp, vm::Gpa, vmid::VmId};
use abyss::riscv::{
    csr::{self, CounterEnable, ExceptionDelegation, InterruptDelegation},
    interrupt::{intr_off, intr_on},
    Scause,
};
use core::arch::global_asm;
use memoffset::offset_of;

// Software interrupt pending bit in the VS-level view of `vsip`.
const VSIP_SSIP: u64 = 1 << 1;

extern "C" {
    fn switch_to_guest(frame: *mut GuestFrame);
}

// `switch_to_guest` saves the host context into the frame, points `stvec` at
// `guest_exit` and `sret`s into the guest. `guest_exit` saves the guest
// context and returns to the caller of `switch_to_guest`.
//
// Register i of a bank lives at bank + 8 * i, in the order of
// `GeneralPurposeRegisters`.
global_asm!(
    ".section .text",
    ".globl switch_to_guest",
    ".align 4",
    "switch_to_guest:",
    "sd ra, {host}+0*8(a0)",
    "sd sp, {host}+1*8(a0)",
    "sd gp, {host}+2*8(a0)",
    "sd tp, {host}+3*8(a0)",
    "sd s0, {host}+7*8(a0)",
    "sd s1, {host}+8*8(a0)",
    "sd s2, {host}+17*8(a0)",
    "sd s3, {host}+18*8(a0)",
    "sd s4, {host}+19*8(a0)",
    "sd s5, {host}+20*8(a0)",
    "sd s6, {host}+21*8(a0)",
    "sd s7, {host}+22*8(a0)",
    "sd s8, {host}+23*8(a0)",
    "sd s9, {host}+24*8(a0)",
    "sd s10, {host}+25*8(a0)",
    "sd s11, {host}+26*8(a0)",
    // Host CSRs.
    "csrr t0, sstatus",
    "sd t0, {host_sstatus}(a0)",
    "csrr t0, 0x600",
    "sd t0, {host_hstatus}(a0)",
    "csrr t0, scounteren",
    "sd t0, {host_scounteren}(a0)",
    "csrr t0, sscratch",
    "sd t0, {host_sscratch}(a0)",
    "la t1, guest_exit",
    "csrrw t0, stvec, t1",
    "sd t0, {host_stvec}(a0)",
    "csrw sscratch, a0",
    // Guest CSRs.
    "ld t0, {guest_sstatus}(a0)",
    "csrw sstatus, t0",
    "ld t0, {guest_hstatus}(a0)",
    "csrw 0x600, t0",
    "ld t0, {guest_scounteren}(a0)",
    "csrw scounteren, t0",
    "ld t0, {guest_sepc}(a0)",
    "csrw sepc, t0",
    // Guest registers. a0 goes last.
    "ld ra, {guest}+0*8(a0)",
    "ld sp, {guest}+1*8(a0)",
    "ld gp, {guest}+2*8(a0)",
    "ld tp, {guest}+3*8(a0)",
    "ld t0, {guest}+4*8(a0)",
    "ld t1, {guest}+5*8(a0)",
    "ld t2, {guest}+6*8(a0)",
    "ld s0, {guest}+7*8(a0)",
    "ld s1, {guest}+8*8(a0)",
    "ld a1, {guest}+10*8(a0)",
    "ld a2, {guest}+11*8(a0)",
    "ld a3, {guest}+12*8(a0)",
    "ld a4, {guest}+13*8(a0)",
    "ld a5, {guest}+14*8(a0)",
    "ld a6, {guest}+15*8(a0)",
    "ld a7, {guest}+16*8(a0)",
    "ld s2, {guest}+17*8(a0)",
    "ld s3, {guest}+18*8(a0)",
    "ld s4, {guest}+19*8(a0)",
    "ld s5, {guest}+20*8(a0)",
    "ld s6, {guest}+21*8(a0)",
    "ld s7, {guest}+22*8(a0)",
    "ld s8, {guest}+23*8(a0)",
    "ld s9, {guest}+24*8(a0)",
    "ld s10, {guest}+25*8(a0)",
    "ld s11, {guest}+26*8(a0)",
    "ld t3, {guest}+27*8(a0)",
    "ld t4, {guest}+28*8(a0)",
    "ld t5, {guest}+29*8(a0)",
    "ld t6, {guest}+30*8(a0)",
    "ld a0, {guest}+9*8(a0)",
    "sret",
    "",
    ".align 4",
    "guest_exit:",
    // a0 <- frame, sscratch <- guest a0.
    "csrrw a0, sscratch, a0",
    "sd ra, {guest}+0*8(a0)",
    "sd sp, {guest}+1*8(a0)",
    "sd gp, {guest}+2*8(a0)",
    "sd tp, {guest}+3*8(a0)",
    "sd t0, {guest}+4*8(a0)",
    "sd t1, {guest}+5*8(a0)",
    "sd t2, {guest}+6*8(a0)",
    "sd s0, {guest}+7*8(a0)",
    "sd s1, {guest}+8*8(a0)",
    "sd a1, {guest}+10*8(a0)",
    "sd a2, {guest}+11*8(a0)",
    "sd a3, {guest}+12*8(a0)",
    "sd a4, {guest}+13*8(a0)",
    "sd a5, {guest}+14*8(a0)",
    "sd a6, {guest}+15*8(a0)",
    "sd a7, {guest}+16*8(a0)",
    "sd s2, {guest}+17*8(a0)",
    "sd s3, {guest}+18*8(a0)",
    "sd s4, {guest}+19*8(a0)",
    "sd s5, {guest}+20*8(a0)",
    "sd s6, {guest}+21*8(a0)",
    "sd s7, {guest}+22*8(a0)",
    "sd s8, {guest}+23*8(a0)",
    "sd s9, {guest}+24*8(a0)",
    "sd s10, {guest}+25*8(a0)",
    "sd s11, {guest}+26*8(a0)",
    "sd t3, {guest}+27*8(a0)",
    "sd t4, {guest}+28*8(a0)",
    "sd t5, {guest}+29*8(a0)",
    "sd t6, {guest}+30*8(a0)",
    "csrr t0, sscratch",
    "sd t0, {guest}+9*8(a0)",
    // Guest CSRs.
    "csrr t0, sstatus",
    "sd t0, {guest_sstatus}(a0)",
    "csrr t0, 0x600",
    "sd t0, {guest_hstatus}(a0)",
    "csrr t0, scounteren",
    "sd t0, {guest_scounteren}(a0)",
    "csrr t0, sepc",
    "sd t0, {guest_sepc}(a0)",
    // Host CSRs.
    "ld t0, {host_stvec}(a0)",
    "csrw stvec, t0",
    "ld t0, {host_sscratch}(a0)",
    "csrw sscratch, t0",
    "ld t0, {host_scounteren}(a0)",
    "csrw scounteren, t0",
    "ld t0, {host_hstatus}(a0)",
    "csrw 0x600, t0",
    "ld t0, {host_sstatus}(a0)",
    "csrw sstatus, t0",
    // Host registers.
    "ld ra, {host}+0*8(a0)",
    "ld sp, {host}+1*8(a0)",
    "ld gp, {host}+2*8(a0)",
    "ld tp, {host}+3*8(a0)",
    "ld s0, {host}+7*8(a0)",
    "ld s1, {host}+8*8(a0)",
    "ld s2, {host}+17*8(a0)",
    "ld s3, {host}+18*8(a0)",
    "ld s4, {host}+19*8(a0)",
    "ld s5, {host}+20*8(a0)",
    "ld s6, {host}+21*8(a0)",
    "ld s7, {host}+22*8(a0)",
    "ld s8, {host}+23*8(a0)",
    "ld s9, {host}+24*8(a0)",
    "ld s10, {host}+25*8(a0)",
    "ld s11, {host}+26*8(a0)",
    "ret",
    host = const offset_of!(GuestFrame, host),
    guest = const offset_of!(GuestFrame, guest),
    host_sstatus = const offset_of!(GuestFrame, host_sstatus),
    host_hstatus = const offset_of!(GuestFrame, host_hstatus),
    host_scounteren = const offset_of!(GuestFrame, host_scounteren),
    host_sscratch = const offset_of!(GuestFrame, host_sscratch),
    host_stvec = const offset_of!(GuestFrame, host_stvec),
    guest_sstatus = const offset_of!(GuestFrame, guest_sstatus),
    guest_hstatus = const offset_of!(GuestFrame, guest_hstatus),
    guest_scounteren = const offset_of!(GuestFrame, guest_scounteren),
    guest_sepc = const offset_of!(GuestFrame, guest_sepc),
);

/// The current hart.
///
/// `devices` is the host's device interrupt handler.
pub struct RiscvHart<D: HostInterrupts> {
    devices: D,
}

impl<D: HostInterrupts> RiscvHart<D> {
    pub fn new(devices: D) -> Self {
        Self { devices }
    }
}

impl<D: HostInterrupts> HardwarePort for RiscvHart<D> {
    fn set_translation(&mut self, hgatp: Hgatp) {
        unsafe { csr::hgatp::write(hgatp.bits()) }
    }

    fn set_delegation(&mut self, exceptions: ExceptionDelegation, interrupts: InterruptDelegation) {
        unsafe {
            csr::hedeleg::write(exceptions.bits());
            csr::hideleg::write(interrupts.bits());
        }
    }

    fn set_counter_enable(&mut self, counters: CounterEnable) {
        unsafe { csr::hcounteren::write(counters.bits()) }
    }

    fn clear_pending(&mut self) {
        unsafe { csr::hvip::write(0) }
    }

    fn clear_guest_tick(&mut self) {
        unsafe { csr::vsip::write(csr::vsip::read() & !VSIP_SSIP) }
    }

    fn enable_interrupts(&mut self) {
        intr_on();
    }

    fn disable_interrupts(&mut self) {
        intr_off();
    }

    fn enter_guest(&mut self, frame: &mut GuestFrame) -> TrapInfo {
        unsafe { switch_to_guest(frame as *mut GuestFrame) };
        TrapInfo {
            scause: Scause::from_bits(csr::scause::read()),
            stval: csr::stval::read(),
            htval: csr::htval::read(),
        }
    }

    fn device_interrupt(&mut self, cause: Scause) -> Option<DeviceInterrupt> {
        self.devices.devintr(cause)
    }

    fn vsstatus(&self) -> u64 {
        csr::vsstatus::read()
    }

    fn set_vsstatus(&mut self, vsstatus: u64) {
        unsafe { csr::vsstatus::write(vsstatus) }
    }

    fn vstvec(&self) -> u64 {
        csr::vstvec::read()
    }

    fn set_guest_trap(&mut self, cause: Scause, tval: u64, epc: u64) {
        unsafe {
            csr::vscause::write(cause.bits());
            csr::vstval::write(tval);
            csr::vsepc::write(epc);
        }
    }

    fn hart_id(&self) -> u64 {
        csr::read_tp()
    }

    fn fence_guest(&mut self, vmid: VmId, gpa: Gpa) {
        unsafe { csr::hfence_gvma(gpa.into_usize(), vmid.into_u64()) }
    }
}
