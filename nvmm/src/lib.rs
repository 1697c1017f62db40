//! Nested virtual machine monitor for a RISC-V teaching kernel.
//!
//! The host kernel runs in HS-mode and hosts a single-vCPU guest kernel in
//! VS-mode as an ordinary schedulable process. A guest process owns a
//! [`GuestContext`] in place of the register bank of an ordinary process.
//! Its run loop, [`vcpu::vcpu_loop`], installs the guest's translation and
//! delegation state, enters the guest, and triages every exit.
//!
//! ## Components
//! - [`vmid`]: issues the identifiers that tag stage-2 translations.
//! - [`stage2`]: the Sv39x4 guest-physical page table and its `hgatp`
//!   descriptor. [`memory`] layers guest RAM on top of it.
//! - [`loader`]: loads a guest kernel ELF image into guest RAM.
//! - [`hypervisor`]: the guest lifecycle. [`Hypervisor::mkguest`] creates a
//!   guest process and [`Hypervisor::run_guest`] runs it until it dies.
//! - [`vcpu`] and [`vmexits`]: the entry/exit dispatcher and the chain of
//!   exit controllers (hypercalls, device interrupts, lazy guest RAM).
//! - [`hypercall`]: the hypercall service table.
//! - [`hw`]: every privileged register the vmm touches, behind
//!   [`hw::HardwarePort`].
//!
//! ## Hypercall ABI
//! A guest issues a hypercall with `ecall` from VS-mode. `a7` holds the call
//! number and `a0` to `a5` hold the arguments. The result is returned in `a0`.
//!
//! | a7 | call            | arguments              | result                |
//! |----|-----------------|------------------------|-----------------------|
//! | 1  | hart id         |                        | host hart id          |
//! | 2  | console write   | `buf`, `len`, `sync`   | bytes written         |
//! | 3  | console read    | `buf`, `len`           | bytes read            |
//! | 4  | memory size     |                        | guest RAM in bytes    |
//!
//! Any other number returns `-1` and the guest keeps running.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

#[macro_use]
extern crate abyss;

pub mod config;
pub mod console;
pub mod frame;
pub mod guest;
pub mod hw;
pub mod hypercall;
pub mod hypervisor;
pub mod loader;
pub mod memory;
pub mod mm;
pub mod probe;
pub mod proc;
pub mod stage2;
pub mod vcpu;
pub mod vm;
pub mod vmexits;
pub mod vmid;

#[cfg(test)]
mod testing;

pub use guest::GuestContext;
pub use hypervisor::Hypervisor;
pub use probe::Probe;

use abyss::riscv::Scause;
use loader::ImageError;
use proc::Pid;
use vm::Gpa;

/// Resources whose exhaustion aborts guest creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// No unused process slot.
    ProcessSlot,
    /// Every vmid the `hgatp` field can hold is issued.
    VmId,
    /// The page allocator is out of frames.
    Memory,
    /// The requested guest RAM does not fit in the Sv39x4 address space.
    GuestAddressSpace,
}

/// Possible errors of the vmm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// Running out of the resource.
    ResourceExhausted(Resource),
    /// Malformed or inconsistent guest image.
    InvalidImage(ImageError),
    /// The guest requested a hypercall number outside the table.
    UnknownHypercall(u64),
    /// No controller handles this exit. Fatal to the guest.
    UnsupportedTrapCause(Scause),
    /// Guest address without a usable stage-2 translation.
    GuestAddressFault(Gpa),
    /// This controller does not handle the exit. The next controller in the
    /// chain gets it.
    HandleExitFailed(Scause),
    /// The process does not host a guest.
    NotAGuest(Pid),
}

impl core::fmt::Display for VmError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            VmError::ResourceExhausted(r) => write!(f, "resource exhausted: {:?}", r),
            VmError::InvalidImage(e) => write!(f, "invalid guest image: {:?}", e),
            VmError::UnknownHypercall(n) => write!(f, "unknown hypercall {}", n),
            VmError::UnsupportedTrapCause(c) => write!(f, "unsupported trap cause {:?}", c),
            VmError::GuestAddressFault(gpa) => write!(f, "guest address fault at {}", gpa),
            VmError::HandleExitFailed(c) => write!(f, "unhandled exit {:?}", c),
            VmError::NotAGuest(pid) => write!(f, "{} does not host a guest", pid),
        }
    }
}
