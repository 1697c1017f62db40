//! The abyss of kernel that operates hardwares.
//!
//! This crate contains the RISC-V hypervisor-extension plumbing used by the
//! nested vmm: address types, the kernel print macros, control and status
//! register accessors, trap cause decoding and the general purpose register
//! layout shared with the entry trampoline.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

#[macro_use]
pub mod kprint;
pub mod addressing;
pub mod dev;
pub mod riscv;

pub use spin_lock;
