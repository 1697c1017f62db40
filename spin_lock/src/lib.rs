#![cfg_attr(not(test), no_std)]

mod smplock;
pub use smplock::*;
