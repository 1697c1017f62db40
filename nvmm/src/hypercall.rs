//! Hypercalls.
//!
//! Hypercall is a software trap from the guest operating system to hypervisor, similar to the syscall from the
//! application to kernel. A guest requests one with `ecall` in VS-mode, which exits to the host with
//! [`Exception::VirtualSupervisorEnvCall`]. The [`Controller`] decodes the request with [`Hypercall::resolve`],
//! serves it with [`Hypercall::serve`] and writes the result back to `a0`.
//!
//! Guest buffers are reached only through the guest's own stage-2 table, one page at a time, staged through a
//! page of host memory. A page that cannot be reached ends the transfer; the call returns how far it got.
//!
//! [`Exception::VirtualSupervisorEnvCall`]: abyss::riscv::Exception::VirtualSupervisorEnvCall
//! [`Controller`]: crate::vmexits::hypercall::Controller
use crate::{console::Console, guest::GuestContext, mm::Page, vm::Gpa, VmError};
use abyss::{addressing::PAGE_SIZE, riscv::GeneralPurposeRegisters};
use core::convert::TryFrom;
use num_enum::TryFromPrimitive;

/// Hypercall numbers.
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
pub enum HypercallNo {
    HartId = 1,
    ConsoleWrite = 2,
    ConsoleRead = 3,
    MemSize = 4,
}

/// Supported hypercalls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hypercall {
    /// Get the index of the host hart that serves the call.
    ///
    /// a7 = 1.
    HartId,
    /// Write the guest buffer to the console.
    ///
    /// a7 = 2. Returns the bytes written.
    ConsoleWrite {
        /// Buffer to print. Provides on a0.
        buf: Gpa,
        /// Size of buffer to print. Provides on a1.
        len: usize,
        /// Wait for the device on each byte. Provides on a2.
        sync: bool,
    },
    /// Read from the console into the guest buffer.
    ///
    /// a7 = 3. Returns the bytes read.
    ConsoleRead {
        /// Buffer to fill. Provides on a0.
        buf: Gpa,
        /// Size of buffer. Provides on a1.
        len: usize,
    },
    /// Get the size of the guest RAM.
    ///
    /// a7 = 4.
    MemSize,
    /// Number outside the table.
    Unknown(u64),
}

// A length is a C int on the guest side. Negative lengths move nothing.
fn length(raw: u64) -> usize {
    (raw as i32).max(0) as usize
}

impl Hypercall {
    /// Resolve the requested hypercall from the guest registers.
    pub fn resolve(gprs: &GeneralPurposeRegisters) -> Self {
        let arg = |n| gprs.arg(n).unwrap_or(0);
        match HypercallNo::try_from(gprs.a7) {
            Ok(HypercallNo::HartId) => Hypercall::HartId,
            Ok(HypercallNo::ConsoleWrite) => Hypercall::ConsoleWrite {
                buf: Gpa::new(arg(0) as usize),
                len: length(arg(1)),
                sync: arg(2) as i32 != 0,
            },
            Ok(HypercallNo::ConsoleRead) => Hypercall::ConsoleRead {
                buf: Gpa::new(arg(0) as usize),
                len: length(arg(1)),
            },
            Ok(HypercallNo::MemSize) => Hypercall::MemSize,
            Err(_) => Hypercall::Unknown(gprs.a7),
        }
    }

    /// Serve the hypercall for `guest` on the hart `hart`.
    pub fn serve<C: Console>(
        self,
        guest: &mut GuestContext,
        console: &C,
        hart: u64,
    ) -> Result<u64, VmError> {
        match self {
            Hypercall::HartId => Ok(hart),
            Hypercall::ConsoleWrite { buf, len, sync } => {
                Ok(console_write(guest, console, buf, len, sync) as u64)
            }
            Hypercall::ConsoleRead { buf, len } => Ok(console_read(guest, console, buf, len) as u64),
            Hypercall::MemSize => Ok(guest.mem_size() as u64),
            Hypercall::Unknown(n) => Err(VmError::UnknownHypercall(n)),
        }
    }
}

fn staging_page(guest: &GuestContext) -> Option<Page> {
    let page = Page::new();
    if page.is_none() {
        warning!("guest {}: no page to stage a console transfer", guest.vmid());
    }
    page
}

fn console_write<C: Console>(
    guest: &mut GuestContext,
    console: &C,
    buf: Gpa,
    len: usize,
    sync: bool,
) -> usize {
    let mut staging = match staging_page(guest) {
        Some(pg) => pg,
        None => return 0,
    };
    let mut done = 0;
    while done < len {
        let r = PAGE_SIZE.min(len - done);
        let chunk = &mut staging.inner_mut()[..r];
        let copied = match buf.checked_add(done) {
            Some(src) => match guest.memory_mut().read(src, chunk) {
                Ok(()) => r,
                Err(t) => {
                    warning!("guest {}: console write truncated: {}", guest.vmid(), t.error);
                    t.done
                }
            },
            None => 0,
        };
        let written = if sync {
            chunk[..copied].iter().for_each(|c| console.putc_sync(*c));
            copied
        } else {
            console.write(&chunk[..copied])
        };
        done += written;
        if written < r {
            break;
        }
    }
    done
}

fn console_read<C: Console>(guest: &mut GuestContext, console: &C, buf: Gpa, len: usize) -> usize {
    if len == 0 {
        return 0;
    }
    let mut staging = match staging_page(guest) {
        Some(pg) => pg,
        None => return 0,
    };
    let mut done = 0;
    while done < len {
        let r = PAGE_SIZE.min(len - done);
        let s = console.read(&mut staging.inner_mut()[..r]);
        let dst = match buf.checked_add(done) {
            Some(dst) => dst,
            None => break,
        };
        if let Err(t) = guest.memory_mut().write(dst, &staging.inner()[..s]) {
            warning!("guest {}: console read truncated: {}", guest.vmid(), t.error);
            done += t.done;
            break;
        }
        done += s;
        if s < r {
            break;
        }
    }
    done
}
