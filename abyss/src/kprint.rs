//! Kernel print utilities.

#[cfg(all(not(feature = "std"), target_arch = "riscv64"))]
static UART: spin_lock::SpinLock<crate::dev::uart::Uart> =
    spin_lock::SpinLock::new(crate::dev::uart::Uart::new());

#[doc(hidden)]
#[cfg(all(not(feature = "std"), target_arch = "riscv64"))]
pub fn _print(fmt: core::fmt::Arguments<'_>) {
    use core::fmt::Write;
    let _ = write!(&mut *UART.lock(), "{}", fmt);
}

#[doc(hidden)]
#[cfg(feature = "std")]
pub fn _print(fmt: core::fmt::Arguments<'_>) {
    std::print!("{}", fmt);
}

// No console on foreign targets without std.
#[doc(hidden)]
#[cfg(all(not(feature = "std"), not(target_arch = "riscv64")))]
pub fn _print(_fmt: core::fmt::Arguments<'_>) {}

/// Write the byte `c` to the console as is.
#[cfg(all(not(feature = "std"), target_arch = "riscv64"))]
pub fn putc(c: u8) {
    UART.lock().putc_sync(c);
}

/// Take a byte from the console if one has arrived.
#[cfg(all(not(feature = "std"), target_arch = "riscv64"))]
pub fn getc() -> Option<u8> {
    UART.lock().getc()
}

/// Write the byte `c` to the console as is.
#[cfg(feature = "std")]
pub fn putc(c: u8) {
    use std::io::Write;
    let _ = std::io::stdout().write_all(&[c]);
}

/// Take a byte from the console if one has arrived.
///
/// The host console has no input.
#[cfg(not(all(not(feature = "std"), target_arch = "riscv64")))]
pub fn getc() -> Option<u8> {
    None
}

#[cfg(all(not(feature = "std"), not(target_arch = "riscv64")))]
pub fn putc(_c: u8) {}

/// Prints out the message.
///
/// Use the format! syntax to write data to the standard output.
/// This first holds the lock for console device.
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::kprint::_print(format_args!($($arg)*)));
}

/// Prints out the message with a newline.
///
/// Use the format! syntax to write data to the standard output.
/// This first holds the lock for console device.
#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}

/// Display an information message.
///
/// Use the format! syntax to write data to the standard output.
/// This first holds the lock for console device.
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => ($crate::kprint::_print(
            format_args!(
                "[INFO] {}\n",
                format_args!($($arg)*)
            )
        )
    );
}

/// Display a warning message.
///
/// Use the format! syntax to write data to the standard output.
/// This first holds the lock for console device.
#[macro_export]
macro_rules! warning {
    ($($arg:tt)*) => ($crate::kprint::_print(
            format_args!(
                "[WARNING] {}\n",
                format_args!($($arg)*)
            )
        )
    );
}

/// Print msg if debug build
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        if cfg!(debug_assertions) {
            $crate::kprint::_print(
                format_args!(
                    "[DEBUG] {}\n",
                    format_args!($($arg)*)
                )
            )
        }
    }
}
