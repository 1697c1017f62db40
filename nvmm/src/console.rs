//! Console collaborator.

/// The host console as the hypercall table sees it.
pub trait Console
where
    Self: Sync,
{
    /// Write `c` and wait until the device takes it.
    fn putc_sync(&self, c: u8);

    /// Queue `buf` for output. Returns the number of bytes taken.
    fn write(&self, buf: &[u8]) -> usize;

    /// Read up to `buf.len()` bytes. Returns the number of bytes read, which
    /// is smaller than asked when the input runs dry.
    fn read(&self, buf: &mut [u8]) -> usize;
}

/// Console on the kernel uart. Bytes go out as they are and input is
/// polled, so a read returns what has already arrived.
#[derive(Default)]
pub struct KernelConsole;

impl Console for KernelConsole {
    fn putc_sync(&self, c: u8) {
        abyss::kprint::putc(c);
    }

    fn write(&self, buf: &[u8]) -> usize {
        for c in buf {
            self.putc_sync(*c);
        }
        buf.len()
    }

    fn read(&self, buf: &mut [u8]) -> usize {
        let mut n = 0;
        while n < buf.len() {
            match abyss::kprint::getc() {
                Some(c) => buf[n] = c,
                None => break,
            }
            n += 1;
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_console_takes_raw_bytes() {
        let console = KernelConsole;
        assert_eq!(console.write(b"guest says hi\n"), 14);
        assert_eq!(console.write(&[0xc3, 0xa9, 0xff]), 3);
        let mut buf = [0u8; 8];
        assert_eq!(console.read(&mut buf), 0);
    }
}
