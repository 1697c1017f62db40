//! Polled 16550a uart of the qemu `virt` board.
//!
//! Serves kernel prints and the byte console that guests reach through
//! hypercalls. Both directions poll the line status register.

const UART0: usize = 0x1000_0000;

// Receive buffer register (read) and transmit holding register (write).
const RBR: usize = 0;
const THR: usize = 0;
// Line status register.
const LSR: usize = 5;
const LSR_RX_READY: u8 = 1 << 0;
const LSR_TX_IDLE: u8 = 1 << 5;

/// A 16550a whose registers are mapped at `base`.
pub struct Uart {
    base: usize,
}

impl Uart {
    /// Create a new uart device interface.
    pub const fn new() -> Self {
        Self::at(UART0)
    }

    /// Uart whose registers start at `base`.
    pub const fn at(base: usize) -> Self {
        Uart { base }
    }

    #[inline(always)]
    fn read_reg(&self, reg: usize) -> u8 {
        unsafe { core::ptr::read_volatile((self.base + reg) as *const u8) }
    }

    #[inline(always)]
    fn write_reg(&mut self, reg: usize, v: u8) {
        unsafe { core::ptr::write_volatile((self.base + reg) as *mut u8, v) }
    }

    /// Write a byte, spinning until the transmitter is idle.
    pub fn putc_sync(&mut self, c: u8) {
        while self.read_reg(LSR) & LSR_TX_IDLE == 0 {
            core::hint::spin_loop();
        }
        self.write_reg(THR, c);
    }

    /// Take a received byte if there is one.
    pub fn getc(&mut self) -> Option<u8> {
        if self.read_reg(LSR) & LSR_RX_READY != 0 {
            Some(self.read_reg(RBR))
        } else {
            None
        }
    }
}

impl core::fmt::Write for Uart {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        s.bytes().for_each(|c| self.putc_sync(c));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Register file in host memory.
    struct Regs(Box<[u8; 8]>);

    impl Regs {
        fn new(lsr: u8) -> Self {
            let mut regs = Box::new([0u8; 8]);
            regs[LSR] = lsr;
            Regs(regs)
        }

        fn uart(&mut self) -> Uart {
            Uart::at(self.0.as_mut_ptr() as usize)
        }
    }

    #[test]
    fn transmit_raw_bytes() {
        let mut regs = Regs::new(LSR_TX_IDLE);
        let mut uart = regs.uart();
        uart.putc_sync(0xc3);
        assert_eq!(uart.read_reg(THR), 0xc3);
        uart.putc_sync(0xa9);
        assert_eq!(uart.read_reg(THR), 0xa9);
    }

    #[test]
    fn receive_only_when_ready() {
        let mut regs = Regs::new(LSR_TX_IDLE);
        let mut uart = regs.uart();
        uart.write_reg(RBR, b'k');
        assert_eq!(uart.getc(), None);
        uart.write_reg(LSR, LSR_TX_IDLE | LSR_RX_READY);
        assert_eq!(uart.getc(), Some(b'k'));
    }
}
