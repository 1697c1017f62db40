//! Test doubles for the collaborators of the vmm.
use crate::{
    console::Console,
    frame::GuestFrame,
    hw::{DeviceInterrupt, HardwarePort, TrapInfo},
    loader::{elf::PFlags, ImageSource},
    stage2::Hgatp,
    vm::Gpa,
    vmid::VmId,
};
use abyss::{
    riscv::{
        csr::{CounterEnable, ExceptionDelegation, InterruptDelegation},
        Exception, Interrupt, Scause, Trap,
    },
    spin_lock::SpinLock,
};
use std::collections::{BTreeMap, VecDeque};

/// Privileged operation seen by [`RecordingPort`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    SetTranslation(Hgatp),
    SetDelegation(ExceptionDelegation, InterruptDelegation),
    SetCounterEnable(CounterEnable),
    ClearPending,
    ClearGuestTick,
    EnableInterrupts,
    DisableInterrupts,
    EnterGuest { sepc: u64 },
    DeviceInterrupt(Scause),
    SetVsstatus(u64),
    SetGuestTrap { cause: Scause, tval: u64, epc: u64 },
    FenceGuest(VmId, Gpa),
}

type Exit = Box<dyn FnMut(&mut GuestFrame) -> TrapInfo + Send>;

/// Hardware port that runs a scripted guest and records every operation.
///
/// Each entry runs the next scripted exit against the guest frame. Once the
/// script runs out the guest executes an illegal instruction.
pub struct RecordingPort {
    pub calls: Vec<Call>,
    exits: VecDeque<Exit>,
    pub vsstatus: u64,
    pub vstvec: u64,
    pub vsip: u64,
    pub hart: u64,
    interrupts_on: bool,
}

impl RecordingPort {
    pub fn new() -> Self {
        Self {
            calls: Vec::new(),
            exits: VecDeque::new(),
            vsstatus: 0,
            vstvec: 0,
            vsip: 0,
            hart: 0,
            interrupts_on: true,
        }
    }

    /// Script the next exit of the guest.
    pub fn push_exit<F>(&mut self, f: F)
    where
        F: FnMut(&mut GuestFrame) -> TrapInfo + Send + 'static,
    {
        self.exits.push_back(Box::new(f));
    }

    /// Number of guest entries.
    pub fn entries(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c, Call::EnterGuest { .. }))
            .count()
    }

    /// Guest pc at the `n`th entry.
    pub fn entered_at(&self, n: usize) -> u64 {
        self.calls
            .iter()
            .filter_map(|c| match c {
                Call::EnterGuest { sepc } => Some(*sepc),
                _ => None,
            })
            .nth(n)
            .unwrap()
    }

    /// Index of the first call that equals `call`.
    pub fn position(&self, call: &Call) -> Option<usize> {
        self.calls.iter().position(|c| c == call)
    }
}

impl HardwarePort for RecordingPort {
    fn set_translation(&mut self, hgatp: Hgatp) {
        self.calls.push(Call::SetTranslation(hgatp));
    }

    fn set_delegation(&mut self, exceptions: ExceptionDelegation, interrupts: InterruptDelegation) {
        self.calls.push(Call::SetDelegation(exceptions, interrupts));
    }

    fn set_counter_enable(&mut self, counters: CounterEnable) {
        self.calls.push(Call::SetCounterEnable(counters));
    }

    fn clear_pending(&mut self) {
        self.calls.push(Call::ClearPending);
    }

    fn clear_guest_tick(&mut self) {
        self.vsip &= !(1 << 1);
        self.calls.push(Call::ClearGuestTick);
    }

    fn enable_interrupts(&mut self) {
        self.interrupts_on = true;
        self.calls.push(Call::EnableInterrupts);
    }

    fn disable_interrupts(&mut self) {
        self.interrupts_on = false;
        self.calls.push(Call::DisableInterrupts);
    }

    fn enter_guest(&mut self, frame: &mut GuestFrame) -> TrapInfo {
        assert!(!self.interrupts_on, "entered the guest with interrupts on");
        self.calls.push(Call::EnterGuest {
            sepc: frame.guest_sepc,
        });
        match self.exits.pop_front() {
            Some(mut exit) => exit(frame),
            None => TrapInfo::new(Scause::exception(Exception::IllegalInstruction)),
        }
    }

    fn device_interrupt(&mut self, cause: Scause) -> Option<DeviceInterrupt> {
        self.calls.push(Call::DeviceInterrupt(cause));
        match cause.decode() {
            Trap::Interrupt(Interrupt::SupervisorSoftware | Interrupt::SupervisorTimer) => {
                Some(DeviceInterrupt::Timer)
            }
            Trap::Interrupt(Interrupt::SupervisorExternal) => Some(DeviceInterrupt::External),
            _ => None,
        }
    }

    fn vsstatus(&self) -> u64 {
        self.vsstatus
    }

    fn set_vsstatus(&mut self, vsstatus: u64) {
        self.vsstatus = vsstatus;
        self.calls.push(Call::SetVsstatus(vsstatus));
    }

    fn vstvec(&self) -> u64 {
        self.vstvec
    }

    fn set_guest_trap(&mut self, cause: Scause, tval: u64, epc: u64) {
        self.calls.push(Call::SetGuestTrap { cause, tval, epc });
    }

    fn hart_id(&self) -> u64 {
        self.hart
    }

    fn fence_guest(&mut self, vmid: VmId, gpa: Gpa) {
        self.calls.push(Call::FenceGuest(vmid, gpa));
    }
}

/// Console backed by memory.
#[derive(Default)]
pub struct MemConsole {
    out: SpinLock<Vec<u8>>,
    input: SpinLock<VecDeque<u8>>,
    sync: SpinLock<usize>,
    reads: SpinLock<usize>,
}

impl MemConsole {
    pub fn with_input(input: &[u8]) -> Self {
        let console = Self::default();
        console.input.lock().extend(input);
        console
    }

    /// Everything written so far.
    pub fn output(&self) -> Vec<u8> {
        self.out.lock().clone()
    }

    /// Bytes written with `putc_sync`.
    pub fn sync_bytes(&self) -> usize {
        *self.sync.lock()
    }

    /// Number of `read` calls.
    pub fn reads(&self) -> usize {
        *self.reads.lock()
    }
}

impl Console for MemConsole {
    fn putc_sync(&self, c: u8) {
        self.out.lock().push(c);
        *self.sync.lock() += 1;
    }

    fn write(&self, buf: &[u8]) -> usize {
        self.out.lock().extend_from_slice(buf);
        buf.len()
    }

    fn read(&self, buf: &mut [u8]) -> usize {
        *self.reads.lock() += 1;
        let mut input = self.input.lock();
        let n = buf.len().min(input.len());
        for (dst, src) in buf.iter_mut().zip(input.drain(..n)) {
            *dst = src;
        }
        n
    }
}

/// Images kept in memory by path.
#[derive(Default)]
pub struct MemImages(BTreeMap<String, Vec<u8>>);

impl MemImages {
    pub fn with(mut self, path: &str, image: Vec<u8>) -> Self {
        self.0.insert(path.to_string(), image);
        self
    }
}

impl ImageSource for MemImages {
    type Image = Vec<u8>;

    fn open(&self, path: &str) -> Option<Self::Image> {
        self.0.get(path).cloned()
    }
}

struct Segment {
    p_type: u32,
    flags: PFlags,
    vaddr: u64,
    data: Vec<u8>,
    memsz: u64,
}

/// Builder of RISC-V ELF64 executables.
pub struct ImageBuilder {
    entry: u64,
    machine: u16,
    segments: Vec<Segment>,
}

impl ImageBuilder {
    pub fn new(entry: u64) -> Self {
        Self {
            entry,
            machine: 0xf3,
            segments: Vec::new(),
        }
    }

    pub fn machine(mut self, machine: u16) -> Self {
        self.machine = machine;
        self
    }

    /// Add a `PT_LOAD` segment.
    pub fn segment(mut self, vaddr: u64, flags: PFlags, data: &[u8], memsz: u64) -> Self {
        self.segments.push(Segment {
            p_type: 1,
            flags,
            vaddr,
            data: data.to_vec(),
            memsz,
        });
        self
    }

    /// Add a `PT_NOTE` segment.
    pub fn note(mut self) -> Self {
        self.segments.push(Segment {
            p_type: 4,
            flags: PFlags::R,
            vaddr: 0,
            data: b"note".to_vec(),
            memsz: 4,
        });
        self
    }

    pub fn build(&self) -> Vec<u8> {
        const EHSIZE: usize = 64;
        const PHENTSIZE: usize = 56;
        let mut out = vec![0u8; EHSIZE];
        out[0..4].copy_from_slice(b"\x7FELF");
        out[4] = 2; // ELFCLASS64
        out[5] = 1; // ELFDATA2LSB
        out[6] = 1;
        out[16..18].copy_from_slice(&2u16.to_le_bytes());
        out[18..20].copy_from_slice(&self.machine.to_le_bytes());
        out[20..24].copy_from_slice(&1u32.to_le_bytes());
        out[24..32].copy_from_slice(&self.entry.to_le_bytes());
        out[32..40].copy_from_slice(&(EHSIZE as u64).to_le_bytes());
        out[52..54].copy_from_slice(&(EHSIZE as u16).to_le_bytes());
        out[54..56].copy_from_slice(&(PHENTSIZE as u16).to_le_bytes());
        out[56..58].copy_from_slice(&(self.segments.len() as u16).to_le_bytes());

        let mut offset = EHSIZE + PHENTSIZE * self.segments.len();
        let mut data = Vec::new();
        for seg in &self.segments {
            let mut ph = [0u8; PHENTSIZE];
            ph[0..4].copy_from_slice(&seg.p_type.to_le_bytes());
            ph[4..8].copy_from_slice(&seg.flags.bits().to_le_bytes());
            ph[8..16].copy_from_slice(&(offset as u64).to_le_bytes());
            ph[16..24].copy_from_slice(&seg.vaddr.to_le_bytes());
            ph[24..32].copy_from_slice(&seg.vaddr.to_le_bytes());
            ph[32..40].copy_from_slice(&(seg.data.len() as u64).to_le_bytes());
            ph[40..48].copy_from_slice(&seg.memsz.to_le_bytes());
            ph[48..56].copy_from_slice(&0x1000u64.to_le_bytes());
            out.extend_from_slice(&ph);
            data.extend_from_slice(&seg.data);
            offset += seg.data.len();
        }
        out.extend_from_slice(&data);
        out
    }
}
