//! Process slots that host guests.
//!
//! A guest is an ordinary schedulable process whose context holds a
//! [`GuestContext`] instead of the register bank of a user program. This
//! module keeps the part of the process table that guest creation, the run
//! loop and the creating parent need: slot allocation, the state machine,
//! the killed flag and exit status, and reaping by the parent.
use crate::{frame::TrapFrame, guest::GuestContext, Resource, VmError};
use abyss::spin_lock::{SpinLock, SpinLockGuard};
use alloc::{boxed::Box, vec::Vec};

/// Process identifier.
#[repr(transparent)]
#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Ord, Hash, Debug)]
pub struct Pid(usize);

impl Pid {
    #[inline]
    pub const fn new(pid: usize) -> Self {
        Self(pid)
    }

    #[inline]
    pub const fn into_usize(self) -> usize {
        self.0
    }
}

impl core::fmt::Display for Pid {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "pid {}", self.0)
    }
}

/// Scheduling state of a process slot.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum ProcState {
    Unused,
    Used,
    Sleeping,
    Runnable,
    Running,
    Zombie,
}

/// Register state owned by a process slot.
///
/// The variant decides how the slot is entered. A slot never reinterprets
/// one variant as the other.
pub enum Context {
    /// Free slot.
    Empty,
    /// An ordinary user process.
    Process(Box<TrapFrame>),
    /// A guest kernel.
    Guest(Box<GuestContext>),
}

impl Context {
    /// Get the guest of this context if exist.
    pub fn as_guest_mut(&mut self) -> Option<&mut GuestContext> {
        match self {
            Context::Guest(g) => Some(g),
            _ => None,
        }
    }

    pub fn is_guest(&self) -> bool {
        matches!(self, Context::Guest(_))
    }
}

struct Meta {
    pid: Pid,
    state: ProcState,
    killed: bool,
    xstate: i32,
    parent: Option<Pid>,
}

/// A process slot.
pub struct Proc {
    meta: SpinLock<Meta>,
    context: SpinLock<Context>,
}

impl Proc {
    fn unused() -> Self {
        Self {
            meta: SpinLock::new(Meta {
                pid: Pid(0),
                state: ProcState::Unused,
                killed: false,
                xstate: 0,
                parent: None,
            }),
            context: SpinLock::new(Context::Empty),
        }
    }

    #[inline]
    pub fn pid(&self) -> Pid {
        self.meta.lock().pid
    }

    #[inline]
    pub fn state(&self) -> ProcState {
        self.meta.lock().state
    }

    #[inline]
    pub fn parent(&self) -> Option<Pid> {
        self.meta.lock().parent
    }

    /// Whether this process is asked to die.
    #[inline]
    pub fn killed(&self) -> bool {
        self.meta.lock().killed
    }

    /// Ask this process to die. The flag is observed at the next checkpoint.
    pub fn set_killed(&self) {
        let mut meta = self.meta.lock();
        meta.killed = true;
        if meta.state == ProcState::Sleeping {
            meta.state = ProcState::Runnable;
        }
    }

    /// Lock the register state of this process.
    ///
    /// The runner of a guest holds it for as long as the guest runs.
    #[inline]
    pub fn context(&self) -> SpinLockGuard<'_, Context> {
        self.context.lock()
    }
}

/// Outcome of [`ProcTable::try_wait`].
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum Wait {
    /// A child exited and its slot is freed.
    Exited { pid: Pid, status: i32 },
    /// Children exist but none has exited yet.
    Pending,
    /// Nothing to wait for.
    NoChildren,
}

/// Table of process slots.
pub struct ProcTable {
    procs: Box<[Proc]>,
    next_pid: SpinLock<usize>,
    // Orders parent links against reaping.
    wait_lock: SpinLock<()>,
}

impl ProcTable {
    /// Create a table of `nproc` unused slots.
    pub fn new(nproc: usize) -> Self {
        Self {
            procs: (0..nproc).map(|_| Proc::unused()).collect::<Vec<_>>().into_boxed_slice(),
            next_pid: SpinLock::new(1),
            wait_lock: SpinLock::new(()),
        }
    }

    /// Take an unused slot. The slot is `Used` with an ordinary register bank.
    pub fn alloc(&self) -> Result<&Proc, VmError> {
        for p in self.procs.iter() {
            let mut meta = p.meta.lock();
            if meta.state == ProcState::Unused {
                let pid = {
                    let mut next = self.next_pid.lock();
                    let pid = *next;
                    *next += 1;
                    pid
                };
                meta.pid = Pid(pid);
                meta.state = ProcState::Used;
                meta.killed = false;
                meta.xstate = 0;
                meta.parent = None;
                drop(meta);
                *p.context.lock() = Context::Process(Box::new(TrapFrame::default()));
                return Ok(p);
            }
        }
        Err(VmError::ResourceExhausted(Resource::ProcessSlot))
    }

    /// Release the slot and everything its context owns.
    pub fn free(&self, p: &Proc) {
        let context = core::mem::replace(&mut *p.context.lock(), Context::Empty);
        // Tear down outside of the lock.
        drop(context);
        let mut meta = p.meta.lock();
        meta.pid = Pid(0);
        meta.state = ProcState::Unused;
        meta.killed = false;
        meta.xstate = 0;
        meta.parent = None;
    }

    /// Find a live process by pid.
    pub fn find(&self, pid: Pid) -> Option<&Proc> {
        self.procs.iter().find(|p| {
            let meta = p.meta.lock();
            meta.state != ProcState::Unused && meta.pid == pid
        })
    }

    /// Make an initialized slot visible to the scheduler as a child of `parent`.
    pub fn publish(&self, p: &Proc, parent: Pid) {
        let _guard = self.wait_lock.lock();
        let mut meta = p.meta.lock();
        meta.parent = Some(parent);
        meta.state = ProcState::Runnable;
    }

    /// Pick `pid` to run. Only a runnable process can be claimed, so at most one
    /// hart runs a process at a time.
    pub fn claim(&self, pid: Pid) -> Option<&Proc> {
        self.find(pid).filter(|p| {
            let mut meta = p.meta.lock();
            if meta.pid == pid && meta.state == ProcState::Runnable {
                meta.state = ProcState::Running;
                true
            } else {
                false
            }
        })
    }

    /// Turn `p` into a zombie with `status`.
    pub fn exit(&self, p: &Proc, status: i32) {
        let _guard = self.wait_lock.lock();
        let mut meta = p.meta.lock();
        meta.xstate = status;
        meta.state = ProcState::Zombie;
    }

    /// Mark `pid` killed. Returns false if there is no such process.
    pub fn kill(&self, pid: Pid) -> bool {
        match self.find(pid) {
            Some(p) => {
                p.set_killed();
                true
            }
            None => false,
        }
    }

    /// Reap an exited child of `parent`.
    pub fn try_wait(&self, parent: Pid) -> Wait {
        let _guard = self.wait_lock.lock();
        let mut has_children = false;
        for p in self.procs.iter() {
            let zombie = {
                let meta = p.meta.lock();
                if meta.state == ProcState::Unused || meta.parent != Some(parent) {
                    continue;
                }
                has_children = true;
                (meta.state == ProcState::Zombie).then(|| (meta.pid, meta.xstate))
            };
            if let Some((pid, status)) = zombie {
                self.free(p);
                return Wait::Exited { pid, status };
            }
        }
        if has_children {
            Wait::Pending
        } else {
            Wait::NoChildren
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::scope;

    #[test]
    fn alloc_until_exhausted() {
        let table = ProcTable::new(4);
        let pids = (0..4)
            .map(|_| table.alloc().unwrap().pid())
            .collect::<Vec<_>>();
        assert_eq!(pids, [Pid(1), Pid(2), Pid(3), Pid(4)]);
        assert_eq!(
            table.alloc().err(),
            Some(VmError::ResourceExhausted(Resource::ProcessSlot))
        );
        let p = table.find(Pid(2)).unwrap();
        assert!(matches!(*p.context(), Context::Process(_)));
        table.free(p);
        assert!(table.find(Pid(2)).is_none());
        assert_eq!(table.alloc().unwrap().pid(), Pid(5));
    }

    #[test]
    fn lifecycle_and_wait() {
        let table = ProcTable::new(4);
        let parent = Pid::new(100);
        assert_eq!(table.try_wait(parent), Wait::NoChildren);

        let p = table.alloc().unwrap();
        let pid = p.pid();
        assert!(table.claim(pid).is_none());
        table.publish(p, parent);
        assert_eq!(table.try_wait(parent), Wait::Pending);

        let p = table.claim(pid).unwrap();
        assert_eq!(p.state(), ProcState::Running);
        assert!(table.claim(pid).is_none());

        assert!(table.kill(pid));
        assert!(p.killed());
        table.exit(p, -1);
        assert_eq!(table.try_wait(parent), Wait::Exited { pid, status: -1 });
        assert_eq!(table.try_wait(parent), Wait::NoChildren);
        assert!(!table.kill(pid));
    }

    #[test]
    fn kill_wakes_sleeper() {
        let table = ProcTable::new(1);
        let p = table.alloc().unwrap();
        p.meta.lock().state = ProcState::Sleeping;
        p.set_killed();
        assert_eq!(p.state(), ProcState::Runnable);
    }

    #[test]
    fn one_claimer_wins() {
        let table = ProcTable::new(2);
        let p = table.alloc().unwrap();
        let pid = p.pid();
        table.publish(p, Pid::new(1));
        let wins = scope(|s| {
            let handles = (0..8)
                .map(|_| s.spawn(|| table.claim(pid).is_some()))
                .collect::<Vec<_>>();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|won| *won)
                .count()
        });
        assert_eq!(wins, 1);
    }
}
