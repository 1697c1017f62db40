//! Guest lifecycle.
//!
//! [`Hypervisor::mkguest`] turns a guest kernel image into a runnable child
//! process of the caller. The process runs the guest with
//! [`Hypervisor::run_guest`] when the scheduler picks it, and the parent
//! reaps it with [`Hypervisor::wait`] like any other child.
use crate::{
    config::Config,
    console::Console,
    guest::GuestContext,
    hw::HardwarePort,
    loader::{self, ImageError, ImageSource},
    memory::GuestMemory,
    proc::{Context, Pid, ProcTable, Wait},
    vcpu::vcpu_loop,
    vmexits::{fault, hypercall, interrupt},
    vmid::VmIdAllocator,
    VmError,
};
use alloc::boxed::Box;

/// The nested vmm of a host kernel.
pub struct Hypervisor<C: Console, S: ImageSource> {
    config: Config,
    vmids: VmIdAllocator,
    procs: ProcTable,
    console: C,
    images: S,
}

impl<C: Console, S: ImageSource> Hypervisor<C, S> {
    /// Create a vmm that reads guest images from `images`.
    pub fn new(config: Config, console: C, images: S) -> Self {
        Self {
            procs: ProcTable::new(config.nproc),
            config,
            vmids: VmIdAllocator::new(),
            console,
            images,
        }
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn procs(&self) -> &ProcTable {
        &self.procs
    }

    #[inline]
    pub fn console(&self) -> &C {
        &self.console
    }

    /// Create a guest from the image at `path` with `mem_size` bytes of RAM,
    /// as a child of `parent`. Returns the pid of the guest process.
    ///
    /// On failure nothing of the guest stays visible.
    pub fn mkguest(&self, parent: Pid, path: &str, mem_size: usize) -> Result<Pid, VmError> {
        let p = self.procs.alloc()?;
        match self.build_guest(path, mem_size) {
            Ok(guest) => {
                let vmid = guest.vmid();
                *p.context() = Context::Guest(Box::new(guest));
                let pid = p.pid();
                // Runnable only once the context is complete.
                self.procs.publish(p, parent);
                info!("guest {}: created as {} from {}", vmid, pid, path);
                Ok(pid)
            }
            Err(e) => {
                self.procs.free(p);
                Err(e)
            }
        }
    }

    fn build_guest(&self, path: &str, mem_size: usize) -> Result<GuestContext, VmError> {
        let vmid = self.vmids.allocate()?;
        let mut memory = GuestMemory::new(self.config.ram_base, mem_size)?;
        let image = self
            .images
            .open(path)
            .ok_or(VmError::InvalidImage(ImageError::NotFound))?;
        let entry = loader::load(&mut memory, image)?;
        Ok(GuestContext::new(vmid, memory, entry, &self.config))
    }

    /// Run the guest process `pid` on the current hart until it dies.
    /// Returns its exit status.
    ///
    /// `pid` must be a runnable guest.
    pub fn run_guest<H: HardwarePort>(&self, pid: Pid, port: &mut H) -> Result<i32, VmError> {
        if !self
            .procs
            .find(pid)
            .map(|p| p.context().is_guest())
            .unwrap_or(false)
        {
            return Err(VmError::NotAGuest(pid));
        }
        let p = self.procs.claim(pid).ok_or(VmError::NotAGuest(pid))?;
        let status = {
            let mut context = p.context();
            let guest = context.as_guest_mut().ok_or(VmError::NotAGuest(pid))?;
            let mut controller = (
                hypercall::Controller::new(&self.console),
                (interrupt::Controller, fault::Controller),
            );
            vcpu_loop(port, p, guest, &self.config, &mut controller)
        };
        self.procs.exit(p, status);
        info!("{}: guest exited with status {}", pid, status);
        Ok(status)
    }

    /// Mark the guest `pid` killed. Returns false if there is no such process.
    pub fn kill(&self, pid: Pid) -> bool {
        self.procs.kill(pid)
    }

    /// Reap an exited child of `parent`.
    pub fn wait(&self, parent: Pid) -> Wait {
        let w = self.procs.try_wait(parent);
        if let Wait::Exited { status, .. } = w {
            if status != 0 {
                warning!("Guest OS crashed");
            }
        }
        w
    }
}
