//! The process table, its per-entry state machine, and the scheduler
//! loop that dispatches RUNNABLE slots onto this CPU.
//!
//! The five selection *policies* are pure functions over a lightweight
//! snapshot and live in `sched.rs`, where they're host-testable; this
//! module owns everything that actually needs the process table, the
//! per-slot locks, and the architecture-specific context switch:
//! allocation/freeing, fork/exit/wait/waitx, sleep/wakeup, yield, the
//! alarm mechanism, and the scheduler's own loop around `sched::pick_*`.

use core::mem;
use core::sync::atomic::{AtomicU32, Ordering};

use ::log::{debug, trace, warn};

use crate::file::file::{filedup, fileclose};
use crate::file::{File, INode};
use crate::fs::fs::{fsinit, namei};
use crate::kalloc::KMEM;
use crate::log::{begin_op, end_op};
use crate::memlayout::{TRAMPOLINE, TRAPFRAME};
use crate::param::{DEFAULT_NICENESS, DEFAULT_PRIORITY, DEFAULT_TICKETS, NCPU, NOFILE, NPROC, ROOTDEV};
use crate::printf;
use crate::proc::Procstate::{RUNNABLE, RUNNING, SLEEPING, UNUSED, USED, ZOMBIE};
use crate::riscv::{intr_get, intr_on, r_tp, PageTable, PGSIZE, PTE_R, PTE_W, PTE_X};
use crate::sched::{self, Lcg, Policy, ProcView, ACTIVE_POLICY, MLFQ_LEVELS};
use crate::spinlock::{pop_off, push_off, Spinlock};
use crate::trap::ticks;
use crate::vm::{copyout, mappages, trampoline, uvmalloc, uvmcopy, uvmcreate, uvmdealloc, uvmfirst, uvmfree, uvmunmap};
use crate::KSTACK;

// Saved registers for kernel context switches.
#[derive(Copy, Clone)]
#[repr(C)]
struct Context {
    ra: u64,
    sp: u64,

    // callee-saved
    s0: u64,
    s1: u64,
    s2: u64,
    s3: u64,
    s4: u64,
    s5: u64,
    s6: u64,
    s7: u64,
    s8: u64,
    s9: u64,
    s10: u64,
    s11: u64,
}

impl Context {
    const fn zero() -> Self {
        Context { ra: 0, sp: 0, s0: 0, s1: 0, s2: 0, s3: 0, s4: 0, s5: 0, s6: 0, s7: 0, s8: 0, s9: 0, s10: 0, s11: 0 }
    }
}

extern "C" {
    // switch.S. Saves the caller's callee-saved registers into *old,
    // restores them from *new, and returns as if from the call site
    // that captured *new. The only architecture-specific primitive in
    // the scheduling core.
    fn swtch(old: *mut Context, new: *mut Context);
}

// Per-CPU state.
#[derive(Copy, Clone)]
pub struct Cpu {
    proc: Option<*mut Proc>,
    // The process running on this cpu, or None.
    context: Context,
    // swtch() here to enter scheduler().
    pub noff: u8,
    // Depth of push_off() nesting.
    pub intena: bool, // Were interrupts enabled before push_off()?
}

impl Cpu {
    const fn default() -> Self {
        Cpu { proc: None, context: Context::zero(), noff: 0, intena: false }
    }
}

static mut CPUS: [Cpu; NCPU] = [Cpu::default(); NCPU];

// per-process data for the trap handling code in trampoline.S.
// sits in a page by itself just under the trampoline page in the
// user page table. not specially mapped in the kernel page table.
// uservec in trampoline.S saves user registers in the trapframe,
// then initializes registers from the trapframe's
// kernel_sp, kernel_hartid, kernel_satp, and jumps to kernel_trap.
// usertrapret() and userret in trampoline.S set up
// the trapframe's kernel_*, restore user registers from the
// trapframe, switch to the user page table, and enter user space.
#[repr(C)]
pub(crate) struct Trapframe {
    /*   0 */ pub(crate) kernel_satp: u64, // kernel page table
    /*   8 */ pub(crate) kernel_sp: u64, // top of process's kernel stack
    /*  16 */ pub(crate) kernel_trap: u64, // usertrap()
    /*  24 */ pub(crate) epc: u64, // saved user program counter
    /*  32 */ pub(crate) kernel_hartid: u64, // saved kernel tp
    /*  40 */ pub(crate) ra: u64,
    /*  48 */ pub(crate) sp: u64,
    /*  56 */ pub(crate) gp: u64,
    /*  64 */ pub(crate) tp: u64,
    /*  72 */ pub(crate) t0: u64,
    /*  80 */ pub(crate) t1: u64,
    /*  88 */ pub(crate) t2: u64,
    /*  96 */ pub(crate) s0: u64,
    /* 104 */ pub(crate) s1: u64,
    /* 112 */ pub(crate) a0: u64,
    /* 120 */ pub(crate) a1: u64,
    /* 128 */ pub(crate) a2: u64,
    /* 136 */ pub(crate) a3: u64,
    /* 144 */ pub(crate) a4: u64,
    /* 152 */ pub(crate) a5: u64,
    /* 160 */ pub(crate) a6: u64,
    /* 168 */ pub(crate) a7: u64,
    /* 176 */ pub(crate) s2: u64,
    /* 184 */ pub(crate) s3: u64,
    /* 192 */ pub(crate) s4: u64,
    /* 200 */ pub(crate) s5: u64,
    /* 208 */ pub(crate) s6: u64,
    /* 216 */ pub(crate) s7: u64,
    /* 224 */ pub(crate) s8: u64,
    /* 232 */ pub(crate) s9: u64,
    /* 240 */ pub(crate) s10: u64,
    /* 248 */ pub(crate) s11: u64,
    /* 256 */ pub(crate) t3: u64,
    /* 264 */ pub(crate) t4: u64,
    /* 272 */ pub(crate) t5: u64,
    /* 280 */ pub(crate) t6: u64,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Procstate { UNUSED, USED, SLEEPING, RUNNABLE, RUNNING, ZOMBIE }

/// Kernel-private fallible operations in the allocation path. Returned
/// internally and threaded with `?`; translated to the legacy `-1`
/// sentinel once, at the syscall-adjacent boundary (`fork()`,
/// `userinit()`), per the error-handling design (no exceptions cross
/// the syscall ABI).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ProcError {
    NoFreeSlot,
    OutOfMemory,
}

// Per-process state.
#[derive(Copy, Clone)]
pub struct Proc {
    lock: Spinlock,

    // p->lock must be held when using these:
    state: Procstate,
    chan: usize, // sleep channel token; 0 iff not SLEEPING
    killed: u8,
    xstate: i32, // exit status, valid when ZOMBIE
    pub(crate) pid: u32,

    // wait_lock must be held when using this:
    parent: Option<*mut Proc>,

    // these are private to the process, so p->lock need not be held.
    kstack: usize,
    pub(crate) sz: usize,
    pub(crate) pagetable: Option<*mut PageTable>,
    pub(crate) trapframe: Option<*mut Trapframe>,
    backup_trapframe: Option<*mut Trapframe>, // snapshot while a user alarm handler runs
    context: Context,
    pub(crate) ofile: [Option<*mut File<'static>>; NOFILE],
    pub(crate) cwd: Option<*mut INode>,
    pub(crate) name: [u8; 16],

    // scheduling/accounting, all in kernel ticks -- p->lock held.
    ctime: u64,
    etime: u64,
    rtime: u64,
    time_run: u64,
    time_slept: u64,
    last_scheduled: u64,
    last_slept: u64,

    priority: u8,      // PBS static priority, 0..=100
    niceness: u8,       // 0..=10
    tickets: u32,       // LBS tickets, >= 1
    times_scheduled: u64, // PBS tie-break

    queue: usize,          // MLFQ level, 0..=4
    entry_time: u64,       // tick this slot entered `queue`
    time_ran_in_queue: u64, // quantum consumed at this level

    pub(crate) trace: u32, // syscall trace mask, inherited by fork

    alarm_freq: u64,
    alarm_handler: usize,
    last_alarm: u64,
    alarm_running: bool,
}

impl Proc {
    const fn template() -> Self {
        Proc {
            lock: Spinlock::init_lock("proc"),
            state: UNUSED,
            chan: 0,
            killed: 0,
            xstate: 0,
            pid: 0,
            parent: None,
            kstack: 0,
            sz: 0,
            pagetable: None,
            trapframe: None,
            backup_trapframe: None,
            context: Context::zero(),
            ofile: [None; NOFILE],
            cwd: None,
            name: [0; 16],
            ctime: 0,
            etime: 0,
            rtime: 0,
            time_run: 0,
            time_slept: 0,
            last_scheduled: 0,
            last_slept: 0,
            priority: DEFAULT_PRIORITY,
            niceness: DEFAULT_NICENESS,
            tickets: DEFAULT_TICKETS,
            times_scheduled: 0,
            queue: 0,
            entry_time: 0,
            time_ran_in_queue: 0,
            trace: 0,
            alarm_freq: 0,
            alarm_handler: 0,
            last_alarm: 0,
            alarm_running: false,
        }
    }

    pub fn killed(&self) -> u8 {
        self.killed
    }

    pub fn set_killed(&mut self) {
        self.killed = 1;
    }

    pub fn kstack(&self) -> usize {
        self.kstack
    }
}

// The process table's slot index is stable for the kernel's lifetime
// and determines the virtual address of that slot's kernel stack
// (KSTACK!), so it has to be baked in at table-construction time
// rather than left to a generic `Proc::default()`.
const fn build_procs() -> [Proc; NPROC] {
    let mut arr = [Proc::template(); NPROC];
    let mut i = 0;
    while i < NPROC {
        arr[i].kstack = KSTACK!(i);
        i += 1;
    }
    arr
}

static mut PROCS: [Proc; NPROC] = build_procs();
static mut INIT_PROC: Option<*mut Proc> = None;

static NEXT_PID: AtomicU32 = AtomicU32::new(1);

// helps ensure that wakeups of wait()ing
// parents are not lost. helps obey the
// memory model when using p->parent.
// must be acquired before any p->lock.
static mut WAIT_LOCK: Spinlock = Spinlock::init_lock("wait_lock");

extern {
    static trampoline: u8; // trampoline.S
}

// Must be called with interrupts disabled,
// to prevent race with process being moved
// to a different CPU.
pub fn cpuid() -> usize {
    r_tp() as usize
}

// Return this CPU's cpu struct.
// Interrupts must be disabled.
pub fn mycpu() -> &'static mut Cpu {
    unsafe { &mut CPUS[cpuid()] }
}

// Return the current process. Panics if none is running on this cpu,
// which would itself be a caller bug (every code path that can reach
// user code, a syscall, or a trap runs with `current` set).
pub fn myproc() -> &'static mut Proc {
    push_off();
    let p = mycpu().proc;
    pop_off();
    unsafe { &mut *p.expect("myproc: no process scheduled on this cpu") }
}

// Whether this cpu currently has a RUNNING process dispatched.
// Unlike myproc(), safe to call from a context that might be the
// scheduler's own idle loop (no process current).
pub fn current_is_running() -> bool {
    push_off();
    let p = mycpu().proc;
    pop_off();
    match p {
        Some(p) => unsafe { (*p).state == RUNNING },
        None => false,
    }
}

// Allocate a page for each process's kernel stack.
// Map it high in memory, followed by an invalid
// guard page.
pub fn proc_mapstacks(kpgtbl: &mut PageTable) {
    for idx in 0..NPROC {
        unsafe {
            let pa: *mut u8 = KMEM.kalloc();
            if pa.is_null() {
                panic!("kalloc");
            }
            let va = KSTACK!(idx);
            kvmmap_stack(kpgtbl, va, pa.expose_addr());
        }
    }
}

fn kvmmap_stack(kpgtbl: &mut PageTable, va: usize, pa: usize) {
    crate::vm::kvmmap(kpgtbl, va, pa, PGSIZE, PTE_R | PTE_W);
}

// initialize the proc table.
pub fn procinit() {
    // empty: PROCS, WAIT_LOCK and the pid counter are statically
    // initialized above.
}

// a user program that calls exec("/init")
// assembled from ../user/initcode.S
// od -t xC ../user/initcode
const INITCODE: [u8; 52] = [
    0x17, 0x05, 0x00, 0x00, 0x13, 0x05, 0x45, 0x02,
    0x97, 0x05, 0x00, 0x00, 0x93, 0x85, 0x35, 0x02,
    0x93, 0x08, 0x70, 0x00, 0x73, 0x00, 0x00, 0x00,
    0x93, 0x08, 0x20, 0x00, 0x73, 0x00, 0x00, 0x00,
    0xef, 0xf0, 0x9f, 0xff, 0x2f, 0x69, 0x6e, 0x69,
    0x74, 0x00, 0x00, 0x24, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00,
];

// Set up first user process. Performed exactly once, at boot.
pub fn userinit() {
    let p_ptr = match allocproc() {
        Ok(p) => p,
        Err(e) => panic!("userinit: allocproc failed: {:?}", e),
    };
    unsafe { INIT_PROC = Some(p_ptr) };
    let p = unsafe { &mut *p_ptr };

    // allocate one user page and copy initcode's instructions
    // and data into it.
    let pagetable = unsafe { &mut *p.pagetable.unwrap() };
    uvmfirst(pagetable, &INITCODE as *const u8, mem::size_of_val(&INITCODE));
    p.sz = PGSIZE;

    // prepare for the very first "return" from kernel to user.
    let tf = unsafe { &mut *p.trapframe.unwrap() };
    tf.epc = 0; // user program counter
    tf.sp = PGSIZE as u64; // user stack pointer

    let mut name = [0u8; 16];
    let src = b"initcode";
    name[..src.len()].copy_from_slice(src);
    p.name = name;

    p.state = RUNNABLE;
    p.lock.release();
}

// A fork child's very first scheduling by scheduler()
// will swtch to forkret.
extern "C" fn forkret() {
    static mut FIRST: bool = true;

    // Still holding p->lock from scheduler.
    myproc().lock.release();

    if unsafe { FIRST } {
        // File system initialization must be run in the context of a
        // regular process (e.g., because it calls sleep), and thus
        // cannot be run from main().
        unsafe { FIRST = false };
        fsinit(ROOTDEV);

        let p = myproc();
        p.cwd = namei(b"/\0").map(|ip| ip as *mut INode);
    }

    crate::trap::usertrapret();
}

// Look in the process table for an UNUSED proc.
// If found, initialize state required to run in the kernel,
// and return with p->lock held.
fn allocproc() -> Result<*mut Proc, ProcError> {
    let mut found: Option<&mut Proc> = None;
    for i in 0..NPROC {
        let p = unsafe { &mut PROCS[i] };
        p.lock.acquire();
        if p.state == UNUSED {
            found = Some(p);
            break;
        }
        p.lock.release();
    }

    let p = found.ok_or(ProcError::NoFreeSlot)?;

    p.pid = NEXT_PID.fetch_add(1, Ordering::Relaxed);
    p.state = USED;

    let now = ticks();
    p.ctime = now;
    p.etime = 0;
    p.rtime = 0;
    p.time_run = 0;
    p.time_slept = 0;
    p.last_scheduled = 0;
    p.last_slept = 0;
    p.priority = DEFAULT_PRIORITY;
    p.niceness = DEFAULT_NICENESS;
    p.tickets = DEFAULT_TICKETS;
    p.times_scheduled = 0;
    p.queue = 0;
    p.entry_time = now;
    p.time_ran_in_queue = 0;
    p.trace = 0;
    p.alarm_freq = 0;
    p.alarm_handler = 0;
    p.last_alarm = 0;
    p.alarm_running = false;
    p.killed = 0;
    p.xstate = 0;
    p.chan = 0;

    // Allocate a trapframe page.
    let trapframe_ptr: *mut Trapframe = unsafe { KMEM.kalloc() };
    if trapframe_ptr.is_null() {
        freeproc(p);
        p.lock.release();
        return Err(ProcError::OutOfMemory);
    }
    p.trapframe = Some(trapframe_ptr);

    // An empty user page table.
    match proc_pagetable(p) {
        Some(pt) => p.pagetable = Some(pt),
        None => {
            freeproc(p);
            p.lock.release();
            return Err(ProcError::OutOfMemory);
        }
    }

    // Set up new context to start executing at forkret,
    // which returns to user space.
    p.context = Context::zero();
    p.context.ra = forkret as usize as u64;
    p.context.sp = (p.kstack + 3 * PGSIZE) as u64;

    trace!("allocproc: pid {} took slot", p.pid);
    Ok(p as *mut Proc)
}

// free a proc structure and the data hanging from it,
// including user pages. p->lock must be held.
fn freeproc(p: &mut Proc) {
    if let Some(tf) = p.trapframe.take() {
        unsafe { KMEM.kfree(tf) };
    }
    if let Some(bf) = p.backup_trapframe.take() {
        unsafe { KMEM.kfree(bf) };
    }
    if let Some(pt) = p.pagetable.take() {
        proc_freepagetable(unsafe { &mut *pt }, p.sz);
    }

    p.sz = 0;
    p.pid = 0;
    p.parent = None;
    p.name = [0; 16];
    p.ofile = [None; NOFILE];
    p.cwd = None;
    p.chan = 0;
    p.killed = 0;
    p.xstate = 0;
    p.trace = 0;
    p.priority = DEFAULT_PRIORITY;
    p.niceness = DEFAULT_NICENESS;
    p.tickets = DEFAULT_TICKETS;
    p.times_scheduled = 0;
    p.queue = 0;
    p.entry_time = 0;
    p.time_ran_in_queue = 0;
    p.alarm_freq = 0;
    p.alarm_handler = 0;
    p.last_alarm = 0;
    p.alarm_running = false;
    p.state = UNUSED;
}

// Create a user page table for a given process, with no user memory,
// but with trampoline and trapframe pages.
fn proc_pagetable(p: &Proc) -> Option<*mut PageTable> {
    let pagetable_ptr = uvmcreate()?;
    let pagetable = unsafe { &mut *pagetable_ptr };

    // map the trampoline code (for system call return)
    // at the highest user virtual address.
    // only the supervisor uses it, on the way
    // to/from user space, so not PTE_U.
    let trampoline_addr = (unsafe { &trampoline } as *const u8).expose_addr();
    if mappages(pagetable, TRAMPOLINE, trampoline_addr, PGSIZE, PTE_R | PTE_X) != 0 {
        uvmfree(pagetable, 0);
        return None;
    }

    // map the trapframe page just below the trampoline page, for
    // trampoline.S.
    let trapframe_addr = p.trapframe.unwrap().expose_addr();
    if mappages(pagetable, TRAPFRAME, trapframe_addr, PGSIZE, PTE_R | PTE_W) != 0 {
        uvmunmap(pagetable, TRAMPOLINE, 1, false);
        uvmfree(pagetable, 0);
        return None;
    }

    Some(pagetable_ptr)
}

// Free a process's page table, and free the
// physical memory it refers to.
pub(crate) fn proc_freepagetable(pagetable: &mut PageTable, sz: usize) {
    uvmunmap(pagetable, TRAMPOLINE, 1, false);
    uvmunmap(pagetable, TRAPFRAME, 1, false);
    uvmfree(pagetable, sz);
}

// Grow or shrink the calling process's user memory by `n` bytes
// (negative shrinks). Returns 0 on success, -1 on failure; on failure
// the process's size is left unchanged.
pub fn growproc(n: i32) -> i32 {
    let p = myproc();
    let pagetable = unsafe { &mut *p.pagetable.unwrap() };
    let mut sz = p.sz;

    if n > 0 {
        sz = uvmalloc(pagetable, sz, sz + n as usize, PTE_W);
        if sz == 0 {
            return -1;
        }
    } else if n < 0 {
        sz = uvmdealloc(pagetable, sz, (sz as i64 + n as i64) as usize);
    }

    p.sz = sz;
    0
}

// ---------------------------------------------------------------
// fork / exit / wait / waitx / kill
// ---------------------------------------------------------------

// Create a new process, copying the parent. Sets up the child's
// kernel stack to return as if from the fork() system call, with a0
// forced to 0. Returns the child's pid to the parent, or -1 on
// failure; the child itself observes 0 via its own a0.
pub fn fork() -> i32 {
    let p = myproc();

    let np_ptr = match allocproc() {
        Ok(np) => np,
        Err(_) => return -1,
    };
    let np = unsafe { &mut *np_ptr };

    // Copy user memory (copy-on-write: pages are shared and marked
    // read-only in both page tables; uvmcowfault() materializes a
    // private copy the first time either side writes).
    let old_pt = unsafe { &mut *p.pagetable.unwrap() };
    let new_pt = unsafe { &mut *np.pagetable.unwrap() };
    if uvmcopy(old_pt, new_pt, p.sz) < 0 {
        freeproc(np);
        np.lock.release();
        return -1;
    }
    np.sz = p.sz;

    // copy saved user registers, then force fork's return value to 0
    // in the child.
    unsafe {
        core::ptr::copy_nonoverlapping(p.trapframe.unwrap(), np.trapframe.unwrap(), 1);
        (*np.trapframe.unwrap()).a0 = 0;
    }

    // increment reference counts on open file descriptors.
    for i in 0..NOFILE {
        if let Some(f) = p.ofile[i] {
            unsafe { filedup(f as *mut File) };
            np.ofile[i] = Some(f);
        }
    }
    np.cwd = p.cwd.map(|ip| unsafe { (*ip).idup() as *mut INode });

    np.name = p.name;
    np.trace = p.trace;
    np.tickets = p.tickets;

    let pid = np.pid;
    np.lock.release();

    unsafe { WAIT_LOCK.acquire() };
    np.parent = Some(p as *mut Proc);
    unsafe { WAIT_LOCK.release() };

    np.lock.acquire();
    np.state = RUNNABLE;
    np.lock.release();

    debug!("fork: pid {} -> child pid {}", p.pid, pid);
    pid as i32
}

// Reparent all of p's children to initproc, under wait_lock. Wakes
// initproc so a reparented zombie isn't left unreaped.
fn reparent(p: &mut Proc) {
    let me = p as *mut Proc;
    for i in 0..NPROC {
        let pp = unsafe { &mut PROCS[i] };
        if pp.parent == Some(me) {
            pp.parent = unsafe { INIT_PROC };
            wakeup_addr(unsafe { INIT_PROC.unwrap() } as usize);
        }
    }
}

// Exit the current process. Does not return. An exited process
// remains in the ZOMBIE state until its parent calls wait().
pub fn exit(status: i32) -> ! {
    let p = myproc();

    if unsafe { INIT_PROC } == Some(p as *mut Proc) {
        panic!("init exiting");
    }

    debug!("exit: pid {} status {}", p.pid, status);

    for i in 0..NOFILE {
        if let Some(f) = p.ofile[i].take() {
            fileclose(unsafe { &mut *f });
        }
    }

    begin_op();
    if let Some(cwd) = p.cwd.take() {
        unsafe { (*cwd).iput() };
    }
    end_op();

    unsafe { WAIT_LOCK.acquire() };

    reparent(p);

    if let Some(parent) = p.parent {
        wakeup_addr(parent as usize);
    }

    p.lock.acquire();
    p.xstate = status;
    p.state = ZOMBIE;
    p.etime = ticks();

    unsafe { WAIT_LOCK.release() };

    sched();
    unreachable!("exited process resumed scheduling");
}

// Wait for a child to exit. Copies its exit status to user address
// `addr` (skipped if 0) and returns its pid; -1 if the caller has no
// children or has been killed.
pub fn wait(addr: usize) -> i32 {
    let p = myproc();
    unsafe { WAIT_LOCK.acquire() };

    loop {
        let mut have_kids = false;

        for i in 0..NPROC {
            let np = unsafe { &mut PROCS[i] };
            if np.parent != Some(p as *mut Proc) {
                continue;
            }

            np.lock.acquire();
            have_kids = true;
            if np.state == ZOMBIE {
                let pid = np.pid;
                let xstate = np.xstate;
                freeproc(np);
                np.lock.release();
                unsafe { WAIT_LOCK.release() };

                trace!("wait: pid {} reaped by pid {}", pid, p.pid);
                if addr != 0 {
                    let pt = unsafe { &mut *p.pagetable.unwrap() };
                    if copyout(pt, addr, &xstate as *const i32 as *const u8, mem::size_of::<i32>()) < 0 {
                        return -1;
                    }
                }
                return pid as i32;
            }
            np.lock.release();
        }

        if !have_kids || p.killed() != 0 {
            unsafe { WAIT_LOCK.release() };
            return -1;
        }

        sleep(p, unsafe { &mut WAIT_LOCK });
    }
}

// Like wait(), but also reports the reaped child's scheduling
// accounting: rtime (ticks spent RUNNING) and wtime (turnaround minus
// rtime).
pub fn waitx(addr: usize, wtime_addr: usize, rtime_addr: usize) -> i32 {
    let p = myproc();
    unsafe { WAIT_LOCK.acquire() };

    loop {
        let mut have_kids = false;

        for i in 0..NPROC {
            let np = unsafe { &mut PROCS[i] };
            if np.parent != Some(p as *mut Proc) {
                continue;
            }

            np.lock.acquire();
            have_kids = true;
            if np.state == ZOMBIE {
                let pid = np.pid;
                let xstate = np.xstate;
                let rtime = np.rtime;
                let wtime = np.etime.saturating_sub(np.ctime).saturating_sub(rtime);
                freeproc(np);
                np.lock.release();
                unsafe { WAIT_LOCK.release() };

                trace!("waitx: pid {} reaped by pid {} (rtime={} wtime={})", pid, p.pid, rtime, wtime);
                let pt = unsafe { &mut *p.pagetable.unwrap() };
                if addr != 0 && copyout(pt, addr, &xstate as *const i32 as *const u8, mem::size_of::<i32>()) < 0 {
                    return -1;
                }
                if rtime_addr != 0 && copyout(pt, rtime_addr, &rtime as *const u64 as *const u8, mem::size_of::<u64>()) < 0 {
                    return -1;
                }
                if wtime_addr != 0 && copyout(pt, wtime_addr, &wtime as *const u64 as *const u8, mem::size_of::<u64>()) < 0 {
                    return -1;
                }
                return pid as i32;
            }
            np.lock.release();
        }

        if !have_kids || p.killed() != 0 {
            unsafe { WAIT_LOCK.release() };
            return -1;
        }

        sleep(p, unsafe { &mut WAIT_LOCK });
    }
}

// Mark the process with this pid for termination. Asynchronous: the
// target observes `killed` at its next return to user mode, or inside
// a long-running kernel loop that checks it. If the target is
// SLEEPING, force it RUNNABLE so it gets the chance to notice.
pub fn kill(pid: u32) -> i32 {
    for i in 0..NPROC {
        let p = unsafe { &mut PROCS[i] };
        p.lock.acquire();
        if p.pid == pid {
            p.set_killed();
            if p.state == SLEEPING {
                p.state = RUNNABLE;
            }
            p.lock.release();
            return 0;
        }
        p.lock.release();
    }
    -1
}

// ---------------------------------------------------------------
// sleep / wakeup
// ---------------------------------------------------------------

// Atomically release `lk` and put the current process to sleep on
// `chan` (an arbitrary reference; its address is the wait-channel
// token). Reacquires `lk` before returning. The order -- take p->lock,
// *then* release lk -- is what closes the lost-wakeup window: a
// concurrent wakeup() cannot observe `state == SLEEPING` until this
// process has committed it, and cannot itself proceed without
// p->lock.
pub fn sleep<T>(chan: &T, lk: &mut Spinlock) {
    let token = chan as *const T as usize;
    let p = myproc();

    p.lock.acquire();
    lk.release();

    p.chan = token;
    p.state = SLEEPING;
    p.last_slept = ticks();

    sched();

    p.chan = 0;
    p.lock.release();

    lk.acquire();
}

fn wakeup_addr(token: usize) {
    let now = ticks();
    for i in 0..NPROC {
        let p = unsafe { &mut PROCS[i] };
        p.lock.acquire();
        if p.state == SLEEPING && p.chan == token {
            p.time_slept += now.saturating_sub(p.last_slept);
            recompute_niceness(p);
            p.state = RUNNABLE;
        }
        p.lock.release();
    }
}

// Wake every process sleeping on `chan` (by address). A process that
// is itself RUNNING is never SLEEPING, so it can never match its own
// wakeup -- no special self-exclusion is needed.
pub fn wakeup<T>(chan: &T) {
    wakeup_addr(chan as *const T as usize);
}

fn recompute_niceness(p: &mut Proc) {
    let denom = p.time_slept + p.time_run;
    if denom != 0 {
        p.niceness = ((10 * p.time_slept) / denom).min(10) as u8;
    }
}

// ---------------------------------------------------------------
// context switch / scheduler
// ---------------------------------------------------------------

// The only legal way for a process to leave the CPU. Preconditions:
// exactly p->lock held, this cpu's noff == 1, state != RUNNING,
// interrupts disabled.
fn sched() {
    let p = myproc();
    if !p.lock.holding() {
        panic!("sched: p->lock not held");
    }
    let c = mycpu();
    if c.noff != 1 {
        panic!("sched: locks");
    }
    if p.state == RUNNING {
        panic!("sched: process running");
    }
    if intr_get() {
        panic!("sched: interruptible");
    }

    let intena = c.intena;
    unsafe { swtch(&mut p.context as *mut Context, &mut c.context as *mut Context) };
    c.intena = intena;
}

// Give up the CPU for one scheduling round.
pub fn yield_() {
    let p = myproc();
    p.lock.acquire();
    if p.state == RUNNING {
        p.state = RUNNABLE;
        recompute_niceness(p);
        sched();
    }
    p.lock.release();
}

fn snapshot_runnable(now: u64) -> ([ProcView; NPROC], usize) {
    let mut buf: [ProcView; NPROC] = core::array::from_fn(|i| ProcView {
        idx: i,
        create_time: 0,
        tickets: DEFAULT_TICKETS,
        priority: DEFAULT_PRIORITY,
        niceness: DEFAULT_NICENESS,
        times_scheduled: 0,
        queue: 0,
        entry_time: 0,
        time_ran_in_queue: 0,
    });
    let mut n = 0;

    for i in 0..NPROC {
        let p = unsafe { &mut PROCS[i] };
        p.lock.acquire();
        if p.state == RUNNABLE {
            buf[n] = ProcView {
                idx: i,
                create_time: p.ctime,
                tickets: p.tickets,
                priority: p.priority,
                niceness: p.niceness,
                times_scheduled: p.times_scheduled,
                queue: p.queue,
                entry_time: p.entry_time,
                time_ran_in_queue: p.time_ran_in_queue,
            };
            n += 1;
        }
        let _ = now;
        p.lock.release();
    }

    (buf, n)
}

fn runnable_at(idx: usize, filter_queue: Option<usize>) -> bool {
    let p = unsafe { &mut PROCS[idx] };
    p.lock.acquire();
    let ok = p.state == RUNNABLE && filter_queue.map_or(true, |q| p.queue == q);
    p.lock.release();
    ok
}

// MLFQ's per-iteration demotion and aging passes (§4.6). Runs before
// selection, once per scheduler loop iteration -- not once per tick.
fn mlfq_pretick(now: u64) {
    for i in 0..NPROC {
        let p = unsafe { &mut PROCS[i] };
        p.lock.acquire();
        if matches!(p.state, RUNNING | RUNNABLE) && sched::mlfq_should_demote(p.queue, p.time_ran_in_queue) {
            p.queue += 1;
            p.entry_time = now;
            p.time_ran_in_queue = 0;
        }
        p.lock.release();
    }

    for i in 0..NPROC {
        let p = unsafe { &mut PROCS[i] };
        p.lock.acquire();
        if matches!(p.state, RUNNABLE | SLEEPING) && sched::mlfq_should_promote(p.queue, now, p.entry_time, p.time_ran_in_queue) {
            p.queue -= 1;
            p.entry_time = now;
            p.time_ran_in_queue = 0;
        }
        p.lock.release();
    }
}

// Unlike the source (see DESIGN.md), queue 4 is only swept when
// queues 0..3 produced no RUNNABLE candidate at all.
fn pick_mlfq(rr_cursor: &mut usize) -> Option<usize> {
    let (buf, n) = snapshot_runnable(0);
    if let Some(winner) = sched::mlfq_select_top(buf[..n].iter()) {
        return Some(winner);
    }

    let winner = sched::pick_round_robin(NPROC, *rr_cursor, |i| runnable_at(i, Some(MLFQ_LEVELS - 1)));
    if let Some(w) = winner {
        *rr_cursor = w;
    }
    winner
}

fn pick_next(now: u64, rng: &mut Lcg, rr_cursor: &mut usize) -> Option<usize> {
    match ACTIVE_POLICY {
        Policy::RoundRobin => {
            let winner = sched::pick_round_robin(NPROC, *rr_cursor, |i| runnable_at(i, None));
            if let Some(w) = winner {
                *rr_cursor = w;
            }
            winner
        }
        Policy::Fcfs => {
            let (buf, n) = snapshot_runnable(now);
            sched::pick_fcfs(buf[..n].iter())
        }
        Policy::Lottery => {
            let (buf, n) = snapshot_runnable(now);
            let draw = rng.next_u32();
            let winner = sched::pick_lottery(buf[..n].iter(), draw);
            if winner.is_none() && n > 0 {
                warn!("scheduler: lottery draw {} matched no candidate among {} runnable", draw, n);
            }
            winner
        }
        Policy::Pbs => {
            let (buf, n) = snapshot_runnable(now);
            sched::pick_pbs(buf[..n].iter())
        }
        Policy::Mlfq => pick_mlfq(rr_cursor),
    }
}

// Per-CPU scheduler loop. Never returns.
pub fn scheduler() -> ! {
    let c = mycpu();
    c.proc = None;

    let mut rr_cursor: usize = 0;
    let mut rng = Lcg::new(1);

    loop {
        intr_on();

        let now = ticks();
        rng.reseed(now);

        if matches!(ACTIVE_POLICY, Policy::Mlfq) {
            mlfq_pretick(now);
        }

        if let Some(idx) = pick_next(now, &mut rng, &mut rr_cursor) {
            let p = unsafe { &mut PROCS[idx] };
            p.lock.acquire();
            if p.state == RUNNABLE {
                p.state = RUNNING;
                p.last_scheduled = now;
                if matches!(ACTIVE_POLICY, Policy::Pbs) {
                    p.times_scheduled += 1;
                }

                c.proc = Some(p as *mut Proc);
                unsafe { swtch(&mut c.context as *mut Context, &mut p.context as *mut Context) };
                c.proc = None;
            }
            p.lock.release();
        } else {
            trace!("scheduler: no RUNNABLE process this iteration");
        }
    }
}

// ---------------------------------------------------------------
// accounting, priority/ticket/trace knobs, alarms
// ---------------------------------------------------------------

// Called once per timer tick (from trap::clockintr) for every RUNNING
// slot: bumps rtime and the MLFQ quantum counter, and checks whether
// a user alarm is due.
pub fn update_time() {
    let now_is_mlfq = matches!(ACTIVE_POLICY, Policy::Mlfq);
    for i in 0..NPROC {
        let p = unsafe { &mut PROCS[i] };
        p.lock.acquire();
        if p.state == RUNNING {
            p.rtime += 1;
            p.time_run += 1;
            if now_is_mlfq {
                p.time_ran_in_queue += 1;
            }
            maybe_trigger_alarm(p);
        }
        p.lock.release();
    }
}

fn maybe_trigger_alarm(p: &mut Proc) {
    if p.alarm_freq == 0 || p.alarm_running {
        return;
    }
    if p.time_run.saturating_sub(p.last_alarm) < p.alarm_freq {
        return;
    }

    let tf = match p.trapframe {
        Some(tf) => tf,
        None => return,
    };
    let backup: *mut Trapframe = unsafe { KMEM.kalloc() };
    if backup.is_null() {
        return;
    }

    unsafe {
        core::ptr::copy_nonoverlapping(tf, backup, 1);
        (*tf).epc = p.alarm_handler as u64;
    }
    p.backup_trapframe = Some(backup);
    p.alarm_running = true;
    p.last_alarm = p.time_run;
}

// sig_alarm(interval, handler): register a periodic user-mode
// callback, driven off accumulated CPU time.
pub fn sig_alarm(interval: i32, handler: usize) -> i32 {
    if interval < 0 {
        return -1;
    }
    let p = myproc();
    p.lock.acquire();
    p.alarm_freq = interval as u64;
    p.alarm_handler = handler;
    p.lock.release();
    0
}

// sig_return(): restore the trapframe an alarm handler interrupted,
// freeing the backup and returning the pre-alarm a0.
pub fn sig_return() -> u64 {
    let p = myproc();
    p.lock.acquire();
    if let Some(bf) = p.backup_trapframe.take() {
        unsafe {
            core::ptr::copy_nonoverlapping(bf, p.trapframe.unwrap(), 1);
            KMEM.kfree(bf);
        }
    }
    p.alarm_running = false;
    let a0 = unsafe { (*p.trapframe.unwrap()).a0 };
    p.lock.release();
    a0
}

// settickets(n): LBS ticket count for the calling process.
pub fn settickets(n: i32) -> i32 {
    if n < 1 {
        return -1;
    }
    let p = myproc();
    p.lock.acquire();
    p.tickets = n as u32;
    p.lock.release();
    0
}

// set_priority(new, pid): PBS static priority. Returns the old
// priority, or -1 if pid doesn't exist or new is out of [0,100]. Only
// releases the slot's lock on the success path (see DESIGN.md for why
// the source's version is a bug).
pub fn set_priority(new_priority: i32, pid: u32) -> i32 {
    if !(0..=100).contains(&new_priority) {
        return -1;
    }

    for i in 0..NPROC {
        let p = unsafe { &mut PROCS[i] };
        p.lock.acquire();
        if p.pid == pid {
            let old = p.priority;
            p.priority = new_priority as u8;
            p.niceness = DEFAULT_NICENESS;
            p.time_run = 0;
            p.time_slept = 0;
            p.lock.release();

            if (new_priority as u8) < old {
                yield_();
            }
            return old as i32;
        }
        p.lock.release();
    }

    -1
}

// trace(mask): enable syscall tracing for the calling process; mask
// must be >= 2 (bit 0 alone traces nothing meaningful) and is
// inherited by fork.
pub fn trace(mask: i32) -> i32 {
    if mask < 2 {
        return -1;
    }
    let p = myproc();
    p.lock.acquire();
    p.trace = mask as u32;
    p.lock.release();
    0
}

// ---------------------------------------------------------------
// copy helpers that dispatch on whether an address is user or kernel
// ---------------------------------------------------------------

// Copy to either a user address (via the current process's page
// table) or a kernel address (a plain memmove), depending on
// `user_dst`.
pub fn either_copyout(user_dst: bool, dst: *mut u8, src: *const u8, len: usize) -> i32 {
    if user_dst {
        let p = myproc();
        let pt = unsafe { &mut *p.pagetable.unwrap() };
        copyout(pt, dst as usize, src, len)
    } else {
        unsafe { core::ptr::copy_nonoverlapping(src, dst, len) };
        0
    }
}

// Copy from either a user address or a kernel address into dst,
// depending on `user_src`.
pub fn either_copyin(dst: *mut u8, user_src: bool, src: *const u8, len: usize) -> i32 {
    if user_src {
        let p = myproc();
        let pt = unsafe { &mut *p.pagetable.unwrap() };
        crate::vm::copyin(pt, dst, src as usize, len)
    } else {
        unsafe { core::ptr::copy_nonoverlapping(src, dst, len) };
        0
    }
}

// ---------------------------------------------------------------
// debug dump
// ---------------------------------------------------------------

fn state_name(s: Procstate) -> &'static str {
    match s {
        UNUSED => "unused",
        USED => "used",
        SLEEPING => "sleep",
        RUNNABLE => "runble",
        RUNNING => "run",
        ZOMBIE => "zombie",
    }
}

// Print a one-line snapshot of every non-UNUSED slot. Columns depend
// on the active policy: MLFQ shows queue/quantum/wait accounting,
// everything else shows the plain timeRun/timeSlept pair.
pub fn procdump() {
    printf!("\n");
    for i in 0..NPROC {
        let p = unsafe { &PROCS[i] };
        if p.state == UNUSED {
            continue;
        }

        let name = core::str::from_utf8(&p.name).unwrap_or("?");
        let name = name.split('\0').next().unwrap_or("");

        if matches!(ACTIVE_POLICY, Policy::Mlfq) {
            let now = ticks();
            let wait_time = sched::mlfq_wait_time(now, p.entry_time, p.time_ran_in_queue);
            printf!(
                "{} {} q={} tq={} wait={} last={} {}\n",
                p.pid, state_name(p.state), p.queue, p.time_ran_in_queue, wait_time, p.last_scheduled, name
            );
        } else {
            printf!("{} {} rt={} st={} {}\n", p.pid, state_name(p.state), p.time_run, p.time_slept, name);
        }
    }
}
