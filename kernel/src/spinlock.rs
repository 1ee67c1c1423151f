use crate::proc::{cpuid, mycpu};
use crate::riscv::{__sync_lock_release, __sync_lock_test_and_set, __sync_synchronize, intr_get, intr_off, intr_on};

// Mutual-exclusion lock.
//
// Acquire disables interrupts on this hart before spinning, so a lock
// holder can never be preempted by an interrupt handler that wants the
// same lock. Interrupt-disable nesting is tracked per-cpu (noff/intena
// in Cpu), not per-lock, so push_off/pop_off must be paired exactly
// like xv6's.
#[derive(Copy, Clone)]
pub struct Spinlock {
    locked: u64, // Is the lock held?

    // For debugging:
    name: &'static str, // Name of lock.
    cpu: Option<usize>, // hartid of the cpu holding the lock.
}

impl Spinlock {
    pub const fn init_lock(name: &'static str) -> Self {
        Spinlock {
            locked: 0,
            name,
            cpu: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Acquire the lock. Loops (spins) until the lock is acquired.
    pub fn acquire(self: &mut Self) {
        push_off(); // disable interrupts to avoid deadlock.
        if self.holding() {
            panic!("acquire: {} already held by this cpu", self.name);
        }

        // On RISC-V, sync_lock_test_and_set turns into an atomic swap:
        //   a5 = 1
        //   s1 = &lk->locked
        //   amoswap.w.aq a5, a5, (s1)
        while __sync_lock_test_and_set(&mut self.locked, 1) != 0 {}

        // Tell the compiler and the processor to not move loads or stores
        // past this point, so that the critical section's memory
        // references happen strictly after the lock is acquired.
        __sync_synchronize();

        self.cpu = Some(cpuid());
    }

    /// Release the lock.
    pub fn release(self: &mut Self) {
        if !self.holding() {
            panic!("release: {} not held by this cpu", self.name);
        }

        self.cpu = None;

        // Tell the compiler and the CPU to not move loads or stores
        // past this point, so that all the stores in the critical
        // section are visible to other CPUs before the lock is released.
        __sync_synchronize();

        // lk->locked = 0, as an atomic swap rather than a plain store.
        __sync_lock_release(&self.locked);

        pop_off();
    }

    /// Check whether this cpu is holding the lock.
    /// Interrupts must be off.
    pub fn holding(self: &Self) -> bool {
        self.locked != 0 && self.cpu == Some(cpuid())
    }
}

/// push_off/pop_off are like intr_off()/intr_on() except that they are
/// matched: it takes two pop_off()s to undo two push_off()s. Also, if
/// interrupts are initially off, then push_off, pop_off leaves them off.
pub fn push_off() {
    let old = intr_get();

    intr_off();
    let cpu = mycpu();
    if cpu.noff == 0 {
        cpu.intena = old;
    }
    cpu.noff += 1;
}

pub fn pop_off() {
    let cpu = mycpu();
    if intr_get() {
        panic!("pop_off - interruptible");
    }

    if cpu.noff < 1 {
        panic!("pop_off");
    }
    cpu.noff -= 1;
    if cpu.noff == 0 && cpu.intena {
        intr_on();
    }
}
