// Thin argument-fetching wrappers around the process-management core in
// proc.rs -- the scheduling/state-machine logic itself lives there, not
// here, so it stays reachable (and testable) without going through a
// trap frame.

use crate::proc::{self, myproc};
use crate::syscall::syscall::{argaddr, argint};
use crate::trap::{tickslock, ticks, ticks_chan};

pub(crate) fn sys_fork() -> u64 {
    proc::fork() as i64 as u64
}

pub(crate) fn sys_exit() -> u64 {
    let n = argint(0);
    proc::exit(n);
}

pub(crate) fn sys_wait() -> u64 {
    let addr = argaddr(0);
    proc::wait(addr) as i64 as u64
}

pub(crate) fn sys_getpid() -> u64 {
    myproc().pid as u64
}

pub(crate) fn sys_sbrk() -> u64 {
    let n = argint(0);
    let addr = myproc().sz;
    if proc::growproc(n) < 0 {
        return u64::MAX;
    }
    addr as u64
}

pub(crate) fn sys_sleep() -> u64 {
    let n = argint(0) as u64;

    let lock = tickslock();
    lock.acquire();
    let ticks0 = ticks();
    while ticks() - ticks0 < n {
        if myproc().killed() != 0 {
            lock.release();
            return u64::MAX;
        }
        proc::sleep(ticks_chan(), lock);
    }
    lock.release();
    0
}

pub(crate) fn sys_kill() -> u64 {
    let pid = argint(0) as u32;
    proc::kill(pid) as i64 as u64
}

// return how many clock tick interrupts have occurred since start.
pub(crate) fn sys_uptime() -> u64 {
    let lock = tickslock();
    lock.acquire();
    let xticks = ticks();
    lock.release();
    xticks
}

pub(crate) fn sys_trace() -> u64 {
    let mask = argint(0);
    proc::trace(mask) as i64 as u64
}

pub(crate) fn sys_settickets() -> u64 {
    let tickets = argint(0);
    proc::settickets(tickets) as i64 as u64
}

pub(crate) fn sys_set_priority() -> u64 {
    let priority = argint(0);
    let pid = argint(1) as u32;
    proc::set_priority(priority, pid) as i64 as u64
}

pub(crate) fn sys_sigalarm() -> u64 {
    let interval = argint(0);
    let handler = argaddr(1);
    proc::sig_alarm(interval, handler) as i64 as u64
}

pub(crate) fn sys_sigreturn() -> u64 {
    proc::sig_return()
}

pub(crate) fn sys_waitx() -> u64 {
    let addr = argaddr(0);
    let wtime_addr = argaddr(1);
    let rtime_addr = argaddr(2);
    proc::waitx(addr, wtime_addr, rtime_addr) as i64 as u64
}
