mod sysfile;
pub(crate) mod sysproc;
pub mod syscall;

// System call numbers. The process-management calls (1..=14) follow
// the numbering in the external-interfaces table; the filesystem
// calls the kernel happens to have working implementations for
// (exec/open/mknod -- everything else in that layer is an external
// collaborator referenced only by its interfaces, per the spec's
// scope) are appended afterward rather than interleaved with xv6's
// traditional numbering, so the two numberings don't collide.
pub const SYS_fork: u8 = 1;
pub const SYS_exit: u8 = 2;
pub const SYS_wait: u8 = 3;
pub const SYS_getpid: u8 = 4;
pub const SYS_sbrk: u8 = 5;
pub const SYS_sleep: u8 = 6;
pub const SYS_kill: u8 = 7;
pub const SYS_uptime: u8 = 8;
pub const SYS_trace: u8 = 9;
pub const SYS_settickets: u8 = 10;
pub const SYS_set_priority: u8 = 11;
pub const SYS_waitx: u8 = 12;
pub const SYS_sigalarm: u8 = 13;
pub const SYS_sigreturn: u8 = 14;

pub const SYS_exec: u8 = 15;
pub const SYS_open: u8 = 16;
pub const SYS_mknod: u8 = 17;

pub const NSYSCALL: usize = 18;

// Names, indexed by syscall number, for trace(mask)'s per-call log line.
pub const SYSCALL_NAMES: [&str; NSYSCALL] = [
    "", "fork", "exit", "wait", "getpid", "sbrk", "sleep", "kill", "uptime", "trace",
    "settickets", "set_priority", "waitx", "sigalarm", "sigreturn", "exec", "open", "mknod",
];

#[macro_export]
macro_rules! NELEM {
    ( $x:expr ) => {
        x.len()
    };
}
