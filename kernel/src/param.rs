// Kernel-build-time configuration constants.
//
// These mirror xv6's param.h: fixed table sizes the rest of the kernel
// indexes into directly, so they are plain consts rather than something
// discovered at runtime.

pub const NPROC: usize = 64; // maximum number of processes
pub const NCPU: usize = 8; // maximum number of CPUs
pub const NOFILE: usize = 16; // open files per process
pub const NFILE: usize = 100; // open files per system
pub const NINODE: usize = 50; // maximum number of active i-nodes
pub const NDEV: usize = 10; // maximum major device number
pub const ROOTDEV: u32 = 1; // device number of file system root disk
pub const MAXARG: usize = 32; // max exec arguments
pub const MAXPATH: usize = 128; // maximum file path name length
pub const NBUF: usize = 30; // size of disk block cache
pub const LOGSIZE: usize = 30; // max data blocks in on-disk log

pub const DEFAULT_PRIORITY: u8 = 60; // PBS static priority, 0..=100
pub const DEFAULT_NICENESS: u8 = 5; // 0..=10
pub const DEFAULT_TICKETS: u32 = 1; // LBS tickets, must stay >= 1
