use core::ptr;

use crate::memlayout::{KERNBASE, PHYSTOP};
use crate::riscv::PGSIZE;
use crate::spinlock::Spinlock;
use crate::string::memset;
use crate::PGROUNDUP;

extern "C" {
    // first address after kernel.
    // defined by kernel.ld.
    static mut end: u8;
}

struct Run {
    next: *mut Run,
}

// One entry per physical page in [KERNBASE, PHYSTOP). Pages shared
// between a parent and child across a copy-on-write fork carry a count
// above 1; kfree only returns a page to the freelist once its count
// drops to zero. Indexed, not keyed by a map, since the physical
// address range is fixed at build time.
const NPAGES: usize = (PHYSTOP - KERNBASE) / PGSIZE;

fn pageidx(pa: usize) -> usize {
    (pa - KERNBASE) / PGSIZE
}

pub struct KMem {
    lock: Spinlock,
    freelist: *mut Run,
    refcount: [u8; NPAGES],
}

pub static mut KMEM: KMem = KMem::create();

impl KMem {
    const fn create() -> Self {
        Self {
            lock: Spinlock::init_lock("kmem"),
            freelist: ptr::null_mut(),
            refcount: [0; NPAGES],
        }
    }
    pub fn kinit() {
        unsafe {
            KMEM.freerange((&mut end) as *mut u8, PHYSTOP as *mut u8);
        }

        // printf!("finish init from {:x}, to {:x}", unsafe { (&end as *const u8).expose_addr() }, PHYSTOP);
    }

    fn freerange<T: Sized>(self: &mut Self, pa_start: *mut T, pa_end: *mut T) {
        let mut p = PGROUNDUP!(pa_start);
        while p + PGSIZE <= pa_end as usize {
            self.release_page(p as *mut u8);
            p += PGSIZE;
        }
    }

    /// Unconditionally push a page onto the freelist, bypassing the
    /// refcount. Used only by freerange() during boot, where every page
    /// is being handed to the allocator for the first time and has no
    /// refcount to decrement yet.
    fn release_page(self: &mut Self, pa: *mut u8) {
        memset(pa, 1, PGSIZE); // fill with junk to catch dangling refs.

        let r = pa as *mut Run;
        self.lock.acquire();
        self.refcount[pageidx(pa as usize)] = 0;
        unsafe {
            (*r).next = self.freelist;
        }
        self.freelist = r;
        self.lock.release();
    }

    /// Drop one reference to the page of physical memory pointed at by
    /// pa, which normally should have been returned by a call to
    /// kalloc(). Only returns the page to the freelist once its
    /// refcount reaches zero -- a page shared by a copy-on-write fork
    /// may outlive the call that frees it in one of the sharers.
    pub fn kfree<T: Sized>(self: &mut Self, pa: *mut T) {
        let pa_usize = pa as usize;
        unsafe {
            if pa_usize % PGSIZE != 0
                || pa_usize < ((&end) as *const u8) as usize
                || pa_usize >= PHYSTOP
            {
                panic!("kfree");
            }
        }

        self.lock.acquire();
        let idx = pageidx(pa_usize);
        if self.refcount[idx] > 0 {
            self.refcount[idx] -= 1;
        }
        let should_free = self.refcount[idx] == 0;
        self.lock.release();

        if should_free {
            self.release_page(pa as *mut u8);
        }
    }

    /// Allocate one 4096-byte page of physical memory, with a fresh
    /// refcount of 1. Returns a pointer that the kernel can use, or
    /// null if the memory cannot be allocated.
    pub fn kalloc<T: Sized>(self: &mut Self) -> *mut T {
        self.lock.acquire();
        let r = self.freelist;
        if !r.is_null() {
            unsafe {
                self.freelist = (*r).next;
            }
            self.refcount[pageidx(r as usize)] = 1;
        }
        self.lock.release();

        if !r.is_null() {
            memset(r as *mut u8, 5, PGSIZE); // fill with junk
        }
        r as *mut T
    }

    /// Add a reference to an already-allocated page, for sharing it
    /// copy-on-write into a child address space. Caller must already
    /// hold a reference (the page must not be on the freelist).
    pub fn incr_ref(self: &mut Self, pa: usize) {
        self.lock.acquire();
        let idx = pageidx(pa);
        if self.refcount[idx] == 0 {
            panic!("incr_ref: page not allocated");
        }
        self.refcount[idx] += 1;
        self.lock.release();
    }

    /// Number of outstanding references to the page at pa. > 1 means
    /// the page is shared copy-on-write.
    pub fn ref_count(self: &mut Self, pa: usize) -> u8 {
        self.lock.acquire();
        let c = self.refcount[pageidx(pa)];
        self.lock.release();
        c
    }
}
