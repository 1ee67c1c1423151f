use crate::kalloc::KMEM;
use crate::{MAKE_SATP, PA2PTE, PGROUNDDOWN, PGROUNDUP, printf, PTE2PA, PTE_FLAGS, PX};
use crate::memlayout::{KERNBASE, PHYSTOP, PLIC, TRAMPOLINE, UART0, VIRTIO0};
use crate::proc::proc_mapstacks;
use crate::riscv::{MAXVA, PageTable, PGSIZE, Pte, PTE_COW, PTE_R, PTE_SIZE, PTE_U, PTE_V, PTE_W, PTE_X, sfence_vma, w_satp};
use crate::string::{memmove, memset};

pub const COPY_ERR: i32 = -1;

/*
 * the kernel's page table.
 */
pub static mut KERNEL_PAGETABLE: Option<&'static PageTable> = None;

extern {
    static etext: u8;  // kernel.ld sets this to end of kernel code.
    static trampoline: u8; // trampoline.S
}

// Make a direct-map page table for the kernel.
fn kvmmake<'a>() -> &'a PageTable {
    let kpgtbl = unsafe {
        let pg: *mut PageTable = KMEM.kalloc();
        if pg.is_null() {
            panic!("failed to alloc for root page table");
        }
        memset(pg as *mut u8, 0, PGSIZE);
        pg.as_mut().unwrap()
    };
    // printf!("Root Page Table Allocated.\n");

    // uart registers
    kvmmap(kpgtbl, UART0, UART0, PGSIZE, PTE_R | PTE_W);
    // printf!("UART0 Mapped.\n");

    // virtio mmio disk interface
    kvmmap(kpgtbl, VIRTIO0, VIRTIO0, PGSIZE, PTE_R | PTE_W);
    // printf!("VIRTIO0 Mapped.\n");

    // PLIC
    kvmmap(kpgtbl, PLIC, PLIC, 0x400000, PTE_R | PTE_W);
    // printf!("PLIC Mapped.\n");

    let etext_addr = (unsafe { &etext } as *const u8).expose_addr();
    // map kernel text executable and read-only.
    kvmmap(kpgtbl, KERNBASE, KERNBASE, etext_addr - KERNBASE, PTE_R | PTE_X);
    // printf!("etext_addr: {:x}, KERNBASE: {:x}, PHYSTOP: {:x}, size: {}\n", etext_addr, KERNBASE, PHYSTOP, etext_addr - KERNBASE);
    // printf!("KERNBASE Mapped.\n");

    // map kernel data and the physical RAM we'll make use of.
    kvmmap(kpgtbl, etext_addr, etext_addr, PHYSTOP - etext_addr, PTE_R | PTE_W);
    // printf!("etext_addr Mapped.\n");

    let trapoline_addr = (unsafe { &trampoline } as *const u8).expose_addr();
    // map the trampoline for trap entry/exit to
    // the highest virtual address in the kernel.
    kvmmap(kpgtbl, TRAMPOLINE, trapoline_addr, PGSIZE, PTE_R | PTE_X);
    // printf!("TRAMPOLINE Mapped.\n");

    // allocate and map a kernel stack for each process.
    proc_mapstacks(kpgtbl);
    // printf!("Proc Kernel Stack Mapped.\n");

    kpgtbl
}

// Initialize the one KERNEL_PAGETABLE
pub fn kvminit() {
    unsafe {
        KERNEL_PAGETABLE = Some(kvmmake());
    }
}

// add a mapping to the kernel page table.
// only used when booting.
// does not flush TLB or enable paging.
pub fn kvmmap(kpgtbl: &mut PageTable, va: usize, pa: usize, sz: usize, perm: usize)
{
    if mappages(kpgtbl, va, pa, sz, perm) != 0 {
        panic!("kvmmap");
    }
}

// Create PTEs for virtual addresses starting at va that refer to
// physical addresses starting at pa. va and size might not
// be page-aligned. Returns 0 on success, -1 if walk() couldn't
// allocate a needed page-table page.
pub fn mappages(pagetable: &mut PageTable, va: usize, mut pa: usize, size: usize, perm: usize) -> i32 {
    if size == 0 {
        panic!("mappages: size");
    }

    let mut a: usize = PGROUNDDOWN!(va);
    let last: usize = PGROUNDDOWN!(va + size - 1);
    // printf!("a: {:x}, last: {:x}\n\n", a, last);

    loop {
        let pte: Option<&mut Pte> = walk(pagetable, a, 1);
        if pte.is_none() {
            return -1;
        }

        let pte = pte.unwrap();
        if pte.0 & PTE_V == 1 {
            printf!("a: {:x}, Pte: {:x}\n", a, pte.0);
            panic!("mappages: remap");
        }

        (*pte) = Pte(PA2PTE!(pa) | perm | PTE_V);
        if a == last {
            break;
        }

        a += PGSIZE;
        pa += PGSIZE;
    }
    return 0;
}

// Remove npages of mappings starting from va. va must be
// page-aligned. The mappings must exist.
// Optionally free the physical memory.
pub fn uvmunmap(pagetable: &mut PageTable, va: usize, npages: usize, do_free: bool) {
    if (va % PGSIZE) != 0 {
        panic!("uvmunmap: not aligned");
    }

    for a in (va..(va + npages * PGSIZE)).step_by(PGSIZE) {
        match walk(pagetable, a, 0) {
            None => panic!("uvmunmap: walk"),
            Some(pte) => {
                if pte.0 & PTE_V == 0 {
                    panic!("uvmunmap: not mapped");
                }

                if PTE_FLAGS!(pte.0) == PTE_V {
                    panic!("uvmunmap: not a leaf");
                }

                if do_free {
                    let pa = PTE2PA!(pte.0);
                    unsafe { KMEM.kfree(pa as *mut PageTable); }
                }
                *pte = Pte(0);
            }
        }
    }
}


// Return the address of the PTE in page table pagetable
// that corresponds to virtual address va.  If alloc!=0,
// create any required page-table pages.
//
// The risc-v Sv39 scheme has three levels of page-table
// pages. A page-table page contains 512 64-bit PTEs.
// A 64-bit virtual address is split into five fields:
//   39..63 -- must be zero.
//   30..38 -- 9 bits of level-2 index.
//   21..29 -- 9 bits of level-1 index.
//   12..20 -- 9 bits of level-0 index.
//    0..11 -- 12 bits of byte offset within the page.
fn walk(pagetable: &mut PageTable, va: usize, alloc: usize) -> Option<&mut Pte> {
    if va >= MAXVA {
        panic!("walk");
    }

    let mut curr_pgtbl = pagetable;
    for level in (1..3).rev() {
        let pte = &mut (curr_pgtbl.0)[PX!(level, va)];
        if pte.0 & PTE_V  == PTE_V {
            unsafe { curr_pgtbl = (PTE2PA!(pte.0) as *mut PageTable).as_mut().unwrap(); }
        } else {
            unsafe {
                if alloc == 0 {
                    return None;
                }

                let next_level_pgtbl: *mut PageTable = KMEM.kalloc();
                if next_level_pgtbl.is_null() {
                    return None;
                }

                memset(next_level_pgtbl as *mut u8, 0, PGSIZE);

                *pte = Pte(PA2PTE!(next_level_pgtbl.expose_addr()) | PTE_V);
                // printf!("[{}] pte: {:x}\n", PX!(level, va), pte.0);
                curr_pgtbl = next_level_pgtbl.as_mut().unwrap();
            }
        }
    }

    Some(&mut (curr_pgtbl.0)[PX!(0, va)])
}

// Switch h/w page table register to the kernel's page table,
// and enable paging.
pub fn kvminithart() {
    // wait for any previous writes to the page table memory to finish.
    sfence_vma();

    let addr = unsafe { (KERNEL_PAGETABLE.unwrap() as *const PageTable).expose_addr() };
    let satp = MAKE_SATP!(addr);
    w_satp(satp);

    // flush stale entries from the TLB.
    sfence_vma();
}

// create an empty user page table.
// returns None if out of memory.
pub fn uvmcreate() -> Option<*mut PageTable> {
    unsafe {
        let pagetable: *mut PageTable = KMEM.kalloc();
        if pagetable.is_null() {
            return None;
        }
        memset(pagetable as *mut u8, 0, PGSIZE);
        Some(pagetable)
    }
}

// Load the user initcode into address 0 of pagetable,
// for the very first process.
// sz must be less than a page.
pub fn uvmfirst(pagetable: &mut PageTable, src: *const u8, sz: usize) {
    if sz >= PGSIZE {
        panic!("uvmfirst: more than a page");
    }

    let mem = unsafe { KMEM.kalloc() };
    memset(mem, 0, PGSIZE);
    mappages(pagetable, 0, mem.expose_addr(), PGSIZE, PTE_W | PTE_R | PTE_X | PTE_U);
    memmove(mem, src, sz);
}

// Recursively free page-table pages.
// All leaf mappings must already have been removed.
fn freewalk(pagetable: &mut PageTable) {
    // there are 2^9 = 512 PTEs in a page table.
    for pte in &mut pagetable.0 {
        if pte.0 & PTE_V != 0 && pte.0 & (PTE_R | PTE_W | PTE_X) == 0 {
            // this PTE points to a lower-level page table.
            let child_pgtbl = unsafe { (PTE2PA!(pte.0) as *mut PageTable).as_mut().unwrap() };
            freewalk(child_pgtbl);
            *pte = Pte(0);
        } else if pte.0 & PTE_V != 0 {
            panic!("freewalk: leaf");
        }
    }

    unsafe { KMEM.kfree(pagetable) };
}

// Free user memory pages,
// then free page-table pages.
pub fn uvmfree(pagetable: &mut PageTable, sz: usize) {
    if sz > 0 {
        uvmunmap(pagetable, 0, PGROUNDUP!(sz)/PGSIZE, true);
    }
    freewalk(pagetable);
}

// Look up a virtual address, return the physical address,
// or None if not mapped.
// Can only be used to look up user pages.
pub fn walkaddr(pagetable: &mut PageTable, va: usize) -> Option<usize> {
    if va >= MAXVA {
        return None;
    }

    let pte = walk(pagetable, va, 0)?;
    if pte.0 & PTE_V == 0 || pte.0 & PTE_U == 0 {
        return None;
    }

    Some(PTE2PA!(pte.0))
}

// Allocate PTEs and physical memory to grow process from oldsz to
// newsz, which need not be page aligned. Returns the new size, or 0
// on error.
pub fn uvmalloc(pagetable: &mut PageTable, oldsz: usize, newsz: usize, xperm: usize) -> usize {
    if newsz < oldsz {
        return oldsz;
    }

    let oldsz = PGROUNDUP!(oldsz);
    let mut a = oldsz;
    while a < newsz {
        let mem: *mut u8 = unsafe { KMEM.kalloc() };
        if mem.is_null() {
            uvmdealloc(pagetable, a, oldsz);
            return 0;
        }

        memset(mem, 0, PGSIZE);
        if mappages(pagetable, a, mem.expose_addr(), PGSIZE, PTE_R | PTE_U | xperm) != 0 {
            unsafe { KMEM.kfree(mem); }
            uvmdealloc(pagetable, a, oldsz);
            return 0;
        }

        a += PGSIZE;
    }

    newsz
}

// Deallocate user pages to bring the process size from oldsz to
// newsz. oldsz and newsz need not be page-aligned, nor does newsz
// need to be less than oldsz. oldsz can be larger than the actual
// process size. Returns the new process size.
pub fn uvmdealloc(pagetable: &mut PageTable, oldsz: usize, newsz: usize) -> usize {
    if newsz >= oldsz {
        return oldsz;
    }

    if PGROUNDUP!(newsz) < PGROUNDUP!(oldsz) {
        let npages = (PGROUNDUP!(oldsz) - PGROUNDUP!(newsz)) / PGSIZE;
        uvmunmap(pagetable, PGROUNDUP!(newsz), npages, true);
    }

    newsz
}

// Mark a PTE invalid for user access. Used by exec for the stack
// guard page.
pub fn uvmclear(pagetable: &mut PageTable, va: usize) {
    if let Some(pte) = walk(pagetable, va, 0) {
        pte.0 &= !PTE_U;
    }
}

// Given a parent process's page table, copy its memory into a
// child's page table. Instead of eagerly copying the backing pages,
// both page tables are pointed at the same physical pages, marked
// read-only and tagged with the copy-on-write bit; the refcount on
// each shared page is bumped so it isn't freed while either side
// still maps it. The actual copy happens lazily, the first time
// either side takes a write fault, in uvmcowfault(). Returns 0 on
// success, -1 on failure (in which case the caller should tear down
// whatever the new page table picked up so far).
pub fn uvmcopy(old: &mut PageTable, new: &mut PageTable, sz: usize) -> i32 {
    let mut i = 0;
    while i < sz {
        let pte = match walk(old, i, 0) {
            Some(pte) => pte,
            None => panic!("uvmcopy: pte should exist"),
        };
        if pte.0 & PTE_V == 0 {
            panic!("uvmcopy: page not present");
        }

        let pa = PTE2PA!(pte.0);
        let mut flags = PTE_FLAGS!(pte.0);
        if flags & PTE_W != 0 {
            flags = (flags & !PTE_W) | PTE_COW;
            pte.0 = PA2PTE!(pa) | flags | PTE_V;
        }

        if mappages(new, i, pa, PGSIZE, flags) != 0 {
            uvmunmap(new, 0, i / PGSIZE, false);
            return -1;
        }
        unsafe { KMEM.incr_ref(pa); }

        i += PGSIZE;
    }

    0
}

/// Reasons `uvmcowfault` declines to service a store fault; the
/// caller (the trap handler) turns every one of these into killing
/// the faulting process.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CowFaultError {
    AddressOutOfRange,
    NotMapped,
    NotUserPage,
    NotCow,
    OutOfMemory,
}

// Handle a store page fault at virtual address va in pagetable. If
// the faulting page is a valid, user, copy-on-write mapping, give the
// faulting process a private writable copy and return Ok. Otherwise
// return the reason the fault can't be serviced; the caller must kill
// the process.
pub fn uvmcowfault(pagetable: &mut PageTable, va: usize) -> Result<(), CowFaultError> {
    if va >= MAXVA {
        return Err(CowFaultError::AddressOutOfRange);
    }

    let pg = PGROUNDDOWN!(va);
    let pte = walk(pagetable, pg, 0).ok_or(CowFaultError::NotMapped)?;
    if pte.0 & PTE_V == 0 {
        return Err(CowFaultError::NotMapped);
    }
    if pte.0 & PTE_U == 0 {
        return Err(CowFaultError::NotUserPage);
    }
    if pte.0 & PTE_COW == 0 {
        return Err(CowFaultError::NotCow);
    }

    let old_pa = PTE2PA!(pte.0);
    let new_pg: *mut u8 = unsafe { KMEM.kalloc() };
    if new_pg.is_null() {
        return Err(CowFaultError::OutOfMemory);
    }

    memmove(new_pg, old_pa as *const u8, PGSIZE);

    let flags = (PTE_FLAGS!(pte.0) & !PTE_COW) | PTE_W;
    *pte = Pte(PA2PTE!(new_pg.expose_addr()) | flags | PTE_V);
    unsafe { KMEM.kfree(old_pa as *mut u8); }

    Ok(())
}

// Copy from kernel to user. Copy len bytes from src to virtual
// address dstva in a given page table. Returns 0 on success, -1 on
// error.
pub fn copyout(pagetable: &mut PageTable, dstva: usize, mut src: *const u8, mut len: usize) -> i32 {
    let mut dstva = dstva;
    while len > 0 {
        let va0 = PGROUNDDOWN!(dstva);
        if va0 >= MAXVA {
            return COPY_ERR;
        }
        let pa0 = match walkaddr(pagetable, va0) {
            Some(pa) => pa,
            None => return COPY_ERR,
        };

        let mut n = PGSIZE - (dstva - va0);
        if n > len {
            n = len;
        }

        unsafe {
            memmove((pa0 + (dstva - va0)) as *mut u8, src, n);
        }

        len -= n;
        src = unsafe { src.add(n) };
        dstva = va0 + PGSIZE;
    }

    0
}

// Copy from user to kernel. Copy len bytes to dst from virtual
// address srcva in a given page table. Returns 0 on success, -1 on
// error.
pub fn copyin(pagetable: &mut PageTable, mut dst: *mut u8, srcva: usize, mut len: usize) -> i32 {
    let mut srcva = srcva;
    while len > 0 {
        let va0 = PGROUNDDOWN!(srcva);
        let pa0 = match walkaddr(pagetable, va0) {
            Some(pa) => pa,
            None => return COPY_ERR,
        };

        let mut n = PGSIZE - (srcva - va0);
        if n > len {
            n = len;
        }

        unsafe {
            memmove(dst, (pa0 + (srcva - va0)) as *const u8, n);
        }

        len -= n;
        dst = unsafe { dst.add(n) };
        srcva = va0 + PGSIZE;
    }

    0
}

// Copy a null-terminated string from user to kernel. Copy bytes to
// dst from virtual address srcva in a given page table, until a '\0',
// or max. Returns the string length (excluding the nul) on success,
// -1 on error.
pub fn copyinstr(pagetable: &mut PageTable, dst: *mut u8, srcva: usize, max: usize) -> i32 {
    let mut srcva = srcva;
    let mut dst = dst;
    let mut max = max;
    let mut got_null = false;
    let mut total = 0usize;

    while !got_null && max > 0 {
        let va0 = PGROUNDDOWN!(srcva);
        let pa0 = match walkaddr(pagetable, va0) {
            Some(pa) => pa,
            None => return COPY_ERR,
        };

        let mut n = PGSIZE - (srcva - va0);
        if n > max {
            n = max;
        }

        let mut p = (pa0 + (srcva - va0)) as *const u8;
        while n > 0 {
            let c = unsafe { *p };
            unsafe { *dst = c; }
            if c == 0 {
                got_null = true;
                break;
            }
            n -= 1;
            max -= 1;
            total += 1;
            p = unsafe { p.add(1) };
            dst = unsafe { dst.add(1) };
        }

        srcva = va0 + PGSIZE;
    }

    if got_null {
        total as i32
    } else {
        COPY_ERR
    }
}