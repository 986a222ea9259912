// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! Simulated physical memory
//!
//! Hands out fake bus addresses for host memory and translates them back so
//! the simulated engine can follow descriptors and move data. Kernel
//! allocations are page aligned and contiguous; user mappings are split at
//! page boundaries and, unless contiguous mode is on, every page lands at an
//! unrelated bus address.

use std::alloc::{self, Layout};
use std::collections::{BTreeMap, HashMap};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::driver::{KernelMemory, SgEntry, UserMemory, PAGE_SIZE};
use crate::error::{Error, Result};

/// First bus address handed out; above 4 GiB so high address words matter.
const KERNEL_BASE: u64 = 0x1_0000_0000;
const USER_BASE: u64 = 0x8_0000_0000;

#[derive(Debug, Clone, Copy)]
struct Region {
    virt: usize,
    len: usize,
}

#[derive(Debug)]
struct Allocation {
    virt: usize,
    layout: Layout,
}

pub struct PhysMemory {
    regions: Mutex<BTreeMap<u64, Region>>,
    allocations: Mutex<HashMap<u64, Allocation>>,
    user_mappings: Mutex<HashMap<u64, Vec<u64>>>,
    next_kernel: AtomicU64,
    next_user: AtomicU64,
    next_handle: AtomicU64,
    contiguous_user: AtomicBool,
}

impl Default for PhysMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl PhysMemory {
    pub fn new() -> Self {
        Self {
            regions: Mutex::new(BTreeMap::new()),
            allocations: Mutex::new(HashMap::new()),
            user_mappings: Mutex::new(HashMap::new()),
            next_kernel: AtomicU64::new(KERNEL_BASE),
            next_user: AtomicU64::new(USER_BASE),
            next_handle: AtomicU64::new(1),
            contiguous_user: AtomicBool::new(false),
        }
    }

    /// Map user pages to consecutive bus addresses.
    pub fn set_contiguous_user(&self, contiguous: bool) {
        self.contiguous_user.store(contiguous, Ordering::Relaxed);
    }

    pub fn alloc(&self, size: usize) -> Result<KernelMemory> {
        if size == 0 {
            return Err(Error::InvalidArgument);
        }
        let len = size.next_multiple_of(PAGE_SIZE);
        let layout = Layout::from_size_align(len, PAGE_SIZE).map_err(|_| Error::InvalidArgument)?;
        let virt = NonNull::new(unsafe { alloc::alloc_zeroed(layout) }).ok_or(Error::AllocationFailed)?;

        // a guard page keeps consecutive allocations from looking contiguous
        let phys = self
            .next_kernel
            .fetch_add((len + PAGE_SIZE) as u64, Ordering::Relaxed);

        self.regions.lock().insert(
            phys,
            Region {
                virt: virt.as_ptr() as usize,
                len,
            },
        );
        self.allocations.lock().insert(
            phys,
            Allocation {
                virt: virt.as_ptr() as usize,
                layout,
            },
        );

        Ok(KernelMemory {
            handle: phys,
            virt,
            phys,
            size,
        })
    }

    pub fn free(&self, mem: &KernelMemory) {
        let Some(allocation) = self.allocations.lock().remove(&mem.handle) else {
            return;
        };
        self.regions.lock().remove(&mem.handle);
        unsafe { alloc::dealloc(allocation.virt as *mut u8, allocation.layout) };
    }

    pub fn live_allocations(&self) -> usize {
        self.allocations.lock().len()
    }

    pub fn map_user(&self, ptr: NonNull<u8>, size: usize) -> Result<UserMemory> {
        if size == 0 {
            return Err(Error::UserMappingFailed);
        }

        let start = ptr.as_ptr() as usize;
        let end = start + size;
        let first_page = start / PAGE_SIZE;
        let pages = (end - 1) / PAGE_SIZE - first_page + 1;
        let contiguous = self.contiguous_user.load(Ordering::Relaxed);

        let run_base = if contiguous {
            self.next_user
                .fetch_add(((pages + 1) * PAGE_SIZE) as u64, Ordering::Relaxed)
        } else {
            0
        };

        let mut sg = Vec::with_capacity(pages);
        let mut keys = Vec::with_capacity(pages);
        let mut regions = self.regions.lock();

        let mut addr = start;
        let mut page = 0;
        while addr < end {
            let page_end = (addr / PAGE_SIZE + 1) * PAGE_SIZE;
            let len = page_end.min(end) - addr;
            let page_phys = if contiguous {
                run_base + (page * PAGE_SIZE) as u64
            } else {
                self.next_user
                    .fetch_add((2 * PAGE_SIZE) as u64, Ordering::Relaxed)
            };
            let phys = page_phys + (addr % PAGE_SIZE) as u64;
            sg.push(SgEntry { phys, len });
            if !contiguous {
                regions.insert(phys, Region { virt: addr, len });
                keys.push(phys);
            }
            addr += len;
            page += 1;
        }

        if contiguous {
            let phys = sg[0].phys;
            regions.insert(phys, Region { virt: start, len: size });
            keys.push(phys);
        }
        drop(regions);

        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.user_mappings.lock().insert(handle, keys);

        Ok(UserMemory {
            handle,
            virt: ptr,
            size,
            sg,
        })
    }

    pub fn unmap_user(&self, mem: &UserMemory) {
        let Some(keys) = self.user_mappings.lock().remove(&mem.handle) else {
            return;
        };
        let mut regions = self.regions.lock();
        for key in keys {
            regions.remove(&key);
        }
    }

    /// Host pointer for `len` bytes at bus address `phys`, if they lie in one
    /// mapped region.
    pub fn translate(&self, phys: u64, len: usize) -> Option<*mut u8> {
        let regions = self.regions.lock();
        let (&base, region) = regions.range(..=phys).next_back()?;
        let offset = (phys - base) as usize;
        if offset.checked_add(len)? > region.len {
            return None;
        }
        Some((region.virt + offset) as *mut u8)
    }
}

impl Drop for PhysMemory {
    fn drop(&mut self) {
        for (_, allocation) in self.allocations.get_mut().drain() {
            unsafe { alloc::dealloc(allocation.virt as *mut u8, allocation.layout) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_memory_translates() {
        let memory = PhysMemory::new();
        let mem = memory.alloc(100).unwrap();
        assert_eq!(mem.phys % PAGE_SIZE as u64, 0);
        assert!(mem.phys >= KERNEL_BASE);
        assert_eq!(memory.translate(mem.phys + 8, 8), Some(unsafe { mem.as_ptr().add(8) }));
        assert_eq!(memory.translate(mem.phys + PAGE_SIZE as u64, 4), None);

        let other = memory.alloc(PAGE_SIZE).unwrap();
        assert_ne!(other.phys, mem.phys + PAGE_SIZE as u64);

        memory.free(&mem);
        assert_eq!(memory.translate(mem.phys, 4), None);
        assert_eq!(memory.live_allocations(), 1);
    }

    #[test]
    fn test_user_pages_are_scattered() {
        let memory = PhysMemory::new();
        let mut data = vec![0u32; 3 * PAGE_SIZE / 4];
        // start a little into the buffer so the first run is a partial page
        let ptr = NonNull::new(unsafe { (data.as_mut_ptr() as *mut u8).add(64) }).unwrap();
        let size = 2 * PAGE_SIZE;
        let mapping = memory.map_user(ptr, size).unwrap();

        assert_eq!(mapping.sg.iter().map(|e| e.len).sum::<usize>(), size);
        for pair in mapping.sg.windows(2) {
            assert_ne!(pair[0].phys + pair[0].len as u64, pair[1].phys);
        }
        let first = mapping.sg[0];
        assert_eq!(memory.translate(first.phys, first.len), Some(ptr.as_ptr()));

        memory.unmap_user(&mapping);
        assert_eq!(memory.translate(first.phys, 4), None);
    }

    #[test]
    fn test_contiguous_user_mapping() {
        let memory = PhysMemory::new();
        memory.set_contiguous_user(true);
        let mut data = vec![0u32; 2 * PAGE_SIZE / 4];
        let ptr = NonNull::new(data.as_mut_ptr() as *mut u8).unwrap();
        let mapping = memory.map_user(ptr, 2 * PAGE_SIZE).unwrap();

        for pair in mapping.sg.windows(2) {
            assert_eq!(pair[0].phys + pair[0].len as u64, pair[1].phys);
        }
        assert!(memory.translate(mapping.sg[0].phys, 2 * PAGE_SIZE).is_some());
    }
}
