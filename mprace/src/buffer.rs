// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! DMA buffers
//!
//! A [`DmaBuffer`] is one host memory region used as a DMA endpoint together
//! with the descriptor list that describes its physical layout. Dropping the
//! buffer releases the descriptor list first (finishing any transfer still
//! using it), then the backing memory if the buffer owns it.

use std::alloc::{self, Layout};
use std::ops::{Index, IndexMut};
use std::ptr::NonNull;
use std::slice;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::descriptor_list::{coalesce, kernel_pieces, DescriptorList};
use crate::driver::{Driver, KernelMemory, SgEntry, SyncDir, UserMemory, PAGE_SIZE};
use crate::engine::DmaEngineWg;
use crate::error::{Error, Result};

/// Backing memory kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemType {
    /// Physically contiguous memory pinned by the driver
    Kernel,
    /// Kernel memory described as this many separate pieces
    KernelPieces(u32),
    /// Page-aligned process memory, pinned and scatter/gather mapped
    User,
    /// Caller-owned process memory, pinned and scatter/gather mapped
    External,
}

enum Backing {
    Kernel(KernelMemory),
    User {
        mem: NonNull<u32>,
        layout: Layout,
        mapping: UserMemory,
    },
    External(UserMemory),
}

pub struct DmaBuffer<D: Driver> {
    // released before `backing`
    pub(crate) descriptors: Mutex<Option<Arc<DescriptorList<D>>>>,
    backing: Option<Backing>,
    ptr: NonNull<u32>,
    size: usize,
    kind: MemType,
    engine: Arc<DmaEngineWg<D>>,
}

unsafe impl<D: Driver> Send for DmaBuffer<D> {}
unsafe impl<D: Driver> Sync for DmaBuffer<D> {}

impl<D: Driver> DmaBuffer<D> {
    /// Allocates `size` bytes of `kind` memory and builds its descriptor list.
    ///
    /// `size` must be a non-zero multiple of four. Use
    /// [`external`](Self::external) for caller-owned memory.
    pub fn new(engine: &Arc<DmaEngineWg<D>>, size: usize, kind: MemType) -> Result<Self> {
        if size == 0 || size % 4 != 0 {
            return Err(Error::InvalidArgument);
        }

        let (ptr, backing) = match kind {
            MemType::Kernel | MemType::KernelPieces(_) => {
                let mem = engine.allocator().alloc(size)?;
                (mem.virt.cast::<u32>(), Backing::Kernel(mem))
            }
            MemType::User => {
                let layout =
                    Layout::from_size_align(size, PAGE_SIZE).map_err(|_| Error::InvalidArgument)?;
                let mem = NonNull::new(unsafe { alloc::alloc_zeroed(layout) } as *mut u32)
                    .ok_or(Error::AllocationFailed)?;
                match engine.driver().map_user_memory(mem.cast(), size) {
                    Ok(mapping) => (mem, Backing::User { mem, layout, mapping }),
                    Err(err) => {
                        unsafe { alloc::dealloc(mem.as_ptr() as *mut u8, layout) };
                        return Err(err);
                    }
                }
            }
            MemType::External => return Err(Error::InvalidArgument),
        };

        Self::with_backing(engine, ptr, size, kind, backing)
    }

    /// Wraps caller-owned memory of `size` bytes.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `size` bytes until the
    /// buffer is dropped, and must not be accessed elsewhere while a transfer
    /// is in flight.
    pub unsafe fn external(engine: &Arc<DmaEngineWg<D>>, ptr: NonNull<u32>, size: usize) -> Result<Self> {
        if size == 0 || size % 4 != 0 {
            return Err(Error::InvalidArgument);
        }
        let mapping = engine.driver().map_user_memory(ptr.cast(), size)?;
        Self::with_backing(engine, ptr, size, MemType::External, Backing::External(mapping))
    }

    fn with_backing(
        engine: &Arc<DmaEngineWg<D>>,
        ptr: NonNull<u32>,
        size: usize,
        kind: MemType,
        backing: Backing,
    ) -> Result<Self> {
        let buffer = Self {
            descriptors: Mutex::new(None),
            backing: Some(backing),
            ptr,
            size,
            kind,
            engine: Arc::clone(engine),
        };
        engine.fill_descriptor_list(&buffer)?;
        Ok(buffer)
    }

    /// Size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Size in dwords.
    pub fn dwords(&self) -> usize {
        self.size / 4
    }

    pub fn kind(&self) -> MemType {
        self.kind
    }

    pub fn as_slice(&self) -> &[u32] {
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.dwords()) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u32] {
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.dwords()) }
    }

    /// The buffer's descriptor list, if built.
    pub fn descriptor_list(&self) -> Option<Arc<DescriptorList<D>>> {
        self.descriptors.lock().clone()
    }

    /// Physical chunks in buffer order.
    pub(crate) fn chunks(&self) -> Result<Vec<SgEntry>> {
        match (&self.backing, self.kind) {
            (Some(Backing::Kernel(mem)), MemType::KernelPieces(pieces)) => {
                kernel_pieces(mem.phys, self.size, pieces)
            }
            (Some(Backing::Kernel(mem)), _) => Ok(vec![SgEntry {
                phys: mem.phys,
                len: self.size,
            }]),
            (Some(Backing::User { mapping, .. }), _) | (Some(Backing::External(mapping)), _) => {
                Ok(coalesce(&mapping.sg))
            }
            (None, _) => Err(Error::Unknown),
        }
    }

    /// Cache maintenance around a transfer.
    pub fn sync(&self, dir: SyncDir) -> Result<()> {
        let driver = self.engine.driver();
        match &self.backing {
            Some(Backing::Kernel(mem)) => driver.sync_kernel_memory(mem, dir),
            Some(Backing::User { mapping, .. }) | Some(Backing::External(mapping)) => {
                driver.sync_user_memory(mapping, dir)
            }
            None => Ok(()),
        }
    }
}

impl<D: Driver> Index<usize> for DmaBuffer<D> {
    type Output = u32;

    fn index(&self, index: usize) -> &u32 {
        &self.as_slice()[index]
    }
}

impl<D: Driver> IndexMut<usize> for DmaBuffer<D> {
    fn index_mut(&mut self, index: usize) -> &mut u32 {
        &mut self.as_mut_slice()[index]
    }
}

impl<D: Driver> Drop for DmaBuffer<D> {
    fn drop(&mut self) {
        self.engine.release_descriptor_list(self);

        match self.backing.take() {
            Some(Backing::Kernel(mem)) => self.engine.allocator().free(&mem),
            Some(Backing::User {
                mem,
                layout,
                mapping,
            }) => {
                self.engine.driver().unmap_user_memory(&mapping);
                unsafe { alloc::dealloc(mem.as_ptr() as *mut u8, layout) };
            }
            Some(Backing::External(mapping)) => self.engine.driver().unmap_user_memory(&mapping),
            None => {}
        }
    }
}
