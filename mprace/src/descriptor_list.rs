// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! Scatter/gather descriptor list
//!
//! A list mirrors the physical layout of one DMA buffer: one descriptor per
//! physically contiguous chunk, chained in buffer order through their `next`
//! fields. The descriptors live in pinned kernel memory so the engine can
//! follow the chain on its own. The list owns that storage and hands out
//! copies of descriptors, never references into device-visible memory.

use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::debug;

use crate::alloc::KernelAllocator;
use crate::descriptor::{Control, NativeDescriptor, DESCRIPTOR_ALIGN};
use crate::driver::{Driver, KernelMemory, SgEntry, SyncDir, PAGE_SIZE};
use crate::error::{Error, Result};

/// Largest length a single descriptor is given.
const MAX_SEGMENT: usize = 1 << 31;

/// Splits `size` bytes at `phys` into `pieces` chunks of `size / pieces`
/// bytes, the last one taking the remainder.
///
/// The engine moves whole dwords, so the piece size is rounded down to a
/// multiple of four.
pub fn kernel_pieces(phys: u64, size: usize, pieces: u32) -> Result<Vec<SgEntry>> {
    if pieces == 0 {
        return Err(Error::InvalidArgument);
    }
    let piece = (size / pieces as usize) & !3;
    if piece == 0 {
        return Err(Error::InvalidArgument);
    }

    let mut chunks = Vec::with_capacity(pieces as usize);
    let mut offset = 0;
    for i in 0..pieces as usize {
        let len = if i + 1 == pieces as usize {
            size - offset
        } else {
            piece
        };
        chunks.push(SgEntry {
            phys: phys + offset as u64,
            len,
        });
        offset += len;
    }
    Ok(chunks)
}

/// Merges runs that continue exactly where the previous one ended.
pub fn coalesce(sg: &[SgEntry]) -> Vec<SgEntry> {
    let mut out: Vec<SgEntry> = Vec::with_capacity(sg.len());
    for entry in sg.iter().filter(|entry| entry.len > 0) {
        match out.last_mut() {
            Some(prev) if prev.phys + prev.len as u64 == entry.phys => prev.len += entry.len,
            _ => out.push(*entry),
        }
    }
    out
}

fn split_oversized(chunks: &[SgEntry]) -> Vec<SgEntry> {
    let mut out = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        let mut offset = 0;
        while offset < chunk.len {
            let len = (chunk.len - offset).min(MAX_SEGMENT);
            out.push(SgEntry {
                phys: chunk.phys + offset as u64,
                len,
            });
            offset += len;
        }
    }
    out
}

pub struct DescriptorList<D: Driver> {
    allocator: Arc<KernelAllocator<D>>,
    storage: KernelMemory,
    len: usize,
    total: u64,
    /// Held by the channel currently transferring through this list
    claimed: AtomicBool,
}

impl<D: Driver> DescriptorList<D> {
    /// Builds a chained list covering `chunks` in order.
    pub fn build(allocator: &Arc<KernelAllocator<D>>, chunks: &[SgEntry]) -> Result<Self> {
        let chunks = split_oversized(chunks);
        if chunks.is_empty() {
            return Err(Error::InvalidArgument);
        }

        let bytes = chunks.len() * DESCRIPTOR_ALIGN;
        let storage = allocator.alloc(bytes.next_multiple_of(PAGE_SIZE))?;

        let list = Self {
            allocator: Arc::clone(allocator),
            storage,
            len: chunks.len(),
            total: chunks.iter().map(|chunk| chunk.len as u64).sum(),
            claimed: AtomicBool::new(false),
        };

        // checked before any descriptor is written; `list` frees the storage on error
        if list.storage.as_ptr() as usize % DESCRIPTOR_ALIGN != 0 {
            return Err(Error::AlignmentViolation);
        }
        for i in 0..list.len {
            let phys = list.phys_of(i);
            let page_offset = (phys % PAGE_SIZE as u64) as usize;
            if phys % DESCRIPTOR_ALIGN as u64 != 0 || page_offset + DESCRIPTOR_ALIGN > PAGE_SIZE {
                return Err(Error::AlignmentViolation);
            }
        }

        for (i, chunk) in chunks.iter().enumerate() {
            let last = i + 1 == list.len;
            let mut desc = NativeDescriptor::default();
            desc.set_host_addr(chunk.phys);
            desc.set_length(chunk.len as u32);
            if last {
                desc.set_next(list.phys_of(i));
                desc.set_control(Control::V | Control::LAST);
            } else {
                desc.set_next(list.phys_of(i + 1));
                desc.set_control(Control::V);
            }
            list.set(i, desc);
        }

        debug!(
            "descriptor list: {} descriptors, {} bytes, storage at {:#x}",
            list.len, list.total, list.storage.phys
        );
        Ok(list)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes covered by all descriptors.
    pub fn total_len(&self) -> u64 {
        self.total
    }

    /// Physical address of descriptor `index`.
    pub fn phys_of(&self, index: usize) -> u64 {
        self.storage.phys + (index * DESCRIPTOR_ALIGN) as u64
    }

    #[track_caller]
    fn slot(&self, index: usize) -> *mut NativeDescriptor {
        assert!(
            index < self.len,
            "descriptor index {} out of range for list of {}",
            index,
            self.len
        );
        unsafe { (self.storage.as_ptr() as *mut NativeDescriptor).add(index) }
    }

    /// Copy of descriptor `index`. Panics past the end of the list.
    #[track_caller]
    pub fn get(&self, index: usize) -> NativeDescriptor {
        unsafe { ptr::read_volatile(self.slot(index)) }
    }

    /// Overwrites descriptor `index`. Panics past the end of the list.
    #[track_caller]
    pub fn set(&self, index: usize, desc: NativeDescriptor) {
        unsafe { ptr::write_volatile(self.slot(index), desc) }
    }

    pub fn iter(&self) -> impl Iterator<Item = NativeDescriptor> + '_ {
        (0..self.len).map(move |i| self.get(i))
    }

    pub fn snapshot(&self) -> Vec<NativeDescriptor> {
        self.iter().collect()
    }

    /// Makes descriptor writes visible to the engine.
    pub fn sync(&self) -> Result<()> {
        self.allocator
            .driver()
            .sync_kernel_memory(&self.storage, SyncDir::ToDevice)
    }

    /// Reserves the list for one transfer. Fails if another channel holds it.
    pub(crate) fn claim(&self) -> Result<()> {
        self.claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| Error::ChannelBusy)
    }

    pub(crate) fn unclaim(&self) {
        self.claimed.store(false, Ordering::Release);
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }
}

impl<D: Driver> Drop for DescriptorList<D> {
    fn drop(&mut self) {
        self.allocator.free(&self.storage);
    }
}
