// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! Register access
//!
//! Device windows are addressed in bytes and accessed one 32-bit word at a
//! time. [`RegisterSpace`] is the boundary every driver in this workspace
//! programs hardware through; [`MmioRegion`] backs it with a mapped BAR and
//! [`WordRegion`] backs it with plain memory for software device models.

use core::mem::MaybeUninit;
use core::ops::{BitAnd, BitOr, Not};
use core::ptr::{self, NonNull};
use core::sync::atomic::{fence, AtomicU32, Ordering};

/// A single readable/writable hardware location.
pub trait Io {
    type Value: Copy
        + PartialEq
        + BitAnd<Output = Self::Value>
        + BitOr<Output = Self::Value>
        + Not<Output = Self::Value>;

    fn read(&self) -> Self::Value;
    fn write(&mut self, value: Self::Value);

    #[inline(always)]
    fn readf(&self, flags: Self::Value) -> bool {
        (self.read() & flags) == flags
    }

    #[inline(always)]
    fn writef(&mut self, flags: Self::Value, value: bool) {
        let tmp = if value {
            self.read() | flags
        } else {
            self.read() & !flags
        };
        self.write(tmp);
    }
}

/// Volatile memory-mapped cell.
#[repr(transparent)]
pub struct Mmio<T> {
    value: MaybeUninit<T>,
}

impl<T> Mmio<T> {
    pub const fn new(value: T) -> Self {
        Self {
            value: MaybeUninit::new(value),
        }
    }
}

impl<T> Io for Mmio<T>
where
    T: Copy + PartialEq + BitAnd<Output = T> + BitOr<Output = T> + Not<Output = T>,
{
    type Value = T;

    #[inline(always)]
    fn read(&self) -> T {
        unsafe { ptr::read_volatile(self.value.as_ptr()) }
    }

    #[inline(always)]
    fn write(&mut self, value: T) {
        unsafe { ptr::write_volatile(self.value.as_mut_ptr(), value) };
    }
}

/// A device address window of 32-bit registers at byte offsets.
///
/// Offsets must be dword aligned and lie inside `len()`; callers that take
/// addresses from users check them first and report their own error, so an
/// out-of-range offset reaching this trait is a bug and panics.
pub trait RegisterSpace: Send + Sync {
    /// Window size in bytes.
    fn len(&self) -> usize;

    fn read32(&self, offset: usize) -> u32;

    fn write32(&self, offset: usize, value: u32);

    /// Orders every preceding register and memory write before any later one.
    fn barrier(&self) {
        fence(Ordering::SeqCst);
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `bytes` starting at `offset` lie inside the window.
    fn contains(&self, offset: usize, bytes: usize) -> bool {
        offset
            .checked_add(bytes)
            .map_or(false, |end| end <= self.len())
    }
}

#[inline]
#[track_caller]
fn check_offset(len: usize, offset: usize) {
    assert!(
        offset % 4 == 0 && offset + 4 <= len,
        "register offset {:#x} outside window of {:#x} bytes",
        offset,
        len
    );
}

/// Mapped device memory.
pub struct MmioRegion {
    base: NonNull<u8>,
    len: usize,
}

impl MmioRegion {
    /// # Safety
    ///
    /// `base` must point to `len` bytes of mapped device memory that stays
    /// mapped for the lifetime of the region and is dword aligned.
    pub unsafe fn new(base: NonNull<u8>, len: usize) -> Self {
        Self { base, len }
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.base.as_ptr()
    }
}

unsafe impl Send for MmioRegion {}
unsafe impl Sync for MmioRegion {}

impl RegisterSpace for MmioRegion {
    fn len(&self) -> usize {
        self.len
    }

    fn read32(&self, offset: usize) -> u32 {
        check_offset(self.len, offset);
        let reg = unsafe { &*(self.base.as_ptr().add(offset) as *const Mmio<u32>) };
        u32::from_le(reg.read())
    }

    fn write32(&self, offset: usize, value: u32) {
        check_offset(self.len, offset);
        let reg = unsafe { &mut *(self.base.as_ptr().add(offset) as *mut Mmio<u32>) };
        reg.write(value.to_le());
    }
}

/// Register window backed by ordinary memory.
pub struct WordRegion {
    words: Box<[AtomicU32]>,
}

impl WordRegion {
    /// A zeroed window of `len` bytes, rounded up to whole dwords.
    pub fn new(len: usize) -> Self {
        let words = (0..len.div_ceil(4)).map(|_| AtomicU32::new(0)).collect();
        Self { words }
    }

    pub fn fill(&self, value: u32) {
        for word in self.words.iter() {
            word.store(value, Ordering::Relaxed);
        }
    }

    /// Sets the bits in `mask` and returns the previous value.
    pub fn set_bits(&self, offset: usize, mask: u32) -> u32 {
        check_offset(self.len(), offset);
        self.words[offset / 4].fetch_or(mask, Ordering::AcqRel)
    }

    /// Clears the bits in `mask` and returns the previous value.
    pub fn clear_bits(&self, offset: usize, mask: u32) -> u32 {
        check_offset(self.len(), offset);
        self.words[offset / 4].fetch_and(!mask, Ordering::AcqRel)
    }

    pub fn snapshot(&self) -> Vec<u32> {
        self.words
            .iter()
            .map(|word| word.load(Ordering::Acquire))
            .collect()
    }
}

impl RegisterSpace for WordRegion {
    fn len(&self) -> usize {
        self.words.len() * 4
    }

    fn read32(&self, offset: usize) -> u32 {
        check_offset(self.len(), offset);
        self.words[offset / 4].load(Ordering::Acquire)
    }

    fn write32(&self, offset: usize, value: u32) {
        check_offset(self.len(), offset);
        self.words[offset / 4].store(value, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mmio_flags() {
        let mut reg = Mmio::new(0u32);
        reg.writef(0x5, true);
        assert!(reg.readf(0x1));
        assert!(reg.readf(0x5));
        reg.writef(0x1, false);
        assert_eq!(reg.read(), 0x4);
    }

    #[test]
    fn test_mmio_region_access() {
        let mut backing = vec![0u32; 8];
        let base = NonNull::new(backing.as_mut_ptr() as *mut u8).unwrap();
        let region = unsafe { MmioRegion::new(base, 32) };

        region.write32(8, 0xdead_beef);
        assert_eq!(region.read32(8), 0xdead_beef);
        assert_eq!(u32::from_le(backing[2]), 0xdead_beef);
        assert!(region.contains(28, 4));
        assert!(!region.contains(28, 8));
    }

    #[test]
    #[should_panic]
    fn test_out_of_window_panics() {
        let region = WordRegion::new(16);
        region.read32(16);
    }

    #[test]
    fn test_word_region_bits() {
        let region = WordRegion::new(8);
        region.write32(4, 0x10);
        assert_eq!(region.set_bits(4, 0x1), 0x10);
        assert_eq!(region.clear_bits(4, 0x10), 0x11);
        assert_eq!(region.snapshot(), vec![0, 0x1]);
    }
}
