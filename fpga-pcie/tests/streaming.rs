// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use fpga_pcie::error::{EBUSY, EFAULT, EINVAL, EIO, ENOMEM, ENOTTY};
use fpga_pcie::sim::{IrqMode, SimPlatform};
use fpga_pcie::{
    ioctl, regs, CoherentBuffer, DmaDirection, DmaMapping, Error, FpgaPcie, IrqHandler, Platform,
    StreamConfig, StreamState, BUF_SIZE, EVEN_PATTERN, ODD_PATTERN, SINGLE_SHOT_PATTERN,
    START_PATTERN,
};
use common::io::RegisterSpace;

/// Software device whose streaming mappings can be made to fail.
struct FlakyPlatform {
    inner: Arc<SimPlatform>,
    failing_maps: AtomicU32,
}

impl FlakyPlatform {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: SimPlatform::new(),
            failing_maps: AtomicU32::new(0),
        })
    }

    fn fail_next_maps(&self, count: u32) {
        self.failing_maps.store(count, Ordering::Release);
    }
}

impl Platform for FlakyPlatform {
    fn registers(&self) -> Arc<dyn RegisterSpace> {
        self.inner.registers()
    }

    fn alloc_coherent(&self, size: usize) -> fpga_pcie::Result<CoherentBuffer> {
        self.inner.alloc_coherent(size)
    }

    fn free_coherent(&self, buffer: &CoherentBuffer) {
        self.inner.free_coherent(buffer)
    }

    fn map_single(
        &self,
        buffer: &CoherentBuffer,
        offset: usize,
        len: usize,
        dir: DmaDirection,
    ) -> fpga_pcie::Result<DmaMapping> {
        let failing = self
            .failing_maps
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::AllocationFailed);
        }
        self.inner.map_single(buffer, offset, len, dir)
    }

    fn unmap_single(&self, mapping: &DmaMapping) {
        self.inner.unmap_single(mapping)
    }

    fn request_irq(&self, handler: IrqHandler) -> fpga_pcie::Result<()> {
        self.inner.request_irq(handler)
    }

    fn free_irq(&self) {
        self.inner.free_irq()
    }
}

fn probe() -> (Arc<SimPlatform>, Arc<FpgaPcie<SimPlatform>>) {
    let platform = SimPlatform::new();
    let device = FpgaPcie::probe(Arc::clone(&platform), StreamConfig::default()).unwrap();
    (platform, device)
}

#[test]
fn offsets_alternate_and_end_returns_complement() {
    let (_, device) = probe();
    let handle = device.open().unwrap();

    for nexts in [0, 1, 4, 10] {
        handle.start_stream().unwrap();
        let mut last = None;
        for i in 0..nexts {
            let offset = handle.next_stream().unwrap();
            assert_eq!(offset, if i % 2 == 0 { 0 } else { BUF_SIZE });
            last = Some(offset);
        }

        let end = handle.end_stream().unwrap();
        match last {
            Some(last) => assert_eq!(end, BUF_SIZE - last),
            None => assert_eq!(end, 0),
        }
        assert_eq!(device.state(), StreamState::Ended);
        assert_eq!(handle.next_stream(), Err(Error::NotStreaming));
        assert_eq!(handle.end_stream(), Err(Error::NotStreaming));
    }
}

#[test]
fn each_half_carries_its_pattern() {
    let (_, device) = probe();
    let handle = device.open().unwrap();
    let view = handle.mmap(2 * BUF_SIZE).unwrap();

    handle.start_stream().unwrap();
    assert_eq!(view.read_u32(0), START_PATTERN);

    assert_eq!(handle.next_stream().unwrap(), 0);
    assert_eq!(view.read_u32(BUF_SIZE), EVEN_PATTERN);

    assert_eq!(handle.next_stream().unwrap(), BUF_SIZE);
    assert_eq!(view.read_u32(BUF_SIZE + 4), EVEN_PATTERN);
    assert_eq!(view.read_u32(BUF_SIZE - 4), ODD_PATTERN);
}

#[test]
fn start_while_streaming_is_busy() {
    let (_, device) = probe();
    let handle = device.open().unwrap();
    handle.start_stream().unwrap();
    assert_eq!(handle.start_stream(), Err(Error::Busy));
    assert_eq!(handle.ioctl(ioctl::START_STREAM, None), -EBUSY);

    let mut out = [0u8; 16];
    assert_eq!(handle.read(&mut out), Err(Error::Busy));
}

#[test]
fn tlp_limits() {
    let (_, device) = probe();
    let handle = device.open().unwrap();

    assert_eq!(handle.set_tlp_size(33), Err(Error::InvalidArgument));
    assert_eq!(handle.set_tlp_count(129), Err(Error::InvalidArgument));
    assert_eq!(handle.set_tlp_size(0), Err(Error::InvalidArgument));
    assert_eq!(handle.set_tlp_count(-1), Err(Error::InvalidArgument));
    handle.set_tlp_size(32).unwrap();
    handle.set_tlp_count(128).unwrap();

    let mut arg = 33;
    assert_eq!(handle.ioctl(ioctl::SET_TLPSIZE, Some(&mut arg)), -EINVAL);
    let mut arg = 128;
    assert_eq!(handle.ioctl(ioctl::SET_TLPCOUNT, Some(&mut arg)), 0);
}

#[test]
fn dma_count_must_fit_one_half() {
    let (platform, device) = probe();
    let handle = device.open().unwrap();

    assert_eq!(handle.set_dma_count(0), Err(Error::InvalidArgument));
    // default bursts already fill a half
    assert_eq!(handle.set_dma_count(2), Err(Error::InvalidArgument));

    handle.set_tlp_size(16).unwrap();
    handle.set_dma_count(2).unwrap();
    // within the TLP limits but two bursts no longer fit
    assert_eq!(handle.set_tlp_size(32), Err(Error::InvalidArgument));
    assert_eq!(handle.set_tlp_count(129), Err(Error::InvalidArgument));
    handle.set_tlp_count(128).unwrap();

    handle.start_stream().unwrap();
    assert_eq!(platform.write_bursts(), 2);
    assert_eq!(handle.next_stream().unwrap(), 0);
    assert_eq!(platform.write_bursts(), 4);
}

#[test]
fn stalled_device_times_out_within_bound() {
    let (platform, device) = probe();
    let handle = device.open().unwrap();
    platform.set_irq_mode(IrqMode::Never);
    handle.start_stream().unwrap();

    let started = Instant::now();
    let mut offset = -1;
    assert_eq!(handle.ioctl(ioctl::NEXT_STREAM, Some(&mut offset)), -EIO);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(10));
    assert!(elapsed < Duration::from_secs(5));
    assert_eq!(offset, -1);
    assert_eq!(device.state(), StreamState::Streaming);

    let config = StreamConfig {
        transfer_timeout: Duration::from_millis(20),
        ..StreamConfig::default()
    };
    let platform = SimPlatform::new();
    platform.set_irq_mode(IrqMode::Never);
    let device = FpgaPcie::probe(Arc::clone(&platform), config).unwrap();
    let handle = device.open().unwrap();
    let mut out = [0u8; 64];
    assert_eq!(handle.read(&mut out), Err(Error::TransferTimeout));
    assert_eq!(device.stats().timeouts, 1);
}

#[test]
fn delayed_interrupts_wake_the_waiter() {
    let platform = SimPlatform::new();
    platform.set_irq_mode(IrqMode::Delayed(Duration::from_millis(2)));
    let config = StreamConfig {
        stream_timeout: Duration::from_secs(2),
        ..StreamConfig::default()
    };
    let device = FpgaPcie::probe(Arc::clone(&platform), config).unwrap();
    let handle = device.open().unwrap();

    handle.start_stream().unwrap();
    for i in 0..6 {
        let offset = handle.next_stream().unwrap();
        assert_eq!(offset, if i % 2 == 0 { 0 } else { BUF_SIZE });
    }
    handle.end_stream().unwrap();
    // let the last delayed interrupt land before checking
    thread::sleep(Duration::from_millis(20));
    assert_eq!(platform.live_mappings(), 0);
    assert_eq!(device.stats().interrupts, 7);
}

#[test]
fn end_stream_outlasts_the_bounded_wait() {
    let platform = SimPlatform::new();
    platform.set_irq_mode(IrqMode::Delayed(Duration::from_millis(60)));
    let device = FpgaPcie::probe(Arc::clone(&platform), StreamConfig::default()).unwrap();
    let handle = device.open().unwrap();

    handle.start_stream().unwrap();
    let started = Instant::now();
    assert_eq!(handle.end_stream(), Ok(0));
    assert!(started.elapsed() >= Duration::from_millis(50));
    assert_eq!(device.state(), StreamState::Ended);
    assert_eq!(platform.live_mappings(), 0);
}

#[test]
fn failed_issue_can_be_retried() {
    let platform = FlakyPlatform::new();
    let device = FpgaPcie::probe(Arc::clone(&platform), StreamConfig::default()).unwrap();
    let handle = device.open().unwrap();
    let view = handle.mmap(2 * BUF_SIZE).unwrap();
    handle.start_stream().unwrap();

    platform.fail_next_maps(1);
    assert_eq!(handle.next_stream(), Err(Error::AllocationFailed));
    assert_eq!(device.state(), StreamState::Streaming);

    assert_eq!(handle.next_stream(), Ok(0));
    assert_eq!(view.read_u32(BUF_SIZE), EVEN_PATTERN);
    assert_eq!(handle.next_stream(), Ok(BUF_SIZE));

    // same for a chain of two bursts
    handle.end_stream().unwrap();
    handle.set_tlp_size(16).unwrap();
    handle.set_dma_count(2).unwrap();
    handle.start_stream().unwrap();
    platform.fail_next_maps(1);
    let mut offset = -1;
    assert_eq!(handle.ioctl(ioctl::NEXT_STREAM, Some(&mut offset)), -ENOMEM);
    assert_eq!(offset, -1);
    assert_eq!(handle.ioctl(ioctl::NEXT_STREAM, Some(&mut offset)), 0);
    assert_eq!(offset, 0);
    assert_eq!(handle.end_stream(), Ok(BUF_SIZE));
}

#[test]
fn exclusive_open() {
    let (_, device) = probe();
    let handle = device.open().unwrap();
    assert!(matches!(device.open(), Err(Error::Busy)));
    assert!(device.is_open());

    drop(handle);
    assert!(!device.is_open());
    let _again = device.open().unwrap();
}

#[test]
fn ioctl_surface() {
    let (_, device) = probe();
    let handle = device.open().unwrap();

    assert_eq!(handle.ioctl(0x4b42, None), -ENOTTY);
    assert_eq!(handle.ioctl(ioctl::SET_DMACOUNT, None), -EFAULT);
    assert_eq!(handle.ioctl(ioctl::NEXT_STREAM, None), -EFAULT);

    let mut offset = 0;
    assert_eq!(handle.ioctl(ioctl::NEXT_STREAM, Some(&mut offset)), -EINVAL);
    assert_eq!(handle.ioctl(ioctl::RESET_CARD, None), 0);
    assert_eq!(handle.ioctl(ioctl::START_STREAM, None), 0);
    assert_eq!(handle.ioctl(ioctl::NEXT_STREAM, Some(&mut offset)), 0);
    assert_eq!(offset, 0);
    assert_eq!(handle.ioctl(ioctl::END_STREAM, Some(&mut offset)), 0);
    assert_eq!(offset as usize, BUF_SIZE);
}

#[test]
fn set_tlp_count_leaves_the_buffer_alone() {
    let (_, device) = probe();
    let handle = device.open().unwrap();

    let mut fill = 0x41;
    assert_eq!(handle.ioctl(ioctl::MEMSET_WRITEBUFFER, Some(&mut fill)), 0);
    let mut count = 64;
    assert_eq!(handle.ioctl(ioctl::SET_TLPCOUNT, Some(&mut count)), 0);

    let view = handle.mmap(2 * BUF_SIZE).unwrap();
    let mut bytes = vec![0u8; 2 * BUF_SIZE];
    view.copy_to(0, &mut bytes);
    assert!(bytes.iter().all(|byte| *byte == 0x41));
}

#[test]
fn single_shot_write() {
    let (platform, device) = probe();
    let handle = device.open().unwrap();
    handle.set_tlp_count(4).unwrap();

    let data: Vec<u8> = (0..32 * 4).flat_map(|_| SINGLE_SHOT_PATTERN.to_ne_bytes()).collect();
    assert_eq!(handle.write(&data).unwrap(), 512);
    assert_eq!(platform.read_bursts(), 1);
    assert_eq!(platform.received(), vec![SINGLE_SHOT_PATTERN; 128]);

    let mut bad = data.clone();
    bad[8] ^= 0xff;
    assert_eq!(handle.write(&bad), Err(Error::DataError));
    let corrupted = u32::from_ne_bytes([bad[8], bad[9], bad[10], bad[11]]);
    assert_eq!(platform.received()[2], corrupted);
    assert_ne!(corrupted, SINGLE_SHOT_PATTERN);
}

#[test]
fn bus_addresses_above_four_gib() {
    let platform = SimPlatform::with_bus_base(0x2_4000_0000);
    let device = FpgaPcie::probe(Arc::clone(&platform), StreamConfig::default()).unwrap();
    let handle = device.open().unwrap();
    let view = handle.mmap(BUF_SIZE).unwrap();

    handle.start_stream().unwrap();
    let size = platform.reg(regs::WDMATLPS);
    assert_eq!(size & regs::TLPS_SIZE_MASK, 32);
    assert_eq!(regs::tlp_target(platform.reg(regs::WDMATLPA), size), device.buffer_bus());
    assert_eq!(view.read_u32(0), START_PATTERN);
}
