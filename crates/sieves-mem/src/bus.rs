use core::fmt;
use core::ops::RangeInclusive;

use thiserror::Error;

use crate::phys::{GuestMemory, GuestMemoryError, GuestMemoryResult};

/// Errors attaching a device to a [`Bus`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("device range 0x{lower:x}..=0x{higher:x} is empty")]
    EmptyRange { lower: u64, higher: u64 },
    #[error("device range 0x{lower:x}..=0x{higher:x} needs 0x{span:x} bytes but the device has 0x{size:x}")]
    SizeMismatch {
        lower: u64,
        higher: u64,
        span: u64,
        size: u64,
    },
    #[error("device range 0x{lower:x}..=0x{higher:x} overlaps 0x{other_lower:x}..=0x{other_higher:x}")]
    Overlap {
        lower: u64,
        higher: u64,
        other_lower: u64,
        other_higher: u64,
    },
}

struct Attached {
    lower: u64,
    higher: u64,
    device: Box<dyn GuestMemory>,
}

impl Attached {
    fn decodes(&self, paddr: u64) -> bool {
        (self.lower..=self.higher).contains(&paddr)
    }
}

/// Routes guest addresses to the devices attached at fixed, inclusive address ranges.
///
/// Each device sees offsets relative to the start of its range. An access touching an address no
/// device decodes fails with [`GuestMemoryError::Unmapped`] before any byte is transferred.
#[derive(Default)]
pub struct Bus {
    // Sorted by `lower`, non-overlapping.
    devices: Vec<Attached>,
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        for d in &self.devices {
            list.entry(&format_args!("0x{:x}..=0x{:x}", d.lower, d.higher));
        }
        list.finish()
    }
}

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches `device` so that it decodes `range`. The device must be exactly as large as the
    /// range.
    pub fn attach_device(
        &mut self,
        range: RangeInclusive<u64>,
        device: Box<dyn GuestMemory>,
    ) -> Result<(), BusError> {
        let (lower, higher) = range.into_inner();
        if higher < lower {
            return Err(BusError::EmptyRange { lower, higher });
        }
        // A span of 2^64 bytes cannot match any device size, so saturating is fine.
        let span = (higher - lower).saturating_add(1);
        if device.size() != span {
            return Err(BusError::SizeMismatch {
                lower,
                higher,
                span,
                size: device.size(),
            });
        }
        if let Some(other) = self
            .devices
            .iter()
            .find(|d| lower <= d.higher && d.lower <= higher)
        {
            return Err(BusError::Overlap {
                lower,
                higher,
                other_lower: other.lower,
                other_higher: other.higher,
            });
        }

        let at = self.devices.partition_point(|d| d.lower < lower);
        self.devices.insert(
            at,
            Attached {
                lower,
                higher,
                device,
            },
        );
        tracing::debug!("attached device at 0x{lower:x}..=0x{higher:x}");
        Ok(())
    }

    /// Inclusive address ranges of the attached devices, ascending.
    pub fn ranges(&self) -> impl Iterator<Item = RangeInclusive<u64>> + '_ {
        self.devices.iter().map(|d| d.lower..=d.higher)
    }

    fn find(&self, paddr: u64) -> Option<usize> {
        let idx = self.devices.partition_point(|d| d.lower <= paddr).checked_sub(1)?;
        self.devices[idx].decodes(paddr).then_some(idx)
    }

    /// Splits `[paddr, paddr + len)` into `(device index, device offset, buffer offset, len)`
    /// pieces, failing on the first undecoded address.
    fn pieces(&self, paddr: u64, len: usize) -> GuestMemoryResult<Vec<(usize, u64, usize, usize)>> {
        let size = self.size();
        let end = paddr
            .checked_add(len as u64)
            .filter(|&end| end <= size)
            .ok_or(GuestMemoryError::OutOfRange { paddr, len, size })?;

        let mut pieces = Vec::new();
        let mut cur = paddr;
        while cur < end {
            let idx = self.find(cur).ok_or(GuestMemoryError::Unmapped { paddr: cur })?;
            let dev = &self.devices[idx];
            let stop = end.min(dev.higher.saturating_add(1));
            pieces.push((
                idx,
                cur - dev.lower,
                (cur - paddr) as usize,
                (stop - cur) as usize,
            ));
            cur = stop;
        }
        Ok(pieces)
    }
}

impl GuestMemory for Bus {
    /// One past the highest decoded address.
    fn size(&self) -> u64 {
        self.devices
            .last()
            .map_or(0, |d| d.higher.saturating_add(1))
    }

    fn read_into(&self, paddr: u64, dst: &mut [u8]) -> GuestMemoryResult<()> {
        for (idx, offset, at, len) in self.pieces(paddr, dst.len())? {
            self.devices[idx]
                .device
                .read_into(offset, &mut dst[at..at + len])?;
        }
        Ok(())
    }

    fn write_from(&mut self, paddr: u64, src: &[u8]) -> GuestMemoryResult<()> {
        for (idx, offset, at, len) in self.pieces(paddr, src.len())? {
            self.devices[idx]
                .device
                .write_from(offset, &src[at..at + len])?;
        }
        Ok(())
    }

    fn get_slice_mut(&mut self, paddr: u64, len: usize) -> Option<&mut [u8]> {
        let idx = self.find(paddr)?;
        let dev = &mut self.devices[idx];
        let last = paddr.checked_add((len as u64).checked_sub(1)?)?;
        if last > dev.higher {
            return None;
        }
        dev.device.get_slice_mut(paddr - dev.lower, len)
    }
}
