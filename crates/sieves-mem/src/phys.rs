use thiserror::Error;

/// Errors returned by [`GuestMemory`] implementations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuestMemoryError {
    /// The access runs past the end of the memory.
    #[error("guest memory access out of range: paddr=0x{paddr:x} len={len} size=0x{size:x}")]
    OutOfRange { paddr: u64, len: usize, size: u64 },
    /// No device on the bus decodes this address.
    #[error("guest memory access to unmapped address 0x{paddr:x}")]
    Unmapped { paddr: u64 },
    /// The requested size cannot be represented by the host's `usize`.
    #[error("guest memory size {size} does not fit in usize")]
    SizeTooLarge { size: u64 },
    #[error("invalid guest memory chunk size {chunk_size}")]
    InvalidChunkSize { chunk_size: usize },
}

pub type GuestMemoryResult<T> = Result<T, GuestMemoryError>;

/// Byte-addressable guest memory.
///
/// Addresses are guest-physical `u64`s, so a buffer "at a fixed address" is named by
/// `(memory, paddr)` rather than by a host pointer.
pub trait GuestMemory {
    fn size(&self) -> u64;

    fn read_into(&self, paddr: u64, dst: &mut [u8]) -> GuestMemoryResult<()>;

    fn write_from(&mut self, paddr: u64, src: &[u8]) -> GuestMemoryResult<()>;

    /// Lends `[paddr, paddr + len)` as one contiguous slice when the backing store has it.
    ///
    /// `None` is not an error; callers fall back to `read_into`/`write_from`.
    fn get_slice_mut(&mut self, _paddr: u64, _len: usize) -> Option<&mut [u8]> {
        None
    }
}

/// Validates `[paddr, paddr + len)` against `size` and returns the range as host offsets.
pub(crate) fn host_range(size: u64, paddr: u64, len: usize) -> GuestMemoryResult<(usize, usize)> {
    let out_of_range = GuestMemoryError::OutOfRange { paddr, len, size };
    let end = paddr.checked_add(len as u64).ok_or(out_of_range.clone())?;
    if end > size {
        return Err(out_of_range);
    }
    let start = usize::try_from(paddr).map_err(|_| out_of_range.clone())?;
    let end = usize::try_from(end).map_err(|_| out_of_range)?;
    Ok((start, end))
}

/// Contiguous RAM, zero-initialized.
#[derive(Debug, Clone)]
pub struct DenseMemory {
    data: Box<[u8]>,
}

impl DenseMemory {
    pub fn new(size: u64) -> GuestMemoryResult<Self> {
        let len = usize::try_from(size).map_err(|_| GuestMemoryError::SizeTooLarge { size })?;
        Ok(Self {
            data: vec![0u8; len].into_boxed_slice(),
        })
    }
}

impl GuestMemory for DenseMemory {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_into(&self, paddr: u64, dst: &mut [u8]) -> GuestMemoryResult<()> {
        let (start, end) = host_range(self.size(), paddr, dst.len())?;
        dst.copy_from_slice(&self.data[start..end]);
        Ok(())
    }

    fn write_from(&mut self, paddr: u64, src: &[u8]) -> GuestMemoryResult<()> {
        let (start, end) = host_range(self.size(), paddr, src.len())?;
        self.data[start..end].copy_from_slice(src);
        Ok(())
    }

    fn get_slice_mut(&mut self, paddr: u64, len: usize) -> Option<&mut [u8]> {
        let (start, end) = host_range(self.size(), paddr, len).ok()?;
        Some(&mut self.data[start..end])
    }
}

/// RAM made of fixed-size chunks that are allocated on first write.
///
/// Untouched chunks read as zero, so a 64 MiB board costs one chunk for a 100-byte sieve.
#[derive(Debug, Clone)]
pub struct SparseMemory {
    size: u64,
    chunk_size: usize,
    chunks: Vec<Option<Box<[u8]>>>,
}

impl SparseMemory {
    pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

    pub fn new(size: u64) -> GuestMemoryResult<Self> {
        Self::with_chunk_size(size, Self::DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(size: u64, chunk_size: usize) -> GuestMemoryResult<Self> {
        if chunk_size == 0 {
            return Err(GuestMemoryError::InvalidChunkSize { chunk_size });
        }
        let count = size.div_ceil(chunk_size as u64);
        let count = usize::try_from(count).map_err(|_| GuestMemoryError::SizeTooLarge { size })?;
        Ok(Self {
            size,
            chunk_size,
            chunks: vec![None; count],
        })
    }

    /// Number of chunks materialized by writes so far.
    pub fn allocated_chunks(&self) -> usize {
        self.chunks.iter().flatten().count()
    }

    /// Splits a guest address into `(chunk index, offset within chunk)`.
    fn locate(&self, paddr: u64) -> GuestMemoryResult<(usize, usize)> {
        let chunk_size = self.chunk_size as u64;
        let out_of_range = || GuestMemoryError::OutOfRange {
            paddr,
            len: 1,
            size: self.size,
        };
        let chunk = usize::try_from(paddr / chunk_size).map_err(|_| out_of_range())?;
        let offset = usize::try_from(paddr % chunk_size).map_err(|_| out_of_range())?;
        Ok((chunk, offset))
    }
}

impl GuestMemory for SparseMemory {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_into(&self, paddr: u64, dst: &mut [u8]) -> GuestMemoryResult<()> {
        host_range(self.size, paddr, dst.len())?;

        let mut done = 0;
        while done < dst.len() {
            let (chunk, offset) = self.locate(paddr + done as u64)?;
            let take = (self.chunk_size - offset).min(dst.len() - done);
            let out = &mut dst[done..done + take];
            match self.chunks.get(chunk).and_then(Option::as_deref) {
                Some(bytes) => out.copy_from_slice(&bytes[offset..offset + take]),
                None => out.fill(0),
            }
            done += take;
        }
        Ok(())
    }

    fn write_from(&mut self, paddr: u64, src: &[u8]) -> GuestMemoryResult<()> {
        host_range(self.size, paddr, src.len())?;

        let chunk_size = self.chunk_size;
        let mut done = 0;
        while done < src.len() {
            let (chunk, offset) = self.locate(paddr + done as u64)?;
            let take = (chunk_size - offset).min(src.len() - done);
            let slot = self
                .chunks
                .get_mut(chunk)
                .ok_or(GuestMemoryError::Unmapped {
                    paddr: paddr + done as u64,
                })?;
            let bytes = slot.get_or_insert_with(|| vec![0u8; chunk_size].into_boxed_slice());
            bytes[offset..offset + take].copy_from_slice(&src[done..done + take]);
            done += take;
        }
        Ok(())
    }

    fn get_slice_mut(&mut self, paddr: u64, len: usize) -> Option<&mut [u8]> {
        host_range(self.size, paddr, len).ok()?;
        let (chunk, offset) = self.locate(paddr).ok()?;
        let end = offset.checked_add(len)?;
        if end > self.chunk_size {
            return None;
        }
        let bytes = self.chunks.get_mut(chunk)?.as_deref_mut()?;
        Some(&mut bytes[offset..end])
    }
}
