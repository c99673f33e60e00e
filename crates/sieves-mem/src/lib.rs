//! Guest memory for the sieve host.
//!
//! [`GuestMemory`] is byte-addressable storage named by guest-physical address. [`DenseMemory`] and
//! [`SparseMemory`] are RAM backends; [`Bus`] attaches devices at fixed address ranges and rejects
//! accesses nothing decodes.
//!
//! [`board`] wires up the layout the sieve ROM runs on: SDRAM from [`SDRAM_BASE`] and the VGA pixel
//! buffer at [`VGA_BUFFER_BASE`], with the I/O window between them left undecoded.

#![forbid(unsafe_code)]

mod bus;
mod phys;


pub use bus::{Bus, BusError};
pub use phys::{DenseMemory, GuestMemory, GuestMemoryError, GuestMemoryResult, SparseMemory};

/// Guest-physical base address of the board SDRAM.
pub const SDRAM_BASE: u64 = 0;

/// Size of the board SDRAM (64 MiB).
pub const SDRAM_SIZE: u64 = 0x400_0000;

/// Guest-physical base address of the VGA pixel buffer.
pub const VGA_BUFFER_BASE: u64 = 0x800_0000;

/// 320x240 pixels, two bytes each.
pub const VGA_BUFFER_SIZE: u64 = 320 * 240 * 2;

/// Error building the board memory map.
#[derive(Debug, thiserror::Error)]
pub enum BoardMemoryError {
    #[error(transparent)]
    Backend(#[from] GuestMemoryError),
    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Board bus with `sdram` attached at [`SDRAM_BASE`] and a zeroed VGA pixel buffer at
/// [`VGA_BUFFER_BASE`].
pub fn board(sdram: Box<dyn GuestMemory>) -> Result<Bus, BoardMemoryError> {
    let sdram_top = SDRAM_BASE
        .saturating_add(sdram.size())
        .checked_sub(1)
        .ok_or(BusError::EmptyRange {
            lower: SDRAM_BASE,
            higher: SDRAM_BASE,
        })?;

    let mut bus = Bus::new();
    bus.attach_device(SDRAM_BASE..=sdram_top, sdram)?;
    bus.attach_device(
        VGA_BUFFER_BASE..=VGA_BUFFER_BASE + VGA_BUFFER_SIZE - 1,
        Box::new(DenseMemory::new(VGA_BUFFER_SIZE)?),
    )?;
    Ok(bus)
}
