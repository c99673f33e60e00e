//! Sieve of Eratosthenes over a fixed 100-byte flag buffer.
//!
//! Each byte of the buffer is a flag for its index: nonzero means prime, zero means composite.
//! After [`compute_primes`] runs, `sieve[i] != 0` exactly when `i` is prime, for every `i` in
//! `2..SIEVE_LEN`.
//!
//! Indices 0 and 1 are never written. Whatever the buffer held there before the call is still
//! there afterwards, and [`primes`] never reports them.
//!
//! The buffer traditionally lives at a fixed guest address ([`SIEVES_BASE`]). That form is
//! [`compute_primes_at`], which takes the guest memory and the base address explicitly.

#![forbid(unsafe_code)]

use sieves_mem::{GuestMemory, GuestMemoryError, GuestMemoryResult};

/// Number of flag bytes in a sieve buffer, and the exclusive upper bound of the sieved range.
pub const SIEVE_LEN: usize = 100;

/// Guest-physical address the sieve ROM expects its buffer at.
pub const SIEVES_BASE: u64 = 0x1_0000;

/// First index the sieve writes.
const FIRST_CANDIDATE: usize = 2;

pub type SieveBuffer = [u8; SIEVE_LEN];

/// Marks every index in `2..SIEVE_LEN` as prime (nonzero) or composite (zero).
pub fn compute_primes(sieve: &mut SieveBuffer) {
    sieve[FIRST_CANDIDATE..].fill(1);

    for i in FIRST_CANDIDATE..SIEVE_LEN {
        if sieve[i] == 0 {
            continue;
        }
        for j in (i + i..SIEVE_LEN).step_by(i) {
            sieve[j] = 0;
        }
    }
}

/// Runs [`compute_primes`] on the `SIEVE_LEN` bytes at guest address `base`.
///
/// The window must lie inside `mem`; otherwise [`GuestMemoryError::OutOfRange`] is returned and
/// nothing is written. The bytes at `base` and `base + 1` are never written. Whether the flag bytes
/// are backed by a device is up to `mem`: a [`sieves_mem::Bus`] refuses the whole write with
/// [`GuestMemoryError::Unmapped`] if any of them is not.
pub fn compute_primes_at<M>(mem: &mut M, base: u64) -> GuestMemoryResult<()>
where
    M: GuestMemory + ?Sized,
{
    check_window(mem, base)?;

    let in_place = mem
        .get_slice_mut(base, SIEVE_LEN)
        .and_then(|window| <&mut SieveBuffer>::try_from(window).ok());

    match in_place {
        Some(sieve) => {
            compute_primes(sieve);
            tracing::debug!("sieved guest window at {base:#x} in place");
        }
        None => {
            // The result does not depend on prior contents, so sieve a scratch buffer and store
            // only the bytes the routine owns.
            let mut staged = [0u8; SIEVE_LEN];
            compute_primes(&mut staged);
            mem.write_from(base + FIRST_CANDIDATE as u64, &staged[FIRST_CANDIDATE..])?;
            tracing::debug!("sieved guest window at {base:#x} through a staging buffer");
        }
    }

    Ok(())
}

/// Copies the sieve window at guest address `base` out of `mem`.
pub fn read_sieve<M>(mem: &M, base: u64) -> GuestMemoryResult<SieveBuffer>
where
    M: GuestMemory + ?Sized,
{
    let mut sieve = [0u8; SIEVE_LEN];
    mem.read_into(base, &mut sieve)?;
    Ok(sieve)
}

/// Indices in `2..SIEVE_LEN` whose flag is set, in ascending order.
pub fn primes(sieve: &SieveBuffer) -> impl Iterator<Item = usize> + '_ {
    (FIRST_CANDIDATE..SIEVE_LEN).filter(move |&i| sieve[i] != 0)
}

fn check_window<M>(mem: &M, base: u64) -> GuestMemoryResult<()>
where
    M: GuestMemory + ?Sized,
{
    let size = mem.size();
    let out_of_range = GuestMemoryError::OutOfRange {
        paddr: base,
        len: SIEVE_LEN,
        size,
    };
    match base.checked_add(SIEVE_LEN as u64) {
        Some(end) if end <= size => Ok(()),
        _ => Err(out_of_range),
    }
}
