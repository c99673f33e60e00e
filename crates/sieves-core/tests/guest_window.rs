use sieves_core::{compute_primes, compute_primes_at, primes, read_sieve, SIEVES_BASE, SIEVE_LEN};
use sieves_mem::{board, DenseMemory, GuestMemory, GuestMemoryError, SparseMemory, VGA_BUFFER_BASE};

fn reference() -> [u8; SIEVE_LEN] {
    let mut sieve = [0u8; SIEVE_LEN];
    compute_primes(&mut sieve);
    sieve
}

fn assert_flags_match(got: &[u8; SIEVE_LEN]) {
    let want = reference();
    assert_eq!(&got[2..], &want[2..]);
}

#[test]
fn dense_sdram_at_rom_address() {
    let mut mem = board(Box::new(DenseMemory::new(0x2_0000).unwrap())).unwrap();

    compute_primes_at(&mut mem, SIEVES_BASE).unwrap();

    let sieve = read_sieve(&mem, SIEVES_BASE).unwrap();
    assert_flags_match(&sieve);
    assert_eq!(primes(&sieve).count(), 25);
}

#[test]
fn sparse_ram_takes_the_staged_path() {
    // A fresh sparse backend has no slice to hand out, so the window is written back in bulk.
    let mut mem = SparseMemory::with_chunk_size(0x2_0000, 0x1000).unwrap();
    assert!(mem.get_slice_mut(SIEVES_BASE, SIEVE_LEN).is_none());

    compute_primes_at(&mut mem, SIEVES_BASE).unwrap();

    assert_flags_match(&read_sieve(&mem, SIEVES_BASE).unwrap());
    assert_eq!(mem.allocated_chunks(), 1);
}

#[test]
fn window_straddling_sparse_chunks() {
    let mut mem = SparseMemory::with_chunk_size(0x1000, 128).unwrap();
    let base = 40;

    compute_primes_at(&mut mem, base).unwrap();

    assert_flags_match(&read_sieve(&mem, base).unwrap());
    assert_eq!(mem.allocated_chunks(), 2);
}

#[test]
fn surrounding_bytes_and_leading_flags_are_untouched() {
    let mut mem = DenseMemory::new(0x400).unwrap();
    let base = 0x100;
    mem.write_from(0, &[0xEE; 0x400]).unwrap();

    compute_primes_at(&mut mem, base).unwrap();

    let mut before = [0u8; 0x100];
    mem.read_into(0, &mut before).unwrap();
    assert!(before.iter().all(|&b| b == 0xEE));

    let mut after = vec![0u8; 0x400 - 0x100 - SIEVE_LEN];
    mem.read_into(base + SIEVE_LEN as u64, &mut after).unwrap();
    assert!(after.iter().all(|&b| b == 0xEE));

    let sieve = read_sieve(&mem, base).unwrap();
    assert_eq!(&sieve[..2], &[0xEE, 0xEE]);
    assert_flags_match(&sieve);
}

#[test]
fn repeated_invocation_is_idempotent() {
    let mut mem = DenseMemory::new(0x200).unwrap();

    compute_primes_at(&mut mem, 0x80).unwrap();
    let once = read_sieve(&mem, 0x80).unwrap();
    compute_primes_at(&mut mem, 0x80).unwrap();
    let twice = read_sieve(&mem, 0x80).unwrap();

    assert_eq!(once, twice);
}

#[test]
fn window_past_end_of_memory_is_rejected_without_writing() {
    let mut mem = DenseMemory::new(0x100).unwrap();

    let err = compute_primes_at(&mut mem, 0xA0).unwrap_err();
    assert_eq!(
        err,
        GuestMemoryError::OutOfRange {
            paddr: 0xA0,
            len: SIEVE_LEN,
            size: 0x100,
        }
    );

    let mut all = [0u8; 0x100];
    mem.read_into(0, &mut all).unwrap();
    assert!(all.iter().all(|&b| b == 0));

    assert!(compute_primes_at(&mut mem, u64::MAX).is_err());
}

#[test]
fn window_crossing_the_top_of_sdram_is_refused_whole() {
    // SDRAM ends 0x40 bytes into the window; the board decodes nothing above it until the VGA
    // buffer.
    let mut mem = board(Box::new(DenseMemory::new(SIEVES_BASE + 0x40).unwrap())).unwrap();
    mem.write_from(SIEVES_BASE, &[0xEE; 0x40]).unwrap();

    let err = compute_primes_at(&mut mem, SIEVES_BASE).unwrap_err();
    assert_eq!(
        err,
        GuestMemoryError::Unmapped {
            paddr: SIEVES_BASE + 0x40
        }
    );

    // The mapped part of the window was not written either.
    let mut head = [0u8; 0x40];
    mem.read_into(SIEVES_BASE, &mut head).unwrap();
    assert!(head.iter().all(|&b| b == 0xEE));
}

#[test]
fn window_in_the_vga_buffer() {
    let mut mem = board(Box::new(SparseMemory::new(0x2_0000).unwrap())).unwrap();
    let base = VGA_BUFFER_BASE + 0x200;

    compute_primes_at(&mut mem, base).unwrap();

    assert_flags_match(&read_sieve(&mem, base).unwrap());
}

#[test]
fn works_through_a_trait_object() {
    let mut mem: Box<dyn GuestMemory> = Box::new(DenseMemory::new(0x100).unwrap());

    compute_primes_at(mem.as_mut(), 0).unwrap();

    assert_flags_match(&read_sieve(mem.as_ref(), 0).unwrap());
}
