#![forbid(unsafe_code)]

// Native-only host. Keep a stub `main` so `--target wasm32-unknown-unknown --workspace` builds.
#[cfg(target_arch = "wasm32")]
fn main() {}

#[cfg(not(target_arch = "wasm32"))]
mod native {
    use std::fs::File;
    use std::io::{self, Write};
    use std::path::PathBuf;

    use anyhow::{Context, Result};
    use clap::Parser;
    use sieves_core::{compute_primes_at, primes, read_sieve, SIEVES_BASE, SIEVE_LEN};
    use sieves_mem::{board, Bus, DenseMemory, GuestMemory, SparseMemory, SDRAM_SIZE};

    #[derive(Debug, Parser)]
    #[command(about = "Host for the prime sieve routine: wires up the board bus, runs the sieve at a fixed address")]
    pub struct Args {
        /// Guest address of the 100-byte sieve buffer (`0x` hex or decimal).
        #[arg(long, value_parser = parse_addr, default_value_t = SIEVES_BASE)]
        base: u64,

        /// SDRAM size in MiB.
        #[arg(long, default_value_t = SDRAM_SIZE >> 20)]
        ram: u64,

        /// Back SDRAM with lazily-allocated chunks instead of one dense allocation.
        #[arg(long)]
        sparse: bool,

        /// Byte to pre-fill the sieve window with before the first run.
        #[arg(long, value_parser = parse_byte, default_value_t = 0)]
        fill: u8,

        /// Invoke the routine this many times.
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
        runs: u32,

        /// Write the raw sieve window bytes to this file after the last run.
        #[arg(long)]
        dump: Option<PathBuf>,
    }

    pub fn main() -> Result<()> {
        tracing_subscriber::fmt()
            .with_writer(io::stderr)
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .init();

        let args = Args::parse();
        let mut mem = build_memory(&args)?;

        mem.write_from(args.base, &[args.fill; SIEVE_LEN])
            .with_context(|| format!("failed to pre-fill sieve window at 0x{:x}", args.base))?;

        for run in 0..args.runs {
            tracing::debug!("sieve run {}/{}", run + 1, args.runs);
            compute_primes_at(&mut mem, args.base)
                .with_context(|| format!("sieve run {} failed", run + 1))?;
        }

        let sieve = read_sieve(&mem, args.base).context("failed to read back sieve window")?;
        let line = primes(&sieve)
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(" ");

        let stdout = io::stdout();
        let mut out = stdout.lock();
        writeln!(out, "{line}")?;
        out.flush()?;

        if let Some(path) = &args.dump {
            let mut f = File::create(path)
                .with_context(|| format!("failed to create dump file: {}", path.display()))?;
            f.write_all(&sieve)
                .with_context(|| format!("failed to write dump file: {}", path.display()))?;
            tracing::info!("wrote sieve window to {}", path.display());
        }

        Ok(())
    }

    fn build_memory(args: &Args) -> Result<Bus> {
        let ram_bytes = args
            .ram
            .checked_mul(1024 * 1024)
            .context("RAM size overflow")?;

        let ram: Box<dyn GuestMemory> = if args.sparse {
            Box::new(SparseMemory::new(ram_bytes).context("failed to create sparse SDRAM")?)
        } else {
            Box::new(DenseMemory::new(ram_bytes).context("failed to allocate SDRAM")?)
        };

        let mem = board(ram).context("failed to build board memory map")?;
        tracing::info!(
            "SDRAM attached: {} MiB ({})",
            args.ram,
            if args.sparse { "sparse" } else { "dense" }
        );
        Ok(mem)
    }

    fn parse_addr(s: &str) -> Result<u64, String> {
        let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16),
            None => s.replace('_', "").parse::<u64>(),
        };
        parsed.map_err(|e| format!("invalid address {s:?}: {e}"))
    }

    fn parse_byte(s: &str) -> Result<u8, String> {
        let value = parse_addr(s)?;
        u8::try_from(value).map_err(|_| format!("fill byte {s:?} does not fit in a byte"))
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn addresses_accept_hex_and_decimal() {
            assert_eq!(parse_addr("0x10000"), Ok(0x1_0000));
            assert_eq!(parse_addr("0X1_0000"), Ok(0x1_0000));
            assert_eq!(parse_addr("65536"), Ok(65536));
            assert!(parse_addr("0xzz").is_err());
            assert!(parse_addr("").is_err());
        }

        #[test]
        fn fill_byte_must_fit() {
            assert_eq!(parse_byte("0xff"), Ok(0xFF));
            assert_eq!(parse_byte("7"), Ok(7));
            assert!(parse_byte("256").is_err());
        }

        #[test]
        fn defaults_match_the_rom_layout() {
            let args = Args::parse_from(["sieves"]);
            assert_eq!(args.base, SIEVES_BASE);
            assert_eq!(args.ram, SDRAM_SIZE >> 20);
            assert_eq!(args.ram, 64);
            assert_eq!(args.runs, 1);
            assert!(!args.sparse);
        }

        #[test]
        fn zero_runs_is_rejected() {
            assert!(Args::try_parse_from(["sieves", "--runs", "0"]).is_err());
        }

        #[test]
        fn memory_follows_the_ram_flag() {
            let args = Args::parse_from(["sieves", "--ram", "1", "--sparse"]);
            let mem = build_memory(&args).unwrap();
            let ranges: Vec<_> = mem.ranges().collect();
            assert_eq!(*ranges[0].end(), 0xF_FFFF);
            assert_eq!(ranges.len(), 2);
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn main() -> anyhow::Result<()> {
    native::main()
}
