//! # Allocation Churn
//!
//! Command-line tool that replays a deterministic allocate/free workload
//! across all affinities and prints the resulting allocator state.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use scene_alloc::{Affinity, AllocatorConfig, SceneAllocator};
use std::ptr::NonNull;

/// Upper bound on request sizes, chosen so a few land on the platform path.
const MAX_REQUEST: usize = 2 * 1024 * 1024;

fn main() {
    println!("╔══════════════════════════════════════════════════════════════════╗");
    println!("║         SCENE ALLOC CHURN                                        ║");
    println!("╚══════════════════════════════════════════════════════════════════╝");
    println!();

    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help") {
        println!("Usage: alloc_churn [--config <file.toml>] [--seed <n>] [--ops <n>] [--verbose]");
        return;
    }

    let value = |flag: &str| {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
    };
    let seed: u64 = value("--seed").and_then(|s| s.parse().ok()).unwrap_or(0x5ce7e);
    let ops: usize = value("--ops").and_then(|s| s.parse().ok()).unwrap_or(100_000);
    let verbose = args.iter().any(|a| a == "--verbose");

    let config = match value("--config") {
        Some(path) => match AllocatorConfig::from_toml_file(path) {
            Ok(c) => c,
            Err(e) => {
                println!("Error: {e}");
                return;
            }
        },
        None => AllocatorConfig::default(),
    };

    let allocator = match SceneAllocator::new(config) {
        Ok(a) => a,
        Err(e) => {
            println!("Error: {e}");
            return;
        }
    };

    println!("Running {ops} operations (seed {seed:#x})...");

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut live: Vec<(NonNull<u8>, usize)> = Vec::new();
    let mut peak_reserved = 0;
    let mut failures = 0;

    for _ in 0..ops {
        if live.is_empty() || rng.gen_bool(0.55) {
            let affinity = Affinity::ALL[rng.gen_range(0..Affinity::COUNT)];
            // Mostly small objects with a long tail.
            let size = if rng.gen_bool(0.995) {
                rng.gen_range(0..512)
            } else {
                rng.gen_range(512..MAX_REQUEST)
            };
            match allocator.allocate(size, affinity) {
                Ok(ptr) => live.push((ptr, size)),
                Err(e) => {
                    failures += 1;
                    println!("  allocate {size} ({affinity}) failed: {e}");
                }
            }
        } else {
            let (ptr, size) = live.swap_remove(rng.gen_range(0..live.len()));
            if let Err(e) = allocator.deallocate(ptr, size) {
                failures += 1;
                println!("  deallocate {size} failed: {e}");
            }
        }
        peak_reserved = peak_reserved.max(allocator.total_reserved_size());
    }

    let stats = allocator.stats();

    println!();
    println!("┌─ AFTER CHURN ──────────────────────────────────────────────────┐");
    println!("│ Live Allocations:   {}", live.len());
    println!("│ Large Allocations:  {}", stats.large_allocation_count);
    println!("│ Blocks:             {}", stats.block_count());
    println!("│ Memory Held:        {} bytes", stats.memory_size());
    println!("│ Reserved:           {} bytes (peak {peak_reserved})", stats.reserved_size());
    println!("│ Available:          {} bytes", stats.available_size());
    println!("│ Utilisation:        {:.1}%", stats.utilisation() * 100.0);
    for pool in &stats.pools {
        println!(
            "│   {:<9} {:>4} blocks {:>8} allocations {:>12} bytes reserved",
            pool.affinity.name(),
            pool.block_count,
            pool.allocation_count,
            pool.reserved_size
        );
    }
    println!("└──────────────────────────────────────────────────────────────────┘");

    if verbose {
        let mut report = String::new();
        if allocator.report(&mut report).is_ok() {
            println!();
            println!("{report}");
        }
    }

    for (ptr, size) in live.drain(..) {
        if let Err(e) = allocator.deallocate(ptr, size) {
            failures += 1;
            println!("  deallocate {size} failed: {e}");
        }
    }
    let valid = allocator.validate();
    let reclaimed = allocator.delete_empty_memory_blocks();

    println!();
    println!("┌─ AFTER RELEASE ────────────────────────────────────────────────┐");
    println!("│ Reserved:           {} bytes", allocator.total_reserved_size());
    println!("│ Reclaimed:          {reclaimed} bytes");
    println!("│ Memory Held:        {} bytes", allocator.total_memory_size());
    println!("│ Failures:           {failures}");
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();

    match valid {
        Ok(()) if failures == 0 => println!("✓ Allocator consistent, all memory reclaimed"),
        Ok(()) => println!("⚠ {failures} operations failed"),
        Err(e) => println!("✗ {e}"),
    }
}
