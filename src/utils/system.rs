// src/utils/system.rs: System functions

use anyhow::{anyhow, Result};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::{ThreadPool, ThreadPoolBuilder};


/// Resolves a `--threads` value, where 0 means every logical CPU.
pub fn resolve_threads(threads: usize) -> usize {
    if threads == 0 {
        num_cpus::get()
    } else {
        threads
    }
}


/// Number of concurrent workers for a `--threads` value, keeping one thread back
/// for the parent process.
///
/// # Arguments
///
/// * `threads` - Requested threads, 0 for all CPUs.
///
/// # Returns
///
/// usize, at least 1
pub fn worker_count(threads: usize) -> usize {
    let threads = resolve_threads(threads);
    let workers = if threads <= 1 { 1 } else { threads - 1 };
    debug!("Using {} workers for {} threads", workers, threads);
    workers
}


/// Creates a pool of threads for CPU-bound parsing.
///
/// # Arguments
/// # 'max_cores' : Maximum cores allowed or discovered.
///
/// # Returns
/// rayon::ThreadPool
pub fn create_thread_pool(max_cores: usize) -> Result<ThreadPool> {
    ThreadPoolBuilder::new()
        .num_threads(max_cores.max(1))
        .build()
        .map_err(|e| anyhow!("Failed to create thread pool: {}", e))
}


/// Creates an RNG, from `seed` when given for reproducible sampling, otherwise
/// from the OS entropy pool.
///
/// # Arguments
///
///  * `seed` - Seed number that allows reproducible results.
///
/// # Returns
///
/// A StdRng
pub fn generate_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}


/// Logs each argument of a subcommand as `Argument <name>: <value>`.
pub fn log_arguments(arguments: &[(&str, String)]) {
    for (name, value) in arguments {
        info!("Argument {}: {}", name, value);
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_worker_count_reserves_parent_thread() {
        assert_eq!(worker_count(1), 1);
        assert_eq!(worker_count(2), 1);
        assert_eq!(worker_count(8), 7);
        assert_eq!(worker_count(0), (num_cpus::get().max(2)) - 1);
    }

    #[test]
    fn test_resolve_threads() {
        assert_eq!(resolve_threads(4), 4);
        assert!(resolve_threads(0) >= 1);
    }

    #[test]
    fn test_thread_pool_size() -> Result<()> {
        let pool = create_thread_pool(3)?;
        assert_eq!(pool.current_num_threads(), 3);
        let pool = create_thread_pool(0)?;
        assert_eq!(pool.current_num_threads(), 1);
        Ok(())
    }

    #[test]
    fn test_seeded_rng_is_reproducible() {
        let a: u64 = generate_rng(Some(7)).random();
        let b: u64 = generate_rng(Some(7)).random();
        assert_eq!(a, b);
    }
}
