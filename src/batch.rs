//! Bounded fan-out/fan-in over independent jobs.
//!
//! Used to deploy several sites at once. Every job owns its own resources
//! (one [`Connection`](crate::remote::Connection) per site); nothing is shared
//! between jobs.

use rayon::prelude::*;

/// Default number of jobs running at the same time.
pub const DEFAULT_CONCURRENCY: usize = 20;

/// Run `job` over `items` with at most `concurrency` jobs in flight.
///
/// Results keep the input order. On the first error no further jobs are
/// started and that error is returned; jobs already running finish first.
pub fn run_bounded<I, T, E, F>(items: Vec<I>, concurrency: usize, job: F) -> anyhow::Result<Vec<T>>
where
    I: Send,
    T: Send,
    E: Into<anyhow::Error> + Send,
    F: Fn(I) -> Result<T, E> + Sync + Send,
{
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(concurrency.max(1))
        .thread_name(|i| format!("owh-batch-{i}"))
        .build()?;

    pool.install(|| {
        items
            .into_par_iter()
            .map(|item| job(item).map_err(Into::into))
            .collect::<anyhow::Result<Vec<T>>>()
    })
}
