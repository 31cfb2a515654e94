//! Task runners that execute one closure per pixel chunk.

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};

/// Runs every chunk task and returns only after all have finished, with
/// results in chunk order.
pub trait TaskRunner {
    fn join_all<T, R, F>(&self, chunks: Vec<T>, work: F) -> Vec<R>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> R + Sync + Send;

    fn name(&self) -> &'static str;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SequentialRunner;

impl TaskRunner for SequentialRunner {
    fn join_all<T, R, F>(&self, chunks: Vec<T>, work: F) -> Vec<R>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> R + Sync + Send,
    {
        chunks.into_iter().map(work).collect()
    }

    fn name(&self) -> &'static str {
        "sequential"
    }
}

/// Work-stealing runner. Uses the global rayon pool unless built with a
/// fixed thread count.
#[derive(Default)]
pub struct RayonRunner {
    pool: Option<ThreadPool>,
}

impl RayonRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_threads(threads: usize) -> Result<Self, ThreadPoolBuildError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("rangeland-worker-{i}"))
            .build()?;
        Ok(Self { pool: Some(pool) })
    }

    pub fn threads(&self) -> usize {
        match &self.pool {
            Some(pool) => pool.current_num_threads(),
            None => rayon::current_num_threads(),
        }
    }
}

impl TaskRunner for RayonRunner {
    fn join_all<T, R, F>(&self, chunks: Vec<T>, work: F) -> Vec<R>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> R + Sync + Send,
    {
        let run = || chunks.into_par_iter().map(&work).collect::<Vec<R>>();
        match &self.pool {
            Some(pool) => pool.install(run),
            None => run(),
        }
    }

    fn name(&self) -> &'static str {
        "rayon"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn squares(runner: &impl TaskRunner) -> Vec<u64> {
        runner.join_all((0..64u64).collect(), |x| x * x)
    }

    #[test]
    fn runners_agree_and_keep_order() {
        let expected: Vec<u64> = (0..64u64).map(|x| x * x).collect();
        assert_eq!(squares(&SequentialRunner), expected);
        assert_eq!(squares(&RayonRunner::new()), expected);
        assert_eq!(squares(&RayonRunner::with_threads(2).unwrap()), expected);
    }

    #[test]
    fn fixed_pool_reports_thread_count() {
        let runner = RayonRunner::with_threads(3).unwrap();
        assert_eq!(runner.threads(), 3);
        assert_eq!(runner.name(), "rayon");
    }
}
