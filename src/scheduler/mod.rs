//! Job scheduling shim.
//!
//! Engines are plain async entrypoints; this module drives them on fixed
//! periods (the `CRON_RUN_*` keys carry seconds), guarantees a job never
//! overlaps itself, optionally kicks jobs off at startup, and propagates
//! cancellation on shutdown. Full cron-grammar scheduling belongs to the
//! deployment environment; in-process scheduling stays interval-based.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::Result;

/// A schedulable job: name, period, and an async entrypoint.
pub struct JobSpec {
    /// Job name for logs.
    pub name: String,

    /// Period between run starts.
    pub every: Duration,

    /// Run once immediately at startup (default off in hosted setups).
    pub run_on_startup: bool,

    /// Entrypoint; receives the shutdown token.
    #[allow(clippy::type_complexity)]
    pub run: Arc<
        dyn Fn(CancellationToken) -> Pin<Box<dyn Future<Output = Result<()>> + Send>>
            + Send
            + Sync,
    >,
}

impl JobSpec {
    /// Creates a job from an async closure.
    pub fn new<F, Fut>(name: &str, every: Duration, run_on_startup: bool, run: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            name: name.to_string(),
            every,
            run_on_startup,
            run: Arc::new(move |cancel| Box::pin(run(cancel))),
        }
    }
}

impl std::fmt::Debug for JobSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobSpec")
            .field("name", &self.name)
            .field("every", &self.every)
            .field("run_on_startup", &self.run_on_startup)
            .finish_non_exhaustive()
    }
}

/// Interval scheduler with per-job overlap guards.
pub struct Scheduler {
    jobs: Vec<JobSpec>,
    shutdown: CancellationToken,
}

impl Scheduler {
    /// Creates a scheduler bound to a shutdown token.
    #[must_use]
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            jobs: Vec::new(),
            shutdown,
        }
    }

    /// Registers a job.
    pub fn register(&mut self, job: JobSpec) {
        info!(
            "[scheduler] registered job {} every {:?} (startup={})",
            job.name, job.every, job.run_on_startup
        );
        self.jobs.push(job);
    }

    /// Runs all jobs until the shutdown token fires.
    ///
    /// Each job gets its own ticking loop; a tick that lands while the
    /// previous run is still in flight is skipped rather than queued.
    pub async fn run(self) {
        let mut handles = Vec::new();
        for job in self.jobs {
            let shutdown = self.shutdown.clone();
            handles.push(tokio::spawn(drive_job(job, shutdown)));
        }
        for handle in handles {
            if let Err(err) = handle.await {
                error!("[scheduler] job task panicked: {err}");
            }
        }
        info!("[scheduler] all jobs stopped");
    }
}

async fn drive_job(job: JobSpec, shutdown: CancellationToken) {
    // One permit = one concurrent run of this job.
    let guard = Arc::new(Semaphore::new(1));
    let mut interval = tokio::time::interval(job.every.max(Duration::from_secs(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    if !job.run_on_startup {
        // The first interval tick fires immediately; consume it.
        interval.tick().await;
    }

    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                info!("[scheduler] job {} shutting down", job.name);
                return;
            }
            _ = interval.tick() => {}
        }

        let Ok(permit) = Arc::clone(&guard).try_acquire_owned() else {
            warn!("[scheduler] job {} still running; skipping tick", job.name);
            continue;
        };

        let name = job.name.clone();
        let run = Arc::clone(&job.run);
        let cancel = shutdown.child_token();
        tokio::spawn(async move {
            let _permit = permit;
            info!("[scheduler] job {name} starting");
            match run(cancel).await {
                Ok(()) => info!("[scheduler] job {name} finished"),
                Err(err) => error!("[scheduler] job {name} failed: {err}"),
            }
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_job(
        name: &str,
        every: Duration,
        run_on_startup: bool,
        runs: Arc<AtomicUsize>,
        hold: Duration,
    ) -> JobSpec {
        JobSpec::new(name, every, run_on_startup, move |_cancel| {
            let runs = Arc::clone(&runs);
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(hold).await;
                Ok(())
            }
        })
    }

    #[tokio::test]
    async fn test_startup_job_runs_immediately() {
        let runs = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();
        let mut scheduler = Scheduler::new(shutdown.clone());
        scheduler.register(counting_job(
            "startup",
            Duration::from_secs(3600),
            true,
            Arc::clone(&runs),
            Duration::from_millis(1),
        ));

        let handle = tokio::spawn(scheduler.run());
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.cancel();
        handle.await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_non_startup_job_waits_for_period() {
        let runs = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();
        let mut scheduler = Scheduler::new(shutdown.clone());
        scheduler.register(counting_job(
            "patient",
            Duration::from_secs(3600),
            false,
            Arc::clone(&runs),
            Duration::from_millis(1),
        ));

        let handle = tokio::spawn(scheduler.run());
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.cancel();
        handle.await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_overlap_skipped() {
        let runs = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();
        let mut scheduler = Scheduler::new(shutdown.clone());
        // Period 1s (minimum), job holds for far longer than the test.
        scheduler.register(counting_job(
            "slow",
            Duration::from_secs(1),
            true,
            Arc::clone(&runs),
            Duration::from_secs(600),
        ));

        let handle = tokio::spawn(scheduler.run());
        tokio::time::sleep(Duration::from_millis(2500)).await;
        shutdown.cancel();
        handle.await.unwrap();
        // Later ticks were skipped while the first run held the permit.
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_all_jobs() {
        let shutdown = CancellationToken::new();
        let mut scheduler = Scheduler::new(shutdown.clone());
        for i in 0..3 {
            scheduler.register(counting_job(
                &format!("job-{i}"),
                Duration::from_secs(3600),
                false,
                Arc::new(AtomicUsize::new(0)),
                Duration::from_millis(1),
            ));
        }
        let handle = tokio::spawn(scheduler.run());
        shutdown.cancel();
        // run() returns once every job loop observes the token.
        handle.await.unwrap();
    }
}
