//! Interval-driven job runner with per-kind run guards.
//!
//! Each job kind owns one atomic flag. A tick that arrives while the same
//! kind is still running is skipped, never queued; independent kinds overlap
//! freely. Acquisition hands out an RAII token so the flag is released even
//! when a job errors or panics mid-run.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    Ingest,
    Detect,
    Discover,
    BroadMonitor,
    WhaleEvents,
    DexEvents,
    AlertSweep,
}

impl JobKind {
    pub const ALL: [JobKind; 7] = [
        JobKind::Ingest,
        JobKind::Detect,
        JobKind::Discover,
        JobKind::BroadMonitor,
        JobKind::WhaleEvents,
        JobKind::DexEvents,
        JobKind::AlertSweep,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Ingest => "ingest",
            JobKind::Detect => "detect",
            JobKind::Discover => "discover",
            JobKind::BroadMonitor => "broad_monitor",
            JobKind::WhaleEvents => "whale_events",
            JobKind::DexEvents => "dex_events",
            JobKind::AlertSweep => "alert_sweep",
        }
    }

    fn index(self) -> usize {
        match self {
            JobKind::Ingest => 0,
            JobKind::Detect => 1,
            JobKind::Discover => 2,
            JobKind::BroadMonitor => 3,
            JobKind::WhaleEvents => 4,
            JobKind::DexEvents => 5,
            JobKind::AlertSweep => 6,
        }
    }
}

/// One RUNNING flag per job kind. Acquisition is a single
/// compare-and-swap, so two racing ticks can never both win.
pub struct RunGuards {
    flags: [AtomicBool; JobKind::ALL.len()],
}

impl RunGuards {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            flags: Default::default(),
        })
    }

    /// Flip the kind's flag from idle to running. `None` means the kind is
    /// already running and the caller must skip this tick.
    pub fn try_acquire(self: &Arc<Self>, kind: JobKind) -> Option<JobToken> {
        let won = self.flags[kind.index()]
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok();
        won.then(|| JobToken {
            guards: self.clone(),
            kind,
        })
    }

    pub fn is_running(&self, kind: JobKind) -> bool {
        self.flags[kind.index()].load(Ordering::Acquire)
    }
}

/// Held for the duration of one job run; releases the flag on drop, which
/// covers the error and panic paths too.
pub struct JobToken {
    guards: Arc<RunGuards>,
    kind: JobKind,
}

impl Drop for JobToken {
    fn drop(&mut self) {
        self.guards.flags[self.kind.index()].store(false, Ordering::Release);
    }
}

type JobFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
type JobFn = Arc<dyn Fn() -> JobFuture + Send + Sync>;

struct RegisteredJob {
    kind: JobKind,
    every: Duration,
    run: JobFn,
}

/// Registry of periodic jobs; `spawn_all` turns each into its own tokio
/// task looping on its cadence.
pub struct Scheduler {
    guards: Arc<RunGuards>,
    jobs: Vec<RegisteredJob>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            guards: RunGuards::new(),
            jobs: Vec::new(),
        }
    }

    pub fn guards(&self) -> Arc<RunGuards> {
        self.guards.clone()
    }

    pub fn register<F, Fut>(&mut self, kind: JobKind, every: Duration, job: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.jobs.push(RegisteredJob {
            kind,
            every,
            run: Arc::new(move || Box::pin(job())),
        });
    }

    pub fn spawn_all(self) -> Vec<JoinHandle<()>> {
        let guards = self.guards;
        self.jobs
            .into_iter()
            .map(|job| {
                let guards = guards.clone();
                tokio::spawn(async move {
                    info!(
                        "Job {} scheduled every {:?}",
                        job.kind.as_str(),
                        job.every
                    );
                    let mut ticker = tokio::time::interval(job.every);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    // The first tick fires immediately; consume it so jobs
                    // only start after one full cadence.
                    ticker.tick().await;
                    loop {
                        ticker.tick().await;
                        let Some(_token) = guards.try_acquire(job.kind) else {
                            debug!(
                                "Job {} still running, skipping tick",
                                job.kind.as_str()
                            );
                            continue;
                        };
                        if let Err(e) = (job.run)().await {
                            error!("Job {} failed: {:#}", job.kind.as_str(), e);
                        }
                    }
                })
            })
            .collect()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
