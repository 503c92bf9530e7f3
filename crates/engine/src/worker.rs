// SPDX-License-Identifier: MIT

//! Worker pool: polls the queue, dispatches bounded workers, renews
//! leases, reconciles stale runs, and drains on shutdown.

use crate::orchestrator::RunOrchestrator;
use relay_adapters::ProcessRunner;
use relay_core::{Clock, IdGen};
use relay_storage::Store;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub max_concurrent_jobs: usize,
    pub poll_interval: Duration,
    pub lease_duration_ms: u64,
    pub lease_renewal_interval: Duration,
    /// Hard ceiling after which an in-flight run is considered stale.
    pub stale_run_ceiling_ms: u64,
    /// How long shutdown waits for active jobs to clear.
    pub shutdown_drain: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 3,
            poll_interval: Duration::from_millis(750),
            lease_duration_ms: 30_000,
            lease_renewal_interval: Duration::from_millis(15_000),
            stale_run_ceiling_ms: 60 * 60 * 1000,
            shutdown_drain: Duration::from_secs(5),
        }
    }
}

pub struct WorkerPool<C: Clock, G: IdGen> {
    orchestrator: Arc<RunOrchestrator<C, G>>,
    store: Arc<Store>,
    runner: ProcessRunner,
    clock: C,
    config: WorkerConfig,
    owner: String,
    active: Arc<AtomicUsize>,
    shutting_down: Arc<AtomicBool>,
}

impl<C: Clock, G: IdGen> WorkerPool<C, G> {
    pub fn new(
        orchestrator: Arc<RunOrchestrator<C, G>>,
        store: Arc<Store>,
        runner: ProcessRunner,
        clock: C,
        config: WorkerConfig,
    ) -> Self {
        Self {
            orchestrator,
            store,
            runner,
            clock,
            config,
            owner: format!("worker-{}", std::process::id()),
            active: Arc::new(AtomicUsize::new(0)),
            shutting_down: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn active_jobs(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub(crate) fn clock_for_tests(&self) -> &C {
        &self.clock
    }

    /// Supervisor loop. Returns after `shutdown` fires and the drain
    /// window elapses (or all workers finish, whichever is first).
    pub async fn run(self: Arc<Self>, shutdown: Arc<Notify>) {
        tracing::info!(
            owner = %self.owner,
            max_concurrent = self.config.max_concurrent_jobs,
            "worker pool started"
        );
        loop {
            tokio::select! {
                _ = shutdown.notified() => {
                    self.drain().await;
                    return;
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    self.tick();
                }
            }
        }
    }

    /// One poll iteration: reconcile, then dispatch while under the cap.
    fn tick(self: &Arc<Self>) {
        if self.shutting_down.load(Ordering::SeqCst) {
            return;
        }

        if let Err(e) = self
            .orchestrator
            .reconcile(self.clock.epoch_ms(), self.config.stale_run_ceiling_ms)
        {
            tracing::error!(error = %e, "reconcile failed");
        }

        while self.active.load(Ordering::SeqCst) < self.config.max_concurrent_jobs {
            let job = match self
                .orchestrator
                .lease_next(&self.owner, self.config.lease_duration_ms)
            {
                Ok(Some(job)) => job,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(error = %e, "lease failed");
                    break;
                }
            };
            self.dispatch(job);
        }
    }

    /// Run one leased job on its own task, with a lease-renewal ticker
    /// alive for the duration.
    fn dispatch(self: &Arc<Self>, job: relay_core::Job) {
        self.active.fetch_add(1, Ordering::SeqCst);
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            let job_id = job.id.clone();
            let renewal = {
                let pool = Arc::clone(&pool);
                let job_id = job_id.clone();
                async move {
                    let mut ticker = tokio::time::interval(pool.config.lease_renewal_interval);
                    ticker.tick().await; // first tick is immediate
                    loop {
                        ticker.tick().await;
                        let now = pool.clock.epoch_ms();
                        match pool
                            .store
                            .renew_job_lease(&job_id, now, pool.config.lease_duration_ms)
                        {
                            Ok(true) => {}
                            Ok(false) => {
                                tracing::debug!(job_id = %job_id, "lease no longer held, stopping renewal");
                                std::future::pending::<()>().await;
                            }
                            Err(e) => tracing::warn!(job_id = %job_id, error = %e, "lease renewal failed"),
                        }
                    }
                }
            };

            tokio::select! {
                result = pool.orchestrator.process_job(job) => {
                    // The orchestrator already persisted the failure; the
                    // pool only logs and keeps going.
                    if let Err(e) = result {
                        tracing::error!(job_id = %job_id, error = %e, "job failed");
                    }
                }
                _ = renewal => {}
            }
            pool.active.fetch_sub(1, Ordering::SeqCst);
        });
    }

    /// Graceful shutdown: stop dispatching, cancel every live process,
    /// and wait briefly for workers to finalize.
    async fn drain(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        tracing::info!("worker pool shutting down");
        self.runner.cancel_all();

        let deadline = tokio::time::Instant::now() + self.config.shutdown_drain;
        while self.active.load(Ordering::SeqCst) > 0 {
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(
                    active = self.active.load(Ordering::SeqCst),
                    "drain window elapsed with jobs still active"
                );
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        tracing::info!("worker pool stopped");
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
