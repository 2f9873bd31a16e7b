//! Job scheduler infrastructure for background tasks.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::middleware::metrics::record_job_run;

/// Job frequency for scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobFrequency {
    /// Run every N seconds.
    Seconds(u64),
    /// Run every N minutes.
    Minutes(u64),
}

impl JobFrequency {
    /// Get the duration between job executions. Never zero.
    pub fn duration(&self) -> Duration {
        match self {
            JobFrequency::Seconds(secs) => Duration::from_secs((*secs).max(1)),
            JobFrequency::Minutes(mins) => Duration::from_secs((*mins).max(1) * 60),
        }
    }
}

/// Trait for implementing background jobs.
#[async_trait::async_trait]
pub trait Job: Send + Sync {
    /// The name of this job (used for logging and metrics).
    fn name(&self) -> &'static str;

    /// The frequency at which this job should run.
    fn frequency(&self) -> JobFrequency;

    /// Execute the job. Returns Ok(()) on success, Err with message on failure.
    async fn execute(&self) -> Result<(), String>;
}

/// Background job scheduler.
pub struct JobScheduler {
    jobs: Vec<Arc<dyn Job>>,
    shutdown: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl JobScheduler {
    /// Create a scheduler stopped by `shutdown`.
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            jobs: Vec::new(),
            shutdown,
            handles: Vec::new(),
        }
    }

    /// Register a job with the scheduler.
    pub fn register<J: Job + 'static>(&mut self, job: J) {
        self.jobs.push(Arc::new(job));
    }

    pub fn job_names(&self) -> Vec<&'static str> {
        self.jobs.iter().map(|j| j.name()).collect()
    }

    /// Start all registered jobs.
    pub fn start(&mut self) {
        info!("Starting job scheduler with {} jobs", self.jobs.len());

        for job in &self.jobs {
            let job = Arc::clone(job);
            let shutdown = self.shutdown.clone();

            let handle = tokio::spawn(async move {
                let name = job.name();
                let frequency = job.frequency();
                let mut interval = tokio::time::interval(frequency.duration());
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

                // Skip the first immediate tick
                interval.tick().await;

                info!(job = name, frequency = ?frequency, "Job scheduled");

                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => {
                            info!(job = name, "Job shutting down");
                            break;
                        }
                        _ = interval.tick() => {
                            let start = std::time::Instant::now();
                            debug!(job = name, "Job starting");

                            match job.execute().await {
                                Ok(()) => {
                                    record_job_run(name, true);
                                    debug!(
                                        job = name,
                                        elapsed_ms = start.elapsed().as_millis() as u64,
                                        "Job completed successfully"
                                    );
                                }
                                Err(e) => {
                                    record_job_run(name, false);
                                    error!(
                                        job = name,
                                        elapsed_ms = start.elapsed().as_millis() as u64,
                                        error = %e,
                                        "Job failed"
                                    );
                                }
                            }
                        }
                    }
                }
            });

            self.handles.push(handle);
        }
    }

    /// Signal shutdown without waiting.
    pub fn shutdown(&self) {
        info!("Initiating job scheduler shutdown");
        self.shutdown.cancel();
    }

    /// Wait for all jobs to complete with timeout.
    pub async fn wait_for_shutdown(self, timeout: Duration) {
        info!("Waiting for jobs to complete (timeout: {:?})", timeout);

        let shutdown_future = async {
            for handle in self.handles {
                if let Err(e) = handle.await {
                    warn!("Job task panicked: {}", e);
                }
            }
        };

        match tokio::time::timeout(timeout, shutdown_future).await {
            Ok(()) => info!("All jobs completed gracefully"),
            Err(_) => warn!("Job shutdown timed out after {:?}", timeout),
        }
    }
}
