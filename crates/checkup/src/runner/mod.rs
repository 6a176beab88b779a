//! Concurrent execution of many checks.
//!
//! A run never fails as a whole: every submitted descriptor gets exactly one
//! result, in submission order, whatever happens to its siblings.

mod descriptor;

pub use descriptor::{CheckDescriptor, CheckOutcome, RunSummary};

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::PluginConfig;
use crate::dispatch::{self, DispatchError};
use crate::registry::PluginRegistry;
use crate::result::CheckResult;

/// Default worker count: available parallelism plus four, capped at 32
pub fn default_max_workers() -> usize {
    let cpus = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    (cpus + 4).min(32)
}

/// Check runner - executes descriptors through the registry with bounded concurrency
#[derive(Debug, Clone)]
pub struct CheckRunner {
    registry: Arc<PluginRegistry>,
    default_workers: usize,
}

impl CheckRunner {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self { registry, default_workers: default_max_workers() }
    }

    pub fn with_default_workers(mut self, workers: usize) -> Self {
        self.default_workers = workers.max(1);
        self
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    /// Execute a single check
    pub async fn run_check(&self, plugin_type: &str, config: PluginConfig) -> CheckResult {
        dispatch::run_check(&self.registry, plugin_type, config).await
    }

    /// Execute all descriptors concurrently with at most `max_workers` in flight.
    ///
    /// When `timeout` elapses, checks still pending are cancelled and reported
    /// as timeout errors; completed results are kept.
    pub async fn run_checks_in_parallel(
        &self,
        descriptors: Vec<CheckDescriptor>,
        max_workers: Option<usize>,
        timeout: Option<Duration>,
    ) -> Vec<CheckOutcome> {
        self.run_chunk(descriptors, 0, max_workers, timeout).await
    }

    /// Execute descriptors in consecutive chunks of `batch_size`.
    ///
    /// Each chunk is a full parallel run and must finish before the next one
    /// starts; `timeout` applies to every chunk separately.
    pub async fn run_check_batch(
        &self,
        descriptors: Vec<CheckDescriptor>,
        batch_size: usize,
        max_workers: Option<usize>,
        timeout: Option<Duration>,
    ) -> Vec<CheckOutcome> {
        let batch_size = batch_size.max(1);
        let total = descriptors.len();
        let batch_count = total.div_ceil(batch_size);
        info!(checks = total, batch_size, batches = batch_count, "Starting batch execution");

        let mut outcomes = Vec::with_capacity(total);
        let mut pending = descriptors;
        let mut offset = 0;
        let mut batch_number = 0;

        while !pending.is_empty() {
            let rest = pending.split_off(batch_size.min(pending.len()));
            batch_number += 1;
            let chunk_len = pending.len();
            info!("Processing batch {}/{} ({} checks)", batch_number, batch_count, chunk_len);

            outcomes.extend(self.run_chunk(pending, offset, max_workers, timeout).await);
            offset += chunk_len;
            pending = rest;
        }

        outcomes
    }

    async fn run_chunk(
        &self,
        mut descriptors: Vec<CheckDescriptor>,
        offset: usize,
        max_workers: Option<usize>,
        timeout: Option<Duration>,
    ) -> Vec<CheckOutcome> {
        let total = descriptors.len();
        if total == 0 {
            return Vec::new();
        }

        for (index, descriptor) in descriptors.iter_mut().enumerate() {
            if descriptor.id.is_none() {
                descriptor.id = Some(CheckDescriptor::placeholder_id(offset + index));
            }
        }

        let workers = max_workers.unwrap_or(self.default_workers).max(1);
        let started = Instant::now();
        info!(checks = total, workers, "Starting parallel execution");

        let semaphore = Arc::new(Semaphore::new(workers));
        let mut slots: Vec<Option<CheckResult>> = vec![None; total];
        let mut tasks = JoinSet::new();

        for (index, descriptor) in descriptors.iter().enumerate() {
            let (plugin_type, config) = match descriptor.dispatch_target() {
                Ok((plugin_type, config)) => (plugin_type.to_string(), config.clone()),
                Err(err) => {
                    warn!(check = descriptor.display_id(), error = %err, "Skipping malformed descriptor");
                    slots[index] = Some(err.into_result());
                    continue;
                }
            };

            let registry = Arc::clone(&self.registry);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                // The semaphore is never closed, so acquisition only fails on shutdown
                let _permit = semaphore.acquire_owned().await;
                let result = dispatch::run_check(&registry, &plugin_type, config).await;
                (index, result)
            });
        }

        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        let timed_out = loop {
            let next = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                    Ok(next) => next,
                    Err(_) => break true,
                },
                None => tasks.join_next().await,
            };

            match next {
                None => break false,
                Some(Ok((index, result))) => {
                    debug!(
                        check = descriptors[index].display_id(),
                        status = %result.status(),
                        "Check completed"
                    );
                    slots[index] = Some(result);
                }
                Some(Err(join_error)) => error!(error = %join_error, "Check task failed"),
            }
        };

        if timed_out {
            let pending = slots.iter().filter(|slot| slot.is_none()).count();
            warn!(pending, "Batch deadline reached, cancelling remaining checks");
            tasks.abort_all();
        }

        let outcomes: Vec<CheckOutcome> = descriptors
            .into_iter()
            .zip(slots)
            .map(|(descriptor, slot)| {
                let result = slot.unwrap_or_else(|| match timeout {
                    Some(timeout) if timed_out => DispatchError::Timeout(timeout).into_result(),
                    _ => DispatchError::ExecutionFault {
                        message: "check task ended without a result".into(),
                        error_type: "JoinError".into(),
                    }
                    .into_result(),
                });
                CheckOutcome { descriptor, result }
            })
            .collect();

        let summary = RunSummary::from_outcomes(&outcomes);
        info!(
            total = summary.total,
            success = summary.success,
            warning = summary.warning,
            error = summary.error,
            elapsed = started.elapsed().as_secs_f64(),
            "Parallel execution finished"
        );

        outcomes
    }
}
