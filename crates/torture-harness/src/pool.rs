//! Worker pool that maps a per-unit job over many units.
//!
//! Units sit in a shared work queue; each worker task pops one, runs the
//! job in its own spawned task and sends the result to the driver over a
//! bounded channel. The driver polls that channel with a short timeout and
//! prunes finished workers between polls. The run is complete once every
//! worker has exited and the channel is drained.
//!
//! A panic inside a job is caught at the worker boundary and reported as a
//! [`UnitStatus::Crashed`](crate::UnitStatus::Crashed) result for that unit.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

use crate::cancel::CancelSignal;
use crate::config::HarnessConfig;
use crate::unit::{ExecutionResult, TestUnit};

/// Work performed for one unit.
#[async_trait]
pub trait UnitJob: Send + Sync {
    async fn run(&self, unit: TestUnit) -> ExecutionResult;
}

/// Adapts an async closure into a [`UnitJob`].
pub struct FnJob<F>(pub F);

#[async_trait]
impl<F, Fut> UnitJob for FnJob<F>
where
    F: Fn(TestUnit) -> Fut + Send + Sync,
    Fut: Future<Output = ExecutionResult> + Send,
{
    async fn run(&self, unit: TestUnit) -> ExecutionResult {
        (self.0)(unit).await
    }
}

/// Everything the pool produced.
#[derive(Debug, Default)]
pub struct PoolOutput {
    /// One entry per dispatched unit, in completion order.
    pub results: Vec<ExecutionResult>,
    /// Units never dispatched or abandoned mid-run because of cancellation.
    pub cancelled: Vec<TestUnit>,
}

enum Completion {
    Finished(ExecutionResult),
    Abandoned(TestUnit),
}

type WorkQueue = Arc<Mutex<VecDeque<TestUnit>>>;

/// Fixed-size pool of worker tasks.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    workers: usize,
    poll_interval: Duration,
    progress_every: usize,
    cancel: CancelSignal,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::from_config(&HarnessConfig::default(), CancelSignal::new())
    }
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            ..Self::default()
        }
    }

    pub fn from_config(config: &HarnessConfig, cancel: CancelSignal) -> Self {
        Self {
            workers: config.worker_count().max(1),
            poll_interval: config.poll_interval(),
            progress_every: config.progress_every,
            cancel,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `job` over every unit. Result order is unspecified.
    pub async fn map(&self, job: Arc<dyn UnitJob>, units: Vec<TestUnit>) -> PoolOutput {
        let total = units.len();
        if total == 0 {
            return PoolOutput::default();
        }

        let queue: WorkQueue = Arc::new(Mutex::new(units.into()));
        let worker_count = self.workers.min(total);
        let (result_tx, mut result_rx) = mpsc::channel(worker_count * 2);

        let mut handles: Vec<JoinHandle<()>> = (0..worker_count)
            .map(|id| {
                tokio::spawn(worker_loop(
                    id,
                    queue.clone(),
                    result_tx.clone(),
                    job.clone(),
                    self.cancel.clone(),
                ))
            })
            .collect();
        drop(result_tx);

        info!(units = total, workers = worker_count, "Dispatching units");

        let mut output = PoolOutput {
            results: Vec::with_capacity(total),
            cancelled: Vec::new(),
        };
        loop {
            match tokio::time::timeout(self.poll_interval, result_rx.recv()).await {
                Ok(Some(Completion::Finished(result))) => {
                    output.results.push(result);
                    let done = output.results.len();
                    if self.progress_every > 0 && done % self.progress_every == 0 {
                        info!(completed = done, total = total, "Got test results");
                    }
                }
                Ok(Some(Completion::Abandoned(unit))) => output.cancelled.push(unit),
                // Every worker dropped its sender and the channel is drained.
                Ok(None) => break,
                Err(_) => {
                    handles.retain(|h| !h.is_finished());
                    debug!(alive = handles.len(), "Workers still running");
                }
            }
        }

        for joined in futures::future::join_all(handles).await {
            if let Err(e) = joined {
                warn!(error = %e, "Worker task ended abnormally");
            }
        }

        // Anything left was never dispatched.
        let leftover: Vec<TestUnit> = queue.lock().await.drain(..).collect();
        if self.cancel.is_cancelled() {
            output.cancelled.extend(leftover);
        } else {
            for unit in leftover {
                warn!(unit = %unit.name(), "Unit left undispatched by exited workers");
                output
                    .results
                    .push(ExecutionResult::crashed(unit, "no worker left to run this unit"));
            }
        }

        output
    }
}

async fn worker_loop(
    id: usize,
    queue: WorkQueue,
    results: mpsc::Sender<Completion>,
    job: Arc<dyn UnitJob>,
    cancel: CancelSignal,
) {
    loop {
        if cancel.is_cancelled() {
            break;
        }
        let Some(unit) = queue.lock().await.pop_front() else {
            break;
        };

        let task_job = job.clone();
        let task_unit = unit.clone();
        let mut handle = tokio::spawn(async move { task_job.run(task_unit).await });

        let completion = tokio::select! {
            joined = &mut handle => match joined {
                Ok(result) => Completion::Finished(result),
                Err(e) => {
                    let reason = crash_reason(e);
                    warn!(worker = id, unit = %unit.name(), reason = %reason, "Unit crashed");
                    Completion::Finished(ExecutionResult::crashed(unit, reason))
                }
            },
            _ = cancel.cancelled() => {
                handle.abort();
                Completion::Abandoned(unit)
            }
        };

        if results.send(completion).await.is_err() {
            break;
        }
    }
    debug!(worker = id, "Worker exiting");
}

fn crash_reason(err: JoinError) -> String {
    if !err.is_panic() {
        return format!("unit task ended abnormally: {}", err);
    }
    let payload = err.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    format!("panicked: {}", message)
}
