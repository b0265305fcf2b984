//! Submission API
//!
//! [`ValidationService`] owns the broadcaster and the registry of known
//! runs. `start_run` returns immediately with a run id; the pipeline runs on
//! its own task and its outcome is published through a `watch` channel.
//!
//! Submitting a request whose digest matches a run that is still live or
//! completed returns that run's id instead of starting another. A request
//! whose earlier run failed or was cancelled starts fresh.
//!
//! Finished runs are held in memory for the run retention window, then
//! retired. Status reads for a retired run are rebuilt from the store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tribunal_llm::TextGenerator;
use tribunal_state::{AnalysisStore, ContentDigest, RunId, StorageError};

use crate::broadcast::{Broadcaster, Subscription};
use crate::config::PipelineConfig;
use crate::domain::error::{Result, StageError, TribunalError};
use crate::domain::event::StatusEvent;
use crate::domain::report::ValidationReport;
use crate::domain::request::ValidationRequest;
use crate::domain::run::{Run, RunStatus, StageKind};
use crate::extract::FindingExtractor;
use crate::pipeline::{Pipeline, RunCell};
use crate::recording::load_run;

/// Terminal result of a run, as seen by waiters.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed(Box<ValidationReport>),
    Failed {
        stage: StageKind,
        tokens_consumed: u64,
        retry_safe: bool,
        error: StageError,
    },
    Cancelled {
        tokens_consumed: u64,
    },
    Aborted {
        reason: String,
    },
}

impl RunOutcome {
    fn from_result(result: Result<ValidationReport>) -> Self {
        match result {
            Ok(report) => RunOutcome::Completed(Box::new(report)),
            Err(TribunalError::RunFatal {
                stage,
                tokens_consumed,
                retry_safe,
                source,
                ..
            }) => RunOutcome::Failed {
                stage,
                tokens_consumed,
                retry_safe,
                error: source,
            },
            Err(TribunalError::Cancelled {
                tokens_consumed, ..
            }) => RunOutcome::Cancelled { tokens_consumed },
            Err(other) => RunOutcome::Aborted {
                reason: other.to_string(),
            },
        }
    }

    /// The report, or the error describing why there is none.
    pub fn into_result(self, run_id: &RunId) -> Result<ValidationReport> {
        match self {
            RunOutcome::Completed(report) => Ok(*report),
            RunOutcome::Failed {
                stage,
                tokens_consumed,
                retry_safe,
                error,
            } => Err(TribunalError::RunFatal {
                run_id: run_id.clone(),
                stage,
                tokens_consumed,
                retry_safe,
                source: error,
            }),
            RunOutcome::Cancelled { tokens_consumed } => Err(TribunalError::Cancelled {
                run_id: run_id.clone(),
                tokens_consumed,
            }),
            RunOutcome::Aborted { reason } => Err(TribunalError::Aborted {
                run_id: run_id.clone(),
                reason,
            }),
        }
    }
}

struct RunHandle {
    cell: Arc<RunCell>,
    cancel: CancellationToken,
    outcome: watch::Receiver<Option<RunOutcome>>,
    settled_at: Option<Instant>,
}

#[derive(Default)]
struct Registry {
    runs: HashMap<RunId, RunHandle>,
    by_digest: HashMap<ContentDigest, RunId>,
}

impl Registry {
    /// A run for this digest that should be reused rather than restarted.
    fn reusable(&self, digest: &ContentDigest) -> Option<RunId> {
        let run_id = self.by_digest.get(digest)?;
        let handle = self.runs.get(run_id)?;
        let status = handle.cell.snapshot().status;
        matches!(
            status,
            RunStatus::Pending | RunStatus::Running | RunStatus::Completed
        )
        .then(|| run_id.clone())
    }

    /// Drop runs that settled more than `retention` ago, with their digests.
    /// Returns how many were dropped.
    fn retire(&mut self, retention: Duration) -> usize {
        let before = self.runs.len();
        self.runs
            .retain(|_, h| h.settled_at.map_or(true, |at| at.elapsed() < retention));
        let runs = &self.runs;
        self.by_digest.retain(|_, run_id| runs.contains_key(run_id));
        before - self.runs.len()
    }
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Retire settled runs every `interval` until `cancel` fires.
fn spawn_retirer(
    registry: Arc<Mutex<Registry>>,
    retention: Duration,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let retired = lock(&registry).retire(retention);
                    if retired > 0 {
                        debug!(retired, "retired settled runs");
                    }
                }
            }
        }
    })
}

/// Entry point for submitting and observing runs. Create one per process.
///
/// Must be constructed inside a Tokio runtime: it spawns the broadcaster's
/// channel reaper and the run retirer.
pub struct ValidationService {
    pipeline: Arc<Pipeline>,
    broadcaster: Arc<Broadcaster>,
    store: Arc<dyn AnalysisStore>,
    registry: Arc<Mutex<Registry>>,
    shutdown: CancellationToken,
    reaper: JoinHandle<()>,
    retirer: JoinHandle<()>,
}

impl ValidationService {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        store: Arc<dyn AnalysisStore>,
        extractor: FindingExtractor,
        config: PipelineConfig,
    ) -> Self {
        let broadcaster = Arc::new(Broadcaster::new(
            config.subscriber_capacity,
            config.retention_grace(),
        ));
        let shutdown = CancellationToken::new();
        let reap_every = config.retention_grace().max(Duration::from_secs(1));
        let reaper = broadcaster.spawn_reaper(reap_every, shutdown.child_token());
        let registry = Arc::new(Mutex::new(Registry::default()));
        let retirer = spawn_retirer(
            Arc::clone(&registry),
            config.run_retention(),
            reap_every,
            shutdown.child_token(),
        );
        let pipeline = Pipeline::new(
            generator,
            Arc::new(extractor),
            Arc::clone(&store),
            Arc::clone(&broadcaster),
            Arc::new(config),
        );
        Self {
            pipeline: Arc::new(pipeline),
            broadcaster,
            store,
            registry,
            shutdown,
            reaper,
            retirer,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        lock(&self.registry)
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    /// Validate and submit `request`; returns the id of the run serving it.
    pub fn start_run(&self, request: ValidationRequest) -> Result<RunId> {
        request.validate()?;
        let digest = request.digest()?;

        let mut registry = self.lock();
        if let Some(existing) = registry.reusable(&digest) {
            debug!(run_id = %existing, digest = digest.short(), "request already submitted");
            return Ok(existing);
        }

        let run_id = RunId::new();
        let cell = Arc::new(RunCell::new(Run::new(run_id.clone())));
        let cancel = self.shutdown.child_token();
        let (outcome_tx, outcome_rx) = watch::channel(None);
        self.broadcaster.open(&run_id);
        registry.runs.insert(
            run_id.clone(),
            RunHandle {
                cell: Arc::clone(&cell),
                cancel: cancel.clone(),
                outcome: outcome_rx,
                settled_at: None,
            },
        );
        registry.by_digest.insert(digest.clone(), run_id.clone());
        drop(registry);

        info!(run_id = %run_id, digest = digest.short(), "run submitted");
        let pipeline = Arc::clone(&self.pipeline);
        let registry = Arc::clone(&self.registry);
        let settled_id = run_id.clone();
        tokio::spawn(async move {
            let result = pipeline.run(&request, digest, &cell, &cancel).await;
            // Nobody waiting is fine; the status query still has the run.
            let _ = outcome_tx.send(Some(RunOutcome::from_result(result)));
            if let Some(handle) = lock(&registry).runs.get_mut(&settled_id) {
                handle.settled_at = Some(Instant::now());
            }
        });
        Ok(run_id)
    }

    /// Point-in-time copy of the run. Retired runs are rebuilt from the store.
    pub async fn run_status(&self, run_id: &RunId) -> Result<Run> {
        let live = self.lock().runs.get(run_id).map(|h| h.cell.snapshot());
        if let Some(run) = live {
            return Ok(run);
        }
        load_run(self.store.as_ref(), run_id)
            .await
            .map_err(|err| match err {
                StorageError::RunNotFound { .. } => TribunalError::RunNotFound(run_id.clone()),
                other => TribunalError::Storage(other),
            })
    }

    /// Runs currently held in memory, live or within retention.
    pub fn tracked_runs(&self) -> usize {
        self.lock().runs.len()
    }

    /// Request cancellation. Takes effect at the next stage or attempt boundary.
    pub fn cancel_run(&self, run_id: &RunId) -> Result<()> {
        let registry = self.lock();
        let handle = registry
            .runs
            .get(run_id)
            .ok_or_else(|| TribunalError::RunNotFound(run_id.clone()))?;
        handle.cancel.cancel();
        info!(run_id = %run_id, "cancellation requested");
        Ok(())
    }

    pub fn subscribe(&self, run_id: &RunId) -> Result<Subscription> {
        self.broadcaster
            .subscribe(run_id)
            .ok_or_else(|| TribunalError::RunNotFound(run_id.clone()))
    }

    pub fn last_event(&self, run_id: &RunId) -> Option<StatusEvent> {
        self.broadcaster.last_event(run_id)
    }

    /// The outcome if the run has finished, without waiting.
    pub fn outcome(&self, run_id: &RunId) -> Option<RunOutcome> {
        self.lock()
            .runs
            .get(run_id)
            .and_then(|h| h.outcome.borrow().clone())
    }

    /// Wait for the run to finish and return its report.
    pub async fn wait(&self, run_id: &RunId) -> Result<ValidationReport> {
        let mut outcome = self
            .lock()
            .runs
            .get(run_id)
            .map(|h| h.outcome.clone())
            .ok_or_else(|| TribunalError::RunNotFound(run_id.clone()))?;

        let finished = outcome
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|o| o.clone());
        match finished {
            Some(outcome) => outcome.into_result(run_id),
            None => Err(TribunalError::Aborted {
                run_id: run_id.clone(),
                reason: "pipeline task exited without reporting".to_string(),
            }),
        }
    }

    /// Cancel every live run, wait for each to settle, then drop all channels.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let ids: Vec<RunId> = self.lock().runs.keys().cloned().collect();
        for run_id in &ids {
            let _ = self.wait(run_id).await;
        }
        self.reaper.abort();
        self.retirer.abort();
        self.broadcaster.shutdown();
        info!(runs = ids.len(), "validation service shut down");
    }
}

impl Drop for ValidationService {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
