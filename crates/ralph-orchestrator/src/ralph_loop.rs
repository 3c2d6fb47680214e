//! The Ralph loop: poll, group, dispatch, collect, decide
//!
//! Each round fetches the ready beads, partitions them into cohorts and runs
//! one task per bead under a global concurrency cap. A task claims its bead
//! and, if the claim is won, runs the agent session. The round ends when every
//! task has reported; partial failure simply means the next round sees those
//! beads again.

use crate::aggregate::{aggregate, FatalPolicy};
use crate::cohort::{cohort_names, group_by_cohort};
use ralph_agent::SessionRunner;
use ralph_core::{Bead, ClaimConfig, ExecutionResult, FailureKind, RalphConfig, RalphError, Result};
use ralph_tracker::{find_ready_beads, Claimer, TrackerExecutor};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How a loop that was neither cancelled nor aborted ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopOutcome {
    /// The tracker had no ready work left; `rounds` counts rounds that dispatched beads
    Completed { rounds: usize },
}

/// Loop position; data for the next step travels in the variant
enum RoundState {
    Polling,
    Dispatching(Vec<Bead>),
    Collecting(Round),
    Deciding(Vec<ExecutionResult>),
    Done,
    Fatal(RalphError),
}

impl RoundState {
    fn name(&self) -> &'static str {
        match self {
            Self::Polling => "polling",
            Self::Dispatching(_) => "dispatching",
            Self::Collecting(_) => "collecting",
            Self::Deciding(_) => "deciding",
            Self::Done => "done",
            Self::Fatal(_) => "fatal",
        }
    }
}

/// Tasks in flight for one round
struct Round {
    tasks: JoinSet<()>,
    results: mpsc::Receiver<(String, ExecutionResult)>,
    /// Dispatched beads that have not reported yet
    pending: BTreeSet<String>,
}

impl Round {
    /// Wait for every task, then drain the channel
    async fn collect(mut self) -> Vec<ExecutionResult> {
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                error!("Bead task ended abnormally: {}", e);
            }
        }

        // All senders are gone once every task has finished
        let mut results = Vec::with_capacity(self.pending.len());
        while let Some((bead_id, result)) = self.results.recv().await {
            self.pending.remove(&bead_id);
            results.push(result);
        }

        for bead_id in self.pending {
            results.push(ExecutionResult::failed(
                bead_id,
                FailureKind::Execution,
                "bead task ended without reporting a result",
            ));
        }

        results
    }
}

/// Everything one bead task needs, owned so the task can be spawned
struct BeadTask<T, R> {
    claimer: Arc<Claimer<Arc<T>>>,
    runner: Arc<R>,
    semaphore: Arc<Semaphore>,
    claim_config: ClaimConfig,
    cancel: CancellationToken,
    results: mpsc::Sender<(String, ExecutionResult)>,
}

impl<T: TrackerExecutor, R: SessionRunner> BeadTask<T, R> {
    async fn run(self, bead: Bead) {
        let result = self.execute(&bead).await;
        // The receiver outlives every task of its round
        let _ = self.results.send((bead.id, result)).await;
    }

    async fn execute(&self, bead: &Bead) -> ExecutionResult {
        let _permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                return ExecutionResult::failed(
                    &bead.id,
                    FailureKind::Cancelled,
                    "cancelled before a session slot was free",
                );
            }
            permit = self.semaphore.acquire() => match permit {
                Ok(permit) => permit,
                Err(e) => {
                    return ExecutionResult::failed(
                        &bead.id,
                        FailureKind::Execution,
                        format!("session slot unavailable: {}", e),
                    );
                }
            },
        };

        match self
            .claimer
            .claim(&bead.id, &self.claim_config, &self.cancel)
            .await
        {
            Ok(()) => {}
            Err(RalphError::AlreadyClaimed) => return ExecutionResult::skipped(&bead.id),
            Err(e) if e.is_cancelled() => {
                return ExecutionResult::failed(&bead.id, FailureKind::Cancelled, e.to_string());
            }
            Err(e) => {
                warn!("Could not claim bead {}: {}", bead.id, e);
                return ExecutionResult::failed(&bead.id, FailureKind::Claim, e.to_string());
            }
        }

        self.runner.run(bead, &self.cancel).await
    }
}

/// Orchestration loop over a tracker and a session runner
pub struct RalphLoop<T, R> {
    claimer: Arc<Claimer<Arc<T>>>,
    runner: Arc<R>,
    semaphore: Arc<Semaphore>,
    claim_config: ClaimConfig,
    work_kinds: Vec<String>,
    poll_interval: Duration,
    policy: FatalPolicy,
}

impl<T, R> RalphLoop<T, R>
where
    T: TrackerExecutor + 'static,
    R: SessionRunner + 'static,
{
    /// Build a loop, rejecting configuration that could never make progress
    pub fn new(config: &RalphConfig, tracker: T, runner: R) -> Result<Self> {
        config.validate()?;
        let sessions = config.ralph.max_parallel_sessions;
        if sessions > Semaphore::MAX_PERMITS {
            return Err(RalphError::Config(format!(
                "ralph.max_parallel_sessions must be at most {}, got {}",
                Semaphore::MAX_PERMITS,
                sessions
            )));
        }

        Ok(Self {
            claimer: Arc::new(Claimer::new(Arc::new(tracker))),
            runner: Arc::new(runner),
            semaphore: Arc::new(Semaphore::new(sessions)),
            claim_config: config.claim_config(),
            work_kinds: config.tracker.work_kinds.clone(),
            poll_interval: config.ralph.poll_interval,
            policy: FatalPolicy::from_settings(&config.fatal),
        })
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Run rounds until the tracker has no ready work
    ///
    /// Returns `Err(RalphError::Cancelled)` when the token fires (checked at
    /// the top of every round, so a token cancelled up front makes no tracker
    /// calls), `Err(RalphError::Fatal { .. })` when the fatal policy escalates
    /// a failure, and any tracker error raised while polling.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<LoopOutcome> {
        let mut rounds = 0usize;
        let mut state = RoundState::Polling;

        loop {
            debug!("Loop state: {}", state.name());

            state = match state {
                RoundState::Polling => {
                    if cancel.is_cancelled() {
                        info!("Cancellation requested, stopping loop");
                        return Err(RalphError::Cancelled);
                    }

                    info!("=== Polling for ready beads (round {}) ===", rounds + 1);
                    let beads = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(RalphError::Cancelled),
                        beads = find_ready_beads(self.claimer.executor(), &self.work_kinds) => beads?,
                    };

                    if beads.is_empty() {
                        RoundState::Done
                    } else {
                        RoundState::Dispatching(beads)
                    }
                }

                RoundState::Dispatching(beads) => {
                    rounds += 1;
                    RoundState::Collecting(self.dispatch(beads, cancel))
                }

                RoundState::Collecting(round) => RoundState::Deciding(round.collect().await),

                RoundState::Deciding(results) => {
                    let summary = aggregate(&results, &self.policy);

                    match summary.fatal {
                        Some(fatal) => RoundState::Fatal(fatal),
                        None => {
                            // Only a round that moved work forward polls again at once
                            if !summary.all_succeeded || summary.succeeded == 0 {
                                debug!("Waiting {:?} before the next poll", self.poll_interval);
                                tokio::select! {
                                    biased;
                                    _ = cancel.cancelled() => return Err(RalphError::Cancelled),
                                    _ = tokio::time::sleep(self.poll_interval) => {}
                                }
                            }
                            RoundState::Polling
                        }
                    }
                }

                RoundState::Done => {
                    info!("No ready beads left, loop complete after {} round(s)", rounds);
                    return Ok(LoopOutcome::Completed { rounds });
                }

                RoundState::Fatal(err) => {
                    error!("Stopping loop: {}", err);
                    return Err(err);
                }
            };
        }
    }

    /// Spawn one task per bead across all cohorts
    fn dispatch(&self, beads: Vec<Bead>, cancel: &CancellationToken) -> Round {
        let cohorts = group_by_cohort(beads);
        let total: usize = cohorts.iter().map(|c| c.len()).sum();
        info!(
            "Dispatching {} bead(s) across {} cohort(s): {}",
            total,
            cohorts.len(),
            cohort_names(&cohorts).join(", ")
        );

        // Capacity for every result, so no task ever blocks on send
        let (tx, rx) = mpsc::channel(total.max(1));
        let mut tasks = JoinSet::new();
        let mut pending = BTreeSet::new();

        for cohort in cohorts {
            debug!("Cohort {}: {} bead(s)", cohort.key, cohort.len());
            for bead in cohort.beads {
                pending.insert(bead.id.clone());
                let task = BeadTask {
                    claimer: Arc::clone(&self.claimer),
                    runner: Arc::clone(&self.runner),
                    semaphore: Arc::clone(&self.semaphore),
                    claim_config: self.claim_config,
                    cancel: cancel.clone(),
                    results: tx.clone(),
                };
                tasks.spawn(task.run(bead));
            }
        }

        Round {
            tasks,
            results: rx,
            pending,
        }
    }
}
