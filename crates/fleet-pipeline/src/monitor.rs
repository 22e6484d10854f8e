// crates/fleet-pipeline/src/monitor.rs
//
// Job monitoring: polls outstanding training jobs until each reaches a
// terminal state or the batch timeout elapses.
//
// Each poll round queries every pending job concurrently, bounded by
// `max_parallel`. Terminal reports move a job out of the working set.
// Query errors are logged and the job is retried on the next round. When
// the timeout elapses every job still pending becomes `TimedOut`; the
// backend jobs themselves are left running.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};

use fleet_core::error::{FailureKind, FleetError, UnitFailure};
use fleet_core::job::{JobState, JobStatusReport, TrainingJob};
use fleet_core::traits::ComputeBackend;

use crate::records::StageReport;

pub const STAGE: &str = "monitor";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig {
    pub poll_interval: Duration,
    /// Wall-clock budget for the whole batch, measured from the first poll.
    pub timeout: Duration,
    pub max_parallel: usize,
    /// Emit a progress snapshot every N poll rounds. Zero disables snapshots.
    pub progress_every_polls: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            timeout: Duration::from_secs(6 * 60 * 60),
            max_parallel: 16,
            progress_every_polls: 5,
        }
    }
}

/// Counts at one point of a monitoring run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub poll: u32,
    pub elapsed_secs: u64,
    pub completed: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub pending: usize,
}

/// Structured progress stream pushed to an optional observer.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    Started { total: usize },
    Transition { job_name: String, from: JobState, to: JobState },
    PollError { job_name: String, message: String },
    Progress(ProgressSnapshot),
    TimedOut { job_names: Vec<String> },
    Finished(ProgressSnapshot),
}

/// Partition of the monitored jobs. Every input job lands in exactly one list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub polls: u32,
    pub elapsed_secs: u64,
    pub completed: Vec<TrainingJob>,
    /// Jobs the backend reported as failed or canceled.
    pub failed: Vec<TrainingJob>,
    pub timed_out: Vec<TrainingJob>,
    #[serde(default)]
    pub failures: Vec<UnitFailure>,
}

impl MonitorReport {
    pub fn empty() -> Self {
        let now = Utc::now();
        Self {
            started_at: now,
            finished_at: now,
            polls: 0,
            elapsed_secs: 0,
            completed: Vec::new(),
            failed: Vec::new(),
            timed_out: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn total(&self) -> usize {
        self.completed.len() + self.failed.len() + self.timed_out.len()
    }

    pub fn contains(&self, job_name: &str) -> bool {
        self.completed
            .iter()
            .chain(&self.failed)
            .chain(&self.timed_out)
            .any(|j| j.job_name == job_name)
    }
}

impl StageReport for MonitorReport {
    const FILE_NAME: &'static str = "monitoring_result.json";
    const STAGE: &'static str = STAGE;

    fn failures(&self) -> &[UnitFailure] {
        &self.failures
    }
}

/// Polls the compute backend for a batch of jobs.
pub struct JobMonitor {
    backend: Arc<dyn ComputeBackend>,
    config: MonitorConfig,
    events: Option<mpsc::UnboundedSender<MonitorEvent>>,
}

impl JobMonitor {
    pub fn new(backend: Arc<dyn ComputeBackend>, config: MonitorConfig) -> Self {
        Self {
            backend,
            config,
            events: None,
        }
    }

    /// Push structured progress events to `events`. A dropped receiver is ignored.
    pub fn with_events(mut self, events: mpsc::UnboundedSender<MonitorEvent>) -> Self {
        self.events = Some(events);
        self
    }

    fn emit(&self, event: MonitorEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// Monitor `jobs` until every one is terminal or the timeout elapses.
    ///
    /// Jobs are de-duplicated by name. Jobs already terminal on entry are
    /// partitioned without being polled.
    pub async fn monitor(&self, jobs: Vec<TrainingJob>) -> MonitorReport {
        let started_at = Utc::now();
        let start = Instant::now();
        let deadline = start + self.config.timeout;

        let mut report = MonitorReport::empty();
        report.started_at = started_at;

        let mut seen = HashSet::new();
        let mut pending: BTreeMap<String, TrainingJob> = BTreeMap::new();
        for job in jobs {
            if !seen.insert(job.job_name.clone()) {
                tracing::debug!("Monitor: ignoring duplicate job {}", job.job_name);
                continue;
            }
            if job.state.is_terminal() {
                settle(&mut report, job);
            } else {
                pending.insert(job.job_name.clone(), job);
            }
        }

        let total = report.total() + pending.len();
        self.emit(MonitorEvent::Started { total });
        tracing::info!(
            "Monitor: watching {} jobs (interval {:?}, timeout {:?}, max_parallel {})",
            pending.len(),
            self.config.poll_interval,
            self.config.timeout,
            self.config.max_parallel
        );

        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        interval.tick().await;

        while !pending.is_empty() {
            report.polls += 1;
            let timed_out_mid_round = self.poll_round(&mut pending, &mut report, deadline).await;

            if pending.is_empty() {
                break;
            }
            if self.config.progress_every_polls > 0
                && report.polls % self.config.progress_every_polls == 0
            {
                let snapshot = progress(&report, pending.len(), start);
                tracing::info!(
                    "Monitor: poll {} ({}s): {} completed, {} failed, {} pending",
                    snapshot.poll,
                    snapshot.elapsed_secs,
                    snapshot.completed,
                    snapshot.failed,
                    snapshot.pending
                );
                self.emit(MonitorEvent::Progress(snapshot));
            }
            if timed_out_mid_round {
                break;
            }

            tokio::select! {
                biased;
                _ = tokio::time::sleep_until(deadline) => break,
                _ = interval.tick() => {}
            }
        }

        if !pending.is_empty() {
            self.time_out_pending(&mut pending, &mut report, start);
        }

        report.finished_at = Utc::now();
        report.elapsed_secs = start.elapsed().as_secs();
        let snapshot = progress(&report, 0, start);
        self.emit(MonitorEvent::Finished(snapshot));
        tracing::info!(
            "Monitor: finished after {} polls ({}s): {} completed, {} failed, {} timed out",
            report.polls,
            report.elapsed_secs,
            report.completed.len(),
            report.failed.len(),
            report.timed_out.len()
        );
        report
    }

    /// Query every pending job once and apply the results.
    ///
    /// Returns `true` if the deadline passed before all queries answered;
    /// unanswered jobs stay pending.
    async fn poll_round(
        &self,
        pending: &mut BTreeMap<String, TrainingJob>,
        report: &mut MonitorReport,
        deadline: Instant,
    ) -> bool {
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel.max(1)));
        let mut set: JoinSet<(String, Result<JobStatusReport, FleetError>)> = JoinSet::new();

        for job in pending.values() {
            let backend = self.backend.clone();
            let semaphore = semaphore.clone();
            let job_name = job.job_name.clone();
            let handle = job.handle.clone();
            set.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => backend.get_job_status(&handle).await,
                    Err(e) => Err(FleetError::Transient(format!("poll pool closed: {}", e))),
                };
                (job_name, result)
            });
        }

        let mut answers = Vec::with_capacity(pending.len());
        let collected = tokio::time::timeout_at(deadline, async {
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok(answer) => answers.push(answer),
                    Err(e) => tracing::warn!("Monitor: poll task aborted: {}", e),
                }
            }
        })
        .await;
        let timed_out = collected.is_err();
        // Dropping the set aborts queries still outstanding at the deadline.
        drop(set);

        for (job_name, result) in answers {
            match result {
                Ok(status) => self.apply(pending, report, &job_name, &status),
                Err(e) => {
                    tracing::warn!("Monitor: status query for {} failed: {}", job_name, e);
                    self.emit(MonitorEvent::PollError {
                        job_name,
                        message: e.to_string(),
                    });
                }
            }
        }
        timed_out
    }

    fn apply(
        &self,
        pending: &mut BTreeMap<String, TrainingJob>,
        report: &mut MonitorReport,
        job_name: &str,
        status: &JobStatusReport,
    ) {
        let Some(job) = pending.get_mut(job_name) else {
            return;
        };
        let from = job.state;
        match job.apply_report(status) {
            Ok(terminal) => {
                if job.state != from {
                    tracing::info!("Job {}: {} -> {}", job_name, from, job.state);
                    self.emit(MonitorEvent::Transition {
                        job_name: job_name.to_string(),
                        from,
                        to: job.state,
                    });
                }
                if terminal {
                    if let Some(job) = pending.remove(job_name) {
                        settle(report, job);
                    }
                }
            }
            Err(e) => tracing::warn!("Monitor: ignoring status for {}: {}", job_name, e),
        }
    }

    fn time_out_pending(
        &self,
        pending: &mut BTreeMap<String, TrainingJob>,
        report: &mut MonitorReport,
        start: Instant,
    ) {
        let elapsed = start.elapsed().as_secs();
        let names: Vec<String> = pending.keys().cloned().collect();
        tracing::warn!(
            "Monitor: timeout after {}s, {} jobs still pending: {}",
            elapsed,
            names.len(),
            names.join(", ")
        );
        for (_, mut job) in std::mem::take(pending) {
            if let Err(e) = job.time_out(elapsed) {
                tracing::warn!("Monitor: {}", e);
            }
            settle(report, job);
        }
        self.emit(MonitorEvent::TimedOut { job_names: names });
    }
}

/// Place a terminal job into its partition, recording unit failures.
fn settle(report: &mut MonitorReport, job: TrainingJob) {
    match job.state {
        JobState::Completed => report.completed.push(job),
        JobState::TimedOut => {
            report.failures.push(UnitFailure::new(
                &job.unit,
                STAGE,
                FailureKind::TimedOut,
                format!("job {} timed out", job.job_name),
            ));
            report.timed_out.push(job);
        }
        _ => {
            report.failures.push(UnitFailure::new(
                &job.unit,
                STAGE,
                FailureKind::Backend,
                format!(
                    "job {} {}: {}",
                    job.job_name,
                    job.state,
                    job.message.as_deref().unwrap_or("no message")
                ),
            ));
            report.failed.push(job);
        }
    }
}

fn progress(report: &MonitorReport, pending: usize, start: Instant) -> ProgressSnapshot {
    ProgressSnapshot {
        poll: report.polls,
        elapsed_secs: start.elapsed().as_secs(),
        completed: report.completed.len(),
        failed: report.failed.len(),
        timed_out: report.timed_out.len(),
        pending,
    }
}
