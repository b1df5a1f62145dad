//! Sequential job queue shared by the updater and the downloader.
//!
//! One worker task drains the queue in enqueue order. A job is never queued
//! twice: enqueuing a target that is already pending or running is a no-op.
//! Each job runs in its own task so an error or a panic only fails that job.
//! A source that fails with a transient or challenge error is marked down for
//! the rest of the run and its remaining jobs are skipped.

use crate::error::CoreError;
use crate::metrics::MetricsTracker;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::task::JoinHandle;

/// What a successful job reports back
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobReport {
    /// Human readable name of the item (title name, chapter label)
    pub label: String,
    pub new_chapters: usize,
}

#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    /// Source the target belongs to, `None` if the target no longer exists
    fn source_for(&self, target: i64) -> Option<String>;

    async fn handle(&self, target: i64) -> Result<JobReport, CoreError>;
}

#[derive(Debug, Clone)]
pub struct UpdateJob {
    pub target: i64,
    /// Part of a library-wide run: only noteworthy results are announced
    pub batch: bool,
    pub enqueued_at: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub successes: usize,
    pub failures: usize,
    pub skipped: usize,
    pub new_chapters: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    ItemSucceeded { target: i64, label: String, new_chapters: usize },
    ItemFailed { target: i64, message: String },
    ItemSkipped { target: i64, source_id: String },
    RunFinished(RunSummary),
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification);
}

/// Notifier writing to the log
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: &Notification) {
        match notification {
            Notification::ItemSucceeded { label, new_chapters, .. } => {
                if *new_chapters > 0 {
                    log::info!("{}: {} new chapters", label, new_chapters);
                } else {
                    log::info!("{}: up to date", label);
                }
            }
            Notification::ItemFailed { target, message } => log::warn!("Job {} failed: {}", target, message),
            Notification::ItemSkipped { target, source_id } => {
                log::info!("Job {} skipped, {} is down", target, source_id)
            }
            Notification::RunFinished(s) => log::info!(
                "Run finished: {} succeeded, {} failed, {} skipped, {} new chapters",
                s.successes,
                s.failures,
                s.skipped,
                s.new_chapters
            ),
        }
    }
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<UpdateJob>,
    running: Option<i64>,
    active: bool,
    stop_requested: bool,
    down_sources: HashSet<String>,
    tally: RunSummary,
    saw_batch: bool,
}

pub struct JobQueue<H: JobHandler> {
    name: &'static str,
    handler: Arc<H>,
    notifier: Arc<dyn Notifier>,
    metrics: Arc<MetricsTracker>,
    notify_batch_items: bool,
    state: Arc<Mutex<QueueState>>,
}

impl<H: JobHandler> Clone for JobQueue<H> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            handler: self.handler.clone(),
            notifier: self.notifier.clone(),
            metrics: self.metrics.clone(),
            notify_batch_items: self.notify_batch_items,
            state: self.state.clone(),
        }
    }
}

impl<H: JobHandler> JobQueue<H> {
    pub fn new(
        name: &'static str,
        handler: Arc<H>,
        notifier: Arc<dyn Notifier>,
        metrics: Arc<MetricsTracker>,
        notify_batch_items: bool,
    ) -> Self {
        Self {
            name,
            handler,
            notifier,
            metrics,
            notify_batch_items,
            state: Arc::new(Mutex::new(QueueState::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Queue `target`; returns false if it is already pending or running
    pub fn enqueue(&self, target: i64, batch: bool) -> bool {
        let mut state = self.lock();
        if state.running == Some(target) || state.pending.iter().any(|j| j.target == target) {
            log::debug!("{}: {} already queued", self.name, target);
            return false;
        }
        state.pending.push_back(UpdateJob {
            target,
            batch,
            enqueued_at: Utc::now().timestamp(),
        });
        true
    }

    /// Queue several targets, returning how many were actually added
    pub fn enqueue_many(&self, targets: impl IntoIterator<Item = i64>, batch: bool) -> usize {
        targets.into_iter().filter(|t| self.enqueue(*t, batch)).count()
    }

    /// Drop a pending target; the running job cannot be removed
    pub fn remove(&self, target: i64) -> bool {
        let mut state = self.lock();
        let before = state.pending.len();
        state.pending.retain(|j| j.target != target);
        state.pending.len() != before
    }

    pub fn pending(&self) -> Vec<i64> {
        self.lock().pending.iter().map(|j| j.target).collect()
    }

    pub fn running(&self) -> Option<i64> {
        self.lock().running
    }

    pub fn is_running(&self) -> bool {
        self.lock().active
    }

    /// Start the worker unless one is already draining the queue
    pub fn start(&self) -> Option<JoinHandle<RunSummary>> {
        {
            let mut state = self.lock();
            if state.active {
                return None;
            }
            state.active = true;
            state.stop_requested = false;
            state.down_sources.clear();
            state.tally = RunSummary::default();
            state.saw_batch = false;
        }
        log::info!("{}: worker started", self.name);
        let queue = self.clone();
        Some(tokio::spawn(async move { queue.run().await }))
    }

    /// Ask the worker to stop once the running job is done
    pub fn stop(&self) {
        let mut state = self.lock();
        if state.active {
            state.stop_requested = true;
            log::info!("{}: stop requested", self.name);
        }
    }

    fn next_job(&self) -> Option<UpdateJob> {
        let mut state = self.lock();
        if state.stop_requested {
            state.pending.clear();
        }
        match state.pending.pop_front() {
            Some(job) => {
                state.running = Some(job.target);
                if job.batch {
                    state.saw_batch = true;
                }
                Some(job)
            }
            None => {
                // Decided under the lock so a concurrent enqueue + start cannot be lost
                state.active = false;
                state.running = None;
                state.stop_requested = false;
                None
            }
        }
    }

    async fn run(self) -> RunSummary {
        while let Some(job) = self.next_job() {
            self.process(job).await;
            self.lock().running = None;
        }

        let (summary, saw_batch) = {
            let state = self.lock();
            (state.tally, state.saw_batch)
        };
        if saw_batch {
            self.notifier.notify(&Notification::RunFinished(summary));
        }
        log::info!(
            "{}: worker done ({} ok, {} failed, {} skipped)",
            self.name,
            summary.successes,
            summary.failures,
            summary.skipped
        );
        summary
    }

    async fn process(&self, job: UpdateJob) {
        let source_id = self.handler.source_for(job.target);

        if let Some(source_id) = &source_id {
            let down = self.lock().down_sources.contains(source_id);
            if down {
                self.lock().tally.skipped += 1;
                self.metrics.record_skip(source_id);
                if !job.batch {
                    self.notifier.notify(&Notification::ItemSkipped {
                        target: job.target,
                        source_id: source_id.clone(),
                    });
                }
                return;
            }
        }

        let started = Instant::now();
        let handler = self.handler.clone();
        let target = job.target;
        let outcome = tokio::spawn(async move { handler.handle(target).await }).await;
        let metrics_key = source_id.clone().unwrap_or_else(|| "unknown".to_string());

        match outcome {
            Ok(Ok(report)) => {
                {
                    let mut state = self.lock();
                    state.tally.successes += 1;
                    state.tally.new_chapters += report.new_chapters;
                }
                self.metrics.record_success(&metrics_key, started.elapsed());
                let announce = !job.batch || (self.notify_batch_items && report.new_chapters > 0);
                if announce {
                    self.notifier.notify(&Notification::ItemSucceeded {
                        target: job.target,
                        label: report.label,
                        new_chapters: report.new_chapters,
                    });
                }
            }
            Ok(Err(e)) => {
                log::warn!("{}: job {} failed: {}", self.name, job.target, e);
                {
                    let mut state = self.lock();
                    state.tally.failures += 1;
                    if e.marks_source_down() {
                        if let Some(source_id) = &source_id {
                            log::warn!("{}: marking {} down for this run", self.name, source_id);
                            state.down_sources.insert(source_id.clone());
                        }
                    }
                }
                self.metrics.record_failure(&metrics_key, e.to_string());
                if !job.batch {
                    self.notifier.notify(&Notification::ItemFailed {
                        target: job.target,
                        message: e.user_message().to_string(),
                    });
                }
            }
            Err(join_error) => {
                log::error!("{}: job {} crashed: {}", self.name, job.target, join_error);
                self.lock().tally.failures += 1;
                self.metrics.record_failure(&metrics_key, join_error.to_string());
                if !job.batch {
                    self.notifier.notify(&Notification::ItemFailed {
                        target: job.target,
                        message: "error.unexpected".to_string(),
                    });
                }
            }
        }
    }
}
