use async_trait::async_trait;
use rust_manga_reader::error::{CoreError, SourceError};
use rust_manga_reader::metrics::MetricsTracker;
use rust_manga_reader::queue::{JobHandler, JobQueue, JobReport, Notification, Notifier, RunSummary};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Targets below 100 belong to `alpha`, the rest to `beta`.
/// Target 13 panics, targets ending in 99 fail transiently, targets ending in
/// 98 find an unexpected page layout, target 50 blocks until released.
#[derive(Default)]
struct FakeHandler {
    handled: Mutex<Vec<i64>>,
    started: Notify,
    release: Notify,
}

#[async_trait]
impl JobHandler for FakeHandler {
    fn source_for(&self, target: i64) -> Option<String> {
        Some(if target < 100 { "alpha" } else { "beta" }.to_string())
    }

    async fn handle(&self, target: i64) -> Result<JobReport, CoreError> {
        self.handled.lock().unwrap().push(target);
        if target == 50 {
            self.started.notify_one();
            self.release.notified().await;
        }
        if target == 13 {
            panic!("handler blew up");
        }
        if target % 100 == 99 {
            return Err(CoreError::Source(SourceError::Transient("503".to_string())));
        }
        if target % 100 == 98 {
            return Err(CoreError::Source(SourceError::Layout("chapter list missing".to_string())));
        }
        Ok(JobReport {
            label: format!("Title {}", target),
            new_chapters: (target % 10) as usize,
        })
    }
}

#[derive(Default)]
struct RecordingNotifier {
    seen: Mutex<Vec<Notification>>,
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: &Notification) {
        self.seen.lock().unwrap().push(notification.clone());
    }
}

fn queue(notify_batch_items: bool) -> (JobQueue<FakeHandler>, Arc<FakeHandler>, Arc<RecordingNotifier>) {
    let handler = Arc::new(FakeHandler::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let queue = JobQueue::new(
        "test",
        handler.clone(),
        notifier.clone(),
        Arc::new(MetricsTracker::new()),
        notify_batch_items,
    );
    (queue, handler, notifier)
}

#[tokio::test]
async fn test_enqueue_deduplicates() {
    let (queue, _, _) = queue(false);
    assert!(queue.enqueue(1, false));
    assert!(!queue.enqueue(1, true));
    assert!(queue.enqueue(2, false));
    assert_eq!(queue.pending(), vec![1, 2]);

    assert!(queue.remove(1));
    assert!(!queue.remove(1));
    assert_eq!(queue.pending(), vec![2]);
}

#[tokio::test]
async fn test_jobs_run_in_order() {
    let (queue, handler, notifier) = queue(false);
    queue.enqueue_many([3, 1, 2], false);

    let summary = queue.start().expect("worker").await.expect("join");

    assert_eq!(*handler.handled.lock().unwrap(), vec![3, 1, 2]);
    assert_eq!(
        summary,
        RunSummary {
            successes: 3,
            failures: 0,
            skipped: 0,
            new_chapters: 6
        }
    );
    assert_eq!(notifier.seen.lock().unwrap().len(), 3);
    assert!(!queue.is_running());
}

#[tokio::test]
async fn test_panicking_job_only_fails_itself() {
    let (queue, handler, notifier) = queue(false);
    queue.enqueue_many([1, 13, 2], false);

    let summary = queue.start().expect("worker").await.expect("join");

    assert_eq!(*handler.handled.lock().unwrap(), vec![1, 13, 2]);
    assert_eq!(summary.successes, 2);
    assert_eq!(summary.failures, 1);
    assert!(notifier.seen.lock().unwrap().contains(&Notification::ItemFailed {
        target: 13,
        message: "error.unexpected".to_string(),
    }));
}

#[tokio::test]
async fn test_down_source_is_skipped_for_the_run() {
    let (queue, handler, notifier) = queue(false);
    queue.enqueue_many([199, 101, 1, 102], false);

    let summary = queue.start().expect("worker").await.expect("join");

    assert_eq!(*handler.handled.lock().unwrap(), vec![199, 1]);
    assert_eq!(summary.failures, 1);
    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.successes, 1);

    let seen = notifier.seen.lock().unwrap();
    assert!(seen.contains(&Notification::ItemFailed {
        target: 199,
        message: "error.source_unavailable".to_string(),
    }));
    assert!(seen.contains(&Notification::ItemSkipped {
        target: 101,
        source_id: "beta".to_string(),
    }));
}

#[tokio::test]
async fn test_layout_failure_marks_source_down() {
    let (queue, handler, notifier) = queue(false);
    queue.enqueue_many([198, 103, 2], false);

    let summary = queue.start().expect("worker").await.expect("join");

    assert_eq!(*handler.handled.lock().unwrap(), vec![198, 2]);
    assert_eq!(summary.failures, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.successes, 1);
    assert!(notifier.seen.lock().unwrap().contains(&Notification::ItemFailed {
        target: 198,
        message: "error.source_changed".to_string(),
    }));
}

#[tokio::test]
async fn test_down_sources_reset_between_runs() {
    let (queue, handler, _) = queue(false);
    queue.enqueue_many([199, 101], false);
    queue.start().expect("worker").await.expect("join");

    queue.enqueue(102, false);
    let summary = queue.start().expect("worker").await.expect("join");

    assert_eq!(summary.successes, 1);
    assert_eq!(*handler.handled.lock().unwrap(), vec![199, 102]);
}

#[tokio::test]
async fn test_batch_run_announces_summary() {
    let (queue, _, notifier) = queue(true);
    queue.enqueue_many([10, 3, 99], true);

    let summary = queue.start().expect("worker").await.expect("join");

    let seen = notifier.seen.lock().unwrap();
    assert_eq!(
        *seen,
        vec![
            Notification::ItemSucceeded {
                target: 3,
                label: "Title 3".to_string(),
                new_chapters: 3,
            },
            Notification::RunFinished(summary),
        ]
    );
    assert_eq!(summary.failures, 1);
}

#[tokio::test]
async fn test_quiet_batch_only_reports_summary() {
    let (queue, _, notifier) = queue(false);
    queue.enqueue_many([3, 4], true);

    let summary = queue.start().expect("worker").await.expect("join");

    assert_eq!(*notifier.seen.lock().unwrap(), vec![Notification::RunFinished(summary)]);
}

#[tokio::test]
async fn test_stop_finishes_running_job_and_drops_the_rest() {
    let (queue, handler, _) = queue(false);
    queue.enqueue_many([50, 1, 2], false);

    let worker = queue.start().expect("worker");
    assert!(queue.start().is_none());

    handler.started.notified().await;
    assert_eq!(queue.running(), Some(50));
    assert!(!queue.enqueue(50, false));

    queue.stop();
    handler.release.notify_one();
    let summary = worker.await.expect("join");

    assert_eq!(summary.successes, 1);
    assert_eq!(*handler.handled.lock().unwrap(), vec![50]);
    assert!(queue.pending().is_empty());
    assert!(!queue.is_running());
}
