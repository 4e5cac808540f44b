//! State change notification dispatcher
//!
//! Transitions hand a [`StateChangeNotice`] to a bounded queue drained by a
//! single worker task. Enqueueing never waits: when the queue is full the
//! notice is dropped and counted. Delivery failures are logged by the worker
//! and never reach the transition that produced the notice.

use journey_core::{Notifier, NodeState, UserId, UserSummary};
use journey_storage::JourneyStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A committed transition to report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChangeNotice {
    pub user_id: UserId,
    pub node_id: String,
    pub from: NodeState,
    pub to: NodeState,
}

impl StateChangeNotice {
    pub fn subject(&self) -> String {
        format!("Node Status Change: {} ({} -> {})", self.node_id, self.from, self.to)
    }

    pub fn body(&self, student_name: &str) -> String {
        format!(
            "Student {} changed node {} status from {} to {}.",
            student_name, self.node_id, self.from, self.to
        )
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// Dispatcher counters.
#[derive(Debug, Default)]
pub struct NotificationMetrics {
    /// Notices accepted into the queue
    pub enqueued: AtomicU64,
    /// Notices dropped because the queue was full or closed
    pub dropped: AtomicU64,
    /// Emails handed to the notifier successfully
    pub sent: AtomicU64,
    /// Emails the notifier rejected
    pub failed: AtomicU64,
}

impl NotificationMetrics {
    pub fn snapshot(&self) -> NotificationSnapshot {
        NotificationSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationSnapshot {
    pub enqueued: u64,
    pub dropped: u64,
    pub sent: u64,
    pub failed: u64,
}

// ============================================================================
// DISPATCHER
// ============================================================================

/// Cheap-to-clone handle onto the notification queue.
#[derive(Debug, Clone)]
pub struct NotificationDispatcher {
    sender: Option<mpsc::Sender<StateChangeNotice>>,
    metrics: Arc<NotificationMetrics>,
}

impl NotificationDispatcher {
    /// A dispatcher that discards every notice. Used when no notifier is configured.
    pub fn disabled() -> Self {
        Self {
            sender: None,
            metrics: Arc::new(NotificationMetrics::default()),
        }
    }

    /// Start the worker task. Must be called from within a tokio runtime.
    ///
    /// The worker exits once every dispatcher clone has been dropped and the
    /// queue is drained.
    pub fn spawn(
        notifier: Arc<dyn Notifier>,
        store: Arc<dyn JourneyStore>,
        capacity: usize,
        recipient: String,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let metrics = Arc::new(NotificationMetrics::default());
        let handle = tokio::spawn(run_worker(rx, notifier, store, recipient, metrics.clone()));
        (
            Self {
                sender: Some(tx),
                metrics,
            },
            handle,
        )
    }

    pub fn is_enabled(&self) -> bool {
        self.sender.is_some()
    }

    /// Queue a notice without waiting. Returns whether it was accepted.
    pub fn notify(&self, notice: StateChangeNotice) -> bool {
        let Some(sender) = &self.sender else {
            return false;
        };
        match sender.try_send(notice) {
            Ok(()) => {
                self.metrics.enqueued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::TrySendError::Full(notice)) => {
                self.metrics.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    user_id = %notice.user_id,
                    node_id = %notice.node_id,
                    "notification queue full, dropping notice"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(notice)) => {
                self.metrics.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    user_id = %notice.user_id,
                    node_id = %notice.node_id,
                    "notification worker stopped, dropping notice"
                );
                false
            }
        }
    }

    pub fn metrics(&self) -> NotificationSnapshot {
        self.metrics.snapshot()
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<StateChangeNotice>,
    notifier: Arc<dyn Notifier>,
    store: Arc<dyn JourneyStore>,
    recipient: String,
    metrics: Arc<NotificationMetrics>,
) {
    tracing::debug!("notification worker started");

    while let Some(notice) = rx.recv().await {
        let student = match store.get_users_by_ids(&[notice.user_id]).await {
            Ok(users) => users
                .into_iter()
                .next()
                .unwrap_or_else(|| UserSummary::unknown(notice.user_id)),
            Err(e) => {
                tracing::warn!(error = %e, user_id = %notice.user_id, "user lookup failed for notification");
                UserSummary::unknown(notice.user_id)
            }
        };

        let subject = notice.subject();
        let body = notice.body(&student.display_name());
        match notifier
            .send_notification_email(&recipient, &subject, &body)
            .await
        {
            Ok(()) => {
                metrics.sent.fetch_add(1, Ordering::Relaxed);
                tracing::info!(subject = %subject, "notification sent");
            }
            Err(e) => {
                metrics.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(error = %e, subject = %subject, "notification delivery failed");
            }
        }
    }

    tracing::debug!("notification worker stopped");
}
