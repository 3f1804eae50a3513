//! Status events and the routine that applies them.
//!
//! Jobs never write the segmentation status themselves. They publish a
//! [`StatusEvent`] through a [`StatusNotifier`]; a single [`StatusUpdater`]
//! consumes the channel and applies each event through
//! [`SegmentationStore::advance_status`], which only moves forward.

use std::sync::Arc;
use std::time::Duration;

use brainns_core::job_payload::JobCallback;
use brainns_core::status::{SegmentationStatus, StatusChange};
use brainns_core::types::{DbId, JobId};
use tokio::sync::mpsc;

use crate::store::{SegmentationStore, StoreError};

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    /// A job started working on the segmentation.
    Advance {
        segmentation_id: DbId,
        status: SegmentationStatus,
    },
    /// A job reached a terminal state and carried this callback.
    Callback {
        segmentation_id: DbId,
        job_id: JobId,
        action: JobCallback,
    },
}

impl StatusEvent {
    pub fn segmentation_id(&self) -> DbId {
        match self {
            StatusEvent::Advance {
                segmentation_id, ..
            }
            | StatusEvent::Callback {
                segmentation_id, ..
            } => *segmentation_id,
        }
    }

    /// Status the event asks for.
    pub fn target(&self) -> SegmentationStatus {
        match self {
            StatusEvent::Advance { status, .. } => *status,
            StatusEvent::Callback {
                action: JobCallback::MarkDone,
                ..
            } => SegmentationStatus::Done,
            StatusEvent::Callback {
                action: JobCallback::MarkError,
                ..
            } => SegmentationStatus::Error,
        }
    }
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

/// Cloneable publishing side of the status channel.
#[derive(Clone)]
pub struct StatusNotifier {
    sender: mpsc::UnboundedSender<StatusEvent>,
}

/// Create a connected notifier and receiver.
pub fn status_channel() -> (StatusNotifier, mpsc::UnboundedReceiver<StatusEvent>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (StatusNotifier { sender }, receiver)
}

impl StatusNotifier {
    pub fn publish(&self, event: StatusEvent) {
        if self.sender.send(event).is_err() {
            tracing::error!(
                segmentation_id = event.segmentation_id(),
                ?event,
                "Status channel closed, event dropped"
            );
        }
    }

    pub fn advance(&self, segmentation_id: DbId, status: SegmentationStatus) {
        self.publish(StatusEvent::Advance {
            segmentation_id,
            status,
        });
    }

    pub fn callback(&self, segmentation_id: DbId, job_id: JobId, action: JobCallback) {
        self.publish(StatusEvent::Callback {
            segmentation_id,
            job_id,
            action,
        });
    }
}

// ---------------------------------------------------------------------------
// Updater
// ---------------------------------------------------------------------------

/// Retries for transient store failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    /// Delay before the second attempt; doubles for each further one.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            backoff: Duration::from_millis(200),
        }
    }
}

pub struct StatusUpdater {
    store: Arc<dyn SegmentationStore>,
    retry: RetryPolicy,
}

impl StatusUpdater {
    pub fn new(store: Arc<dyn SegmentationStore>) -> Self {
        Self {
            store,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Apply events until every notifier is dropped.
    pub async fn run(self, mut receiver: mpsc::UnboundedReceiver<StatusEvent>) {
        while let Some(event) = receiver.recv().await {
            self.handle(event).await;
        }
        tracing::info!("Status channel closed, updater shutting down");
    }

    /// Apply one event, retrying transient store failures.
    pub async fn apply(&self, event: &StatusEvent) -> Result<StatusChange, StoreError> {
        let segmentation_id = event.segmentation_id();
        let target = event.target();
        let attempts = self.retry.attempts.max(1);
        let mut delay = self.retry.backoff;

        let mut attempt = 1;
        loop {
            match self.store.advance_status(segmentation_id, target).await {
                Ok(change) => return Ok(change),
                Err(e) if e.is_transient() && attempt < attempts => {
                    tracing::warn!(
                        segmentation_id,
                        attempt,
                        error = %e,
                        "Status update failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn handle(&self, event: StatusEvent) {
        let segmentation_id = event.segmentation_id();
        match self.apply(&event).await {
            Ok(StatusChange::Applied { from, to }) => {
                tracing::info!(segmentation_id, %from, %to, "Segmentation status changed");
            }
            Ok(StatusChange::Ignored { current, requested }) => {
                tracing::debug!(
                    segmentation_id,
                    %current,
                    %requested,
                    "Status event ignored"
                );
            }
            Ok(StatusChange::Missing) => {
                tracing::debug!(segmentation_id, ?event, "Status event for deleted segmentation");
            }
            Err(e) => {
                tracing::error!(
                    segmentation_id,
                    ?event,
                    error = %e,
                    "Failed to apply status event"
                );
            }
        }
    }
}
