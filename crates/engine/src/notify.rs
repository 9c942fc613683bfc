//! Lifecycle notifications for external observers.
//!
//! Delivery is fire-and-forget, in-process and synchronous with the engine:
//! an [`Observer`] should return quickly. Nothing here affects scheduling.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::models::JobId;
use crate::run::{JobRunState, RunStatus, StepState};

/// Something that happened during a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    WorkflowStart {
        run_id: Uuid,
        workflow: String,
        event: String,
    },
    WorkflowComplete {
        run_id: Uuid,
        workflow: String,
        status: RunStatus,
    },
    JobStart {
        run_id: Uuid,
        job: JobId,
    },
    JobComplete {
        run_id: Uuid,
        job: JobId,
        state: JobRunState,
    },
    StepStart {
        run_id: Uuid,
        job: JobId,
        step: String,
    },
    StepComplete {
        run_id: Uuid,
        job: JobId,
        step: String,
        state: StepState,
    },
    StepError {
        run_id: Uuid,
        job: JobId,
        step: String,
        error: String,
    },
}

impl LifecycleEvent {
    pub fn run_id(&self) -> Uuid {
        match self {
            Self::WorkflowStart { run_id, .. }
            | Self::WorkflowComplete { run_id, .. }
            | Self::JobStart { run_id, .. }
            | Self::JobComplete { run_id, .. }
            | Self::StepStart { run_id, .. }
            | Self::StepComplete { run_id, .. }
            | Self::StepError { run_id, .. } => *run_id,
        }
    }
}

/// Receives every [`LifecycleEvent`] of every run of one engine.
pub trait Observer: Send + Sync {
    fn on_event(&self, event: &LifecycleEvent);
}

/// Fans events out to the registered observers.
#[derive(Clone, Default)]
pub struct Notifier {
    observers: Vec<Arc<dyn Observer>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, observer: Arc<dyn Observer>) {
        self.observers.push(observer);
    }

    pub fn emit(&self, event: LifecycleEvent) {
        for observer in &self.observers {
            observer.on_event(&event);
        }
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("observers", &self.observers.len())
            .finish()
    }
}

/// Re-publishes events on a `tokio::sync::broadcast` channel.
///
/// Publishing with no live receiver is a no-op; slow receivers lag and lose
/// the oldest events.
#[derive(Debug, Clone)]
pub struct BroadcastObserver {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl BroadcastObserver {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }
}

impl Observer for BroadcastObserver {
    fn on_event(&self, event: &LifecycleEvent) {
        let _ = self.sender.send(event.clone());
    }
}

/// Logs every event at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogObserver;

impl Observer for LogObserver {
    fn on_event(&self, event: &LifecycleEvent) {
        debug!(run_id = %event.run_id(), ?event, "lifecycle event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<LifecycleEvent>>);

    impl Observer for Recorder {
        fn on_event(&self, event: &LifecycleEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    fn job_start() -> LifecycleEvent {
        LifecycleEvent::JobStart {
            run_id: Uuid::nil(),
            job: "build".into(),
        }
    }

    #[test]
    fn emit_reaches_every_observer() {
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());
        let mut notifier = Notifier::new();
        notifier.subscribe(first.clone());
        notifier.subscribe(second.clone());

        notifier.emit(job_start());

        assert_eq!(first.0.lock().unwrap().as_slice(), [job_start()]);
        assert_eq!(second.0.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn broadcast_delivers_to_receivers() {
        let observer = BroadcastObserver::new(8);
        let mut rx = observer.subscribe();

        observer.on_event(&job_start());

        assert_eq!(rx.recv().await.unwrap(), job_start());
    }

    #[test]
    fn broadcast_without_receivers_is_noop() {
        BroadcastObserver::new(1).on_event(&job_start());
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(job_start()).unwrap();
        assert_eq!(json["type"], "job_start");
        assert_eq!(json["job"], "build");
    }
}
