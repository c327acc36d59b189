//! Progress reporting and cancellation
//!
//! A [`Progress`] token is threaded through every long operation. Clones
//! share the same cancellation flag, so a handle given to a signal handler
//! or another thread can stop a running reconciliation between resources.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::error::{TargetError, TargetResult};

/// Events emitted while an operation runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// A task started; `total` is the expected units of work if known
    Begin { task: String, total: Option<usize> },
    /// Work moved on to a named resource
    Subtask(String),
    /// Units of work completed
    Worked(usize),
    /// The task finished
    Done,
}

type Sink = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Cancellable progress token
#[derive(Clone)]
pub struct Progress {
    canceled: Arc<AtomicBool>,
    sink: Option<Sink>,
}

impl Progress {
    /// A token that only tracks cancellation
    pub fn new() -> Self {
        Self {
            canceled: Arc::new(AtomicBool::new(false)),
            sink: None,
        }
    }

    /// A token that forwards events to `sink`
    pub fn with_sink<F>(sink: F) -> Self
    where
        F: Fn(&ProgressEvent) + Send + Sync + 'static,
    {
        Self {
            canceled: Arc::new(AtomicBool::new(false)),
            sink: Some(Arc::new(sink)),
        }
    }

    /// A token sharing this one's cancellation flag but reporting to `sink`
    pub fn observe<F>(&self, sink: F) -> Self
    where
        F: Fn(&ProgressEvent) + Send + Sync + 'static,
    {
        Self {
            canceled: Arc::clone(&self.canceled),
            sink: Some(Arc::new(sink)),
        }
    }

    /// Request cancellation; observed at the next boundary check
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    /// Fail with [`TargetError::Canceled`] if cancellation was requested
    pub fn check_canceled(&self) -> TargetResult<()> {
        if self.is_canceled() {
            debug!("cancellation observed");
            Err(TargetError::Canceled)
        } else {
            Ok(())
        }
    }

    pub fn begin(&self, task: &str, total: Option<usize>) {
        self.emit(ProgressEvent::Begin {
            task: task.to_string(),
            total,
        });
    }

    pub fn subtask(&self, name: &str) {
        self.emit(ProgressEvent::Subtask(name.to_string()));
    }

    pub fn worked(&self, units: usize) {
        self.emit(ProgressEvent::Worked(units));
    }

    pub fn done(&self) {
        self.emit(ProgressEvent::Done);
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(ref sink) = self.sink {
            sink(&event);
        }
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Progress")
            .field("canceled", &self.is_canceled())
            .field("sink", &self.sink.is_some())
            .finish()
    }
}
