use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use ricloud_core::{Error, IntegrityError, Result};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Completion callback, invoked once on the delivering thread.
///
/// It runs before the next frame is processed, so it must not block.
pub type TaskCallback = Box<dyn FnOnce(&Task) + Send + 'static>;

/// Handle to one unit of remote work.
///
/// Handles are cheap to clone; every clone observes the same result.
#[derive(Clone)]
pub struct Task {
    inner: Arc<TaskInner>,
}

struct TaskInner {
    id: String,
    created_at: DateTime<Utc>,
    started: Instant,
    state: Mutex<TaskState>,
    resolved: Condvar,
    callback: Mutex<Option<TaskCallback>>,
}

#[derive(Default)]
struct TaskState {
    result: Option<Bytes>,
    /// Set instead of `result` when the task can never produce one
    failure: Option<IntegrityError>,
    elapsed: Option<Duration>,
}

impl TaskState {
    fn is_settled(&self) -> bool {
        self.result.is_some() || self.failure.is_some()
    }
}

impl Task {
    pub(crate) fn new(id: impl Into<String>, callback: Option<TaskCallback>) -> Self {
        Self {
            inner: Arc::new(TaskInner {
                id: id.into(),
                created_at: Utc::now(),
                started: Instant::now(),
                state: Mutex::new(TaskState::default()),
                resolved: Condvar::new(),
                callback: Mutex::new(callback),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.inner.state.lock().result.is_some()
    }

    /// The result, if it has arrived
    #[must_use]
    pub fn result(&self) -> Option<Bytes> {
        self.inner.state.lock().result.clone()
    }

    /// Why the task failed, if it did
    #[must_use]
    pub fn failure(&self) -> Option<IntegrityError> {
        self.inner.state.lock().failure.clone()
    }

    /// Whether a result or a failure has been recorded
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.inner.state.lock().is_settled()
    }

    /// Time between submission and resolution
    #[must_use]
    pub fn elapsed(&self) -> Option<Duration> {
        self.inner.state.lock().elapsed
    }

    /// Block until the result arrives.
    ///
    /// Returns immediately when the task is already resolved. A failed task
    /// yields [`Error::Integrity`]. With a timeout, fails with
    /// [`Error::Timeout`] once it has passed.
    pub fn wait_for_result(&self, timeout: Option<Duration>) -> Result<Bytes> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.inner.state.lock();

        loop {
            if let Some(result) = &state.result {
                return Ok(result.clone());
            }
            if let Some(failure) = &state.failure {
                return Err(Error::Integrity(failure.clone()));
            }
            match deadline {
                Some(deadline) => {
                    if self
                        .inner
                        .resolved
                        .wait_until(&mut state, deadline)
                        .timed_out()
                        && !state.is_settled()
                    {
                        return Err(Error::timeout(
                            format!("wait for task '{}'", self.inner.id),
                            timeout.unwrap_or_default(),
                        ));
                    }
                }
                None => self.inner.resolved.wait(&mut state),
            }
        }
    }

    /// Store the result and wake waiters. Returns false if a result was
    /// already present, in which case nothing changes.
    pub(crate) fn complete(&self, result: Bytes) -> bool {
        self.settle(|state| state.result = Some(result))
    }

    /// Record a failure and wake waiters. Returns false if the task was
    /// already settled.
    pub(crate) fn fail(&self, failure: IntegrityError) -> bool {
        self.settle(|state| state.failure = Some(failure))
    }

    fn settle(&self, record: impl FnOnce(&mut TaskState)) -> bool {
        let mut state = self.inner.state.lock();
        if state.is_settled() {
            return false;
        }
        record(&mut *state);
        state.elapsed = Some(self.inner.started.elapsed());
        drop(state);

        self.inner.resolved.notify_all();
        true
    }

    /// Run the completion callback, at most once over the task's lifetime
    pub(crate) fn run_callback(&self) {
        let callback = self.inner.callback.lock().take();
        if let Some(callback) = callback {
            callback(self);
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Task")
            .field("id", &self.inner.id)
            .field("created_at", &self.inner.created_at)
            .field("resolved", &state.result.is_some())
            .field("failure", &state.failure)
            .field("elapsed", &state.elapsed)
            .finish()
    }
}
