//! Correlation table between submitted task ids and their results

use bytes::Bytes;
use indexmap::IndexMap;
use lru::LruCache;
use parking_lot::{Condvar, Mutex};
use ricloud_core::{Error, IntegrityError, Result};
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use crate::task::{Task, TaskCallback};

const DEFAULT_RECENT_CAPACITY: usize = 1024;
const DEFAULT_UNCLAIMED_CAPACITY: usize = 256;
const DEFAULT_UNCLAIMED_GRACE: Duration = Duration::from_secs(1);

/// Tuning for [`TaskRegistry`]
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    /// Resolved tasks kept so a late `wait(id)` still finds them
    pub recent_capacity: usize,
    /// Results for ids not yet registered, kept for `unclaimed_grace`
    pub unclaimed_capacity: usize,
    /// How long a result may precede the registration of its task
    pub unclaimed_grace: Duration,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            recent_capacity: DEFAULT_RECENT_CAPACITY,
            unclaimed_capacity: DEFAULT_UNCLAIMED_CAPACITY,
            unclaimed_grace: DEFAULT_UNCLAIMED_GRACE,
        }
    }
}

/// What happened to a delivered result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The pending task was settled (resolved or failed)
    Resolved,
    /// The task had already been resolved, the result was dropped
    AlreadyResolved,
    /// No task with this id is tracked, the result was dropped
    UnknownTask,
}

/// Thread-safe table of pending tasks.
///
/// The delivery thread resolves; any number of foreground threads create
/// and wait.
pub struct TaskRegistry {
    inner: Mutex<RegistryInner>,
    drained: Condvar,
    options: RegistryOptions,
}

struct RegistryInner {
    pending: IndexMap<String, Task>,
    recent: LruCache<String, Task>,
    unclaimed: LruCache<String, (Instant, Bytes)>,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new(RegistryOptions::default())
    }
}

impl TaskRegistry {
    #[must_use]
    pub fn new(options: RegistryOptions) -> Self {
        let capacity = |n: usize| NonZeroUsize::new(n).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(RegistryInner {
                pending: IndexMap::new(),
                recent: LruCache::new(capacity(options.recent_capacity)),
                unclaimed: LruCache::new(capacity(options.unclaimed_capacity)),
            }),
            drained: Condvar::new(),
            options,
        }
    }

    /// Register a new unresolved task
    pub fn create(&self, id: impl Into<String>) -> Result<Task> {
        self.register(id.into(), None)
    }

    /// Register a new unresolved task with a completion callback
    pub fn create_with_callback(&self, id: impl Into<String>, callback: TaskCallback) -> Result<Task> {
        self.register(id.into(), Some(callback))
    }

    fn register(&self, id: String, callback: Option<TaskCallback>) -> Result<Task> {
        let mut inner = self.inner.lock();
        if inner.pending.contains_key(&id) || inner.recent.contains(&id) {
            return Err(Error::duplicate_task(id));
        }

        let task = Task::new(id.clone(), callback);

        // The result may have overtaken the submission response
        let early = inner
            .unclaimed
            .pop(&id)
            .filter(|(received, _)| received.elapsed() < self.options.unclaimed_grace);

        match early {
            Some((_, result)) => {
                task.complete(result);
                inner.recent.put(id.clone(), task.clone());
                drop(inner);
                tracing::debug!(task_id = %id, "task registered after its result arrived");
                task.run_callback();
            }
            None => {
                inner.pending.insert(id.clone(), task.clone());
                tracing::debug!(task_id = %id, "task registered");
            }
        }

        Ok(task)
    }

    /// Deliver a result.
    ///
    /// Unknown and already-resolved ids are logged and dropped; neither is
    /// an error. The task callback runs on the calling thread after the
    /// registry lock is released.
    pub fn resolve(&self, id: &str, result: Bytes) -> Resolution {
        let mut inner = self.inner.lock();

        let Some(task) = inner.pending.shift_remove(id) else {
            if inner.recent.contains(id) {
                tracing::warn!(task_id = %id, "duplicate result for resolved task dropped");
                return Resolution::AlreadyResolved;
            }
            tracing::warn!(
                task_id = %id,
                bytes = result.len(),
                "result for untracked task held for late registration"
            );
            inner
                .unclaimed
                .put(id.to_string(), (Instant::now(), result));
            return Resolution::UnknownTask;
        };

        task.complete(result);
        inner.recent.put(id.to_string(), task.clone());
        let drained = inner.pending.is_empty();
        drop(inner);

        if drained {
            self.drained.notify_all();
        }
        tracing::info!(
            task_id = %id,
            elapsed_ms = task.elapsed().unwrap_or_default().as_millis() as u64,
            "task resolved"
        );
        task.run_callback();
        Resolution::Resolved
    }

    /// Settle a pending task as failed.
    ///
    /// The task leaves the pending table, waiters get
    /// [`Error::Integrity`] and the callback runs. Untracked and settled
    /// ids are left alone.
    pub fn fail(&self, id: &str, failure: IntegrityError) -> Resolution {
        let mut inner = self.inner.lock();

        let Some(task) = inner.pending.shift_remove(id) else {
            return if inner.recent.contains(id) {
                Resolution::AlreadyResolved
            } else {
                Resolution::UnknownTask
            };
        };

        task.fail(failure);
        inner.recent.put(id.to_string(), task.clone());
        let drained = inner.pending.is_empty();
        drop(inner);

        if drained {
            self.drained.notify_all();
        }
        tracing::warn!(task_id = %id, "task failed");
        task.run_callback();
        Resolution::Resolved
    }

    /// Block until the task's result arrives
    pub fn wait(&self, id: &str, timeout: Option<Duration>) -> Result<Bytes> {
        let task = self.get(id).ok_or_else(|| Error::unknown_task(id))?;
        task.wait_for_result(timeout)
    }

    /// Block until no unresolved task remains
    pub fn wait_all(&self, timeout: Option<Duration>) -> Result<()> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut inner = self.inner.lock();

        while !inner.pending.is_empty() {
            match deadline {
                Some(deadline) => {
                    if self.drained.wait_until(&mut inner, deadline).timed_out()
                        && !inner.pending.is_empty()
                    {
                        return Err(Error::timeout(
                            format!("wait for {} pending tasks", inner.pending.len()),
                            timeout.unwrap_or_default(),
                        ));
                    }
                }
                None => self.drained.wait(&mut inner),
            }
        }
        Ok(())
    }

    /// Pending or recently resolved task by id
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Task> {
        let inner = self.inner.lock();
        inner
            .pending
            .get(id)
            .or_else(|| inner.recent.peek(id))
            .cloned()
    }

    /// Unresolved task ids in submission order
    #[must_use]
    pub fn pending_ids(&self) -> Vec<String> {
        self.inner.lock().pending.keys().cloned().collect()
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_create_rejects_duplicates() {
        let registry = TaskRegistry::default();
        registry.create("T1").unwrap();

        let err = registry.create("T1").unwrap_err();
        assert!(matches!(err, Error::DuplicateTask { ref task_id } if task_id == "T1"));
    }

    #[test]
    fn test_resolve_unknown_is_tolerated() {
        let registry = TaskRegistry::default();
        assert_eq!(
            registry.resolve("ghost", Bytes::from_static(b"late")),
            Resolution::UnknownTask
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_wait_after_resolution_is_immediate() {
        let registry = TaskRegistry::default();
        registry.create("T1").unwrap();
        registry.resolve("T1", Bytes::from_static(b"{\"sms\":[]}"));

        let started = Instant::now();
        let result = registry.wait("T1", Some(Duration::from_secs(5))).unwrap();

        assert_eq!(&result[..], b"{\"sms\":[]}");
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_wait_on_unknown_task() {
        let registry = TaskRegistry::default();
        let err = registry.wait("nope", Some(Duration::from_millis(10))).unwrap_err();
        assert!(matches!(err, Error::UnknownTask { .. }));
    }

    #[test]
    fn test_wait_timeout() {
        let registry = TaskRegistry::default();
        registry.create("T1").unwrap();
        let err = registry.wait("T1", Some(Duration::from_millis(20))).unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn test_callback_runs_exactly_once() {
        let registry = TaskRegistry::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        registry
            .create_with_callback(
                "T1",
                Box::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        assert_eq!(registry.resolve("T1", Bytes::from_static(b"a")), Resolution::Resolved);
        assert_eq!(
            registry.resolve("T1", Bytes::from_static(b"b")),
            Resolution::AlreadyResolved
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.get("T1").unwrap().result().unwrap(), Bytes::from_static(b"a"));
    }

    #[test]
    fn test_callback_may_use_registry() {
        let registry = Arc::new(TaskRegistry::default());
        let inner = Arc::clone(&registry);
        registry
            .create_with_callback(
                "T1",
                Box::new(move |_| {
                    inner.create("T2").unwrap();
                }),
            )
            .unwrap();

        registry.resolve("T1", Bytes::new());
        assert_eq!(registry.pending_ids(), vec!["T2".to_string()]);
    }

    #[test]
    fn test_pending_ids_keep_submission_order() {
        let registry = TaskRegistry::default();
        for id in ["c", "a", "b"] {
            registry.create(id).unwrap();
        }
        registry.resolve("a", Bytes::new());
        assert_eq!(registry.pending_ids(), vec!["c".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_wait_all_blocks_until_drained() {
        let registry = Arc::new(TaskRegistry::default());
        registry.create("T1").unwrap();
        registry.create("T2").unwrap();

        let resolver = Arc::clone(&registry);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            resolver.resolve("T1", Bytes::new());
            resolver.resolve("T2", Bytes::new());
        });

        registry.wait_all(Some(Duration::from_secs(5))).unwrap();
        handle.join().unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_wait_all_timeout() {
        let registry = TaskRegistry::default();
        registry.create("T1").unwrap();
        let err = registry.wait_all(Some(Duration::from_millis(20))).unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn test_failed_task_leaves_pending_and_reports_error() {
        let registry = Arc::new(TaskRegistry::default());
        registry.create("taken").unwrap();
        registry.create("other").unwrap();

        let failure = IntegrityError::ResultRetrieved {
            task_id: "taken".to_string(),
        };
        assert_eq!(registry.fail("taken", failure.clone()), Resolution::Resolved);
        assert_eq!(registry.fail("taken", failure.clone()), Resolution::AlreadyResolved);
        assert_eq!(registry.fail("ghost", failure), Resolution::UnknownTask);

        assert_eq!(registry.pending_ids(), vec!["other".to_string()]);
        let err = registry.wait("taken", Some(Duration::from_secs(5))).unwrap_err();
        assert!(matches!(err, Error::Integrity(IntegrityError::ResultRetrieved { .. })));

        // A late result does not overwrite the failure
        assert_eq!(
            registry.resolve("taken", Bytes::from_static(b"late")),
            Resolution::AlreadyResolved
        );

        let resolver = Arc::clone(&registry);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            resolver.fail(
                "other",
                IntegrityError::InvalidTaskStatus {
                    task_id: "other".to_string(),
                },
            );
        });
        registry.wait_all(Some(Duration::from_secs(5))).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_result_ahead_of_registration_is_claimed() {
        let registry = TaskRegistry::default();
        registry.resolve("T1", Bytes::from_static(b"early"));

        let task = registry.create("T1").unwrap();
        assert!(task.is_resolved());
        assert_eq!(task.result().unwrap(), Bytes::from_static(b"early"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unclaimed_result_expires() {
        let registry = TaskRegistry::new(RegistryOptions {
            unclaimed_grace: Duration::ZERO,
            ..Default::default()
        });
        registry.resolve("T1", Bytes::from_static(b"late"));

        let task = registry.create("T1").unwrap();
        assert!(!task.is_resolved());
        assert_eq!(registry.pending_count(), 1);
    }

    proptest! {
        #[test]
        fn prop_each_task_resolves_to_its_own_result(
            ids in proptest::collection::hash_set("[a-z0-9]{1,12}", 1..32)
        ) {
            let registry = TaskRegistry::default();
            for id in &ids {
                registry.create(id.clone()).unwrap();
            }
            for id in &ids {
                prop_assert_eq!(
                    registry.resolve(id, Bytes::from(id.clone().into_bytes())),
                    Resolution::Resolved
                );
            }
            prop_assert!(registry.is_empty());
            for id in &ids {
                let result = registry.wait(id, Some(Duration::ZERO)).unwrap();
                prop_assert_eq!(&result[..], id.as_bytes());
            }
        }
    }
}
