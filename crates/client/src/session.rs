//! Session orchestration: delivery thread, submission and watchdog

use async_trait::async_trait;
use ricloud_config::Settings;
use ricloud_core::{Error, Result, RetrievalProtocol, StreamEndpoint, CATCH_ALL_HANDLER};
use ricloud_listener::{
    Dispatcher, HandlerError, PersistingHandler, ResultAck, SystemHandler, TaskResultHandler,
};
use ricloud_sink::RecordStore;
use ricloud_task::{Task, TaskCallback, TaskRegistry};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;
use tokio::sync::watch;

use crate::api::{AccountInfo, HttpTaskApi, TaskApi, TaskRequest};
use crate::object_store::ObjectStorePoller;
use crate::stream::StreamClient;

/// What the listener factory gets to build a [`Dispatcher`] from
#[derive(Clone)]
pub struct ListenerContext {
    pub settings: Settings,
    pub registry: Arc<TaskRegistry>,
    pub ack: Arc<dyn ResultAck>,
}

/// Builds a fresh dispatcher each time the delivery thread (re)starts
pub type ListenerFactory = Arc<dyn Fn(&ListenerContext) -> Dispatcher + Send + Sync>;

/// Acknowledges results through the task API
struct ApiAck(Arc<dyn TaskApi>);

#[async_trait]
impl ResultAck for ApiAck {
    async fn result_consumed(&self, task_id: &str) -> Result<()> {
        self.0.result_consumed(task_id).await
    }
}

#[derive(Debug, Clone)]
enum DeliveryMode {
    Push(StreamEndpoint),
    ObjectStore,
}

#[derive(Debug, thiserror::Error)]
enum DeliveryError {
    #[error(transparent)]
    Setup(#[from] Error),

    #[error(transparent)]
    Fatal(#[from] HandlerError),
}

/// A running connection to the API: tasks are submitted in the foreground
/// while a background thread delivers their results.
///
/// All methods block; do not call them from inside an async runtime.
pub struct Session {
    settings: Settings,
    api: Arc<dyn TaskApi>,
    registry: Arc<TaskRegistry>,
    account: AccountInfo,
    mode: DeliveryMode,
    factory: ListenerFactory,
    runtime: Runtime,
    shutdown: watch::Sender<bool>,
    delivery: Option<JoinHandle<std::result::Result<(), DeliveryError>>>,
    stopped: Option<String>,
}

impl Session {
    /// Connect with the HTTP API and the default result listener
    pub fn connect(settings: Settings) -> Result<Self> {
        let api = Arc::new(HttpTaskApi::new(&settings)?);
        Self::start(settings, api, Self::result_listener())
    }

    /// Fetch account information, pick the delivery mode and start the
    /// delivery thread
    pub fn start(settings: Settings, api: Arc<dyn TaskApi>, factory: ListenerFactory) -> Result<Self> {
        settings.validate()?;
        // Foreground calls and the delivery thread share this runtime, so
        // pooled API connections are always driven
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("ricloud-io")
            .enable_all()
            .build()
            .map_err(|e| Error::configuration(format!("Failed to start async runtime: {e}")))?;

        let account = runtime.block_on(api.account_info())?;
        let mode = match account.protocol() {
            RetrievalProtocol::ObjectStore => DeliveryMode::ObjectStore,
            RetrievalProtocol::Push => {
                let endpoint = account
                    .stream_endpoints
                    .first()
                    .cloned()
                    .ok_or_else(|| Error::configuration("account has no stream endpoints"))?;
                DeliveryMode::Push(endpoint)
            }
        };
        tracing::info!(mode = ?mode, "starting result delivery");

        let (shutdown, _) = watch::channel(false);
        let mut session = Self {
            settings,
            api,
            registry: Arc::new(TaskRegistry::default()),
            account,
            mode,
            factory,
            runtime,
            shutdown,
            delivery: None,
            stopped: None,
        };
        session.spawn_delivery()?;
        Ok(session)
    }

    /// Listener that resolves tasks and acknowledges their results
    #[must_use]
    pub fn result_listener() -> ListenerFactory {
        Arc::new(|ctx: &ListenerContext| {
            Dispatcher::new(ctx.settings.chunks.idle_timeout).with_handler(
                CATCH_ALL_HANDLER,
                Arc::new(TaskResultHandler::new(ctx.registry.clone()).with_ack(ctx.ack.clone())),
            )
        })
    }

    /// Listener that persists every message to `store` and the output
    /// directory instead of resolving tasks
    #[must_use]
    pub fn persisting_listener(store: Arc<dyn RecordStore>) -> ListenerFactory {
        Arc::new(move |ctx: &ListenerContext| {
            Dispatcher::new(ctx.settings.chunks.idle_timeout)
                .with_handler(
                    CATCH_ALL_HANDLER,
                    Arc::new(PersistingHandler::new(
                        ctx.settings.output_dir.clone(),
                        store.clone(),
                        ctx.settings.database_retries,
                    )),
                )
        })
    }

    /// Listener that only logs system messages; everything else is dropped
    #[must_use]
    pub fn system_listener() -> ListenerFactory {
        Arc::new(|ctx: &ListenerContext| {
            Dispatcher::new(ctx.settings.chunks.idle_timeout)
                .with_handler(ricloud_core::SYSTEM_MESSAGE_TYPE, Arc::new(SystemHandler))
        })
    }

    #[must_use]
    pub fn account(&self) -> &AccountInfo {
        &self.account
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Submit a task and start tracking it
    pub fn submit(&self, request: &TaskRequest, callback: Option<TaskCallback>) -> Result<Task> {
        self.check_stopped()?;
        let task_id = self.runtime.block_on(self.api.submit(request))?;
        let task = match callback {
            Some(callback) => self.registry.create_with_callback(task_id, callback)?,
            None => self.registry.create(task_id)?,
        };

        // The result overtook the submission response and was never acked
        if task.is_resolved() {
            if let Err(err) = self.runtime.block_on(self.api.result_consumed(task.id())) {
                tracing::warn!(task_id = %task.id(), error = %err, "unable to acknowledge result");
            }
        }
        Ok(task)
    }

    /// Wait for one task while keeping the delivery thread alive
    pub fn wait_for_result(&mut self, task: &Task, timeout: Option<Duration>) -> Result<bytes::Bytes> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            self.ensure_delivery_alive()?;
            match task.wait_for_result(Some(self.slice(deadline))) {
                Err(err) if err.is_timeout() && !expired(deadline) => continue,
                Err(err) if err.is_timeout() => {
                    return Err(Error::timeout(
                        format!("wait for task '{}'", task.id()),
                        timeout.unwrap_or_default(),
                    ));
                }
                other => return other,
            }
        }
    }

    /// Wait until no submitted task is pending
    pub fn wait_for_results(&mut self, timeout: Option<Duration>) -> Result<()> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            self.ensure_delivery_alive()?;
            match self.registry.wait_all(Some(self.slice(deadline))) {
                Err(err) if err.is_timeout() && !expired(deadline) => continue,
                Err(err) if err.is_timeout() => {
                    return Err(Error::timeout(
                        format!("wait for {} pending tasks", self.registry.pending_count()),
                        timeout.unwrap_or_default(),
                    ));
                }
                other => return other,
            }
        }
    }

    /// Restart the delivery thread if it died; report a fatal stop
    pub fn ensure_delivery_alive(&mut self) -> Result<()> {
        self.check_stopped()?;
        let finished = self.delivery.as_ref().map_or(true, JoinHandle::is_finished);
        if !finished {
            return Ok(());
        }

        match self.delivery.take().map(JoinHandle::join) {
            None => tracing::warn!("delivery thread missing, starting it"),
            Some(Err(_panic)) => tracing::warn!("delivery thread panicked, restarting it"),
            Some(Ok(Ok(()))) if *self.shutdown.borrow() => return Ok(()),
            Some(Ok(Ok(()))) => tracing::warn!("delivery thread exited unexpectedly, restarting it"),
            Some(Ok(Err(err))) => {
                tracing::error!(severity = "critical", error = %err, "result delivery stopped");
                let message = err.to_string();
                self.stopped = Some(message.clone());
                return Err(Error::delivery_stopped(message));
            }
        }
        self.spawn_delivery()
    }

    /// Stop delivery and wait for the background thread
    pub fn close(&mut self) {
        self.shutdown.send_replace(true);
        if let Some(handle) = self.delivery.take() {
            if handle.join().is_err() {
                tracing::warn!("delivery thread panicked during shutdown");
            }
        }
        tracing::debug!("session closed");
    }

    fn check_stopped(&self) -> Result<()> {
        match &self.stopped {
            Some(message) => Err(Error::delivery_stopped(message.clone())),
            None => Ok(()),
        }
    }

    /// Time to block before the next watchdog check
    fn slice(&self, deadline: Option<Instant>) -> Duration {
        let interval = self.settings.watchdog_interval;
        deadline.map_or(interval, |d| {
            d.saturating_duration_since(Instant::now()).min(interval)
        })
    }

    fn spawn_delivery(&mut self) -> Result<()> {
        let context = ListenerContext {
            settings: self.settings.clone(),
            registry: self.registry.clone(),
            ack: Arc::new(ApiAck(self.api.clone())),
        };
        let factory = self.factory.clone();
        let api = self.api.clone();
        let mode = self.mode.clone();
        let shutdown = self.shutdown.subscribe();
        let runtime = self.runtime.handle().clone();

        let handle = std::thread::Builder::new()
            .name("ricloud-delivery".to_string())
            .spawn(move || runtime.block_on(deliver(mode, context, factory, api, shutdown)))
            .map_err(|e| Error::configuration(format!("Failed to spawn delivery thread: {e}")))?;

        self.delivery = Some(handle);
        Ok(())
    }
}

async fn deliver(
    mode: DeliveryMode,
    context: ListenerContext,
    factory: ListenerFactory,
    api: Arc<dyn TaskApi>,
    shutdown: watch::Receiver<bool>,
) -> std::result::Result<(), DeliveryError> {
    match mode {
        DeliveryMode::Push(endpoint) => {
            let mut dispatcher = factory(&context);
            let mut client = StreamClient::new(&endpoint, &context.settings)?;
            client.run(&mut dispatcher, shutdown).await?;
        }
        DeliveryMode::ObjectStore => {
            ObjectStorePoller::new(api, context.registry, &context.settings.object_store)
                .run(shutdown)
                .await;
        }
    }
    Ok(())
}

fn expired(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
