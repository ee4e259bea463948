//! The event bus
//!
//! Priority-ordered concurrent dispatch with error isolation, per-event
//! statistics, and cancellable shutdown. Within one emission, handler
//! *start* order follows ascending priority (ties break by subscription
//! order); completion order is undefined because handlers run
//! concurrently. Across `wait: false` emits no ordering is guaranteed;
//! callers that need causal order pass `wait: true` on each emit.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use aituber_core::unix_now;

use crate::payload::{EventPayload, TypedPayload};
use crate::registry::EventRegistry;
use crate::stats::EventStats;
use crate::EventError;

/// Default subscription priority (lower runs earlier).
pub const DEFAULT_PRIORITY: i32 = 100;

/// Token identifying one subscription; passing it to [`EventBus::off`]
/// removes exactly that registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

/// Everything a handler receives for one emission.
#[derive(Debug, Clone)]
pub struct EventContext {
    pub event_name: String,
    pub payload: EventPayload,
    pub source: String,
}

/// Handlers report failure through an ordinary boxed error.
pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

type HandlerFn = Arc<dyn Fn(EventContext) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

#[derive(Clone)]
struct HandlerEntry {
    id: SubscriptionId,
    priority: i32,
    /// Insertion order, used as the tie-breaker for equal priorities.
    seq: u64,
    handler: HandlerFn,
    error_count: Arc<AtomicU64>,
    last_error: Arc<Mutex<Option<String>>>,
}

/// Options for one emit.
#[derive(Debug, Clone, Copy)]
pub struct EmitOptions {
    /// With isolation on, a failing handler is logged and counted but
    /// never aborts its siblings. With isolation off, the first failure
    /// is returned to the caller (meaningful together with `wait`).
    pub error_isolate: bool,
    /// `false`: dispatch runs in a tracked background task and emit
    /// returns immediately. `true`: emit awaits every handler.
    pub wait: bool,
}

impl Default for EmitOptions {
    fn default() -> Self {
        Self {
            error_isolate: true,
            wait: false,
        }
    }
}

impl EmitOptions {
    pub fn wait() -> Self {
        Self {
            wait: true,
            ..Self::default()
        }
    }

    pub fn wait_strict() -> Self {
        Self {
            error_isolate: false,
            wait: true,
        }
    }
}

struct Inner {
    handlers: RwLock<HashMap<String, Vec<HandlerEntry>>>,
    stats: Mutex<HashMap<String, EventStats>>,
    registry: EventRegistry,
    enable_stats: bool,
    closed: AtomicBool,
    next_seq: AtomicU64,
    active_count: AtomicUsize,
    idle_notify: Notify,
    background: Mutex<Vec<JoinHandle<()>>>,
}

/// Decrements the active-emit counter when the dispatch future finishes
/// or is aborted.
struct ActiveGuard(Arc<Inner>);

impl ActiveGuard {
    fn new(inner: Arc<Inner>) -> Self {
        inner.active_count.fetch_add(1, Ordering::SeqCst);
        Self(inner)
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        if self.0.active_count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle_notify.notify_waiters();
        }
    }
}

/// In-process typed publish/subscribe dispatcher.
///
/// Cheap to clone; clones share the same subscriber table and statistics.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_stats(true)
    }

    pub fn with_stats(enable_stats: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                handlers: RwLock::new(HashMap::new()),
                stats: Mutex::new(HashMap::new()),
                registry: EventRegistry::new(),
                enable_stats,
                closed: AtomicBool::new(false),
                next_seq: AtomicU64::new(0),
                active_count: AtomicUsize::new(0),
                idle_notify: Notify::new(),
                background: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn registry(&self) -> &EventRegistry {
        &self.inner.registry
    }

    /// Publishes one event.
    ///
    /// Fails synchronously with [`EventError::PayloadType`] when the
    /// payload kind does not match the registered binding; in that case
    /// no handler is invoked. Emits on a closed bus are dropped with a
    /// warning.
    pub async fn emit(
        &self,
        event_name: &str,
        payload: EventPayload,
        source: &str,
        opts: EmitOptions,
    ) -> Result<(), EventError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            warn!(event = event_name, "bus is shutting down, dropping event");
            return Ok(());
        }

        self.inner.registry.validate(event_name, payload.kind())?;

        let mut entries: Vec<HandlerEntry> = self
            .inner
            .handlers
            .read()
            .get(event_name)
            .cloned()
            .unwrap_or_default();

        info!(event = event_name, source, "{}", payload.log_format());

        if self.inner.enable_stats {
            let mut stats = self.inner.stats.lock();
            let entry = stats.entry(event_name.to_string()).or_default();
            entry.emit_count += 1;
            entry.last_emit_time = unix_now();
            entry.listener_count = entries.len();
        }

        if entries.is_empty() {
            debug!(event = event_name, "no listeners");
            return Ok(());
        }

        entries.sort_by_key(|e| (e.priority, e.seq));

        let inner = Arc::clone(&self.inner);
        let event = event_name.to_string();
        let source = source.to_string();
        let error_isolate = opts.error_isolate;

        let guard = ActiveGuard::new(Arc::clone(&self.inner));
        let dispatch = async move {
            let _guard = guard;
            let start = Instant::now();

            let mut tasks = Vec::with_capacity(entries.len());
            for entry in entries {
                let ctx = EventContext {
                    event_name: event.clone(),
                    payload: payload.clone(),
                    source: source.clone(),
                };
                let handler = Arc::clone(&entry.handler);
                let error_count = Arc::clone(&entry.error_count);
                let last_error = Arc::clone(&entry.last_error);
                let task_inner = Arc::clone(&inner);
                let task_event = event.clone();
                let task_source = source.clone();

                tasks.push(tokio::spawn(async move {
                    match handler(ctx).await {
                        Ok(()) => Ok(()),
                        Err(e) => {
                            let message = e.to_string();
                            error_count.fetch_add(1, Ordering::SeqCst);
                            *last_error.lock() = Some(message.clone());
                            if error_isolate {
                                error!(
                                    event = task_event,
                                    source = task_source,
                                    error = %message,
                                    "event handler failed"
                                );
                                if task_inner.enable_stats {
                                    let mut stats = task_inner.stats.lock();
                                    let entry = stats.entry(task_event.clone()).or_default();
                                    entry.error_count += 1;
                                    entry.last_error_time = unix_now();
                                }
                            }
                            Err(message)
                        }
                    }
                }));
            }

            let mut first_error: Option<String> = None;
            for task in tasks {
                match task.await {
                    Ok(Ok(())) => {}
                    Ok(Err(message)) => {
                        if first_error.is_none() {
                            first_error = Some(message);
                        }
                    }
                    Err(join_err) => {
                        if !join_err.is_cancelled() {
                            error!(event = %event, error = %join_err, "handler task panicked");
                            if first_error.is_none() {
                                first_error = Some(join_err.to_string());
                            }
                        }
                    }
                }
            }

            if inner.enable_stats {
                let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
                let mut stats = inner.stats.lock();
                stats
                    .entry(event.clone())
                    .or_default()
                    .total_execution_time_ms += elapsed_ms;
            }

            match first_error {
                Some(message) if !error_isolate => Err(EventError::HandlerFailed { event, message }),
                _ => Ok(()),
            }
        };

        if opts.wait {
            dispatch.await
        } else {
            let event = event_name.to_string();
            let handle = tokio::spawn(async move {
                if let Err(e) = dispatch.await {
                    error!(event = %event, error = %e, "background emit failed");
                }
            });
            let mut background = self.inner.background.lock();
            background.retain(|h| !h.is_finished());
            background.push(handle);
            Ok(())
        }
    }

    /// Subscribes an untyped handler. Returns the id used to unsubscribe.
    ///
    /// Subscribing the same logical handler twice yields two ids and two
    /// invocations per emit.
    pub fn on<F, Fut>(&self, event_name: &str, priority: i32, handler: F) -> SubscriptionId
    where
        F: Fn(EventContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = HandlerResult> + Send + 'static,
    {
        let id = SubscriptionId(Uuid::new_v4());
        let entry = HandlerEntry {
            id,
            priority,
            seq: self.inner.next_seq.fetch_add(1, Ordering::SeqCst),
            handler: Arc::new(move |ctx| Box::pin(handler(ctx))),
            error_count: Arc::new(AtomicU64::new(0)),
            last_error: Arc::new(Mutex::new(None)),
        };
        self.inner
            .handlers
            .write()
            .entry(event_name.to_string())
            .or_default()
            .push(entry);
        debug!(event = event_name, priority, "subscribed handler");
        id
    }

    /// Subscribes a typed handler for one payload kind.
    ///
    /// Registers the event binding implicitly. When an emission carries a
    /// different payload kind (possible for extension events that were
    /// never bound), the handler is skipped with an error log while other
    /// subscribers still run.
    pub fn on_typed<P, F, Fut>(&self, event_name: &str, priority: i32, handler: F) -> SubscriptionId
    where
        P: TypedPayload,
        F: Fn(String, P, String) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = HandlerResult> + Send + 'static,
    {
        self.inner.registry.register(event_name, P::KIND);

        self.on(event_name, priority, move |ctx: EventContext| {
            let EventContext {
                event_name,
                payload,
                source,
            } = ctx;
            let actual = payload.kind();
            let typed = P::from_payload(payload);
            let fut = typed.map(|p| handler(event_name.clone(), p, source));
            async move {
                match fut {
                    Some(fut) => fut.await,
                    None => {
                        error!(
                            event = %event_name,
                            expected = P::KIND,
                            actual,
                            "typed handler skipped: payload kind mismatch"
                        );
                        Ok(())
                    }
                }
            }
        })
    }

    /// Removes exactly one subscription. Returns whether it was found.
    pub fn off(&self, event_name: &str, id: SubscriptionId) -> bool {
        let mut handlers = self.inner.handlers.write();
        let Some(entries) = handlers.get_mut(event_name) else {
            return false;
        };
        let Some(pos) = entries.iter().position(|e| e.id == id) else {
            return false;
        };
        entries.remove(pos);
        if entries.is_empty() {
            handlers.remove(event_name);
        }
        debug!(event = event_name, "unsubscribed handler");
        true
    }

    /// Drops all subscriptions and statistics.
    pub fn clear(&self) {
        self.inner.handlers.write().clear();
        self.inner.stats.lock().clear();
        info!("cleared all event subscriptions and statistics");
    }

    /// Marks the bus closed and waits for in-flight emits.
    ///
    /// Without `force`, a timeout re-opens the bus and returns
    /// [`EventError::CleanupTimeout`] so callers can retry. With `force`,
    /// remaining background dispatches are aborted.
    pub async fn cleanup(&self, timeout: Duration, force: bool) -> Result<(), EventError> {
        self.inner.closed.store(true, Ordering::SeqCst);

        let active = self.inner.active_count.load(Ordering::SeqCst);
        if active > 0 {
            info!(active, "waiting for active emits to finish");
        }

        if tokio::time::timeout(timeout, self.wait_for_idle()).await.is_err() {
            let remaining = self.inner.active_count.load(Ordering::SeqCst);
            if !force {
                error!(
                    remaining,
                    timeout_secs = timeout.as_secs_f64(),
                    "cleanup timed out; bus re-opened (pass force=true to cancel)"
                );
                self.inner.closed.store(false, Ordering::SeqCst);
                return Err(EventError::CleanupTimeout { remaining });
            }
            warn!(remaining, "cleanup timed out, cancelling remaining emits");
            for handle in self.inner.background.lock().drain(..) {
                handle.abort();
            }
        }

        self.inner.background.lock().clear();
        self.clear();
        info!("event bus cleaned up");
        Ok(())
    }

    async fn wait_for_idle(&self) {
        loop {
            let notified = self.inner.idle_notify.notified();
            if self.inner.active_count.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn listener_count(&self, event_name: &str) -> usize {
        self.inner
            .handlers
            .read()
            .get(event_name)
            .map_or(0, |v| v.len())
    }

    pub fn list_events(&self) -> Vec<String> {
        self.inner.handlers.read().keys().cloned().collect()
    }

    /// Statistics for one event (a copy), when stats are enabled.
    pub fn stats(&self, event_name: &str) -> Option<EventStats> {
        if !self.inner.enable_stats {
            return None;
        }
        self.inner.stats.lock().get(event_name).cloned()
    }

    /// Statistics for every event (copies).
    pub fn all_stats(&self) -> HashMap<String, EventStats> {
        if !self.inner.enable_stats {
            return HashMap::new();
        }
        self.inner.stats.lock().clone()
    }

    pub fn reset_stats(&self, event_name: Option<&str>) {
        let mut stats = self.inner.stats.lock();
        match event_name {
            Some(name) => {
                stats.insert(name.to_string(), EventStats::default());
            }
            None => stats.clear(),
        }
    }
}
