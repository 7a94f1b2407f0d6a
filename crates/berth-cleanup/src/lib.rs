//! Graceful-shutdown handler registry.
//!
//! Subsystems register named cleanup handlers with a priority and a timeout.
//! When shutdown is initiated the registry runs every handler concurrently,
//! bounded per handler and by a global graceful window, and collects the
//! outcomes into a [`CleanupReport`]. Initiation is idempotent: the handler
//! set runs exactly once and every caller observes the same report.

use std::cmp::Reverse;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tokio::sync::OnceCell;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Default per-handler execution budget.
pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(10);
/// Default bound on the whole cleanup run.
pub const DEFAULT_GRACEFUL_TIMEOUT: Duration = Duration::from_secs(45);

type CleanupFn = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// A named teardown action with scheduling metadata.
///
/// Higher priority handlers are launched first. The action is invoked at
/// most once per process lifetime, from the shutdown run.
#[derive(Clone)]
pub struct CleanupHandler {
    name: String,
    priority: i32,
    timeout: Duration,
    action: CleanupFn,
}

impl CleanupHandler {
    pub fn new<F, Fut>(name: impl Into<String>, action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            priority: 0,
            timeout: DEFAULT_HANDLER_TIMEOUT,
            action: Arc::new(move || Box::pin(action())),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }
}

impl fmt::Debug for CleanupHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CleanupHandler")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// How a single handler finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    Completed,
    Failed(String),
    TimedOut,
}

/// Per-handler diagnostic entry in the shutdown report.
#[derive(Debug, Clone)]
pub struct HandlerResult {
    pub name: String,
    pub priority: i32,
    pub outcome: HandlerOutcome,
    pub elapsed: Duration,
}

/// Outcome of one full cleanup run.
#[derive(Debug, Clone)]
pub struct CleanupReport {
    pub reason: String,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub results: Vec<HandlerResult>,
}

impl CleanupReport {
    /// True when every handler completed within its budget.
    pub fn completed(&self) -> bool {
        self.results
            .iter()
            .all(|r| r.outcome == HandlerOutcome::Completed)
    }

    pub fn outcome_for(&self, name: &str) -> Option<&HandlerOutcome> {
        self.results.iter().find(|r| r.name == name).map(|r| &r.outcome)
    }
}

struct RegistryInner {
    handlers: Mutex<Vec<CleanupHandler>>,
    graceful_timeout: Duration,
    shutting_down: AtomicBool,
    report: OnceCell<CleanupReport>,
}

/// Registry of shutdown handlers. Cheap to clone and share.
#[derive(Clone)]
pub struct CleanupRegistry {
    inner: Arc<RegistryInner>,
}

impl CleanupRegistry {
    pub fn new() -> Self {
        Self::with_graceful_timeout(DEFAULT_GRACEFUL_TIMEOUT)
    }

    pub fn with_graceful_timeout(graceful_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                handlers: Mutex::new(Vec::new()),
                graceful_timeout,
                shutting_down: AtomicBool::new(false),
                report: OnceCell::new(),
            }),
        }
    }

    fn handlers(&self) -> MutexGuard<'_, Vec<CleanupHandler>> {
        self.inner
            .handlers
            .lock()
            .expect("cleanup handler list poisoned")
    }

    /// Registers a handler, replacing any existing handler with the same
    /// name. Registration after shutdown has begun is rejected.
    pub fn register(&self, handler: CleanupHandler) {
        if self.is_shutting_down() {
            warn!(
                name = %handler.name,
                "rejecting cleanup handler registration: shutdown in progress"
            );
            return;
        }
        let mut handlers = self.handlers();
        if let Some(existing) = handlers.iter_mut().find(|h| h.name == handler.name) {
            warn!(name = %handler.name, "replacing existing cleanup handler");
            *existing = handler;
        } else {
            debug!(name = %handler.name, priority = handler.priority, "registered cleanup handler");
            handlers.push(handler);
        }
    }

    /// Removes a handler by name. Returns whether one was removed.
    pub fn unregister(&self, name: &str) -> bool {
        if self.is_shutting_down() {
            warn!(name, "rejecting cleanup handler removal: shutdown in progress");
            return false;
        }
        let mut handlers = self.handlers();
        let before = handlers.len();
        handlers.retain(|h| h.name != name);
        let removed = handlers.len() < before;
        if removed {
            debug!(name, "unregistered cleanup handler");
        }
        removed
    }

    /// Handler names in launch order (priority descending, ties in
    /// registration order).
    pub fn handler_names(&self) -> Vec<String> {
        let mut handlers = self.handlers().clone();
        handlers.sort_by_key(|h| Reverse(h.priority));
        handlers.into_iter().map(|h| h.name).collect()
    }

    pub fn len(&self) -> usize {
        self.handlers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers().is_empty()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    /// Runs every registered handler and returns the collected report.
    ///
    /// Idempotent: the first caller freezes the handler set and executes it;
    /// concurrent and later callers wait for that same run and receive the
    /// same report. The first caller's `reason` is the one recorded.
    pub async fn initiate_shutdown(&self, reason: &str) -> CleanupReport {
        self.inner.shutting_down.store(true, Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);
        let reason = reason.to_string();
        self.inner
            .report
            .get_or_init(move || run_cleanup(inner, reason))
            .await
            .clone()
    }
}

impl Default for CleanupRegistry {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_cleanup(inner: Arc<RegistryInner>, reason: String) -> CleanupReport {
    let started_at = Utc::now();
    let begun = Instant::now();

    let mut handlers = inner
        .handlers
        .lock()
        .expect("cleanup handler list poisoned")
        .clone();
    handlers.sort_by_key(|h| Reverse(h.priority));

    info!(reason = %reason, handlers = handlers.len(), "running cleanup handlers");

    let results: Arc<Mutex<Vec<HandlerResult>>> = Arc::new(Mutex::new(Vec::new()));
    let mut waiters = JoinSet::new();
    for handler in &handlers {
        let handler = handler.clone();
        let results = Arc::clone(&results);
        waiters.spawn(async move {
            let handler_begun = Instant::now();
            // The action runs in its own task so an overrun or panic never
            // takes the waiter down with it.
            let mut action = tokio::spawn((handler.action)());
            let outcome = match tokio::time::timeout(handler.timeout, &mut action).await {
                Ok(Ok(Ok(()))) => {
                    debug!(name = %handler.name, "cleanup handler completed");
                    HandlerOutcome::Completed
                }
                Ok(Ok(Err(err))) => {
                    warn!(name = %handler.name, error = %err, "cleanup handler failed");
                    HandlerOutcome::Failed(err.to_string())
                }
                Ok(Err(join_err)) => {
                    warn!(name = %handler.name, error = %join_err, "cleanup handler panicked");
                    HandlerOutcome::Failed(format!("handler panicked: {join_err}"))
                }
                Err(_) => {
                    warn!(
                        name = %handler.name,
                        timeout_ms = handler.timeout.as_millis() as u64,
                        "cleanup handler timed out"
                    );
                    HandlerOutcome::TimedOut
                }
            };
            results
                .lock()
                .expect("cleanup result list poisoned")
                .push(HandlerResult {
                    name: handler.name.clone(),
                    priority: handler.priority,
                    outcome,
                    elapsed: handler_begun.elapsed(),
                });
        });
    }

    let drained = tokio::time::timeout(inner.graceful_timeout, async {
        while waiters.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(
            timeout_ms = inner.graceful_timeout.as_millis() as u64,
            "graceful window elapsed; abandoning remaining cleanup handlers"
        );
        // Overrunning handlers keep running detached; we just stop waiting.
        waiters.detach_all();
    }

    let mut results = results
        .lock()
        .expect("cleanup result list poisoned")
        .clone();
    for handler in &handlers {
        if !results.iter().any(|r| r.name == handler.name) {
            results.push(HandlerResult {
                name: handler.name.clone(),
                priority: handler.priority,
                outcome: HandlerOutcome::TimedOut,
                elapsed: begun.elapsed(),
            });
        }
    }
    results.sort_by_key(|r| Reverse(r.priority));

    let report = CleanupReport {
        reason,
        started_at,
        elapsed: begun.elapsed(),
        results,
    };
    info!(
        elapsed_ms = report.elapsed.as_millis() as u64,
        complete = report.completed(),
        "cleanup finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_handler(name: &str, counter: Arc<AtomicUsize>) -> CleanupHandler {
        CleanupHandler::new(name, move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    }

    #[tokio::test]
    async fn test_handlers_ordered_by_priority() {
        let registry = CleanupRegistry::new();
        registry.register(CleanupHandler::new("low", || async { Ok(()) }).with_priority(10));
        registry.register(CleanupHandler::new("high", || async { Ok(()) }).with_priority(100));
        registry.register(CleanupHandler::new("mid", || async { Ok(()) }).with_priority(50));

        assert_eq!(registry.handler_names(), vec!["high", "mid", "low"]);
        assert_eq!(registry.len(), 3);
    }

    #[tokio::test]
    async fn test_register_replaces_same_name() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let registry = CleanupRegistry::new();
        registry.register(counting_handler("db", Arc::clone(&first)));
        registry.register(counting_handler("db", Arc::clone(&second)));
        assert_eq!(registry.len(), 1);

        registry.initiate_shutdown("test").await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unregister() {
        let registry = CleanupRegistry::new();
        registry.register(CleanupHandler::new("temp", || async { Ok(()) }));
        assert!(registry.unregister("temp"));
        assert!(!registry.unregister("temp"));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_registration_rejected_during_shutdown() {
        let registry = CleanupRegistry::new();
        registry.register(CleanupHandler::new("early", || async { Ok(()) }));
        registry.initiate_shutdown("test").await;

        registry.register(CleanupHandler::new("late", || async { Ok(()) }));
        assert_eq!(registry.len(), 1);
        assert!(!registry.unregister("early"));
    }

    #[tokio::test]
    async fn test_initiate_shutdown_is_idempotent() {
        let counter = Arc::new(AtomicUsize::new(0));
        let registry = CleanupRegistry::new();
        registry.register(counting_handler("once", Arc::clone(&counter)));

        let (a, b) = tokio::join!(
            registry.initiate_shutdown("first"),
            registry.initiate_shutdown("second")
        );
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(a.reason, b.reason);
        assert_eq!(a.results.len(), 1);

        // A later call still returns the same run.
        let c = registry.initiate_shutdown("third").await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(c.reason, a.reason);
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_block_others() {
        let counter = Arc::new(AtomicUsize::new(0));
        let registry = CleanupRegistry::new();
        registry.register(
            CleanupHandler::new("flaky", || async { anyhow::bail!("disk on fire") })
                .with_priority(10),
        );
        registry.register(counting_handler("solid", Arc::clone(&counter)).with_priority(100));

        let report = registry.initiate_shutdown("test").await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(report.results.len(), 2);
        assert_eq!(
            report.outcome_for("solid"),
            Some(&HandlerOutcome::Completed)
        );
        assert!(matches!(
            report.outcome_for("flaky"),
            Some(HandlerOutcome::Failed(msg)) if msg.contains("disk on fire")
        ));
        assert!(!report.completed());
    }

    #[tokio::test]
    async fn test_panicking_handler_is_recorded_as_failure() {
        let counter = Arc::new(AtomicUsize::new(0));
        let registry = CleanupRegistry::new();
        registry.register(CleanupHandler::new("boom", || async { panic!("handler bug") }));
        registry.register(counting_handler("calm", Arc::clone(&counter)));

        let report = registry.initiate_shutdown("test").await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(matches!(
            report.outcome_for("boom"),
            Some(HandlerOutcome::Failed(msg)) if msg.contains("panic")
        ));
    }

    #[tokio::test]
    async fn test_per_handler_timeout() {
        let registry = CleanupRegistry::new();
        registry.register(
            CleanupHandler::new("slow", || async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .with_timeout(Duration::from_millis(50)),
        );

        let begun = Instant::now();
        let report = registry.initiate_shutdown("test").await;
        assert!(begun.elapsed() < Duration::from_secs(5));
        assert_eq!(report.outcome_for("slow"), Some(&HandlerOutcome::TimedOut));
    }

    #[tokio::test]
    async fn test_global_timeout_abandons_stragglers() {
        let registry = CleanupRegistry::with_graceful_timeout(Duration::from_millis(100));
        for name in ["a", "b"] {
            registry.register(CleanupHandler::new(name, || async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            }));
        }

        let begun = Instant::now();
        let report = registry.initiate_shutdown("test").await;
        assert!(begun.elapsed() < Duration::from_secs(5));
        assert_eq!(report.results.len(), 2);
        assert!(report
            .results
            .iter()
            .all(|r| r.outcome == HandlerOutcome::TimedOut));
    }

    #[tokio::test]
    async fn test_empty_registry_shutdown() {
        let registry = CleanupRegistry::new();
        let report = registry.initiate_shutdown("nothing to do").await;
        assert!(report.results.is_empty());
        assert!(report.completed());
        assert!(registry.is_shutting_down());
    }
}
