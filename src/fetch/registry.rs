//! Registry of in-flight fetch tasks.
//!
//! The registry provides:
//! - Single-flight per key: a second enqueue for a running key attaches its
//!   listener to the running task instead of starting another fetch
//! - Backpressure: enqueues beyond the task ceiling are dropped, the caller
//!   re-requests on its next viewport pass
//! - Cooperative cancellation through a [`CancellationToken`] per task
//!
//! The registry is owned by one control context and mutated through
//! `&mut self`; only the work itself runs on the tokio runtime. Finished
//! tasks report over a channel and their listeners fire when the owner calls
//! [`dispatch_completions`](TaskRegistry::dispatch_completions) or awaits
//! [`next_completion`](TaskRegistry::next_completion).

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::outcome::FetchOutcome;

/// Receives the terminal outcome of a task.
pub type Listener<T> = Box<dyn FnOnce(FetchOutcome<T>) + Send + 'static>;

/// What [`TaskRegistry::enqueue`] did with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// A new task was spawned.
    Started,

    /// A task for the key was already running; the listener joined it.
    Joined,

    /// The registry is at its ceiling; the listener was dropped unnotified.
    Rejected,
}

struct RunningTask<T> {
    token: CancellationToken,
    handle: JoinHandle<()>,
    listeners: Vec<Listener<T>>,
}

/// Deduplicating, bounded set of running fetch tasks keyed by `K`.
pub struct TaskRegistry<K, T> {
    name: &'static str,
    max_tasks: usize,
    running: HashMap<K, RunningTask<T>>,
    completions_tx: mpsc::UnboundedSender<(K, FetchOutcome<T>)>,
    completions_rx: mpsc::UnboundedReceiver<(K, FetchOutcome<T>)>,
}

impl<K, T> TaskRegistry<K, T>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
    T: Clone + Send + 'static,
{
    pub fn new(name: &'static str, max_tasks: usize) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Self {
            name,
            max_tasks: max_tasks.max(1),
            running: HashMap::new(),
            completions_tx,
            completions_rx,
        }
    }

    pub fn max_tasks(&self) -> usize {
        self.max_tasks
    }

    /// Number of tasks not yet reported as finished.
    pub fn len(&self) -> usize {
        self.running.len()
    }

    pub fn is_empty(&self) -> bool {
        self.running.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.running.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.running.keys()
    }

    /// Start `job` for `key` unless one is already running or the registry
    /// is full.
    ///
    /// `job` receives the task's cancellation token and is expected to check
    /// it around each I/O step. Must be called within a tokio runtime.
    pub fn enqueue<F, Fut>(&mut self, key: K, listener: Listener<T>, job: F) -> Enqueued
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = FetchOutcome<T>> + Send + 'static,
    {
        if let Some(task) = self.running.get_mut(&key) {
            task.listeners.push(listener);
            debug!(registry = self.name, ?key, "Joined running task");
            return Enqueued::Joined;
        }

        if self.running.len() >= self.max_tasks {
            debug!(
                registry = self.name,
                ?key,
                running = self.running.len(),
                "Task ceiling reached, dropping request"
            );
            return Enqueued::Rejected;
        }

        let token = CancellationToken::new();
        let work = job(token.clone());
        let reporter = Reporter {
            key: Some(key.clone()),
            completions: self.completions_tx.clone(),
        };
        let handle = tokio::spawn(async move {
            let outcome = work.await;
            reporter.report(outcome);
        });

        debug!(registry = self.name, ?key, "Task started");
        self.running.insert(
            key,
            RunningTask {
                token,
                handle,
                listeners: vec![listener],
            },
        );
        Enqueued::Started
    }

    /// Request cancellation of the task for `key`.
    ///
    /// The task stays registered until it reports back, which it does with
    /// [`FetchOutcome::Cancelled`] unless its work was already past the last
    /// cancellation check.
    pub fn cancel(&mut self, key: &K) -> bool {
        match self.running.get(key) {
            Some(task) => {
                task.token.cancel();
                debug!(registry = self.name, ?key, "Task cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Cancel every task whose key matches `predicate`; returns how many.
    pub fn cancel_where(&mut self, mut predicate: impl FnMut(&K) -> bool) -> usize {
        let mut cancelled = 0;
        for (key, task) in &self.running {
            if predicate(key) && !task.token.is_cancelled() {
                task.token.cancel();
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            debug!(registry = self.name, cancelled, "Tasks cancellation requested");
        }
        cancelled
    }

    pub fn cancel_all(&mut self) -> usize {
        self.cancel_where(|_| true)
    }

    /// Fire listeners of every task that has finished so far.
    ///
    /// Never waits. Returns the retired keys with their outcomes.
    pub fn dispatch_completions(&mut self) -> Vec<(K, FetchOutcome<T>)> {
        let mut retired = Vec::new();
        while let Ok((key, outcome)) = self.completions_rx.try_recv() {
            if self.retire(&key, outcome.clone()) {
                retired.push((key, outcome));
            }
        }
        retired
    }

    /// Wait for the next task to finish and fire its listeners.
    ///
    /// Returns the key and outcome, or `None` when nothing is running.
    pub async fn next_completion(&mut self) -> Option<(K, FetchOutcome<T>)> {
        while !self.running.is_empty() {
            // The registry holds a sender, so the channel never closes
            let (key, outcome) = self.completions_rx.recv().await?;
            if self.retire(&key, outcome.clone()) {
                return Some((key, outcome));
            }
        }
        None
    }

    /// Cancel every task, wait for all of them to stop and notify their
    /// listeners.
    pub async fn shutdown(&mut self) {
        self.cancel_all();
        for task in self.running.values_mut() {
            if let Err(e) = (&mut task.handle).await {
                warn!(registry = self.name, error = %e, "Task ended abnormally");
            }
        }
        self.dispatch_completions();
    }

    fn retire(&mut self, key: &K, outcome: FetchOutcome<T>) -> bool {
        let Some(task) = self.running.remove(key) else {
            return false;
        };
        debug!(
            registry = self.name,
            ?key,
            success = outcome.is_success(),
            cancelled = outcome.is_cancelled(),
            listeners = task.listeners.len(),
            "Task finished"
        );
        for listener in task.listeners {
            listener(outcome.clone());
        }
        true
    }
}

/// Sends a task's outcome exactly once.
///
/// A task that unwinds or is aborted before reporting is reported as
/// cancelled when its reporter drops.
struct Reporter<K, T> {
    key: Option<K>,
    completions: mpsc::UnboundedSender<(K, FetchOutcome<T>)>,
}

impl<K, T> Reporter<K, T> {
    fn report(mut self, outcome: FetchOutcome<T>) {
        if let Some(key) = self.key.take() {
            // The receiver lives as long as the registry
            let _ = self.completions.send((key, outcome));
        }
    }
}

impl<K, T> Drop for Reporter<K, T> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            let _ = self.completions.send((key, FetchOutcome::Cancelled));
        }
    }
}

impl<K, T> Drop for TaskRegistry<K, T> {
    fn drop(&mut self) {
        for task in self.running.values() {
            task.token.cancel();
        }
    }
}
