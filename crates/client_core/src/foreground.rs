//! The foreground context: the one task allowed to mutate the store.
//!
//! Gateway calls run on spawned tasks. Their completions are boxed up as jobs
//! and queued here; the loop drains the queue in order and hands each job a
//! [`StoreWriter`]. Nothing outside this module can build the
//! [`ForegroundToken`] a writer needs.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    task::{Context, Poll},
};

use tokio::{
    sync::{mpsc, oneshot},
    task::{JoinHandle, JoinSet},
};
use tracing::{debug, warn};

use crate::{
    error::ClientError,
    store::{IgnoreReason, Store, StoreWriter},
};

/// Proof of running on the foreground loop.
pub struct ForegroundToken(());

type Job = Box<dyn FnOnce(&StoreWriter<'_>) + Send + 'static>;

enum Message {
    Run(Job),
    Flush(oneshot::Sender<()>),
}

#[derive(Clone)]
pub struct Foreground {
    tx: mpsc::UnboundedSender<Message>,
}

impl Foreground {
    /// Starts the loop on the current tokio runtime. The loop ends once every
    /// `Foreground` clone is dropped.
    pub(crate) fn spawn(store: Store) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let task = tokio::spawn(async move {
            let token = ForegroundToken(());
            while let Some(message) = rx.recv().await {
                match message {
                    Message::Run(job) => {
                        let writer = StoreWriter::new(&store, &token);
                        job(&writer);
                    }
                    Message::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
            debug!("foreground loop stopped");
        });
        (Self { tx }, task)
    }

    pub(crate) fn submit<F>(&self, job: F) -> Result<(), ClientError>
    where
        F: FnOnce(&StoreWriter<'_>) + Send + 'static,
    {
        self.tx
            .send(Message::Run(Box::new(job)))
            .map_err(|_| ClientError::Cancelled)
    }

    /// Runs `job` on the foreground and waits for its result.
    pub(crate) async fn run<F, R>(&self, job: F) -> Result<R, ClientError>
    where
        F: FnOnce(&StoreWriter<'_>) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.submit(move |writer| {
            let _ = tx.send(job(writer));
        })?;
        rx.await.map_err(|_| ClientError::Cancelled)
    }

    /// Resolves once every job queued before this call has run.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(Message::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    Ignored(IgnoreReason),
}

impl Outcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Handle for an issued interactor operation.
///
/// The operation is already running when this is returned. Drop it to
/// fire-and-forget, or await it to learn how the completion was applied.
#[must_use = "drop explicitly to ignore the outcome"]
pub struct Operation {
    name: &'static str,
    rx: oneshot::Receiver<Result<Outcome, ClientError>>,
}

impl Operation {
    pub(crate) fn channel(name: &'static str) -> (Completer, Self) {
        let (tx, rx) = oneshot::channel();
        (Completer { name, tx }, Self { name, rx })
    }

    pub(crate) fn failed(name: &'static str, err: ClientError) -> Self {
        let (completer, operation) = Self::channel(name);
        completer.complete(Err(err));
        operation
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl Future for Operation {
    type Output = Result<Outcome, ClientError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(ClientError::Cancelled)),
            Poll::Pending => Poll::Pending,
        }
    }
}

pub(crate) struct Completer {
    name: &'static str,
    tx: oneshot::Sender<Result<Outcome, ClientError>>,
}

impl Completer {
    pub(crate) fn complete(self, result: Result<Outcome, ClientError>) {
        if let Err(err) = &result {
            warn!(operation = self.name, error = %err, "operation failed");
        }
        let _ = self.tx.send(result);
    }
}

/// Lifetime of an interactor. Tracks its in-flight tasks and, once closed,
/// makes queued completions skip the store.
pub struct OwnerScope {
    name: &'static str,
    alive: Arc<AtomicBool>,
    tasks: Mutex<JoinSet<()>>,
}

#[derive(Clone)]
pub(crate) struct ScopeGuard {
    alive: Arc<AtomicBool>,
}

impl ScopeGuard {
    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }
}

impl OwnerScope {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            alive: Arc::new(AtomicBool::new(true)),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub(crate) fn guard(&self) -> ScopeGuard {
        ScopeGuard {
            alive: Arc::clone(&self.alive),
        }
    }

    /// Number of spawned tasks that have not finished yet.
    pub fn in_flight(&self) -> usize {
        let mut tasks = self
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        while tasks.try_join_next().is_some() {}
        tasks.len()
    }

    /// Spawns `task` unless the scope is closed, in which case the future is
    /// dropped without running.
    pub(crate) fn spawn<F>(&self, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if !self.is_alive() {
            return false;
        }
        let mut tasks = self
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        while tasks.try_join_next().is_some() {}
        tasks.spawn(task);
        true
    }

    pub fn close(&self) {
        if self.alive.swap(false, Ordering::AcqRel) {
            let mut tasks = self
                .tasks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            debug!(scope = self.name, in_flight = tasks.len(), "closing owner scope");
            tasks.abort_all();
        }
    }
}

impl Drop for OwnerScope {
    fn drop(&mut self) {
        self.close();
    }
}

/// Glue every interactor uses: run a backend call off the foreground, then
/// apply its result on the foreground unless the owner has gone away.
///
/// This is the only way to reach a [`StoreWriter`] from outside the crate, so
/// substitute interactors build on it the same way the bundled ones do.
pub struct Dispatcher {
    foreground: Foreground,
    scope: OwnerScope,
}

impl Dispatcher {
    pub fn new(name: &'static str, foreground: Foreground) -> Self {
        Self {
            foreground,
            scope: OwnerScope::new(name),
        }
    }

    pub fn foreground(&self) -> &Foreground {
        &self.foreground
    }

    pub fn scope(&self) -> &OwnerScope {
        &self.scope
    }

    /// Spawns `call` in this dispatcher's scope and queues `apply` on the
    /// foreground with its result. The returned [`Operation`] resolves with
    /// whatever `apply` reports, or `Cancelled` after [`shutdown`](Self::shutdown).
    pub fn dispatch<T, Call, Apply>(
        &self,
        name: &'static str,
        call: Call,
        apply: Apply,
    ) -> Operation
    where
        T: Send + 'static,
        Call: Future<Output = Result<T, ClientError>> + Send + 'static,
        Apply: FnOnce(&StoreWriter<'_>, Result<T, ClientError>) -> Result<Outcome, ClientError>
            + Send
            + 'static,
    {
        let (completer, operation) = Operation::channel(name);
        let foreground = self.foreground.clone();
        let guard = self.scope.guard();

        let spawned = self.scope.spawn(async move {
            let result = call.await;
            let submitted = foreground.submit(move |writer| {
                if !guard.is_alive() {
                    writer.ignored(name, IgnoreReason::Cancelled);
                    completer.complete(Err(ClientError::Cancelled));
                    return;
                }
                completer.complete(apply(writer, result));
            });
            if submitted.is_err() {
                debug!(operation = name, "foreground closed before completion");
            }
        });

        if !spawned {
            return Operation::failed(name, ClientError::Cancelled);
        }
        operation
    }

    pub fn shutdown(&self) {
        self.scope.close();
    }
}

#[cfg(test)]
#[path = "tests/foreground_tests.rs"]
mod tests;
