//! Bounded work queue
//!
//! `K` worker tasks pull records from a bounded channel and hand them to a
//! [`RecordSink`]. Every task reports its outcome through the callback it was
//! enqueued with. [`WorkQueue::drain`] resolves once every task enqueued so
//! far has finished and run its callback.
//!
//! ```rust,ignore
//! let mut queue = WorkQueue::new(sink, 5, 200);
//! for record in page {
//!     queue.enqueue(record, |outcome| tally(outcome)).await?;
//! }
//! queue.drain().await;
//! queue.shutdown().await;
//! ```

use cvedb_common::types::CveRecord;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::error::{IngestError, Result};
use crate::sink::{RecordSink, UpsertOutcome};

/// Called once per task with the sink's outcome.
pub type Completion = Box<dyn FnOnce(Result<UpsertOutcome>) + Send + 'static>;

struct Task {
    record: CveRecord,
    on_complete: Completion,
}

/// Counts outstanding tasks; `wait` resolves when the count reaches zero.
#[derive(Default)]
pub struct WaitGroup {
    pending: AtomicUsize,
    notify: Notify,
}

impl WaitGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
    }

    pub fn done(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.notify.notify_waiters();
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a `done` in between is not missed.
            notified.as_mut().enable();

            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Marks a task done even if its callback panics.
struct DoneGuard<'a>(&'a WaitGroup);

impl Drop for DoneGuard<'_> {
    fn drop(&mut self) {
        self.0.done();
    }
}

/// Fixed-concurrency runner for sink writes.
pub struct WorkQueue {
    sender: Option<mpsc::Sender<Task>>,
    workers: Vec<JoinHandle<()>>,
    pending: Arc<WaitGroup>,
}

impl WorkQueue {
    /// Spawn `concurrency` workers sharing a buffer of `capacity` tasks.
    pub fn new(sink: Arc<dyn RecordSink>, concurrency: usize, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let pending = Arc::new(WaitGroup::new());

        let workers = (0..concurrency.max(1))
            .map(|worker_id| {
                tokio::spawn(run_worker(
                    worker_id,
                    receiver.clone(),
                    sink.clone(),
                    pending.clone(),
                ))
            })
            .collect();

        debug!(concurrency, capacity, "Work queue started");

        Self {
            sender: Some(sender),
            workers,
            pending,
        }
    }

    /// Admit one record. Waits only while the buffer is full.
    pub async fn enqueue<F>(&self, record: CveRecord, on_complete: F) -> Result<()>
    where
        F: FnOnce(Result<UpsertOutcome>) + Send + 'static,
    {
        let sender = self.sender.as_ref().ok_or(IngestError::QueueClosed)?;

        self.pending.add();
        let task = Task {
            record,
            on_complete: Box::new(on_complete),
        };

        if sender.send(task).await.is_err() {
            self.pending.done();
            return Err(IngestError::QueueClosed);
        }
        Ok(())
    }

    /// Wait until every task enqueued so far has completed.
    pub async fn drain(&self) {
        self.pending.wait().await;
    }

    /// Tasks enqueued but not yet completed
    pub fn pending(&self) -> usize {
        self.pending.pending()
    }

    /// Close the buffer and join the workers. Tasks already buffered still run.
    pub async fn shutdown(&mut self) {
        if self.sender.take().is_none() {
            return;
        }

        for result in futures::future::join_all(self.workers.drain(..)).await {
            if let Err(e) = result {
                error!(error = %e, "Worker task ended abnormally");
            }
        }
        debug!("Work queue shut down");
    }
}

async fn run_worker(
    worker_id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<Task>>>,
    sink: Arc<dyn RecordSink>,
    pending: Arc<WaitGroup>,
) {
    loop {
        let next = receiver.lock().await.recv().await;
        let Some(Task {
            record,
            on_complete,
        }) = next
        else {
            break;
        };

        let _done = DoneGuard(&pending);
        let id = record.id.clone();

        let outcome = AssertUnwindSafe(sink.upsert(record))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                let message = panic_message(panic.as_ref());
                warn!(worker_id, cve_id = %id, panic = %message, "Sink panicked");
                Err(IngestError::sink_write(&id, format!("sink panicked: {}", message)))
            });

        if std::panic::catch_unwind(AssertUnwindSafe(|| on_complete(outcome))).is_err() {
            error!(worker_id, cve_id = %id, "Completion callback panicked");
        }
    }

    debug!(worker_id, "Worker stopped");
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
