use crate::llm::types::LLMError;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

type Job = BoxFuture<'static, ()>;

/// FIFO queue serializing non-critical requests.
///
/// A single worker runs one request at a time and pauses for `spacing`
/// between dequeues.
#[derive(Debug)]
pub struct AdmissionQueue {
    sender: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    pending: Arc<AtomicUsize>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl AdmissionQueue {
    /// Start the queue worker. Must be called from within a Tokio runtime.
    pub fn new(spacing: Duration) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();
        let pending = Arc::new(AtomicUsize::new(0));

        let worker_pending = Arc::clone(&pending);
        let worker = tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                worker_pending.fetch_sub(1, Ordering::SeqCst);
                job.await;
                if !spacing.is_zero() {
                    tokio::time::sleep(spacing).await;
                }
            }
            debug!("Admission queue worker stopped");
        });

        Self {
            sender: Mutex::new(Some(sender)),
            pending,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Enqueue `operation` and wait for its result.
    ///
    /// A caller that stops waiting abandons its item; the worker skips the
    /// rest of that operation and moves on.
    pub async fn submit<T, Fut>(&self, operation: Fut) -> Result<T, LLMError>
    where
        Fut: Future<Output = Result<T, LLMError>> + Send + 'static,
        T: Send + 'static,
    {
        let (mut tx, rx) = oneshot::channel();
        let job: Job = Box::pin(async move {
            tokio::select! {
                _ = tx.closed() => {
                    debug!("Queued request abandoned by its caller");
                }
                result = operation => {
                    let _ = tx.send(result);
                }
            }
        });

        {
            let sender = lock(&self.sender);
            let Some(sender) = sender.as_ref() else {
                return Err(LLMError::Shutdown);
            };
            self.pending.fetch_add(1, Ordering::SeqCst);
            if sender.send(job).is_err() {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                return Err(LLMError::Shutdown);
            }
        }

        rx.await.unwrap_or(Err(LLMError::Shutdown))
    }

    /// Items waiting to be picked up by the worker
    pub fn len(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.sender).is_none()
    }

    /// Stop the worker. Waiting callers receive [`LLMError::Shutdown`] and
    /// later submissions are refused. Idempotent.
    pub fn close(&self) {
        let sender = lock(&self.sender).take();
        let worker = lock(&self.worker).take();
        if sender.is_none() && worker.is_none() {
            return;
        }
        drop(sender);
        if let Some(worker) = worker {
            worker.abort();
        }
        self.pending.store(0, Ordering::SeqCst);
        info!("Admission queue closed");
    }
}

impl Drop for AdmissionQueue {
    fn drop(&mut self) {
        if let Some(worker) = lock(&self.worker).take() {
            worker.abort();
        }
    }
}
