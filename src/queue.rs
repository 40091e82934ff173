use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use fieldx_plus::fx_plus;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tracing::trace;

use crate::types::StoreError;

pub(crate) type BoxOpFuture<R> = Pin<Box<dyn Future<Output = R> + Send>>;

/// A queued operation: runs exclusively against the queue and produces `R`.
pub(crate) type QueueOp<P, R> = Box<dyn FnOnce(Arc<UpdateQueue<P>>) -> BoxOpFuture<R> + Send>;

type Job<P> = Box<dyn FnOnce(Arc<UpdateQueue<P>>) -> BoxOpFuture<()> + Send>;

/// Single-writer execution engine over one shared payload.
///
/// Operations submitted to a queue run to completion one at a time, in
/// submission order, regardless of which task submitted them. The engine is a
/// plain in-memory ordering primitive: it knows nothing about disk and treats
/// the payload as opaque data.
///
/// Internally a single background worker drains an unbounded channel of
/// boxed jobs; every submission is paired with a oneshot completion handle.
/// Submission itself never blocks, and a submitter that abandons the returned
/// future does not cancel the queued job.
///
/// ```ignore
/// let queue = UpdateQueue::builder().payload(0u64).build()?;
/// queue.update_if_present(|hits| Ok(hits + 1)).await?;
/// assert_eq!(queue.read().await?, 1);
/// ```
#[fx_plus(
    parent,
    no_new,
    default(off),
    sync,
    builder(
        doc("Builder object of [`UpdateQueue`].", "", "See [`UpdateQueue::builder()`] method."),
        method_doc("Implement builder pattern for [`UpdateQueue`]."),
    )
)]
pub struct UpdateQueue<P>
where
    P: Clone + Debug + Send + Sync + 'static,
{
    /// The shared payload. The getter snapshots the current payload without
    /// going through the queue; the renamed setter is meant for jobs already
    /// executing on the queue's worker.
    #[fieldx(lock, get(clone), set("replace_payload"), builder(required))]
    payload: P,

    #[fieldx(lazy, lock, private, clearer, get(clone), builder(off))]
    tx: mpsc::UnboundedSender<Job<P>>,

    #[fieldx(private, clearer, lock, get, set, builder(off))]
    worker: tokio::task::JoinHandle<()>,
}

impl<P> UpdateQueue<P>
where
    P: Clone + Debug + Send + Sync + 'static,
{
    fn build_tx(&self) -> mpsc::UnboundedSender<Job<P>> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job<P>>();
        // The worker holds only a weak reference so that dropping the last
        // external handle drops the sender and lets the loop drain out.
        let myself = Arc::downgrade(&self.myself().unwrap());
        self.set_worker(tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let Some(queue) = myself.upgrade()
                else {
                    break;
                };
                job(queue).await;
            }
            trace!("update queue worker exiting");
        }));
        tx
    }

    /// Submits a job for exclusive execution. The send happens before the
    /// returned future is first polled, so submission order is the call
    /// order.
    pub(crate) fn enqueue<R>(&self, op: QueueOp<P, R>) -> impl Future<Output = Result<R, StoreError>>
    where
        R: Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let job: Job<P> = Box::new(move |queue| {
            Box::pin(async move {
                // The submitter may have walked away; that must not cancel
                // the job itself.
                let _ = done_tx.send(op(queue).await);
            })
        });
        let submitted = self.tx().send(job).map_err(|_| StoreError::QueueGone);
        async move {
            submitted?;
            done_rx.await.map_err(|_| StoreError::QueueGone)
        }
    }

    /// One-shot ordered read: waits its turn in the queue and resolves to the
    /// payload as of that point in the operation sequence.
    pub fn read(&self) -> impl Future<Output = Result<P, StoreError>> {
        self.enqueue::<P>(Box::new(|queue| Box::pin(async move { queue.payload() })))
    }

    /// Applies `f` to the current payload and installs its result. A failed
    /// transform leaves the payload untouched and surfaces the error only to
    /// this operation's caller; the queue keeps serving subsequent
    /// operations.
    pub fn update_if_present<F>(&self, f: F) -> impl Future<Output = Result<(), StoreError>>
    where
        F: FnOnce(P) -> Result<P, StoreError> + Send + 'static,
    {
        let fut = self.enqueue::<Result<(), StoreError>>(Box::new(move |queue| {
            Box::pin(async move {
                let next = f(queue.payload())?;
                queue.replace_payload(next);
                Ok(())
            })
        }));
        async move { fut.await? }
    }

    /// Same as [`update_if_present`](Self::update_if_present), but the
    /// transform yields an auxiliary result handed back to the caller.
    pub fn update_with_result<F, R>(&self, f: F) -> impl Future<Output = Result<R, StoreError>>
    where
        F: FnOnce(P) -> Result<(P, R), StoreError> + Send + 'static,
        R: Send + 'static,
    {
        let fut = self.enqueue::<Result<R, StoreError>>(Box::new(move |queue| {
            Box::pin(async move {
                let (next, result) = f(queue.payload())?;
                queue.replace_payload(next);
                Ok(result)
            })
        }));
        async move { fut.await? }
    }

    /// Graceful shutdown: drops the submission channel and waits for the
    /// worker to drain it. Every job submitted before the call runs to
    /// completion.
    pub async fn close(&self) {
        self.clear_tx();
        if let Some(worker) = self.clear_worker() {
            let _ = worker.await;
        }
    }
}
