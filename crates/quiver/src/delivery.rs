//! Callback delivery on a single execution context.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::error::Error;
use crate::request::{DeliverFn, FinishReason, Job, PackagedResponse};

/// A unit of work posted to a delivery context.
pub type DeliveryTask = Box<dyn FnOnce() + Send>;

/// Execution context for result callbacks.
///
/// Tasks posted on one context run in FIFO order relative to each other;
/// the engine relies on this to keep every caller callback on a single
/// logical thread of delivery even though the producing workers run in
/// parallel.
pub trait DeliveryContext: Send + Sync + 'static {
    fn post(&self, task: DeliveryTask);
}

/// Default context: a dedicated consumer task draining an unbounded
/// channel.
///
/// Must be created inside a Tokio runtime. Dropping the context stops the
/// consumer once the channel drains.
pub struct TokioDelivery {
    sender: mpsc::UnboundedSender<DeliveryTask>,
}

impl TokioDelivery {
    pub fn new() -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<DeliveryTask>();
        tokio::spawn(async move {
            while let Some(task) = receiver.recv().await {
                task();
            }
        });
        Self { sender }
    }
}

impl Default for TokioDelivery {
    fn default() -> Self {
        Self::new()
    }
}

impl DeliveryContext for TokioDelivery {
    fn post(&self, task: DeliveryTask) {
        if self.sender.send(task).is_err() {
            warn!("delivery context closed, dropping callback");
        }
    }
}

/// Inline context: runs each task on the posting thread.
///
/// FIFO only holds per poster, so this is meant for tests and
/// single-threaded embedders, not as the default.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmediateDelivery;

impl DeliveryContext for ImmediateDelivery {
    fn post(&self, task: DeliveryTask) {
        task();
    }
}

/// Posts parsed responses and errors back to the caller, re-checking
/// cancellation immediately before the callback runs.
pub(crate) struct ResponseDelivery {
    context: Arc<dyn DeliveryContext>,
}

impl ResponseDelivery {
    pub(crate) fn new(context: Arc<dyn DeliveryContext>) -> Self {
        Self { context }
    }

    /// Post a parsed response. Intermediate responses run the success
    /// callback but defer the finish hook; `continuation` runs after the
    /// callback returns (the soft-expiry path uses it to schedule the
    /// background refresh).
    pub(crate) fn post_response(
        &self,
        job: Arc<Job>,
        response: PackagedResponse,
        intermediate: bool,
        continuation: Option<DeliverFn>,
    ) {
        job.mark_delivered();
        trace!(sequence = job.sequence(), intermediate, "post-response");
        self.context.post(Box::new(move || {
            if job.is_canceled() {
                debug!(sequence = job.sequence(), "canceled-at-delivery");
                job.finish(FinishReason::Canceled);
                return;
            }
            (response.deliver)();
            if !intermediate {
                job.finish(FinishReason::Done);
            }
            if let Some(run) = continuation {
                run();
            }
        }));
    }

    /// Post a terminal error.
    pub(crate) fn post_error(&self, job: Arc<Job>, error: Error) {
        trace!(sequence = job.sequence(), %error, "post-error");
        self.context.post(Box::new(move || {
            if job.is_canceled() {
                debug!(sequence = job.sequence(), "canceled-at-delivery");
                job.finish(FinishReason::Canceled);
                return;
            }
            job.deliver_error(error);
            job.finish(FinishReason::Done);
        }));
    }
}
