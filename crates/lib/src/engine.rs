//! Processing pipeline and the worker pool that runs it.
//!
//! Webhook handlers push normalized messages onto a bounded queue; a fixed number of workers
//! take them off and run interception, the execution lock, dispatch and delivery. A full queue
//! is reported back to the handler so it can answer `busy`.

use crate::channels::InboundMessage;
use crate::command::{CommandInterceptor, Intercept};
use crate::compose::ResponseComposer;
use crate::dispatch::Dispatcher;
use crate::guard::ExecutionLock;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// What became of one message. Only logged; webhooks are acknowledged before processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Operator control traffic, consumed by the interceptor.
    Command,
    /// An older attempt for the same conversation holds the execution lock.
    Duplicate,
    /// Dispatch produced no reply parts.
    NoReply,
    /// Reply delivered; the count is messages the provider accepted.
    Delivered(usize),
    Failed,
    Panicked,
}

pub struct Engine {
    interceptor: CommandInterceptor,
    executions: ExecutionLock,
    dispatcher: Dispatcher,
    composer: ResponseComposer,
}

impl Engine {
    pub fn new(
        interceptor: CommandInterceptor,
        executions: ExecutionLock,
        dispatcher: Dispatcher,
        composer: ResponseComposer,
    ) -> Self {
        Self {
            interceptor,
            executions,
            dispatcher,
            composer,
        }
    }

    /// Run the pipeline for one message. A panic anywhere below is caught here, after both
    /// locks have been released.
    pub async fn handle(&self, msg: InboundMessage) -> Outcome {
        let key = msg.key();
        match AssertUnwindSafe(self.process(msg)).catch_unwind().await {
            Ok(outcome) => {
                log::debug!("engine: {} finished: {:?}", key, outcome);
                outcome
            }
            Err(_) => {
                log::error!("engine: processing for {} panicked", key);
                Outcome::Panicked
            }
        }
    }

    async fn process(&self, msg: InboundMessage) -> Outcome {
        let msg = match self.interceptor.intercept(msg).await {
            Ok(Intercept::Forward(msg)) => msg,
            Ok(Intercept::Handled) => return Outcome::Command,
            Err(e) => {
                log::warn!("engine: command interception failed: {:#}", e);
                return Outcome::Failed;
            }
        };

        let key = msg.key();
        let permit = match self.executions.enter(&key).await {
            Ok(Some(permit)) => {
                log::debug!("engine: {} holds execution token {}", key, permit.token().seq);
                permit
            }
            Ok(None) => {
                log::debug!("engine: duplicate delivery for {} suppressed", key);
                return Outcome::Duplicate;
            }
            Err(e) => {
                log::warn!("engine: execution lock for {} unavailable: {:#}", key, e);
                return Outcome::Failed;
            }
        };

        permit
            .scope(async {
                match self.dispatcher.dispatch(&msg).await {
                    Ok(parts) if parts.is_empty() => Outcome::NoReply,
                    Ok(parts) => Outcome::Delivered(
                        self.composer
                            .send(&msg.device_id, &msg.sender_id, msg.provider, parts)
                            .await,
                    ),
                    Err(e) => {
                        log::warn!("engine: dispatch for {} failed: {}", key, e);
                        Outcome::Failed
                    }
                }
            })
            .await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("work queue is full")]
    Full,
    #[error("work queue is closed")]
    Closed,
}

/// Producer side of the bounded work queue. Cheap to clone into handler state.
#[derive(Clone)]
pub struct WorkQueue {
    tx: mpsc::Sender<InboundMessage>,
}

impl WorkQueue {
    /// A queue holding at most `capacity` messages, and its consumer end.
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<InboundMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Enqueue without waiting.
    pub fn submit(&self, msg: InboundMessage) -> Result<(), SubmitError> {
        self.tx.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SubmitError::Full,
            mpsc::error::TrySendError::Closed(_) => SubmitError::Closed,
        })
    }
}

/// Start `workers` tasks draining a queue of `capacity` messages. Workers exit once every
/// [`WorkQueue`] clone has been dropped and the queue is empty.
pub fn spawn_workers(
    engine: Arc<Engine>,
    capacity: usize,
    workers: usize,
) -> (WorkQueue, Vec<JoinHandle<()>>) {
    let (queue, rx) = WorkQueue::bounded(capacity);
    let rx = Arc::new(Mutex::new(rx));
    let handles = (0..workers.max(1))
        .map(|id| {
            let engine = engine.clone();
            let rx = rx.clone();
            tokio::spawn(async move {
                loop {
                    let next = rx.lock().await.recv().await;
                    let Some(msg) = next else { break };
                    engine.handle(msg).await;
                }
                log::debug!("worker {}: queue closed", id);
            })
        })
        .collect();
    log::info!(
        "engine: {} worker(s) on a queue of {}",
        workers.max(1),
        capacity.max(1)
    );
    (queue, handles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{MessageKind, Provider};

    fn message() -> InboundMessage {
        InboundMessage {
            device_id: "dev".into(),
            provider: Provider::Whacenter,
            sender_id: "60123456789".into(),
            raw_sender_id: "60123456789".into(),
            text: "hi".into(),
            sender_display_name: "Aina".into(),
            is_group: false,
            is_from_gateway: false,
            kind: MessageKind::Text,
            media_url: None,
            received_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn full_and_closed_queues_are_reported() {
        let (queue, rx) = WorkQueue::bounded(1);
        assert_eq!(queue.submit(message()), Ok(()));
        assert_eq!(queue.submit(message()), Err(SubmitError::Full));
        drop(rx);
        assert_eq!(queue.submit(message()), Err(SubmitError::Closed));
    }
}
