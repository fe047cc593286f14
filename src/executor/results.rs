//! Result aggregation between workers and the strategy driver.
//!
//! Workers send [`ResultMessage`]s over an unbounded channel. One reader task
//! drains the channel into a mutex-protected buffer and wakes the driver
//! through a [`Notify`]; the driver takes whatever has accumulated with
//! [`ResultAggregator::drain`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::trace;

use super::task_result::TaskResult;

/// Kind of a non-final result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartialKind {
    /// One loop item finished
    Item,
    /// An `until` attempt failed and will be retried
    Retry,
}

/// Envelope a worker sends back to the driver
#[derive(Debug, Clone)]
pub enum ResultMessage {
    /// Exactly one per unit of work
    Final(TaskResult),
    /// Progress notification for observers
    Partial { kind: PartialKind, result: TaskResult },
}

impl ResultMessage {
    pub fn result(&self) -> &TaskResult {
        match self {
            ResultMessage::Final(result) => result,
            ResultMessage::Partial { result, .. } => result,
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, ResultMessage::Final(_))
    }
}

/// Sending half handed to workers
pub type ResultSender = mpsc::UnboundedSender<ResultMessage>;

#[derive(Debug, Default)]
struct ResultBuffer {
    queue: Mutex<VecDeque<ResultMessage>>,
    ready: Notify,
}

/// Shared result buffer fed by a background reader task
#[derive(Debug)]
pub struct ResultAggregator {
    tx: ResultSender,
    buffer: Arc<ResultBuffer>,
    reader: JoinHandle<()>,
}

impl ResultAggregator {
    /// Start the reader task; must be called inside a tokio runtime
    pub fn start() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<ResultMessage>();
        let buffer = Arc::new(ResultBuffer::default());

        let reader_buffer = Arc::clone(&buffer);
        let reader = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                trace!(host = %message.result().host, final_result = message.is_final(), "Buffered result");
                reader_buffer.queue.lock().push_back(message);
                reader_buffer.ready.notify_one();
            }
        });

        Self { tx, buffer, reader }
    }

    /// A new sender for a worker
    pub fn sender(&self) -> ResultSender {
        self.tx.clone()
    }

    /// Take everything buffered so far, in arrival order
    pub fn drain(&self) -> Vec<ResultMessage> {
        self.buffer.queue.lock().drain(..).collect()
    }

    /// Number of buffered messages
    pub fn buffered(&self) -> usize {
        self.buffer.queue.lock().len()
    }

    /// Sleep until a result arrives or `tick` elapses
    pub async fn wait(&self, tick: Duration) {
        tokio::select! {
            _ = self.buffer.ready.notified() => {}
            _ = tokio::time::sleep(tick) => {}
        }
    }
}

impl Drop for ResultAggregator {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
