//! Callback sink for execution events.
//!
//! The strategy reports what happens as [`CallbackEvent`]s. Emitting never
//! blocks the driver: events go over an unbounded channel to a background task
//! that hands them to every registered [`CallbackPlugin`] in order.
//! [`CallbackManager::flush`] waits until everything emitted so far has been
//! delivered.
//!
//! ```rust,ignore
//! use armada::callback::{CallbackManager, DefaultCallback};
//! use std::sync::Arc;
//!
//! let callbacks = CallbackManager::new(vec![Arc::new(DefaultCallback::new(0))]);
//! callbacks.emit(CallbackEvent::PlayStart { name: "site".into(), hosts: vec![] });
//! callbacks.flush().await;
//! ```

pub mod plugins;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::{mpsc, oneshot};
use tracing::trace;

use crate::executor::stats::AggregateStats;
use crate::executor::task_result::TaskResult;

pub use plugins::{DefaultCallback, NullCallback};

/// What a callback sees of one task result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEvent {
    pub host: String,
    pub task: String,
    pub action: String,
    pub changed: bool,
    /// Clean copy of the payload
    pub result: JsonValue,
}

impl From<&TaskResult> for ResultEvent {
    fn from(result: &TaskResult) -> Self {
        Self {
            host: result.host.clone(),
            task: result.task.display_name(),
            action: result.task.action.clone(),
            changed: result.is_changed(),
            result: result.clean_copy(),
        }
    }
}

/// Execution events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CallbackEvent {
    PlayStart {
        name: String,
        hosts: Vec<String>,
    },
    TaskStart {
        name: String,
    },
    HandlerTaskStart {
        name: String,
    },
    RunnerOk(ResultEvent),
    RunnerFailed {
        #[serde(flatten)]
        result: ResultEvent,
        ignore_errors: bool,
    },
    RunnerUnreachable(ResultEvent),
    RunnerSkipped(ResultEvent),
    RunnerRetry(ResultEvent),
    RunnerItemOk(ResultEvent),
    RunnerItemFailed(ResultEvent),
    RunnerItemSkipped(ResultEvent),
    NoHostsMatched {
        play: String,
    },
    NoHostsRemaining {
        play: String,
    },
    Stats(AggregateStats),
}

impl CallbackEvent {
    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PlayStart { .. } => "play_start",
            Self::TaskStart { .. } => "task_start",
            Self::HandlerTaskStart { .. } => "handler_task_start",
            Self::RunnerOk(_) => "runner_ok",
            Self::RunnerFailed { .. } => "runner_failed",
            Self::RunnerUnreachable(_) => "runner_unreachable",
            Self::RunnerSkipped(_) => "runner_skipped",
            Self::RunnerRetry(_) => "runner_retry",
            Self::RunnerItemOk(_) => "runner_item_ok",
            Self::RunnerItemFailed(_) => "runner_item_failed",
            Self::RunnerItemSkipped(_) => "runner_item_skipped",
            Self::NoHostsMatched { .. } => "no_hosts_matched",
            Self::NoHostsRemaining { .. } => "no_hosts_remaining",
            Self::Stats(_) => "stats",
        }
    }
}

/// Receiver of execution events
pub trait CallbackPlugin: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn on_event(&self, event: &CallbackEvent);
}

enum Envelope {
    Event(Arc<CallbackEvent>),
    Flush(oneshot::Sender<()>),
}

/// Fans events out to plugins from a background task
pub struct CallbackManager {
    tx: mpsc::UnboundedSender<Envelope>,
    names: Vec<String>,
}

impl fmt::Debug for CallbackManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackManager")
            .field("plugins", &self.names)
            .finish()
    }
}

impl CallbackManager {
    /// Start the delivery task. Must be called inside a tokio runtime.
    pub fn new(plugins: Vec<Arc<dyn CallbackPlugin>>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();
        let names = plugins.iter().map(|p| p.name().to_string()).collect();

        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                match envelope {
                    Envelope::Event(event) => {
                        trace!(event = event.kind(), "Delivering callback event");
                        for plugin in &plugins {
                            plugin.on_event(&event);
                        }
                    }
                    Envelope::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
        });

        Self { tx, names }
    }

    /// Manager with no plugins
    pub fn silent() -> Self {
        Self::new(Vec::new())
    }

    pub fn plugin_names(&self) -> &[String] {
        &self.names
    }

    /// Queue an event; never blocks
    pub fn emit(&self, event: CallbackEvent) {
        let _ = self.tx.send(Envelope::Event(Arc::new(event)));
    }

    /// Wait until every event emitted so far has been delivered
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Envelope::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playbook::Task;
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Debug, Default)]
    struct Recorder {
        events: Mutex<Vec<CallbackEvent>>,
    }

    impl CallbackPlugin for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn on_event(&self, event: &CallbackEvent) {
            self.events.lock().push(event.clone());
        }
    }

    #[tokio::test]
    async fn test_events_delivered_in_order() {
        let recorder = Arc::new(Recorder::default());
        let manager = CallbackManager::new(vec![recorder.clone() as Arc<dyn CallbackPlugin>]);
        manager.emit(CallbackEvent::TaskStart { name: "one".into() });
        manager.emit(CallbackEvent::TaskStart { name: "two".into() });
        manager.flush().await;

        let events = recorder.events.lock();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], CallbackEvent::TaskStart { name: "two".into() });
    }

    #[test]
    fn test_result_event_serializes_tagged() {
        let task = Arc::new(Task::new("ping", Default::default()));
        let result = TaskResult::new("web1", task, json!({"changed": true, "ping": "pong"}));
        let event = CallbackEvent::RunnerFailed {
            result: ResultEvent::from(&result),
            ignore_errors: true,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], json!("runner_failed"));
        assert_eq!(value["host"], json!("web1"));
        assert_eq!(value["ignore_errors"], json!(true));
        assert_eq!(value["result"]["ping"], json!("pong"));
    }
}
