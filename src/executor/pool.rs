//! Bounded pool of worker slots.
//!
//! Each slot runs at most one unit of work as a spawned tokio task. The
//! driver hands work to the next idle slot in round-robin order and never
//! awaits a worker directly; finished slots are reaped with
//! `now_or_never`, and a worker that panicked or was cancelled is
//! reported as dead.

use futures::FutureExt;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::results::{ResultMessage, ResultSender};
use super::worker::{self, WorkItem, WorkerContext};
use crate::error::{Error, Result};

#[derive(Debug)]
struct Slot {
    handle: JoinHandle<()>,
    host: String,
    task: String,
}

/// Fixed number of worker slots
#[derive(Debug)]
pub struct WorkerPool {
    slots: Vec<Option<Slot>>,
    next: usize,
    ctx: WorkerContext,
    results: ResultSender,
}

impl WorkerPool {
    /// A pool of `forks` slots, at least one
    pub fn new(forks: usize, ctx: WorkerContext, results: ResultSender) -> Self {
        let forks = forks.max(1);
        Self {
            slots: (0..forks).map(|_| None).collect(),
            next: 0,
            ctx,
            results,
        }
    }

    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// Slots with a worker still running
    pub fn busy(&self) -> usize {
        self.slots
            .iter()
            .flatten()
            .filter(|slot| !slot.handle.is_finished())
            .count()
    }

    /// Free the slot if its worker finished; a worker that did not run to
    /// completion is an error
    fn reap_slot(&mut self, index: usize) -> Result<bool> {
        let finished = match &self.slots[index] {
            None => return Ok(true),
            Some(slot) => slot.handle.is_finished(),
        };
        if !finished {
            return Ok(false);
        }
        let Some(slot) = self.slots[index].take() else {
            return Ok(true);
        };
        match slot.handle.now_or_never() {
            // Panicked or cancelled: its final result will never arrive
            Some(Err(join_error)) => {
                let cause = if join_error.is_panic() { "panicked" } else { "was cancelled" };
                error!(host = %slot.host, task = %slot.task, "Worker {}", cause);
                Err(Error::WorkerDeath(format!(
                    "worker {} running '{}' on {} {}",
                    index, slot.task, slot.host, cause
                )))
            }
            _ => Ok(true),
        }
    }

    /// Check every slot for dead workers
    pub fn reap(&mut self) -> Result<()> {
        for index in 0..self.slots.len() {
            self.reap_slot(index)?;
        }
        Ok(())
    }

    /// Start `item` on the next idle slot, or give it back if all are busy
    pub fn try_queue(&mut self, item: WorkItem) -> Result<Option<WorkItem>> {
        let size = self.slots.len();
        for offset in 0..size {
            let index = (self.next + offset) % size;
            if !self.reap_slot(index)? {
                continue;
            }
            self.next = (index + 1) % size;

            debug!(worker = index, host = %item.host, task = %item.task.display_name(), "Queued task");
            let host = item.host.clone();
            let task = item.task.display_name();
            let ctx = self.ctx.clone();
            let results = self.results.clone();
            let handle = tokio::spawn(async move {
                let result = worker::execute(&item, &ctx, &results).await;
                let _ = results.send(ResultMessage::Final(result));
            });
            self.slots[index] = Some(Slot { handle, host, task });
            return Ok(None);
        }
        Ok(Some(item))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionRegistry;
    use crate::executor::results::ResultAggregator;
    use crate::modules::{ActionContext, ActionDispatcher};
    use crate::playbook::Task;
    use crate::template::{JinjaTemplar, Vars};
    use async_trait::async_trait;
    use serde_json::{json, Map as JsonMap, Value as JsonValue};
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Debug)]
    struct SlowOrPanic;

    #[async_trait]
    impl ActionDispatcher for SlowOrPanic {
        async fn dispatch(
            &self,
            task: &Task,
            _args: &JsonMap<String, JsonValue>,
            _ctx: &ActionContext,
        ) -> JsonValue {
            if task.action == "panic" {
                panic!("worker crashed");
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
            json!({"changed": false})
        }
    }

    fn pool(forks: usize, aggregator: &ResultAggregator) -> WorkerPool {
        let ctx = WorkerContext {
            templar: Arc::new(JinjaTemplar::new()),
            actions: Arc::new(SlowOrPanic),
            connections: Arc::new(ConnectionRegistry::default()),
        };
        WorkerPool::new(forks, ctx, aggregator.sender())
    }

    fn item(host: &str, action: &str) -> WorkItem {
        WorkItem {
            host: host.into(),
            task: Arc::new(Task::new(action, JsonMap::new())),
            vars: Vars::new(),
        }
    }

    #[tokio::test]
    async fn test_full_pool_gives_work_back() {
        let aggregator = ResultAggregator::start();
        let mut pool = pool(2, &aggregator);
        assert!(pool.try_queue(item("web1", "sleep")).unwrap().is_none());
        assert!(pool.try_queue(item("web2", "sleep")).unwrap().is_none());
        let back = pool.try_queue(item("web3", "sleep")).unwrap();
        assert_eq!(back.map(|i| i.host), Some("web3".to_string()));
        assert_eq!(pool.busy(), 2);

        let mut finals = 0;
        while finals < 2 {
            aggregator.wait(Duration::from_millis(20)).await;
            finals += aggregator.drain().iter().filter(|m| m.is_final()).count();
        }
    }

    #[tokio::test]
    async fn test_panicked_worker_is_dead() {
        let aggregator = ResultAggregator::start();
        let mut pool = pool(1, &aggregator);
        assert!(pool.try_queue(item("web1", "panic")).unwrap().is_none());

        let mut outcome = Ok(());
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(5)).await;
            outcome = pool.reap();
            if outcome.is_err() {
                break;
            }
        }
        assert!(matches!(outcome, Err(Error::WorkerDeath(_))));
    }

    #[tokio::test]
    async fn test_cancelled_worker_is_dead() {
        let aggregator = ResultAggregator::start();
        let mut pool = pool(1, &aggregator);
        assert!(pool.try_queue(item("web1", "sleep")).unwrap().is_none());
        pool.slots[0].as_ref().unwrap().handle.abort();

        let mut outcome = Ok(());
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(5)).await;
            outcome = pool.reap();
            if outcome.is_err() {
                break;
            }
        }
        assert!(matches!(outcome, Err(Error::WorkerDeath(msg)) if msg.contains("cancelled")));
        assert!(aggregator.drain().iter().all(|m| !m.is_final()));
    }

    #[test]
    fn test_pool_has_at_least_one_slot() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let aggregator = ResultAggregator::start();
            assert_eq!(pool(0, &aggregator).size(), 1);
        });
    }
}
