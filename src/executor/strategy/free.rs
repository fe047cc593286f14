//! Free scheduling: each host moves to its next task as soon as its
//! previous result has been processed.

use std::collections::HashSet;

use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{RunStatus, Strategy, StrategyBase};
use crate::callback::CallbackEvent;
use crate::error::{Error, Result};
use crate::executor::iterator::PlayIterator;

#[derive(Debug, Default, Clone, Copy)]
pub struct FreeStrategy;

#[async_trait(?Send)]
impl Strategy for FreeStrategy {
    fn name(&self) -> &'static str {
        "free"
    }

    async fn run(&self, base: &mut StrategyBase<'_>, iterator: &mut PlayIterator) -> Result<RunStatus> {
        let mut announced: HashSet<Uuid> = HashSet::new();
        let mut warned_run_once = false;

        loop {
            if base.is_terminated() {
                return Err(Error::Terminated);
            }

            let hosts_left = base.hosts_left(iterator)?;
            if hosts_left.is_empty() && base.pending_results() == 0 {
                base.emit(CallbackEvent::NoHostsRemaining {
                    play: base.play().name.clone(),
                });
                break;
            }

            let mut work_to_do = false;
            for host in &hosts_left {
                if base.is_blocked(host) {
                    work_to_do = true;
                    continue;
                }
                let (_, task) = iterator.get_next_task_for_host(host, false);
                let Some(task) = task else {
                    continue;
                };
                work_to_do = true;

                if task.is_meta() {
                    base.execute_meta(&task, std::slice::from_ref(host), iterator).await?;
                    continue;
                }
                if task.run_once && !warned_run_once {
                    warn!("Using run_once with the free strategy is not supported; the task runs on every host");
                    warned_run_once = true;
                }
                if announced.insert(task.id) {
                    base.emit(CallbackEvent::TaskStart {
                        name: task.display_name(),
                    });
                }

                debug!(host = %host, task = %task.display_name(), "Dispatching task");
                let magic = base.magic_vars(iterator)?;
                let vars = base.task_vars(host, &task, &magic);
                base.queue_task(host, &task, vars).await?;
            }

            base.process_pending_results(iterator)?;
            if !work_to_do && base.pending_results() == 0 {
                break;
            }
            if base.pending_results() > 0 {
                base.wait_for_results().await?;
            }
        }

        base.wait_on_pending_results(iterator).await?;
        base.finish(iterator).await
    }
}
