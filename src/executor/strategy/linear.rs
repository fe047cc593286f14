//! Lockstep scheduling: every host finishes a task before any host starts
//! the next one.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{RunStatus, Strategy, StrategyBase};
use crate::callback::CallbackEvent;
use crate::error::{Error, Result};
use crate::executor::iterator::{HostState, PlayIterator};
use crate::playbook::Task;

#[derive(Debug, Default, Clone, Copy)]
pub struct LinearStrategy;

/// Hosts that run next, with their tasks
///
/// Among hosts with work left, the lowest block wins, then the earliest
/// state within it (setup, tasks, rescue, always, handlers). Only the
/// chosen hosts are advanced; the others wait for the next round.
pub fn next_tasks_lockstep(hosts: &[String], iterator: &mut PlayIterator) -> Vec<(String, Arc<Task>)> {
    let peeked: Vec<(String, HostState, Arc<Task>)> = hosts
        .iter()
        .filter_map(|host| {
            let (state, task) = iterator.get_next_task_for_host(host, true);
            task.map(|task| (host.clone(), state, task))
        })
        .collect();

    let Some(lowest_block) = peeked.iter().map(|(_, state, _)| state.cur_block).min() else {
        return Vec::new();
    };
    let Some(cur_state) = peeked
        .iter()
        .filter(|(_, state, _)| state.cur_block == lowest_block)
        .map(|(_, state, _)| state.run_state)
        .min()
    else {
        return Vec::new();
    };

    peeked
        .into_iter()
        .filter(|(_, state, _)| state.cur_block == lowest_block && state.run_state == cur_state)
        .map(|(host, state, task)| {
            iterator.set_state_for_host(&host, state);
            (host, task)
        })
        .collect()
}

/// Group hosts by task, keeping first-seen order
fn group_by_task(host_tasks: Vec<(String, Arc<Task>)>) -> Vec<(Arc<Task>, Vec<String>)> {
    let mut groups: Vec<(Arc<Task>, Vec<String>)> = Vec::new();
    for (host, task) in host_tasks {
        match groups.iter_mut().find(|(t, _)| t.id == task.id) {
            Some((_, hosts)) => hosts.push(host),
            None => groups.push((task, vec![host])),
        }
    }
    groups
}

#[async_trait(?Send)]
impl Strategy for LinearStrategy {
    fn name(&self) -> &'static str {
        "linear"
    }

    async fn run(&self, base: &mut StrategyBase<'_>, iterator: &mut PlayIterator) -> Result<RunStatus> {
        loop {
            if base.is_terminated() {
                return Err(Error::Terminated);
            }

            let hosts_left = base.hosts_left(iterator)?;
            if hosts_left.is_empty() {
                base.emit(CallbackEvent::NoHostsRemaining {
                    play: base.play().name.clone(),
                });
                break;
            }

            let host_tasks = next_tasks_lockstep(&hosts_left, iterator);
            if host_tasks.is_empty() {
                break;
            }

            let (meta, regular): (Vec<_>, Vec<_>) = group_by_task(host_tasks)
                .into_iter()
                .partition(|(task, _)| task.is_meta());

            if !regular.is_empty() {
                let magic = base.magic_vars(iterator)?;
                for (task, hosts) in &regular {
                    debug!(task = %task.display_name(), hosts = hosts.len(), "Dispatching task");
                    base.emit(CallbackEvent::TaskStart {
                        name: task.display_name(),
                    });
                    if task.run_once {
                        base.set_run_once_targets(task, hosts.clone());
                    }
                    for host in hosts {
                        let vars = base.task_vars(host, task, &magic);
                        base.queue_task(host, task, vars).await?;
                        if task.run_once {
                            break;
                        }
                    }
                }
                base.wait_on_pending_results(iterator).await?;
            }

            for (task, hosts) in &meta {
                base.execute_meta(task, hosts, iterator).await?;
            }
        }

        base.finish(iterator).await
    }
}
