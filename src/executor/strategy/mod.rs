//! Strategy drivers.
//!
//! A strategy decides which (host, task) pairs to dispatch next;
//! [`StrategyBase`] holds everything they share: queueing onto the worker
//! pool, draining and applying results, handler flushes and meta tasks.
//! Strategies are looked up by name in a [`StrategyRegistry`].

pub mod free;
pub mod linear;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{json, Value as JsonValue};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::iterator::PlayIterator;
use super::pool::WorkerPool;
use super::results::{PartialKind, ResultAggregator, ResultMessage};
use super::stats::StatKind;
use super::task_result::{ResultPayload, TaskResult};
use super::worker::{WorkItem, WorkerContext};
use super::ExecutionContext;
use crate::callback::{CallbackEvent, ResultEvent};
use crate::error::{Error, Result};
use crate::handlers::NotificationLedger;
use crate::playbook::{Play, Task};
use crate::template::Vars;
use crate::vars::MagicVars;

pub use free::FreeStrategy;
pub use linear::LinearStrategy;

/// Outcome of a play or a run, as a process exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunStatus {
    Ok,
    RunError,
    FailedHosts,
    UnreachableHosts,
}

impl RunStatus {
    pub fn code(self) -> i32 {
        match self {
            RunStatus::Ok => 0,
            RunStatus::RunError => 1,
            RunStatus::FailedHosts => 2,
            RunStatus::UnreachableHosts => 4,
        }
    }

    fn severity(self) -> u8 {
        match self {
            RunStatus::Ok => 0,
            RunStatus::FailedHosts => 1,
            RunStatus::UnreachableHosts => 2,
            RunStatus::RunError => 3,
        }
    }

    /// The worse of two outcomes
    pub fn worst(self, other: RunStatus) -> RunStatus {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }

    pub fn is_ok(self) -> bool {
        self == RunStatus::Ok
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStatus::Ok => "ok",
            RunStatus::RunError => "run error",
            RunStatus::FailedHosts => "failed hosts",
            RunStatus::UnreachableHosts => "unreachable hosts",
        };
        f.write_str(name)
    }
}

/// A scheduling policy over one play batch
#[async_trait(?Send)]
pub trait Strategy: fmt::Debug {
    fn name(&self) -> &'static str;

    /// Drive the batch to completion
    async fn run(&self, base: &mut StrategyBase<'_>, iterator: &mut PlayIterator) -> Result<RunStatus>;
}

type StrategyConstructor = fn() -> Box<dyn Strategy>;

/// Name to strategy map
#[derive(Clone)]
pub struct StrategyRegistry {
    strategies: HashMap<&'static str, StrategyConstructor>,
}

impl fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("strategies", &self.names())
            .finish()
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        let mut registry = Self {
            strategies: HashMap::new(),
        };
        registry.register("linear", || Box::new(LinearStrategy));
        registry.register("free", || Box::new(FreeStrategy));
        registry
    }
}

impl StrategyRegistry {
    pub fn register(&mut self, name: &'static str, constructor: StrategyConstructor) {
        self.strategies.insert(name, constructor);
    }

    pub fn create(&self, name: &str) -> Result<Box<dyn Strategy>> {
        self.strategies
            .get(name)
            .map(|constructor| constructor())
            .ok_or_else(|| Error::UnknownStrategy(name.to_string()))
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.strategies.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

fn is_set_fact(action: &str) -> bool {
    action == "set_fact" || action.ends_with(".set_fact")
}

fn string_list(value: Option<&JsonValue>) -> Vec<String> {
    match value {
        Some(JsonValue::Array(items)) => items
            .iter()
            .filter_map(JsonValue::as_str)
            .map(String::from)
            .collect(),
        Some(JsonValue::String(s)) => vec![s.clone()],
        _ => Vec::new(),
    }
}

/// State shared by every strategy for one play batch
pub struct StrategyBase<'a> {
    ctx: &'a mut ExecutionContext,
    play: &'a Play,
    batch: Vec<String>,
    pool: WorkerPool,
    aggregator: ResultAggregator,
    ledger: NotificationLedger,
    blocked_hosts: HashSet<String>,
    pending_results: usize,
    run_once_targets: HashMap<Uuid, Vec<String>>,
    force_handlers: bool,
    poll_interval: Duration,
}

impl fmt::Debug for StrategyBase<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyBase")
            .field("play", &self.play.name)
            .field("batch", &self.batch)
            .field("pending_results", &self.pending_results)
            .field("blocked_hosts", &self.blocked_hosts)
            .finish_non_exhaustive()
    }
}

impl<'a> StrategyBase<'a> {
    /// Start the worker pool and result reader for a batch of hosts
    pub fn new(ctx: &'a mut ExecutionContext, play: &'a Play, batch: Vec<String>) -> Self {
        let aggregator = ResultAggregator::start();
        let worker_ctx = WorkerContext {
            templar: Arc::clone(&ctx.templar),
            actions: Arc::clone(&ctx.actions),
            connections: Arc::clone(&ctx.connections),
        };
        let pool = WorkerPool::new(ctx.config.forks(), worker_ctx, aggregator.sender());

        let mut name_vars: Vars = play.vars.clone();
        name_vars.extend(ctx.variables.extra_vars().iter().map(|(k, v)| (k.clone(), v.clone())));
        let templar = Arc::clone(&ctx.templar);
        let ledger = NotificationLedger::new(play.handlers.clone(), |name| {
            templar
                .render(name, &name_vars)
                .unwrap_or_else(|_| name.to_string())
        });

        let force_handlers = play.force_handlers.unwrap_or(ctx.config.defaults.force_handlers);
        let poll_interval = ctx.config.defaults.internal_poll_interval;

        Self {
            ctx,
            play,
            batch,
            pool,
            aggregator,
            ledger,
            blocked_hosts: HashSet::new(),
            pending_results: 0,
            run_once_targets: HashMap::new(),
            force_handlers,
            poll_interval,
        }
    }

    pub fn play(&self) -> &Play {
        self.play
    }

    pub fn pending_results(&self) -> usize {
        self.pending_results
    }

    pub fn is_blocked(&self, host: &str) -> bool {
        self.blocked_hosts.contains(host)
    }

    pub fn is_terminated(&self) -> bool {
        self.ctx.terminated.load(Ordering::SeqCst)
    }

    pub fn ledger(&self) -> &NotificationLedger {
        &self.ledger
    }

    pub fn emit(&self, event: CallbackEvent) {
        self.ctx.callbacks.emit(event);
    }

    /// Batch hosts the play pattern still selects, minus unreachable and
    /// failed ones, in batch order
    pub fn hosts_left(&self, iterator: &PlayIterator) -> Result<Vec<String>> {
        let resolved: HashSet<String> = self
            .ctx
            .inventory
            .get_host_names(self.play.pattern(), false, false, None)?
            .into_iter()
            .collect();
        Ok(self
            .batch
            .iter()
            .filter(|h| {
                resolved.contains(*h)
                    && !self.ctx.unreachable_hosts.contains(*h)
                    && !iterator.is_failed(h)
            })
            .cloned()
            .collect())
    }

    pub fn magic_vars(&self, iterator: &PlayIterator) -> Result<MagicVars> {
        Ok(MagicVars {
            play_hosts: self.hosts_left(iterator)?,
            failed_hosts: iterator.get_failed_hosts(),
        })
    }

    pub fn task_vars(&self, host: &str, task: &Task, magic: &MagicVars) -> Vars {
        self.ctx
            .variables
            .get_vars(self.ctx.inventory.data(), host, Some(self.play), Some(task), magic)
    }

    /// Hosts a `run_once` task stands for
    pub fn set_run_once_targets(&mut self, task: &Task, hosts: Vec<String>) {
        self.run_once_targets.insert(task.id, hosts);
    }

    /// Hand a unit of work to the pool, sleeping while every worker is busy
    pub async fn queue_task(&mut self, host: &str, task: &Arc<Task>, vars: Vars) -> Result<()> {
        let mut item = WorkItem {
            host: host.to_string(),
            task: Arc::clone(task),
            vars,
        };
        loop {
            if self.is_terminated() {
                return Err(Error::Terminated);
            }
            match self.pool.try_queue(item)? {
                None => break,
                Some(back) => {
                    item = back;
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
        self.blocked_hosts.insert(host.to_string());
        self.pending_results += 1;
        Ok(())
    }

    /// Sleep until a result arrives or the poll interval passes
    pub async fn wait_for_results(&mut self) -> Result<()> {
        if self.is_terminated() {
            return Err(Error::Terminated);
        }
        self.pool.reap()?;
        self.aggregator.wait(self.poll_interval).await;
        Ok(())
    }

    /// Process results until nothing is pending
    pub async fn wait_on_pending_results(&mut self, iterator: &mut PlayIterator) -> Result<Vec<TaskResult>> {
        let mut results = Vec::new();
        loop {
            if self.is_terminated() {
                return Err(Error::Terminated);
            }
            results.extend(self.process_pending_results(iterator)?);
            if self.pending_results == 0 {
                break;
            }
            self.pool.reap()?;
            self.aggregator.wait(self.poll_interval).await;
        }
        Ok(results)
    }

    /// Apply everything the aggregator has buffered; returns final results
    pub fn process_pending_results(&mut self, iterator: &mut PlayIterator) -> Result<Vec<TaskResult>> {
        let mut processed = Vec::new();
        for message in self.aggregator.drain() {
            match message {
                ResultMessage::Partial { kind, result } => self.emit_partial(kind, &result),
                ResultMessage::Final(result) => processed.push(self.process_result(result, iterator)?),
            }
        }
        Ok(processed)
    }

    fn emit_partial(&self, kind: PartialKind, result: &TaskResult) {
        let event = ResultEvent::from(result);
        let event = match kind {
            PartialKind::Retry => CallbackEvent::RunnerRetry(event),
            PartialKind::Item if result.is_failed() || result.is_unreachable() => {
                CallbackEvent::RunnerItemFailed(event)
            }
            PartialKind::Item if result.is_skipped() => CallbackEvent::RunnerItemSkipped(event),
            PartialKind::Item => CallbackEvent::RunnerItemOk(event),
        };
        self.emit(event);
    }

    fn process_result(&mut self, mut result: TaskResult, iterator: &mut PlayIterator) -> Result<TaskResult> {
        let host = result.host.clone();
        let task = Arc::clone(&result.task);
        self.pending_results = self.pending_results.saturating_sub(1);
        self.blocked_hosts.remove(&host);

        let broadcast = self.run_once_targets.remove(&task.id);
        let targets = broadcast.clone().unwrap_or_else(|| vec![host.clone()]);

        if let Some(register) = &task.register {
            let value = result.registered_value();
            for target in &targets {
                self.ctx
                    .variables
                    .set_host_variable(target, register.clone(), value.clone());
            }
        }

        if result.is_unreachable() {
            warn!(host = %host, task = %task.display_name(), "Host unreachable");
            self.ctx.unreachable_hosts.insert(host.clone());
            self.ctx.stats.increment(StatKind::Unreachable, &host);
            self.ledger.forget_host(&host);
            iterator.end_host(&host);
            self.emit(CallbackEvent::RunnerUnreachable(ResultEvent::from(&result)));
        } else if result.is_failed() {
            if task.ignore_errors {
                for target in &targets {
                    self.ctx.stats.increment(StatKind::Ok, target);
                    self.ctx.stats.increment(StatKind::Ignored, target);
                    if result.is_changed() {
                        self.ctx.stats.increment(StatKind::Changed, target);
                    }
                }
            } else {
                let failed = match broadcast {
                    Some(_) => {
                        let mut hosts = self.hosts_left(iterator)?;
                        if !hosts.contains(&host) {
                            hosts.insert(0, host.clone());
                        }
                        hosts
                    }
                    None => vec![host.clone()],
                };
                for failed_host in &failed {
                    self.fail_host(failed_host, &task, &result, iterator);
                }
            }
            self.emit(CallbackEvent::RunnerFailed {
                result: ResultEvent::from(&result),
                ignore_errors: task.ignore_errors,
            });
        } else if result.is_skipped() {
            for target in &targets {
                self.ctx.stats.increment(StatKind::Skipped, target);
            }
            self.emit(CallbackEvent::RunnerSkipped(ResultEvent::from(&result)));
        } else {
            self.apply_side_effects(&mut result, &targets)?;
            if result.is_changed() {
                self.notify_handlers(&result)?;
            }
            for target in &targets {
                self.ctx.stats.increment(StatKind::Ok, target);
                if result.is_changed() {
                    self.ctx.stats.increment(StatKind::Changed, target);
                }
            }
            self.emit(CallbackEvent::RunnerOk(ResultEvent::from(&result)));
        }
        Ok(result)
    }

    fn fail_host(&mut self, host: &str, task: &Task, result: &TaskResult, iterator: &mut PlayIterator) {
        iterator.mark_host_failed(host);
        let (state, _) = iterator.get_next_task_for_host(host, true);
        if iterator.is_any_block_rescuing(&state) {
            debug!(host, "Host entering rescue");
            self.ctx.stats.increment(StatKind::Rescued, host);
            let mut facts = Vars::new();
            facts.insert(
                "ansible_failed_task".into(),
                json!({
                    "name": task.get_name(),
                    "action": task.action,
                    "id": task.id.to_string(),
                }),
            );
            facts.insert("ansible_failed_result".into(), result.registered_value());
            self.ctx.variables.set_nonpersistent_facts(host, facts);
        } else {
            self.ctx.stats.increment(StatKind::Failures, host);
            self.ctx.failed_hosts.insert(host.to_string());
        }
    }

    /// Facts, inventory changes and custom stats carried by a result
    fn apply_side_effects(&mut self, result: &mut TaskResult, targets: &[String]) -> Result<()> {
        let payloads: Vec<ResultPayload> = match &result.payload.items {
            Some(items) => items.clone(),
            None => vec![result.payload.clone()],
        };

        let mut inventory_changed = false;
        for payload in &payloads {
            if let Some(JsonValue::Object(add)) = payload.get("add_host") {
                if let Some(name) = add.get("host_name").and_then(JsonValue::as_str) {
                    let groups = string_list(add.get("groups"));
                    let vars: IndexMap<String, JsonValue> = match add.get("host_vars") {
                        Some(JsonValue::Object(vars)) => vars.clone().into_iter().collect(),
                        _ => IndexMap::new(),
                    };
                    inventory_changed |= self.ctx.inventory.add_host(name, &groups, &vars)?;
                    info!(host = %name, groups = ?groups, "Added host to inventory");
                }
            }

            if let Some(group) = payload.get("add_group").and_then(JsonValue::as_str) {
                let parents = string_list(payload.get("parent_groups"));
                for target in targets {
                    inventory_changed |= self.ctx.inventory.add_group(target, group, &parents)?;
                }
            }

            if let Some(JsonValue::Object(facts)) = payload.get("ansible_facts") {
                let set_fact = is_set_fact(&result.task.action);
                let cacheable = payload
                    .get("_ansible_facts_cacheable")
                    .and_then(JsonValue::as_bool)
                    .unwrap_or(false);
                let facts: Vars = facts.clone().into_iter().collect();
                for target in targets {
                    if !set_fact || cacheable {
                        if let Err(e) = self.ctx.variables.set_host_facts(target, facts.clone()) {
                            warn!(host = %target, "Could not cache facts: {}", e);
                        }
                    }
                    if set_fact {
                        self.ctx.variables.set_nonpersistent_facts(target, facts.clone());
                    }
                }
            }

            if let Some(JsonValue::Object(stats)) = payload.get("ansible_stats") {
                let per_host = stats.get("per_host").and_then(JsonValue::as_bool).unwrap_or(false);
                let aggregate = stats.get("aggregate").and_then(JsonValue::as_bool).unwrap_or(true);
                if let Some(JsonValue::Object(data)) = stats.get("data") {
                    for (key, value) in data {
                        let hosts: Vec<Option<&str>> = if per_host {
                            targets.iter().map(|t| Some(t.as_str())).collect()
                        } else {
                            vec![None]
                        };
                        for host in hosts {
                            if aggregate {
                                self.ctx.stats.update_custom_stats(key, value.clone(), host);
                            } else {
                                self.ctx.stats.set_custom_stats(key, value.clone(), host);
                            }
                        }
                    }
                }
            }
        }

        if inventory_changed {
            result.payload.changed = Some(true);
        }
        Ok(())
    }

    fn notify_handlers(&mut self, result: &TaskResult) -> Result<()> {
        let names = result.notified_handlers();
        if names.is_empty() {
            return Ok(());
        }
        let vars = self.task_vars(&result.host, &result.task, &MagicVars::default());
        for name in names {
            let name = self.ctx.templar.render(&name, &vars).unwrap_or(name);
            let handlers = self.ledger.lookup(&name);
            if handlers.is_empty() {
                if self.ctx.config.defaults.error_on_missing_handler {
                    return Err(Error::HandlerLookup(name));
                }
                warn!(handler = %name, "Notified handler was not found");
                continue;
            }
            for handler in handlers {
                if self.ledger.notify(handler.id, &result.host) {
                    debug!(host = %result.host, handler = %handler.display_name(), "Notified handler");
                }
            }
        }
        Ok(())
    }

    /// Whether a notified host may run handlers at a flush
    fn can_run_handlers(&self, host: &str, iterator: &PlayIterator) -> bool {
        !self.ctx.unreachable_hosts.contains(host) && (self.force_handlers || !iterator.is_failed(host))
    }

    /// Run notified handlers, in declaration order, for the hosts that
    /// reached a flush point.
    ///
    /// Each handler's waiting list is cleared except for hosts that could
    /// still run it but have not reached the flush yet; those keep their
    /// notification for their own flush.
    pub async fn run_handlers(&mut self, iterator: &mut PlayIterator, reached: &[String]) -> Result<()> {
        self.ledger.reset_triggered();
        let handlers = self.ledger.handlers().to_vec();
        for handler in handlers {
            let waiting = self.ledger.consume(handler.id);
            let (flushed, deferred): (Vec<String>, Vec<String>) = waiting
                .into_iter()
                .partition(|h| reached.contains(h) || !self.can_run_handlers(h, iterator));
            for host in &deferred {
                self.ledger.notify(handler.id, host);
            }
            let eligible: Vec<String> = flushed
                .into_iter()
                .filter(|h| self.can_run_handlers(h, iterator))
                .collect();
            if eligible.is_empty() {
                continue;
            }

            info!(handler = %handler.display_name(), hosts = eligible.len(), "Running handler");
            self.emit(CallbackEvent::HandlerTaskStart {
                name: handler.display_name(),
            });
            let magic = self.magic_vars(iterator)?;
            if handler.run_once {
                self.set_run_once_targets(&handler, eligible.clone());
            }
            let mut dispatched = false;
            for host in &eligible {
                if self.ledger.has_triggered(handler.id, host) {
                    continue;
                }
                self.ledger.mark_triggered(handler.id, host);
                if handler.run_once && dispatched {
                    continue;
                }
                let vars = self.task_vars(host, &handler, &magic);
                self.queue_task(host, &handler, vars).await?;
                dispatched = true;
            }
            self.wait_on_pending_results(iterator).await?;
        }
        Ok(())
    }

    fn meta_condition(&self, task: &Task, host: &str, magic: &MagicVars) -> Result<bool> {
        if task.when.is_empty() {
            return Ok(true);
        }
        let vars = self.task_vars(host, task, magic);
        self.ctx.templar.evaluate_all(&task.when, &vars)
    }

    /// Interpret a meta task for the hosts that reached it
    pub async fn execute_meta(
        &mut self,
        task: &Task,
        hosts: &[String],
        iterator: &mut PlayIterator,
    ) -> Result<()> {
        let op = task.meta_op().unwrap_or_default().trim().to_string();
        debug!(op = %op, hosts = hosts.len(), "Running meta task");
        let magic = self.magic_vars(iterator)?;

        match op.as_str() {
            "noop" => {}
            "flush_handlers" => self.run_handlers(iterator, hosts).await?,
            "refresh_inventory" => {
                self.ctx.inventory.refresh_inventory()?;
                info!("Refreshed inventory");
            }
            "clear_facts" => {
                let mut triggered = false;
                for host in hosts {
                    if self.meta_condition(task, host, &magic)? {
                        triggered = true;
                        break;
                    }
                }
                if triggered {
                    // Every host of the play, not only those at this task
                    let play_hosts = self
                        .ctx
                        .inventory
                        .get_host_names(self.play.pattern(), false, true, None)?;
                    for host in &play_hosts {
                        self.ctx.variables.clear_facts(host)?;
                    }
                    info!(hosts = play_hosts.len(), "Cleared facts");
                }
            }
            "clear_host_errors" => {
                let all: Vec<String> = iterator
                    .hosts()
                    .filter(|h| !self.ctx.unreachable_hosts.contains(*h))
                    .map(String::from)
                    .collect();
                for host in &all {
                    if self.meta_condition(task, host, &magic)? {
                        iterator.clear_host_errors(host);
                        self.ctx.failed_hosts.shift_remove(host);
                    }
                }
            }
            "end_play" => {
                let first = hosts.first().map(String::as_str).unwrap_or_default();
                if self.meta_condition(task, first, &magic)? {
                    info!(play = %self.play.name, "Ending play");
                    let all: Vec<String> = iterator.hosts().map(String::from).collect();
                    for host in all {
                        if !self.ctx.unreachable_hosts.contains(&host) {
                            iterator.end_host(&host);
                        }
                    }
                }
            }
            "end_host" => {
                for host in hosts {
                    if self.meta_condition(task, host, &magic)? {
                        info!(host = %host, "Ending play for host");
                        iterator.end_host(host);
                    }
                }
            }
            "reset_connection" => {
                for host in hosts {
                    if let Err(e) = self.ctx.connections.reset(host).await {
                        warn!(host = %host, "Could not reset connection: {}", e);
                    }
                }
            }
            other => return Err(Error::InvalidMeta(other.to_string())),
        }
        Ok(())
    }

    /// Flush forced handlers and compute the batch outcome
    pub async fn finish(&mut self, iterator: &mut PlayIterator) -> Result<RunStatus> {
        self.wait_on_pending_results(iterator).await?;
        if self.force_handlers && self.ledger.has_pending() && !self.is_terminated() {
            let batch = self.batch.clone();
            self.run_handlers(iterator, &batch).await?;
        }

        let unreachable = self
            .batch
            .iter()
            .any(|h| self.ctx.unreachable_hosts.contains(h));
        Ok(if unreachable {
            RunStatus::UnreachableHosts
        } else if !iterator.get_failed_hosts().is_empty() {
            RunStatus::FailedHosts
        } else {
            RunStatus::Ok
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_codes() {
        assert_eq!(RunStatus::Ok.code(), 0);
        assert_eq!(RunStatus::RunError.code(), 1);
        assert_eq!(RunStatus::FailedHosts.code(), 2);
        assert_eq!(RunStatus::UnreachableHosts.code(), 4);
    }

    #[test]
    fn test_worst_status() {
        assert_eq!(RunStatus::Ok.worst(RunStatus::FailedHosts), RunStatus::FailedHosts);
        assert_eq!(
            RunStatus::UnreachableHosts.worst(RunStatus::FailedHosts),
            RunStatus::UnreachableHosts
        );
        assert_eq!(RunStatus::FailedHosts.worst(RunStatus::Ok), RunStatus::FailedHosts);
    }

    #[test]
    fn test_registry() {
        let registry = StrategyRegistry::default();
        assert_eq!(registry.names(), vec!["free", "linear"]);
        assert_eq!(registry.create("free").unwrap().name(), "free");
        assert!(matches!(registry.create("host_pinned"), Err(Error::UnknownStrategy(_))));
    }

    #[test]
    fn test_set_fact_detection() {
        assert!(is_set_fact("set_fact"));
        assert!(is_set_fact("ansible.builtin.set_fact"));
        assert!(!is_set_fact("setup"));
    }
}
