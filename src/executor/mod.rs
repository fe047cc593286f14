//! Core execution engine for Armada
//!
//! This module runs plays against the inventory:
//! - [`PlaybookExecutor`] owns the run-wide [`ExecutionContext`] and splits
//!   plays into serial batches
//! - a [`Strategy`](strategy::Strategy) drives each batch, dispatching
//!   (host, task) units onto a bounded [`WorkerPool`](pool::WorkerPool)
//! - workers report back through the [`ResultAggregator`](results::ResultAggregator)
//! - the strategy applies results serially: stats, facts, inventory changes,
//!   handler notifications

pub mod iterator;
pub mod pool;
pub mod results;
pub mod stats;
pub mod strategy;
pub mod task_result;
pub mod worker;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indexmap::IndexSet;
use tracing::{info, instrument, warn};

use crate::cache::FactCacheRegistry;
use crate::callback::{CallbackEvent, CallbackManager};
use crate::config::Config;
use crate::connection::ConnectionRegistry;
use crate::error::{Error, Result};
use crate::inventory::InventoryManager;
use crate::modules::{ActionDispatcher, ActionRegistry};
use crate::playbook::{Play, SerialSpec};
use crate::template::{JinjaTemplar, Templar, Vars};
use crate::vars::VariableManager;

pub use iterator::{HostState, IteratingState, PlayIterator};
pub use stats::{AggregateStats, HostStats, StatKind};
pub use strategy::{RunStatus, Strategy, StrategyBase, StrategyRegistry};
pub use task_result::{ResultPayload, TaskResult};

/// Everything a run shares, threaded explicitly through the strategies
pub struct ExecutionContext {
    pub config: Config,
    pub inventory: InventoryManager,
    pub variables: VariableManager,
    pub stats: AggregateStats,
    pub callbacks: CallbackManager,
    pub templar: Arc<dyn Templar>,
    pub actions: Arc<dyn ActionDispatcher>,
    pub connections: Arc<ConnectionRegistry>,
    /// Set to stop dispatching
    pub terminated: Arc<AtomicBool>,
    /// Hosts unreachable at any point of the run
    pub unreachable_hosts: IndexSet<String>,
    /// Hosts that failed without being rescued
    pub failed_hosts: IndexSet<String>,
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("forks", &self.config.forks())
            .field("unreachable_hosts", &self.unreachable_hosts)
            .field("failed_hosts", &self.failed_hosts)
            .field("terminated", &self.terminated.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl ExecutionContext {
    /// Context with the built-in collaborators; the fact cache backend comes
    /// from the configuration
    pub fn new(config: Config, inventory: InventoryManager, callbacks: CallbackManager) -> Result<Self> {
        let fact_cache = FactCacheRegistry::default().create(&config.fact_caching)?;
        Ok(Self {
            config,
            inventory,
            variables: VariableManager::new(fact_cache),
            stats: AggregateStats::new(),
            callbacks,
            templar: Arc::new(JinjaTemplar::new()),
            actions: Arc::new(ActionRegistry::with_builtins()),
            connections: Arc::new(ConnectionRegistry::default()),
            terminated: Arc::new(AtomicBool::new(false)),
            unreachable_hosts: IndexSet::new(),
            failed_hosts: IndexSet::new(),
        })
    }
}

/// Split hosts into serial batches; the last size repeats
pub fn serial_batches(hosts: &[String], serial: &[SerialSpec]) -> Vec<Vec<String>> {
    if serial.is_empty() || hosts.is_empty() {
        return vec![hosts.to_vec()];
    }
    let total = hosts.len();
    let mut batches = Vec::new();
    let mut rest = hosts;
    let mut specs = serial.iter();
    let mut current = &serial[0];
    while !rest.is_empty() {
        if let Some(spec) = specs.next() {
            current = spec;
        }
        let size = current.batch_size(total).min(rest.len());
        let (batch, tail) = rest.split_at(size);
        batches.push(batch.to_vec());
        rest = tail;
    }
    batches
}

/// Runs plays: the task queue manager
pub struct PlaybookExecutor {
    ctx: ExecutionContext,
    strategies: StrategyRegistry,
}

impl fmt::Debug for PlaybookExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaybookExecutor")
            .field("ctx", &self.ctx)
            .field("strategies", &self.strategies)
            .finish()
    }
}

impl PlaybookExecutor {
    pub fn new(config: Config, inventory: InventoryManager, callbacks: CallbackManager) -> Result<Self> {
        Ok(Self::from_context(ExecutionContext::new(config, inventory, callbacks)?))
    }

    pub fn from_context(ctx: ExecutionContext) -> Self {
        Self {
            ctx,
            strategies: StrategyRegistry::default(),
        }
    }

    /// Replace the action dispatcher
    pub fn with_actions(mut self, actions: Arc<dyn ActionDispatcher>) -> Self {
        self.ctx.actions = actions;
        self
    }

    pub fn with_templar(mut self, templar: Arc<dyn Templar>) -> Self {
        self.ctx.templar = templar;
        self
    }

    pub fn with_connections(mut self, connections: Arc<ConnectionRegistry>) -> Self {
        self.ctx.connections = connections;
        self
    }

    pub fn with_variables(mut self, variables: VariableManager) -> Self {
        self.ctx.variables = variables;
        self
    }

    /// Variables with the highest precedence
    pub fn with_extra_vars(mut self, extra_vars: Vars) -> Self {
        let variables = std::mem::take(&mut self.ctx.variables);
        self.ctx.variables = variables.with_extra_vars(extra_vars);
        self
    }

    pub fn with_strategies(mut self, strategies: StrategyRegistry) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut ExecutionContext {
        &mut self.ctx
    }

    pub fn inventory(&self) -> &InventoryManager {
        &self.ctx.inventory
    }

    pub fn inventory_mut(&mut self) -> &mut InventoryManager {
        &mut self.ctx.inventory
    }

    pub fn variables(&self) -> &VariableManager {
        &self.ctx.variables
    }

    pub fn stats(&self) -> &AggregateStats {
        &self.ctx.stats
    }

    /// Flag that stops the run when set, usable from another task
    pub fn terminate_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.ctx.terminated)
    }

    /// Stop dispatching; in-flight workers finish on their own
    pub fn terminate(&self) {
        self.ctx.terminated.store(true, Ordering::SeqCst);
    }

    pub fn is_terminated(&self) -> bool {
        self.ctx.terminated.load(Ordering::SeqCst)
    }

    /// Run one play over its hosts, batch by batch
    #[instrument(skip(self, play), fields(play_name = %play.name))]
    pub async fn run(&mut self, play: &Play) -> Result<RunStatus> {
        info!("Starting play: {}", play.name);
        if self.is_terminated() {
            return Ok(RunStatus::RunError);
        }

        self.ctx.callbacks.emit(CallbackEvent::PlayStart {
            name: play.name.clone(),
            hosts: play.hosts.clone(),
        });

        let hosts = self
            .ctx
            .inventory
            .get_host_names(play.pattern(), false, false, Some(play.order))?;
        if hosts.is_empty() {
            warn!("No hosts matched for play: {}", play.name);
            self.ctx.callbacks.emit(CallbackEvent::NoHostsMatched {
                play: play.name.clone(),
            });
            self.ctx.callbacks.flush().await;
            return Ok(RunStatus::Ok);
        }

        let strategy_name = play
            .strategy
            .clone()
            .unwrap_or_else(|| self.ctx.config.defaults.strategy.clone());
        let strategy = self.strategies.create(&strategy_name)?;
        let gather_facts = play.gather_facts.unwrap_or(self.ctx.config.defaults.gathering);
        info!(strategy = strategy.name(), hosts = hosts.len(), "Running play");

        let mut status = RunStatus::Ok;
        for batch in serial_batches(&hosts, &play.serial) {
            let down_before = self.ctx.failed_hosts.len() + self.ctx.unreachable_hosts.len();

            let mut iterator = PlayIterator::new(play, &batch, gather_facts);
            for host in &batch {
                if self.ctx.failed_hosts.contains(host) {
                    iterator.mark_host_failed(host);
                }
            }

            self.ctx.inventory.restrict_to_hosts(batch.iter().cloned());
            let outcome = {
                let mut base = StrategyBase::new(&mut self.ctx, play, batch.clone());
                strategy.run(&mut base, &mut iterator).await
            };
            self.ctx.inventory.remove_restriction();

            let batch_status = match outcome {
                Ok(batch_status) => batch_status,
                Err(Error::Terminated) => {
                    warn!("Execution terminated");
                    status = RunStatus::RunError;
                    break;
                }
                Err(e) => {
                    self.ctx.callbacks.flush().await;
                    return Err(e);
                }
            };
            status = status.worst(batch_status);

            let down_after = self.ctx.failed_hosts.len() + self.ctx.unreachable_hosts.len();
            if down_after.saturating_sub(down_before) >= batch.len() {
                warn!("All hosts in the batch failed, not continuing with the play");
                break;
            }
        }

        self.ctx.callbacks.flush().await;
        Ok(status)
    }

    /// Run plays in order and report the statistics
    #[instrument(skip(self, plays), fields(plays = plays.len()))]
    pub async fn run_playbook(&mut self, plays: &[Play]) -> Result<RunStatus> {
        let mut status = RunStatus::Ok;
        let mut outcome = Ok(());
        for play in plays {
            match self.run(play).await {
                Ok(play_status) => status = status.worst(play_status),
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
            if self.is_terminated() {
                break;
            }
        }
        // Stats are reported even when a play aborted the run
        self.ctx
            .callbacks
            .emit(CallbackEvent::Stats(self.ctx.stats.clone()));
        self.ctx.callbacks.flush().await;
        outcome?;
        info!(status = %status, "Playbook finished");
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosts(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("h{}", i)).collect()
    }

    #[test]
    fn test_serial_batches_default_is_one_batch() {
        assert_eq!(serial_batches(&hosts(3), &[]), vec![hosts(3)]);
    }

    #[test]
    fn test_serial_batches_last_size_repeats() {
        let batches = serial_batches(&hosts(6), &[SerialSpec::Fixed(1), SerialSpec::Fixed(2)]);
        let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![1, 2, 2, 1]);
        assert_eq!(batches.concat(), hosts(6));
    }

    #[test]
    fn test_serial_batches_percentage() {
        let batches = serial_batches(&hosts(4), &[SerialSpec::Percentage("50%".into())]);
        assert_eq!(batches, vec![hosts(2), vec!["h3".to_string(), "h4".to_string()]]);
    }
}
