//! Per-host position in a play.
//!
//! Every host walks the same state machine:
//!
//! ```text
//! SETUP -> TASKS -> (RESCUE on failure) -> ALWAYS -> next block ... -> HANDLERS -> COMPLETE
//! ```
//!
//! [`PlayIterator::get_next_task_for_host`] advances a host and returns the
//! task it should run next. Strategies that need lockstep peek first and
//! commit the peeked state only for the hosts they actually schedule.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::trace;

use crate::playbook::{Block, Play, Task};

/// Where a host is in the play
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IteratingState {
    Setup,
    Tasks,
    Rescue,
    Always,
    Handlers,
    Complete,
}

/// Sections a host has failed in, as bit flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct FailedStates(u8);

impl FailedStates {
    pub const NONE: Self = Self(0);
    pub const SETUP: Self = Self(1);
    pub const TASKS: Self = Self(2);
    pub const RESCUE: Self = Self(4);
    pub const ALWAYS: Self = Self(8);
    pub const HANDLERS: Self = Self(16);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

/// One host's position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostState {
    pub cur_block: usize,
    pub cur_regular_task: usize,
    pub cur_rescue_task: usize,
    pub cur_always_task: usize,
    pub run_state: IteratingState,
    pub fail_state: FailedStates,
    pub did_rescue: bool,
    pending_setup: bool,
    pending_flush: bool,
}

impl HostState {
    fn new() -> Self {
        Self {
            cur_block: 0,
            cur_regular_task: 0,
            cur_rescue_task: 0,
            cur_always_task: 0,
            run_state: IteratingState::Setup,
            fail_state: FailedStates::NONE,
            did_rescue: false,
            pending_setup: false,
            pending_flush: false,
        }
    }

    fn next_block(&mut self) {
        self.cur_block += 1;
        self.cur_regular_task = 0;
        self.cur_rescue_task = 0;
        self.cur_always_task = 0;
        self.did_rescue = false;
        self.run_state = IteratingState::Tasks;
    }
}

impl fmt::Display for HostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "block={} task={} rescue={} always={} state={:?} fail={:#x} rescued={}",
            self.cur_block,
            self.cur_regular_task,
            self.cur_rescue_task,
            self.cur_always_task,
            self.run_state,
            self.fail_state.0,
            self.did_rescue
        )
    }
}

/// Iteration over one play for a batch of hosts
#[derive(Debug)]
pub struct PlayIterator {
    blocks: Vec<Block>,
    host_states: IndexMap<String, HostState>,
    setup_task: Option<Arc<Task>>,
    flush_task: Arc<Task>,
}

impl PlayIterator {
    /// Start every host in SETUP; `gather_facts` adds the implicit setup task
    pub fn new(play: &Play, hosts: &[String], gather_facts: bool) -> Self {
        let blocks = play.blocks.iter().filter(|b| !b.is_empty()).cloned().collect();
        Self {
            blocks,
            host_states: hosts.iter().map(|h| (h.clone(), HostState::new())).collect(),
            setup_task: gather_facts.then(|| Arc::new(Task::gather_facts())),
            flush_task: Arc::new(Task::meta("flush_handlers").named("Run handlers")),
        }
    }

    /// Hosts in iteration order
    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        self.host_states.keys().map(String::as_str)
    }

    pub fn get_state_for_host(&self, host: &str) -> Option<&HostState> {
        self.host_states.get(host)
    }

    pub fn set_state_for_host(&mut self, host: &str, state: HostState) {
        if let Some(current) = self.host_states.get_mut(host) {
            *current = state;
        }
    }

    /// Advance `host` unless `peek`; returns the state after advancing and
    /// the task to run, `None` once the host is complete
    pub fn get_next_task_for_host(&mut self, host: &str, peek: bool) -> (HostState, Option<Arc<Task>>) {
        let Some(current) = self.host_states.get(host) else {
            let mut state = HostState::new();
            state.run_state = IteratingState::Complete;
            return (state, None);
        };
        let mut state = current.clone();
        let task = self.advance(&mut state);
        trace!(host, state = %state, task = ?task.as_ref().map(|t| t.display_name()), "Next task");
        if !peek {
            self.set_state_for_host(host, state.clone());
        }
        (state, task)
    }

    fn advance(&self, state: &mut HostState) -> Option<Arc<Task>> {
        loop {
            match state.run_state {
                IteratingState::Setup => {
                    if !state.pending_setup {
                        if let Some(setup) = &self.setup_task {
                            state.pending_setup = true;
                            return Some(Arc::clone(setup));
                        }
                    }
                    state.pending_setup = false;
                    state.run_state = IteratingState::Tasks;
                }
                IteratingState::Tasks => {
                    let Some(block) = self.blocks.get(state.cur_block) else {
                        state.run_state = IteratingState::Handlers;
                        continue;
                    };
                    if state.fail_state.contains(FailedStates::TASKS) {
                        state.run_state = if block.rescue.is_empty() {
                            IteratingState::Always
                        } else {
                            IteratingState::Rescue
                        };
                        continue;
                    }
                    match block.block.get(state.cur_regular_task) {
                        Some(task) => {
                            state.cur_regular_task += 1;
                            return Some(Arc::clone(task));
                        }
                        None => state.run_state = IteratingState::Always,
                    }
                }
                IteratingState::Rescue => {
                    let block = &self.blocks[state.cur_block];
                    if state.fail_state.contains(FailedStates::RESCUE) {
                        state.run_state = IteratingState::Always;
                        continue;
                    }
                    match block.rescue.get(state.cur_rescue_task) {
                        Some(task) => {
                            state.cur_rescue_task += 1;
                            return Some(Arc::clone(task));
                        }
                        None => {
                            state.fail_state = FailedStates::NONE;
                            state.did_rescue = true;
                            state.run_state = IteratingState::Always;
                        }
                    }
                }
                IteratingState::Always => {
                    let block = &self.blocks[state.cur_block];
                    if state.fail_state.contains(FailedStates::ALWAYS) {
                        state.run_state = IteratingState::Complete;
                        continue;
                    }
                    match block.always.get(state.cur_always_task) {
                        Some(task) => {
                            state.cur_always_task += 1;
                            return Some(Arc::clone(task));
                        }
                        None if !state.fail_state.is_none() => {
                            state.run_state = IteratingState::Complete;
                        }
                        None => state.next_block(),
                    }
                }
                IteratingState::Handlers => {
                    if !state.pending_flush {
                        state.pending_flush = true;
                        return Some(Arc::clone(&self.flush_task));
                    }
                    state.run_state = IteratingState::Complete;
                }
                IteratingState::Complete => return None,
            }
        }
    }

    /// Record a failure in the host's current section and move it to the
    /// section that runs next: rescue, then always, then nothing
    pub fn mark_host_failed(&mut self, host: &str) {
        let Some(state) = self.host_states.get_mut(host) else {
            return;
        };
        let block = self.blocks.get(state.cur_block);
        let has_rescue = block.is_some_and(|b| !b.rescue.is_empty());
        let has_always = block.is_some_and(|b| !b.always.is_empty());
        match state.run_state {
            IteratingState::Setup => {
                state.fail_state.insert(FailedStates::SETUP);
                state.run_state = IteratingState::Complete;
            }
            IteratingState::Tasks => {
                state.fail_state.insert(FailedStates::TASKS);
                state.run_state = if has_rescue {
                    IteratingState::Rescue
                } else if has_always {
                    IteratingState::Always
                } else {
                    IteratingState::Complete
                };
            }
            IteratingState::Rescue => {
                state.fail_state.insert(FailedStates::RESCUE);
                state.run_state = if has_always {
                    IteratingState::Always
                } else {
                    IteratingState::Complete
                };
            }
            IteratingState::Always => {
                state.fail_state.insert(FailedStates::ALWAYS);
                state.run_state = IteratingState::Complete;
            }
            IteratingState::Handlers => {
                state.fail_state.insert(FailedStates::HANDLERS);
                state.run_state = IteratingState::Complete;
            }
            IteratingState::Complete => {}
        }
        trace!(host, state = %state, "Marked host failed");
    }

    /// Whether the host has failed for good; a host still inside its
    /// rescue or always section has not
    pub fn is_failed(&self, host: &str) -> bool {
        let Some(state) = self.host_states.get(host) else {
            return false;
        };
        if state.fail_state.is_none() {
            return false;
        }
        match state.run_state {
            IteratingState::Rescue if !state.fail_state.contains(FailedStates::RESCUE) => false,
            IteratingState::Always if !state.fail_state.contains(FailedStates::ALWAYS) => false,
            _ => !(state.did_rescue && !state.fail_state.contains(FailedStates::ALWAYS)),
        }
    }

    /// Hosts that failed for good, in iteration order
    pub fn get_failed_hosts(&self) -> Vec<String> {
        self.host_states
            .keys()
            .filter(|h| self.is_failed(h))
            .cloned()
            .collect()
    }

    /// Forget a host's failures
    pub fn clear_host_errors(&mut self, host: &str) {
        if let Some(state) = self.host_states.get_mut(host) {
            state.fail_state = FailedStates::NONE;
        }
    }

    /// Stop iterating for a host
    pub fn end_host(&mut self, host: &str) {
        if let Some(state) = self.host_states.get_mut(host) {
            state.run_state = IteratingState::Complete;
        }
    }

    /// Whether the host's next section would be the block's rescue
    pub fn is_any_block_rescuing(&self, state: &HostState) -> bool {
        state.run_state == IteratingState::Rescue
    }
}
