//! Handler notification bookkeeping.
//!
//! Handlers are tasks that run only when notified, at flush points. The
//! [`NotificationLedger`] records which hosts notified which handler since
//! the last flush and which handlers answer to a `listen` name:
//!
//! ```yaml
//! handlers:
//!   - name: restart nginx
//!     listen: restart web services
//!     service:
//!       name: nginx
//!       state: restarted
//! ```
//!
//! Lookup of a notification name tries, in order: the handler's (rendered)
//! name or its `"<role> : <name>"` form, then `"<parent> : <name>"` for each
//! enclosing include. Handlers listening on the name are always added.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::trace;
use uuid::Uuid;

use crate::playbook::Task;

/// Notifications and trigger guards for one play
#[derive(Debug, Default)]
pub struct NotificationLedger {
    handlers: Vec<Arc<Task>>,
    names: Vec<String>,
    listening: HashMap<String, Vec<Uuid>>,
    notified: HashMap<Uuid, Vec<String>>,
    triggered: HashSet<(Uuid, String)>,
}

impl NotificationLedger {
    /// Index a play's handlers; `render` resolves templated handler names
    pub fn new(handlers: Vec<Arc<Task>>, render: impl Fn(&str) -> String) -> Self {
        let mut listening: HashMap<String, Vec<Uuid>> = HashMap::new();
        for handler in &handlers {
            for name in &handler.listen {
                listening.entry(render(name)).or_default().push(handler.id);
            }
        }
        let names = handlers.iter().map(|h| render(h.get_name())).collect();
        Self {
            handlers,
            names,
            listening,
            notified: HashMap::new(),
            triggered: HashSet::new(),
        }
    }

    /// Handlers in declaration order
    pub fn handlers(&self) -> &[Arc<Task>] {
        &self.handlers
    }

    /// Handlers a notification name refers to, in declaration order
    pub fn lookup(&self, name: &str) -> Vec<Arc<Task>> {
        let exact: Vec<usize> = self
            .handlers
            .iter()
            .enumerate()
            .filter(|(i, h)| {
                self.names[*i] == name
                    || h.role
                        .as_ref()
                        .is_some_and(|role| format!("{} : {}", role, self.names[*i]) == name)
            })
            .map(|(i, _)| i)
            .collect();

        let mut found = if exact.is_empty() {
            self.handlers
                .iter()
                .enumerate()
                .filter(|(i, h)| {
                    h.parents
                        .iter()
                        .any(|parent| format!("{} : {}", parent, self.names[*i]) == name)
                })
                .map(|(i, _)| i)
                .collect()
        } else {
            exact
        };

        if let Some(ids) = self.listening.get(name) {
            for (i, handler) in self.handlers.iter().enumerate() {
                if ids.contains(&handler.id) && !found.contains(&i) {
                    found.push(i);
                }
            }
        }
        found.sort_unstable();
        found.into_iter().map(|i| Arc::clone(&self.handlers[i])).collect()
    }

    /// Record that `host` notified `handler`; false if it already had
    pub fn notify(&mut self, handler: Uuid, host: &str) -> bool {
        let hosts = self.notified.entry(handler).or_default();
        if hosts.iter().any(|h| h == host) {
            return false;
        }
        trace!(%handler, host, "Handler notified");
        hosts.push(host.to_string());
        true
    }

    /// Hosts waiting on a handler, in notification order
    pub fn notified_hosts(&self, handler: Uuid) -> &[String] {
        self.notified.get(&handler).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Take and clear the hosts waiting on a handler
    pub fn consume(&mut self, handler: Uuid) -> Vec<String> {
        self.notified.remove(&handler).unwrap_or_default()
    }

    /// Whether any handler has waiting hosts
    pub fn has_pending(&self) -> bool {
        self.notified.values().any(|hosts| !hosts.is_empty())
    }

    pub fn has_triggered(&self, handler: Uuid, host: &str) -> bool {
        self.triggered.contains(&(handler, host.to_string()))
    }

    pub fn mark_triggered(&mut self, handler: Uuid, host: &str) {
        self.triggered.insert((handler, host.to_string()));
    }

    /// Start a new flush: nothing has triggered yet
    pub fn reset_triggered(&mut self) {
        self.triggered.clear();
    }

    /// Drop a host from every pending notification
    pub fn forget_host(&mut self, host: &str) {
        for hosts in self.notified.values_mut() {
            hosts.retain(|h| h != host);
        }
        self.notified.retain(|_, hosts| !hosts.is_empty());
    }
}
