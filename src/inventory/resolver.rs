//! Pattern resolution against the inventory store.
//!
//! The resolver never mutates the store. It memoizes two things: the final
//! host list per pattern signature, and the match list per term. Both caches
//! are dropped together whenever the inventory changes.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use indexmap::IndexSet;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use super::data::InventoryData;
use super::group::ALL;
use super::pattern::{order_patterns, PatternInput, PatternOp, Term, TermExpr};
use crate::error::{Error, Result};

/// Final ordering applied to a resolved host list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostOrder {
    /// Resolution order
    #[default]
    Inventory,
    /// By host name
    Sorted,
    /// By host name, descending
    ReverseSorted,
    /// Resolution order reversed
    ReverseInventory,
    /// Random
    Shuffle,
}

impl HostOrder {
    /// Reorder host names in place
    pub fn apply(self, hosts: &mut [String]) {
        match self {
            HostOrder::Inventory => {}
            HostOrder::Sorted => hosts.sort(),
            HostOrder::ReverseSorted => {
                hosts.sort();
                hosts.reverse();
            }
            HostOrder::ReverseInventory => hosts.reverse(),
            HostOrder::Shuffle => hosts.shuffle(&mut rand::thread_rng()),
        }
    }
}

impl FromStr for HostOrder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "inventory" => Ok(HostOrder::Inventory),
            "sorted" => Ok(HostOrder::Sorted),
            "reverse_sorted" => Ok(HostOrder::ReverseSorted),
            "reverse_inventory" => Ok(HostOrder::ReverseInventory),
            "shuffle" => Ok(HostOrder::Shuffle),
            other => Err(Error::Config(format!("invalid 'order' specified for hosts: {other}"))),
        }
    }
}

impl fmt::Display for HostOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HostOrder::Inventory => "inventory",
            HostOrder::Sorted => "sorted",
            HostOrder::ReverseSorted => "reverse_sorted",
            HostOrder::ReverseInventory => "reverse_inventory",
            HostOrder::Shuffle => "shuffle",
        };
        write!(f, "{name}")
    }
}

/// Pattern, subset terms and host restriction a result was computed for
type PatternKey = (PatternInput, Option<Vec<String>>, Option<Vec<String>>);

/// Memoizing pattern evaluator
#[derive(Debug, Default)]
pub struct PatternResolver {
    pattern_cache: Mutex<HashMap<PatternKey, Vec<String>>>,
    term_cache: Mutex<HashMap<String, Vec<String>>>,
}

impl PatternResolver {
    /// Create a resolver with empty caches
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop both caches
    pub fn clear(&self) {
        self.pattern_cache.lock().clear();
        self.term_cache.lock().clear();
    }

    /// Number of memoized pattern signatures
    pub fn cached_patterns(&self) -> usize {
        self.pattern_cache.lock().len()
    }

    /// Resolve a pattern to ordered, deduplicated host names.
    ///
    /// `subset` is a list of pattern terms whose matches the result is
    /// intersected with; `restrict_to` filters by host name.
    pub fn resolve(
        &self,
        data: &InventoryData,
        pattern: &PatternInput,
        restrict_to: Option<&IndexSet<String>>,
        subset: Option<&[String]>,
        order: HostOrder,
    ) -> Result<Vec<String>> {
        let key: PatternKey = (
            pattern.clone(),
            subset.map(<[String]>::to_vec),
            restrict_to.map(|r| r.iter().cloned().collect()),
        );

        let cached = self.pattern_cache.lock().get(&key).cloned();
        let mut hosts = match cached {
            Some(hosts) => {
                trace!(pattern = ?key.0, "Pattern cache hit");
                hosts
            }
            None => {
                let terms = order_patterns(&pattern.split())?;
                let mut hosts = self.evaluate(data, &terms)?;

                if let Some(subset) = subset {
                    let subset_terms = order_patterns(subset)?;
                    let allowed: HashSet<String> =
                        self.evaluate(data, &subset_terms)?.into_iter().collect();
                    hosts.retain(|h| allowed.contains(h));
                }
                if let Some(restriction) = restrict_to {
                    hosts.retain(|h| restriction.contains(h));
                }

                self.pattern_cache.lock().insert(key, hosts.clone());
                hosts
            }
        };

        order.apply(&mut hosts);
        Ok(hosts)
    }

    /// Apply ordered terms: unions, then intersections, then exclusions
    fn evaluate(&self, data: &InventoryData, terms: &[Term]) -> Result<Vec<String>> {
        let mut result: IndexSet<String> = IndexSet::new();
        for term in terms {
            let matched = self.match_term(data, term)?;
            match term.op {
                PatternOp::Union => result.extend(matched),
                PatternOp::Intersect => {
                    let keep: HashSet<&String> = matched.iter().collect();
                    result.retain(|h| keep.contains(h));
                }
                PatternOp::Exclude => {
                    for host in &matched {
                        result.shift_remove(host);
                    }
                }
            }
        }
        Ok(result.into_iter().collect())
    }

    fn match_term(&self, data: &InventoryData, term: &Term) -> Result<Vec<String>> {
        if let Some(hit) = self.term_cache.lock().get(&term.key) {
            return Ok(hit.clone());
        }

        let mut hosts = enumerate_matches(data, &term.expr);
        if let Some(subscript) = term.subscript {
            hosts = subscript.apply(&term.key, hosts)?;
        }

        self.term_cache.lock().insert(term.key.clone(), hosts.clone());
        Ok(hosts)
    }
}

/// Hosts matched by a single name expression.
///
/// An exact declared host name wins outright. Otherwise groups are matched
/// first; host names are matched too when no group matched or the
/// expression is a glob, regex, or dotted name.
fn enumerate_matches(data: &InventoryData, expr: &TermExpr) -> Vec<String> {
    let source = expr.source();
    if data.has_host(source) {
        return vec![source.to_string()];
    }

    let mut results: IndexSet<String> = IndexSet::new();
    let mut matched_group = false;
    for group in data.groups() {
        if expr.matches(&group.name) {
            matched_group = true;
            results.extend(data.get_hosts_for_group(&group.name));
        }
    }

    if !matched_group || expr.also_matches_hosts() {
        for host in data.hosts() {
            if expr.matches(&host.name) {
                results.insert(host.name.clone());
            }
        }
    }

    if results.is_empty() && data.is_localhost_alias(source) {
        if let Some(host) = data.get_host(source) {
            results.insert(host.name.clone());
        }
    }

    if results.is_empty() && source != ALL {
        warn!("Could not match supplied host pattern, ignoring: {}", source);
    }

    results.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn inventory() -> InventoryData {
        let mut data = InventoryData::new();
        for group in ["web", "db", "staging"] {
            data.add_group(group).unwrap();
        }
        for host in ["web1", "web2", "web3"] {
            data.add_host(host, Some("web")).unwrap();
        }
        for host in ["db1", "db2", "db3", "db4"] {
            data.add_host(host, Some("db")).unwrap();
        }
        data.add_host_to_group("staging", "web2").unwrap();
        data.add_host_to_group("staging", "db1").unwrap();
        data.reconcile();
        data
    }

    fn resolve(data: &InventoryData, pattern: &str) -> Vec<String> {
        PatternResolver::new()
            .resolve(data, &pattern.into(), None, None, HostOrder::Inventory)
            .unwrap()
    }

    #[test]
    fn test_union_intersection_exclusion() {
        let data = inventory();
        assert_eq!(resolve(&data, "web,staging"), vec!["web1", "web2", "web3", "db1"]);
        assert_eq!(resolve(&data, "web,!staging"), vec!["web1", "web3"]);
        assert_eq!(resolve(&data, "web,&staging"), vec!["web2"]);
        assert_eq!(resolve(&data, "&staging,web"), vec!["web2"]);
    }

    #[test]
    fn test_exclusion_only_starts_from_all() {
        let data = inventory();
        assert_eq!(
            resolve(&data, "!db"),
            vec!["web1", "web2", "web3"]
        );
    }

    #[test]
    fn test_glob_and_regex_terms() {
        let data = inventory();
        assert_eq!(resolve(&data, "db[1-2]*"), vec!["db1", "db2"]);
        assert_eq!(resolve(&data, "~(web|db)1"), vec!["web1", "db1"]);
        assert_eq!(resolve(&data, "w*"), vec!["web1", "web2", "web3"]);
    }

    #[test]
    fn test_subscripts() {
        let data = inventory();
        assert_eq!(resolve(&data, "db[1:3]"), vec!["db1", "db2", "db3"]);
        assert_eq!(resolve(&data, "db[2]"), vec!["db2"]);
        assert_eq!(resolve(&data, "db[:-1]"), vec!["db1", "db2", "db3", "db4"]);
        assert_eq!(resolve(&data, "db[3:]"), vec!["db3", "db4"]);

        let resolver = PatternResolver::new();
        assert!(matches!(
            resolver.resolve(&data, &"db[9]".into(), None, None, HostOrder::Inventory),
            Err(Error::SubscriptOutOfRange(_))
        ));
        assert!(matches!(
            resolver.resolve(&data, &"db[-1]".into(), None, None, HostOrder::Inventory),
            Err(Error::Parse { .. })
        ));
    }

    #[test]
    fn test_exact_host_short_circuits() {
        let mut data = inventory();
        data.add_host("web*", Some("staging")).unwrap();
        data.reconcile();
        assert_eq!(resolve(&data, "web*"), vec!["web*"]);
    }

    #[test]
    fn test_unmatched_term_is_empty() {
        let data = inventory();
        assert!(resolve(&data, "nosuchgroup").is_empty());
    }

    #[test]
    fn test_localhost_alias_materializes() {
        let data = inventory();
        assert_eq!(resolve(&data, "localhost"), vec!["localhost"]);
        assert!(!resolve(&data, "all").contains(&"localhost".to_string()));
    }

    #[test]
    fn test_subset_and_restriction() {
        let data = inventory();
        let resolver = PatternResolver::new();
        let subset = vec!["staging".to_string()];
        let hosts = resolver
            .resolve(&data, &"all".into(), None, Some(&subset), HostOrder::Inventory)
            .unwrap();
        assert_eq!(hosts, vec!["web2", "db1"]);

        let restriction: IndexSet<String> = ["db1".to_string(), "db4".to_string()].into_iter().collect();
        let hosts = resolver
            .resolve(&data, &"db".into(), Some(&restriction), None, HostOrder::Inventory)
            .unwrap();
        assert_eq!(hosts, vec!["db1", "db4"]);
    }

    #[test]
    fn test_cache_keeps_subset_apart_from_pattern_text() {
        let data = inventory();
        let resolver = PatternResolver::new();
        let subset = vec!["staging".to_string()];
        let narrowed = resolver
            .resolve(&data, &"all".into(), None, Some(&subset), HostOrder::Inventory)
            .unwrap();
        assert_eq!(narrowed, vec!["web2", "db1"]);

        let lookalike = resolver.resolve(&data, &r#"all:["staging"]"#.into(), None, None, HostOrder::Inventory);
        assert_ne!(lookalike.ok(), Some(narrowed));

        let listed = resolver
            .resolve(&data, &PatternInput::List(vec!["web".into()]), None, None, HostOrder::Inventory)
            .unwrap();
        assert_eq!(listed, vec!["web1", "web2", "web3"]);
        let text = resolver.resolve(&data, &r#"["web"]"#.into(), None, None, HostOrder::Inventory);
        assert_ne!(text.ok(), Some(listed));
    }

    #[test]
    fn test_ordering() {
        let data = inventory();
        let resolver = PatternResolver::new();
        let sorted = resolver
            .resolve(&data, &"db,web".into(), None, None, HostOrder::Sorted)
            .unwrap();
        assert_eq!(sorted, vec!["db1", "db2", "db3", "db4", "web1", "web2", "web3"]);
        let reversed = resolver
            .resolve(&data, &"db,web".into(), None, None, HostOrder::ReverseInventory)
            .unwrap();
        assert_eq!(reversed, vec!["web3", "web2", "web1", "db4", "db3", "db2", "db1"]);
        let mut shuffled = resolver
            .resolve(&data, &"db,web".into(), None, None, HostOrder::Shuffle)
            .unwrap();
        shuffled.sort();
        assert_eq!(shuffled, sorted);
        assert!("bogus".parse::<HostOrder>().is_err());
    }

    #[test]
    fn test_cache_is_pure_memoization() {
        let data = inventory();
        let resolver = PatternResolver::new();
        let first = resolver
            .resolve(&data, &"web,!staging".into(), None, None, HostOrder::Inventory)
            .unwrap();
        let second = resolver
            .resolve(&data, &"web,!staging".into(), None, None, HostOrder::Inventory)
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(resolver.cached_patterns(), 1);
        resolver.clear();
        let third = resolver
            .resolve(&data, &"web,!staging".into(), None, None, HostOrder::Inventory)
            .unwrap();
        assert_eq!(first, third);
    }
}
