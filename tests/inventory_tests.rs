//! Integration tests for inventory sources and host patterns
//!
//! This test suite covers:
//! 1. YAML, INI, script and host list sources
//! 2. Variable inheritance across the group graph
//! 3. Pattern algebra (union, intersection, exclusion, subscripts)
//! 4. Pattern properties over generated inventories

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use common::*;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::json;

use armada::config::InventoryConfig;
use armada::error::Error;
use armada::inventory::{HostOrder, InventoryData, InventoryManager};
use armada::loader::YamlLoader;

fn manager_for(sources: Vec<String>) -> InventoryManager {
    let config = InventoryConfig {
        sources,
        unparsed_is_failed: true,
        ..InventoryConfig::default()
    };
    let mut manager = InventoryManager::new(config, Arc::new(YamlLoader::default())).unwrap();
    manager.parse_sources().unwrap();
    manager
}

fn names(manager: &InventoryManager, pattern: &str) -> Vec<String> {
    manager.list_hosts(pattern).unwrap()
}

const YAML_INVENTORY: &str = r#"
all:
  vars:
    ntp_server: ntp.example.com
  children:
    web:
      hosts:
        "web[1:3]":
          http_port: 80
      vars:
        tier: frontend
    db:
      hosts:
        db1:
        db2:
          ansible_port: 5433
      vars:
        tier: backend
    prod:
      children:
        web:
        db:
      vars:
        env: production
"#;

const INI_INVENTORY: &str = r#"
# ungrouped first
bastion ansible_host=10.0.0.1

[web]
web1 http_port=8080
web2

[db]
db[1:2]

[db:vars]
replicated=yes
max_conn=200

[prod:children]
web
db
"#;

// ============================================================================
// Sources
// ============================================================================

#[test]
fn test_yaml_source_with_ranges_and_children() {
    let ctx = TestContext::new().unwrap();
    let path = ctx.create_file("hosts.yml", YAML_INVENTORY).unwrap();
    let manager = manager_for(vec![path.to_string_lossy().to_string()]);

    assert_eq!(names(&manager, "web"), vec!["web1", "web2", "web3"]);
    assert_eq!(names(&manager, "prod"), vec!["web1", "web2", "web3", "db1", "db2"]);
    assert_eq!(
        manager.list_groups(),
        vec!["all", "db", "prod", "ungrouped", "web"]
    );

    let vars = manager.data().host_vars("web2");
    assert_eq!(vars["ntp_server"], json!("ntp.example.com"));
    assert_eq!(vars["tier"], json!("frontend"));
    assert_eq!(vars["env"], json!("production"));
    assert_eq!(vars["http_port"], json!(80));
    assert_eq!(manager.data().host_vars("db2")["ansible_port"], json!(5433));
}

#[test]
fn test_ini_source_types_and_children() {
    let ctx = TestContext::new().unwrap();
    let path = ctx.create_file("hosts", INI_INVENTORY).unwrap();
    let manager = manager_for(vec![path.to_string_lossy().to_string()]);

    assert_eq!(names(&manager, "ungrouped"), vec!["bastion"]);
    assert_eq!(names(&manager, "prod"), vec!["web1", "web2", "db1", "db2"]);

    let db = manager.data().host_vars("db2");
    assert_eq!(db["replicated"], json!(true));
    assert_eq!(db["max_conn"], json!(200));
    assert_eq!(manager.data().host_vars("web1")["http_port"], json!(8080));
    assert_eq!(
        manager.data().host_vars("bastion")["ansible_host"],
        json!("10.0.0.1")
    );
}

#[test]
fn test_ini_rejects_malformed_section() {
    let ctx = TestContext::new().unwrap();
    let path = ctx.create_file("broken", "[web:bogus]\nweb1\n").unwrap();
    let config = InventoryConfig {
        sources: vec![path.to_string_lossy().to_string()],
        unparsed_is_failed: true,
        ..InventoryConfig::default()
    };
    let mut manager = InventoryManager::new(config, Arc::new(YamlLoader::default())).unwrap();
    assert!(matches!(
        manager.parse_sources(),
        Err(Error::InventorySource { .. })
    ));
}

#[cfg(unix)]
#[test]
fn test_script_source() {
    let ctx = TestContext::new().unwrap();
    let script = ctx
        .create_script(
            "inventory.sh",
            r#"#!/bin/sh
cat <<'EOF'
{
  "web": {"hosts": ["web1", "web2"], "vars": {"tier": "frontend"}},
  "prod": {"children": ["web"]},
  "_meta": {"hostvars": {"web1": {"rack": 7}}}
}
EOF
"#,
        )
        .unwrap();
    let manager = manager_for(vec![script.to_string_lossy().to_string()]);

    assert_eq!(names(&manager, "prod"), vec!["web1", "web2"]);
    let vars = manager.data().host_vars("web1");
    assert_eq!(vars["rack"], json!(7));
    assert_eq!(vars["tier"], json!("frontend"));
}

#[test]
fn test_host_list_source_with_port() {
    let manager = manager_for(vec!["web1:2222,web2".to_string()]);
    assert_eq!(names(&manager, "all"), vec!["web1", "web2"]);
    assert_eq!(manager.data().host_vars("web1")["ansible_port"], json!(2222));
}

#[test]
fn test_multiple_sources_merge() {
    let ctx = TestContext::new().unwrap();
    let yaml = ctx.create_file("a/hosts.yml", YAML_INVENTORY).unwrap();
    let ini = ctx.create_file("b/hosts", "[web]\nweb9\n").unwrap();
    let manager = manager_for(vec![
        yaml.to_string_lossy().to_string(),
        ini.to_string_lossy().to_string(),
    ]);

    assert_eq!(names(&manager, "web"), vec!["web1", "web2", "web3", "web9"]);
}

#[test]
fn test_host_vars_directory_next_to_source() {
    let ctx = TestContext::new().unwrap();
    let path = ctx.create_file("hosts", "[web]\nweb1\nweb2\n").unwrap();
    ctx.create_file("group_vars/web.yml", "tier: frontend\nhttp_port: 80\n")
        .unwrap();
    ctx.create_file("host_vars/web2.yml", "http_port: 8080\n").unwrap();
    let manager = manager_for(vec![path.to_string_lossy().to_string()]);

    assert_eq!(manager.data().host_vars("web1")["http_port"], json!(80));
    assert_eq!(manager.data().host_vars("web2")["http_port"], json!(8080));
    assert_eq!(manager.data().host_vars("web2")["tier"], json!("frontend"));
}

// ============================================================================
// Pattern algebra through the manager
// ============================================================================

fn sample() -> InventoryManager {
    InventoryBuilder::new()
        .group("web", &["web1", "web2", "web3"])
        .group("db", &["db1", "db2", "db3", "db4"])
        .group("staging", &["web2", "db1"])
        .child("prod", "web")
        .child("prod", "db")
        .build()
}

#[test]
fn test_pattern_operators() {
    let manager = sample();
    assert_eq!(names(&manager, "web:db"), vec!["web1", "web2", "web3", "db1", "db2", "db3", "db4"]);
    assert_eq!(names(&manager, "prod:&staging"), vec!["web2", "db1"]);
    assert_eq!(names(&manager, "prod:!staging"), vec!["web1", "web3", "db2", "db3", "db4"]);
    assert_eq!(names(&manager, "!staging:&web"), names(&manager, "web:&web:!staging"));
    assert_eq!(names(&manager, "web, db[1:2]"), vec!["web1", "web2", "web3", "db1", "db2"]);
}

#[test]
fn test_pattern_list_input() {
    let manager = sample();
    let hosts = manager
        .get_host_names(vec!["db[3:]".to_string(), "!db4".to_string()], false, false, None)
        .unwrap();
    assert_eq!(hosts, vec!["db3"]);
}

#[test]
fn test_subscript_out_of_range_is_an_error() {
    let manager = sample();
    assert!(matches!(
        manager.list_hosts("web[5]"),
        Err(Error::SubscriptOutOfRange(_))
    ));
    assert_eq!(names(&manager, "web[2:10]"), vec!["web2", "web3"]);
}

#[test]
fn test_regex_and_glob_patterns() {
    let manager = sample();
    assert_eq!(names(&manager, "~db[24]"), vec!["db2", "db4"]);
    assert_eq!(names(&manager, "*2"), vec!["web2", "db2"]);
    assert_eq!(names(&manager, "stag*"), vec!["web2", "db1"]);
}

#[test]
fn test_order_applies_after_resolution() {
    let manager = sample();
    let hosts = manager
        .get_host_names("staging", false, false, Some(HostOrder::ReverseSorted))
        .unwrap();
    assert_eq!(hosts, vec!["web2", "db1"]);
    let hosts = manager
        .get_host_names("web:db[1]", false, false, Some(HostOrder::Sorted))
        .unwrap();
    assert_eq!(hosts, vec!["db1", "web1", "web2", "web3"]);
}

#[test]
fn test_limit_intersects_every_query() {
    let mut manager = sample();
    manager.subset(Some("staging:db4")).unwrap();
    assert_eq!(names(&manager, "db"), vec!["db1", "db4"]);
    assert_eq!(names(&manager, "web"), vec!["web2"]);
    manager.subset(None).unwrap();
    assert_eq!(names(&manager, "web").len(), 3);
}

// ============================================================================
// Properties
// ============================================================================

const GROUPS: [&str; 4] = ["g0", "g1", "g2", "g3"];

fn generated(membership: &[[bool; 4]]) -> InventoryData {
    let mut data = InventoryData::new();
    for group in GROUPS {
        data.add_group(group).unwrap();
    }
    for (i, groups) in membership.iter().enumerate() {
        let host = format!("h{i}");
        data.add_host(&host, None).unwrap();
        for (g, member) in groups.iter().enumerate() {
            if *member {
                data.add_host_to_group(GROUPS[g], &host).unwrap();
            }
        }
    }
    data.reconcile();
    data
}

fn membership() -> impl Strategy<Value = Vec<[bool; 4]>> {
    prop::collection::vec(prop::array::uniform4(any::<bool>()), 1..12)
}

fn manager_from(data: InventoryData) -> InventoryManager {
    InventoryManager::from_data(data, Arc::new(YamlLoader::default()))
}

proptest! {
    #[test]
    fn prop_union_is_ordered_dedup_concat(m in membership(), a in 0..4usize, b in 0..4usize) {
        let data = generated(&m);
        let mut expected = data.get_hosts_for_group(GROUPS[a]);
        for host in data.get_hosts_for_group(GROUPS[b]) {
            if !expected.contains(&host) {
                expected.push(host);
            }
        }
        let manager = manager_from(data);
        let pattern = format!("{},{}", GROUPS[a], GROUPS[b]);
        prop_assert_eq!(manager.list_hosts(&pattern).unwrap(), expected);
    }

    #[test]
    fn prop_intersection_and_exclusion_partition(m in membership(), a in 0..4usize, b in 0..4usize) {
        let data = generated(&m);
        let base = data.get_hosts_for_group(GROUPS[a]);
        let other: HashSet<String> = data.get_hosts_for_group(GROUPS[b]).into_iter().collect();
        let manager = manager_from(data);

        let both = manager.list_hosts(&format!("{}:&{}", GROUPS[a], GROUPS[b])).unwrap();
        let only = manager.list_hosts(&format!("{}:!{}", GROUPS[a], GROUPS[b])).unwrap();

        let expected_both: Vec<String> = base.iter().filter(|h| other.contains(*h)).cloned().collect();
        let expected_only: Vec<String> = base.iter().filter(|h| !other.contains(*h)).cloned().collect();
        prop_assert_eq!(both, expected_both);
        prop_assert_eq!(only, expected_only);
    }

    #[test]
    fn prop_term_order_does_not_matter(m in membership(), a in 0..4usize, b in 0..4usize, c in 0..4usize) {
        let manager = manager_from(generated(&m));
        let forward = format!("{}:&{}:!{}", GROUPS[a], GROUPS[b], GROUPS[c]);
        let shuffled = format!("!{}:{}:&{}", GROUPS[c], GROUPS[a], GROUPS[b]);
        prop_assert_eq!(manager.list_hosts(&forward).unwrap(), manager.list_hosts(&shuffled).unwrap());
    }

    #[test]
    fn prop_self_exclusion_is_empty(m in membership(), a in 0..4usize) {
        let manager = manager_from(generated(&m));
        let pattern = format!("{0}:!{0}", GROUPS[a]);
        prop_assert!(manager.list_hosts(&pattern).unwrap().is_empty());
    }

    #[test]
    fn prop_subscript_range_is_a_slice(m in membership(), a in 0..4usize, start in 1..6usize, len in 0..6usize) {
        let data = generated(&m);
        let members = data.get_hosts_for_group(GROUPS[a]);
        prop_assume!(start <= members.len());
        let manager = manager_from(data);

        let end = start + len;
        let hosts = manager.list_hosts(&format!("{}[{}:{}]", GROUPS[a], start, end)).unwrap();
        let stop = end.min(members.len());
        prop_assert_eq!(hosts, members[start - 1..stop].to_vec());
    }

    #[test]
    fn prop_all_covers_every_host_once(m in membership()) {
        let manager = manager_from(generated(&m));
        let all = manager.list_hosts("all").unwrap();
        let unique: HashSet<&String> = all.iter().collect();
        prop_assert_eq!(unique.len(), all.len());
        prop_assert_eq!(all.len(), m.len());

        let sorted = manager.get_host_names("all", false, false, Some(HostOrder::Sorted)).unwrap();
        let mut expected = all.clone();
        expected.sort();
        prop_assert_eq!(sorted, expected);
    }
}
