//! Runtime broadcast override store.
//!
//! Ported from the original suite broadcast manager: settings are staged in
//! a `cycle -> namespace -> settings` tree and merged into a task's runtime
//! config at lookup time. `"*"` is the wildcard cycle (applies to every
//! cycle point); namespaces are looked up from most general to most
//! specific, so a leaf namespace's setting overrides an ancestor's.
//!
//! This store is deliberately ignorant of cycle-point and namespace-graph
//! semantics: validity checks and cycle/point comparisons are supplied by
//! the caller as closures, so this crate stays usable outside a cycling
//! scheduler.

use std::collections::BTreeMap;

use serde_json::Value;

pub const WILDCARD_CYCLE: &str = "*";

/// Settings rejected by a [`BroadcastStore::put`] or [`BroadcastStore::clear`]
/// call because they referenced an unknown cycle point, namespace, or
/// (for clear) a setting key that was never broadcast.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BadOptions {
    pub bad_cycles: Vec<String>,
    pub bad_namespaces: Vec<String>,
    pub bad_settings: Vec<Vec<String>>,
}

impl BadOptions {
    pub fn is_empty(&self) -> bool {
        self.bad_cycles.is_empty() && self.bad_namespaces.is_empty() && self.bad_settings.is_empty()
    }
}

/// The modifications actually applied by a [`BroadcastStore::put`],
/// [`BroadcastStore::clear`], or [`BroadcastStore::expire`] call.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BroadcastChange {
    pub modified: BTreeMap<String, BTreeMap<String, Value>>,
    pub bad_options: BadOptions,
}

/// Nested `cycle -> namespace -> settings` override tree.
#[derive(Debug, Default, Clone)]
pub struct BroadcastStore {
    tree: BTreeMap<String, BTreeMap<String, Value>>,
}

impl BroadcastStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every override currently staged, for display (`cylc broadcast --show`).
    pub fn snapshot(&self) -> &BTreeMap<String, BTreeMap<String, Value>> {
        &self.tree
    }

    /// Stage `settings` against the cartesian product of `cycles` and
    /// `namespaces`. `is_valid_cycle`/`is_valid_namespace` reject entries
    /// up front; rejected combinations never reach the tree and are
    /// reported back in `bad_options`.
    pub fn put(
        &mut self,
        cycles: &[String],
        namespaces: &[String],
        settings: &Value,
        is_valid_cycle: impl Fn(&str) -> bool,
        is_valid_namespace: impl Fn(&str) -> bool,
    ) -> BroadcastChange {
        let mut change = BroadcastChange::default();
        for cycle in cycles {
            if cycle != WILDCARD_CYCLE && !is_valid_cycle(cycle) {
                change.bad_options.bad_cycles.push(cycle.clone());
                continue;
            }
            for namespace in namespaces {
                if !is_valid_namespace(namespace) {
                    change.bad_options.bad_namespaces.push(namespace.clone());
                    continue;
                }
                let slot = self
                    .tree
                    .entry(cycle.clone())
                    .or_default()
                    .entry(namespace.clone())
                    .or_insert_with(|| Value::Object(Default::default()));
                addict(slot, settings);
                change
                    .modified
                    .entry(cycle.clone())
                    .or_default()
                    .insert(namespace.clone(), settings.clone());
            }
        }
        change.bad_options.bad_cycles.sort();
        change.bad_options.bad_cycles.dedup();
        change.bad_options.bad_namespaces.sort();
        change.bad_options.bad_namespaces.dedup();
        change
    }

    /// Remove overrides for the given `cycles`/`namespaces`. If
    /// `cancel_settings` is `None`, the whole namespace entry is dropped for
    /// each matching cycle; otherwise only the leaf keys named by
    /// `cancel_settings` are pruned, leaving siblings intact.
    pub fn clear(
        &mut self,
        cycles: &[String],
        namespaces: &[String],
        cancel_settings: Option<&Value>,
    ) -> BroadcastChange {
        let mut change = BroadcastChange::default();
        for cycle in cycles {
            let Some(by_namespace) = self.tree.get_mut(cycle) else {
                continue;
            };
            for namespace in namespaces {
                let Some(current) = by_namespace.get_mut(namespace) else {
                    continue;
                };
                match cancel_settings {
                    None => {
                        let removed = by_namespace.remove(namespace);
                        if let Some(removed) = removed {
                            change
                                .modified
                                .entry(cycle.clone())
                                .or_default()
                                .insert(namespace.clone(), removed);
                        }
                    }
                    Some(cancel) => {
                        let mut removed_any = Value::Object(Default::default());
                        for keys in settings_to_keys_list(cancel) {
                            if let Some(value) = remove_path(current, &keys) {
                                insert_path(&mut removed_any, &keys, value);
                            } else {
                                change.bad_options.bad_settings.push(keys);
                            }
                        }
                        if !is_empty_object(&removed_any) {
                            change
                                .modified
                                .entry(cycle.clone())
                                .or_default()
                                .insert(namespace.clone(), removed_any);
                        }
                        prune(current);
                    }
                }
            }
            if by_namespace.values().all(is_empty_object) {
                by_namespace.clear();
            }
        }
        self.tree.retain(|_, by_namespace| !by_namespace.is_empty());
        change
    }

    /// Drop every override for cycle points older than `cutoff`, as judged
    /// by `is_older(cycle, cutoff)`. The wildcard cycle is never expired.
    pub fn expire(&mut self, cutoff: &str, is_older: impl Fn(&str, &str) -> bool) -> BroadcastChange {
        let mut change = BroadcastChange::default();
        let expiring: Vec<String> = self
            .tree
            .keys()
            .filter(|cycle| cycle.as_str() != WILDCARD_CYCLE && is_older(cycle, cutoff))
            .cloned()
            .collect();
        for cycle in expiring {
            if let Some(by_namespace) = self.tree.remove(&cycle) {
                change.modified.insert(cycle, by_namespace);
            }
        }
        change
    }

    /// Merge every override applicable to `point` across `namespaces`
    /// (ordered most general first, most specific last -- e.g. `root`
    /// before a family before the leaf task name). `matches_cycle(stored,
    /// point)` decides whether a stored (non-wildcard) cycle key applies to
    /// `point`. Later merges win over earlier ones.
    pub fn lookup(&self, point: &str, namespaces: &[String], matches_cycle: impl Fn(&str, &str) -> bool) -> Value {
        let mut result = Value::Object(Default::default());
        let mut cycles: Vec<&String> = self.tree.keys().filter(|c| c.as_str() == WILDCARD_CYCLE).collect();
        cycles.extend(
            self.tree
                .keys()
                .filter(|c| c.as_str() != WILDCARD_CYCLE && matches_cycle(c, point)),
        );
        for cycle in cycles {
            let Some(by_namespace) = self.tree.get(cycle) else {
                continue;
            };
            for namespace in namespaces {
                if let Some(settings) = by_namespace.get(namespace) {
                    addict(&mut result, settings);
                }
            }
        }
        result
    }
}

/// Recursive dict-merge: objects merge key-by-key, any other value type
/// (including arrays) is replaced wholesale by `src`.
fn addict(target: &mut Value, src: &Value) {
    match (target, src) {
        (Value::Object(target_map), Value::Object(src_map)) => {
            for (key, value) in src_map {
                addict(target_map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
        (target, src) => {
            *target = src.clone();
        }
    }
}

/// Remove empty nested objects, bottom-up. Returns `true` if `value` itself
/// ended up empty (and so should be pruned by its caller too).
fn prune(value: &mut Value) -> bool {
    if let Value::Object(map) = value {
        map.retain(|_, v| !prune(v));
        map.is_empty()
    } else {
        false
    }
}

fn is_empty_object(value: &Value) -> bool {
    matches!(value, Value::Object(map) if map.is_empty())
}

/// Flatten a nested settings object into leaf key-paths, e.g.
/// `{"environment": {"FOO": "1"}}` -> `[["environment", "FOO"]]`.
fn settings_to_keys_list(value: &Value) -> Vec<Vec<String>> {
    fn walk(value: &Value, prefix: &mut Vec<String>, out: &mut Vec<Vec<String>>) {
        match value {
            Value::Object(map) if !map.is_empty() => {
                for (key, child) in map {
                    prefix.push(key.clone());
                    walk(child, prefix, out);
                    prefix.pop();
                }
            }
            _ => out.push(prefix.clone()),
        }
    }
    let mut out = Vec::new();
    walk(value, &mut Vec::new(), &mut out);
    out
}

fn remove_path(value: &mut Value, keys: &[String]) -> Option<Value> {
    match keys {
        [] => None,
        [last] => value.as_object_mut()?.remove(last),
        [head, rest @ ..] => remove_path(value.as_object_mut()?.get_mut(head)?, rest),
    }
}

fn insert_path(value: &mut Value, keys: &[String], leaf: Value) {
    match keys {
        [] => {}
        [last] => {
            if let Value::Object(map) = value {
                map.insert(last.clone(), leaf);
            }
        }
        [head, rest @ ..] => {
            if let Value::Object(map) = value {
                let child = map
                    .entry(head.clone())
                    .or_insert_with(|| Value::Object(Default::default()));
                insert_path(child, rest, leaf);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn always_valid(_: &str) -> bool {
        true
    }

    #[test]
    fn put_then_lookup_applies_setting() {
        let mut store = BroadcastStore::new();
        store.put(
            &["20260101T0000Z".to_string()],
            &["root".to_string()],
            &json!({"script": "echo hi"}),
            always_valid,
            always_valid,
        );
        let settings = store.lookup("20260101T0000Z", &["root".to_string()], |c, p| c == p);
        assert_eq!(settings["script"], "echo hi");
    }

    #[test]
    fn wildcard_cycle_applies_to_every_point() {
        let mut store = BroadcastStore::new();
        store.put(
            &[WILDCARD_CYCLE.to_string()],
            &["root".to_string()],
            &json!({"execution_retry_delays": "PT1M"}),
            always_valid,
            always_valid,
        );
        let settings = store.lookup("20991231T0000Z", &["root".to_string()], |_, _| false);
        assert_eq!(settings["execution_retry_delays"], "PT1M");
    }

    #[test]
    fn leaf_namespace_overrides_ancestor() {
        let mut store = BroadcastStore::new();
        store.put(
            &["20260101T0000Z".to_string()],
            &["root".to_string()],
            &json!({"script": "from root"}),
            always_valid,
            always_valid,
        );
        store.put(
            &["20260101T0000Z".to_string()],
            &["my_task".to_string()],
            &json!({"script": "from leaf"}),
            always_valid,
            always_valid,
        );
        let settings = store.lookup(
            "20260101T0000Z",
            &["root".to_string(), "my_task".to_string()],
            |c, p| c == p,
        );
        assert_eq!(settings["script"], "from leaf");
    }

    #[test]
    fn clear_without_settings_drops_whole_namespace() {
        let mut store = BroadcastStore::new();
        store.put(
            &["20260101T0000Z".to_string()],
            &["root".to_string()],
            &json!({"script": "echo hi"}),
            always_valid,
            always_valid,
        );
        store.clear(&["20260101T0000Z".to_string()], &["root".to_string()], None);
        let settings = store.lookup("20260101T0000Z", &["root".to_string()], |c, p| c == p);
        assert_eq!(settings, json!({}));
    }

    #[test]
    fn clear_with_settings_prunes_only_named_keys() {
        let mut store = BroadcastStore::new();
        store.put(
            &["20260101T0000Z".to_string()],
            &["root".to_string()],
            &json!({"environment": {"FOO": "1", "BAR": "2"}}),
            always_valid,
            always_valid,
        );
        store.clear(
            &["20260101T0000Z".to_string()],
            &["root".to_string()],
            Some(&json!({"environment": {"FOO": null}})),
        );
        let settings = store.lookup("20260101T0000Z", &["root".to_string()], |c, p| c == p);
        assert_eq!(settings, json!({"environment": {"BAR": "2"}}));
    }

    #[test]
    fn expire_drops_old_cycles_but_not_wildcard() {
        let mut store = BroadcastStore::new();
        store.put(
            &["20200101T0000Z".to_string()],
            &["root".to_string()],
            &json!({"script": "old"}),
            always_valid,
            always_valid,
        );
        store.put(
            &[WILDCARD_CYCLE.to_string()],
            &["root".to_string()],
            &json!({"execution_retry_delays": "PT1M"}),
            always_valid,
            always_valid,
        );
        let change = store.expire("20250101T0000Z", |cycle, cutoff| cycle < cutoff);
        assert!(change.modified.contains_key("20200101T0000Z"));

        let settings = store.lookup("20200101T0000Z", &["root".to_string()], |c, p| c == p);
        assert_eq!(settings, json!({"execution_retry_delays": "PT1M"}));
    }

    #[test]
    fn put_rejects_invalid_namespace() {
        let mut store = BroadcastStore::new();
        let change = store.put(
            &["20260101T0000Z".to_string()],
            &["nonexistent".to_string()],
            &json!({"script": "echo hi"}),
            always_valid,
            |ns| ns == "root",
        );
        assert_eq!(change.bad_options.bad_namespaces, vec!["nonexistent".to_string()]);
    }
}
