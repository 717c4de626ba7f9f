//! Cycle-point-aware façade over [`cylc_store::BroadcastStore`]. The store
//! itself knows nothing about calendars or namespace graphs; this module
//! supplies the validator/comparator closures it needs per call.

use cylc_store::{BroadcastChange, BroadcastStore as RawStore, WILDCARD_CYCLE};
use serde_json::Value;

use crate::cycling::{Calendar, CyclePoint};

/// Runtime override store, scoped to one workflow's calendar and namespace graph.
pub struct BroadcastFacade {
    store: RawStore,
    calendar: Calendar,
}

impl BroadcastFacade {
    pub fn new(calendar: Calendar) -> Self {
        Self {
            store: RawStore::new(),
            calendar,
        }
    }

    fn is_valid_cycle(&self, s: &str) -> bool {
        CyclePoint::parse(s, self.calendar).is_ok()
    }

    /// Stage `settings` against `cycles`/`namespaces`. `is_valid_namespace`
    /// comes from the workflow's runtime namespace graph (ancestors of any
    /// known task name), which this crate doesn't own.
    pub fn put(&mut self, cycles: &[String], namespaces: &[String], settings: &Value, is_valid_namespace: impl Fn(&str) -> bool) -> BroadcastChange {
        let calendar = self.calendar;
        self.store.put(cycles, namespaces, settings, |c| CyclePoint::parse(c, calendar).is_ok(), is_valid_namespace)
    }

    pub fn clear(&mut self, cycles: &[String], namespaces: &[String], cancel_settings: Option<&Value>) -> BroadcastChange {
        self.store.clear(cycles, namespaces, cancel_settings)
    }

    /// Expire every override for cycle points strictly before `cutoff`.
    pub fn expire(&mut self, cutoff: &CyclePoint) -> BroadcastChange {
        let calendar = self.calendar;
        self.store.expire(&cutoff.to_string(), move |stored, cutoff_str| {
            match (CyclePoint::parse(stored, calendar), CyclePoint::parse(cutoff_str, calendar)) {
                (Ok(s), Ok(c)) => s < c,
                _ => false,
            }
        })
    }

    /// Merge overrides applicable to `point`, walking `namespace_ancestors`
    /// from root (most general) to the task's own name (most specific).
    pub fn lookup(&self, point: &CyclePoint, namespace_ancestors: &[String]) -> Value {
        let calendar = self.calendar;
        let point_str = point.to_string();
        self.store.lookup(&point_str, namespace_ancestors, move |stored, p| {
            match (CyclePoint::parse(stored, calendar), CyclePoint::parse(p, calendar)) {
                (Ok(s), Ok(pp)) => s == pp,
                _ => stored == p,
            }
        })
    }

    pub fn snapshot(&self) -> &std::collections::BTreeMap<String, std::collections::BTreeMap<String, Value>> {
        self.store.snapshot()
    }

    pub const WILDCARD: &'static str = WILDCARD_CYCLE;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn always_valid(_: &str) -> bool {
        true
    }

    #[test]
    fn scenario_broadcast_precedence() {
        let mut facade = BroadcastFacade::new(Calendar::Gregorian);
        facade.put(
            &[BroadcastFacade::WILDCARD.to_string()],
            &["root".to_string()],
            &json!({"execution time limit": "PT1H"}),
            always_valid,
        );
        facade.put(
            &["20200101T0000Z".to_string()],
            &["foo".to_string()],
            &json!({"execution time limit": "PT30M"}),
            always_valid,
        );

        let foo_at_put_time = facade.lookup(
            &CyclePoint::parse("20200101T0000Z", Calendar::Gregorian).unwrap(),
            &["root".to_string(), "foo".to_string()],
        );
        assert_eq!(foo_at_put_time["execution time limit"], "PT30M");

        let foo_later = facade.lookup(
            &CyclePoint::parse("20200101T1200Z", Calendar::Gregorian).unwrap(),
            &["root".to_string(), "foo".to_string()],
        );
        assert_eq!(foo_later["execution time limit"], "PT1H");

        let bar_at_put_time = facade.lookup(
            &CyclePoint::parse("20200101T0000Z", Calendar::Gregorian).unwrap(),
            &["root".to_string(), "bar".to_string()],
        );
        assert_eq!(bar_at_put_time["execution time limit"], "PT1H");
    }

    #[test]
    fn expire_removes_only_older_cycles() {
        let mut facade = BroadcastFacade::new(Calendar::Gregorian);
        facade.put(
            &["20190101T0000Z".to_string()],
            &["root".to_string()],
            &json!({"script": "old"}),
            always_valid,
        );
        facade.expire(&CyclePoint::parse("20200101T0000Z", Calendar::Gregorian).unwrap());
        let settings = facade.lookup(&CyclePoint::parse("20190101T0000Z", Calendar::Gregorian).unwrap(), &["root".to_string()]);
        assert_eq!(settings, json!({}));
    }
}
