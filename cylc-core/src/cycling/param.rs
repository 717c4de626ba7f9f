//! Parameter expansion: `foo<m,n>`-style task names expand by the Cartesian
//! product of declared parameter lists; offsets like `<m-1,n>` resolve to
//! an explicit adjacent value and may legitimately fall outside the
//! declared range (the caller then drops the edge, per scenario #3).

use std::collections::BTreeMap;

/// Declared values for one parameter, in declaration order.
#[derive(Debug, Clone)]
pub struct ParamAxis {
    pub name: String,
    pub values: Vec<i64>,
}

/// The full set of declared parameter axes for a workflow.
#[derive(Debug, Clone, Default)]
pub struct ParamTable {
    axes: BTreeMap<String, ParamAxis>,
}

impl ParamTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, name: impl Into<String>, values: Vec<i64>) {
        let name = name.into();
        self.axes.insert(name.clone(), ParamAxis { name, values });
    }

    pub fn axis(&self, name: &str) -> Option<&ParamAxis> {
        self.axes.get(name)
    }

    /// Every combination of the named axes, in Cartesian product order
    /// (first axis varies slowest).
    pub fn product(&self, axis_names: &[&str]) -> Vec<BTreeMap<String, i64>> {
        let mut out = vec![BTreeMap::new()];
        for &axis_name in axis_names {
            let Some(axis) = self.axes.get(axis_name) else {
                return Vec::new();
            };
            let mut next = Vec::with_capacity(out.len() * axis.values.len());
            for combo in &out {
                for &value in &axis.values {
                    let mut combo = combo.clone();
                    combo.insert(axis.name.clone(), value);
                    next.push(combo);
                }
            }
            out = next;
        }
        out
    }
}

/// One reference to a parameter within a templated name, e.g. the `i-1` in
/// `baz<i-1,j>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamRef {
    pub axis: String,
    pub offset: i64,
}

/// Parse the contents of a `<...>` template suffix into its comma-separated
/// parameter references, each optionally carrying a `+N`/`-N` offset.
pub fn parse_param_refs(inner: &str) -> Vec<ParamRef> {
    inner
        .split(',')
        .filter_map(|part| {
            let part = part.trim();
            if part.is_empty() {
                return None;
            }
            let split_at = part.find(['+', '-']);
            match split_at {
                Some(idx) if idx > 0 => {
                    let axis = part[..idx].to_string();
                    let offset: i64 = part[idx..].parse().unwrap_or(0);
                    Some(ParamRef { axis, offset })
                }
                _ => Some(ParamRef {
                    axis: part.to_string(),
                    offset: 0,
                }),
            }
        })
        .collect()
}

/// Resolve a list of [`ParamRef`]s against a concrete parameter-value
/// assignment, applying each ref's offset. Returns `None` if any resolved
/// value falls outside its axis's declared range (the edge case in
/// scenario #3: `baz` at `i=0` has no `i-1` predecessor).
pub fn resolve_refs(table: &ParamTable, refs: &[ParamRef], assignment: &BTreeMap<String, i64>) -> Option<BTreeMap<String, i64>> {
    let mut resolved = BTreeMap::new();
    for r in refs {
        let base = *assignment.get(&r.axis)?;
        let value = base + r.offset;
        let axis = table.axis(&r.axis)?;
        if !axis.values.contains(&value) {
            return None;
        }
        resolved.insert(r.axis.clone(), value);
    }
    Some(resolved)
}

/// Render `name<refs>` into `name_axis0val0_axis1val1` using the resolved
/// assignment, in the order the refs were declared.
pub fn render_name(base: &str, refs: &[ParamRef], resolved: &BTreeMap<String, i64>) -> String {
    let mut out = base.to_string();
    for r in refs {
        let value = resolved[&r.axis];
        out.push_str(&format!("_{}{}", r.axis, value));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ParamTable {
        let mut t = ParamTable::new();
        t.declare("i", vec![0, 1]);
        t.declare("j", vec![0, 1, 2]);
        t
    }

    #[test]
    fn product_is_cartesian() {
        let combos = table().product(&["i", "j"]);
        assert_eq!(combos.len(), 6);
    }

    #[test]
    fn offset_out_of_range_resolves_to_none() {
        let t = table();
        let refs = parse_param_refs("i-1,j");
        let assignment: BTreeMap<String, i64> = [("i".to_string(), 0), ("j".to_string(), 1)].into();
        assert_eq!(resolve_refs(&t, &refs, &assignment), None);
    }

    #[test]
    fn offset_in_range_resolves_and_renders() {
        let t = table();
        let refs = parse_param_refs("i-1,j");
        let assignment: BTreeMap<String, i64> = [("i".to_string(), 1), ("j".to_string(), 2)].into();
        let resolved = resolve_refs(&t, &refs, &assignment).unwrap();
        assert_eq!(render_name("bar", &refs, &resolved), "bar_i0_j2");
    }
}
