//! Aggregate registry and grouped aggregation.
//!
//! Aggregate ops share one [`AggState`] per (field expression, group). An op may declare
//! `requires` (ops whose state it reads) and `streaming_requires` (extra state needed only when
//! values are also removed, as in sliding windows). The reducer expands these into a
//! dependency-ordered op list so each piece of state is maintained exactly once.

mod ops;
mod reducer;

pub use reducer::FieldReducer;

use crate::expr::{AggregateCall, Env, NoOps};
use crate::view::View;
use std::collections::{HashMap, VecDeque};
use std::sync::OnceLock;
use tabula_columnar::Value;

/// One streaming reducer step set operating on shared [`AggState`].
///
/// `add` and `rem` only ever see valid values (the reducer filters nulls and `NaN` first and
/// keeps `count`/`valid` up to date before calling them).
pub trait AggregateOp {
    fn init(&self, _state: &mut AggState) {}
    fn add(&self, _state: &mut AggState, _values: &[Value]) {}
    fn rem(&self, _state: &mut AggState, _values: &[Value]) {}
    fn value(&self, state: &AggState) -> Value;
}

#[derive(Debug)]
pub struct AggregateDef {
    pub name: &'static str,
    /// Number of per-row field arguments.
    pub fields: usize,
    /// Number of optional constant parameters following the fields.
    pub params: usize,
    pub requires: &'static [&'static str],
    pub streaming_requires: &'static [&'static str],
    pub create: fn(&[Value]) -> Box<dyn AggregateOp>,
}

inventory::collect!(AggregateDef);

fn registry() -> &'static HashMap<&'static str, &'static AggregateDef> {
    static REGISTRY: OnceLock<HashMap<&'static str, &'static AggregateDef>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        inventory::iter::<AggregateDef>
            .into_iter()
            .map(|def| (def.name, def))
            .collect()
    })
}

pub fn lookup_aggregate(name: &str) -> Option<&'static AggregateDef> {
    let name = if name == "average" { "mean" } else { name };
    registry().get(name).copied()
}

pub fn iter_aggregates() -> impl Iterator<Item = &'static AggregateDef> {
    inventory::iter::<AggregateDef>.into_iter()
}

#[derive(Clone, Copy, Debug)]
pub struct DistinctEntry {
    pub count: usize,
    /// Insertion sequence number; earlier values win ties.
    pub first_seen: u64,
}

/// Running moments for two-field statistics.
#[derive(Clone, Copy, Debug, Default)]
pub struct Bivariate {
    pub mean_x: f64,
    pub mean_y: f64,
    pub dev_x: f64,
    pub dev_y: f64,
    pub comoment: f64,
}

#[derive(Clone, Debug, Default)]
pub struct AggState {
    /// Rows seen, valid or not.
    pub count: usize,
    /// Rows whose field values are all valid.
    pub valid: usize,
    pub sum: f64,
    pub product: f64,
    pub mean: f64,
    /// Sum of squared deviations from the mean.
    pub dev: f64,
    pub min: Option<Value>,
    pub max: Option<Value>,
    pub any: Option<Value>,
    /// Valid values in arrival order; removal pops from the front.
    pub values: VecDeque<Value>,
    pub distinct: HashMap<Value, DistinctEntry>,
    pub entries: VecDeque<(Value, Value)>,
    pub bivariate: Bivariate,
    seq: u64,
}

impl AggState {
    pub(crate) fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }
}

/// Evaluate grouped aggregates. Returns one value per group for every call, indexed
/// `[call][group]`; an ungrouped view has a single group.
pub fn aggregate(view: &View, calls: &[AggregateCall]) -> Vec<Vec<Value>> {
    let groups = view.groups();
    let ngroups = groups.map_or(1, |g| g.size);
    let keys = groups.map(|g| g.keys.as_slice());
    let mut out = vec![vec![Value::Null; ngroups]; calls.len()];
    if calls.is_empty() {
        return out;
    }

    let reducers = FieldReducer::build(
        calls
            .iter()
            .map(|c| (c.def, c.fields.as_slice(), c.field_key.as_slice(), c.params.as_slice())),
        false,
    );
    log::debug!(
        "aggregating {} op(s) with {} reducer(s) over {} group(s)",
        calls.len(),
        reducers.len(),
        ngroups
    );

    let rows = view.indices(true);
    let mut env = Env::new(&NoOps);
    for reducer in &reducers {
        let mut states: Vec<AggState> = (0..ngroups).map(|_| reducer.init()).collect();
        for &row in rows.iter() {
            let group = keys.map_or(0, |k| k[row]);
            let values = reducer.values(env.at(row));
            reducer.add(&mut states[group], &values);
        }
        for (group, state) in states.iter().enumerate() {
            reducer.write(state, |call, value| out[call][group] = value);
        }
    }
    out
}

/// Linear interpolation between closest ranks at `(n - 1) * p`.
pub(crate) fn quantile(values: &VecDeque<Value>, p: f64) -> Value {
    let mut sorted: Vec<f64> = values
        .iter()
        .map(Value::to_f64)
        .filter(|v| !v.is_nan())
        .collect();
    if sorted.is_empty() || !(0.0..=1.0).contains(&p) {
        return Value::Null;
    }
    sorted.sort_by(f64::total_cmp);
    let h = (sorted.len() - 1) as f64 * p;
    let lo = h.floor() as usize;
    let hi = (lo + 1).min(sorted.len() - 1);
    Value::Number(sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_resolves_aliases() {
        assert_eq!(lookup_aggregate("average").map(|d| d.name), Some("mean"));
        assert!(lookup_aggregate("median").is_some());
        assert!(lookup_aggregate("rank").is_none());
    }

    #[test]
    fn dependencies_are_registered() {
        for def in iter_aggregates() {
            for dep in def.requires.iter().chain(def.streaming_requires) {
                assert!(lookup_aggregate(dep).is_some(), "{} requires {dep}", def.name);
            }
        }
    }

    #[test]
    fn quantile_interpolates() {
        let values: VecDeque<Value> = [4, 1, 3, 2].into_iter().map(Value::from).collect();
        assert_eq!(quantile(&values, 0.5), Value::Number(2.5));
        assert_eq!(quantile(&values, 0.0), Value::Number(1.0));
        assert_eq!(quantile(&values, 1.0), Value::Number(4.0));
        assert_eq!(quantile(&VecDeque::new(), 0.5), Value::Null);
    }
}
