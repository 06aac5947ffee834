//! Built-in aggregate operators.

use super::{quantile, AggState, AggregateDef, AggregateOp, DistinctEntry};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use tabula_columnar::Value;

macro_rules! aggregate {
    ($name:literal, $fields:expr, $params:expr, $requires:expr, $streaming:expr, $create:expr) => {
        inventory::submit! {
            AggregateDef {
                name: $name,
                fields: $fields,
                params: $params,
                requires: $requires,
                streaming_requires: $streaming,
                create: $create,
            }
        }
    };
}

fn num(values: &[Value], idx: usize) -> f64 {
    values.get(idx).map_or(f64::NAN, Value::to_f64)
}

fn first(values: &[Value]) -> Value {
    values.first().cloned().unwrap_or_default()
}

/// `value` when at least `min` valid observations exist, otherwise null.
fn when_valid(state: &AggState, min: usize, value: f64) -> Value {
    if state.valid >= min {
        Value::Number(value)
    } else {
        Value::Null
    }
}

struct Count;

impl AggregateOp for Count {
    fn value(&self, state: &AggState) -> Value {
        Value::from(state.count)
    }
}

aggregate!("count", 0, 0, &[], &[], |_| Box::new(Count));

struct Valid;

impl AggregateOp for Valid {
    fn value(&self, state: &AggState) -> Value {
        Value::from(state.valid)
    }
}

aggregate!("valid", 1, 0, &[], &[], |_| Box::new(Valid));

struct Invalid;

impl AggregateOp for Invalid {
    fn value(&self, state: &AggState) -> Value {
        Value::from(state.count - state.valid)
    }
}

aggregate!("invalid", 1, 0, &[], &[], |_| Box::new(Invalid));

struct Any;

impl AggregateOp for Any {
    fn add(&self, state: &mut AggState, values: &[Value]) {
        if state.any.is_none() {
            state.any = Some(first(values));
        }
    }

    fn rem(&self, state: &mut AggState, values: &[Value]) {
        if state.any.as_ref() == values.first() {
            state.any = state.values.front().cloned();
        }
    }

    fn value(&self, state: &AggState) -> Value {
        state.any.clone().unwrap_or_default()
    }
}

aggregate!("any", 1, 0, &[], &["array_agg"], |_| Box::new(Any));

struct ArrayAgg;

impl AggregateOp for ArrayAgg {
    fn add(&self, state: &mut AggState, values: &[Value]) {
        state.values.push_back(first(values));
    }

    fn rem(&self, state: &mut AggState, _values: &[Value]) {
        // frames slide forward, so the oldest retained value leaves first
        state.values.pop_front();
    }

    fn value(&self, state: &AggState) -> Value {
        Value::array(state.values.iter().cloned())
    }
}

aggregate!("array_agg", 1, 0, &[], &[], |_| Box::new(ArrayAgg));

struct Distinct;

impl AggregateOp for Distinct {
    fn add(&self, state: &mut AggState, values: &[Value]) {
        let seq = state.next_seq();
        state
            .distinct
            .entry(first(values))
            .or_insert(DistinctEntry {
                count: 0,
                first_seen: seq,
            })
            .count += 1;
    }

    fn rem(&self, state: &mut AggState, values: &[Value]) {
        let key = first(values);
        if let Some(entry) = state.distinct.get_mut(&key) {
            entry.count -= 1;
            if entry.count == 0 {
                state.distinct.remove(&key);
            }
        }
    }

    fn value(&self, state: &AggState) -> Value {
        Value::from(state.distinct.len())
    }
}

aggregate!("distinct", 1, 0, &[], &[], |_| Box::new(Distinct));

fn distinct_in_order(state: &AggState) -> Vec<(&Value, &DistinctEntry)> {
    let mut entries: Vec<_> = state.distinct.iter().collect();
    entries.sort_by_key(|(_, e)| e.first_seen);
    entries
}

struct ArrayAggDistinct;

impl AggregateOp for ArrayAggDistinct {
    fn value(&self, state: &AggState) -> Value {
        Value::array(distinct_in_order(state).into_iter().map(|(v, _)| v.clone()))
    }
}

aggregate!("array_agg_distinct", 1, 0, &["distinct"], &[], |_| {
    Box::new(ArrayAggDistinct)
});

struct Mode;

impl AggregateOp for Mode {
    fn value(&self, state: &AggState) -> Value {
        let mut best: Option<(&Value, &DistinctEntry)> = None;
        for (value, entry) in distinct_in_order(state) {
            if best.map_or(true, |(_, b)| entry.count > b.count) {
                best = Some((value, entry));
            }
        }
        best.map(|(v, _)| v.clone()).unwrap_or_default()
    }
}

aggregate!("mode", 1, 0, &["distinct"], &[], |_| Box::new(Mode));

struct ObjectAgg;

impl AggregateOp for ObjectAgg {
    fn add(&self, state: &mut AggState, values: &[Value]) {
        let value = values.get(1).cloned().unwrap_or_default();
        state.entries.push_back((first(values), value));
    }

    fn rem(&self, state: &mut AggState, _values: &[Value]) {
        state.entries.pop_front();
    }

    fn value(&self, state: &AggState) -> Value {
        let map: BTreeMap<Arc<str>, Value> = state
            .entries
            .iter()
            .map(|(k, v)| (Arc::from(k.to_string().as_str()), v.clone()))
            .collect();
        Value::Object(Arc::new(map))
    }
}

aggregate!("object_agg", 2, 0, &[], &[], |_| Box::new(ObjectAgg));

struct EntriesAgg;

impl AggregateOp for EntriesAgg {
    fn value(&self, state: &AggState) -> Value {
        Value::array(
            state
                .entries
                .iter()
                .map(|(k, v)| Value::array([k.clone(), v.clone()])),
        )
    }
}

aggregate!("entries_agg", 2, 0, &["object_agg"], &[], |_| Box::new(EntriesAgg));

struct Sum;

impl AggregateOp for Sum {
    fn add(&self, state: &mut AggState, values: &[Value]) {
        state.sum += num(values, 0);
    }

    fn rem(&self, state: &mut AggState, values: &[Value]) {
        state.sum -= num(values, 0);
    }

    fn value(&self, state: &AggState) -> Value {
        when_valid(state, 1, state.sum)
    }
}

aggregate!("sum", 1, 0, &[], &[], |_| Box::new(Sum));

struct Product;

impl AggregateOp for Product {
    fn init(&self, state: &mut AggState) {
        state.product = 1.0;
    }

    fn add(&self, state: &mut AggState, values: &[Value]) {
        state.product *= num(values, 0);
    }

    fn rem(&self, state: &mut AggState, values: &[Value]) {
        let v = num(values, 0);
        if v == 0.0 {
            // cannot divide a zero back out; rebuild from the retained values
            state.product = state.values.iter().map(Value::to_f64).product();
        } else {
            state.product /= v;
        }
    }

    fn value(&self, state: &AggState) -> Value {
        when_valid(state, 1, state.product)
    }
}

aggregate!("product", 1, 0, &[], &["array_agg"], |_| Box::new(Product));

/// Welford running mean and squared deviation.
struct Mean;

impl AggregateOp for Mean {
    fn add(&self, state: &mut AggState, values: &[Value]) {
        let v = num(values, 0);
        let delta = v - state.mean;
        state.mean += delta / state.valid as f64;
        state.dev += delta * (v - state.mean);
    }

    fn rem(&self, state: &mut AggState, values: &[Value]) {
        if state.valid == 0 {
            state.mean = 0.0;
            state.dev = 0.0;
            return;
        }
        let v = num(values, 0);
        let delta = v - state.mean;
        state.mean -= delta / state.valid as f64;
        state.dev -= delta * (v - state.mean);
    }

    fn value(&self, state: &AggState) -> Value {
        when_valid(state, 1, state.mean)
    }
}

aggregate!("mean", 1, 0, &[], &[], |_| Box::new(Mean));

/// Sample (`sample == true`) or population variance, optionally square-rooted.
struct Variance {
    sample: bool,
    root: bool,
}

impl AggregateOp for Variance {
    fn value(&self, state: &AggState) -> Value {
        let (min, denom) = if self.sample {
            (2, state.valid.saturating_sub(1))
        } else {
            (1, state.valid)
        };
        let v = state.dev / denom as f64;
        when_valid(state, min, if self.root { v.sqrt() } else { v })
    }
}

aggregate!("variance", 1, 0, &["mean"], &[], |_| Box::new(Variance {
    sample: true,
    root: false,
}));
aggregate!("variancep", 1, 0, &["mean"], &[], |_| Box::new(Variance {
    sample: false,
    root: false,
}));
aggregate!("stdev", 1, 0, &["mean"], &[], |_| Box::new(Variance {
    sample: true,
    root: true,
}));
aggregate!("stdevp", 1, 0, &["mean"], &[], |_| Box::new(Variance {
    sample: false,
    root: true,
}));

struct Extremum {
    ordering: Ordering,
}

impl Extremum {
    fn slot<'s>(&self, state: &'s mut AggState) -> &'s mut Option<Value> {
        if self.ordering == Ordering::Less {
            &mut state.min
        } else {
            &mut state.max
        }
    }

    fn beats(&self, candidate: &Value, current: &Value) -> bool {
        candidate.total_cmp(current) == self.ordering
    }
}

impl AggregateOp for Extremum {
    fn add(&self, state: &mut AggState, values: &[Value]) {
        let v = first(values);
        let slot = self.slot(state);
        if slot.as_ref().map_or(true, |cur| self.beats(&v, cur)) {
            *slot = Some(v);
        }
    }

    fn rem(&self, state: &mut AggState, values: &[Value]) {
        let removed = first(values);
        if self.slot(state).as_ref() != Some(&removed) {
            return;
        }
        // the extremum left the frame; rescan what remains
        let mut best: Option<Value> = None;
        for v in &state.values {
            if best.as_ref().map_or(true, |b| self.beats(v, b)) {
                best = Some(v.clone());
            }
        }
        *self.slot(state) = best;
    }

    fn value(&self, state: &AggState) -> Value {
        let slot = if self.ordering == Ordering::Less {
            &state.min
        } else {
            &state.max
        };
        slot.clone().unwrap_or_default()
    }
}

aggregate!("min", 1, 0, &[], &["array_agg"], |_| Box::new(Extremum {
    ordering: Ordering::Less,
}));
aggregate!("max", 1, 0, &[], &["array_agg"], |_| Box::new(Extremum {
    ordering: Ordering::Greater,
}));

struct Quantile(f64);

impl AggregateOp for Quantile {
    fn value(&self, state: &AggState) -> Value {
        quantile(&state.values, self.0)
    }
}

aggregate!("median", 1, 0, &["array_agg"], &[], |_| Box::new(Quantile(0.5)));
aggregate!("quantile", 1, 1, &["array_agg"], &[], |params| {
    Box::new(Quantile(params.first().map_or(f64::NAN, Value::to_f64)))
});

/// Running co-moment of two fields (Welford, bivariate).
struct Covariance;

impl AggregateOp for Covariance {
    fn add(&self, state: &mut AggState, values: &[Value]) {
        let (x, y) = (num(values, 0), num(values, 1));
        let n = state.valid as f64;
        let b = &mut state.bivariate;
        let dx = x - b.mean_x;
        let dy = y - b.mean_y;
        b.mean_x += dx / n;
        b.mean_y += dy / n;
        b.comoment += dx * (y - b.mean_y);
        b.dev_x += dx * (x - b.mean_x);
        b.dev_y += dy * (y - b.mean_y);
    }

    fn rem(&self, state: &mut AggState, values: &[Value]) {
        if state.valid == 0 {
            state.bivariate = Default::default();
            return;
        }
        let (x, y) = (num(values, 0), num(values, 1));
        let n = state.valid as f64;
        let b = &mut state.bivariate;
        let (old_x, old_y) = (b.mean_x, b.mean_y);
        b.mean_x -= (x - old_x) / n;
        b.mean_y -= (y - old_y) / n;
        b.comoment -= (x - b.mean_x) * (y - old_y);
        b.dev_x -= (x - b.mean_x) * (x - old_x);
        b.dev_y -= (y - b.mean_y) * (y - old_y);
    }

    fn value(&self, state: &AggState) -> Value {
        when_valid(
            state,
            2,
            state.bivariate.comoment / state.valid.saturating_sub(1) as f64,
        )
    }
}

aggregate!("covariance", 2, 0, &[], &[], |_| Box::new(Covariance));

struct CovarianceP;

impl AggregateOp for CovarianceP {
    fn value(&self, state: &AggState) -> Value {
        when_valid(state, 1, state.bivariate.comoment / state.valid as f64)
    }
}

aggregate!("covariancep", 2, 0, &["covariance"], &[], |_| Box::new(CovarianceP));

struct Corr;

impl AggregateOp for Corr {
    fn value(&self, state: &AggState) -> Value {
        let b = &state.bivariate;
        when_valid(state, 2, b.comoment / (b.dev_x * b.dev_y).sqrt())
    }
}

aggregate!("corr", 2, 0, &["covariance"], &[], |_| Box::new(Corr));

#[cfg(test)]
mod tests {
    use crate::agg::{lookup_aggregate, FieldReducer};
    use crate::expr::{Compiled, Node};
    use tabula_columnar::Value;

    /// Run the named ops over `rows` (each a tuple of field values) and return their values.
    fn run(names: &[&str], params: &[Value], fields: usize, rows: &[Vec<Value>]) -> Vec<Value> {
        let key: Vec<Node> = (0..fields).map(|i| Node::column(0, format!("f{i}"))).collect();
        let compiled: Vec<Compiled> = (0..fields).map(|_| Compiled::Literal(Value::Null)).collect();
        let calls: Vec<_> = names
            .iter()
            .map(|name| {
                (
                    lookup_aggregate(name).unwrap(),
                    compiled.as_slice(),
                    key.as_slice(),
                    params,
                )
            })
            .collect();
        let reducers = FieldReducer::build(calls, false);
        assert_eq!(reducers.len(), 1);
        let mut state = reducers[0].init();
        for row in rows {
            reducers[0].add(&mut state, row);
        }
        let mut out = vec![Value::Null; names.len()];
        reducers[0].write(&state, |call, v| out[call] = v);
        out
    }

    fn column(values: &[Value]) -> Vec<Vec<Value>> {
        values.iter().map(|v| vec![v.clone()]).collect()
    }

    fn n(values: &[f64]) -> Vec<Value> {
        values.iter().map(|v| Value::Number(*v)).collect()
    }

    #[test]
    fn descriptive_statistics() {
        let rows = column(&n(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]));
        let out = run(
            &[
                "sum",
                "mean",
                "variancep",
                "stdevp",
                "min",
                "max",
                "median",
                "mode",
                "distinct",
                "product",
            ],
            &[],
            1,
            &rows,
        );
        let expected = [40.0, 5.0, 4.0, 2.0, 2.0, 9.0, 4.5, 4.0, 5.0, 201_600.0];
        for (got, want) in out.iter().zip(expected) {
            assert!((got.to_f64() - want).abs() < 1e-9, "{got} != {want}");
        }
    }

    #[test]
    fn empty_groups_yield_null() {
        let rows = column(&[Value::Null, Value::Number(f64::NAN)]);
        let out = run(&["sum", "mean", "min", "valid"], &[], 1, &rows);
        assert_eq!(out, vec![Value::Null, Value::Null, Value::Null, Value::from(0)]);
    }

    #[test]
    fn mode_prefers_first_seen() {
        let rows = column(&[Value::from("b"), Value::from("a"), Value::from("a"), Value::from("b")]);
        let out = run(&["mode", "array_agg_distinct"], &[], 1, &rows);
        assert_eq!(out[0], Value::from("b"));
        assert_eq!(out[1], Value::array([Value::from("b"), Value::from("a")]));
    }

    #[test]
    fn bivariate() {
        let rows: Vec<Vec<Value>> = [(1.0, 2.0), (2.0, 4.0), (3.0, 6.0)]
            .iter()
            .map(|(x, y)| vec![Value::Number(*x), Value::Number(*y)])
            .collect();
        let out = run(&["covariance", "covariancep", "corr"], &[], 2, &rows);
        assert!((out[0].to_f64() - 2.0).abs() < 1e-12);
        assert!((out[1].to_f64() - 4.0 / 3.0).abs() < 1e-12);
        assert!((out[2].to_f64() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn object_and_entries() {
        let rows = vec![
            vec![Value::from("a"), Value::from(1)],
            vec![Value::from("b"), Value::from(2)],
            vec![Value::from("a"), Value::from(3)],
        ];
        let out = run(&["object_agg", "entries_agg"], &[], 2, &rows);
        let Value::Object(map) = &out[0] else {
            panic!("expected object, got {:?}", out[0]);
        };
        assert_eq!(map.get("a"), Some(&Value::from(3)));
        assert_eq!(map.len(), 2);
        assert_eq!(
            out[1],
            Value::array([
                Value::array([Value::from("a"), Value::from(1)]),
                Value::array([Value::from("b"), Value::from(2)]),
                Value::array([Value::from("a"), Value::from(3)]),
            ])
        );
    }

    #[test]
    fn quantile_param() {
        let rows = column(&n(&[1.0, 2.0, 3.0, 4.0, 5.0]));
        let out = run(&["quantile"], &[Value::from(0.25)], 1, &rows);
        assert_eq!(out, n(&[2.0]));
    }
}
