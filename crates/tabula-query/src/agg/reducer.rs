use super::{lookup_aggregate, AggState, AggregateDef, AggregateOp};
use crate::expr::{Compiled, Env, Node};
use smallvec::SmallVec;
use std::collections::HashMap;
use tabula_columnar::Value;

pub type FieldValues = SmallVec<[Value; 2]>;

/// All aggregate ops sharing one field-expression tuple, with their dependencies expanded.
pub struct FieldReducer {
    fields: Vec<Compiled>,
    ops: Vec<Box<dyn AggregateOp>>,
    /// `(call index, position in ops)` for every requested call.
    outputs: Vec<(usize, usize)>,
}

impl std::fmt::Debug for FieldReducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldReducer")
            .field("fields", &self.fields.len())
            .field("ops", &self.ops.len())
            .field("outputs", &self.outputs)
            .finish()
    }
}

struct Builder {
    fields: Vec<Compiled>,
    ops: Vec<(&'static str, Vec<Value>)>,
    outputs: Vec<(usize, usize)>,
}

impl Builder {
    fn position(&self, name: &str, params: &[Value]) -> Option<usize> {
        self.ops
            .iter()
            .position(|(n, p)| *n == name && p.as_slice() == params)
    }

    /// Depth-first insertion so dependencies always precede their dependents.
    fn expand(&mut self, def: &'static AggregateDef, params: &[Value], streaming: bool) -> usize {
        let deps = def
            .requires
            .iter()
            .chain(streaming.then_some(def.streaming_requires).into_iter().flatten());
        for dep in deps {
            match lookup_aggregate(dep) {
                Some(dep) => {
                    self.expand(dep, &[], streaming);
                }
                None => debug_assert!(false, "unknown aggregate dependency {dep}"),
            }
        }
        match self.position(def.name, params) {
            Some(pos) => pos,
            None => {
                self.ops.push((def.name, params.to_vec()));
                self.ops.len() - 1
            }
        }
    }
}

impl FieldReducer {
    /// Group calls `(def, fields, field_key, params)` by field key into reducers. With
    /// `streaming`, reducers also carry the state needed to remove values.
    pub fn build<'c>(
        calls: impl IntoIterator<
            Item = (
                &'static AggregateDef,
                &'c [Compiled],
                &'c [Node],
                &'c [Value],
            ),
        >,
        streaming: bool,
    ) -> Vec<FieldReducer> {
        let mut builders: Vec<Builder> = Vec::new();
        let mut by_key: HashMap<&'c [Node], usize> = HashMap::new();

        for (call, (def, fields, key, params)) in calls.into_iter().enumerate() {
            let idx = *by_key.entry(key).or_insert_with(|| {
                builders.push(Builder {
                    fields: fields.to_vec(),
                    ops: Vec::new(),
                    outputs: Vec::new(),
                });
                builders.len() - 1
            });
            let builder = &mut builders[idx];
            let pos = builder.expand(def, params, streaming);
            builder.outputs.push((call, pos));
        }

        builders
            .into_iter()
            .map(|b| FieldReducer {
                fields: b.fields,
                ops: b
                    .ops
                    .iter()
                    .filter_map(|(name, params)| {
                        lookup_aggregate(name).map(|def| (def.create)(params))
                    })
                    .collect(),
                outputs: b.outputs,
            })
            .collect()
    }

    pub fn init(&self) -> AggState {
        let mut state = AggState::default();
        for op in &self.ops {
            op.init(&mut state);
        }
        state
    }

    /// Evaluate the reducer's field expressions at the environment's current row.
    pub fn values(&self, env: &mut Env<'_>) -> FieldValues {
        self.fields.iter().map(|f| f.eval(env)).collect()
    }

    pub fn add(&self, state: &mut AggState, values: &[Value]) {
        state.count += 1;
        if values.iter().all(Value::is_valid) {
            state.valid += 1;
            for op in &self.ops {
                op.add(state, values);
            }
        }
    }

    pub fn rem(&self, state: &mut AggState, values: &[Value]) {
        state.count -= 1;
        if values.iter().all(Value::is_valid) {
            state.valid -= 1;
            for op in &self.ops {
                op.rem(state, values);
            }
        }
    }

    /// Report each requested call's current value.
    pub fn write(&self, state: &AggState, mut emit: impl FnMut(usize, Value)) {
        for &(call, pos) in &self.outputs {
            emit(call, self.ops[pos].value(state));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(name: &str) -> &'static AggregateDef {
        lookup_aggregate(name).unwrap()
    }

    #[test]
    fn shares_state_between_dependents() {
        let key = [Node::column(0, "x")];
        let fields = [Compiled::Literal(Value::Null)];
        let reducers = FieldReducer::build(
            [
                (def("variance"), &fields[..], &key[..], &[][..]),
                (def("stdev"), &fields[..], &key[..], &[][..]),
                (def("mean"), &fields[..], &key[..], &[][..]),
            ],
            false,
        );
        assert_eq!(reducers.len(), 1);
        // mean once, then variance and stdev
        assert_eq!(reducers[0].ops.len(), 3);
        assert_eq!(reducers[0].outputs, vec![(0, 1), (1, 2), (2, 0)]);
    }

    #[test]
    fn streaming_pulls_in_value_lists() {
        let key = [Node::column(0, "x")];
        let fields = [Compiled::Literal(Value::Null)];
        let batch = FieldReducer::build([(def("min"), &fields[..], &key[..], &[][..])], false);
        let streaming = FieldReducer::build([(def("min"), &fields[..], &key[..], &[][..])], true);
        assert_eq!(batch[0].ops.len(), 1);
        assert_eq!(streaming[0].ops.len(), 2);
    }

    #[test]
    fn invalid_values_only_count() {
        let key = [Node::column(0, "x")];
        let fields = [Compiled::Literal(Value::Null)];
        let reducers = FieldReducer::build(
            [
                (def("count"), &[][..], &[][..], &[][..]),
                (def("sum"), &fields[..], &key[..], &[][..]),
                (def("valid"), &fields[..], &key[..], &[][..]),
            ],
            true,
        );
        let sum = &reducers[1];
        let mut state = sum.init();
        for v in [Value::from(2), Value::Null, Value::Number(f64::NAN), Value::from(5)] {
            sum.add(&mut state, &[v]);
        }
        assert_eq!(state.count, 4);
        assert_eq!(state.valid, 2);
        sum.rem(&mut state, &[Value::from(2)]);
        let mut out = Vec::new();
        sum.write(&state, |call, v| out.push((call, v)));
        assert_eq!(out, vec![(1, Value::Number(5.0)), (2, Value::Number(1.0))]);
    }
}
