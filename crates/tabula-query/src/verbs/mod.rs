//! Table verbs. Each compiles its expressions against the view, runs the aggregate and window
//! engines as needed, and returns a new view through [`View::create`] or over fresh storage.

mod derive;
mod reshape;
mod setops;
mod summarize;

use crate::agg;
use crate::error::{QueryError, QueryResult};
use crate::expr::{
    compile, CompileContext, CompileOptions, CompiledExprs, ExprSpec, OpLookup, OpRef,
};
use crate::view::{GroupSpec, View};
use crate::window;
use std::sync::Arc;
use tabula_columnar::{ColumnRef, NumberColumn, Value, ValueColumn};

/// Where `relocate` and `derive_at` place columns. At most one side may be set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Placement {
    pub before: Option<String>,
    pub after: Option<String>,
}

impl Placement {
    pub fn before(column: impl Into<String>) -> Self {
        Self {
            before: Some(column.into()),
            after: None,
        }
    }

    pub fn after(column: impl Into<String>) -> Self {
        Self {
            before: None,
            after: Some(column.into()),
        }
    }

    /// Reorder `names` so `moved` sit next to the anchor, keeping their given order.
    pub(crate) fn apply(&self, names: &[String], moved: &[String]) -> QueryResult<Vec<String>> {
        let (anchor, after) = match (&self.before, &self.after) {
            (Some(_), Some(_)) => return Err(QueryError::ConflictingPlacement),
            (Some(anchor), None) => (anchor, false),
            (None, Some(anchor)) => (anchor, true),
            (None, None) => return Ok(names.to_vec()),
        };
        if !names.contains(anchor) {
            return Err(QueryError::UnknownColumn(anchor.clone()));
        }
        if moved.contains(anchor) {
            return Ok(names.to_vec());
        }
        let mut rest: Vec<String> = names.iter().filter(|n| !moved.contains(n)).cloned().collect();
        let mut at = rest.iter().position(|n| n == anchor).unwrap_or(rest.len());
        if after {
            at += 1;
        }
        rest.splice(at..at, moved.iter().cloned());
        Ok(rest)
    }
}

/// How aggregate results map to the row being evaluated.
#[derive(Clone, Copy)]
pub(crate) enum GroupIndex<'a> {
    /// Ungrouped: every row reads group 0.
    Single,
    /// Rows are data rows; look their group up.
    Rows(&'a GroupSpec),
    /// Rows are group ids (rollup output).
    Direct,
}

/// Precomputed aggregate (`[call][group]`) and window (`[call][row]`) results.
pub(crate) struct OpValues<'a> {
    aggregates: Vec<Vec<Value>>,
    windows: Vec<Vec<Value>>,
    groups: GroupIndex<'a>,
}

impl OpLookup for OpValues<'_> {
    fn op_value(&self, op: OpRef, row: usize) -> Value {
        match op {
            OpRef::Aggregate(i) => {
                let group = match self.groups {
                    GroupIndex::Single => Some(0),
                    GroupIndex::Rows(spec) => spec.group_of(row),
                    GroupIndex::Direct => Some(row),
                };
                group
                    .and_then(|g| self.aggregates.get(i)?.get(g).cloned())
                    .unwrap_or_default()
            }
            OpRef::Window(i) => self
                .windows
                .get(i)
                .and_then(|w| w.get(row).cloned())
                .unwrap_or_default(),
        }
    }
}

impl View {
    pub(crate) fn compile_exprs<N, S>(
        &self,
        exprs: impl IntoIterator<Item = (N, S)>,
        options: CompileOptions,
    ) -> QueryResult<CompiledExprs>
    where
        N: Into<String>,
        S: Into<ExprSpec>,
    {
        let tables = [self.data.clone()];
        let compiled = compile(
            exprs,
            &CompileContext {
                tables: &tables,
                params: &self.params,
                options,
            },
        )?;
        log::trace!(
            "compiled {} expression(s): {} aggregate(s), {} window op(s)",
            compiled.len(),
            compiled.aggregates.len(),
            compiled.windows.len()
        );
        Ok(compiled)
    }

    /// Run every aggregate and window op the expressions reference.
    pub(crate) fn evaluate_ops<'a>(
        &'a self,
        compiled: &CompiledExprs,
        groups: GroupIndex<'a>,
    ) -> OpValues<'a> {
        let groups = match groups {
            GroupIndex::Single => self.groups().map_or(GroupIndex::Single, GroupIndex::Rows),
            other => other,
        };
        OpValues {
            aggregates: agg::aggregate(self, &compiled.aggregates),
            windows: window::evaluate(self, &compiled.windows),
            groups,
        }
    }
}

/// Store computed values, using the typed numeric layout when every value is a number or null.
pub(crate) fn column_from_values(values: Vec<Value>) -> ColumnRef {
    let numeric = values
        .iter()
        .all(|v| matches!(v, Value::Number(_) | Value::Null));
    if numeric && !values.is_empty() {
        Arc::new(NumberColumn::from_options(values.iter().map(|v| match v {
            Value::Number(n) => Some(*n),
            _ => None,
        })))
    } else {
        Arc::new(ValueColumn::new(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn placement_moves_columns() {
        let cols = names(&["a", "b", "c", "d"]);
        assert_eq!(
            Placement::before("b").apply(&cols, &names(&["d"])).unwrap(),
            names(&["a", "d", "b", "c"])
        );
        assert_eq!(
            Placement::after("c").apply(&cols, &names(&["a", "b"])).unwrap(),
            names(&["c", "a", "b", "d"])
        );
        let both = Placement {
            before: Some("a".into()),
            after: Some("b".into()),
        };
        assert_eq!(both.apply(&cols, &[]), Err(QueryError::ConflictingPlacement));
        assert!(matches!(
            Placement::after("zz").apply(&cols, &[]),
            Err(QueryError::UnknownColumn(_))
        ));
    }
}
