//! Join engine.
//!
//! Equality joins build a hash index over the smaller side and probe it with the other; any
//! other predicate falls back to a nested loop over both visible row sets. Either way the
//! result is a list of matched `(left, right)` positions, which the outer-completion pass turns
//! into output rows and the semi/anti verbs turn into a filter over the left view.
//!
//! Keys containing a null or NaN never match anything, including another null. Predicates
//! that want null-inclusive equality can call `equal(a, b)` explicitly.

use crate::error::{QueryError, QueryResult};
use crate::expr::{
    column, compile, CompileContext, CompileOptions, CompiledExprs, Env, ExprSpec, LogicalOp,
    NoOps, Node,
};
use crate::verbs::column_from_values;
use crate::view::{View, ViewOptions};
use ahash::AHashMap;
use smallvec::SmallVec;
use std::sync::Arc;
use tabula_columnar::{BitSet, ColumnTable, Value};

type JoinKey = SmallVec<[Value; 4]>;

/// How rows of the two tables are matched.
#[derive(Clone, Debug, Default)]
pub enum JoinOn {
    /// Equality on every column name the two tables share.
    #[default]
    Auto,
    /// Equality on the named columns, present in both tables.
    Columns(Vec<String>),
    /// Pairwise equality of per-table key expressions.
    Keys {
        left: Vec<ExprSpec>,
        right: Vec<ExprSpec>,
    },
    /// Arbitrary two-table predicate, e.g. `(a, b) => a.t >= b.start && a.t < b.end`.
    Predicate(ExprSpec),
}

impl JoinOn {
    pub fn columns(names: &[&str]) -> Self {
        JoinOn::Columns(names.iter().map(|n| n.to_string()).collect())
    }

    pub fn keys<L, R>(
        left: impl IntoIterator<Item = L>,
        right: impl IntoIterator<Item = R>,
    ) -> Self
    where
        L: Into<ExprSpec>,
        R: Into<ExprSpec>,
    {
        JoinOn::Keys {
            left: left.into_iter().map(Into::into).collect(),
            right: right.into_iter().map(Into::into).collect(),
        }
    }

    pub fn predicate(expr: impl Into<ExprSpec>) -> Self {
        JoinOn::Predicate(expr.into())
    }
}

/// Which columns a join outputs.
#[derive(Clone, Debug, Default)]
pub enum JoinValues {
    /// Every column of both tables. Shared equality-key columns are emitted once, coalescing
    /// the left and right values; other name collisions get the configured suffixes.
    #[default]
    Auto,
    /// Selected columns from each side, suffixed on collision.
    Columns { left: Vec<String>, right: Vec<String> },
    /// Named two-table expressions over `d1`/`d2` (or explicit arrow parameters).
    Exprs(Vec<(String, ExprSpec)>),
}

impl JoinValues {
    pub fn columns(left: &[&str], right: &[&str]) -> Self {
        JoinValues::Columns {
            left: left.iter().map(|n| n.to_string()).collect(),
            right: right.iter().map(|n| n.to_string()).collect(),
        }
    }

    pub fn exprs<N, S>(exprs: impl IntoIterator<Item = (N, S)>) -> Self
    where
        N: Into<String>,
        S: Into<ExprSpec>,
    {
        JoinValues::Exprs(
            exprs
                .into_iter()
                .map(|(n, s)| (n.into(), s.into()))
                .collect(),
        )
    }
}

/// Outer-join flags and collision suffixes. Both flags off is an inner join; both on a full
/// outer join.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JoinOptions {
    /// Keep unmatched left rows.
    pub left: bool,
    /// Keep unmatched right rows.
    pub right: bool,
    pub suffix: (String, String),
}

impl Default for JoinOptions {
    fn default() -> Self {
        Self {
            left: false,
            right: false,
            suffix: ("_1".to_string(), "_2".to_string()),
        }
    }
}

impl JoinOptions {
    pub fn inner() -> Self {
        Self::default()
    }

    pub fn left() -> Self {
        Self {
            left: true,
            ..Self::default()
        }
    }

    pub fn right() -> Self {
        Self {
            right: true,
            ..Self::default()
        }
    }

    pub fn full() -> Self {
        Self {
            left: true,
            right: true,
            ..Self::default()
        }
    }

    pub fn with_suffix(mut self, left: impl Into<String>, right: impl Into<String>) -> Self {
        self.suffix = (left.into(), right.into());
        self
    }
}

enum Matcher {
    Hash {
        left: CompiledExprs,
        right: CompiledExprs,
        /// Column names matched by equality on both sides, for coalesced output.
        shared: Vec<String>,
    },
    Loop(CompiledExprs),
}

/// Matched rows of a join, as positions into the visible (ordered) row lists of each side.
struct Matches {
    left_rows: Arc<[usize]>,
    right_rows: Arc<[usize]>,
    /// `(left position, right position)`, sorted.
    pairs: Vec<(usize, usize)>,
}

fn join_context<'a>(
    tables: &'a [Arc<ColumnTable>],
    left: &'a View,
) -> CompileContext<'a> {
    CompileContext {
        tables,
        params: left.parameters(),
        options: CompileOptions::join(),
    }
}

fn shared_columns(left: &View, right: &View) -> Vec<String> {
    left.column_names()
        .iter()
        .filter(|n| right.column(n).is_some())
        .cloned()
        .collect()
}

fn matcher(left: &View, right: &View, on: &JoinOn) -> QueryResult<Matcher> {
    let (left_keys, right_keys, shared) = match on {
        JoinOn::Predicate(expr) => {
            let tables = [left.data().clone(), right.data().clone()];
            let compiled = compile([("on", expr.clone())], &join_context(&tables, left))?;
            return Ok(Matcher::Loop(compiled));
        }
        JoinOn::Auto => {
            let shared = shared_columns(left, right);
            if shared.is_empty() {
                return Err(QueryError::JoinKeyMismatch { left: 0, right: 0 });
            }
            let keys: Vec<ExprSpec> = shared.iter().map(column).collect();
            (keys.clone(), keys, shared)
        }
        JoinOn::Columns(names) => {
            for name in names {
                if left.column(name).is_none() || right.column(name).is_none() {
                    return Err(QueryError::UnknownColumn(name.clone()));
                }
            }
            let keys: Vec<ExprSpec> = names.iter().map(column).collect();
            (keys.clone(), keys, names.clone())
        }
        JoinOn::Keys {
            left: lkeys,
            right: rkeys,
        } => {
            if lkeys.len() != rkeys.len() || lkeys.is_empty() {
                return Err(QueryError::JoinKeyMismatch {
                    left: lkeys.len(),
                    right: rkeys.len(),
                });
            }
            (lkeys.clone(), rkeys.clone(), Vec::new())
        }
    };
    let named = |keys: Vec<ExprSpec>| {
        keys.into_iter()
            .enumerate()
            .map(|(i, k)| (format!("key{i}"), k))
            .collect::<Vec<_>>()
    };
    Ok(Matcher::Hash {
        left: left.compile_exprs(named(left_keys), CompileOptions::rows())?,
        right: right.compile_exprs(named(right_keys), CompileOptions::rows())?,
        shared,
    })
}

/// Key per visible row; `None` when any component is null or NaN.
fn row_keys(keys: &CompiledExprs, rows: &[usize]) -> Vec<Option<JoinKey>> {
    let mut env = Env::new(&NoOps);
    rows.iter()
        .map(|&row| {
            let env = env.at(row);
            let key: JoinKey = keys.exprs.iter().map(|k| k.eval(env)).collect();
            key.iter().all(Value::is_valid).then_some(key)
        })
        .collect()
}

fn hash_pairs(build: &[Option<JoinKey>], probe: &[Option<JoinKey>]) -> Vec<(usize, usize)> {
    let mut index: AHashMap<&JoinKey, SmallVec<[usize; 2]>> = AHashMap::with_capacity(build.len());
    for (pos, key) in build.iter().enumerate() {
        if let Some(key) = key {
            index.entry(key).or_default().push(pos);
        }
    }
    let mut pairs = Vec::new();
    for (pos, key) in probe.iter().enumerate() {
        if let Some(hits) = key.as_ref().and_then(|k| index.get(k)) {
            pairs.extend(hits.iter().map(|&b| (pos, b)));
        }
    }
    pairs
}

fn find_matches(left: &View, right: &View, matcher: &Matcher) -> Matches {
    let left_rows = left.indices(true);
    let right_rows = right.indices(true);
    let mut pairs = match matcher {
        Matcher::Hash {
            left: lk, right: rk, ..
        } => {
            let lkeys = row_keys(lk, &left_rows);
            let rkeys = row_keys(rk, &right_rows);
            if rkeys.len() <= lkeys.len() {
                log::debug!("hash join: building on right side ({} rows)", rkeys.len());
                hash_pairs(&rkeys, &lkeys)
            } else {
                log::debug!("hash join: building on left side ({} rows)", lkeys.len());
                hash_pairs(&lkeys, &rkeys)
                    .into_iter()
                    .map(|(r, l)| (l, r))
                    .collect()
            }
        }
        Matcher::Loop(predicate) => {
            log::debug!(
                "loop join over {} x {} rows",
                left_rows.len(),
                right_rows.len()
            );
            let mut env = Env::new(&NoOps);
            let mut pairs = Vec::new();
            for (lp, &l) in left_rows.iter().enumerate() {
                for (rp, &r) in right_rows.iter().enumerate() {
                    if predicate.exprs[0].eval(env.at_pair(Some(l), Some(r))).truthy() {
                        pairs.push((lp, rp));
                    }
                }
            }
            pairs
        }
    };
    pairs.sort_unstable();
    Matches {
        left_rows,
        right_rows,
        pairs,
    }
}

impl Matches {
    /// Output rows in left order, each left row followed by its matches; with `keep_left` an
    /// unmatched left row appears once with no right row. Unmatched right rows (with
    /// `keep_right`) follow at the end, in right order.
    fn output_rows(&self, keep_left: bool, keep_right: bool) -> Vec<(Option<usize>, Option<usize>)> {
        let mut out = Vec::with_capacity(self.pairs.len());
        let mut matched_right = BitSet::new(self.right_rows.len());
        let mut next = 0;
        for (lp, &l) in self.left_rows.iter().enumerate() {
            let start = next;
            while next < self.pairs.len() && self.pairs[next].0 == lp {
                let rp = self.pairs[next].1;
                matched_right.set(rp);
                out.push((Some(l), Some(self.right_rows[rp])));
                next += 1;
            }
            if start == next && keep_left {
                out.push((Some(l), None));
            }
        }
        if keep_right {
            for (rp, &r) in self.right_rows.iter().enumerate() {
                if !matched_right.get(rp) {
                    out.push((None, Some(r)));
                }
            }
        }
        out
    }

    /// Data rows of the left side with at least one match.
    fn matched_left(&self, total: usize) -> BitSet {
        let mut mask = BitSet::new(total);
        for &(lp, _) in &self.pairs {
            mask.set(self.left_rows[lp]);
        }
        mask
    }
}

/// Output column expressions for a join, as resolved syntax trees.
fn output_columns(
    left: &View,
    right: &View,
    values: &JoinValues,
    shared: &[String],
    suffix: &(String, String),
) -> QueryResult<Vec<(String, ExprSpec)>> {
    let (lnames, rnames): (Vec<String>, Vec<String>) = match values {
        JoinValues::Exprs(exprs) => return Ok(exprs.clone()),
        JoinValues::Auto => (
            left.column_names().to_vec(),
            right
                .column_names()
                .iter()
                .filter(|n| !shared.contains(*n))
                .cloned()
                .collect(),
        ),
        JoinValues::Columns { left: l, right: r } => (l.clone(), r.clone()),
    };
    for (view, names) in [(left, &lnames), (right, &rnames)] {
        if let Some(missing) = names.iter().find(|n| view.column(n).is_none()) {
            return Err(QueryError::UnknownColumn(missing.clone()));
        }
    }

    let coalesce = matches!(values, JoinValues::Auto);
    let mut out = Vec::with_capacity(lnames.len() + rnames.len());
    for name in &lnames {
        let node = if coalesce && shared.contains(name) {
            Node::Logical {
                operator: LogicalOp::Nullish,
                left: Box::new(Node::column(0, name.as_str())),
                right: Box::new(Node::column(1, name.as_str())),
            }
        } else {
            Node::column(0, name.as_str())
        };
        let output = if rnames.contains(name) && !(coalesce && shared.contains(name)) {
            format!("{name}{}", suffix.0)
        } else {
            name.clone()
        };
        out.push((output, ExprSpec::Ast(node)));
    }
    for name in &rnames {
        let output = if lnames.contains(name) {
            format!("{name}{}", suffix.1)
        } else {
            name.clone()
        };
        out.push((output, ExprSpec::Ast(Node::column(1, name.as_str()))));
    }
    Ok(out)
}

impl View {
    /// Join with `other`. Output rows follow this view's sort order; unmatched right rows of a
    /// right or full join come last. The result is a fresh, ungrouped view.
    pub fn join(
        &self,
        other: &View,
        on: JoinOn,
        values: JoinValues,
        options: JoinOptions,
    ) -> QueryResult<View> {
        let matcher = matcher(self, other, &on)?;
        let shared: &[String] = match &matcher {
            Matcher::Hash { shared, .. } => shared,
            Matcher::Loop(_) => &[],
        };
        let columns = output_columns(self, other, &values, shared, &options.suffix)?;
        let tables = [self.data().clone(), other.data().clone()];
        let compiled = compile(columns, &join_context(&tables, self))?;

        let matches = find_matches(self, other, &matcher);
        let rows = matches.output_rows(options.left, options.right);
        log::debug!(
            "join produced {} row(s) from {} match(es)",
            rows.len(),
            matches.pairs.len()
        );

        let mut env = Env::new(&NoOps);
        let mut table = ColumnTable::with_rows(rows.len());
        for (name, expr) in compiled.names.iter().zip(&compiled.exprs) {
            let values = rows
                .iter()
                .map(|&(l, r)| expr.eval(env.at_pair(l, r)))
                .collect();
            table.set_column(name.clone(), column_from_values(values))?;
        }
        Ok(View::new(table).create(ViewOptions::new().with_params(self.parameters().clone())))
    }

    /// Cartesian product with `other`.
    pub fn cross(&self, other: &View, values: JoinValues, options: JoinOptions) -> QueryResult<View> {
        self.join(
            other,
            JoinOn::Predicate(ExprSpec::Value(Value::Boolean(true))),
            values,
            options,
        )
    }

    /// Keep rows with at least one match in `other`. Groups and order are kept.
    pub fn semijoin(&self, other: &View, on: JoinOn) -> QueryResult<View> {
        let matches = find_matches(self, other, &matcher(self, other, &on)?);
        let mask = matches.matched_left(self.total_rows());
        Ok(self.create(ViewOptions::new().with_filter(mask)))
    }

    /// Keep rows with no match in `other`.
    pub fn antijoin(&self, other: &View, on: JoinOn) -> QueryResult<View> {
        let matches = find_matches(self, other, &matcher(self, other, &on)?);
        let mut mask = matches.matched_left(self.total_rows());
        mask.not_inplace();
        if let Some(filter) = self.filter_mask() {
            mask.and_inplace(filter);
        }
        Ok(self.create(ViewOptions::new().with_filter(mask)))
    }

    /// Add columns of `other` to this view, taken from the first matching row of `other` (in
    /// its sort order). Rows without a match get nulls.
    pub fn lookup(&self, other: &View, on: JoinOn, values: &[&str]) -> QueryResult<View> {
        let sources = values
            .iter()
            .map(|name| {
                other
                    .column(name)
                    .cloned()
                    .ok_or_else(|| QueryError::UnknownColumn(name.to_string()))
            })
            .collect::<QueryResult<Vec<_>>>()?;
        let matches = find_matches(self, other, &matcher(self, other, &on)?);

        let mut first: Vec<Option<usize>> = vec![None; self.total_rows()];
        for &(lp, rp) in &matches.pairs {
            let slot = &mut first[matches.left_rows[lp]];
            if slot.is_none() {
                *slot = Some(matches.right_rows[rp]);
            }
        }

        let mut data: ColumnTable = (**self.data()).clone();
        for (name, source) in values.iter().zip(&sources) {
            let column = first
                .iter()
                .map(|r| r.map_or(Value::Null, |r| source.get(r)))
                .collect();
            data.set_column(name.to_string(), column_from_values(column))?;
        }
        Ok(self.create(ViewOptions::new().with_data(data)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn left() -> View {
        View::new(
            ColumnTable::from_values([
                ("k", vec![1.into(), 2.into(), 2.into(), Value::Null]),
                ("a", vec!["p".into(), "q".into(), "r".into(), "s".into()]),
            ])
            .unwrap(),
        )
    }

    fn right() -> View {
        View::new(
            ColumnTable::from_values([
                ("k", vec![2.into(), 3.into(), Value::Null]),
                ("a", vec!["x".into(), "y".into(), "z".into()]),
                ("b", vec![20.into(), 30.into(), 0.into()]),
            ])
            .unwrap(),
        )
    }

    #[test]
    fn equi_join_coalesces_keys_and_suffixes_collisions() {
        let out = left()
            .join(&right(), JoinOn::columns(&["k"]), JoinValues::Auto, JoinOptions::inner())
            .unwrap();
        assert_eq!(out.column_names(), &["k", "a_1", "a_2", "b"]);
        assert_eq!(
            out.rows(),
            vec![
                vec![2.into(), "q".into(), "x".into(), 20.into()],
                vec![2.into(), "r".into(), "x".into(), 20.into()],
            ]
        );
    }

    #[test]
    fn full_join_keeps_unmatched_rows_and_null_keys_apart() {
        let out = left()
            .join(&right(), JoinOn::columns(&["k"]), JoinValues::Auto, JoinOptions::full())
            .unwrap();
        assert_eq!(
            out.rows(),
            vec![
                vec![1.into(), "p".into(), Value::Null, Value::Null],
                vec![2.into(), "q".into(), "x".into(), 20.into()],
                vec![2.into(), "r".into(), "x".into(), 20.into()],
                vec![Value::Null, "s".into(), Value::Null, Value::Null],
                vec![3.into(), Value::Null, "y".into(), 30.into()],
                vec![Value::Null, Value::Null, "z".into(), 0.into()],
            ]
        );

        let left_only = left()
            .join(&right(), JoinOn::columns(&["k"]), JoinValues::Auto, JoinOptions::left())
            .unwrap();
        assert_eq!(left_only.num_rows(), 4);
        let right_only = left()
            .join(&right(), JoinOn::columns(&["k"]), JoinValues::Auto, JoinOptions::right())
            .unwrap();
        assert_eq!(right_only.num_rows(), 4);
    }

    #[test]
    fn build_side_does_not_change_output_order() {
        let out = right()
            .join(
                &left(),
                JoinOn::keys(["d.k"], ["d.k"]),
                JoinValues::columns(&["a"], &["a"]),
                JoinOptions::inner().with_suffix("_r", "_l"),
            )
            .unwrap();
        assert_eq!(out.column_names(), &["a_r", "a_l"]);
        assert_eq!(
            out.rows(),
            vec![vec!["x".into(), "q".into()], vec!["x".into(), "r".into()]]
        );
    }

    #[test]
    fn predicate_join_and_cross() {
        let out = left()
            .join(
                &right(),
                JoinOn::predicate("(a, b) => a.k * 10 == b.b"),
                JoinValues::exprs([("a", "d1.a"), ("b", "d2.b")]),
                JoinOptions::inner(),
            )
            .unwrap();
        assert_eq!(
            out.rows(),
            vec![vec!["q".into(), 20.into()], vec!["r".into(), 20.into()]]
        );

        let cross = left()
            .cross(&right(), JoinValues::Auto, JoinOptions::default())
            .unwrap();
        assert_eq!(cross.num_rows(), 12);
        assert_eq!(cross.column_names(), &["k_1", "a_1", "k_2", "a_2", "b"]);
    }

    #[test]
    fn semi_anti_and_lookup() {
        let on = || JoinOn::columns(&["k"]);
        let semi = left().semijoin(&right(), on()).unwrap();
        assert_eq!(semi.column_values("a").unwrap(), vec!["q".into(), "r".into()]);
        let anti = left().antijoin(&right(), on()).unwrap();
        assert_eq!(anti.column_values("a").unwrap(), vec!["p".into(), "s".into()]);

        let filtered = left().filter("d.a != 'p'").unwrap();
        let anti = filtered.antijoin(&right(), on()).unwrap();
        assert_eq!(anti.column_values("a").unwrap(), vec![Value::from("s")]);

        let looked = left().lookup(&right(), on(), &["b"]).unwrap();
        assert_eq!(
            looked.column_values("b").unwrap(),
            vec![Value::Null, 20.into(), 20.into(), Value::Null]
        );
    }

    #[test]
    fn key_errors() {
        let err = left()
            .semijoin(&right(), JoinOn::keys(["d.k"], ["d.k", "d.b"]))
            .unwrap_err();
        assert_eq!(err, QueryError::JoinKeyMismatch { left: 1, right: 2 });
        assert!(matches!(
            left().semijoin(&right(), JoinOn::columns(&["b"])),
            Err(QueryError::UnknownColumn(_))
        ));
    }
}
