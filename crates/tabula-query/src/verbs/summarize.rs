use super::{column_from_values, GroupIndex};
use crate::error::QueryResult;
use crate::expr::{column, CompileOptions, Env, ExprSpec};
use crate::view::{GroupSpec, OrderKey, RowOrder, View, ViewOptions};
use tabula_columnar::ColumnTable;

impl View {
    /// Group by existing columns.
    pub fn groupby(&self, names: &[&str]) -> QueryResult<View> {
        self.groupby_with(names.iter().map(|&n| (n, column(n))))
    }

    /// Group by named key expressions. Keys are evaluated once; the resulting group values are
    /// kept with the grouping.
    pub fn groupby_with<N, S>(&self, keys: impl IntoIterator<Item = (N, S)>) -> QueryResult<View>
    where
        N: Into<String>,
        S: Into<ExprSpec>,
    {
        let compiled = self.compile_exprs(keys, CompileOptions::rows())?;
        // Hidden rows are grouped too, after the visible ones, so a later wider filter still
        // finds a group for every row.
        let visible = self.indices(false);
        let hidden = (0..self.total_rows())
            .filter(|&r| self.filter.as_ref().is_some_and(|f| !f.get(r)));
        let groups = GroupSpec::build(
            compiled.names.clone(),
            &compiled.exprs,
            visible.iter().copied().chain(hidden),
            self.total_rows(),
        );
        let groups = match &self.filter {
            Some(filter) => groups.regroup(filter),
            None => groups,
        };
        Ok(self.create(ViewOptions::new().with_groups(groups)))
    }

    pub fn ungroup(&self) -> View {
        self.create(ViewOptions::new().without_groups())
    }

    /// Sort by one or more keys; use [`crate::desc`] for descending keys.
    pub fn orderby<K: Into<OrderKey>>(&self, keys: impl IntoIterator<Item = K>) -> QueryResult<View> {
        let keys: Vec<OrderKey> = keys.into_iter().map(Into::into).collect();
        let compiled = self.compile_exprs(
            keys.iter().enumerate().map(|(i, k)| (format!("key{i}"), k.expr.clone())),
            CompileOptions::rows(),
        )?;
        let pairs: Vec<_> = compiled
            .exprs
            .into_iter()
            .zip(keys.iter().map(|k| k.descending))
            .collect();
        let rows = self.indices(false);
        let order = RowOrder::build(&pairs, rows.iter().copied(), self.total_rows());
        Ok(self.create(ViewOptions::new().with_order(order)))
    }

    pub fn unorder(&self) -> View {
        self.create(ViewOptions::new().without_order())
    }

    /// One output row per group: the group keys followed by the aggregate expressions.
    pub fn rollup<N, S>(&self, exprs: impl IntoIterator<Item = (N, S)>) -> QueryResult<View>
    where
        N: Into<String>,
        S: Into<ExprSpec>,
    {
        let compiled = self.compile_exprs(exprs, CompileOptions::rollup())?;
        let ngroups = self.groups().map_or(1, |g| g.size);
        let ops = self.evaluate_ops(&compiled, GroupIndex::Direct);

        let mut table = ColumnTable::with_rows(ngroups);
        if let Some(groups) = self.groups() {
            for (k, name) in groups.names.iter().enumerate() {
                let values = (0..ngroups).map(|g| groups.values[g][k].clone()).collect();
                table.add_column(name.clone(), column_from_values(values))?;
            }
        }
        let mut env = Env::new(&ops);
        for (name, expr) in compiled.names.iter().zip(&compiled.exprs) {
            let values = (0..ngroups).map(|g| expr.eval(env.at(g))).collect();
            table.set_column(name.clone(), column_from_values(values))?;
        }
        log::debug!("rollup produced {} row(s)", ngroups);
        Ok(View::new(table).create(ViewOptions::new().with_params(self.params.clone())))
    }

    /// Row count per group, in a column named `name` (default `count`).
    pub fn count(&self, name: Option<&str>) -> QueryResult<View> {
        self.rollup([(name.unwrap_or("count"), "count()")])
    }
}

#[cfg(test)]
mod tests {
    use crate::view::{desc, View};
    use pretty_assertions::assert_eq;
    use tabula_columnar::{ColumnTable, Value};

    fn view() -> View {
        View::new(
            ColumnTable::from_values([
                ("g", vec!["a".into(), "b".into(), "a".into(), "b".into(), "c".into()]),
                ("x", vec![1.into(), 2.into(), 3.into(), Value::Null, 5.into()]),
            ])
            .unwrap(),
        )
    }

    #[test]
    fn rollup_by_group() {
        let out = view()
            .groupby(&["g"])
            .unwrap()
            .rollup([("n", "count()"), ("total", "sum(d.x)"), ("valid", "valid(d.x)")])
            .unwrap();
        assert_eq!(out.column_names(), &["g", "n", "total", "valid"]);
        assert_eq!(
            out.rows(),
            vec![
                vec!["a".into(), 2.into(), 4.into(), 2.into()],
                vec!["b".into(), 2.into(), 2.into(), 1.into()],
                vec!["c".into(), 1.into(), 5.into(), 1.into()],
            ]
        );
    }

    #[test]
    fn ungrouped_rollup_has_one_row() {
        let out = view().rollup([("mean", "mean(d.x)"), ("spread", "max(d.x) - min(d.x)")]).unwrap();
        assert_eq!(out.rows(), vec![vec![Value::Number(2.75), Value::Number(4.0)]]);

        let empty = view().filter("false").unwrap().count(None).unwrap();
        assert_eq!(empty.rows(), vec![vec![Value::from(0)]]);
    }

    #[test]
    fn grouped_keys_survive_filtering() {
        let out = view()
            .groupby_with([("upper", "upper(d.g)")])
            .unwrap()
            .filter("d.g != 'b'")
            .unwrap()
            .count(Some("rows"))
            .unwrap();
        assert_eq!(
            out.rows(),
            vec![vec!["A".into(), 2.into()], vec!["C".into(), 1.into()]]
        );
    }

    #[test]
    fn orderby_descending_with_nulls_last() {
        let v = view().orderby([desc("d.x")]).unwrap();
        assert_eq!(
            v.column_values("x").unwrap(),
            vec![5.into(), 3.into(), 2.into(), 1.into(), Value::Null]
        );
        assert!(v.unorder().column_values("x").unwrap()[3].is_null());
    }
}
