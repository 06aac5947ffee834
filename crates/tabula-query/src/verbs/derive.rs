use super::{column_from_values, GroupIndex, Placement};
use crate::error::QueryResult;
use crate::expr::{CompileOptions, Env, ExprSpec, Params};
use crate::view::{View, ViewOptions};
use std::sync::Arc;
use tabula_columnar::{BitSet, ColumnTable, Value};

impl View {
    /// Keep rows where `predicate` is truthy. Aggregates and window functions are allowed and
    /// see the rows visible before filtering.
    pub fn filter(&self, predicate: impl Into<ExprSpec>) -> QueryResult<View> {
        let compiled = self.compile_exprs([("filter", predicate)], CompileOptions::derive())?;
        let ops = self.evaluate_ops(&compiled, GroupIndex::Single);
        let mut env = Env::new(&ops);
        let mut mask = BitSet::new(self.total_rows());
        for &row in self.indices(false).iter() {
            if compiled.exprs[0].eval(env.at(row)).truthy() {
                mask.set(row);
            }
        }
        log::debug!("filter kept {} of {} row(s)", mask.count(), self.num_rows());
        Ok(self.create(ViewOptions::new().with_filter(mask)))
    }

    /// Add (or replace) columns computed per row. Aggregates are evaluated over each row's
    /// group; window functions over its ordered partition.
    pub fn derive<N, S>(&self, exprs: impl IntoIterator<Item = (N, S)>) -> QueryResult<View>
    where
        N: Into<String>,
        S: Into<ExprSpec>,
    {
        self.derive_at(exprs, Placement::default())
    }

    /// [`View::derive`], then move the new columns next to the placement anchor.
    pub fn derive_at<N, S>(
        &self,
        exprs: impl IntoIterator<Item = (N, S)>,
        placement: Placement,
    ) -> QueryResult<View>
    where
        N: Into<String>,
        S: Into<ExprSpec>,
    {
        let compiled = self.compile_exprs(exprs, CompileOptions::derive())?;
        let ops = self.evaluate_ops(&compiled, GroupIndex::Single);
        let total = self.total_rows();
        let rows = self.indices(false);

        let mut env = Env::new(&ops);
        let mut data: ColumnTable = (*self.data).clone();
        for (name, expr) in compiled.names.iter().zip(&compiled.exprs) {
            let mut values = vec![Value::Null; total];
            for &row in rows.iter() {
                values[row] = expr.eval(env.at(row));
            }
            data.set_column(name.clone(), column_from_values(values))?;
        }

        let order = placement.apply(data.names(), &compiled.names)?;
        if order.as_slice() != data.names() {
            let pairs: Vec<(String, String)> = order.iter().map(|n| (n.clone(), n.clone())).collect();
            data = data.project(&pairs)?;
        }
        log::debug!("derived {} column(s)", compiled.len());
        Ok(self.create(ViewOptions::new().with_data(data)))
    }

    /// Merge named parameters into the view; later values win.
    pub fn params<K: Into<String>>(&self, values: impl IntoIterator<Item = (K, Value)>) -> View {
        let mut params: Params = (*self.params).clone();
        params.extend(values.into_iter().map(|(k, v)| (k.into(), v)));
        self.create(ViewOptions::new().with_params(Arc::new(params)))
    }
}

#[cfg(test)]
mod tests {
    use crate::expr::{escape, rolling};
    use crate::verbs::Placement;
    use crate::view::View;
    use crate::window::Frame;
    use pretty_assertions::assert_eq;
    use tabula_columnar::{ColumnTable, Value};

    fn view() -> View {
        View::new(
            ColumnTable::from_values([
                ("g", vec!["a".into(), "a".into(), "b".into(), "b".into()]),
                ("x", vec![1.into(), 2.into(), 3.into(), 4.into()]),
            ])
            .unwrap(),
        )
    }

    fn nums(values: &[f64]) -> Vec<Value> {
        values.iter().map(|v| Value::Number(*v)).collect()
    }

    #[test]
    fn filter_with_params_and_aggregates() {
        let v = view().params([("lo", Value::from(2))]);
        assert_eq!(v.parameters().get("lo"), Some(&Value::from(2)));
        let f = v.filter("d.x >= $.lo").unwrap();
        assert_eq!(f.column_values("x").unwrap(), nums(&[2.0, 3.0, 4.0]));
        assert_eq!(f.parameters(), v.parameters());

        let above = view().groupby(&["g"]).unwrap().filter("d.x > mean(d.x)").unwrap();
        assert_eq!(above.column_values("x").unwrap(), nums(&[2.0, 4.0]));
    }

    #[test]
    fn derive_grouped_and_windowed() {
        let v = view()
            .groupby(&["g"])
            .unwrap()
            .orderby(["d.x"])
            .unwrap()
            .derive([
                ("share", "d.x / sum(d.x)"),
                ("rn", "row_number()"),
                ("prev", "lag(d.x, 1, 0)"),
            ])
            .unwrap();
        assert_eq!(
            v.column_values("share").unwrap(),
            nums(&[1.0 / 3.0, 2.0 / 3.0, 3.0 / 7.0, 4.0 / 7.0])
        );
        assert_eq!(v.column_values("rn").unwrap(), nums(&[1.0, 2.0, 1.0, 2.0]));
        assert_eq!(v.column_values("prev").unwrap(), nums(&[0.0, 1.0, 0.0, 3.0]));
    }

    #[test]
    fn rolling_sum() {
        let v = view()
            .orderby(["d.x"])
            .unwrap()
            .derive([
                ("running", rolling("sum(d.x)", Frame::default(), false)),
                ("pair", rolling("sum(d.x)", Frame::new(Some(-1), Some(0)), false)),
            ])
            .unwrap();
        assert_eq!(v.column_values("running").unwrap(), nums(&[1.0, 3.0, 6.0, 10.0]));
        assert_eq!(v.column_values("pair").unwrap(), nums(&[1.0, 3.0, 5.0, 7.0]));
    }

    #[test]
    fn derive_replaces_and_places() {
        let v = view()
            .derive_at([("y", "d.x * 10")], Placement::before("x"))
            .unwrap();
        assert_eq!(v.column_names(), &["g", "y", "x"]);
        let v = v.derive([("x", escape(|row, _| Value::from(row.get("x").to_f64() + 0.5)))]).unwrap();
        assert_eq!(v.column_names(), &["g", "y", "x"]);
        assert_eq!(v.get("x", 0), Some(Value::Number(1.5)));
    }
}
