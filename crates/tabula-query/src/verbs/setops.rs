use super::column_from_values;
use crate::error::QueryResult;
use crate::join::JoinOn;
use crate::view::{View, ViewOptions};
use tabula_columnar::{ColumnTable, Value};

impl View {
    /// Stack the visible rows of `others` under this view's rows, in sort order. Output columns
    /// are this view's; columns missing from another view read as null and extra ones are
    /// dropped.
    pub fn concat(&self, others: &[&View]) -> QueryResult<View> {
        let views: Vec<&View> = std::iter::once(self).chain(others.iter().copied()).collect();
        let rows: Vec<_> = views.iter().map(|v| v.indices(true)).collect();
        let total = rows.iter().map(|r| r.len()).sum();

        let mut table = ColumnTable::with_rows(total);
        for name in self.column_names() {
            let mut values = Vec::with_capacity(total);
            for (view, rows) in views.iter().zip(&rows) {
                match view.column(name) {
                    Some(column) => values.extend(rows.iter().map(|&r| column.get(r))),
                    None => values.extend(std::iter::repeat(Value::Null).take(rows.len())),
                }
            }
            table.add_column(name.clone(), column_from_values(values))?;
        }
        log::debug!("concat of {} view(s) produced {} row(s)", views.len(), total);
        Ok(View::new(table).create(ViewOptions::new().with_params(self.parameters().clone())))
    }

    /// [`View::concat`] without duplicate rows.
    pub fn union(&self, others: &[&View]) -> QueryResult<View> {
        self.concat(others)?.dedupe(&[])
    }

    /// Distinct rows of this view that also appear in every other view, compared on all of
    /// this view's columns. Rows with a null or NaN cell never match.
    pub fn intersect(&self, others: &[&View]) -> QueryResult<View> {
        let on = JoinOn::Columns(self.column_names().to_vec());
        let mut out = self.dedupe(&[])?;
        for other in others {
            out = out.semijoin(other, on.clone())?;
        }
        Ok(out)
    }

    /// Distinct rows of this view that appear in none of the other views.
    pub fn except(&self, others: &[&View]) -> QueryResult<View> {
        let on = JoinOn::Columns(self.column_names().to_vec());
        let mut out = self.dedupe(&[])?;
        for other in others {
            out = out.antijoin(other, on.clone())?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use crate::view::View;
    use pretty_assertions::assert_eq;
    use tabula_columnar::{ColumnTable, Value};

    fn table(keys: &[i32], labels: &[&str]) -> View {
        View::new(
            ColumnTable::from_values([
                ("k", keys.iter().map(|&k| Value::from(k)).collect()),
                ("s", labels.iter().map(|&s| Value::from(s)).collect()),
            ])
            .unwrap(),
        )
    }

    #[test]
    fn concat_fills_missing_columns() {
        let a = table(&[1, 2], &["a", "b"]);
        let b = View::new(ColumnTable::from_values([("k", vec![Value::from(3)])]).unwrap());
        let out = a.concat(&[&b]).unwrap();
        assert_eq!(
            out.rows(),
            vec![
                vec![1.into(), "a".into()],
                vec![2.into(), "b".into()],
                vec![3.into(), Value::Null],
            ]
        );
    }

    #[test]
    fn union_intersect_except() {
        let a = table(&[1, 2, 2, 3], &["a", "b", "b", "c"]);
        let b = table(&[2, 3, 4], &["b", "x", "d"]);

        let union = a.union(&[&b]).unwrap();
        assert_eq!(union.num_rows(), 5);

        let both = a.intersect(&[&b]).unwrap();
        assert_eq!(both.rows(), vec![vec![2.into(), "b".into()]]);

        let only_a = a.except(&[&b]).unwrap();
        assert_eq!(
            only_a.rows(),
            vec![vec![1.into(), "a".into()], vec![3.into(), "c".into()]]
        );
    }
}
