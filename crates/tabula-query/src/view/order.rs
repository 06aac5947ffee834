use crate::expr::{Compiled, Env, ExprSpec, NoOps};
use std::cmp::Ordering;
use tabula_columnar::Value;

/// One `orderby` key: an expression and its direction.
#[derive(Clone, Debug)]
pub struct OrderKey {
    pub expr: ExprSpec,
    pub descending: bool,
}

pub fn asc(expr: impl Into<ExprSpec>) -> OrderKey {
    OrderKey {
        expr: expr.into(),
        descending: false,
    }
}

pub fn desc(expr: impl Into<ExprSpec>) -> OrderKey {
    OrderKey {
        expr: expr.into(),
        descending: true,
    }
}

impl From<&str> for OrderKey {
    fn from(expr: &str) -> Self {
        asc(expr)
    }
}

impl From<String> for OrderKey {
    fn from(expr: String) -> Self {
        asc(expr)
    }
}

impl From<ExprSpec> for OrderKey {
    fn from(expr: ExprSpec) -> Self {
        asc(expr)
    }
}

#[derive(Clone, Debug, PartialEq)]
struct SortColumn {
    /// Key value per data row; rows outside the view hold null.
    values: Vec<Value>,
    descending: bool,
}

/// Ordering overlay with sort keys evaluated once per row up front.
#[derive(Clone, Debug, PartialEq)]
pub struct RowOrder {
    keys: Vec<SortColumn>,
}

impl RowOrder {
    pub fn build(
        keys: &[(Compiled, bool)],
        rows: impl IntoIterator<Item = usize> + Clone,
        total: usize,
    ) -> Self {
        let mut env = Env::new(&NoOps);
        let keys = keys
            .iter()
            .map(|(expr, descending)| {
                let mut values = vec![Value::Null; total];
                for row in rows.clone() {
                    values[row] = expr.eval(env.at(row));
                }
                SortColumn {
                    values,
                    descending: *descending,
                }
            })
            .collect();
        Self { keys }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Compare two data rows. Invalid key values sort last in either direction.
    pub fn compare(&self, a: usize, b: usize) -> Ordering {
        for key in &self.keys {
            let (x, y) = (&key.values[a], &key.values[b]);
            let ord = match (x.is_valid(), y.is_valid()) {
                (false, false) => Ordering::Equal,
                (false, true) => Ordering::Greater,
                (true, false) => Ordering::Less,
                (true, true) if key.descending => y.total_cmp(x),
                (true, true) => x.total_cmp(y),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// Stable sort, so ties keep table order.
    pub fn sort(&self, rows: &mut [usize]) {
        rows.sort_by(|&a, &b| self.compare(a, b));
    }

    /// Order for a materialized table whose row `i` was row `rows[i]` of this one.
    pub fn take(&self, rows: &[usize]) -> Self {
        Self {
            keys: self
                .keys
                .iter()
                .map(|k| SortColumn {
                    values: rows.iter().map(|&r| k.values[r].clone()).collect(),
                    descending: k.descending,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tabula_columnar::ValueColumn;

    fn column(values: Vec<Value>) -> Compiled {
        Compiled::Column {
            table: 0,
            column: Arc::new(ValueColumn::new(values)),
        }
    }

    #[test]
    fn invalid_values_sort_last_both_ways() {
        let values = vec![Value::from(2), Value::Null, Value::from(1), Value::Number(f64::NAN)];
        for descending in [false, true] {
            let order = RowOrder::build(&[(column(values.clone()), descending)], 0..4, 4);
            let mut rows = vec![0, 1, 2, 3];
            order.sort(&mut rows);
            let expected = if descending { [0, 2] } else { [2, 0] };
            assert_eq!(&rows[..2], &expected);
            assert_eq!(&rows[2..], &[1, 3]);
        }
    }

    #[test]
    fn secondary_keys_break_ties() {
        let a = column(vec!["x".into(), "y".into(), "x".into()]);
        let b = column(vec![1.into(), 2.into(), 0.into()]);
        let order = RowOrder::build(&[(a, false), (b, true)], 0..3, 3);
        let mut rows = vec![0, 1, 2];
        order.sort(&mut rows);
        assert_eq!(rows, vec![0, 2, 1]);
        assert_eq!(order.take(&rows).compare(0, 1), Ordering::Less);
    }
}
