use pretty_assertions::assert_eq;
use tabula_query::{ColumnTable, JoinOn, JoinOptions, JoinValues, QueryError, Value, View};

fn keyed(keys: Vec<Value>, label: &str) -> View {
    let labels = (0..keys.len())
        .map(|i| Value::from(format!("{label}{i}")))
        .collect();
    View::new(ColumnTable::from_values([("key", keys), (label, labels)]).unwrap())
}

fn left() -> View {
    keyed(vec![1.into(), 2.into(), 2.into()], "l")
}

fn right() -> View {
    keyed(vec![2.into(), 3.into()], "r")
}

fn join(options: JoinOptions) -> View {
    left()
        .join(&right(), JoinOn::columns(&["key"]), JoinValues::Auto, options)
        .unwrap()
}

#[test]
fn inner_join_pairs_every_match() {
    let out = join(JoinOptions::inner());
    assert_eq!(out.column_names(), &["key", "l", "r"]);
    assert_eq!(
        out.rows(),
        vec![
            vec![2.into(), "l1".into(), "r0".into()],
            vec![2.into(), "l2".into(), "r0".into()],
        ]
    );
}

#[test]
fn outer_joins_add_unmatched_rows_once() {
    let left_outer = join(JoinOptions::left());
    assert_eq!(
        left_outer.rows(),
        vec![
            vec![1.into(), "l0".into(), Value::Null],
            vec![2.into(), "l1".into(), "r0".into()],
            vec![2.into(), "l2".into(), "r0".into()],
        ]
    );

    let full = join(JoinOptions::full());
    let inner = join(JoinOptions::inner()).num_rows();
    assert_eq!(full.num_rows(), inner + 1 + 1);
    assert_eq!(
        full.rows().last().cloned(),
        Some(vec![3.into(), Value::Null, "r1".into()])
    );
}

#[test]
fn null_keys_never_join() {
    let l = keyed(vec![Value::Null, 2.into()], "l");
    let r = keyed(vec![Value::Null, 2.into()], "r");
    let out = l
        .join(&r, JoinOn::Auto, JoinValues::Auto, JoinOptions::inner())
        .unwrap();
    assert_eq!(out.rows(), vec![vec![2.into(), "l1".into(), "r1".into()]]);

    let nulls_equal = l
        .join(
            &r,
            JoinOn::predicate("(a, b) => equal(a.key, b.key)"),
            JoinValues::exprs([("l", "d1.l"), ("r", "d2.r")]),
            JoinOptions::inner(),
        )
        .unwrap();
    assert_eq!(nulls_equal.num_rows(), 2);
}

#[test]
fn join_respects_filters_and_order_of_the_left_side() {
    let l = left().filter("d.l != 'l1'").unwrap().orderby([tabula_query::desc("d.l")]).unwrap();
    let out = l
        .join(&right(), JoinOn::columns(&["key"]), JoinValues::Auto, JoinOptions::left())
        .unwrap();
    assert_eq!(
        out.column_values("l").unwrap(),
        vec![Value::from("l2"), Value::from("l0")]
    );
}

#[test]
fn auto_join_needs_shared_columns() {
    let other = View::new(ColumnTable::from_values([("x", vec![Value::from(1)])]).unwrap());
    assert_eq!(
        left()
            .join(&other, JoinOn::Auto, JoinValues::Auto, JoinOptions::inner())
            .unwrap_err(),
        QueryError::JoinKeyMismatch { left: 0, right: 0 }
    );
}
