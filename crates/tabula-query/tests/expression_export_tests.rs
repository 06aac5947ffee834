use pretty_assertions::assert_eq;
use tabula_query::expr::{compile, CompileContext, CompileOptions, Env, NoOps};
use std::sync::Arc;
use tabula_query::{rolling, ColumnTable, ExprSpec, Frame, Node, Params, QueryError, Value, View};

fn table() -> Arc<ColumnTable> {
    Arc::new(
        ColumnTable::from_values([
            ("price", vec![Value::from(10), Value::from(4)]),
            ("qty", vec![Value::from(3), Value::Null]),
        ])
        .unwrap(),
    )
}

#[test]
fn exported_tree_resolves_references_and_round_trips() {
    let tables = [table()];
    let params: Arc<Params> = Arc::new([("rate".to_string(), Value::from(0.5))].into());
    let ctx = CompileContext {
        tables: &tables,
        params: &params,
        options: CompileOptions::rows(),
    };
    let compiled = compile([("total", "(r, $) => r.price * (r.qty ?? 0) * $.rate")], &ctx).unwrap();

    let json = compiled.to_json(0).unwrap();
    let tree: Node = serde_json::from_value(json).unwrap();
    assert_eq!(Some(&tree), compiled.asts[0].as_ref());
    assert_eq!(
        compiled.to_source(0).unwrap(),
        "(d, $) => ((d.price * (d.qty ?? 0)) * $.rate)"
    );

    let again = compile([("total", ExprSpec::Ast(tree))], &ctx).unwrap();
    let mut env = Env::new(&NoOps);
    assert_eq!(again.exprs[0].eval(env.at(0)), Value::from(15));
    assert_eq!(again.exprs[0].eval(env.at(1)), Value::from(0));
}

#[test]
fn compile_errors_carry_the_offending_snippet() {
    let view = View::new(table());
    let err = view.filter("d.price > limit").unwrap_err();
    let QueryError::InvalidReference { snippet, hint, .. } = &err else {
        panic!("unexpected error {err:?}");
    };
    assert_eq!(snippet, "limit");
    assert!(hint.is_some());

    assert!(matches!(
        view.filter("d.price = 3"),
        Err(QueryError::UnsupportedSyntax { .. })
    ));
    assert!(matches!(
        view.rollup([("bad", "d.price")]),
        Err(QueryError::InvalidReference { .. })
    ));
    assert!(matches!(
        view.derive([("bad", "sum(mean(d.price))")]),
        Err(QueryError::InvalidCall { .. })
    ));
}

#[test]
fn rolling_frame_survives_export() {
    let view = View::new(
        ColumnTable::from_values([("x", vec![1.into(), 2.into(), 3.into(), 4.into()])]).unwrap(),
    );
    let running = view
        .derive([("s", rolling("sum(d.x)", Frame::default(), false))])
        .unwrap();
    let expected: Vec<Value> = [1, 3, 6, 10].into_iter().map(Value::from).collect();
    assert_eq!(running.column_values("s").unwrap(), expected);

    let tables = [view.data().clone()];
    let params = Arc::new(Params::new());
    let ctx = CompileContext {
        tables: &tables,
        params: &params,
        options: CompileOptions::derive(),
    };
    let compiled = compile(
        [("s", rolling("sum(d.x)", Frame::new(None, Some(0)), false))],
        &ctx,
    )
    .unwrap();
    let source = compiled.to_source(0).unwrap();
    assert_eq!(source, "(d, $) => rolling(sum(d.x), [null, 0], false)");
    let tree: Node = serde_json::from_value(compiled.to_json(0).unwrap()).unwrap();

    let from_tree = view.derive([("s", ExprSpec::Ast(tree))]).unwrap();
    assert_eq!(from_tree.column_values("s").unwrap(), expected);
    let from_source = view.derive([("s", source.as_str())]).unwrap();
    assert_eq!(from_source.column_values("s").unwrap(), expected);
}
