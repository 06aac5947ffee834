use pretty_assertions::assert_eq;
use std::ops::ControlFlow;
use tabula_columnar::{ColumnSchema, ColumnType, TableBuilder};
use tabula_query::{desc, ScanOptions, Value, View, ViewOptions};

fn sales() -> View {
    let mut builder = TableBuilder::new(vec![
        ColumnSchema::new("region", ColumnType::String),
        ColumnSchema::new("units", ColumnType::Number),
        ColumnSchema::new("note", ColumnType::Any),
    ]);
    for (region, units, note) in [
        ("east", 5.0, Value::Null),
        ("west", 3.0, Value::from("rush")),
        ("east", 8.0, Value::Null),
        ("north", 1.0, Value::from("late")),
        ("west", 6.0, Value::Null),
        ("east", 2.0, Value::from("promo")),
    ] {
        builder.append_row(&[region.into(), units.into(), note]);
    }
    View::new(builder.finalize().unwrap())
}

#[test]
fn filter_on_dictionary_column_and_reify_is_idempotent() {
    let east = sales().filter("d.region === 'east'").unwrap();
    assert!(east.is_filtered());
    assert_eq!(east.num_rows(), 3);
    assert_eq!(east.total_rows(), 6);

    let reified = east.reify();
    assert!(!reified.is_filtered());
    assert_eq!(reified.total_rows(), 3);
    assert_eq!(reified.rows(), east.rows());
    assert_eq!(reified.reify().rows(), reified.rows());

    let nobody = sales().filter("d.region == 'south'").unwrap();
    assert_eq!(nobody.num_rows(), 0);
}

#[test]
fn clearing_the_filter_restores_every_group() {
    let expected = vec![
        vec!["east".into(), 3.into()],
        vec!["west".into(), 2.into()],
        vec!["north".into(), 1.into()],
    ];

    let narrowed = sales().groupby(&["region"]).unwrap().filter("d.units > 2").unwrap();
    assert_eq!(narrowed.groups().unwrap().size, 2);
    let widened = narrowed.create(ViewOptions::new().without_filter());
    let groups = widened.groups().unwrap();
    assert_eq!(groups.size, 3);
    assert!((0..6).all(|row| groups.group_of(row).is_some()));
    assert_eq!(widened.count(None).unwrap().rows(), expected);

    // grouped after filtering: the hidden north row still gets its group back
    let late = sales().filter("d.units > 4").unwrap().groupby(&["region"]).unwrap();
    assert_eq!(
        late.groups().unwrap().values,
        vec![vec![Value::from("east")], vec![Value::from("west")]]
    );
    let widened = late.create(ViewOptions::new().without_filter());
    assert_eq!(widened.count(None).unwrap().rows(), expected);
}

#[test]
fn filtering_a_grouped_view_drops_empty_groups() {
    let grouped = sales().groupby(&["region"]).unwrap();
    assert_eq!(grouped.groups().unwrap().size, 3);

    let big = grouped.filter("d.units > 2").unwrap();
    let groups = big.groups().unwrap();
    assert_eq!(groups.size, 2);
    assert_eq!(
        groups.values,
        vec![vec![Value::from("east")], vec![Value::from("west")]]
    );

    let counts = big.count(None).unwrap();
    assert_eq!(
        counts.rows(),
        vec![vec!["east".into(), 2.into()], vec!["west".into(), 2.into()]]
    );
}

#[test]
fn reify_reindexes_groups_and_keeps_order() {
    let view = sales()
        .groupby(&["region"])
        .unwrap()
        .orderby([desc("d.units")])
        .unwrap()
        .filter("d.units >= 3")
        .unwrap();
    let reified = view.reify();
    assert!(reified.is_grouped());
    assert!(reified.is_ordered());
    assert_eq!(
        reified.column_values("units").unwrap(),
        vec![8.into(), 6.into(), 5.into(), 3.into()]
    );
    let ranked = reified.derive([("rank", "rank()")]).unwrap();
    assert_eq!(
        ranked.column_values("rank").unwrap(),
        vec![1.into(), 1.into(), 2.into(), 2.into()]
    );
}

#[test]
fn scan_honors_order_offset_and_early_exit() {
    let view = sales().orderby(["d.units"]).unwrap();
    let mut seen = Vec::new();
    view.scan(ScanOptions::ordered().with_offset(1).with_limit(3), |row| {
        seen.push(row);
        ControlFlow::Continue(())
    });
    assert_eq!(seen, vec![5, 1, 0]);

    let mut first = None;
    view.scan(ScanOptions::default(), |row| {
        first = Some(row);
        ControlFlow::Break(())
    });
    assert_eq!(first, Some(0));
}

#[test]
fn unordered_indices_ignore_sort_but_partitions_follow_it() {
    let view = sales()
        .groupby(&["region"])
        .unwrap()
        .orderby(["d.units"])
        .unwrap();
    assert_eq!(&*view.indices(false), &[0, 1, 2, 3, 4, 5]);
    assert_eq!(&*view.indices(true), &[3, 5, 1, 0, 4, 2]);
    let parts = view.partitions(true);
    assert_eq!(parts.to_vec(), vec![vec![5, 0, 2], vec![1, 4], vec![3]]);
}
