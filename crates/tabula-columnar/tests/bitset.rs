use proptest::prelude::*;
use std::collections::BTreeSet;
use tabula_columnar::BitSet;

#[derive(Clone, Debug)]
enum Op {
    Set(usize),
    Clear(usize),
}

fn arb_ops(len: usize) -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(
        prop_oneof![
            (0..len).prop_map(Op::Set),
            (0..len).prop_map(Op::Clear),
        ],
        0..200,
    )
}

fn arb_case() -> impl Strategy<Value = (usize, Vec<Op>)> {
    (1usize..300).prop_flat_map(|len| (Just(len), arb_ops(len)))
}

proptest! {
    #[test]
    fn count_and_scan_match_settled_operations((len, ops) in arb_case()) {
        let mut bits = BitSet::new(len);
        let mut model = BTreeSet::new();
        for op in ops {
            match op {
                Op::Set(i) => {
                    bits.set(i);
                    model.insert(i);
                }
                Op::Clear(i) => {
                    bits.clear(i);
                    model.remove(&i);
                }
            }
        }

        prop_assert_eq!(bits.count(), model.len());

        let mut visited = Vec::new();
        bits.scan(|i| visited.push(i));
        prop_assert_eq!(visited, model.iter().copied().collect::<Vec<_>>());

        for (k, expected) in model.iter().enumerate() {
            prop_assert_eq!(bits.nth(k), Some(*expected));
        }

        let first = model.iter().next().copied();
        prop_assert_eq!(bits.next(0), first);
    }

    #[test]
    fn complement_partitions_the_range((len, ops) in arb_case()) {
        let mut bits = BitSet::new(len);
        for op in ops {
            if let Op::Set(i) = op {
                bits.set(i);
            }
        }
        let mut inverted = bits.clone();
        inverted.not_inplace();
        prop_assert_eq!(bits.count() + inverted.count(), len);

        let mut both = bits.clone();
        both.and_inplace(&inverted);
        prop_assert_eq!(both.count(), 0);

        let mut either = bits;
        either.or_inplace(&inverted);
        prop_assert!(either.all_set());
    }
}
