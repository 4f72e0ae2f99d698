mod common;

use common::{open_towns, towns};
use proptest::prelude::*;
use rowset::Value;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn moves_stay_within_boundary_positions(
        row_count in 0i64..80,
        fetch_size in 1usize..25,
        requests in prop::collection::vec(-200i64..200, 1..12),
    ) {
        let provider = towns(row_count);
        let rows = open_towns(&provider, fetch_size);
        let row_count = row_count as u64;

        for request in requests {
            let valid = rows.move_to(request).expect("move");
            let position = rows.row();
            prop_assert!(position <= row_count + 1);
            prop_assert_eq!(valid, position >= 1 && position <= row_count);
            if request <= 0 {
                prop_assert_eq!(position, 0);
            } else if request as u64 > row_count {
                prop_assert_eq!(position, row_count + 1);
            } else {
                prop_assert_eq!(position, request as u64);
            }
        }
    }

    #[test]
    fn relative_moves_clamp_for_any_offset(
        row_count in 0i64..60,
        start in -5i64..70,
        offsets in prop::collection::vec(
            prop_oneof![Just(i64::MIN), Just(i64::MAX), any::<i64>(), -100i64..100],
            1..10,
        ),
    ) {
        let provider = towns(row_count);
        let rows = open_towns(&provider, 10);
        let row_count = row_count as u64;
        rows.move_to(start).expect("move");

        for offset in offsets {
            let target = (rows.row() as i64).saturating_add(offset);
            let valid = rows.relative(offset).expect("relative");
            let position = rows.row();
            let expected = if target <= 0 {
                0
            } else {
                (target as u64).min(row_count + 1)
            };
            prop_assert_eq!(position, expected);
            prop_assert_eq!(valid, position >= 1 && position <= row_count);
        }
    }

    #[test]
    fn rows_of_one_batch_read_consistently(
        fetch_size in 1usize..20,
        batch in 0usize..6,
        first in 0usize..20,
        second in 0usize..20,
        column in 1usize..4,
    ) {
        let provider = towns(130);
        let rows = open_towns(&provider, fetch_size);
        let r1 = (batch * fetch_size + first % fetch_size + 1) as i64;
        let r2 = (batch * fetch_size + second % fetch_size + 1) as i64;

        rows.absolute(r1).expect("move to r1");
        let a = rows.get_cell(column).expect("read r1");
        rows.absolute(r2).expect("move to r2");
        let b = rows.get_cell(column).expect("read r2");
        rows.absolute(r1).expect("move back to r1");
        let again = rows.get_cell(column).expect("read r1 again");

        prop_assert_eq!(&a, &again);
        let expected = |row: i64| match column {
            1 => Value::Integer(row),
            2 => Value::Text(format!("town_{}", row)),
            _ => Value::Integer(row * 10),
        };
        prop_assert_eq!(a, expected(r1));
        prop_assert_eq!(b, expected(r2));
    }
}
