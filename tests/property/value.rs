use std::sync::Arc;

use copernicus::dataflow::file_list::FileList;
use copernicus::dataflow::item_path::ItemKey;
use copernicus::dataflow::literal::Literal;
use copernicus::dataflow::value::Value;
use copernicus::dataflow::vtype::{Field, Type};
use copernicus::fs::mock::MockFileSystem;
use proptest::prelude::*;

fn record() -> Arc<Type> {
    Type::record(
        "io",
        vec![
            Field::new("x", Type::int()),
            Field::new("y", Type::int()).optional(),
        ],
    )
}

proptest! {
    #[test]
    fn sequence_numbers_never_go_back(
        writes in proptest::collection::vec((any::<bool>(), -5i64..5, 0u64..20), 1..30),
    ) {
        let files = FileList::new("/projects/p", Arc::new(MockFileSystem::new()));
        let mut v = Value::new(record());
        for (to_x, val, seq) in writes {
            let key = [ItemKey::Field(if to_x { "x" } else { "y" }.into())];
            let node_before = v.get(&key).map_or(0, Value::seq_nr);
            let root_before = v.seq_nr();

            let written = v.write_at(&key, Literal::Int(val), seq, &files).unwrap();

            let node_after = v.get(&key).map_or(0, Value::seq_nr);
            prop_assert!(v.seq_nr() >= root_before);
            prop_assert!(node_after >= node_before);
            prop_assert_eq!(written, seq >= node_before);
            if written {
                prop_assert_eq!(v.get(&key).map(Value::to_literal), Some(Literal::Int(val)));
            }
        }
    }
}
