use granitedb_codec::key::{decode_key_tuple, encode_row_key};
use granitedb_codec::row::{decode_row, encode_row};
use granitedb_codec::schema::{ColumnSchema, TableSchema};
use granitedb_codec::{LogicalType, Value};
use granitedb_primitives::{col_list, ColId, DatabaseId, TableId};
use proptest::prelude::*;

fn leaf_value(ty: &LogicalType) -> BoxedStrategy<Value> {
    match ty {
        LogicalType::I64 => any::<i64>().prop_map(Value::I64).boxed(),
        LogicalType::U64 => any::<u64>().prop_map(Value::U64).boxed(),
        LogicalType::F64 => any::<f64>().prop_map(Value::F64).boxed(),
        LogicalType::String => ".*".prop_map(Value::String).boxed(),
        LogicalType::Bytes => proptest::collection::vec(any::<u8>(), 0..64)
            .prop_map(Value::Bytes)
            .boxed(),
        LogicalType::Timestamp => any::<i64>().prop_map(Value::Timestamp).boxed(),
        LogicalType::Bool => any::<bool>().prop_map(Value::Bool).boxed(),
        other => panic!("no strategy for {other}"),
    }
}

/// A three-column key schema exercising one fixed-width, one escaped and one
/// sign-flipped encoding.
fn key_schema() -> TableSchema {
    let types = [LogicalType::I64, LogicalType::String, LogicalType::Bytes];
    TableSchema {
        id: TableId::new(1),
        database_id: DatabaseId::new(1),
        name: "k".into(),
        columns: types
            .iter()
            .enumerate()
            .map(|(i, ty)| ColumnSchema {
                id: ColId::new(i as u64 + 1),
                name: format!("c{i}"),
                ty: ty.clone(),
                nullable: false,
                default: None,
            })
            .collect(),
        primary_key: col_list([ColId::new(1), ColId::new(2), ColId::new(3)]),
        options: Vec::new(),
    }
}

fn key_tuple() -> impl Strategy<Value = Vec<Value>> {
    (
        leaf_value(&LogicalType::I64),
        leaf_value(&LogicalType::String),
        leaf_value(&LogicalType::Bytes),
    )
        .prop_map(|(a, b, c)| vec![a, b, c])
}

fn payload_schema() -> TableSchema {
    let types = [
        LogicalType::Bool,
        LogicalType::I64,
        LogicalType::U64,
        LogicalType::F64,
        LogicalType::String,
        LogicalType::Bytes,
        LogicalType::Timestamp,
    ];
    TableSchema {
        id: TableId::new(2),
        database_id: DatabaseId::new(1),
        name: "p".into(),
        columns: types
            .iter()
            .enumerate()
            .map(|(i, ty)| ColumnSchema {
                id: ColId::new(i as u64 + 1),
                name: format!("c{i}"),
                ty: ty.clone(),
                nullable: true,
                default: None,
            })
            .collect(),
        primary_key: col_list([]),
        options: Vec::new(),
    }
}

fn payload_row() -> impl Strategy<Value = Vec<Value>> {
    let maybe = |ty: LogicalType| {
        prop_oneof![leaf_value(&ty), Just(Value::Null)]
    };
    (
        maybe(LogicalType::Bool),
        maybe(LogicalType::I64),
        maybe(LogicalType::U64),
        maybe(LogicalType::F64),
        maybe(LogicalType::String),
        maybe(LogicalType::Bytes),
        maybe(LogicalType::Timestamp),
    )
        .prop_map(|(a, b, c, d, e, f, g)| vec![a, b, c, d, e, f, g])
}

proptest! {
    /// Key encoding is order-preserving: byte order of encodings matches
    /// logical order of tuples.
    #[test]
    fn key_encoding_preserves_order(t1 in key_tuple(), t2 in key_tuple()) {
        let schema = key_schema();
        let k1 = encode_row_key(&schema, &t1).unwrap();
        let k2 = encode_row_key(&schema, &t2).unwrap();
        prop_assert_eq!(t1.cmp(&t2), k1.cmp(&k2));
    }

    /// Key encoding round-trips through the typed decoder.
    #[test]
    fn key_encoding_round_trips(t in key_tuple()) {
        let schema = key_schema();
        let encoded = encode_row_key(&schema, &t).unwrap();
        let (decoded, consumed) =
            decode_key_tuple(&encoded, &schema.primary_key_types()).unwrap();
        prop_assert_eq!(decoded, t);
        prop_assert_eq!(consumed, encoded.len());
    }

    /// Row payload encoding round-trips, nulls included.
    #[test]
    fn row_payload_round_trips(row in payload_row()) {
        let schema = payload_schema();
        let encoded = encode_row(&schema, &row).unwrap();
        prop_assert_eq!(decode_row(&schema, &encoded).unwrap(), row);
    }

    /// Encoding is deterministic: equal inputs, identical bytes.
    #[test]
    fn key_encoding_is_deterministic(t in key_tuple()) {
        let schema = key_schema();
        let a = encode_row_key(&schema, &t).unwrap();
        let b = encode_row_key(&schema, &t).unwrap();
        prop_assert_eq!(a, b);
    }
}
