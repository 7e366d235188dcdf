use lumbung::types::{
    error::DatabaseError,
    record::Record,
    value::{DataType, Value},
};

fn sample_record() -> Record {
    Record::new(vec![
        Value::Integer(-42),
        Value::Real(2.5),
        Value::Text("héllo".to_string()),
        Value::Blob(vec![0, 1, 0, 2]),
        Value::Null,
    ])
}

#[test]
fn test_round_trip_mixed_columns() {
    let record = sample_record();
    let bytes = record.encode();
    assert_eq!(bytes.len(), record.encoded_size());
    assert_eq!(Record::decode(&bytes).unwrap(), record);
}

#[test]
fn test_round_trip_extremes() {
    let record = Record::new(vec![
        Value::Integer(i64::MIN),
        Value::Integer(i64::MAX),
        Value::Real(f64::MIN_POSITIVE),
        Value::Text(String::new()),
        Value::Blob(Vec::new()),
    ]);
    assert_eq!(Record::decode(&record.encode()).unwrap(), record);
    assert_eq!(Record::decode(&Record::default().encode()).unwrap(), Record::default());
}

#[test]
fn test_blob_keeps_embedded_nulls() {
    let record = Record::new(vec![Value::Blob(vec![0; 16])]);
    let decoded = Record::decode(&record.encode()).unwrap();
    assert_eq!(decoded.blob(0).unwrap(), &[0u8; 16]);
}

#[test]
fn test_typed_accessors_do_not_coerce() {
    let record = sample_record();
    assert_eq!(record.integer(0).unwrap(), -42);
    assert_eq!(record.text(2).unwrap(), "héllo");
    assert!(record.is_null(4).unwrap());

    let err = record.integer(1).unwrap_err();
    assert!(matches!(
        err,
        DatabaseError::TypeMismatch {
            expected: DataType::Integer,
            actual: DataType::Real
        }
    ));
    assert!(matches!(
        record.get(9),
        Err(DatabaseError::ColumnIndexOutOfBounds { index: 9 })
    ));
}

#[test]
fn test_set_replaces_column() {
    let mut record = sample_record();
    record.set(0, Value::Integer(1)).unwrap();
    assert_eq!(record.integer(0).unwrap(), 1);
    assert!(record.set(10, Value::Null).is_err());
}

#[test]
fn test_decode_rejects_short_buffer() {
    assert!(matches!(
        Record::decode(&[1, 2, 3]),
        Err(DatabaseError::MalformedRecord { .. })
    ));
}

#[test]
fn test_decode_rejects_length_past_end() {
    let mut bytes = Record::new(vec![Value::Text("abc".into())]).encode();
    // Length field of the only text column follows the single tag byte.
    bytes[9..13].copy_from_slice(&100u32.to_le_bytes());
    assert!(matches!(
        Record::decode(&bytes),
        Err(DatabaseError::MalformedRecord { .. })
    ));
}

#[test]
fn test_decode_rejects_inconsistent_column_count() {
    let mut bytes = Record::new(vec![Value::Integer(1), Value::Integer(2)]).encode();
    bytes[4..8].copy_from_slice(&7u32.to_le_bytes());
    assert!(matches!(
        Record::decode(&bytes),
        Err(DatabaseError::MalformedRecord { .. })
    ));
}

#[test]
fn test_decode_rejects_unknown_tag_and_trailing_bytes() {
    let mut bytes = Record::new(vec![Value::Integer(1)]).encode();
    bytes[8] = 42;
    assert!(Record::decode(&bytes).is_err());

    let mut bytes = Record::new(vec![Value::Integer(1)]).encode();
    bytes.push(0);
    assert!(Record::decode(&bytes).is_err());
}

#[test]
fn test_decode_rejects_invalid_utf8() {
    let mut bytes = Record::new(vec![Value::Text("ab".into())]).encode();
    let len = bytes.len();
    bytes[len - 2] = 0xff;
    assert!(matches!(
        Record::decode(&bytes),
        Err(DatabaseError::MalformedRecord { .. })
    ));
}
